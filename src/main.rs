//! atf-run CLI - core test-suite driver.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use atf_run::config::{self, EnvInstalledConfig};
use atf_run::driver::Driver;
use atf_run::events::EventWriter;
use atf_run::signals::{self, ShutdownFlag};

/// Runs a test suite, executing each test case in an isolated process.
///
/// Without positional arguments, reads `./Atffile` and runs every test
/// program it names. Positional arguments, if given, override the
/// manifest's own program list.
#[derive(Parser)]
#[command(name = "atf-run")]
#[command(about = "Core test-suite driver", long_about = None)]
#[command(version)]
struct Cli {
    /// Set a configuration variable, overriding the manifest and
    /// installation defaults (repeatable).
    #[arg(short = 'v', value_name = "var=value")]
    vflags: Vec<String>,

    /// Verbose output
    #[arg(long)]
    verbose: bool,

    /// Test programs or directories to run, overriding the manifest's
    /// `tps` list.
    programs: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli_vflags: Vec<(String, String)> = cli
        .vflags
        .iter()
        .map(|raw| config::parse_vflag(raw))
        .collect::<Result<Vec<_>, _>>()
        .context("invalid -v argument")?;

    let installed = EnvInstalledConfig::from_env();
    info!(workdir = %installed.workdir_root(), "starting run");

    let shutdown = ShutdownFlag::new();
    signals::install(shutdown.clone()).context("failed to install signal handlers")?;

    let atffile_path: &Path = Path::new("Atffile");
    let writer = EventWriter::new(std::io::stdout());
    let driver = Driver::new(&installed, shutdown.clone(), writer);

    let ok = driver.run(atffile_path, &cli.programs, &cli_vflags).await?;

    if let Some(signum) = shutdown.signal() {
        std::process::exit(128 + signum);
    }
    std::process::exit(if ok { 0 } else { 1 });
}
