//! # atf-run
//!
//! Core test-suite driver: discovers test programs named by a suite
//! manifest, runs each test case in an isolated process, arbitrates its
//! outcome, and emits a structured event stream documenting the run.
//!
//! ## Architecture
//!
//! The crate is organized around the pipeline a single run follows:
//!
//! - [`manifest`] parses the two line-structured input formats: the suite
//!   manifest (`Atffile`) and the case listing a test program prints when
//!   asked for its metadata.
//! - [`config`] resolves the final key -> value configuration mapping for a
//!   run from manifest `conf` files, the installation's suite-variables
//!   file, and `-v` command-line overrides.
//! - [`requirements`] decides whether a case should be skipped before its
//!   body is ever spawned.
//! - [`workdir`] creates and guarantees the cleanup of per-case and shared
//!   temporary directories.
//! - [`executor`] spawns a case's body or cleanup phase as an isolated
//!   child process and enforces its timeout.
//! - [`arbiter`] reconciles a child's self-reported result file against its
//!   observed termination status into a final outcome.
//! - [`events`] serializes the totally ordered event stream a run produces.
//! - [`hooks`] invokes the installation's lifecycle scripts around a run.
//! - [`signals`] handles `SIGINT`/`SIGTERM`/`SIGHUP`/`SIGQUIT` for graceful
//!   shutdown between cases.
//! - [`driver`] ties all of the above into the recursive descent over a
//!   suite manifest.
//!
//! ## Quick Start
//!
//! ```no_run
//! use atf_run::config::EnvInstalledConfig;
//! use atf_run::driver::Driver;
//! use atf_run::events::EventWriter;
//! use atf_run::signals::{self, ShutdownFlag};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let installed = EnvInstalledConfig::from_env();
//!     let shutdown = ShutdownFlag::new();
//!     signals::install(shutdown.clone())?;
//!
//!     let writer = EventWriter::new(std::io::stdout());
//!     let driver = Driver::new(&installed, shutdown, writer);
//!     let ok = driver.run(std::path::Path::new("Atffile"), &[], &[]).await?;
//!
//!     std::process::exit(if ok { 0 } else { 1 });
//! }
//! ```

pub mod arbiter;
pub mod config;
pub mod driver;
pub mod events;
pub mod executor;
pub mod hooks;
pub mod manifest;
pub mod requirements;
pub mod signals;
pub mod workdir;

pub use arbiter::{TestCaseResult, TestCaseState};
pub use config::{ConfigMap, EnvInstalledConfig, InstalledConfig};
pub use driver::Driver;
pub use events::EventWriter;
pub use manifest::{AtfFile, CaseProps, TestProgramMetadata};
pub use signals::ShutdownFlag;
