//! Configuration resolution: merges values from manifest `conf` files, the
//! installation's suite-variables file, and command-line overrides into a
//! single key -> value mapping for a run.
//!
//! Unlike the teacher's TOML-schema configuration, atf's configuration
//! sources are the line-structured `key = value` files described in
//! DESIGN.md, not TOML, so `toml`/`serde` play no role here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::manifest::tokenizer;

/// A resolved key -> value mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMap(BTreeMap<String, String>);

impl ConfigMap {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merges `other` over `self`: keys present in `other` win.
    pub fn merged_over(mut self, other: &ConfigMap) -> Self {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: line {line}: malformed config record '{text}'")]
    Malformed {
        path: PathBuf,
        line: usize,
        text: String,
    },

    #[error("-v argument '{0}' is not of the form 'var=value' or 'var='")]
    UsageError(String),

    #[error("unknown installation configuration variable '{0}'")]
    UnknownVariable(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Parses a `key = value` config file's contents: one record per line,
/// `#`-introduced comments, blank lines ignored.
pub fn parse_config_file(path: &Path, contents: &str) -> ConfigResult<ConfigMap> {
    let mut map = ConfigMap::new();
    for (line_no, raw) in tokenizer::numbered_lines(contents) {
        let line = tokenizer::strip_comment(raw);
        if line.trim().is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError::Malformed {
                path: path.to_path_buf(),
                line: line_no,
                text: line.to_string(),
            });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::Malformed {
                path: path.to_path_buf(),
                line: line_no,
                text: line.to_string(),
            });
        }
        map.insert(key, value.trim());
    }
    Ok(map)
}

/// Parses a single `-v` command-line argument.
///
/// Grammar: exactly one `=` is required. `var=` (the `=` at the very end)
/// is legal and sets the value to the empty string; zero or more-than-one
/// `=` is a usage error. An empty key (`=value`) is accepted, matching the
/// original `atf_run::parse_vflag` this is grounded on.
pub fn parse_vflag(arg: &str) -> ConfigResult<(String, String)> {
    if arg.matches('=').count() != 1 {
        return Err(ConfigError::UsageError(arg.to_string()));
    }
    let (key, value) = arg.split_once('=').expect("exactly one '=' checked above");
    Ok((key.to_string(), value.to_string()))
}

/// Installation-baked configuration, modeled on the interface `atf-config`
/// exposes so the core can consume installation defaults without embedding
/// that query tool itself.
pub trait InstalledConfig: Send + Sync {
    /// Looks up a single installation variable; an unrecognized key is
    /// fatal, matching `atf-config`'s own behavior.
    fn get(&self, key: &str) -> ConfigResult<&str>;
}

/// [`InstalledConfig`] backed by compiled-in defaults, overridable by the
/// `ATF_WORKDIR`, `ATF_SHELL`, and `ATF_PKGDATADIR` environment variables
/// (spec.md §6).
#[derive(Debug, Clone)]
pub struct EnvInstalledConfig(BTreeMap<String, String>);

impl EnvInstalledConfig {
    pub fn from_env() -> Self {
        let mut map = BTreeMap::new();
        map.insert(
            "atf_workdir".to_string(),
            std::env::var("ATF_WORKDIR").unwrap_or_else(|_| "/var/tmp".to_string()),
        );
        map.insert(
            "atf_shell".to_string(),
            std::env::var("ATF_SHELL").unwrap_or_else(|_| "/bin/sh".to_string()),
        );
        map.insert(
            "atf_pkgdatadir".to_string(),
            std::env::var("ATF_PKGDATADIR").unwrap_or_else(|_| "/usr/share/atf".to_string()),
        );
        Self(map)
    }

    /// Tilde-expanded, matching how real installations set `ATF_WORKDIR`
    /// relative to an operator's home directory.
    pub fn workdir_root(&self) -> std::borrow::Cow<'_, str> {
        shellexpand::tilde(&self.0["atf_workdir"])
    }

    pub fn shell(&self) -> &str {
        &self.0["atf_shell"]
    }

    pub fn pkgdatadir(&self) -> &str {
        &self.0["atf_pkgdatadir"]
    }
}

impl InstalledConfig for EnvInstalledConfig {
    fn get(&self, key: &str) -> ConfigResult<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::UnknownVariable(key.to_string()))
    }
}

/// Resolves the final configuration mapping for a run (spec.md §3, §4.2).
///
/// Merge order, low to high: manifest `conf` files, the suite-variables
/// file located by `test_suite` under the installation's config directory,
/// then command-line overrides.
pub fn resolve(
    manifest_dir: &Path,
    atffile_conf: &[PathBuf],
    test_suite: &str,
    installed: &dyn InstalledConfig,
    cli_overrides: &[(String, String)],
) -> ConfigResult<ConfigMap> {
    let mut resolved = ConfigMap::new();

    for rel in atffile_conf {
        let path = manifest_dir.join(rel);
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        resolved = resolved.merged_over(&parse_config_file(&path, &contents)?);
    }

    let vars_path = suite_variables_path(installed, test_suite);
    if vars_path.is_file() {
        let contents = std::fs::read_to_string(&vars_path).map_err(|source| ConfigError::Io {
            path: vars_path.clone(),
            source,
        })?;
        resolved = resolved.merged_over(&parse_config_file(&vars_path, &contents)?);
    }

    let mut cli = ConfigMap::new();
    for (k, v) in cli_overrides {
        cli.insert(k.clone(), v.clone());
    }
    resolved = resolved.merged_over(&cli);

    Ok(resolved)
}

fn suite_variables_path(installed: &dyn InstalledConfig, test_suite: &str) -> PathBuf {
    let pkgdatadir = installed.get("atf_pkgdatadir").unwrap_or("/usr/share/atf");
    PathBuf::from(pkgdatadir).join(test_suite).join("vars.conf")
}
