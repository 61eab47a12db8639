//! Requirements evaluator: decides whether a test case should be skipped
//! before its body is ever spawned (spec.md §4.3).

use std::path::Path;

use crate::config::ConfigMap;
use crate::manifest::CaseProps;

#[derive(Debug, thiserror::Error)]
pub enum RequirementsError {
    #[error("'{property}' contains relative path with a separator: '{entry}'")]
    MalformedProgEntry { property: &'static str, entry: String },

    #[error("'require.user' value must be 'root' or 'unprivileged', got '{0}'")]
    BadUserRequirement(String),
}

pub type RequirementsResult<T> = Result<T, RequirementsError>;

/// The running platform's architecture and machine type, as consulted by
/// `require.arch` / `require.machine`.
#[derive(Debug, Clone)]
pub struct Platform {
    pub arch: String,
    pub machine: String,
}

impl Platform {
    /// Uses the compiled-in target architecture for both fields. Real atf
    /// installations distinguish instruction-set family (`arch`) from
    /// specific machine type (`machine`); this core has no second source of
    /// truth for the latter, so both resolve to the same value.
    pub fn current() -> Self {
        let arch = std::env::consts::ARCH.to_string();
        Self {
            machine: arch.clone(),
            arch,
        }
    }
}

/// Whether the current process is running as root, as consulted by
/// `require.user`.
pub fn running_as_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Evaluates a case's `require.*` properties against the resolved config and
/// platform. Returns `Some(reason)` to skip the case, `None` to proceed.
///
/// Evaluated in the order given in spec.md §4.3; the first failing
/// requirement wins.
pub fn evaluate(
    props: &CaseProps,
    config: &ConfigMap,
    platform: &Platform,
    is_root: bool,
) -> RequirementsResult<Option<String>> {
    if let Some(reason) = check_one_of("require.arch", props, &platform.arch)? {
        return Ok(Some(reason));
    }
    if let Some(reason) = check_one_of("require.machine", props, &platform.machine)? {
        return Ok(Some(reason));
    }
    if let Some(reason) = check_config(props, config) {
        return Ok(Some(reason));
    }
    if let Some(reason) = check_files(props) {
        return Ok(Some(reason));
    }
    if let Some(reason) = check_progs(props)? {
        return Ok(Some(reason));
    }
    if let Some(reason) = check_user(props, is_root)? {
        return Ok(Some(reason));
    }
    Ok(None)
}

fn check_one_of(
    property: &'static str,
    props: &CaseProps,
    actual: &str,
) -> RequirementsResult<Option<String>> {
    let Some(raw) = props.get(property) else {
        return Ok(None);
    };
    let allowed: Vec<&str> = raw.split_whitespace().collect();
    if allowed.is_empty() || allowed.contains(&actual) {
        Ok(None)
    } else {
        Ok(Some(format!("Requires one of: {}", allowed.join(" "))))
    }
}

fn check_config(props: &CaseProps, config: &ConfigMap) -> Option<String> {
    let raw = props.get("require.config")?;
    for key in raw.split_whitespace() {
        let defined = config.get(key).map(|v| !v.is_empty()).unwrap_or(false);
        if !defined {
            return Some(format!("Required config variable {key} not defined"));
        }
    }
    None
}

fn check_files(props: &CaseProps) -> Option<String> {
    let raw = props.get("require.files")?;
    for path in raw.split_whitespace() {
        if !Path::new(path).exists() {
            return Some(format!("Required file {path} not found"));
        }
    }
    None
}

fn check_progs(props: &CaseProps) -> RequirementsResult<Option<String>> {
    let Some(raw) = props.get("require.progs") else {
        return Ok(None);
    };
    for prog in raw.split_whitespace() {
        let found = if prog.starts_with('/') {
            Path::new(prog).exists()
        } else if prog.contains('/') {
            return Err(RequirementsError::MalformedProgEntry {
                property: "require.progs",
                entry: prog.to_string(),
            });
        } else {
            find_in_path(prog)
        };
        if !found {
            return Ok(Some(format!("Required program {prog} not found")));
        }
    }
    Ok(None)
}

fn check_user(props: &CaseProps, is_root: bool) -> RequirementsResult<Option<String>> {
    let Some(raw) = props.get("require.user") else {
        return Ok(None);
    };
    match raw {
        "root" if !is_root => Ok(Some("Requires root privileges".to_string())),
        "unprivileged" if is_root => Ok(Some("Must not be run as root".to_string())),
        "root" | "unprivileged" => Ok(None),
        other => Err(RequirementsError::BadUserRequirement(other.to_string())),
    }
}

fn find_in_path(prog: &str) -> bool {
    let Ok(path_var) = std::env::var("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| dir.join(prog).is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn props(entries: &[(&str, &str)]) -> CaseProps {
        let mut map = HashMap::new();
        for (k, v) in entries {
            map.insert(k.to_string(), v.to_string());
        }
        CaseProps(map)
    }

    #[test]
    fn no_requirements_proceeds() {
        let p = props(&[]);
        let platform = Platform::current();
        let config = ConfigMap::new();
        assert_eq!(evaluate(&p, &config, &platform, false).unwrap(), None);
    }

    #[test]
    fn arch_mismatch_skips() {
        let p = props(&[("require.arch", "bogus_arch_1 bogus_arch_2")]);
        let platform = Platform::current();
        let config = ConfigMap::new();
        let reason = evaluate(&p, &config, &platform, false).unwrap();
        assert!(reason.unwrap().starts_with("Requires one of:"));
    }

    #[test]
    fn arch_match_proceeds() {
        let platform = Platform::current();
        let p = props(&[("require.arch", platform.arch.as_str())]);
        let config = ConfigMap::new();
        assert_eq!(evaluate(&p, &config, &platform, false).unwrap(), None);
    }

    #[test]
    fn missing_config_var_skips() {
        let p = props(&[("require.config", "missing_key")]);
        let platform = Platform::current();
        let config = ConfigMap::new();
        let reason = evaluate(&p, &config, &platform, false).unwrap().unwrap();
        assert_eq!(reason, "Required config variable missing_key not defined");
    }

    #[test]
    fn present_config_var_proceeds() {
        let p = props(&[("require.config", "present_key")]);
        let platform = Platform::current();
        let mut config = ConfigMap::new();
        config.insert("present_key", "1");
        assert_eq!(evaluate(&p, &config, &platform, false).unwrap(), None);
    }

    #[test]
    fn missing_file_skips() {
        let p = props(&[("require.files", "/nonexistent/path/definitely")]);
        let platform = Platform::current();
        let config = ConfigMap::new();
        let reason = evaluate(&p, &config, &platform, false).unwrap().unwrap();
        assert!(reason.contains("not found"));
    }

    #[test]
    fn relative_prog_with_separator_is_malformed() {
        let p = props(&[("require.progs", "sub/dir/prog")]);
        assert!(check_progs(&p).is_err());
    }

    #[test]
    fn root_requirement_skips_unprivileged() {
        let p = props(&[("require.user", "root")]);
        let reason = check_user(&p, false).unwrap().unwrap();
        assert_eq!(reason, "Requires root privileges");
    }

    #[test]
    fn unprivileged_requirement_skips_root() {
        let p = props(&[("require.user", "unprivileged")]);
        let reason = check_user(&p, true).unwrap().unwrap();
        assert_eq!(reason, "Must not be run as root");
    }

    #[test]
    fn bad_user_requirement_value_is_an_error() {
        let p = props(&[("require.user", "wizard")]);
        assert!(check_user(&p, false).is_err());
    }
}
