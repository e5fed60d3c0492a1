//! Command-line overrides using the reserved `---` marker
//!
//! `---packages.python.version=3.11` sets a store value before any package is
//! read. `---help`, `---version` and `---trace` are launcher flags. Anything
//! else starting with the marker but lacking `=` is rejected.

use crate::config::{ConfigError, KvStore};

/// Prefix marking an argument as meant for the launcher
pub const OVERRIDE_MARKER: &str = "---";

const FLAG_HELP: &str = "help";
const FLAG_VERSION: &str = "version";
const FLAG_TRACE: &str = "trace";

/// Overrides and launcher flags extracted from a raw argument list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentOverrides {
    /// `(path, raw value)` pairs in command-line order
    pub values: Vec<(String, String)>,
    pub help: bool,
    pub version: bool,
    pub trace: bool,
}

impl ArgumentOverrides {
    /// Extract overrides from raw arguments. Arguments without the marker
    /// are ignored here; see [`strip_overrides`].
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self, OverrideError> {
        let mut overrides = Self::default();

        for arg in args {
            let Some(body) = marker_body(arg.as_ref()) else {
                continue;
            };

            match body.split_once('=') {
                Some((path, value)) => {
                    let path = path.trim();
                    if path.is_empty() || path.starts_with('.') || path.ends_with('.') {
                        return Err(OverrideError::Malformed(arg.as_ref().to_string()));
                    }
                    overrides.values.push((path.to_string(), value.to_string()));
                }
                None => match body {
                    FLAG_HELP => overrides.help = true,
                    FLAG_VERSION => overrides.version = true,
                    FLAG_TRACE => overrides.trace = true,
                    _ => return Err(OverrideError::Malformed(arg.as_ref().to_string())),
                },
            }
        }

        Ok(overrides)
    }

    /// Whether the launch should stop before executing anything
    pub fn short_circuits(&self) -> bool {
        self.help || self.version
    }

    /// Write every override into the store, in order
    pub fn apply(&self, store: &mut KvStore) -> Result<(), ConfigError> {
        for (path, value) in &self.values {
            store.set_override(path, value)?;
        }
        Ok(())
    }
}

/// The text after the marker, if `arg` carries one. A bare `---` is an
/// ordinary argument.
fn marker_body(arg: &str) -> Option<&str> {
    arg.strip_prefix(OVERRIDE_MARKER).filter(|body| !body.is_empty())
}

/// Remove every marked argument, keeping the order of the rest
pub fn strip_overrides(args: Vec<String>) -> Vec<String> {
    args.into_iter()
        .filter(|arg| marker_body(arg).is_none())
        .collect()
}

/// Cheap pre-scan used before logging is configured
pub fn wants_trace<S: AsRef<str>>(args: &[S]) -> bool {
    args.iter()
        .any(|arg| marker_body(arg.as_ref()) == Some(FLAG_TRACE))
}

/// Usage text for the override syntax
pub fn override_usage() -> String {
    [
        "Launcher overrides (consumed before the program sees its arguments):",
        "  ---key.path=value   set a configuration value, e.g. ---packages.python.version=3.11",
        "  ---help             show this help and the known packages",
        "  ---version          show the launcher version",
        "  ---trace            enable trace logging",
    ]
    .join("\n")
}

/// Errors in override arguments
#[derive(Debug, thiserror::Error)]
pub enum OverrideError {
    #[error("Malformed override '{0}'. Expected '---key.path=value'")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_values_and_flags() {
        let args = ["---foo=bar", "--regular", "---hello.world=42", "---trace", "file.txt"];
        let overrides = ArgumentOverrides::parse(&args).unwrap();
        assert_eq!(
            overrides.values,
            vec![
                ("foo".to_string(), "bar".to_string()),
                ("hello.world".to_string(), "42".to_string())
            ]
        );
        assert!(overrides.trace);
        assert!(!overrides.short_circuits());
    }

    #[test]
    fn test_help_short_circuits() {
        let overrides = ArgumentOverrides::parse(&["---foo=bar", "---help"]).unwrap();
        assert!(overrides.help);
        assert!(overrides.short_circuits());
    }

    #[test]
    fn test_malformed_override() {
        assert!(matches!(
            ArgumentOverrides::parse(&["---foo"]),
            Err(OverrideError::Malformed(_))
        ));
        assert!(ArgumentOverrides::parse(&["---=value"]).is_err());
    }

    #[test]
    fn test_value_may_contain_equals() {
        let overrides = ArgumentOverrides::parse(&["---env.URL=http://host/?a=b"]).unwrap();
        assert_eq!(overrides.values[0].1, "http://host/?a=b");
    }

    #[test]
    fn test_strip_keeps_order_and_bare_marker() {
        let args = vec![
            "a".to_string(),
            "---x=1".to_string(),
            "---".to_string(),
            "---trace".to_string(),
            "b".to_string(),
        ];
        assert_eq!(strip_overrides(args), vec!["a", "---", "b"]);
    }

    #[test]
    fn test_apply_writes_store() {
        let mut store = KvStore::new();
        ArgumentOverrides::parse(&["---packages.python.version=3.11"])
            .unwrap()
            .apply(&mut store)
            .unwrap();
        let version: Option<String> = store.typed("packages.python.version").unwrap();
        assert_eq!(version.as_deref(), Some("3.11"));
    }
}
