//! Substitution engines for `${VAR}` and `{key}` patterns
//!
//! `${VAR}` and `${VAR:-default}` reference environment variables and are
//! only expanded for packages that enable `resolve`. `{version}`-style keys
//! reference the declaring package's own fields and are always expanded.

use crate::config::Version;
use indexmap::IndexMap;
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Regex for environment references: ${NAME} or ${NAME:-default}
static VARIABLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}").expect("valid variable pattern")
});

/// Regex for package keys: {version}, {version.major}, {id}, {tree}
static KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+(?:\.[a-z_]+)?)\}").expect("valid key pattern"));

/// Lookup chain for `${VAR}` references: the environment composed so far,
/// then the OS environment
#[derive(Debug, Clone, Copy)]
pub struct SubstitutionContext<'a> {
    /// Variables composed so far
    pub composed: &'a IndexMap<String, String>,
    /// OS environment used as fallback
    pub fallback: &'a IndexMap<String, String>,
}

impl<'a> SubstitutionContext<'a> {
    /// Create a new substitution context
    pub fn new(
        composed: &'a IndexMap<String, String>,
        fallback: &'a IndexMap<String, String>,
    ) -> Self {
        Self { composed, fallback }
    }

    /// Substitute the references written in `input`. Substituted values are
    /// inserted as they are and never expanded again.
    pub fn substitute(&self, input: &str) -> Result<String, SubstitutionError> {
        let mut error: Option<SubstitutionError> = None;

        let result = VARIABLE_PATTERN.replace_all(input, |caps: &Captures| {
            if error.is_some() {
                return String::new();
            }

            match self.resolve_capture(caps) {
                Ok(value) => value,
                Err(e) => {
                    error = Some(e);
                    String::new()
                }
            }
        });

        if let Some(e) = error {
            return Err(e);
        }

        Ok(result.into_owned())
    }

    /// Resolve a single capture group
    fn resolve_capture(&self, caps: &Captures) -> Result<String, SubstitutionError> {
        let name = &caps[1];

        if let Some(value) = self.lookup(name) {
            return Ok(value.to_string());
        }

        // ${NAME:-default} makes the reference optional
        if caps.get(2).is_some() {
            return Ok(caps
                .get(3)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default());
        }

        Err(SubstitutionError::UndefinedVariable(name.to_string()))
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        self.composed
            .get(name)
            .or_else(|| self.fallback.get(name))
            .map(String::as_str)
    }
}

/// Fields of a package available as `{key}` in its own values
#[derive(Debug, Clone, Copy)]
pub struct PackageKeys<'a> {
    pub id: &'a str,
    pub version: Option<&'a Version>,
    pub tree: Option<&'a str>,
}

impl PackageKeys<'_> {
    /// Replace known keys; unknown keys and keys without a value are left
    /// verbatim
    pub fn format(&self, input: &str) -> String {
        KEY_PATTERN
            .replace_all(input, |caps: &Captures| {
                self.resolve(&caps[1])
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    fn resolve(&self, key: &str) -> Option<String> {
        match key {
            "id" => Some(self.id.to_string()),
            "tree" => self.tree.map(str::to_string),
            "version" => self.version.map(|v| v.to_string()),
            "version.major" => self.version.and_then(Version::major).map(|n| n.to_string()),
            "version.minor" => self.version.and_then(Version::minor).map(|n| n.to_string()),
            "version.patch" => self.version.and_then(Version::patch).map(|n| n.to_string()),
            _ => None,
        }
    }
}

/// Errors that can occur during substitution
#[derive(Debug, thiserror::Error)]
pub enum SubstitutionError {
    #[error("Undefined environment variable: {0}")]
    UndefinedVariable(String),
}
