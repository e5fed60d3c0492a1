//! Environment-variable policy table
//!
//! Decides whether a variable holds a search path and whether contributions
//! to it are appended or overwrite the previous value.

use crate::config::VariablePolicyDecl;
use regex::Regex;

/// Case-insensitive name pattern anchored at the start of the name.
///
/// A pattern that fails to compile never matches.
#[derive(Debug, Clone)]
pub struct NamePattern {
    source: String,
    regex: Option<Regex>,
}

impl NamePattern {
    pub fn new(source: &str) -> Self {
        let regex = match Regex::new(&format!("(?i)^(?:{})", source)) {
            Ok(regex) => Some(regex),
            Err(e) => {
                log::warn!(
                    "Invalid variable policy pattern '{}', it will never match: {}",
                    source,
                    e
                );
                None
            }
        };
        Self {
            source: source.to_string(),
            regex,
        }
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.regex.as_ref().is_some_and(|re| re.is_match(name))
    }

    /// Whether the pattern compiled
    pub fn is_valid(&self) -> bool {
        self.regex.is_some()
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Classification of a variable name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VariableClass {
    pub is_path: bool,
    pub appendable: bool,
}

impl VariableClass {
    /// Contributions are appended and de-duplicated
    pub fn merges(&self) -> bool {
        self.is_path && self.appendable
    }
}

/// A custom rule: a name pattern with explicit facets
#[derive(Debug, Clone)]
pub struct VariablePolicy {
    pub pattern: NamePattern,
    pub class: VariableClass,
}

/// Read-only policy table, shared across launches
#[derive(Debug, Clone)]
pub struct PolicyTable {
    rules: Vec<VariablePolicy>,
    is_path: NamePattern,
    path_is_appendable: NamePattern,
    inherit: Vec<String>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::from_decl(&VariablePolicyDecl::default())
    }
}

impl PolicyTable {
    pub fn from_decl(decl: &VariablePolicyDecl) -> Self {
        let rules = decl
            .rules
            .iter()
            .map(|rule| VariablePolicy {
                pattern: NamePattern::new(&rule.pattern),
                class: VariableClass {
                    is_path: rule.is_path,
                    appendable: rule.is_path && rule.appendable,
                },
            })
            .collect();

        Self {
            rules,
            is_path: NamePattern::new(&decl.regex.is_path),
            path_is_appendable: NamePattern::new(&decl.regex.path_is_appendable),
            inherit: decl.inherit.clone(),
        }
    }

    /// Custom rules are tried first, in order; otherwise the `is_path` and
    /// `path_is_appendable` patterns decide.
    pub fn classify(&self, name: &str) -> VariableClass {
        if let Some(rule) = self.rules.iter().find(|r| r.pattern.is_match(name)) {
            return rule.class;
        }

        let is_path = self.is_path.is_match(name);
        VariableClass {
            is_path,
            appendable: is_path && self.path_is_appendable.is_match(name),
        }
    }

    /// Names copied from the OS environment before any package applies
    pub fn inherit(&self) -> &[String] {
        &self.inherit
    }
}
