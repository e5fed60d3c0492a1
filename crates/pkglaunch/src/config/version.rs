//! Structured, totally ordered package versions

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// One component of a version string
#[derive(Debug, Clone, PartialEq, Eq)]
enum Component {
    Number(u64),
    Text(String),
}

/// A package version such as `3.11`, `2.6.9` or `1.0rc2`.
///
/// Components are split on `.`, `-`, `_` and on digit/letter boundaries.
/// Missing numeric components compare as `0`, so `1.0 == 1`. A textual
/// component sorts before a numeric one at the same position, which makes
/// `1.0rc1 < 1.0.0`.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    components: Vec<Component>,
}

impl Version {
    /// Parse a version string. Never fails; unusual strings simply become
    /// textual components.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim().to_string();
        let mut components = Vec::new();

        for chunk in raw.split(['.', '-', '_']).filter(|c| !c.is_empty()) {
            let mut current = String::new();
            let mut digits = None;
            for ch in chunk.chars() {
                let is_digit = ch.is_ascii_digit();
                if digits.is_some_and(|d| d != is_digit) {
                    components.push(Self::component(&current));
                    current.clear();
                }
                digits = Some(is_digit);
                current.push(ch);
            }
            if !current.is_empty() {
                components.push(Self::component(&current));
            }
        }

        Self { raw, components }
    }

    fn component(text: &str) -> Component {
        match text.parse::<u64>() {
            Ok(n) => Component::Number(n),
            Err(_) => Component::Text(text.to_ascii_lowercase()),
        }
    }

    fn number_at(&self, index: usize) -> Option<u64> {
        match self.components.get(index) {
            Some(Component::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn major(&self) -> Option<u64> {
        self.number_at(0)
    }

    pub fn minor(&self) -> Option<u64> {
        self.number_at(1)
    }

    pub fn patch(&self) -> Option<u64> {
        self.number_at(2)
    }

    /// The version exactly as declared
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        let zero = Component::Number(0);
        for i in 0..len {
            let a = self.components.get(i).unwrap_or(&zero);
            let b = other.components.get(i).unwrap_or(&zero);
            let ordering = match (a, b) {
                (Component::Number(x), Component::Number(y)) => x.cmp(y),
                (Component::Text(x), Component::Text(y)) => x.cmp(y),
                (Component::Text(_), Component::Number(_)) => Ordering::Less,
                (Component::Number(_), Component::Text(_)) => Ordering::Greater,
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for Version {
    fn from(raw: &str) -> Self {
        Version::parse(raw)
    }
}

/// Versions may be written as strings or, unquoted, as YAML integers.
/// Floats are rejected: `3.10` would already have become `3.1`.
#[derive(Deserialize)]
#[serde(untagged)]
enum VersionRepr {
    Text(String),
    Int(u64),
    Float(f64),
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match VersionRepr::deserialize(deserializer)? {
            VersionRepr::Text(s) => Version::parse(&s),
            VersionRepr::Int(i) => Version::parse(&i.to_string()),
            VersionRepr::Float(f) => {
                return Err(D::Error::custom(format!(
                    "version {} is a number and may have lost digits; quote it, e.g. \"{}\"",
                    f, f
                )))
            }
        })
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}
