//! Layered YAML key-value store
//!
//! Documents are deep-merged in load order: mappings merge key by key,
//! everything else is replaced by the later document. Values are addressed by
//! dotted paths such as `packages.python.version`.

use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Hierarchical configuration store backed by merged YAML documents
#[derive(Debug, Clone)]
pub struct KvStore {
    root: Value,
    /// Files merged into the store, in load order
    sources: Vec<PathBuf>,
    /// Canonical paths already loaded, guards include loops
    loaded: HashSet<PathBuf>,
}

impl Default for KvStore {
    fn default() -> Self {
        Self {
            root: Value::Mapping(Mapping::new()),
            sources: Vec::new(),
            loaded: HashSet::new(),
        }
    }
}

impl KvStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a single YAML document
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut store = Self::new();
        store.merge_yaml(content)?;
        Ok(store)
    }

    /// Merge a YAML document given as a string
    pub fn merge_yaml(&mut self, content: &str) -> Result<(), ConfigError> {
        let value: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            source: e,
        })?;
        self.merge(value);
        Ok(())
    }

    /// Deep-merge a value into the root
    pub fn merge(&mut self, value: Value) {
        if value.is_null() {
            return;
        }
        merge_values(&mut self.root, value);
    }

    /// Load every `*.yaml`/`*.yml` file of a directory in lexical order.
    /// A missing directory is not an error.
    pub fn load_dir(&mut self, dir: &Path) -> Result<(), ConfigError> {
        if !dir.is_dir() {
            return Ok(());
        }
        let entries = std::fs::read_dir(dir).map_err(|e| ConfigError::Io {
            path: dir.display().to_string(),
            source: e,
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_yaml_file(path))
            .collect();
        files.sort();

        for file in files {
            self.load_file(&file)?;
        }
        Ok(())
    }

    /// Load a YAML file, then everything it includes.
    ///
    /// Include entries are taken from `package-manager.include` and
    /// `packages.*.include` of that document and resolved relative to the
    /// file's directory. Each path is loaded at most once.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if !self.loaded.insert(canonical) {
            log::debug!("Skipping already loaded configuration {}", path.display());
            return Ok(());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let value: Value = serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let includes: Vec<PathBuf> = document_includes(&value)
            .into_iter()
            .map(|include| {
                let candidate = PathBuf::from(include);
                if candidate.is_absolute() {
                    candidate
                } else {
                    base.join(candidate)
                }
            })
            .collect();

        log::debug!("Loaded configuration {}", path.display());
        self.merge(value);
        self.sources.push(path.to_path_buf());

        for include in includes {
            if include.is_dir() {
                self.load_dir(&include)?;
            } else if include.is_file() {
                self.load_file(&include)?;
            } else {
                log::warn!(
                    "Include '{}' referenced by {} does not exist",
                    include.display(),
                    path.display()
                );
            }
        }
        Ok(())
    }

    /// Files merged so far, in load order
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Raw value at a dotted path
    pub fn value_by_path(&self, path: &str) -> Option<&Value> {
        let mut current = &self.root;
        for key in split_path(path) {
            current = current.as_mapping()?.get(key)?;
        }
        Some(current)
    }

    /// Deserialize the value at a dotted path. Returns `None` if absent.
    pub fn typed<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ConfigError> {
        match self.value_by_path(path) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_yaml::from_value(value.clone())
                .map(Some)
                .map_err(|e| ConfigError::Schema {
                    path: path.to_string(),
                    source: e,
                }),
        }
    }

    /// Deserialize the value at a dotted path, falling back to `T::default()`
    pub fn typed_or_default<T: DeserializeOwned + Default>(
        &self,
        path: &str,
    ) -> Result<T, ConfigError> {
        Ok(self.typed(path)?.unwrap_or_default())
    }

    /// Set a raw override at a dotted path, creating mappings as needed.
    ///
    /// Values starting with `[` or `{` are parsed as YAML; anything else is
    /// stored as a string.
    pub fn set_override(&mut self, path: &str, raw: &str) -> Result<(), ConfigError> {
        let keys: Vec<&str> = split_path(path).collect();
        if keys.is_empty() {
            return Err(ConfigError::InvalidPath(path.to_string()));
        }

        let trimmed = raw.trim_start();
        let value = if trimmed.starts_with('[') || trimmed.starts_with('{') {
            serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse {
                path: format!("override '{}'", path),
                source: e,
            })?
        } else {
            Value::String(raw.to_string())
        };

        // Wrap the value in one mapping per key, innermost first, and merge it.
        // Scalars along the way are replaced by the merge.
        let nested = keys.iter().rev().fold(value, |inner, key| {
            let mut map = Mapping::new();
            map.insert(Value::String(key.to_string()), inner);
            Value::Mapping(map)
        });
        merge_values(&mut self.root, nested);

        log::debug!("Applied override {}={}", path, raw);
        Ok(())
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|k| !k.is_empty())
}

fn is_yaml_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn merge_values(base: &mut Value, incoming: Value) {
    match (base, incoming) {
        (Value::Mapping(base_map), Value::Mapping(incoming_map)) => {
            for (key, value) in incoming_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, incoming) => *base = incoming,
    }
}

/// Include paths declared by a single document
fn document_includes(doc: &Value) -> Vec<String> {
    let mut includes = Vec::new();
    let mut collect = |value: Option<&Value>| match value {
        Some(Value::String(s)) => includes.push(s.clone()),
        Some(Value::Sequence(items)) => {
            includes.extend(items.iter().filter_map(|i| i.as_str().map(str::to_string)))
        }
        _ => {}
    };

    collect(
        doc.get("package-manager")
            .and_then(|pm| pm.get("include")),
    );
    if let Some(Value::Mapping(packages)) = doc.get("packages") {
        for package in packages.values() {
            collect(package.get("include"));
        }
    }
    includes
}

/// Errors that can occur while reading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Value at '{path}' does not match the schema: {source}")]
    Schema {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration path: '{0}'")]
    InvalidPath(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deep_merge_later_wins() {
        let mut store = KvStore::from_yaml(
            r#"
packages:
  python:
    version: "2.6"
    trees: ["/opt/python"]
"#,
        )
        .unwrap();
        store
            .merge_yaml(
                r#"
packages:
  python:
    version: "2.7"
"#,
            )
            .unwrap();

        assert_eq!(
            store.value_by_path("packages.python.version"),
            Some(&Value::String("2.7".to_string()))
        );
        // sibling keys survive the merge
        assert!(store.value_by_path("packages.python.trees").is_some());
    }

    #[test]
    fn test_set_override_creates_path() {
        let mut store = KvStore::new();
        store.set_override("hello.world", "42").unwrap();
        let value: Option<String> = store.typed("hello.world").unwrap();
        assert_eq!(value.as_deref(), Some("42"));
    }

    #[test]
    fn test_set_override_parses_sequences() {
        let mut store = KvStore::new();
        store.set_override("packages.app.requires", "[a, b]").unwrap();
        let value: Option<Vec<String>> = store.typed("packages.app.requires").unwrap();
        assert_eq!(value, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_set_override_replaces_scalar_parent() {
        let mut store = KvStore::from_yaml("foo: bar").unwrap();
        store.set_override("foo.baz", "1").unwrap();
        assert!(store.value_by_path("foo.baz").is_some());
    }

    #[test]
    fn test_missing_path_is_none() {
        let store = KvStore::new();
        let value: Option<String> = store.typed("does.not.exist").unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_load_dir_follows_includes_once() {
        let dir = tempfile::tempdir().unwrap();
        let extra = dir.path().join("extra");
        std::fs::create_dir_all(&extra).unwrap();
        std::fs::write(
            dir.path().join("base.yaml"),
            "package-manager:\n  include: [extra, base.yaml]\npackages:\n  a:\n    version: '1'\n",
        )
        .unwrap();
        std::fs::write(extra.join("more.yml"), "packages:\n  a:\n    version: '2'\n").unwrap();

        let mut store = KvStore::new();
        store.load_dir(dir.path()).unwrap();

        let version: Option<String> = store.typed("packages.a.version").unwrap();
        assert_eq!(version.as_deref(), Some("2"));
        assert_eq!(store.sources().len(), 2);
    }
}
