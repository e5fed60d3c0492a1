//! Environment composition
//!
//! Folds the contributions of every package in a resolved closure into one
//! variable mapping, following the policy table for path-like variables.

use crate::config::{SubstitutionContext, SubstitutionError};
use crate::runtime::catalog::PackageSpec;
use crate::runtime::dependency::ResolvedClosure;
use crate::runtime::policy::PolicyTable;
use indexmap::IndexMap;

/// Separator between entries of path-like variables
pub const PATH_SEPARATOR: char = if cfg!(windows) { ';' } else { ':' };

/// Variable searched by the dynamic linker on this platform
pub fn linker_variable() -> &'static str {
    if cfg!(windows) {
        "PATH"
    } else if cfg!(target_os = "macos") {
        "DYLD_LIBRARY_PATH"
    } else {
        "LD_LIBRARY_PATH"
    }
}

/// Snapshot of the current OS environment. Variables whose name or value is
/// not valid unicode are skipped.
pub fn os_environment() -> IndexMap<String, String> {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}

/// Composed environment, in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: IndexMap<String, String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Overwrite a variable
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Append entries to a path-like variable, skipping empty entries and
    /// entries already present
    pub fn append_path(&mut self, name: &str, value: &str) {
        let current = self.vars.entry(name.to_string()).or_default();
        let mut entries: Vec<&str> = current
            .split(PATH_SEPARATOR)
            .filter(|e| !e.is_empty())
            .collect();
        let mut changed = false;
        for entry in value.split(PATH_SEPARATOR).filter(|e| !e.is_empty()) {
            if !entries.contains(&entry) {
                entries.push(entry);
                changed = true;
            }
        }
        if changed {
            *current = entries.join(&PATH_SEPARATOR.to_string());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn as_map(&self) -> &IndexMap<String, String> {
        &self.vars
    }
}

impl From<IndexMap<String, String>> for Environment {
    fn from(vars: IndexMap<String, String>) -> Self {
        Self { vars }
    }
}

/// Compose the environment of a closure.
///
/// The environment is seeded with the policy's inherit list, then every
/// package applies its contributions in resolution order, so the root wins
/// for overwritten variables.
pub fn compose(
    closure: &ResolvedClosure,
    os_env: &IndexMap<String, String>,
    policy: &PolicyTable,
) -> Result<Environment, EnvironmentError> {
    let mut env = Environment::new();

    for name in policy.inherit() {
        if let Some(value) = os_env.get(name) {
            env.set(name.clone(), value.clone());
        }
    }

    for spec in closure.iter() {
        if spec.environment.inherit {
            log::debug!("[{}] Inheriting the whole OS environment", spec.id);
            inherit_all(&mut env, os_env, policy);
        }
        apply_package(&mut env, spec, os_env, policy)?;
    }

    log::debug!(
        "Composed {} variable(s) from {} package(s)",
        env.len(),
        closure.len()
    );
    Ok(env)
}

fn inherit_all(env: &mut Environment, os_env: &IndexMap<String, String>, policy: &PolicyTable) {
    for (name, value) in os_env {
        if policy.classify(name).merges() {
            env.append_path(name, value);
        } else if !env.contains(name) {
            env.set(name.clone(), value.clone());
        }
    }
}

fn apply_package(
    env: &mut Environment,
    spec: &PackageSpec,
    os_env: &IndexMap<String, String>,
    policy: &PolicyTable,
) -> Result<(), EnvironmentError> {
    let block = &spec.environment;
    let resolve = |env: &Environment, name: &str, value: &str| {
        if !block.resolve {
            return Ok(value.to_string());
        }
        SubstitutionContext::new(env.as_map(), os_env)
            .substitute(value)
            .map_err(|source| EnvironmentError::UnresolvedVariable {
                package: spec.id.clone(),
                variable: name.to_string(),
                source,
            })
    };

    for (name, values) in &block.variables {
        let class = policy.classify(name);
        let mut entries = Vec::with_capacity(values.len());
        for value in values {
            let value = resolve(&*env, name.as_str(), value.as_str())?;
            if class.is_path {
                entries.push(absolutize_entries(spec, &value));
            } else {
                entries.push(value);
            }
        }

        if class.merges() {
            for entry in &entries {
                env.append_path(name, entry);
            }
        } else {
            env.set(name.clone(), entries.join(&PATH_SEPARATOR.to_string()));
        }
    }

    for path in &block.executable_search_paths {
        let path = resolve(&*env, "PATH", path.as_str())?;
        env.append_path("PATH", &path);
    }

    let linker = linker_variable();
    for path in &block.linker_search_paths {
        let path = resolve(&*env, linker, path.as_str())?;
        env.append_path(linker, &path);
    }

    Ok(())
}

/// Make each relative entry of a path list absolute against the package tree
fn absolutize_entries(spec: &PackageSpec, value: &str) -> String {
    value
        .split(PATH_SEPARATOR)
        .map(|entry| {
            if entry.is_empty() {
                entry.to_string()
            } else {
                spec.absolutize(entry).to_string_lossy().into_owned()
            }
        })
        .collect::<Vec<_>>()
        .join(&PATH_SEPARATOR.to_string())
}

/// Errors that can occur while composing an environment
#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error("Package '{package}' variable '{variable}': {source}")]
    UnresolvedVariable {
        package: String,
        variable: String,
        #[source]
        source: SubstitutionError,
    },
}
