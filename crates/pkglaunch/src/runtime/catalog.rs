//! Package catalog read from the configuration store

use crate::config::{
    ConfigError, KvStore, PackageDecl, PackageKeys, Version, PACKAGES_KEY,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Interpreter-level configuration with paths resolved
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootSpec {
    /// Module search paths of the program's interpreter
    pub interpreter_paths: Vec<PathBuf>,
    /// Modules imported when the interpreter boots
    pub import: Vec<String>,
    /// Plugin files or directories to load
    pub plugin_paths: Vec<PathBuf>,
}

impl BootSpec {
    /// Boot configuration of a whole closure: every package's entries in
    /// resolution order, each entry once
    pub fn collect<'a>(specs: impl IntoIterator<Item = &'a PackageSpec>) -> Self {
        let mut boot = BootSpec::default();
        for spec in specs {
            extend_unique(&mut boot.interpreter_paths, &spec.boot.interpreter_paths);
            extend_unique(&mut boot.import, &spec.boot.import);
            extend_unique(&mut boot.plugin_paths, &spec.boot.plugin_paths);
        }
        boot
    }

    pub fn is_empty(&self) -> bool {
        self.interpreter_paths.is_empty() && self.import.is_empty() && self.plugin_paths.is_empty()
    }
}

fn extend_unique<T: Clone + PartialEq>(target: &mut Vec<T>, values: &[T]) {
    for value in values {
        if !target.contains(value) {
            target.push(value.clone());
        }
    }
}

/// Argument contributions of a package
#[derive(Debug, Clone, Default)]
pub struct ArgumentSpec {
    pub prepend: Vec<String>,
    pub append: Vec<String>,
    pub resolve: bool,
}

/// Environment contributions of a package
#[derive(Debug, Clone, Default)]
pub struct EnvironmentSpec {
    pub inherit: bool,
    pub resolve: bool,
    pub linker_search_paths: Vec<String>,
    pub executable_search_paths: Vec<String>,
    pub variables: IndexMap<String, Vec<String>>,
}

/// A fully formatted package, built fresh from the store on every lookup
#[derive(Debug, Clone)]
pub struct PackageSpec {
    pub id: String,
    pub version: Option<Version>,
    /// First declared tree that exists on disk, or the first declared one
    pub tree: Option<PathBuf>,
    pub trees: Vec<PathBuf>,
    pub executable: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
    pub delegate: Option<String>,
    pub requires: Vec<String>,
    pub exclude: Vec<String>,
    pub alias: Option<String>,
    pub boot: BootSpec,
    pub include: Vec<PathBuf>,
    pub arguments: ArgumentSpec,
    pub environment: EnvironmentSpec,
    pub actions: Vec<String>,
}

impl PackageSpec {
    /// Join a relative path onto the package tree
    pub fn absolutize(&self, value: &str) -> PathBuf {
        absolutize(self.tree.as_deref(), value)
    }

    pub fn excludes(&self, id: &str) -> bool {
        self.exclude.iter().any(|e| e == id)
    }
}

fn absolutize(tree: Option<&Path>, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    match tree {
        Some(tree) if path.is_relative() => tree.join(path),
        _ => path,
    }
}

/// All package declarations known to a launch
#[derive(Debug, Clone, Default)]
pub struct PackageCatalog {
    packages: IndexMap<String, PackageDecl>,
}

impl PackageCatalog {
    /// Read the `packages` table of the store
    pub fn from_store(store: &KvStore) -> Result<Self, ConfigError> {
        let packages = store.typed_or_default(PACKAGES_KEY)?;
        Ok(Self { packages })
    }

    /// Package ids in declaration order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Build the resolved specification of a package
    pub fn spec(&self, id: &str) -> Option<PackageSpec> {
        self.packages.get(id).map(|decl| build_spec(id, decl))
    }
}

fn build_spec(id: &str, decl: &PackageDecl) -> PackageSpec {
    let version = decl.version.clone();

    // Trees may use {id} and {version}, but not {tree}
    let tree_keys = PackageKeys {
        id,
        version: version.as_ref(),
        tree: None,
    };
    let trees: Vec<PathBuf> = decl
        .trees
        .iter()
        .map(|t| PathBuf::from(tree_keys.format(t)))
        .collect();
    let tree = trees
        .iter()
        .find(|t| t.is_dir())
        .or_else(|| trees.first())
        .cloned();

    let tree_str = tree.as_ref().map(|t| t.to_string_lossy().into_owned());
    let keys = PackageKeys {
        id,
        version: version.as_ref(),
        tree: tree_str.as_deref(),
    };
    let fmt = |value: &String| keys.format(value);
    let fmt_all = |values: &[String]| values.iter().map(fmt).collect::<Vec<_>>();
    let path = |value: &String| absolutize(tree.as_deref(), &keys.format(value));
    let path_all = |values: &[String]| values.iter().map(path).collect::<Vec<_>>();
    let path_str_all = |values: &[String]| {
        values
            .iter()
            .map(|v| path(v).to_string_lossy().into_owned())
            .collect::<Vec<_>>()
    };

    let inherit = decl.environment.inherit.is_set()
        || decl
            .inherit_environment
            .as_ref()
            .is_some_and(|flag| flag.is_set());

    PackageSpec {
        id: id.to_string(),
        executable: decl.executable.as_ref().map(path),
        cwd: decl.cwd.as_ref().map(path),
        delegate: decl.delegate.as_ref().map(fmt).filter(|d| !d.is_empty()),
        requires: decl.requires.clone(),
        exclude: decl.exclude.clone(),
        alias: decl.alias.clone().filter(|a| !a.is_empty()),
        boot: BootSpec {
            interpreter_paths: path_all(&decl.boot.interpreter_paths),
            import: fmt_all(&decl.boot.import),
            plugin_paths: path_all(&decl.boot.plugin_paths),
        },
        include: path_all(&decl.include),
        arguments: ArgumentSpec {
            prepend: fmt_all(&decl.arguments.prepend),
            append: fmt_all(&decl.arguments.append),
            resolve: decl.arguments.resolve.is_set(),
        },
        environment: EnvironmentSpec {
            inherit,
            resolve: decl.environment.resolve.is_set(),
            linker_search_paths: path_str_all(&decl.environment.linker_search_paths),
            executable_search_paths: path_str_all(&decl.environment.executable_search_paths),
            variables: decl
                .environment
                .variables
                .iter()
                .map(|(name, values)| (name.clone(), fmt_all(&values.0)))
                .collect(),
        },
        actions: decl.actions.clone(),
        version,
        tree,
        trees,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(yaml: &str) -> PackageCatalog {
        PackageCatalog::from_store(&KvStore::from_yaml(yaml).unwrap()).unwrap()
    }

    #[test]
    fn test_spec_formats_keys_and_paths() {
        let catalog = catalog(
            r#"
packages:
  python:
    version: "3.11.4"
    trees: ["/nonexistent/python-{version}"]
    executable: "bin/python{version.major}.{version.minor}"
    environment:
      executable_search_paths: [bin, "/usr/local/bin"]
      variables:
        PYTHONHOME: "{tree}"
"#,
        );
        let spec = catalog.spec("python").unwrap();

        assert_eq!(spec.tree, Some(PathBuf::from("/nonexistent/python-3.11.4")));
        assert_eq!(
            spec.executable,
            Some(PathBuf::from("/nonexistent/python-3.11.4/bin/python3.11"))
        );
        assert_eq!(
            spec.environment.executable_search_paths,
            vec!["/nonexistent/python-3.11.4/bin", "/usr/local/bin"]
        );
        assert_eq!(
            spec.environment.variables["PYTHONHOME"],
            vec!["/nonexistent/python-3.11.4"]
        );
    }

    #[test]
    fn test_first_existing_tree_wins() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!(
            "packages:\n  app:\n    trees: [/does/not/exist, '{}']\n    executable: app\n",
            dir.path().display()
        );
        let spec = catalog(&yaml).spec("app").unwrap();
        assert_eq!(spec.tree.as_deref(), Some(dir.path()));
        assert_eq!(spec.executable, Some(dir.path().join("app")));
    }

    #[test]
    fn test_legacy_inherit_environment() {
        let catalog = catalog(
            r#"
packages:
  old:
    inherit_environment: true
  new:
    environment:
      inherit: true
  none: {}
"#,
        );
        assert!(catalog.spec("old").unwrap().environment.inherit);
        assert!(catalog.spec("new").unwrap().environment.inherit);
        assert!(!catalog.spec("none").unwrap().environment.inherit);
        assert!(catalog.spec("missing").is_none());
    }

    #[test]
    fn test_numeric_values_do_not_break_other_packages() {
        let catalog = catalog(
            r#"
packages:
  app:
    arguments:
      append: [-j, 4]
    environment:
      variables:
        PORT: 8080
  other:
    executable: /bin/sh
"#,
        );
        let app = catalog.spec("app").unwrap();
        assert_eq!(app.arguments.append, vec!["-j", "4"]);
        assert_eq!(app.environment.variables["PORT"], vec!["8080"]);
        assert_eq!(
            catalog.spec("other").unwrap().executable,
            Some(PathBuf::from("/bin/sh"))
        );
    }

    #[test]
    fn test_boot_collects_closure_entries_once() {
        let catalog = catalog(
            r#"
packages:
  base:
    trees: ["/opt/base"]
    boot:
      python_paths: [lib/python, "/shared/python"]
      import: [base_init]
  app:
    trees: ["/opt/app"]
    boot:
      interpreter_paths: [python, "/shared/python"]
      import: [base_init, app_init]
      plugin_paths: plugins
"#,
        );
        let specs = [catalog.spec("base").unwrap(), catalog.spec("app").unwrap()];
        let boot = BootSpec::collect(&specs);

        assert_eq!(
            boot.interpreter_paths,
            vec![
                PathBuf::from("/opt/base/lib/python"),
                PathBuf::from("/shared/python"),
                PathBuf::from("/opt/app/python"),
            ]
        );
        assert_eq!(boot.import, vec!["base_init", "app_init"]);
        assert_eq!(boot.plugin_paths, vec![PathBuf::from("/opt/app/plugins")]);
        assert!(!boot.is_empty());
        assert!(BootSpec::default().is_empty());
    }

    #[test]
    fn test_override_changes_executable() {
        let mut store = KvStore::from_yaml(
            r#"
packages:
  python:
    version: "2.7"
    trees: ["/opt/python"]
    executable: "bin/python{version}"
"#,
        )
        .unwrap();
        store.set_override("packages.python.version", "3.11").unwrap();
        let spec = PackageCatalog::from_store(&store)
            .unwrap()
            .spec("python")
            .unwrap();
        assert_eq!(spec.executable, Some(PathBuf::from("/opt/python/bin/python3.11")));
    }
}
