//! Typed schema for package and package-manager declarations
//!
//! These types mirror what is written in the configuration files. They hold
//! raw strings; `runtime::catalog` turns a [`PackageDecl`] into a resolved
//! `PackageSpec` with formatted, absolute paths.

use crate::config::Version;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

/// Store path of the package table
pub const PACKAGES_KEY: &str = "packages";

/// Store path of the package-manager settings
pub const PACKAGE_MANAGER_KEY: &str = "package-manager";

/// Boolean leaf that also accepts string spellings, as produced by
/// command-line overrides (`---packages.x.environment.inherit=yes`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    String(String),
}

impl Default for Flag {
    fn default() -> Self {
        Flag::Bool(false)
    }
}

impl Flag {
    pub fn is_set(&self) -> bool {
        match self {
            Flag::Bool(b) => *b,
            Flag::String(s) => {
                s.eq_ignore_ascii_case("true")
                    || s == "1"
                    || s.eq_ignore_ascii_case("yes")
                    || s.eq_ignore_ascii_case("on")
            }
        }
    }
}

impl From<bool> for Flag {
    fn from(value: bool) -> Self {
        Flag::Bool(value)
    }
}

/// Any YAML scalar, kept as the text it stands for (`8080`, `true`, `-j`)
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    String(String),
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl From<Scalar> for String {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::String(s) => s,
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::UInt(u) => u.to_string(),
            Scalar::Float(f) => f.to_string(),
        }
    }
}

/// A string-list leaf that may be written as a single scalar
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(Scalar),
    Many(Vec<Scalar>),
}

fn string_or_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s.into()],
        Some(OneOrMany::Many(v)) => v.into_iter().map(String::from).collect(),
    })
}

/// Declaration of a single package, as found under `packages.<id>`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageDecl {
    /// Root directories of the package; relative paths resolve against the
    /// first one that exists
    #[serde(deserialize_with = "string_or_list")]
    pub trees: Vec<String>,

    /// Absolute or tree-relative path to the executable
    pub executable: Option<String>,

    /// Working directory of the launched process
    pub cwd: Option<String>,

    /// Name of the delegate customizing the launch
    pub delegate: Option<String>,

    /// Packages this one depends on
    #[serde(deserialize_with = "string_or_list")]
    pub requires: Vec<String>,

    /// Packages pruned from this package's requirements
    #[serde(alias = "ignore", deserialize_with = "string_or_list")]
    pub exclude: Vec<String>,

    /// Package providing the actual executable and delegate
    pub alias: Option<String>,

    pub version: Option<Version>,

    /// Interpreter-level configuration for in-process execution
    pub boot: BootDecl,

    /// Additional configuration files pulled in with this package
    #[serde(deserialize_with = "string_or_list")]
    pub include: Vec<String>,

    pub arguments: ArgumentDecl,

    pub environment: EnvironmentDecl,

    /// Older spelling of `environment.inherit`
    pub inherit_environment: Option<Flag>,

    /// Post-resolution hooks, handed to the delegate by name
    #[serde(deserialize_with = "string_or_list")]
    pub actions: Vec<String>,
}

/// Boot configuration of a package
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BootDecl {
    /// Search paths for the interpreter's module loader
    #[serde(alias = "python_paths", deserialize_with = "string_or_list")]
    pub interpreter_paths: Vec<String>,

    /// Modules to import at boot
    #[serde(deserialize_with = "string_or_list")]
    pub import: Vec<String>,

    /// Files or directories from which plugins are loaded
    #[serde(deserialize_with = "string_or_list")]
    pub plugin_paths: Vec<String>,
}

/// Argument block of a package
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArgumentDecl {
    #[serde(deserialize_with = "string_or_list")]
    pub prepend: Vec<String>,

    #[serde(deserialize_with = "string_or_list")]
    pub append: Vec<String>,

    /// Substitute `${VAR}` placeholders in prepend/append values
    pub resolve: Flag,
}

/// Environment block of a package
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentDecl {
    /// Inherit the whole OS environment at this package's position
    pub inherit: Flag,

    /// Substitute `${VAR}` placeholders in variable values
    pub resolve: Flag,

    #[serde(deserialize_with = "string_or_list")]
    pub linker_search_paths: Vec<String>,

    #[serde(deserialize_with = "string_or_list")]
    pub executable_search_paths: Vec<String>,

    /// Variables to set, each with one or more values
    pub variables: IndexMap<String, VariableValues>,
}

/// Values of one declared environment variable
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableValues(#[serde(deserialize_with = "string_or_list")] pub Vec<String>);

/// Settings under `package-manager`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageManagerDecl {
    #[serde(deserialize_with = "string_or_list")]
    pub include: Vec<String>,

    pub environment: PackageManagerEnvironment,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageManagerEnvironment {
    pub variables: VariablePolicyDecl,
}

/// Declared environment-variable policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VariablePolicyDecl {
    /// Variables copied from the OS environment before packages apply
    pub inherit: Vec<String>,

    pub regex: PolicyPatterns,

    /// Custom rules, evaluated in order before the patterns above
    pub rules: Vec<PolicyRuleDecl>,
}

impl Default for VariablePolicyDecl {
    fn default() -> Self {
        Self {
            inherit: default_inherited_variables(),
            regex: PolicyPatterns::default(),
            rules: Vec::new(),
        }
    }
}

/// Patterns classifying variable names, matched case-insensitively from the
/// start of the name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyPatterns {
    pub is_path: String,
    pub path_is_appendable: String,
}

impl Default for PolicyPatterns {
    fn default() -> Self {
        Self {
            is_path: ".*path".to_string(),
            path_is_appendable: String::new(),
        }
    }
}

/// A custom variable policy rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRuleDecl {
    pub pattern: String,
    #[serde(default)]
    pub is_path: bool,
    #[serde(default)]
    pub appendable: bool,
}

/// Variables inherited from the OS environment unless configured otherwise
pub fn default_inherited_variables() -> Vec<String> {
    let mut names = vec!["PATH", "HOME"];
    if cfg!(windows) {
        names.extend(["USERNAME", "SystemRoot"]);
    } else {
        names.extend(["XAUTHORITY", "DISPLAY", "USER"]);
    }
    names.into_iter().map(str::to_string).collect()
}
