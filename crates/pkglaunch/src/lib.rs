//! Package-driven process launcher
//!
//! Programs are described as a graph of versioned packages instead of
//! hand-written wrapper scripts. Launching a program resolves its package
//! closure, composes one environment from every package's contributions, and
//! runs the target either in a child process or in the current one.
//!
//! # Overview
//!
//! The launcher:
//! - Reads package declarations from layered YAML configuration
//! - Resolves dependencies, dependencies first and the root last
//! - Merges search paths and overwrites plain variables by precedence
//! - Hands program-specific tweaks to a named delegate
//! - Accepts `---key.path=value` overrides on the command line
//!
//! # Example Configuration
//!
//! ```yaml
//! package-manager:
//!   environment:
//!     variables:
//!       inherit: [PATH, HOME]
//!
//! packages:
//!   python:
//!     version: "3.11"
//!     trees: ["/opt/python/{version}"]
//!     executable: "bin/python{version.major}"
//!     environment:
//!       linker_search_paths: [lib]
//!
//!   maya:
//!     trees: ["/opt/maya"]
//!     executable: bin/maya
//!     requires: [python]
//!     delegate: MayaDelegate
//!     environment:
//!       variables:
//!         MAYA_MODULE_PATH: [modules]
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod runtime;

pub use cli::LaunchArgs;
pub use config::{ArgumentOverrides, ConfigError, KvStore, OverrideError, Version};
pub use error::{ErrorKind, LaunchError, HANDLED_EXIT_CODE};
pub use runtime::{
    DelegateArgs, DelegateError, DelegateRegistry, Environment, ExecutionMode, HandledRequest,
    LaunchContext, LaunchOptions, LaunchPlan, LaunchState, Launcher, PolicyTable, Prepared,
    ProcessDelegate, ProcessError, ProcessHandle, ProcessInformation, ProcessSpec,
    ResolvedClosure, RuntimeIdentity, StreamCapture,
};
