//! Process information captured at start and handed to the launched program

use crate::runtime::catalog::BootSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Variable carrying [`ProcessInformation`] as JSON into the launched program
pub const PROCESS_DATA_VARIABLE: &str = "PKGLAUNCH_PROCESS_DATA";

/// What was asked for when the launcher started. Immutable once captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Logical process id, the program name without extension
    pub id: String,
    /// Program as invoked
    pub executable: PathBuf,
    /// Installation root of the launcher
    pub core_tree: PathBuf,
    /// The launcher's own executable
    pub interpreter: PathBuf,
    /// Arguments exactly as received, overrides included
    pub raw_arguments: Vec<String>,
}

impl ProcessSpec {
    /// Capture the specification for `program` from the running launcher
    pub fn capture(program: &str, raw_arguments: &[String]) -> Self {
        let interpreter = std::env::current_exe().unwrap_or_default();
        // <core_tree>/bin/pkglaunch
        let core_tree = interpreter
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::new(program, core_tree, interpreter, raw_arguments)
    }

    pub fn new(
        program: &str,
        core_tree: PathBuf,
        interpreter: PathBuf,
        raw_arguments: &[String],
    ) -> Self {
        let executable = PathBuf::from(program);
        let id = executable
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.to_string());
        Self {
            id,
            executable,
            core_tree,
            interpreter,
            raw_arguments: raw_arguments.to_vec(),
        }
    }

    /// The launcher's own configuration directory
    pub fn core_config_dir(&self) -> PathBuf {
        self.core_tree.join("etc")
    }
}

/// Summary of a launch, exported to the launched program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInformation {
    pub process: ProcessSpec,
    /// Resolved package ids, dependencies first
    pub packages: Vec<String>,
    /// Configuration files that were loaded
    pub config_sources: Vec<PathBuf>,
    /// Boot configuration of the closure, for the program's interpreter
    #[serde(default)]
    pub boot: BootSpec,
}

impl ProcessInformation {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Information left by the launcher that started this process, if any
    pub fn from_env() -> Result<Option<Self>, serde_json::Error> {
        match std::env::var(PROCESS_DATA_VARIABLE) {
            Ok(json) => Self::from_json(&json).map(Some),
            Err(_) => Ok(None),
        }
    }
}
