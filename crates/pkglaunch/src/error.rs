//! Launch error taxonomy and exit codes

use crate::config::{ConfigError, OverrideError, SubstitutionError};
use crate::runtime::{DelegateError, DependencyError, EnvironmentError, ProcessError};

/// Exit code for `---help` and `---version`: not a failure, but nothing ran
pub const HANDLED_EXIT_CODE: i32 = 3;

/// Category of a failed launch, each with its own exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PackageNotFound,
    CyclicDependency,
    DelegateNotFound,
    UnresolvedVariable,
    MalformedOverride,
    ExecutableNotFound,
    EnvironmentError,
    Configuration,
}

impl ErrorKind {
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::PackageNotFound => 10,
            ErrorKind::CyclicDependency => 11,
            ErrorKind::DelegateNotFound => 12,
            ErrorKind::UnresolvedVariable => 13,
            ErrorKind::MalformedOverride => 14,
            ErrorKind::ExecutableNotFound => 15,
            ErrorKind::EnvironmentError => 16,
            ErrorKind::Configuration => 17,
        }
    }
}

/// Any error that aborts a launch
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Override(#[from] OverrideError),

    #[error(transparent)]
    Dependency(#[from] DependencyError),

    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error(transparent)]
    Delegate(#[from] DelegateError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("No package in the alias chain of '{0}' declares an executable")]
    NoExecutable(String),

    #[error("Argument of package '{package}': {source}")]
    ArgumentSubstitution {
        package: String,
        #[source]
        source: SubstitutionError,
    },

    #[error("Failed to encode process information: {0}")]
    ProcessData(#[from] serde_json::Error),
}

impl LaunchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LaunchError::Config(_) | LaunchError::ProcessData(_) => ErrorKind::Configuration,
            LaunchError::Override(_) => ErrorKind::MalformedOverride,
            LaunchError::Dependency(e) => match e {
                DependencyError::PackageNotFound { .. } => ErrorKind::PackageNotFound,
                DependencyError::CyclicDependency(_) => ErrorKind::CyclicDependency,
                DependencyError::ExcludedAllRequirements(_) => ErrorKind::Configuration,
            },
            LaunchError::Environment(EnvironmentError::UnresolvedVariable { .. })
            | LaunchError::ArgumentSubstitution { .. } => ErrorKind::UnresolvedVariable,
            LaunchError::Delegate(e) => match e {
                DelegateError::NotFound { .. } => ErrorKind::DelegateNotFound,
                DelegateError::Hook { .. } => ErrorKind::Configuration,
            },
            LaunchError::Process(ProcessError::ExecutableNotFound { .. })
            | LaunchError::NoExecutable(_) => ErrorKind::ExecutableNotFound,
            LaunchError::Process(_) => ErrorKind::EnvironmentError,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }
}
