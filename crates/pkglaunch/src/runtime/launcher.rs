//! Launch orchestration
//!
//! [`Launcher::prepare`] turns a program name and its raw arguments into a
//! [`LaunchContext`]: configuration is loaded and overridden, the package
//! closure resolved, the environment composed, the delegate bound and the
//! final command line built. The context then either spawns a child or runs
//! the target in the current process.

use crate::config::{
    override_usage, strip_overrides, ArgumentOverrides, ConfigError, KvStore, PackageManagerDecl,
    SubstitutionContext, Version, PACKAGE_MANAGER_KEY,
};
use crate::error::LaunchError;
use crate::runtime::catalog::{BootSpec, PackageCatalog, PackageSpec};
use crate::runtime::delegate::{default_execute_in_process, DelegateRegistry, DelegateSlot};
use crate::runtime::dependency::{resolve, ResolvedClosure};
use crate::runtime::environment::{compose, os_environment, Environment, PATH_SEPARATOR};
use crate::runtime::info::{ProcessInformation, ProcessSpec, PROCESS_DATA_VARIABLE};
use crate::runtime::policy::PolicyTable;
use crate::runtime::process::{ExecutionMode, ProcessError, ProcessHandle, StreamCapture};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

/// Variable listing extra configuration directories
pub const CONFIG_PATH_VARIABLE: &str = "PKGLAUNCH_CONFIG_PATH";

/// Launcher configuration
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Always run the target in a child process
    pub force_spawn: bool,
    /// Streams to pipe when a child is spawned
    pub capture: StreamCapture,
    /// Extra configuration directories, after the hierarchy
    pub config_dirs: Vec<PathBuf>,
    /// Load `etc/` directories above the program
    pub hierarchy: bool,
    /// Load the per-user configuration directory
    pub user_config: bool,
    /// Installation root to use instead of the one derived from the launcher
    pub core_tree: Option<PathBuf>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            force_spawn: false,
            capture: StreamCapture::none(),
            config_dirs: Vec::new(),
            hierarchy: true,
            user_config: true,
            core_tree: None,
        }
    }
}

/// Executable and version of a runtime, used to decide whether the target
/// can run inside the current process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeIdentity {
    pub executable: PathBuf,
    pub version: Option<Version>,
}

impl RuntimeIdentity {
    pub fn new(executable: impl Into<PathBuf>, version: Option<Version>) -> Self {
        Self {
            executable: executable.into(),
            version,
        }
    }

    /// The running launcher
    pub fn current() -> Self {
        Self {
            executable: std::env::current_exe().unwrap_or_default(),
            version: Some(Version::parse(env!("CARGO_PKG_VERSION"))),
        }
    }

    /// Same executable file and same version
    pub fn matches(&self, other: &RuntimeIdentity) -> bool {
        same_file(&self.executable, &other.executable) && self.version == other.version
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a.as_os_str().is_empty() || b.as_os_str().is_empty() {
        return false;
    }
    let canonical = |p: &Path| p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
    canonical(a) == canonical(b)
}

/// Spawn unless the target runtime is the current one and nothing forces a
/// child process
pub fn decide_execution(
    current: &RuntimeIdentity,
    target: &RuntimeIdentity,
    force_spawn: bool,
) -> ExecutionMode {
    if !force_spawn && current.matches(target) {
        ExecutionMode::InProcess
    } else {
        ExecutionMode::Spawned
    }
}

/// Per-launch state, logged on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    Resolving,
    EnvironmentComposed,
    DelegateBound,
    Launching,
    Spawned,
    ExecutedInProcess,
    AbortedConfig,
}

impl std::fmt::Display for LaunchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LaunchState::Resolving => "resolving",
            LaunchState::EnvironmentComposed => "environment composed",
            LaunchState::DelegateBound => "delegate bound",
            LaunchState::Launching => "launching",
            LaunchState::Spawned => "spawned",
            LaunchState::ExecutedInProcess => "executed in process",
            LaunchState::AbortedConfig => "aborted",
        };
        f.write_str(name)
    }
}

fn log_state(id: &str, state: LaunchState) {
    log::debug!("[{}] Launch state: {}", id, state);
}

/// Request answered without running anything
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandledRequest {
    Help(String),
    Version(String),
}

impl HandledRequest {
    /// The launcher's name and version
    pub fn version() -> Self {
        HandledRequest::Version(format!("pkglaunch {}", env!("CARGO_PKG_VERSION")))
    }

    pub fn message(&self) -> &str {
        match self {
            HandledRequest::Help(text) | HandledRequest::Version(text) => text,
        }
    }
}

/// Outcome of [`Launcher::prepare`]
#[derive(Debug)]
pub enum Prepared {
    Ready(LaunchContext),
    Handled(HandledRequest),
}

/// Builds launch contexts. Holds only read-only state, so one launcher can
/// prepare any number of launches.
#[derive(Debug, Clone)]
pub struct Launcher {
    registry: Arc<DelegateRegistry>,
    options: LaunchOptions,
    runtime: RuntimeIdentity,
    os_env: IndexMap<String, String>,
}

impl Launcher {
    /// Create a launcher for the current process and OS environment
    pub fn new(registry: DelegateRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            options: LaunchOptions::default(),
            runtime: RuntimeIdentity::current(),
            os_env: os_environment(),
        }
    }

    pub fn with_options(mut self, options: LaunchOptions) -> Self {
        self.options = options;
        self
    }

    /// Runtime compared against the target to allow in-process execution
    pub fn with_runtime(mut self, runtime: RuntimeIdentity) -> Self {
        self.runtime = runtime;
        self
    }

    /// Replace the OS environment snapshot
    pub fn with_os_environment(mut self, os_env: IndexMap<String, String>) -> Self {
        self.os_env = os_env;
        self
    }

    pub fn options(&self) -> &LaunchOptions {
        &self.options
    }

    /// Resolve everything needed to run `program` with `raw_args`
    pub fn prepare(&self, program: &str, raw_args: &[String]) -> Result<Prepared, LaunchError> {
        log_state(program, LaunchState::Resolving);
        self.prepare_context(program, raw_args).inspect_err(|e| {
            log::debug!("[{}] {}", program, e);
            log_state(program, LaunchState::AbortedConfig);
        })
    }

    fn prepare_context(&self, program: &str, raw_args: &[String]) -> Result<Prepared, LaunchError> {
        let mut process = ProcessSpec::capture(program, raw_args);
        if let Some(core_tree) = &self.options.core_tree {
            process.core_tree = core_tree.clone();
        }

        // Overrides must land in the store before any package is read
        let overrides = ArgumentOverrides::parse(raw_args)?;
        let mut store = self.load_store(&process)?;
        overrides.apply(&mut store)?;
        let catalog = PackageCatalog::from_store(&store)?;

        if overrides.short_circuits() {
            let request = if overrides.help {
                HandledRequest::Help(help_text(&process, &catalog))
            } else {
                HandledRequest::version()
            };
            return Ok(Prepared::Handled(request));
        }

        let manager: PackageManagerDecl = store.typed_or_default(PACKAGE_MANAGER_KEY)?;
        let policy = PolicyTable::from_decl(&manager.environment.variables);

        let closure = resolve(&process.id, &catalog)?;
        let mut environment = compose(&closure, &self.os_env, &policy)?;
        log_state(&process.id, LaunchState::EnvironmentComposed);

        let mut delegate = DelegateSlot::default();
        if let Some(d) = delegate.bind(&self.registry, &closure)? {
            d.prepare_environment(&closure, &mut environment)?;
        }
        log_state(&process.id, LaunchState::DelegateBound);

        for spec in closure.iter() {
            for action in &spec.actions {
                match delegate.get_mut() {
                    Some(d) => d.handle_action(&closure, &spec.id, action)?,
                    None => log::warn!(
                        "[{}] Ignoring action '{}' of package '{}': no delegate",
                        process.id,
                        action,
                        spec.id
                    ),
                }
            }
        }

        let arguments = build_arguments(&closure, &environment, &self.os_env, raw_args)?;
        let arguments = match delegate.get_mut() {
            Some(d) => d.transform_arguments(&closure, arguments)?,
            None => arguments,
        };
        let arguments = strip_overrides(arguments);

        let chain = closure.alias_chain();
        let provider = chain
            .iter()
            .find(|p| p.executable.is_some())
            .ok_or_else(|| LaunchError::NoExecutable(process.id.clone()))?;
        let declared = provider.executable.clone().unwrap_or_default();
        let cwd = chain.iter().find_map(|p| p.cwd.clone());
        let search_dir = match &cwd {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().unwrap_or_default(),
        };
        let executable = locate_executable(&declared, &environment, &search_dir)?;
        let target = RuntimeIdentity::new(executable.clone(), provider.version.clone());

        let info = ProcessInformation {
            process: process.clone(),
            packages: closure.ids().into_iter().map(str::to_string).collect(),
            config_sources: store.sources().to_vec(),
            boot: BootSpec::collect(closure.iter()),
        };
        environment.set(PROCESS_DATA_VARIABLE, info.to_json()?);

        let force_spawn = self.options.force_spawn
            || delegate.get_mut().is_some_and(|d| d.force_spawn(&closure));
        let mode = decide_execution(&self.runtime, &target, force_spawn);
        log::debug!(
            "[{}] Execution mode: {} (force spawn: {})",
            process.id,
            mode,
            force_spawn
        );
        log_state(&process.id, LaunchState::Launching);

        Ok(Prepared::Ready(LaunchContext {
            process,
            closure,
            environment,
            arguments,
            executable,
            cwd,
            delegate,
            mode,
            state: LaunchState::Launching,
            capture: self.options.capture,
            config_sources: info.config_sources,
            boot: info.boot,
        }))
    }

    /// Configuration directories, lowest precedence first
    pub fn config_dirs(&self, process: &ProcessSpec) -> Vec<PathBuf> {
        let mut found = vec![process.core_config_dir()];
        if self.options.hierarchy {
            found.extend(hierarchy_dirs(&process.executable));
        }
        found.extend(self.options.config_dirs.iter().cloned());
        if let Some(paths) = self.os_env.get(CONFIG_PATH_VARIABLE) {
            found.extend(
                paths
                    .split(PATH_SEPARATOR)
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from),
            );
        }
        if self.options.user_config {
            if let Some(dir) = dirs::config_dir() {
                found.push(dir.join("pkglaunch"));
            }
        }
        found
    }

    /// Load every configuration directory into a fresh store
    pub fn load_store(&self, process: &ProcessSpec) -> Result<KvStore, ConfigError> {
        let mut store = KvStore::new();
        for dir in self.config_dirs(process) {
            store.load_dir(&dir)?;
        }
        log::debug!(
            "[{}] Loaded {} configuration file(s)",
            process.id,
            store.sources().len()
        );
        Ok(store)
    }
}

/// `etc/` directories from the filesystem root down to the program's
/// directory, excluding the root itself. Bare program names start from the
/// working directory.
fn hierarchy_dirs(program: &Path) -> Vec<PathBuf> {
    let start = match program.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => dir.to_path_buf(),
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(_) => return Vec::new(),
        },
    };
    let start = start.canonicalize().unwrap_or(start);

    let mut dirs: Vec<PathBuf> = start
        .ancestors()
        .filter(|dir| dir.parent().is_some())
        .map(|dir| dir.join("etc"))
        .collect();
    dirs.reverse();
    dirs
}

/// Prepends of the closure, the user's arguments, then appends
fn build_arguments(
    closure: &ResolvedClosure,
    environment: &Environment,
    os_env: &IndexMap<String, String>,
    raw_args: &[String],
) -> Result<Vec<String>, LaunchError> {
    let resolve = closure.iter().any(|p| p.arguments.resolve);
    let ctx = SubstitutionContext::new(environment.as_map(), os_env);
    let expand = |spec: &PackageSpec, value: &str| -> Result<String, LaunchError> {
        if !resolve {
            return Ok(value.to_string());
        }
        ctx.substitute(value)
            .map_err(|source| LaunchError::ArgumentSubstitution {
                package: spec.id.clone(),
                source,
            })
    };

    let mut arguments = Vec::new();
    for spec in closure.iter() {
        for value in &spec.arguments.prepend {
            arguments.push(expand(spec, value.as_str())?);
        }
    }
    arguments.extend(raw_args.iter().cloned());
    for spec in closure.iter() {
        for value in &spec.arguments.append {
            arguments.push(expand(spec, value.as_str())?);
        }
    }
    Ok(arguments)
}

/// Check the executable. Bare names are searched in the composed `PATH`,
/// other relative paths resolve against `cwd`.
fn locate_executable(
    path: &Path,
    environment: &Environment,
    cwd: &Path,
) -> Result<PathBuf, ProcessError> {
    which::which_in(path, environment.get("PATH"), cwd).map_err(|e| {
        ProcessError::ExecutableNotFound {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })
}

fn help_text(process: &ProcessSpec, catalog: &PackageCatalog) -> String {
    let mut text = format!("Usage: {} [ARGS...]\n\n{}\n", process.id, override_usage());
    if !catalog.is_empty() {
        text.push_str("\nKnown packages:\n");
        for id in catalog.ids() {
            text.push_str(&format!("  {}\n", id));
        }
    }
    text
}

/// Everything resolved for one launch
#[derive(Debug)]
pub struct LaunchContext {
    process: ProcessSpec,
    closure: ResolvedClosure,
    environment: Environment,
    arguments: Vec<String>,
    executable: PathBuf,
    cwd: Option<PathBuf>,
    delegate: DelegateSlot,
    mode: ExecutionMode,
    state: LaunchState,
    capture: StreamCapture,
    config_sources: Vec<PathBuf>,
    boot: BootSpec,
}

impl LaunchContext {
    pub fn process(&self) -> &ProcessSpec {
        &self.process
    }

    pub fn closure(&self) -> &ResolvedClosure {
        &self.closure
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Final arguments, overrides removed
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn state(&self) -> LaunchState {
        self.state
    }

    pub fn delegate_name(&self) -> Option<&str> {
        self.delegate.name()
    }

    /// Boot configuration gathered from the closure
    pub fn boot(&self) -> &BootSpec {
        &self.boot
    }

    /// The command that runs the target with exactly the composed
    /// environment
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.executable);
        command
            .args(&self.arguments)
            .env_clear()
            .envs(self.environment.iter());
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        command
    }

    /// Describe the launch without running it
    pub fn plan(&self) -> LaunchPlan {
        LaunchPlan {
            program: self.process.id.clone(),
            packages: self.closure.ids().into_iter().map(str::to_string).collect(),
            executable: self.executable.clone(),
            arguments: self.arguments.clone(),
            cwd: self.cwd.clone(),
            environment: self
                .environment
                .iter()
                .filter(|(name, _)| *name != PROCESS_DATA_VARIABLE)
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            delegate: self.delegate.name().map(str::to_string),
            mode: self.mode,
            config_sources: self.config_sources.clone(),
            boot: self.boot.clone(),
        }
    }

    /// Run the target in the decided mode
    pub fn execute(self) -> Result<ProcessHandle, LaunchError> {
        match self.mode {
            ExecutionMode::Spawned => {
                let capture = self.capture;
                self.spawn(capture)
            }
            ExecutionMode::InProcess => self.execute_in_process(),
        }
    }

    /// Always start a child process and return without waiting for it
    pub fn spawn(mut self, capture: StreamCapture) -> Result<ProcessHandle, LaunchError> {
        let mut command = self.command();
        if let Some(d) = self.delegate.get_mut() {
            d.pre_spawn(&mut command)?;
        }

        log::info!(
            "[{}] Starting: {} {}",
            self.process.id,
            self.executable.display(),
            self.arguments.join(" ")
        );
        let handle = ProcessHandle::spawn(&self.process.id, command, capture)?;
        self.transition(LaunchState::Spawned);
        Ok(handle)
    }

    fn execute_in_process(mut self) -> Result<ProcessHandle, LaunchError> {
        let command = self.command();
        log::info!(
            "[{}] Executing in process: {} {}",
            self.process.id,
            self.executable.display(),
            self.arguments.join(" ")
        );

        let exit_code = match self.delegate.get_mut() {
            Some(d) => d.execute_in_process(command)?,
            None => default_execute_in_process(command)?,
        };
        self.transition(LaunchState::ExecutedInProcess);
        Ok(ProcessHandle::in_process(
            &self.process.id,
            exit_code,
            self.command(),
        ))
    }

    fn transition(&mut self, state: LaunchState) {
        self.state = state;
        log_state(&self.process.id, state);
    }
}

/// Launch plan for dry-run mode
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub program: String,
    /// Packages in resolution order
    pub packages: Vec<String>,
    pub executable: PathBuf,
    pub arguments: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub environment: Vec<(String, String)>,
    pub delegate: Option<String>,
    pub mode: ExecutionMode,
    pub config_sources: Vec<PathBuf>,
    pub boot: BootSpec,
}

/// Display the launch plan in a human-readable format
impl std::fmt::Display for LaunchPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Launch Plan")?;
        writeln!(f, "===========")?;
        writeln!(f)?;

        writeln!(f, "Program: {}", self.program)?;
        writeln!(
            f,
            "Command: {} {}",
            self.executable.display(),
            self.arguments.join(" ")
        )?;
        if let Some(cwd) = &self.cwd {
            writeln!(f, "Working directory: {}", cwd.display())?;
        }
        writeln!(f, "Mode: {}", self.mode)?;
        writeln!(
            f,
            "Delegate: {}",
            self.delegate.as_deref().unwrap_or("none")
        )?;
        writeln!(f)?;

        writeln!(f, "Packages (in resolution order):")?;
        for (i, id) in self.packages.iter().enumerate() {
            writeln!(f, "  {}. {}", i + 1, id)?;
        }

        if !self.config_sources.is_empty() {
            writeln!(f)?;
            writeln!(f, "Configuration:")?;
            for source in &self.config_sources {
                writeln!(f, "  {}", source.display())?;
            }
        }

        if !self.boot.is_empty() {
            writeln!(f)?;
            writeln!(f, "Boot:")?;
            for path in &self.boot.interpreter_paths {
                writeln!(f, "  interpreter path: {}", path.display())?;
            }
            for module in &self.boot.import {
                writeln!(f, "  import: {}", module)?;
            }
            for path in &self.boot.plugin_paths {
                writeln!(f, "  plugin path: {}", path.display())?;
            }
        }

        if !self.environment.is_empty() {
            writeln!(f)?;
            writeln!(f, "Environment:")?;
            for (key, value) in &self.environment {
                writeln!(f, "  {}={}", key, value)?;
            }
        }

        Ok(())
    }
}
