//! Handles to launched programs

use std::io;
use std::path::PathBuf;
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};

/// How the target was run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// A child process was created
    Spawned,
    /// The current process ran the target itself
    InProcess,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Spawned => write!(f, "spawn"),
            ExecutionMode::InProcess => write!(f, "in-process"),
        }
    }
}

/// Standard streams to pipe back to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamCapture {
    pub stdout: bool,
    pub stderr: bool,
}

impl StreamCapture {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn both() -> Self {
        Self {
            stdout: true,
            stderr: true,
        }
    }

    pub fn stdout() -> Self {
        Self {
            stdout: true,
            stderr: false,
        }
    }
}

/// Output collected by [`ProcessHandle::communicate`]
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// A launched program.
///
/// Spawned handles start with a pending exit code; in-process handles are
/// complete when created.
#[derive(Debug)]
pub struct ProcessHandle {
    name: String,
    mode: ExecutionMode,
    child: Option<Child>,
    exit_code: Option<i32>,
    command: Option<Command>,
}

impl ProcessHandle {
    /// Spawn `command` and return immediately
    pub fn spawn(
        name: &str,
        mut command: Command,
        capture: StreamCapture,
    ) -> Result<Self, ProcessError> {
        if capture.stdout {
            command.stdout(Stdio::piped());
        }
        if capture.stderr {
            command.stderr(Stdio::piped());
        }

        let child = command.spawn().map_err(|source| {
            let program = PathBuf::from(command.get_program());
            match source.kind() {
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                    ProcessError::ExecutableNotFound {
                        path: program,
                        reason: source.to_string(),
                    }
                }
                _ => ProcessError::Spawn {
                    program: program.display().to_string(),
                    source,
                },
            }
        })?;

        log::info!("[{}] Started with PID: {}", name, child.id());

        Ok(Self {
            name: name.to_string(),
            mode: ExecutionMode::Spawned,
            child: Some(child),
            exit_code: None,
            command: None,
        })
    }

    /// Record a run that happened inside the current process. `command` is
    /// the equivalent command, with the resolved environment applied.
    pub fn in_process(name: &str, exit_code: i32, command: Command) -> Self {
        Self {
            name: name.to_string(),
            mode: ExecutionMode::InProcess,
            child: None,
            exit_code: Some(exit_code),
            command: Some(command),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Exit code, `None` while the child is still running
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// The OS command behind an in-process run
    pub fn command(&self) -> Option<&Command> {
        self.command.as_ref()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.as_mut().and_then(|c| c.stdout.take())
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.as_mut().and_then(|c| c.stderr.take())
    }

    /// Check for completion without blocking
    pub fn poll(&mut self) -> Result<Option<i32>, ProcessError> {
        let status = match &mut self.child {
            Some(child) if self.exit_code.is_none() => child.try_wait(),
            _ => return Ok(self.exit_code),
        };
        if let Some(status) = status.map_err(|e| self.wait_error(e))? {
            self.finish(status);
        }
        Ok(self.exit_code)
    }

    /// Block until the program exits
    pub fn wait(&mut self) -> Result<i32, ProcessError> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }
        let Some(child) = &mut self.child else {
            return Err(ProcessError::NotRunning(self.name.clone()));
        };
        let status = child.wait().map_err(|e| self.wait_error(e))?;
        Ok(self.finish(status))
    }

    /// Wait for exit while draining every captured stream
    pub fn communicate(&mut self) -> Result<CapturedOutput, ProcessError> {
        let Some(child) = self.child.take() else {
            return match self.exit_code {
                Some(exit_code) => Ok(CapturedOutput {
                    exit_code,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                }),
                None => Err(ProcessError::NotRunning(self.name.clone())),
            };
        };

        let output = child
            .wait_with_output()
            .map_err(|e| self.wait_error(e))?;
        let exit_code = self.finish(output.status);
        Ok(CapturedOutput {
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    /// Ask the child to stop. SIGTERM on unix, kill elsewhere.
    pub fn terminate(&mut self) -> Result<(), ProcessError> {
        let Some(child) = &mut self.child else {
            return Ok(());
        };
        log::info!("[{}] Stopping process...", self.name);

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).map_err(|errno| {
                ProcessError::Signal {
                    name: self.name.clone(),
                    source: io::Error::from(errno),
                }
            })?;
        }

        #[cfg(not(unix))]
        {
            child.kill().map_err(|source| ProcessError::Signal {
                name: self.name.clone(),
                source,
            })?;
        }

        Ok(())
    }

    fn finish(&mut self, status: ExitStatus) -> i32 {
        let code = exit_code_of(status);
        log::info!("[{}] Process exited with code: {}", self.name, code);
        self.exit_code = Some(code);
        code
    }

    fn wait_error(&self, source: io::Error) -> ProcessError {
        ProcessError::Wait {
            name: self.name.clone(),
            source,
        }
    }
}

/// Exit code of a finished process; `128 + signal` if it was killed on unix
pub fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}

/// Errors that can occur with launched programs
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Executable '{}' not found or not executable: {reason}", .path.display())]
    ExecutableNotFound { path: PathBuf, reason: String },

    #[error("Failed to spawn process '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to execute '{program}' in process: {source}")]
    Exec {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed waiting for process '{name}': {source}")]
    Wait {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to signal process '{name}': {source}")]
    Signal {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Process '{0}' is not running")]
    NotRunning(String),
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(script);
        command
    }

    #[test]
    fn test_spawn_returns_pending_then_communicates() {
        let mut handle =
            ProcessHandle::spawn("echo", sh("echo out; echo err >&2"), StreamCapture::both())
                .unwrap();
        assert_eq!(handle.mode(), ExecutionMode::Spawned);
        assert_eq!(handle.exit_code(), None);

        let output = handle.communicate().unwrap();
        assert_eq!(output.exit_code, 0);
        assert_eq!(String::from_utf8_lossy(&output.stdout), "out\n");
        assert_eq!(String::from_utf8_lossy(&output.stderr), "err\n");
        assert_eq!(handle.exit_code(), Some(0));
    }

    #[test]
    fn test_wait_reports_exit_code() {
        let mut handle = ProcessHandle::spawn("fail", sh("exit 7"), StreamCapture::none()).unwrap();
        assert_eq!(handle.wait().unwrap(), 7);
        // cached afterwards
        assert_eq!(handle.wait().unwrap(), 7);
    }

    #[test]
    fn test_terminate_reports_signal() {
        let mut handle = ProcessHandle::spawn("sleeper", sh("exec sleep 30"), StreamCapture::none()).unwrap();
        handle.terminate().unwrap();
        assert_eq!(handle.wait().unwrap(), 128 + 15);
    }

    #[test]
    fn test_missing_executable() {
        let result = ProcessHandle::spawn(
            "ghost",
            Command::new("/definitely/not/here"),
            StreamCapture::none(),
        );
        assert!(matches!(result, Err(ProcessError::ExecutableNotFound { .. })));
    }

    #[test]
    fn test_in_process_handle_is_complete() {
        let handle = ProcessHandle::in_process("inline", 0, sh("true"));
        assert_eq!(handle.mode(), ExecutionMode::InProcess);
        assert_eq!(handle.exit_code(), Some(0));
        assert!(handle.command().is_some());
        assert!(handle.pid().is_none());
    }
}
