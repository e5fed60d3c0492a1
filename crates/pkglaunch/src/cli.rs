//! Command-line interface for pkglaunch

use crate::error::HANDLED_EXIT_CODE;
use crate::runtime::LaunchOptions;
use argh::FromArgs;
use std::path::PathBuf;

/// Exit code for invalid launcher options
pub const USAGE_EXIT_CODE: i32 = 2;

/// Launch a program inside the environment of its packages
#[derive(FromArgs, Debug, PartialEq)]
pub struct LaunchArgs {
    /// always run the program in a child process
    #[argh(switch)]
    pub spawn: bool,

    /// show the launch plan without executing
    #[argh(switch)]
    pub dry_run: bool,

    /// additional configuration directory (repeatable)
    #[argh(option)]
    pub config_dir: Vec<String>,

    /// do not load etc/ directories above the program
    #[argh(switch)]
    pub no_hierarchy: bool,

    /// do not load the per-user configuration directory
    #[argh(switch)]
    pub no_user_config: bool,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, short = 'l', default = "String::from(\"warn\")")]
    pub log_level: String,

    /// print the launcher version and exit
    #[argh(switch)]
    pub version: bool,

    /// program to launch, followed by its arguments
    #[argh(positional)]
    pub command: Vec<String>,
}

/// Launcher options that consume the following argument
const VALUE_OPTIONS: &[&str] = &["--config-dir", "--log-level", "-l"];

/// Split raw arguments into launcher options and `PROGRAM ARGS...`.
///
/// Launcher options end at the first argument that is not an option, or
/// at `--`. Everything after belongs to the program, even if it looks like
/// an option.
pub fn split_invocation(args: &[String]) -> (&[String], &[String]) {
    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        if arg == "--" {
            return (&args[..i], &args[i + 1..]);
        }
        if !arg.starts_with('-') || arg == "-" {
            break;
        }
        i += if VALUE_OPTIONS.contains(&arg) { 2 } else { 1 };
    }
    let i = i.min(args.len());
    (&args[..i], &args[i..])
}

impl LaunchArgs {
    /// Parse `args` (without the command name). Arguments after the program
    /// are passed through untouched. A program is required unless
    /// `--version` is given.
    pub fn parse(command: &str, args: &[String]) -> Result<Self, argh::EarlyExit> {
        let (options, program) = split_invocation(args);
        let mut argv: Vec<&str> = options.iter().map(String::as_str).collect();
        if !program.is_empty() {
            argv.push("--");
            argv.extend(program.iter().map(String::as_str));
        }

        let parsed = Self::from_args(&[command], &argv)?;
        if !parsed.version && parsed.command.is_empty() {
            return Err(argh::EarlyExit {
                output: format!(
                    "Required positional arguments not provided:\n    command\n\nRun {} --help for more information.",
                    command
                ),
                status: Err(()),
            });
        }
        Ok(parsed)
    }

    /// Parse the arguments of the current process
    pub fn from_env() -> Result<Self, argh::EarlyExit> {
        let mut env_args = std::env::args();
        let command = env_args.next().unwrap_or_else(|| "pkglaunch".to_string());
        let args: Vec<String> = env_args.collect();
        Self::parse(&command, &args)
    }

    /// The program to launch
    pub fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }

    /// Arguments passed to the program
    pub fn program_args(&self) -> &[String] {
        self.command.get(1..).unwrap_or_default()
    }

    pub fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            force_spawn: self.spawn,
            config_dirs: self.config_dir.iter().map(PathBuf::from).collect(),
            hierarchy: !self.no_hierarchy,
            user_config: !self.no_user_config,
            ..Default::default()
        }
    }
}

/// Exit code for a parse that stopped early: `--help` is handled like
/// `---help`, anything else is a usage error
pub fn early_exit_code(exit: &argh::EarlyExit) -> i32 {
    match exit.status {
        Ok(()) => HANDLED_EXIT_CODE,
        Err(()) => USAGE_EXIT_CODE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_program_arguments_pass_through() {
        let args = LaunchArgs::parse(
            "pkglaunch",
            &strings(&["--spawn", "-l", "debug", "maya", "--batch", "---trace", "scene.ma"]),
        )
        .unwrap();
        assert!(args.spawn);
        assert_eq!(args.log_level, "debug");
        assert_eq!(args.program(), Some("maya"));
        assert_eq!(args.program_args(), &["--batch", "---trace", "scene.ma"]);
    }

    #[test]
    fn test_repeated_config_dirs() {
        let args = LaunchArgs::parse(
            "pkglaunch",
            &strings(&["--config-dir", "/a", "--config-dir", "/b", "--no-hierarchy", "app"]),
        )
        .unwrap();
        assert_eq!(args.config_dir, vec!["/a", "/b"]);
        let options = args.launch_options();
        assert!(!options.hierarchy);
        assert!(options.user_config);
        assert_eq!(options.config_dirs, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }

    #[test]
    fn test_double_dash_ends_options() {
        let args = LaunchArgs::parse("pkglaunch", &strings(&["--", "--weird-name", "x"])).unwrap();
        assert_eq!(args.program(), Some("--weird-name"));
        assert_eq!(args.program_args(), &["x"]);
    }

    #[test]
    fn test_missing_program_is_usage_error() {
        let exit = LaunchArgs::parse("pkglaunch", &strings(&["--dry-run"])).unwrap_err();
        assert_eq!(early_exit_code(&exit), USAGE_EXIT_CODE);

        let exit = LaunchArgs::parse("pkglaunch", &strings(&["--bogus", "app"])).unwrap_err();
        assert_eq!(early_exit_code(&exit), USAGE_EXIT_CODE);
    }

    #[test]
    fn test_help_and_version_are_handled() {
        let exit = LaunchArgs::parse("pkglaunch", &strings(&["--help"])).unwrap_err();
        assert!(exit.output.contains("--dry-run"));
        assert_eq!(early_exit_code(&exit), HANDLED_EXIT_CODE);

        let args = LaunchArgs::parse("pkglaunch", &strings(&["--version"])).unwrap();
        assert!(args.version);
        assert_eq!(args.program(), None);

        // after the program name, --version belongs to the program
        let args = LaunchArgs::parse("pkglaunch", &strings(&["python", "--version"])).unwrap();
        assert!(!args.version);
        assert_eq!(args.program_args(), &["--version"]);
    }

    #[test]
    fn test_split_invocation() {
        let args = strings(&["--dry-run", "--log-level", "info", "tool", "-x"]);
        let (options, program) = split_invocation(&args);
        assert_eq!(options, &args[..3]);
        assert_eq!(program, &args[3..]);
    }
}
