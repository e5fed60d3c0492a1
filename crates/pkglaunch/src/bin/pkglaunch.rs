//! pkglaunch CLI
//!
//! Usage:
//!   pkglaunch maya scene.ma
//!   pkglaunch --dry-run python ---packages.python.version=3.11
//!   pkglaunch --spawn --config-dir ./etc nuke
//!   pkglaunch --version
//!
//! When invoked under any other name (for example through a symlink called
//! `maya`), that name is the program and every argument is passed through.

use pkglaunch::cli::{early_exit_code, USAGE_EXIT_CODE};
use pkglaunch::config::wants_trace;
use pkglaunch::{
    DelegateRegistry, HandledRequest, LaunchArgs, LaunchOptions, Launcher, Prepared,
    HANDLED_EXIT_CODE,
};
use std::path::Path;

struct Invocation {
    program: String,
    args: Vec<String>,
    options: LaunchOptions,
    log_level: String,
    dry_run: bool,
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let mut env_args = std::env::args();
    let argv0 = env_args.next().unwrap_or_else(|| "pkglaunch".to_string());
    let rest: Vec<String> = env_args.collect();

    let invocation = if is_wrapper(&argv0) {
        Invocation {
            program: argv0,
            args: rest,
            options: LaunchOptions::default(),
            log_level: "warn".to_string(),
            dry_run: false,
        }
    } else {
        let args = match LaunchArgs::parse(&argv0, &rest) {
            Ok(args) => args,
            Err(early_exit) => {
                if early_exit.status.is_ok() {
                    println!("{}", early_exit.output);
                } else {
                    eprintln!("{}", early_exit.output);
                }
                return early_exit_code(&early_exit);
            }
        };
        if args.version {
            println!("{}", HandledRequest::version().message());
            return HANDLED_EXIT_CODE;
        }
        let Some(program) = args.program() else {
            return USAGE_EXIT_CODE;
        };
        Invocation {
            program: program.to_string(),
            args: args.program_args().to_vec(),
            options: args.launch_options(),
            log_level: args.log_level,
            dry_run: args.dry_run,
        }
    };

    // Initialize logging
    let log_level = if wants_trace(&invocation.args) {
        "trace"
    } else {
        match invocation.log_level.to_lowercase().as_str() {
            "error" => "error",
            "warn" => "warn",
            "info" => "info",
            "debug" => "debug",
            "trace" => "trace",
            _ => "warn",
        }
    };
    let env = env_logger::Env::default().default_filter_or(log_level);
    env_logger::init_from_env(env);

    // The child receives Ctrl+C too; stay alive to report its exit status
    if let Err(e) = ctrlc::set_handler(|| {
        log::info!("Received Ctrl+C, waiting for the program to exit...");
    }) {
        log::warn!("Failed to install Ctrl+C handler: {}", e);
    }

    let launcher = Launcher::new(DelegateRegistry::new()).with_options(invocation.options);

    let context = match launcher.prepare(&invocation.program, &invocation.args) {
        Ok(Prepared::Ready(context)) => context,
        Ok(Prepared::Handled(request)) => {
            println!("{}", request.message());
            return HANDLED_EXIT_CODE;
        }
        Err(e) => {
            log::error!("Failed to prepare '{}': {}", invocation.program, e);
            return e.exit_code();
        }
    };

    if invocation.dry_run {
        println!("{}", context.plan());
        return 0;
    }

    let mut handle = match context.execute() {
        Ok(handle) => handle,
        Err(e) => {
            log::error!("Launch failed: {}", e);
            return e.exit_code();
        }
    };

    match handle.wait() {
        Ok(code) => code,
        Err(e) => {
            let e = pkglaunch::LaunchError::from(e);
            log::error!("{}", e);
            e.exit_code()
        }
    }
}

/// Invoked through a link named after the program
fn is_wrapper(argv0: &str) -> bool {
    Path::new(argv0)
        .file_stem()
        .is_some_and(|stem| stem != "pkglaunch")
}
