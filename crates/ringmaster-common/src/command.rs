//! External command execution
//!
//! The agent never links against cluster libraries; everything it does to
//! the cluster goes through command-line tools. This module is the single
//! seam for that, so the rest of the workspace can be driven by scripted
//! runners in tests.

use std::process::Command;

use tracing::debug;

use crate::error::{HaError, Result};

/// Exit status and captured output of one command invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Runs an external command and returns its exit code plus captured output
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`. A nonzero exit is NOT an error here; only
    /// failing to spawn the process is.
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Run and require a zero exit status, returning stdout
    fn try_run(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = self.run(program, args)?;
        if output.is_success() {
            Ok(output.stdout)
        } else {
            Err(command_error(program, args, output))
        }
    }
}

/// Build an `ExternalCommand` error from a failed invocation
pub fn command_error(program: &str, args: &[&str], output: CommandOutput) -> HaError {
    HaError::ExternalCommand {
        command: command_line(program, args),
        code: output.code,
        stdout: output.stdout,
        stderr: output.stderr,
    }
}

/// Render a command line for logs and error messages
pub fn command_line(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// `CommandRunner` backed by `std::process::Command`
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        debug!("Running: {}", command_line(program, args));
        let output = Command::new(program).args(args).output()?;
        // Killed by a signal: no code, report as generic failure
        let code = output.status.code().unwrap_or(-1);
        Ok(CommandOutput {
            code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
