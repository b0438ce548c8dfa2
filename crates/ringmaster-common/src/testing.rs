//! Scripted collaborators for tests
//!
//! `ScriptedRunner` answers every command through a handler closure and keeps
//! a log of what was run; `RecordingSleeper` adds up requested pauses
//! instead of blocking.

use std::sync::Mutex;
use std::time::Duration;

use crate::command::{CommandOutput, CommandRunner};
use crate::error::Result;
use crate::traits::Sleeper;

type Handler = Box<dyn Fn(&[String]) -> CommandOutput + Send + Sync>;

/// `CommandRunner` whose answers come from a closure over the full argv
pub struct ScriptedRunner {
    handler: Handler,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&[String]) -> CommandOutput + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Runner that succeeds with empty output for everything
    pub fn always_ok() -> Self {
        Self::new(|_| CommandOutput::success(""))
    }

    /// Every argv run so far, program first
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Every command line run so far, space-joined
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(|argv| argv.join(" ")).collect()
    }

    /// Number of invocations whose program is `program`
    pub fn count(&self, program: &str) -> usize {
        self.calls()
            .iter()
            .filter(|argv| argv.first().map(String::as_str) == Some(program))
            .count()
    }

    /// True if any command line starts with `prefix`
    pub fn ran(&self, prefix: &str) -> bool {
        self.command_lines().iter().any(|line| line.starts_with(prefix))
    }

    /// Index of the first command line starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.command_lines()
            .iter()
            .position(|line| line.starts_with(prefix))
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(program.to_string());
        argv.extend(args.iter().map(|a| a.to_string()));
        let output = (self.handler)(&argv);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(argv);
        }
        Ok(output)
    }
}

/// `Sleeper` that records pauses without blocking
#[derive(Default)]
pub struct RecordingSleeper {
    pauses: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.pauses.lock().map(|p| p.len()).unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.pauses
            .lock()
            .map(|p| p.iter().sum())
            .unwrap_or_default()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        if let Ok(mut pauses) = self.pauses.lock() {
            pauses.push(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_runner_records_calls() {
        let runner = ScriptedRunner::new(|argv| {
            if argv[0] == "crm" {
                CommandOutput::success("ok")
            } else {
                CommandOutput::failure(1, "nope")
            }
        });

        assert_eq!(runner.try_run("crm", &["status"]).unwrap(), "ok");
        assert!(runner.try_run("false", &[]).is_err());
        assert_eq!(runner.command_lines(), vec!["crm status", "false"]);
        assert_eq!(runner.count("crm"), 1);
        assert!(runner.ran("crm st"));
        assert_eq!(runner.position("false"), Some(1));
    }

    #[test]
    fn test_recording_sleeper() {
        let sleeper = RecordingSleeper::new();
        sleeper.sleep(Duration::from_secs(1));
        sleeper.sleep(Duration::from_secs(2));
        assert_eq!(sleeper.count(), 2);
        assert_eq!(sleeper.total(), Duration::from_secs(3));
    }
}
