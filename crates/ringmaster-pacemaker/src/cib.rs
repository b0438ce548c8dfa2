// Retrying wrapper around cibadmin
// The CIB rejects writes with exit code 10 while another node holds it busy

use std::time::Duration;

use tracing::{debug, warn};

use ringmaster_common::command::{command_error, command_line};
use ringmaster_common::{CommandRunner, HaError, Result, Sleeper};

/// cibadmin exit status meaning "busy, try again"
pub const CIB_BUSY: i32 = 10;

/// Total attempts, including the first
pub const MAX_ATTEMPTS: u32 = 100;

pub const RETRY_DELAY: Duration = Duration::from_secs(1);

const CIBADMIN: &str = "cibadmin";

/// One completed mutating call into the configuration store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigTransaction {
    pub args: Vec<String>,
    pub attempts: u32,
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

pub struct CibAdmin<'a> {
    runner: &'a dyn CommandRunner,
    sleeper: &'a dyn Sleeper,
    max_attempts: u32,
    retry_delay: Duration,
}

impl<'a> CibAdmin<'a> {
    pub fn new(runner: &'a dyn CommandRunner, sleeper: &'a dyn Sleeper) -> Self {
        Self {
            runner,
            sleeper,
            max_attempts: MAX_ATTEMPTS,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Run `cibadmin <args>`, backing off while the store is busy.
    ///
    /// Busy results are retried up to the attempt budget with no pause after
    /// the last one; exhausting it is a `Timeout`. Any other nonzero status
    /// fails immediately with the captured output.
    pub fn run_transaction(&self, args: &[&str]) -> Result<ConfigTransaction> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let output = self.runner.run(CIBADMIN, args)?;
            if output.is_success() {
                return Ok(ConfigTransaction {
                    args: args.iter().map(|a| a.to_string()).collect(),
                    attempts,
                    code: output.code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                });
            }
            if output.code != CIB_BUSY {
                return Err(command_error(CIBADMIN, args, output));
            }
            if attempts >= self.max_attempts {
                warn!(
                    "CIB still busy after {} attempts: {}",
                    attempts,
                    command_line(CIBADMIN, args)
                );
                return Err(HaError::Timeout(format!(
                    "'{}' busy after {} attempts",
                    command_line(CIBADMIN, args),
                    attempts
                )));
            }
            debug!("CIB busy (attempt {}), retrying", attempts);
            self.sleeper.sleep(self.retry_delay);
        }
    }

    /// Wipe the whole CIB
    pub fn erase(&self) -> Result<ConfigTransaction> {
        self.run_transaction(&["-f", "-E"])
    }

    /// Read the `nodes` section
    pub fn query_nodes(&self) -> Result<String> {
        Ok(self
            .run_transaction(&["--query", "--scope", "nodes"])?
            .stdout)
    }

    /// Drop a node's configuration and status entries
    pub fn delete_node_entries(&self, name: &str) -> Result<()> {
        let node = format!("<node uname=\"{}\"/>", name);
        self.run_transaction(&["--delete", "--obj_type", "nodes", "-X", &node])?;
        let node_state = format!("<node_state uname=\"{}\"/>", name);
        self.run_transaction(&["--delete", "--obj_type", "nodes", "--crm_xml", &node_state])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use ringmaster_common::CommandOutput;
    use ringmaster_common::testing::{RecordingSleeper, ScriptedRunner};

    /// Busy for the first `busy` calls, then `then`
    fn busy_then(busy: u32, then: CommandOutput) -> ScriptedRunner {
        let calls = Arc::new(AtomicU32::new(0));
        ScriptedRunner::new(move |_| {
            if calls.fetch_add(1, Ordering::SeqCst) < busy {
                CommandOutput::failure(CIB_BUSY, "Signon to CIB failed")
            } else {
                then.clone()
            }
        })
    }

    #[test]
    fn test_success_first_try() {
        let runner = ScriptedRunner::new(|_| CommandOutput::success("<cib/>"));
        let sleeper = RecordingSleeper::new();
        let cib = CibAdmin::new(&runner, &sleeper);

        let tx = cib.run_transaction(&["--query"]).unwrap();
        assert_eq!(tx.attempts, 1);
        assert_eq!(tx.stdout, "<cib/>");
        assert_eq!(tx.args, vec!["--query"]);
        assert_eq!(sleeper.count(), 0);
    }

    #[test]
    fn test_busy_three_times_then_success() {
        let runner = busy_then(3, CommandOutput::success(""));
        let sleeper = RecordingSleeper::new();
        let cib = CibAdmin::new(&runner, &sleeper);

        let tx = cib.erase().unwrap();
        assert_eq!(tx.attempts, 4);
        assert_eq!(tx.code, 0);
        assert_eq!(runner.count("cibadmin"), 4);
        assert_eq!(sleeper.total(), Duration::from_secs(3));
    }

    #[test]
    fn test_always_busy_times_out() {
        let runner = busy_then(u32::MAX, CommandOutput::success(""));
        let sleeper = RecordingSleeper::new();
        let cib = CibAdmin::new(&runner, &sleeper);

        let err = cib.erase().unwrap_err();
        assert!(matches!(err, HaError::Timeout(_)));
        assert_eq!(runner.count("cibadmin"), 100);
        assert_eq!(sleeper.count(), 99);
    }

    #[test]
    fn test_other_failure_is_not_retried() {
        let runner = busy_then(1, CommandOutput::failure(22, "Invalid argument"));
        let sleeper = RecordingSleeper::new();
        let cib = CibAdmin::new(&runner, &sleeper);

        let err = cib.erase().unwrap_err();
        assert_eq!(err.exit_code(), Some(22));
        assert_eq!(
            err.to_string(),
            "Error (22) running 'cibadmin -f -E': '' 'Invalid argument'"
        );
        assert_eq!(runner.count("cibadmin"), 2);
    }

    #[test]
    fn test_delete_node_entries() {
        let runner = ScriptedRunner::always_ok();
        let sleeper = RecordingSleeper::new();
        let cib = CibAdmin::new(&runner, &sleeper);

        cib.delete_node_entries("node2").unwrap();
        assert_eq!(
            runner.command_lines(),
            vec![
                "cibadmin --delete --obj_type nodes -X <node uname=\"node2\"/>",
                "cibadmin --delete --obj_type nodes --crm_xml <node_state uname=\"node2\"/>",
            ]
        );
    }
}
