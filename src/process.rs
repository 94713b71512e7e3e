//! Forceful termination of processes by name

use std::sync::Arc;
use thiserror::Error;

use crate::command::{CommandRunner, RunnerError};

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("could not terminate {name}: {detail}")]
    Terminate { name: String, detail: String },
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

pub struct ProcessControl {
    runner: Arc<dyn CommandRunner>,
}

impl ProcessControl {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Kill every process matching `name`. The caller decides whether a
    /// failure matters; usually it just means nothing was running.
    pub fn terminate_by_name(&self, name: &str) -> Result<(), ProcessError> {
        let out = self.runner.run("killall", &[name])?;
        if !out.success {
            return Err(ProcessError::Terminate {
                name: name.to_string(),
                detail: out.stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRunner;

    #[test]
    fn test_terminate_invokes_killall() {
        let runner = Arc::new(FakeRunner::new());
        let control = ProcessControl::new(runner.clone() as Arc<dyn CommandRunner>);

        control.terminate_by_name("openvpn").unwrap();
        assert!(runner.calls().contains(&"killall openvpn".to_string()));
    }

    #[test]
    fn test_terminate_failure_is_reported() {
        let runner = Arc::new(FakeRunner::new());
        runner.fail_program("killall");
        let control = ProcessControl::new(runner.clone() as Arc<dyn CommandRunner>);

        let result = control.terminate_by_name("openvpn");
        assert!(matches!(result, Err(ProcessError::Terminate { .. })));
    }
}
