//! External command execution
//!
//! All interaction with the operating system funnels through the
//! [`CommandRunner`] trait: run-to-completion invocations of the wrapped
//! tools (`ip`, `iptables`, `dhclient`, ...) and the fire-and-forget launch
//! of the tunnel process. Exit codes are collapsed to a boolean; the only
//! outputs ever inspected are the interface listing and the attribute
//! listing, which the callers hand to their parsers.

use std::io;
use std::process::{Child, Command, Stdio};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Outcome of a completed external command
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Seam between the orchestration code and the operating system
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion, capturing its output.
    fn run(&self, program: &str, args: &[&str]) -> Result<CmdOutput, RunnerError>;

    /// Launch a long-lived tunnel process without waiting for it.
    fn spawn(&self, program: &str, args: &[&str]) -> Result<Box<dyn TunnelProcess>, RunnerError>;
}

/// Handle to a spawned tunnel process
///
/// Ownership is exclusive: whoever holds the box is responsible for tearing
/// the process down.
pub trait TunnelProcess: Send {
    fn id(&self) -> u32;

    /// Non-blocking liveness check.
    fn has_exited(&mut self) -> bool;

    /// Ask the process to shut down (SIGTERM on Unix).
    fn terminate(&mut self);

    /// Force-kill the process.
    fn kill(&mut self);
}

/// Real runner backed by `std::process::Command`
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CmdOutput, RunnerError> {
        debug!("running {} {}", program, args.join(" "));
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| RunnerError::Launch {
                program: program.to_string(),
                source: e,
            })?;

        Ok(CmdOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn spawn(&self, program: &str, args: &[&str]) -> Result<Box<dyn TunnelProcess>, RunnerError> {
        debug!("spawning {} {}", program, args.join(" "));
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| RunnerError::Launch {
                program: program.to_string(),
                source: e,
            })?;

        Ok(Box::new(ChildProcess { child }))
    }
}

/// Tunnel handle over a real OS child process
struct ChildProcess {
    child: Child,
}

impl TunnelProcess for ChildProcess {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    fn terminate(&mut self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(self.child.id() as i32);
            if let Err(e) = kill(pid, Signal::SIGTERM) {
                debug!("SIGTERM to {} failed: {}", self.child.id(), e);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.kill();
        }
    }

    fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Check whether a process with the given PID is still alive.
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    false
}
