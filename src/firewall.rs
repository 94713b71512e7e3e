//! Packet-filter kill switch
//!
//! `enable` snapshots the running ruleset to a backup file, then rebuilds the
//! OUTPUT chain as allow-loopback / allow-established / allow-tunnel with a
//! default DROP policy. `disable` restores the snapshot verbatim.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::command::{CommandRunner, RunnerError};

#[derive(Error, Debug)]
pub enum FirewallError {
    #[error("failed to snapshot ruleset: {0}")]
    Snapshot(String),
    #[error("failed to persist ruleset snapshot to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("rule installation failed at {step}: {detail}")]
    Install { step: &'static str, detail: String },
    #[error("failed to restore ruleset from {path}: {detail}")]
    Restore { path: PathBuf, detail: String },
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

pub struct KillSwitch {
    runner: Arc<dyn CommandRunner>,
    backup_path: PathBuf,
    tunnel_interface: String,
}

impl KillSwitch {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        backup_path: PathBuf,
        tunnel_interface: String,
    ) -> Self {
        Self {
            runner,
            backup_path,
            tunnel_interface,
        }
    }

    /// Snapshot the current ruleset, then lock outbound traffic down to
    /// loopback, established flows, and the tunnel interface.
    pub fn enable(&self) -> Result<(), FirewallError> {
        let snapshot = self.runner.run("iptables-save", &[])?;
        if !snapshot.success {
            return Err(FirewallError::Snapshot(snapshot.stderr.trim().to_string()));
        }

        if let Some(parent) = self.backup_path.parent() {
            fs::create_dir_all(parent).map_err(|e| FirewallError::Persist {
                path: self.backup_path.clone(),
                source: e,
            })?;
        }
        fs::write(&self.backup_path, &snapshot.stdout).map_err(|e| FirewallError::Persist {
            path: self.backup_path.clone(),
            source: e,
        })?;
        debug!("ruleset snapshot written to {}", self.backup_path.display());

        self.install("flush", &["--flush"])?;
        self.install("delete-chain", &["--delete-chain"])?;
        self.install("allow-loopback", &["-A", "OUTPUT", "-o", "lo", "-j", "ACCEPT"])?;
        self.install(
            "allow-established",
            &[
                "-A",
                "OUTPUT",
                "-m",
                "conntrack",
                "--ctstate",
                "ESTABLISHED,RELATED",
                "-j",
                "ACCEPT",
            ],
        )?;
        self.install(
            "allow-tunnel",
            &["-A", "OUTPUT", "-o", &self.tunnel_interface, "-j", "ACCEPT"],
        )?;
        // The DROP policy must go in last: flipping it earlier would cut off
        // traffic the preceding inserts still rely on.
        self.install("drop-policy", &["-P", "OUTPUT", "DROP"])?;

        info!("kill switch enabled");
        Ok(())
    }

    /// Restore the snapshot taken by `enable`.
    pub fn disable(&self) -> Result<(), FirewallError> {
        let path = self.backup_path.to_string_lossy();
        let out = self.runner.run("iptables-restore", &[path.as_ref()])?;
        if !out.success {
            return Err(FirewallError::Restore {
                path: self.backup_path.clone(),
                detail: out.stderr.trim().to_string(),
            });
        }
        info!("kill switch disabled");
        Ok(())
    }

    fn install(&self, step: &'static str, args: &[&str]) -> Result<(), FirewallError> {
        let out = self.runner.run("iptables", args)?;
        if !out.success {
            return Err(FirewallError::Install {
                step,
                detail: out.stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}
