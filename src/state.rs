//! Persistent session state
//!
//! `start` and `stop` run as separate processes, so whatever `start`
//! captured has to survive on disk: the resolvers to restore, the tunnel
//! PID, and which server config was used. Alongside the JSON record sits a
//! plain PID file (a single decimal integer) for out-of-process cleanup
//! tools that do not speak JSON.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const STATE_FILE: &str = "state.json";
const PID_FILE: &str = "ovpnguard.pid";

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to access state file: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to parse state file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// PID of the spawned tunnel process, if the spawn succeeded
    pub tunnel_pid: Option<u32>,
    /// Server config the session connected with
    pub server_config: PathBuf,
    /// Resolvers captured before the tunnel DNS was written
    pub saved_dns: Vec<String>,
}

impl SessionState {
    pub fn state_file(dir: &Path) -> PathBuf {
        dir.join(STATE_FILE)
    }

    pub fn save(&self, dir: &Path) -> Result<(), StateError> {
        fs::create_dir_all(dir)?;
        let content = serde_json::to_string_pretty(self)?;
        fs::write(Self::state_file(dir), content)?;
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Option<Self>, StateError> {
        let path = Self::state_file(dir);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn delete(dir: &Path) -> Result<(), StateError> {
        let path = Self::state_file(dir);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn is_active(dir: &Path) -> bool {
        Self::state_file(dir).exists()
    }
}

/// Write the PID record for out-of-process liveness checks.
pub fn write_pid(dir: &Path, pid: u32) -> Result<(), StateError> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join(PID_FILE), format!("{pid}\n"))?;
    Ok(())
}

/// Read the PID record; a missing or malformed file reads as `None`.
pub fn read_pid(dir: &Path) -> Result<Option<u32>, StateError> {
    let path = dir.join(PID_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    Ok(content.trim().parse().ok())
}

pub fn clear_pid(dir: &Path) -> Result<(), StateError> {
    let path = dir.join(PID_FILE);
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_state() -> SessionState {
        SessionState {
            tunnel_pid: Some(4242),
            server_config: PathBuf::from("/etc/ovpnguard/servers/nl-75.ovpn"),
            saved_dns: vec!["192.168.1.1".to_string(), "10.0.0.53".to_string()],
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        sample_state().save(dir.path()).unwrap();

        let loaded = SessionState::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.tunnel_pid, Some(4242));
        assert_eq!(loaded.saved_dns, ["192.168.1.1", "10.0.0.53"]);
        assert_eq!(
            loaded.server_config,
            PathBuf::from("/etc/ovpnguard/servers/nl-75.ovpn")
        );
    }

    #[test]
    fn test_load_missing_state_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(SessionState::load(dir.path()).unwrap().is_none());
        assert!(!SessionState::is_active(dir.path()));
    }

    #[test]
    fn test_delete_removes_state() {
        let dir = TempDir::new().unwrap();
        sample_state().save(dir.path()).unwrap();
        assert!(SessionState::is_active(dir.path()));

        SessionState::delete(dir.path()).unwrap();
        assert!(!SessionState::is_active(dir.path()));
        // Deleting again is fine
        SessionState::delete(dir.path()).unwrap();
    }

    #[test]
    fn test_pid_record_round_trip() {
        let dir = TempDir::new().unwrap();
        assert!(read_pid(dir.path()).unwrap().is_none());

        write_pid(dir.path(), 31337).unwrap();
        assert_eq!(read_pid(dir.path()).unwrap(), Some(31337));

        clear_pid(dir.path()).unwrap();
        assert!(read_pid(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_malformed_pid_reads_as_none() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path()).unwrap();
        fs::write(dir.path().join(PID_FILE), "not a pid\n").unwrap();
        assert!(read_pid(dir.path()).unwrap().is_none());
    }
}
