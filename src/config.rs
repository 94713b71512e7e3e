//! Configuration handling
//!
//! Every well-known constant the lifecycle depends on lives here: file
//! locations, the tunnel DNS pair, probe targets, and timings. The settings
//! value is passed explicitly into the orchestrator instead of being read
//! from ambient process state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub vpn: VpnSettings,
    #[serde(default)]
    pub dns: DnsSettings,
    #[serde(default)]
    pub firewall: FirewallSettings,
    #[serde(default)]
    pub probe: ProbeSettings,
    #[serde(default)]
    pub timing: TimingSettings,
    #[serde(default)]
    pub runtime: RuntimeSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpnSettings {
    /// Directory holding candidate `.ovpn` server configs
    pub server_dir: PathBuf,
    /// Two-line `auth-user-pass` credentials file
    pub auth_file: PathBuf,
    /// Interface the tunnel process creates
    pub tunnel_interface: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsSettings {
    pub resolv_conf: PathBuf,
    /// Resolvers written while the tunnel is up
    pub tunnel_servers: Vec<String>,
    /// Used on restore when no system resolvers were captured
    pub fallback_server: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallSettings {
    pub backup_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSettings {
    pub ping_target: String,
    pub lookup_host: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    /// Window given to the tunnel process to come up after launch
    pub settle_secs: u64,
    /// Probe interval inside the settle window
    pub settle_poll_secs: u64,
    /// Grace period between SIGTERM and SIGKILL on shutdown
    pub stop_grace_secs: u64,
    /// Pause between the two service restarts during shutdown
    pub service_gap_secs: u64,
    pub rotate_attempts: u32,
    pub rotate_backoff_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Directory for the session state file and PID record
    pub state_dir: PathBuf,
}

impl Default for VpnSettings {
    fn default() -> Self {
        Self {
            server_dir: PathBuf::from("/etc/ovpnguard/servers"),
            auth_file: PathBuf::from("/etc/ovpnguard/auth.txt"),
            tunnel_interface: "tun0".to_string(),
        }
    }
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self {
            resolv_conf: PathBuf::from("/etc/resolv.conf"),
            tunnel_servers: vec!["1.1.1.1".to_string(), "8.8.4.4".to_string()],
            fallback_server: "1.1.1.1".to_string(),
        }
    }
}

impl Default for FirewallSettings {
    fn default() -> Self {
        Self {
            backup_path: PathBuf::from("/etc/iptables/iptables_backup"),
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            ping_target: "1.1.1.1".to_string(),
            lookup_host: "google.com".to_string(),
            timeout_secs: 10,
        }
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            settle_secs: 10,
            settle_poll_secs: 2,
            stop_grace_secs: 5,
            service_gap_secs: 4,
            rotate_attempts: 5,
            rotate_backoff_secs: 10,
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/run/ovpnguard"),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vpn: VpnSettings::default(),
            dns: DnsSettings::default(),
            firewall: FirewallSettings::default(),
            probe: ProbeSettings::default(),
            timing: TimingSettings::default(),
            runtime: RuntimeSettings::default(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Resolve the settings to use: an explicit path, then the working
    /// directory, then the user config directory, then built-in defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let local = PathBuf::from("ovpnguard.toml");
        if local.exists() {
            return Self::load(&local);
        }

        if let Some(base) = dirs::config_dir() {
            let user = base.join("ovpnguard").join("config.toml");
            if user.exists() {
                return Self::load(&user);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_carry_the_well_known_constants() {
        let settings = Settings::default();
        assert_eq!(settings.dns.tunnel_servers, ["1.1.1.1", "8.8.4.4"]);
        assert_eq!(settings.dns.fallback_server, "1.1.1.1");
        assert_eq!(settings.vpn.tunnel_interface, "tun0");
        assert_eq!(settings.probe.ping_target, "1.1.1.1");
        assert_eq!(settings.probe.lookup_host, "google.com");
        assert_eq!(settings.timing.settle_secs, 10);
        assert_eq!(settings.timing.rotate_attempts, 5);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut settings = Settings::default();
        settings.vpn.tunnel_interface = "tun7".to_string();
        settings.dns.tunnel_servers = vec!["9.9.9.9".to_string()];
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.vpn.tunnel_interface, "tun7");
        assert_eq!(loaded.dns.tunnel_servers, ["9.9.9.9"]);
        assert_eq!(loaded.timing.settle_secs, 10);
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[vpn]\nserver_dir = \"/srv/ovpn\"\nauth_file = \"/srv/auth.txt\"\ntunnel_interface = \"tun1\"\n").unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.vpn.server_dir, PathBuf::from("/srv/ovpn"));
        assert_eq!(loaded.dns.tunnel_servers, ["1.1.1.1", "8.8.4.4"]);
    }

    #[test]
    fn test_load_rejects_malformed_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not really toml [[[").unwrap();

        let result = Settings::load(&path);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
