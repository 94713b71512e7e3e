//! VPN session lifecycle
//!
//! `VpnSession` is the one component with multi-step sequencing: it composes
//! address rotation, resolver capture and overwrite, the tunnel launch, the
//! reachability check, and the kill switch into a start/stop lifecycle with
//! bounded retries and full rollback.
//!
//! Collaborators report their outcomes as `Result`s; the session decides
//! what escalates. Only two things do: a missing input file and a kill
//! switch that cannot be armed. Everything else is rolled back and retried
//! or logged and carried on, because a half-finished teardown must never
//! stop the rest of the teardown from running.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::{wait_until_ready, Clock, SystemClock};
use crate::command::{CommandRunner, RunnerError, SystemRunner, TunnelProcess};
use crate::config::Settings;
use crate::firewall::{FirewallError, KillSwitch};
use crate::fswrite::GuardedWriter;
use crate::net::dns;
use crate::net::identity::IdentityRotator;
use crate::net::probe::ConnectivityProbe;
use crate::process::ProcessControl;

/// Fixed number of connection attempts per `start` call
pub const START_ATTEMPTS: u32 = 3;

const TUNNEL_PROGRAM: &str = "openvpn";
const EXIT_POLL: Duration = Duration::from_millis(200);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("required file not found: {0}")]
    ConfigNotFound(PathBuf),
    #[error("kill switch could not be enabled: {0}")]
    Firewall(#[from] FirewallError),
}

#[derive(Error, Debug)]
enum AttemptError {
    #[error("tunnel process could not be launched: {0}")]
    Spawn(#[from] RunnerError),
    #[error("connectivity probe failed after tunnel launch")]
    Unreachable,
}

/// Candidate server configs discovered from a directory
///
/// The listing is cached once populated and re-queried only when empty.
pub struct ServerPool {
    dir: PathBuf,
    cached: Vec<PathBuf>,
}

impl ServerPool {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            cached: Vec::new(),
        }
    }

    /// Pick a server config uniformly at random.
    pub fn pick(&mut self) -> Option<PathBuf> {
        if self.cached.is_empty() {
            self.cached = Self::scan(&self.dir);
            debug!("server pool holds {} configs", self.cached.len());
        }
        if self.cached.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..self.cached.len());
        Some(self.cached[index].clone())
    }

    fn scan(dir: &Path) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut configs: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("ovpn"))
            .collect();
        configs.sort();
        configs
    }
}

pub struct VpnSession {
    settings: Settings,
    runner: Arc<dyn CommandRunner>,
    clock: Arc<dyn Clock>,
    writer: GuardedWriter,
    rotator: IdentityRotator,
    probe: ConnectivityProbe,
    kill_switch: KillSwitch,
    processes: ProcessControl,
    pool: ServerPool,

    active: bool,
    auth_file: Option<PathBuf>,
    config_file: Option<PathBuf>,
    saved_dns: Vec<String>,
    tunnel: Option<Box<dyn TunnelProcess>>,
}

impl VpnSession {
    pub fn new(settings: Settings) -> Self {
        Self::with_runtime(settings, Arc::new(SystemRunner), Arc::new(SystemClock))
    }

    /// Build a session over injected command and clock seams.
    pub fn with_runtime(
        settings: Settings,
        runner: Arc<dyn CommandRunner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let probe = ConnectivityProbe::new(
            runner.clone(),
            settings.probe.ping_target.clone(),
            settings.probe.lookup_host.clone(),
        );
        let rotator = IdentityRotator::new(
            runner.clone(),
            clock.clone(),
            ConnectivityProbe::new(
                runner.clone(),
                settings.probe.ping_target.clone(),
                settings.probe.lookup_host.clone(),
            ),
            settings.timing.rotate_attempts,
            Duration::from_secs(settings.timing.rotate_backoff_secs),
        );
        let writer = GuardedWriter::new(runner.clone());
        let kill_switch = KillSwitch::new(
            runner.clone(),
            settings.firewall.backup_path.clone(),
            settings.vpn.tunnel_interface.clone(),
        );
        let processes = ProcessControl::new(runner.clone());
        let pool = ServerPool::new(settings.vpn.server_dir.clone());

        Self {
            settings,
            runner,
            clock,
            writer,
            rotator,
            probe,
            kill_switch,
            processes,
            pool,
            active: false,
            auth_file: None,
            config_file: None,
            saved_dns: Vec::new(),
            tunnel: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn saved_dns(&self) -> &[String] {
        &self.saved_dns
    }

    pub fn tunnel_pid(&self) -> Option<u32> {
        self.tunnel.as_ref().map(|t| t.id())
    }

    pub fn auth_file(&self) -> Option<&Path> {
        self.auth_file.as_deref()
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    /// Seed the resolver list to restore, for stop runs in a fresh process.
    pub fn restore_saved_dns(&mut self, servers: Vec<String>) {
        self.saved_dns = servers;
    }

    /// Next server config from the pool.
    pub fn next_server(&mut self) -> Option<PathBuf> {
        self.pool.pick()
    }

    /// Bring the tunnel up.
    ///
    /// Returns `Ok(true)` with the tunnel running, the session active, and
    /// the kill switch armed; `Ok(false)` when every attempt failed and the
    /// system was rolled back to its disconnected state. Missing input
    /// files and a kill switch that cannot be armed are the only errors.
    pub fn start(&mut self, auth_file: &Path, config_file: &Path) -> Result<bool, SessionError> {
        if !auth_file.exists() {
            return Err(SessionError::ConfigNotFound(auth_file.to_path_buf()));
        }
        if !config_file.exists() {
            return Err(SessionError::ConfigNotFound(config_file.to_path_buf()));
        }
        self.auth_file = Some(auth_file.to_path_buf());
        self.config_file = Some(config_file.to_path_buf());

        // A crashed earlier run may have left the switch armed. Reset it
        // before touching anything else; failure just means there was
        // nothing to restore.
        if let Err(e) = self.kill_switch.disable() {
            debug!("no prior ruleset restored: {e}");
        }

        for attempt in 1..=START_ATTEMPTS {
            info!("connection attempt {attempt}/{START_ATTEMPTS}");
            match self.try_connect(auth_file, config_file) {
                Ok(()) => {
                    self.kill_switch.enable()?;
                    self.active = true;
                    info!("tunnel up and verified, kill switch armed");
                    return Ok(true);
                }
                Err(e) => {
                    warn!("attempt {attempt} failed: {e}");
                    self.stop();
                }
            }
        }

        warn!("all connection attempts failed");
        Ok(false)
    }

    /// One connection attempt: rotate, capture and overwrite resolvers,
    /// launch the tunnel, wait for reachability.
    fn try_connect(&mut self, auth_file: &Path, config_file: &Path) -> Result<(), AttemptError> {
        // Rotation is best-effort; a host that cannot rotate still connects.
        if let Err(e) = self.rotator.rotate() {
            warn!("hardware address rotation skipped: {e}");
        }

        // Capture must happen before the overwrite or there is nothing left
        // to restore on stop.
        match dns::read_nameservers(&self.settings.dns.resolv_conf) {
            Ok(servers) if !servers.is_empty() => self.saved_dns = servers,
            Ok(_) => warn!(
                "no resolvers found in {}",
                self.settings.dns.resolv_conf.display()
            ),
            Err(e) => warn!("could not capture resolver configuration: {e}"),
        }

        let tunnel_dns = dns::render_nameservers(&self.settings.dns.tunnel_servers);
        if let Err(e) = self
            .writer
            .write_guarded(&self.settings.dns.resolv_conf, &tunnel_dns)
        {
            warn!("resolver overwrite failed: {e}");
        }

        let config = config_file.to_string_lossy();
        let auth = auth_file.to_string_lossy();
        let tunnel = self.runner.spawn(
            TUNNEL_PROGRAM,
            &["--config", config.as_ref(), "--auth-user-pass", auth.as_ref()],
        )?;
        info!("tunnel process launched with pid {}", tunnel.id());
        self.tunnel = Some(tunnel);

        // The tunnel has no readiness signal; poll the probe until the
        // settle window runs out.
        let probe_timeout = Duration::from_secs(self.settings.probe.timeout_secs);
        let reachable = wait_until_ready(
            self.clock.as_ref(),
            || self.probe.probe(probe_timeout),
            Duration::from_secs(self.settings.timing.settle_secs),
            Duration::from_secs(self.settings.timing.settle_poll_secs),
        );

        if reachable {
            Ok(())
        } else {
            Err(AttemptError::Unreachable)
        }
    }

    /// Tear the session down.
    ///
    /// Every step is independently best-effort: the kill switch comes down
    /// first, then the tunnel process, the resolver restore, the stray
    /// process sweep, and the service restarts run no matter what failed
    /// before them.
    pub fn stop(&mut self) {
        info!("stopping vpn session");

        if let Err(e) = self.kill_switch.disable() {
            warn!("kill switch teardown failed: {e}");
        }

        if let Some(mut tunnel) = self.tunnel.take() {
            tunnel.terminate();
            let grace = Duration::from_secs(self.settings.timing.stop_grace_secs);
            let exited = wait_until_ready(
                self.clock.as_ref(),
                || tunnel.has_exited(),
                grace,
                EXIT_POLL,
            );
            if !exited {
                warn!("tunnel process ignored SIGTERM, killing");
                tunnel.kill();
            }
        }

        let servers = if self.saved_dns.is_empty() {
            vec![self.settings.dns.fallback_server.clone()]
        } else {
            self.saved_dns.clone()
        };
        let content = dns::render_nameservers(&servers);
        if let Err(e) = self
            .writer
            .write_guarded(&self.settings.dns.resolv_conf, &content)
        {
            warn!("resolver restore failed: {e}");
        }

        // Sweep anything the handle teardown missed
        if let Err(e) = self.processes.terminate_by_name(TUNNEL_PROGRAM) {
            debug!("stray process sweep: {e}");
        }

        self.restart_service("NetworkManager");
        self.clock
            .sleep(Duration::from_secs(self.settings.timing.service_gap_secs));
        self.restart_service("dnscrypt-proxy");

        self.active = false;
        self.saved_dns.clear();
        info!("vpn session stopped");
    }

    fn restart_service(&self, unit: &str) {
        match self.runner.run("systemctl", &["restart", unit]) {
            Ok(out) if out.success => {}
            Ok(out) => warn!("restart of {unit} failed: {}", out.stderr.trim()),
            Err(e) => warn!("restart of {unit} failed: {e}"),
        }
    }
}
