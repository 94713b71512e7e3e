//! Hardware address rotation
//!
//! Generates pseudo-random MAC addresses from a fixed pool of vendor
//! prefixes and walks every eligible physical interface through a
//! down / re-address / up cycle until the network is reachable again.
//!
//! The generation scheme is deliberately not cryptographic: a small table of
//! hypervisor and NIC vendor OUIs keeps the address looking like ordinary
//! hardware instead of maximizing entropy.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::{wait_until_ready, Clock};
use crate::command::{CommandRunner, RunnerError};
use crate::net::probe::ConnectivityProbe;
use crate::parse::{LinkTableParser, TextOutputParser};

/// Vendor prefixes the generator draws from
pub const VENDOR_OUIS: [[u8; 3]; 7] = [
    [0x00, 0x0C, 0x29], // VMware
    [0x08, 0x00, 0x27], // VirtualBox
    [0x00, 0x1C, 0x42], // Parallels
    [0x00, 0x15, 0x5D], // Hyper-V
    [0x00, 0x16, 0x3E], // Xen
    [0x00, 0x23, 0xAE], // Dell
    [0xA4, 0x4C, 0xC8], // Intel
];

/// Name fragments identifying virtual or loopback interfaces
pub const INTERFACE_DENYLIST: [&str; 4] = ["lo", "docker", "virbr", "veth"];

const LINK_SETTLE: Duration = Duration::from_secs(3);
const SERVICE_WAIT: Duration = Duration::from_secs(5);
const LEASE_WAIT: Duration = Duration::from_secs(5);
const REACHABILITY_WINDOW: Duration = Duration::from_secs(15);
const REACHABILITY_POLL: Duration = Duration::from_secs(3);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Random address: a vendor prefix from the fixed pool plus three
    /// random NIC octets.
    pub fn from_vendor_pool<R: Rng>(rng: &mut R) -> Self {
        let oui = VENDOR_OUIS[rng.gen_range(0..VENDOR_OUIS.len())];
        Self([
            oui[0],
            oui[1],
            oui[2],
            rng.gen(),
            rng.gen(),
            rng.gen(),
        ])
    }

    pub fn oui(&self) -> [u8; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("no eligible network interfaces found")]
    NoInterfaces,
    #[error("address rotation exhausted all attempts")]
    Exhausted,
    #[error("failed to list interfaces: {0}")]
    Enumerate(String),
    #[error("{step} on {interface} failed: {detail}")]
    LinkOperation {
        step: &'static str,
        interface: String,
        detail: String,
    },
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

pub struct IdentityRotator {
    runner: Arc<dyn CommandRunner>,
    clock: Arc<dyn Clock>,
    probe: ConnectivityProbe,
    max_attempts: u32,
    backoff: Duration,
}

impl IdentityRotator {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        clock: Arc<dyn Clock>,
        probe: ConnectivityProbe,
        max_attempts: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            runner,
            clock,
            probe,
            max_attempts,
            backoff,
        }
    }

    /// Physical candidates for rotation: ethernet links that are up and not
    /// on the virtual-interface denylist.
    pub fn physical_interfaces(&self) -> Result<Vec<String>, IdentityError> {
        let out = self.runner.run("ip", &["-o", "link", "show"])?;
        if !out.success {
            return Err(IdentityError::Enumerate(out.stderr.trim().to_string()));
        }

        Ok(LinkTableParser
            .parse(&out.stdout)
            .into_iter()
            .filter(|entry| entry.is_ether && entry.is_up)
            .filter(|entry| {
                !INTERFACE_DENYLIST
                    .iter()
                    .any(|fragment| entry.name.contains(fragment))
            })
            .map(|entry| entry.name)
            .collect())
    }

    /// Rotate the hardware address, returning on the first interface that
    /// comes back reachable with its new address.
    pub fn rotate(&self) -> Result<MacAddress, IdentityError> {
        let interfaces = self.physical_interfaces()?;
        if interfaces.is_empty() {
            return Err(IdentityError::NoInterfaces);
        }

        let mut rng = rand::thread_rng();

        for interface in &interfaces {
            info!("rotating hardware address on {interface}");

            for attempt in 1..=self.max_attempts {
                let mac = MacAddress::from_vendor_pool(&mut rng);
                debug!("attempt {attempt}/{}: {mac}", self.max_attempts);

                match self.apply_address(interface, &mac) {
                    Ok(()) => {
                        self.clock.sleep(LINK_SETTLE);
                        self.restart_network_service();
                        self.renew_lease(interface);

                        let reachable = wait_until_ready(
                            self.clock.as_ref(),
                            || self.probe.probe(PROBE_TIMEOUT),
                            REACHABILITY_WINDOW,
                            REACHABILITY_POLL,
                        );
                        if reachable {
                            info!("network reachable with address {mac} on {interface}");
                            return Ok(mac);
                        }
                    }
                    Err(e) => warn!("address change failed: {e}"),
                }

                // Linear backoff between attempts
                self.clock.sleep(self.backoff * attempt);
            }
        }

        Err(IdentityError::Exhausted)
    }

    fn apply_address(&self, interface: &str, mac: &MacAddress) -> Result<(), IdentityError> {
        self.link_set(interface, "link-down", &["down"])?;
        let mac_str = mac.to_string();
        self.link_set(interface, "set-address", &["address", &mac_str])?;
        self.link_set(interface, "link-up", &["up"])?;
        Ok(())
    }

    fn link_set(
        &self,
        interface: &str,
        step: &'static str,
        tail: &[&str],
    ) -> Result<(), IdentityError> {
        let mut args = vec!["link", "set", "dev", interface];
        args.extend_from_slice(tail);
        let out = self.runner.run("ip", &args)?;
        if !out.success {
            return Err(IdentityError::LinkOperation {
                step,
                interface: interface.to_string(),
                detail: out.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    fn restart_network_service(&self) {
        self.run_best_effort("systemctl", &["restart", "NetworkManager"], "service restart");
        self.clock.sleep(SERVICE_WAIT);
    }

    fn renew_lease(&self, interface: &str) {
        self.run_best_effort("dhclient", &["-r", interface], "lease release");
        self.run_best_effort("dhclient", &[interface], "lease renewal");
        self.clock.sleep(LEASE_WAIT);
    }

    fn run_best_effort(&self, program: &str, args: &[&str], what: &str) {
        match self.runner.run(program, args) {
            Ok(out) if out.success => {}
            Ok(out) => warn!("{what} failed: {}", out.stderr.trim()),
            Err(e) => warn!("{what} failed: {e}"),
        }
    }
}
