//! Public-internet reachability probe
//!
//! An ICMP echo against a well-known address plus a DNS lookup of a
//! well-known hostname. Both must succeed; retries are the caller's job.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::command::CommandRunner;

pub struct ConnectivityProbe {
    runner: Arc<dyn CommandRunner>,
    ping_target: String,
    lookup_host: String,
}

impl ConnectivityProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, ping_target: String, lookup_host: String) -> Self {
        Self {
            runner,
            ping_target,
            lookup_host,
        }
    }

    /// True only if both the echo and the lookup succeed within `timeout`.
    pub fn probe(&self, timeout: Duration) -> bool {
        let wait = timeout.as_secs().max(1).to_string();

        let ping = self
            .runner
            .run("ping", &["-c", "2", "-W", &wait, &self.ping_target]);
        let lookup = self.runner.run("nslookup", &[&self.lookup_host]);

        match (ping, lookup) {
            (Ok(ping), Ok(lookup)) => {
                debug!(
                    "probe: icmp={} dns={}",
                    ping.success, lookup.success
                );
                ping.success && lookup.success
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRunner;

    fn probe_with(runner: &Arc<FakeRunner>) -> ConnectivityProbe {
        ConnectivityProbe::new(
            runner.clone() as Arc<dyn CommandRunner>,
            "1.1.1.1".to_string(),
            "google.com".to_string(),
        )
    }

    #[test]
    fn test_probe_true_when_both_succeed() {
        let runner = Arc::new(FakeRunner::new());
        assert!(probe_with(&runner).probe(Duration::from_secs(10)));
    }

    #[test]
    fn test_probe_false_when_ping_fails() {
        let runner = Arc::new(FakeRunner::new());
        runner.fail_program("ping");
        assert!(!probe_with(&runner).probe(Duration::from_secs(10)));
    }

    #[test]
    fn test_probe_false_when_lookup_fails() {
        let runner = Arc::new(FakeRunner::new());
        runner.fail_program("nslookup");
        assert!(!probe_with(&runner).probe(Duration::from_secs(10)));
    }

    #[test]
    fn test_probe_passes_timeout_to_ping() {
        let runner = Arc::new(FakeRunner::new());
        probe_with(&runner).probe(Duration::from_secs(15));
        let calls = runner.calls();
        assert!(calls.iter().any(|c| c == "ping -c 2 -W 15 1.1.1.1"));
        assert!(calls.iter().any(|c| c == "nslookup google.com"));
    }
}
