use async_trait::async_trait;
use rand::random;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::NetworkHealthGate;
use crate::error::EngineError;

/// Probes the host's default gateway with a single ICMP echo.
///
/// When no gateway can be determined or ICMP sockets cannot be opened, the
/// gate reports healthy: failing closed would silently stop all alerting.
pub struct GatewayHealthGate {
    gateway_override: Option<IpAddr>,
    probe_timeout: Duration,
    healthy: AtomicBool,
}

impl GatewayHealthGate {
    pub fn new(gateway_override: Option<IpAddr>, probe_timeout: Duration) -> Self {
        Self {
            gateway_override,
            probe_timeout,
            healthy: AtomicBool::new(true),
        }
    }

    fn resolve_gateway(&self) -> Option<IpAddr> {
        if let Some(addr) = self.gateway_override {
            return Some(addr);
        }
        match netdev::get_default_interface() {
            Ok(interface) => interface
                .gateway
                .and_then(|gw| gw.ipv4.first().copied())
                .map(IpAddr::V4),
            Err(e) => {
                warn!(error = %e, "Failed to get default interface; cannot probe gateway.");
                None
            }
        }
    }

    async fn probe(&self, gateway: IpAddr) -> Option<bool> {
        let config = match gateway {
            IpAddr::V4(_) => surge_ping::Config::default(),
            IpAddr::V6(_) => surge_ping::Config::builder()
                .kind(surge_ping::ICMP::V6)
                .build(),
        };
        let client = match surge_ping::Client::new(&config) {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "Cannot open ICMP socket for gateway probe.");
                return None;
            }
        };
        let mut pinger = client
            .pinger(gateway, surge_ping::PingIdentifier(random()))
            .await;
        pinger.timeout(self.probe_timeout);
        match pinger.ping(surge_ping::PingSequence(0), &[0; 8]).await {
            Ok((_reply, rtt)) => {
                debug!(gateway = %gateway, rtt_ms = rtt.as_millis() as u64, "Gateway reachable.");
                Some(true)
            }
            Err(e) => {
                warn!(gateway = %gateway, error = %e, "Gateway probe failed.");
                Some(false)
            }
        }
    }
}

#[async_trait]
impl NetworkHealthGate for GatewayHealthGate {
    async fn check_network_health(&self) -> Result<(), EngineError> {
        let healthy = match self.resolve_gateway() {
            Some(gateway) => self.probe(gateway).await.unwrap_or(true),
            None => true,
        };
        let previous = self.healthy.swap(healthy, Ordering::SeqCst);
        if previous != healthy {
            info!(healthy, "Local network health changed.");
        }
        Ok(())
    }

    fn is_network_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// Gate with a fixed, externally set answer.
#[derive(Debug)]
pub struct StaticHealthGate {
    healthy: AtomicBool,
}

impl StaticHealthGate {
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy: AtomicBool::new(healthy),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl NetworkHealthGate for StaticHealthGate {
    async fn check_network_health(&self) -> Result<(), EngineError> {
        Ok(())
    }

    fn is_network_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_gate_reports_configured_state() {
        let gate = StaticHealthGate::new(false);
        gate.check_network_health().await.unwrap();
        assert!(!gate.is_network_healthy());
        gate.set_healthy(true);
        assert!(gate.is_network_healthy());
    }

    #[test]
    fn gateway_gate_starts_healthy() {
        let gate = GatewayHealthGate::new(None, Duration::from_secs(1));
        assert!(gate.is_network_healthy());
    }
}
