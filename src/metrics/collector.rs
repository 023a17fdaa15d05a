//! Metrics Collector

use prometheus::{IntCounter, IntGauge, Registry, TextEncoder};
use tracing::error;

use crate::Result;

/// Process-lifetime relay counters, registered in a private Prometheus registry
pub struct RelayMetrics {
    registry: Registry,

    /// Every datagram read from the client-facing socket
    pub packets_received: IntCounter,
    /// Client data packets handed to a backend socket
    pub packets_forwarded: IntCounter,
    /// Rejected control packets and failed sends
    pub packets_dropped: IntCounter,
    /// Payload bytes sent to game servers
    pub bytes_forwarded: IntCounter,
    pub keepalives: IntCounter,
    pub control_accepted: IntCounter,
    pub control_rejected: IntCounter,
    /// Game server replies sent back to clients
    pub replies_relayed: IntCounter,
    pub send_errors: IntCounter,
    pub sessions_expired: IntCounter,
    pub active_sessions: IntGauge,
}

impl RelayMetrics {
    /// Create the collector and register every metric
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let packets_received = IntCounter::new(
            "plg_packets_received_total",
            "Total packets received from clients",
        )?;
        let packets_forwarded = IntCounter::new(
            "plg_packets_forwarded_total",
            "Total data packets forwarded to game servers",
        )?;
        let packets_dropped = IntCounter::new(
            "plg_packets_dropped_total",
            "Total packets dropped after session lookup",
        )?;
        let bytes_forwarded = IntCounter::new(
            "plg_bytes_forwarded_total",
            "Total payload bytes forwarded to game servers",
        )?;
        let keepalives = IntCounter::new(
            "plg_keepalives_total",
            "Total keepalive packets received",
        )?;
        let control_accepted = IntCounter::new(
            "plg_control_accepted_total",
            "Control packets that changed the forward target",
        )?;
        let control_rejected = IntCounter::new(
            "plg_control_rejected_total",
            "Control packets rejected as unparsable or not allowed",
        )?;
        let replies_relayed = IntCounter::new(
            "plg_replies_relayed_total",
            "Game server replies relayed back to clients",
        )?;
        let send_errors = IntCounter::new(
            "plg_send_errors_total",
            "Failed UDP sends toward game servers or clients",
        )?;
        let sessions_expired = IntCounter::new(
            "plg_sessions_expired_total",
            "Sessions evicted by the idle reaper",
        )?;
        let active_sessions = IntGauge::new(
            "plg_active_sessions",
            "Number of active relay sessions",
        )?;

        registry.register(Box::new(packets_received.clone()))?;
        registry.register(Box::new(packets_forwarded.clone()))?;
        registry.register(Box::new(packets_dropped.clone()))?;
        registry.register(Box::new(bytes_forwarded.clone()))?;
        registry.register(Box::new(keepalives.clone()))?;
        registry.register(Box::new(control_accepted.clone()))?;
        registry.register(Box::new(control_rejected.clone()))?;
        registry.register(Box::new(replies_relayed.clone()))?;
        registry.register(Box::new(send_errors.clone()))?;
        registry.register(Box::new(sessions_expired.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;

        Ok(Self {
            registry,
            packets_received,
            packets_forwarded,
            packets_dropped,
            bytes_forwarded,
            keepalives,
            control_accepted,
            control_rejected,
            replies_relayed,
            send_errors,
            sessions_expired,
            active_sessions,
        })
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Failed to encode Prometheus metrics");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_required_metrics() {
        let metrics = RelayMetrics::new().unwrap();
        metrics.packets_received.inc();
        metrics.packets_received.inc();
        metrics.active_sessions.set(5);

        let output = metrics.export_prometheus();
        assert!(output.contains("plg_packets_received_total 2"));
        assert!(output.contains("plg_packets_forwarded_total 0"));
        assert!(output.contains("plg_active_sessions 5"));
    }

    #[test]
    fn test_collectors_are_independent() {
        let a = RelayMetrics::new().unwrap();
        let b = RelayMetrics::new().unwrap();
        a.packets_forwarded.inc();

        assert_eq!(a.packets_forwarded.get(), 1);
        assert_eq!(b.packets_forwarded.get(), 0);
    }
}
