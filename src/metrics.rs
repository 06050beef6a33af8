//! Metrics recording for discovery activity
//!
//! With the `metrics` feature enabled these helpers emit through the
//! [`metrics`](https://docs.rs/metrics) facade; the host application installs
//! whatever recorder/exporter it uses. Without the feature they compile to
//! nothing. [`EngineStats`] counters are kept either way.

use crate::discoverable::DiscoveryKind;
use std::sync::atomic::{AtomicU64, Ordering};

/// Record a received datagram
pub fn record_datagram(len: usize) {
    #[cfg(feature = "metrics")]
    {
        metrics::counter!("presence_discovery_datagrams_total").increment(1);
        metrics::histogram!("presence_discovery_datagram_bytes").record(len as f64);
    }
    #[cfg(not(feature = "metrics"))]
    let _ = len;
}

/// Record a rejected datagram
pub fn record_decode_failure() {
    #[cfg(feature = "metrics")]
    metrics::counter!("presence_discovery_decode_failures_total").increment(1);
}

/// Record a socket receive error
pub fn record_receive_error() {
    #[cfg(feature = "metrics")]
    metrics::counter!("presence_discovery_receive_errors_total").increment(1);
}

/// Record a published lifecycle event
pub fn record_event(kind: DiscoveryKind) {
    #[cfg(feature = "metrics")]
    {
        let kind = match kind {
            DiscoveryKind::Found => "found",
            DiscoveryKind::Lost => "lost",
            DiscoveryKind::Changed => "changed",
        };
        metrics::counter!("presence_discovery_events_total", "kind" => kind).increment(1);
    }
    #[cfg(not(feature = "metrics"))]
    let _ = kind;
}

/// Record a failed subscriber callback
pub fn record_subscriber_failure() {
    #[cfg(feature = "metrics")]
    metrics::counter!("presence_discovery_subscriber_failures_total").increment(1);
}

/// Record the current registry size
pub fn record_registry_size(entries: usize) {
    #[cfg(feature = "metrics")]
    metrics::gauge!("presence_discovery_registry_entries").set(entries as f64);
    #[cfg(not(feature = "metrics"))]
    let _ = entries;
}

/// Always-on counters for one running engine
#[derive(Debug, Default)]
pub struct EngineStats {
    datagrams_received: AtomicU64,
    decode_failures: AtomicU64,
    receive_errors: AtomicU64,
    events_published: AtomicU64,
    subscriber_failures: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStatsSnapshot {
    /// Datagrams read from the socket
    pub datagrams_received: u64,
    /// Datagrams rejected by the codec
    pub decode_failures: u64,
    /// Socket receive errors
    pub receive_errors: u64,
    /// Events delivered to the dispatcher
    pub events_published: u64,
    /// Subscriber callbacks that failed or panicked
    pub subscriber_failures: u64,
}

impl EngineStats {
    pub(crate) fn datagram(&self, len: usize) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        record_datagram(len);
    }

    pub(crate) fn decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
        record_decode_failure();
    }

    pub(crate) fn receive_error(&self) {
        self.receive_errors.fetch_add(1, Ordering::Relaxed);
        record_receive_error();
    }

    pub(crate) fn published(&self, kind: DiscoveryKind, failed: usize) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        record_event(kind);
        if failed > 0 {
            self.subscriber_failures
                .fetch_add(failed as u64, Ordering::Relaxed);
        }
    }

    /// Take a snapshot of the counters
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            subscriber_failures: self.subscriber_failures.load(Ordering::Relaxed),
        }
    }
}
