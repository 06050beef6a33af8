//! Configuration for the discovery engine

use crate::{
    codec::{DEFAULT_MAX_PAYLOAD, HEADER_LEN},
    error::{DiscoveryError, Result},
    registry::DEFAULT_MAX_ENTRIES,
    safety::DEFAULT_REPORTS_PER_SECOND,
};
use serde::{Deserialize, Serialize};
use std::{net::Ipv4Addr, num::NonZeroU32, str::FromStr, time::Duration};

/// Default multicast group announcements are sent to
pub const DEFAULT_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 23, 178);
/// Default UDP port
pub const DEFAULT_PORT: u16 = 7095;
/// Default lease window: three missed 5s announcements
pub const DEFAULT_LEASE_WINDOW: Duration = Duration::from_secs(15);
/// Default time allowed for background activities to finish on stop
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// Largest payload a UDP/IPv4 datagram can carry
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Prefix of the environment variables read by [`DiscoveryConfig::from_env`]
pub const ENV_PREFIX: &str = "PRESENCE_DISCOVERY_";

/// Configuration for the presence discovery engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Multicast group to join
    group: Ipv4Addr,
    /// UDP port to listen on; 0 picks an ephemeral port
    port: u16,
    /// Local interface used for the multicast join
    interface: Ipv4Addr,
    /// Silence after which an instance is considered gone
    lease_window: Duration,
    /// How often expired entries are swept; defaults to half the lease
    reaper_period: Option<Duration>,
    /// Largest accepted datagram payload
    max_datagram_size: usize,
    /// Maximum number of tracked instances
    max_entries: usize,
    /// Decode failures logged per second
    decode_log_rate: NonZeroU32,
    /// Allow other processes on the host to share the port
    reuse_address: bool,
    /// Time allowed for background activities to finish on stop
    shutdown_grace: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP,
            port: DEFAULT_PORT,
            interface: Ipv4Addr::UNSPECIFIED,
            lease_window: DEFAULT_LEASE_WINDOW,
            reaper_period: None,
            max_datagram_size: DEFAULT_MAX_PAYLOAD,
            max_entries: DEFAULT_MAX_ENTRIES,
            decode_log_rate: DEFAULT_REPORTS_PER_SECOND,
            reuse_address: true,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl DiscoveryConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load defaults overlaid with `PRESENCE_DISCOVERY_*` environment variables.
    ///
    /// Recognised suffixes: `GROUP`, `PORT`, `INTERFACE`, `LEASE_MS`,
    /// `REAPER_PERIOD_MS`, `MAX_DATAGRAM_SIZE`, `MAX_ENTRIES`,
    /// `DECODE_LOG_RATE`, `REUSE_ADDRESS`, `SHUTDOWN_GRACE_MS`. The result is
    /// not validated.
    pub fn from_env() -> Result<Self> {
        Self::default().overlay(|suffix| std::env::var(format!("{ENV_PREFIX}{suffix}")).ok())
    }

    /// Apply overrides looked up by variable suffix
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GROUP") {
            self.group = parse("GROUP", &v)?;
        }
        if let Some(v) = lookup("PORT") {
            self.port = parse("PORT", &v)?;
        }
        if let Some(v) = lookup("INTERFACE") {
            self.interface = parse("INTERFACE", &v)?;
        }
        if let Some(v) = lookup("LEASE_MS") {
            self.lease_window = Duration::from_millis(parse("LEASE_MS", &v)?);
        }
        if let Some(v) = lookup("REAPER_PERIOD_MS") {
            self.reaper_period = Some(Duration::from_millis(parse("REAPER_PERIOD_MS", &v)?));
        }
        if let Some(v) = lookup("MAX_DATAGRAM_SIZE") {
            self.max_datagram_size = parse("MAX_DATAGRAM_SIZE", &v)?;
        }
        if let Some(v) = lookup("MAX_ENTRIES") {
            self.max_entries = parse("MAX_ENTRIES", &v)?;
        }
        if let Some(v) = lookup("DECODE_LOG_RATE") {
            self.decode_log_rate = parse("DECODE_LOG_RATE", &v)?;
        }
        if let Some(v) = lookup("REUSE_ADDRESS") {
            self.reuse_address = parse("REUSE_ADDRESS", &v)?;
        }
        if let Some(v) = lookup("SHUTDOWN_GRACE_MS") {
            self.shutdown_grace = Duration::from_millis(parse("SHUTDOWN_GRACE_MS", &v)?);
        }
        Ok(self)
    }

    /// Set the multicast group
    pub fn with_group(mut self, group: Ipv4Addr) -> Self {
        self.group = group;
        self
    }

    /// Get the multicast group
    pub fn group(&self) -> Ipv4Addr {
        self.group
    }

    /// Set the UDP port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Get the UDP port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Set the interface used for the multicast join
    pub fn with_interface(mut self, interface: Ipv4Addr) -> Self {
        self.interface = interface;
        self
    }

    /// Get the multicast interface
    pub fn interface(&self) -> Ipv4Addr {
        self.interface
    }

    /// Set the lease window
    pub fn with_lease_window(mut self, lease: Duration) -> Self {
        self.lease_window = lease;
        self
    }

    /// Get the lease window
    pub fn lease_window(&self) -> Duration {
        self.lease_window
    }

    /// Set the reaper period
    pub fn with_reaper_period(mut self, period: Duration) -> Self {
        self.reaper_period = Some(period);
        self
    }

    /// Get the effective reaper period
    pub fn reaper_period(&self) -> Duration {
        self.reaper_period.unwrap_or(self.lease_window / 2)
    }

    /// Set the largest accepted datagram payload
    pub fn with_max_datagram_size(mut self, size: usize) -> Self {
        self.max_datagram_size = size;
        self
    }

    /// Get the largest accepted datagram payload
    pub fn max_datagram_size(&self) -> usize {
        self.max_datagram_size
    }

    /// Set the maximum number of tracked instances
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    /// Get the maximum number of tracked instances
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Set how many decode failures are logged per second
    pub fn with_decode_log_rate(mut self, per_second: NonZeroU32) -> Self {
        self.decode_log_rate = per_second;
        self
    }

    /// Get the decode failure log rate
    pub fn decode_log_rate(&self) -> NonZeroU32 {
        self.decode_log_rate
    }

    /// Enable or disable port sharing
    pub fn with_reuse_address(mut self, reuse: bool) -> Self {
        self.reuse_address = reuse;
        self
    }

    /// Check if port sharing is enabled
    pub fn reuse_address(&self) -> bool {
        self.reuse_address
    }

    /// Set the shutdown grace period
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Get the shutdown grace period
    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.lease_window.is_zero() {
            return Err(DiscoveryError::configuration(
                "Lease window must be greater than 0",
            ));
        }

        let period = self.reaper_period();
        if period.is_zero() {
            return Err(DiscoveryError::configuration(
                "Reaper period must be greater than 0",
            ));
        }
        if period > self.lease_window {
            return Err(DiscoveryError::configuration(format!(
                "Reaper period {:?} must not exceed the lease window {:?}",
                period, self.lease_window
            )));
        }

        if !self.group.is_multicast() {
            return Err(DiscoveryError::configuration(format!(
                "{} is not a multicast address",
                self.group
            )));
        }

        if self.max_datagram_size < HEADER_LEN || self.max_datagram_size > MAX_UDP_PAYLOAD {
            return Err(DiscoveryError::configuration(format!(
                "Max datagram size must be between {} and {} bytes",
                HEADER_LEN, MAX_UDP_PAYLOAD
            )));
        }

        if self.max_entries == 0 {
            return Err(DiscoveryError::configuration(
                "Max entries must be greater than 0",
            ));
        }

        Ok(())
    }
}

fn parse<T>(suffix: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        DiscoveryError::configuration(format!("{ENV_PREFIX}{suffix}={value:?}: {e}"))
    })
}
