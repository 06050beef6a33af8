//! Registry of currently visible instances
//!
//! The registry is the only state shared between the listener and the reaper.
//! Every mutation happens under one write lock, so an `observe` and a `sweep`
//! touching the same identity are serialised: whichever commits last decides
//! the entry's fate, and an identity evicted by a sweep comes back as FOUND.

use crate::{
    discoverable::{Discoverable, DiscoveryEvent},
    safety::{FailureReporter, DEFAULT_REPORTS_PER_SECOND},
    types::{AttributeRecord, Identity},
};
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tracing::debug;

/// Default maximum number of tracked instances
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Entry in the registry with its lease timestamp
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// Last known state of the instance
    pub discoverable: Discoverable,
    /// When the instance was first observed in the current presence period
    pub first_seen_at: Instant,
    /// When the instance last announced itself
    pub last_seen_at: Instant,
}

impl RegistryEntry {
    fn new(discoverable: Discoverable, now: Instant) -> Self {
        Self {
            discoverable,
            first_seen_at: now,
            last_seen_at: now,
        }
    }

    /// Check if the lease has expired at `now`
    pub fn is_expired(&self, now: Instant, lease: Duration) -> bool {
        now.saturating_duration_since(self.last_seen_at) > lease
    }

    fn touch(&mut self, now: Instant) {
        // Never move backwards, even if callers pass a stale clock reading
        if now > self.last_seen_at {
            self.last_seen_at = now;
        }
    }
}

/// Registry statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of live entries
    pub entries: usize,
    /// Capacity bound
    pub max_entries: usize,
    /// Silence of the longest-quiet entry
    pub oldest_silence: Option<Duration>,
    /// New identities ignored because the registry was full
    pub rejected_at_capacity: u64,
}

/// Authoritative map of visible instances keyed by identity
#[derive(Debug)]
pub struct Registry {
    entries: RwLock<HashMap<Identity, RegistryEntry>>,
    max_entries: usize,
    capacity_reporter: FailureReporter,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create a new registry
    pub fn new() -> Self {
        Self::with_capacity_limit(DEFAULT_MAX_ENTRIES)
    }

    /// Create a new registry tracking at most `max_entries` instances
    pub fn with_capacity_limit(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries,
            capacity_reporter: FailureReporter::new("instance", DEFAULT_REPORTS_PER_SECOND),
        }
    }

    /// Record an announcement received now
    pub fn observe(&self, record: AttributeRecord) -> Option<DiscoveryEvent> {
        self.observe_at(record, Instant::now())
    }

    /// Record an announcement received at `now`.
    ///
    /// Returns FOUND for a new identity, CHANGED when the attribute mapping
    /// differs from the stored one, and nothing for an identical
    /// re-announcement. The lease is refreshed in every case.
    pub fn observe_at(&self, record: AttributeRecord, now: Instant) -> Option<DiscoveryEvent> {
        let discoverable = Discoverable::from(record);
        let mut entries = self.entries.write();

        if let Some(entry) = entries.get_mut(discoverable.identity()) {
            entry.touch(now);
            if entry.discoverable == discoverable {
                return None;
            }
            debug!("Instance changed: {}", discoverable);
            entry.discoverable = discoverable.clone();
            return Some(DiscoveryEvent::changed(discoverable));
        }

        if entries.len() >= self.max_entries {
            self.capacity_reporter.report(
                discoverable.identity(),
                &format_args!("registry at capacity ({})", self.max_entries),
            );
            return None;
        }

        debug!("Instance found: {}", discoverable);
        entries.insert(
            discoverable.identity().clone(),
            RegistryEntry::new(discoverable.clone(), now),
        );
        Some(DiscoveryEvent::found(discoverable))
    }

    /// Evict every entry silent for longer than `lease` at `now`.
    ///
    /// Each evicted identity yields exactly one LOST event carrying its last
    /// known state.
    pub fn sweep(&self, now: Instant, lease: Duration) -> Vec<DiscoveryEvent> {
        let mut entries = self.entries.write();
        let expired: Vec<Identity> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now, lease))
            .map(|(identity, _)| identity.clone())
            .collect();

        let events: Vec<DiscoveryEvent> = expired
            .iter()
            .filter_map(|identity| entries.remove(identity))
            .map(|entry| {
                debug!("Instance lost: {}", entry.discoverable);
                DiscoveryEvent::lost(entry.discoverable)
            })
            .collect();

        if !events.is_empty() {
            debug!("Swept {} expired instances", events.len());
        }
        events
    }

    /// Remove every entry, producing LOST events for all of them
    pub fn clear(&self) -> Vec<DiscoveryEvent> {
        let mut entries = self.entries.write();
        entries
            .drain()
            .map(|(_, entry)| DiscoveryEvent::lost(entry.discoverable))
            .collect()
    }

    /// Point-in-time copy of all live instances, ordered by identity
    pub fn snapshot(&self) -> Vec<Discoverable> {
        let entries = self.entries.read();
        let mut snapshot: Vec<Discoverable> = entries
            .values()
            .map(|entry| entry.discoverable.clone())
            .collect();
        snapshot.sort_by(|a, b| a.identity().cmp(b.identity()));
        snapshot
    }

    /// Get the current state of one instance
    pub fn get(&self, identity: &Identity) -> Option<Discoverable> {
        self.entries
            .read()
            .get(identity)
            .map(|entry| entry.discoverable.clone())
    }

    /// Get the registry entry (state plus timestamps) of one instance
    pub fn entry(&self, identity: &Identity) -> Option<RegistryEntry> {
        self.entries.read().get(identity).cloned()
    }

    /// Check if an instance is currently visible
    pub fn contains(&self, identity: &Identity) -> bool {
        self.entries.read().contains_key(identity)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Get registry statistics at `now`
    pub fn stats(&self, now: Instant) -> RegistryStats {
        let entries = self.entries.read();
        RegistryStats {
            entries: entries.len(),
            max_entries: self.max_entries,
            oldest_silence: entries
                .values()
                .map(|entry| now.saturating_duration_since(entry.last_seen_at))
                .max(),
            rejected_at_capacity: self.capacity_reporter.total(),
        }
    }
}
