//! # Presence Discovery
//!
//! Discovery of running runtime instances that announce themselves over UDP
//! multicast.
//!
//! Instances periodically broadcast a small key/value announcement carrying a
//! stable session identity. This crate listens for those announcements, keeps
//! a registry of the instances currently visible, and tells subscribers when an
//! instance appears, changes its attributes, or goes silent for longer than
//! the lease window.
//!
//! ## Features
//!
//! - JDP-compatible wire format (group `224.0.23.178`, port `7095`)
//! - Lease-based expiry with a configurable sweep period
//! - FOUND / CHANGED / LOST events through callbacks or channels
//! - Malformed datagrams and failing subscribers never stop discovery
//! - Async-first design using Tokio
//! - Optional `metrics` feature for counters and gauges
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use presence_discovery::{DiscoveryConfig, DiscoveryEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = DiscoveryEngine::start(DiscoveryConfig::default()).await?;
//!
//!     let (_subscription, events) = engine.subscribe_channel();
//!     while let Ok(event) = events.recv_async().await {
//!         println!("{} {}", event.kind(), event.discoverable());
//!     }
//!
//!     engine.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Callbacks
//!
//! Any `Fn(&DiscoveryEvent) -> Result<(), SubscriberError>` is a subscriber.
//! Callbacks run on a dedicated dispatch thread, one event at a time:
//!
//! ```rust,no_run
//! use presence_discovery::{DiscoveryConfig, DiscoveryEngine, DiscoveryEvent, SubscriberError};
//! use std::time::Duration;
//!
//! # async fn run() -> presence_discovery::Result<()> {
//! let config = DiscoveryConfig::new()
//!     .with_lease_window(Duration::from_secs(10))
//!     .with_reaper_period(Duration::from_secs(2));
//! let engine = DiscoveryEngine::start(config).await?;
//!
//! let (_subscription, already_visible) =
//!     engine.subscribe_with_snapshot(|event: &DiscoveryEvent| -> Result<(), SubscriberError> {
//!         if let Some(url) = event.discoverable().connector_address() {
//!             println!("{}: {}", event.kind(), url);
//!         }
//!         Ok(())
//!     });
//! println!("{} instances already visible", already_visible.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod codec;
pub mod config;
pub mod discoverable;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod reaper;
pub mod registry;
pub mod safety;
pub mod types;

// Re-export main types for convenience
pub use codec::Codec;
pub use config::DiscoveryConfig;
pub use discoverable::{Discoverable, DiscoveryEvent, DiscoveryKind};
pub use dispatcher::{DeliveryReport, Dispatcher, Subscriber, Subscription};
pub use engine::{DiscoveryEngine, EngineHandle};
pub use error::{DecodeError, DiscoveryError, Result, SubscriberError};
pub use metrics::EngineStatsSnapshot;
pub use registry::Registry;
pub use types::{keys, AttributeRecord, Attributes, Identity};
