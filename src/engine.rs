//! Engine wiring the listener, reaper and dispatcher around one registry

use crate::{
    codec::Codec,
    config::DiscoveryConfig,
    discoverable::{Discoverable, DiscoveryEvent},
    dispatcher::{Dispatcher, Subscriber, Subscription},
    error::{DiscoveryError, Result},
    listener::{bind_socket, Listener},
    metrics::{record_registry_size, EngineStats, EngineStatsSnapshot},
    reaper::Reaper,
    registry::Registry,
};
use parking_lot::Mutex;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Entry point for starting discovery
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoveryEngine;

impl DiscoveryEngine {
    /// Validate `config`, bind the socket and start the background activities.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Configuration`] for an invalid configuration
    /// and [`DiscoveryError::Transport`] if the socket cannot be bound or the
    /// multicast group cannot be joined.
    pub async fn start(config: DiscoveryConfig) -> Result<EngineHandle> {
        config.validate()?;

        let socket = bind_socket(&config)?;
        let registry = Arc::new(Registry::with_capacity_limit(config.max_entries()));
        let dispatcher = Arc::new(Dispatcher::new());
        let stats = Arc::new(EngineStats::default());
        let cancel = CancellationToken::new();
        let (sink, events) = flume::unbounded();

        let listener = Listener::new(
            socket,
            Codec::new(config.max_datagram_size()),
            Arc::clone(&registry),
            sink.clone(),
            config.decode_log_rate(),
            Arc::clone(&stats),
        );
        let local_addr = listener.local_addr()?;
        let reaper = Reaper::new(
            Arc::clone(&registry),
            sink,
            config.lease_window(),
            config.reaper_period(),
        );

        let tasks = Tasks {
            listener: tokio::spawn(listener.run(cancel.clone())),
            reaper: tokio::spawn(reaper.run(cancel.clone())),
            dispatch: tokio::task::spawn_blocking({
                let dispatcher = Arc::clone(&dispatcher);
                let registry = Arc::clone(&registry);
                let stats = Arc::clone(&stats);
                move || dispatch_loop(events, &dispatcher, &registry, &stats)
            }),
        };

        info!(
            "Discovery started on {} for group {} (lease {:?})",
            local_addr,
            config.group(),
            config.lease_window()
        );

        Ok(EngineHandle {
            config,
            registry,
            dispatcher,
            stats,
            local_addr,
            cancel,
            tasks: Mutex::new(Some(tasks)),
        })
    }
}

struct Tasks {
    listener: JoinHandle<()>,
    reaper: JoinHandle<()>,
    dispatch: JoinHandle<()>,
}

/// Drain the event queue until every producer is gone
fn dispatch_loop(
    events: flume::Receiver<DiscoveryEvent>,
    dispatcher: &Dispatcher,
    registry: &Registry,
    stats: &EngineStats,
) {
    while let Ok(event) = events.recv() {
        let report = dispatcher.publish(&event);
        stats.published(event.kind(), report.failed);
        record_registry_size(registry.len());
    }
    debug!("Dispatch queue drained");
}

/// Handle to a running engine.
///
/// Dropping the handle without calling [`stop`](Self::stop) still cancels the
/// background activities and releases the socket, but does not wait for them.
pub struct EngineHandle {
    config: DiscoveryConfig,
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<EngineStats>,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    tasks: Mutex<Option<Tasks>>,
}

impl EngineHandle {
    /// Register a subscriber for lifecycle events
    pub fn subscribe<S: Subscriber + 'static>(&self, subscriber: S) -> Subscription {
        self.dispatcher.subscribe(subscriber)
    }

    /// Register a subscriber and return the instances visible right after.
    ///
    /// Nothing is missed between the two, but the two views can overlap.
    /// An instance found concurrently may show up both in the snapshot and as
    /// a FOUND event. Events already queued when the subscriber registered are
    /// still delivered to it, so a LOST can arrive for an identity the
    /// snapshot no longer contains.
    pub fn subscribe_with_snapshot<S: Subscriber + 'static>(
        &self,
        subscriber: S,
    ) -> (Subscription, Vec<Discoverable>) {
        let subscription = self.dispatcher.subscribe(subscriber);
        (subscription, self.registry.snapshot())
    }

    /// Receive lifecycle events through a channel
    pub fn subscribe_channel(&self) -> (Subscription, flume::Receiver<DiscoveryEvent>) {
        self.dispatcher.subscribe_channel()
    }

    /// Remove a subscriber
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.dispatcher.unsubscribe(subscription)
    }

    /// Currently visible instances
    pub fn snapshot(&self) -> Vec<Discoverable> {
        self.registry.snapshot()
    }

    /// Get the shared registry
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Get the configuration the engine was started with
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Activity counters
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Check if the engine has not been stopped
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop the engine and wait for its activities to finish.
    ///
    /// Events already queued are delivered before the dispatch activity
    /// exits. Calling `stop` again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Shutdown`] if an activity panicked or did not
    /// finish within the grace period. The engine is stopped either way.
    pub async fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        let tasks = self.tasks.lock().take();
        let Some(tasks) = tasks else {
            return Ok(());
        };

        let grace = self.config.shutdown_grace();
        let mut problems = Vec::new();
        join_within("listener", tasks.listener, grace, &mut problems).await;
        join_within("reaper", tasks.reaper, grace, &mut problems).await;
        // Producers are gone, so the queue is closed and dispatch can drain
        join_within("dispatcher", tasks.dispatch, grace, &mut problems).await;

        if problems.is_empty() {
            info!("Discovery stopped on {}", self.local_addr);
            Ok(())
        } else {
            let message = problems.join("; ");
            error!("Discovery stopped with errors: {}", message);
            Err(DiscoveryError::shutdown(message))
        }
    }
}

async fn join_within(
    name: &str,
    task: JoinHandle<()>,
    grace: Duration,
    problems: &mut Vec<String>,
) {
    let abort = task.abort_handle();
    match timeout(grace, task).await {
        Ok(Ok(())) => debug!("{} finished", name),
        Ok(Err(e)) => problems.push(format!("{name} failed: {e}")),
        Err(_) => {
            abort.abort();
            problems.push(format!("{name} did not finish within {grace:?}"));
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        if !self.cancel.is_cancelled() {
            debug!("Engine handle dropped without stop, cancelling");
            self.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("local_addr", &self.local_addr)
            .field("running", &self.is_running())
            .field("instances", &self.registry.len())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
