//! Multicast announcement listener
//!
//! Owns the UDP socket. Each received datagram is decoded and fed to the
//! registry; resulting events are handed to the dispatch queue. Cancellation
//! interrupts a pending receive and drops the socket.

use crate::{
    codec::Codec,
    config::DiscoveryConfig,
    discoverable::DiscoveryEvent,
    error::{DiscoveryError, Result},
    metrics::EngineStats,
    registry::Registry,
    safety::FailureReporter,
};
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Pause after a receive error before trying again
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Create the announcement socket: bound to `0.0.0.0:port` and joined to the
/// configured group.
///
/// Must be called from within a tokio runtime.
pub fn bind_socket(config: &DiscoveryConfig) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| DiscoveryError::transport("create socket", e))?;

    if config.reuse_address() {
        socket
            .set_reuse_address(true)
            .map_err(|e| DiscoveryError::transport("set SO_REUSEADDR", e))?;
        #[cfg(unix)]
        socket
            .set_reuse_port(true)
            .map_err(|e| DiscoveryError::transport("set SO_REUSEPORT", e))?;
    }

    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port());
    socket
        .bind(&SocketAddr::V4(addr).into())
        .map_err(|e| DiscoveryError::transport(format!("bind {addr}"), e))?;

    socket
        .join_multicast_v4(&config.group(), &config.interface())
        .map_err(|e| {
            DiscoveryError::transport(
                format!("join {} on {}", config.group(), config.interface()),
                e,
            )
        })?;

    socket
        .set_nonblocking(true)
        .map_err(|e| DiscoveryError::transport("set non-blocking", e))?;

    UdpSocket::from_std(socket.into())
        .map_err(|e| DiscoveryError::transport("register socket with runtime", e))
}

/// Receive loop feeding the registry
pub struct Listener {
    socket: UdpSocket,
    codec: Codec,
    registry: Arc<Registry>,
    sink: flume::Sender<DiscoveryEvent>,
    reporter: FailureReporter,
    stats: Arc<EngineStats>,
}

impl Listener {
    /// Create a listener over an already bound socket
    pub fn new(
        socket: UdpSocket,
        codec: Codec,
        registry: Arc<Registry>,
        sink: flume::Sender<DiscoveryEvent>,
        decode_log_rate: NonZeroU32,
        stats: Arc<EngineStats>,
    ) -> Self {
        Self {
            socket,
            codec,
            registry,
            sink,
            reporter: FailureReporter::new("announcement", decode_log_rate),
            stats,
        }
    }

    /// Get the bound local address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive until `cancel` fires or the dispatch queue closes.
    ///
    /// The socket is released when this returns.
    pub async fn run(self, cancel: CancellationToken) {
        // One spare byte so an oversize datagram is seen as oversize, not truncated
        let mut buf = vec![0u8; self.codec.max_payload() + 1];
        if let Ok(addr) = self.socket.local_addr() {
            info!("Listening for announcements on {}", addr);
        }

        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((len, source)) => {
                    if !self.handle_datagram(&buf[..len], source) {
                        debug!("Dispatch queue closed, listener exiting");
                        break;
                    }
                }
                Err(e) => {
                    self.stats.receive_error();
                    warn!("Receive error: {}", e);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        debug!("Listener stopped");
    }

    /// Returns `false` once the dispatch queue is gone
    fn handle_datagram(&self, payload: &[u8], source: SocketAddr) -> bool {
        self.stats.datagram(payload.len());
        trace!("Datagram of {} bytes from {}", payload.len(), source);

        let record = match self.codec.decode(payload) {
            Ok(record) => record,
            Err(e) => {
                self.stats.decode_failure();
                self.reporter.report(format_args!("from {source}"), &e);
                return true;
            }
        };

        match self.registry.observe(record) {
            Some(event) => self.sink.send(event).is_ok(),
            None => true,
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("local_addr", &self.socket.local_addr().ok())
            .field("codec", &self.codec)
            .field("reporter", &self.reporter)
            .finish()
    }
}
