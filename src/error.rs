//! Error types for the presence-discovery library

use std::io;
use thiserror::Error;

/// The primary error type for the presence-discovery crate
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Invalid configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Socket creation, bind or multicast join failure
    #[error("Transport error ({context}): {source}")]
    Transport {
        /// What the engine was doing when the failure happened
        context: String,
        /// The underlying socket error
        #[source]
        source: io::Error,
    },
    /// Data that cannot be represented on the wire
    #[error("Invalid data: {0}")]
    InvalidData(String),
    /// Malformed announcement payload
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    /// A subscriber callback failed
    #[error("Subscriber error: {0}")]
    Subscriber(#[from] SubscriberError),
    /// Background activities did not shut down cleanly
    #[error("Shutdown error: {0}")]
    Shutdown(String),
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Reasons an announcement datagram is rejected by the codec.
///
/// Decoding never panics on network input; every failure mode maps to one of
/// these variants so the listener can log and carry on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Payload exceeds the configured datagram limit
    #[error("payload of {len} bytes exceeds limit of {max} bytes")]
    TooLarge {
        /// Received length
        len: usize,
        /// Configured maximum
        max: usize,
    },
    /// Payload is shorter than the magic/version header
    #[error("truncated header: {len} bytes")]
    TruncatedHeader {
        /// Received length
        len: usize,
    },
    /// Magic prefix does not match
    #[error("bad magic 0x{found:08X}")]
    BadMagic {
        /// The magic value that was read
        found: u32,
    },
    /// Protocol version is not understood
    #[error("unsupported protocol version {found}")]
    UnsupportedVersion {
        /// The version that was read
        found: u16,
    },
    /// An entry's length prefix or body runs past the end of the payload
    #[error("truncated entry at offset {offset}")]
    TruncatedEntry {
        /// Byte offset of the entry
        offset: usize,
    },
    /// Entries do not form complete key/value pairs
    #[error("attribute count mismatch: key {key:?} has no value")]
    UnpairedEntry {
        /// The dangling key
        key: String,
    },
    /// Entry bytes are neither UTF-8 nor Java modified UTF-8
    #[error("invalid UTF-8 in entry at offset {offset}")]
    InvalidUtf8 {
        /// Byte offset of the entry
        offset: usize,
    },
    /// An attribute key is empty
    #[error("empty attribute key at offset {offset}")]
    EmptyKey {
        /// Byte offset of the entry
        offset: usize,
    },
    /// The same key appears twice in one announcement
    #[error("duplicate attribute key {key:?}")]
    DuplicateKey {
        /// The repeated key
        key: String,
    },
    /// The identity attribute is absent or empty
    #[error("missing identity attribute {key}")]
    MissingIdentity {
        /// The key that was expected
        key: &'static str,
    },
}

/// Failure reported by a subscriber callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SubscriberError {
    message: String,
}

impl SubscriberError {
    /// Create a new subscriber error
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Fatal error requiring immediate attention
    Fatal,
    /// Error condition
    Error,
    /// Warning condition
    Warning,
    /// Informational message
    Info,
}

/// Common result type for library operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

impl DiscoveryError {
    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new invalid data error
    pub fn invalid_data<S: Into<String>>(msg: S) -> Self {
        Self::InvalidData(msg.into())
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(context: S, source: io::Error) -> Self {
        Self::Transport {
            context: context.into(),
            source,
        }
    }

    /// Create a new shutdown error
    pub fn shutdown<S: Into<String>>(msg: S) -> Self {
        Self::Shutdown(msg.into())
    }

    /// Check if error is retryable
    ///
    /// Receive-path failures are transient; configuration and decode failures
    /// will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { source, .. } | Self::Io(source) => matches!(
                source.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }

    /// Get error severity
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Configuration(_) | Self::InvalidData(_) => ErrorSeverity::Fatal,
            Self::Transport { .. } | Self::Shutdown(_) => ErrorSeverity::Error,
            Self::Decode(_) | Self::Subscriber(_) | Self::Io(_) => ErrorSeverity::Warning,
        }
    }
}
