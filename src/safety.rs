//! Rate-limited failure reporting for the receive path.
//!
//! A noisy or hostile sender can push malformed datagrams, or flood the
//! registry with fresh identities, at line rate; discovery must keep running
//! without flooding the log. Failures beyond the quota are counted and
//! summarised in the next permitted report.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{
    fmt::Display,
    num::NonZeroU32,
    sync::atomic::{AtomicU64, Ordering},
};
use tracing::warn;

/// Default number of failure reports per second
pub const DEFAULT_REPORTS_PER_SECOND: NonZeroU32 = NonZeroU32::MIN;

/// Logs failures at a bounded rate, counting the ones it suppresses
pub struct FailureReporter {
    what: &'static str,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    suppressed: AtomicU64,
    total: AtomicU64,
}

impl FailureReporter {
    /// Create a reporter for failures of kind `what`, allowing
    /// `per_second` reports per second
    pub fn new(what: &'static str, per_second: NonZeroU32) -> Self {
        Self {
            what,
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
            suppressed: AtomicU64::new(0),
            total: AtomicU64::new(0),
        }
    }

    /// Report one failure concerning `subject` (a sender, an identity).
    ///
    /// Returns `true` if the failure was logged, `false` if it was suppressed.
    pub fn report(&self, subject: impl Display, error: &dyn Display) -> bool {
        self.total.fetch_add(1, Ordering::Relaxed);
        if self.limiter.check().is_err() {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let suppressed = self.suppressed.swap(0, Ordering::Relaxed);
        if suppressed > 0 {
            warn!(
                "Discarded {} {}: {} ({} similar failures suppressed)",
                self.what, subject, error, suppressed
            );
        } else {
            warn!("Discarded {} {}: {}", self.what, subject, error);
        }
        true
    }

    /// Total failures reported, logged or not
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Failures suppressed since the last logged report
    pub fn pending_suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for FailureReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureReporter")
            .field("what", &self.what)
            .field("total", &self.total())
            .field("suppressed", &self.pending_suppressed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use std::net::SocketAddr;

    #[test]
    fn test_burst_is_suppressed() {
        let reporter = FailureReporter::new("announcement", DEFAULT_REPORTS_PER_SECOND);
        let source: SocketAddr = "192.0.2.7:7095".parse().unwrap();
        let error = DecodeError::BadMagic { found: 0 };

        assert!(reporter.report(source, &error));
        let logged = (0..50).filter(|_| reporter.report(source, &error)).count();

        assert!(logged <= 1);
        assert_eq!(reporter.total(), 51);
        if logged == 0 {
            assert_eq!(reporter.pending_suppressed(), 50);
        }
    }
}
