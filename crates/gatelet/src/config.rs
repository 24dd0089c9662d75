//! Limiter tuning knobs.

use std::time::Duration;

/// Tuning knobs for a [`RateLimit`](crate::RateLimit).
///
/// Defaults match the production constants: tickets older than ten minutes
/// are presumed leaked, local caches recalculate every five minutes, and
/// store records expire after a day unless some process refreshes them.
#[derive(Debug, Clone)]
pub struct LimiterSettings {
    /// Age beyond which a registered ticket is presumed leaked and reaped.
    pub ticket_max_alive: Duration,
    /// Minimum interval between cache recalculations against the store.
    pub flush_interval: Duration,
    /// Expiry applied to both store records on write and refresh.
    pub record_ttl: Duration,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            ticket_max_alive: Duration::from_secs(10 * 60),
            flush_interval: Duration::from_secs(5 * 60),
            record_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl LimiterSettings {
    pub fn with_ticket_max_alive(mut self, max_alive: Duration) -> Self {
        self.ticket_max_alive = max_alive;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_record_ttl(mut self, ttl: Duration) -> Self {
        self.record_ttl = ttl;
        self
    }
}
