//! Tunables for the session coordinator.
//!
//! # Responsibility
//! - Hold debounce, breadcrumb, and flush-retry settings in one value.
//! - Clamp caller-provided values into supported ranges.
//!
//! # Invariants
//! - A normalized config never has a zero debounce window or ceiling.

use std::time::Duration;

/// Quiet period before a bridged field edit is committed.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
const DEBOUNCE_MS_MIN: u64 = 50;
const DEBOUNCE_MS_MAX: u64 = 10_000;

/// Maximum ancestor hops a breadcrumb walk takes before giving up.
pub const BREADCRUMB_SAFETY_CEILING: usize = 64;
const BREADCRUMB_CEILING_MAX: usize = 1024;

/// Immediate retries after a failed store write during a flush.
pub const DEFAULT_FLUSH_RETRIES: u32 = 1;
const FLUSH_RETRIES_MAX: u32 = 5;

/// Session coordinator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub debounce_window: Duration,
    pub breadcrumb_ceiling: usize,
    pub flush_retries: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            breadcrumb_ceiling: BREADCRUMB_SAFETY_CEILING,
            flush_retries: DEFAULT_FLUSH_RETRIES,
        }
    }
}

impl SessionConfig {
    pub fn with_debounce_ms(mut self, millis: u64) -> Self {
        self.debounce_window = Duration::from_millis(millis);
        self.normalized()
    }

    pub fn with_breadcrumb_ceiling(mut self, hops: usize) -> Self {
        self.breadcrumb_ceiling = hops;
        self.normalized()
    }

    pub fn with_flush_retries(mut self, retries: u32) -> Self {
        self.flush_retries = retries;
        self.normalized()
    }

    /// Returns a copy with every field clamped into its supported range.
    pub fn normalized(self) -> Self {
        let debounce_ms = u64::try_from(self.debounce_window.as_millis())
            .unwrap_or(DEBOUNCE_MS_MAX)
            .clamp(DEBOUNCE_MS_MIN, DEBOUNCE_MS_MAX);
        Self {
            debounce_window: Duration::from_millis(debounce_ms),
            breadcrumb_ceiling: self.breadcrumb_ceiling.clamp(1, BREADCRUMB_CEILING_MAX),
            flush_retries: self.flush_retries.min(FLUSH_RETRIES_MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SessionConfig, BREADCRUMB_SAFETY_CEILING, DEFAULT_DEBOUNCE_MS};
    use std::time::Duration;

    #[test]
    fn default_matches_reference_values() {
        let config = SessionConfig::default();
        assert_eq!(config.debounce_window, Duration::from_millis(DEFAULT_DEBOUNCE_MS));
        assert_eq!(config.breadcrumb_ceiling, BREADCRUMB_SAFETY_CEILING);
        assert_eq!(config.flush_retries, 1);
        assert_eq!(config.normalized(), config);
    }

    #[test]
    fn builders_clamp_out_of_range_values() {
        let config = SessionConfig::default()
            .with_debounce_ms(0)
            .with_breadcrumb_ceiling(0)
            .with_flush_retries(99);
        assert_eq!(config.debounce_window, Duration::from_millis(50));
        assert_eq!(config.breadcrumb_ceiling, 1);
        assert_eq!(config.flush_retries, 5);

        let slow = SessionConfig::default().with_debounce_ms(60_000);
        assert_eq!(slow.debounce_window, Duration::from_millis(10_000));
    }
}
