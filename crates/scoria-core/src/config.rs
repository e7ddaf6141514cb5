//! # Engine Configuration
//!
//! Tunables controlling the batching flush policy.

// =============================================================================
// DEFAULTS
// =============================================================================

/// Default batch size at which the worker flushes without being asked
pub const DEFAULT_BATCH_FLUSH_SIZE: u32 = 100;

/// Default elapsed time (microseconds) after which a non-empty batch flushes
pub const DEFAULT_BATCH_FLUSH_TIME_US: u64 = 1_000;

/// Environment variable overriding the size threshold
pub const BATCH_FLUSH_SIZE_ENV: &str = "SCORIA_BATCH_FLUSH_SIZE";

/// Environment variable overriding the time threshold (microseconds)
pub const BATCH_FLUSH_TIME_ENV: &str = "SCORIA_BATCH_FLUSH_TIME";

// =============================================================================
// BATCHING CONFIGURATION
// =============================================================================

/// Flush-policy thresholds for the batching front-end
///
/// The worker flushes a non-empty batch when an explicit flush was
/// requested, the batch reached `batch_flush_size` entries, or
/// `batch_flush_time_us` elapsed since the previous flush. The thresholds
/// balance feeding the GPU against per-submission overhead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchingConfig {
    /// Batch size that forces a flush
    pub batch_flush_size: u32,
    /// Elapsed time since the last flush that forces one, in microseconds
    pub batch_flush_time_us: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            batch_flush_size: DEFAULT_BATCH_FLUSH_SIZE,
            batch_flush_time_us: DEFAULT_BATCH_FLUSH_TIME_US,
        }
    }
}

impl BatchingConfig {
    /// Read thresholds from the environment.
    ///
    /// Unset, zero, or malformed variables fall back to the built-in
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(size) = read_env_u64(BATCH_FLUSH_SIZE_ENV) {
            config.batch_flush_size = size.min(u32::MAX as u64) as u32;
        }
        if let Some(time_us) = read_env_u64(BATCH_FLUSH_TIME_ENV) {
            config.batch_flush_time_us = time_us;
        }
        config
    }
}

fn read_env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(value) => Some(value),
    }
}

// =============================================================================
// TESTS
// =============================================================================
