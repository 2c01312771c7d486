//! Common Utilities
//!
//! Provides utility functions used across the return-link implementation

use bytes::Bytes;
use std::time::Duration;
use tracing::trace;

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Total size in bytes of a burst's payload units
pub fn total_len(units: &[Bytes]) -> usize {
    units.iter().map(Bytes::len).sum()
}

/// Time utilities for frame and slot calculations
pub mod time {
    use super::*;

    /// Convert configured seconds to a `Duration` rounded to the nanosecond.
    ///
    /// Returns `None` for negative, NaN or infinite input.
    pub fn secs_to_duration(secs: f64) -> Option<Duration> {
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }

        let nanos = (secs * 1e9).round();
        if nanos > u64::MAX as f64 {
            return None;
        }

        Some(Duration::from_nanos(nanos as u64))
    }

    /// Duration of `symbols` symbols at `symbol_rate_baud`, rounded to the nanosecond
    pub fn symbols_to_duration(symbols: u32, symbol_rate_baud: f64) -> Duration {
        let nanos = (symbols as f64 * 1e9 / symbol_rate_baud).round();
        trace!("{} symbols at {} baud -> {} ns", symbols, symbol_rate_baud, nanos);
        Duration::from_nanos(nanos as u64)
    }

    /// Number of whole `period`s contained in `elapsed`
    pub fn whole_periods(elapsed: Duration, period: Duration) -> u64 {
        if period.is_zero() {
            return 0;
        }
        (elapsed.as_nanos() / period.as_nanos()) as u64
    }

    /// `period` multiplied by `count`
    pub fn periods(period: Duration, count: u64) -> Duration {
        let nanos = period.as_nanos() * count as u128;
        Duration::from_nanos(nanos as u64)
    }
}
