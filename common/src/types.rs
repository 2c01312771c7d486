//! Common Types for the Return-Link Access Stack
//!
//! Defines fundamental types used throughout the stack

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, AddAssign};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// 48-bit MAC address identifying a terminal or gateway.
///
/// Serialized in the usual colon-separated hex notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Create a new MAC address
    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Build a locally administered address from a node index
    pub fn from_index(index: u32) -> Self {
        let b = index.to_be_bytes();
        Self([0x02, 0x00, b[0], b[1], b[2], b[3]])
    }

    /// Get the address octets
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

/// Error returned when parsing a MAC address string
#[derive(Error, Debug, PartialEq, Eq)]
#[error("Invalid MAC address: {0}")]
pub struct ParseMacAddressError(pub String);

impl FromStr for MacAddress {
    type Err = ParseMacAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');

        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(|| ParseMacAddressError(s.to_string()))?;
            *octet = u8::from_str_radix(part, 16).map_err(|_| ParseMacAddressError(s.to_string()))?;
        }

        if parts.next().is_some() {
            return Err(ParseMacAddressError(s.to_string()));
        }

        Ok(Self(octets))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Absolute instant on the simulated timeline, measured from simulation start
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SimTime(Duration);

impl SimTime {
    /// Simulation start
    pub const ZERO: Self = Self(Duration::ZERO);

    /// Create an instant from the elapsed time since simulation start
    pub const fn from_duration(elapsed: Duration) -> Self {
        Self(elapsed)
    }

    /// Create an instant from milliseconds since start
    pub const fn from_millis(ms: u64) -> Self {
        Self(Duration::from_millis(ms))
    }

    /// Create an instant from microseconds since start
    pub const fn from_micros(us: u64) -> Self {
        Self(Duration::from_micros(us))
    }

    /// Elapsed time since simulation start
    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// Seconds since simulation start
    pub fn as_secs_f64(&self) -> f64 {
        self.0.as_secs_f64()
    }

    /// Time from `earlier` to `self`, or `None` if `earlier` is later
    pub fn checked_duration_since(&self, earlier: SimTime) -> Option<Duration> {
        self.0.checked_sub(earlier.0)
    }

    /// Time from `earlier` to `self`, zero if `earlier` is later
    pub fn saturating_duration_since(&self, earlier: SimTime) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<Duration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Duration) -> SimTime {
        SimTime(self.0 + rhs)
    }
}

impl AddAssign<Duration> for SimTime {
    fn add_assign(&mut self, rhs: Duration) {
        self.0 += rhs;
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.0.as_secs_f64())
    }
}
