// SPDX-FileCopyrightText: 2025 Contributors to the gstbridge project.
// SPDX-License-Identifier: Apache-2.0

//! Wall-clock timestamp source.
//!
//! Timestamps are 16.16 fixed-point seconds (the "short" NTP format used by
//! RTP congestion control feedback) measured from a process-wide epoch. The
//! epoch is sampled once by [`init_epoch`]; [`now`] then samples the wall clock
//! on every call. Values wrap modulo 2^32, i.e. roughly every 18.2 hours.

use std::{
    sync::RwLock,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Bias applied to the sampled epoch so the first timestamps are non-zero.
pub const EPOCH_BIAS: Duration = Duration::from_millis(1);

/// Fixed-point units per second.
const UNITS_PER_SECOND: u128 = 1 << 16;

/// Epoch of the process-wide clock. Before [`init_epoch`] it is the Unix epoch.
static EPOCH: RwLock<SystemTime> = RwLock::new(UNIX_EPOCH);

/// A 32-bit 16.16 fixed-point timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NtpShort(pub u32);

impl NtpShort {
    /// Whole seconds (upper 16 bits).
    pub fn seconds(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Fractional part in 1/65536 s (lower 16 bits).
    pub fn fraction(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / UNITS_PER_SECOND as f64
    }

    /// Time elapsed since `earlier`, accounting for a single wraparound.
    pub fn wrapping_since(self, earlier: NtpShort) -> Duration {
        let units = self.0.wrapping_sub(earlier.0) as u128;
        Duration::from_nanos((units * 1_000_000_000 / UNITS_PER_SECOND) as u64)
    }
}

impl From<NtpShort> for u32 {
    fn from(value: NtpShort) -> Self {
        value.0
    }
}

/// Converts an elapsed duration to 16.16 fixed point, discarding overflow.
pub fn to_fixed_point(elapsed: Duration) -> NtpShort {
    let units = elapsed.as_nanos() * UNITS_PER_SECOND / 1_000_000_000;
    NtpShort(units as u32)
}

/// A clock anchored at an explicit epoch.
///
/// The free functions [`init_epoch`] and [`now`] operate on a process-wide
/// instance; this type exists for callers that need their own anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallClock {
    epoch: SystemTime,
}

impl WallClock {
    /// Anchors a clock at the current wall-clock time minus [`EPOCH_BIAS`].
    pub fn start() -> Self {
        Self::with_epoch(SystemTime::now() - EPOCH_BIAS)
    }

    pub fn with_epoch(epoch: SystemTime) -> Self {
        Self { epoch }
    }

    pub fn epoch(&self) -> SystemTime {
        self.epoch
    }

    /// Timestamp for the current wall-clock time.
    pub fn now(&self) -> NtpShort {
        self.timestamp_at(SystemTime::now())
    }

    /// Timestamp for an arbitrary instant. Instants before the epoch map to 0.
    pub fn timestamp_at(&self, instant: SystemTime) -> NtpShort {
        to_fixed_point(instant.duration_since(self.epoch).unwrap_or_default())
    }
}

/// Samples the wall clock and stores it as the process-wide epoch.
pub fn init_epoch() {
    let clock = WallClock::start();
    match EPOCH.write() {
        Ok(mut epoch) => *epoch = clock.epoch(),
        Err(poisoned) => *poisoned.into_inner() = clock.epoch(),
    }
    tracing::debug!("Timestamp epoch initialized at {:?}", clock.epoch());
}

/// Current process-wide timestamp.
///
/// Must be sequenced after [`init_epoch`]; before that the value is anchored
/// at the Unix epoch.
pub fn now() -> NtpShort {
    let epoch = match EPOCH.read() {
        Ok(epoch) => *epoch,
        Err(poisoned) => *poisoned.into_inner(),
    };
    WallClock::with_epoch(epoch).now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_point_units() {
        assert_eq!(to_fixed_point(Duration::from_secs(1)), NtpShort(65536));
        assert_eq!(to_fixed_point(Duration::from_millis(1500)), NtpShort(98304));
        assert_eq!(to_fixed_point(Duration::ZERO), NtpShort(0));
    }

    #[test]
    fn fixed_point_wraps_modulo_2_32() {
        // 2^16 seconds is exactly 2^32 units.
        let wrap = Duration::from_secs(1 << 16);
        assert_eq!(to_fixed_point(wrap), NtpShort(0));
        assert_eq!(
            to_fixed_point(wrap + Duration::from_secs(2)),
            NtpShort(2 * 65536)
        );
    }

    #[test]
    fn seconds_and_fraction() {
        let ts = to_fixed_point(Duration::from_millis(2250));
        assert_eq!(ts.seconds(), 2);
        assert_eq!(ts.fraction(), 0x4000);
        assert!((ts.as_secs_f64() - 2.25).abs() < 1e-9);
    }

    #[test]
    fn wrapping_difference_across_boundary() {
        let before = NtpShort(u32::MAX - 65535);
        let after = NtpShort(65536);
        assert_eq!(after.wrapping_since(before), Duration::from_secs(2));
    }

    #[test]
    fn explicit_epoch() {
        let epoch = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let clock = WallClock::with_epoch(epoch);
        assert_eq!(
            clock.timestamp_at(epoch + Duration::from_secs(3)),
            NtpShort(3 * 65536)
        );
        assert_eq!(clock.timestamp_at(epoch - Duration::from_secs(3)), NtpShort(0));
    }

    #[test]
    fn started_clock_is_biased_into_the_past() {
        let clock = WallClock::start();
        assert!(clock.now().0 >= to_fixed_point(EPOCH_BIAS).0);
    }

    #[test]
    fn process_clock_tracks_real_time() {
        init_epoch();
        let first = now();
        std::thread::sleep(Duration::from_millis(200));
        let second = now();
        let elapsed = second.wrapping_since(first);
        assert!(elapsed >= Duration::from_millis(190), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1000), "{elapsed:?}");
    }
}
