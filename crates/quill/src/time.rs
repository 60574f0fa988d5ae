use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Custom epoch: Monday, January 1, 2024 00:00:00 UTC
///
/// The 41-bit timestamp field covers roughly 69 years from here.
pub const CUSTOM_EPOCH: Duration = Duration::from_millis(1_704_067_200_000);

/// A source of millisecond timestamps relative to some origin.
///
/// This abstraction lets the generator run against the real wall clock in
/// production and against a frozen or scripted clock in tests.
///
/// # Example
///
/// ```
/// use quill::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_millis(&self) -> u64 {
///         1234
///     }
/// }
///
/// assert_eq!(FixedTime.current_millis(), 1234);
/// ```
pub trait TimeSource {
    /// Returns the current time in milliseconds since the configured epoch.
    fn current_millis(&self) -> u64;
}

impl<T: TimeSource + ?Sized> TimeSource for &T {
    fn current_millis(&self) -> u64 {
        (**self).current_millis()
    }
}

impl<T: TimeSource + ?Sized> TimeSource for std::sync::Arc<T> {
    fn current_millis(&self) -> u64 {
        (**self).current_millis()
    }
}

/// Wall clock anchored to a custom epoch.
///
/// Every call reads [`SystemTime::now`], so the value follows NTP steps and
/// manual adjustments, including backward ones. Callers that need ordering
/// (the Snowflake generator) must detect a regression themselves. Instants
/// before the epoch read as `0`.
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    epoch: Duration,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::with_epoch(CUSTOM_EPOCH)
    }
}

impl SystemClock {
    /// `epoch` is the origin (t = 0) as a [`Duration`] since 1970-01-01 UTC.
    pub const fn with_epoch(epoch: Duration) -> Self {
        Self { epoch }
    }

    pub const fn epoch(&self) -> Duration {
        self.epoch
    }
}

impl TimeSource for SystemClock {
    fn current_millis(&self) -> u64 {
        let since_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        let millis = since_unix.saturating_sub(self.epoch).as_millis();
        u64::try_from(millis).unwrap_or(u64::MAX)
    }
}
