//! Duty-cycle policy: how long to sleep and the hand-off to low power.

use embassy_time::Duration;

/// Commits the device to low power. Nothing after it runs; the next wake
/// starts again from the entry point.
#[allow(async_fn_in_trait)]
pub trait SleepScheduler {
    async fn schedule_next(&mut self, wake_in: Duration) -> !;
}

/// Sleep length for a refresh interval in minutes. Zero is clamped to one
/// minute.
pub fn sleep_interval(refresh_interval_min: u32) -> Duration {
    Duration::from_secs(u64::from(refresh_interval_min.max(1)) * 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_is_in_minutes() {
        assert_eq!(sleep_interval(30), Duration::from_secs(1_800));
        assert_eq!(sleep_interval(1), Duration::from_secs(60));
    }

    #[test]
    fn zero_interval_is_clamped() {
        assert_eq!(sleep_interval(0), Duration::from_secs(60));
    }
}
