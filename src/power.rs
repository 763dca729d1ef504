//! Low-power wait between wake cycles.

use cortex_m::peripheral::SCB;
use defmt::info;
use embassy_time::{Duration, Timer};
use frame_core::SleepScheduler;

/// Waits out the interval at the reduced system clock, then resets the chip
/// so the next cycle starts from `main` with fresh peripherals.
///
/// The radio and panel are already in their lowest power modes when this
/// runs; the executor idles in WFE between timer alarms.
pub struct DeepSleep;

impl SleepScheduler for DeepSleep {
    async fn schedule_next(&mut self, wake_in: Duration) -> ! {
        info!("Sleeping for {} s", wake_in.as_secs());
        Timer::after(wake_in).await;
        info!("Waking up, resetting");
        SCB::sys_reset()
    }
}
