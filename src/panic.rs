//! Release-build panic handler: log and restart the cycle.
//!
//! The reset goes back through `main`, so the cycle still ends in sleep.
//! Debug builds use panic-probe instead.

use core::panic::PanicInfo;

use cortex_m::peripheral::SCB;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    defmt::error!("panic: {}, resetting", defmt::Display2Format(info));
    SCB::sys_reset()
}
