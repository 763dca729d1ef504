//! # E-Paper Picture Frame
//! Raspberry Pi Pico W wakes, downloads one frame for a 5.65" e-Paper panel,
//! records its stats and sleeps until the next refresh.

#![no_std]
#![no_main]

use defmt::info;
use embassy_executor::Spawner;
use embassy_rp::clocks::{ClockConfig, CoreVoltage};
use embassy_rp::config::Config;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use frame_core::{JoinMachine, WakeCycle};
use defmt_rtt as _;
#[cfg(debug_assertions)]
use panic_probe as _;

mod config;
mod display;
mod epd_5in65f;
mod event;
mod logger;
mod network;
#[cfg(not(debug_assertions))]
mod panic;
mod power;
mod storage;
mod task;

use display::EpdRenderer;
use epd_5in65f::{Epd5in65f, IMAGE_BUFFER_SIZE};
use network::HttpFetcher;
use power::DeepSleep;
use storage::Stats;
use task::{RadioLink, WifiPeripherals, radio_driver};

/// Firmware version - automatically populated from Cargo.toml
pub static FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Downloaded frame, reused as the diagnostics canvas
static mut IMAGE_BUFFER: [u8; IMAGE_BUFFER_SIZE] = [0u8; IMAGE_BUFFER_SIZE];

static JOIN: JoinMachine<CriticalSectionRawMutex> = JoinMachine::new();

/// Helper function to spawn tasks and unwrap, panicking if spawn fails.
/// This is acceptable during initialization as we want to fail fast if we can't spawn a task.
#[allow(clippy::unwrap_used)]
pub(crate) fn spawn_unwrap<S>(spawner: &Spawner, token: embassy_executor::SpawnToken<S>) {
    spawner.spawn(token).unwrap();
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    logger::init();
    info!("Starting e-Paper frame v{}", FIRMWARE_VERSION);

    // Running at 5 MHz with 0.85V core voltage for minimal power consumption
    #[allow(clippy::unwrap_used)]
    let mut clock_config = ClockConfig::system_freq(5_000_000).unwrap();
    clock_config.core_voltage = CoreVoltage::V0_85;
    let p = embassy_rp::init(Config::new(clock_config));

    let epd_pins = config::init_epd(p.PIN_12, p.PIN_8, p.PIN_9, p.PIN_13, p.PIN_10, p.PIN_11);
    let stats = Stats::open(p.FLASH);

    let wifi_peripherals = WifiPeripherals {
        pwr_pin: p.PIN_23,
        cs_pin: p.PIN_25,
        pio: p.PIO0,
        dio_pin: p.PIN_24,
        clk_pin: p.PIN_29,
        dma_ch: p.DMA_CH0,
    };
    spawn_unwrap(&spawner, radio_driver(spawner, wifi_peripherals, &JOIN));

    // SAFETY: the only reference to the buffer; `main` never returns.
    let frame: &'static mut [u8; IMAGE_BUFFER_SIZE] =
        unsafe { &mut *core::ptr::addr_of_mut!(IMAGE_BUFFER) };

    let cycle = WakeCycle::new(
        config::settings(),
        &JOIN,
        RadioLink,
        HttpFetcher,
        EpdRenderer::new(Epd5in65f::new(epd_pins)),
        stats,
        frame,
    );
    cycle.run(&mut DeepSleep).await
}
