//! Build-time settings and the e-Paper GPIO map.
//! Bit-banged SPI pins (CLK/MOSI) are provided via GPIOs.

include!(concat!(env!("OUT_DIR"), "/config_generated.rs"));

use embassy_rp::{
    Peri,
    gpio::{Input, Level, Output, Pull},
    peripherals,
};
use frame_core::Settings;

/// Settings baked in by `build.rs` from `config.toml` and the environment.
pub fn settings() -> Settings<'static> {
    Settings::from_pairs(BOOTSTRAP)
}

/// Pins for e-Paper display (bit-banged SPI).
///
/// - RST  -> GPIO12
/// - DC   -> GPIO8
/// - CS   -> GPIO9
/// - BUSY -> GPIO13
/// - CLK  -> GPIO10
/// - MOSI -> GPIO11
pub struct EpdPins<'d> {
    pub rst: Output<'d>,
    pub dc: Output<'d>,
    pub cs: Output<'d>,
    pub busy: Input<'d>,
    pub clk: Output<'d>,
    pub mosi: Output<'d>,
}

/// Configure the panel GPIOs.
pub fn init_epd(
    pin_12: Peri<'static, peripherals::PIN_12>,
    pin_8: Peri<'static, peripherals::PIN_8>,
    pin_9: Peri<'static, peripherals::PIN_9>,
    pin_13: Peri<'static, peripherals::PIN_13>,
    pin_10: Peri<'static, peripherals::PIN_10>,
    pin_11: Peri<'static, peripherals::PIN_11>,
) -> EpdPins<'static> {
    // e-Paper control pins
    let rst = Output::new(pin_12, Level::High);
    let dc = Output::new(pin_8, Level::High);
    let cs = Output::new(pin_9, Level::High);
    let busy = Input::new(pin_13, Pull::None);

    // Bit-banged SPI lines
    let clk = Output::new(pin_10, Level::Low);
    let mosi = Output::new(pin_11, Level::Low);

    EpdPins {
        rst,
        dc,
        cs,
        busy,
        clk,
        mosi,
    }
}
