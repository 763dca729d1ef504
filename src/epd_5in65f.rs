//! Driver for 5.65 inch e-Paper display (600x448 pixels)
//! Bit-banged SPI over GPIO, aligned with Waveshare C reference.

use embassy_time::{Duration, Instant, Timer};
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;

use crate::config::EpdPins;

/// Display dimensions
pub const EPD_5IN65F_WIDTH: u16 = 600;
pub const EPD_5IN65F_HEIGHT: u16 = 448;

/// 600x448 pixels, 4 bits per pixel
pub const IMAGE_BUFFER_SIZE: usize = EPD_5IN65F_WIDTH as usize / 2 * EPD_5IN65F_HEIGHT as usize;

/// Colors: 3-bit indices of the panel's palette
pub const EPD_5IN65F_BLACK: u8 = 0x0;
pub const EPD_5IN65F_WHITE: u8 = 0x1;

/// A full refresh takes ~15 s; anything far beyond that is a dead panel.
const BUSY_TIMEOUT: Duration = Duration::from_secs(40);

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum EpdError {
    /// BUSY never reached the expected level.
    BusyTimeout,
}

/// e-Paper driver structure
pub struct Epd5in65f<'d> {
    pins: EpdPins<'d>,
}

impl<'d> Epd5in65f<'d> {
    /// Create new driver instance
    pub fn new(pins: EpdPins<'d>) -> Self {
        Self { pins }
    }

    /// Software reset (EPD_RST high->low->high with delays)
    async fn reset(&mut self) {
        self.pins.rst.set_high();
        Timer::after(Duration::from_millis(200)).await;
        self.pins.rst.set_low();
        Timer::after(Duration::from_millis(2)).await;
        self.pins.rst.set_high();
        Timer::after(Duration::from_millis(200)).await;
    }

    /// Bit-banged SPI: write single byte, MSB first
    fn spi_write_byte(&mut self, mut value: u8) {
        for _ in 0..8 {
            self.pins.clk.set_low();
            if (value & 0x80) != 0 {
                self.pins.mosi.set_high();
            } else {
                self.pins.mosi.set_low();
            }
            self.pins.clk.set_high();
            value <<= 1;
        }
        self.pins.clk.set_low();
    }

    /// Send command
    fn send_command(&mut self, reg: u8) {
        self.pins.dc.set_low();
        self.pins.cs.set_low();
        self.spi_write_byte(reg);
        self.pins.cs.set_high();
    }

    /// Send data byte
    fn send_data(&mut self, data: u8) {
        self.pins.dc.set_high();
        self.pins.cs.set_low();
        self.spi_write_byte(data);
        self.pins.cs.set_high();
    }

    /// Wait until BUSY reads `high`, giving up after [`BUSY_TIMEOUT`].
    async fn wait_busy(&mut self, high: bool) -> Result<(), EpdError> {
        let started = Instant::now();
        let mut iterations = 0u32;
        while self.pins.busy.is_high() != high {
            if started.elapsed() > BUSY_TIMEOUT {
                defmt::error!("wait_busy({}): timed out", high);
                return Err(EpdError::BusyTimeout);
            }
            Timer::after(Duration::from_millis(1)).await;
            iterations += 1;
            if iterations & 1023 == 0 {
                defmt::debug!("wait_busy({}): still waiting, iterations={}", high, iterations);
            }
        }
        defmt::debug!("wait_busy({}): done after {} iterations", high, iterations);
        Ok(())
    }

    fn set_resolution(&mut self) {
        self.send_command(0x61);
        self.send_data(0x02);
        self.send_data(0x58);
        self.send_data(0x01);
        self.send_data(0xC0);
    }

    /// Power on, refresh, power off.
    async fn refresh(&mut self) -> Result<(), EpdError> {
        self.send_command(0x04);
        self.wait_busy(true).await?;
        self.send_command(0x12);
        self.wait_busy(true).await?;
        self.send_command(0x02);
        self.wait_busy(false).await?;
        Ok(())
    }

    /// Initialize display (Waveshare power-up sequence)
    pub async fn init(&mut self) -> Result<(), EpdError> {
        self.reset().await;
        self.wait_busy(true).await?;

        self.send_command(0x00);
        self.send_data(0xEF);
        self.send_data(0x08);

        self.send_command(0x01);
        self.send_data(0x37);
        self.send_data(0x00);
        self.send_data(0x23);
        self.send_data(0x23);

        self.send_command(0x03);
        self.send_data(0x00);

        self.send_command(0x06);
        self.send_data(0xC7);
        self.send_data(0xC7);
        self.send_data(0x1D);

        self.send_command(0x30);
        self.send_data(0x3C);

        self.send_command(0x41);
        self.send_data(0x00);

        self.send_command(0x50);
        self.send_data(0x37);

        self.send_command(0x60);
        self.send_data(0x22);

        self.set_resolution();

        self.send_command(0xE3);
        self.send_data(0xAA);

        Timer::after(Duration::from_millis(100)).await;

        self.send_command(0x50);
        self.send_data(0x37);
        Ok(())
    }

    /// Clear screen to given 3-bit color index
    pub async fn clear(&mut self, color: u8) -> Result<(), EpdError> {
        self.set_resolution();
        self.send_command(0x10);

        // Each byte is two pixels: high nibble and low nibble
        let byte = ((color & 0x0F) << 4) | (color & 0x0F);
        for _ in 0..IMAGE_BUFFER_SIZE {
            self.send_data(byte);
        }

        self.refresh().await?;
        Timer::after(Duration::from_millis(500)).await;
        Ok(())
    }

    /// Display image buffer, 4bpp packed (two pixels per byte), row-major
    pub async fn display(&mut self, image: &[u8]) -> Result<(), EpdError> {
        self.set_resolution();
        self.send_command(0x10);

        for i in 0..IMAGE_BUFFER_SIZE {
            let b = image.get(i).copied().unwrap_or(0x11);
            self.send_data(b);
        }

        self.refresh().await?;
        Timer::after(Duration::from_millis(200)).await;
        Ok(())
    }

    /// Enter deep sleep; only a reset wakes the panel again.
    pub async fn sleep(&mut self) {
        Timer::after(Duration::from_millis(100)).await;
        self.send_command(0x07);
        self.send_data(0xA5);
        Timer::after(Duration::from_millis(100)).await;
        self.pins.rst.set_low();
    }
}

/// Packed 4bpp frame the panel accepts, drawable with embedded-graphics.
///
/// `BinaryColor::On` is black ink, `Off` is white paper.
pub struct Framebuffer<'a> {
    image: &'a mut [u8],
}

impl<'a> Framebuffer<'a> {
    /// `None` when `image` cannot hold a full frame.
    pub fn new(image: &'a mut [u8]) -> Option<Self> {
        let image = image.get_mut(..IMAGE_BUFFER_SIZE)?;
        Some(Self { image })
    }

    pub fn fill(&mut self, color: u8) {
        let byte = ((color & 0x0F) << 4) | (color & 0x0F);
        self.image.fill(byte);
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.image
    }
}

impl OriginDimensions for Framebuffer<'_> {
    fn size(&self) -> Size {
        Size::new(EPD_5IN65F_WIDTH as u32, EPD_5IN65F_HEIGHT as u32)
    }
}

impl DrawTarget for Framebuffer<'_> {
    type Color = BinaryColor;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            let (Ok(x), Ok(y)) = (u16::try_from(point.x), u16::try_from(point.y)) else {
                continue;
            };
            if x >= EPD_5IN65F_WIDTH || y >= EPD_5IN65F_HEIGHT {
                continue;
            }
            let color = match color {
                BinaryColor::On => EPD_5IN65F_BLACK,
                BinaryColor::Off => EPD_5IN65F_WHITE,
            };
            set_pixel(self.image, x, y, color);
        }
        Ok(())
    }
}

/// Set a single pixel in the image buffer
/// Image format: 4bpp packed (two pixels per byte), row-major
fn set_pixel(image: &mut [u8], x: u16, y: u16, color: u8) {
    let byte_index = x as usize / 2 + EPD_5IN65F_WIDTH as usize / 2 * y as usize;

    if let Some(byte) = image.get_mut(byte_index) {
        if x.is_multiple_of(2) {
            // High nibble (left pixel)
            *byte = (*byte & 0x0F) | ((color & 0x0F) << 4);
        } else {
            // Low nibble (right pixel)
            *byte = (*byte & 0xF0) | (color & 0x0F);
        }
    }
}
