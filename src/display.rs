//! Panel side of the wake cycle.

use defmt::{error, info};
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::mono_font::ascii::FONT_9X15;
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};
use embedded_graphics::text::{Baseline, Text};
use frame_core::{CycleError, DiagnosticLog, Renderer};

use crate::epd_5in65f::{
    EPD_5IN65F_HEIGHT, EPD_5IN65F_WHITE, EPD_5IN65F_WIDTH, Epd5in65f, EpdError, Framebuffer,
    IMAGE_BUFFER_SIZE,
};

const BORDER_INSET: i32 = 20;
const TEXT_LEFT: i32 = 40;
const TEXT_TOP: i32 = 40;
const LINE_HEIGHT: i32 = 17;
const TEXT_ROWS: usize =
    ((EPD_5IN65F_HEIGHT as i32 - 2 * TEXT_TOP) / LINE_HEIGHT) as usize;

/// Renders downloaded frames and failure diagnostics onto the 5.65" panel.
pub struct EpdRenderer<'d> {
    epd: Epd5in65f<'d>,
    awake: bool,
}

impl<'d> EpdRenderer<'d> {
    pub fn new(epd: Epd5in65f<'d>) -> Self {
        Self { epd, awake: false }
    }

    async fn wake(&mut self) -> Result<(), CycleError> {
        if !self.awake {
            info!("EPD init");
            self.epd.init().await.map_err(render_error)?;
            self.awake = true;
        }
        Ok(())
    }

    /// Push a full frame and send the panel back to sleep.
    async fn show(&mut self, image: &[u8]) -> Result<(), CycleError> {
        self.wake().await?;

        info!("Clear display");
        self.epd
            .clear(EPD_5IN65F_WHITE)
            .await
            .map_err(render_error)?;

        info!("Display image data");
        self.epd.display(image).await.map_err(render_error)?;

        info!("EPD sleep");
        self.epd.sleep().await;
        self.awake = false;
        Ok(())
    }
}

fn render_error(err: EpdError) -> CycleError {
    error!("EPD error: {}", err);
    match err {
        EpdError::BusyTimeout => CycleError::RenderError("panel stayed busy"),
    }
}

impl Renderer for EpdRenderer<'_> {
    async fn init(&mut self) -> Result<(), CycleError> {
        self.wake().await
    }

    async fn render(&mut self, image: &[u8]) -> Result<(), CycleError> {
        if image.len() != IMAGE_BUFFER_SIZE {
            error!(
                "Invalid image size: got {} bytes, expected {} bytes",
                image.len(),
                IMAGE_BUFFER_SIZE
            );
            return Err(CycleError::RenderError("unexpected image size"));
        }
        self.show(image).await
    }

    async fn render_diagnostics(
        &mut self,
        log: &DiagnosticLog,
        frame: &mut [u8],
    ) -> Result<(), CycleError> {
        let mut fb =
            Framebuffer::new(frame).ok_or(CycleError::RenderError("frame buffer too small"))?;
        fb.fill(EPD_5IN65F_WHITE);

        let border = Rectangle::new(
            Point::new(BORDER_INSET, BORDER_INSET),
            Size::new(
                EPD_5IN65F_WIDTH as u32 - 2 * BORDER_INSET as u32,
                EPD_5IN65F_HEIGHT as u32 - 2 * BORDER_INSET as u32,
            ),
        );
        let Ok(()) = border
            .into_styled(PrimitiveStyle::with_stroke(BinaryColor::On, 2))
            .draw(&mut fb);

        let style = MonoTextStyle::new(&FONT_9X15, BinaryColor::On);
        let (note, lines) = log.screen(TEXT_ROWS);
        let mut y = TEXT_TOP;
        for line in note.as_deref().into_iter().chain(lines) {
            let Ok(_) = Text::with_baseline(line, Point::new(TEXT_LEFT, y), style, Baseline::Top)
                .draw(&mut fb);
            y += LINE_HEIGHT;
        }

        info!("Showing {} diagnostic lines", log.len());
        self.show(fb.as_bytes()).await
    }

    async fn power_off(&mut self) {
        if self.awake {
            info!("EPD sleep");
            self.epd.sleep().await;
            self.awake = false;
        }
    }
}
