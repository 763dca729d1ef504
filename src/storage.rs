//! Flash-backed stats for the wake cycle.

use defmt::{error, info};
use embassy_rp::Peri;
use embassy_rp::flash::{Blocking, ERASE_SIZE, Flash};
use embassy_rp::peripherals::FLASH;
use frame_core::{CycleError, CycleStats, FlashStatsStore, StatsStore};

pub const FLASH_SIZE: usize = 2 * 1024 * 1024;

/// Two sectors at the end of flash, kept out of the image by `memory.x`.
pub const STATS_OFFSET: u32 = (FLASH_SIZE - 2 * ERASE_SIZE) as u32;

pub type StatsFlash = Flash<'static, FLASH, Blocking, FLASH_SIZE>;

/// The stats store, or the reason it could not be opened.
///
/// An unusable store still lets the cycle run; every access reports the
/// open error so the cycle records it as a failure.
pub enum Stats {
    Ready(FlashStatsStore<StatsFlash>),
    Unavailable(CycleError),
}

impl Stats {
    pub fn open(flash: Peri<'static, FLASH>) -> Self {
        let flash = Flash::new_blocking(flash);
        match FlashStatsStore::new(flash, STATS_OFFSET) {
            Ok(store) => {
                info!("Stats store at flash offset {:#x}", STATS_OFFSET);
                Self::Ready(store)
            }
            Err(err) => {
                error!("Stats store unavailable: {}", err);
                Self::Unavailable(err)
            }
        }
    }
}

impl StatsStore for Stats {
    fn load(&mut self) -> Result<CycleStats, CycleError> {
        match self {
            Self::Ready(store) => store.load(),
            Self::Unavailable(err) => Err(*err),
        }
    }

    fn store(&mut self, totals: &CycleStats) -> Result<(), CycleError> {
        match self {
            Self::Ready(store) => store.store(totals),
            Self::Unavailable(err) => Err(*err),
        }
    }
}
