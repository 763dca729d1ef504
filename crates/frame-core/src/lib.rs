//! Hardware-independent core of the e-paper frame firmware.
//!
//! One wake cycle joins WiFi with a bounded retry budget and deadline,
//! downloads a frame, hands it to the panel, folds the cycle's outcome into
//! persistent statistics and returns the device to sleep. Radio, HTTP, panel,
//! flash and sleep are reached through the traits in [`join`], [`cycle`],
//! [`stats`] and [`sleep`].

#![cfg_attr(not(test), no_std)]

pub mod cycle;
pub mod diag;
pub mod error;
pub mod headers;
pub mod join;
pub mod settings;
pub mod sleep;
pub mod stats;

pub use cycle::{CycleReport, CycleTiming, Fetcher, Renderer, WakeCycle};
pub use diag::DiagnosticLog;
pub use error::{CycleError, Result};
pub use join::{
    Credentials, JoinAction, JoinMachine, JoinOutcome, JoinState, MAX_RETRIES, Radio,
    RadioEvent, SessionCredentials, SessionHandle,
};
pub use settings::Settings;
pub use sleep::{SleepScheduler, sleep_interval};
pub use stats::{CycleStats, FlashStatsStore, StatsStore};
