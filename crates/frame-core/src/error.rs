//! Failure taxonomy for one wake cycle.
//!
//! Every step reports one of these. None of them escapes the cycle: the
//! controller folds them into the success/fail outcome and always reaches sleep.

use core::fmt;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CycleError {
    /// A required configuration key is absent or empty.
    ConfigMissing(&'static str),
    /// A configuration value could not be used (e.g. header pair without `=`).
    ConfigMalformed(&'static str),
    /// Join retry budget exhausted, or the radio refused to come up.
    JoinFailed,
    /// No terminal join signal before the deadline.
    JoinTimedOut,
    /// HTTP fetch failed.
    TransportError(&'static str),
    /// Decode or panel update failed.
    RenderError(&'static str),
    /// Stats could not be read or written.
    StorageError(&'static str),
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigMissing(key) => write!(f, "{key} not set"),
            Self::ConfigMalformed(what) => write!(f, "malformed config: {what}"),
            Self::JoinFailed => f.write_str("failed to join WiFi"),
            Self::JoinTimedOut => f.write_str("timed out joining WiFi"),
            Self::TransportError(what) => write!(f, "download failed: {what}"),
            Self::RenderError(what) => write!(f, "render failed: {what}"),
            Self::StorageError(what) => write!(f, "stats storage: {what}"),
        }
    }
}

pub type Result<T, E = CycleError> = core::result::Result<T, E>;
