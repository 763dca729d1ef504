//! Runtime settings resolved from the key-value bootstrap table.
//!
//! Key names match the build environment variables (`config.toml` may use
//! their lower-case form). Lookups are lazy about required keys: a missing
//! `WIFI_SSID` only fails the step that needs it, so the sleep interval is
//! always available to the final step.

use core::str::FromStr;

use embassy_time::Duration;
use log::warn;

use crate::error::{CycleError, Result};
use crate::join::Credentials;

pub const WIFI_SSID: &str = "WIFI_SSID";
pub const WIFI_PASSWORD: &str = "WIFI_PASSWORD";
pub const CONNECT_TIMEOUT: &str = "CONNECT_TIMEOUT";
pub const PNG_URL: &str = "PNG_URL";
pub const CLIENT_ID: &str = "CLIENT_ID";
pub const CLIENT_SECRET: &str = "CLIENT_SECRET";
pub const HTTP_HEADERS: &str = "HTTP_HEADERS";
pub const REFRESH_INTERVAL_MIN: &str = "REFRESH_INTERVAL_MIN";
pub const DOWNLOAD_TIMEOUT: &str = "DOWNLOAD_TIMEOUT";

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u32 = 10;
pub const DEFAULT_REFRESH_INTERVAL_MIN: u32 = 30;
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u32 = 60;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Settings<'a> {
    pub wifi_ssid: Option<&'a str>,
    pub wifi_password: Option<&'a str>,
    pub connect_timeout: Duration,
    pub png_url: Option<&'a str>,
    pub client_id: Option<&'a str>,
    pub client_secret: Option<&'a str>,
    pub http_headers: Option<&'a str>,
    pub refresh_interval_min: u32,
    /// Upper bound on the whole fetch step.
    pub download_timeout: Duration,
}

impl Default for Settings<'_> {
    fn default() -> Self {
        Self {
            wifi_ssid: None,
            wifi_password: None,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS as u64),
            png_url: None,
            client_id: None,
            client_secret: None,
            http_headers: None,
            refresh_interval_min: DEFAULT_REFRESH_INTERVAL_MIN,
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS as u64),
        }
    }
}

impl<'a> Settings<'a> {
    /// Resolve settings through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let connect_timeout_secs =
            positive_or_default(&lookup, CONNECT_TIMEOUT, DEFAULT_CONNECT_TIMEOUT_SECS);
        let download_timeout_secs =
            positive_or_default(&lookup, DOWNLOAD_TIMEOUT, DEFAULT_DOWNLOAD_TIMEOUT_SECS);
        Self {
            wifi_ssid: lookup(WIFI_SSID),
            wifi_password: lookup(WIFI_PASSWORD),
            connect_timeout: Duration::from_secs(connect_timeout_secs as u64),
            png_url: lookup(PNG_URL),
            client_id: lookup(CLIENT_ID),
            client_secret: lookup(CLIENT_SECRET),
            http_headers: lookup(HTTP_HEADERS),
            refresh_interval_min: positive_or_default(
                &lookup,
                REFRESH_INTERVAL_MIN,
                DEFAULT_REFRESH_INTERVAL_MIN,
            ),
            download_timeout: Duration::from_secs(download_timeout_secs as u64),
        }
    }

    /// Resolve settings from a static `(key, value)` table such as the one
    /// generated at build time.
    pub fn from_pairs(pairs: &'a [(&'a str, &'a str)]) -> Self {
        Self::from_lookup(|key| {
            pairs
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| *value)
        })
    }

    /// Network credentials. Emptiness is checked when the join starts.
    pub fn credentials(&self) -> Result<Credentials<'a>> {
        let ssid = self.wifi_ssid.ok_or(CycleError::ConfigMissing(WIFI_SSID))?;
        let password = self
            .wifi_password
            .ok_or(CycleError::ConfigMissing(WIFI_PASSWORD))?;
        Ok(Credentials { ssid, password })
    }

    pub fn image_url(&self) -> Result<&'a str> {
        match self.png_url {
            Some(url) if !url.is_empty() => Ok(url),
            _ => Err(CycleError::ConfigMissing(PNG_URL)),
        }
    }
}

fn positive_or_default<'a, F>(lookup: &F, key: &'static str, default: u32) -> u32
where
    F: Fn(&str) -> Option<&'a str>,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match u32::from_str(raw.trim()) {
        Ok(value) if value > 0 => value,
        _ => {
            warn!("{key}={raw} is not a positive integer, using {default}");
            default
        }
    }
}
