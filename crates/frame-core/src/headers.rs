//! Extra HTTP request headers for the image download.

use heapless::Vec;

use crate::error::{CycleError, Result};
use crate::settings::{CLIENT_ID, CLIENT_SECRET, Settings};

pub const MAX_HEADERS: usize = 8;

pub const ACCESS_CLIENT_ID_HEADER: &str = "CF-Access-Client-Id";
pub const ACCESS_CLIENT_SECRET_HEADER: &str = "CF-Access-Client-Secret";

pub type Header<'a> = (&'a str, &'a str);
pub type Headers<'a> = Vec<Header<'a>, MAX_HEADERS>;

/// Parse `key=value;key=value`. Empty segments are skipped; a segment
/// without `=` or with an empty key rejects the whole list.
pub fn parse_header_pairs(raw: &str) -> Result<Headers<'_>> {
    let mut headers = Headers::new();
    for segment in raw.split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let (name, value) = segment
            .split_once('=')
            .ok_or(CycleError::ConfigMalformed("HTTP_HEADERS pair without '='"))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(CycleError::ConfigMalformed("HTTP_HEADERS empty header name"));
        }
        headers
            .push((name, value.trim()))
            .map_err(|_| CycleError::ConfigMalformed("HTTP_HEADERS too many headers"))?;
    }
    Ok(headers)
}

/// Headers for the download request. `HTTP_HEADERS` wins over the
/// access-client pair; the pair must be given together.
pub fn request_headers<'a>(settings: &Settings<'a>) -> Result<Headers<'a>> {
    if let Some(raw) = settings.http_headers {
        return parse_header_pairs(raw);
    }

    let mut headers = Headers::new();
    match (settings.client_id, settings.client_secret) {
        (None, None) => {}
        (Some(id), Some(secret)) => {
            // Capacity is at least two.
            let _ = headers.push((ACCESS_CLIENT_ID_HEADER, id));
            let _ = headers.push((ACCESS_CLIENT_SECRET_HEADER, secret));
        }
        (Some(_), None) => return Err(CycleError::ConfigMissing(CLIENT_SECRET)),
        (None, Some(_)) => return Err(CycleError::ConfigMissing(CLIENT_ID)),
    }
    Ok(headers)
}
