//! Size and range-support probing.
//!
//! A HEAD request gives the total size; a 2-byte ranged GET (`bytes=0-1`)
//! tells whether the server honours Range requests (206) or not.

mod parse;

pub(crate) use parse::parse_status_line;

use std::str;
use std::time::Duration;

/// Setup failure while probing. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("{0}")]
    Curl(#[from] curl::Error),
    #[error("{method} {url} returned HTTP {code}")]
    Http {
        method: &'static str,
        url: String,
        code: u32,
    },
}

/// What the probe learned about a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    /// Total size in bytes (0 if the server did not say).
    pub total_size: u64,
    /// True if a ranged GET returned 206.
    pub is_partial: bool,
}

/// HEAD, then `Range: bytes=0-1`. Runs in the current thread.
pub fn probe(url: &str) -> Result<ProbeResult, ProbeError> {
    let total_size = head_content_length(url)?;
    let is_partial = supports_ranges(url)?;
    tracing::debug!(url, total_size, is_partial, "probe complete");
    Ok(ProbeResult {
        total_size,
        is_partial,
    })
}

fn head_content_length(url: &str) -> Result<u64, ProbeError> {
    let mut headers: Vec<String> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url)?;
    easy.nobody(true)?;
    easy.follow_location(true)?;
    easy.connect_timeout(Duration::from_secs(15))?;
    easy.timeout(Duration::from_secs(30))?;

    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Ok(s) = str::from_utf8(data) {
                headers.push(s.trim_end().to_string());
            }
            true
        })?;
        transfer.perform()?;
    }

    let code = easy.response_code()?;
    if !(200..300).contains(&code) {
        return Err(ProbeError::Http {
            method: "HEAD",
            url: url.to_string(),
            code,
        });
    }

    Ok(parse::parse_headers(&headers).content_length.unwrap_or(0))
}

/// Ranged GET for the first two bytes. The body is abandoned after the first
/// chunk; only the status code matters.
fn supports_ranges(url: &str) -> Result<bool, ProbeError> {
    let mut easy = curl::easy::Easy::new();
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.connect_timeout(Duration::from_secs(15))?;
    easy.timeout(Duration::from_secs(30))?;
    easy.range("0-1")?;

    let perform_result = {
        let mut transfer = easy.transfer();
        transfer.write_function(|_data| Ok(0))?;
        transfer.perform()
    };
    if let Err(e) = perform_result {
        if !e.is_write_error() {
            return Err(ProbeError::Curl(e));
        }
    }

    Ok(easy.response_code()? == 206)
}
