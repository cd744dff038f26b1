//! Download URL validation and output-name derivation.

mod sanitize;

pub use sanitize::sanitize_output_name;

use url::Url;

/// Used when neither the caller nor the URL path yields a name.
pub const FALLBACK_NAME: &str = "download";

#[derive(Debug, thiserror::Error)]
pub enum UrlError {
    #[error("invalid URL {url:?}: {source}")]
    Parse {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported URL scheme {0:?} (expected http or https)")]
    Scheme(String),
}

/// Parse and require http(s).
pub fn parse_download_url(raw: &str) -> Result<Url, UrlError> {
    let url = Url::parse(raw.trim()).map_err(|source| UrlError::Parse {
        url: raw.to_string(),
        source,
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(UrlError::Scheme(other.to_string())),
    }
}

/// Last non-empty path segment of `url`, if any.
pub fn name_from_url(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .and_then(sanitize_output_name)
}

/// Output name for a new transfer: the explicit name if usable, else the
/// URL's last path segment, else `FALLBACK_NAME`.
pub fn output_name(url: &Url, explicit: Option<&str>) -> String {
    explicit
        .and_then(sanitize_output_name)
        .or_else(|| name_from_url(url))
        .unwrap_or_else(|| FALLBACK_NAME.to_string())
}
