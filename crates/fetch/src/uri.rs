//! URL validation.
//!
//! Page images are only ever fetched over HTTP(S); anything else (`file:`,
//! `data:`, `javascript:`...) is refused before it reaches a fetcher.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use url::Url;

/// Parses and validates a page image URL.
///
/// # Returns
/// Returns the parsed URL (fragment stripped, since it never reaches the
/// server and would otherwise split one image into several cache keys), or
/// [`InvalidUrl`](crate::error::ErrorKind::InvalidUrl) if invalid.
///
/// # Examples
///
/// ```
/// use folio_fetch::validate_url;
/// assert!(validate_url("https://cdn.example/ch1/001.jpg").is_ok());
/// assert!(validate_url("http://cdn.example/ch1/001.jpg").is_ok());
/// assert!(validate_url("file:///etc/passwd").is_err());
/// assert!(validate_url("not a url").is_err());
/// assert_eq!(
///     validate_url("https://cdn.example/001.jpg#page").unwrap().as_str(),
///     "https://cdn.example/001.jpg"
/// );
/// ```
pub fn validate(url: impl AsRef<str>) -> Result<Url> {
    let raw = url.as_ref();
    let mut parsed = Url::parse(raw.trim()).or_raise(|| ErrorKind::InvalidUrl(raw.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {},
        _ => exn::bail!(ErrorKind::InvalidUrl(raw.to_string())),
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        exn::bail!(ErrorKind::InvalidUrl(raw.to_string()));
    }
    parsed.set_fragment(None);
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://cdn.example/a.jpg", "https://cdn.example/a.jpg")]
    #[case("  https://cdn.example/a.jpg  ", "https://cdn.example/a.jpg")]
    #[case("HTTPS://CDN.example/a.jpg", "https://cdn.example/a.jpg")]
    #[case("http://cdn.example/a.jpg?w=800#top", "http://cdn.example/a.jpg?w=800")]
    fn test_valid_urls(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(validate(input).unwrap().as_str(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("cdn.example/a.jpg")]
    #[case("ftp://cdn.example/a.jpg")]
    #[case("data:image/png;base64,AAAA")]
    #[case("file:///tmp/a.jpg")]
    fn test_invalid_urls(#[case] input: &str) {
        let err = validate(input).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidUrl(raw) if raw == input));
    }
}
