//! HTTP fetcher.
//!
//! Image hosts behind manga sources commonly refuse hotlinked requests, so
//! the fetcher can route every request through an image proxy that takes the
//! real location in a `url` query parameter.

use crate::error::{ErrorKind, Result};
use crate::uri::validate as validate_url;
use crate::Fetcher;
use async_trait::async_trait;
use bytes::Bytes;
use exn::ResultExt;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

/// Construction options for [`HttpFetcher`].
#[derive(Clone, Debug)]
pub struct HttpOptions {
    /// Image proxy base URL. When set, `https://host/1.jpg` is requested as
    /// `{proxy}?url=https%3A%2F%2Fhost%2F1.jpg`.
    pub proxy: Option<Url>,
    /// Whole-request timeout (connect, headers and body).
    pub timeout: Option<Duration>,
    pub user_agent: String,
}
impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout: None,
            user_agent: concat!("folio/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Fetches page images over HTTP(S).
///
/// # Examples
///
/// ```no_run
/// use folio_fetch::fetcher::{HttpFetcher, HttpOptions};
/// use folio_fetch::{Fetcher, validate_url};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = HttpFetcher::new("cdn", HttpOptions::default()).map_err(|e| e.to_string())?;
/// let url = validate_url("https://cdn.example/ch1/001.jpg").map_err(|e| e.to_string())?;
/// let image = fetcher.fetch(&url).await.map_err(|e| e.to_string())?;
/// println!("{} bytes", image.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HttpFetcher {
    name: String,
    client: Client,
    proxy: Option<Url>,
}
impl HttpFetcher {
    pub fn new(name: impl Into<String>, options: HttpOptions) -> Result<Self> {
        let mut builder = Client::builder().user_agent(&options.user_agent);
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().or_raise(|| ErrorKind::Configuration("HTTP client".to_string()))?;
        let proxy = options.proxy.map(validate_url).transpose()?;
        Ok(Self { name: name.into(), client, proxy })
    }

    /// The URL actually requested for a page.
    fn request_url(&self, url: &Url) -> Url {
        match &self.proxy {
            Some(proxy) => {
                let mut proxied = proxy.clone();
                proxied.query_pairs_mut().append_pair("url", url.as_str());
                proxied
            },
            None => url.clone(),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip_all, fields(fetcher = %self.name, url = %url))]
    async fn fetch(&self, url: &Url) -> Result<Bytes> {
        let target = self.request_url(url);
        let response = self.client.get(target).send().await.map_err(|e| map_reqwest_error(e, url))?;
        if let Some(kind) = status_error(response.status(), url) {
            exn::bail!(kind);
        }
        let body = response.bytes().await.map_err(|e| map_reqwest_error(e, url))?;
        tracing::debug!(bytes = body.len(), "Fetched page image");
        Ok(body)
    }
}

/// The error a non-success response maps to, if any.
fn status_error(status: StatusCode, url: &Url) -> Option<ErrorKind> {
    match status {
        status if status.is_success() => None,
        StatusCode::NOT_FOUND | StatusCode::GONE => Some(ErrorKind::NotFound(url.to_string())),
        status => Some(ErrorKind::Status(status.as_u16(), url.to_string())),
    }
}

fn map_reqwest_error(err: reqwest::Error, url: &Url) -> crate::error::Error {
    let kind = if err.is_timeout() {
        ErrorKind::Timeout(url.to_string())
    } else {
        ErrorKind::Network(err.to_string())
    };
    exn::Exn::from(err).raise(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::net::TcpListener;

    #[test]
    fn test_request_url_without_proxy() {
        let fetcher = HttpFetcher::new("direct", HttpOptions::default()).unwrap();
        let url = validate_url("https://cdn.example/ch1/001.jpg").unwrap();
        assert_eq!(fetcher.request_url(&url), url);
    }

    #[test]
    fn test_request_url_through_proxy() {
        let options = HttpOptions {
            proxy: Some(Url::parse("https://reader.example/api/proxy").unwrap()),
            ..HttpOptions::default()
        };
        let fetcher = HttpFetcher::new("proxied", options).unwrap();
        let url = validate_url("https://cdn.example/ch1/001.jpg?token=a&b=c").unwrap();
        assert_eq!(
            fetcher.request_url(&url).as_str(),
            "https://reader.example/api/proxy?url=https%3A%2F%2Fcdn.example%2Fch1%2F001.jpg%3Ftoken%3Da%26b%3Dc"
        );
    }

    #[test]
    fn test_proxy_must_be_http() {
        let options = HttpOptions {
            proxy: Some(Url::parse("file:///tmp/proxy").unwrap()),
            ..HttpOptions::default()
        };
        let err = HttpFetcher::new("bad", options).err().unwrap();
        assert!(matches!(&*err, ErrorKind::InvalidUrl(_)));
    }

    #[rstest]
    #[case(200, None)]
    #[case(206, None)]
    #[case(404, Some(ErrorKind::NotFound("https://cdn.example/1.jpg".to_string())))]
    #[case(410, Some(ErrorKind::NotFound("https://cdn.example/1.jpg".to_string())))]
    #[case(403, Some(ErrorKind::Status(403, "https://cdn.example/1.jpg".to_string())))]
    #[case(503, Some(ErrorKind::Status(503, "https://cdn.example/1.jpg".to_string())))]
    fn test_status_error(#[case] code: u16, #[case] expected: Option<ErrorKind>) {
        let url = validate_url("https://cdn.example/1.jpg").unwrap();
        assert_eq!(status_error(StatusCode::from_u16(code).unwrap(), &url), expected);
    }

    #[tokio::test]
    async fn test_refused_connection_is_network_error() {
        // Bind then drop to find a local port nothing listens on.
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let fetcher = HttpFetcher::new("local", HttpOptions::default()).unwrap();
        let url = validate_url(format!("http://127.0.0.1:{port}/1.jpg")).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Network(_)), "{err:?}");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_silent_server_is_timeout() {
        // Connections are accepted by the kernel but never answered.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let options = HttpOptions { timeout: Some(Duration::from_millis(100)), ..HttpOptions::default() };
        let fetcher = HttpFetcher::new("silent", options).unwrap();
        let url = validate_url(format!("http://127.0.0.1:{port}/1.jpg")).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Timeout(url.to_string()));
        drop(listener);
    }
}
