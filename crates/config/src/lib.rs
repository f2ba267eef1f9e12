//! Layered configuration for folio.
//!
//! Values are resolved in order, later layers overriding earlier ones:
//!
//! 1. Built-in defaults ([`Config::default`]).
//! 2. A configuration file, either given explicitly or found at
//!    [`default_path`]. The format follows the extension: `.toml`,
//!    `.yaml`/`.yml` or `.json`.
//! 3. Environment variables prefixed with `FOLIO_`, using `__` between
//!    section and key (`FOLIO_FETCH__CONCURRENCY=8`).
//!
//! ```toml
//! [cache]
//! capacity = 256
//! unit = "entries"
//!
//! [fetch]
//! concurrency = 4
//! timeout_secs = 30
//! proxy = "https://images.example/proxy"
//!
//! [preload]
//! lookahead = 3
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use folio_cache::Capacity;
use folio_fetch::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "FOLIO_";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
    pub preload: PreloadConfig,
}

/// What `cache.capacity` counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityUnit {
    #[default]
    Entries,
    Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: u64,
    pub unit: CapacityUnit,
}
impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 64, unit: CapacityUnit::Entries }
    }
}
impl CacheConfig {
    pub fn capacity(&self) -> Result<Capacity> {
        Ok(match self.unit {
            CapacityUnit::Entries => Capacity::Entries(
                usize::try_from(self.capacity)
                    .or_raise(|| ErrorKind::Invalid(format!("cache.capacity {} is too large", self.capacity)))?,
            ),
            CapacityUnit::Bytes => Capacity::Bytes(self.capacity),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Fetches allowed in flight at once.
    pub concurrency: usize,
    /// Per-fetch timeout in seconds; `0` disables it.
    pub timeout_secs: u64,
    /// Image proxy base URL. Pages are requested as `{proxy}?url={page}`.
    pub proxy: Option<String>,
    pub user_agent: String,
}
impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout_secs: 30,
            proxy: None,
            user_agent: concat!("folio/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}
impl FetchConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn proxy_url(&self) -> Result<Option<Url>> {
        self.proxy
            .as_deref()
            .map(|proxy| {
                folio_fetch::validate_url(proxy).or_raise(|| ErrorKind::Invalid(format!("fetch.proxy {proxy:?} is not a URL")))
            })
            .transpose()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    /// Pages ahead of the current one to keep preloaded.
    pub lookahead: usize,
}
impl Default for PreloadConfig {
    fn default() -> Self {
        Self { lookahead: 3 }
    }
}

/// Platform configuration file location, e.g.
/// `~/.config/folio/config.toml` on Linux.
pub fn default_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "folio").map(|dirs| dirs.config_dir().join("config.toml"))
}

impl Config {
    /// Load configuration from defaults, a file and the environment.
    ///
    /// An explicit `path` must exist; the [`default_path`] is used only if it
    /// does.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => default_path().filter(|path| path.is_file()),
        };
        if let Some(file) = file {
            figment = figment.merge(file_provider(&file)?);
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(&figment)
    }

    /// Extract and validate a configuration from any set of providers.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Config = figment.extract().or_raise(|| ErrorKind::Load(describe(figment)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch.concurrency == 0 {
            exn::bail!(ErrorKind::Invalid("fetch.concurrency must be at least 1".to_string()));
        }
        if self.cache.capacity == 0 {
            exn::bail!(ErrorKind::Invalid("cache.capacity must be at least 1".to_string()));
        }
        self.cache.capacity()?;
        self.fetch.proxy_url()?;
        Ok(())
    }
}

fn file_provider(path: &Path) -> Result<Figment> {
    if !path.is_file() {
        exn::bail!(ErrorKind::Load(path.display().to_string()));
    }
    tracing::debug!(path = %path.display(), "Loading configuration file");
    let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
    Ok(match extension.as_deref() {
        Some("toml") => Figment::from(Toml::file(path)),
        Some("yaml" | "yml") => Figment::from(Yaml::file(path)),
        Some("json") => Figment::from(Json::file(path)),
        _ => exn::bail!(ErrorKind::Invalid(format!("unsupported configuration format: {}", path.display()))),
    })
}

fn describe(figment: &Figment) -> String {
    let sources: Vec<String> =
        figment.metadata().filter_map(|metadata| metadata.source.as_ref().map(ToString::to_string)).collect();
    if sources.is_empty() { "defaults and environment".to_string() } else { sources.join(", ") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    fn file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn from_file(suffix: &str, contents: &str) -> Result<Config> {
        let file = file(suffix, contents);
        let figment = Figment::from(Serialized::defaults(Config::default())).merge(file_provider(file.path())?);
        Config::from_figment(&figment)
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.cache.capacity().unwrap(), Capacity::Entries(64));
        assert_eq!(config.fetch.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.fetch.proxy_url().unwrap(), None);
    }

    #[rstest]
    #[case(".toml", "[fetch]\nconcurrency = 8\n[cache]\ncapacity = 1048576\nunit = \"bytes\"\n")]
    #[case(".yaml", "fetch:\n  concurrency: 8\ncache:\n  capacity: 1048576\n  unit: bytes\n")]
    #[case(".json", r#"{"fetch": {"concurrency": 8}, "cache": {"capacity": 1048576, "unit": "bytes"}}"#)]
    fn test_file_formats(#[case] suffix: &str, #[case] contents: &str) {
        let config = from_file(suffix, contents).unwrap();
        assert_eq!(config.fetch.concurrency, 8);
        assert_eq!(config.cache.capacity().unwrap(), Capacity::Bytes(1_048_576));
        // Untouched values keep their defaults.
        assert_eq!(config.fetch.timeout_secs, 30);
        assert_eq!(config.preload.lookahead, 3);
    }

    #[test]
    fn test_zero_timeout_disables_it() {
        let config = from_file(".toml", "[fetch]\ntimeout_secs = 0\n").unwrap();
        assert_eq!(config.fetch.timeout(), None);
    }

    #[test]
    fn test_proxy_is_parsed() {
        let config = from_file(".toml", "[fetch]\nproxy = \"https://images.example/proxy\"\n").unwrap();
        assert_eq!(config.fetch.proxy_url().unwrap().unwrap().as_str(), "https://images.example/proxy");
    }

    #[rstest]
    #[case("[fetch]\nconcurrency = 0\n")]
    #[case("[cache]\ncapacity = 0\n")]
    #[case("[fetch]\nproxy = \"not a url\"\n")]
    #[case("[fetch]\nproxy = \"ftp://images.example/\"\n")]
    fn test_invalid_values(#[case] contents: &str) {
        let err = from_file(".toml", contents).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)), "{err:?}");
    }

    #[test]
    fn test_malformed_file() {
        let err = from_file(".toml", "[fetch\nconcurrency = ").unwrap_err();
        assert!(matches!(&*err, ErrorKind::Load(_)), "{err:?}");
    }

    #[test]
    fn test_unsupported_extension() {
        let err = from_file(".ini", "concurrency=8").unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Load(_)));
    }
}
