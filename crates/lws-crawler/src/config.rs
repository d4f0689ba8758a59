use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::stealth;

pub const DEFAULT_SITES_FILE: &str = "websites_input.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlerConfig {
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,

    #[serde(default)]
    pub throttle: Throttle,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Per request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: f32,

    /// Case insensitive marker that identifies a login page URL
    #[serde(default = "default_login_marker")]
    pub login_marker: String,

    #[serde(default = "default_progress_dir")]
    pub progress_dir: PathBuf,

    #[serde(default = "default_cookies_dir")]
    pub cookies_dir: PathBuf,

    #[serde(default = "default_max_items")]
    pub max_items: Option<usize>,

    #[serde(default = "default_on_dl_error")]
    pub on_dl_error: OnError,

    #[serde(default = "default_on_scrap_error")]
    pub on_scrap_error: OnError,

    #[serde(default = "default_on_checkpoint_error")]
    pub on_checkpoint_error: OnError,

    #[serde(default = "default_handle_sigint")]
    pub handle_sigint: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agents: default_user_agents(),
            throttle: Throttle::default(),
            retry: RetryPolicy::default(),
            request_timeout: default_request_timeout(),
            login_marker: default_login_marker(),
            progress_dir: default_progress_dir(),
            cookies_dir: default_cookies_dir(),
            max_items: default_max_items(),
            on_dl_error: default_on_dl_error(),
            on_scrap_error: default_on_scrap_error(),
            on_checkpoint_error: default_on_checkpoint_error(),
            handle_sigint: default_handle_sigint(),
        }
    }
}

impl CrawlerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.request_timeout.max(0.0))
    }

    pub fn cookies_path(&self, alias: &str) -> PathBuf {
        self.cookies_dir.join(format!("{alias}_cookies.json"))
    }

    /// Returns a copy of this config with the site's speed settings applied.
    pub fn with_speed_override(&self, speed: &SpeedOverride) -> Self {
        let mut conf = self.clone();
        if let Some(delay) = speed.download_delay {
            conf.throttle.download_delay = delay;
        }
        if let Some(randomize) = speed.randomize_download_delay {
            conf.throttle.randomize_delay = randomize;
        }
        if let Some(enabled) = speed.autothrottle_enabled {
            conf.throttle.autothrottle = enabled;
        }
        if let Some(start) = speed.autothrottle_start_delay {
            conf.throttle.start_delay = start;
        }
        if let Some(max) = speed.autothrottle_max_delay {
            conf.throttle.max_delay = max;
        }
        if let Some(target) = speed.autothrottle_target_concurrency {
            conf.throttle.target_concurrency = target;
        }
        if let Some(retries) = speed.retry_times {
            conf.retry.max_retries = retries;
        }
        conf
    }
}

fn default_user_agents() -> Vec<String> {
    stealth::USER_AGENTS.iter().map(|ua| ua.to_string()).collect()
}

fn default_request_timeout() -> f32 {
    60.0
}

fn default_login_marker() -> String {
    String::from("login")
}

fn default_progress_dir() -> PathBuf {
    PathBuf::from(".scrapy")
}

fn default_cookies_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_items() -> Option<usize> {
    None
}

fn default_on_dl_error() -> OnError {
    OnError::SkipAndLog
}

fn default_on_scrap_error() -> OnError {
    OnError::SkipAndLog
}

fn default_on_checkpoint_error() -> OnError {
    OnError::SkipAndLog
}

fn default_handle_sigint() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum OnError {
    Fail,
    SkipAndLog,
}

/// Politeness settings between two page downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Throttle {
    /// Minimum delay in seconds between requests
    pub download_delay: f32,
    /// Multiply the delay by a random factor in `[0.5, 1.5)`
    pub randomize_delay: bool,
    /// Adapt the delay to the observed server latency
    pub autothrottle: bool,
    /// Initial delay in seconds when autothrottle is enabled
    pub start_delay: f32,
    /// Upper bound in seconds of the adaptive delay
    pub max_delay: f32,
    /// Average number of requests that should be in flight towards the site
    pub target_concurrency: f32,
    /// Extra random pause in seconds before following a next page link
    pub page_jitter: (f32, f32),
}

impl Default for Throttle {
    fn default() -> Self {
        Self {
            download_delay: 1.0,
            randomize_delay: true,
            autothrottle: true,
            start_delay: 2.0,
            max_delay: 60.0,
            target_concurrency: 1.0,
            page_jitter: (1.5, 3.0),
        }
    }
}

/// Transport level retry of a single page download.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub http_codes: Vec<u16>,
    /// Base backoff in seconds, doubled after each attempt
    pub backoff: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            http_codes: vec![500, 502, 503, 504, 408, 429, 460, 499],
            backoff: 1.0,
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable(&self, status: u16) -> bool {
        self.http_codes.contains(&status)
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16)) as f32;
        Duration::from_secs_f32((self.backoff * factor).max(0.0))
    }
}

/// Per site overrides of the throttling settings, keyed like the crawler
/// settings they replace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeedOverride {
    pub download_delay: Option<f32>,
    pub randomize_download_delay: Option<bool>,
    pub autothrottle_enabled: Option<bool>,
    pub autothrottle_start_delay: Option<f32>,
    pub autothrottle_max_delay: Option<f32>,
    pub autothrottle_target_concurrency: Option<f32>,
    pub retry_times: Option<u32>,
}

impl SpeedOverride {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// One target website, as listed in the websites configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub login_url: String,
    #[serde(default)]
    pub start_url: String,
    #[serde(default)]
    pub next_url_func: Option<String>,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub chunked_size: usize,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default, skip_serializing_if = "SpeedOverride::is_empty")]
    pub speed_override: SpeedOverride,
}

impl SiteConfig {
    pub fn output_path(&self) -> &str {
        self.output_path.as_deref().unwrap_or(&self.alias)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_alias(&self.alias)?;
        self.validate_url("login_url", &self.login_url)?;
        self.validate_url("start_url", &self.start_url)?;
        Ok(())
    }

    fn validate_url(&self, field: &'static str, url: &str) -> Result<(), ConfigError> {
        if url.is_empty() {
            return Err(ConfigError::MissingField {
                alias: self.alias.clone(),
                field,
            });
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl {
                alias: self.alias.clone(),
                field,
                url: url.to_string(),
            });
        }
        Ok(())
    }
}

pub fn validate_alias(alias: &str) -> Result<(), ConfigError> {
    if alias.is_empty() || !alias.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(ConfigError::InvalidAlias(alias.to_string()));
    }
    Ok(())
}

/// The list of configured websites.
#[derive(Debug, Clone)]
pub struct Sites {
    path: PathBuf,
    sites: Vec<SiteConfig>,
}

impl Sites {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path));
        }
        let content = fs_err::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_json(path, &content)
    }

    pub fn from_json(path: impl Into<PathBuf>, content: &str) -> Result<Self, ConfigError> {
        let path = path.into();
        let sites: Vec<SiteConfig> =
            serde_json::from_str(content).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;

        let mut seen = HashSet::new();
        for site in &sites {
            if !seen.insert(site.alias.as_str()) {
                return Err(ConfigError::DuplicateAlias(site.alias.clone()));
            }
        }

        log::debug!("Loaded {} website(s) from {}", sites.len(), path.display());
        Ok(Self { path, sites })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn iter(&self) -> impl Iterator<Item = &SiteConfig> {
        self.sites.iter()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn aliases(&self) -> Vec<String> {
        self.sites.iter().map(|s| s.alias.clone()).collect()
    }

    /// Looks up a validated site by alias.
    pub fn get(&self, alias: &str) -> Result<&SiteConfig, ConfigError> {
        let site = self
            .sites
            .iter()
            .find(|s| s.alias == alias)
            .ok_or_else(|| ConfigError::UnknownAlias {
                alias: alias.to_string(),
                available: self.aliases(),
            })?;
        site.validate()?;
        Ok(site)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITES: &str = r#"[
        {
            "alias": "quotes",
            "login_url": "http://quotes.toscrape.com/login",
            "start_url": "http://quotes.toscrape.com/",
            "next_url_func": "next_url_funcs.quote_next_url_func.quote_next_url",
            "output_path": "output/quotes",
            "chunked_size": 10,
            "allowed_domains": ["quotes.toscrape.com"],
            "speed_override": {"download_delay": 3.5, "retry_times": 2}
        },
        {
            "alias": "broken",
            "login_url": "ftp://example.com/login",
            "start_url": "https://example.com/"
        }
    ]"#;

    #[test]
    fn lookup_by_alias() {
        let sites = Sites::from_json("sites.json", SITES).unwrap();
        let quotes = sites.get("quotes").unwrap();
        assert_eq!(quotes.output_path(), "output/quotes");
        assert_eq!(quotes.chunked_size, 10);
        assert_eq!(sites.aliases(), vec!["quotes", "broken"]);
    }

    #[test]
    fn unknown_alias_lists_available() {
        let sites = Sites::from_json("sites.json", SITES).unwrap();
        match sites.get("nope") {
            Err(ConfigError::UnknownAlias { alias, available }) => {
                assert_eq!(alias, "nope");
                assert_eq!(available, vec!["quotes", "broken"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn invalid_login_url() {
        let sites = Sites::from_json("sites.json", SITES).unwrap();
        assert!(matches!(
            sites.get("broken"),
            Err(ConfigError::InvalidUrl {
                field: "login_url",
                ..
            })
        ));
    }

    #[test]
    fn missing_start_url() {
        let json = r#"[{"alias": "a", "login_url": "https://a.com/login"}]"#;
        let sites = Sites::from_json("sites.json", json).unwrap();
        assert!(matches!(
            sites.get("a"),
            Err(ConfigError::MissingField {
                field: "start_url",
                ..
            })
        ));
    }

    #[test]
    fn duplicate_alias_rejected() {
        let json = r#"[{"alias": "a"}, {"alias": "a"}]"#;
        assert!(matches!(
            Sites::from_json("sites.json", json),
            Err(ConfigError::DuplicateAlias(_))
        ));
    }

    #[test]
    fn not_a_list() {
        let json = r#"{"alias": "a"}"#;
        assert!(matches!(
            Sites::from_json("sites.json", json),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn alias_format() {
        assert!(validate_alias("quotes_2").is_ok());
        assert!(validate_alias("../etc").is_err());
        assert!(validate_alias("").is_err());
    }

    #[test]
    fn output_path_defaults_to_alias() {
        let json = r#"[{"alias": "a", "login_url": "https://a.com/login", "start_url": "https://a.com"}]"#;
        let sites = Sites::from_json("sites.json", json).unwrap();
        assert_eq!(sites.get("a").unwrap().output_path(), "a");
    }

    #[test]
    fn speed_override_applies() {
        let sites = Sites::from_json("sites.json", SITES).unwrap();
        let quotes = sites.get("quotes").unwrap();
        let conf = CrawlerConfig::default().with_speed_override(&quotes.speed_override);
        assert_eq!(conf.throttle.download_delay, 3.5);
        assert_eq!(conf.retry.max_retries, 2);
        assert!(conf.throttle.autothrottle);
    }

    #[test]
    fn retry_backoff_doubles() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.backoff(0), Duration::from_secs(1));
        assert_eq!(retry.backoff(3), Duration::from_secs(8));
        assert!(retry.is_retryable(503));
        assert!(!retry.is_retryable(404));
    }
}
