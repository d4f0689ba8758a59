#[cfg(feature = "browser")]
mod browser;
mod capture;
mod checkpoint;
mod config;
mod cookies;
mod crawler;
mod error;
mod fetch;
mod scrapable;
mod sink;
mod stealth;
mod throttle;

#[cfg(feature = "browser")]
pub use browser::{BrowserFetcher, ChromeSession, PROFILE_DIR};
pub use capture::{capture_cookies, persist_capture, LoginBrowser, Operator, StdinOperator};
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use config::{
    validate_alias, CrawlerConfig, OnError, RetryPolicy, SiteConfig, Sites, SpeedOverride,
    Throttle, DEFAULT_SITES_FILE,
};
pub use cookies::{Cookie, CookieBundle, SameSite};
pub use crawler::{crawl_site, crawl_site_until, CrawlReport, CrawlSession, CrawlStats, Outcome};
pub use error::{ConfigError, CrawlError, FetchError};
pub use fetch::{FetchRequest, Fetcher, HttpFetcher, Page, RetryFetcher};
pub use scrapable::{Extractor, Item, NextUrl, NoItems, Scrapable};
pub use sink::ChunkedSink;
pub use stealth::{StealthHeaders, INIT_SCRIPT, LAUNCH_ARGS, USER_AGENTS};
pub use throttle::AutoThrottle;

pub use anyhow;
