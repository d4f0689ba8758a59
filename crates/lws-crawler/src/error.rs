use std::path::PathBuf;

use thiserror::Error;

/// Invalid or unresolvable site configuration. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Website configuration file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Couldn't read {} got: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't parse {} got: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Website alias not found in config: {alias} (available: {})", .available.join(", "))]
    UnknownAlias {
        alias: String,
        available: Vec<String>,
    },

    #[error("Duplicate website alias in config: {0}")]
    DuplicateAlias(String),

    #[error("Invalid alias format: {0:?}, only alphanumeric characters and underscores are allowed")]
    InvalidAlias(String),

    #[error("Missing {field} for alias: {alias}")]
    MissingField { alias: String, field: &'static str },

    #[error("Invalid {field} for alias {alias}: {url:?} must start with http:// or https://")]
    InvalidUrl {
        alias: String,
        field: &'static str,
        url: String,
    },

    #[error("Couldn't resolve next_url_func {reference:?} for alias {alias}")]
    UnresolvedNextUrl { alias: String, reference: String },

    #[error("Invalid selector {selector:?} for alias {alias}: {reason}")]
    InvalidSelector {
        alias: String,
        selector: String,
        reason: String,
    },
}

/// A single page download failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request to {url} failed: {cause:#}")]
    Transport { url: String, cause: anyhow::Error },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Request to {url} got HTTP status {status}")]
    Status { url: String, status: u16 },
}

impl FetchError {
    pub fn url(&self) -> &str {
        match self {
            Self::Transport { url, .. } | Self::Timeout { url } | Self::Status { url, .. } => url,
        }
    }
}

/// Conditions that end a crawl for an alias.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(
        "No usable cookies for alias {alias} at {}, run `lws capture {alias}` first",
        .path.display()
    )]
    Credential { alias: String, path: PathBuf },

    #[error(
        "Session for alias {alias} is no longer valid (redirected to {url}), \
         run `lws capture {alias}` to refresh cookies then crawl again to resume"
    )]
    SessionInvalid { alias: String, url: String },

    #[error("Crawl for alias {alias} stopped: {source}")]
    Fetch {
        alias: String,
        #[source]
        source: FetchError,
    },

    #[error("Couldn't scrap page {url} for alias {alias}: {cause:#}")]
    Scrap {
        alias: String,
        url: String,
        cause: anyhow::Error,
    },

    #[error("Couldn't persist checkpoint for alias {alias}: {source}")]
    Checkpoint {
        alias: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't write output for alias {alias}: {source}")]
    Output {
        alias: String,
        #[source]
        source: std::io::Error,
    },
}
