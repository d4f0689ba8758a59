use std::collections::{HashSet, VecDeque};
use std::future::{self, Future};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::checkpoint::Checkpoint;
use crate::config::{CrawlerConfig, OnError};
use crate::cookies::CookieBundle;
use crate::error::{CrawlError, FetchError};
use crate::fetch::{FetchRequest, Fetcher, Page};
use crate::scrapable::Scrapable;
use crate::sink::ChunkedSink;
use crate::stealth::StealthHeaders;
use crate::throttle::AutoThrottle;

/// How a crawl ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The site has no further page
    Exhausted,
    /// The session was redirected to the login page
    Aborted,
    /// The last page couldn't be downloaded
    Error,
    /// The maximum number of items was reached
    ItemLimit,
    /// Stopped by Ctrl-C, or the interrupt given to `crawl_site_until`
    Interrupted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub requests: usize,
    pub pages_scraped: usize,
    pub pages_skipped: usize,
    pub pages_failed: usize,
    pub items: usize,
}

#[derive(Debug)]
pub struct CrawlReport {
    pub alias: String,
    pub outcome: Outcome,
    pub stats: CrawlStats,
    pub written: Vec<PathBuf>,
    /// Page that revealed the session loss
    pub login_redirect: Option<String>,
    /// Download error that ended the crawl
    pub failure: Option<FetchError>,
}

impl CrawlReport {
    /// Turns the terminal states that need operator action into errors.
    pub fn into_result(self) -> Result<Self, CrawlError> {
        match self.outcome {
            Outcome::Aborted => Err(CrawlError::SessionInvalid {
                alias: self.alias,
                url: self.login_redirect.unwrap_or_default(),
            }),
            Outcome::Error => match self.failure {
                Some(source) => Err(CrawlError::Fetch {
                    alias: self.alias,
                    source,
                }),
                None => Ok(self),
            },
            _ => Ok(self),
        }
    }
}

/// Everything a single crawl of one alias works with.
#[derive(Debug)]
pub struct CrawlSession {
    scrapable: Scrapable,
    config: CrawlerConfig,
    cookies: Arc<CookieBundle>,
    checkpoint: Checkpoint,
    sink: ChunkedSink,
    throttle: AutoThrottle,
    rng: StdRng,
}

impl CrawlSession {
    /// Loads cookies and checkpoint of the alias. `output` overrides the
    /// site's output path.
    pub fn open(
        scrapable: Scrapable,
        config: &CrawlerConfig,
        output: Option<&Path>,
    ) -> Result<Self, CrawlError> {
        let alias = scrapable.alias().to_string();
        let config = config.with_speed_override(&scrapable.site.speed_override);
        if !scrapable.site.speed_override.is_empty() {
            log::info!("Speed settings overridden: {:?}", scrapable.site.speed_override);
        }

        let cookies_path = config.cookies_path(&alias);
        let cookies = load_cookies(&alias, &cookies_path)?;
        let checkpoint = Checkpoint::load(&config.progress_dir, &alias);

        let output = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(scrapable.site.output_path()));
        let sink = ChunkedSink::new(&output, scrapable.site.chunked_size);

        log::info!("=== Crawl configuration ===");
        log::info!("Alias: {alias}");
        log::info!("Start URL: {}", scrapable.site.start_url);
        log::info!("Output path: {}", output.display());
        match sink.chunk_size() {
            0 => log::info!("Chunked size: Disabled"),
            n => log::info!("Chunked size: {n}"),
        }
        log::info!("Cookies file: {}", cookies_path.display());
        log::info!("Checkpoint file: {}", checkpoint.path().display());
        log::info!("User-Agent pool size: {}", config.user_agents.len());
        log::info!("===========================");

        Ok(Self {
            throttle: AutoThrottle::new(&config.throttle),
            scrapable,
            config,
            cookies: Arc::new(cookies),
            checkpoint,
            sink,
            rng: StdRng::from_entropy(),
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn alias(&self) -> &str {
        self.scrapable.alias()
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    fn is_login_page(&self, page: &Page) -> bool {
        let trim = |u: &str| u.trim_end_matches('/').to_ascii_lowercase();
        if trim(&page.url) == trim(&self.scrapable.site.login_url) {
            return true;
        }
        let marker = self.config.login_marker.to_ascii_lowercase();
        !marker.is_empty()
            && page.url.to_ascii_lowercase().contains(&marker)
            && !page.requested_url.to_ascii_lowercase().contains(&marker)
    }

    fn request(&mut self, url: &str) -> FetchRequest {
        FetchRequest {
            url: url.to_string(),
            headers: StealthHeaders::random(&mut self.rng, &self.config.user_agents),
            cookies: self.cookies.clone(),
        }
    }

    fn remaining_items(&self, stats: &CrawlStats) -> Option<usize> {
        self.config
            .max_items
            .map(|max| max.saturating_sub(stats.items))
    }
}

fn load_cookies(alias: &str, path: &Path) -> Result<CookieBundle, CrawlError> {
    let credential_error = || CrawlError::Credential {
        alias: alias.to_string(),
        path: path.to_path_buf(),
    };
    if !path.exists() {
        return Err(credential_error());
    }
    let cookies = CookieBundle::load(path).map_err(|e| {
        log::error!("Could not load cookies: {e}");
        credential_error()
    })?;
    if cookies.is_empty() {
        return Err(credential_error());
    }

    log::info!("Loaded {} cookies from {}", cookies.len(), path.display());
    let expired = cookies.expired(Utc::now());
    if !expired.is_empty() {
        log::warn!(
            "{} cookie(s) already expired: {}",
            expired.len(),
            expired
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(cookies)
}

/// Paginates the site of `session`, one page at a time, until no next page
/// remains or the crawl can't go on. Ctrl-C stops the crawl when
/// `handle_sigint` is set.
pub async fn crawl_site<F>(
    fetcher: &mut F,
    session: CrawlSession,
) -> Result<CrawlReport, CrawlError>
where
    F: Fetcher + ?Sized,
{
    let handle_sigint = session.config.handle_sigint;
    let interrupt = async move {
        if handle_sigint && tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Received Ctrl-C, stopping the crawl");
            return;
        }
        future::pending::<()>().await
    };
    crawl_site_until(fetcher, session, interrupt).await
}

/// Same as [`crawl_site`], stopping with [`Outcome::Interrupted`] once
/// `interrupt` completes.
pub async fn crawl_site_until<F, S>(
    fetcher: &mut F,
    mut session: CrawlSession,
    interrupt: S,
) -> Result<CrawlReport, CrawlError>
where
    F: Fetcher + ?Sized,
    S: Future<Output = ()>,
{
    let alias = session.alias().to_string();
    let start_url = session.scrapable.site.start_url.clone();
    let next_url = session.scrapable.next_url.clone();
    let extractor = session.scrapable.extractor.clone();
    if next_url.is_none() {
        log::warn!("No next_url_func configured for {alias}, pagination will not be followed");
    }
    tokio::pin!(interrupt);

    let mut frontier = VecDeque::from([start_url.clone()]);
    let mut seen = HashSet::from([start_url]);
    let mut stats = CrawlStats::default();
    let mut outcome = Outcome::Exhausted;
    let mut failure: Option<FetchError> = None;
    let mut login_redirect = None;

    while let Some(url) = frontier.pop_front() {
        if stats.requests > 0 {
            let pause = session.throttle.next_pause(&mut session.rng);
            log::debug!("Waiting {:.1} seconds before next request", pause.as_secs_f32());
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = &mut interrupt => {
                    outcome = Outcome::Interrupted;
                    break;
                }
            }
        }

        // Fetch

        let request = session.request(&url);
        stats.requests += 1;
        log::info!("Request #{}: Fetching {url}", stats.requests);
        let fetched = tokio::select! {
            res = fetcher.fetch(&request) => res,
            _ = &mut interrupt => {
                outcome = Outcome::Interrupted;
                break;
            }
        };

        let page = match fetched {
            Ok(page) => {
                session.throttle.on_response(page.latency, page.status);
                if page.is_success() {
                    Ok(page)
                } else {
                    Err(FetchError::Status {
                        url: url.clone(),
                        status: page.status,
                    })
                }
            }
            Err(e) => {
                session.throttle.on_failure();
                Err(e)
            }
        };
        let page = match page {
            Ok(page) => {
                failure = None;
                page
            }
            Err(e) => {
                stats.pages_failed += 1;
                log::error!("Request failed: {e}");
                failure = Some(e);
                match session.config.on_dl_error {
                    OnError::SkipAndLog => continue,
                    OnError::Fail => break,
                }
            }
        };
        log::info!(
            "Parsing response from: {} (status: {})",
            page.url,
            page.status
        );

        // Session check

        if session.is_login_page(&page) {
            log::warn!(
                "Redirected to login page {}! Cookies for {alias} may be invalid or expired",
                page.url
            );
            login_redirect = Some(page.url.clone());
            outcome = Outcome::Aborted;
            break;
        }

        // Extract and persist

        let checkpoint = &session.checkpoint;
        if checkpoint.contains(&page.requested_url) || checkpoint.contains(&page.url) {
            log::info!("Skipping already scraped page: {}", page.requested_url);
            stats.pages_skipped += 1;
        } else {
            match extractor.extract(&page) {
                Ok(items) => {
                    log::info!("Found {} items on page: {}", items.len(), page.url);
                    for item in items {
                        if let Err(source) = session.sink.push(item) {
                            return Err(CrawlError::Output { alias, source });
                        }
                        stats.items += 1;
                        if stats.items % 10 == 0 {
                            log::info!("Total items extracted so far: {}", stats.items);
                        }
                    }
                    stats.pages_scraped += 1;

                    // Items hit the disk before their page is recorded
                    if let Err(source) = session.sink.flush() {
                        return Err(CrawlError::Output { alias, source });
                    }
                    match session.checkpoint.record(&page.requested_url) {
                        Ok(_) => log::info!("Page saved to checkpoint: {}", page.requested_url),
                        Err(source) => match session.config.on_checkpoint_error {
                            OnError::SkipAndLog => {
                                log::error!("Could not save checkpoint: {source}")
                            }
                            OnError::Fail => {
                                finish(&mut session.sink, &alias)?;
                                return Err(CrawlError::Checkpoint { alias, source });
                            }
                        },
                    }
                }
                // Not recorded, the page is scraped again on resume
                Err(e) => match session.config.on_scrap_error {
                    OnError::SkipAndLog => {
                        stats.pages_failed += 1;
                        log::error!("Skipping scrap for page {} got: {e:#}", page.url);
                    }
                    OnError::Fail => {
                        finish(&mut session.sink, &alias)?;
                        return Err(CrawlError::Scrap {
                            alias,
                            url: page.url,
                            cause: e,
                        });
                    }
                },
            }

            // Checked between pages, the page reaching the cap is kept whole
            if session.remaining_items(&stats) == Some(0) {
                log::info!("Reached the maximum of {} items", stats.items);
                outcome = Outcome::ItemLimit;
                break;
            }
        }

        // Advance

        let next = match &next_url {
            Some(next_url) => next_url.next_url(&page),
            None => None,
        };
        match next.and_then(|next| page.join(&next)) {
            Some(next) if !session.scrapable.accept(&next) => {
                log::warn!("Filtered offsite request to {next}");
            }
            Some(next) if seen.insert(next.clone()) => {
                log::debug!("Following pagination to: {next}");
                frontier.push_back(next);
            }
            Some(next) => log::info!("Already visited in this run, not following: {next}"),
            None => log::info!("No more pages to follow from {}", page.url),
        }
    }

    if outcome == Outcome::Exhausted && failure.is_some() {
        outcome = Outcome::Error;
    }
    finish(&mut session.sink, &alias)?;

    log::info!("Crawl of {alias} finished: {outcome:?}");
    log::info!(
        "Final stats - Requests: {}, Items: {}, Skipped pages: {}, Failed pages: {}",
        stats.requests,
        stats.items,
        stats.pages_skipped,
        stats.pages_failed
    );

    Ok(CrawlReport {
        alias,
        outcome,
        stats,
        written: session.sink.written().to_vec(),
        login_redirect,
        failure: if outcome == Outcome::Error { failure } else { None },
    })
}

fn finish(sink: &mut ChunkedSink, alias: &str) -> Result<(), CrawlError> {
    sink.finish().map_err(|source| CrawlError::Output {
        alias: alias.to_string(),
        source,
    })
}
