//! Chromium backends, driven through the DevTools protocol.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    self, CookieParam, CookieSameSite, Headers, SetExtraHttpHeadersParams,
    SetUserAgentOverrideParams, TimeSinceEpoch,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::{Handler, Page as Tab};
use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::capture::LoginBrowser;
use crate::config::CrawlerConfig;
use crate::cookies::{Cookie, SameSite};
use crate::error::FetchError;
use crate::fetch::{FetchRequest, Fetcher, Page};
use crate::stealth::{INIT_SCRIPT, LAUNCH_ARGS};

/// Profile kept between login sessions.
pub const PROFILE_DIR: &str = "/tmp/lws-cookie-extraction";

/// A launched Chromium and the task pumping its protocol events.
pub struct ChromeSession {
    browser: Browser,
    handler: JoinHandle<()>,
    tab: Option<Tab>,
}

impl ChromeSession {
    /// Launches a visible browser on a persistent profile, for logging in.
    pub async fn headed(profile_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let config = BrowserConfig::builder()
            .with_head()
            .user_data_dir(profile_dir.as_ref())
            .args(LAUNCH_ARGS.iter().copied())
            .build()
            .map_err(|e| anyhow!("Invalid browser configuration: {e}"))?;
        Self::launch(config).await
    }

    /// Launches a headless browser, for rendering pages.
    pub async fn headless(request_timeout: Duration) -> anyhow::Result<Self> {
        let config = BrowserConfig::builder()
            .request_timeout(request_timeout)
            .args(LAUNCH_ARGS.iter().copied())
            .build()
            .map_err(|e| anyhow!("Invalid browser configuration: {e}"))?;
        Self::launch(config).await
    }

    async fn launch(config: BrowserConfig) -> anyhow::Result<Self> {
        let (browser, handler) = Browser::launch(config).await?;
        Ok(Self {
            browser,
            handler: spawn_handler(handler),
            tab: None,
        })
    }

    async fn stealth_tab(&self) -> anyhow::Result<Tab> {
        let tab = self.browser.new_page("about:blank").await?;
        tab.execute(AddScriptToEvaluateOnNewDocumentParams::new(INIT_SCRIPT))
            .await?;
        Ok(tab)
    }

    async fn shutdown(&mut self) -> anyhow::Result<()> {
        if let Some(tab) = self.tab.take() {
            tab.close().await?;
        }
        self.browser.close().await?;
        self.browser.wait().await?;
        self.handler.abort();
        Ok(())
    }
}

fn spawn_handler(mut handler: Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                log::debug!("Browser event error: {e}");
            }
        }
    })
}

#[async_trait]
impl LoginBrowser for ChromeSession {
    async fn open(&mut self, url: &str) -> anyhow::Result<()> {
        let tab = self.stealth_tab().await?;
        tab.goto(url).await?;
        self.tab = Some(tab);
        Ok(())
    }

    async fn cookies(&mut self) -> anyhow::Result<Vec<Cookie>> {
        // Storage level, the login may have ended on another host
        let cookies = self.browser.get_cookies().await?;
        Ok(cookies.into_iter().map(from_cdp).collect())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.shutdown().await
    }
}

fn from_cdp(c: network::Cookie) -> Cookie {
    Cookie {
        name: c.name,
        value: c.value,
        domain: c.domain,
        path: c.path,
        expires: if c.session { None } else { Some(c.expires) },
        http_only: c.http_only,
        secure: c.secure,
        same_site: c.same_site.map(|s| match s {
            CookieSameSite::Strict => SameSite::Strict,
            CookieSameSite::Lax => SameSite::Lax,
            CookieSameSite::None => SameSite::None,
        }),
    }
}

fn to_cdp(c: &Cookie) -> Result<CookieParam, String> {
    let mut builder = CookieParam::builder()
        .name(c.name.clone())
        .value(c.value.clone())
        .domain(c.domain.clone())
        .path(c.path.clone())
        .http_only(c.http_only)
        .secure(c.secure);
    if let Some(expires) = c.expires.filter(|e| *e > 0.0) {
        builder = builder.expires(TimeSinceEpoch::new(expires));
    }
    if let Some(same_site) = c.same_site {
        builder = builder.same_site(match same_site {
            SameSite::Strict => CookieSameSite::Strict,
            SameSite::Lax => CookieSameSite::Lax,
            SameSite::None => CookieSameSite::None,
        });
    }
    builder.build()
}

/// Renders pages in headless Chromium, for sites that need scripts to run.
pub struct BrowserFetcher {
    session: ChromeSession,
    cookies_set: bool,
}

impl BrowserFetcher {
    pub async fn launch(config: &CrawlerConfig) -> anyhow::Result<Self> {
        Ok(Self {
            session: ChromeSession::headless(config.request_timeout()).await?,
            cookies_set: false,
        })
    }

    async fn render(&mut self, request: &FetchRequest) -> anyhow::Result<(String, u16, String)> {
        if self.session.tab.is_none() {
            self.session.tab = Some(self.session.stealth_tab().await?);
        }
        let tab = self
            .session
            .tab
            .as_ref()
            .ok_or_else(|| anyhow!("Browser tab unavailable"))?;

        if let Some(ua) = request.headers.user_agent() {
            tab.execute(SetUserAgentOverrideParams::new(ua)).await?;
        }
        let extra = request
            .headers
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("user-agent"))
            .map(|(name, value)| (name.to_string(), serde_json::Value::from(value)))
            .collect::<serde_json::Map<_, _>>();
        tab.execute(SetExtraHttpHeadersParams::new(Headers::new(
            serde_json::Value::Object(extra),
        )))
        .await?;

        if !self.cookies_set {
            let cookies = request
                .cookies
                .iter()
                .map(to_cdp)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| anyhow!("Invalid cookie: {e}"))?;
            tab.set_cookies(cookies).await?;
            self.cookies_set = true;
        }

        tab.goto(request.url.as_str()).await?;
        let response = tab.wait_for_navigation_response().await?;
        let status = document_status(
            response.and_then(|req| req.response.as_ref().map(|response| response.status)),
        );
        let url = tab.url().await?.unwrap_or_else(|| request.url.clone());
        let body = tab.content().await?;
        Ok((url, status, body))
    }
}

// Documents without a network response, such as about: pages, count as 200.
fn document_status(status: Option<i64>) -> u16 {
    status.and_then(|s| u16::try_from(s).ok()).unwrap_or(200)
}

#[async_trait]
impl Fetcher for BrowserFetcher {
    async fn fetch(&mut self, request: &FetchRequest) -> Result<Page, FetchError> {
        let start = Instant::now();
        let (url, status, body) = self
            .render(request)
            .await
            .map_err(|cause| FetchError::Transport {
                url: request.url.clone(),
                cause,
            })?;
        Ok(Page {
            requested_url: request.url.clone(),
            url,
            status,
            body,
            latency: start.elapsed(),
        })
    }

    async fn close(&mut self) {
        if let Err(e) = self.session.shutdown().await {
            log::warn!("Could not close the browser: {e:#}");
        }
    }
}
