use std::collections::BTreeSet;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;

use crate::config::validate_alias;
use crate::cookies::{Cookie, CookieBundle};

/// A browser the operator logs in with.
#[async_trait]
pub trait LoginBrowser: Send {
    async fn open(&mut self, url: &str) -> anyhow::Result<()>;

    /// Every cookie of the browser, whatever its domain.
    async fn cookies(&mut self) -> anyhow::Result<Vec<Cookie>>;

    async fn close(&mut self) -> anyhow::Result<()>;
}

/// The human on the other side of the login page.
#[async_trait]
pub trait Operator: Send {
    /// Returns once the operator reports being logged in.
    async fn wait_for_login(&mut self, alias: &str, login_url: &str) -> anyhow::Result<()>;
}

/// Waits for Enter on stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinOperator;

#[async_trait]
impl Operator for StdinOperator {
    async fn wait_for_login(&mut self, alias: &str, login_url: &str) -> anyhow::Result<()> {
        let banner = "=".repeat(60);
        println!("\n{banner}");
        println!("Browser opened for {alias} at {login_url}");
        println!("1. Log in manually in the browser window");
        println!("2. Complete any 2FA or captcha challenge");
        println!("3. Come back here and press Enter");
        println!("{banner}\n");
        print!("Press Enter once you are logged in... ");
        io::stdout().flush()?;

        tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line).map(|_| ())
        })
        .await??;
        Ok(())
    }
}

/// Opens `login_url`, waits for the operator and saves the browser cookies
/// to `cookies_path`.
///
/// Returns `None` when the browser holds no cookie, in which case nothing is
/// written.
pub async fn capture_cookies<B, O>(
    browser: &mut B,
    operator: &mut O,
    alias: &str,
    login_url: &str,
    cookies_path: &Path,
) -> anyhow::Result<Option<PathBuf>>
where
    B: LoginBrowser + ?Sized,
    O: Operator + ?Sized,
{
    validate_alias(alias)?;
    log::info!("Opening login page for {alias}: {login_url}");

    let captured = async {
        browser.open(login_url).await?;
        operator.wait_for_login(alias, login_url).await?;
        browser.cookies().await
    }
    .await;
    if let Err(e) = browser.close().await {
        log::warn!("Could not close the login browser: {e:#}");
    }

    persist_capture(alias, CookieBundle(captured?), cookies_path)
}

/// Writes `cookies` unless empty, and logs what was captured.
pub fn persist_capture(
    alias: &str,
    cookies: CookieBundle,
    cookies_path: &Path,
) -> anyhow::Result<Option<PathBuf>> {
    if cookies.is_empty() {
        log::warn!("No cookies found for {alias}, make sure the login succeeded");
        return Ok(None);
    }

    cookies.save(cookies_path)?;
    log::info!(
        "Saved {} cookies for {alias} to {}",
        cookies.len(),
        cookies_path.display()
    );

    let now = Utc::now();
    for cookie in cookies.iter() {
        let expiry = match cookie.expires_at() {
            Some(at) if at <= now => format!("expired {}", at.format("%Y-%m-%d %H:%M")),
            Some(at) => format!("expires {}", at.format("%Y-%m-%d %H:%M")),
            None => "session".to_string(),
        };
        log::info!("  {}: {} ({expiry})", cookie.name, truncate(&cookie.value, 20));
    }
    let domains = cookies
        .iter()
        .map(|c| c.domain.as_str())
        .collect::<BTreeSet<_>>();
    log::info!(
        "Domains: {}",
        domains.into_iter().collect::<Vec<_>>().join(", ")
    );

    Ok(Some(cookies_path.to_path_buf()))
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() > max {
        format!("{}...", value.chars().take(max).collect::<String>())
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeBrowser {
        jar: Vec<Cookie>,
        opened: Option<String>,
        closed: bool,
    }

    #[async_trait]
    impl LoginBrowser for FakeBrowser {
        async fn open(&mut self, url: &str) -> anyhow::Result<()> {
            self.opened = Some(url.to_string());
            Ok(())
        }

        async fn cookies(&mut self) -> anyhow::Result<Vec<Cookie>> {
            Ok(self.jar.clone())
        }

        async fn close(&mut self) -> anyhow::Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Impatient {
        waited: usize,
        fail: bool,
    }

    #[async_trait]
    impl Operator for Impatient {
        async fn wait_for_login(&mut self, _alias: &str, _url: &str) -> anyhow::Result<()> {
            self.waited += 1;
            if self.fail {
                anyhow::bail!("stdin closed");
            }
            Ok(())
        }
    }

    fn cookie(name: &str) -> Cookie {
        Cookie {
            name: name.into(),
            value: "a-rather-long-session-token-value".into(),
            domain: ".toscrape.com".into(),
            path: "/".into(),
            expires: None,
            http_only: true,
            secure: false,
            same_site: None,
        }
    }

    #[tokio::test]
    async fn captured_cookies_are_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quotes_cookies.json");
        let mut browser = FakeBrowser {
            jar: vec![cookie("session"), cookie("csrftoken")],
            ..Default::default()
        };
        let mut operator = Impatient::default();

        let saved = capture_cookies(
            &mut browser,
            &mut operator,
            "quotes",
            "http://quotes.toscrape.com/login",
            &path,
        )
        .await
        .unwrap();

        assert_eq!(saved, Some(path.clone()));
        assert_eq!(operator.waited, 1);
        assert_eq!(browser.opened.as_deref(), Some("http://quotes.toscrape.com/login"));
        assert!(browser.closed);
        assert_eq!(CookieBundle::load(&path).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_jar_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quotes_cookies.json");
        let mut browser = FakeBrowser::default();

        let saved = capture_cookies(
            &mut browser,
            &mut Impatient::default(),
            "quotes",
            "http://quotes.toscrape.com/login",
            &path,
        )
        .await
        .unwrap();

        assert_eq!(saved, None);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn browser_closed_when_operator_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quotes_cookies.json");
        let mut browser = FakeBrowser {
            jar: vec![cookie("session")],
            ..Default::default()
        };
        let mut operator = Impatient {
            fail: true,
            ..Default::default()
        };

        let res = capture_cookies(&mut browser, &mut operator, "quotes", "http://q.com", &path).await;
        assert!(res.is_err());
        assert!(browser.closed);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn invalid_alias_opens_no_browser() {
        let dir = tempfile::tempdir().unwrap();
        let mut browser = FakeBrowser::default();
        let res = capture_cookies(
            &mut browser,
            &mut Impatient::default(),
            "../etc",
            "http://q.com",
            &dir.path().join("x.json"),
        )
        .await;
        assert!(res.is_err());
        assert!(browser.opened.is_none());
    }

    #[test]
    fn truncates_long_values() {
        assert_eq!(truncate("abc", 20), "abc");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
