//! Request disguise: rotated User-Agents, browser-like headers and the
//! script hiding automation flags from rendered pages.

use rand::seq::SliceRandom;
use rand::Rng;

pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.129 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.6045.159 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.129 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.129 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.6045.124 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.71 Safari/537.36",
];

/// Chromium flags used when launching the rendering and login browsers.
pub const LAUNCH_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-blink-features=AutomationControlled",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-renderer-backgrounding",
    "--disable-features=TranslateUI",
    "--disable-ipc-flooding-protection",
    "--disable-breakpad",
    "--disable-component-extensions-with-background-pages",
    "--disable-default-apps",
    "--disable-extensions",
    "--disable-sync",
    "--metrics-recording-only",
    "--no-first-run",
];

/// Evaluated before any page script runs.
pub const INIT_SCRIPT: &str = r#"
(() => {
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
    Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
    window.chrome = { runtime: {} };
    const originalQuery = window.navigator.permissions.query;
    window.navigator.permissions.query = (parameters) => (
        parameters.name === 'notifications'
            ? Promise.resolve({ state: Notification.permission })
            : originalQuery(parameters)
    );
    const getParameter = WebGLRenderingContext.prototype.getParameter;
    WebGLRenderingContext.prototype.getParameter = function (parameter) {
        if (parameter === 37445) return 'Intel Inc.';
        if (parameter === 37446) return 'Intel Iris OpenGL Engine';
        return getParameter.apply(this, arguments);
    };
})();
"#;

/// Headers sent with a single request, User-Agent included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StealthHeaders(Vec<(String, String)>);

impl StealthHeaders {
    /// Builds a fresh set of headers with a User-Agent drawn from `pool`.
    pub fn random<R: Rng + ?Sized>(rng: &mut R, pool: &[String]) -> Self {
        let language_q: f32 = rng.gen_range(0.8..=1.0);
        let mut headers = vec![
            (
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7".to_string(),
            ),
            ("Accept-Language", format!("en-US,en;q={language_q:.1}")),
            ("Accept-Encoding", "gzip, deflate".to_string()),
            ("DNT", "1".to_string()),
            ("Upgrade-Insecure-Requests", "1".to_string()),
            ("Sec-Fetch-Dest", "document".to_string()),
            ("Sec-Fetch-Mode", "navigate".to_string()),
            ("Sec-Fetch-Site", "none".to_string()),
            ("Sec-Fetch-User", "?1".to_string()),
            ("Cache-Control", "max-age=0".to_string()),
        ];
        let ua = pool
            .choose(rng)
            .cloned()
            .unwrap_or_else(|| USER_AGENTS[0].to_string());
        headers.push(("User-Agent", ua));

        Self(
            headers
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.get("User-Agent")
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn user_agent_from_pool() {
        let mut rng = StdRng::seed_from_u64(7);
        let pool = vec!["ua-1".to_string(), "ua-2".to_string()];
        for _ in 0..20 {
            let headers = StealthHeaders::random(&mut rng, &pool);
            let ua = headers.user_agent().unwrap();
            assert!(ua == "ua-1" || ua == "ua-2");
        }
    }

    #[test]
    fn empty_pool_falls_back() {
        let mut rng = StdRng::seed_from_u64(7);
        let headers = StealthHeaders::random(&mut rng, &[]);
        assert_eq!(headers.user_agent(), Some(USER_AGENTS[0]));
    }

    #[test]
    fn accept_language_quality() {
        let mut rng = StdRng::seed_from_u64(1);
        let headers = StealthHeaders::random(&mut rng, &[]);
        let lang = headers.get("accept-language").unwrap();
        assert!(lang.starts_with("en-US,en;q="));
    }
}
