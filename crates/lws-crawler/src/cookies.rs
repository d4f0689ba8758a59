use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// A browser cookie, in the format exported by Chromium based tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Epoch seconds, absent or negative for session cookies
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub same_site: Option<SameSite>,
}

fn default_path() -> String {
    String::from("/")
}

impl Cookie {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires
            .filter(|e| *e > 0.0)
            .and_then(|e| DateTime::from_timestamp(e as i64, 0))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().map(|at| at <= now).unwrap_or(false)
    }

    /// Whether a browser would send this cookie along a request to `url`.
    pub fn matches(&self, url: &Url) -> bool {
        let host = match url.host_str() {
            Some(host) => host.to_ascii_lowercase(),
            None => return false,
        };
        if self.secure && url.scheme() != "https" {
            return false;
        }

        let domain = self.domain.to_ascii_lowercase();
        let domain_ok = match domain.strip_prefix('.') {
            Some(parent) => host == parent || host.ends_with(&format!(".{parent}")),
            None => host == domain,
        };

        let path = url.path();
        let path_ok = path == self.path
            || (path.starts_with(&self.path)
                && (self.path.ends_with('/') || path[self.path.len()..].starts_with('/')));

        domain_ok && path_ok
    }
}

/// Session credentials captured for one alias.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CookieBundle(pub Vec<Cookie>);

impl CookieBundle {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = fs_err::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs_err::create_dir_all(dir)?;
        }
        fs_err::write(path, serde_json::to_string_pretty(&self.0)?)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.0.iter()
    }

    pub fn expired(&self, now: DateTime<Utc>) -> Vec<&Cookie> {
        self.0.iter().filter(|c| c.is_expired(now)).collect()
    }

    /// The `Cookie` header value for a request to `url`, if any cookie applies.
    pub fn header_for(&self, url: &Url, now: DateTime<Utc>) -> Option<String> {
        let pairs = self
            .0
            .iter()
            .filter(|c| !c.is_expired(now) && c.matches(url))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>();
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str, domain: &str, path: &str) -> Cookie {
        Cookie {
            name: name.into(),
            value: format!("{name}-value"),
            domain: domain.into(),
            path: path.into(),
            expires: None,
            http_only: false,
            secure: false,
            same_site: None,
        }
    }

    #[test]
    fn parses_exported_format() {
        let json = r#"[{
            "name": "session", "value": "abc", "domain": "quotes.toscrape.com",
            "path": "/", "expires": -1, "httpOnly": true, "secure": false, "sameSite": "Lax"
        }]"#;
        let bundle: CookieBundle = serde_json::from_str(json).unwrap();
        let c = &bundle.0[0];
        assert!(c.http_only);
        assert_eq!(c.same_site, Some(SameSite::Lax));
        assert_eq!(c.expires_at(), None);
    }

    #[test]
    fn domain_and_path_matching() {
        let url = Url::parse("https://www.example.com/account/orders").unwrap();
        assert!(cookie("a", ".example.com", "/").matches(&url));
        assert!(cookie("b", "www.example.com", "/account").matches(&url));
        assert!(!cookie("c", "example.com", "/").matches(&url));
        assert!(!cookie("d", "www.example.com", "/acc").matches(&url));
        assert!(!cookie("e", ".other.com", "/").matches(&url));
    }

    #[test]
    fn secure_cookie_needs_https() {
        let mut c = cookie("s", "example.com", "/");
        c.secure = true;
        assert!(!c.matches(&Url::parse("http://example.com/").unwrap()));
        assert!(c.matches(&Url::parse("https://example.com/").unwrap()));
    }

    #[test]
    fn header_skips_expired() {
        let now = Utc::now();
        let mut old = cookie("old", "example.com", "/");
        old.expires = Some((now.timestamp() - 10) as f64);
        let fresh = cookie("fresh", "example.com", "/");
        let bundle = CookieBundle(vec![old, fresh]);
        let url = Url::parse("http://example.com/page/2/").unwrap();
        assert_eq!(
            bundle.header_for(&url, now).as_deref(),
            Some("fresh=fresh-value")
        );
        assert_eq!(bundle.expired(now).len(), 1);
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("quotes_cookies.json");
        let bundle = CookieBundle(vec![cookie("a", "example.com", "/")]);
        bundle.save(&path).unwrap();
        assert_eq!(CookieBundle::load(&path).unwrap(), bundle);
    }
}
