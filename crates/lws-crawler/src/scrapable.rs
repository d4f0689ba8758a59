use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::config::SiteConfig;
use crate::fetch::Page;

/// One scraped record, fields are site specific.
pub type Item = serde_json::Map<String, serde_json::Value>;

/// Pagination strategy of a site: the page to visit after `page`, if any.
pub trait NextUrl: Send + Sync {
    fn next_url(&self, page: &Page) -> Option<String>;
}

impl<F> NextUrl for F
where
    F: Fn(&Page) -> Option<String> + Send + Sync,
{
    fn next_url(&self, page: &Page) -> Option<String> {
        self(page)
    }
}

/// Site specific extraction of the records held by a page.
pub trait Extractor: Send + Sync {
    fn extract(&self, page: &Page) -> anyhow::Result<Vec<Item>>;
}

impl<F> Extractor for F
where
    F: Fn(&Page) -> anyhow::Result<Vec<Item>> + Send + Sync,
{
    fn extract(&self, page: &Page) -> anyhow::Result<Vec<Item>> {
        self(page)
    }
}

/// Fallback for sites without a dedicated extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoItems;

impl Extractor for NoItems {
    fn extract(&self, page: &Page) -> anyhow::Result<Vec<Item>> {
        log::warn!(
            "No extractor registered for this website, nothing extracted from {}",
            page.url
        );
        Ok(vec![])
    }
}

/// A configured site with its pagination and extraction resolved.
#[derive(Clone)]
pub struct Scrapable {
    pub site: SiteConfig,
    pub next_url: Option<Arc<dyn NextUrl>>,
    pub extractor: Arc<dyn Extractor>,
}

impl fmt::Debug for Scrapable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scrapable")
            .field("site", &self.site)
            .field("next_url", &self.next_url.as_ref().map(|_| "<NextUrl>"))
            .finish()
    }
}

impl Scrapable {
    pub fn new(site: SiteConfig, extractor: Arc<dyn Extractor>) -> Self {
        Self {
            site,
            next_url: None,
            extractor,
        }
    }

    pub fn with_next_url(mut self, next_url: Arc<dyn NextUrl>) -> Self {
        self.next_url = Some(next_url);
        self
    }

    pub fn alias(&self) -> &str {
        &self.site.alias
    }

    /// Whether `url` belongs to the site's allowed domains, or any domain
    /// when none are configured.
    pub fn accept(&self, url: &str) -> bool {
        if self.site.allowed_domains.is_empty() {
            return true;
        }
        let host = match Url::parse(url).ok().and_then(|u| u.host_str().map(String::from)) {
            Some(host) => host.to_ascii_lowercase(),
            None => return false,
        };
        self.site.allowed_domains.iter().any(|domain| {
            let domain = domain.trim_start_matches('.').to_ascii_lowercase();
            host == domain || host.ends_with(&format!(".{domain}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(allowed: &[&str]) -> Scrapable {
        let site = SiteConfig {
            alias: "quotes".into(),
            login_url: "http://quotes.toscrape.com/login".into(),
            start_url: "http://quotes.toscrape.com/".into(),
            next_url_func: None,
            output_path: None,
            chunked_size: 0,
            allowed_domains: allowed.iter().map(|d| d.to_string()).collect(),
            speed_override: Default::default(),
        };
        Scrapable::new(site, Arc::new(NoItems))
    }

    #[test]
    fn accepts_any_domain_when_unrestricted() {
        assert!(site(&[]).accept("https://anywhere.org/x"));
    }

    #[test]
    fn accepts_allowed_domains_and_subdomains() {
        let s = site(&["toscrape.com"]);
        assert!(s.accept("http://quotes.toscrape.com/page/2/"));
        assert!(s.accept("http://toscrape.com/"));
        assert!(!s.accept("http://nottoscrape.com/"));
        assert!(!s.accept("not a url"));
    }

    #[test]
    fn closures_are_strategies() {
        let next: Arc<dyn NextUrl> = Arc::new(|_: &Page| Some("http://x.com/2".to_string()));
        let page = Page {
            requested_url: "http://x.com/1".into(),
            url: "http://x.com/1".into(),
            status: 200,
            body: String::new(),
            latency: Default::default(),
        };
        assert_eq!(next.next_url(&page).as_deref(), Some("http://x.com/2"));
    }
}
