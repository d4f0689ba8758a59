use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use lws_crawler::{ConfigError, Extractor, NextUrl, NoItems, Scrapable, SiteConfig};

use crate::quotes::{QuotesExtractor, QuotesNextUrl, QUOTES_NEXT_URL};
use crate::selector::{SelectorNextUrl, CSS_PREFIX};

/// Pagination strategies by `next_url_func` name, extractors by alias.
#[derive(Clone, Default)]
pub struct Registry {
    next_urls: BTreeMap<String, Arc<dyn NextUrl>>,
    extractors: BTreeMap<String, Arc<dyn Extractor>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("next_urls", &self.next_urls.keys().collect::<Vec<_>>())
            .field("extractors", &self.extractors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    /// The strategies of every site supported out of the box.
    pub fn builtin() -> anyhow::Result<Self> {
        let mut registry = Self::default();
        registry
            .register_next_url(QUOTES_NEXT_URL, Arc::new(QuotesNextUrl::new()?))
            .register_extractor("quotes", Arc::new(QuotesExtractor::new()?));
        Ok(registry)
    }

    pub fn register_next_url(&mut self, name: &str, next_url: Arc<dyn NextUrl>) -> &mut Self {
        self.next_urls.insert(name.to_string(), next_url);
        self
    }

    pub fn register_extractor(&mut self, alias: &str, extractor: Arc<dyn Extractor>) -> &mut Self {
        self.extractors.insert(alias.to_string(), extractor);
        self
    }

    pub fn next_url_names(&self) -> impl Iterator<Item = &str> {
        self.next_urls.keys().map(String::as_str)
    }

    pub fn has_extractor(&self, alias: &str) -> bool {
        self.extractors.contains_key(alias)
    }

    pub fn next_url(&self, alias: &str, reference: &str) -> Result<Arc<dyn NextUrl>, ConfigError> {
        if let Some(css) = reference.strip_prefix(CSS_PREFIX) {
            let next_url =
                SelectorNextUrl::parse(css).map_err(|reason| ConfigError::InvalidSelector {
                    alias: alias.to_string(),
                    selector: css.to_string(),
                    reason,
                })?;
            return Ok(Arc::new(next_url));
        }
        self.next_urls
            .get(reference)
            .cloned()
            .ok_or_else(|| ConfigError::UnresolvedNextUrl {
                alias: alias.to_string(),
                reference: reference.to_string(),
            })
    }

    pub fn extractor(&self, alias: &str) -> Arc<dyn Extractor> {
        match self.extractors.get(alias) {
            Some(extractor) => extractor.clone(),
            None => {
                log::warn!("No extractor registered for {alias}, no item will be extracted");
                Arc::new(NoItems)
            }
        }
    }

    /// Validates `site` and binds it to its strategies.
    pub fn resolve(&self, site: &SiteConfig) -> Result<Scrapable, ConfigError> {
        site.validate()?;
        let scrapable = Scrapable::new(site.clone(), self.extractor(&site.alias));
        match site.next_url_func.as_deref().map(str::trim) {
            Some(reference) if !reference.is_empty() => {
                let next_url = self.next_url(&site.alias, reference)?;
                log::info!("Using next_url_func {reference} for {}", site.alias);
                Ok(scrapable.with_next_url(next_url))
            }
            _ => Ok(scrapable),
        }
    }
}
