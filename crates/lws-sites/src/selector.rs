use lws_crawler::{NextUrl, Page};
use scraper::{Html, Selector};

/// Prefix of `next_url_func` values handled by [`SelectorNextUrl`].
pub const CSS_PREFIX: &str = "css:";

/// Follows the first element matching a CSS selector.
///
/// The link is read from `href` unless the selector ends with
/// `::attr(<name>)`, as in `li.next a::attr(data-href)`.
#[derive(Debug, Clone)]
pub struct SelectorNextUrl {
    selector: Selector,
    attr: String,
}

impl SelectorNextUrl {
    pub fn parse(css: &str) -> Result<Self, String> {
        let css = css.trim();
        let (css, attr) = match css.strip_suffix(')').and_then(|s| s.rsplit_once("::attr(")) {
            Some((css, attr)) if !attr.trim().is_empty() => (css, attr.trim()),
            Some(_) => return Err("empty attribute name".to_string()),
            None => (css, "href"),
        };
        let selector = Selector::parse(css).map_err(|e| e.to_string())?;
        Ok(Self {
            selector,
            attr: attr.to_string(),
        })
    }

    pub fn attr(&self) -> &str {
        &self.attr
    }
}

impl NextUrl for SelectorNextUrl {
    fn next_url(&self, page: &Page) -> Option<String> {
        let html = Html::parse_document(&page.body);
        let link = html
            .select(&self.selector)
            .find_map(|el| el.value().attr(&self.attr))
            .map(str::trim)
            .filter(|link| !link.is_empty())?;
        page.join(link)
    }
}
