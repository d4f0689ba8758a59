//! quotes.toscrape.com

use lws_crawler::{Extractor, Item, NextUrl, Page};
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Value};

pub const QUOTES_NEXT_URL: &str = "next_url_funcs.quote_next_url_func.quote_next_url";

fn css(selector: &str) -> anyhow::Result<Selector> {
    Selector::parse(selector).map_err(|e| anyhow::anyhow!("Invalid selector {selector:?}: {e}"))
}

/// Follows the pager's "Next" link.
#[derive(Debug, Clone)]
pub struct QuotesNextUrl {
    next: Selector,
}

impl QuotesNextUrl {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            next: css("li.next a")?,
        })
    }
}

impl NextUrl for QuotesNextUrl {
    fn next_url(&self, page: &Page) -> Option<String> {
        let html = Html::parse_document(&page.body);
        let href = html.select(&self.next).next()?.value().attr("href")?;
        page.join(href)
    }
}

/// One item per quote: text, author, tags and the page it was found on.
#[derive(Debug, Clone)]
pub struct QuotesExtractor {
    quote: Selector,
    text: Selector,
    author: Selector,
    tag: Selector,
}

impl QuotesExtractor {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            quote: css("div.quote")?,
            text: css("span.text")?,
            author: css("span small")?,
            tag: css("div.tags a.tag")?,
        })
    }

    fn first_text(&self, quote: ElementRef, selector: &Selector) -> Value {
        quote
            .select(selector)
            .next()
            .map(|el| Value::from(el.text().collect::<String>().trim()))
            .unwrap_or(Value::Null)
    }
}

impl Extractor for QuotesExtractor {
    fn extract(&self, page: &Page) -> anyhow::Result<Vec<Item>> {
        let html = Html::parse_document(&page.body);
        let items = html
            .select(&self.quote)
            .map(|quote| {
                let tags = quote
                    .select(&self.tag)
                    .map(|tag| tag.text().collect::<String>())
                    .collect::<Vec<_>>();

                let mut item = Item::new();
                item.insert("text".into(), self.first_text(quote, &self.text));
                item.insert("author".into(), self.first_text(quote, &self.author));
                item.insert("tags".into(), json!(tags));
                item.insert("url".into(), json!(page.url));
                item
            })
            .collect::<Vec<_>>();
        log::debug!("Found {} quotes on page: {}", items.len(), page.url);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const PAGE: &str = r#"
<html><body>
<div class="quote" itemscope itemtype="http://schema.org/CreativeWork">
    <span class="text" itemprop="text">“The world as we have created it is a process of our thinking.”</span>
    <span>by <small class="author" itemprop="author">Albert Einstein</small>
    <a href="/author/Albert-Einstein">(about)</a></span>
    <div class="tags">Tags:
        <a class="tag" href="/tag/change/page/1/">change</a>
        <a class="tag" href="/tag/thinking/page/1/">thinking</a>
    </div>
</div>
<div class="quote">
    <span class="text">“A day without sunshine is like, you know, night.”</span>
    <span>by <small class="author">Steve Martin</small></span>
    <div class="tags">Tags: </div>
</div>
<nav><ul class="pager">
    <li class="next"><a href="/page/2/">Next <span aria-hidden="true">&rarr;</span></a></li>
</ul></nav>
</body></html>
"#;

    fn page(body: &str) -> Page {
        Page {
            requested_url: "http://quotes.toscrape.com/".into(),
            url: "http://quotes.toscrape.com/".into(),
            status: 200,
            body: body.into(),
            latency: Duration::ZERO,
        }
    }

    #[test]
    fn extracts_quotes() {
        let items = QuotesExtractor::new().unwrap().extract(&page(PAGE)).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["author"], json!("Albert Einstein"));
        assert_eq!(items[0]["tags"], json!(["change", "thinking"]));
        assert_eq!(items[0]["url"], json!("http://quotes.toscrape.com/"));
        assert!(items[0]["text"].as_str().unwrap().starts_with("“The world"));
        assert_eq!(items[1]["tags"], json!([]));
    }

    #[test]
    fn next_page_is_absolute() {
        let next = QuotesNextUrl::new().unwrap();
        assert_eq!(
            next.next_url(&page(PAGE)).as_deref(),
            Some("http://quotes.toscrape.com/page/2/")
        );
        assert_eq!(next.next_url(&page("<ul class=\"pager\"></ul>")), None);
    }
}
