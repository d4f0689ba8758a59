use std::path::Path;
use std::time::Duration;

use lws_crawler::{Item, OnError, Page, Scrapable};

/// Applies the extractor of `scrapable` to a saved page, `location` standing
/// for the URL it was served from.
pub fn scrap_page(scrapable: &Scrapable, html: String, location: &str) -> anyhow::Result<Vec<Item>> {
    let page = Page {
        requested_url: location.to_string(),
        url: location.to_string(),
        status: 200,
        body: html,
        latency: Duration::ZERO,
    };
    scrapable.extractor.extract(&page)
}

fn file_location(path: &Path) -> String {
    let path = fs_err::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", path.display())
}

/// Scraps every file matching `pattern`, in path order.
pub fn scrap_glob(
    scrapable: &Scrapable,
    pattern: &str,
    on_error: OnError,
) -> anyhow::Result<Vec<Item>> {
    let mut items = vec![];
    let mut pages = 0;
    for path in glob::glob(pattern)? {
        let path = path?;
        if !path.is_file() {
            continue;
        }
        pages += 1;
        let scraped = fs_err::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|html| scrap_page(scrapable, html, &file_location(&path)));
        match scraped {
            Ok(mut scraped) => items.append(&mut scraped),
            Err(e) => match on_error {
                OnError::SkipAndLog => {
                    log::error!("Skipping page scrap for {} got: {e:#}", path.display());
                }
                OnError::Fail => {
                    return Err(e);
                }
            },
        }
    }
    log::info!("Scraped {} items from {pages} local page(s)", items.len());
    Ok(items)
}
