mod offline;
mod quotes;
mod registry;
mod selector;

pub use offline::{scrap_glob, scrap_page};
pub use quotes::{QuotesExtractor, QuotesNextUrl, QUOTES_NEXT_URL};
pub use registry::Registry;
pub use selector::{SelectorNextUrl, CSS_PREFIX};

pub use anyhow;
