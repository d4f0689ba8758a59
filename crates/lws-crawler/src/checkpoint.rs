//! Per alias record of the pages already scraped, persisted after every
//! update so that an interrupted crawl resumes where it stopped.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

/// Visited pages of one alias, backed by a JSON list on disk.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    path: PathBuf,
    pages: HashSet<String>,
}

impl Checkpoint {
    pub fn path_for(progress_dir: &Path, alias: &str) -> PathBuf {
        progress_dir.join(format!("{alias}_scraped_pages.json"))
    }

    /// Reads the checkpoint of `alias`, an absent or unreadable file gives an
    /// empty checkpoint.
    pub fn load(progress_dir: &Path, alias: &str) -> Self {
        let path = Self::path_for(progress_dir, alias);
        let pages = match fs_err::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Vec<String>>(&content) {
                Ok(pages) => {
                    log::info!("Loaded checkpoint: {} pages already scraped", pages.len());
                    pages.into_iter().collect()
                }
                Err(e) => {
                    log::warn!(
                        "Could not load checkpoint file {}: {e}, starting from scratch",
                        path.display()
                    );
                    set_aside(&path);
                    HashSet::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No checkpoint at {}", path.display());
                HashSet::new()
            }
            Err(e) => {
                log::warn!("Could not read checkpoint: {e}, starting from scratch");
                HashSet::new()
            }
        };
        Self { path, pages }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, url: &str) -> bool {
        self.pages.contains(url)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Adds `url` and flushes the whole set to disk before returning.
    /// Returns false when `url` was already recorded, nothing is written then.
    pub fn record(&mut self, url: &str) -> io::Result<bool> {
        if self.pages.contains(url) {
            return Ok(false);
        }
        self.pages.insert(url.to_string());
        if let Err(e) = self.flush() {
            self.pages.remove(url);
            return Err(e);
        }
        log::debug!("Saved checkpoint: {} pages scraped", self.pages.len());
        Ok(true)
    }

    fn flush(&self) -> io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs_err::create_dir_all(dir)?;
        }
        let mut pages = self.pages.iter().collect::<Vec<_>>();
        pages.sort();
        let json = serde_json::to_string(&pages)?;

        let tmp = self.path.with_extension("json.tmp");
        fs_err::write(&tmp, json)?;
        fs_err::rename(&tmp, &self.path)
    }
}

// Keeps a corrupt file around so the next flush doesn't erase the evidence.
fn set_aside(path: &Path) {
    let corrupt = path.with_extension("json.corrupt");
    match fs_err::rename(path, &corrupt) {
        Ok(()) => log::warn!("Corrupt checkpoint moved to {}", corrupt.display()),
        Err(e) => log::error!("Couldn't move corrupt checkpoint aside: {e}"),
    }
}

/// Checkpoints of several aliases sharing one progress directory.
#[derive(Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
    loaded: HashMap<String, Checkpoint>,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            loaded: HashMap::new(),
        }
    }

    pub fn load(&mut self, alias: &str) -> &Checkpoint {
        self.checkpoint(alias)
    }

    pub fn contains(&mut self, alias: &str, url: &str) -> bool {
        self.checkpoint(alias).contains(url)
    }

    pub fn record(&mut self, alias: &str, url: &str) -> io::Result<bool> {
        self.checkpoint(alias).record(url)
    }

    /// Hands the loaded checkpoint of `alias` over to a crawl session.
    pub fn take(&mut self, alias: &str) -> Checkpoint {
        self.loaded
            .remove(alias)
            .unwrap_or_else(|| Checkpoint::load(&self.dir, alias))
    }

    fn checkpoint(&mut self, alias: &str) -> &mut Checkpoint {
        let dir = &self.dir;
        self.loaded
            .entry(alias.to_string())
            .or_insert_with(|| Checkpoint::load(dir, alias))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cp = Checkpoint::load(dir.path(), "quotes");
        assert!(cp.is_empty());
        assert!(!cp.path().exists());
    }

    #[test]
    fn record_is_durable() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CheckpointStore::new(dir.path());
        assert!(store.record("quotes", "http://q.com/page/1/").unwrap());

        let reloaded = Checkpoint::load(dir.path(), "quotes");
        assert!(reloaded.contains("http://q.com/page/1/"));
    }

    #[test]
    fn record_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut cp = Checkpoint::load(dir.path(), "quotes");
        assert!(cp.record("http://q.com/").unwrap());
        let first = fs_err::read_to_string(cp.path()).unwrap();
        assert!(!cp.record("http://q.com/").unwrap());
        let second = fs_err::read_to_string(cp.path()).unwrap();
        assert_eq!(first, second);

        let pages: Vec<String> = serde_json::from_str(&second).unwrap();
        assert_eq!(pages, vec!["http://q.com/"]);
    }

    #[test]
    fn membership() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CheckpointStore::new(dir.path());
        let urls = ["http://q.com/a", "http://q.com/b", "http://q.com/c"];
        for url in urls {
            store.record("quotes", url).unwrap();
        }
        for url in urls {
            assert!(store.contains("quotes", url));
        }
        assert!(!store.contains("quotes", "http://q.com/d"));
        assert!(!store.contains("other", "http://q.com/a"));
    }

    #[test]
    fn aliases_are_isolated_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CheckpointStore::new(dir.path());
        store.record("a", "http://x.com/").unwrap();
        store.record("b", "http://y.com/").unwrap();

        let mut fresh = CheckpointStore::new(dir.path());
        assert!(fresh.contains("a", "http://x.com/"));
        assert!(!fresh.contains("a", "http://y.com/"));
        assert_eq!(fresh.load("b").len(), 1);
    }

    #[test]
    fn corrupt_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = Checkpoint::path_for(dir.path(), "quotes");
        fs_err::write(&path, "{not json").unwrap();

        let mut cp = Checkpoint::load(dir.path(), "quotes");
        assert!(cp.is_empty());
        assert!(path.with_extension("json.corrupt").exists());

        cp.record("http://q.com/").unwrap();
        assert_eq!(Checkpoint::load(dir.path(), "quotes").len(), 1);
    }

    #[test]
    fn creates_progress_dir() {
        let dir = tempfile::tempdir().unwrap();
        let progress = dir.path().join(".scrapy");
        let mut cp = Checkpoint::load(&progress, "quotes");
        cp.record("http://q.com/").unwrap();
        assert!(progress.join("quotes_scraped_pages.json").exists());
    }
}
