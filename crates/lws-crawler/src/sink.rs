use std::io;
use std::path::{Path, PathBuf};

use crate::scrapable::Item;

/// Writes scraped items as JSON arrays, either to a single `<output>.json`
/// or split every `chunk_size` items into `<output>_<n>.json` files.
///
/// Items are held in memory until [`ChunkedSink::flush`], which the crawl
/// driver calls before recording a page as scraped.
#[derive(Debug)]
pub struct ChunkedSink {
    base: PathBuf,
    chunk_size: usize,
    next_chunk: usize,
    /// Items of the chunk being filled, or every item of the single output
    buffer: Vec<Item>,
    /// Whether the single output of a previous run was merged into `buffer`
    merged: bool,
    dirty: bool,
    written: Vec<PathBuf>,
}

impl ChunkedSink {
    pub fn new(output_path: impl AsRef<Path>, chunk_size: usize) -> Self {
        let output_path = output_path.as_ref();
        let base = match output_path.extension() {
            Some(ext) if ext == "json" => output_path.with_extension(""),
            _ => output_path.to_path_buf(),
        };
        let next_chunk = if chunk_size > 0 {
            next_free_chunk(&base)
        } else {
            0
        };
        if next_chunk > 0 {
            log::info!(
                "Found {next_chunk} chunk file(s) from a previous run, continuing numbering"
            );
        }
        Self {
            base,
            chunk_size,
            next_chunk,
            buffer: Vec::new(),
            merged: false,
            dirty: false,
            written: Vec::new(),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn single_path(&self) -> PathBuf {
        with_suffix(&self.base, ".json")
    }

    pub fn chunk_path(&self, n: usize) -> PathBuf {
        with_suffix(&self.base, &format!("_{n}.json"))
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    pub fn push(&mut self, item: Item) -> io::Result<()> {
        self.buffer.push(item);
        self.dirty = true;
        if self.chunk_size > 0 && self.buffer.len() >= self.chunk_size {
            let path = self.chunk_path(self.next_chunk);
            self.save(&path)?;
            log::info!("Wrote {} items to {}", self.buffer.len(), path.display());
            self.buffer.clear();
            self.next_chunk += 1;
        }
        Ok(())
    }

    /// Puts every pushed item on disk. A partial chunk is written as it
    /// stands and keeps filling up afterwards.
    pub fn flush(&mut self) -> io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let path = if self.chunk_size > 0 {
            self.chunk_path(self.next_chunk)
        } else {
            self.merge_previous()?;
            self.single_path()
        };
        self.save(&path)?;
        log::debug!("Saved {} items to {}", self.buffer.len(), path.display());
        Ok(())
    }

    /// Flushes whatever is still buffered.
    pub fn finish(&mut self) -> io::Result<()> {
        if !self.dirty {
            log::debug!("No items left to write");
            return Ok(());
        }
        self.flush()?;
        if let Some(path) = self.written.last() {
            log::info!("Wrote {} items to {}", self.buffer.len(), path.display());
        }
        Ok(())
    }

    fn save(&mut self, path: &Path) -> io::Result<()> {
        write_items(path, &self.buffer)?;
        self.dirty = false;
        if !self.written.iter().any(|p| p == path) {
            self.written.push(path.to_path_buf());
        }
        Ok(())
    }

    // Items of an earlier run go first so a resumed run appends to them.
    fn merge_previous(&mut self) -> io::Result<()> {
        if self.merged {
            return Ok(());
        }
        let path = self.single_path();
        let mut items = match fs_err::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Vec<Item>>(&content) {
                Ok(previous) => {
                    log::info!(
                        "Appending to {} existing items in {}",
                        previous.len(),
                        path.display()
                    );
                    previous
                }
                Err(e) => {
                    let backup = with_suffix(&self.base, ".json.bak");
                    log::warn!(
                        "Existing output {} is not a JSON array ({e}), moved to {}",
                        path.display(),
                        backup.display()
                    );
                    fs_err::rename(&path, &backup)?;
                    Vec::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        items.append(&mut self.buffer);
        self.buffer = items;
        self.merged = true;
        Ok(())
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut s = base.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

fn next_free_chunk(base: &Path) -> usize {
    let dir = match base.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = match base.file_name().and_then(|n| n.to_str()) {
        Some(name) => format!("{name}_"),
        None => return 0,
    };
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter_map(|name| {
            name.strip_prefix(&prefix)?
                .strip_suffix(".json")?
                .parse::<usize>()
                .ok()
        })
        .map(|n| n + 1)
        .max()
        .unwrap_or(0)
}

fn write_items(path: &Path, items: &[Item]) -> io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            fs_err::create_dir_all(dir)?;
            log::info!("Created output directory: {}", dir.display());
        }
    }
    let json = serde_json::to_vec_pretty(items)?;
    let tmp = path.with_extension("json.tmp");
    fs_err::write(&tmp, json)?;
    fs_err::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(n: usize) -> Item {
        let mut item = Item::new();
        item.insert("n".into(), json!(n));
        item
    }

    fn read(path: &Path) -> Vec<Item> {
        serde_json::from_str(&fs_err::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn chunks_by_item_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = ChunkedSink::new(dir.path().join("quotes"), 10);
        for n in 0..25 {
            sink.push(item(n)).unwrap();
        }
        sink.finish().unwrap();

        let counts = sink
            .written()
            .iter()
            .map(|p| read(p).len())
            .collect::<Vec<_>>();
        assert_eq!(counts, vec![10, 10, 5]);
        assert_eq!(sink.written()[2], dir.path().join("quotes_2.json"));

        let all = sink.written().iter().flat_map(|p| read(p)).collect::<Vec<_>>();
        assert_eq!(all, (0..25).map(item).collect::<Vec<_>>());
    }

    #[test]
    fn single_file_without_chunking() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = ChunkedSink::new(dir.path().join("out").join("quotes.json"), 0);
        for n in 0..25 {
            sink.push(item(n)).unwrap();
        }
        assert!(sink.written().is_empty());
        sink.finish().unwrap();
        let path = dir.path().join("out").join("quotes.json");
        assert_eq!(sink.written(), &[path.clone()]);
        assert_eq!(read(&path).len(), 25);
    }

    #[test]
    fn resumed_single_file_appends() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("quotes");
        let mut first = ChunkedSink::new(&base, 0);
        first.push(item(1)).unwrap();
        first.finish().unwrap();

        let mut second = ChunkedSink::new(&base, 0);
        second.push(item(2)).unwrap();
        second.finish().unwrap();

        assert_eq!(read(&second.single_path()), vec![item(1), item(2)]);
    }

    #[test]
    fn resumed_chunks_continue_numbering() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("quotes");
        let mut first = ChunkedSink::new(&base, 2);
        for n in 0..3 {
            first.push(item(n)).unwrap();
        }
        first.finish().unwrap();
        assert_eq!(first.written().len(), 2);

        let mut second = ChunkedSink::new(&base, 2);
        second.push(item(3)).unwrap();
        second.finish().unwrap();
        assert_eq!(second.written(), &[dir.path().join("quotes_2.json")]);
    }

    #[test]
    fn flushed_items_survive_a_dropped_sink() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("quotes");
        {
            let mut sink = ChunkedSink::new(&base, 0);
            sink.push(item(1)).unwrap();
            sink.flush().unwrap();
            sink.push(item(2)).unwrap();
            sink.flush().unwrap();
            sink.push(item(3)).unwrap();
        }
        assert_eq!(read(&dir.path().join("quotes.json")), vec![item(1), item(2)]);

        let mut resumed = ChunkedSink::new(&base, 0);
        resumed.push(item(3)).unwrap();
        resumed.finish().unwrap();
        assert_eq!(read(&resumed.single_path()), vec![item(1), item(2), item(3)]);
    }

    #[test]
    fn flushed_chunk_keeps_filling() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = ChunkedSink::new(dir.path().join("quotes"), 3);
        sink.push(item(0)).unwrap();
        sink.push(item(1)).unwrap();
        sink.flush().unwrap();
        assert_eq!(read(&sink.chunk_path(0)), vec![item(0), item(1)]);

        sink.push(item(2)).unwrap();
        sink.push(item(3)).unwrap();
        assert_eq!(read(&sink.chunk_path(0)).len(), 3);
        assert!(!sink.chunk_path(1).exists());

        sink.flush().unwrap();
        sink.finish().unwrap();
        assert_eq!(read(&sink.chunk_path(1)), vec![item(3)]);
        assert_eq!(sink.written(), &[sink.chunk_path(0), sink.chunk_path(1)]);
        assert!(!dir.path().join("quotes_1.json.tmp").exists());
    }

    #[test]
    fn nothing_written_without_items() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = ChunkedSink::new(dir.path().join("quotes"), 0);
        sink.finish().unwrap();
        assert!(!sink.single_path().exists());
    }
}
