use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use crate::error::Result;
use crate::Error;

/// The sidecar mapping from each active block's highest key to its RBN.
/// On disk: one `key,rbn` line per entry, ascending by key.
#[derive(Debug)]
pub struct SparseIndex {
    path: PathBuf,
    entries: BTreeMap<String, i32>,
}

impl SparseIndex {
    /// Loads the sidecar file; a missing file is an empty index.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut entries = BTreeMap::new();
        match fs::File::open(&path) {
            Ok(file) => {
                for line in BufReader::new(file).lines() {
                    let line = line.map_err(|e| Error::Io("read index", e))?;
                    if line.is_empty() {
                        continue;
                    }
                    let Some((key, rbn)) = line.split_once(',') else {
                        return Err(Error::Format("index entry", line));
                    };
                    let rbn = rbn
                        .parse()
                        .map_err(|_| Error::Format("index entry", line.clone()))?;
                    entries.insert(key.to_string(), rbn);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io("open index", e)),
        }
        Ok(Self { path, entries })
    }

    /// Creates an empty index, truncating any existing sidecar.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let index = Self {
            path: path.into(),
            entries: BTreeMap::new(),
        };
        index.save()?;
        Ok(index)
    }

    /// Rewrites the sidecar as a sorted listing. The listing goes to a
    /// temporary file that is renamed over the target.
    pub fn save(&self) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).map_err(|e| Error::Io("create index", e))?;
        for (key, rbn) in &self.entries {
            writeln!(file, "{key},{rbn}").map_err(|e| Error::Io("write index", e))?;
        }
        file.sync_all().map_err(|e| Error::Io("sync index", e))?;
        fs::rename(&tmp, &self.path).map_err(|e| Error::Io("rename index", e))?;
        Ok(())
    }

    /// The block that should hold `key`: the one whose highest key is the
    /// smallest value >= key, else the last block. None on an empty index.
    pub fn find_block_for(&self, key: &str) -> Option<i32> {
        self.entries
            .range(key.to_string()..)
            .next()
            .or_else(|| self.entries.iter().next_back())
            .map(|(_, &rbn)| rbn)
    }

    /// Applies a highest-key change for one block. A no-op when the key is
    /// unchanged.
    pub fn update(&mut self, old_highest: Option<&str>, new_highest: Option<&str>, rbn: i32) {
        if old_highest == new_highest {
            return;
        }
        if let Some(old) = old_highest {
            self.entries.remove(old);
        }
        if let Some(new) = new_highest {
            self.entries.insert(new.to_string(), rbn);
        }
    }

    pub fn insert(&mut self, key: &str, rbn: i32) {
        self.entries.insert(key.to_string(), rbn);
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i32)> {
        self.entries.iter().map(|(key, &rbn)| (key.as_str(), rbn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn two_block_index(dir: &TempDir) -> SparseIndex {
        let mut index = SparseIndex::create(dir.path().join("test.idx"))
            .expect("Failed to create index");
        index.insert("30301", 0);
        index.insert("70701", 1);
        index
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let index = SparseIndex::load(dir.path().join("absent.idx")).expect("Failed to load");
        assert!(index.is_empty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("test.idx");

        let index = two_block_index(&dir);
        index.save().expect("Failed to save");

        let listing = std::fs::read_to_string(&path).expect("Failed to read sidecar");
        assert_eq!(listing, "30301,0\n70701,1\n");

        let reloaded = SparseIndex::load(&path).expect("Failed to load");
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.find_block_for("30301"), Some(0));
    }

    #[test]
    fn test_find_block_for() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let index = two_block_index(&dir);

        // the covering block has the smallest highest key >= the target
        assert_eq!(index.find_block_for("10001"), Some(0));
        assert_eq!(index.find_block_for("30301"), Some(0));
        assert_eq!(index.find_block_for("30302"), Some(1));
        assert_eq!(index.find_block_for("70701"), Some(1));
        // past every highest key: the last block
        assert_eq!(index.find_block_for("99999"), Some(1));
    }

    #[test]
    fn test_find_block_for_empty() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let index = SparseIndex::create(dir.path().join("test.idx")).expect("Failed to create");
        assert_eq!(index.find_block_for("10001"), None);
    }

    #[test]
    fn test_update_replaces_entry() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut index = two_block_index(&dir);

        index.update(Some("30301"), Some("35000"), 0);
        assert_eq!(index.find_block_for("34000"), Some(0));
        assert_eq!(index.len(), 2);

        index.update(Some("70701"), None, 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_update_same_key_is_noop() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut index = SparseIndex::create(dir.path().join("test.idx")).expect("Failed to create");

        // must not insert a phantom entry by removing then re-adding
        index.update(Some("30301"), Some("30301"), 5);
        assert!(index.is_empty());
    }

    #[test]
    fn test_load_rejects_malformed_line() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("bad.idx");
        std::fs::write(&path, "30301,0\nnocomma\n").expect("Failed to write");
        assert!(matches!(
            SparseIndex::load(&path),
            Err(Error::Format("index entry", _))
        ));
    }
}
