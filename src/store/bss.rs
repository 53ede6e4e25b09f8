use std::fs::File;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::block::{Block, BLOCK_HEADER_SIZE};
use crate::config::StoreConfig;
use crate::error::Result;
use crate::header::FileHeader;
use crate::index::SparseIndex;
use crate::record::{self, RecordCodec, ZipRecord};
use crate::{corruption, Error};

/// A blocked sequence set store: one data file holding a padded text header
/// followed by fixed-size blocks linked in key order, plus a sidecar sparse
/// index mapping each active block's highest key to its RBN.
pub struct BssStore {
    pub(crate) file: File,
    pub(crate) header: FileHeader,
    pub(crate) index: SparseIndex,
    pub(crate) data_path: PathBuf,
}

impl BssStore {
    /// Creates a fresh store, truncating the data file and the sidecar.
    pub fn create(
        data_path: impl AsRef<Path>,
        index_path: impl AsRef<Path>,
        config: &StoreConfig,
    ) -> Result<Self> {
        let data_path = data_path.as_ref().to_path_buf();
        let index_name = index_path.as_ref().display().to_string();

        let file = File::options()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&data_path)
            .map_err(|e| Error::Io("create data file", e))?;

        let mut store = Self {
            file,
            header: FileHeader::new(&index_name, config),
            index: SparseIndex::create(index_path.as_ref())?,
            data_path,
        };
        store.header.write(&mut store.file)?;
        store
            .file
            .sync_all()
            .map_err(|e| Error::Io("sync data file", e))?;
        info!(
            path = %store.data_path.display(),
            block_size = config.block_size,
            "created store"
        );
        Ok(store)
    }

    /// Opens an existing store. A file left stale by a crashed mutation is
    /// refused unless `force` is set.
    pub fn open(
        data_path: impl AsRef<Path>,
        index_path: impl AsRef<Path>,
        force: bool,
    ) -> Result<Self> {
        let data_path = data_path.as_ref().to_path_buf();
        let mut file = File::options()
            .read(true)
            .write(true)
            .open(&data_path)
            .map_err(|e| Error::Io("open data file", e))?;
        let header = FileHeader::read(&mut file)?;
        if header.stale && !force {
            return Err(Error::Stale);
        }
        let index = SparseIndex::load(index_path.as_ref())?;
        Ok(Self {
            file,
            header,
            index,
            data_path,
        })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn index(&self) -> &SparseIndex {
        &self.index
    }

    fn codec(&self) -> RecordCodec {
        RecordCodec::new(self.header.record_size_bytes, self.header.size_format)
    }

    pub(crate) fn read_block(&mut self, rbn: i32) -> Result<Block> {
        if rbn < 0 || rbn >= self.header.block_count {
            return corruption!(
                "block {} out of range (block count {})",
                rbn,
                self.header.block_count
            );
        }
        let codec = self.codec();
        Block::read(
            &mut self.file,
            rbn,
            self.header.header_size,
            self.header.block_size,
            codec,
        )
    }

    fn write_block(&mut self, block: &Block, rbn: i32) -> Result<()> {
        block.write(&mut self.file, rbn, self.header.header_size)
    }

    /// Marks the header stale before the first block write of a mutation.
    fn begin_mutation(&mut self) -> Result<()> {
        self.header.stale = true;
        self.header.write(&mut self.file)
    }

    /// Persists the updated header, then the sidecar, then clears the stale
    /// mark.
    fn commit_mutation(&mut self) -> Result<()> {
        self.header.write(&mut self.file)?;
        self.index.save()?;
        self.header.stale = false;
        self.header.write(&mut self.file)?;
        self.file
            .sync_all()
            .map_err(|e| Error::Io("sync data file", e))?;
        Ok(())
    }

    /// Pops the availability list head, or appends a fresh block slot.
    fn alloc_block(&mut self) -> Result<i32> {
        let avail = self.header.avail_list_head;
        if avail >= 0 {
            let block = self.read_block(avail)?;
            if !block.is_avail() {
                return corruption!(
                    "availability list head {} holds {} record(s)",
                    avail,
                    block.record_count()
                );
            }
            self.header.avail_list_head = block.next_rbn();
            debug!(rbn = avail, "reusing block from availability list");
            Ok(avail)
        } else {
            let rbn = self.header.block_count;
            self.header.block_count += 1;
            Ok(rbn)
        }
    }

    /// Sorts the records by key and packs them greedily into a fresh chain
    /// of blocks starting at RBN 0. Any existing blocks are discarded.
    pub fn bulk_load(&mut self, mut records: Vec<ZipRecord>) -> Result<u64> {
        records.sort_by(|a, b| a.zip.cmp(&b.zip));
        if let Some(pair) = records.windows(2).find(|w| w[0].zip == w[1].zip) {
            return Err(Error::AlreadyExists(pair[0].zip.clone()));
        }

        self.begin_mutation()?;
        self.file
            .set_len(self.header.header_size as u64)
            .map_err(|e| Error::Io("truncate data file", e))?;
        self.index.clear();

        let codec = self.codec();
        let total = records.len() as u64;
        if total == 0 {
            self.header.record_count = 0;
            self.header.block_count = 0;
            self.header.active_list_head = -1;
            self.header.avail_list_head = -1;
            self.commit_mutation()?;
            return Ok(0);
        }

        let mut block = Block::new(self.header.block_size, codec);
        let mut rbn: i32 = 0;
        for record in &records {
            if block.add_record(record) {
                continue;
            }
            if block.record_count() == 0 {
                return Err(Error::Capacity {
                    needed: codec.encoded_len(record) + BLOCK_HEADER_SIZE,
                    block_size: self.header.block_size,
                });
            }
            // block is full: chain it forward and start the next one
            block.set_prev_rbn(rbn - 1);
            block.set_next_rbn(rbn + 1);
            if let Some(high) = block.highest_key() {
                self.index.insert(high, rbn);
            }
            self.write_block(&block, rbn)?;
            block = Block::new(self.header.block_size, codec);
            rbn += 1;
            if !block.add_record(record) {
                return Err(Error::Capacity {
                    needed: codec.encoded_len(record) + BLOCK_HEADER_SIZE,
                    block_size: self.header.block_size,
                });
            }
        }
        block.set_prev_rbn(rbn - 1);
        block.set_next_rbn(-1);
        if let Some(high) = block.highest_key() {
            self.index.insert(high, rbn);
        }
        self.write_block(&block, rbn)?;

        self.header.record_count = total;
        self.header.block_count = rbn + 1;
        self.header.active_list_head = 0;
        self.header.avail_list_head = -1;
        self.commit_mutation()?;
        info!(records = total, blocks = rbn + 1, "bulk load complete");
        Ok(total)
    }

    /// Parses a CSV stream (tolerating one leading column-header row) and
    /// bulk-loads the records.
    pub fn bulk_load_csv<R: BufRead>(&mut self, reader: R) -> Result<u64> {
        let records = record::read_csv(reader)?;
        self.bulk_load(records)
    }

    /// Point lookup by zip code.
    pub fn search(&mut self, key: &str) -> Result<Option<ZipRecord>> {
        let Some(rbn) = self.index.find_block_for(key) else {
            return Ok(None);
        };
        debug!(key, rbn, "search");
        let block = self.read_block(rbn)?;
        Ok(block.find_record(key).cloned())
    }

    /// Inserts a record, splitting the target block when it is full.
    pub fn insert(&mut self, record: ZipRecord) -> Result<()> {
        let key = record.zip.clone();
        if self.search(&key)?.is_some() {
            return Err(Error::AlreadyExists(key));
        }

        let codec = self.codec();
        let needed = codec.encoded_len(&record) + BLOCK_HEADER_SIZE;
        if needed > self.header.block_size {
            return Err(Error::Capacity {
                needed,
                block_size: self.header.block_size,
            });
        }

        self.begin_mutation()?;
        match self.index.find_block_for(&key) {
            None => {
                // empty store: this record opens the first active block
                let rbn = self.alloc_block()?;
                let mut block = Block::new(self.header.block_size, codec);
                block.add_record(&record);
                self.write_block(&block, rbn)?;
                self.header.active_list_head = rbn;
                self.index.insert(&key, rbn);
            }
            Some(rbn) => {
                let mut block = self.read_block(rbn)?;
                let old_highest = block.highest_key().map(str::to_string);
                if block.add_record(&record) {
                    self.write_block(&block, rbn)?;
                    self.index
                        .update(old_highest.as_deref(), block.highest_key(), rbn);
                } else {
                    self.split_insert(block, rbn, old_highest.as_deref(), &record)?;
                }
            }
        }
        self.header.record_count += 1;
        self.commit_mutation()?;
        Ok(())
    }

    /// Splits a full block and places the pending record in whichever half
    /// covers its key.
    fn split_insert(
        &mut self,
        mut block: Block,
        rbn: i32,
        old_highest: Option<&str>,
        record: &ZipRecord,
    ) -> Result<()> {
        let mut new_block = block.split()?;
        let new_rbn = self.alloc_block()?;

        let next = block.next_rbn();
        block.set_next_rbn(new_rbn);
        new_block.set_prev_rbn(rbn);
        new_block.set_next_rbn(next);
        if next >= 0 {
            let mut next_block = self.read_block(next)?;
            next_block.set_prev_rbn(new_rbn);
            self.write_block(&next_block, next)?;
        }

        let added = if block.highest_key().is_some_and(|high| record.zip.as_str() <= high) {
            block.add_record(record)
        } else {
            new_block.add_record(record)
        };
        if !added {
            return corruption!(
                "record {} fits neither half after splitting block {}",
                record.zip,
                rbn
            );
        }

        self.write_block(&block, rbn)?;
        self.write_block(&new_block, new_rbn)?;
        info!(rbn, new_rbn, "split block");

        self.index.update(old_highest, block.highest_key(), rbn);
        if let Some(high) = new_block.highest_key() {
            self.index.insert(high, new_rbn);
        }
        Ok(())
    }

    /// Removes the record with the given key. A block left empty is spliced
    /// out of the active chain and pushed onto the availability list.
    pub fn remove(&mut self, key: &str) -> Result<()> {
        let Some(rbn) = self.index.find_block_for(key) else {
            return Err(Error::NotFound(key.to_string()));
        };
        let mut block = self.read_block(rbn)?;
        let old_highest = block.highest_key().map(str::to_string);
        if !block.remove_record(key) {
            return Err(Error::NotFound(key.to_string()));
        }

        self.begin_mutation()?;
        if block.is_avail() {
            let prev = block.prev_rbn();
            let next = block.next_rbn();
            if prev >= 0 {
                let mut prev_block = self.read_block(prev)?;
                prev_block.set_next_rbn(next);
                self.write_block(&prev_block, prev)?;
            } else {
                self.header.active_list_head = next;
            }
            if next >= 0 {
                let mut next_block = self.read_block(next)?;
                next_block.set_prev_rbn(prev);
                self.write_block(&next_block, next)?;
            }

            block.convert_to_avail();
            block.set_next_rbn(self.header.avail_list_head);
            self.write_block(&block, rbn)?;
            self.header.avail_list_head = rbn;
            if let Some(old) = old_highest.as_deref() {
                self.index.remove(old);
            }
            info!(rbn, "block emptied, returned to availability list");
        } else {
            self.write_block(&block, rbn)?;
            self.index
                .update(old_highest.as_deref(), block.highest_key(), rbn);
        }
        self.header.record_count -= 1;
        self.commit_mutation()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tiny(zip: &str) -> ZipRecord {
        ZipRecord::new(zip, "X", "YY", "", 0.0, 0.0)
    }

    fn tiny_store(dir: &TempDir) -> BssStore {
        let config = StoreConfig::default().block_size(128).size_bytes(2);
        BssStore::create(
            dir.path().join("test.bss"),
            dir.path().join("test.idx"),
            &config,
        )
        .expect("Failed to create store")
    }

    #[test]
    fn test_insert_into_empty_store() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut store = tiny_store(&dir);

        store.insert(tiny("10001")).expect("Failed to insert");

        assert_eq!(store.header().block_count, 1);
        assert_eq!(store.header().record_count, 1);
        assert_eq!(store.header().active_list_head, 0);
        assert_eq!(
            store.search("10001").expect("Failed to search"),
            Some(tiny("10001"))
        );
    }

    #[test]
    fn test_bulk_load_empty_input() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut store = tiny_store(&dir);

        assert_eq!(store.bulk_load(Vec::new()).expect("Failed to load"), 0);
        assert_eq!(store.header().block_count, 0);
        assert_eq!(store.header().active_list_head, -1);
        assert_eq!(store.search("10001").expect("Failed to search"), None);
    }

    #[test]
    fn test_bulk_load_rejects_duplicates() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut store = tiny_store(&dir);

        let result = store.bulk_load(vec![tiny("10001"), tiny("10001")]);
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_bulk_load_sorts_input() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut store = tiny_store(&dir);

        store
            .bulk_load(vec![tiny("30301"), tiny("10001"), tiny("20001")])
            .expect("Failed to load");

        let block = store.read_block(0).expect("Failed to read block");
        let zips: Vec<&str> = block.records().iter().map(|r| r.zip.as_str()).collect();
        assert_eq!(zips, ["10001", "20001", "30301"]);
    }

    #[test]
    fn test_insert_oversized_record() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut store = tiny_store(&dir);

        let record = ZipRecord::new("10001", "C".repeat(200), "YY", "", 0.0, 0.0);
        assert!(matches!(
            store.insert(record),
            Err(Error::Capacity { .. })
        ));
        assert_eq!(store.header().record_count, 0);
    }

    #[test]
    fn test_remove_missing_key() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut store = tiny_store(&dir);
        store.bulk_load(vec![tiny("10001")]).expect("Failed to load");

        assert!(matches!(store.remove("99999"), Err(Error::NotFound(_))));
        assert_eq!(store.header().record_count, 1);
    }

    #[test]
    fn test_reopen_preserves_state() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let data = dir.path().join("test.bss");
        let idx = dir.path().join("test.idx");

        {
            let mut store = tiny_store(&dir);
            store
                .bulk_load(vec![tiny("10001"), tiny("20001")])
                .expect("Failed to load");
        }

        let mut store = BssStore::open(&data, &idx, false).expect("Failed to open");
        assert_eq!(store.header().record_count, 2);
        assert_eq!(
            store.search("20001").expect("Failed to search"),
            Some(tiny("20001"))
        );
    }
}
