use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::Result;
use crate::record::{RecordCodec, ZipRecord};
use crate::{corruption, Error};

/// Fixed prefix of every block: a 4-byte zero-padded ASCII record count,
/// then the prev and next RBN links, each right-aligned in 4 ASCII
/// characters so that -1 encodes as `"  -1"`.
pub const BLOCK_HEADER_SIZE: usize = 12;

/// One fixed-size block of the sequence set. A block whose record count is
/// zero is an availability block: its next link threads the free list and
/// the bytes after the header are meaningless.
#[derive(Debug, Clone)]
pub struct Block {
    block_size: usize,
    codec: RecordCodec,
    prev_rbn: i32,
    next_rbn: i32,
    records: Vec<ZipRecord>,
}

impl Block {
    /// An empty active block with unset links.
    pub fn new(block_size: usize, codec: RecordCodec) -> Self {
        Self {
            block_size,
            codec,
            prev_rbn: -1,
            next_rbn: -1,
            records: Vec::new(),
        }
    }

    /// Reads the block at `header_size + rbn * block_size`.
    pub fn read(
        file: &mut File,
        rbn: i32,
        header_size: usize,
        block_size: usize,
        codec: RecordCodec,
    ) -> Result<Self> {
        let offset = header_size as u64 + rbn as u64 * block_size as u64;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| Error::Io("seek to block", e))?;
        let mut buf = vec![0u8; block_size];
        file.read_exact(&mut buf)
            .map_err(|e| Error::Io("read block", e))?;
        Self::unpack(&buf, codec)
    }

    /// Writes the packed block image at `header_size + rbn * block_size`.
    pub fn write(&self, file: &mut File, rbn: i32, header_size: usize) -> Result<()> {
        let buf = self.pack()?;
        let offset = header_size as u64 + rbn as u64 * self.block_size as u64;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| Error::Io("seek to block", e))?;
        file.write_all(&buf)
            .map_err(|e| Error::Io("write block", e))?;
        Ok(())
    }

    /// Parses a block image. A stored count of zero marks an availability
    /// block and the record bytes are never decoded.
    pub fn unpack(buf: &[u8], codec: RecordCodec) -> Result<Self> {
        if buf.len() < BLOCK_HEADER_SIZE {
            return Err(Error::Format(
                "block header",
                format!("{} bytes is too short for a block", buf.len()),
            ));
        }
        let count = parse_header_field(&buf[0..4], "block record count")?;
        let prev_rbn = parse_header_field(&buf[4..8], "block prev link")?;
        let next_rbn = parse_header_field(&buf[8..12], "block next link")?;
        if count < 0 {
            return Err(Error::Format("block record count", count.to_string()));
        }

        let mut records = Vec::with_capacity(count as usize);
        let mut pos = BLOCK_HEADER_SIZE;
        for _ in 0..count {
            let (record, used) = codec.decode(&buf[pos..])?;
            records.push(record);
            pos += used;
        }

        Ok(Self {
            block_size: buf.len(),
            codec,
            prev_rbn,
            next_rbn,
            records,
        })
    }

    /// Renders the block as exactly `block_size` bytes, space-padded.
    pub fn pack(&self) -> Result<Vec<u8>> {
        let count = format!("{:04}", self.records.len());
        let prev = format!("{:>4}", self.prev_rbn);
        let next = format!("{:>4}", self.next_rbn);
        if count.len() != 4 || prev.len() != 4 || next.len() != 4 {
            return corruption!(
                "block header field out of range: count={} prev={} next={}",
                self.records.len(),
                self.prev_rbn,
                self.next_rbn
            );
        }

        let mut buf = Vec::with_capacity(self.block_size);
        buf.extend_from_slice(count.as_bytes());
        buf.extend_from_slice(prev.as_bytes());
        buf.extend_from_slice(next.as_bytes());
        for record in &self.records {
            buf.extend_from_slice(&self.codec.encode(record)?);
        }
        if buf.len() > self.block_size {
            return corruption!(
                "block holds {} bytes but the block size is {}",
                buf.len(),
                self.block_size
            );
        }
        buf.resize(self.block_size, b' ');
        Ok(buf)
    }

    /// Inserts the record in key order if its encoded form fits, cloning it
    /// into the block. Returns false without mutating when it does not fit
    /// or the key is already present.
    pub fn add_record(&mut self, record: &ZipRecord) -> bool {
        if self.used_space() + self.codec.encoded_len(record) > self.block_size {
            return false;
        }
        match self
            .records
            .binary_search_by(|r| r.zip.as_str().cmp(&record.zip))
        {
            Ok(_) => false,
            Err(idx) => {
                self.records.insert(idx, record.clone());
                true
            }
        }
    }

    /// Removes the record with the given key; reports whether one existed.
    pub fn remove_record(&mut self, key: &str) -> bool {
        match self.records.iter().position(|r| r.zip == key) {
            Some(idx) => {
                self.records.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Linear scan for a key; blocks hold tens of records at most.
    pub fn find_record(&self, key: &str) -> Option<&ZipRecord> {
        self.records.iter().find(|r| r.zip == key)
    }

    /// Splits off the upper half: this block keeps the lower floor(n/2)
    /// records, the returned block takes the rest and inherits this block's
    /// next link. Both prev links and this block's next link are the
    /// caller's to set.
    pub fn split(&mut self) -> Result<Block> {
        if self.records.len() < 2 {
            return corruption!(
                "cannot split a block holding {} record(s)",
                self.records.len()
            );
        }
        let mid = self.records.len() / 2;
        let upper = self.records.split_off(mid);
        let mut new_block = Block::new(self.block_size, self.codec);
        new_block.records = upper;
        new_block.next_rbn = self.next_rbn;
        Ok(new_block)
    }

    /// Absorbs the other block's records if the result fits.
    pub fn merge_with(&mut self, other: &Block) -> bool {
        let combined = self.used_space()
            + other
                .records
                .iter()
                .map(|r| self.codec.encoded_len(r))
                .sum::<usize>();
        if combined > self.block_size {
            return false;
        }
        self.records.extend(other.records.iter().cloned());
        self.records.sort_by(|a, b| a.zip.cmp(&b.zip));
        true
    }

    /// Drops all records; the caller threads the block into the free list
    /// by setting the next link.
    pub fn convert_to_avail(&mut self) {
        self.records.clear();
        self.prev_rbn = -1;
        self.next_rbn = -1;
    }

    pub fn highest_key(&self) -> Option<&str> {
        self.records.last().map(|r| r.zip.as_str())
    }

    pub fn lowest_key(&self) -> Option<&str> {
        self.records.first().map(|r| r.zip.as_str())
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[ZipRecord] {
        &self.records
    }

    pub fn prev_rbn(&self) -> i32 {
        self.prev_rbn
    }

    pub fn next_rbn(&self) -> i32 {
        self.next_rbn
    }

    pub fn set_prev_rbn(&mut self, rbn: i32) {
        self.prev_rbn = rbn;
    }

    pub fn set_next_rbn(&mut self, rbn: i32) {
        self.next_rbn = rbn;
    }

    pub fn used_space(&self) -> usize {
        BLOCK_HEADER_SIZE
            + self
                .records
                .iter()
                .map(|r| self.codec.encoded_len(r))
                .sum::<usize>()
    }

    pub fn available_space(&self) -> usize {
        self.block_size - self.used_space()
    }

    pub fn usage_percent(&self) -> f64 {
        100.0 * self.used_space() as f64 / self.block_size as f64
    }

    pub fn is_avail(&self) -> bool {
        self.records.is_empty()
    }
}

fn parse_header_field(buf: &[u8], what: &'static str) -> Result<i32> {
    let text = std::str::from_utf8(buf).map_err(|_| Error::Format(what, format!("{buf:?}")))?;
    text.trim()
        .parse()
        .map_err(|_| Error::Format(what, text.to_string()))
}
