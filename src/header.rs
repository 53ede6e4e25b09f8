use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use crate::config::StoreConfig;
use crate::error::Result;
use crate::record::SizeFormat;
use crate::Error;

/// Tag identifying the file format.
pub const FILE_STRUCTURE: &str = "blocked_sequence_set_comma_separated_length_indicated";

/// Current format version.
pub const VERSION: u32 = 1;

// Headers are padded to a multiple of this so block offsets stay cheap to
// compute, with slack so counter growth never overflows the reserved region.
const HEADER_ALIGN: usize = 512;
const HEADER_PAD: usize = 100;

// First read when parsing; re-read if HEADER_SIZE turns out larger.
const HEADER_ESTIMATE: usize = 1024;

/// The self-describing text header at file offset 0: `KEY=VALUE` lines in a
/// fixed order, right-padded with spaces to `header_size` bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct FileHeader {
    pub file_structure: String,
    pub version: u32,
    pub header_size: usize,
    pub record_size_bytes: usize,
    pub size_format: SizeFormat,
    pub block_size: usize,
    pub min_block_capacity: f64,
    pub index_file: String,
    pub index_schema: String,
    pub record_count: u64,
    pub block_count: i32,
    /// Name and type of each record field, in declaration order.
    pub fields: Vec<(String, String)>,
    pub primary_key_field: usize,
    pub avail_list_head: i32,
    pub active_list_head: i32,
    pub stale: bool,
}

impl FileHeader {
    /// A fresh header for the six-field zip code schema, with its reserved
    /// size already computed.
    pub fn new(index_file: &str, config: &StoreConfig) -> Self {
        let mut header = Self {
            file_structure: FILE_STRUCTURE.to_string(),
            version: VERSION,
            header_size: 0,
            record_size_bytes: config.size_bytes,
            size_format: config.size_format,
            block_size: config.block_size,
            min_block_capacity: config.min_block_capacity,
            index_file: index_file.to_string(),
            index_schema: "key,rbn".to_string(),
            record_count: 0,
            block_count: 0,
            fields: vec![
                ("ZipCode".to_string(), "string".to_string()),
                ("City".to_string(), "string".to_string()),
                ("State".to_string(), "string".to_string()),
                ("County".to_string(), "string".to_string()),
                ("Latitude".to_string(), "double".to_string()),
                ("Longitude".to_string(), "double".to_string()),
            ],
            primary_key_field: 0,
            avail_list_head: -1,
            active_list_head: -1,
            stale: false,
        };
        header.header_size = header.compute_size();
        header
    }

    /// Renders the `KEY=VALUE` lines in their fixed order, unpadded.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("FILE_STRUCTURE={}\n", self.file_structure));
        out.push_str(&format!("VERSION={}\n", self.version));
        out.push_str(&format!("HEADER_SIZE={}\n", self.header_size));
        out.push_str(&format!("RECORD_SIZE_BYTES={}\n", self.record_size_bytes));
        out.push_str(&format!("SIZE_FORMAT={}\n", self.size_format.as_str()));
        out.push_str(&format!("BLOCK_SIZE={}\n", self.block_size));
        out.push_str(&format!("MIN_BLOCK_CAPACITY={}\n", self.min_block_capacity));
        out.push_str(&format!("INDEX_FILE={}\n", self.index_file));
        out.push_str(&format!("INDEX_SCHEMA={}\n", self.index_schema));
        out.push_str(&format!("RECORD_COUNT={}\n", self.record_count));
        out.push_str(&format!("BLOCK_COUNT={}\n", self.block_count));
        out.push_str(&format!("FIELDS_PER_RECORD={}\n", self.fields.len()));
        for (i, (name, kind)) in self.fields.iter().enumerate() {
            out.push_str(&format!("FIELD_{i}_NAME={name}\n"));
            out.push_str(&format!("FIELD_{i}_TYPE={kind}\n"));
        }
        out.push_str(&format!("PRIMARY_KEY_FIELD={}\n", self.primary_key_field));
        out.push_str(&format!("AVAIL_LIST_HEAD={}\n", self.avail_list_head));
        out.push_str(&format!("ACTIVE_LIST_HEAD={}\n", self.active_list_head));
        out.push_str(&format!("STALE_FLAG={}\n", self.stale as u8));
        out
    }

    /// Smallest multiple of 512 covering the rendered header plus slack.
    pub fn compute_size(&self) -> usize {
        (self.render().len() + HEADER_PAD).div_ceil(HEADER_ALIGN) * HEADER_ALIGN
    }

    /// Writes the header at offset 0, space-padded to `header_size`.
    pub fn write(&self, file: &mut File) -> Result<()> {
        let mut text = self.render();
        if text.len() > self.header_size {
            return Err(Error::Format(
                "file header",
                format!(
                    "rendered header of {} bytes exceeds the reserved {}",
                    text.len(),
                    self.header_size
                ),
            ));
        }
        text.push_str(&" ".repeat(self.header_size - text.len()));
        file.seek(SeekFrom::Start(0))
            .map_err(|e| Error::Io("seek to header", e))?;
        file.write_all(text.as_bytes())
            .map_err(|e| Error::Io("write header", e))?;
        Ok(())
    }

    /// Reads and parses the header, leaving the file cursor positioned at
    /// `header_size` (the start of block 0).
    pub fn read(file: &mut File) -> Result<Self> {
        file.seek(SeekFrom::Start(0))
            .map_err(|e| Error::Io("seek to header", e))?;
        let mut buf = vec![0u8; HEADER_ESTIMATE];
        let n = read_up_to(file, &mut buf)?;
        let mut header = Self::parse(&buf[..n])?;

        // A header larger than the estimate needs a second, full read.
        if header.header_size > n {
            file.seek(SeekFrom::Start(0))
                .map_err(|e| Error::Io("seek to header", e))?;
            let mut buf = vec![0u8; header.header_size];
            file.read_exact(&mut buf)
                .map_err(|e| Error::Io("read header", e))?;
            header = Self::parse(&buf)?;
        }

        file.seek(SeekFrom::Start(header.header_size as u64))
            .map_err(|e| Error::Io("seek past header", e))?;
        Ok(header)
    }

    fn parse(buf: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(buf);
        let mut header = Self {
            file_structure: String::new(),
            version: 0,
            header_size: 0,
            record_size_bytes: 4,
            size_format: SizeFormat::Ascii,
            block_size: 512,
            min_block_capacity: 0.5,
            index_file: String::new(),
            index_schema: String::new(),
            record_count: 0,
            block_count: 0,
            fields: Vec::new(),
            primary_key_field: 0,
            avail_list_head: -1,
            active_list_head: -1,
            stale: false,
        };

        for line in text.lines() {
            let Some((key, value)) = line.trim_end().split_once('=') else {
                continue;
            };
            match key {
                "FILE_STRUCTURE" => header.file_structure = value.to_string(),
                "VERSION" => header.version = parse_num(value, "header VERSION")?,
                "HEADER_SIZE" => header.header_size = parse_num(value, "header HEADER_SIZE")?,
                "RECORD_SIZE_BYTES" => {
                    header.record_size_bytes = parse_num(value, "header RECORD_SIZE_BYTES")?
                }
                "SIZE_FORMAT" => header.size_format = SizeFormat::parse(value)?,
                "BLOCK_SIZE" => header.block_size = parse_num(value, "header BLOCK_SIZE")?,
                "MIN_BLOCK_CAPACITY" => {
                    header.min_block_capacity = parse_num(value, "header MIN_BLOCK_CAPACITY")?
                }
                "INDEX_FILE" => header.index_file = value.to_string(),
                "INDEX_SCHEMA" => header.index_schema = value.to_string(),
                "RECORD_COUNT" => header.record_count = parse_num(value, "header RECORD_COUNT")?,
                "BLOCK_COUNT" => header.block_count = parse_num(value, "header BLOCK_COUNT")?,
                "FIELDS_PER_RECORD" => {
                    let n: usize = parse_num(value, "header FIELDS_PER_RECORD")?;
                    header.fields = vec![(String::new(), String::new()); n];
                }
                "PRIMARY_KEY_FIELD" => {
                    header.primary_key_field = parse_num(value, "header PRIMARY_KEY_FIELD")?
                }
                "AVAIL_LIST_HEAD" => {
                    header.avail_list_head = parse_num(value, "header AVAIL_LIST_HEAD")?
                }
                "ACTIVE_LIST_HEAD" => {
                    header.active_list_head = parse_num(value, "header ACTIVE_LIST_HEAD")?
                }
                "STALE_FLAG" => {
                    let flag: u8 = parse_num(value, "header STALE_FLAG")?;
                    header.stale = flag != 0;
                }
                k if k.starts_with("FIELD_") => {
                    let rest = &k[6..];
                    if let Some(i) = rest.strip_suffix("_NAME") {
                        let i: usize = parse_num(i, "header field ordinal")?;
                        if let Some(field) = header.fields.get_mut(i) {
                            field.0 = value.to_string();
                        }
                    } else if let Some(i) = rest.strip_suffix("_TYPE") {
                        let i: usize = parse_num(i, "header field ordinal")?;
                        if let Some(field) = header.fields.get_mut(i) {
                            field.1 = value.to_string();
                        }
                    }
                }
                _ => {}
            }
        }

        if header.file_structure != FILE_STRUCTURE {
            return Err(Error::Format(
                "header FILE_STRUCTURE",
                header.file_structure,
            ));
        }
        if header.header_size == 0 {
            return Err(Error::Format("header HEADER_SIZE", "missing".to_string()));
        }
        if !(1..=8).contains(&header.record_size_bytes) {
            return Err(Error::Format(
                "header RECORD_SIZE_BYTES",
                header.record_size_bytes.to_string(),
            ));
        }
        if header.block_size <= crate::block::BLOCK_HEADER_SIZE {
            return Err(Error::Format(
                "header BLOCK_SIZE",
                header.block_size.to_string(),
            ));
        }
        Ok(header)
    }
}

fn parse_num<T: std::str::FromStr>(value: &str, what: &'static str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Format(what, value.to_string()))
}

/// Reads until the buffer is full or the file ends.
fn read_up_to(file: &mut File, buf: &mut [u8]) -> Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        match file.read(&mut buf[n..]) {
            Ok(0) => break,
            Ok(m) => n += m,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io("read header", e)),
        }
    }
    Ok(n)
}
