use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::Error;

/// Number of comma-separated fields in a record.
pub const FIELD_COUNT: usize = 6;

/// Encoding of the per-record length prefix, fixed per file and recorded
/// in the file header as `SIZE_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeFormat {
    /// Zero-padded ASCII decimal digits.
    Ascii,
    /// Big-endian unsigned integer.
    Binary,
}

impl SizeFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeFormat::Ascii => "ASCII",
            SizeFormat::Binary => "binary",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "ASCII" => Ok(SizeFormat::Ascii),
            "binary" => Ok(SizeFormat::Binary),
            other => Err(Error::Format("size format", other.to_string())),
        }
    }
}

/// A single zip code record. The zip code is the primary key; records
/// order by it as a byte-wise string.
#[derive(Debug, Clone, PartialEq)]
pub struct ZipRecord {
    pub zip: String,
    pub city: String,
    pub state: String,
    pub county: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl ZipRecord {
    pub fn new(
        zip: impl Into<String>,
        city: impl Into<String>,
        state: impl Into<String>,
        county: impl Into<String>,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        Self {
            zip: zip.into(),
            city: city.into(),
            state: state.into(),
            county: county.into(),
            latitude,
            longitude,
        }
    }

    /// Parses the comma-separated form: exactly six fields, the last two
    /// doubles. No quoting or escaping exists in this format.
    pub fn from_csv(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() != FIELD_COUNT {
            return Err(Error::Format(
                "record field count",
                format!("expected {FIELD_COUNT} fields, got {} in {line:?}", parts.len()),
            ));
        }
        let latitude = parts[4]
            .parse()
            .map_err(|_| Error::Format("record latitude", parts[4].to_string()))?;
        let longitude = parts[5]
            .parse()
            .map_err(|_| Error::Format("record longitude", parts[5].to_string()))?;
        Ok(Self {
            zip: parts[0].to_string(),
            city: parts[1].to_string(),
            state: parts[2].to_string(),
            county: parts[3].to_string(),
            latitude,
            longitude,
        })
    }

    /// Renders the comma-separated form. Doubles use the shortest
    /// round-trippable rendering.
    pub fn to_csv(&self) -> String {
        format!(
            "{},{},{},{},{},{}",
            self.zip, self.city, self.state, self.county, self.latitude, self.longitude
        )
    }

    fn validate(&self) -> Result<()> {
        if self.zip.len() != 5 || !self.zip.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Format("zip code", self.zip.clone()));
        }
        for field in [&self.city, &self.state, &self.county] {
            if field.contains(',') {
                return Err(Error::Format("record field", format!("embedded comma in {field:?}")));
            }
        }
        Ok(())
    }
}

/// Parses a CSV stream into records. A first line that does not parse as a
/// record is taken to be a column-header row and skipped.
pub fn read_csv<R: std::io::BufRead>(reader: R) -> Result<Vec<ZipRecord>> {
    let mut records = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| Error::Io("read csv", e))?;
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        match ZipRecord::from_csv(line) {
            Ok(record) => records.push(record),
            Err(_) if lineno == 0 => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(records)
}

/// Packs and unpacks length-prefixed records: an `S`-byte length field
/// immediately followed by the comma-separated payload.
#[derive(Debug, Clone, Copy)]
pub struct RecordCodec {
    size_bytes: usize,
    format: SizeFormat,
}

impl RecordCodec {
    pub fn new(size_bytes: usize, format: SizeFormat) -> Self {
        Self { size_bytes, format }
    }

    /// Largest payload length the prefix width can represent.
    fn max_payload(&self) -> usize {
        match self.format {
            SizeFormat::Ascii => 10usize.pow(self.size_bytes as u32) - 1,
            SizeFormat::Binary if self.size_bytes >= 8 => usize::MAX,
            SizeFormat::Binary => (1 << (8 * self.size_bytes)) - 1,
        }
    }

    /// Encodes one record as length prefix + payload.
    pub fn encode(&self, record: &ZipRecord) -> Result<Vec<u8>> {
        record.validate()?;
        let payload = record.to_csv();
        if payload.len() > self.max_payload() {
            return Err(Error::Format(
                "record length",
                format!("{} bytes exceeds the {}-byte length field", payload.len(), self.size_bytes),
            ));
        }
        let mut buf = Vec::with_capacity(self.size_bytes + payload.len());
        match self.format {
            SizeFormat::Ascii => {
                buf.extend_from_slice(
                    format!("{:0width$}", payload.len(), width = self.size_bytes).as_bytes(),
                );
            }
            SizeFormat::Binary => {
                buf.write_uint::<BigEndian>(payload.len() as u64, self.size_bytes)
                    .map_err(|e| Error::Io("encode record length", e))?;
            }
        }
        buf.extend_from_slice(payload.as_bytes());
        Ok(buf)
    }

    /// Total encoded size of a record, prefix included.
    pub fn encoded_len(&self, record: &ZipRecord) -> usize {
        self.size_bytes + record.to_csv().len()
    }

    /// Reads the length prefix at the start of `buf`.
    pub fn read_length(&self, buf: &[u8]) -> Result<usize> {
        if buf.len() < self.size_bytes {
            return Err(Error::Format("record length", "truncated length field".to_string()));
        }
        match self.format {
            SizeFormat::Ascii => {
                let text = std::str::from_utf8(&buf[..self.size_bytes])
                    .map_err(|_| Error::Format("record length", format!("{:?}", &buf[..self.size_bytes])))?;
                text.parse()
                    .map_err(|_| Error::Format("record length", text.to_string()))
            }
            SizeFormat::Binary => {
                let len = Cursor::new(&buf[..self.size_bytes])
                    .read_uint::<BigEndian>(self.size_bytes)
                    .map_err(|e| Error::Io("decode record length", e))?;
                Ok(len as usize)
            }
        }
    }

    /// Decodes one record from the front of `buf`, returning it with the
    /// total bytes consumed.
    pub fn decode(&self, buf: &[u8]) -> Result<(ZipRecord, usize)> {
        let len = self.read_length(buf)?;
        let total = self.size_bytes + len;
        if buf.len() < total {
            return Err(Error::Format(
                "record payload",
                format!("{len} byte payload overruns the remaining {} bytes", buf.len() - self.size_bytes),
            ));
        }
        let payload = std::str::from_utf8(&buf[self.size_bytes..total])
            .map_err(|_| Error::Format("record payload", "not valid utf-8".to_string()))?;
        Ok((ZipRecord::from_csv(payload)?, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> ZipRecord {
        ZipRecord::new("10001", "New York", "NY", "New York", 40.7128, -74.0060)
    }

    #[test]
    fn test_csv_round_trip() {
        let record = sample();
        let decoded = ZipRecord::from_csv(&record.to_csv()).expect("Failed to parse CSV");
        assert_eq!(record, decoded);
    }

    #[test]
    fn test_from_csv_field_count() {
        let result = ZipRecord::from_csv("10001,New York,NY");
        assert!(matches!(result, Err(Error::Format("record field count", _))));
    }

    #[test]
    fn test_from_csv_bad_number() {
        let result = ZipRecord::from_csv("10001,New York,NY,New York,north,-74.0");
        assert!(matches!(result, Err(Error::Format("record latitude", _))));
    }

    #[test]
    fn test_encode_ascii_exact_bytes() {
        let codec = RecordCodec::new(2, SizeFormat::Ascii);
        let record = ZipRecord::new("10001", "X", "YY", "", 0.0, 0.0);
        let encoded = codec.encode(&record).expect("Failed to encode");
        assert_eq!(encoded, b"1510001,X,YY,,0,0");
    }

    #[test]
    fn test_encode_binary_exact_bytes() {
        let codec = RecordCodec::new(2, SizeFormat::Binary);
        let record = ZipRecord::new("10001", "X", "YY", "", 0.0, 0.0);
        let encoded = codec.encode(&record).expect("Failed to encode");
        assert_eq!(&encoded[..2], &[0x00, 0x0F]);
        assert_eq!(&encoded[2..], b"10001,X,YY,,0,0");
    }

    #[test]
    fn test_encode_decode_round_trip() {
        for format in [SizeFormat::Ascii, SizeFormat::Binary] {
            let codec = RecordCodec::new(4, format);
            let record = sample();
            let encoded = codec.encode(&record).expect("Failed to encode");
            assert_eq!(encoded.len(), codec.encoded_len(&record));
            let (decoded, used) = codec.decode(&encoded).expect("Failed to decode");
            assert_eq!(decoded, record);
            assert_eq!(used, encoded.len());
        }
    }

    #[test]
    fn test_encode_rejects_bad_zip() {
        let codec = RecordCodec::new(4, SizeFormat::Ascii);
        for zip in ["1234", "123456", "1234a", ""] {
            let record = ZipRecord::new(zip, "X", "YY", "", 0.0, 0.0);
            assert!(
                matches!(codec.encode(&record), Err(Error::Format("zip code", _))),
                "zip {zip:?} should not encode"
            );
        }
    }

    #[test]
    fn test_encode_rejects_embedded_comma() {
        let codec = RecordCodec::new(4, SizeFormat::Ascii);
        let record = ZipRecord::new("10001", "New York, NY", "NY", "", 0.0, 0.0);
        assert!(matches!(codec.encode(&record), Err(Error::Format("record field", _))));
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let codec = RecordCodec::new(2, SizeFormat::Ascii);
        let record = ZipRecord::new("10001", "C".repeat(100), "YY", "", 0.0, 0.0);
        assert!(matches!(codec.encode(&record), Err(Error::Format("record length", _))));
    }

    #[test]
    fn test_decode_rejects_truncated_payload() {
        let codec = RecordCodec::new(2, SizeFormat::Ascii);
        let result = codec.decode(b"9910001,X");
        assert!(matches!(result, Err(Error::Format("record payload", _))));
    }

    #[test]
    fn test_decode_rejects_bad_ascii_length() {
        let codec = RecordCodec::new(2, SizeFormat::Ascii);
        let result = codec.decode(b" 510001");
        assert!(matches!(result, Err(Error::Format("record length", _))));
    }

    #[test]
    fn test_read_csv_skips_header_row() {
        let input = "ZipCode,City,State,County,Latitude,Longitude\n\
                     10001,New York,NY,New York,40.7128,-74.006\n\
                     30301,Atlanta,GA,Fulton,33.749,-84.388\n";
        let records = read_csv(Cursor::new(input)).expect("Failed to read CSV");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].zip, "10001");
        assert_eq!(records[1].city, "Atlanta");
    }

    #[test]
    fn test_read_csv_rejects_malformed_data_row() {
        let input = "10001,New York,NY,New York,40.7128,-74.006\nnot,a,record\n";
        assert!(read_csv(Cursor::new(input)).is_err());
    }

    #[test]
    fn test_size_format_parse() {
        assert_eq!(SizeFormat::parse("ASCII").unwrap(), SizeFormat::Ascii);
        assert_eq!(SizeFormat::parse("binary").unwrap(), SizeFormat::Binary);
        assert!(SizeFormat::parse("Binary").is_err());
    }
}
