use crate::record::SizeFormat;

/// Configuration for creating a blocked sequence set file.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Block size in bytes (default: 512)
    pub block_size: usize,

    /// Width of the per-record length prefix in bytes (default: 4)
    pub size_bytes: usize,

    /// Encoding of the length prefix (default: ASCII)
    pub size_format: SizeFormat,

    /// Advisory minimum block fill ratio (default: 0.5)
    pub min_block_capacity: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            block_size: 512,
            size_bytes: 4,
            size_format: SizeFormat::Ascii,
            min_block_capacity: 0.5,
        }
    }
}

impl StoreConfig {
    /// Set the block size in bytes
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Set the width of the record length prefix
    pub fn size_bytes(mut self, bytes: usize) -> Self {
        self.size_bytes = bytes;
        self
    }

    /// Set the length prefix encoding
    pub fn size_format(mut self, format: SizeFormat) -> Self {
        self.size_format = format;
        self
    }

    /// Set the advisory minimum block fill ratio
    pub fn min_block_capacity(mut self, ratio: f64) -> Self {
        self.min_block_capacity = ratio;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.block_size, 512);
        assert_eq!(config.size_bytes, 4);
        assert_eq!(config.size_format, SizeFormat::Ascii);
        assert_eq!(config.min_block_capacity, 0.5);
    }

    #[test]
    fn test_config_builder() {
        let config = StoreConfig::default()
            .block_size(128)
            .size_bytes(2)
            .size_format(SizeFormat::Binary)
            .min_block_capacity(0.75);

        assert_eq!(config.block_size, 128);
        assert_eq!(config.size_bytes, 2);
        assert_eq!(config.size_format, SizeFormat::Binary);
        assert_eq!(config.min_block_capacity, 0.75);
    }
}
