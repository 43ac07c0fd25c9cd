//! Configuration for the blob backend
//!
//! The cluster configuration loader hands backends their options as textual
//! key/value pairs; this module owns the parsing and the defaults.
//!
//! ## Recognized keys
//! - `data`: base path of the blob data files (required)
//! - `sync`: fsync interval in seconds (0 = sync every write)
//! - `blob_flags`: raw engine flag bits
//! - `blob_size` / `blob_size_limit`: accept `K`/`M`/`G`/`T` suffixes
//! - `records_in_blob`: records per segment before rotation
//! - `defrag_timeout` / `defrag_time` / `defrag_splay` / `defrag_percentage`
//! - `index_block_size` / `index_block_bloom_length`

use std::path::PathBuf;

use crate::error::{BlobError, Result};

/// Backend configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Base path for blob data files; segments are created as `<data>.N`
    pub data: PathBuf,

    /// Fsync interval in seconds (0 = fsync after every mutating write)
    pub sync: u64,

    /// Raw engine flag bits, passed through to the engine
    pub blob_flags: u64,

    /// Max segment size in bytes before rotation
    pub blob_size: u64,

    /// Total size limit across all segments (0 = unlimited)
    pub blob_size_limit: u64,

    /// Max records per segment before rotation
    pub records_in_blob: u64,

    // -------------------------------------------------------------------------
    // Defrag Configuration
    // -------------------------------------------------------------------------
    /// Seconds between defrag eligibility checks
    pub defrag_timeout: u64,

    /// Preferred hour of day to run scheduled defrag
    pub defrag_time: u64,

    /// Splay in hours around `defrag_time`
    pub defrag_splay: u64,

    /// Minimum percentage of removed records before a segment is defragged
    pub defrag_percentage: u64,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Records per index block
    pub index_block_size: u64,

    /// Bloom filter length per index block, in bits
    pub index_block_bloom_length: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            data: PathBuf::new(),
            sync: 0,
            blob_flags: 0,
            blob_size: 50 * 1024 * 1024 * 1024, // 50 GiB
            blob_size_limit: 0,
            records_in_blob: 50_000_000,
            defrag_timeout: 0,
            defrag_time: 0,
            defrag_splay: 0,
            defrag_percentage: 25,
            index_block_size: 40,
            index_block_bloom_length: 128,
        }
    }
}

impl BackendConfig {
    /// Build a config from textual key/value option pairs
    pub fn from_options<'a, I>(options: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Self::default();
        for (key, value) in options {
            config.set_option(key, value)?;
        }
        Ok(config)
    }

    /// Apply a single textual option
    pub fn set_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "data" => self.data = PathBuf::from(value),
            "sync" => self.sync = parse_number(key, value)?,
            "blob_flags" => self.blob_flags = parse_number(key, value)?,
            "blob_size" => self.blob_size = parse_size(key, value)?,
            "blob_size_limit" => self.blob_size_limit = parse_size(key, value)?,
            "records_in_blob" => self.records_in_blob = parse_number(key, value)?,
            "defrag_timeout" => self.defrag_timeout = parse_number(key, value)?,
            "defrag_time" => self.defrag_time = parse_number(key, value)?,
            "defrag_splay" => self.defrag_splay = parse_number(key, value)?,
            "defrag_percentage" => self.defrag_percentage = parse_number(key, value)?,
            "index_block_size" => self.index_block_size = parse_number(key, value)?,
            "index_block_bloom_length" => {
                self.index_block_bloom_length = parse_number(key, value)?
            }
            _ => {
                return Err(BlobError::InvalidConfig(format!(
                    "unknown option: {}",
                    key
                )))
            }
        }
        Ok(())
    }

    /// Check that required options are present
    pub fn validate(&self) -> Result<()> {
        if self.data.as_os_str().is_empty() {
            return Err(BlobError::InvalidConfig(
                "no data file present".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse a plain decimal option value
fn parse_number(key: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| {
        BlobError::InvalidConfig(format!("{}: invalid number: {}", key, value))
    })
}

/// Parse a size value with optional `K`/`M`/`G`/`T` suffix (powers of 1024)
fn parse_size(key: &str, value: &str) -> Result<u64> {
    let value = value.trim();

    let (digits, multiplier) = match value.find(|c: char| !c.is_ascii_digit()) {
        None => (value, 1u64),
        Some(pos) => {
            let mult = match &value[pos..] {
                "K" => 1u64 << 10,
                "M" => 1u64 << 20,
                "G" => 1u64 << 30,
                "T" => 1u64 << 40,
                suffix => {
                    return Err(BlobError::InvalidConfig(format!(
                        "{}: invalid size suffix: {}",
                        key, suffix
                    )))
                }
            };
            (&value[..pos], mult)
        }
    };

    let base: u64 = digits.parse().map_err(|_| {
        BlobError::InvalidConfig(format!("{}: invalid size: {}", key, value))
    })?;

    Ok(base * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_suffixes() {
        assert_eq!(parse_size("blob_size", "512").unwrap(), 512);
        assert_eq!(parse_size("blob_size", "4K").unwrap(), 4096);
        assert_eq!(parse_size("blob_size", "2M").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("blob_size", "1G").unwrap(), 1 << 30);
        assert_eq!(parse_size("blob_size", "3T").unwrap(), 3 * (1u64 << 40));
    }

    #[test]
    fn test_bad_size_suffix() {
        assert!(parse_size("blob_size", "10Q").is_err());
        assert!(parse_size("blob_size", "x").is_err());
    }

    #[test]
    fn test_unknown_option_rejected() {
        let mut config = BackendConfig::default();
        assert!(config.set_option("compression", "lz4").is_err());
    }

    #[test]
    fn test_validate_requires_data_path() {
        let config = BackendConfig::default();
        assert!(matches!(
            config.validate(),
            Err(BlobError::InvalidConfig(_))
        ));

        let mut config = BackendConfig::default();
        config.set_option("data", "/srv/blob/data").unwrap();
        assert!(config.validate().is_ok());
    }
}
