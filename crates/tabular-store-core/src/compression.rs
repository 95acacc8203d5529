//! Compression settings for row blocks.
//!
//! Settings are spelled the way they have always been spelled in table
//! descriptions (`ZLIB4`, `ZSTD3`, `LZ4`, `SNAPPY`, `NOCOMPR`) and map onto
//! Parquet codecs when a block is encoded. The canonical spelling is what is
//! recorded in table metadata.

use std::{fmt, ops::RangeInclusive, str::FromStr};

use parquet::{
    basic::{Compression as ParquetCompression, GzipLevel, ZstdLevel},
    errors::ParquetError,
    file::properties::WriterProperties,
};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// Default setting for new tables.
pub const DEFAULT_COMPRESSION: Compression = Compression::Zlib(4);

/// Codec and level applied to row blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Compression {
    /// No compression.
    None,
    /// Deflate (zlib/gzip) with a level in `0..=9`.
    Zlib(u8),
    /// Zstandard with a level in `1..=22`.
    Zstd(u8),
    /// LZ4 (raw block format).
    Lz4,
    /// Snappy.
    Snappy,
}

impl Default for Compression {
    fn default() -> Self {
        DEFAULT_COMPRESSION
    }
}

/// Error returned for an unrecognised compression spelling.
#[derive(Debug, Clone, Snafu, PartialEq, Eq)]
#[snafu(display("Invalid compression setting {value:?}: {reason}"))]
pub struct CompressionParseError {
    value: String,
    reason: &'static str,
}

fn parse_level(
    value: &str,
    digits: &str,
    range: RangeInclusive<u8>,
) -> Result<u8, CompressionParseError> {
    let level = digits.parse::<u8>().ok().context(CompressionParseSnafu {
        value,
        reason: "level is not a number",
    })?;
    ensure!(
        range.contains(&level),
        CompressionParseSnafu {
            value,
            reason: "level out of range",
        }
    );
    Ok(level)
}

impl FromStr for Compression {
    type Err = CompressionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.as_str() {
            "NOCOMPR" | "NONE" => Ok(Compression::None),
            "LZ4" => Ok(Compression::Lz4),
            "SNAPPY" => Ok(Compression::Snappy),
            other => {
                if let Some(digits) = other.strip_prefix("ZLIB") {
                    parse_level(s, digits, 0..=9).map(Compression::Zlib)
                } else if let Some(digits) = other.strip_prefix("ZSTD") {
                    parse_level(s, digits, 1..=22).map(Compression::Zstd)
                } else {
                    CompressionParseSnafu {
                        value: s,
                        reason: "expected ZLIB<0-9>, ZSTD<1-22>, LZ4, SNAPPY or NOCOMPR",
                    }
                    .fail()
                }
            }
        }
    }
}

impl TryFrom<String> for Compression {
    type Error = CompressionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Compression> for String {
    fn from(value: Compression) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::None => f.write_str("NOCOMPR"),
            Compression::Zlib(level) => write!(f, "ZLIB{level}"),
            Compression::Zstd(level) => write!(f, "ZSTD{level}"),
            Compression::Lz4 => f.write_str("LZ4"),
            Compression::Snappy => f.write_str("SNAPPY"),
        }
    }
}

impl Compression {
    /// The Parquet codec for this setting.
    pub fn to_parquet(self) -> Result<ParquetCompression, ParquetError> {
        Ok(match self {
            Compression::None => ParquetCompression::UNCOMPRESSED,
            Compression::Zlib(level) => ParquetCompression::GZIP(GzipLevel::try_new(level.into())?),
            Compression::Zstd(level) => ParquetCompression::ZSTD(ZstdLevel::try_new(level.into())?),
            Compression::Lz4 => ParquetCompression::LZ4_RAW,
            Compression::Snappy => ParquetCompression::SNAPPY,
        })
    }

    /// Writer properties for blocks encoded with this setting.
    pub fn writer_properties(self) -> Result<WriterProperties, ParquetError> {
        Ok(WriterProperties::builder()
            .set_compression(self.to_parquet()?)
            .build())
    }
}
