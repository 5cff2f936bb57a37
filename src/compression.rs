//! Tile codecs for the directory store

use crate::error::{Result, TransposeError};
use flate2::read::{DeflateDecoder, DeflateEncoder};
use flate2::Compression as FlateCompression;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::str::FromStr;

/// Tile codecs supported by the directory store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionMethod {
    /// Raw tile bytes
    None,
    /// Deflate/ZIP compression
    Deflate,
    /// Run-length encoding
    RLE,
    /// Zstandard compression
    Zstd,
}

impl CompressionMethod {
    /// Name used in creation options and image structure metadata
    pub fn name(&self) -> &'static str {
        match self {
            CompressionMethod::None => "NONE",
            CompressionMethod::Deflate => "DEFLATE",
            CompressionMethod::RLE => "RLE",
            CompressionMethod::Zstd => "ZSTD",
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompressionMethod {
    type Err = TransposeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(CompressionMethod::None),
            "DEFLATE" | "ZIP" => Ok(CompressionMethod::Deflate),
            "RLE" => Ok(CompressionMethod::RLE),
            "ZSTD" => Ok(CompressionMethod::Zstd),
            other => Err(TransposeError::Compression(format!("unknown codec {}", other))),
        }
    }
}

/// Compression level (0-9, where 0 is no compression and 9 is maximum)
#[derive(Debug, Clone, Copy)]
pub struct CompressionLevel(u8);

impl CompressionLevel {
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self(6)
    }
}

/// Encodes and decodes whole tiles
pub trait TileCodec: Send + Sync {
    /// Encode one tile
    fn encode(&self, tile: &[u8], level: CompressionLevel) -> Result<Vec<u8>>;

    /// Decode one tile into exactly `tile_len` bytes
    fn decode(&self, data: &[u8], tile_len: usize) -> Result<Vec<u8>>;

    /// Get the compression method
    fn method(&self) -> CompressionMethod;
}

fn check_tile_len(method: CompressionMethod, decoded: Vec<u8>, tile_len: usize) -> Result<Vec<u8>> {
    if decoded.len() != tile_len {
        return Err(TransposeError::Decompression(format!(
            "{} tile decoded to {} bytes, expected {}",
            method,
            decoded.len(),
            tile_len
        )));
    }
    Ok(decoded)
}

/// Raw tiles
#[derive(Debug, Default)]
pub struct RawCodec;

impl TileCodec for RawCodec {
    fn encode(&self, tile: &[u8], _level: CompressionLevel) -> Result<Vec<u8>> {
        Ok(tile.to_vec())
    }

    fn decode(&self, data: &[u8], tile_len: usize) -> Result<Vec<u8>> {
        check_tile_len(self.method(), data.to_vec(), tile_len)
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::None
    }
}

/// Deflate tiles
#[derive(Debug, Default)]
pub struct DeflateCodec;

impl TileCodec for DeflateCodec {
    fn encode(&self, tile: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(tile, FlateCompression::new(level.value() as u32));
        let mut encoded = Vec::new();
        encoder
            .read_to_end(&mut encoded)
            .map_err(|e| TransposeError::Compression(e.to_string()))?;
        Ok(encoded)
    }

    fn decode(&self, data: &[u8], tile_len: usize) -> Result<Vec<u8>> {
        let mut decoder = DeflateDecoder::new(data);
        let mut decoded = Vec::with_capacity(tile_len);
        decoder
            .read_to_end(&mut decoded)
            .map_err(|e| TransposeError::Decompression(e.to_string()))?;
        check_tile_len(self.method(), decoded, tile_len)
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Deflate
    }
}

/// Zstandard tiles
#[derive(Debug, Default)]
pub struct ZstdCodec;

impl TileCodec for ZstdCodec {
    fn encode(&self, tile: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
        zstd::encode_all(tile, level.value() as i32)
            .map_err(|e| TransposeError::Compression(e.to_string()))
    }

    fn decode(&self, data: &[u8], tile_len: usize) -> Result<Vec<u8>> {
        let decoded =
            zstd::decode_all(data).map_err(|e| TransposeError::Decompression(e.to_string()))?;
        check_tile_len(self.method(), decoded, tile_len)
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Zstd
    }
}

/// Run-length encoded tiles, as (count, byte) pairs
#[derive(Debug, Default)]
pub struct RleCodec;

impl TileCodec for RleCodec {
    fn encode(&self, tile: &[u8], _level: CompressionLevel) -> Result<Vec<u8>> {
        let mut encoded = Vec::new();
        let mut rest = tile;
        while let Some(&byte) = rest.first() {
            let run = rest
                .iter()
                .take(255)
                .take_while(|&&b| b == byte)
                .count();
            encoded.push(run as u8);
            encoded.push(byte);
            rest = &rest[run..];
        }
        Ok(encoded)
    }

    fn decode(&self, data: &[u8], tile_len: usize) -> Result<Vec<u8>> {
        if data.len() % 2 != 0 {
            return Err(TransposeError::Decompression(
                "RLE data must have even length".to_string(),
            ));
        }
        let mut decoded = Vec::with_capacity(tile_len);
        for pair in data.chunks_exact(2) {
            decoded.extend(std::iter::repeat(pair[1]).take(pair[0] as usize));
        }
        check_tile_len(self.method(), decoded, tile_len)
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::RLE
    }
}

/// Get the codec for a given method
pub fn get_codec(method: CompressionMethod) -> Box<dyn TileCodec> {
    match method {
        CompressionMethod::None => Box::new(RawCodec),
        CompressionMethod::Deflate => Box::new(DeflateCodec),
        CompressionMethod::RLE => Box::new(RleCodec),
        CompressionMethod::Zstd => Box::new(ZstdCodec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile() -> Vec<u8> {
        let mut tile = vec![0u8; 300];
        tile.extend((0..=255u8).cycle().take(200));
        tile
    }

    #[test]
    fn test_method_names() {
        assert_eq!("zstd".parse::<CompressionMethod>().unwrap(), CompressionMethod::Zstd);
        assert_eq!("ZIP".parse::<CompressionMethod>().unwrap(), CompressionMethod::Deflate);
        assert!("LERC".parse::<CompressionMethod>().is_err());
        assert_eq!(CompressionMethod::Deflate.to_string(), "DEFLATE");
    }

    #[test]
    fn test_codecs_restore_tile() {
        let tile = tile();
        for method in [
            CompressionMethod::None,
            CompressionMethod::Deflate,
            CompressionMethod::RLE,
            CompressionMethod::Zstd,
        ] {
            let codec = get_codec(method);
            assert_eq!(codec.method(), method);
            let encoded = codec.encode(&tile, CompressionLevel::default()).unwrap();
            assert_eq!(codec.decode(&encoded, tile.len()).unwrap(), tile, "{}", method);
        }
    }

    #[test]
    fn test_rle_splits_long_runs() {
        let encoded = RleCodec
            .encode(&[7u8; 300], CompressionLevel::default())
            .unwrap();
        assert_eq!(encoded, vec![255, 7, 45, 7]);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let encoded = ZstdCodec
            .encode(&[1u8; 64], CompressionLevel::default())
            .unwrap();
        assert!(matches!(
            ZstdCodec.decode(&encoded, 32),
            Err(TransposeError::Decompression(_))
        ));
        assert!(RleCodec.decode(&[3], 3).is_err());
    }
}
