//! Zstd block compression for package payloads
//!
//! The modern package form compresses three things with zstd: the
//! collection database, the media manifest and every media blob. Legacy
//! packages store all of them raw.
//!
//! **Design**:
//! - Compression is applied per entry, never across entries
//! - Decompression streams the frame, so frames without a content-size
//!   header (as written by some exporters) are accepted
//! - Output is bounded by `max_size` to reject decompression bombs

use crate::error::{ApkgError, Result};
use std::io::Read;

/// Zstd frame magic number (little endian 0xFD2FB528)
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Default upper bound for a single decompressed entry
pub const DEFAULT_MAX_DECOMPRESSED: usize = 512 * 1024 * 1024;

/// Compression method for a package entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Stored raw
    None,
    /// Zstd frame
    Zstd,
}

/// Compress data using the specified method
pub fn compress(data: &[u8], method: CompressionMethod, level: i32) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Zstd => Ok(zstd::bulk::compress(data, level)?),
    }
}

/// Decompress data using the specified method
pub fn decompress(data: &[u8], method: CompressionMethod, max_size: usize) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Zstd => {
            if !is_zstd_frame(data) {
                return Err(ApkgError::Decompression(
                    "missing zstd frame header".to_string(),
                ));
            }
            let decoder = zstd::stream::read::Decoder::new(data)
                .map_err(|e| ApkgError::Decompression(e.to_string()))?;
            let mut out = Vec::new();
            // Read one byte past the limit so an oversized frame is detected
            decoder
                .take(max_size as u64 + 1)
                .read_to_end(&mut out)
                .map_err(|e| ApkgError::Decompression(e.to_string()))?;
            if out.len() > max_size {
                return Err(ApkgError::Decompression(format!(
                    "decompressed size exceeds limit of {} bytes",
                    max_size
                )));
            }
            Ok(out)
        }
    }
}

/// Check whether data starts with a zstd frame
pub fn is_zstd_frame(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == ZSTD_MAGIC
}
