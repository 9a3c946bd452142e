//! Gzip payload compression

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{CacheError, Result};

pub fn compress(input: &[u8]) -> Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(input.len() / 2), Compression::default());
    encoder.write_all(input).map_err(|e| CacheError::Compression {
        context: "error gzip write",
        reason: e.to_string(),
    })?;
    let compressed = encoder.finish().map_err(|e| CacheError::Compression {
        context: "error gzip finish",
        reason: e.to_string(),
    })?;
    Ok(Bytes::from(compressed))
}

pub fn decompress(input: &[u8]) -> Result<Bytes> {
    let mut decoder = GzDecoder::new(input);
    let mut out = Vec::with_capacity(input.len() * 2);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CacheError::Compression {
            context: "error decompressing data",
            reason: e.to_string(),
        })?;
    Ok(Bytes::from(out))
}
