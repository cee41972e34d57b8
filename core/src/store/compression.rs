//! Compression for archived payloads
//!
//! Backed-up payloads are written once and rarely read, so they are LZ4
//! compressed when large enough to benefit. A one-byte header records whether
//! the body is compressed.

use anyhow::{anyhow, Context, Result};
use lz4::{Decoder, EncoderBuilder};
use std::io::{Read, Write};

/// Payloads below this size are stored raw
const MIN_COMPRESS_SIZE: usize = 512;

const TAG_RAW: u8 = 0;
const TAG_LZ4: u8 = 1;

/// Compress data using LZ4
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = EncoderBuilder::new()
        .level(4)
        .build(Vec::new())
        .context("Failed to create LZ4 encoder")?;

    encoder.write_all(data)
        .context("Failed to write data to encoder")?;

    let (compressed, result) = encoder.finish();
    result.context("Failed to finish compression")?;

    Ok(compressed)
}

/// Decompress LZ4-compressed data
pub fn decompress(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = Decoder::new(compressed)
        .context("Failed to create LZ4 decoder")?;

    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)
        .context("Failed to decompress data")?;

    Ok(decompressed)
}

/// Tiny payloads are not worth the frame overhead
pub fn should_compress(data: &[u8]) -> bool {
    data.len() >= MIN_COMPRESS_SIZE
}

/// Encode a payload with its compression header
pub fn pack(data: &[u8]) -> Result<Vec<u8>> {
    if should_compress(data) {
        let compressed = compress(data)?;
        if compressed.len() < data.len() {
            let mut framed = Vec::with_capacity(compressed.len() + 1);
            framed.push(TAG_LZ4);
            framed.extend_from_slice(&compressed);
            return Ok(framed);
        }
    }

    let mut framed = Vec::with_capacity(data.len() + 1);
    framed.push(TAG_RAW);
    framed.extend_from_slice(data);
    Ok(framed)
}

/// Decode a payload written by `pack`
pub fn unpack(framed: &[u8]) -> Result<Vec<u8>> {
    match framed.split_first() {
        Some((&TAG_RAW, body)) => Ok(body.to_vec()),
        Some((&TAG_LZ4, body)) => decompress(body),
        Some((tag, _)) => Err(anyhow!("Unknown payload frame tag {}", tag)),
        None => Err(anyhow!("Empty payload frame")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_decompress_roundtrip() -> Result<()> {
        let original = r#"{"productCode":"08S01","quantity":-20,"stockOnHand":80} "#.repeat(20);

        let compressed = compress(original.as_bytes())?;
        let decompressed = decompress(&compressed)?;

        assert_eq!(original.as_bytes(), decompressed.as_slice());
        assert!(compressed.len() < original.len(), "Should compress repeated JSON");

        Ok(())
    }

    #[test]
    fn test_small_payload_stored_raw() -> Result<()> {
        let framed = pack(b"[]")?;
        assert_eq!(framed, vec![TAG_RAW, b'[', b']']);
        assert_eq!(unpack(&framed)?, b"[]".to_vec());
        Ok(())
    }

    #[test]
    fn test_large_payload_compressed() -> Result<()> {
        let data = vec![b'a'; 4096];
        let framed = pack(&data)?;

        assert_eq!(framed[0], TAG_LZ4);
        assert!(framed.len() < data.len());
        assert_eq!(unpack(&framed)?, data);
        Ok(())
    }

    #[test]
    fn test_unknown_tag_rejected() {
        assert!(unpack(&[9, 1, 2]).is_err());
        assert!(unpack(&[]).is_err());
    }
}
