//! zlib helpers for log payloads and archives.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use tracing::warn;

use crate::error::{PipelineError, Result};

/// Compress `data` with zlib. On any failure the original bytes come back
/// unchanged and uncompressed; the caller checks the returned flag.
pub fn compress(data: &[u8]) -> (Vec<u8>, bool) {
    if data.is_empty() {
        return (Vec::new(), false);
    }

    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    if let Err(e) = encoder.write_all(data) {
        warn!("zlib compression failed, keeping original content: {e}");
        return (data.to_vec(), false);
    }
    match encoder.finish() {
        Ok(compressed) => (compressed, true),
        Err(e) => {
            warn!("zlib compression failed, keeping original content: {e}");
            (data.to_vec(), false)
        }
    }
}

/// Decompress a zlib stream. Unlike [`compress`], failure here is an error:
/// the caller asked for bytes that claim to be compressed.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 4);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| PipelineError::Parse(format!("zlib decompression failed: {e}")))?;
    Ok(out)
}

/// Payload bytes as text, decompressing first when flagged. Invalid UTF-8 is
/// replaced rather than rejected; log content is not trusted to be clean.
pub fn payload_text(payload: &[u8], compressed: bool) -> Result<String> {
    let bytes = if compressed {
        decompress(payload)?
    } else {
        payload.to_vec()
    };
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let input = b"2024-03-09 17:05:42 INFO something happened".repeat(20);
        let (compressed, flag) = compress(&input);
        assert!(flag);
        assert!(compressed.len() < input.len());
        assert_eq!(decompress(&compressed).unwrap(), input);
    }

    #[test]
    fn empty_input_is_not_flagged() {
        let (out, flag) = compress(b"");
        assert!(out.is_empty());
        assert!(!flag);
    }

    #[test]
    fn decompressing_garbage_errors() {
        assert!(decompress(b"definitely not zlib").is_err());
    }

    #[test]
    fn payload_text_respects_flag() {
        let (compressed, _) = compress(b"hello");
        assert_eq!(payload_text(&compressed, true).unwrap(), "hello");
        assert_eq!(payload_text(b"hello", false).unwrap(), "hello");
    }
}
