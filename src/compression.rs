// src/compression.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Conditional gzip for uploads, inflate for downloads.
//!
//! Staged input, gzip output and inflated downloads live in spooled
//! temporary buffers: they stay in memory up to [`SPOOL_MAX_MEMORY_SIZE`]
//! and spill to an anonymous temp file beyond that. Dropping a buffer
//! releases it, whichever way the caller exits.
//!
//! The spool bounds scratch memory only. The body that is finally uploaded
//! is read into `Bytes` by [`crate::storage::prepare_upload`].

use std::io::{self, Read, Seek, SeekFrom, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tempfile::SpooledTempFile;

use crate::constants::{CONTENT_ENCODING_GZIP, GZIP_COMPRESSION_LEVEL, SPOOL_MAX_MEMORY_SIZE};

/// Encoding of a stored object body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    Gzip,
}

impl ContentEncoding {
    /// Value for the Content-Encoding header, `None` for identity.
    pub fn header_value(self) -> Option<&'static str> {
        match self {
            ContentEncoding::Identity => None,
            ContentEncoding::Gzip => Some(CONTENT_ENCODING_GZIP),
        }
    }

    /// Interpret a Content-Encoding header. Anything but `gzip` is passed
    /// through untouched on read.
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case(CONTENT_ENCODING_GZIP) => ContentEncoding::Gzip,
            _ => ContentEncoding::Identity,
        }
    }
}

/// A staged body ready for upload.
#[derive(Debug)]
pub struct CompressOutcome {
    pub encoding: ContentEncoding,
    /// Positioned at offset 0.
    pub body: SpooledTempFile,
    /// Length of the content before compression.
    pub original_size: u64,
}

/// A new scratch buffer.
pub fn spooled_buffer() -> SpooledTempFile {
    tempfile::spooled_tempfile(SPOOL_MAX_MEMORY_SIZE)
}

/// Copy `reader` into a fresh scratch buffer and rewind it.
pub fn stage<R: Read>(mut reader: R) -> io::Result<SpooledTempFile> {
    let mut staged = spooled_buffer();
    io::copy(&mut reader, &mut staged)?;
    staged.rewind()?;
    Ok(staged)
}

/// Gzip `content` at maximum level and keep the result only if it is
/// strictly smaller than the input.
///
/// When compression does not pay off, the original buffer is rewound and
/// returned; the gzip buffer is dropped.
pub fn compress(mut content: SpooledTempFile) -> io::Result<CompressOutcome> {
    content.rewind()?;
    let mut encoder = GzEncoder::new(spooled_buffer(), Compression::new(GZIP_COMPRESSION_LEVEL));
    let original_size = io::copy(&mut content, &mut encoder)?;
    let mut zipped = encoder.finish()?;
    let zipped_size = zipped.stream_position()?;

    if zipped_size < original_size {
        zipped.rewind()?;
        Ok(CompressOutcome {
            encoding: ContentEncoding::Gzip,
            body: zipped,
            original_size,
        })
    } else {
        content.rewind()?;
        Ok(CompressOutcome {
            encoding: ContentEncoding::Identity,
            body: content,
            original_size,
        })
    }
}

/// Wrap already staged content as an uncompressed outcome.
pub fn passthrough(mut content: SpooledTempFile) -> io::Result<CompressOutcome> {
    let original_size = content.seek(SeekFrom::End(0))?;
    content.rewind()?;
    Ok(CompressOutcome {
        encoding: ContentEncoding::Identity,
        body: content,
        original_size,
    })
}

/// Inflate a gzip body into a new, rewound scratch buffer.
pub fn decompress<R: Read>(body: R) -> io::Result<SpooledTempFile> {
    let mut decoder = GzDecoder::new(body);
    let mut out = spooled_buffer();
    io::copy(&mut decoder, &mut out)?;
    out.flush()?;
    out.rewind()?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn read_all(mut f: SpooledTempFile) -> Vec<u8> {
        let mut buf = Vec::new();
        f.read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_repetitive_content_is_gzipped() {
        let data = b"foo".repeat(1000);
        let outcome = compress(stage(&data[..]).unwrap()).unwrap();
        assert_eq!(outcome.encoding, ContentEncoding::Gzip);
        assert_eq!(outcome.original_size, 3000);

        let zipped = read_all(outcome.body);
        assert!(zipped.len() < data.len());
        let restored = read_all(decompress(&zipped[..]).unwrap());
        assert_eq!(restored, data);
    }

    #[test]
    fn test_tiny_content_is_left_alone() {
        let outcome = compress(stage(&b"foo"[..]).unwrap()).unwrap();
        assert_eq!(outcome.encoding, ContentEncoding::Identity);
        assert_eq!(read_all(outcome.body), b"foo");
    }

    #[test]
    fn test_random_content_is_rewound_not_truncated() {
        let mut data = [0u8; 32];
        rand::rng().fill_bytes(&mut data);
        let mut staged = stage(&data[..]).unwrap();
        // Leave the cursor somewhere in the middle; compress must start from 0.
        staged.seek(SeekFrom::Start(10)).unwrap();
        let outcome = compress(staged).unwrap();
        assert_eq!(outcome.encoding, ContentEncoding::Identity);
        assert_eq!(outcome.original_size, 32);
        assert_eq!(read_all(outcome.body), data);
    }

    #[test]
    fn test_empty_content() {
        let outcome = compress(stage(&b""[..]).unwrap()).unwrap();
        assert_eq!(outcome.encoding, ContentEncoding::Identity);
        assert_eq!(outcome.original_size, 0);
    }

    #[test]
    fn test_passthrough_reports_size() {
        let outcome = passthrough(stage(&b"abcdef"[..]).unwrap()).unwrap();
        assert_eq!(outcome.original_size, 6);
        assert_eq!(read_all(outcome.body), b"abcdef");
    }

    #[test]
    fn test_header_round_trip() {
        assert_eq!(ContentEncoding::from_header(Some("gzip")), ContentEncoding::Gzip);
        assert_eq!(ContentEncoding::from_header(Some("GZIP")), ContentEncoding::Gzip);
        assert_eq!(ContentEncoding::from_header(Some("br")), ContentEncoding::Identity);
        assert_eq!(ContentEncoding::from_header(None), ContentEncoding::Identity);
        assert_eq!(ContentEncoding::Gzip.header_value(), Some("gzip"));
        assert_eq!(ContentEncoding::Identity.header_value(), None);
    }
}
