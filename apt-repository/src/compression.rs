//! Compression codecs for APT index files.
//!
//! APT clients fetch `Packages` either plain or as `.gz`/`.xz`; the same
//! three encodings are published in the `Release` hash tables.

use crate::Result;
use async_compression::tokio::bufread::{GzipDecoder, GzipEncoder, XzDecoder, XzEncoder};
use std::io::{Read, Write};
use tokio::io::{AsyncBufRead, AsyncRead};

/// Encodings offered for generated index files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// No compression.
    Plain,
    /// Gzip.
    Gzip,
    /// XZ / LZMA2.
    Xz,
}

impl Compression {
    /// File-name suffix for this encoding.
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Plain => "",
            Compression::Gzip => ".gz",
            Compression::Xz => ".xz",
        }
    }

    /// `Content-Type` served for a file in this encoding.
    pub fn content_type(&self) -> &'static str {
        match self {
            Compression::Plain => "text/plain",
            Compression::Gzip => "application/gzip",
            Compression::Xz => "application/x-xz",
        }
    }

    /// Wrap an async reader so that reads yield this encoding of the
    /// inner bytes.
    pub fn encode_reader<'a, R>(self, reader: R) -> Box<dyn AsyncRead + Send + Unpin + 'a>
    where
        R: AsyncBufRead + Send + Unpin + 'a,
    {
        match self {
            Compression::Plain => Box::new(reader),
            Compression::Gzip => Box::new(GzipEncoder::new(reader)),
            Compression::Xz => Box::new(XzEncoder::new(reader)),
        }
    }

    /// Wrap an async reader so that reads yield the decoded form of the
    /// inner bytes.
    pub fn decode_reader<'a, R>(self, reader: R) -> Box<dyn AsyncRead + Send + Unpin + 'a>
    where
        R: AsyncBufRead + Send + Unpin + 'a,
    {
        match self {
            Compression::Plain => Box::new(reader),
            Compression::Gzip => Box::new(GzipDecoder::new(reader)),
            Compression::Xz => Box::new(XzDecoder::new(reader)),
        }
    }

    /// Compress a byte slice.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::Plain => Ok(data.to_vec()),
            Compression::Gzip => {
                let mut encoder =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            Compression::Xz => {
                let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
        }
    }

    /// Decompress a byte slice.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Compression::Plain => out.extend_from_slice(data),
            Compression::Gzip => {
                flate2::read::GzDecoder::new(data).read_to_end(&mut out)?;
            }
            Compression::Xz => {
                xz2::read::XzDecoder::new(data).read_to_end(&mut out)?;
            }
        }
        Ok(out)
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::Plain => write!(f, "plain"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Xz => write!(f, "xz"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn extensions_and_content_types() {
        assert_eq!(Compression::Plain.extension(), "");
        assert_eq!(Compression::Gzip.extension(), ".gz");
        assert_eq!(Compression::Xz.extension(), ".xz");
        assert_eq!(Compression::Xz.content_type(), "application/x-xz");
    }

    #[test]
    fn gzip_roundtrip() {
        let data = b"Package: hello\nVersion: 1\n";
        let compressed = Compression::Gzip.compress(data).unwrap();
        assert_ne!(compressed.as_slice(), data.as_slice());
        assert_eq!(Compression::Gzip.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn xz_roundtrip() {
        let data = b"Package: hello\nVersion: 1\n";
        let compressed = Compression::Xz.compress(data).unwrap();
        assert_ne!(compressed.as_slice(), data.as_slice());
        assert_eq!(Compression::Xz.decompress(&compressed).unwrap(), data);
    }

    #[tokio::test]
    async fn async_encoder_matches_sync_decoder() {
        let data = b"Package: hello\nVersion: 1\n".repeat(64);
        for compression in [Compression::Gzip, Compression::Xz] {
            let mut encoded = Vec::new();
            let mut reader = compression.encode_reader(&data[..]);
            reader.read_to_end(&mut encoded).await.unwrap();
            assert_eq!(compression.decompress(&encoded).unwrap(), data);
        }
    }

    #[tokio::test]
    async fn async_decoder_matches_sync_encoder() {
        let data = b"stanza text\n".repeat(32);
        let encoded = Compression::Xz.compress(&data).unwrap();
        let mut decoded = Vec::new();
        let mut reader = Compression::Xz.decode_reader(&encoded[..]);
        reader.read_to_end(&mut decoded).await.unwrap();
        assert_eq!(decoded, data);
    }
}
