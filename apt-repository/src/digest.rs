//! Multi-algorithm content digesting.
//!
//! APT metadata reports MD5, SHA1, SHA256 and SHA512 side by side, so the
//! digester here always runs all four over a single pass of the input.

use serde::{Deserialize, Serialize};
use sha1::Digest as _;
use std::fmt;
use std::io::Write;

/// The digest algorithms APT repositories publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    /// MD5.
    Md5,
    /// SHA-1.
    Sha1,
    /// SHA-256.
    Sha256,
    /// SHA-512.
    Sha512,
}

impl DigestAlgorithm {
    /// Field name used for this algorithm's block in a `Release` document.
    pub fn release_field(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5Sum",
            DigestAlgorithm::Sha1 => "SHA1",
            DigestAlgorithm::Sha256 => "SHA256",
            DigestAlgorithm::Sha512 => "SHA512",
        }
    }

    /// Field name used for this algorithm in a control stanza.
    ///
    /// Differs from the Release spelling for MD5 only (`MD5sum`).
    pub fn control_field(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5sum",
            _ => self.release_field(),
        }
    }

    /// Every supported algorithm, in Release-document order.
    pub fn all() -> &'static [DigestAlgorithm] {
        &[
            DigestAlgorithm::Md5,
            DigestAlgorithm::Sha1,
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Sha512,
        ]
    }

    /// Preference order when exactly one digest is needed (cache keys,
    /// pool file names): strongest common algorithm first.
    pub fn preference() -> &'static [DigestAlgorithm] {
        &[
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Sha512,
            DigestAlgorithm::Sha1,
            DigestAlgorithm::Md5,
        ]
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.release_field())
    }
}

/// Hex digests of one byte sequence, at most one per algorithm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestSet {
    md5: Option<String>,
    sha1: Option<String>,
    sha256: Option<String>,
    sha512: Option<String>,
}

impl DigestSet {
    /// Create an empty digest set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a digest for one algorithm.
    pub fn insert(&mut self, algorithm: DigestAlgorithm, hex: String) {
        let slot = match algorithm {
            DigestAlgorithm::Md5 => &mut self.md5,
            DigestAlgorithm::Sha1 => &mut self.sha1,
            DigestAlgorithm::Sha256 => &mut self.sha256,
            DigestAlgorithm::Sha512 => &mut self.sha512,
        };
        *slot = Some(hex);
    }

    /// Look up the digest for one algorithm.
    pub fn get(&self, algorithm: DigestAlgorithm) -> Option<&str> {
        match algorithm {
            DigestAlgorithm::Md5 => self.md5.as_deref(),
            DigestAlgorithm::Sha1 => self.sha1.as_deref(),
            DigestAlgorithm::Sha256 => self.sha256.as_deref(),
            DigestAlgorithm::Sha512 => self.sha512.as_deref(),
        }
    }

    /// The strongest available digest, following
    /// [`DigestAlgorithm::preference`].
    pub fn strongest(&self) -> Option<(DigestAlgorithm, &str)> {
        DigestAlgorithm::preference()
            .iter()
            .find_map(|&alg| self.get(alg).map(|hex| (alg, hex)))
    }

    /// Iterate present digests in Release-document order.
    pub fn iter(&self) -> impl Iterator<Item = (DigestAlgorithm, &str)> {
        DigestAlgorithm::all()
            .iter()
            .filter_map(|&alg| self.get(alg).map(|hex| (alg, hex)))
    }

    /// Whether no digest is recorded.
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

/// One published file: relative path, byte size and its digests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashedEntry {
    /// Path relative to the `dists/<dist>/` directory.
    pub path: String,
    /// Size of the encoded file in bytes.
    pub size: u64,
    /// Digests of the encoded bytes.
    pub digests: DigestSet,
}

/// Streaming digester running all four algorithms plus a byte counter
/// over a single pass.
pub struct MultiDigester {
    md5: md5::Context,
    sha1: sha1::Sha1,
    sha256: sha2::Sha256,
    sha512: sha2::Sha512,
    size: u64,
}

impl MultiDigester {
    /// Create a fresh digester.
    pub fn new() -> Self {
        Self {
            md5: md5::Context::new(),
            sha1: sha1::Sha1::new(),
            sha256: sha2::Sha256::new(),
            sha512: sha2::Sha512::new(),
            size: 0,
        }
    }

    /// Feed a chunk of data.
    pub fn update(&mut self, data: &[u8]) {
        self.size += data.len() as u64;
        self.md5.consume(data);
        self.sha1.update(data);
        self.sha256.update(data);
        self.sha512.update(data);
    }

    /// Bytes consumed so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Consume the digester, returning the byte count and all digests.
    pub fn finalize(self) -> (u64, DigestSet) {
        let mut digests = DigestSet::new();
        digests.insert(DigestAlgorithm::Md5, format!("{:x}", self.md5.compute()));
        digests.insert(DigestAlgorithm::Sha1, hex::encode(self.sha1.finalize()));
        digests.insert(
            DigestAlgorithm::Sha256,
            hex::encode(self.sha256.finalize()),
        );
        digests.insert(
            DigestAlgorithm::Sha512,
            hex::encode(self.sha512.finalize()),
        );
        (self.size, digests)
    }
}

impl Default for MultiDigester {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for MultiDigester {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Digest an in-memory byte slice with all algorithms.
pub fn digest_data(data: &[u8]) -> (u64, DigestSet) {
    let mut digester = MultiDigester::new();
    digester.update(data);
    digester.finalize()
}
