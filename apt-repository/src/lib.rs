//! # APT Repository Primitives
//!
//! Building blocks for producing and consuming APT repository metadata:
//! Debian control stanzas, the `Release` document, multi-algorithm content
//! digests and the compression codecs APT clients negotiate.
//!
//! The crate is deliberately free of network and storage concerns; callers
//! feed it bytes and get bytes back. Everything that touches the wire lives
//! in the service crate on top.
//!
//! ## Example
//!
//! ```rust
//! use apt_repository::ControlFile;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let stanza = "Package: hello\nVersion: 2.10\nArchitecture: amd64\nSize: 1024\n";
//! let control = ControlFile::parse(stanza)?;
//! assert_eq!(control.package(), Some("hello"));
//! assert_eq!(control.to_stanza(), stanza);
//! # Ok(())
//! # }
//! ```

pub mod compression;
pub mod control;
pub mod digest;
pub mod error;
pub mod release;

pub use compression::Compression;
pub use control::ControlFile;
pub use digest::{DigestAlgorithm, DigestSet, HashedEntry, MultiDigester};
pub use error::{AptRepositoryError, Result};
pub use release::Release;

/// The encodings a generated `Packages` file is offered in, in the order
/// an upstream `Packages` index is probed during mirroring.
pub const PACKAGES_ENCODINGS: &[Compression] =
    &[Compression::Plain, Compression::Gzip, Compression::Xz];
