//! # apt-relay
//!
//! A Debian-style package repository whose package set is aggregated from
//! heterogeneous remote sources: plain HTTP, GitHub branches and releases,
//! Google Drive, Oracle Cloud buckets, container image layers and mirrored
//! upstream APT repositories.
//!
//! The two central subsystems are the sync engine ([`sync`]), which
//! normalizes those remotes into one deduplicated package index, and the
//! release generation engine ([`generate`]), which reconstructs the APT
//! metadata artifacts (`Packages`, `Packages.gz`, `Packages.xz`, `Release`,
//! `InRelease`, `Release.gpg`) on demand from whatever is currently
//! indexed. Around them sit the source adapters ([`sources`]), the durable
//! index ([`index`]), the content-addressed blob cache ([`cache`]), the
//! signing wrapper ([`sign`]) and the HTTP surface ([`web`]).

pub mod cache;
pub mod config;
pub mod deb;
pub mod error;
pub mod generate;
pub mod index;
pub mod sign;
pub mod sources;
pub mod sync;
pub mod web;

pub use cache::BlobCache;
pub use config::Config;
pub use error::{RelayError, RelayResult};
pub use index::{IndexEntry, PackageIndex, PackageQuery};
pub use sign::Signer;
pub use sources::{SourceContext, SourceDescriptor};
pub use web::AppState;
