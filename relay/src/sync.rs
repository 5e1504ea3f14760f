//! The source synchronization engine.
//!
//! Drives every configured source and populates the package index. The
//! engine itself never prints or logs package-level outcomes; the event
//! callback is its only observability channel. Failures are scoped: a bad
//! artifact skips to the next artifact, a bad source skips to the next
//! source, and a duplicate key is an expected non-event during re-sync.

use crate::config::{Config, ResolvedSource};
use crate::deb;
use crate::error::{RelayError, RelayResult};
use crate::index::{IndexEntry, PackageIndex};
use crate::sources::{self, RemoteArtifact, SourceContext};

/// Progress reported per artifact (and per failed source).
#[derive(Debug)]
pub enum SyncEvent<'a> {
    /// An artifact was parsed and committed to the index.
    Ingested {
        /// Source identity.
        source_id: &'a str,
        /// The committed entry.
        entry: &'a IndexEntry,
    },
    /// An artifact (or a whole source enumeration) was skipped.
    Failed {
        /// Source identity.
        source_id: &'a str,
        /// Artifact name, or `"(enumerate)"` for enumeration failures.
        artifact: &'a str,
        /// What went wrong. [`RelayError::Duplicate`] is benign.
        error: &'a RelayError,
    },
}

/// Counters of one full sync pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    /// Entries removed because their source left the configuration.
    pub pruned: u64,
    /// Artifacts committed.
    pub ingested: usize,
    /// Artifacts skipped (including duplicates).
    pub failed: usize,
}

/// Sync every configured source.
///
/// Stale-source pruning runs once, up front, against the resolved live
/// identity set; per-source work then proceeds in configuration order.
pub async fn sync_all(
    index: &PackageIndex,
    ctx: &SourceContext,
    config: &Config,
    on_event: &mut dyn FnMut(SyncEvent<'_>),
) -> RelayResult<SyncSummary> {
    let live = config.live_source_ids();
    let mut summary = SyncSummary {
        pruned: index.prune_except(&live).await?,
        ..Default::default()
    };

    for source in config.all_sources() {
        match sync_source(index, ctx, &source, on_event).await {
            Ok((ingested, failed)) => {
                summary.ingested += ingested;
                summary.failed += failed;
            }
            Err(error) => {
                summary.failed += 1;
                on_event(SyncEvent::Failed {
                    source_id: &source.id,
                    artifact: "(enumerate)",
                    error: &error,
                });
            }
        }
    }
    Ok(summary)
}

/// Sync one source: enumerate, then ingest artifact by artifact.
pub async fn sync_source(
    index: &PackageIndex,
    ctx: &SourceContext,
    source: &ResolvedSource<'_>,
    on_event: &mut dyn FnMut(SyncEvent<'_>),
) -> RelayResult<(usize, usize)> {
    let artifacts = sources::enumerate(ctx, source.descriptor).await?;
    Ok(ingest_artifacts(index, ctx, source, artifacts, on_event).await)
}

/// Ingest a batch of enumerated artifacts with per-artifact isolation.
/// Returns `(ingested, failed)`.
pub async fn ingest_artifacts(
    index: &PackageIndex,
    ctx: &SourceContext,
    source: &ResolvedSource<'_>,
    artifacts: Vec<RemoteArtifact>,
    on_event: &mut dyn FnMut(SyncEvent<'_>),
) -> (usize, usize) {
    let mut ingested = 0;
    let mut failed = 0;
    for artifact in artifacts {
        match ingest_one(index, ctx, source, &artifact).await {
            Ok(entry) => {
                ingested += 1;
                on_event(SyncEvent::Ingested {
                    source_id: &source.id,
                    entry: &entry,
                });
            }
            Err(error) => {
                failed += 1;
                on_event(SyncEvent::Failed {
                    source_id: &source.id,
                    artifact: &artifact.name,
                    error: &error,
                });
            }
        }
    }
    (ingested, failed)
}

async fn ingest_one(
    index: &PackageIndex,
    ctx: &SourceContext,
    source: &ResolvedSource<'_>,
    artifact: &RemoteArtifact,
) -> RelayResult<IndexEntry> {
    let control = match &artifact.control {
        Some(control) => control.clone(),
        None => {
            let stream = sources::open(ctx, source.descriptor, &artifact.location).await?;
            deb::scan_package(stream).await?
        }
    };
    control.require("Package")?;
    control.require("Version")?;
    control.require("Architecture")?;

    let entry = IndexEntry {
        repository_id: source.id.clone(),
        component: source.component.to_string(),
        control,
        restore: artifact.location.clone(),
    };
    index.add(&entry).await?;
    Ok(entry)
}
