//! The release generation engine.
//!
//! Rebuilds the APT metadata artifacts on demand from the current index
//! contents. One producer walks the matching stanzas once and feeds three
//! bounded pipelines (plain, gzip, xz); each pipeline owns its own byte
//! counter and four-algorithm digester, so the three encodings report
//! independent sizes and digests over identical logical content. Channel
//! capacity is the backpressure: the producer never outruns the slowest
//! drained consumer, and a dropped consumer collapses the whole fan-out.

use crate::config::Config;
use crate::error::{RelayError, RelayResult};
use crate::index::{PackageIndex, PackageQuery};
use apt_repository::digest::HashedEntry;
use apt_repository::{Compression, DigestSet, MultiDigester, Release, PACKAGES_ENCODINGS};
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;

/// One encoding of one generated `Packages` file.
#[derive(Debug, Clone)]
pub struct PackagesArtifact {
    /// The encoding.
    pub compression: Compression,
    /// Path relative to `dists/<dist>/`.
    pub path: String,
    /// Encoded byte count.
    pub size: u64,
    /// Digests of the encoded bytes.
    pub digests: DigestSet,
}

/// A rendered `Release` document.
#[derive(Debug, Clone)]
pub struct ReleaseDocument {
    /// The exact text served as `Release` and signed for `InRelease` /
    /// `Release.gpg`.
    pub text: String,
    /// Number of per-file digest records in the hash tables.
    pub digest_records: usize,
}

/// Collect the stanza chunks for one `(dist, component, architecture)`
/// scope, `Filename` rewritten to the canonical pool path.
async fn scope_chunks(
    index: &PackageIndex,
    config: &Config,
    dist: &str,
    component: &str,
    architecture: &str,
) -> RelayResult<Vec<Bytes>> {
    let sources = config
        .sources_for(dist)
        .ok_or_else(|| RelayError::UnknownDistribution(dist.to_string()))?;
    let ids: Vec<String> = sources.into_iter().map(|source| source.id).collect();

    let entries = index
        .find(&PackageQuery {
            repository_ids: Some(ids),
            component: Some(component.to_string()),
            architecture: Some(architecture.to_string()),
            ..Default::default()
        })
        .await?;

    let mut chunks = Vec::new();
    for entry in entries {
        // A package that cannot be served from the pool (no digest) or
        // checked by the client (no size) has no place in the index file.
        let Some(filename) = entry.pool_filename() else {
            continue;
        };
        if entry.control.size().unwrap_or(None).is_none() {
            continue;
        }
        let mut control = entry.control;
        control.set("Filename", filename);
        if !chunks.is_empty() {
            chunks.push(Bytes::from_static(b"\n"));
        }
        chunks.push(Bytes::from(control.to_stanza()));
    }

    if chunks.is_empty() {
        return Err(RelayError::EmptyComponent {
            dist: dist.to_string(),
            component: component.to_string(),
            architecture: architecture.to_string(),
        });
    }
    Ok(chunks)
}

fn spawn_pipelines(
    chunks: Vec<Bytes>,
    component: &str,
    architecture: &str,
    stream_encoding: Option<Compression>,
) -> (
    Vec<JoinHandle<RelayResult<PackagesArtifact>>>,
    Option<mpsc::Receiver<std::io::Result<Bytes>>>,
) {
    let mut senders = Vec::with_capacity(PACKAGES_ENCODINGS.len());
    let mut handles = Vec::with_capacity(PACKAGES_ENCODINGS.len());
    let mut stream_rx = None;

    for &compression in PACKAGES_ENCODINGS {
        let (tx, rx) = mpsc::channel::<Bytes>(16);
        senders.push(tx);

        let out_tx = if stream_encoding == Some(compression) {
            let (out_tx, out_rx) = mpsc::channel(16);
            stream_rx = Some(out_rx);
            Some(out_tx)
        } else {
            None
        };

        let path = format!(
            "{component}/binary-{architecture}/Packages{}",
            compression.extension()
        );
        handles.push(tokio::spawn(drain_pipeline(compression, rx, out_tx, path)));
    }

    tokio::spawn(async move {
        for chunk in chunks {
            for tx in &senders {
                if tx.send(chunk.clone()).await.is_err() {
                    // A pipeline died (client hung up); stop producing.
                    return;
                }
            }
        }
    });

    (handles, stream_rx)
}

async fn drain_pipeline(
    compression: Compression,
    rx: mpsc::Receiver<Bytes>,
    out_tx: Option<mpsc::Sender<std::io::Result<Bytes>>>,
    path: String,
) -> RelayResult<PackagesArtifact> {
    let reader = StreamReader::new(ReceiverStream::new(rx).map(Ok::<_, std::io::Error>));
    let mut encoded = compression.encode_reader(reader);
    let mut digester = MultiDigester::new();
    let mut buf = vec![0u8; 8 * 1024];

    loop {
        let n = encoded.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        digester.update(&buf[..n]);
        if let Some(tx) = &out_tx {
            if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                return Err(RelayError::Io(std::io::Error::other(
                    "response consumer closed",
                )));
            }
        }
    }

    let (size, digests) = digester.finalize();
    Ok(PackagesArtifact {
        compression,
        path,
        size,
        digests,
    })
}

/// Build all three encodings of one `Packages` file and report their
/// sizes and digests. The pipelines run concurrently and are fully
/// drained before this returns.
pub async fn packages_artifacts(
    index: &PackageIndex,
    config: &Config,
    dist: &str,
    component: &str,
    architecture: &str,
) -> RelayResult<Vec<PackagesArtifact>> {
    let chunks = scope_chunks(index, config, dist, component, architecture).await?;
    let (handles, _) = spawn_pipelines(chunks, component, architecture, None);

    let mut artifacts = Vec::with_capacity(handles.len());
    for handle in handles {
        let artifact = handle
            .await
            .map_err(|e| RelayError::Io(std::io::Error::other(e)))??;
        artifacts.push(artifact);
    }
    Ok(artifacts)
}

/// Stream one encoding of one `Packages` file. The other two pipelines
/// still drain concurrently; only the requested one is forwarded.
pub async fn packages_stream(
    index: &PackageIndex,
    config: &Config,
    dist: &str,
    component: &str,
    architecture: &str,
    compression: Compression,
) -> RelayResult<ReceiverStream<std::io::Result<Bytes>>> {
    let chunks = scope_chunks(index, config, dist, component, architecture).await?;
    let (_, rx) = spawn_pipelines(chunks, component, architecture, Some(compression));
    // Every compression value is one of PACKAGES_ENCODINGS, so the
    // requested pipeline always exists.
    let rx = rx.ok_or_else(|| {
        RelayError::Io(std::io::Error::other("no pipeline for requested encoding"))
    })?;
    Ok(ReceiverStream::new(rx))
}

/// Build the `Release` document for one distribution.
pub async fn release_document(
    index: &PackageIndex,
    config: &Config,
    dist: &str,
) -> RelayResult<ReleaseDocument> {
    let sources = config
        .sources_for(dist)
        .ok_or_else(|| RelayError::UnknownDistribution(dist.to_string()))?;
    let ids: Vec<String> = sources.into_iter().map(|source| source.id).collect();

    let architectures = index.distinct_architectures(&ids).await?;
    let components = index.distinct_components(&ids).await?;
    if architectures.is_empty() || components.is_empty() {
        return Err(RelayError::EmptyDistribution(dist.to_string()));
    }

    let mut release = Release::new();
    release.origin = config.apt.origin.clone();
    release.label = config.apt.label.clone();
    release.suite = config.apt.suite.clone();
    release.codename = config.apt.codename.clone();
    release.description = config.apt.description.clone();
    release.date = Some(Utc::now());
    release.architectures = architectures.clone();
    release.components = components.clone();

    if config.apt.enable_hash {
        for component in &components {
            for architecture in &architectures {
                let artifacts =
                    match packages_artifacts(index, config, dist, component, architecture).await {
                        Ok(artifacts) => artifacts,
                        // Not every component carries every architecture.
                        Err(RelayError::EmptyComponent { .. }) => continue,
                        Err(err) => return Err(err),
                    };
                for artifact in artifacts {
                    release.add_file(HashedEntry {
                        path: artifact.path,
                        size: artifact.size,
                        digests: artifact.digests,
                    });
                }
            }
        }
    }

    let digest_records = release.files.len();
    Ok(ReleaseDocument {
        text: release.to_string(),
        digest_records,
    })
}

/// Check the preconditions APT puts on a signable release.
pub fn ensure_signable(config: &Config, document: &ReleaseDocument) -> RelayResult<()> {
    if config.apt.codename.is_none() && config.apt.suite.is_none() {
        return Err(RelayError::MissingReleaseName);
    }
    if document.digest_records == 0 {
        return Err(RelayError::NoDigests);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexEntry;
    use crate::sources::RestoreLocation;
    use apt_repository::digest::digest_data;
    use apt_repository::{ControlFile, DigestAlgorithm};

    fn test_config(enable_hash: bool, codename: Option<&str>) -> Config {
        let mut json = serde_json::json!({
            "repository": {
                "mydist": {"source": [
                    {"type": "http", "url": "https://example.org/a.deb"}
                ]}
            },
            "apt-config": {"origin": "Example", "enableHash": enable_hash}
        });
        if let Some(codename) = codename {
            json["apt-config"]["codename"] = codename.into();
        }
        serde_json::from_value(json).unwrap()
    }

    async fn seeded_index() -> (PackageIndex, Vec<ControlFile>) {
        let index = PackageIndex::in_memory().await.unwrap();
        let stanzas = [
            "Package: alpha\nVersion: 1.0\nArchitecture: amd64\nSize: 120\n\
             SHA256: 1111\nMD5sum: aaaa\nDescription: first\n",
            "Package: beta\nVersion: 2.0\nArchitecture: all\nSize: 80\nSHA256: 2222\n",
            "Package: gamma\nVersion: 3.0\nArchitecture: arm64\nSize: 50\nSHA1: 3333\n",
        ];
        let mut controls = Vec::new();
        for stanza in stanzas {
            let control = ControlFile::parse(stanza).unwrap();
            index
                .add(&IndexEntry {
                    repository_id: "mydist:0".to_string(),
                    component: "main".to_string(),
                    control: control.clone(),
                    restore: RestoreLocation::Url {
                        url: "https://example.org/a.deb".to_string(),
                    },
                })
                .await
                .unwrap();
            controls.push(control);
        }
        (index, controls)
    }

    fn expected_text(controls: &[&ControlFile]) -> String {
        let mut text = String::new();
        for (i, control) in controls.iter().enumerate() {
            let mut control = (*control).clone();
            let arch = control.architecture().unwrap().to_string();
            let digest = control.strongest_digest().unwrap().1.to_string();
            control.set("Filename", format!("pool/main/binary-{arch}/{digest}.deb"));
            if i > 0 {
                text.push('\n');
            }
            text.push_str(&control.to_stanza());
        }
        text
    }

    #[tokio::test]
    async fn raw_artifact_digests_match_recomputation() {
        let (index, controls) = seeded_index().await;
        let config = test_config(true, Some("mydist"));

        let artifacts = packages_artifacts(&index, &config, "mydist", "main", "amd64")
            .await
            .unwrap();
        assert_eq!(artifacts.len(), 3);

        // amd64 scope folds the arch-all entry in, but not the arm64 one.
        let expected = expected_text(&[&controls[0], &controls[1]]);
        let (size, digests) = digest_data(expected.as_bytes());

        let raw = &artifacts[0];
        assert_eq!(raw.compression, Compression::Plain);
        assert_eq!(raw.path, "main/binary-amd64/Packages");
        assert_eq!(raw.size, size);
        assert_eq!(raw.digests, digests);
    }

    #[tokio::test]
    async fn encodings_differ_in_size_and_digest() {
        let (index, _) = seeded_index().await;
        let config = test_config(true, Some("mydist"));
        let artifacts = packages_artifacts(&index, &config, "mydist", "main", "amd64")
            .await
            .unwrap();

        let raw = &artifacts[0];
        let gz = &artifacts[1];
        let xz = &artifacts[2];
        assert_eq!(gz.compression, Compression::Gzip);
        assert_eq!(xz.compression, Compression::Xz);
        assert!(gz.path.ends_with(".gz"));
        assert!(xz.path.ends_with(".xz"));
        assert_ne!(raw.size, gz.size);
        assert_ne!(
            gz.digests.get(DigestAlgorithm::Sha256),
            xz.digests.get(DigestAlgorithm::Sha256)
        );
    }

    #[tokio::test]
    async fn stream_matches_reported_digest() {
        let (index, _) = seeded_index().await;
        let config = test_config(true, Some("mydist"));

        let artifacts = packages_artifacts(&index, &config, "mydist", "main", "amd64")
            .await
            .unwrap();
        let gz = artifacts
            .iter()
            .find(|a| a.compression == Compression::Gzip)
            .unwrap();

        let mut stream = packages_stream(
            &index,
            &config,
            "mydist",
            "main",
            "amd64",
            Compression::Gzip,
        )
        .await
        .unwrap();
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            bytes.extend_from_slice(&chunk.unwrap());
        }

        let (size, digests) = digest_data(&bytes);
        assert_eq!(size, gz.size);
        assert_eq!(digests, gz.digests);

        // The gzip payload decodes back to the raw index text.
        let raw_text = Compression::Gzip.decompress(&bytes).unwrap();
        let stanzas = ControlFile::parse_many(&String::from_utf8(raw_text).unwrap()).unwrap();
        assert_eq!(stanzas.len(), 2);
    }

    #[tokio::test]
    async fn roundtrip_preserves_fields_except_filename() {
        let (index, controls) = seeded_index().await;
        let config = test_config(true, Some("mydist"));

        let mut stream = packages_stream(
            &index,
            &config,
            "mydist",
            "main",
            "amd64",
            Compression::Plain,
        )
        .await
        .unwrap();
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            bytes.extend_from_slice(&chunk.unwrap());
        }

        let stanzas = ControlFile::parse_many(&String::from_utf8(bytes).unwrap()).unwrap();
        let alpha = &stanzas[0];
        assert_eq!(
            alpha.get("Filename"),
            Some("pool/main/binary-amd64/1111.deb")
        );
        for (field, value) in controls[0].iter() {
            assert_eq!(alpha.get(field), Some(value), "field {field} diverged");
        }
    }

    #[tokio::test]
    async fn empty_scope_is_an_error_not_an_empty_stream() {
        let (index, _) = seeded_index().await;
        let config = test_config(true, Some("mydist"));

        let err = packages_artifacts(&index, &config, "mydist", "main", "riscv64")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::EmptyComponent { .. }));

        let err = packages_artifacts(&index, &config, "mydist", "nonfree", "amd64")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::EmptyComponent { .. }));

        let err = packages_artifacts(&index, &config, "otherdist", "main", "amd64")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::UnknownDistribution(_)));
    }

    #[tokio::test]
    async fn release_document_lists_scopes_and_digests() {
        let (index, _) = seeded_index().await;
        let config = test_config(true, Some("mydist"));

        let document = release_document(&index, &config, "mydist").await.unwrap();
        assert!(document.text.contains("Origin: Example\n"));
        assert!(document.text.contains("Codename: mydist\n"));
        assert!(document.text.contains("Architectures: all amd64 arm64\n"));
        assert!(document.text.contains("Components: main\n"));
        assert!(document.text.contains("SHA256:\n"));
        assert!(document.text.contains(" main/binary-amd64/Packages\n"));
        assert!(document.text.contains(" main/binary-amd64/Packages.gz\n"));
        assert!(document.text.contains(" main/binary-amd64/Packages.xz\n"));
        // 3 architectures x 3 encodings for the single component.
        assert_eq!(document.digest_records, 9);
        assert!(ensure_signable(&config, &document).is_ok());
    }

    #[tokio::test]
    async fn signing_preconditions_are_enforced() {
        let (index, _) = seeded_index().await;

        let unnamed = test_config(true, None);
        let document = release_document(&index, &unnamed, "mydist").await.unwrap();
        assert!(matches!(
            ensure_signable(&unnamed, &document),
            Err(RelayError::MissingReleaseName)
        ));

        let hashless = test_config(false, Some("mydist"));
        let document = release_document(&index, &hashless, "mydist").await.unwrap();
        assert_eq!(document.digest_records, 0);
        assert!(!document.text.contains("SHA256:\n"));
        assert!(matches!(
            ensure_signable(&hashless, &document),
            Err(RelayError::NoDigests)
        ));
    }

    #[tokio::test]
    async fn empty_distribution_is_an_error() {
        let index = PackageIndex::in_memory().await.unwrap();
        let config = test_config(true, Some("mydist"));
        let err = release_document(&index, &config, "mydist").await.unwrap_err();
        assert!(matches!(err, RelayError::EmptyDistribution(_)));
    }
}
