//! Source adapters.
//!
//! Each configured source variant knows two things: how to enumerate the
//! package artifacts it offers, and how to reopen a byte stream for one of
//! them later from its stored restore location. Dispatch is a closed,
//! exhaustive match over the descriptor enum; adding a source type means
//! adding a variant and a module, nothing dynamic.

pub mod docker;
pub mod github;
pub mod google_drive;
pub mod http;
pub mod mirror;
pub mod oracle_bucket;

use crate::error::{RelayError, RelayResult};
use apt_repository::ControlFile;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

/// A readable artifact byte stream.
pub type ArtifactStream = Box<dyn AsyncRead + Send + Unpin>;

/// Shared context for all adapters.
#[derive(Debug, Clone)]
pub struct SourceContext {
    /// HTTP client reused across requests.
    pub http: reqwest::Client,
}

impl SourceContext {
    /// Build the shared client.
    pub fn new() -> RelayResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("apt-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }
}

/// Extra authentication attached to plain HTTP requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpAuth {
    /// Headers to send verbatim.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Query parameters to append.
    #[serde(default)]
    pub query: BTreeMap<String, String>,
}

/// Credentials for a container registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryAuth {
    /// Registry user.
    pub username: String,
    /// Registry password or token.
    pub password: String,
}

/// Which part of a GitHub repository to read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "subType", rename_all = "snake_case")]
pub enum GithubTarget {
    /// Package files committed on a branch.
    Branch {
        /// Branch name.
        #[serde(rename = "ref")]
        branch: String,
    },
    /// Release assets.
    Release {
        /// Allow-list of release tags; empty means every release.
        #[serde(default)]
        tags: Vec<String>,
    },
}

fn default_tag_limit() -> usize {
    6
}

/// One remote source of packages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceDescriptor {
    /// A single `.deb` behind a URL.
    Http {
        /// The artifact URL.
        url: String,
        /// Optional request authentication.
        #[serde(default)]
        auth: Option<HttpAuth>,
    },
    /// A GitHub repository, by branch tree or release assets.
    Github {
        /// Repository owner.
        owner: String,
        /// Repository name.
        repo: String,
        /// API token for private repositories and rate limits.
        #[serde(default)]
        token: Option<String>,
        /// Branch or release mode.
        #[serde(flatten)]
        target: GithubTarget,
    },
    /// Files in a Google Drive.
    GoogleDrive {
        /// OAuth client id.
        client_id: String,
        /// OAuth client secret.
        client_secret: String,
        /// OAuth access token.
        token: String,
        /// Explicit file ids; empty means list and filter by extension.
        #[serde(default)]
        file_ids: Vec<String>,
    },
    /// Objects in an Oracle Cloud bucket.
    OracleBucket {
        /// Object Storage namespace.
        namespace: String,
        /// Bucket name.
        bucket: String,
        /// Bucket region, e.g. `eu-frankfurt-1`.
        region: String,
        /// Pre-authenticated request base URL; unauthenticated access to a
        /// public bucket is used when absent.
        #[serde(default)]
        pre_authenticated: Option<String>,
        /// Explicit object paths; empty means list and filter.
        #[serde(default)]
        paths: Vec<String>,
    },
    /// Package files inside container image layers.
    Docker {
        /// Image reference, e.g. `ghcr.io/owner/image:tag`.
        image: String,
        /// Registry credentials.
        #[serde(default)]
        auth: Option<RegistryAuth>,
        /// Tags to scan; empty falls back to the most recent `tag_limit`.
        #[serde(default)]
        tags: Vec<String>,
        /// How many recent tags to scan when none are configured.
        #[serde(default = "default_tag_limit")]
        tag_limit: usize,
    },
    /// A mirrored upstream APT repository.
    Mirror {
        /// Upstream repository root.
        url: String,
        /// Upstream distribution.
        distribution: String,
        /// Components to mirror; empty means every declared component.
        #[serde(default)]
        components: Vec<String>,
    },
}

impl SourceDescriptor {
    /// Short type label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceDescriptor::Http { .. } => "http",
            SourceDescriptor::Github { .. } => "github",
            SourceDescriptor::GoogleDrive { .. } => "google_drive",
            SourceDescriptor::OracleBucket { .. } => "oracle_bucket",
            SourceDescriptor::Docker { .. } => "docker",
            SourceDescriptor::Mirror { .. } => "mirror",
        }
    }
}

/// Opaque payload stored per index entry, sufficient to reopen the
/// artifact without re-enumerating its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RestoreLocation {
    /// Direct URL (http, github, mirror sources).
    Url {
        /// The artifact URL.
        url: String,
    },
    /// A Google Drive file.
    DriveFile {
        /// Drive file id.
        file_id: String,
    },
    /// An object in a bucket.
    BucketObject {
        /// Object path within the bucket.
        path: String,
    },
    /// A file inside a container image layer.
    DockerLayer {
        /// Layer blob digest.
        layer_digest: String,
        /// Layer media type, used to pick the decoder on restore.
        media_type: String,
        /// Path of the member inside the layer tar.
        member_path: String,
    },
}

/// One enumerated remote artifact.
#[derive(Debug, Clone)]
pub struct RemoteArtifact {
    /// Human-readable name for logs and error reports.
    pub name: String,
    /// How to reopen the artifact later.
    pub location: RestoreLocation,
    /// Control metadata, when the adapter already has it (mirror and
    /// docker enumerate through the metadata/layer and carry it along).
    pub control: Option<ControlFile>,
}

/// Enumerate the artifacts a source currently offers.
pub async fn enumerate(
    ctx: &SourceContext,
    descriptor: &SourceDescriptor,
) -> RelayResult<Vec<RemoteArtifact>> {
    match descriptor {
        SourceDescriptor::Http { url, .. } => http::enumerate(url),
        SourceDescriptor::Github {
            owner,
            repo,
            token,
            target,
        } => github::enumerate(ctx, owner, repo, token.as_deref(), target).await,
        SourceDescriptor::GoogleDrive {
            token, file_ids, ..
        } => google_drive::enumerate(ctx, token, file_ids).await,
        SourceDescriptor::OracleBucket {
            namespace,
            bucket,
            region,
            pre_authenticated,
            paths,
        } => {
            oracle_bucket::enumerate(
                ctx,
                namespace,
                bucket,
                region,
                pre_authenticated.as_deref(),
                paths,
            )
            .await
        }
        SourceDescriptor::Docker {
            image,
            auth,
            tags,
            tag_limit,
        } => docker::enumerate(ctx, image, auth.as_ref(), tags, *tag_limit).await,
        SourceDescriptor::Mirror {
            url,
            distribution,
            components,
        } => mirror::enumerate(ctx, url, distribution, components).await,
    }
}

/// Reopen an artifact from its restore location.
///
/// The descriptor must be the artifact's original source; a location kind
/// the source cannot produce means the index entry predates a
/// configuration change and needs a re-sync.
pub async fn open(
    ctx: &SourceContext,
    descriptor: &SourceDescriptor,
    location: &RestoreLocation,
) -> RelayResult<ArtifactStream> {
    match (descriptor, location) {
        (SourceDescriptor::Http { auth, .. }, RestoreLocation::Url { url }) => {
            http::open(ctx, url, auth.as_ref()).await
        }
        (SourceDescriptor::Github { token, .. }, RestoreLocation::Url { url }) => {
            github::open(ctx, url, token.as_deref()).await
        }
        (SourceDescriptor::Mirror { .. }, RestoreLocation::Url { url }) => {
            mirror::open(ctx, url).await
        }
        (SourceDescriptor::GoogleDrive { token, .. }, RestoreLocation::DriveFile { file_id }) => {
            google_drive::open(ctx, token, file_id).await
        }
        (
            SourceDescriptor::OracleBucket {
                namespace,
                bucket,
                region,
                pre_authenticated,
                ..
            },
            RestoreLocation::BucketObject { path },
        ) => {
            oracle_bucket::open(
                ctx,
                namespace,
                bucket,
                region,
                pre_authenticated.as_deref(),
                path,
            )
            .await
        }
        (
            SourceDescriptor::Docker { image, auth, .. },
            RestoreLocation::DockerLayer {
                layer_digest,
                media_type,
                member_path,
            },
        ) => docker::open(ctx, image, auth.as_ref(), layer_digest, media_type, member_path).await,
        (descriptor, _) => Err(RelayError::SourceUnavailable(format!(
            "restore location does not match a '{}' source",
            descriptor.kind()
        ))),
    }
}

/// Whether a remote file name looks like a binary package.
pub(crate) fn is_package_name(name: &str) -> bool {
    name.ends_with(".deb")
}

/// Turn an HTTP response body into an [`ArtifactStream`].
pub(crate) fn response_stream(response: reqwest::Response) -> ArtifactStream {
    Box::new(StreamReader::new(
        response.bytes_stream().map_err(std::io::Error::other),
    ))
}

/// Issue a GET and fail on non-success statuses, mapping 404 onto
/// [`RelayError::RemoteNotFound`].
pub(crate) async fn checked_get(
    request: reqwest::RequestBuilder,
    what: &str,
) -> RelayResult<reqwest::Response> {
    let response = request.send().await?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(RelayError::RemoteNotFound(what.to_string()));
    }
    Ok(response.error_for_status()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_json_shape() {
        let json = r#"{"type": "github", "owner": "o", "repo": "r",
                       "subType": "branch", "ref": "main"}"#;
        let descriptor: SourceDescriptor = serde_json::from_str(json).unwrap();
        match &descriptor {
            SourceDescriptor::Github { owner, target, .. } => {
                assert_eq!(owner, "o");
                assert!(matches!(target, GithubTarget::Branch { branch } if branch == "main"));
            }
            other => panic!("wrong variant: {other:?}"),
        }
        assert_eq!(descriptor.kind(), "github");
    }

    #[test]
    fn docker_tag_limit_defaults() {
        let json = r#"{"type": "docker", "image": "ghcr.io/o/i"}"#;
        let descriptor: SourceDescriptor = serde_json::from_str(json).unwrap();
        match descriptor {
            SourceDescriptor::Docker { tag_limit, tags, .. } => {
                assert_eq!(tag_limit, 6);
                assert!(tags.is_empty());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn restore_location_roundtrips_as_json() {
        let location = RestoreLocation::DockerLayer {
            layer_digest: "sha256:abc".into(),
            media_type: "application/vnd.oci.image.layer.v1.tar+gzip".into(),
            member_path: "opt/pkgs/a.deb".into(),
        };
        let json = serde_json::to_string(&location).unwrap();
        assert_eq!(
            serde_json::from_str::<RestoreLocation>(&json).unwrap(),
            location
        );
    }

    #[tokio::test]
    async fn mismatched_restore_is_source_unavailable() {
        let ctx = SourceContext::new().unwrap();
        let descriptor = SourceDescriptor::Http {
            url: "https://example.org/a.deb".into(),
            auth: None,
        };
        let location = RestoreLocation::DriveFile {
            file_id: "x".into(),
        };
        let err = match open(&ctx, &descriptor, &location).await {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(matches!(err, RelayError::SourceUnavailable(_)));
    }
}
