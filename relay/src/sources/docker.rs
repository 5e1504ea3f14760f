//! Container registry source.
//!
//! Speaks the registry v2 protocol directly: Bearer token handshake on a
//! 401 challenge, manifest fetch (single image or multi-arch index), then
//! a streaming walk of each layer tar looking for package files. Control
//! metadata is parsed in-flight, so enumeration returns artifacts that
//! already carry their stanzas.
//!
//! Registries serialize blob downloads per authenticated session, so each
//! layer stream is drained to its end before the next layer is opened.

use super::{
    is_package_name, ArtifactStream, RegistryAuth, RemoteArtifact, RestoreLocation, SourceContext,
};
use crate::deb;
use crate::error::{RelayError, RelayResult};
use async_compression::tokio::bufread::{GzipDecoder, ZstdDecoder};
use futures::{StreamExt, TryStreamExt};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::BTreeMap;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;
use tracing::warn;

const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

/// A parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ImageRef {
    host: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

fn parse_image(image: &str) -> ImageRef {
    let (name, digest) = match image.split_once('@') {
        Some((name, digest)) => (name, Some(digest.to_string())),
        None => (image, None),
    };

    // A tag colon comes after the last path separator; anything before the
    // first slash containing a dot, a port or "localhost" is a registry host.
    let (name, tag) = match name.rsplit_once(':') {
        Some((head, tail)) if !tail.contains('/') => (head, Some(tail.to_string())),
        _ => (name, None),
    };

    let (host, repository) = match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (first.to_string(), rest.to_string())
        }
        Some(_) => ("registry-1.docker.io".to_string(), name.to_string()),
        None => ("registry-1.docker.io".to_string(), format!("library/{name}")),
    };

    ImageRef {
        host,
        repository,
        tag,
        digest,
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    /// Sub-manifests of a multi-arch index; empty for a plain image.
    #[serde(default)]
    manifests: Vec<ManifestRef>,
    /// Layers of a plain image manifest.
    #[serde(default)]
    layers: Vec<LayerRef>,
}

#[derive(Debug, Deserialize)]
struct ManifestRef {
    digest: String,
    #[serde(default)]
    platform: Option<Platform>,
}

#[derive(Debug, Deserialize)]
struct Platform {
    #[serde(default)]
    architecture: String,
    #[serde(default)]
    os: String,
}

#[derive(Debug, Deserialize)]
struct LayerRef {
    digest: String,
    #[serde(rename = "mediaType")]
    media_type: String,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Minimal registry v2 client bound to one repository.
struct Registry<'a> {
    ctx: &'a SourceContext,
    auth: Option<&'a RegistryAuth>,
    image: ImageRef,
    token: Option<String>,
}

impl<'a> Registry<'a> {
    fn new(ctx: &'a SourceContext, auth: Option<&'a RegistryAuth>, image: ImageRef) -> Self {
        Self {
            ctx,
            auth,
            image,
            token: None,
        }
    }

    async fn get(&mut self, url: &str, accept: Option<&str>) -> RelayResult<reqwest::Response> {
        for attempt in 0..2 {
            let mut request = self.ctx.http.get(url);
            if let Some(accept) = accept {
                request = request.header("Accept", accept);
            }
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            let response = request.send().await?;

            if response.status() == StatusCode::UNAUTHORIZED && attempt == 0 {
                let challenge = response
                    .headers()
                    .get("www-authenticate")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                self.token = Some(self.fetch_token(&challenge).await?);
                continue;
            }
            if response.status() == StatusCode::NOT_FOUND {
                return Err(RelayError::RemoteNotFound(url.to_string()));
            }
            return Ok(response.error_for_status()?);
        }
        Err(RelayError::MalformedRemote(format!(
            "registry kept rejecting credentials for {url}"
        )))
    }

    async fn fetch_token(&self, challenge: &str) -> RelayResult<String> {
        let params = parse_challenge(challenge);
        let realm = params.get("realm").ok_or_else(|| {
            RelayError::MalformedRemote("registry challenge without a realm".to_string())
        })?;

        let scope = params
            .get("scope")
            .cloned()
            .unwrap_or_else(|| format!("repository:{}:pull", self.image.repository));
        let mut query: Vec<(&str, &str)> = vec![("scope", &scope)];
        if let Some(service) = params.get("service") {
            query.push(("service", service));
        }

        let mut request = self.ctx.http.get(realm).query(&query);
        if let Some(auth) = self.auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }
        let token: TokenResponse = request.send().await?.error_for_status()?.json().await?;
        token
            .token
            .or(token.access_token)
            .ok_or_else(|| RelayError::MalformedRemote("token endpoint returned no token".into()))
    }

    async fn tags(&mut self) -> RelayResult<Vec<String>> {
        let url = format!(
            "https://{}/v2/{}/tags/list",
            self.image.host, self.image.repository
        );
        let listing: TagList = self.get(&url, None).await?.json().await?;
        Ok(listing.tags)
    }

    async fn manifest(&mut self, reference: &str) -> RelayResult<Manifest> {
        let url = format!(
            "https://{}/v2/{}/manifests/{reference}",
            self.image.host, self.image.repository
        );
        Ok(self.get(&url, Some(MANIFEST_ACCEPT)).await?.json().await?)
    }

    async fn blob(&mut self, digest: &str) -> RelayResult<reqwest::Response> {
        let url = format!(
            "https://{}/v2/{}/blobs/{digest}",
            self.image.host, self.image.repository
        );
        self.get(&url, None).await
    }
}

fn parse_challenge(header: &str) -> BTreeMap<String, String> {
    header
        .trim_start_matches("Bearer ")
        .split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((
                key.trim().to_string(),
                value.trim().trim_matches('"').to_string(),
            ))
        })
        .collect()
}

fn decode_layer<'a, R>(media_type: &str, reader: R) -> Box<dyn AsyncRead + Send + Unpin + 'a>
where
    R: AsyncBufRead + Send + Unpin + 'a,
{
    if media_type.contains("gzip") {
        Box::new(GzipDecoder::new(reader))
    } else if media_type.contains("zstd") {
        Box::new(ZstdDecoder::new(reader))
    } else {
        Box::new(reader)
    }
}

/// Enumerate package files across the image's tags and platforms.
pub async fn enumerate(
    ctx: &SourceContext,
    image: &str,
    auth: Option<&RegistryAuth>,
    configured_tags: &[String],
    tag_limit: usize,
) -> RelayResult<Vec<RemoteArtifact>> {
    let reference = parse_image(image);
    let mut registry = Registry::new(ctx, auth, reference.clone());

    let tags: Vec<String> = if !configured_tags.is_empty() {
        configured_tags.to_vec()
    } else if let Some(digest) = &reference.digest {
        vec![digest.clone()]
    } else if let Some(tag) = &reference.tag {
        vec![tag.clone()]
    } else {
        let mut tags = registry.tags().await?;
        tags.reverse();
        tags.truncate(tag_limit);
        tags
    };

    let mut artifacts = Vec::new();
    for tag in &tags {
        let manifest = registry.manifest(tag).await?;

        // Platform selection happens on the manifest; only then are that
        // platform's layers walked.
        let image_manifests = if manifest.manifests.is_empty() {
            vec![manifest]
        } else {
            let mut resolved = Vec::with_capacity(manifest.manifests.len());
            for sub in &manifest.manifests {
                if let Some(platform) = &sub.platform {
                    if platform.os == "unknown" || platform.architecture == "unknown" {
                        continue;
                    }
                }
                resolved.push(registry.manifest(&sub.digest).await?);
            }
            resolved
        };

        for manifest in image_manifests {
            for layer in &manifest.layers {
                if let Err(err) = scan_layer(&mut registry, layer, tag, &mut artifacts).await {
                    warn!(layer = %layer.digest, %err, "skipping unreadable layer");
                }
            }
        }
    }
    Ok(artifacts)
}

/// Walk one layer tar to its end, collecting every package member.
async fn scan_layer(
    registry: &mut Registry<'_>,
    layer: &LayerRef,
    tag: &str,
    artifacts: &mut Vec<RemoteArtifact>,
) -> RelayResult<()> {
    let response = registry.blob(&layer.digest).await?;
    let reader = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
    let decoded = decode_layer(&layer.media_type, reader);

    let mut archive = tokio_tar::Archive::new(decoded);
    let mut entries = archive.entries()?;
    while let Some(entry) = entries.next().await {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();
        if !is_package_name(&path) {
            continue;
        }
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).await?;
        match deb::scan_package_bytes(&bytes) {
            Ok(control) => artifacts.push(RemoteArtifact {
                name: format!("{tag}:{path}"),
                location: RestoreLocation::DockerLayer {
                    layer_digest: layer.digest.clone(),
                    media_type: layer.media_type.clone(),
                    member_path: path,
                },
                control: Some(control),
            }),
            Err(err) => warn!(member = %path, layer = %layer.digest, %err,
                "skipping member that does not parse as a package"),
        }
    }
    Ok(())
}

/// Reopen one package member from its stored layer digest and path.
pub async fn open(
    ctx: &SourceContext,
    image: &str,
    auth: Option<&RegistryAuth>,
    layer_digest: &str,
    media_type: &str,
    member_path: &str,
) -> RelayResult<ArtifactStream> {
    let reference = parse_image(image);
    let mut registry = Registry::new(ctx, auth, reference);

    let response = registry.blob(layer_digest).await?;
    let reader = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
    let decoded = decode_layer(media_type, reader);

    let mut archive = tokio_tar::Archive::new(decoded);
    let mut entries = archive.entries()?;
    while let Some(entry) = entries.next().await {
        let mut entry = entry?;
        if entry.path()?.to_string_lossy() != member_path {
            continue;
        }
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).await?;
        return Ok(Box::new(std::io::Cursor::new(bytes)));
    }
    Err(RelayError::RemoteNotFound(format!(
        "{member_path} in layer {layer_digest}"
    )))
}
