//! Upstream APT repository mirror source.
//!
//! Reads the upstream `InRelease` (falling back to the unsigned `Release`),
//! then walks every declared component × concrete architecture, fetching
//! the upstream `Packages` index in whichever encoding the mirror offers.
//! The enumerated artifacts carry their control stanzas; the restore
//! location is the upstream `.deb` URL from each stanza's `Filename`.

use super::{ArtifactStream, RemoteArtifact, RestoreLocation, SourceContext};
use crate::error::{RelayError, RelayResult};
use apt_repository::{ControlFile, Release};
use futures::TryStreamExt;
use pgp::composed::cleartext::CleartextSignedMessage;
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

/// Fetch and parse the upstream release metadata.
///
/// `InRelease` is preferred; its cleartext framing is stripped without
/// verification (the mirror's packages are re-digested locally). A mirror
/// publishing only the plaintext `Release` still works.
async fn fetch_release(
    ctx: &SourceContext,
    base: &str,
    distribution: &str,
) -> RelayResult<Release> {
    let inrelease_url = format!("{base}/dists/{distribution}/InRelease");
    if let Ok(response) = ctx.http.get(&inrelease_url).send().await {
        if response.status().is_success() {
            let armored = response.text().await?;
            match CleartextSignedMessage::from_string(&armored) {
                Ok((message, _)) => return Ok(Release::parse(message.text())?),
                Err(err) => {
                    warn!(url = %inrelease_url, %err, "InRelease did not parse, trying Release")
                }
            }
        }
    }

    let release_url = format!("{base}/dists/{distribution}/Release");
    let response = ctx
        .http
        .get(&release_url)
        .send()
        .await?
        .error_for_status()
        .map_err(|_| RelayError::RemoteNotFound(release_url.clone()))?;
    Ok(Release::parse(&response.text().await?)?)
}

/// Fetch one `Packages` index, trying plain, gzip and xz in that order.
async fn fetch_packages_index(
    ctx: &SourceContext,
    base: &str,
    distribution: &str,
    component: &str,
    architecture: &str,
) -> RelayResult<String> {
    let mut last_error: Option<RelayError> = None;
    for &compression in apt_repository::PACKAGES_ENCODINGS {
        let url = format!(
            "{base}/dists/{distribution}/{component}/binary-{architecture}/Packages{}",
            compression.extension()
        );
        let response = match ctx.http.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                last_error = Some(err.into());
                continue;
            }
        };
        if !response.status().is_success() {
            last_error = Some(RelayError::RemoteNotFound(url));
            continue;
        }

        let reader = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
        let mut decoded = compression.decode_reader(reader);
        let mut text = String::new();
        match decoded.read_to_string(&mut text).await {
            Ok(_) => return Ok(text),
            Err(err) => last_error = Some(err.into()),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        RelayError::RemoteNotFound(format!("{component}/binary-{architecture}/Packages"))
    }))
}

/// Enumerate every package the mirrored components declare.
pub async fn enumerate(
    ctx: &SourceContext,
    url: &str,
    distribution: &str,
    configured_components: &[String],
) -> RelayResult<Vec<RemoteArtifact>> {
    let base = url.trim_end_matches('/');
    let release = fetch_release(ctx, base, distribution).await?;

    let components: Vec<String> = if configured_components.is_empty() {
        release.components.clone()
    } else {
        configured_components.to_vec()
    };
    let architectures: Vec<&String> = release
        .architectures
        .iter()
        .filter(|arch| arch.as_str() != "all")
        .collect();

    let mut artifacts = Vec::new();
    for component in &components {
        for architecture in &architectures {
            let text =
                match fetch_packages_index(ctx, base, distribution, component, architecture).await
                {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(%component, %architecture, %err, "no usable Packages index");
                        continue;
                    }
                };

            for control in ControlFile::parse_many(&text)? {
                let Some(filename) = control.get("Filename").map(str::to_string) else {
                    debug!(package = ?control.package(), "stanza without Filename, skipped");
                    continue;
                };
                artifacts.push(RemoteArtifact {
                    name: format!(
                        "{}_{}_{}",
                        control.package().unwrap_or("unknown"),
                        control.version().unwrap_or("0"),
                        control.architecture().unwrap_or("unknown"),
                    ),
                    location: RestoreLocation::Url {
                        url: format!("{base}/{filename}"),
                    },
                    control: Some(control),
                });
            }
        }
    }
    Ok(artifacts)
}

/// Reopening a mirrored artifact is a plain GET on its stored URL; kept
/// here for symmetry and used by the dispatcher via the http adapter.
pub async fn open(ctx: &SourceContext, url: &str) -> RelayResult<ArtifactStream> {
    super::http::open(ctx, url, None).await
}
