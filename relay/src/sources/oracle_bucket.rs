//! Oracle Cloud Object Storage source.
//!
//! Access goes through a pre-authenticated request URL when configured,
//! otherwise through the public bucket endpoint.

use super::{
    checked_get, is_package_name, response_stream, ArtifactStream, RemoteArtifact,
    RestoreLocation, SourceContext,
};
use crate::error::RelayResult;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    objects: Vec<Object>,
    #[serde(default)]
    next_start_with: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Object {
    name: String,
}

fn base_url(
    namespace: &str,
    bucket: &str,
    region: &str,
    pre_authenticated: Option<&str>,
) -> String {
    match pre_authenticated {
        Some(par) => par.trim_end_matches('/').to_string(),
        None => format!(
            "https://objectstorage.{region}.oraclecloud.com/n/{namespace}/b/{bucket}"
        ),
    }
}

/// Enumerate package objects: the configured paths verbatim, or a listing
/// filtered by extension.
pub async fn enumerate(
    ctx: &SourceContext,
    namespace: &str,
    bucket: &str,
    region: &str,
    pre_authenticated: Option<&str>,
    paths: &[String],
) -> RelayResult<Vec<RemoteArtifact>> {
    if !paths.is_empty() {
        return Ok(paths
            .iter()
            .map(|path| RemoteArtifact {
                name: path.clone(),
                location: RestoreLocation::BucketObject { path: path.clone() },
                control: None,
            })
            .collect());
    }

    let base = base_url(namespace, bucket, region, pre_authenticated);
    let mut artifacts = Vec::new();
    let mut start: Option<String> = None;
    loop {
        let url = format!("{base}/o");
        let mut request = ctx.http.get(&url);
        if let Some(start) = &start {
            request = request.query(&[("start", start.as_str())]);
        }
        let listing: ObjectList = checked_get(request, &url).await?.json().await?;

        artifacts.extend(
            listing
                .objects
                .into_iter()
                .filter(|object| is_package_name(&object.name))
                .map(|object| RemoteArtifact {
                    location: RestoreLocation::BucketObject {
                        path: object.name.clone(),
                    },
                    name: object.name,
                    control: None,
                }),
        );

        match listing.next_start_with {
            Some(next) => start = Some(next),
            None => break,
        }
    }
    Ok(artifacts)
}

/// Download one object.
pub async fn open(
    ctx: &SourceContext,
    namespace: &str,
    bucket: &str,
    region: &str,
    pre_authenticated: Option<&str>,
    path: &str,
) -> RelayResult<ArtifactStream> {
    let base = base_url(namespace, bucket, region, pre_authenticated);
    let url = format!("{base}/o/{path}");
    let response = checked_get(ctx.http.get(&url), &url).await?;
    Ok(response_stream(response))
}
