//! Google Drive source, over the Drive v3 REST API.

use super::{
    checked_get, is_package_name, response_stream, ArtifactStream, RemoteArtifact,
    RestoreLocation, SourceContext,
};
use crate::error::RelayResult;
use serde::Deserialize;

const API: &str = "https://www.googleapis.com/drive/v3";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    name: String,
}

/// Enumerate package files: the configured id list verbatim, or a listing
/// filtered by extension.
pub async fn enumerate(
    ctx: &SourceContext,
    token: &str,
    file_ids: &[String],
) -> RelayResult<Vec<RemoteArtifact>> {
    if !file_ids.is_empty() {
        return Ok(file_ids
            .iter()
            .map(|id| RemoteArtifact {
                name: id.clone(),
                location: RestoreLocation::DriveFile {
                    file_id: id.clone(),
                },
                control: None,
            })
            .collect());
    }

    let mut artifacts = Vec::new();
    let mut page_token: Option<String> = None;
    loop {
        let url = format!("{API}/files");
        let mut request = ctx
            .http
            .get(&url)
            .bearer_auth(token)
            .query(&[("pageSize", "1000"), ("fields", "nextPageToken,files(id,name)")]);
        if let Some(page) = &page_token {
            request = request.query(&[("pageToken", page.as_str())]);
        }
        let listing: FileList = checked_get(request, &url).await?.json().await?;

        artifacts.extend(
            listing
                .files
                .into_iter()
                .filter(|file| is_package_name(&file.name))
                .map(|file| RemoteArtifact {
                    name: file.name,
                    location: RestoreLocation::DriveFile { file_id: file.id },
                    control: None,
                }),
        );

        match listing.next_page_token {
            Some(next) => page_token = Some(next),
            None => break,
        }
    }
    Ok(artifacts)
}

/// Download one file's content.
pub async fn open(
    ctx: &SourceContext,
    token: &str,
    file_id: &str,
) -> RelayResult<ArtifactStream> {
    let url = format!("{API}/files/{file_id}");
    let request = ctx
        .http
        .get(&url)
        .bearer_auth(token)
        .query(&[("alt", "media")]);
    let response = checked_get(request, &url).await?;
    Ok(response_stream(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_parses_and_paginates() {
        let json = r#"{"nextPageToken": "t2", "files": [
            {"id": "a1", "name": "hello_1.0_amd64.deb"},
            {"id": "a2", "name": "notes.txt"}
        ]}"#;
        let listing: FileList = serde_json::from_str(json).unwrap();
        assert_eq!(listing.next_page_token.as_deref(), Some("t2"));
        assert_eq!(listing.files.len(), 2);
        assert!(is_package_name(&listing.files[0].name));
        assert!(!is_package_name(&listing.files[1].name));
    }

    #[tokio::test]
    async fn explicit_ids_skip_listing() {
        let ctx = SourceContext::new().unwrap();
        let ids = vec!["file-a".to_string(), "file-b".to_string()];
        let artifacts = enumerate(&ctx, "unused", &ids).await.unwrap();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(
            artifacts[1].location,
            RestoreLocation::DriveFile {
                file_id: "file-b".into()
            }
        );
    }
}
