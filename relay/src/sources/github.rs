//! GitHub source: package files on a branch, or release assets.

use super::{
    checked_get, is_package_name, response_stream, ArtifactStream, GithubTarget, RemoteArtifact,
    RestoreLocation, SourceContext,
};
use crate::error::RelayResult;
use serde::Deserialize;

const API: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct Tree {
    tree: Vec<TreeEntry>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    assets: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    name: String,
    browser_download_url: String,
}

fn authorize(
    request: reqwest::RequestBuilder,
    token: Option<&str>,
) -> reqwest::RequestBuilder {
    match token {
        Some(token) => request.header("Authorization", format!("token {token}")),
        None => request,
    }
}

/// Enumerate package artifacts for one repository target.
pub async fn enumerate(
    ctx: &SourceContext,
    owner: &str,
    repo: &str,
    token: Option<&str>,
    target: &GithubTarget,
) -> RelayResult<Vec<RemoteArtifact>> {
    match target {
        GithubTarget::Branch { branch } => {
            enumerate_branch(ctx, owner, repo, token, branch).await
        }
        GithubTarget::Release { tags } => enumerate_releases(ctx, owner, repo, token, tags).await,
    }
}

async fn enumerate_branch(
    ctx: &SourceContext,
    owner: &str,
    repo: &str,
    token: Option<&str>,
    branch: &str,
) -> RelayResult<Vec<RemoteArtifact>> {
    let url = format!("{API}/repos/{owner}/{repo}/git/trees/{branch}?recursive=1");
    let response = checked_get(authorize(ctx.http.get(&url), token), &url).await?;
    let tree: Tree = response.json().await?;

    Ok(tree
        .tree
        .into_iter()
        .filter(|entry| entry.kind == "blob" && is_package_name(&entry.path))
        .map(|entry| RemoteArtifact {
            location: RestoreLocation::Url {
                url: format!(
                    "https://raw.githubusercontent.com/{owner}/{repo}/{branch}/{}",
                    entry.path
                ),
            },
            name: entry.path,
            control: None,
        })
        .collect())
}

async fn enumerate_releases(
    ctx: &SourceContext,
    owner: &str,
    repo: &str,
    token: Option<&str>,
    tags: &[String],
) -> RelayResult<Vec<RemoteArtifact>> {
    let releases: Vec<Release> = if tags.is_empty() {
        let url = format!("{API}/repos/{owner}/{repo}/releases?per_page=100");
        checked_get(authorize(ctx.http.get(&url), token), &url)
            .await?
            .json()
            .await?
    } else {
        let mut releases = Vec::with_capacity(tags.len());
        for tag in tags {
            let url = format!("{API}/repos/{owner}/{repo}/releases/tags/{tag}");
            let release: Release = checked_get(authorize(ctx.http.get(&url), token), &url)
                .await?
                .json()
                .await?;
            releases.push(release);
        }
        releases
    };

    Ok(releases
        .into_iter()
        .flat_map(|release| {
            let tag = release.tag_name;
            release
                .assets
                .into_iter()
                .filter(|asset| is_package_name(&asset.name))
                .map(move |asset| RemoteArtifact {
                    name: format!("{tag}/{}", asset.name),
                    location: RestoreLocation::Url {
                        url: asset.browser_download_url,
                    },
                    control: None,
                })
        })
        .collect())
}

/// Fetch artifact bytes from a raw-content or asset URL.
pub async fn open(
    ctx: &SourceContext,
    url: &str,
    token: Option<&str>,
) -> RelayResult<ArtifactStream> {
    let response = checked_get(authorize(ctx.http.get(url), token), url).await?;
    Ok(response_stream(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_response_parses() {
        let json = r#"{"sha": "x", "tree": [
            {"path": "docs/readme.md", "type": "blob"},
            {"path": "pkgs", "type": "tree"},
            {"path": "pkgs/hello_1.0_amd64.deb", "type": "blob"}
        ]}"#;
        let tree: Tree = serde_json::from_str(json).unwrap();
        let packages: Vec<_> = tree
            .tree
            .iter()
            .filter(|entry| entry.kind == "blob" && is_package_name(&entry.path))
            .collect();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].path, "pkgs/hello_1.0_amd64.deb");
    }

    #[test]
    fn release_response_parses() {
        let json = r#"[{"tag_name": "v1.0", "assets": [
            {"name": "hello_1.0_amd64.deb", "browser_download_url": "https://x/hello.deb"},
            {"name": "hello-1.0.tar.gz", "browser_download_url": "https://x/hello.tar.gz"}
        ]}]"#;
        let releases: Vec<Release> = serde_json::from_str(json).unwrap();
        assert_eq!(releases[0].tag_name, "v1.0");
        assert_eq!(releases[0].assets.len(), 2);
    }
}
