//! Plain HTTP source: one URL, one artifact.

use super::{checked_get, response_stream, ArtifactStream, HttpAuth, RemoteArtifact, RestoreLocation, SourceContext};
use crate::error::RelayResult;

/// The URL itself is the whole artifact list.
pub fn enumerate(url: &str) -> RelayResult<Vec<RemoteArtifact>> {
    let name = url
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or(url)
        .to_string();
    Ok(vec![RemoteArtifact {
        name,
        location: RestoreLocation::Url {
            url: url.to_string(),
        },
        control: None,
    }])
}

/// Authenticated GET for the artifact bytes.
pub async fn open(
    ctx: &SourceContext,
    url: &str,
    auth: Option<&HttpAuth>,
) -> RelayResult<ArtifactStream> {
    let mut request = ctx.http.get(url);
    if let Some(auth) = auth {
        for (name, value) in &auth.headers {
            request = request.header(name, value);
        }
        let query: Vec<(&str, &str)> = auth
            .query
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        if !query.is_empty() {
            request = request.query(&query);
        }
    }
    let response = checked_get(request, url).await?;
    Ok(response_stream(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerate_names_by_last_segment() {
        let artifacts = enumerate("https://example.org/pool/hello_2.10_amd64.deb").unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].name, "hello_2.10_amd64.deb");
        assert!(artifacts[0].control.is_none());
        assert_eq!(
            artifacts[0].location,
            RestoreLocation::Url {
                url: "https://example.org/pool/hello_2.10_amd64.deb".into()
            }
        );
    }
}
