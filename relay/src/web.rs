//! HTTP surface of the repository.
//!
//! Thin handlers over the index, the release generation engine and the
//! blob cache. All process state travels in [`AppState`]; nothing is
//! global. Error responses are the JSON envelope from [`crate::error`].
//!
//! The canonical pool path `pool/<component>/binary-<arch>/<digest>.deb`
//! shares its shape with the three-segment browse route, and axum cannot
//! capture partial segments, so the browse handler splits the two cases
//! itself.

use crate::cache::BlobCache;
use crate::config::Config;
use crate::error::{ApiError, RelayError, RelayResult};
use crate::generate;
use crate::index::{IndexEntry, PackageIndex, PackageQuery};
use crate::sign::Signer;
use crate::sources::SourceContext;
use apt_repository::{Compression, ControlFile, DigestAlgorithm};
use axum::body::Body;
use axum::extract::{OriginalUri, Path, State};
use axum::http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Process-scoped state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration snapshot.
    pub config: Arc<Config>,
    /// The package index.
    pub index: PackageIndex,
    /// Shared adapter context.
    pub sources: SourceContext,
    /// Signing keys, when configured.
    pub signer: Option<Arc<Signer>>,
    /// Blob cache (possibly pass-through).
    pub cache: Arc<BlobCache>,
}

impl AppState {
    /// Wire up the state from a loaded configuration and open index.
    pub fn new(config: Config, index: PackageIndex, sources: SourceContext) -> RelayResult<Self> {
        let signer = config
            .apt
            .pgp_key
            .as_ref()
            .map(Signer::from_config)
            .transpose()?
            .map(Arc::new);
        let cache = Arc::new(BlobCache::new(
            config.storage.as_ref().map(|s| s.cache_dir.clone()),
        ));
        Ok(Self {
            config: Arc::new(config),
            index,
            sources,
            signer,
            cache,
        })
    }

    fn err(&self, error: RelayError) -> ApiError {
        ApiError::from_error(error, self.config.server.verbose_errors)
    }

    fn dist_ids(&self, dist: &str) -> Result<Vec<String>, ApiError> {
        let sources = self
            .config
            .sources_for(dist)
            .ok_or_else(|| self.err(RelayError::UnknownDistribution(dist.to_string())))?;
        Ok(sources.into_iter().map(|source| source.id).collect())
    }
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(pool_overview))
        .route("/pool", get(pool_overview))
        .route("/pool/{dist}", get(pool_dist))
        .route("/pool/{dist}/{suite}", get(pool_component))
        .route("/pool/{dist}/{suite}/{package}", get(pool_package))
        .route("/pool/{dist}/{suite}/{package}/{arch}", get(pool_arch))
        .route(
            "/pool/{dist}/{suite}/{package}/{arch}/{version}",
            get(pool_version),
        )
        .route(
            "/pool/{dist}/{suite}/{package}/{arch}/{version}/download.deb",
            get(pool_download),
        )
        .route("/dists/{dist}/Release", get(release_plain))
        .route("/dists/{dist}/InRelease", get(release_clearsigned))
        .route("/dists/{dist}/inRelease", get(release_clearsigned))
        .route("/dists/{dist}/Release.gpg", get(release_detached))
        .route(
            "/dists/{dist}/{suite}/{arch_dir}/{index_file}",
            get(packages_index_file),
        )
        .route("/public_key", get(public_key))
        .route("/public.gpg", get(public_key))
        .fallback(not_found)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// Serve the router until the listener dies.
pub async fn serve(state: AppState, bind: &str) -> RelayResult<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn not_found(method: Method, OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::not_found(uri.path(), method.as_str())
}

type Grouped = BTreeMap<String, Vec<ControlFile>>;

async fn pool_overview(
    State(state): State<AppState>,
) -> Result<Json<BTreeMap<String, Grouped>>, ApiError> {
    let entries = state
        .index
        .find(&PackageQuery::default())
        .await
        .map_err(|e| state.err(e))?;

    let mut grouped: BTreeMap<String, Grouped> = BTreeMap::new();
    for entry in entries {
        // Entries whose source vanished from the configuration linger
        // until the next sync prunes them; don't show them.
        let Some(dist) = state.config.dist_of(&entry.repository_id) else {
            continue;
        };
        grouped
            .entry(dist.to_string())
            .or_default()
            .entry(entry.component.clone())
            .or_default()
            .push(entry.control);
    }
    Ok(Json(grouped))
}

async fn pool_dist(
    State(state): State<AppState>,
    Path(dist): Path<String>,
) -> Result<Json<Grouped>, ApiError> {
    let ids = state.dist_ids(&dist)?;
    let entries = state
        .index
        .find(&PackageQuery {
            repository_ids: Some(ids),
            ..Default::default()
        })
        .await
        .map_err(|e| state.err(e))?;

    let mut grouped: Grouped = BTreeMap::new();
    for entry in entries {
        grouped
            .entry(entry.component.clone())
            .or_default()
            .push(entry.control);
    }
    Ok(Json(grouped))
}

async fn find_controls(
    state: &AppState,
    dist: &str,
    component: &str,
    package: Option<String>,
    architecture: Option<String>,
    version: Option<String>,
) -> Result<Vec<IndexEntry>, ApiError> {
    let ids = state.dist_ids(dist)?;
    state
        .index
        .find(&PackageQuery {
            repository_ids: Some(ids),
            component: Some(component.to_string()),
            package,
            architecture,
            version,
        })
        .await
        .map_err(|e| state.err(e))
}

async fn pool_component(
    State(state): State<AppState>,
    Path((dist, suite)): Path<(String, String)>,
) -> Result<Json<Vec<ControlFile>>, ApiError> {
    let entries = find_controls(&state, &dist, &suite, None, None, None).await?;
    Ok(Json(entries.into_iter().map(|e| e.control).collect()))
}

async fn pool_package(
    State(state): State<AppState>,
    Path((dist, suite, package)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    // `pool/<component>/binary-<arch>/<digest>.deb` — the canonical
    // Filename pool path — has this same shape.
    if suite.starts_with("binary-") && package.ends_with(".deb") {
        let digest = package.trim_end_matches(".deb");
        return blob_by_digest(&state, digest).await;
    }

    let entries = find_controls(&state, &dist, &suite, Some(package), None, None).await?;
    let controls: Vec<ControlFile> = entries.into_iter().map(|e| e.control).collect();
    Ok(Json(controls).into_response())
}

async fn pool_arch(
    State(state): State<AppState>,
    Path((dist, suite, package, arch)): Path<(String, String, String, String)>,
) -> Result<Json<Vec<ControlFile>>, ApiError> {
    let entries =
        find_controls(&state, &dist, &suite, Some(package), Some(arch), None).await?;
    Ok(Json(entries.into_iter().map(|e| e.control).collect()))
}

async fn pool_version(
    State(state): State<AppState>,
    Path((dist, suite, package, arch, version)): Path<(String, String, String, String, String)>,
) -> Result<Json<ControlFile>, ApiError> {
    let entries = find_controls(
        &state,
        &dist,
        &suite,
        Some(package),
        Some(arch),
        Some(version),
    )
    .await?;
    let entry = entries
        .into_iter()
        .next_back()
        .ok_or_else(|| state.err(RelayError::PackageNotFound))?;
    Ok(Json(entry.control))
}

async fn pool_download(
    State(state): State<AppState>,
    Path((dist, suite, package, arch, version)): Path<(String, String, String, String, String)>,
) -> Result<Response, ApiError> {
    let entries = find_controls(
        &state,
        &dist,
        &suite,
        Some(package.clone()),
        Some(arch.clone()),
        Some(version.clone()),
    )
    .await?;
    let entry = entries
        .into_iter()
        .next_back()
        .ok_or_else(|| state.err(RelayError::PackageNotFound))?;
    stream_blob(&state, entry, &format!("{package}_{version}_{arch}.deb")).await
}

async fn blob_by_digest(state: &AppState, digest: &str) -> Result<Response, ApiError> {
    let entry = state
        .index
        .find_by_digest(digest)
        .await
        .map_err(|e| state.err(e))?
        .ok_or_else(|| state.err(RelayError::PackageNotFound))?;
    let name = format!(
        "{}_{}_{}.deb",
        entry.control.package().unwrap_or("package"),
        entry.control.version().unwrap_or("0"),
        entry.control.architecture().unwrap_or("unknown"),
    );
    stream_blob(state, entry, &name).await
}

async fn stream_blob(
    state: &AppState,
    entry: IndexEntry,
    filename: &str,
) -> Result<Response, ApiError> {
    debug!(package = ?entry.control.package(), "streaming package blob");
    let stream = state
        .cache
        .open(&state.sources, &state.config, &entry)
        .await
        .map_err(|e| state.err(e))?;

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-debian-package"),
    );
    if let Ok(Some(size)) = entry.control.size() {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
    }
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\"")) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    if let Some(sha256) = entry.control.digest(DigestAlgorithm::Sha256) {
        if let Ok(value) = HeaderValue::from_str(sha256) {
            headers.insert(HeaderName::from_static("sha256_hash"), value);
        }
    }
    if let Some(md5) = entry.control.digest(DigestAlgorithm::Md5) {
        if let Ok(value) = HeaderValue::from_str(md5) {
            headers.insert(HeaderName::from_static("md5sum_hash"), value);
        }
    }

    Ok((headers, Body::from_stream(ReaderStream::new(stream))).into_response())
}

async fn packages_index_file(
    State(state): State<AppState>,
    Path((dist, suite, arch_dir, index_file)): Path<(String, String, String, String)>,
    method: Method,
    OriginalUri(uri): OriginalUri,
) -> Result<Response, ApiError> {
    let Some(arch) = arch_dir.strip_prefix("binary-") else {
        return Err(ApiError::not_found(uri.path(), method.as_str()));
    };
    let compression = match index_file.as_str() {
        "Packages" => Compression::Plain,
        "Packages.gz" => Compression::Gzip,
        "Packages.xz" => Compression::Xz,
        _ => return Err(ApiError::not_found(uri.path(), method.as_str())),
    };

    let stream =
        generate::packages_stream(&state.index, &state.config, &dist, &suite, arch, compression)
            .await
            .map_err(|e| state.err(e))?;

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(compression.content_type()),
    );
    Ok((headers, Body::from_stream(stream)).into_response())
}

async fn release_plain(
    State(state): State<AppState>,
    Path(dist): Path<String>,
) -> Result<Response, ApiError> {
    let document = generate::release_document(&state.index, &state.config, &dist)
        .await
        .map_err(|e| state.err(e))?;
    Ok((
        [(CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
        document.text,
    )
        .into_response())
}

async fn release_clearsigned(
    State(state): State<AppState>,
    Path(dist): Path<String>,
) -> Result<Response, ApiError> {
    let signer = state
        .signer
        .clone()
        .ok_or_else(|| state.err(RelayError::SigningUnavailable))?;
    let document = generate::release_document(&state.index, &state.config, &dist)
        .await
        .map_err(|e| state.err(e))?;
    generate::ensure_signable(&state.config, &document).map_err(|e| state.err(e))?;
    let signed = signer
        .clearsign(&document.text)
        .map_err(|e| state.err(e))?;
    Ok((
        [(CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
        signed,
    )
        .into_response())
}

async fn release_detached(
    State(state): State<AppState>,
    Path(dist): Path<String>,
) -> Result<Response, ApiError> {
    let signer = state
        .signer
        .clone()
        .ok_or_else(|| state.err(RelayError::SigningUnavailable))?;
    let document = generate::release_document(&state.index, &state.config, &dist)
        .await
        .map_err(|e| state.err(e))?;
    generate::ensure_signable(&state.config, &document).map_err(|e| state.err(e))?;
    let signature = signer
        .sign_detached(&document.text)
        .map_err(|e| state.err(e))?;
    Ok((
        [(CONTENT_TYPE, HeaderValue::from_static("application/pgp-signature"))],
        signature,
    )
        .into_response())
}

async fn public_key(State(state): State<AppState>) -> Result<Response, ApiError> {
    let signer = state
        .signer
        .clone()
        .ok_or_else(|| ApiError::bad_request("this repository does not sign its releases"))?;
    let armored = signer.public_key_armored().map_err(|e| state.err(e))?;
    Ok((
        [(CONTENT_TYPE, HeaderValue::from_static("application/pgp-keys"))],
        armored,
    )
        .into_response())
}
