//! The RPC interface, served as JSON over HTTP `POST`.
//!
//! Every method lives at `/chunkstore.v1.ChunkStoreService/<Method>` and takes a JSON request body
//! naming the repository it operates on. Chunk contents never pass through this interface; instead,
//! clients ask for download and upload locations on the chunk transfer interface.

use axum::extract::State;
use axum::http::uri::Authority;
use axum::http::{HeaderMap, Uri, header};
use axum::{Json, Router, routing};
use remotesrv_service::ChunkHash;
use serde::{Deserialize, Serialize};

use crate::endpoints::common::{ApiError, ApiResult};
use crate::state::{ServiceState, State as ServerState};

/// Routes all RPC methods.
pub fn router() -> Router<ServiceState> {
    Router::new()
        .route(
            "/chunkstore.v1.ChunkStoreService/GetRepoMetadata",
            routing::post(get_repo_metadata),
        )
        .route(
            "/chunkstore.v1.ChunkStoreService/HasChunks",
            routing::post(has_chunks),
        )
        .route(
            "/chunkstore.v1.ChunkStoreService/GetDownloadLocations",
            routing::post(get_download_locations),
        )
        .route(
            "/chunkstore.v1.ChunkStoreService/GetUploadLocations",
            routing::post(get_upload_locations),
        )
        .route("/chunkstore.v1.ChunkStoreService/Root", routing::post(root))
        .route(
            "/chunkstore.v1.ChunkStoreService/Commit",
            routing::post(commit),
        )
}

/// Request naming a repository.
#[derive(Debug, Deserialize, Serialize)]
pub struct RepoRequest {
    /// Path of the repository below the server's working directory.
    pub repo_path: String,
}

/// Request naming a set of chunks in a repository.
#[derive(Debug, Deserialize, Serialize)]
pub struct ChunksRequest {
    /// Path of the repository below the server's working directory.
    pub repo_path: String,
    /// The chunks in question.
    pub hashes: Vec<ChunkHash>,
}

/// Response to `GetRepoMetadata`.
#[derive(Debug, Deserialize, Serialize)]
pub struct RepoMetadataResponse {
    /// The current root chunk of the repository.
    pub root: Option<ChunkHash>,
    /// Whether the server accepts writes.
    pub read_only: bool,
}

/// Response to `HasChunks`.
#[derive(Debug, Deserialize, Serialize)]
pub struct HasChunksResponse {
    /// Indices into the requested hashes of all chunks the repository does not have.
    pub absent: Vec<usize>,
}

/// Where to transfer a single chunk.
#[derive(Debug, Deserialize, Serialize)]
pub struct Location {
    /// The chunk.
    pub hash: ChunkHash,
    /// Absolute URL on the chunk transfer interface.
    pub url: String,
}

/// Response to `GetDownloadLocations` and `GetUploadLocations`.
#[derive(Debug, Deserialize, Serialize)]
pub struct LocationsResponse {
    /// One location per transferable chunk.
    pub locations: Vec<Location>,
}

/// Response to `Root`.
#[derive(Debug, Deserialize, Serialize)]
pub struct RootResponse {
    /// The current root chunk of the repository.
    pub root: Option<ChunkHash>,
}

/// Request of `Commit`.
#[derive(Debug, Deserialize, Serialize)]
pub struct CommitRequest {
    /// Path of the repository below the server's working directory.
    pub repo_path: String,
    /// The new root.
    pub current: ChunkHash,
    /// The root the client based its changes on.
    pub last: Option<ChunkHash>,
}

/// Response to `Commit`.
#[derive(Debug, Deserialize, Serialize)]
pub struct CommitResponse {
    /// `false` if the root moved since `last`.
    pub success: bool,
}

async fn get_repo_metadata(
    State(state): State<ServiceState>,
    Json(request): Json<RepoRequest>,
) -> ApiResult<Json<RepoMetadataResponse>> {
    let store = state.cache.get(&request.repo_path).await?;
    let root = store.root().await?;

    Ok(Json(RepoMetadataResponse {
        root,
        read_only: state.read_only,
    }))
}

async fn has_chunks(
    State(state): State<ServiceState>,
    Json(request): Json<ChunksRequest>,
) -> ApiResult<Json<HasChunksResponse>> {
    let store = state.cache.get(&request.repo_path).await?;

    let mut absent = Vec::new();
    for (index, hash) in request.hashes.iter().enumerate() {
        if !store.has_chunk(hash).await? {
            absent.push(index);
        }
    }

    Ok(Json(HasChunksResponse { absent }))
}

async fn get_download_locations(
    State(state): State<ServiceState>,
    uri: Uri,
    headers: HeaderMap,
    Json(request): Json<ChunksRequest>,
) -> ApiResult<Json<LocationsResponse>> {
    let store = state.cache.get(&request.repo_path).await?;
    let host = url_host(&state, &uri, &headers)?;

    let mut locations = Vec::with_capacity(request.hashes.len());
    for hash in request.hashes {
        if store.has_chunk(&hash).await? {
            let url = chunk_url(&host, &request.repo_path, &hash);
            locations.push(Location { hash, url });
        }
    }

    Ok(Json(LocationsResponse { locations }))
}

async fn get_upload_locations(
    State(state): State<ServiceState>,
    uri: Uri,
    headers: HeaderMap,
    Json(request): Json<ChunksRequest>,
) -> ApiResult<Json<LocationsResponse>> {
    state.ensure_writable()?;
    let host = url_host(&state, &uri, &headers)?;

    let locations = request
        .hashes
        .into_iter()
        .map(|hash| Location {
            url: chunk_url(&host, &request.repo_path, &hash),
            hash,
        })
        .collect();

    Ok(Json(LocationsResponse { locations }))
}

async fn root(
    State(state): State<ServiceState>,
    Json(request): Json<RepoRequest>,
) -> ApiResult<Json<RootResponse>> {
    let store = state.cache.get(&request.repo_path).await?;
    let root = store.root().await?;
    Ok(Json(RootResponse { root }))
}

async fn commit(
    State(state): State<ServiceState>,
    Json(request): Json<CommitRequest>,
) -> ApiResult<Json<CommitResponse>> {
    state.ensure_writable()?;

    let store = state.cache.get(&request.repo_path).await?;
    let success = store
        .commit(&request.current, request.last.as_ref())
        .await?;

    tracing::info!(
        repo_path = %request.repo_path,
        current = %request.current,
        success,
        "commit"
    );
    Ok(Json(CommitResponse { success }))
}

/// Determines the `host[:port]` to use in generated URLs.
///
/// The configured host override wins. Otherwise, the host of the request's authority is combined
/// with the port of the HTTP listener, since the request may have arrived on the RPC listener.
fn url_host(state: &ServerState, uri: &Uri, headers: &HeaderMap) -> ApiResult<String> {
    if let Some(host) = &state.http_host {
        return Ok(host.clone());
    }

    let authority = match uri.authority() {
        Some(authority) => authority.clone(),
        None => headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<Authority>().ok())
            .ok_or_else(|| ApiError::Client("request has no authority".to_owned()))?,
    };

    Ok(match state.http_port() {
        Some(port) => format!("{}:{port}", authority.host()),
        None => authority.to_string(),
    })
}

fn chunk_url(host: &str, repo_path: &str, hash: &ChunkHash) -> String {
    match repo_path.trim_matches('/') {
        "" => format!("http://{host}/{hash}"),
        repo_path => format!("http://{host}/{repo_path}/{hash}"),
    }
}
