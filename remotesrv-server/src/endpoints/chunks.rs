//! Chunk transfer over plain HTTP.
//!
//! Chunks are addressed as `/{repo_path}/{hash}`, where `repo_path` may span multiple segments or
//! be empty.
//! Clients obtain these URLs from the RPC interface.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Router, routing};
use bytes::Bytes;
use remotesrv_service::ChunkHash;

use crate::endpoints::common::{ApiError, ApiResult};
use crate::state::ServiceState;

/// Routes `GET` and `PUT` for chunks below any repository path.
pub fn router() -> Router<ServiceState> {
    Router::new().route("/{*path}", routing::get(chunk_get).put(chunk_put))
}

/// Splits `org/repo/hash` into the repository path and the chunk hash.
///
/// A path without slashes addresses a chunk in the repository at the root.
fn parse_chunk_path(path: &str) -> ApiResult<(&str, ChunkHash)> {
    let (repo_path, hash) = path.rsplit_once('/').unwrap_or(("", path));
    Ok((repo_path, hash.parse()?))
}

async fn chunk_get(
    State(state): State<ServiceState>,
    Path(path): Path<String>,
) -> ApiResult<Response> {
    let (repo_path, hash) = parse_chunk_path(&path)?;
    let store = state.cache.get(repo_path).await?;

    let Some(contents) = store.get_chunk(&hash).await? else {
        return Err(ApiError::NotFound);
    };

    Ok(contents.into_response())
}

async fn chunk_put(
    State(state): State<ServiceState>,
    Path(path): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    state.ensure_writable()?;

    let (repo_path, hash) = parse_chunk_path(&path)?;
    let store = state.cache.get(repo_path).await?;
    store.put_chunk(&hash, body).await?;

    tracing::debug!(repo_path, %hash, "stored chunk");
    Ok(StatusCode::CREATED)
}
