//! Axum route glue (§1 "out of scope: route dispatch"; §6 "HTTP routes").
//!
//! This module is a convenience, not part of the core: every handler below
//! is a thin translation from `axum` request/response types into calls
//! against [`crate::advertisement`], [`crate::upload_pack`], and
//! [`crate::receive_pack`], calling into this crate's own protocol engine
//! instead of shelling out to a `git` binary.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use futures::StreamExt;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::advertisement::build_advertisement;
use crate::config::{AccessMode, Config};
use crate::error::GitHttpError;
use crate::receive_pack::handle_receive_pack;
use crate::repo_name::resolve_repository_path;
use crate::repository::RepositoryPort;
use crate::request::Service;
use crate::upload_pack::handle_upload_pack;

/// Abstraction over the state a host plugs into the route handlers below,
/// parameterised over this crate's `RepositoryPort` rather than a single
/// concrete storage type.
#[async_trait]
pub trait GitHttpState: Clone + Send + Sync + 'static {
    type Repo: RepositoryPort + Send + Sync + 'static;

    fn config(&self) -> &Config;

    /// Open (or fetch from cache) the repository handle at `path`.
    async fn open_repository(&self, path: &Path) -> Result<Arc<Self::Repo>, GitHttpError>;
}

pub fn router<S: GitHttpState>() -> Router<S> {
    Router::new()
        .route("/{repo}/info/refs", get(info_refs::<S>))
        .route("/{repo}/git-upload-pack", post(upload_pack::<S>))
        .route("/{repo}/git-receive-pack", post(receive_pack::<S>))
}

#[derive(serde::Deserialize)]
struct InfoRefsQuery {
    service: Option<String>,
}

async fn resolve<S: GitHttpState>(
    state: &S,
    repo_name: &str,
    mode: AccessMode,
    cancel: &CancellationToken,
) -> Result<Arc<S::Repo>, GitHttpError> {
    let config = state.config();
    let path = resolve_repository_path(
        &config.repository_root,
        repo_name,
        |n| (config.repository_name_normaliser)(n),
        |n| (config.repository_name_validator)(n),
    )?;

    let allowed = (config.authorize)(repo_name.to_string(), mode, cancel.clone()).await;
    if !allowed {
        return Err(GitHttpError::Forbidden);
    }

    state.open_repository(&path).await
}

fn service_enabled(config: &Config, service: Service) -> bool {
    match service {
        Service::UploadPack => config.upload_pack_enabled,
        Service::ReceivePack => config.receive_pack_enabled,
    }
}

#[tracing::instrument(skip(state), fields(%repo))]
async fn info_refs<S: GitHttpState>(
    State(state): State<S>,
    AxumPath(repo): AxumPath<String>,
    Query(query): Query<InfoRefsQuery>,
) -> Result<Response, GitHttpError> {
    let service_str = query.service.ok_or_else(|| GitHttpError::bad_request("missing service parameter"))?;
    let service = Service::parse(&service_str)?;

    if !service_enabled(state.config(), service) {
        return Err(GitHttpError::Forbidden);
    }

    let cancel = CancellationToken::new();
    let mode = if service == Service::ReceivePack { AccessMode::Write } else { AccessMode::Read };
    let handle = resolve(&state, &repo, mode, &cancel).await?;
    handle.invalidate_caches();

    let body = build_advertisement(handle.as_ref(), service, &state.config().agent, &cancel).await?;

    let content_type = format!("application/x-{}-advertisement", service.as_str());
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", content_type)
        .header("Cache-Control", "no-cache")
        .body(Body::from(body))
        .expect("static headers always build a valid response"))
}

fn body_to_async_read(body: Body) -> impl tokio::io::AsyncRead + Unpin {
    let stream = body.into_data_stream().map_err(|e| std::io::Error::other(e.to_string()));
    StreamReader::new(stream)
}

#[tracing::instrument(skip(state, headers, body), fields(%repo))]
async fn upload_pack<S: GitHttpState>(
    State(state): State<S>,
    AxumPath(repo): AxumPath<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, GitHttpError> {
    let _ = headers;
    if !state.config().upload_pack_enabled {
        return Err(GitHttpError::Forbidden);
    }
    let cancel = CancellationToken::new();
    let handle = resolve(&state, &repo, AccessMode::Read, &cancel).await?;

    let reader = body_to_async_read(body);
    let response_body = handle_upload_pack(handle.as_ref(), reader, &cancel).await?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/x-git-upload-pack-result")
        .header("Cache-Control", "no-cache")
        .body(Body::from(response_body))
        .expect("static headers always build a valid response"))
}

#[tracing::instrument(skip(state, headers, body), fields(%repo))]
async fn receive_pack<S: GitHttpState>(
    State(state): State<S>,
    AxumPath(repo): AxumPath<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, GitHttpError> {
    let _ = headers;
    if !state.config().receive_pack_enabled {
        return Err(GitHttpError::Forbidden);
    }
    let cancel = CancellationToken::new();
    let handle = resolve(&state, &repo, AccessMode::Write, &cancel).await?;

    let reader = body_to_async_read(body);
    let outcome = handle_receive_pack(handle.as_ref(), reader, &cancel).await?;

    crate::config::notify_receive_pack_completed(state.config(), repo.clone(), outcome.updated_ref_names);

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/x-git-receive-pack-result")
        .header("Cache-Control", "no-cache")
        .body(Body::from(outcome.response_body))
        .expect("static headers always build a valid response"))
}
