use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{StatusCode, header::CONTENT_TYPE},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::{
    application::{
        lint::{LintError, LintService},
        preview::{PreviewOutcome, PreviewRequest, PreviewService},
    },
    presentation::views,
};

#[derive(Clone)]
pub struct HttpState {
    pub preview: Arc<PreviewService>,
    pub lint: Arc<LintService>,
    /// Directory `/resource` serving is confined to; requests are refused
    /// when unset.
    pub resource_root: Option<PathBuf>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/preview", get(preview))
        .route("/resource", get(resource))
        .route("/lint", get(lint))
        .route("/healthz", get(healthz))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct PreviewParams {
    doc: PathBuf,
    links: Option<bool>,
}

/// The preview surface always receives HTML with status 200: rendered
/// content, a diagnostic page, or the busy notice.
async fn preview(
    State(state): State<HttpState>,
    Query(params): Query<PreviewParams>,
) -> Html<String> {
    let mut request = PreviewRequest::new(params.doc);
    request.fix_links = params.links;

    match state.preview.render(&request).await {
        PreviewOutcome::Rendered { html } => Html(html),
        PreviewOutcome::Superseded => Html(views::busy_page()),
        PreviewOutcome::Failed { error } => Html(views::failure_page(&error)),
    }
}

#[derive(Debug, Deserialize)]
struct ResourceParams {
    path: PathBuf,
}

/// Serve a file referenced by rewritten preview links, confined to the
/// configured project root.
async fn resource(
    State(state): State<HttpState>,
    Query(params): Query<ResourceParams>,
) -> Response {
    let Some(root) = state.resource_root.as_deref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(resolved) = confine(root, &params.path).await else {
        warn!(
            target = "infra::http::resource",
            path = %params.path.display(),
            "refused resource outside the project root"
        );
        return StatusCode::NOT_FOUND.into_response();
    };

    match tokio::fs::read(&resolved).await {
        Ok(contents) => {
            let mime = mime_guess::from_path(&resolved).first_or_octet_stream();
            ([(CONTENT_TYPE, mime.to_string())], Bytes::from(contents)).into_response()
        }
        Err(err) => {
            warn!(
                target = "infra::http::resource",
                path = %resolved.display(),
                error = %err,
                "resource read failed"
            );
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// Canonicalize both sides so `..` segments and symlinks cannot escape the
/// root.
async fn confine(root: &Path, requested: &Path) -> Option<PathBuf> {
    let root = tokio::fs::canonicalize(root).await.ok()?;
    let resolved = tokio::fs::canonicalize(requested).await.ok()?;
    resolved.starts_with(&root).then_some(resolved)
}

#[derive(Debug, Deserialize)]
struct LintParams {
    doc: PathBuf,
}

async fn lint(State(state): State<HttpState>, Query(params): Query<LintParams>) -> Response {
    match state.lint.lint(&params.doc).await {
        Ok(diagnostics) => Json(diagnostics).into_response(),
        Err(err) => {
            let status = match &err {
                LintError::Disabled => StatusCode::SERVICE_UNAVAILABLE,
                LintError::Spawn { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                LintError::Failed { .. } => StatusCode::BAD_GATEWAY,
            };
            (status, Json(json!({ "error": err.to_string() }))).into_response()
        }
    }
}

async fn healthz() -> StatusCode {
    StatusCode::NO_CONTENT
}
