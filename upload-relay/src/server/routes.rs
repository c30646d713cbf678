/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, MatchedPath, Request, State};
use axum::http::{Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::client::Coordinator;
use crate::operation::complete_upload::RequestedPart;
use crate::server::http_objects::{
    parse_json, AbortUploadRequest, ApiError, CompleteUploadRequest, FileResponse,
    StartUploadRequest, StartUploadResponse, UploadPartRequest, UploadPartResponse,
};
use crate::types::SessionId;

/// Shared state of all handlers
#[derive(Debug, Clone)]
pub struct RouteState {
    /// The coordinator requests are forwarded to
    pub coordinator: Coordinator,
}

/// Build the relay's router, rejecting bodies larger than `max_body_bytes`
pub fn create_routes(route_state: RouteState, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/upload/start", post(start_upload))
        .route("/upload/part", post(upload_part))
        .route("/upload/complete", post(complete_upload))
        .route("/upload/abort", post(abort_upload))
        .with_state(route_state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    let method = req.method();
                    let uri = req.uri();
                    let matched_path = req
                        .extensions()
                        .get::<MatchedPath>()
                        .map(|matched_path| matched_path.as_str());
                    tracing::debug_span!("request", %method, %uri, matched_path)
                })
                .on_failure(()),
        )
        .layer(cors)
        .layer(DefaultBodyLimit::max(max_body_bytes))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[tracing::instrument(skip_all)]
async fn start_upload(
    State(state): State<RouteState>,
    payload: Result<Json<StartUploadRequest>, JsonRejection>,
) -> Result<Json<StartUploadResponse>, ApiError> {
    let request = parse_json(payload)?;
    let session_id = state
        .coordinator
        .start_upload()
        .key(request.name)
        .content_type(request.content_type)
        .send()
        .await?;
    Ok(Json(StartUploadResponse {
        upload_id: session_id.to_string(),
    }))
}

#[tracing::instrument(skip_all)]
async fn upload_part(
    State(state): State<RouteState>,
    payload: Result<Json<UploadPartRequest>, JsonRejection>,
) -> Result<Json<UploadPartResponse>, ApiError> {
    let request = parse_json(payload)?;
    let chunk = request.payload()?;
    let part = state
        .coordinator
        .accept_part()
        .session_id(SessionId::new(request.upload_id))
        .key(request.name)
        .part_number(request.part_number)
        .payload(chunk)
        .send()
        .await?;
    Ok(Json(UploadPartResponse { e_tag: part.e_tag }))
}

#[tracing::instrument(skip_all)]
async fn complete_upload(
    State(state): State<RouteState>,
    payload: Result<Json<CompleteUploadRequest>, JsonRejection>,
) -> Result<Json<FileResponse>, ApiError> {
    let request = parse_json(payload)?;
    let parts = request
        .parts
        .into_iter()
        .map(RequestedPart::from)
        .collect();
    let metadata = state
        .coordinator
        .complete_upload()
        .session_id(SessionId::new(request.upload_id))
        .key(request.name)
        .set_parts(parts)
        .title(request.title)
        .description(request.description)
        .send()
        .await?;
    Ok(Json(FileResponse::from(metadata)))
}

#[tracing::instrument(skip_all)]
async fn abort_upload(
    State(state): State<RouteState>,
    payload: Result<Json<AbortUploadRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let request = parse_json(payload)?;
    state
        .coordinator
        .abort_upload()
        .session_id(SessionId::new(request.upload_id))
        .key(request.name)
        .send()
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
