/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use base64::Engine;
use serde_json::{json, Value};
use test_common::{fixture, random_payload, FailingMetadataRecorder, Fixture};
use tower::ServiceExt;
use upload_relay::gateway::InMemoryGateway;
use upload_relay::server::routes::{create_routes, RouteState};
use upload_relay::{Config, Coordinator};

const MAX_BODY_BYTES: usize = 64 * 1024;

fn app(coordinator: Coordinator) -> Router {
    create_routes(RouteState { coordinator }, MAX_BODY_BYTES)
}

fn small_parts() -> Fixture {
    fixture(Config::builder().min_part_size(1).build())
}

async fn post(app: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn chunk(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

async fn start(app: &Router, name: &str) -> String {
    let (status, body) = post(
        app,
        "/upload/start",
        json!({ "name": name, "type": "image/png" }),
    )
    .await;
    assert_eq!(StatusCode::OK, status, "{body}");
    body["uploadId"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn test_health() {
    let fx = small_parts();
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app(fx.coordinator), request).await;
    assert_eq!(StatusCode::OK, status);
    assert_eq!(json!({ "status": "ok" }), body);
}

#[tokio::test]
async fn test_full_upload() {
    let fx = small_parts();
    let app = app(fx.coordinator.clone());
    let upload_id = start(&app, "a.png").await;

    let mut etags = Vec::new();
    for (n, data) in [(1, b"hello ".as_slice()), (2, b"world".as_slice())] {
        let (status, body) = post(
            &app,
            "/upload/part",
            json!({ "uploadId": upload_id, "partNumber": n, "name": "a.png", "chunk": chunk(data) }),
        )
        .await;
        assert_eq!(StatusCode::OK, status, "{body}");
        etags.push(body["ETag"].as_str().unwrap().to_owned());
    }

    let (status, body) = post(
        &app,
        "/upload/complete",
        json!({
            "uploadId": upload_id,
            "name": "a.png",
            "parts": [
                { "PartNumber": 1, "ETag": etags[0] },
                { "PartNumber": 2, "ETag": etags[1] }
            ],
            "title": "Greeting",
            "description": "says hello"
        }),
    )
    .await;
    assert_eq!(StatusCode::OK, status, "{body}");
    assert_eq!(
        json!({
            "name": "a.png",
            "title": "Greeting",
            "description": "says hello",
            "url": "memory://uploads/a.png"
        }),
        body
    );

    let object = fx.gateway.object("a.png").await.unwrap();
    assert_eq!(b"hello world".as_slice(), &object.data[..]);
    assert_eq!(1, fx.recorder.records().await.len());
}

#[tokio::test]
async fn test_invalid_start_requests() {
    let fx = small_parts();
    let app = app(fx.coordinator);

    let (status, body) = post(&app, "/upload/start", json!({ "name": "", "type": "image/png" })).await;
    assert_eq!(StatusCode::BAD_REQUEST, status);
    assert_eq!("InvalidArgument", body["kind"]);
    assert_eq!(false, body["retryable"]);

    let (status, _) = post(&app, "/upload/start", json!({ "name": "a.png", "type": "png" })).await;
    assert_eq!(StatusCode::BAD_REQUEST, status);

    let (status, body) = post(&app, "/upload/start", json!({ "name": "a.png" })).await;
    assert_eq!(StatusCode::BAD_REQUEST, status);
    assert_eq!("InvalidArgument", body["kind"]);
}

#[tokio::test]
async fn test_part_errors() {
    let fx = small_parts();
    let app = app(fx.coordinator);
    let upload_id = start(&app, "a.png").await;

    let (status, body) = post(
        &app,
        "/upload/part",
        json!({ "uploadId": "nope", "partNumber": 1, "name": "a.png", "chunk": chunk(b"x") }),
    )
    .await;
    assert_eq!(StatusCode::NOT_FOUND, status);
    assert_eq!("SessionNotFound", body["kind"]);

    let part = json!({ "uploadId": upload_id, "partNumber": 1, "name": "a.png", "chunk": chunk(b"x") });
    assert_eq!(StatusCode::OK, post(&app, "/upload/part", part.clone()).await.0);
    let (status, body) = post(&app, "/upload/part", part).await;
    assert_eq!(StatusCode::CONFLICT, status);
    assert_eq!("DuplicatePart", body["kind"]);

    let (status, _) = post(
        &app,
        "/upload/part",
        json!({ "uploadId": upload_id, "partNumber": 2, "name": "a.png", "chunk": "%%%" }),
    )
    .await;
    assert_eq!(StatusCode::BAD_REQUEST, status);

    let (status, body) = post(
        &app,
        "/upload/part",
        json!({ "uploadId": upload_id, "partNumber": 0, "name": "a.png", "chunk": chunk(b"x") }),
    )
    .await;
    assert_eq!(StatusCode::BAD_REQUEST, status);
    assert_eq!("InvalidArgument", body["kind"]);
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let fx = small_parts();
    let app = app(fx.coordinator);
    let upload_id = start(&app, "a.png").await;

    let (status, body) = post(
        &app,
        "/upload/part",
        json!({
            "uploadId": upload_id,
            "partNumber": 1,
            "name": "a.png",
            "chunk": chunk(&random_payload(MAX_BODY_BYTES))
        }),
    )
    .await;
    assert_eq!(StatusCode::PAYLOAD_TOO_LARGE, status);
    assert_eq!("PayloadTooLarge", body["kind"]);
}

#[tokio::test]
async fn test_complete_without_parts() {
    let fx = small_parts();
    let app = app(fx.coordinator);
    let upload_id = start(&app, "a.png").await;

    let (status, body) = post(
        &app,
        "/upload/complete",
        json!({ "uploadId": upload_id, "name": "a.png", "parts": [] }),
    )
    .await;
    assert_eq!(StatusCode::BAD_REQUEST, status);
    assert_eq!("IncompleteUpload", body["kind"]);
    assert!(fx.recorder.records().await.is_empty());
}

#[tokio::test]
async fn test_abort_is_idempotent() {
    let fx = small_parts();
    let app = app(fx.coordinator);
    let upload_id = start(&app, "a.png").await;

    for _ in 0..2 {
        let (status, body) = post(
            &app,
            "/upload/abort",
            json!({ "uploadId": upload_id, "name": "a.png" }),
        )
        .await;
        assert_eq!(StatusCode::NO_CONTENT, status);
        assert_eq!(Value::Null, body);
    }
    assert_eq!(1, fx.gateway.calls().abort);

    let (status, body) = post(
        &app,
        "/upload/part",
        json!({ "uploadId": upload_id, "partNumber": 1, "name": "a.png", "chunk": chunk(b"x") }),
    )
    .await;
    assert_eq!(StatusCode::CONFLICT, status);
    assert_eq!("InvalidSessionState", body["kind"]);
}

#[tokio::test]
async fn test_metadata_failure_is_partial_success() {
    let gateway = Arc::new(InMemoryGateway::new());
    let coordinator = Coordinator::builder()
        .config(Config::builder().min_part_size(1).build())
        .gateway(gateway.clone())
        .metadata_recorder(FailingMetadataRecorder)
        .build()
        .unwrap();
    let app = app(coordinator);
    let upload_id = start(&app, "a.png").await;
    post(
        &app,
        "/upload/part",
        json!({ "uploadId": upload_id, "partNumber": 1, "name": "a.png", "chunk": chunk(b"x") }),
    )
    .await;

    let (status, body) = post(
        &app,
        "/upload/complete",
        json!({ "uploadId": upload_id, "name": "a.png", "parts": [1], "title": "t" }),
    )
    .await;
    assert_eq!(StatusCode::MULTI_STATUS, status);
    assert_eq!("memory://uploads/a.png", body["file"]["url"]);
    assert_eq!("t", body["file"]["title"]);
    assert_eq!("MetadataWriteFailed", body["error"]["kind"]);
    assert!(gateway.object("a.png").await.is_some());
}
