/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::operation::abort_multipart_upload::AbortMultipartUploadOutput;
use aws_sdk_s3::operation::complete_multipart_upload::CompleteMultipartUploadOutput;
use aws_sdk_s3::operation::create_multipart_upload::CreateMultipartUploadOutput;
use aws_sdk_s3::operation::upload_part::UploadPartOutput;
use aws_smithy_mocks_experimental::{mock, RuleMode};
use aws_smithy_runtime_api::http::StatusCode;
use aws_smithy_types::body::SdkBody;
use test_common::{
    fast_retry_config, mock_client_with_stubbed_http_client, mock_s3_gateway, random_payload,
};
use upload_relay::error::ErrorKind;
use upload_relay::gateway::S3Gateway;
use upload_relay::metadata::InMemoryMetadataRecorder;
use upload_relay::types::SessionStatus;
use upload_relay::Coordinator;

fn create_upload() -> aws_smithy_mocks_experimental::Rule {
    mock!(aws_sdk_s3::Client::create_multipart_upload).then_output(|| {
        CreateMultipartUploadOutput::builder()
            .upload_id("upload-1")
            .build()
    })
}

fn coordinator(gateway: S3Gateway) -> Coordinator {
    Coordinator::builder()
        .config(fast_retry_config().min_part_size(1).build())
        .gateway(gateway)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_upload_through_s3() {
    let create = mock!(aws_sdk_s3::Client::create_multipart_upload)
        .match_requests(|r| r.bucket() == Some("photos") && r.key() == Some("a.png"))
        .then_output(|| {
            CreateMultipartUploadOutput::builder()
                .upload_id("upload-1")
                .build()
        });
    let upload = mock!(aws_sdk_s3::Client::upload_part)
        .match_requests(|r| r.upload_id() == Some("upload-1"))
        .then_output(|| UploadPartOutput::builder().e_tag("\"etag-1\"").build());
    let complete = mock!(aws_sdk_s3::Client::complete_multipart_upload)
        .match_requests(|r| r.upload_id() == Some("upload-1"))
        .then_output(|| CompleteMultipartUploadOutput::builder().build());
    let gateway = mock_s3_gateway(
        "photos",
        RuleMode::Sequential,
        &[&create, &upload, &complete],
    );
    let recorder = Arc::new(InMemoryMetadataRecorder::new());
    let coordinator = Coordinator::builder()
        .config(fast_retry_config().min_part_size(1).build())
        .gateway(gateway)
        .metadata_recorder(recorder.clone())
        .build()
        .unwrap();

    let session_id = coordinator
        .start_upload()
        .key("a.png")
        .content_type("image/png")
        .send()
        .await
        .unwrap();
    assert_eq!("upload-1", session_id.as_str());

    let part = coordinator
        .accept_part()
        .session_id(session_id.clone())
        .part_number(1)
        .payload(random_payload(32))
        .send()
        .await
        .unwrap();
    assert_eq!("\"etag-1\"", part.e_tag);

    let file = coordinator
        .complete_upload()
        .session_id(session_id)
        .parts(1)
        .send()
        .await
        .unwrap();
    assert_eq!("https://photos.s3.us-east-1.amazonaws.com/a.png", file.url);
    assert_eq!(vec![file], recorder.records().await);
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let upload = mock!(aws_sdk_s3::Client::upload_part).then_http_response(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        HttpResponse::new(StatusCode::try_from(500).unwrap(), SdkBody::empty())
    });
    let client =
        mock_client_with_stubbed_http_client(RuleMode::MatchAny, &[&create_upload(), &upload]);
    let coordinator = coordinator(S3Gateway::new(client, "photos"));

    let session_id = coordinator
        .start_upload()
        .key("a.png")
        .content_type("image/png")
        .send()
        .await
        .unwrap();
    let err = coordinator
        .accept_part()
        .session_id(session_id.clone())
        .part_number(1)
        .payload(random_payload(32))
        .send()
        .await
        .unwrap_err();

    assert_eq!(&ErrorKind::GatewayUnavailable, err.kind());
    assert!(err.is_retryable());
    assert_eq!(3, attempts.load(Ordering::SeqCst));
    assert!(coordinator.parts(&session_id).await.unwrap().is_empty());
    assert_eq!(
        SessionStatus::Initiated,
        coordinator.session(&session_id).await.unwrap().status
    );
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let upload = mock!(aws_sdk_s3::Client::upload_part).then_http_response(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        HttpResponse::new(StatusCode::try_from(403).unwrap(), SdkBody::empty())
    });
    let client =
        mock_client_with_stubbed_http_client(RuleMode::MatchAny, &[&create_upload(), &upload]);
    let coordinator = coordinator(S3Gateway::new(client, "photos"));

    let session_id = coordinator
        .start_upload()
        .key("a.png")
        .content_type("image/png")
        .send()
        .await
        .unwrap();
    let err = coordinator
        .accept_part()
        .session_id(session_id)
        .part_number(1)
        .payload(random_payload(32))
        .send()
        .await
        .unwrap_err();

    assert_eq!(&ErrorKind::GatewayRejected, err.kind());
    assert!(!err.is_retryable());
    assert_eq!(1, attempts.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_abort_reaches_s3_once() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let abort = mock!(aws_sdk_s3::Client::abort_multipart_upload)
        .match_requests(|r| r.upload_id() == Some("upload-1") && r.key() == Some("a.png"))
        .then_output(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            AbortMultipartUploadOutput::builder().build()
        });
    let gateway = mock_s3_gateway("photos", RuleMode::MatchAny, &[&create_upload(), &abort]);
    let coordinator = coordinator(gateway);

    let session_id = coordinator
        .start_upload()
        .key("a.png")
        .content_type("image/png")
        .send()
        .await
        .unwrap();
    for _ in 0..2 {
        coordinator
            .abort_upload()
            .session_id(session_id.clone())
            .send()
            .await
            .unwrap();
    }
    assert_eq!(1, attempts.load(Ordering::SeqCst));
}
