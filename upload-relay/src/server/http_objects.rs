/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use aws_sdk_s3::error::DisplayErrorContext;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{self, Error, ErrorKind};
use crate::operation::complete_upload::RequestedPart;
use crate::types::FileMetadata;

/// Error body returned for every failed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable error kind, e.g. `SessionNotFound`
    pub kind: String,
    /// Human readable description
    pub message: String,
    /// Whether repeating the same request may succeed
    pub retryable: bool,
}

/// A failed request, rendered as JSON with a status derived from the error kind
#[derive(Debug)]
pub struct ApiError {
    status_code: StatusCode,
    body: ErrorBody,
    file: Option<FileResponse>,
}

impl ApiError {
    /// HTTP status the error is reported with
    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    /// 400 with an `InvalidArgument` kind
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::from(error::invalid_argument(message.into()))
    }
}

fn status_for(kind: &ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidArgument
        | ErrorKind::PayloadTooSmall
        | ErrorKind::PayloadTooLarge
        | ErrorKind::IncompleteUpload => StatusCode::BAD_REQUEST,
        ErrorKind::SessionNotFound => StatusCode::NOT_FOUND,
        ErrorKind::SessionExpired => StatusCode::GONE,
        ErrorKind::InvalidSessionState | ErrorKind::DuplicatePart => StatusCode::CONFLICT,
        ErrorKind::GatewayUnavailable
        | ErrorKind::GatewayRejected
        | ErrorKind::PersistenceError => StatusCode::BAD_GATEWAY,
        ErrorKind::MetadataWriteFailed(_) => StatusCode::MULTI_STATUS,
        ErrorKind::RuntimeError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let file = match err.kind() {
            ErrorKind::MetadataWriteFailed(unrecorded) => {
                Some(FileResponse::from(unrecorded.metadata().clone()))
            }
            _ => None,
        };
        Self {
            status_code: status_for(err.kind()),
            body: ErrorBody {
                kind: err.kind_str().to_owned(),
                message: DisplayErrorContext(&err).to_string(),
                retryable: err.is_retryable(),
            },
            file,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            let mut err = Self::from(error::payload_too_large(rejection.body_text()));
            err.status_code = StatusCode::PAYLOAD_TOO_LARGE;
            return err;
        }
        Self::bad_request(rejection.body_text())
    }
}

/// Body of a 207 response: the upload is durable, its metadata is not
#[derive(Debug, Serialize, Deserialize)]
pub struct PartialSuccessBody {
    /// The uploaded file
    pub file: FileResponse,
    /// Why the metadata was not recorded
    pub error: ErrorBody,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status_code.is_server_error() {
            tracing::error!("API Error: {} - {}", self.status_code, self.body.message);
        } else {
            tracing::debug!("API Error: {} - {}", self.status_code, self.body.message);
        }
        match self.file {
            Some(file) => {
                let body = PartialSuccessBody {
                    file,
                    error: self.body,
                };
                (self.status_code, Json(body)).into_response()
            }
            None => (self.status_code, Json(self.body)).into_response(),
        }
    }
}

/// Unwrap a JSON body, reporting malformed bodies as `InvalidArgument`
pub(crate) fn parse_json<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(value)| value).map_err(ApiError::from)
}

/// `POST /upload/start`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartUploadRequest {
    /// Object key
    pub name: String,
    /// MIME type
    #[serde(rename = "type")]
    pub content_type: String,
}

/// Response to `POST /upload/start`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartUploadResponse {
    /// Session ID, the provider's upload ID
    pub upload_id: String,
}

/// `POST /upload/part`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPartRequest {
    /// Session ID
    pub upload_id: String,
    /// 1-based part number
    pub part_number: i64,
    /// Object key of the session
    pub name: String,
    /// Base64 encoded part content
    pub chunk: String,
}

impl UploadPartRequest {
    /// Decode the base64 chunk
    pub(crate) fn payload(&self) -> Result<Bytes, ApiError> {
        base64::engine::general_purpose::STANDARD
            .decode(self.chunk.as_bytes())
            .map(Bytes::from)
            .map_err(|e| ApiError::bad_request(format!("chunk is not valid base64: {e}")))
    }
}

/// Response to `POST /upload/part`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadPartResponse {
    /// Provider ETag of the part
    #[serde(rename = "ETag")]
    pub e_tag: String,
}

/// A part listed in `POST /upload/complete`, either a bare number or the S3 shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompletedPartRef {
    /// `{ "PartNumber": 1, "ETag": "..." }`
    Part {
        /// Part number
        #[serde(rename = "PartNumber", alias = "partNumber")]
        part_number: i64,
        /// ETag returned when the part was uploaded
        #[serde(
            rename = "ETag",
            alias = "eTag",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        e_tag: Option<String>,
    },
    /// `1`
    Number(i64),
}

impl From<CompletedPartRef> for RequestedPart {
    fn from(value: CompletedPartRef) -> Self {
        match value {
            CompletedPartRef::Part {
                part_number,
                e_tag,
            } => RequestedPart {
                part_number,
                e_tag,
            },
            CompletedPartRef::Number(part_number) => RequestedPart::from(part_number),
        }
    }
}

/// `POST /upload/complete`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    /// Session ID
    pub upload_id: String,
    /// Object key of the session
    pub name: String,
    /// Parts to assemble
    #[serde(default)]
    pub parts: Vec<CompletedPartRef>,
    /// File title
    #[serde(default)]
    pub title: String,
    /// File description
    #[serde(default)]
    pub description: String,
}

/// `POST /upload/abort`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortUploadRequest {
    /// Session ID
    pub upload_id: String,
    /// Object key of the session
    pub name: String,
}

/// A recorded file as returned by `POST /upload/complete`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileResponse {
    /// Object key
    pub name: String,
    /// File title
    pub title: String,
    /// File description
    pub description: String,
    /// Object URL
    pub url: String,
}

impl From<FileMetadata> for FileResponse {
    fn from(metadata: FileMetadata) -> Self {
        FileResponse {
            name: metadata.name,
            title: metadata.title,
            description: metadata.description,
            url: metadata.url,
        }
    }
}
