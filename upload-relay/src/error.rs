/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;

use crate::types::{FileMetadata, PartNumber, SessionId};

/// A boxed error that is `Send` and `Sync`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by this library
///
/// NOTE: Use [`aws_sdk_s3::error::DisplayErrorContext`] or similar to display
/// the entire error cause/source chain.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: BoxError,
}

/// General categories of coordinator errors.
///
/// Every kind maps to a stable string (see [`Error::kind_str`]) so that callers can
/// distinguish retryable from terminal failures without parsing messages.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Operation input validation issues (malformed key, content type, part number, ...)
    InvalidArgument,

    /// No session exists for the given ID
    SessionNotFound,

    /// The session passed its expiry time before the operation could run
    SessionExpired,

    /// The operation is not permitted in the session's current status
    InvalidSessionState,

    /// A part with this number was already accepted (or is in flight) for the session
    DuplicatePart,

    /// Part payload is below the minimum part size and can never be the last part
    PayloadTooSmall,

    /// Part payload exceeds the maximum part size
    PayloadTooLarge,

    /// The part list given for completion is empty or references parts that were not accepted
    IncompleteUpload,

    /// The storage provider could not be reached or kept failing transiently after retries
    GatewayUnavailable,

    /// The storage provider rejected the request; retrying will not help
    GatewayRejected,

    /// The metadata store failed to persist a record
    PersistenceError,

    /// The upload completed but its metadata could not be recorded
    MetadataWriteFailed(UnrecordedUpload),

    /// Some kind of internal runtime issue (e.g. task failure)
    RuntimeError,
}

/// Details of an upload whose object is durable upstream but whose metadata was not recorded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnrecordedUpload {
    metadata: Box<FileMetadata>,
}

impl UnrecordedUpload {
    /// The metadata that failed to persist
    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }
}

impl Error {
    /// Creates a new coordinator [`Error`] from a known kind of error as well as an arbitrary error
    /// source.
    pub fn new<E>(kind: ErrorKind, err: E) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            kind,
            source: err.into(),
        }
    }

    /// Returns the corresponding [`ErrorKind`] for this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Stable identifier for the error kind, suitable for wire responses.
    pub fn kind_str(&self) -> &'static str {
        match &self.kind {
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::SessionNotFound => "SessionNotFound",
            ErrorKind::SessionExpired => "SessionExpired",
            ErrorKind::InvalidSessionState => "InvalidSessionState",
            ErrorKind::DuplicatePart => "DuplicatePart",
            ErrorKind::PayloadTooSmall => "PayloadTooSmall",
            ErrorKind::PayloadTooLarge => "PayloadTooLarge",
            ErrorKind::IncompleteUpload => "IncompleteUpload",
            ErrorKind::GatewayUnavailable => "GatewayUnavailable",
            ErrorKind::GatewayRejected => "GatewayRejected",
            ErrorKind::PersistenceError => "PersistenceError",
            ErrorKind::MetadataWriteFailed(_) => "MetadataWriteFailed",
            ErrorKind::RuntimeError => "RuntimeError",
        }
    }

    /// Whether the caller may retry the same request and reasonably expect a different outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::GatewayUnavailable)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::InvalidArgument => write!(f, "invalid argument"),
            ErrorKind::SessionNotFound => write!(f, "upload session not found"),
            ErrorKind::SessionExpired => write!(f, "upload session expired"),
            ErrorKind::InvalidSessionState => write!(f, "operation not allowed in current session state"),
            ErrorKind::DuplicatePart => write!(f, "duplicate part"),
            ErrorKind::PayloadTooSmall => write!(f, "part payload too small"),
            ErrorKind::PayloadTooLarge => write!(f, "part payload too large"),
            ErrorKind::IncompleteUpload => write!(f, "incomplete upload"),
            ErrorKind::GatewayUnavailable => write!(f, "storage gateway unavailable"),
            ErrorKind::GatewayRejected => write!(f, "storage gateway rejected the request"),
            ErrorKind::PersistenceError => write!(f, "metadata persistence error"),
            ErrorKind::MetadataWriteFailed(unrecorded) => write!(
                f,
                "upload of {:?} completed but its metadata could not be recorded",
                unrecorded.metadata.name
            ),
            ErrorKind::RuntimeError => write!(f, "runtime error"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::new(ErrorKind::RuntimeError, value)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::new(ErrorKind::PersistenceError, value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::new(ErrorKind::PersistenceError, value)
    }
}

pub(crate) fn invalid_argument<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::InvalidArgument, err)
}

pub(crate) fn session_not_found(id: &SessionId) -> Error {
    Error::new(
        ErrorKind::SessionNotFound,
        format!("no upload session with id {id}"),
    )
}

pub(crate) fn session_expired(id: &SessionId) -> Error {
    Error::new(
        ErrorKind::SessionExpired,
        format!("upload session {id} has expired"),
    )
}

pub(crate) fn invalid_state<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::InvalidSessionState, err)
}

pub(crate) fn duplicate_part(id: &SessionId, part_number: PartNumber) -> Error {
    Error::new(
        ErrorKind::DuplicatePart,
        format!("part {part_number} was already submitted for session {id}"),
    )
}

pub(crate) fn payload_too_small<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::PayloadTooSmall, err)
}

pub(crate) fn payload_too_large<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::PayloadTooLarge, err)
}

pub(crate) fn incomplete_upload<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::IncompleteUpload, err)
}

pub(crate) fn gateway_unavailable<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::GatewayUnavailable, err)
}

pub(crate) fn gateway_rejected<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::GatewayRejected, err)
}

pub(crate) fn runtime_error<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::RuntimeError, err)
}

pub(crate) fn metadata_write_failed(metadata: FileMetadata, source: Error) -> Error {
    Error::new(
        ErrorKind::MetadataWriteFailed(UnrecordedUpload {
            metadata: Box::new(metadata),
        }),
        source,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_are_stable() {
        let err = invalid_argument("bad key");
        assert_eq!("InvalidArgument", err.kind_str());
        assert!(!err.is_retryable());

        let err = gateway_unavailable("connection reset");
        assert_eq!("GatewayUnavailable", err.kind_str());
        assert!(err.is_retryable());

        let err = gateway_rejected("access denied");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_metadata_write_failed_keeps_metadata() {
        let metadata = FileMetadata {
            name: "a.png".to_owned(),
            title: "A".to_owned(),
            description: String::new(),
            url: "https://example.com/a.png".to_owned(),
            uploaded_at_ms: 1,
        };
        let err = metadata_write_failed(
            metadata.clone(),
            Error::new(ErrorKind::PersistenceError, "disk full"),
        );
        assert_eq!("MetadataWriteFailed", err.kind_str());
        match err.kind() {
            ErrorKind::MetadataWriteFailed(unrecorded) => {
                assert_eq!(&metadata, unrecorded.metadata())
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }
}
