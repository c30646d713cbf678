/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{self, Error};

/// Maximum number of parts that a single S3 multipart upload supports
pub const MAX_PARTS: i32 = 10_000;

/// Identifier of an upload session.
///
/// The value is the upload ID issued by the storage provider when the multipart
/// upload was created, so it is opaque to the coordinator.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a provider issued upload ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// 1-based sequence number of a part within a multipart upload.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PartNumber(i32);

impl PartNumber {
    /// Validate a raw part number, it must be in `1..=10_000`.
    pub fn new(value: i64) -> Result<Self, Error> {
        if value < 1 || value > MAX_PARTS as i64 {
            return Err(error::invalid_argument(format!(
                "part number {value} is out of range, must be between 1 and {MAX_PARTS}"
            )));
        }
        Ok(Self(value as i32))
    }

    /// The raw part number as used by the S3 API
    pub fn get(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for PartNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an upload session.
///
/// ```text
/// Initiated -> PartsPending -> Completing -> Completed
///     |             |
///     +-------------+--> Aborted | Expired
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    /// The provider upload exists, no part has been accepted yet
    Initiated,
    /// At least one part has been accepted
    PartsPending,
    /// A completion request is in flight with the provider
    Completing,
    /// The provider assembled the object (terminal)
    Completed,
    /// The caller aborted the upload (terminal)
    Aborted,
    /// The session outlived its TTL and was reaped (terminal)
    Expired,
}

impl SessionStatus {
    /// Parts may still be accepted and the session may still be aborted or reaped
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Initiated | SessionStatus::PartsPending)
    }

    /// No further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Aborted | SessionStatus::Expired
        )
    }

    /// Whether moving from `self` to `next` is a legal edge of the state machine.
    ///
    /// `Completing -> PartsPending` is allowed so that a failed completion can be retried
    /// against the still-open provider upload.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Initiated, PartsPending)
                | (PartsPending, PartsPending)
                | (PartsPending, Completing)
                | (Completing, Completed)
                | (Completing, PartsPending)
                | (Initiated, Aborted)
                | (PartsPending, Aborted)
                | (Initiated, Expired)
                | (PartsPending, Expired)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The coordinator's record of one multipart upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadSession {
    /// Session (provider upload) ID
    pub id: SessionId,
    /// Object key the upload will produce
    pub key: String,
    /// MIME type the object was created with
    pub content_type: String,
    /// Current lifecycle state
    pub status: SessionStatus,
    /// When the session was started
    pub created_at: SystemTime,
    /// After this instant the session is no longer usable and will be reaped
    pub expires_at: SystemTime,
    /// When the session reached a terminal state
    pub closed_at: Option<SystemTime>,
}

impl UploadSession {
    pub(crate) fn new(
        id: SessionId,
        key: String,
        content_type: String,
        now: SystemTime,
        ttl: Duration,
    ) -> Self {
        Self {
            id,
            key,
            content_type,
            status: SessionStatus::Initiated,
            created_at: now,
            expires_at: now + ttl,
            closed_at: None,
        }
    }

    /// True once `now` is past the expiry time
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expires_at < now
    }

    /// Move the session to `next`, enforcing the state machine.
    pub(crate) fn transition(&mut self, next: SessionStatus, now: SystemTime) -> Result<(), Error> {
        if !self.status.can_transition_to(next) {
            return Err(error::invalid_state(format!(
                "session {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        tracing::trace!(session_id = %self.id, from = %self.status, to = %next, "session transition");
        self.status = next;
        if next.is_terminal() {
            self.closed_at = Some(now);
        }
        Ok(())
    }
}

/// A part accepted by the provider for a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartRecord {
    /// Owning session
    pub session_id: SessionId,
    /// Part sequence number
    pub part_number: PartNumber,
    /// Provider checksum, needed to complete the upload
    pub e_tag: String,
    /// Payload size in bytes
    pub size_bytes: u64,
}

/// Metadata recorded for a finished upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Object key
    pub name: String,
    /// Caller supplied title
    pub title: String,
    /// Caller supplied description
    pub description: String,
    /// Location of the assembled object
    pub url: String,
    /// Completion time in milliseconds since the UNIX epoch
    pub uploaded_at_ms: u64,
}

/// The concurrency settings to use for calls made to the storage provider.
#[derive(Debug, Clone, Default)]
pub enum ConcurrencySetting {
    /// Use a default limit suited to a single relay process.
    #[default]
    Auto,

    /// Explicitly configured concurrency setting.
    Explicit(usize),
}

pub(crate) fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
