/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::Arc;
use std::time::SystemTime;

use crate::client::Handle;
use crate::error::{self, Error};
use crate::gateway::StorageGateway;
use crate::ledger::PartSelector;
use crate::operation::{check_key, required, session_handle};
use crate::types::{epoch_millis, FileMetadata, PartNumber, SessionId, SessionStatus};

/// Fluent builder for the complete upload operation
#[derive(Debug)]
pub struct CompleteUploadFluentBuilder {
    handle: Arc<Handle>,
    session_id: Option<SessionId>,
    key: Option<String>,
    parts: Vec<RequestedPart>,
    title: String,
    description: String,
}

/// A part named in a completion request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedPart {
    /// Part number as sent by the caller
    pub part_number: i64,
    /// ETag the caller got for the part, checked against the accepted ETag when set
    pub e_tag: Option<String>,
}

impl From<i64> for RequestedPart {
    fn from(part_number: i64) -> Self {
        Self {
            part_number,
            e_tag: None,
        }
    }
}

impl CompleteUploadFluentBuilder {
    pub(crate) fn new(handle: Arc<Handle>) -> Self {
        Self {
            handle,
            session_id: None,
            key: None,
            parts: Vec::new(),
            title: String::new(),
            description: String::new(),
        }
    }

    /// Session to complete
    pub fn session_id(mut self, session_id: impl Into<SessionId>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Object key of the session, checked against the session when set
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Appends a part to assemble.
    ///
    /// To override the contents of this collection use [`set_parts`](Self::set_parts).
    pub fn parts(mut self, part: impl Into<RequestedPart>) -> Self {
        self.parts.push(part.into());
        self
    }

    /// Parts to assemble, in any order
    pub fn set_parts(mut self, parts: Vec<RequestedPart>) -> Self {
        self.parts = parts;
        self
    }

    /// Title recorded with the file metadata
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Description recorded with the file metadata
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Assemble the object and record its metadata
    pub async fn send(self) -> Result<FileMetadata, Error> {
        let session_id = required(self.session_id, "session_id")?;
        let input = CompleteUploadInput {
            key: self.key,
            parts: self.parts,
            title: self.title,
            description: self.description,
        };
        complete_upload(&self.handle, session_id, input).await
    }
}

fn select_parts(requested: &[RequestedPart]) -> Result<Vec<PartSelector>, Error> {
    requested
        .iter()
        .map(|part| {
            let part_number = PartNumber::new(part.part_number).map_err(|_| {
                error::incomplete_upload(format!(
                    "part number {} is out of range",
                    part.part_number
                ))
            })?;
            Ok(PartSelector {
                part_number,
                e_tag: part.e_tag.clone(),
            })
        })
        .collect()
}

#[derive(Debug)]
struct CompleteUploadInput {
    key: Option<String>,
    parts: Vec<RequestedPart>,
    title: String,
    description: String,
}

#[tracing::instrument(skip(handle, input), level = "debug")]
async fn complete_upload(
    handle: &Handle,
    session_id: SessionId,
    input: CompleteUploadInput,
) -> Result<FileMetadata, Error> {
    let session = session_handle(handle, &session_id).await?;
    let min_part_size = handle.config.part_size().min_bytes;

    let (object_key, parts) = {
        let mut entry = session.lock().await;
        check_key(&entry.session, input.key.as_deref())?;
        let now = SystemTime::now();
        match entry.session.status {
            SessionStatus::Initiated | SessionStatus::PartsPending => {}
            SessionStatus::Expired => return Err(error::session_expired(&session_id)),
            status => {
                return Err(error::invalid_state(format!(
                    "session {session_id} is {status} and can not be completed"
                )))
            }
        }
        if entry.session.is_expired_at(now) {
            return Err(error::session_expired(&session_id));
        }

        let selection = select_parts(&input.parts)?;
        let parts = entry.ledger.select(&selection, min_part_size)?;
        entry.session.transition(SessionStatus::Completing, now)?;
        (entry.session.key.clone(), parts)
    };

    let url = match handle
        .gateway
        .complete(&session_id, &object_key, &parts)
        .await
    {
        Ok(url) => url,
        Err(err) => {
            // the provider upload is still open, let the caller retry
            let mut entry = session.lock().await;
            entry
                .session
                .transition(SessionStatus::PartsPending, SystemTime::now())?;
            return Err(err);
        }
    };

    let completed_at = SystemTime::now();
    {
        let mut entry = session.lock().await;
        entry
            .session
            .transition(SessionStatus::Completed, completed_at)?;
    }
    handle.metrics.session_completed();
    tracing::info!(session_id = %session_id, key = %object_key, %url, "upload completed");

    let metadata = FileMetadata {
        name: object_key,
        title: input.title,
        description: input.description,
        url,
        uploaded_at_ms: epoch_millis(completed_at),
    };
    if let Err(err) = handle.recorder.save(&metadata).await {
        handle.metrics.metadata_write_failed();
        tracing::error!(
            session_id = %session_id,
            "upload is durable but its metadata was not recorded: {err}"
        );
        return Err(error::metadata_write_failed(metadata, err));
    }
    Ok(metadata)
}
