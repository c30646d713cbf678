/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::Arc;
use std::time::SystemTime;

use crate::client::Handle;
use crate::error::{self, Error};
use crate::gateway::StorageGateway;
use crate::operation::{check_key, required, session_handle};
use crate::types::{SessionId, SessionStatus};

/// Fluent builder for the abort upload operation
#[derive(Debug)]
pub struct AbortUploadFluentBuilder {
    handle: Arc<Handle>,
    session_id: Option<SessionId>,
    key: Option<String>,
}

impl AbortUploadFluentBuilder {
    pub(crate) fn new(handle: Arc<Handle>) -> Self {
        Self {
            handle,
            session_id: None,
            key: None,
        }
    }

    /// Session to abort
    pub fn session_id(mut self, session_id: impl Into<SessionId>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Object key of the session, checked against the session when set
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Abort the session. Aborting a session that already ended is a no-op.
    pub async fn send(self) -> Result<(), Error> {
        let session_id = required(self.session_id, "session_id")?;
        abort_upload(&self.handle, session_id, self.key.as_deref()).await
    }
}

#[tracing::instrument(skip(handle, key), level = "debug")]
async fn abort_upload(
    handle: &Handle,
    session_id: SessionId,
    key: Option<&str>,
) -> Result<(), Error> {
    let session = session_handle(handle, &session_id).await?;

    // The lock is held across the provider call so concurrent aborts (and parts still in
    // flight) observe the final status. A failed provider abort leaves the session open.
    let mut entry = session.lock().await;
    check_key(&entry.session, key)?;
    match entry.session.status {
        SessionStatus::Aborted | SessionStatus::Completed | SessionStatus::Expired => {
            tracing::debug!(
                "session {session_id} already {}, nothing to abort",
                entry.session.status
            );
            return Ok(());
        }
        SessionStatus::Completing => {
            return Err(error::invalid_state(format!(
                "session {session_id} is completing and can not be aborted"
            )))
        }
        SessionStatus::Initiated | SessionStatus::PartsPending => {}
    }

    handle
        .gateway
        .abort(&session_id, &entry.session.key)
        .await?;
    entry
        .session
        .transition(SessionStatus::Aborted, SystemTime::now())?;
    handle.metrics.session_aborted();
    tracing::info!(session_id = %session_id, key = %entry.session.key, "upload aborted");
    Ok(())
}
