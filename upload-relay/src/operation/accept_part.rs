/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;

use crate::client::Handle;
use crate::error::{self, Error};
use crate::gateway::StorageGateway;
use crate::operation::{check_key, required, session_handle};
use crate::store::SessionEntry;
use crate::types::{PartNumber, PartRecord, SessionId, SessionStatus};

/// Fluent builder for the accept part operation
#[derive(Debug)]
pub struct AcceptPartFluentBuilder {
    handle: Arc<Handle>,
    session_id: Option<SessionId>,
    key: Option<String>,
    part_number: Option<i64>,
    payload: Option<Bytes>,
}

impl AcceptPartFluentBuilder {
    pub(crate) fn new(handle: Arc<Handle>) -> Self {
        Self {
            handle,
            session_id: None,
            key: None,
            part_number: None,
            payload: None,
        }
    }

    /// Session the part belongs to
    pub fn session_id(mut self, session_id: impl Into<SessionId>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Object key of the session, checked against the session when set
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// 1-based part number, at most 10,000
    pub fn part_number(mut self, part_number: i64) -> Self {
        self.part_number = Some(part_number);
        self
    }

    /// Part content
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Upload the part and record it in the session's ledger
    pub async fn send(self) -> Result<PartRecord, Error> {
        let session_id = required(self.session_id, "session_id")?;
        let part_number = PartNumber::new(required(self.part_number, "part_number")?)?;
        let payload = required(self.payload, "payload")?;
        accept_part(
            &self.handle,
            session_id,
            self.key.as_deref(),
            part_number,
            payload,
        )
        .await
    }
}

/// Fail unless the session can take another part right now
fn check_accepting(entry: &SessionEntry, now: SystemTime) -> Result<(), Error> {
    let session = &entry.session;
    match session.status {
        SessionStatus::Expired => Err(error::session_expired(&session.id)),
        SessionStatus::Initiated | SessionStatus::PartsPending if session.is_expired_at(now) => {
            Err(error::session_expired(&session.id))
        }
        SessionStatus::Initiated | SessionStatus::PartsPending => Ok(()),
        status => Err(error::invalid_state(format!(
            "session {} is {status} and accepts no more parts",
            session.id
        ))),
    }
}

#[tracing::instrument(skip(handle, key, payload), fields(size = payload.len()), level = "debug")]
async fn accept_part(
    handle: &Handle,
    session_id: SessionId,
    key: Option<&str>,
    part_number: PartNumber,
    payload: Bytes,
) -> Result<PartRecord, Error> {
    let limits = handle.config.part_size();
    let size_bytes = payload.len() as u64;
    if size_bytes == 0 {
        return Err(error::payload_too_small(format!(
            "part {part_number} is empty"
        )));
    }
    if size_bytes > limits.max_bytes {
        return Err(error::payload_too_large(format!(
            "part {part_number} is {size_bytes} bytes, the maximum is {} bytes",
            limits.max_bytes
        )));
    }

    let session = session_handle(handle, &session_id).await?;

    // claim the part number, the provider call happens without holding the lock
    let object_key = {
        let mut entry = session.lock().await;
        check_key(&entry.session, key)?;
        check_accepting(&entry, SystemTime::now())?;
        entry
            .ledger
            .reserve(part_number, size_bytes, limits.min_bytes)?;
        entry.session.key.clone()
    };

    let result = handle
        .gateway
        .upload_part(&session_id, &object_key, part_number, payload)
        .await;

    // reconcile with whatever happened to the session in the meantime
    let mut entry = session.lock().await;
    let outcome = match entry.session.status {
        SessionStatus::Initiated | SessionStatus::PartsPending => result,
        SessionStatus::Expired => Err(error::session_expired(&session_id)),
        status => Err(error::invalid_state(format!(
            "session {session_id} became {status} while part {part_number} was uploading"
        ))),
    };

    match outcome {
        Ok(e_tag) => {
            let record = entry.ledger.record(part_number, e_tag)?;
            entry
                .session
                .transition(SessionStatus::PartsPending, SystemTime::now())?;
            handle.metrics.part_accepted(size_bytes);
            tracing::debug!("accepted part {part_number} of session {session_id}");
            Ok(record)
        }
        Err(err) => {
            entry.ledger.release(part_number);
            Err(err)
        }
    }
}
