/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::client::Handle;
use crate::error::{self, Error};
use crate::store::SessionHandle;
use crate::types::{SessionId, UploadSession};

/// Types for the start upload operation
pub mod start_upload;

/// Types for the accept part operation
pub mod accept_part;

/// Types for the complete upload operation
pub mod complete_upload;

/// Types for the abort upload operation
pub mod abort_upload;

/// Expiry sweep over all sessions
pub mod reap;

pub(crate) async fn session_handle(handle: &Handle, id: &SessionId) -> Result<SessionHandle, Error> {
    handle
        .store
        .get(id)
        .await?
        .ok_or_else(|| error::session_not_found(id))
}

/// Requests may name the object key alongside the session, it must be the session's key.
pub(crate) fn check_key(session: &UploadSession, key: Option<&str>) -> Result<(), Error> {
    match key {
        Some(key) if key != session.key => Err(error::invalid_argument(format!(
            "session {} uploads {:?}, not {key:?}",
            session.id, session.key
        ))),
        _ => Ok(()),
    }
}

pub(crate) fn required<T>(value: Option<T>, field: &str) -> Result<T, Error> {
    value.ok_or_else(|| error::invalid_argument(format!("{field} is required")))
}
