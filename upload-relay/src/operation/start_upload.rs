/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::Arc;
use std::time::SystemTime;

use crate::client::Handle;
use crate::error::{self, Error};
use crate::gateway::StorageGateway;
use crate::operation::required;
use crate::store::SessionEntry;
use crate::types::{SessionId, UploadSession};

/// Longest object key S3 accepts, in bytes
const MAX_KEY_LEN: usize = 1024;

/// Fluent builder for the start upload operation
#[derive(Debug)]
pub struct StartUploadFluentBuilder {
    handle: Arc<Handle>,
    key: Option<String>,
    content_type: Option<String>,
}

impl StartUploadFluentBuilder {
    pub(crate) fn new(handle: Arc<Handle>) -> Self {
        Self {
            handle,
            key: None,
            content_type: None,
        }
    }

    /// Object key the upload is assembled into
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// MIME type of the object, e.g. `image/png`
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Begin the provider upload and open a session for it
    pub async fn send(self) -> Result<SessionId, Error> {
        let key = required(self.key, "key")?;
        let content_type = required(self.content_type, "content_type")?;
        start_upload(&self.handle, key, content_type).await
    }
}

#[tracing::instrument(skip(handle), level = "debug")]
async fn start_upload(
    handle: &Handle,
    key: String,
    content_type: String,
) -> Result<SessionId, Error> {
    validate_key(&key)?;
    validate_content_type(&content_type)?;

    let upload_id = handle.gateway.begin(&key, &content_type).await?;
    let id = SessionId::new(upload_id);
    let session = UploadSession::new(
        id.clone(),
        key,
        content_type,
        SystemTime::now(),
        handle.config.session_ttl(),
    );

    if let Err(err) = handle.store.insert(SessionEntry::new(session.clone())).await {
        // nothing tracks the provider upload without a session, release it
        if let Err(abort_err) = handle.gateway.abort(&id, &session.key).await {
            tracing::warn!("failed to abort untracked upload {id}: {abort_err}");
        }
        return Err(err);
    }

    handle.metrics.session_started();
    tracing::info!(session_id = %id, key = %session.key, "upload session started");
    Ok(id)
}

fn validate_key(key: &str) -> Result<(), Error> {
    if key.is_empty() {
        return Err(error::invalid_argument("object key must not be empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(error::invalid_argument(format!(
            "object key is {} bytes, the limit is {MAX_KEY_LEN}",
            key.len()
        )));
    }
    if key.chars().any(char::is_control) {
        return Err(error::invalid_argument(
            "object key must not contain control characters",
        ));
    }
    Ok(())
}

/// RFC 9110 `tchar`
fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}

fn is_token(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_token_char)
}

fn is_parameter(param: &str) -> bool {
    let Some((name, value)) = param.split_once('=') else {
        return false;
    };
    let value = value.trim();
    let quoted = value.len() >= 2 && value.starts_with('"') && value.ends_with('"');
    is_token(name.trim()) && (quoted || is_token(value))
}

/// Accepts `type/subtype` optionally followed by `; name=value` parameters
fn validate_content_type(content_type: &str) -> Result<(), Error> {
    let mut sections = content_type.split(';');
    let essence = sections.next().unwrap_or_default().trim();
    let valid_essence = essence
        .split_once('/')
        .is_some_and(|(ty, subtype)| is_token(ty) && is_token(subtype));

    if valid_essence && sections.all(|p| is_parameter(p.trim())) {
        Ok(())
    } else {
        Err(error::invalid_argument(format!(
            "invalid content type: {content_type:?}"
        )))
    }
}
