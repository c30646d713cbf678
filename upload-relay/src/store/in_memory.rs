/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! In-memory implementation of the SessionStore trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::error::{self, Error};
use crate::store::{SessionEntry, SessionHandle, SessionStore};
use crate::types::SessionId;

/// Keeps all sessions in process memory.
///
/// The map lock is only held to find or insert a handle, never while a session is mutated.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    // session-id -> session
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

impl InMemorySessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, entry: SessionEntry) -> Result<SessionHandle, Error> {
        let mut sessions = self.sessions.write().await;
        let id = entry.session.id.clone();
        if sessions.contains_key(&id) {
            return Err(error::invalid_state(format!("session {id} already exists")));
        }
        let handle = Arc::new(Mutex::new(entry));
        sessions.insert(id, handle.clone());
        Ok(handle)
    }

    async fn get(&self, id: &SessionId) -> Result<Option<SessionHandle>, Error> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(id).cloned())
    }

    async fn remove(&self, id: &SessionId) -> Result<(), Error> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionHandle>, Error> {
        let sessions = self.sessions.read().await;
        Ok(sessions.values().cloned().collect())
    }
}
