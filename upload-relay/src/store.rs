/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Upload session storage.
//!
//! The store owns the session records and hands out a [`SessionHandle`] per session. The
//! handle's mutex is the per-session lock: every mutation of a session or its part ledger
//! happens while holding it, while operations on different sessions never contend.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Error;
use crate::ledger::PartLedger;
use crate::types::{SessionId, UploadSession};

pub(crate) mod in_memory;

pub use in_memory::InMemorySessionStore;

/// A session together with its part ledger
#[derive(Debug)]
pub struct SessionEntry {
    /// The session record
    pub session: UploadSession,
    /// Parts claimed or accepted for the session
    pub ledger: PartLedger,
}

impl SessionEntry {
    /// Wrap a freshly started session with an empty ledger
    pub fn new(session: UploadSession) -> Self {
        let ledger = PartLedger::new(session.id.clone());
        Self { session, ledger }
    }
}

/// Shared, lockable reference to one session
pub type SessionHandle = Arc<Mutex<SessionEntry>>;

/// Storage for upload sessions keyed by [`SessionId`].
#[async_trait]
pub trait SessionStore: Send + Sync + Debug {
    /// Store a new session.
    ///
    /// Fails with `InvalidSessionState` if a session with the same ID already exists.
    async fn insert(&self, entry: SessionEntry) -> Result<SessionHandle, Error>;

    /// Look up a session
    async fn get(&self, id: &SessionId) -> Result<Option<SessionHandle>, Error>;

    /// Forget a session, a missing session is not an error
    async fn remove(&self, id: &SessionId) -> Result<(), Error>;

    /// Snapshot of all sessions currently stored
    async fn list(&self) -> Result<Vec<SessionHandle>, Error>;
}
