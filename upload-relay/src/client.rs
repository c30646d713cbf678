/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::Arc;
use std::time::SystemTime;

use crate::config::Config;
use crate::error::{self, Error};
use crate::gateway::{RetryingGateway, StorageGateway};
use crate::ledger::PartCounts;
use crate::metadata::{InMemoryMetadataRecorder, MetadataRecorder};
use crate::metrics::CoordinatorMetrics;
use crate::operation::abort_upload::AbortUploadFluentBuilder;
use crate::operation::accept_part::AcceptPartFluentBuilder;
use crate::operation::complete_upload::CompleteUploadFluentBuilder;
use crate::operation::reap::ReapReport;
use crate::operation::start_upload::StartUploadFluentBuilder;
use crate::store::{InMemorySessionStore, SessionStore};
use crate::types::{PartRecord, SessionId, UploadSession};

/// Multipart upload coordinator.
///
/// Cheap to clone, all clones share the same session store, gateway and metrics.
#[derive(Debug, Clone)]
pub struct Coordinator {
    pub(crate) handle: Arc<Handle>,
}

/// Whatever is needed to carry out operations: config, session store, gateway, recorder
#[derive(Debug)]
pub(crate) struct Handle {
    pub(crate) config: Config,
    pub(crate) store: Arc<dyn SessionStore>,
    pub(crate) gateway: RetryingGateway<Arc<dyn StorageGateway>>,
    pub(crate) recorder: Arc<dyn MetadataRecorder>,
    pub(crate) metrics: CoordinatorMetrics,
}

impl Drop for Handle {
    fn drop(&mut self) {
        tracing::info!("coordinator metrics summary - {}", self.metrics);
    }
}

impl Coordinator {
    /// Create a new coordinator builder
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Returns the coordinator's configuration
    pub fn config(&self) -> &Config {
        &self.handle.config
    }

    /// Returns the coordinator's metrics
    pub fn metrics(&self) -> &CoordinatorMetrics {
        &self.handle.metrics
    }

    /// Begin a multipart upload and open a session for it.
    ///
    /// Constructs a fluent builder for the
    /// [`StartUpload`](crate::operation::start_upload::StartUploadFluentBuilder) operation.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// async fn start(coordinator: &upload_relay::Coordinator) -> Result<(), upload_relay::error::Error> {
    ///     let session_id = coordinator
    ///         .start_upload()
    ///         .key("a.png")
    ///         .content_type("image/png")
    ///         .send()
    ///         .await?;
    ///     println!("started session {session_id}");
    ///     Ok(())
    /// }
    /// ```
    pub fn start_upload(&self) -> StartUploadFluentBuilder {
        StartUploadFluentBuilder::new(self.handle.clone())
    }

    /// Upload one part of an open session.
    ///
    /// Constructs a fluent builder for the
    /// [`AcceptPart`](crate::operation::accept_part::AcceptPartFluentBuilder) operation.
    pub fn accept_part(&self) -> AcceptPartFluentBuilder {
        AcceptPartFluentBuilder::new(self.handle.clone())
    }

    /// Assemble the object from accepted parts and record its metadata.
    ///
    /// Constructs a fluent builder for the
    /// [`CompleteUpload`](crate::operation::complete_upload::CompleteUploadFluentBuilder)
    /// operation.
    pub fn complete_upload(&self) -> CompleteUploadFluentBuilder {
        CompleteUploadFluentBuilder::new(self.handle.clone())
    }

    /// Abort a session and release its parts at the provider.
    ///
    /// Constructs a fluent builder for the
    /// [`AbortUpload`](crate::operation::abort_upload::AbortUploadFluentBuilder) operation.
    pub fn abort_upload(&self) -> AbortUploadFluentBuilder {
        AbortUploadFluentBuilder::new(self.handle.clone())
    }

    /// Expire sessions past their expiry time and purge old terminal sessions
    pub async fn reap_expired(&self) -> Result<ReapReport, Error> {
        self.reap_expired_at(SystemTime::now()).await
    }

    /// Like [`reap_expired`](Self::reap_expired) with an explicit notion of "now"
    pub async fn reap_expired_at(&self, now: SystemTime) -> Result<ReapReport, Error> {
        crate::operation::reap::reap(&self.handle, now).await
    }

    /// Snapshot of a session
    pub async fn session(&self, id: &SessionId) -> Result<UploadSession, Error> {
        let handle = crate::operation::session_handle(&self.handle, id).await?;
        let entry = handle.lock().await;
        Ok(entry.session.clone())
    }

    /// Parts accepted so far for a session, ordered by part number
    pub async fn parts(&self, id: &SessionId) -> Result<Vec<PartRecord>, Error> {
        let handle = crate::operation::session_handle(&self.handle, id).await?;
        let entry = handle.lock().await;
        Ok(entry.ledger.accepted().cloned().collect())
    }

    /// How many parts of a session are accepted or still on their way to the provider
    pub async fn part_counts(&self, id: &SessionId) -> Result<PartCounts, Error> {
        let handle = crate::operation::session_handle(&self.handle, id).await?;
        let entry = handle.lock().await;
        Ok(entry.ledger.counts())
    }
}

/// Fluent style builder for [Coordinator]
#[derive(Debug, Default)]
pub struct Builder {
    config: Option<Config>,
    store: Option<Arc<dyn SessionStore>>,
    gateway: Option<Arc<dyn StorageGateway>>,
    recorder: Option<Arc<dyn MetadataRecorder>>,
}

impl Builder {
    /// Coordinator configuration, defaults to [`Config::default`]
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Session store, defaults to an [`InMemorySessionStore`]
    pub fn session_store(mut self, store: impl SessionStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Storage gateway to forward uploads to (required)
    pub fn gateway(mut self, gateway: impl StorageGateway + 'static) -> Self {
        self.gateway = Some(Arc::new(gateway));
        self
    }

    /// Metadata recorder, defaults to an [`InMemoryMetadataRecorder`]
    pub fn metadata_recorder(mut self, recorder: impl MetadataRecorder + 'static) -> Self {
        self.recorder = Some(Arc::new(recorder));
        self
    }

    /// Consumes the builder and constructs a [`Coordinator`]
    pub fn build(self) -> Result<Coordinator, Error> {
        let gateway = self
            .gateway
            .ok_or_else(|| error::invalid_argument("a storage gateway is required"))?;
        let config = self.config.unwrap_or_default();
        let gateway = RetryingGateway::new(gateway, &config);
        let handle = Handle {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemorySessionStore::new())),
            recorder: self
                .recorder
                .unwrap_or_else(|| Arc::new(InMemoryMetadataRecorder::new())),
            gateway,
            metrics: CoordinatorMetrics::new(),
            config,
        };
        Ok(Coordinator {
            handle: Arc::new(handle),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::InMemoryGateway;

    #[test]
    fn test_gateway_is_required() {
        let err = Coordinator::builder().build().unwrap_err();
        assert_eq!("InvalidArgument", err.kind_str());
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let coordinator = Coordinator::builder()
            .gateway(InMemoryGateway::new())
            .build()
            .unwrap();
        let err = coordinator
            .session(&SessionId::new("missing"))
            .await
            .unwrap_err();
        assert_eq!("SessionNotFound", err.kind_str());
    }
}
