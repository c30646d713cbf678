/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::retry::RetryConfig as SdkRetryConfig;
use aws_sdk_s3::config::Region;
use aws_smithy_mocks_experimental::{mock_client, MockResponseInterceptor, Rule, RuleMode};
use aws_smithy_runtime::client::http::test_util::infallible_client_fn;
use bytes::Bytes;
use tokio::sync::Notify;
use upload_relay::config::RetryConfig;
use upload_relay::error::{Error, ErrorKind};
use upload_relay::gateway::{InMemoryGateway, ObjectInfo, S3Gateway, StorageGateway};
use upload_relay::metadata::{InMemoryMetadataRecorder, MetadataRecorder};
use upload_relay::types::{FileMetadata, PartNumber, PartRecord, SessionId};
use upload_relay::{Config, Coordinator};

pub const MIB: usize = 1024 * 1024;

/// Coordinator over in-memory backends, with handles to inspect them
#[derive(Debug)]
pub struct Fixture {
    pub coordinator: Coordinator,
    pub gateway: Arc<InMemoryGateway>,
    pub recorder: Arc<InMemoryMetadataRecorder>,
}

/// Config with fast retries, suited to tests that inject provider failures
pub fn fast_retry_config() -> upload_relay::config::Builder {
    Config::builder().retry(RetryConfig {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
    })
}

/// Build a coordinator over a fresh in-memory provider and recorder
pub fn fixture(config: Config) -> Fixture {
    let gateway = Arc::new(InMemoryGateway::new());
    let recorder = Arc::new(InMemoryMetadataRecorder::new());
    let coordinator = Coordinator::builder()
        .config(config)
        .gateway(gateway.clone())
        .metadata_recorder(recorder.clone())
        .build()
        .unwrap();
    Fixture {
        coordinator,
        gateway,
        recorder,
    }
}

/// `len` bytes of random content
pub fn random_payload(len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    fastrand::fill(&mut data);
    Bytes::from(data)
}

/// Start a session for `key` and return its ID
pub async fn start(coordinator: &Coordinator, key: &str) -> SessionId {
    coordinator
        .start_upload()
        .key(key)
        .content_type("application/octet-stream")
        .send()
        .await
        .unwrap()
}

/// Wraps a gateway and fails chosen operations a set number of times
#[derive(Debug)]
pub struct FlakyGateway<G> {
    inner: G,
    failures: Mutex<HashMap<&'static str, (usize, ErrorKind)>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl<G: StorageGateway> FlakyGateway<G> {
    pub fn new(inner: G) -> Self {
        Self {
            inner,
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Fail the next `times` calls of `operation` with `kind`.
    ///
    /// `operation` is one of `begin`, `upload_part`, `complete`, `abort`, `head`.
    pub fn fail(self, operation: &'static str, times: usize, kind: ErrorKind) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(operation, (times, kind));
        self
    }

    /// Number of calls made to `operation`, failed ones included
    pub fn calls(&self, operation: &'static str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(operation)
            .copied()
            .unwrap_or_default()
    }

    fn inject(&self, operation: &'static str) -> Result<(), Error> {
        *self.calls.lock().unwrap().entry(operation).or_default() += 1;
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(operation) {
            Some((remaining, kind)) if *remaining > 0 => {
                *remaining -= 1;
                Err(Error::new(
                    kind.clone(),
                    format!("injected {operation} failure"),
                ))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<G: StorageGateway> StorageGateway for FlakyGateway<G> {
    async fn begin(&self, key: &str, content_type: &str) -> Result<String, Error> {
        self.inject("begin")?;
        self.inner.begin(key, content_type).await
    }

    async fn upload_part(
        &self,
        upload_id: &SessionId,
        key: &str,
        part_number: PartNumber,
        payload: Bytes,
    ) -> Result<String, Error> {
        self.inject("upload_part")?;
        self.inner
            .upload_part(upload_id, key, part_number, payload)
            .await
    }

    async fn complete(
        &self,
        upload_id: &SessionId,
        key: &str,
        parts: &[PartRecord],
    ) -> Result<String, Error> {
        self.inject("complete")?;
        self.inner.complete(upload_id, key, parts).await
    }

    async fn abort(&self, upload_id: &SessionId, key: &str) -> Result<(), Error> {
        self.inject("abort")?;
        self.inner.abort(upload_id, key).await
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>, Error> {
        self.inject("head")?;
        self.inner.head(key).await
    }
}

/// Wraps a gateway and holds or slows down chosen operations
#[derive(Debug)]
pub struct GatedGateway<G> {
    inner: G,
    held: HashSet<&'static str>,
    delays: Mutex<HashMap<&'static str, Duration>>,
    arrived: Notify,
    released: Notify,
}

impl<G: StorageGateway> GatedGateway<G> {
    pub fn new(inner: G) -> Self {
        Self {
            inner,
            held: HashSet::new(),
            delays: Mutex::new(HashMap::new()),
            arrived: Notify::new(),
            released: Notify::new(),
        }
    }

    /// Hold every call of `operation` until [`release`](Self::release), before it reaches
    /// the wrapped gateway
    pub fn hold(mut self, operation: &'static str) -> Self {
        self.held.insert(operation);
        self
    }

    /// Answer the next call of `operation` only `delay` after the wrapped gateway served it
    pub fn delay_answer(self, operation: &'static str, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(operation, delay);
        self
    }

    /// Wait until a held call arrives
    pub async fn arrived(&self) {
        self.arrived.notified().await
    }

    /// Let one held call through
    pub fn release(&self) {
        self.released.notify_one()
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    async fn enter(&self, operation: &'static str) {
        if self.held.contains(operation) {
            self.arrived.notify_one();
            self.released.notified().await;
        }
    }

    async fn leave(&self, operation: &'static str) {
        let delay = self.delays.lock().unwrap().remove(operation);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl<G: StorageGateway> StorageGateway for GatedGateway<G> {
    async fn begin(&self, key: &str, content_type: &str) -> Result<String, Error> {
        self.enter("begin").await;
        let result = self.inner.begin(key, content_type).await;
        self.leave("begin").await;
        result
    }

    async fn upload_part(
        &self,
        upload_id: &SessionId,
        key: &str,
        part_number: PartNumber,
        payload: Bytes,
    ) -> Result<String, Error> {
        self.enter("upload_part").await;
        let result = self
            .inner
            .upload_part(upload_id, key, part_number, payload)
            .await;
        self.leave("upload_part").await;
        result
    }

    async fn complete(
        &self,
        upload_id: &SessionId,
        key: &str,
        parts: &[PartRecord],
    ) -> Result<String, Error> {
        self.enter("complete").await;
        let result = self.inner.complete(upload_id, key, parts).await;
        self.leave("complete").await;
        result
    }

    async fn abort(&self, upload_id: &SessionId, key: &str) -> Result<(), Error> {
        self.enter("abort").await;
        let result = self.inner.abort(upload_id, key).await;
        self.leave("abort").await;
        result
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>, Error> {
        self.enter("head").await;
        let result = self.inner.head(key).await;
        self.leave("head").await;
        result
    }
}

/// Coordinator over a gated in-memory provider
pub fn gated_fixture(
    config: Config,
    gate: impl FnOnce(GatedGateway<InMemoryGateway>) -> GatedGateway<InMemoryGateway>,
) -> (Coordinator, Arc<GatedGateway<InMemoryGateway>>, Arc<InMemoryMetadataRecorder>) {
    let gateway = Arc::new(gate(GatedGateway::new(InMemoryGateway::new())));
    let recorder = Arc::new(InMemoryMetadataRecorder::new());
    let coordinator = Coordinator::builder()
        .config(config)
        .gateway(gateway.clone())
        .metadata_recorder(recorder.clone())
        .build()
        .unwrap();
    (coordinator, gateway, recorder)
}

/// A metadata store that is always down
#[derive(Debug, Default)]
pub struct FailingMetadataRecorder;

#[async_trait]
impl MetadataRecorder for FailingMetadataRecorder {
    async fn save(&self, _metadata: &FileMetadata) -> Result<(), Error> {
        Err(Error::new(
            ErrorKind::PersistenceError,
            "metadata store unreachable",
        ))
    }
}

/// S3 gateway over a mocked client answering with `rules`
pub fn mock_s3_gateway(bucket: &str, mode: RuleMode, rules: &[&Rule]) -> S3Gateway {
    let client = mock_client!(aws_sdk_s3, mode, rules);
    S3Gateway::new(client, bucket)
}

/// S3 client whose rules may answer with raw HTTP responses.
///
/// Requests go to a stub HTTP client first, so `then_http_response` rules take effect. The
/// SDK's own retries are off, leaving retries to the gateway wrapper.
pub fn mock_client_with_stubbed_http_client(mode: RuleMode, rules: &[&Rule]) -> aws_sdk_s3::Client {
    let mut interceptor = MockResponseInterceptor::new().rule_mode(mode);
    for rule in rules {
        interceptor = interceptor.with_rule(rule);
    }
    let config = aws_sdk_s3::Config::builder()
        .with_test_defaults()
        .region(Region::from_static("us-east-1"))
        .retry_config(SdkRetryConfig::disabled())
        .http_client(infallible_client_fn(|_req| {
            http_02x::Response::builder().status(200).body("").unwrap()
        }))
        .interceptor(interceptor)
        .build();
    aws_sdk_s3::Client::from_conf(config)
}

/// A temporary directory holding a path for a JSON-lines metadata file
pub fn metadata_file() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metadata").join("files.jsonl");
    (dir, path)
}
