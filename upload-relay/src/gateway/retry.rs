/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::cmp;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower::retry::budget::{Budget, TpsBudget};
use tower::{service_fn, ServiceBuilder, ServiceExt};
use tracing::Instrument;

use crate::config::{Config, RetryConfig};
use crate::error::{self, Error};
use crate::gateway::{ObjectInfo, StorageGateway};
use crate::types::{PartNumber, PartRecord, SessionId};

/// Request/input type for a single storage provider call
#[derive(Debug, Clone)]
pub(crate) enum GatewayRequest {
    Begin {
        key: String,
        content_type: String,
    },
    UploadPart {
        upload_id: SessionId,
        key: String,
        part_number: PartNumber,
        payload: Bytes,
    },
    Complete {
        upload_id: SessionId,
        key: String,
        parts: Vec<PartRecord>,
    },
    Abort {
        upload_id: SessionId,
        key: String,
    },
    Head {
        key: String,
    },
}

impl GatewayRequest {
    fn operation(&self) -> &'static str {
        match self {
            GatewayRequest::Begin { .. } => "begin",
            GatewayRequest::UploadPart { .. } => "upload-part",
            GatewayRequest::Complete { .. } => "complete",
            GatewayRequest::Abort { .. } => "abort",
            GatewayRequest::Head { .. } => "head",
        }
    }
}

#[derive(Debug)]
pub(crate) enum GatewayResponse {
    UploadId(String),
    ETag(String),
    Location(String),
    Aborted,
    Object(Option<ObjectInfo>),
}

/// A `tower::retry::Policy` implementation for retrying storage provider calls
///
/// Only `GatewayUnavailable` errors are retried, each retry waits for an exponentially growing
/// backoff. A budget shared by all calls stops retry storms when the provider is down.
#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    budget: Arc<TpsBudget>,
    remaining_attempts: u32,
    next_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub(crate) fn new(config: &RetryConfig, budget: Arc<TpsBudget>) -> Self {
        Self {
            budget,
            remaining_attempts: config.max_attempts.saturating_sub(1),
            next_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
        }
    }
}

impl<Req, Res> tower::retry::Policy<Req, Res, Error> for RetryPolicy
where
    Req: Clone,
{
    type Future = tokio::time::Sleep;

    fn retry(&mut self, _req: &mut Req, result: &mut Result<Res, Error>) -> Option<Self::Future> {
        match result {
            Ok(_) => {
                self.budget.deposit();
                None
            }
            Err(err) => {
                if !err.is_retryable() {
                    return None;
                }
                if self.remaining_attempts == 0 || !self.budget.withdraw() {
                    return None;
                }
                self.remaining_attempts -= 1;
                let backoff = self.next_backoff;
                self.next_backoff = cmp::min(self.next_backoff * 2, self.max_backoff);
                tracing::debug!(
                    "retrying storage call in {backoff:?}, {} attempts left: {err}",
                    self.remaining_attempts
                );
                Some(tokio::time::sleep(backoff))
            }
        }
    }

    fn clone_request(&mut self, req: &Req) -> Option<Req> {
        Some(req.clone())
    }
}

/// Wraps a [`StorageGateway`] with bounded retries, a per-attempt deadline and a limit on
/// concurrent provider calls.
///
/// An attempt that times out may still take effect at the provider. A completion that fails
/// after such an attempt is checked against the stored object, and an upload created by a
/// `begin` that answered too late is aborted.
#[derive(Debug)]
pub struct RetryingGateway<G> {
    inner: Arc<G>,
    retry: RetryConfig,
    timeout: Duration,
    complete_timeout: Duration,
    permits: Arc<Semaphore>,
    budget: Arc<TpsBudget>,
}

impl<G> RetryingGateway<G>
where
    G: StorageGateway + 'static,
{
    /// Wrap `inner` using the retry, timeout and concurrency settings of `config`
    pub fn new(inner: G, config: &Config) -> Self {
        Self {
            inner: Arc::new(inner),
            retry: *config.retry(),
            timeout: config.gateway_timeout(),
            complete_timeout: config.complete_timeout(),
            permits: Arc::new(Semaphore::new(config.gateway_permits())),
            budget: Arc::new(TpsBudget::default()),
        }
    }

    /// The wrapped gateway
    pub fn inner(&self) -> &G {
        &self.inner
    }

    async fn send(&self, request: GatewayRequest) -> Result<GatewayResponse, Error> {
        self.send_tracked(request).await.0
    }

    /// Send `request`, also reporting whether a failed attempt left its outcome unknown
    async fn send_tracked(
        &self,
        request: GatewayRequest,
    ) -> (Result<GatewayResponse, Error>, bool) {
        let inner = self.inner.clone();
        let timeout = match request {
            GatewayRequest::Complete { .. } => self.complete_timeout,
            _ => self.timeout,
        };
        let unsettled = Arc::new(AtomicBool::new(false));
        let seen = unsettled.clone();
        let svc = service_fn(move |req: GatewayRequest| {
            let inner = inner.clone();
            let seen = seen.clone();
            async move {
                let result = dispatch(inner, req, timeout).await;
                if matches!(&result, Err(err) if err.is_retryable()) {
                    seen.store(true, Ordering::SeqCst);
                }
                result
            }
        });

        let operation = request.operation();
        let result = ServiceBuilder::new()
            .retry(RetryPolicy::new(&self.retry, self.budget.clone()))
            .layer(GlobalConcurrencyLimitLayer::with_semaphore(
                self.permits.clone(),
            ))
            .service(svc)
            .oneshot(request)
            .instrument(tracing::debug_span!("storage-gateway", operation))
            .await;
        (result, unsettled.load(Ordering::SeqCst))
    }

    /// Settle a failed completion that an earlier attempt may have carried out anyway
    async fn confirm_completed(
        &self,
        upload_id: &SessionId,
        key: &str,
        parts: &[PartRecord],
        err: Error,
    ) -> Result<String, Error> {
        match self.head(key).await {
            Ok(Some(object)) if object.is_assembled_from(parts) => {
                tracing::warn!(
                    "upload {upload_id} of {key} was completed by an attempt whose answer was lost: {err}"
                );
                Ok(object.url)
            }
            Ok(_) => Err(err),
            Err(head_err) => {
                tracing::debug!("could not look up {key} after a failed completion: {head_err}");
                Err(err)
            }
        }
    }
}

/// handler (service fn) for a single attempt
async fn dispatch<G>(
    gateway: Arc<G>,
    request: GatewayRequest,
    timeout: Duration,
) -> Result<GatewayResponse, Error>
where
    G: StorageGateway + 'static,
{
    let operation = request.operation();
    match request {
        GatewayRequest::Begin { key, content_type } => {
            begin_within(gateway, key, content_type, timeout).await
        }
        request => tokio::time::timeout(timeout, call(gateway.as_ref(), request))
            .await
            .map_err(|_| timed_out(operation, timeout))?,
    }
}

async fn call<G>(gateway: &G, request: GatewayRequest) -> Result<GatewayResponse, Error>
where
    G: StorageGateway + ?Sized,
{
    match request {
        GatewayRequest::Begin { key, content_type } => gateway
            .begin(&key, &content_type)
            .await
            .map(GatewayResponse::UploadId),
        GatewayRequest::UploadPart {
            upload_id,
            key,
            part_number,
            payload,
        } => gateway
            .upload_part(&upload_id, &key, part_number, payload)
            .await
            .map(GatewayResponse::ETag),
        GatewayRequest::Complete {
            upload_id,
            key,
            parts,
        } => gateway
            .complete(&upload_id, &key, &parts)
            .await
            .map(GatewayResponse::Location),
        GatewayRequest::Abort { upload_id, key } => gateway
            .abort(&upload_id, &key)
            .await
            .map(|_| GatewayResponse::Aborted),
        GatewayRequest::Head { key } => gateway.head(&key).await.map(GatewayResponse::Object),
    }
}

/// Run `begin` on its own task so an answer arriving after the deadline is still seen
async fn begin_within<G>(
    gateway: Arc<G>,
    key: String,
    content_type: String,
    timeout: Duration,
) -> Result<GatewayResponse, Error>
where
    G: StorageGateway + 'static,
{
    let task_gateway = gateway.clone();
    let task_key = key.clone();
    let mut task = tokio::spawn(
        async move { task_gateway.begin(&task_key, &content_type).await }.in_current_span(),
    );

    match tokio::time::timeout(timeout, &mut task).await {
        Ok(joined) => joined
            .map_err(error::runtime_error)?
            .map(GatewayResponse::UploadId),
        Err(_) => {
            tokio::spawn(abort_late_upload(gateway, key, task).in_current_span());
            Err(timed_out("begin", timeout))
        }
    }
}

/// Abort the upload a timed out `begin` creates, nothing refers to it
async fn abort_late_upload<G>(
    gateway: Arc<G>,
    key: String,
    task: JoinHandle<Result<String, Error>>,
) where
    G: StorageGateway + 'static,
{
    let Ok(Ok(upload_id)) = task.await else {
        return;
    };
    tracing::warn!("aborting upload {upload_id} of {key}, created after its begin timed out");
    if let Err(err) = gateway.abort(&SessionId::new(upload_id), &key).await {
        tracing::warn!("upload of {key} created after its begin timed out may leak: {err}");
    }
}

fn timed_out(operation: &str, timeout: Duration) -> Error {
    error::gateway_unavailable(format!("{operation} timed out after {timeout:?}"))
}

fn unexpected_response(response: GatewayResponse) -> Error {
    error::runtime_error(format!(
        "unexpected storage gateway response {response:?}"
    ))
}

#[async_trait]
impl<G> StorageGateway for RetryingGateway<G>
where
    G: StorageGateway + 'static,
{
    async fn begin(&self, key: &str, content_type: &str) -> Result<String, Error> {
        let request = GatewayRequest::Begin {
            key: key.to_owned(),
            content_type: content_type.to_owned(),
        };
        match self.send(request).await? {
            GatewayResponse::UploadId(upload_id) => Ok(upload_id),
            other => Err(unexpected_response(other)),
        }
    }

    async fn upload_part(
        &self,
        upload_id: &SessionId,
        key: &str,
        part_number: PartNumber,
        payload: Bytes,
    ) -> Result<String, Error> {
        let request = GatewayRequest::UploadPart {
            upload_id: upload_id.clone(),
            key: key.to_owned(),
            part_number,
            payload,
        };
        match self.send(request).await? {
            GatewayResponse::ETag(e_tag) => Ok(e_tag),
            other => Err(unexpected_response(other)),
        }
    }

    async fn complete(
        &self,
        upload_id: &SessionId,
        key: &str,
        parts: &[PartRecord],
    ) -> Result<String, Error> {
        let request = GatewayRequest::Complete {
            upload_id: upload_id.clone(),
            key: key.to_owned(),
            parts: parts.to_vec(),
        };
        match self.send_tracked(request).await {
            (Ok(GatewayResponse::Location(url)), _) => Ok(url),
            (Ok(other), _) => Err(unexpected_response(other)),
            (Err(err), true) => self.confirm_completed(upload_id, key, parts, err).await,
            (Err(err), false) => Err(err),
        }
    }

    async fn abort(&self, upload_id: &SessionId, key: &str) -> Result<(), Error> {
        let request = GatewayRequest::Abort {
            upload_id: upload_id.clone(),
            key: key.to_owned(),
        };
        match self.send(request).await? {
            GatewayResponse::Aborted => Ok(()),
            other => Err(unexpected_response(other)),
        }
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>, Error> {
        let request = GatewayRequest::Head {
            key: key.to_owned(),
        };
        match self.send(request).await? {
            GatewayResponse::Object(object) => Ok(object),
            other => Err(unexpected_response(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::error::ErrorKind;

    /// Answers `begin` from a script, then succeeds.
    #[derive(Debug, Default)]
    struct ScriptedGateway {
        script: Mutex<VecDeque<ErrorKind>>,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl ScriptedGateway {
        fn failing_with(kinds: &[ErrorKind]) -> Self {
            Self {
                script: Mutex::new(kinds.iter().cloned().collect()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl StorageGateway for ScriptedGateway {
        async fn begin(&self, _key: &str, _content_type: &str) -> Result<String, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(kind) => Err(Error::new(kind, "scripted failure")),
                None => Ok("upload-1".to_owned()),
            }
        }

        async fn upload_part(
            &self,
            _upload_id: &SessionId,
            _key: &str,
            part_number: PartNumber,
            _payload: Bytes,
        ) -> Result<String, Error> {
            Ok(format!("etag-{part_number}"))
        }

        async fn complete(
            &self,
            _upload_id: &SessionId,
            key: &str,
            _parts: &[PartRecord],
        ) -> Result<String, Error> {
            Ok(format!("memory://{key}"))
        }

        async fn abort(&self, _upload_id: &SessionId, _key: &str) -> Result<(), Error> {
            Ok(())
        }

        async fn head(&self, _key: &str) -> Result<Option<ObjectInfo>, Error> {
            Ok(None)
        }
    }

    /// The first `begin` answers only after 90 seconds, later ones at once
    #[derive(Debug, Default)]
    struct LateBeginGateway {
        begins: AtomicUsize,
        aborted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StorageGateway for LateBeginGateway {
        async fn begin(&self, _key: &str, _content_type: &str) -> Result<String, Error> {
            let n = self.begins.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 1 {
                tokio::time::sleep(Duration::from_secs(90)).await;
            }
            Ok(format!("upload-{n}"))
        }

        async fn upload_part(
            &self,
            _upload_id: &SessionId,
            _key: &str,
            _part_number: PartNumber,
            _payload: Bytes,
        ) -> Result<String, Error> {
            unimplemented!()
        }

        async fn complete(
            &self,
            _upload_id: &SessionId,
            _key: &str,
            _parts: &[PartRecord],
        ) -> Result<String, Error> {
            unimplemented!()
        }

        async fn abort(&self, upload_id: &SessionId, _key: &str) -> Result<(), Error> {
            self.aborted
                .lock()
                .unwrap()
                .push(upload_id.as_str().to_owned());
            Ok(())
        }

        async fn head(&self, _key: &str) -> Result<Option<ObjectInfo>, Error> {
            unimplemented!()
        }
    }

    /// Assembles the object on the first `complete` unless one is already stored, but answers
    /// too late, then reports the upload as gone
    #[derive(Debug, Default)]
    struct LostCompletionGateway {
        completes: AtomicUsize,
        object: Mutex<Option<ObjectInfo>>,
    }

    #[async_trait]
    impl StorageGateway for LostCompletionGateway {
        async fn begin(&self, _key: &str, _content_type: &str) -> Result<String, Error> {
            unimplemented!()
        }

        async fn upload_part(
            &self,
            _upload_id: &SessionId,
            _key: &str,
            _part_number: PartNumber,
            _payload: Bytes,
        ) -> Result<String, Error> {
            unimplemented!()
        }

        async fn complete(
            &self,
            upload_id: &SessionId,
            key: &str,
            parts: &[PartRecord],
        ) -> Result<String, Error> {
            if self.completes.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(error::gateway_rejected(format!("NoSuchUpload: {upload_id}")));
            }
            self.object.lock().unwrap().get_or_insert_with(|| ObjectInfo {
                url: format!("memory://{key}"),
                size_bytes: parts.iter().map(|part| part.size_bytes).sum(),
                e_tag: format!("\"abc-{}\"", parts.len()),
            });
            tokio::time::sleep(Duration::from_secs(120)).await;
            Ok(format!("memory://{key}"))
        }

        async fn abort(&self, _upload_id: &SessionId, _key: &str) -> Result<(), Error> {
            Ok(())
        }

        async fn head(&self, _key: &str) -> Result<Option<ObjectInfo>, Error> {
            Ok(self.object.lock().unwrap().clone())
        }
    }

    fn parts(sizes: &[u64]) -> Vec<PartRecord> {
        sizes
            .iter()
            .zip(1i64..)
            .map(|(size, n)| PartRecord {
                session_id: SessionId::new("upload-1"),
                part_number: PartNumber::new(n).unwrap(),
                e_tag: format!("etag-{n}"),
                size_bytes: *size,
            })
            .collect()
    }

    fn config() -> Config {
        Config::builder()
            .gateway_timeout(Duration::from_secs(1))
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let gateway = RetryingGateway::new(
            ScriptedGateway::failing_with(&[
                ErrorKind::GatewayUnavailable,
                ErrorKind::GatewayUnavailable,
            ]),
            &config(),
        );
        let upload_id = gateway.begin("a.png", "image/png").await.unwrap();
        assert_eq!("upload-1", upload_id);
        assert_eq!(3, gateway.inner().calls.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let gateway = RetryingGateway::new(
            ScriptedGateway::failing_with(&[
                ErrorKind::GatewayUnavailable,
                ErrorKind::GatewayUnavailable,
                ErrorKind::GatewayUnavailable,
                ErrorKind::GatewayUnavailable,
            ]),
            &config(),
        );
        let err = gateway.begin("a.png", "image/png").await.unwrap_err();
        assert_eq!(&ErrorKind::GatewayUnavailable, err.kind());
        assert_eq!(3, gateway.inner().calls.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_are_not_retried() {
        let gateway = RetryingGateway::new(
            ScriptedGateway::failing_with(&[ErrorKind::GatewayRejected]),
            &config(),
        );
        let err = gateway.begin("a.png", "image/png").await.unwrap_err();
        assert_eq!(&ErrorKind::GatewayRejected, err.kind());
        assert_eq!(1, gateway.inner().calls.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_calls_time_out() {
        let gateway = RetryingGateway::new(
            ScriptedGateway {
                delay: Some(Duration::from_secs(5)),
                ..Default::default()
            },
            &config(),
        );
        let err = gateway.begin("a.png", "image/png").await.unwrap_err();
        assert_eq!(&ErrorKind::GatewayUnavailable, err.kind());
        assert_eq!(3, gateway.inner().calls.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_begun_after_timeout_is_aborted() {
        let gateway = RetryingGateway::new(
            LateBeginGateway::default(),
            &Config::builder()
                .gateway_timeout(Duration::from_secs(60))
                .build(),
        );
        let upload_id = gateway.begin("a.png", "image/png").await.unwrap();
        assert_eq!("upload-2", upload_id);
        assert!(gateway.inner().aborted.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(
            vec!["upload-1".to_owned()],
            *gateway.inner().aborted.lock().unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_settled_by_stored_object() {
        let gateway = RetryingGateway::new(
            LostCompletionGateway::default(),
            &Config::builder()
                .complete_timeout(Duration::from_secs(30))
                .build(),
        );
        let url = gateway
            .complete(&SessionId::new("upload-1"), "a.png", &parts(&[6, 2]))
            .await
            .unwrap();
        assert_eq!("memory://a.png", url);
        assert_eq!(2, gateway.inner().completes.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_not_settled_by_other_object() {
        let gateway = RetryingGateway::new(
            LostCompletionGateway::default(),
            &Config::builder()
                .complete_timeout(Duration::from_secs(30))
                .build(),
        );
        *gateway.inner().object.lock().unwrap() = Some(ObjectInfo {
            url: "memory://a.png".to_owned(),
            size_bytes: 3,
            e_tag: "\"abc\"".to_owned(),
        });

        let err = gateway
            .complete(&SessionId::new("upload-1"), "a.png", &parts(&[6, 2]))
            .await
            .unwrap_err();
        assert_eq!(&ErrorKind::GatewayRejected, err.kind());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_has_its_own_deadline() {
        let gateway = RetryingGateway::new(
            LostCompletionGateway::default(),
            &Config::builder()
                .gateway_timeout(Duration::from_secs(60))
                .build(),
        );
        let url = gateway
            .complete(&SessionId::new("upload-1"), "a.png", &parts(&[1]))
            .await
            .unwrap();
        assert_eq!("memory://a.png", url);
        assert_eq!(1, gateway.inner().completes.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_backoff_grows_exponentially_up_to_cap() {
        let retry = RetryConfig {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_millis(500),
        };
        let mut policy = RetryPolicy::new(&retry, Arc::new(TpsBudget::default()));
        let mut req = ();
        let mut waits = Vec::new();
        for _ in 0..4 {
            let mut result: Result<(), Error> = Err(error::gateway_unavailable("reset"));
            let sleep = tower::retry::Policy::retry(&mut policy, &mut req, &mut result);
            assert!(sleep.is_some());
            waits.push(policy.next_backoff);
        }
        assert_eq!(
            vec![
                Duration::from_millis(400),
                Duration::from_millis(500),
                Duration::from_millis(500),
                Duration::from_millis(500)
            ],
            waits
        );
        let mut result: Result<(), Error> = Err(error::gateway_unavailable("reset"));
        assert!(tower::retry::Policy::retry(&mut policy, &mut req, &mut result).is_none());
    }
}
