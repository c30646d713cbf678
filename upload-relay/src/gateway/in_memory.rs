/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::RwLock;

use crate::error::{self, Error};
use crate::gateway::{ObjectInfo, StorageGateway};
use crate::types::{PartNumber, PartRecord, SessionId};

const DEFAULT_BASE_URL: &str = "memory://uploads";

#[derive(Debug)]
struct PendingUpload {
    key: String,
    content_type: String,
    parts: BTreeMap<PartNumber, (String, Bytes)>,
}

/// An assembled object held by [`InMemoryGateway`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Content type given when the upload began
    pub content_type: String,
    /// Concatenated part payloads
    pub data: Bytes,
    /// Multipart ETag, `"<digest>-<part count>"`
    pub e_tag: String,
}

/// Number of calls an [`InMemoryGateway`] has served per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayCalls {
    /// `begin` calls
    pub begin: usize,
    /// `upload_part` calls
    pub upload_part: usize,
    /// `complete` calls
    pub complete: usize,
    /// `abort` calls
    pub abort: usize,
}

#[derive(Debug, Default)]
struct CallCounters {
    begin: AtomicUsize,
    upload_part: AtomicUsize,
    complete: AtomicUsize,
    abort: AtomicUsize,
}

/// [`StorageGateway`] keeping multipart uploads in process memory.
///
/// Behaves like S3 where it matters to callers: parts are addressed by number, completion
/// checks ETags and aborting an unknown upload succeeds.
#[derive(Debug)]
pub struct InMemoryGateway {
    base_url: String,
    uploads: RwLock<HashMap<String, PendingUpload>>,
    objects: RwLock<HashMap<String, StoredObject>>,
    calls: CallCounters,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGateway {
    /// Create an empty gateway with URLs under `memory://uploads`
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Create an empty gateway reporting object URLs under `base_url`
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            uploads: RwLock::new(HashMap::new()),
            objects: RwLock::new(HashMap::new()),
            calls: CallCounters::default(),
        }
    }

    /// The assembled object stored under `key`, if any
    pub async fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().await.get(key).cloned()
    }

    /// Whether the provider still holds an open upload with this ID
    pub async fn has_pending_upload(&self, upload_id: &str) -> bool {
        self.uploads.read().await.contains_key(upload_id)
    }

    /// Snapshot of how many calls each operation has served
    pub fn calls(&self) -> GatewayCalls {
        GatewayCalls {
            begin: self.calls.begin.load(Ordering::SeqCst),
            upload_part: self.calls.upload_part.load(Ordering::SeqCst),
            complete: self.calls.complete.load(Ordering::SeqCst),
            abort: self.calls.abort.load(Ordering::SeqCst),
        }
    }
}

fn digest(payload: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    payload.hash(&mut hasher);
    hasher.finish()
}

fn e_tag_for(payload: &[u8]) -> String {
    format!("\"{:016x}\"", digest(payload))
}

#[async_trait]
impl StorageGateway for InMemoryGateway {
    async fn begin(&self, key: &str, content_type: &str) -> Result<String, Error> {
        self.calls.begin.fetch_add(1, Ordering::SeqCst);
        let upload_id = uuid::Uuid::new_v4().simple().to_string();
        let upload = PendingUpload {
            key: key.to_owned(),
            content_type: content_type.to_owned(),
            parts: BTreeMap::new(),
        };
        self.uploads.write().await.insert(upload_id.clone(), upload);
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        upload_id: &SessionId,
        key: &str,
        part_number: PartNumber,
        payload: Bytes,
    ) -> Result<String, Error> {
        self.calls.upload_part.fetch_add(1, Ordering::SeqCst);
        let mut uploads = self.uploads.write().await;
        let upload = uploads
            .get_mut(upload_id.as_str())
            .filter(|upload| upload.key == key)
            .ok_or_else(|| error::gateway_rejected(format!("NoSuchUpload: {upload_id}")))?;

        let e_tag = e_tag_for(&payload);
        upload.parts.insert(part_number, (e_tag.clone(), payload));
        Ok(e_tag)
    }

    async fn complete(
        &self,
        upload_id: &SessionId,
        key: &str,
        parts: &[PartRecord],
    ) -> Result<String, Error> {
        self.calls.complete.fetch_add(1, Ordering::SeqCst);
        let mut uploads = self.uploads.write().await;
        let upload = uploads
            .get(upload_id.as_str())
            .filter(|upload| upload.key == key)
            .ok_or_else(|| error::gateway_rejected(format!("NoSuchUpload: {upload_id}")))?;

        let mut data = BytesMut::new();
        for part in parts {
            match upload.parts.get(&part.part_number) {
                Some((e_tag, payload)) if *e_tag == part.e_tag => data.extend_from_slice(payload),
                _ => {
                    return Err(error::gateway_rejected(format!(
                        "InvalidPart: part {} of upload {upload_id}",
                        part.part_number
                    )))
                }
            }
        }

        let content_type = upload.content_type.clone();
        uploads.remove(upload_id.as_str());
        drop(uploads);

        let object = StoredObject {
            content_type,
            e_tag: format!("\"{:016x}-{}\"", digest(&data), parts.len()),
            data: data.freeze(),
        };
        self.objects.write().await.insert(key.to_owned(), object);
        Ok(format!("{}/{}", self.base_url, key))
    }

    async fn abort(&self, upload_id: &SessionId, _key: &str) -> Result<(), Error> {
        self.calls.abort.fetch_add(1, Ordering::SeqCst);
        self.uploads.write().await.remove(upload_id.as_str());
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>, Error> {
        let objects = self.objects.read().await;
        Ok(objects.get(key).map(|object| ObjectInfo {
            url: format!("{}/{}", self.base_url, key),
            size_bytes: object.data.len() as u64,
            e_tag: object.e_tag.clone(),
        }))
    }
}
