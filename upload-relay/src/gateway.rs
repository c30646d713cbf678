/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Storage gateway adapters.
//!
//! A [`StorageGateway`] wraps the four multipart upload operations of an object storage
//! provider, plus an object lookup used to settle completions whose outcome was lost. Implementations report failures as `GatewayUnavailable` when the call may succeed
//! if repeated and `GatewayRejected` otherwise; [`RetryingGateway`] relies on that split.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Error;
use crate::types::{PartNumber, PartRecord, SessionId};

pub(crate) mod in_memory;
pub(crate) mod retry;
pub(crate) mod s3;

pub use in_memory::{GatewayCalls, InMemoryGateway, StoredObject};
pub use retry::RetryingGateway;
pub use s3::S3Gateway;

/// What the provider reports about an assembled object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// URL of the object
    pub url: String,
    /// Object size in bytes
    pub size_bytes: u64,
    /// Object ETag, `"<digest>-<part count>"` for multipart objects
    pub e_tag: String,
}

impl ObjectInfo {
    /// Whether this object looks like the one assembling `parts` produces
    pub fn is_assembled_from(&self, parts: &[PartRecord]) -> bool {
        let size_bytes: u64 = parts.iter().map(|part| part.size_bytes).sum();
        let suffix = format!("-{}", parts.len());
        self.size_bytes == size_bytes && self.e_tag.trim_matches('"').ends_with(&suffix)
    }
}

/// Capability interface over an object storage provider's multipart upload API.
#[async_trait]
pub trait StorageGateway: Send + Sync + Debug {
    /// Create a multipart upload for `key`, returning the provider's upload ID.
    async fn begin(&self, key: &str, content_type: &str) -> Result<String, Error>;

    /// Upload one part, returning the provider's ETag for it.
    async fn upload_part(
        &self,
        upload_id: &SessionId,
        key: &str,
        part_number: PartNumber,
        payload: Bytes,
    ) -> Result<String, Error>;

    /// Assemble the object from `parts`, which are ordered by ascending part number.
    ///
    /// Returns the URL of the assembled object.
    async fn complete(
        &self,
        upload_id: &SessionId,
        key: &str,
        parts: &[PartRecord],
    ) -> Result<String, Error>;

    /// Abort the upload and release the parts stored by the provider.
    ///
    /// Aborting an upload the provider no longer knows about succeeds.
    async fn abort(&self, upload_id: &SessionId, key: &str) -> Result<(), Error>;

    /// Look up the object stored under `key`, `None` when there is none.
    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>, Error>;
}

#[async_trait]
impl<T> StorageGateway for Arc<T>
where
    T: StorageGateway + ?Sized,
{
    async fn begin(&self, key: &str, content_type: &str) -> Result<String, Error> {
        (**self).begin(key, content_type).await
    }

    async fn upload_part(
        &self,
        upload_id: &SessionId,
        key: &str,
        part_number: PartNumber,
        payload: Bytes,
    ) -> Result<String, Error> {
        (**self).upload_part(upload_id, key, part_number, payload).await
    }

    async fn complete(
        &self,
        upload_id: &SessionId,
        key: &str,
        parts: &[PartRecord],
    ) -> Result<String, Error> {
        (**self).complete(upload_id, key, parts).await
    }

    async fn abort(&self, upload_id: &SessionId, key: &str) -> Result<(), Error> {
        (**self).abort(upload_id, key).await
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>, Error> {
        (**self).head(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(n: i64, size_bytes: u64) -> PartRecord {
        PartRecord {
            session_id: SessionId::new("upload-1"),
            part_number: PartNumber::new(n).unwrap(),
            e_tag: format!("\"etag-{n}\""),
            size_bytes,
        }
    }

    fn object(size_bytes: u64, e_tag: &str) -> ObjectInfo {
        ObjectInfo {
            url: "memory://uploads/a.png".to_owned(),
            size_bytes,
            e_tag: e_tag.to_owned(),
        }
    }

    #[test]
    fn test_object_matches_parts_by_size_and_count() {
        let parts = [part(1, 6), part(2, 2)];
        assert!(object(8, "\"3858f62230ac3c91-2\"").is_assembled_from(&parts));
        assert!(!object(8, "\"3858f62230ac3c91-3\"").is_assembled_from(&parts));
        assert!(!object(7, "\"3858f62230ac3c91-2\"").is_assembled_from(&parts));
        assert!(!object(8, "\"3858f62230ac3c91\"").is_assembled_from(&parts));
    }
}
