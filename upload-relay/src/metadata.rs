/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Error;
use crate::types::FileMetadata;

mod file;

pub use file::FileMetadataRecorder;

/// Persists metadata of completed uploads.
///
/// Records are written once and never updated. Failures are reported as `PersistenceError`.
#[async_trait]
pub trait MetadataRecorder: Send + Sync + Debug {
    /// Save one record
    async fn save(&self, metadata: &FileMetadata) -> Result<(), Error>;
}

#[async_trait]
impl<T> MetadataRecorder for Arc<T>
where
    T: MetadataRecorder + ?Sized,
{
    async fn save(&self, metadata: &FileMetadata) -> Result<(), Error> {
        (**self).save(metadata).await
    }
}

/// Keeps records in memory
#[derive(Debug, Default)]
pub struct InMemoryMetadataRecorder {
    records: RwLock<Vec<FileMetadata>>,
}

impl InMemoryMetadataRecorder {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// All records saved so far, oldest first
    pub async fn records(&self) -> Vec<FileMetadata> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl MetadataRecorder for InMemoryMetadataRecorder {
    async fn save(&self, metadata: &FileMetadata) -> Result<(), Error> {
        self.records.write().await.push(metadata.clone());
        Ok(())
    }
}
