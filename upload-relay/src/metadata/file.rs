/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::error::Error;
use crate::metadata::MetadataRecorder;
use crate::types::FileMetadata;

/// Appends records as JSON lines to a file.
///
/// Writes are serialized so that concurrent completions never interleave lines.
#[derive(Debug)]
pub struct FileMetadataRecorder {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileMetadataRecorder {
    /// Record into `path`, creating the file and its parent directories as needed
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the JSON lines file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every record in the file
    pub async fn read_all(&self) -> Result<Vec<FileMetadata>, Error> {
        let file = fs::File::open(&self.path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut records = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl MetadataRecorder for FileMetadataRecorder {
    async fn save(&self, metadata: &FileMetadata) -> Result<(), Error> {
        let mut line = serde_json::to_vec(metadata)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        tracing::debug!(name = %metadata.name, path = %self.path.display(), "metadata recorded");
        Ok(())
    }
}
