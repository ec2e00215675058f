// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Opendal Object Store Adapter
//!
//! Bridges the [`ObjectStore`] capability onto an [`opendal::Operator`], so
//! the archive can sit on any service opendal speaks (S3-compatible stores,
//! Swift, GCS, local fs for development). The operator is built and
//! credentialed by the surrounding binary; this adapter only translates calls
//! and error kinds.

use async_trait::async_trait;
use bytes::Bytes;
use opendal::{ErrorKind, Operator};

use crate::domain::archive::{ArchiveError, ObjectStore};

pub struct OpendalStore {
    op: Operator,
}

impl OpendalStore {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    fn store_error(e: opendal::Error) -> ArchiveError {
        ArchiveError::Store(e.to_string())
    }
}

#[async_trait]
impl ObjectStore for OpendalStore {
    async fn put(&self, key: &str, payload: Bytes) -> Result<(), ArchiveError> {
        self.op
            .write(key, payload)
            .await
            .map(|_| ())
            .map_err(Self::store_error)
    }

    async fn get(&self, key: &str) -> Result<Bytes, ArchiveError> {
        match self.op.read(key).await {
            Ok(buffer) => Ok(buffer.to_bytes()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ArchiveError::NotFound(key.to_string()))
            }
            Err(e) => Err(Self::store_error(e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), ArchiveError> {
        match self.op.delete(key).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::store_error(e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ArchiveError> {
        let entries = self.op.list(prefix).await.map_err(Self::store_error)?;
        Ok(entries
            .into_iter()
            .map(|e| e.path().to_string())
            .filter(|p| !p.ends_with('/'))
            .collect())
    }

    async fn total_size(&self, prefix: &str) -> Result<i64, ArchiveError> {
        let mut total = 0i64;
        for key in self.list(prefix).await? {
            let meta = self.op.stat(&key).await.map_err(Self::store_error)?;
            total += meta.content_length() as i64;
        }
        Ok(total)
    }
}
