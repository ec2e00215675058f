// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Backup archive contracts.
//!
//! The archive lives in an object store under a per-cluster prefix. The core
//! consumes these two traits and nothing else about storage: [`ObjectStore`]
//! is the raw keyed-blob capability, [`BackupArchive`] is the prefix-scoped
//! view the backup manager and recovery path work against. Concrete backends
//! are selected at construction time (see `infrastructure::archive`).

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("backup {0:?} not found")]
    NotFound(String),

    #[error("malformed backup key {0:?}")]
    MalformedKey(String),

    #[error("object store error: {0}")]
    Store(String),
}

/// Raw keyed-blob storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `payload` under `key`, overwriting any existing object.
    async fn put(&self, key: &str, payload: Bytes) -> Result<(), ArchiveError>;

    async fn get(&self, key: &str) -> Result<Bytes, ArchiveError>;

    /// Deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> Result<(), ArchiveError>;

    /// All keys under `prefix`, in unspecified order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, ArchiveError>;

    /// Total payload bytes stored under `prefix`.
    async fn total_size(&self, prefix: &str) -> Result<i64, ArchiveError>;
}

/// Prefix-scoped archive of ensemble snapshots.
///
/// Keys are derived from the ensemble version and snapshot revision; ordering
/// and "latest" selection are the archive's business, not the caller's.
#[async_trait]
pub trait BackupArchive: Send + Sync {
    /// Store a snapshot taken at `revision` by an ensemble running `version`.
    /// Returns the archive key.
    async fn save(
        &self,
        version: &str,
        revision: i64,
        payload: Bytes,
    ) -> Result<String, ArchiveError>;

    async fn open(&self, key: &str) -> Result<Bytes, ArchiveError>;

    async fn list(&self) -> Result<Vec<String>, ArchiveError>;

    /// Key of the newest snapshot, `None` when the archive is empty.
    async fn get_latest(&self) -> Result<Option<String>, ArchiveError>;

    /// Delete every snapshot under the prefix.
    async fn purge(&self) -> Result<(), ArchiveError>;

    async fn total_size(&self) -> Result<i64, ArchiveError>;
}
