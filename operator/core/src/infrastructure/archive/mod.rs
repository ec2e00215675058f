// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Backup Archive Infrastructure
//!
//! Prefix-scoped archive client over any [`ObjectStore`], plus the concrete
//! store backends. Key layout is `<namespace>/<cluster>/` followed by
//! `<version>_<revision:016x>_chorus.backup`; ordering is by revision,
//! tie-broken by version, and "latest" is the last key of the sorted list.

pub mod memory;
pub mod opendal;

pub use self::opendal::OpendalStore;
pub use memory::InMemoryStore;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::archive::{ArchiveError, BackupArchive, ObjectStore};

/// Fixed suffix of every archive key.
pub const BACKUP_SUFFIX: &str = "chorus.backup";

/// Object-store prefix holding one cluster's snapshots.
pub fn archive_prefix(namespace: &str, cluster: &str) -> String {
    format!("{}/{}/", namespace, cluster)
}

/// Key (without prefix) for a snapshot taken at `revision` by an ensemble
/// running `version`.
pub fn make_backup_name(version: &str, revision: i64) -> String {
    format!("{}_{:016x}_{}", version, revision, BACKUP_SUFFIX)
}

/// Parse `(version, revision)` back out of a key. Accepts fully-prefixed
/// keys; returns `None` for anything that was not minted by
/// [`make_backup_name`].
pub fn parse_backup_name(key: &str) -> Option<(String, i64)> {
    let name = key.rsplit('/').next()?;
    let mut parts = name.splitn(3, '_');
    let version = parts.next()?;
    let revision = i64::from_str_radix(parts.next()?, 16).ok()?;
    if parts.next()? != BACKUP_SUFFIX || version.is_empty() {
        return None;
    }
    Some((version.to_string(), revision))
}

/// Drop keys that do not parse and sort the rest by revision, then version.
pub fn filter_and_sort_backups(keys: &[String]) -> Vec<String> {
    let mut parsed: Vec<(i64, String, String)> = keys
        .iter()
        .filter_map(|k| parse_backup_name(k).map(|(v, r)| (r, v, k.clone())))
        .collect();
    parsed.sort();
    parsed.into_iter().map(|(_, _, k)| k).collect()
}

/// The newest usable key among `keys`, `None` when there is none.
pub fn get_latest_backup_name(keys: &[String]) -> Option<String> {
    filter_and_sort_backups(keys).pop()
}

/// Archive backend selected at construction time.
pub enum ArchiveBackend {
    /// Any object store opendal can speak to (production).
    Opendal { operator: ::opendal::Operator },

    /// In-process store (development/testing).
    Memory,
}

/// Factory building the store for a configured backend.
pub fn create_object_store(backend: ArchiveBackend) -> Arc<dyn ObjectStore> {
    match backend {
        ArchiveBackend::Opendal { operator } => Arc::new(OpendalStore::new(operator)),
        ArchiveBackend::Memory => Arc::new(InMemoryStore::new()),
    }
}

/// Prefix-scoped [`BackupArchive`] over an [`ObjectStore`].
pub struct ObjectStoreArchive {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectStoreArchive {
    pub fn new(store: Arc<dyn ObjectStore>, namespace: &str, cluster: &str) -> Self {
        Self {
            store,
            prefix: archive_prefix(namespace, cluster),
        }
    }
}

#[async_trait]
impl BackupArchive for ObjectStoreArchive {
    async fn save(
        &self,
        version: &str,
        revision: i64,
        payload: Bytes,
    ) -> Result<String, ArchiveError> {
        let key = format!("{}{}", self.prefix, make_backup_name(version, revision));
        self.store.put(&key, payload).await?;
        Ok(key)
    }

    async fn open(&self, key: &str) -> Result<Bytes, ArchiveError> {
        self.store.get(key).await
    }

    async fn list(&self) -> Result<Vec<String>, ArchiveError> {
        self.store.list(&self.prefix).await
    }

    async fn get_latest(&self) -> Result<Option<String>, ArchiveError> {
        let keys = self.list().await?;
        Ok(get_latest_backup_name(&keys))
    }

    async fn purge(&self) -> Result<(), ArchiveError> {
        for key in self.list().await? {
            self.store.delete(&key).await?;
        }
        Ok(())
    }

    async fn total_size(&self) -> Result<i64, ArchiveError> {
        self.store.total_size(&self.prefix).await
    }
}
