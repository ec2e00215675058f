// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-Memory Object Store
//!
//! Process-local implementation of [`ObjectStore`] for single-node
//! development and testing. Everything lives in one map behind a lock and is
//! gone when the process exits; not suitable for any deployment that needs a
//! backup to survive.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::archive::{ArchiveError, ObjectStore};

/// In-process keyed-blob store.
#[derive(Default)]
pub struct InMemoryStore {
    objects: Arc<RwLock<BTreeMap<String, Bytes>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Bytes>> {
        self.objects.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Bytes>> {
        self.objects.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn put(&self, key: &str, payload: Bytes) -> Result<(), ArchiveError> {
        self.write().insert(key.to_string(), payload);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, ArchiveError> {
        self.read()
            .get(key)
            .cloned()
            .ok_or_else(|| ArchiveError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), ArchiveError> {
        self.write().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ArchiveError> {
        Ok(self
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn total_size(&self, prefix: &str) -> Result<i64, ArchiveError> {
        Ok(self
            .read()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(_, v)| v.len() as i64)
            .sum())
    }
}
