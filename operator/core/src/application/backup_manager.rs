// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Backup manager: on-demand snapshots and archive compatibility checks.
//!
//! The manager triggers snapshots through the cluster's backup sidecar
//! service and answers the one question disaster recovery needs: is there an
//! archived snapshot a fresh ensemble at the desired version can restore
//! from? Archive storage itself stays behind the [`BackupArchive`] contract.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::domain::archive::{ArchiveError, BackupArchive};
use crate::domain::spec::DEFAULT_REQUEST_TIMEOUT;
use crate::infrastructure::archive::parse_backup_name;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup request to {url} failed: {reason}")]
    RequestFailed { url: String, reason: String },

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

pub struct BackupManager {
    http: reqwest::Client,
    backup_service_url: String,
    archive: Arc<dyn BackupArchive>,
}

impl BackupManager {
    pub fn new(backup_service_url: impl Into<String>, archive: Arc<dyn BackupArchive>) -> Self {
        Self {
            http: reqwest::Client::new(),
            backup_service_url: backup_service_url.into(),
            archive,
        }
    }

    /// Ask the backup sidecar to snapshot a live member now.
    pub async fn request_backup(&self) -> Result<(), BackupError> {
        let url = format!(
            "{}/v1/backupnow",
            self.backup_service_url.trim_end_matches('/')
        );
        let response = self
            .http
            .get(&url)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| BackupError::RequestFailed {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(BackupError::RequestFailed {
                url,
                reason: format!("unexpected status {}", response.status()),
            });
        }
        Ok(())
    }

    /// Whether the archive holds a snapshot a fresh ensemble at `version`
    /// can restore from.
    pub async fn check_backup_exist(&self, version: &str) -> Result<bool, BackupError> {
        let Some(latest) = self.archive.get_latest().await? else {
            return Ok(false);
        };
        let Some((backup_version, revision)) = parse_backup_name(&latest) else {
            return Ok(false);
        };
        debug!(
            "latest archived snapshot: version {} revision {}",
            backup_version, revision
        );
        Ok(backup_compatible(&backup_version, version))
    }

    /// Delete every archived snapshot for this cluster.
    pub async fn purge_archive(&self) -> Result<(), BackupError> {
        self.archive.purge().await.map_err(Into::into)
    }
}

/// A snapshot restores into a target ensemble of the same major version whose
/// minor version is not older than the snapshot's.
fn backup_compatible(backup_version: &str, target_version: &str) -> bool {
    match (major_minor(backup_version), major_minor(target_version)) {
        (Some((bmaj, bmin)), Some((tmaj, tmin))) => bmaj == tmaj && bmin <= tmin,
        _ => false,
    }
}

fn major_minor(version: &str) -> Option<(u64, u64)> {
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}
