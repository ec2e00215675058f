// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Declared desired state of one managed ensemble.
//!
//! The spec is authored by the user and consumed read-only by the reconciler.
//! Validation is structural only; drift between spec and observed state is the
//! reconciler's business, not an error here.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Deadline for establishing an ensemble client connection.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline attached to every ensemble membership RPC.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("cluster size must be a positive odd number, got {0}")]
    InvalidSize(i32),

    #[error("cluster version must not be empty")]
    EmptyVersion,
}

/// Desired state for one cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Desired ensemble size. Must be odd and at least 1.
    pub size: i32,

    /// Desired ensemble image version, e.g. `"3.1.8"`.
    pub version: String,

    /// Backup policy; enables backup-before-recovery and recovery-from-backup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupPolicy>,

    /// Self-hosted mode: members run on the node pool they serve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_hosted: Option<SelfHostedPolicy>,

    /// Transport configuration handed to the ensemble client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,

    /// Pod-level policy, including the persistent-volume preference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<PodPolicy>,
}

impl ClusterSpec {
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.size < 1 || self.size % 2 == 0 {
            return Err(SpecError::InvalidSize(self.size));
        }
        if self.version.trim().is_empty() {
            return Err(SpecError::EmptyVersion);
        }
        Ok(())
    }

    /// Whether each member is bound to a persistent volume.
    pub fn pv_enabled(&self) -> bool {
        self.pod.as_ref().is_some_and(|p| p.pv.is_some())
    }

    pub fn is_secure_client(&self) -> bool {
        self.tls.as_ref().is_some_and(|t| t.secure_client)
    }

    pub fn is_secure_peer(&self) -> bool {
        self.tls.as_ref().is_some_and(|t| t.secure_peer)
    }
}

/// Backup policy for one cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPolicy {
    /// Periodic backup interval, seconds. 0 disables periodic backups;
    /// on-demand backups before disaster recovery still run.
    #[serde(default)]
    pub backup_interval_seconds: u64,

    /// Number of archived backups to retain. 0 keeps everything.
    #[serde(default)]
    pub max_backups: u32,

    /// Purge the archive prefix when the cluster is deleted.
    #[serde(default)]
    pub auto_delete: bool,
}

/// Marker policy switching the add/remove paths to node-aware variants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfHostedPolicy {
    /// Keep the bootstrap seed pod around after the ensemble forms.
    #[serde(default)]
    pub skip_boot_member_removal: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodPolicy {
    /// Spread members across nodes.
    #[serde(default)]
    pub antiaffinity: bool,

    /// Bind each member to a persistent volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pv: Option<PvPolicy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PvPolicy {
    pub volume_size_in_gb: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

/// Transport material for the ensemble client. The client and peer channels
/// are secured independently; each flag switches the matching URL scheme to
/// `https`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    #[serde(default)]
    pub secure_client: bool,

    #[serde(default)]
    pub secure_peer: bool,

    pub client_ca_file: PathBuf,
    pub client_cert_file: PathBuf,
    pub client_key_file: PathBuf,
}
