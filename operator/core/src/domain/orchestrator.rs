// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Storage Orchestrator capability - the reconciler's side-effect surface.
//!
//! The reconciler never talks to the orchestrator substrate or the quorum
//! protocol directly; every mutation goes through this trait. Implementations
//! live outside the core (substrate API adapters in the operator binary,
//! recording mocks in tests), which keeps the control loop a pure function of
//! observed state plus an action log.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::member::{Member, MemberSet};
use crate::domain::spec::TlsConfig;
use crate::domain::volume::Volume;

/// How the ensemble process inside a new pod joins its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartPhase {
    /// First member of a fresh, empty ensemble.
    Seed,
    /// Joins an ensemble that already has quorum.
    Existing,
    /// First member of a fresh ensemble restored from an archived snapshot.
    Recover,
}

impl std::fmt::Display for StartPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartPhase::Seed => write!(f, "seed"),
            StartPhase::Existing => write!(f, "existing"),
            StartPhase::Recover => write!(f, "recover"),
        }
    }
}

/// Observability events emitted on membership changes. Best effort only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterEventKind {
    MemberAdd,
    MemberRemove,
    ReplacingDeadMember,
    Recovering,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The ensemble does not know the member. Remove paths treat this as
    /// success (the work is already done).
    #[error("ensemble member {0} not found")]
    MemberNotFound(u64),

    #[error("failed to dial ensemble: {0}")]
    Dial(String),

    #[error("ensemble rpc failed: {0}")]
    Rpc(String),

    #[error("rpc deadline exceeded")]
    Timeout,

    #[error("orchestrator api error: {0}")]
    Api(String),
}

/// Side-effect surface consumed by the reconciler.
///
/// All pod and claim operations are idempotent: creating a name that already
/// exists and removing a name that does not are non-fatal. Membership RPCs
/// carry an explicit deadline; implementations must dial with
/// [`DEFAULT_DIAL_TIMEOUT`](crate::domain::spec::DEFAULT_DIAL_TIMEOUT) before
/// mutating, so a dial failure aborts before any ensemble change.
#[async_trait]
pub trait StorageOrchestrator: Send + Sync {
    /// Provision the runtime unit for `member`, bound to `volume` when
    /// persistent volumes are enabled. `peers` is the full membership the new
    /// process must announce.
    async fn create_pod(
        &self,
        peers: &MemberSet,
        member: &Member,
        phase: StartPhase,
        self_hosted: bool,
        volume: Option<&Volume>,
    ) -> Result<(), OrchestratorError>;

    async fn remove_pod(&self, name: &str) -> Result<(), OrchestratorError>;

    /// Provision the storage claim backing `volume`.
    async fn create_claim(&self, volume: &Volume) -> Result<(), OrchestratorError>;

    /// Destroy the underlying storage claim.
    async fn remove_claim(&self, claim_name: &str) -> Result<(), OrchestratorError>;

    /// Ask the ensemble to admit a member at `peer_url`; returns the
    /// ensemble-assigned ID.
    async fn member_add(
        &self,
        endpoints: &[String],
        tls: Option<&TlsConfig>,
        peer_url: &str,
        timeout: Duration,
    ) -> Result<u64, OrchestratorError>;

    async fn member_remove(
        &self,
        endpoints: &[String],
        tls: Option<&TlsConfig>,
        id: u64,
        timeout: Duration,
    ) -> Result<(), OrchestratorError>;

    /// Best-effort observability; the reconciler logs failures and moves on.
    async fn emit_event(
        &self,
        kind: ClusterEventKind,
        member: &Member,
    ) -> Result<(), OrchestratorError>;

    /// Nodes eligible to host a self-hosted member.
    async fn schedulable_nodes(&self) -> Result<Vec<Node>, OrchestratorError>;
}
