// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! The reconciliation loop.
//!
//! One [`ClusterReconciler`] instance is the single authority for one managed
//! ensemble. Each tick is a total function from (observed pods and claims,
//! internal state, declared spec) to at most one corrective action issued
//! through the [`StorageOrchestrator`] capability. Three state spaces
//! (runtime pods, consensus membership, persistent volumes) mutate
//! independently underneath it, and the loop couples them under one rule:
//! never destroy the majority in a single step.
//!
//! Ordering inside a tick is load-bearing. A membership RPC always precedes
//! the pod it admits; internal-state mutations that depend on a remote
//! action's success happen only after that action succeeds; and the loop
//! never combines an add and a remove in one tick, because the quorum
//! protocol's reconfiguration safety only holds for single-member changes.
//! Idempotent re-observation on the next tick replaces retry logic.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::application::backup_manager::{BackupError, BackupManager};
use crate::application::observation::{self, Observation};
use crate::domain::member::{Member, MemberSet};
use crate::domain::naming;
use crate::domain::orchestrator::{
    ClusterEventKind, OrchestratorError, StartPhase, StorageOrchestrator,
};
use crate::domain::spec::{ClusterSpec, SpecError, DEFAULT_REQUEST_TIMEOUT};
use crate::domain::status::{ClusterConditionKind, ClusterStatus};
use crate::domain::volume::{Volume, VolumeSet};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid cluster spec: {0}")]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error("self-hosted cluster cannot be recovered from disaster")]
    SelfHostedRecovery,

    #[error("reconciler state corrupted: {0}")]
    Internal(String),
}

impl ReconcileError {
    /// Permanent errors are configuration facts; re-running the tick cannot
    /// fix them and the driver should stop retrying.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Spec(_) | Self::SelfHostedRecovery)
    }
}

/// Control loop for one managed ensemble.
pub struct ClusterReconciler {
    name: String,
    namespace: String,
    spec: ClusterSpec,
    members: MemberSet,
    volumes: VolumeSet,
    counter: u32,
    status: ClusterStatus,
    orchestrator: Arc<dyn StorageOrchestrator>,
    backup_manager: Option<BackupManager>,
    request_timeout: Duration,
}

impl ClusterReconciler {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        spec: ClusterSpec,
        orchestrator: Arc<dyn StorageOrchestrator>,
    ) -> Result<Self, ReconcileError> {
        spec.validate()?;
        Ok(Self {
            name: name.into(),
            namespace: namespace.into(),
            spec,
            members: MemberSet::new(),
            volumes: VolumeSet::new(),
            counter: 0,
            status: ClusterStatus::new(),
            orchestrator,
            backup_manager: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Attach the backup collaborator; required for backup-before-recovery
    /// and recovery-from-backup when the spec carries a backup policy.
    pub fn with_backup_manager(mut self, backup_manager: BackupManager) -> Self {
        self.backup_manager = Some(backup_manager);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn members(&self) -> &MemberSet {
        &self.members
    }

    pub fn volumes(&self) -> &VolumeSet {
        &self.volumes
    }

    pub fn status(&self) -> &ClusterStatus {
        &self.status
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Run one tick against the observed pods and storage claims.
    pub async fn reconcile(
        &mut self,
        pods: &[Pod],
        claims: &[PersistentVolumeClaim],
    ) -> Result<(), ReconcileError> {
        info!("start reconciling cluster {}", self.name);

        let observed = observation::observe(&self.name, &self.spec, pods, claims);
        if observed.next_counter > self.counter {
            self.counter = observed.next_counter;
        }
        if self.members.is_empty() && !observed.running.is_empty() {
            info!(
                "adopting running members into an empty membership record: {}",
                observed.running
            );
            self.members = observed.running.clone();
        }
        self.refresh_volumes(&observed);

        let result = self.reconcile_inner(&observed.running, pods).await;

        self.status.size = self.members.len();
        info!("finish reconciling cluster {}", self.name);
        result
    }

    /// Purge the archive when the declared cluster is deleted and the backup
    /// policy asks for it.
    pub async fn teardown(&self) -> Result<(), ReconcileError> {
        let auto_delete = self.spec.backup.as_ref().is_some_and(|b| b.auto_delete);
        if let (true, Some(bm)) = (auto_delete, self.backup_manager.as_ref()) {
            info!("purging backup archive for cluster {}", self.name);
            bm.purge_archive().await?;
        }
        Ok(())
    }

    async fn reconcile_inner(
        &mut self,
        running: &MemberSet,
        pods: &[Pod],
    ) -> Result<(), ReconcileError> {
        if !running.is_equal(&self.members) || self.members.len() as i32 != self.spec.size {
            return self.reconcile_members(running).await;
        }
        self.status.clear_condition(ClusterConditionKind::Scaling);

        if let Some(old) = self.pick_one_old_member(pods) {
            self.status.upgrade_version_to(self.spec.version.clone());
            return self.upgrade_one_member(&old).await;
        }
        self.status.clear_condition(ClusterConditionKind::Upgrading);

        self.status.set_version(self.spec.version.clone());
        self.status.set_ready();
        Ok(())
    }

    /// Reconcile running pods against the membership record and the declared
    /// size. Issues at most one membership-changing action.
    async fn reconcile_members(&mut self, running: &MemberSet) -> Result<(), ReconcileError> {
        info!("running members: {}", running);
        info!("cluster membership: {}", self.members);

        let unknown = running.diff(&self.members);
        for member in unknown.iter() {
            // Untracked pod, probably created by hand. We have no volume
            // ownership record for it, so the pod goes and any claim stays.
            warn!("removing unexpected pod {}", member.name);
            self.orchestrator.remove_pod(&member.name).await?;
        }
        let live = running.diff(&unknown);

        // A self-hosted ensemble seeds through the node-aware add path; the
        // recovery tree below cannot run for it.
        if self.members.is_empty() && self.spec.self_hosted.is_some() {
            return self.resize().await;
        }

        if !live.is_empty() && live.len() == self.members.len() {
            return self.resize().await;
        }
        info!(
            "running size: {}, member size: {}, volume size: {}",
            live.len(),
            self.members.len(),
            self.volumes.len()
        );

        if live.len() < self.members.quorum() {
            // Pod quorum is gone; claims are assumed to survive their pods.
            for name in self.members.diff(&live).names() {
                self.unlink_volume_of(&name);
            }

            if self.volumes.len() < self.members.quorum() {
                for name in self.members.names() {
                    self.unlink_volume_of(&name);
                    self.members.remove(&name);
                }
                warn!("volume quorum not met; going for disaster recovery");
                return self.disaster_recovery(&live).await;
            }

            if live.is_empty() {
                // No pods at all but enough surviving volumes: restart from a
                // seed that reuses the existing data.
                for name in self.members.names() {
                    self.members.remove(&name);
                }
                return self.bootstrap().await;
            }
        }

        info!("removing one dead member");
        let dead = self
            .members
            .diff(&live)
            .pick_one()
            .cloned()
            .ok_or_else(|| {
                ReconcileError::Internal("no dead member to remove".to_string())
            })?;
        self.remove_dead_member(dead).await
    }

    async fn resize(&mut self) -> Result<(), ReconcileError> {
        let size = self.members.len() as i32;
        if size == self.spec.size {
            return Ok(());
        }
        if size < self.spec.size {
            if self.spec.self_hosted.is_some() {
                return self.add_one_self_hosted_member().await;
            }
            return self.add_one_member().await;
        }
        // Scale-down deletes the member's volume with it.
        self.remove_one_member().await
    }

    async fn add_one_member(&mut self) -> Result<(), ReconcileError> {
        self.status
            .set_scaling_up(self.members.len(), self.spec.size as usize);

        let endpoints = self.members.client_urls();
        let mut new_member = self.new_member();
        let id = match self
            .orchestrator
            .member_add(
                &endpoints,
                self.spec.tls.as_ref(),
                &new_member.peer_url(),
                self.request_timeout,
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                // The counter is never rewound; names stay monotonic.
                error!("failed to add new member {}: {}", new_member.name, e);
                return Err(e.into());
            }
        };
        new_member.id = id;
        info!("adding member {} to the ensemble", new_member.name);
        self.members.add(new_member.clone());

        let volume = if self.spec.pv_enabled() {
            let volume = self.prepare_volume().await?;
            self.bind_volume(&new_member.name, &volume.name);
            self.volumes.get(&volume.name).cloned()
        } else {
            None
        };

        let member = self.member_snapshot(&new_member.name)?;
        if let Err(e) = self
            .orchestrator
            .create_pod(
                &self.members,
                &member,
                StartPhase::Existing,
                false,
                volume.as_ref(),
            )
            .await
        {
            // The member stays in the record; the next tick observes the
            // missing pod and heals through the dead-member path.
            error!("failed to create pod for member {}: {}", member.name, e);
            return Err(e.into());
        }
        info!("added member {}", member.name);

        if let Err(e) = self
            .orchestrator
            .emit_event(ClusterEventKind::MemberAdd, &member)
            .await
        {
            error!("failed to emit member add event: {}", e);
        }
        Ok(())
    }

    async fn add_one_self_hosted_member(&mut self) -> Result<(), ReconcileError> {
        self.status
            .set_scaling_up(self.members.len(), self.spec.size as usize);

        let mut new_member = self.new_member();
        if self.members.is_empty() {
            info!("seeding self-hosted ensemble with member {}", new_member.name);
            self.members.add(new_member.clone());
            self.orchestrator
                .create_pod(&self.members, &new_member, StartPhase::Seed, true, None)
                .await?;
        } else {
            let endpoints = self.members.client_urls();
            let id = self
                .orchestrator
                .member_add(
                    &endpoints,
                    self.spec.tls.as_ref(),
                    &new_member.peer_url(),
                    self.request_timeout,
                )
                .await?;
            new_member.id = id;
            info!("adding self-hosted member {} to the ensemble", new_member.name);
            self.members.add(new_member.clone());
            self.orchestrator
                .create_pod(&self.members, &new_member, StartPhase::Existing, true, None)
                .await?;
        }

        if let Err(e) = self
            .orchestrator
            .emit_event(ClusterEventKind::MemberAdd, &new_member)
            .await
        {
            error!("failed to emit member add event: {}", e);
        }
        Ok(())
    }

    async fn remove_one_member(&mut self) -> Result<(), ReconcileError> {
        self.status
            .set_scaling_down(self.members.len(), self.spec.size as usize);

        let member = self.members.pick_one().cloned().ok_or_else(|| {
            ReconcileError::Internal("scale-down with no members".to_string())
        })?;
        self.remove_member(member, true).await
    }

    async fn remove_dead_member(&mut self, to_remove: Member) -> Result<(), ReconcileError> {
        if self.spec.self_hosted.is_some() {
            let nodes = self.orchestrator.schedulable_nodes().await?;
            if (nodes.len() as i32) < self.spec.size {
                // Not enough host nodes to place a replacement. Removing the
                // member now would only shrink us below quorum on a fixed
                // node pool; the data is persisted, so wait for the node.
                warn!(
                    "ignored removing failed member {}: only {} schedulable nodes, want at least {}",
                    to_remove.name,
                    nodes.len(),
                    self.spec.size
                );
                info!("waiting for the failed host node to recover, or more nodes");
                return Ok(());
            }
        }

        info!("removing dead member {}", to_remove.name);
        if let Err(e) = self
            .orchestrator
            .emit_event(ClusterEventKind::ReplacingDeadMember, &to_remove)
            .await
        {
            error!("failed to emit replacing dead member event: {}", e);
        }

        // The volume outlives its dead member and is reused by the
        // replacement.
        self.remove_member(to_remove, false).await
    }

    async fn remove_member(
        &mut self,
        to_remove: Member,
        delete_volume: bool,
    ) -> Result<(), ReconcileError> {
        let endpoints = self.members.client_urls();
        match self
            .orchestrator
            .member_remove(
                &endpoints,
                self.spec.tls.as_ref(),
                to_remove.id,
                self.request_timeout,
            )
            .await
        {
            Ok(()) => {}
            Err(OrchestratorError::MemberNotFound(_)) => {
                info!("ensemble member {} has already been removed", to_remove.name);
            }
            Err(e) => {
                error!("failed to remove ensemble member {}: {}", to_remove.name, e);
                return Err(e.into());
            }
        }

        self.members.remove(&to_remove.name);
        self.orchestrator.remove_pod(&to_remove.name).await?;

        if self.spec.pv_enabled() {
            if let Some(volume_name) = &to_remove.volume {
                if delete_volume {
                    self.volumes.remove(volume_name);
                    self.orchestrator
                        .remove_claim(&naming::claim_name(volume_name))
                        .await?;
                } else if let Some(volume) = self.volumes.get_mut(volume_name) {
                    volume.detach();
                }
            }
        }

        info!(
            "removed member {} with id {}",
            to_remove.name, to_remove.id
        );
        if let Err(e) = self
            .orchestrator
            .emit_event(ClusterEventKind::MemberRemove, &to_remove)
            .await
        {
            error!("failed to emit member remove event: {}", e);
        }
        Ok(())
    }

    /// One member per tick: drop the old pod and let the normal heal path
    /// bring it back at the new version.
    async fn upgrade_one_member(&mut self, name: &str) -> Result<(), ReconcileError> {
        info!("upgrading member {} to {}", name, self.spec.version);
        self.orchestrator.remove_pod(name).await?;
        Ok(())
    }

    async fn disaster_recovery(&mut self, left: &MemberSet) -> Result<(), ReconcileError> {
        self.status.set_recovering();
        for member in left.iter() {
            if let Err(e) = self
                .orchestrator
                .emit_event(ClusterEventKind::Recovering, member)
                .await
            {
                error!("failed to emit recovering event: {}", e);
            }
        }

        if self.spec.self_hosted.is_some() {
            return Err(ReconcileError::SelfHostedRecovery);
        }

        let backup_manager = if self.spec.backup.is_some() {
            self.backup_manager.as_ref()
        } else {
            None
        };

        let mut backup_now = false;
        if let Some(bm) = backup_manager {
            if !left.is_empty() {
                info!(
                    "pods are still running ({}); requesting a latest backup from one of them",
                    left
                );
                match bm.request_backup().await {
                    Ok(()) => {
                        info!("made a latest backup");
                        backup_now = true;
                    }
                    // Recovery continues from any pre-existing archive.
                    Err(e) => error!("on-demand backup failed: {}", e),
                }
            }
        }

        let mut exist = backup_now;
        if !backup_now {
            if let Some(bm) = backup_manager {
                exist = bm.check_backup_exist(&self.spec.version).await?;
            }
        }

        for member in left.iter() {
            self.orchestrator.remove_pod(&member.name).await?;
        }
        for volume_name in self.volumes.names() {
            self.orchestrator
                .remove_claim(&naming::claim_name(&volume_name))
                .await?;
            self.volumes.remove(&volume_name);
        }

        if !exist {
            warn!("no usable backup for disaster recovery; restarting as a fresh ensemble");
            return self.bootstrap().await;
        }
        self.recover().await
    }

    /// Restart a fresh, empty ensemble from one seed member.
    async fn bootstrap(&mut self) -> Result<(), ReconcileError> {
        self.seed_ensemble(StartPhase::Seed).await
    }

    /// Restart a fresh ensemble whose seed restores the archived snapshot.
    async fn recover(&mut self) -> Result<(), ReconcileError> {
        self.seed_ensemble(StartPhase::Recover).await
    }

    async fn seed_ensemble(&mut self, phase: StartPhase) -> Result<(), ReconcileError> {
        let seed = self.new_member();
        self.members.add(seed.clone());

        let volume = if self.spec.pv_enabled() {
            let volume = self.prepare_volume().await?;
            self.bind_volume(&seed.name, &volume.name);
            self.volumes.get(&volume.name).cloned()
        } else {
            None
        };

        let member = self.member_snapshot(&seed.name)?;
        self.orchestrator
            .create_pod(&self.members, &member, phase, false, volume.as_ref())
            .await?;
        info!("created {} member {}", phase, member.name);
        Ok(())
    }

    /// An available volume if one survives, else a freshly minted claim.
    async fn prepare_volume(&mut self) -> Result<Volume, ReconcileError> {
        if let Some(volume) = self.volumes.pick_one_available() {
            return Ok(volume.clone());
        }
        let volume = self.new_volume();
        self.orchestrator.create_claim(&volume).await?;
        self.volumes.add(volume.clone());
        Ok(volume)
    }

    /// Rebuild the volume record from observed claims. Existence and
    /// corruption come from observation; attachment is re-derived from the
    /// membership record so a dead member keeps its binding until the loop
    /// unlinks it deliberately.
    fn refresh_volumes(&mut self, observed: &Observation) {
        let mut volumes = VolumeSet::new();
        for v in observed.volumes.iter() {
            let mut volume = Volume::new(v.name.clone(), v.namespace.clone());
            volume.is_corrupt = v.is_corrupt;
            if let Some(owner) = self
                .members
                .iter()
                .find(|m| m.volume.as_deref() == Some(v.name.as_str()))
            {
                volume.attach(owner.name.clone());
            }
            volumes.add(volume);
        }

        // Member links that no longer resolve to a live claim are stale.
        let stale: Vec<String> = self
            .members
            .iter()
            .filter(|m| m.volume.as_ref().is_some_and(|v| !volumes.contains(v)))
            .map(|m| m.name.clone())
            .collect();
        for name in stale {
            if let Some(member) = self.members.get_mut(&name) {
                member.volume = None;
            }
        }

        self.volumes = volumes;
    }

    /// First pod in orchestrator order whose running version differs from the
    /// declared one.
    fn pick_one_old_member(&self, pods: &[Pod]) -> Option<String> {
        for pod in pods {
            let Some(name) = pod.metadata.name.as_deref() else {
                continue;
            };
            if !self.members.contains(name) {
                continue;
            }
            match observation::pod_version(pod) {
                Some(version) if version == self.spec.version => continue,
                _ => return Some(name.to_string()),
            }
        }
        None
    }

    fn unlink_volume_of(&mut self, member_name: &str) {
        let volume_name = self.members.get(member_name).and_then(|m| m.volume.clone());
        if let Some(volume_name) = volume_name {
            if let Some(volume) = self.volumes.get_mut(&volume_name) {
                volume.detach();
            }
            if let Some(member) = self.members.get_mut(member_name) {
                member.volume = None;
            }
        }
    }

    fn bind_volume(&mut self, member_name: &str, volume_name: &str) {
        if let Some(volume) = self.volumes.get_mut(volume_name) {
            volume.attach(member_name);
        }
        if let Some(member) = self.members.get_mut(member_name) {
            member.volume = Some(volume_name.to_string());
        }
    }

    fn member_snapshot(&self, name: &str) -> Result<Member, ReconcileError> {
        self.members.get(name).cloned().ok_or_else(|| {
            ReconcileError::Internal(format!("member {} vanished from the record", name))
        })
    }

    fn new_member(&mut self) -> Member {
        let name = naming::member_name(&self.name, self.counter);
        self.counter += 1;
        let mut member = Member::new(name, self.namespace.clone());
        member.secure_peer = self.spec.is_secure_peer();
        member.secure_client = self.spec.is_secure_client();
        member
    }

    fn new_volume(&mut self) -> Volume {
        let name = naming::volume_name(&self.name, self.counter);
        self.counter += 1;
        Volume::new(name, self.namespace.clone())
    }
}
