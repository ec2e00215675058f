// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end reconciliation scenarios.
//!
//! Each test drives the reconciler tick by tick through a recording
//! orchestrator and asserts three things: the corrective action taken, that
//! no tick ever issues more than one membership-changing RPC, and that the
//! member/volume linkage invariants hold between ticks.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use k8s_openapi::api::core::v1::{
    Container, Node, PersistentVolumeClaim, PersistentVolumeClaimVolumeSource, Pod, PodSpec,
    PodStatus, Volume as PodVolume,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use chorus_core::application::{BackupManager, ClusterReconciler};
use chorus_core::domain::archive::BackupArchive;
use chorus_core::domain::member::{Member, MemberSet};
use chorus_core::domain::orchestrator::{
    ClusterEventKind, OrchestratorError, StartPhase, StorageOrchestrator,
};
use chorus_core::domain::spec::{
    BackupPolicy, ClusterSpec, PodPolicy, PvPolicy, TlsConfig,
};
use chorus_core::domain::status::ClusterConditionKind;
use chorus_core::domain::volume::Volume;
use chorus_core::infrastructure::archive::{InMemoryStore, ObjectStoreArchive};

// ============================================================================
// Recording orchestrator
// ============================================================================

#[derive(Default)]
struct RecordingOrchestrator {
    actions: Mutex<Vec<String>>,
    next_id: Mutex<u64>,
    schedulable: Mutex<usize>,
}

impl RecordingOrchestrator {
    fn log(&self, action: String) {
        self.actions.lock().unwrap().push(action);
    }

    /// Drain the action log, returning everything since the last call.
    fn take_actions(&self) -> Vec<String> {
        std::mem::take(&mut *self.actions.lock().unwrap())
    }
}

#[async_trait]
impl StorageOrchestrator for RecordingOrchestrator {
    async fn create_pod(
        &self,
        _peers: &MemberSet,
        member: &Member,
        phase: StartPhase,
        _self_hosted: bool,
        volume: Option<&Volume>,
    ) -> Result<(), OrchestratorError> {
        self.log(format!(
            "create_pod {} {} {}",
            member.name,
            phase,
            volume.map(|v| v.name.as_str()).unwrap_or("-")
        ));
        Ok(())
    }

    async fn remove_pod(&self, name: &str) -> Result<(), OrchestratorError> {
        self.log(format!("remove_pod {}", name));
        Ok(())
    }

    async fn create_claim(&self, volume: &Volume) -> Result<(), OrchestratorError> {
        self.log(format!("create_claim {}", volume.claim_name()));
        Ok(())
    }

    async fn remove_claim(&self, claim_name: &str) -> Result<(), OrchestratorError> {
        self.log(format!("remove_claim {}", claim_name));
        Ok(())
    }

    async fn member_add(
        &self,
        _endpoints: &[String],
        _tls: Option<&TlsConfig>,
        peer_url: &str,
        _timeout: Duration,
    ) -> Result<u64, OrchestratorError> {
        self.log(format!("member_add {}", peer_url));
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        Ok(*id)
    }

    async fn member_remove(
        &self,
        _endpoints: &[String],
        _tls: Option<&TlsConfig>,
        id: u64,
        _timeout: Duration,
    ) -> Result<(), OrchestratorError> {
        self.log(format!("member_remove {}", id));
        Ok(())
    }

    async fn emit_event(
        &self,
        kind: ClusterEventKind,
        member: &Member,
    ) -> Result<(), OrchestratorError> {
        self.log(format!("emit {:?} {}", kind, member.name));
        Ok(())
    }

    async fn schedulable_nodes(&self) -> Result<Vec<Node>, OrchestratorError> {
        Ok(vec![Node::default(); *self.schedulable.lock().unwrap()])
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn pod(name: &str, version: &str, claim: Option<&str>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "chorus".to_string(),
                image: Some(format!("quay.io/100monkeys/chorus:{}", version)),
                ..Default::default()
            }],
            volumes: claim.map(|c| {
                vec![PodVolume {
                    name: "data".to_string(),
                    persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                        claim_name: c.to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]
            }),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        }),
    }
}

fn claim(name: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn pv_spec(size: i32, version: &str) -> ClusterSpec {
    ClusterSpec {
        size,
        version: version.to_string(),
        backup: None,
        self_hosted: None,
        tls: None,
        pod: Some(PodPolicy {
            antiaffinity: false,
            pv: Some(PvPolicy {
                volume_size_in_gb: 2,
                storage_class: None,
            }),
        }),
    }
}

fn plain_spec(size: i32, version: &str) -> ClusterSpec {
    ClusterSpec {
        size,
        version: version.to_string(),
        backup: None,
        self_hosted: None,
        tls: None,
        pod: None,
    }
}

/// Pods and claims matching the reconciler's own record, as the orchestrator
/// would report them once every action landed.
fn pods_of(rec: &ClusterReconciler, version: &str) -> Vec<Pod> {
    rec.members()
        .iter()
        .map(|m| {
            pod(
                &m.name,
                version,
                m.volume.as_deref().map(chorus_core::domain::naming::claim_name).as_deref(),
            )
        })
        .collect()
}

fn claims_of(rec: &ClusterReconciler) -> Vec<PersistentVolumeClaim> {
    rec.volumes().iter().map(|v| claim(&v.claim_name())).collect()
}

fn assert_invariants(rec: &ClusterReconciler) {
    for member in rec.members().iter() {
        if let Some(volume_name) = &member.volume {
            let volume = rec
                .volumes()
                .get(volume_name)
                .unwrap_or_else(|| panic!("member {} bound to missing volume", member.name));
            assert_eq!(volume.member.as_deref(), Some(member.name.as_str()));
        }
    }
    for volume in rec.volumes().iter() {
        assert_eq!(volume.is_attached(), volume.member.is_some());
        if let Some(owner) = &volume.member {
            assert_eq!(
                rec.members().get(owner).and_then(|m| m.volume.as_deref()),
                Some(volume.name.as_str()),
                "volume {} does not link back to its member",
                volume.name
            );
        }
    }
}

fn membership_rpcs(actions: &[String]) -> usize {
    actions
        .iter()
        .filter(|a| a.starts_with("member_add") || a.starts_with("member_remove"))
        .count()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_scale_up_one_to_three_with_pv() {
    let orch = Arc::new(RecordingOrchestrator::default());
    let mut rec =
        ClusterReconciler::new("kv", "default", pv_spec(3, "3.1.8"), orch.clone()).unwrap();

    // tick 0: nothing exists yet; a seed member comes up with a fresh volume
    rec.reconcile(&[], &[]).await.unwrap();
    assert_eq!(rec.members().names(), vec!["kv-0000"]);
    let actions = orch.take_actions();
    assert!(actions.contains(&"create_pod kv-0000 seed kv-0001".to_string()));
    assert_invariants(&rec);

    // tick 1 and 2: one member added per tick, each bound to a fresh volume
    for expected_size in [2usize, 3] {
        let pods = pods_of(&rec, "3.1.8");
        let claims = claims_of(&rec);
        rec.reconcile(&pods, &claims).await.unwrap();

        assert_eq!(rec.members().len(), expected_size);
        let actions = orch.take_actions();
        assert_eq!(membership_rpcs(&actions), 1);
        assert!(actions.iter().any(|a| a.starts_with("member_add")));
        assert!(actions.iter().any(|a| a.starts_with("create_claim")));
        assert_invariants(&rec);
    }

    // tick 3: nothing left to do
    let pods = pods_of(&rec, "3.1.8");
    let claims = claims_of(&rec);
    rec.reconcile(&pods, &claims).await.unwrap();
    assert!(orch.take_actions().is_empty());
    assert!(rec.status().has_condition(ClusterConditionKind::Ready));
    assert!(!rec.status().has_condition(ClusterConditionKind::Scaling));
    assert_eq!(rec.status().size, 3);
    assert_invariants(&rec);
}

#[tokio::test]
async fn test_scale_down_three_to_one_deletes_volumes() {
    let orch = Arc::new(RecordingOrchestrator::default());
    let mut rec =
        ClusterReconciler::new("kv", "default", pv_spec(1, "3.1.8"), orch.clone()).unwrap();

    let mut pods: Vec<Pod> = (0..3)
        .map(|i| {
            let name = format!("kv-{:04}", i);
            pod(&name, "3.1.8", Some(&format!("{}-pvc", name)))
        })
        .collect();
    let mut claims: Vec<PersistentVolumeClaim> =
        (0..3).map(|i| claim(&format!("kv-{:04}-pvc", i))).collect();

    // tick 1: adopts all three, then removes the lexicographically smallest
    rec.reconcile(&pods, &claims).await.unwrap();
    let actions = orch.take_actions();
    assert_eq!(membership_rpcs(&actions), 1);
    assert!(actions.contains(&"remove_pod kv-0000".to_string()));
    assert!(actions.contains(&"remove_claim kv-0000-pvc".to_string()));
    assert_eq!(rec.members().names(), vec!["kv-0001", "kv-0002"]);
    assert!(rec.status().has_condition(ClusterConditionKind::Scaling));
    assert_invariants(&rec);

    // tick 2: the orchestrator caught up; one more member goes
    pods.remove(0);
    claims.remove(0);
    rec.reconcile(&pods, &claims).await.unwrap();
    let actions = orch.take_actions();
    assert_eq!(membership_rpcs(&actions), 1);
    assert!(actions.contains(&"remove_claim kv-0001-pvc".to_string()));
    assert_eq!(rec.members().names(), vec!["kv-0002"]);
    assert_invariants(&rec);

    // tick 3: steady state
    pods.remove(0);
    claims.remove(0);
    rec.reconcile(&pods, &claims).await.unwrap();
    assert!(orch.take_actions().is_empty());
    assert!(rec.status().has_condition(ClusterConditionKind::Ready));
    assert!(!rec.status().has_condition(ClusterConditionKind::Scaling));
    assert_eq!(rec.status().size, 1);
}

#[tokio::test]
async fn test_dead_member_replaced_through_surviving_volume() {
    let orch = Arc::new(RecordingOrchestrator::default());
    let mut rec =
        ClusterReconciler::new("kv", "default", pv_spec(3, "3.1.8"), orch.clone()).unwrap();

    let all_pods: Vec<Pod> = (0..3)
        .map(|i| {
            let name = format!("kv-{:04}", i);
            pod(&name, "3.1.8", Some(&format!("{}-pvc", name)))
        })
        .collect();
    let all_claims: Vec<PersistentVolumeClaim> =
        (0..3).map(|i| claim(&format!("kv-{:04}-pvc", i))).collect();

    rec.reconcile(&all_pods, &all_claims).await.unwrap();
    assert!(rec.status().has_condition(ClusterConditionKind::Ready));
    orch.take_actions();

    // kv-0002's pod dies; quorum among running pods holds, so the dead
    // member is removed and its volume survives unattached
    rec.reconcile(&all_pods[..2], &all_claims).await.unwrap();
    let actions = orch.take_actions();
    assert_eq!(membership_rpcs(&actions), 1);
    assert!(actions.contains(&"remove_pod kv-0002".to_string()));
    assert!(!actions.iter().any(|a| a.starts_with("remove_claim")));
    assert!(!rec.volumes().get("kv-0002").unwrap().is_attached());
    assert_invariants(&rec);

    // next tick: the replacement member reuses the surviving volume
    rec.reconcile(&all_pods[..2], &all_claims).await.unwrap();
    let actions = orch.take_actions();
    assert_eq!(membership_rpcs(&actions), 1);
    assert!(actions.contains(&"create_pod kv-0003 existing kv-0002".to_string()));
    assert!(!actions.iter().any(|a| a.starts_with("create_claim")));
    assert_eq!(
        rec.members().get("kv-0003").unwrap().volume.as_deref(),
        Some("kv-0002")
    );
    assert_invariants(&rec);
}

#[tokio::test]
async fn test_quorum_lost_with_surviving_volumes_bootstraps_seed() {
    let orch = Arc::new(RecordingOrchestrator::default());
    let mut rec =
        ClusterReconciler::new("kv", "default", pv_spec(3, "3.1.8"), orch.clone()).unwrap();

    let all_pods: Vec<Pod> = (0..3)
        .map(|i| {
            let name = format!("kv-{:04}", i);
            pod(&name, "3.1.8", Some(&format!("{}-pvc", name)))
        })
        .collect();
    let all_claims: Vec<PersistentVolumeClaim> =
        (0..3).map(|i| claim(&format!("kv-{:04}-pvc", i))).collect();

    rec.reconcile(&all_pods, &all_claims).await.unwrap();
    orch.take_actions();

    // every pod is gone; the claims survive, so the ensemble restarts from a
    // seed that reuses the existing data instead of recovering from archive
    rec.reconcile(&[], &all_claims).await.unwrap();
    let actions = orch.take_actions();
    assert_eq!(membership_rpcs(&actions), 0);
    assert!(!actions.iter().any(|a| a.starts_with("remove_claim")));
    assert_eq!(
        actions,
        vec!["create_pod kv-0003 seed kv-0000".to_string()]
    );
    assert_eq!(rec.members().names(), vec!["kv-0003"]);
    assert_eq!(rec.volumes().len(), 3);
    assert_invariants(&rec);
}

#[tokio::test]
async fn test_disaster_with_backup_recovers_from_archive() {
    let orch = Arc::new(RecordingOrchestrator::default());

    let mut server = mockito::Server::new_async().await;
    let backup_now = server
        .mock("GET", "/v1/backupnow")
        .with_status(200)
        .create_async()
        .await;

    let store = Arc::new(InMemoryStore::new());
    let archive = Arc::new(ObjectStoreArchive::new(store, "default", "kv"));
    archive
        .save("3.1.8", 42, Bytes::from_static(b"snapshot"))
        .await
        .unwrap();

    let mut spec = pv_spec(3, "3.1.8");
    spec.backup = Some(BackupPolicy {
        backup_interval_seconds: 1800,
        max_backups: 5,
        auto_delete: false,
    });
    let mut rec = ClusterReconciler::new("kv", "default", spec, orch.clone())
        .unwrap()
        .with_backup_manager(BackupManager::new(server.url(), archive));

    let all_pods: Vec<Pod> = (0..3)
        .map(|i| {
            let name = format!("kv-{:04}", i);
            pod(&name, "3.1.8", Some(&format!("{}-pvc", name)))
        })
        .collect();
    let all_claims: Vec<PersistentVolumeClaim> =
        (0..3).map(|i| claim(&format!("kv-{:04}-pvc", i))).collect();

    rec.reconcile(&all_pods, &all_claims).await.unwrap();
    orch.take_actions();

    // two pods and two claims are gone: pod quorum and volume quorum both
    // lost. One pod still lives, so a last backup is requested before the
    // remains are cleared and a recovery seed comes up.
    rec.reconcile(&all_pods[..1], &all_claims[..1]).await.unwrap();

    backup_now.assert_async().await;
    let actions = orch.take_actions();
    assert_eq!(membership_rpcs(&actions), 0);
    assert!(actions.contains(&"emit Recovering kv-0000".to_string()));
    assert!(actions.contains(&"remove_pod kv-0000".to_string()));
    assert!(actions.contains(&"remove_claim kv-0000-pvc".to_string()));
    let seed = actions
        .iter()
        .find(|a| a.starts_with("create_pod"))
        .expect("recovery seed pod");
    assert!(seed.contains(" recover "), "unexpected seed action: {}", seed);
    assert_eq!(rec.members().len(), 1);
    assert!(rec.status().has_condition(ClusterConditionKind::Recovering));
    assert_invariants(&rec);
}

#[tokio::test]
async fn test_rolling_upgrade_one_member_per_tick() {
    let orch = Arc::new(RecordingOrchestrator::default());
    let mut rec =
        ClusterReconciler::new("kv", "default", plain_spec(3, "3.2.0"), orch.clone()).unwrap();

    // two members still run the old version
    let pods = [
        pod("kv-0000", "3.1.8", None),
        pod("kv-0001", "3.1.8", None),
        pod("kv-0002", "3.2.0", None),
    ];
    rec.reconcile(&pods, &[]).await.unwrap();
    assert_eq!(orch.take_actions(), vec!["remove_pod kv-0000"]);
    assert!(rec.status().has_condition(ClusterConditionKind::Upgrading));
    assert_eq!(rec.status().target_version.as_deref(), Some("3.2.0"));

    // the deleted pod is observed missing: its membership is retired
    let pods = [pod("kv-0001", "3.1.8", None), pod("kv-0002", "3.2.0", None)];
    rec.reconcile(&pods, &[]).await.unwrap();
    let actions = orch.take_actions();
    assert_eq!(membership_rpcs(&actions), 1);
    assert!(actions.contains(&"remove_pod kv-0000".to_string()));

    // and replaced through the standard add path
    rec.reconcile(&pods, &[]).await.unwrap();
    let actions = orch.take_actions();
    assert_eq!(membership_rpcs(&actions), 1);
    assert!(actions.iter().any(|a| a.starts_with("member_add")));
    assert_eq!(rec.members().len(), 3);

    // once every pod reports the new version the upgrade completes
    let pods = [
        pod("kv-0001", "3.2.0", None),
        pod("kv-0002", "3.2.0", None),
        pod("kv-0003", "3.2.0", None),
    ];
    rec.reconcile(&pods, &[]).await.unwrap();
    assert!(orch.take_actions().is_empty());
    assert!(!rec.status().has_condition(ClusterConditionKind::Upgrading));
    assert!(rec.status().has_condition(ClusterConditionKind::Ready));
    assert_eq!(rec.status().current_version, "3.2.0");
}

#[tokio::test]
async fn test_teardown_purges_archive_when_auto_delete_set() {
    let orch = Arc::new(RecordingOrchestrator::default());

    let store = Arc::new(InMemoryStore::new());
    let archive = Arc::new(ObjectStoreArchive::new(store, "default", "kv"));
    archive
        .save("3.1.8", 7, Bytes::from_static(b"snapshot"))
        .await
        .unwrap();

    let mut spec = plain_spec(1, "3.1.8");
    spec.backup = Some(BackupPolicy {
        backup_interval_seconds: 0,
        max_backups: 0,
        auto_delete: true,
    });
    let rec = ClusterReconciler::new("kv", "default", spec, orch)
        .unwrap()
        .with_backup_manager(BackupManager::new("http://kv-backup:19999", archive.clone()));

    rec.teardown().await.unwrap();
    assert!(archive.list().await.unwrap().is_empty());
}
