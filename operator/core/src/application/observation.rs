// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Observation adapter: substrate snapshot in, set algebra out.
//!
//! Projects one watch-event's worth of pods and storage claims into the
//! [`MemberSet`]/[`VolumeSet`] values the reconciler runs on. Foreign
//! resources (names outside the cluster's naming scheme) are logged and
//! skipped; they never enter a set and never bump the counter.

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use tracing::debug;

use crate::domain::member::{Member, MemberSet};
use crate::domain::naming;
use crate::domain::spec::ClusterSpec;
use crate::domain::volume::{Volume, VolumeSet};

/// Annotation recording the ensemble version a pod runs. Falls back to the
/// image tag when absent.
pub const VERSION_ANNOTATION: &str = "chorus.100monkeys.ai/version";

/// One projected snapshot of the orchestrator's state for a cluster.
#[derive(Debug, Clone)]
pub struct Observation {
    /// Members whose pods are running or starting.
    pub running: MemberSet,

    /// Volumes whose claims exist, linked to running members where a pod
    /// references the claim.
    pub volumes: VolumeSet,

    /// Counter floor implied by every observed name: `max(parsed) + 1`.
    pub next_counter: u32,
}

/// Project `pods` and `claims` into set values.
pub fn observe(
    cluster: &str,
    spec: &ClusterSpec,
    pods: &[Pod],
    claims: &[PersistentVolumeClaim],
) -> Observation {
    let mut next_counter = 0u32;
    let mut bump = |name: &str| {
        if let Ok(counter) = naming::counter_from_name(name) {
            next_counter = next_counter.max(counter + 1);
        }
    };

    let mut volumes = VolumeSet::new();
    for claim in claims {
        let Some(claim_name) = claim.metadata.name.as_deref() else {
            continue;
        };
        let Ok(volume_name) = naming::volume_name_from_claim(claim_name) else {
            debug!("ignoring foreign claim {}", claim_name);
            continue;
        };
        if !naming::belongs_to_cluster(volume_name, cluster) {
            debug!("ignoring foreign claim {}", claim_name);
            continue;
        }
        bump(volume_name);
        let namespace = claim.metadata.namespace.clone().unwrap_or_default();
        volumes.add(Volume::new(volume_name, namespace));
    }

    let mut running = MemberSet::new();
    for pod in pods {
        if !is_running_or_starting(pod) {
            continue;
        }
        let Some(pod_name) = pod.metadata.name.as_deref() else {
            continue;
        };
        if !naming::belongs_to_cluster(pod_name, cluster) {
            debug!("ignoring foreign pod {}", pod_name);
            continue;
        }
        bump(pod_name);
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        let mut member = Member::new(pod_name, namespace);
        member.secure_peer = spec.is_secure_peer();
        member.secure_client = spec.is_secure_client();

        if let Some(volume_name) = claimed_volume(pod) {
            if let Some(volume) = volumes.get_mut(&volume_name) {
                volume.attach(pod_name);
                member.volume = Some(volume_name);
            }
        }
        running.add(member);
    }

    Observation {
        running,
        volumes,
        next_counter,
    }
}

/// The ensemble version `pod` runs, from the version annotation or the first
/// container's image tag.
pub fn pod_version(pod: &Pod) -> Option<String> {
    if let Some(version) = pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(VERSION_ANNOTATION))
    {
        return Some(version.clone());
    }
    let image = pod
        .spec
        .as_ref()
        .and_then(|s| s.containers.first())
        .and_then(|c| c.image.as_deref())?;
    image.rsplit_once(':').map(|(_, tag)| tag.to_string())
}

fn is_running_or_starting(pod: &Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Running") | Some("Pending")
    )
}

/// Volume name referenced by the pod's first persistent-volume-claim source.
fn claimed_volume(pod: &Pod) -> Option<String> {
    pod.spec
        .as_ref()?
        .volumes
        .as_ref()?
        .iter()
        .find_map(|v| v.persistent_volume_claim.as_ref())
        .and_then(|src| naming::volume_name_from_claim(&src.claim_name).ok())
        .map(str::to_string)
}
