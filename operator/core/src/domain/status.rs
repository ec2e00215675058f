// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Observed status of one managed ensemble.
//!
//! Conditions are flags, not a state machine: the reconciler sets and clears
//! them as it observes the cluster, and the surrounding operator publishes the
//! whole status object after every tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterConditionKind {
    Ready,
    Scaling,
    Upgrading,
    Recovering,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    pub kind: ClusterConditionKind,
    pub reason: String,
    pub transition_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default)]
    pub conditions: Vec<ClusterCondition>,

    /// Size of the membership record after the last tick.
    #[serde(default)]
    pub size: usize,

    #[serde(default)]
    pub current_version: String,

    /// Set while an upgrade is in flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_version: Option<String>,
}

impl ClusterStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_condition(&self, kind: ClusterConditionKind) -> bool {
        self.conditions.iter().any(|c| c.kind == kind)
    }

    /// Set `kind` with `reason`. The transition time is refreshed only when
    /// the condition is new or its reason changed.
    pub fn set_condition(&mut self, kind: ClusterConditionKind, reason: impl Into<String>) {
        let reason = reason.into();
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.kind == kind) {
            if existing.reason != reason {
                existing.reason = reason;
                existing.transition_time = Utc::now();
            }
            return;
        }
        self.conditions.push(ClusterCondition {
            kind,
            reason,
            transition_time: Utc::now(),
        });
    }

    pub fn clear_condition(&mut self, kind: ClusterConditionKind) {
        self.conditions.retain(|c| c.kind != kind);
    }

    pub fn set_scaling_up(&mut self, from: usize, to: usize) {
        self.set_condition(
            ClusterConditionKind::Scaling,
            format!("scaling up from {} to {}", from, to),
        );
    }

    pub fn set_scaling_down(&mut self, from: usize, to: usize) {
        self.set_condition(
            ClusterConditionKind::Scaling,
            format!("scaling down from {} to {}", from, to),
        );
    }

    pub fn set_recovering(&mut self) {
        self.set_condition(
            ClusterConditionKind::Recovering,
            "disaster recovery in progress",
        );
    }

    pub fn set_ready(&mut self) {
        self.clear_condition(ClusterConditionKind::Recovering);
        self.set_condition(ClusterConditionKind::Ready, "cluster is healthy");
    }

    /// Record that an upgrade toward `version` has started.
    pub fn upgrade_version_to(&mut self, version: impl Into<String>) {
        let version = version.into();
        self.set_condition(
            ClusterConditionKind::Upgrading,
            format!("upgrading to {}", version),
        );
        self.target_version = Some(version);
    }

    /// Record that the whole ensemble runs `version`.
    pub fn set_version(&mut self, version: impl Into<String>) {
        self.current_version = version.into();
        self.target_version = None;
    }
}
