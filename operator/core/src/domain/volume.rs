// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Persistent volumes and the VolumeSet algebra.
//!
//! A [`Volume`] lives exactly as long as its storage claim on the
//! orchestrator. Pods come and go; a volume survives its member's pod and is
//! destroyed only on explicit scale-down or disaster recovery. Attachment is
//! a name reference in both directions (member records the volume name, the
//! volume records the member name); neither side owns the other.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::naming;

/// A persistent backing store for one ensemble member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub namespace: String,

    /// Counter the name was minted from, when it parses.
    #[serde(default)]
    pub id: Option<u64>,

    /// Name of the member this volume is attached to; `None` when available.
    #[serde(default)]
    pub member: Option<String>,

    #[serde(default)]
    pub is_corrupt: bool,
}

impl Volume {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let name = name.into();
        let id = naming::counter_from_name(&name).ok().map(u64::from);
        Self {
            name,
            namespace: namespace.into(),
            id,
            member: None,
            is_corrupt: false,
        }
    }

    /// The storage-claim name backing this volume.
    pub fn claim_name(&self) -> String {
        naming::claim_name(&self.name)
    }

    /// Attached iff a member name is recorded; the two are one fact.
    pub fn is_attached(&self) -> bool {
        self.member.is_some()
    }

    pub fn attach(&mut self, member: impl Into<String>) {
        self.member = Some(member.into());
    }

    pub fn detach(&mut self) {
        self.member = None;
    }
}

/// Mapping from volume name to [`Volume`]; names are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSet {
    volumes: BTreeMap<String, Volume>,
}

impl VolumeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_volumes(volumes: impl IntoIterator<Item = Volume>) -> Self {
        let mut set = Self::new();
        for v in volumes {
            set.add(v);
        }
        set
    }

    pub fn add(&mut self, volume: Volume) {
        self.volumes.insert(volume.name.clone(), volume);
    }

    /// Remove by name. Removing an absent name is a no-op.
    pub fn remove(&mut self, name: &str) {
        self.volumes.remove(name);
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.volumes.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Volume> {
        self.volumes.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Volume> {
        self.volumes.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Volume> {
        self.volumes.values()
    }

    /// Volumes of `self` whose names are not in `other`.
    pub fn diff(&self, other: &VolumeSet) -> VolumeSet {
        VolumeSet {
            volumes: self
                .volumes
                .iter()
                .filter(|(name, _)| !other.contains(name))
                .map(|(name, v)| (name.clone(), v.clone()))
                .collect(),
        }
    }

    /// Equality over name sets only.
    pub fn is_equal(&self, other: &VolumeSet) -> bool {
        self.volumes.len() == other.volumes.len()
            && self.volumes.keys().all(|name| other.contains(name))
    }

    /// The unattached volume with the lexicographically smallest name.
    pub fn pick_one_available(&self) -> Option<&Volume> {
        self.volumes.values().find(|v| !v.is_attached())
    }

    pub fn names(&self) -> Vec<String> {
        self.volumes.keys().cloned().collect()
    }
}

impl fmt::Display for VolumeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.volumes.keys().cloned().collect::<Vec<_>>().join(",")
        )
    }
}

impl<'a> IntoIterator for &'a VolumeSet {
    type Item = &'a Volume;
    type IntoIter = std::collections::btree_map::Values<'a, String, Volume>;

    fn into_iter(self) -> Self::IntoIter {
        self.volumes.values()
    }
}
