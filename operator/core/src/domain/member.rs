// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Ensemble member identity and the MemberSet algebra.
//!
//! A [`Member`] is the logical identity of one ensemble participant; the pod
//! hosting it is a separate, shorter-lived resource. [`MemberSet`] is a pure
//! value type keyed by member name with deterministic iteration order, so
//! diffing and tie-breaking are reproducible across ticks.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::naming;

/// Client-facing ensemble port.
pub const CLIENT_PORT: u16 = 2379;

/// Peer-replication ensemble port.
pub const PEER_PORT: u16 = 2380;

/// Identity of one ensemble participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    pub namespace: String,

    /// Ensemble-assigned 64-bit ID; 0 until the ensemble admits the member.
    #[serde(default)]
    pub id: u64,

    /// Name of the persistent volume this member is bound to.
    /// `None` when persistent volumes are disabled or not yet bound.
    #[serde(default)]
    pub volume: Option<String>,

    #[serde(default)]
    pub secure_peer: bool,

    #[serde(default)]
    pub secure_client: bool,
}

impl Member {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            id: 0,
            volume: None,
            secure_peer: false,
            secure_client: false,
        }
    }

    fn peer_scheme(&self) -> &'static str {
        if self.secure_peer {
            "https"
        } else {
            "http"
        }
    }

    fn client_scheme(&self) -> &'static str {
        if self.secure_client {
            "https"
        } else {
            "http"
        }
    }

    /// URL announced to peers for replication traffic.
    pub fn peer_url(&self) -> String {
        format!("{}://{}:{}", self.peer_scheme(), self.name, PEER_PORT)
    }

    /// URL served to clients.
    pub fn client_url(&self) -> String {
        format!("{}://{}:{}", self.client_scheme(), self.name, CLIENT_PORT)
    }

    /// The counter this member's name was minted from, if it parses.
    pub fn counter(&self) -> Option<u32> {
        naming::counter_from_name(&self.name).ok()
    }
}

/// Mapping from member name to [`Member`]; names are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSet {
    members: BTreeMap<String, Member>,
}

impl MemberSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_members(members: impl IntoIterator<Item = Member>) -> Self {
        let mut set = Self::new();
        for m in members {
            set.add(m);
        }
        set
    }

    /// Insert `member`, replacing any entry with the same name.
    pub fn add(&mut self, member: Member) {
        self.members.insert(member.name.clone(), member);
    }

    /// Remove by name. Removing an absent name is a no-op.
    pub fn remove(&mut self, name: &str) {
        self.members.remove(name);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Member> {
        self.members.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    /// Members of `self` whose names are not in `other`.
    pub fn diff(&self, other: &MemberSet) -> MemberSet {
        MemberSet {
            members: self
                .members
                .iter()
                .filter(|(name, _)| !other.contains(name))
                .map(|(name, m)| (name.clone(), m.clone()))
                .collect(),
        }
    }

    /// Equality over name sets only; everything else is metadata.
    pub fn is_equal(&self, other: &MemberSet) -> bool {
        self.members.len() == other.members.len()
            && self.members.keys().all(|name| other.contains(name))
    }

    /// Deterministic tie-break: the lexicographically smallest name.
    pub fn pick_one(&self) -> Option<&Member> {
        self.members.values().next()
    }

    /// The majority threshold for this membership, `⌊N/2⌋ + 1`.
    pub fn quorum(&self) -> usize {
        self.members.len() / 2 + 1
    }

    pub fn names(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    pub fn client_urls(&self) -> Vec<String> {
        self.members.values().map(Member::client_url).collect()
    }

    pub fn peer_urls(&self) -> Vec<String> {
        self.members.values().map(Member::peer_url).collect()
    }
}

impl fmt::Display for MemberSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.members.keys().cloned().collect::<Vec<_>>().join(",")
        )
    }
}

impl<'a> IntoIterator for &'a MemberSet {
    type Item = &'a Member;
    type IntoIter = std::collections::btree_map::Values<'a, String, Member>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.values()
    }
}
