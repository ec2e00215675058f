// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # chorus-core
//!
//! Reconciliation core of the Chorus operator: it watches the declared state
//! of a replicated key-value ensemble (size, version, backup policy,
//! persistent-volume preference) and drives the observed state toward it,
//! one corrective action per tick.
//!
//! ## Layer Structure
//!
//! ```text
//! application/    ← reconciler (the control loop), observation adapter, backup manager
//!     ↓
//! domain/         ← member/volume set algebras, naming, spec, status, capability traits
//!     ↓
//! infrastructure/ ← backup archive client, object-store adapters (opendal, in-memory)
//! ```
//!
//! The loop itself owns no I/O: every side effect goes through the
//! [`domain::orchestrator::StorageOrchestrator`] capability, and every
//! archived snapshot through [`domain::archive::BackupArchive`]. Substrate
//! API adapters, watch machinery, and credential sourcing live in the
//! operator binary, not here.
//!
//! ## Integration Tests
//!
//! See `operator/core/tests/` for the end-to-end reconciliation scenarios
//! (scale up/down, dead member replacement, quorum loss, disaster recovery,
//! rolling upgrade).

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{BackupManager, ClusterReconciler, ReconcileError};
