// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod archive;
pub mod member;
pub mod naming;
pub mod orchestrator;
pub mod spec;
pub mod status;
pub mod volume;
