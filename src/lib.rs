// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Interactive provisioning of fresh Debian hosts.
//!
//! Hostprep bundles the chores done on every new machine: checking that the
//! basic tools are present, upgrading the system, granting sudo rights,
//! hardening the SSH daemon, generating a key pair, installing a shell
//! profile, reconciling shell aliases, and installing a few services. Each
//! operation is safe to repeat, and no file is replaced without a dated
//! backup next to it.
//!
//! The heart of the crate is [`alias`], which merges the aliases hostprep owns
//! into a user's existing alias file without silently dropping anything the
//! user wrote.

pub mod access;
pub mod alias;
pub mod apt;
pub mod config;
pub mod edit;
pub mod keys;
pub mod menu;
pub mod path;
pub mod preflight;
pub mod profile;
pub mod service;
pub mod syscall;
pub mod task;
pub mod update;
