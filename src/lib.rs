// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Flow Wallet - WhatsApp Flow endpoint for the custodial wallet assistant
//!
//! Serves the encrypted WhatsApp Flow data exchange for buying, selling and
//! transferring crypto from chat, and watches on-chain settlement in the
//! background.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `flows` - Flow envelope cipher and the per-flow screen machines
//! - `providers` - wallet custody, fiat ramp, user directory and WhatsApp clients
//! - `watcher` - settlement watcher with redb-backed job checkpoints

pub mod amounts;
pub mod api;
pub mod assets;
pub mod config;
pub mod error;
pub mod flows;
pub mod providers;
pub mod state;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_utils;
