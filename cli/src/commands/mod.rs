// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the colony CLI

pub mod config;
pub mod controller;
pub mod manifest;

pub use self::config::ConfigCommand;
pub use self::controller::ControllerCommand;
pub use self::manifest::ManifestCommand;
