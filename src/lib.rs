//! # UI Explorer
//!
//! Automated GUI exploration of an Android app under test, driven by a
//! pluggable decision policy and guided by method and branch coverage.
//!
//! ## Usage
//!
//! ```bash
//! ui-explorer --package com.example.notes -n 500 --output-dir out/
//! ```
//!
//! ## Modules
//!
//! - `adb` - Command builders for the adb client
//! - `config` - Layered configuration (defaults, TOML file, environment, CLI)
//! - `controller` - The exploration control loop and its session state
//! - `coverage` - Cumulative and per-decision coverage bookkeeping
//! - `device` - Device bridge protocol and app lifecycle driver
//! - `fuzz` - Lifecycle and socket protocol of the on-device fuzz tool
//! - `metrics` - Per-period metric history
//! - `strategy` - Decision policies and the action vocabulary
//! - `subprocess` - Subprocess abstraction layer for testing
//! - `testing` - Test doubles for every controller collaborator
//! - `transport` - Line-oriented TCP channels and connect retries
pub mod adb;
pub mod config;
pub mod controller;
pub mod coverage;
pub mod device;
pub mod error;
pub mod fuzz;
pub mod metrics;
pub mod strategy;
pub mod subprocess;
pub mod transport;

pub mod testing;

pub use error::{Error, Result};
