//! # skillbox-cli
//!
//! Command-line interface for the skillbox skills runtime.
//!
//! ## Commands
//!
//! - `skillbox list` / `show` / `enable` / `disable`: inspect the registry
//! - `skillbox run`: execute a skill for an account
//! - `skillbox propose` / `validate` / `approve`: the approval workflow
//! - `skillbox audit`: recent audit log entries
//! - `skillbox init`: scaffold a config and the system skills
//!
//! `sandbox-run`, `sandbox-probe`, and `sandbox-test` are hidden entry points
//! the runtime spawns this same executable with.

pub mod commands;

pub use commands::Cli;
