//! # skillbox-config
//!
//! Configuration for the skillbox runtime. Reads `skillbox.toml`, then applies
//! `SKILLBOX_*` environment overrides, then CLI overrides, in that order.

pub mod loader;
pub mod schema;

pub use loader::{CONFIG_ENV, ConfigLoader};
pub use schema::{
    ApprovalConfig, ConfigWarning, LoggingConfig, RuntimeConfig, SandboxMode, SecurityConfig,
    SkillboxConfig, SkillsConfig, ValidatorConfig, WarningSeverity,
};
