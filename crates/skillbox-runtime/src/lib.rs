//! # skillbox-runtime
//!
//! Runs registered skills for a tenant, either in the host process or behind
//! the sandbox runner, and validates pending proposals before approval.

pub mod preflight;
pub mod runtime;
pub mod sandbox;
pub mod validator;

pub use preflight::{check_inputs, preflight};
pub use runtime::{Runtime, is_valid_account_id};
pub use sandbox::{
    InvocationPayload, RunnerSettings, SANDBOX_PROBE, SANDBOX_RUN, SANDBOX_TEST, TestReport,
    apply_rlimits, resolve_runner, run_from_reader, run_package_tests, run_payload,
    runner_command,
};
pub use validator::{Stage, StageResult, StageStatus, ValidationReport, Validator};
