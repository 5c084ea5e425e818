use thiserror::Error;

/// Unified error type for the skillbox workspace.
#[derive(Error, Debug)]
pub enum SkillboxError {
    // ── Package / load errors ──────────────────────────────────
    #[error("manifest error: {skill}: {reason}")]
    Manifest { skill: String, reason: String },

    #[error("checksum mismatch for {skill}: expected {expected}, found {actual}")]
    ChecksumMismatch {
        skill: String,
        expected: String,
        actual: String,
    },

    #[error("failed to load skill {skill}: {reason}")]
    SkillLoad { skill: String, reason: String },

    #[error("duplicate skill name: {0}")]
    DuplicateSkill(String),

    #[error("skill not found: {0}")]
    SkillNotFound(String),

    // ── Execution errors ───────────────────────────────────────
    #[error("authorization required: {0}")]
    AuthorizationRequired(String),

    #[error("invalid input for {skill}: {reason}")]
    InvalidInput { skill: String, reason: String },

    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("sandbox error: {0}")]
    Sandbox(String),

    // ── Workflow errors ────────────────────────────────────────
    #[error("proposal rejected: {0}")]
    Proposal(String),

    #[error("validation failed: {0}")]
    Validation(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SkillboxError>;
