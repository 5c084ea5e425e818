//! # skillbox-core
//!
//! Shared vocabulary for the skillbox skills runtime: the error type, the
//! capability model, the skill contracts, declarative input schemas, and the
//! bounded subprocess helper every other crate spawns children through.

pub mod capability;
pub mod contracts;
pub mod error;
pub mod process;
pub mod schema;

pub use capability::{
    Capability, CapabilitySet, DANGEROUS_CAPABILITIES, pin_matches, requires_pin,
};
pub use contracts::{DynSkill, NO_NET_ENV, Skill, SkillContext, SkillDescriptor, SkillOutputs};
pub use error::{Result, SkillboxError};
pub use process::{
    DIAGNOSTIC_LIMIT, ProcessOutcome, ProcessOutput, STDERR_EXCERPT, run_with_timeout,
};
pub use schema::{InputSchema, ParamSpec, ParamType};
