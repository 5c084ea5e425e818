//! # skillbox-registry
//!
//! Discovers skill packages on disk, verifies them, and holds the name → skill
//! table the runtime dispatches through.
//!
//! A package is a directory with a `manifest.json` and either a builtin entry
//! (`"entry": "builtin:<id>"`, resolved from a [`SkillCatalog`]) or an
//! executable entry file run as a [`ProcessSkill`].

pub mod catalog;
pub mod loader;
pub mod manifest;
pub mod process_skill;
pub mod registry;

pub use catalog::SkillCatalog;
pub use loader::{LoadedPackage, load_package, probe_package};
pub use manifest::{
    BUILTIN_PREFIX, DEFAULT_ENTRY, EntryPoint, MANIFEST_FILE, SkillManifest, compute_checksum,
    is_valid_skill_name,
};
pub use process_skill::{ProcessSkill, SAFE_ENV_VARS};
pub use registry::{RegisteredSkill, Registry, SkillOrigin, SkillSummary};
