use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use skillbox_core::{CapabilitySet, InputSchema, Result, SkillboxError};

/// File name of the descriptor inside every skill package.
pub const MANIFEST_FILE: &str = "manifest.json";
/// Entry used when a manifest does not name one.
pub const DEFAULT_ENTRY: &str = "skill";
/// Prefix marking an entry compiled into the host.
pub const BUILTIN_PREFIX: &str = "builtin:";

/// Skill manifest, loaded from `manifest.json` at the package root.
///
/// Never mutated in place; a new version means a new manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub caps: CapabilitySet,
    #[serde(default)]
    pub description: String,
    /// BLAKE3 hex digest of the entry file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default = "default_entry")]
    pub entry: String,
    /// Program the entry file is handed to, e.g. `python3`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
    #[serde(default, skip_serializing_if = "InputSchema::is_empty")]
    pub inputs: InputSchema,
}

fn default_entry() -> String {
    DEFAULT_ENTRY.to_string()
}

/// Where a skill's implementation lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPoint {
    /// Compiled into the host, looked up in the catalog by id.
    Builtin(String),
    /// Executable file inside the package, relative to its root.
    File(PathBuf),
}

impl SkillManifest {
    /// Parse from a JSON string. `origin` names the source in error messages.
    pub fn from_json(s: &str, origin: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| SkillboxError::Manifest {
            skill: origin.to_string(),
            reason: format!("failed to parse {MANIFEST_FILE}: {e}"),
        })
    }

    /// Read and parse `<dir>/manifest.json`.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let raw = std::fs::read_to_string(&path).map_err(|e| SkillboxError::Manifest {
            skill: dir.display().to_string(),
            reason: format!("missing {MANIFEST_FILE}: {e}"),
        })?;
        Self::from_json(&raw, &dir.display().to_string())
    }

    /// Write `<dir>/manifest.json`, pretty-printed.
    pub fn write(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.join(MANIFEST_FILE), json + "\n")?;
        Ok(())
    }

    pub fn semver(&self) -> Option<Version> {
        Version::parse(&self.version).ok()
    }

    pub fn entry_point(&self) -> Result<EntryPoint> {
        if let Some(id) = self.entry.strip_prefix(BUILTIN_PREFIX) {
            if id.is_empty() {
                return Err(self.invalid("builtin entry has no id"));
            }
            return Ok(EntryPoint::Builtin(id.to_string()));
        }

        let rel = PathBuf::from(&self.entry);
        let contained = !self.entry.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !contained {
            return Err(self.invalid(format!(
                "entry '{}' must be a relative path inside the package",
                self.entry
            )));
        }
        Ok(EntryPoint::File(rel))
    }

    /// Structural checks that need no filesystem access.
    pub fn check(&self) -> Result<()> {
        if !is_valid_skill_name(&self.name) {
            return Err(self.invalid(
                "name must be 1-64 characters of [A-Za-z0-9_-] and start with a letter or digit",
            ));
        }
        if self.semver().is_none() {
            return Err(self.invalid(format!(
                "version '{}' is not a semantic version",
                self.version
            )));
        }
        let entry = self.entry_point()?;
        if matches!(entry, EntryPoint::Builtin(_)) && self.checksum.is_some() {
            return Err(self.invalid("builtin entries carry no code file to checksum"));
        }
        if matches!(entry, EntryPoint::Builtin(_)) && self.interpreter.is_some() {
            return Err(self.invalid("builtin entries cannot name an interpreter"));
        }
        self.inputs
            .check()
            .map_err(|e| self.invalid(format!("inputs: {e}")))?;
        Ok(())
    }

    /// Verify the entry file's bytes against the declared checksum.
    /// A manifest without a checksum always verifies.
    pub fn verify_checksum(&self, code: &[u8]) -> Result<()> {
        match &self.checksum {
            Some(expected) => check_checksum(&self.name, expected, code),
            None => Ok(()),
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> SkillboxError {
        SkillboxError::Manifest {
            skill: self.name.clone(),
            reason: reason.into(),
        }
    }
}

/// BLAKE3 hex digest used for manifest checksums.
pub fn compute_checksum(code: &[u8]) -> String {
    blake3::hash(code).to_hex().to_string()
}

/// Compare `code` against an expected hex digest (case-insensitive).
pub fn check_checksum(skill: &str, expected: &str, code: &[u8]) -> Result<()> {
    let actual = compute_checksum(code);
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(SkillboxError::ChecksumMismatch {
            skill: skill.to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Skill names double as directory names, so they stay path-safe.
pub fn is_valid_skill_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= 64
        && first.is_ascii_alphanumeric()
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
