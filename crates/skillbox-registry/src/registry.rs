use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::catalog::SkillCatalog;
use crate::loader::load_package;
use crate::manifest::{MANIFEST_FILE, SkillManifest};
use skillbox_config::SkillboxConfig;
use skillbox_core::{CapabilitySet, DynSkill, Result, SkillboxError, requires_pin};

/// Which tree a skill was loaded from. System skills load first and win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillOrigin {
    System,
    Approved,
}

impl SkillOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Approved => "approved",
        }
    }
}

impl fmt::Display for SkillOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dot-directories hold in-flight copies, never packages.
fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// A loaded skill, ready to invoke.
#[derive(Clone)]
pub struct RegisteredSkill {
    pub manifest: SkillManifest,
    pub origin: SkillOrigin,
    pub path: PathBuf,
    pub enabled: bool,
    skill: Arc<dyn DynSkill>,
}

impl RegisteredSkill {
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    /// `system::<name>` or `approved::<name>`.
    pub fn qualified_id(&self) -> String {
        format!("{}::{}", self.origin, self.manifest.name)
    }

    pub fn skill(&self) -> Arc<dyn DynSkill> {
        Arc::clone(&self.skill)
    }

    pub fn requires_pin(&self) -> bool {
        requires_pin(&self.manifest.caps)
    }

    pub fn summary(&self) -> SkillSummary {
        SkillSummary {
            name: self.manifest.name.clone(),
            version: self.manifest.version.clone(),
            caps: self.manifest.caps.clone(),
            enabled: self.enabled,
            path: self.path.clone(),
            description: self.manifest.description.clone(),
            origin: self.origin,
        }
    }
}

impl fmt::Debug for RegisteredSkill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredSkill")
            .field("id", &self.qualified_id())
            .field("version", &self.manifest.version)
            .field("enabled", &self.enabled)
            .field("path", &self.path)
            .finish()
    }
}

/// What `list()` exposes: metadata only, never the implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillSummary {
    pub name: String,
    pub version: String,
    pub caps: CapabilitySet,
    pub enabled: bool,
    pub path: PathBuf,
    pub description: String,
    pub origin: SkillOrigin,
}

#[derive(Default)]
struct RegistryState {
    skills: BTreeMap<String, RegisteredSkill>,
    disabled: BTreeSet<String>,
}

/// The skill registry: discovers packages under the system directory, then
/// the approved directory, and holds the resulting name → skill table.
///
/// Owned by whoever composes the runtime and shared behind an `Arc`. Reloads
/// build the new table off to the side and swap it in under the write lock,
/// so readers never see a half-built table.
pub struct Registry {
    system_dir: PathBuf,
    approved_dir: PathBuf,
    catalog: Arc<SkillCatalog>,
    disabled_file: Option<PathBuf>,
    process_timeout: Duration,
    state: RwLock<RegistryState>,
    reload: Mutex<()>,
}

impl Registry {
    pub fn new(system_dir: &Path, approved_dir: &Path, catalog: Arc<SkillCatalog>) -> Self {
        Self {
            system_dir: system_dir.to_path_buf(),
            approved_dir: approved_dir.to_path_buf(),
            catalog,
            disabled_file: None,
            process_timeout: Duration::from_secs(25),
            state: RwLock::new(RegistryState::default()),
            reload: Mutex::new(()),
        }
    }

    /// Registry over the directories named by `config`, remembering disabled
    /// skills in the store.
    pub fn from_config(config: &SkillboxConfig, catalog: Arc<SkillCatalog>) -> Self {
        Self::new(&config.skills.system_dir, &config.skills.approved_dir(), catalog)
            .with_disabled_file(config.skills.disabled_file())
            .with_process_timeout(Duration::from_secs(config.runtime.timeout_secs))
    }

    /// Persist `enable(name, false)` to `path` so other processes honor it.
    pub fn with_disabled_file(mut self, path: PathBuf) -> Self {
        self.disabled_file = Some(path);
        self
    }

    /// Wall-clock bound on each process-skill invocation.
    pub fn with_process_timeout(mut self, timeout: Duration) -> Self {
        self.process_timeout = timeout;
        self
    }

    pub fn system_dir(&self) -> &Path {
        &self.system_dir
    }

    pub fn approved_dir(&self) -> &Path {
        &self.approved_dir
    }

    pub fn catalog(&self) -> &SkillCatalog {
        &self.catalog
    }

    /// Rebuild the table from disk: system packages first, then approved.
    ///
    /// Bad packages are logged and skipped; a name already taken is rejected
    /// and the first registration wins. Returns the number of skills loaded.
    pub fn load_all(&self) -> usize {
        let _serialized = self.reload.lock();

        // With a disabled file the file is authoritative, so toggles made by
        // other processes are picked up.
        let disabled = match &self.disabled_file {
            Some(path) => read_disabled_file(path),
            None => self.state.read().disabled.clone(),
        };

        let mut skills = BTreeMap::new();
        for (dir, origin) in [
            (&self.system_dir, SkillOrigin::System),
            (&self.approved_dir, SkillOrigin::Approved),
        ] {
            self.scan_dir(dir, origin, &disabled, &mut skills);
        }

        let count = skills.len();
        let mut state = self.state.write();
        state.skills = skills;
        state.disabled = disabled;
        info!(count, "skill registry loaded");
        count
    }

    fn scan_dir(
        &self,
        dir: &Path,
        origin: SkillOrigin,
        disabled: &BTreeSet<String>,
        skills: &mut BTreeMap<String, RegisteredSkill>,
    ) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(?dir, error = %e, "skills directory not readable, skipping");
                return;
            }
        };

        // Directory order is unspecified; sort so duplicate resolution is stable.
        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| !is_hidden(p) && p.is_dir() && p.join(MANIFEST_FILE).is_file())
            .collect();
        candidates.sort();

        for path in candidates {
            let package = match load_package(&path, &self.catalog, self.process_timeout) {
                Ok(package) => package,
                Err(e) => {
                    warn!(path = ?path, %origin, error = %e, "failed to load skill, skipping");
                    continue;
                }
            };

            let name = package.manifest.name.clone();
            if let Some(existing) = skills.get(&name) {
                let err = SkillboxError::DuplicateSkill(name.clone());
                warn!(
                    path = ?path,
                    kept = %existing.qualified_id(),
                    error = %err,
                    "rejecting duplicate skill"
                );
                continue;
            }

            let registered = RegisteredSkill {
                enabled: !disabled.contains(&name),
                manifest: package.manifest,
                origin,
                path: package.dir,
                skill: package.skill,
            };
            debug!(skill = %registered.qualified_id(), version = %registered.manifest.version, "registered skill");
            skills.insert(name, registered);
        }
    }

    /// Name-sorted summaries of every registered skill.
    pub fn list(&self) -> Vec<SkillSummary> {
        self.state
            .read()
            .skills
            .values()
            .map(RegisteredSkill::summary)
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<RegisteredSkill> {
        self.state.read().skills.get(name).cloned()
    }

    /// Toggle whether a registered skill may be invoked. Returns `false` if
    /// the name is unknown. The choice outlives `load_all()`.
    pub fn enable(&self, name: &str, flag: bool) -> Result<bool> {
        let disabled = {
            let mut state = self.state.write();
            let Some(skill) = state.skills.get_mut(name) else {
                return Ok(false);
            };
            skill.enabled = flag;
            if flag {
                state.disabled.remove(name);
            } else {
                state.disabled.insert(name.to_string());
            }
            state.disabled.clone()
        };
        info!(skill = %name, enabled = flag, "skill toggled");
        self.write_disabled_file(&disabled)?;
        Ok(true)
    }

    /// True iff the named skill declares any dangerous capability.
    pub fn requires_pin(&self, name: &str) -> bool {
        self.state
            .read()
            .skills
            .get(name)
            .is_some_and(RegisteredSkill::requires_pin)
    }

    pub fn len(&self) -> usize {
        self.state.read().skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().skills.is_empty()
    }

    fn write_disabled_file(&self, disabled: &BTreeSet<String>) -> Result<()> {
        let Some(path) = &self.disabled_file else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(disabled)?)?;
        Ok(())
    }
}

fn read_disabled_file(path: &Path) -> BTreeSet<String> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return BTreeSet::new(),
    };
    serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!(?path, error = %e, "ignoring unreadable disabled-skills file");
        BTreeSet::new()
    })
}
