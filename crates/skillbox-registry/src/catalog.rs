use std::collections::BTreeMap;
use std::sync::Arc;

use skillbox_core::{DynSkill, Skill};

/// Skill implementations compiled into the host, keyed by the id a manifest
/// names with `entry = "builtin:<id>"`.
///
/// A package still has to declare the skill on disk before the registry will
/// expose it; the catalog only supplies the code.
#[derive(Default, Clone)]
pub struct SkillCatalog {
    entries: BTreeMap<String, Arc<dyn DynSkill>>,
}

impl SkillCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed skill under `id`. Replaces any earlier entry.
    pub fn register<S: Skill>(&mut self, id: impl Into<String>, skill: S) -> &mut Self {
        self.entries.insert(id.into(), Arc::new(skill));
        self
    }

    pub fn register_dyn(&mut self, id: impl Into<String>, skill: Arc<dyn DynSkill>) -> &mut Self {
        self.entries.insert(id.into(), skill);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn DynSkill>> {
        self.entries.get(id).cloned()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for SkillCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}
