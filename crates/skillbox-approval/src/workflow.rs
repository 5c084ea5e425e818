use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditLog};
use skillbox_config::SkillboxConfig;
use skillbox_core::{CapabilitySet, InputSchema, Result, SkillboxError, pin_matches};
use skillbox_registry::{
    DEFAULT_ENTRY, EntryPoint, Registry, SkillManifest, SkillOrigin, compute_checksum,
    is_valid_skill_name,
};
use skillbox_runtime::validator::copy_dir;
use skillbox_runtime::{ValidationReport, Validator};

/// A skill submitted for review.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub name: String,
    pub description: String,
    pub version: String,
    pub caps: CapabilitySet,
    /// Contents of the entry file.
    pub code: Vec<u8>,
    /// Directory copied into the package as `tests/`.
    pub tests: Option<PathBuf>,
    pub interpreter: Option<String>,
    pub inputs: InputSchema,
}

/// Orchestrates `propose → validate → approve` over the pending and approved
/// stores. Every step lands in the audit log.
pub struct ApprovalWorkflow {
    registry: Arc<Registry>,
    validator: Validator,
    audit: AuditLog,
    pending_dir: PathBuf,
    approved_dir: PathBuf,
    master_pin: String,
    require_validation: bool,
}

impl ApprovalWorkflow {
    pub fn new(registry: Arc<Registry>, config: &SkillboxConfig) -> Self {
        Self {
            registry,
            validator: Validator::new(config),
            audit: AuditLog::new(config.skills.audit_log()),
            pending_dir: config.skills.pending_dir(),
            approved_dir: config.skills.approved_dir(),
            master_pin: config.security.master_pin.clone(),
            require_validation: config.approval.require_validation,
        }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn pending_dir(&self) -> &Path {
        &self.pending_dir
    }

    /// Write the proposal into the pending store, replacing any earlier
    /// proposal of the same name. Returns the package directory.
    pub fn propose(&self, proposal: Proposal, actor: &str) -> Result<PathBuf> {
        if !is_valid_skill_name(&proposal.name) {
            return Err(SkillboxError::Proposal(format!(
                "invalid skill name '{}'",
                proposal.name
            )));
        }
        if proposal.code.is_empty() {
            return Err(SkillboxError::Proposal(format!(
                "proposal '{}' has no code",
                proposal.name
            )));
        }
        if let Some(tests) = &proposal.tests {
            if !tests.is_dir() {
                return Err(SkillboxError::Proposal(format!(
                    "tests directory {} does not exist",
                    tests.display()
                )));
            }
        }

        let checksum = compute_checksum(&proposal.code);
        let manifest = SkillManifest {
            name: proposal.name.clone(),
            version: proposal.version.clone(),
            caps: proposal.caps.clone(),
            description: proposal.description.clone(),
            checksum: Some(checksum.clone()),
            entry: DEFAULT_ENTRY.to_string(),
            interpreter: proposal.interpreter.clone(),
            inputs: proposal.inputs.clone(),
        };
        manifest.check().map_err(|e| SkillboxError::Proposal(e.to_string()))?;

        if let Some(existing) = self.registry.get(&proposal.name) {
            if existing.origin == SkillOrigin::System {
                warn!(
                    skill = %proposal.name,
                    "proposal shares its name with a system skill and would be shadowed once approved"
                );
            }
        }

        std::fs::create_dir_all(&self.pending_dir)?;
        let staging = self.staging_dir(&self.pending_dir, &proposal.name);
        let result = (|| -> Result<()> {
            std::fs::create_dir_all(&staging)?;
            write_entry(&staging.join(DEFAULT_ENTRY), &proposal.code)?;
            manifest.write(&staging)?;
            if let Some(tests) = &proposal.tests {
                copy_dir(tests, &staging.join("tests"))?;
            }
            replace_dir(&staging, &self.pending_dir.join(&proposal.name))
        })();
        if let Err(e) = result {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }

        let target = self.pending_dir.join(&proposal.name);
        self.audit.record(
            AuditEvent::Propose,
            &proposal.name,
            actor,
            Some(json!({
                "version": manifest.version,
                "caps": manifest.caps,
                "checksum": checksum,
                "has_tests": proposal.tests.is_some(),
            })),
        )?;
        info!(skill = %proposal.name, %actor, path = ?target, "skill proposed");
        Ok(target)
    }

    /// Run the validator against the pending copy. Leaves both stores alone.
    pub async fn validate(&self, name: &str, actor: &str) -> Result<ValidationReport> {
        let report = self.validator.validate(name).await?;
        let checksum = self.pending_checksum(name);
        self.audit.record(
            AuditEvent::Validate,
            name,
            actor,
            Some(json!({
                "ok": report.ok,
                "message": report.message,
                "checksum": checksum,
            })),
        )?;
        Ok(report)
    }

    /// Promote `name` from pending to approved and reload the registry.
    ///
    /// Refused unless `pin` matches the master PIN and, when required, the
    /// latest validation of this exact proposal passed.
    pub fn approve(&self, name: &str, pin: &str, actor: &str) -> Result<PathBuf> {
        if !pin_matches(Some(pin), &self.master_pin) {
            self.deny(name, actor, "invalid PIN")?;
            return Err(SkillboxError::AuthorizationRequired(format!(
                "approving '{name}' needs the master PIN"
            )));
        }
        if !is_valid_skill_name(name) {
            return Err(SkillboxError::Proposal(format!("invalid skill name '{name}'")));
        }

        let pending = self.pending_dir.join(name);
        if !pending.is_dir() {
            self.deny(name, actor, "no pending proposal")?;
            return Err(SkillboxError::Proposal(format!(
                "no pending skill named '{name}'"
            )));
        }

        let manifest = SkillManifest::load(&pending)?;
        let EntryPoint::File(entry) = manifest.entry_point()? else {
            self.deny(name, actor, "proposals cannot use builtin entries")?;
            return Err(SkillboxError::Proposal(format!(
                "pending '{name}' points at a builtin entry"
            )));
        };
        let code = std::fs::read(pending.join(entry))?;
        if let Err(e) = manifest.verify_checksum(&code) {
            self.deny(name, actor, "pending code changed after proposal")?;
            return Err(e);
        }

        if self.require_validation {
            if let Err(reason) = self.check_validated(name, manifest.checksum.as_deref()) {
                self.deny(name, actor, &reason)?;
                return Err(SkillboxError::Validation(reason));
            }
        }

        std::fs::create_dir_all(&self.approved_dir)?;
        let staging = self.staging_dir(&self.approved_dir, name);
        let target = self.approved_dir.join(name);
        if let Err(e) = copy_dir(&pending, &staging).and_then(|()| replace_dir(&staging, &target)) {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }

        let loaded = self.registry.load_all();
        match self.registry.get(name) {
            Some(skill) if skill.origin == SkillOrigin::Approved => {}
            Some(_) => warn!(skill = %name, "approved skill is shadowed by a system skill"),
            None => warn!(skill = %name, "approved skill failed to load, see earlier warnings"),
        }

        self.audit.record(
            AuditEvent::Approve,
            name,
            actor,
            Some(json!({
                "version": manifest.version,
                "checksum": manifest.checksum,
                "registered": loaded,
            })),
        )?;
        info!(skill = %name, %actor, "skill approved");
        Ok(target)
    }

    /// The latest validation after the latest proposal must have passed for
    /// the same code.
    fn check_validated(&self, name: &str, checksum: Option<&str>) -> std::result::Result<(), String> {
        let history = self.audit.history(name).map_err(|e| e.to_string())?;
        let since_proposal = history
            .iter()
            .rposition(|e| e.event == AuditEvent::Propose)
            .map_or(&history[..], |i| &history[i + 1..]);
        let Some(last) = since_proposal
            .iter()
            .rev()
            .find(|e| e.event == AuditEvent::Validate)
        else {
            return Err(format!("skill '{name}' has not been validated"));
        };
        if last.detail_field("ok").and_then(|v| v.as_bool()) != Some(true) {
            return Err(format!("latest validation of '{name}' failed"));
        }
        if last.detail_field("checksum").and_then(|v| v.as_str()) != checksum {
            return Err(format!("'{name}' changed since it was validated"));
        }
        Ok(())
    }

    fn deny(&self, name: &str, actor: &str, reason: &str) -> Result<()> {
        warn!(skill = %name, %actor, %reason, "approval denied");
        self.audit
            .record(AuditEvent::ApproveDenied, name, actor, Some(json!({ "reason": reason })))?;
        Ok(())
    }

    fn pending_checksum(&self, name: &str) -> Option<String> {
        if !is_valid_skill_name(name) {
            return None;
        }
        SkillManifest::load(&self.pending_dir.join(name))
            .ok()
            .and_then(|m| m.checksum)
    }

    fn staging_dir(&self, parent: &Path, name: &str) -> PathBuf {
        parent.join(format!(".{name}.staging-{}", Uuid::new_v4().simple()))
    }
}

/// Swap `staging` into place at `target`, discarding any previous `target`.
fn replace_dir(staging: &Path, target: &Path) -> Result<()> {
    if target.exists() {
        std::fs::remove_dir_all(target)?;
    }
    std::fs::rename(staging, target)?;
    Ok(())
}

fn write_entry(path: &Path, code: &[u8]) -> Result<()> {
    std::fs::write(path, code)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}
