use serde_json::Value;
use tracing::warn;

use skillbox_core::{pin_matches, SkillboxError};
use skillbox_registry::{RegisteredSkill, Registry};

/// Every check that must pass before any skill code runs: the skill exists,
/// is enabled, is authorized, and `args` satisfy its declared inputs.
///
/// In-process dispatch, subprocess dispatch, and the sandbox runner all go
/// through here, so both sides of the process boundary enforce the same rules.
/// The error is the caller-facing failure message.
pub fn preflight(
    registry: &Registry,
    name: &str,
    args: &Value,
    caps_token: Option<&str>,
    master_pin: &str,
) -> Result<RegisteredSkill, String> {
    let skill = registry
        .get(name)
        .ok_or_else(|| SkillboxError::SkillNotFound(name.to_string()).to_string())?;

    if !skill.enabled {
        return Err(format!("skill '{name}' is disabled"));
    }

    if skill.requires_pin() && !pin_matches(caps_token, master_pin) {
        let dangerous: Vec<&str> = skill
            .manifest
            .caps
            .iter()
            .filter(|c| c.is_dangerous())
            .map(|c| c.as_str())
            .collect();
        warn!(skill = %name, caps = ?dangerous, "refusing dangerous skill without a valid capability token");
        return Err(SkillboxError::AuthorizationRequired(format!(
            "skill '{name}' uses {} and needs the master PIN",
            dangerous.join(", ")
        ))
        .to_string());
    }

    check_inputs(&skill, args)?;
    Ok(skill)
}

/// Validate `args` against the manifest's input schema.
pub fn check_inputs(skill: &RegisteredSkill, args: &Value) -> Result<(), String> {
    skill.manifest.inputs.validate(args).map_err(|reason| {
        SkillboxError::InvalidInput {
            skill: skill.manifest.name.clone(),
            reason,
        }
        .to_string()
    })
}
