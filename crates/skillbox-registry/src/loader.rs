use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::catalog::SkillCatalog;
use crate::manifest::{EntryPoint, SkillManifest};
use crate::process_skill::ProcessSkill;
use skillbox_core::{DynSkill, Result, SkillDescriptor, SkillboxError};

/// A package that passed every load-time check.
pub struct LoadedPackage {
    pub manifest: SkillManifest,
    pub dir: PathBuf,
    pub skill: Arc<dyn DynSkill>,
    /// Set for process skills; builtins carry no separate process to ask.
    pub process: Option<ProcessSkill>,
}

/// Load the package at `dir`: parse and check the manifest, resolve the
/// entry point, verify the checksum, and check the implementation matches
/// what the manifest declares.
pub fn load_package(
    dir: &Path,
    catalog: &SkillCatalog,
    process_timeout: Duration,
) -> Result<LoadedPackage> {
    let manifest = SkillManifest::load(dir)?;
    manifest.check()?;

    match manifest.entry_point()? {
        EntryPoint::Builtin(id) => {
            let skill = catalog.get(&id).ok_or_else(|| SkillboxError::SkillLoad {
                skill: manifest.name.clone(),
                reason: format!("no builtin skill with id '{id}'"),
            })?;
            check_descriptor(&manifest, &skill.describe())?;
            Ok(LoadedPackage {
                manifest,
                dir: dir.to_path_buf(),
                skill,
                process: None,
            })
        }
        EntryPoint::File(rel) => {
            let path = dir.join(&rel);
            if !path.is_file() {
                return Err(SkillboxError::SkillLoad {
                    skill: manifest.name.clone(),
                    reason: format!("entry file {} not found", path.display()),
                });
            }
            let code = std::fs::read(&path)?;
            manifest.verify_checksum(&code)?;
            if manifest.interpreter.is_none() && !is_executable(&path) {
                return Err(SkillboxError::SkillLoad {
                    skill: manifest.name.clone(),
                    reason: format!(
                        "entry file {} is not executable and no interpreter is set",
                        path.display()
                    ),
                });
            }

            let dir = std::fs::canonicalize(dir)?;
            let program = std::fs::canonicalize(&path)?;
            debug!(skill = %manifest.name, ?program, "resolved process skill");
            let process = ProcessSkill::new(
                manifest.name.clone(),
                manifest.version.clone(),
                manifest.caps.clone(),
                program,
                manifest.interpreter.clone(),
                dir.clone(),
                process_timeout,
            )
            .with_checksum(manifest.checksum.clone());
            Ok(LoadedPackage {
                manifest,
                dir,
                skill: Arc::new(process.clone()),
                process: Some(process),
            })
        }
    }
}

/// Load a package and ask its implementation to identify itself.
///
/// Process skills are spawned with `{"op": "describe"}`; nothing from the
/// package runs inside the calling process.
pub async fn probe_package(
    dir: &Path,
    catalog: &SkillCatalog,
    timeout: Duration,
) -> Result<SkillDescriptor> {
    let package = load_package(dir, catalog, timeout)?;
    let descriptor = match &package.process {
        Some(process) => process.describe_process().await?,
        None => package.skill.describe(),
    };
    check_descriptor(&package.manifest, &descriptor)?;
    Ok(descriptor)
}

/// The implementation must answer to the manifest's name and may not use
/// capabilities the manifest does not declare.
fn check_descriptor(manifest: &SkillManifest, descriptor: &SkillDescriptor) -> Result<()> {
    if descriptor.name != manifest.name {
        return Err(SkillboxError::SkillLoad {
            skill: manifest.name.clone(),
            reason: format!(
                "implementation is named '{}' but the manifest says '{}'",
                descriptor.name, manifest.name
            ),
        });
    }
    let undeclared: Vec<String> = descriptor
        .caps
        .difference(&manifest.caps)
        .map(ToString::to_string)
        .collect();
    if !undeclared.is_empty() {
        return Err(SkillboxError::SkillLoad {
            skill: manifest.name.clone(),
            reason: format!(
                "implementation uses undeclared capabilities: {}",
                undeclared.join(", ")
            ),
        });
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|m| m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}
