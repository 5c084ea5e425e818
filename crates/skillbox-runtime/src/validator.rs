//! Pre-approval checks for a pending skill.
//!
//! Nothing from the proposal is loaded into this process: every stage is a
//! child process with its own timeout, run against a disposable copy.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::sandbox::{
    ENV_MASTER_PIN, ENV_TIMEOUT, SANDBOX_PROBE, resolve_runner, runner_command, set_network_flag,
};
use skillbox_config::SkillboxConfig;
use skillbox_core::process::truncate;
use skillbox_core::{DIAGNOSTIC_LIMIT, ProcessOutcome, Result, run_with_timeout};
use skillbox_registry::is_valid_skill_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Provision,
    Requirements,
    Smoke,
    Tests,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provision => "provision",
            Self::Requirements => "requirements",
            Self::Smoke => "smoke",
            Self::Tests => "tests",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Passed,
    /// Exited non-zero (`code` is `None` when killed by a signal).
    Failed { code: Option<i32> },
    /// Hung past its bound and was killed.
    TimedOut { after_secs: u64 },
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,
    pub status: StageStatus,
    /// Combined stdout and stderr, truncated.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
}

/// Outcome of `validate(name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub name: String,
    pub ok: bool,
    pub message: String,
    pub stages: Vec<StageResult>,
}

impl ValidationReport {
    fn failed(name: &str, message: impl Into<String>, stages: Vec<StageResult>) -> Self {
        Self {
            name: name.to_string(),
            ok: false,
            message: message.into(),
            stages,
        }
    }
}

/// Removes the package copy however validation ends.
struct PackageCopy(PathBuf);

impl Drop for PackageCopy {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = ?self.0, error = %e, "failed to remove sandboxed package copy");
            }
        }
    }
}

pub struct Validator {
    pending_dir: PathBuf,
    scratch_dir: PathBuf,
    toolchain: Vec<String>,
    requirements_command: String,
    test_command: String,
    runner: String,
    setup_timeout: Duration,
    smoke_timeout: Duration,
    test_timeout: Duration,
}

impl Validator {
    pub fn new(config: &SkillboxConfig) -> Self {
        let v = &config.validator;
        Self {
            pending_dir: config.skills.pending_dir(),
            scratch_dir: v.scratch_dir.clone(),
            toolchain: v.toolchain.clone(),
            requirements_command: v.requirements_command.clone(),
            test_command: v.test_command.clone(),
            runner: config.runtime.runner.clone(),
            setup_timeout: Duration::from_secs(v.setup_timeout_secs),
            smoke_timeout: Duration::from_secs(v.smoke_timeout_secs),
            test_timeout: Duration::from_secs(v.test_timeout_secs),
        }
    }

    pub fn pending_dir(&self) -> &Path {
        &self.pending_dir
    }

    /// Validate the pending skill `name`. Stages short-circuit on the first
    /// failure; `Err` only for host problems such as an unwritable scratch dir.
    pub async fn validate(&self, name: &str) -> Result<ValidationReport> {
        if !is_valid_skill_name(name) {
            return Ok(ValidationReport::failed(name, format!("invalid skill name '{name}'"), vec![]));
        }
        let pending = self.pending_dir.join(name);
        if !pending.is_dir() {
            return Ok(ValidationReport::failed(
                name,
                format!("no pending skill named '{name}'"),
                vec![],
            ));
        }
        let pending = std::fs::canonicalize(&pending)?;

        let env = self.scratch_dir.join(name);
        if env.exists() {
            std::fs::remove_dir_all(&env)?;
        }
        std::fs::create_dir_all(&env)?;
        let env = std::fs::canonicalize(&env)?;
        info!(skill = %name, ?env, "validating pending skill");

        let runner = resolve_runner(&self.runner)?;
        let mut stages = Vec::new();

        // ── Provision the isolated environment ───
        for template in &self.toolchain {
            let command = fill(template, &[("env", &env), ("runner", &runner)]);
            let result = self
                .shell_stage(Stage::Provision, &command, &env, self.setup_timeout)
                .await?;
            if let Some(report) = stop_on_failure(name, &mut stages, result) {
                return Ok(report);
            }
        }

        // ── Test-only dependencies ───
        let requirements = pending.join("tests").join("requirements.txt");
        if requirements.is_file() {
            if self.requirements_command.trim().is_empty() {
                warn!(
                    skill = %name,
                    "tests/requirements.txt ignored: validator.requirements_command is not set"
                );
                stages.push(StageResult {
                    stage: Stage::Requirements,
                    status: StageStatus::Skipped {
                        reason: "tests/requirements.txt ignored, no requirements_command configured"
                            .into(),
                    },
                    output: String::new(),
                });
            } else {
                let command = fill(
                    &self.requirements_command,
                    &[("env", &env), ("requirements", &requirements)],
                );
                let result = self
                    .shell_stage(Stage::Requirements, &command, &env, self.setup_timeout)
                    .await?;
                if let Some(report) = stop_on_failure(name, &mut stages, result) {
                    return Ok(report);
                }
            }
        }

        // ── Sandboxed package copy ───
        let package = env.join("package").join(name);
        copy_dir(&pending, &package)?;
        let _cleanup = PackageCopy(package.clone());

        // ── Smoke test: load and describe in a child process ───
        let mut probe = runner_command(&runner, SANDBOX_PROBE);
        probe
            .arg(&package)
            .current_dir(&env)
            .env(ENV_TIMEOUT, self.smoke_timeout.as_secs().to_string());
        set_network_flag(&mut probe, false);
        let result = stage(Stage::Smoke, probe, self.smoke_timeout).await?;
        if let Some(report) = stop_on_failure(name, &mut stages, result) {
            return Ok(report);
        }

        // ── Test suite ───
        if package.join("tests").is_dir() {
            let command = fill(
                &self.test_command,
                &[("runner", &runner), ("package", &package), ("env", &env)],
            );
            let result = self
                .shell_stage(Stage::Tests, &command, &env, self.test_timeout)
                .await?;
            if let Some(report) = stop_on_failure(name, &mut stages, result) {
                return Ok(report);
            }
        } else {
            stages.push(StageResult {
                stage: Stage::Tests,
                status: StageStatus::Skipped {
                    reason: "proposal has no tests/ directory".into(),
                },
                output: String::new(),
            });
        }

        info!(skill = %name, "validation passed");
        Ok(ValidationReport {
            name: name.to_string(),
            ok: true,
            message: format!("skill '{name}' passed validation"),
            stages,
        })
    }

    async fn shell_stage(
        &self,
        which: Stage,
        command: &str,
        env: &Path,
        timeout: Duration,
    ) -> Result<StageResult> {
        debug!(stage = which.as_str(), %command, "running validation stage");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(env).env_remove(ENV_MASTER_PIN);
        set_network_flag(&mut cmd, which != Stage::Tests);
        stage(which, cmd, timeout).await
    }
}

async fn stage(which: Stage, cmd: Command, timeout: Duration) -> Result<StageResult> {
    let result = match run_with_timeout(cmd, None, timeout).await? {
        ProcessOutcome::TimedOut { after } => StageResult {
            stage: which,
            status: StageStatus::TimedOut {
                after_secs: after.as_secs(),
            },
            output: String::new(),
        },
        ProcessOutcome::Exited(out) => {
            let combined = format!("{}\n{}", out.stdout.trim(), out.stderr.trim());
            StageResult {
                stage: which,
                status: if out.success() {
                    StageStatus::Passed
                } else {
                    StageStatus::Failed { code: out.code }
                },
                output: truncate(combined.trim(), DIAGNOSTIC_LIMIT),
            }
        }
    };
    Ok(result)
}

/// Record `result`; if it did not pass, build the failure report.
fn stop_on_failure(
    name: &str,
    stages: &mut Vec<StageResult>,
    result: StageResult,
) -> Option<ValidationReport> {
    let message = match &result.status {
        StageStatus::Passed | StageStatus::Skipped { .. } => None,
        StageStatus::Failed { code } => Some(format!(
            "{} stage failed (exit {}): {}",
            result.stage.as_str(),
            code.map_or("signal".to_string(), |c| c.to_string()),
            result.output
        )),
        StageStatus::TimedOut { after_secs } => Some(format!(
            "{} stage TIMEOUT after {after_secs}s",
            result.stage.as_str()
        )),
    };
    stages.push(result);
    message.map(|m| {
        warn!(skill = %name, "validation failed: {m}");
        ValidationReport::failed(name, m, std::mem::take(stages))
    })
}

/// Substitute `{key}` placeholders with shell-quoted paths.
fn fill(template: &str, values: &[(&str, &Path)]) -> String {
    values.iter().fold(template.to_string(), |acc, (key, path)| {
        acc.replace(&format!("{{{key}}}"), &shell_quote(&path.to_string_lossy()))
    })
}

fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '@' | ':'))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Recursive copy that refuses to follow symlinks out of the package.
pub fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let kind = entry.file_type()?;
        let target = to.join(entry.file_name());
        if kind.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else if kind.is_file() {
            std::fs::copy(entry.path(), &target)?;
        } else {
            debug!(path = ?entry.path(), "skipping non-regular file in package");
        }
    }
    Ok(())
}
