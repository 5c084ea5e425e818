//! Skills implemented as an executable inside the package.
//!
//! Protocol: one JSON request on stdin, one JSON document on stdout.
//!
//! ```json
//! {"op": "run", "name": "echo", "ctx": {...}, "args": {...}}   -> SkillOutputs
//! {"op": "describe"}                                         -> {"name", "version", "caps"}
//! ```

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use skillbox_core::process::{tail, truncate};
use skillbox_core::{
    CapabilitySet, DIAGNOSTIC_LIMIT, NO_NET_ENV, ProcessOutcome, Result, STDERR_EXCERPT, Skill,
    SkillContext, SkillDescriptor, SkillOutputs, SkillboxError, run_with_timeout,
};

use crate::manifest::check_checksum;

/// Host variables a process skill may inherit. Everything else is dropped,
/// secrets included.
pub const SAFE_ENV_VARS: &[&str] = &["PATH", "HOME", "USER", "LANG", "LC_ALL", "TZ", "TMPDIR"];

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Request<'a> {
    Run {
        name: &'a str,
        ctx: SkillContext,
        args: Value,
    },
    Describe,
}

/// A skill whose `run` spawns the package's entry file.
#[derive(Debug, Clone)]
pub struct ProcessSkill {
    name: String,
    version: String,
    caps: CapabilitySet,
    program: PathBuf,
    interpreter: Option<String>,
    package_dir: PathBuf,
    timeout: Duration,
    checksum: Option<String>,
}

impl ProcessSkill {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        caps: CapabilitySet,
        program: PathBuf,
        interpreter: Option<String>,
        package_dir: PathBuf,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            caps,
            program,
            interpreter,
            package_dir,
            timeout,
            checksum: None,
        }
    }

    /// Pin the entry file to `checksum`; every spawn re-hashes it first.
    pub fn with_checksum(mut self, checksum: Option<String>) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Re-hash the entry file against the pinned checksum.
    async fn verify_code(&self) -> Result<()> {
        let Some(expected) = &self.checksum else {
            return Ok(());
        };
        let code = tokio::fs::read(&self.program).await?;
        check_checksum(&self.name, expected, &code)
    }

    fn command(&self, cwd: &Path) -> Command {
        let mut cmd = match &self.interpreter {
            Some(interp) => {
                let mut c = Command::new(interp);
                c.arg(&self.program);
                c
            }
            None => Command::new(&self.program),
        };
        cmd.current_dir(cwd).env_clear();
        for var in SAFE_ENV_VARS {
            if let Ok(value) = std::env::var(var) {
                cmd.env(var, value);
            }
        }
        if let Ok(value) = std::env::var(NO_NET_ENV) {
            cmd.env(NO_NET_ENV, value);
        }
        cmd.env("SKILLBOX_SKILL_DIR", &self.package_dir);
        cmd
    }

    /// Ask the executable to identify itself (`{"op": "describe"}`).
    pub async fn describe_process(&self) -> Result<SkillDescriptor> {
        self.verify_code().await?;
        let request = serde_json::to_vec(&Request::Describe)?;
        let cmd = self.command(&self.package_dir);
        match run_with_timeout(cmd, Some(&request), self.timeout).await? {
            ProcessOutcome::TimedOut { after } => Err(SkillboxError::SkillLoad {
                skill: self.name.clone(),
                reason: format!("describe timed out after {}s", after.as_secs()),
            }),
            ProcessOutcome::Exited(out) if !out.success() => Err(SkillboxError::SkillLoad {
                skill: self.name.clone(),
                reason: format!(
                    "describe exited with {:?}: {}",
                    out.code,
                    tail(out.stderr.trim(), DIAGNOSTIC_LIMIT)
                ),
            }),
            ProcessOutcome::Exited(out) => serde_json::from_str(out.stdout.trim()).map_err(|e| {
                SkillboxError::SkillLoad {
                    skill: self.name.clone(),
                    reason: format!(
                        "describe returned invalid JSON ({e}): {}",
                        truncate(out.stdout.trim(), DIAGNOSTIC_LIMIT)
                    ),
                }
            }),
        }
    }
}

#[async_trait]
impl Skill for ProcessSkill {
    type Input = Value;

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn capabilities(&self) -> CapabilitySet {
        self.caps.clone()
    }

    async fn run(&self, ctx: &SkillContext, args: Value) -> Result<SkillOutputs> {
        if let Err(e) = self.verify_code().await {
            warn!(skill = %self.name, error = %e, "refusing to spawn process skill");
            return Ok(SkillOutputs::failure(format!("Refusing to run: {e}")));
        }
        let request = serde_json::to_vec(&Request::Run {
            name: &self.name,
            ctx: ctx.without_token(),
            args,
        })?;
        debug!(skill = %self.name, trace_id = %ctx.trace_id, program = ?self.program, "running process skill");

        let cmd = self.command(&ctx.workdir);
        let out = match run_with_timeout(cmd, Some(&request), self.timeout).await? {
            ProcessOutcome::TimedOut { after } => {
                return Ok(SkillOutputs::failure(format!(
                    "Skill timed out after {}s",
                    after.as_secs()
                )));
            }
            ProcessOutcome::Exited(out) => out,
        };

        if !out.success() {
            let code = out.code.map_or("signal".to_string(), |c| c.to_string());
            return Ok(SkillOutputs::failure(format!(
                "Skill process exited with {code}: {}",
                tail(out.stderr.trim(), STDERR_EXCERPT)
            )));
        }

        match serde_json::from_str::<SkillOutputs>(out.stdout.trim()) {
            Ok(outputs) => Ok(outputs),
            Err(e) => Ok(SkillOutputs::failure(format!(
                "Skill returned invalid JSON ({e}). stdout: {} stderr: {}",
                truncate(out.stdout.trim(), DIAGNOSTIC_LIMIT),
                tail(out.stderr.trim(), STDERR_EXCERPT)
            ))),
        }
    }
}
