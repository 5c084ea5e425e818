use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::preflight::preflight;
use crate::sandbox::{
    InvocationPayload, RunnerSettings, SANDBOX_RUN, resolve_runner, runner_command,
    set_network_flag,
};
use skillbox_config::{SandboxMode, SkillboxConfig};
use skillbox_core::process::{tail, truncate};
use skillbox_core::{
    Capability, DIAGNOSTIC_LIMIT, ProcessOutcome, Result, STDERR_EXCERPT, SkillContext,
    SkillOutputs, SkillboxError, run_with_timeout,
};
use skillbox_registry::Registry;

/// Executes registered skills under the isolation model.
///
/// Every expected failure comes back as `ok = false`; `Err` is reserved for
/// host problems such as an uncreatable working directory or a runner that
/// cannot be spawned.
pub struct Runtime {
    registry: Arc<Registry>,
    mode: SandboxMode,
    timeout: Duration,
    scratch_root: PathBuf,
    master_pin: String,
    runner: String,
    runner_settings: RunnerSettings,
}

impl Runtime {
    pub fn new(registry: Arc<Registry>, config: &SkillboxConfig) -> Result<Self> {
        let mode = config.runtime.mode().map_err(SkillboxError::Config)?;
        Ok(Self {
            registry,
            mode,
            timeout: Duration::from_secs(config.runtime.timeout_secs),
            scratch_root: config.runtime.scratch_root.clone(),
            master_pin: config.security.master_pin.clone(),
            runner: config.runtime.runner.clone(),
            runner_settings: RunnerSettings::from_config(config),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn mode(&self) -> SandboxMode {
        self.mode
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Create (if needed) and return the working directory for `account_id`.
    ///
    /// `Ok(None)` when the id cannot name a directory of its own, so one
    /// tenant can never address another's directory or the scratch root.
    pub fn tenant_workdir(&self, account_id: &str) -> Result<Option<PathBuf>> {
        if !is_valid_account_id(account_id) {
            return Ok(None);
        }
        let dir = self.scratch_root.join(account_id);
        std::fs::create_dir_all(&dir)?;
        Ok(Some(std::fs::canonicalize(&dir)?))
    }

    /// Run `name` for `account_id` with `args`.
    pub async fn run_skill(
        &self,
        name: &str,
        account_id: &str,
        args: Value,
        caps_token: Option<&str>,
    ) -> Result<SkillOutputs> {
        let Some(workdir) = self.tenant_workdir(account_id)? else {
            return Ok(SkillOutputs::failure(format!(
                "invalid account id '{account_id}'"
            )));
        };
        let ctx = SkillContext::new(account_id, &workdir, caps_token.map(String::from));
        debug!(skill = %name, trace_id = %ctx.trace_id, mode = %self.mode, "dispatching skill");

        let outputs = match self.mode {
            SandboxMode::Inproc => self.run_inproc(name, ctx.clone(), args).await,
            SandboxMode::Subprocess => self.run_subprocess(name, &ctx, args).await?,
        };

        if outputs.ok {
            info!(skill = %name, trace_id = %ctx.trace_id, "skill succeeded");
        } else {
            warn!(
                skill = %name,
                trace_id = %ctx.trace_id,
                message = outputs.message.as_deref().unwrap_or(""),
                "skill failed"
            );
        }
        Ok(outputs)
    }

    async fn run_inproc(&self, name: &str, ctx: SkillContext, args: Value) -> SkillOutputs {
        let token = ctx.caps_token.clone();
        let registered = match preflight(&self.registry, name, &args, token.as_deref(), &self.master_pin)
        {
            Ok(skill) => skill,
            Err(message) => return SkillOutputs::failure(message),
        };

        let skill = registered.skill();
        let task = tokio::spawn(async move { skill.invoke(&ctx, args).await });
        let abort = task.abort_handle();
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(outputs)) => outputs,
            Ok(Err(join)) if join.is_panic() => {
                SkillOutputs::failure(format!("skill '{name}' panicked"))
            }
            Ok(Err(join)) => SkillOutputs::failure(format!("skill '{name}' was cancelled: {join}")),
            Err(_) => {
                abort.abort();
                SkillOutputs::failure(format!(
                    "Skill timed out after {}s",
                    self.timeout.as_secs()
                ))
            }
        }
    }

    async fn run_subprocess(
        &self,
        name: &str,
        ctx: &SkillContext,
        args: Value,
    ) -> Result<SkillOutputs> {
        // Pick up anything approved since the last load.
        self.registry.load_all();
        let registered = match preflight(
            &self.registry,
            name,
            &args,
            ctx.caps_token.as_deref(),
            &self.master_pin,
        ) {
            Ok(skill) => skill,
            Err(message) => return Ok(SkillOutputs::failure(message)),
        };

        let payload = serde_json::to_vec(&InvocationPayload {
            name: name.to_string(),
            ctx: ctx.clone(),
            args,
            caps_token: ctx.caps_token.clone(),
        })?;

        let runner = resolve_runner(&self.runner)?;
        let mut cmd = runner_command(&runner, SANDBOX_RUN);
        self.runner_settings.export(&mut cmd);
        set_network_flag(&mut cmd, registered.manifest.caps.contains(&Capability::Net));
        cmd.current_dir(&ctx.workdir);

        debug!(
            skill = %registered.qualified_id(),
            trace_id = %ctx.trace_id,
            runner = ?runner,
            "spawning sandbox runner"
        );
        let out = match run_with_timeout(cmd, Some(&payload), self.timeout).await? {
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
                "Sandbox runner exited with {code}: {}",
                tail(out.stderr.trim(), STDERR_EXCERPT)
            )));
        }

        Ok(serde_json::from_str::<SkillOutputs>(out.stdout.trim()).unwrap_or_else(|e| {
            SkillOutputs::failure(format!(
                "Sandbox runner returned invalid JSON ({e}). stdout: {} stderr: {}",
                truncate(out.stdout.trim(), DIAGNOSTIC_LIMIT),
                tail(out.stderr.trim(), STDERR_EXCERPT)
            ))
        }))
    }
}

/// Account ids become a single directory name under the scratch root.
pub fn is_valid_account_id(account_id: &str) -> bool {
    !account_id.is_empty()
        && account_id.len() <= 128
        && account_id != "."
        && account_id != ".."
        && account_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '@'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_ids() {
        assert!(is_valid_account_id("acct1"));
        assert!(is_valid_account_id("user@example.com"));
        for bad in ["", ".", "..", "../b", "a/b", "a b", "a\0b"] {
            assert!(!is_valid_account_id(bad), "{bad:?} accepted");
        }
        assert!(!is_valid_account_id(&"a".repeat(129)));
    }
}
