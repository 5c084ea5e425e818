//! The sandbox runner: the child-process side of subprocess dispatch.
//!
//! The parent spawns the runner executable with [`SANDBOX_RUN`], writes one
//! [`InvocationPayload`] to its stdin and reads one `SkillOutputs` document
//! from its stdout. Everything the runner needs beyond the payload arrives
//! through the environment variables named here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::preflight::preflight;
use skillbox_config::SkillboxConfig;
use skillbox_core::{Result, SkillContext, SkillOutputs, SkillboxError, NO_NET_ENV};
use skillbox_registry::{load_package, Registry, SkillCatalog, SAFE_ENV_VARS};

/// Subcommand that executes one invocation payload.
pub const SANDBOX_RUN: &str = "sandbox-run";
/// Subcommand that loads a package and asks it to describe itself.
pub const SANDBOX_PROBE: &str = "sandbox-probe";
/// Subcommand that runs a package's `tests/test_*.json` cases.
pub const SANDBOX_TEST: &str = "sandbox-test";

pub const ENV_SYSTEM_DIR: &str = "SKILLBOX_SYSTEM_DIR";
pub const ENV_STORE_DIR: &str = "SKILLBOX_STORE_DIR";
pub const ENV_MASTER_PIN: &str = "SKILLBOX_MASTER_PIN";
pub const ENV_TIMEOUT: &str = "SKILLBOX_SKILL_TIMEOUT";
pub const ENV_RLIMIT_CPU: &str = "SKILLBOX_RLIMIT_CPU";
pub const ENV_RLIMIT_NOFILE: &str = "SKILLBOX_RLIMIT_NOFILE";
pub const ENV_RLIMIT_AS_MB: &str = "SKILLBOX_RLIMIT_AS_MB";
pub const ENV_LOG_LEVEL: &str = "SKILLBOX_LOG_LEVEL";

/// What the parent writes to the runner's stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationPayload {
    pub name: String,
    pub ctx: SkillContext,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub caps_token: Option<String>,
}

/// Everything the runner needs besides the payload.
#[derive(Clone)]
pub struct RunnerSettings {
    pub system_dir: PathBuf,
    pub store_dir: PathBuf,
    pub master_pin: String,
    pub timeout: Duration,
    pub cpu_limit_secs: u64,
    pub max_open_files: u64,
    pub memory_limit_mb: u64,
}

impl std::fmt::Debug for RunnerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerSettings")
            .field("system_dir", &self.system_dir)
            .field("store_dir", &self.store_dir)
            .field("timeout", &self.timeout)
            .field("cpu_limit_secs", &self.cpu_limit_secs)
            .field("max_open_files", &self.max_open_files)
            .field("memory_limit_mb", &self.memory_limit_mb)
            .finish_non_exhaustive()
    }
}

impl RunnerSettings {
    pub fn from_config(config: &SkillboxConfig) -> Self {
        Self {
            system_dir: absolute(&config.skills.system_dir),
            store_dir: absolute(&config.skills.store_dir),
            master_pin: config.security.master_pin.clone(),
            timeout: Duration::from_secs(config.runtime.timeout_secs),
            cpu_limit_secs: config.runtime.cpu_limit_secs,
            max_open_files: config.runtime.max_open_files,
            memory_limit_mb: config.runtime.memory_limit_mb,
        }
    }

    /// Rebuild the settings inside the runner.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let dir = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .ok_or_else(|| SkillboxError::Sandbox(format!("{key} is not set")))
        };
        let number = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                None => Ok(default),
                Some(v) => v
                    .trim()
                    .parse()
                    .map_err(|_| SkillboxError::Sandbox(format!("{key} is not a number: {v}"))),
            }
        };
        Ok(Self {
            system_dir: dir(ENV_SYSTEM_DIR)?,
            store_dir: dir(ENV_STORE_DIR)?,
            master_pin: lookup(ENV_MASTER_PIN).unwrap_or_default(),
            timeout: Duration::from_secs(number(ENV_TIMEOUT, 25)?),
            cpu_limit_secs: number(ENV_RLIMIT_CPU, 0)?,
            max_open_files: number(ENV_RLIMIT_NOFILE, 0)?,
            memory_limit_mb: number(ENV_RLIMIT_AS_MB, 0)?,
        })
    }

    /// Hand these settings to a runner child through its environment.
    pub fn export(&self, cmd: &mut Command) {
        cmd.env(ENV_SYSTEM_DIR, &self.system_dir)
            .env(ENV_STORE_DIR, &self.store_dir)
            .env(ENV_MASTER_PIN, &self.master_pin)
            .env(ENV_TIMEOUT, self.timeout.as_secs().to_string())
            .env(ENV_RLIMIT_CPU, self.cpu_limit_secs.to_string())
            .env(ENV_RLIMIT_NOFILE, self.max_open_files.to_string())
            .env(ENV_RLIMIT_AS_MB, self.memory_limit_mb.to_string());
    }

    /// The registry the runner dispatches through, mirroring the parent's.
    pub fn registry(&self, catalog: Arc<SkillCatalog>) -> Registry {
        Registry::new(&self.system_dir, &self.store_dir.join("approved"), catalog)
            .with_disabled_file(self.store_dir.join("disabled.json"))
            .with_process_timeout(self.timeout)
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// The runner executable: `configured` when set, otherwise this executable.
pub fn resolve_runner(configured: &str) -> Result<PathBuf> {
    if !configured.trim().is_empty() {
        return Ok(PathBuf::from(configured.trim()));
    }
    std::env::current_exe().map_err(|e| {
        SkillboxError::Sandbox(format!("cannot locate the sandbox runner executable: {e}"))
    })
}

/// A runner command with a scrubbed environment: only the safe host
/// variables plus the log level survive.
pub fn runner_command(runner: &Path, subcommand: &str) -> Command {
    let mut cmd = Command::new(runner);
    cmd.arg(subcommand).env_clear();
    for var in SAFE_ENV_VARS.iter().copied().chain([ENV_LOG_LEVEL, "RUST_LOG"]) {
        if let Ok(value) = std::env::var(var) {
            cmd.env(var, value);
        }
    }
    cmd
}

// ── Resource limits ────────────────────────────────────────────

/// Lower this process's CPU, open-file, and address-space limits. Zero
/// leaves a limit untouched. Children inherit the result.
#[cfg(unix)]
pub fn apply_rlimits(settings: &RunnerSettings) -> Result<()> {
    macro_rules! lower {
        ($resource:expr, $value:expr, $label:literal) => {{
            let mut current = libc::rlimit {
                rlim_cur: 0,
                rlim_max: 0,
            };
            // SAFETY: getrlimit/setrlimit only read and write the struct passed in.
            if unsafe { libc::getrlimit($resource, &mut current) } != 0 {
                return Err(SkillboxError::Sandbox(format!(
                    "getrlimit({}) failed: {}",
                    $label,
                    std::io::Error::last_os_error()
                )));
            }
            let target = ($value as libc::rlim_t).min(current.rlim_max);
            let limit = libc::rlimit {
                rlim_cur: target,
                rlim_max: target,
            };
            if unsafe { libc::setrlimit($resource, &limit) } != 0 {
                return Err(SkillboxError::Sandbox(format!(
                    "setrlimit({}) failed: {}",
                    $label,
                    std::io::Error::last_os_error()
                )));
            }
            debug!(limit = $label, value = %target, "applied rlimit");
        }};
    }

    if settings.cpu_limit_secs > 0 {
        lower!(libc::RLIMIT_CPU, settings.cpu_limit_secs, "RLIMIT_CPU");
    }
    if settings.max_open_files > 0 {
        lower!(libc::RLIMIT_NOFILE, settings.max_open_files, "RLIMIT_NOFILE");
    }
    if settings.memory_limit_mb > 0 {
        lower!(
            libc::RLIMIT_AS,
            settings.memory_limit_mb.saturating_mul(1024 * 1024),
            "RLIMIT_AS"
        );
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn apply_rlimits(_settings: &RunnerSettings) -> Result<()> {
    Ok(())
}

// ── sandbox-run ────────────────────────────────────────────────

/// Read one payload from `input` and execute it.
///
/// `Err` only for a malformed payload or a host-level failure; every skill
/// failure comes back as `ok = false`.
pub async fn run_from_reader<R: AsyncRead + Unpin>(
    mut input: R,
    settings: &RunnerSettings,
    catalog: Arc<SkillCatalog>,
) -> Result<SkillOutputs> {
    let mut raw = String::new();
    input.read_to_string(&mut raw).await?;
    let payload: InvocationPayload = serde_json::from_str(&raw)
        .map_err(|e| SkillboxError::Sandbox(format!("malformed invocation payload: {e}")))?;
    run_payload(payload, settings, catalog).await
}

/// Rebuild the registry, re-run the preflight, and invoke the skill here.
pub async fn run_payload(
    payload: InvocationPayload,
    settings: &RunnerSettings,
    catalog: Arc<SkillCatalog>,
) -> Result<SkillOutputs> {
    let registry = settings.registry(catalog);
    registry.load_all();

    let token = payload
        .caps_token
        .as_deref()
        .or(payload.ctx.caps_token.as_deref());
    let skill = match preflight(
        &registry,
        &payload.name,
        &payload.args,
        token,
        &settings.master_pin,
    ) {
        Ok(skill) => skill,
        Err(message) => return Ok(SkillOutputs::failure(message)),
    };

    if !payload.ctx.workdir.is_dir() {
        return Err(SkillboxError::Sandbox(format!(
            "working directory {} does not exist",
            payload.ctx.workdir.display()
        )));
    }

    info!(
        skill = %skill.qualified_id(),
        trace_id = %payload.ctx.trace_id,
        net = payload.ctx.network_allowed(),
        "sandbox runner invoking skill"
    );
    let implementation = skill.skill();
    Ok(implementation.invoke(&payload.ctx, payload.args).await)
}

// ── sandbox-test ───────────────────────────────────────────────

/// One declarative test case from `tests/test_*.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub expect: Expectation,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Expectation {
    /// Expected `ok`; defaults to `true`.
    #[serde(default)]
    pub ok: Option<bool>,
    /// Keys that must appear in `data` with exactly these values.
    #[serde(default)]
    pub data: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    pub message_contains: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CaseFile {
    Many(Vec<TestCase>),
    One(TestCase),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TestReport {
    pub passed: usize,
    pub failed: usize,
    pub failures: Vec<String>,
}

impl TestReport {
    pub fn ok(&self) -> bool {
        self.failed == 0 && self.passed > 0
    }
}

/// Run every case under `<dir>/tests/test_*.json` against the package at
/// `dir`, each in a fresh scratch working directory.
pub async fn run_package_tests(
    dir: &Path,
    catalog: &SkillCatalog,
    timeout: Duration,
) -> Result<TestReport> {
    let package = load_package(dir, catalog, timeout)?;
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir.join("tests"))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("test_") && n.ends_with(".json"))
        })
        .collect();
    files.sort();

    let mut report = TestReport::default();
    for file in files {
        let label = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let raw = std::fs::read_to_string(&file)?;
        let cases = match serde_json::from_str::<CaseFile>(&raw) {
            Ok(CaseFile::Many(cases)) => cases,
            Ok(CaseFile::One(case)) => vec![case],
            Err(e) => {
                report.failed += 1;
                report.failures.push(format!("{label}: unreadable test file: {e}"));
                continue;
            }
        };

        for (i, case) in cases.into_iter().enumerate() {
            let case_label = match &case.name {
                Some(n) => format!("{label}::{n}"),
                None => format!("{label}#{i}"),
            };
            let work = tempfile::tempdir()?;
            let ctx = SkillContext::new("sandbox-test", work.path(), None);
            let outputs = match package.manifest.inputs.validate(&case.args) {
                Err(reason) => SkillOutputs::failure(
                    SkillboxError::InvalidInput {
                        skill: package.manifest.name.clone(),
                        reason,
                    }
                    .to_string(),
                ),
                Ok(()) => match tokio::time::timeout(timeout, package.skill.invoke(&ctx, case.args))
                    .await
                {
                    Ok(out) => out,
                    Err(_) => SkillOutputs::failure(format!(
                        "Skill timed out after {}s",
                        timeout.as_secs()
                    )),
                },
            };

            match check_expectation(&case.expect, &outputs) {
                Ok(()) => report.passed += 1,
                Err(why) => {
                    warn!(case = %case_label, %why, "test case failed");
                    report.failed += 1;
                    report.failures.push(format!("{case_label}: {why}"));
                }
            }
        }
    }

    if report.passed + report.failed == 0 {
        report.failures.push("no test cases found in tests/test_*.json".into());
    }
    Ok(report)
}

fn check_expectation(expect: &Expectation, out: &SkillOutputs) -> std::result::Result<(), String> {
    let want_ok = expect.ok.unwrap_or(true);
    if out.ok != want_ok {
        return Err(format!(
            "expected ok={want_ok}, got ok={} ({})",
            out.ok,
            out.message.as_deref().unwrap_or("no message")
        ));
    }
    if let Some(needle) = &expect.message_contains {
        let message = out.message.as_deref().unwrap_or("");
        if !message.contains(needle.as_str()) {
            return Err(format!("message {message:?} does not contain {needle:?}"));
        }
    }
    if let Some(want) = &expect.data {
        let empty = serde_json::Map::new();
        let got = out.data.as_ref().unwrap_or(&empty);
        for (key, value) in want {
            if got.get(key) != Some(value) {
                return Err(format!(
                    "data.{key}: expected {value}, got {}",
                    got.get(key).map_or("nothing".to_string(), ToString::to_string)
                ));
            }
        }
    }
    Ok(())
}

/// Set or clear the no-network flag on a child command.
pub fn set_network_flag(cmd: &mut Command, net_allowed: bool) {
    if net_allowed {
        cmd.env_remove(NO_NET_ENV);
    } else {
        cmd.env(NO_NET_ENV, "1");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn settings_from_lookup() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_SYSTEM_DIR, "/sys"),
            (ENV_STORE_DIR, "/store"),
            (ENV_TIMEOUT, "9"),
            (ENV_RLIMIT_NOFILE, "64"),
        ]);
        let s = RunnerSettings::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(s.timeout, Duration::from_secs(9));
        assert_eq!(s.max_open_files, 64);
        assert_eq!(s.cpu_limit_secs, 0);
        assert!(s.master_pin.is_empty());
        assert!(!format!("{s:?}").contains("master_pin"));
    }

    #[test]
    fn settings_require_directories() {
        let err = RunnerSettings::from_lookup(|_| None).unwrap_err();
        assert!(err.to_string().contains(ENV_SYSTEM_DIR));
    }

    #[test]
    fn payload_wire_shape() {
        let payload: InvocationPayload = serde_json::from_value(serde_json::json!({
            "name": "echo",
            "ctx": {"account_id": "a", "workdir": "/w", "trace_id": "t", "caps_token": "1"},
            "args": {"text": "hi"},
            "caps_token": "1"
        }))
        .unwrap();
        assert_eq!(payload.name, "echo");
        assert_eq!(payload.caps_token.as_deref(), Some("1"));
        assert_eq!(payload.args["text"], "hi");
    }

    #[test]
    fn expectations() {
        let out = SkillOutputs::success().with_data("echo", "hi");
        assert!(check_expectation(&Expectation::default(), &out).is_ok());

        let want: Expectation = serde_json::from_value(serde_json::json!({
            "data": {"echo": "hi"}
        }))
        .unwrap();
        assert!(check_expectation(&want, &out).is_ok());

        let wrong: Expectation = serde_json::from_value(serde_json::json!({
            "data": {"echo": "bye"}
        }))
        .unwrap();
        assert!(check_expectation(&wrong, &out).is_err());

        let fail: Expectation = serde_json::from_value(serde_json::json!({
            "ok": false, "message_contains": "denied"
        }))
        .unwrap();
        assert!(check_expectation(&fail, &SkillOutputs::failure("access denied")).is_ok());
        assert!(check_expectation(&fail, &out).is_err());
    }
}
