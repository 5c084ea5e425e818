use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Root configuration, maps to `skillbox.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillboxConfig {
    pub skills: SkillsConfig,
    pub runtime: RuntimeConfig,
    pub security: SecurityConfig,
    pub validator: ValidatorConfig,
    pub approval: ApprovalConfig,
    pub logging: LoggingConfig,
}

// ── Skills ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillsConfig {
    /// Bundled, trusted packages. Loaded first.
    pub system_dir: PathBuf,
    /// Holds `approved/`, `pending/`, the audit log and the disabled list.
    pub store_dir: PathBuf,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            system_dir: PathBuf::from("skills/system"),
            store_dir: PathBuf::from("skills_store"),
        }
    }
}

impl SkillsConfig {
    pub fn approved_dir(&self) -> PathBuf {
        self.store_dir.join("approved")
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.store_dir.join("pending")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.store_dir.join("audit.log")
    }

    /// Names switched off with `enable(name, false)`, kept across processes.
    pub fn disabled_file(&self) -> PathBuf {
        self.store_dir.join("disabled.json")
    }
}

// ── Runtime ────────────────────────────────────────────────────

/// Where a skill invocation executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    /// Isolated child process per invocation.
    Subprocess,
    /// Same process as the caller. Trusted skills only.
    Inproc,
}

impl SandboxMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subprocess => "subprocess",
            Self::Inproc => "inproc",
        }
    }
}

impl fmt::Display for SandboxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SandboxMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "subprocess" => Ok(Self::Subprocess),
            "inproc" => Ok(Self::Inproc),
            other => Err(format!(
                "unknown sandbox mode '{other}' (valid: subprocess, inproc)"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// "subprocess" (default) or "inproc".
    pub sandbox_mode: String,
    /// Wall-clock seconds before an invocation is abandoned.
    pub timeout_secs: u64,
    /// Tenant working directories are created under here, one per account.
    pub scratch_root: PathBuf,
    /// Sandbox-runner executable. Empty = the current executable.
    pub runner: String,
    /// RLIMIT_CPU applied inside the runner.
    pub cpu_limit_secs: u64,
    /// RLIMIT_NOFILE applied inside the runner.
    pub max_open_files: u64,
    /// RLIMIT_AS in megabytes. 0 = unlimited.
    pub memory_limit_mb: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            sandbox_mode: "subprocess".into(),
            timeout_secs: 25,
            scratch_root: PathBuf::from("/tmp/skillbox_work"),
            runner: String::new(),
            cpu_limit_secs: 30,
            max_open_files: 256,
            memory_limit_mb: 0,
        }
    }
}

impl RuntimeConfig {
    /// Parsed sandbox mode; `validate()` rejects unknown values up front.
    pub fn mode(&self) -> Result<SandboxMode, String> {
        self.sandbox_mode.parse()
    }
}

// ── Security ───────────────────────────────────────────────────

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Secret that unlocks dangerous skills and approvals.
    /// Empty means both are always refused.
    pub master_pin: String,
}

impl fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("master_pin", &if self.master_pin.is_empty() { "" } else { "****" })
            .finish()
    }
}

// ── Validator ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Disposable per-skill environments live under here.
    pub scratch_dir: PathBuf,
    /// Shell commands that provision `{env}` before anything else runs.
    pub toolchain: Vec<String>,
    /// Runs when the proposal ships `tests/requirements.txt`.
    /// Placeholders: `{env}`, `{requirements}`.
    pub requirements_command: String,
    /// Runs the proposal's test suite. Placeholders: `{runner}`, `{package}`, `{env}`.
    pub test_command: String,
    pub setup_timeout_secs: u64,
    pub smoke_timeout_secs: u64,
    pub test_timeout_secs: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            scratch_dir: PathBuf::from("/tmp/skillbox_validate"),
            toolchain: Vec::new(),
            requirements_command: String::new(),
            test_command: "{runner} sandbox-test {package}".into(),
            setup_timeout_secs: 240,
            smoke_timeout_secs: 60,
            test_timeout_secs: 240,
        }
    }
}

// ── Approval ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Refuse `approve` unless the latest validation of the current proposal passed.
    pub require_validation: bool,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            require_validation: true,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "{tag}: {}: {}", self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, " ({h})")?;
        }
        Ok(())
    }
}

impl SkillboxConfig {
    /// Validate the config and return a list of warnings.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Directories ───
        if self.skills.system_dir.as_os_str().is_empty() {
            warnings.push(ConfigWarning {
                field: "skills.system_dir".into(),
                message: "system skill directory is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 'skills/system'".into()),
            });
        }
        if self.skills.store_dir.as_os_str().is_empty() {
            warnings.push(ConfigWarning {
                field: "skills.store_dir".into(),
                message: "skill store directory is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 'skills_store'".into()),
            });
        }
        if self.runtime.scratch_root.as_os_str().is_empty() {
            warnings.push(ConfigWarning {
                field: "runtime.scratch_root".into(),
                message: "scratch root is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Tenant working directories need a parent, e.g. '/tmp/skillbox_work'".into()),
            });
        }

        // ── Sandbox mode ───
        match self.runtime.mode() {
            Err(e) => warnings.push(ConfigWarning {
                field: "runtime.sandbox_mode".into(),
                message: e,
                severity: WarningSeverity::Error,
                hint: None,
            }),
            Ok(SandboxMode::Inproc) => warnings.push(ConfigWarning {
                field: "runtime.sandbox_mode".into(),
                message: "inproc mode runs skills inside the host process".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Use 'subprocess' unless every approved skill is trusted".into()),
            }),
            Ok(SandboxMode::Subprocess) => {}
        }

        // ── Timeouts ───
        for (field, value) in [
            ("runtime.timeout_secs", self.runtime.timeout_secs),
            ("validator.setup_timeout_secs", self.validator.setup_timeout_secs),
            ("validator.smoke_timeout_secs", self.validator.smoke_timeout_secs),
            ("validator.test_timeout_secs", self.validator.test_timeout_secs),
        ] {
            if value == 0 {
                warnings.push(ConfigWarning {
                    field: field.into(),
                    message: "timeout is 0, every call would time out immediately".into(),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            }
        }
        if self.runtime.cpu_limit_secs > 0 && self.runtime.cpu_limit_secs < self.runtime.timeout_secs {
            warnings.push(ConfigWarning {
                field: "runtime.cpu_limit_secs".into(),
                message: format!(
                    "CPU limit {}s is below the wall-clock timeout {}s",
                    self.runtime.cpu_limit_secs, self.runtime.timeout_secs
                ),
                severity: WarningSeverity::Info,
                hint: Some("CPU-bound skills will be killed by the rlimit first".into()),
            });
        }

        // ── Master PIN ───
        if self.security.master_pin.is_empty() {
            warnings.push(ConfigWarning {
                field: "security.master_pin".into(),
                message: "no master PIN set, dangerous skills and approvals are refused".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set security.master_pin or SKILLBOX_MASTER_PIN".into()),
            });
        }

        // ── Validator ───
        if self.validator.test_command.trim().is_empty() {
            warnings.push(ConfigWarning {
                field: "validator.test_command".into(),
                message: "test command is empty, proposal test suites cannot run".into(),
                severity: WarningSeverity::Error,
                hint: Some("Default: '{runner} sandbox-test {package}'".into()),
            });
        }

        // ── Logging format ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        // ── Logging level ───
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }

    /// Copy safe to print: the master PIN is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.security.master_pin.is_empty() {
            copy.security.master_pin = "****".into();
        }
        copy
    }
}
