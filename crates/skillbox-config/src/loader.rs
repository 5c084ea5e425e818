use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::SkillboxConfig;
use skillbox_core::{Result, SkillboxError};

/// Env var naming the config file.
pub const CONFIG_ENV: &str = "SKILLBOX_CONFIG";

/// Loads and reloads the skillbox configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<SkillboxConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > SKILLBOX_CONFIG env > ~/.skillbox/skillbox.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".skillbox")
            .join("skillbox.toml")
    }

    /// Load the config from disk, falling back to defaults when the file is absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::read_file(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            SkillboxConfig::default()
        };

        let config = Self::apply_env_overrides(config);
        Self::check(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Wrap an already-built config (tests, embedding hosts).
    pub fn from_config(config: SkillboxConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            config_path: PathBuf::new(),
        }
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> SkillboxConfig {
        self.config.read().clone()
    }

    /// Get a shared handle for components that follow reloads.
    pub fn shared(&self) -> Arc<RwLock<SkillboxConfig>> {
        Arc::clone(&self.config)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Reload the config from disk. The current config is kept on any error.
    pub fn reload(&self) -> Result<()> {
        if !self.config_path.exists() {
            return Err(SkillboxError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let new_config = Self::apply_env_overrides(Self::read_file(&self.config_path)?);
        Self::check(&new_config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }

    fn read_file(path: &Path) -> Result<SkillboxConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<SkillboxConfig>(&raw).map_err(|e| {
            SkillboxError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    fn check(config: &SkillboxConfig) -> Result<()> {
        let warnings = config.validate().map_err(SkillboxError::Config)?;
        for w in &warnings {
            warn!("{}", w);
        }
        Ok(())
    }

    /// Apply SKILLBOX_* environment overrides.
    pub fn apply_env_overrides(config: SkillboxConfig) -> SkillboxConfig {
        Self::apply_overrides_from(config, |key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup, so callers can inject a map.
    pub fn apply_overrides_from(
        mut config: SkillboxConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> SkillboxConfig {
        if let Some(v) = lookup("SKILLBOX_SANDBOX_MODE") {
            config.runtime.sandbox_mode = v.trim().to_ascii_lowercase();
        }
        if let Some(v) = lookup("SKILLBOX_SKILL_TIMEOUT") {
            match v.trim().parse::<u64>() {
                Ok(secs) => config.runtime.timeout_secs = secs,
                Err(_) => warn!(value = %v, "ignoring non-numeric SKILLBOX_SKILL_TIMEOUT"),
            }
        }
        if let Some(v) = lookup("SKILLBOX_MASTER_PIN") {
            config.security.master_pin = v;
        }
        if let Some(v) = lookup("SKILLBOX_SYSTEM_DIR") {
            config.skills.system_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SKILLBOX_STORE_DIR") {
            config.skills.store_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SKILLBOX_SCRATCH_ROOT") {
            config.runtime.scratch_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("SKILLBOX_LOG_LEVEL") {
            config.logging.level = v;
        }
        config
    }
}
