use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::capability::CapabilitySet;

/// Environment flag set on child processes whose skill lacks the `net` capability.
pub const NO_NET_ENV: &str = "SKILLBOX_NO_NET";

/// Per-invocation execution environment handed to a skill.
///
/// Built fresh for every call and never reused.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillContext {
    /// Calling account; the tenant key for working-directory isolation.
    pub account_id: String,
    /// Absolute tenant-scoped directory, the only place a skill may write.
    pub workdir: PathBuf,
    /// Correlates logs and errors for this invocation.
    pub trace_id: String,
    /// Capability token (the PIN) presented by the caller.
    #[serde(default)]
    pub caps_token: Option<String>,
}

impl SkillContext {
    pub fn new(account_id: impl Into<String>, workdir: &Path, caps_token: Option<String>) -> Self {
        Self {
            account_id: account_id.into(),
            workdir: workdir.to_path_buf(),
            trace_id: Uuid::new_v4().to_string(),
            caps_token,
        }
    }

    /// Copy of this context with the capability token removed, for handing to
    /// code that must never see the secret.
    pub fn without_token(&self) -> Self {
        Self {
            caps_token: None,
            ..self.clone()
        }
    }

    /// Whether outbound network calls are permitted in this process.
    ///
    /// Skills check this before making any outbound call.
    pub fn network_allowed(&self) -> bool {
        std::env::var(NO_NET_ENV).map_or(true, |v| v != "1")
    }
}

impl fmt::Debug for SkillContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkillContext")
            .field("account_id", &self.account_id)
            .field("workdir", &self.workdir)
            .field("trace_id", &self.trace_id)
            .field("caps_token", &self.caps_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Normalized result of every skill invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillOutputs {
    #[serde(default = "default_ok")]
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Map<String, Value>>,
    /// Named side-effect outputs such as file paths or URLs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<BTreeMap<String, String>>,
}

fn default_ok() -> bool {
    true
}

impl Default for SkillOutputs {
    fn default() -> Self {
        Self::success()
    }
}

impl SkillOutputs {
    pub fn success() -> Self {
        Self {
            ok: true,
            message: None,
            data: None,
            artifacts: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
            data: None,
            artifacts: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_artifact(mut self, key: impl Into<String>, location: impl Into<String>) -> Self {
        self.artifacts
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), location.into());
        self
    }
}

/// Identity of a skill implementation: what it calls itself and what it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillDescriptor {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub caps: CapabilitySet,
}

/// A concrete skill with a typed input contract.
///
/// `run` must be a function of its arguments plus whatever it does inside
/// `ctx.workdir`; it must not lean on ambient global state.
#[async_trait]
pub trait Skill: Send + Sync + 'static {
    type Input: DeserializeOwned + Send + 'static;

    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn capabilities(&self) -> CapabilitySet;

    async fn run(&self, ctx: &SkillContext, input: Self::Input) -> crate::Result<SkillOutputs>;
}

/// Object-safe view of a [`Skill`] used by the registry and runtime.
#[async_trait]
pub trait DynSkill: Send + Sync {
    fn describe(&self) -> SkillDescriptor;

    /// Deserialize `args` into the skill's input type and run it. Never fails:
    /// bad input and skill errors come back as `ok = false`.
    async fn invoke(&self, ctx: &SkillContext, args: Value) -> SkillOutputs;
}

#[async_trait]
impl<S: Skill> DynSkill for S {
    fn describe(&self) -> SkillDescriptor {
        SkillDescriptor {
            name: self.name().to_string(),
            version: self.version().to_string(),
            caps: self.capabilities(),
        }
    }

    async fn invoke(&self, ctx: &SkillContext, args: Value) -> SkillOutputs {
        let input = match serde_json::from_value::<S::Input>(args) {
            Ok(input) => input,
            Err(e) => {
                return SkillOutputs::failure(format!("invalid input for {}: {e}", self.name()));
            }
        };
        match self.run(ctx, input).await {
            Ok(outputs) => outputs,
            Err(e) => SkillOutputs::failure(format!("skill execution error: {e}")),
        }
    }
}
