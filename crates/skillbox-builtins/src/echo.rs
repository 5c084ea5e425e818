use async_trait::async_trait;
use serde::Deserialize;

use skillbox_core::{CapabilitySet, Result, Skill, SkillContext, SkillOutputs};

/// Returns its input text. Needs no capabilities.
pub struct EchoSkill;

#[derive(Debug, Deserialize)]
pub struct EchoInput {
    pub text: String,
}

#[async_trait]
impl Skill for EchoSkill {
    type Input = EchoInput;

    fn name(&self) -> &str {
        "echo"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new()
    }

    async fn run(&self, _ctx: &SkillContext, input: EchoInput) -> Result<SkillOutputs> {
        Ok(SkillOutputs::success().with_data("echo", input.text))
    }
}
