use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Component, Path};
use tracing::debug;

use skillbox_core::{Capability, CapabilitySet, Result, Skill, SkillContext, SkillOutputs};

/// Writes a text file into the tenant working directory.
pub struct WorkdirWriteSkill;

#[derive(Debug, Deserialize)]
pub struct WorkdirWriteInput {
    /// Plain file name; no directories.
    pub filename: String,
    pub content: String,
    #[serde(default)]
    pub append: bool,
}

#[async_trait]
impl Skill for WorkdirWriteSkill {
    type Input = WorkdirWriteInput;

    fn name(&self) -> &str {
        "workdir_write"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::from([Capability::FsWrite])
    }

    async fn run(&self, ctx: &SkillContext, input: WorkdirWriteInput) -> Result<SkillOutputs> {
        let name = Path::new(&input.filename);
        let mut parts = name.components();
        let single = matches!(
            (parts.next(), parts.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single {
            return Ok(SkillOutputs::failure(format!(
                "filename '{}' must be a plain name inside the working directory",
                input.filename
            )));
        }

        let path = ctx.workdir.join(name);
        if input.append {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(input.content.as_bytes()).await?;
        } else {
            tokio::fs::write(&path, input.content.as_bytes()).await?;
        }
        debug!(trace_id = %ctx.trace_id, ?path, "wrote workdir file");

        Ok(SkillOutputs::success()
            .with_message(format!("wrote {}", input.filename))
            .with_data("bytes", input.content.len())
            .with_artifact("file", path.display().to_string()))
    }
}
