use std::path::PathBuf;

use skillbox_approval::{ApprovalWorkflow, AuditEvent, AuditLog, Proposal};
use skillbox_config::SkillboxConfig;
use skillbox_core::{Capability, CapabilitySet, InputSchema, Result, SkillboxError};
use skillbox_runtime::StageStatus;

use super::registry;

pub(super) struct ProposeArgs {
    pub name: String,
    pub code: PathBuf,
    pub version: String,
    pub description: String,
    pub caps: Vec<String>,
    pub interpreter: Option<String>,
    pub tests: Option<PathBuf>,
    pub inputs_json: Option<String>,
}

pub(super) fn cmd_propose(config: &SkillboxConfig, args: ProposeArgs, actor: &str) -> Result<()> {
    let caps = args
        .caps
        .iter()
        .map(|c| c.parse::<Capability>())
        .collect::<std::result::Result<CapabilitySet, _>>()
        .map_err(SkillboxError::Proposal)?;
    let inputs = match args.inputs_json {
        Some(raw) => serde_json::from_str::<InputSchema>(&raw)
            .map_err(|e| SkillboxError::Proposal(format!("invalid --inputs-json: {e}")))?,
        None => InputSchema::default(),
    };
    let code = std::fs::read(&args.code).map_err(|e| {
        SkillboxError::Proposal(format!("cannot read {}: {e}", args.code.display()))
    })?;

    let workflow = ApprovalWorkflow::new(registry(config), config);
    let path = workflow.propose(
        Proposal {
            name: args.name.clone(),
            description: args.description,
            version: args.version,
            caps,
            code,
            tests: args.tests,
            interpreter: args.interpreter,
            inputs,
        },
        actor,
    )?;
    println!("Proposed '{}' at {}", args.name, path.display());
    println!("  Next: skillbox validate {}", args.name);
    Ok(())
}

pub(super) async fn cmd_validate(
    config: &SkillboxConfig,
    name: &str,
    json: bool,
    actor: &str,
) -> Result<()> {
    let workflow = ApprovalWorkflow::new(registry(config), config);
    let report = workflow.validate(name, actor).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for stage in &report.stages {
            let status = match &stage.status {
                StageStatus::Passed => "\x1b[32mpassed\x1b[0m".to_string(),
                StageStatus::Failed { code } => format!(
                    "\x1b[31mfailed\x1b[0m (exit {})",
                    code.map_or("signal".to_string(), |c| c.to_string())
                ),
                StageStatus::TimedOut { after_secs } => {
                    format!("\x1b[31mTIMEOUT\x1b[0m after {after_secs}s")
                }
                StageStatus::Skipped { reason } => format!("\x1b[90mskipped\x1b[0m ({reason})"),
            };
            println!("  {:<13} {status}", stage.stage.as_str());
        }
        println!("{}", report.message);
    }

    if report.ok {
        Ok(())
    } else {
        Err(SkillboxError::Validation(report.message))
    }
}

pub(super) fn cmd_approve(config: &SkillboxConfig, name: &str, pin: &str, actor: &str) -> Result<()> {
    let workflow = ApprovalWorkflow::new(registry(config), config);
    let path = workflow.approve(name, pin, actor)?;
    println!("Approved '{name}', installed at {}", path.display());
    Ok(())
}

pub(super) fn cmd_audit(config: &SkillboxConfig, limit: usize, json: bool) -> Result<()> {
    let log = AuditLog::new(config.skills.audit_log());
    let entries = log.read_recent(limit)?;

    if json {
        for entry in &entries {
            println!("{}", serde_json::to_string(entry)?);
        }
        return Ok(());
    }
    if entries.is_empty() {
        println!("No audit log entries.");
        return Ok(());
    }

    println!("\x1b[1mAudit Log\x1b[0m ({} entries)", entries.len());
    println!("{}", "-".repeat(80));
    for entry in &entries {
        let color = match entry.event {
            AuditEvent::ApproveDenied => "\x1b[31m",
            AuditEvent::Approve => "\x1b[32m",
            AuditEvent::Validate => "\x1b[33m",
            AuditEvent::Propose => "\x1b[36m",
        };
        println!(
            "\x1b[90m{}\x1b[0m  {color}{:<14}\x1b[0m  {}  by {}",
            entry.ts,
            entry.event.as_str(),
            entry.name,
            entry.actor
        );
        if let Some(ref detail) = entry.detail {
            println!("   \x1b[90m{}\x1b[0m", truncate_output(&detail.to_string(), 120));
        }
    }
    Ok(())
}

/// Truncate a string to `max` characters, appending "..." if truncated.
fn truncate_output(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.replace('\n', " "),
        Some((end, _)) => format!("{}...", s[..end].replace('\n', " ")),
    }
}
