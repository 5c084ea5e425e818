use serde_json::{Map, Value};

use skillbox_config::SkillboxConfig;
use skillbox_core::{Result, SkillboxError, requires_pin};
use skillbox_runtime::Runtime;

use super::registry;

pub(super) fn cmd_list(config: &SkillboxConfig, json: bool) -> Result<()> {
    let registry = registry(config);
    let skills = registry.list();

    if json {
        println!("{}", serde_json::to_string_pretty(&skills)?);
        return Ok(());
    }
    if skills.is_empty() {
        println!(
            "No skills found in {} or {}",
            registry.system_dir().display(),
            registry.approved_dir().display()
        );
        println!("  Scaffold the bundled skills with: skillbox init");
        return Ok(());
    }

    println!("\x1b[1mSkills ({}):\x1b[0m\n", skills.len());
    for s in skills {
        let state = if s.enabled {
            "\x1b[32menabled\x1b[0m"
        } else {
            "\x1b[90mdisabled\x1b[0m"
        };
        let caps: Vec<&str> = s.caps.iter().map(|c| c.as_str()).collect();
        let pin = if requires_pin(&s.caps) { "  \x1b[33m[pin]\x1b[0m" } else { "" };
        println!("  \x1b[36m{}\x1b[0m v{} ({}) {state}{pin}", s.name, s.version, s.origin);
        if !s.description.is_empty() {
            println!("    {}", s.description);
        }
        if !caps.is_empty() {
            println!("    caps: {}", caps.join(", "));
        }
    }
    Ok(())
}

pub(super) fn cmd_show(config: &SkillboxConfig, name: &str) -> Result<()> {
    let registry = registry(config);
    let skill = registry
        .get(name)
        .ok_or_else(|| SkillboxError::SkillNotFound(name.to_string()))?;

    println!("\x1b[1m{}\x1b[0m v{}", skill.manifest.name, skill.manifest.version);
    if !skill.manifest.description.is_empty() {
        println!("  {}", skill.manifest.description);
    }
    println!("  Id: {}", skill.qualified_id());
    println!("  Path: {}", skill.path.display());
    println!("  Enabled: {}", skill.enabled);
    println!("  Entry: {}", skill.manifest.entry);
    if let Some(ref interpreter) = skill.manifest.interpreter {
        println!("  Interpreter: {interpreter}");
    }
    if let Some(ref checksum) = skill.manifest.checksum {
        println!("  Checksum: {checksum}");
    }
    let caps: Vec<&str> = skill.manifest.caps.iter().map(|c| c.as_str()).collect();
    println!(
        "  Capabilities: {}{}",
        if caps.is_empty() { "none".to_string() } else { caps.join(", ") },
        if skill.requires_pin() { " (requires PIN)" } else { "" }
    );
    if !skill.manifest.inputs.is_empty() {
        println!("\n  \x1b[1mInputs:\x1b[0m");
        println!("{}", serde_json::to_string_pretty(&skill.manifest.inputs)?);
    }
    Ok(())
}

pub(super) fn cmd_enable(config: &SkillboxConfig, name: &str, flag: bool) -> Result<()> {
    let registry = registry(config);
    if !registry.enable(name, flag)? {
        return Err(SkillboxError::SkillNotFound(name.to_string()));
    }
    println!(
        "Skill '{name}' {}",
        if flag { "enabled" } else { "disabled" }
    );
    Ok(())
}

pub(super) async fn cmd_run(
    config: &SkillboxConfig,
    name: &str,
    account: &str,
    pairs: Vec<(String, String)>,
    args_json: Option<String>,
    pin: Option<String>,
) -> Result<()> {
    let args = build_args(pairs, args_json.as_deref())?;
    let runtime = Runtime::new(registry(config), config)?;
    let outputs = runtime
        .run_skill(name, account, args, pin.as_deref())
        .await?;

    println!("{}", serde_json::to_string_pretty(&outputs)?);
    if outputs.ok {
        Ok(())
    } else {
        Err(SkillboxError::Other(anyhow::anyhow!(
            "skill '{name}' failed: {}",
            outputs.message.unwrap_or_default()
        )))
    }
}

/// `--args-json` first, then each `--arg` on top. Values that parse as JSON
/// keep their type; everything else is a string.
fn build_args(pairs: Vec<(String, String)>, args_json: Option<&str>) -> Result<Value> {
    let mut args = match args_json {
        None => Map::new(),
        Some(raw) => match serde_json::from_str::<Value>(raw)? {
            Value::Object(map) => map,
            other => {
                return Err(SkillboxError::Other(anyhow::anyhow!(
                    "--args-json must be a JSON object, got {other}"
                )));
            }
        },
    };
    for (key, raw) in pairs {
        let value = serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw));
        args.insert(key, value);
    }
    Ok(Value::Object(args))
}
