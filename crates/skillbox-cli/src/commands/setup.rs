use std::path::Path;

use skillbox_config::SkillboxConfig;
use skillbox_core::Result;
use skillbox_registry::MANIFEST_FILE;

const TEMPLATE: &str = r#"# skillbox configuration

[skills]
system_dir = "skills/system"       # bundled, trusted skills
store_dir  = "skills_store"        # approved/, pending/, audit.log

[runtime]
sandbox_mode = "subprocess"        # "inproc" runs skills inside this process
timeout_secs = 25
scratch_root = "/tmp/skillbox_work"
# runner = ""                      # defaults to this executable
# cpu_limit_secs = 30
# max_open_files = 256
# memory_limit_mb = 0

[security]
master_pin = ""                    # or env: SKILLBOX_MASTER_PIN

[validator]
scratch_dir = "/tmp/skillbox_validate"
# toolchain = ["python3 -m venv {env}/venv"]
# requirements_command = "{env}/venv/bin/pip install -r {requirements}"
# test_command = "{runner} sandbox-test {package}"

[approval]
require_validation = true

[logging]
level = "info"
format = "pretty"                  # pretty, compact, json
"#;

pub(super) fn cmd_init(config_path: &Path, config: &SkillboxConfig, force: bool) -> Result<()> {
    if config_path.exists() {
        println!("{} already exists, leaving it alone", config_path.display());
    } else {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(config_path, TEMPLATE)?;
        println!("Wrote {}", config_path.display());
    }

    let system = &config.skills.system_dir;
    let mut written = 0;
    for manifest in skillbox_builtins::system_manifests() {
        let dir = system.join(&manifest.name);
        if dir.join(MANIFEST_FILE).exists() && !force {
            continue;
        }
        std::fs::create_dir_all(&dir)?;
        manifest.write(&dir)?;
        written += 1;
    }
    println!("Wrote {written} system skill manifest(s) under {}", system.display());

    std::fs::create_dir_all(config.skills.approved_dir())?;
    std::fs::create_dir_all(config.skills.pending_dir())?;
    println!("Skill store ready at {}", config.skills.store_dir.display());
    if config.security.master_pin.is_empty() {
        println!("  Set security.master_pin (or SKILLBOX_MASTER_PIN) before approving skills.");
    }
    Ok(())
}
