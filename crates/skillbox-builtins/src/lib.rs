//! # skillbox-builtins
//!
//! System skills compiled into the host. Each is exposed only once a system
//! package declares it with `"entry": "builtin:<id>"`; [`system_manifests`]
//! produces those declarations for `skillbox init`.

pub mod echo;
pub mod web;
pub mod workdir;

pub use echo::EchoSkill;
pub use web::WebFetchSkill;
pub use workdir::WorkdirWriteSkill;

use skillbox_core::InputSchema;
use skillbox_registry::{BUILTIN_PREFIX, SkillCatalog, SkillManifest};

/// Add every builtin to `catalog`, keyed by skill name.
pub fn register_builtins(catalog: &mut SkillCatalog) {
    catalog
        .register("echo", EchoSkill)
        .register("workdir_write", WorkdirWriteSkill)
        .register("web_fetch", WebFetchSkill::new());
}

/// A catalog holding exactly the builtins.
pub fn catalog() -> SkillCatalog {
    let mut catalog = SkillCatalog::new();
    register_builtins(&mut catalog);
    catalog
}

/// Manifests declaring each builtin, as written into the system directory.
pub fn system_manifests() -> Vec<SkillManifest> {
    let catalog = catalog();
    catalog
        .ids()
        .filter_map(|id| {
            let descriptor = catalog.get(id)?.describe();
            Some(SkillManifest {
                description: describe(id).to_string(),
                inputs: inputs(id),
                entry: format!("{BUILTIN_PREFIX}{id}"),
                name: descriptor.name,
                version: descriptor.version,
                caps: descriptor.caps,
                checksum: None,
                interpreter: None,
            })
        })
        .collect()
}

fn describe(id: &str) -> &'static str {
    match id {
        "echo" => "Return the given text unchanged",
        "workdir_write" => "Write a text file into the caller's working directory",
        "web_fetch" => "Fetch a web page and report its title and first heading",
        _ => "",
    }
}

fn inputs(id: &str) -> InputSchema {
    let schema = match id {
        "echo" => serde_json::json!({
            "text": {"type": "string", "required": true}
        }),
        "workdir_write" => serde_json::json!({
            "filename": {"type": "string", "required": true, "pattern": "^[A-Za-z0-9._-]+$"},
            "content": {"type": "string", "required": true},
            "append": {"type": "boolean"}
        }),
        "web_fetch" => serde_json::json!({
            "url": {"type": "string", "required": true, "pattern": "^https?://"},
            "max_bytes": {"type": "integer", "minimum": 1}
        }),
        _ => serde_json::json!({}),
    };
    serde_json::from_value(schema).unwrap_or_default()
}
