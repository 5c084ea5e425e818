use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use std::path::PathBuf;
use std::sync::Arc;

use skillbox_config::{ConfigLoader, SkillboxConfig, WarningSeverity};
use skillbox_core::{Result, SkillboxError};
use skillbox_registry::{Registry, SkillCatalog};

mod approval;
mod sandbox;
mod setup;
mod skills;

/// skillbox: a runtime and registry for sandboxed, capability-gated skills
#[derive(Parser)]
#[command(name = "skillbox", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to skillbox.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered skills
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a skill's manifest, origin, and state
    Show { name: String },
    /// Enable a skill
    Enable { name: String },
    /// Disable a skill without removing it
    Disable { name: String },
    /// Run a skill for an account and print its outputs
    Run {
        name: String,
        /// Account the invocation runs for
        #[arg(short, long)]
        account: String,
        /// Argument as key=value; the value is parsed as JSON when it can be
        #[arg(long = "arg", value_parser = parse_key_val)]
        args: Vec<(String, String)>,
        /// Arguments as one JSON object, merged under any --arg
        #[arg(long)]
        args_json: Option<String>,
        /// Capability token for dangerous skills
        #[arg(long, env = "SKILLBOX_PIN", hide_env_values = true)]
        pin: Option<String>,
    },
    /// Submit a new skill to the pending store
    #[command(disable_version_flag = true)]
    Propose {
        name: String,
        /// Entry file holding the skill's code
        #[arg(long)]
        code: PathBuf,
        #[arg(long, default_value = "0.1.0")]
        version: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Declared capability (fs_read, fs_write, exec, net, system); repeatable
        #[arg(long = "cap")]
        caps: Vec<String>,
        /// Program the entry file is handed to, e.g. python3
        #[arg(long)]
        interpreter: Option<String>,
        /// Directory copied into the package as tests/
        #[arg(long)]
        tests: Option<PathBuf>,
        /// Input schema as a JSON object
        #[arg(long)]
        inputs_json: Option<String>,
        #[arg(long, default_value_t = default_actor())]
        actor: String,
    },
    /// Validate a pending skill in an isolated environment
    Validate {
        name: String,
        /// Output the report as JSON
        #[arg(long)]
        json: bool,
        #[arg(long, default_value_t = default_actor())]
        actor: String,
    },
    /// Promote a validated skill to the approved store
    Approve {
        name: String,
        /// Master PIN
        #[arg(long, env = "SKILLBOX_PIN", hide_env_values = true)]
        pin: String,
        #[arg(long, default_value_t = default_actor())]
        actor: String,
    },
    /// Show recent audit log entries
    Audit {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
        /// Output as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Write a default skillbox.toml and the bundled system skills
    Init {
        /// Overwrite existing system skill manifests
        #[arg(long)]
        force: bool,
    },
    /// Show the effective configuration (PIN masked)
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Execute one invocation payload read from stdin
    #[command(name = "sandbox-run", hide = true)]
    SandboxRun,
    /// Load a package and print its self-description
    #[command(name = "sandbox-probe", hide = true)]
    SandboxProbe { package: PathBuf },
    /// Run a package's declarative test cases
    #[command(name = "sandbox-test", hide = true)]
    SandboxTest { package: PathBuf },
}

/// Parse "key=value" CLI arguments.
fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{s}`"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn default_actor() -> String {
    std::env::var("USER").unwrap_or_else(|_| "cli".into())
}

/// The skill implementations compiled into this executable.
fn catalog() -> Arc<SkillCatalog> {
    Arc::new(skillbox_builtins::catalog())
}

fn registry(config: &SkillboxConfig) -> Arc<Registry> {
    let registry = Registry::from_config(config, catalog());
    registry.load_all();
    Arc::new(registry)
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // The sandbox entry points take everything from their environment and
        // must keep stdout for their one JSON document.
        match self.command {
            Commands::SandboxRun => {
                sandbox::init_logging();
                return sandbox::cmd_run(catalog()).await;
            }
            Commands::SandboxProbe { package } => {
                sandbox::init_logging();
                return sandbox::cmd_probe(&package, &catalog()).await;
            }
            Commands::SandboxTest { package } => {
                sandbox::init_logging();
                return sandbox::cmd_test(&package, &catalog()).await;
            }
            _ => {}
        }

        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // Resolve log level: --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level
                .as_deref()
                .unwrap_or(config.logging.level.as_str())
        };
        init_logging(log_level, &config.logging.format);

        match self.command {
            Commands::List { json } => skills::cmd_list(&config, json),
            Commands::Show { name } => skills::cmd_show(&config, &name),
            Commands::Enable { name } => skills::cmd_enable(&config, &name, true),
            Commands::Disable { name } => skills::cmd_enable(&config, &name, false),
            Commands::Run {
                name,
                account,
                args,
                args_json,
                pin,
            } => skills::cmd_run(&config, &name, &account, args, args_json, pin).await,
            Commands::Propose {
                name,
                code,
                version,
                description,
                caps,
                interpreter,
                tests,
                inputs_json,
                actor,
            } => approval::cmd_propose(
                &config,
                approval::ProposeArgs {
                    name,
                    code,
                    version,
                    description,
                    caps,
                    interpreter,
                    tests,
                    inputs_json,
                },
                &actor,
            ),
            Commands::Validate { name, json, actor } => {
                approval::cmd_validate(&config, &name, json, &actor).await
            }
            Commands::Approve { name, pin, actor } => {
                approval::cmd_approve(&config, &name, &pin, &actor)
            }
            Commands::Audit { limit, json } => approval::cmd_audit(&config, limit, json),
            Commands::Init { force } => setup::cmd_init(config_loader.path(), &config, force),
            Commands::Config { json } => Self::cmd_config(&config, json),
            Commands::Completions { shell } => Self::cmd_completions(shell),
            Commands::SandboxRun | Commands::SandboxProbe { .. } | Commands::SandboxTest { .. } => {
                Ok(())
            }
        }
    }

    fn cmd_config(config: &SkillboxConfig, json: bool) -> Result<()> {
        let shown = config.redacted();
        if json {
            println!("{}", serde_json::to_string_pretty(&shown)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&shown).map_err(|e| SkillboxError::Config(e.to_string()))?
            );
        }

        if let Ok(warnings) = config.validate() {
            for w in warnings.iter().filter(|w| w.severity != WarningSeverity::Info) {
                eprintln!("  {w}");
            }
        }
        Ok(())
    }

    fn cmd_completions(shell: Shell) -> Result<()> {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "skillbox", &mut std::io::stdout());
        Ok(())
    }
}

/// Logs go to stderr; stdout carries command output only.
fn init_logging(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        "json" => builder.json().with_target(true).init(),
        "compact" => builder.compact().with_target(false).init(),
        _ => builder.pretty().with_target(false).init(),
    }
}
