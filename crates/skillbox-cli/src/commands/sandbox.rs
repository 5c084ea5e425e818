//! Entry points the runtime spawns this executable with. Each prints exactly
//! one JSON document on stdout; logs go to stderr.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use skillbox_core::{Result, SkillboxError};
use skillbox_registry::{SkillCatalog, probe_package};
use skillbox_runtime::sandbox::{ENV_LOG_LEVEL, ENV_TIMEOUT};
use skillbox_runtime::{RunnerSettings, apply_rlimits, run_from_reader, run_package_tests};

/// Quiet by default; the parent only surfaces stderr on failure.
pub(super) fn init_logging() {
    let level = std::env::var(ENV_LOG_LEVEL).unwrap_or_else(|_| "warn".into());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .compact()
        .init();
}

pub(super) async fn cmd_run(catalog: Arc<SkillCatalog>) -> Result<()> {
    let settings = RunnerSettings::from_env()?;
    apply_rlimits(&settings)?;
    debug!(?settings, "sandbox runner starting");

    let outputs = run_from_reader(tokio::io::stdin(), &settings, catalog).await?;
    println!("{}", serde_json::to_string(&outputs)?);
    Ok(())
}

pub(super) async fn cmd_probe(package: &Path, catalog: &SkillCatalog) -> Result<()> {
    let descriptor = probe_package(package, catalog, timeout_from_env()).await?;
    println!("{}", serde_json::to_string(&descriptor)?);
    Ok(())
}

pub(super) async fn cmd_test(package: &Path, catalog: &SkillCatalog) -> Result<()> {
    let report = run_package_tests(package, catalog, timeout_from_env()).await?;
    println!("{}", serde_json::to_string(&report)?);
    if report.ok() {
        Ok(())
    } else {
        Err(SkillboxError::Validation(format!(
            "{} passed, {} failed: {}",
            report.passed,
            report.failed,
            report.failures.join("; ")
        )))
    }
}

fn timeout_from_env() -> Duration {
    let secs = std::env::var(ENV_TIMEOUT)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(25);
    Duration::from_secs(secs)
}
