#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;
    use skillbox_config::SkillboxConfig;
    use skillbox_core::*;
    use skillbox_registry::*;
    use skillbox_runtime::*;
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    // ── Test skills ────────────────────────────────────────────

    /// Counts its invocations and writes a marker into the workdir.
    struct Counter {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Skill for Counter {
        type Input = serde_json::Value;

        fn name(&self) -> &str {
            "counter"
        }

        fn version(&self) -> &str {
            "1.0.0"
        }

        fn capabilities(&self) -> CapabilitySet {
            CapabilitySet::from([Capability::FsWrite])
        }

        async fn run(&self, ctx: &SkillContext, _input: serde_json::Value) -> Result<SkillOutputs> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            std::fs::write(ctx.workdir.join("marker.txt"), ctx.account_id.as_bytes())?;
            Ok(SkillOutputs::success().with_data("calls", n))
        }
    }

    struct Sleeper;

    #[async_trait]
    impl Skill for Sleeper {
        type Input = serde_json::Value;

        fn name(&self) -> &str {
            "sleeper"
        }

        fn version(&self) -> &str {
            "1.0.0"
        }

        fn capabilities(&self) -> CapabilitySet {
            CapabilitySet::new()
        }

        async fn run(&self, _ctx: &SkillContext, _input: serde_json::Value) -> Result<SkillOutputs> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(SkillOutputs::success())
        }
    }

    struct Panicker;

    #[async_trait]
    impl Skill for Panicker {
        type Input = serde_json::Value;

        fn name(&self) -> &str {
            "panicker"
        }

        fn version(&self) -> &str {
            "1.0.0"
        }

        fn capabilities(&self) -> CapabilitySet {
            CapabilitySet::new()
        }

        async fn run(&self, _ctx: &SkillContext, _input: serde_json::Value) -> Result<SkillOutputs> {
            panic!("boom");
        }
    }

    // ── Fixture ────────────────────────────────────────────────

    fn write_builtin(system: &Path, name: &str, caps: serde_json::Value, inputs: serde_json::Value) {
        let pkg = system.join(name);
        std::fs::create_dir_all(&pkg).unwrap();
        let manifest = json!({
            "name": name,
            "version": "1.0.0",
            "caps": caps,
            "entry": format!("builtin:{name}"),
            "inputs": inputs,
        });
        std::fs::write(pkg.join(MANIFEST_FILE), manifest.to_string()).unwrap();
    }

    struct Fixture {
        _root: tempfile::TempDir,
        config: SkillboxConfig,
        calls: Arc<AtomicUsize>,
        runtime: Runtime,
    }

    fn fixture(mode: &str, timeout_secs: u64, runner: &str) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let mut config = SkillboxConfig::default();
        config.skills.system_dir = root.path().join("system");
        config.skills.store_dir = root.path().join("store");
        config.runtime.scratch_root = root.path().join("scratch");
        config.runtime.sandbox_mode = mode.into();
        config.runtime.timeout_secs = timeout_secs;
        config.runtime.runner = runner.into();
        config.security.master_pin = "4321".into();

        let system = &config.skills.system_dir;
        write_builtin(system, "counter", json!(["fs_write"]), json!({}));
        write_builtin(system, "sleeper", json!([]), json!({}));
        write_builtin(system, "panicker", json!([]), json!({}));
        write_builtin(
            system,
            "echo",
            json!([]),
            json!({"text": {"type": "string", "required": true}}),
        );

        let calls = Arc::new(AtomicUsize::new(0));
        let mut catalog = SkillCatalog::new();
        skillbox_builtins::register_builtins(&mut catalog);
        catalog
            .register("counter", Counter { calls: calls.clone() })
            .register("sleeper", Sleeper)
            .register("panicker", Panicker);

        let registry = Arc::new(Registry::from_config(&config, Arc::new(catalog)));
        assert_eq!(registry.load_all(), 4);
        let runtime = Runtime::new(registry, &config).unwrap();
        Fixture {
            _root: root,
            config,
            calls,
            runtime,
        }
    }

    fn inproc() -> Fixture {
        fixture("inproc", 5, "")
    }

    #[cfg(unix)]
    fn shell_script(path: &Path, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    // ── Authorization ──────────────────────────────────────────

    #[tokio::test]
    async fn dangerous_skill_refused_without_pin() {
        let f = inproc();
        for token in [None, Some(""), Some("0000")] {
            let out = f
                .runtime
                .run_skill("counter", "acct1", json!({}), token)
                .await
                .unwrap();
            assert!(!out.ok);
            assert!(out.message.unwrap().contains("authorization required"));
        }
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
        let workdir = f.config.runtime.scratch_root.join("acct1");
        assert!(!workdir.join("marker.txt").exists());
    }

    #[tokio::test]
    async fn dangerous_skill_runs_once_with_pin() {
        let f = inproc();
        let out = f
            .runtime
            .run_skill("counter", "acct1", json!({}), Some("4321"))
            .await
            .unwrap();
        assert!(out.ok, "{:?}", out.message);
        assert_eq!(out.data.unwrap()["calls"], 1);
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_pin_never_authorizes() {
        let mut f = inproc();
        f.config.security.master_pin = String::new();
        let runtime = Runtime::new(f.runtime.registry().clone(), &f.config).unwrap();
        for token in [None, Some("")] {
            let out = runtime
                .run_skill("counter", "acct1", json!({}), token)
                .await
                .unwrap();
            assert!(!out.ok);
        }
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    }

    // ── Isolation ──────────────────────────────────────────────

    #[tokio::test]
    async fn tenants_get_separate_workdirs() {
        let f = inproc();
        for account in ["alice", "bob"] {
            let out = f
                .runtime
                .run_skill("counter", account, json!({}), Some("4321"))
                .await
                .unwrap();
            assert!(out.ok);
        }
        let scratch = &f.config.runtime.scratch_root;
        assert_eq!(
            std::fs::read_to_string(scratch.join("alice/marker.txt")).unwrap(),
            "alice"
        );
        assert_eq!(
            std::fs::read_to_string(scratch.join("bob/marker.txt")).unwrap(),
            "bob"
        );
    }

    #[tokio::test]
    async fn invalid_account_rejected() {
        let f = inproc();
        for account in ["", "..", "../other", "a/b"] {
            let out = f
                .runtime
                .run_skill("echo", account, json!({"text": "x"}), None)
                .await
                .unwrap();
            assert!(!out.ok, "{account:?} accepted");
        }
        assert!(f.runtime.tenant_workdir("..").unwrap().is_none());
    }

    // ── Failure modes ──────────────────────────────────────────

    #[tokio::test]
    async fn timeout_is_bounded() {
        let f = fixture("inproc", 1, "");
        let started = std::time::Instant::now();
        let out = f
            .runtime
            .run_skill("sleeper", "acct1", json!({}), None)
            .await
            .unwrap();
        assert!(!out.ok);
        assert_eq!(out.message.as_deref(), Some("Skill timed out after 1s"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn panic_becomes_failure() {
        let f = inproc();
        let out = f
            .runtime
            .run_skill("panicker", "acct1", json!({}), None)
            .await
            .unwrap();
        assert!(!out.ok);
        assert!(out.message.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn schema_violation_rejected_before_run() {
        let f = inproc();
        let out = f
            .runtime
            .run_skill("echo", "acct1", json!({"text": 5}), None)
            .await
            .unwrap();
        assert!(!out.ok);

        let out = f
            .runtime
            .run_skill("echo", "acct1", json!({}), None)
            .await
            .unwrap();
        assert!(!out.ok);

        let out = f
            .runtime
            .run_skill("echo", "acct1", json!({"text": "hi"}), None)
            .await
            .unwrap();
        assert!(out.ok);
        assert_eq!(out.data.unwrap()["echo"], "hi");
    }

    #[tokio::test]
    async fn unknown_and_disabled_skills() {
        let f = inproc();
        let out = f
            .runtime
            .run_skill("missing", "acct1", json!({}), None)
            .await
            .unwrap();
        assert!(!out.ok);
        assert!(out.message.unwrap().contains("missing"));

        assert!(f.runtime.registry().enable("echo", false).unwrap());
        let out = f
            .runtime
            .run_skill("echo", "acct1", json!({"text": "hi"}), None)
            .await
            .unwrap();
        assert!(!out.ok);
        assert!(out.message.unwrap().contains("disabled"));
    }

    #[tokio::test]
    async fn subprocess_refuses_before_spawning() {
        // The runner path does not exist; a spawn attempt would be an Err.
        let f = fixture("subprocess", 5, "/nonexistent/skillbox-runner");
        let out = f
            .runtime
            .run_skill("missing", "acct1", json!({}), None)
            .await
            .unwrap();
        assert!(!out.ok);

        let out = f
            .runtime
            .run_skill("counter", "acct1", json!({}), None)
            .await
            .unwrap();
        assert!(!out.ok);
        assert!(out.message.unwrap().contains("authorization required"));

        assert!(
            f.runtime
                .run_skill("echo", "acct1", json!({"text": "x"}), None)
                .await
                .is_err()
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn edited_process_skill_is_refused_inproc() {
        let f = inproc();
        let pkg = f.config.skills.approved_dir().join("stamp");
        std::fs::create_dir_all(&pkg).unwrap();
        let entry = pkg.join(DEFAULT_ENTRY);
        shell_script(&entry, r#"cat >/dev/null; echo '{"ok":true,"message":"original"}'"#);
        let manifest = json!({
            "name": "stamp",
            "version": "1.0.0",
            "caps": [],
            "checksum": compute_checksum(&std::fs::read(&entry).unwrap()),
        });
        std::fs::write(pkg.join(MANIFEST_FILE), manifest.to_string()).unwrap();
        assert_eq!(f.runtime.registry().load_all(), 5);

        let out = f.runtime.run_skill("stamp", "acct1", json!({}), None).await.unwrap();
        assert!(out.ok, "{:?}", out.message);
        assert_eq!(out.message.as_deref(), Some("original"));

        shell_script(
            &entry,
            r#"cat >/dev/null; touch edited.txt; echo '{"ok":true,"message":"edited"}'"#,
        );
        let out = f.runtime.run_skill("stamp", "acct1", json!({}), None).await.unwrap();
        assert!(!out.ok);
        assert!(out.message.unwrap().contains("checksum mismatch"));
        let workdir = f.runtime.tenant_workdir("acct1").unwrap().unwrap();
        assert!(!workdir.join("edited.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runner_exit_code_and_stderr_reported() {
        let dir = tempfile::tempdir().unwrap();
        let runner = dir.path().join("runner");
        shell_script(&runner, "cat >/dev/null\necho 'runner broke' >&2\nexit 3");
        let f = fixture("subprocess", 5, runner.to_str().unwrap());

        let out = f
            .runtime
            .run_skill("echo", "acct1", json!({"text": "x"}), None)
            .await
            .unwrap();
        assert!(!out.ok);
        assert_eq!(
            out.message.as_deref(),
            Some("Sandbox runner exited with 3: runner broke")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runner_garbage_stdout_reported() {
        let dir = tempfile::tempdir().unwrap();
        let runner = dir.path().join("runner");
        shell_script(&runner, "cat >/dev/null\necho garbage\necho warned >&2");
        let f = fixture("subprocess", 5, runner.to_str().unwrap());

        let out = f
            .runtime
            .run_skill("echo", "acct1", json!({"text": "x"}), None)
            .await
            .unwrap();
        assert!(!out.ok);
        let message = out.message.unwrap();
        assert!(
            message.starts_with("Sandbox runner returned invalid JSON"),
            "{message}"
        );
        assert!(message.contains("stdout: garbage"), "{message}");
        assert!(message.contains("stderr: warned"), "{message}");
    }

    // ── Sandbox runner, in process ─────────────────────────────

    #[tokio::test]
    async fn runner_rechecks_authorization() {
        let f = inproc();
        let settings = RunnerSettings::from_config(&f.config);
        let workdir = f.runtime.tenant_workdir("acct1").unwrap().unwrap();
        let payload = InvocationPayload {
            name: "workdir_write".into(),
            ctx: SkillContext::new("acct1", &workdir, None),
            args: json!({"filename": "a.txt", "content": "x"}),
            caps_token: None,
        };
        write_builtin(
            &f.config.skills.system_dir,
            "workdir_write",
            json!(["fs_write"]),
            json!({}),
        );
        let catalog = Arc::new(skillbox_builtins::catalog());
        let out = run_payload(payload.clone(), &settings, catalog.clone())
            .await
            .unwrap();
        assert!(!out.ok);
        assert!(!workdir.join("a.txt").exists());

        let authorized = InvocationPayload {
            caps_token: Some("4321".into()),
            ..payload
        };
        let out = run_payload(authorized, &settings, catalog).await.unwrap();
        assert!(out.ok, "{:?}", out.message);
        assert!(workdir.join("a.txt").is_file());
    }

    #[tokio::test]
    async fn runner_reads_payload_from_stdin() {
        let f = inproc();
        let settings = RunnerSettings::from_config(&f.config);
        let workdir = f.runtime.tenant_workdir("acct1").unwrap().unwrap();
        let raw = json!({
            "name": "echo",
            "ctx": {"account_id": "acct1", "workdir": workdir, "trace_id": "t1"},
            "args": {"text": "piped"}
        })
        .to_string();
        let out = run_from_reader(
            raw.as_bytes(),
            &settings,
            Arc::new(skillbox_builtins::catalog()),
        )
        .await
        .unwrap();
        assert!(out.ok);
        assert_eq!(out.data.unwrap()["echo"], "piped");

        assert!(
            run_from_reader(
                &b"not json"[..],
                &settings,
                Arc::new(skillbox_builtins::catalog())
            )
            .await
            .is_err()
        );
    }

    // ── Declarative package tests ──────────────────────────────

    #[tokio::test]
    async fn package_tests_count_cases() {
        let root = tempfile::tempdir().unwrap();
        write_builtin(
            root.path(),
            "echo",
            json!([]),
            json!({"text": {"type": "string", "required": true}}),
        );
        let pkg = root.path().join("echo");
        std::fs::create_dir_all(pkg.join("tests")).unwrap();
        std::fs::write(
            pkg.join("tests/test_echo.json"),
            json!([
                {"name": "hello", "args": {"text": "hi"}, "expect": {"data": {"echo": "hi"}}},
                {"name": "missing", "args": {}, "expect": {"ok": false}}
            ])
            .to_string(),
        )
        .unwrap();
        std::fs::write(
            pkg.join("tests/test_wrong.json"),
            json!({"args": {"text": "a"}, "expect": {"data": {"echo": "b"}}}).to_string(),
        )
        .unwrap();

        let catalog = skillbox_builtins::catalog();
        let report = run_package_tests(&pkg, &catalog, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(report.passed, 2);
        assert_eq!(report.failed, 1);
        assert!(!report.ok());
        assert!(report.failures[0].starts_with("test_wrong.json"));
    }

    #[tokio::test]
    async fn package_without_cases_fails() {
        let root = tempfile::tempdir().unwrap();
        write_builtin(root.path(), "echo", json!([]), json!({}));
        let pkg = root.path().join("echo");
        std::fs::create_dir_all(pkg.join("tests")).unwrap();
        let report = run_package_tests(&pkg, &skillbox_builtins::catalog(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!report.ok());
    }

    // ── Validator ──────────────────────────────────────────────

    #[tokio::test]
    async fn validator_rejects_unknown_pending() {
        let f = inproc();
        let validator = Validator::new(&f.config);
        let report = validator.validate("nothing_here").await.unwrap();
        assert!(!report.ok);
        assert!(report.stages.is_empty());

        let report = validator.validate("../escape").await.unwrap();
        assert!(!report.ok);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn validator_reports_provision_timeout() {
        let mut f = inproc();
        f.config.validator.scratch_dir = f.config.runtime.scratch_root.join("validate");
        f.config.validator.toolchain = vec!["sleep 10".into()];
        f.config.validator.setup_timeout_secs = 1;
        std::fs::create_dir_all(f.config.skills.pending_dir().join("slow")).unwrap();

        let report = Validator::new(&f.config).validate("slow").await.unwrap();
        assert!(!report.ok);
        assert!(report.message.contains("TIMEOUT"), "{}", report.message);
        assert_eq!(
            report.stages[0].status,
            StageStatus::TimedOut { after_secs: 1 }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn validator_reports_provision_failure() {
        let mut f = inproc();
        f.config.validator.scratch_dir = f.config.runtime.scratch_root.join("validate");
        f.config.validator.toolchain = vec!["echo provisioning {env}; exit 3".into()];
        std::fs::create_dir_all(f.config.skills.pending_dir().join("broken")).unwrap();

        let report = Validator::new(&f.config).validate("broken").await.unwrap();
        assert!(!report.ok);
        assert!(report.message.contains("exit 3"), "{}", report.message);
        assert!(!report.message.contains("TIMEOUT"));
        assert!(report.stages[0].output.contains("provisioning"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn validator_records_ignored_requirements() {
        let mut f = inproc();
        let runner = f.config.runtime.scratch_root.join("runner");
        std::fs::create_dir_all(&f.config.runtime.scratch_root).unwrap();
        shell_script(&runner, "echo 'no probe here' >&2\nexit 5");
        f.config.runtime.runner = runner.to_string_lossy().into_owned();
        f.config.validator.scratch_dir = f.config.runtime.scratch_root.join("validate");
        let tests = f.config.skills.pending_dir().join("needy").join("tests");
        std::fs::create_dir_all(&tests).unwrap();
        std::fs::write(tests.join("requirements.txt"), "leftpad==1.0\n").unwrap();

        let report = Validator::new(&f.config).validate("needy").await.unwrap();
        assert_eq!(report.stages[0].stage, Stage::Requirements);
        match &report.stages[0].status {
            StageStatus::Skipped { reason } => {
                assert!(reason.contains("requirements.txt ignored"), "{reason}")
            }
            other => panic!("unexpected status {other:?}"),
        }
        assert!(!report.ok);
        assert!(report.message.starts_with("smoke"), "{}", report.message);
    }
}
