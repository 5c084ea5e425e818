//! End-to-end tests driving the real `skillbox` executable as the sandbox runner.

#[cfg(all(test, unix))]
mod tests {
    use serde_json::json;
    use skillbox_approval::{ApprovalWorkflow, Proposal};
    use skillbox_config::SkillboxConfig;
    use skillbox_core::*;
    use skillbox_registry::*;
    use skillbox_runtime::Runtime;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    const RUNNER: &str = env!("CARGO_BIN_EXE_skillbox");
    const PIN: &str = "1357";

    const HELLO: &str = r#"#!/bin/sh
req=$(cat)
case "$req" in
  *'"op":"describe"'*) echo '{"name":"hello","version":"1.0.0","caps":[]}' ;;
  *) echo '{"ok":true,"data":{"echo":"hi"}}' ;;
esac
"#;

    // ── Fixture ────────────────────────────────────────────────

    struct Fixture {
        root: tempfile::TempDir,
        config: SkillboxConfig,
    }

    impl Fixture {
        fn registry(&self) -> Arc<Registry> {
            let registry = Registry::from_config(&self.config, Arc::new(skillbox_builtins::catalog()));
            registry.load_all();
            Arc::new(registry)
        }

        fn runtime(&self) -> Runtime {
            Runtime::new(self.registry(), &self.config).unwrap()
        }

        /// Drop a process skill straight into the approved store.
        fn approved_script(&self, name: &str, caps: serde_json::Value, body: &str) {
            let pkg = self.config.skills.approved_dir().join(name);
            std::fs::create_dir_all(&pkg).unwrap();
            let code = format!("#!/bin/sh\n{body}\n");
            let entry = pkg.join(DEFAULT_ENTRY);
            std::fs::write(&entry, &code).unwrap();
            std::fs::set_permissions(&entry, std::fs::Permissions::from_mode(0o755)).unwrap();
            let manifest = json!({
                "name": name,
                "version": "1.0.0",
                "caps": caps,
                "checksum": compute_checksum(code.as_bytes()),
            });
            std::fs::write(pkg.join(MANIFEST_FILE), manifest.to_string()).unwrap();
        }
    }

    fn fixture(timeout_secs: u64) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let mut config = SkillboxConfig::default();
        config.skills.system_dir = root.path().join("system");
        config.skills.store_dir = root.path().join("store");
        config.runtime.scratch_root = root.path().join("scratch");
        config.runtime.sandbox_mode = "subprocess".into();
        config.runtime.runner = RUNNER.into();
        config.runtime.timeout_secs = timeout_secs;
        config.validator.scratch_dir = root.path().join("validate");
        config.security.master_pin = PIN.into();

        for manifest in skillbox_builtins::system_manifests() {
            let dir = config.skills.system_dir.join(&manifest.name);
            std::fs::create_dir_all(&dir).unwrap();
            manifest.write(&dir).unwrap();
        }
        Fixture { root, config }
    }

    fn hello_proposal(tests: Option<&Path>) -> Proposal {
        Proposal {
            name: "hello".into(),
            description: "says hi".into(),
            version: "1.0.0".into(),
            caps: CapabilitySet::new(),
            code: HELLO.as_bytes().to_vec(),
            tests: tests.map(Path::to_path_buf),
            interpreter: None,
            inputs: InputSchema::default(),
        }
    }

    // ── Subprocess dispatch ────────────────────────────────────

    #[tokio::test]
    async fn builtin_runs_through_runner() {
        let f = fixture(20);
        let out = f
            .runtime()
            .run_skill("echo", "acct1", json!({"text": "hi"}), None)
            .await
            .unwrap();
        assert!(out.ok, "{:?}", out.message);
        assert_eq!(out.data.unwrap()["echo"], "hi");
    }

    #[tokio::test]
    async fn dangerous_builtin_gated_across_boundary() {
        let f = fixture(20);
        let runtime = f.runtime();
        let args = json!({"filename": "note.txt", "content": "hello"});

        let out = runtime
            .run_skill("workdir_write", "acct1", args.clone(), None)
            .await
            .unwrap();
        assert!(!out.ok);
        let workdir = runtime.tenant_workdir("acct1").unwrap().unwrap();
        assert!(!workdir.join("note.txt").exists());

        let out = runtime
            .run_skill("workdir_write", "acct1", args, Some(PIN))
            .await
            .unwrap();
        assert!(out.ok, "{:?}", out.message);
        assert_eq!(
            std::fs::read_to_string(workdir.join("note.txt")).unwrap(),
            "hello"
        );
        assert!(!f.config.runtime.scratch_root.join("acct2/note.txt").exists());
    }

    #[tokio::test]
    async fn process_skill_timeout_is_enforced() {
        let f = fixture(2);
        f.approved_script("slow", json!([]), "cat >/dev/null\nsleep 30");
        let started = Instant::now();
        let out = f
            .runtime()
            .run_skill("slow", "acct1", json!({}), None)
            .await
            .unwrap();
        assert!(!out.ok);
        assert_eq!(out.message.as_deref(), Some("Skill timed out after 2s"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn no_network_flag_follows_capabilities() {
        let f = fixture(20);
        let body = r#"cat >/dev/null
echo "{\"ok\":true,\"data\":{\"no_net\":\"${SKILLBOX_NO_NET:-}\",\"pin\":\"${SKILLBOX_MASTER_PIN:-}\"}}""#;
        f.approved_script("offline", json!([]), body);
        f.approved_script("online", json!(["net"]), body);
        let runtime = f.runtime();

        let out = runtime
            .run_skill("offline", "acct1", json!({}), None)
            .await
            .unwrap();
        assert!(out.ok, "{:?}", out.message);
        let data = out.data.unwrap();
        assert_eq!(data["no_net"], "1");
        assert_eq!(data["pin"], "");

        let out = runtime
            .run_skill("online", "acct1", json!({}), Some(PIN))
            .await
            .unwrap();
        assert!(out.ok, "{:?}", out.message);
        let data = out.data.unwrap();
        assert_eq!(data["no_net"], "");
        assert_eq!(data["pin"], "");
    }

    #[tokio::test]
    async fn crashing_skill_reports_failure() {
        let f = fixture(20);
        f.approved_script("crash", json!([]), "cat >/dev/null\necho dying >&2\nexit 7");
        f.approved_script("garbage", json!([]), "cat >/dev/null\necho not-json");
        let runtime = f.runtime();

        let out = runtime
            .run_skill("crash", "acct1", json!({}), None)
            .await
            .unwrap();
        assert!(!out.ok);
        assert!(out.message.unwrap().contains("dying"));

        let out = runtime
            .run_skill("garbage", "acct1", json!({}), None)
            .await
            .unwrap();
        assert!(!out.ok);
        assert!(out.message.unwrap().contains("not-json"));
    }

    // ── Approval lifecycle ─────────────────────────────────────

    #[tokio::test]
    async fn propose_validate_approve_then_run() {
        let f = fixture(20);
        let tests = f.root.path().join("hello-tests");
        std::fs::create_dir_all(&tests).unwrap();
        std::fs::write(
            tests.join("test_hello.json"),
            json!([{"name": "says hi", "args": {"text": "hi"}, "expect": {"data": {"echo": "hi"}}}])
                .to_string(),
        )
        .unwrap();

        let registry = f.registry();
        let workflow = ApprovalWorkflow::new(registry.clone(), &f.config);
        workflow.propose(hello_proposal(Some(&tests)), "alice").unwrap();
        assert!(registry.get("hello").is_none());

        let report = workflow.validate("hello", "alice").await.unwrap();
        assert!(report.ok, "{}", report.message);

        workflow.approve("hello", PIN, "admin").unwrap();
        let runtime = Runtime::new(registry, &f.config).unwrap();
        let out = runtime
            .run_skill("hello", "acct1", json!({"text": "hi"}), None)
            .await
            .unwrap();
        assert!(out.ok, "{:?}", out.message);
        assert_eq!(out.data.unwrap()["echo"], "hi");

        // The package copy used for validation is gone.
        assert!(!f.config.validator.scratch_dir.join("hello/package/hello").exists());
    }

    #[tokio::test]
    async fn failing_tests_block_approval() {
        let f = fixture(20);
        let tests = f.root.path().join("bad-tests");
        std::fs::create_dir_all(&tests).unwrap();
        std::fs::write(
            tests.join("test_hello.json"),
            json!({"args": {}, "expect": {"data": {"echo": "bye"}}}).to_string(),
        )
        .unwrap();

        let workflow = ApprovalWorkflow::new(f.registry(), &f.config);
        workflow.propose(hello_proposal(Some(&tests)), "alice").unwrap();
        let report = workflow.validate("hello", "alice").await.unwrap();
        assert!(!report.ok);
        assert!(report.message.starts_with("tests"), "{}", report.message);
        assert!(workflow.approve("hello", PIN, "admin").is_err());
    }

    #[tokio::test]
    async fn misnamed_implementation_fails_smoke_test() {
        let f = fixture(20);
        let mut proposal = hello_proposal(None);
        proposal.name = "greeter".into();
        let workflow = ApprovalWorkflow::new(f.registry(), &f.config);
        workflow.propose(proposal, "alice").unwrap();

        let report = workflow.validate("greeter", "alice").await.unwrap();
        assert!(!report.ok);
        assert!(report.message.starts_with("smoke"), "{}", report.message);
    }

    // ── Command line ───────────────────────────────────────────

    #[test]
    fn cli_init_list_and_run() {
        let root = tempfile::tempdir().unwrap();
        let config_path = root.path().join("skillbox.toml");
        let config = format!(
            "[skills]\nsystem_dir = {:?}\nstore_dir = {:?}\n\n[runtime]\nscratch_root = {:?}\n",
            root.path().join("system"),
            root.path().join("store"),
            root.path().join("scratch"),
        );
        std::fs::write(&config_path, config).unwrap();

        let skillbox = |args: &[&str]| {
            std::process::Command::new(RUNNER)
                .arg("--config")
                .arg(&config_path)
                .arg("--quiet")
                .args(args)
                .env_remove("SKILLBOX_MASTER_PIN")
                .env_remove("SKILLBOX_PIN")
                .output()
                .unwrap()
        };

        assert!(skillbox(&["init"]).status.success());

        let out = skillbox(&["list", "--json"]);
        assert!(out.status.success());
        let listed: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
        let names: Vec<&str> = listed
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|s| s["name"].as_str())
            .collect();
        assert_eq!(names, vec!["echo", "web_fetch", "workdir_write"]);

        let out = skillbox(&["run", "echo", "--account", "acct1", "--arg", "text=hi"]);
        assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
        let outputs: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
        assert_eq!(outputs["data"]["echo"], "hi");

        let out = skillbox(&["run", "workdir_write", "--account", "acct1", "--arg", "filename=a.txt", "--arg", "content=x"]);
        assert!(!out.status.success());

        assert!(skillbox(&["disable", "echo"]).status.success());
        let out = skillbox(&["run", "echo", "--account", "acct1", "--arg", "text=hi"]);
        assert!(!out.status.success());
        let outputs: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
        assert!(outputs["message"].as_str().unwrap().contains("disabled"));
    }
}
