//! Integration tests for Kiln

mod build_tests {
    use kiln::build::{Engine, EngineOptions, StepEvent};
    use kiln::buildfile::load_graph;
    use kiln::cache::Cache;
    use kiln::journal::BuildJournal;
    use kiln::sandbox::{MemorySandbox, StepOutcome};
    use kiln::KilnError;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const CHAIN: &str = r#"[
        {"target_file_path": "a.txt", "is_source_file": true},
        {"target_file_path": "b.txt", "dependencies": ["a.txt"],
         "docker_image": "alpine", "build_command": "upper b.txt"},
        {"target_file_path": "c.txt", "dependencies": ["b.txt"],
         "docker_image": "alpine", "build_command": "wrap out/c.bin",
         "output_file_path": "out/c.bin"}
    ]"#;

    const DIAMOND: &str = r#"[
        {"target_file_path": "src.txt", "is_source_file": true},
        {"target_file_path": "left", "dependencies": ["src.txt"],
         "docker_image": "alpine", "build_command": "upper left"},
        {"target_file_path": "right", "dependencies": ["src.txt"],
         "docker_image": "alpine", "build_command": "upper right"},
        {"target_file_path": "joined", "dependencies": ["left", "right"],
         "docker_image": "alpine", "build_command": "wrap joined"}
    ]"#;

    /// Uppercases (or brackets) its staged inputs into the file named by
    /// the last word of the command
    fn alpine() -> MemorySandbox {
        MemorySandbox::new().with_environment("alpine", |input| {
            let staged: Vec<u8> = input.files.values().flatten().copied().collect();
            let mut words = input.command.split_whitespace();
            let verb = words.next().unwrap_or_default();
            let out = words.last().unwrap_or_default();
            let content = match verb {
                "upper" => staged.to_ascii_uppercase(),
                _ => {
                    let mut wrapped = b"[".to_vec();
                    wrapped.extend_from_slice(&staged);
                    wrapped.push(b']');
                    wrapped
                }
            };
            StepOutcome::ok().with_file(out, content)
        })
    }

    async fn project(build_file: &str, sources: &[(&str, &str)]) -> TempDir {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("build.json"), build_file).unwrap();
        for (path, content) in sources {
            std::fs::write(temp.path().join(path), content).unwrap();
        }
        temp
    }

    async fn engine(root: &Path, sandbox: Arc<MemorySandbox>, options: EngineOptions) -> Engine {
        let graph = load_graph(&root.join("build.json")).await.unwrap();
        let cache = Arc::new(Cache::open(root.join(".kiln/cache")).await.unwrap());
        Engine::new(root, graph, cache, sandbox, options)
    }

    fn quiet(_: &StepEvent) {}

    #[tokio::test]
    async fn cold_build_runs_whole_chain() {
        let temp = project(CHAIN, &[("a.txt", "hi")]).await;
        let sandbox = Arc::new(alpine());
        let engine = engine(temp.path(), sandbox.clone(), EngineOptions::default()).await;

        let outcome = engine.build("c.txt", &quiet).await.unwrap();

        assert_eq!(outcome.order, vec!["a.txt", "b.txt", "c.txt"]);
        assert_eq!(engine.cache().list().await.unwrap().len(), 3);
        assert_eq!(std::fs::read(temp.path().join("c.txt")).unwrap(), b"[HI]");

        // Only the two derived targets ran in containers
        let environments: Vec<String> = sandbox
            .executions()
            .into_iter()
            .map(|run| run.environment)
            .collect();
        assert_eq!(environments, vec!["alpine", "alpine"]);
        assert_eq!(sandbox.live_contexts(), 0);
    }

    #[tokio::test]
    async fn warm_build_runs_nothing() {
        let temp = project(CHAIN, &[("a.txt", "hi")]).await;
        let sandbox = Arc::new(alpine());
        let engine = engine(temp.path(), sandbox.clone(), EngineOptions::default()).await;

        engine.build("c.txt", &quiet).await.unwrap();
        let runs = sandbox.executions().len();

        let again = engine.build("c.txt", &quiet).await.unwrap();
        assert!(again.up_to_date());
        assert_eq!(sandbox.executions().len(), runs);
        assert_eq!(std::fs::read(temp.path().join("c.txt")).unwrap(), b"[HI]");
    }

    #[tokio::test]
    async fn changed_source_rebuilds_dependents() {
        let temp = project(CHAIN, &[("a.txt", "hi")]).await;
        let sandbox = Arc::new(alpine());
        let engine = engine(temp.path(), sandbox.clone(), EngineOptions::default()).await;
        engine.build("c.txt", &quiet).await.unwrap();

        std::fs::write(temp.path().join("a.txt"), "bye").unwrap();
        let outcome = engine.build("c.txt", &quiet).await.unwrap();

        assert_eq!(outcome.order, vec!["a.txt", "b.txt", "c.txt"]);
        assert_eq!(std::fs::read(temp.path().join("c.txt")).unwrap(), b"[BYE]");
    }

    #[tokio::test]
    async fn intermediate_target_stops_at_its_own_dependencies() {
        let temp = project(CHAIN, &[("a.txt", "hi")]).await;
        let sandbox = Arc::new(alpine());
        let engine = engine(temp.path(), sandbox.clone(), EngineOptions::default()).await;

        let outcome = engine.build("b.txt", &quiet).await.unwrap();
        assert_eq!(outcome.order, vec!["a.txt", "b.txt"]);
        assert!(!engine.cache().contains("c.txt").await.unwrap());

        let planned = engine.plan("c.txt").await.unwrap();
        assert_eq!(planned.order(), vec!["c.txt"]);
    }

    #[tokio::test]
    async fn unknown_target_changes_nothing() {
        let temp = project(CHAIN, &[("a.txt", "hi")]).await;
        let sandbox = Arc::new(alpine());
        let engine = engine(temp.path(), sandbox.clone(), EngineOptions::default()).await;

        let err = engine.build("missing.txt", &quiet).await.unwrap_err();

        assert!(matches!(err, KilnError::TargetNotFound(ref t) if t == "missing.txt"));
        assert!(engine.cache().list().await.unwrap().is_empty());
        assert!(sandbox.executions().is_empty());
    }

    #[tokio::test]
    async fn failed_step_leaves_no_artifact() {
        let temp = project(CHAIN, &[("a.txt", "hi")]).await;
        let sandbox = Arc::new(MemorySandbox::new().with_environment("alpine", |input| {
            if input.command.starts_with("wrap") {
                StepOutcome::failed(2, "wrap: command not found")
            } else {
                StepOutcome::ok().with_file("b.txt", "HI")
            }
        }));
        let engine = engine(temp.path(), sandbox.clone(), EngineOptions::default()).await;

        let err = engine.build("c.txt", &quiet).await.unwrap_err();

        assert!(matches!(err, KilnError::BuildStepFailed { .. }));
        assert!(err.to_string().contains("c.txt"));
        assert!(!temp.path().join("c.txt").exists());
        assert!(engine.cache().list().await.unwrap().is_empty());
        assert_eq!(sandbox.live_contexts(), 0);
    }

    #[tokio::test]
    async fn independent_steps_run_concurrently() {
        let temp = project(DIAMOND, &[("src.txt", "x")]).await;
        let sandbox = Arc::new(alpine().with_run_time(Duration::from_millis(50)));
        let options = EngineOptions {
            jobs: 4,
            ..EngineOptions::default()
        };
        let engine = engine(temp.path(), sandbox.clone(), options).await;

        let outcome = engine.build("joined", &quiet).await.unwrap();

        assert_eq!(sandbox.peak_concurrency(), 2);
        assert_eq!(outcome.order.last().map(String::as_str), Some("joined"));
        assert_eq!(std::fs::read(temp.path().join("joined")).unwrap(), b"[XX]");
    }

    #[tokio::test]
    async fn journal_records_run() {
        let temp = project(CHAIN, &[("a.txt", "hi")]).await;
        let journal_path = temp.path().join("journal.jsonl");
        let engine = engine(temp.path(), Arc::new(alpine()), EngineOptions::default())
            .await
            .with_journal(BuildJournal::at(&journal_path));

        let outcome = engine.build("c.txt", &quiet).await.unwrap();

        let journal = std::fs::read_to_string(&journal_path).unwrap();
        let events: Vec<serde_json::Value> = journal
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(events.first().unwrap()["event"], "run_started");
        assert_eq!(events.last().unwrap()["event"], "run_finished");
        assert!(events
            .iter()
            .all(|e| e["run_id"] == outcome.run_id.to_string()));
    }
}

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    /// A kiln invocation isolated from the user's config and state
    fn kiln(home: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("kiln");
        cmd.env("XDG_STATE_HOME", home.path().join("state"))
            .env("XDG_DATA_HOME", home.path().join("data"))
            .env("CI", "true")
            .arg("--no-local")
            .arg("-c")
            .arg(home.path().join("config.toml"))
            .arg("-C")
            .arg(home.path());
        cmd
    }

    #[test]
    fn help_displays() {
        let home = TempDir::new().unwrap();
        kiln(&home)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("incremental builds"));
    }

    #[test]
    fn version_displays() {
        let home = TempDir::new().unwrap();
        kiln(&home)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("kiln"));
    }

    #[test]
    fn config_show() {
        let home = TempDir::new().unwrap();
        kiln(&home)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[build]"))
            .stdout(predicate::str::contains("build.json"));
    }

    #[test]
    fn config_path() {
        let home = TempDir::new().unwrap();
        kiln(&home)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn cache_path_is_under_project() {
        let home = TempDir::new().unwrap();
        kiln(&home)
            .args(["cache", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains(".kiln"));
    }

    #[test]
    fn empty_cache_lists_nothing() {
        let home = TempDir::new().unwrap();
        kiln(&home)
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Cache is empty"));
    }

    #[test]
    fn build_unknown_target_fails() {
        let home = TempDir::new().unwrap();
        std::fs::write(
            home.path().join("build.json"),
            r#"[{"target_file_path": "a.txt", "is_source_file": true}]"#,
        )
        .unwrap();

        kiln(&home)
            .args(["build", "nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Target not found"));
    }

    #[test]
    fn missing_build_file_fails() {
        let home = TempDir::new().unwrap();
        kiln(&home)
            .args(["plan", "a.txt"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));
    }
}
