//! End-to-end tests of the compile pipeline with in-memory and scripted
//! native toolchains.

mod common;

use common::*;
use contract_forge::abi::MethodKind;
use contract_forge::compilation::{optimizer, WasmOptimizer};
use contract_forge::manifest::OptimizationMode;
use contract_forge::pipeline::{ContractCompiler, Severity, Stage, StageStatus};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn compiler_with(scratch: &TempDir, builder: Arc<FakeBuilder>) -> ContractCompiler {
    ContractCompiler::with_builder(test_config(scratch.path()), builder)
        .with_optimizer(WasmOptimizer::in_process())
}

#[tokio::test]
async fn test_compile_writes_wasm_and_abi() {
    let project = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    write_contract_project(project.path());
    let manifest = load_manifest(project.path()).await;

    let builder = Arc::new(FakeBuilder::new());
    let compiler = compiler_with(&scratch, builder.clone());
    let output = compiler.compile(project.path(), &manifest).await.unwrap();

    assert!(!output.cache_hit);
    assert_eq!(builder.calls(), 1);
    assert_eq!(builder.built_entries(), vec!["contract".to_string()]);
    assert_eq!(output.modules, vec!["contract", "utils", "utils.helpers"]);
    assert!(output.diagnostics.is_empty());

    let expected = optimizer::passes(&contract_wasm(), OptimizationMode::Size, false).unwrap();
    assert_eq!(output.wasm, expected);
    assert!(output.wasm.len() < contract_wasm().len());

    assert_eq!(output.wasm_path, project.path().join("build/contract.wasm"));
    assert_eq!(std::fs::read(&output.wasm_path).unwrap(), output.wasm);

    let abi: serde_json::Value =
        serde_json::from_slice(&std::fs::read(project.path().join("build/contract.abi.json")).unwrap())
            .unwrap();
    assert_eq!(
        abi,
        serde_json::json!({"methods": [
            {
                "name": "get_balance",
                "kind": "view",
                "params": [{"name": "account_id", "type": "str"}],
                "returns": "int"
            },
            {
                "name": "transfer",
                "kind": "call",
                "params": [
                    {"name": "receiver_id", "type": "str"},
                    {"name": "amount", "type": "int"}
                ],
                "returns": null
            }
        ]})
    );
    assert_eq!(output.abi.methods[0].kind, MethodKind::View);
}

#[tokio::test]
async fn test_cache_hit_skips_native_builder() {
    let project = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    write_contract_project(project.path());
    let manifest = load_manifest(project.path()).await;

    let builder = Arc::new(FakeBuilder::new());
    let compiler = compiler_with(&scratch, builder.clone());

    let first = compiler.compile(project.path(), &manifest).await.unwrap();
    std::fs::remove_file(&first.wasm_path).unwrap();
    let second = compiler.compile(project.path(), &manifest).await.unwrap();

    assert_eq!(builder.calls(), 1);
    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.cache_key, second.cache_key);
    assert_eq!(first.wasm, second.wasm);
    assert_eq!(std::fs::read(&second.wasm_path).unwrap(), second.wasm);
}

#[tokio::test]
async fn test_source_change_misses_cache() {
    let project = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    write_contract_project(project.path());
    let manifest = load_manifest(project.path()).await;

    let builder = Arc::new(FakeBuilder::new());
    let compiler = compiler_with(&scratch, builder.clone());

    let first = compiler.compile(project.path(), &manifest).await.unwrap();
    write_file(
        project.path(),
        "src/utils/helpers.py",
        "def balance_of(account):\n    return 1\n\n\ndef move(receiver, amount):\n    pass\n",
    );
    let second = compiler.compile(project.path(), &manifest).await.unwrap();

    assert_eq!(builder.calls(), 2);
    assert!(!second.cache_hit);
    assert_ne!(first.cache_key, second.cache_key);
    assert_ne!(first.frozen_digest, second.frozen_digest);
}

#[tokio::test]
async fn test_moving_project_keeps_cache_key() {
    let first_home = TempDir::new().unwrap();
    let second_home = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    write_contract_project(first_home.path());
    write_contract_project(&second_home.path().join("nested/elsewhere"));

    let first_builder = Arc::new(FakeBuilder::new());
    let first = compiler_with(&scratch, first_builder.clone())
        .compile(first_home.path(), &load_manifest(first_home.path()).await)
        .await
        .unwrap();

    let moved_root = second_home.path().join("nested/elsewhere");
    let second_builder = Arc::new(FakeBuilder::new());
    let second = compiler_with(&scratch, second_builder.clone())
        .compile(&moved_root, &load_manifest(&moved_root).await)
        .await
        .unwrap();

    assert_eq!(first.cache_key, second.cache_key);
    assert!(second.cache_hit);
    assert_eq!(second_builder.calls(), 0);
}

#[tokio::test]
async fn test_disabled_cache_always_builds() {
    let project = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    write_contract_project(project.path());
    let manifest = load_manifest(project.path()).await;

    let mut config = test_config(scratch.path());
    config.enable_cache = false;
    let builder = Arc::new(FakeBuilder::new());
    let compiler = ContractCompiler::with_builder(config, builder.clone())
        .with_optimizer(WasmOptimizer::in_process());

    for _ in 0..2 {
        let output = compiler.compile(project.path(), &manifest).await.unwrap();
        assert!(output.cache_key.is_none());
        assert!(!output.cache_hit);
    }
    assert_eq!(builder.calls(), 2);
    assert_eq!(entries_in(&scratch.path().join("cache")), 0);
}

#[tokio::test]
async fn test_progress_fires_once_per_transition() {
    let project = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    write_contract_project(project.path());
    let manifest = load_manifest(project.path()).await;

    let events: Arc<Mutex<Vec<(Stage, StageStatus)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let compiler = compiler_with(&scratch, Arc::new(FakeBuilder::new()))
        .with_progress(move |stage: Stage, status: StageStatus| sink.lock().unwrap().push((stage, status)));

    compiler.compile(project.path(), &manifest).await.unwrap();
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            (Stage::Resolve, StageStatus::Completed),
            (Stage::Freeze, StageStatus::Completed),
            (Stage::Build, StageStatus::Completed),
            (Stage::Optimize, StageStatus::Completed),
            (Stage::Abi, StageStatus::Completed),
            (Stage::Emit, StageStatus::Completed),
        ]
    );

    events.lock().unwrap().clear();
    compiler.compile(project.path(), &manifest).await.unwrap();
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            (Stage::Resolve, StageStatus::Completed),
            (Stage::Freeze, StageStatus::Completed),
            (Stage::Build, StageStatus::Cached),
            (Stage::Optimize, StageStatus::Cached),
            (Stage::Abi, StageStatus::Completed),
            (Stage::Emit, StageStatus::Completed),
        ]
    );
}

#[tokio::test]
async fn test_build_and_abi_errors_are_both_reported() {
    let project = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    write_file(project.path(), "contract.yaml", "entry: contract.py\n");
    write_file(
        project.path(),
        "contract.py",
        "@init\ndef new():\n    pass\n\n@init\ndef reset():\n    pass\n",
    );
    let manifest = load_manifest(project.path()).await;

    let events: Arc<Mutex<Vec<(Stage, StageStatus)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let compiler = compiler_with(&scratch, Arc::new(FakeBuilder::failing("link error: boom")))
        .with_progress(move |stage: Stage, status: StageStatus| sink.lock().unwrap().push((stage, status)));

    let failure = compiler.compile(project.path(), &manifest).await.unwrap_err();

    assert_eq!(failure.stage, Stage::Build);
    let stages: Vec<Stage> = failure.errors().map(|d| d.stage).collect();
    assert_eq!(stages, vec![Stage::Build, Stage::Abi]);
    assert!(failure.diagnostics[0].message.contains("boom"));
    let abi_error = failure.errors().nth(1).unwrap();
    assert_eq!(abi_error.location.as_ref().unwrap().module, "contract");
    assert_eq!(abi_error.location.as_ref().unwrap().line, Some(6));

    assert_eq!(
        events.lock().unwrap().last(),
        Some(&(Stage::Build, StageStatus::Failed))
    );
    assert_eq!(
        events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, status)| *status == StageStatus::Failed)
            .count(),
        1
    );
    assert!(!project.path().join("build/contract.wasm").exists());
}

#[tokio::test]
async fn test_abi_error_fails_build_without_output() {
    let project = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    write_file(project.path(), "contract.yaml", "entry: contract.py\n");
    write_file(
        project.path(),
        "contract.py",
        "@view\n@call\ndef confused(x: int) -> int:\n    return x\n",
    );
    let manifest = load_manifest(project.path()).await;

    let builder = Arc::new(FakeBuilder::new());
    let failure = compiler_with(&scratch, builder.clone())
        .compile(project.path(), &manifest)
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Abi);
    assert_eq!(failure.errors().count(), 1);
    assert!(!project.path().join("build/contract.wasm").exists());
    assert!(!project.path().join("build/contract.abi.json").exists());
}

#[tokio::test]
async fn test_unwritable_abi_output_keeps_previous_wasm() {
    let project = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    write_contract_project(project.path());
    write_file(project.path(), "build/contract.wasm", "previous");
    std::fs::create_dir_all(project.path().join("build/contract.abi.json")).unwrap();
    let manifest = load_manifest(project.path()).await;

    let failure = compiler_with(&scratch, Arc::new(FakeBuilder::new()))
        .compile(project.path(), &manifest)
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Emit);
    let error = failure.errors().next().unwrap();
    assert!(error.message.contains("contract.abi.json"));
    assert_eq!(
        std::fs::read(project.path().join("build/contract.wasm")).unwrap(),
        b"previous"
    );
    assert_eq!(entries_in(&project.path().join("build")), 2);
}

#[tokio::test]
async fn test_unresolved_import_stops_before_building() {
    let project = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    write_file(project.path(), "contract.yaml", "entry: contract.py\n");
    write_file(
        project.path(),
        "contract.py",
        "import near\n\nimport missing_dependency\n",
    );
    let manifest = load_manifest(project.path()).await;

    let builder = Arc::new(FakeBuilder::new());
    let failure = compiler_with(&scratch, builder.clone())
        .compile(project.path(), &manifest)
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Resolve);
    assert_eq!(builder.calls(), 0);
    let error = failure.errors().next().unwrap();
    assert!(error.message.contains("missing_dependency"));
    let location = error.location.as_ref().unwrap();
    assert_eq!(location.module, "contract");
    assert_eq!(location.line, Some(3));
}

#[tokio::test]
async fn test_warnings_do_not_halt_the_build() {
    let project = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    write_contract_project(project.path());
    write_file(
        project.path(),
        "contract.yaml",
        "entry: src/contract.py\nexclude: [numpy]\npackage-roots: [site]\npin:\n  requests: \">=3.0\"\n",
    );
    write_file(project.path(), "site/requests/__init__.py", "");
    write_file(project.path(), "site/requests-2.31.0.dist-info/top_level.txt", "requests\n");
    let manifest = load_manifest(project.path()).await;

    let output = compiler_with(&scratch, Arc::new(FakeBuilder::new()))
        .compile(project.path(), &manifest)
        .await
        .unwrap();

    assert_eq!(output.diagnostics.len(), 1);
    assert_eq!(output.diagnostics[0].severity, Severity::Warning);
    assert_eq!(output.diagnostics[0].stage, Stage::Resolve);
    assert!(output.diagnostics[0].message.contains("requests"));
}

#[tokio::test]
async fn test_concurrent_builds_share_one_cache() {
    let scratch = TempDir::new().unwrap();
    let projects: Vec<TempDir> = (0..4).map(|_| TempDir::new().unwrap()).collect();
    for project in &projects {
        write_contract_project(project.path());
    }

    let builder = Arc::new(FakeBuilder::new());
    let compiler = compiler_with(&scratch, builder.clone());

    let mut manifests = Vec::new();
    for project in &projects {
        manifests.push(load_manifest(project.path()).await);
    }
    let builds = projects
        .iter()
        .zip(&manifests)
        .map(|(project, manifest)| compiler.compile(project.path(), manifest));
    let outputs = futures::future::join_all(builds).await;

    let keys: Vec<_> = outputs
        .into_iter()
        .map(|o| o.unwrap().cache_key.unwrap())
        .collect();
    assert!(keys.windows(2).all(|w| w[0] == w[1]));

    let rebuilt = compiler
        .compile(projects[0].path(), &manifests[0])
        .await
        .unwrap();
    assert!(rebuilt.cache_hit);
}

#[cfg(unix)]
mod scripted_toolchain {
    use super::*;
    use contract_forge::pipeline::CompilerConfig;
    use std::time::{Duration, Instant};

    /// An empty but valid WASM module
    const EMPTY_MODULE: &str = r#"printf '\000asm\001\000\000\000' > "$out""#;

    fn config(scratch: &TempDir, toolchain: &std::path::Path, timeout: Duration) -> CompilerConfig {
        let mut config = test_config(scratch.path());
        config.toolchain = Some(toolchain.display().to_string());
        config.build_timeout = timeout;
        config
    }

    #[tokio::test]
    async fn test_successful_build_removes_workspace() {
        let project = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let tools = TempDir::new().unwrap();
        write_contract_project(project.path());
        let manifest = load_manifest(project.path()).await;

        let record = tools.path().join("manifest-copy.py");
        let toolchain = write_toolchain(
            tools.path(),
            &format!(
                "cp \"$FROZEN_MANIFEST\" \"{}\"\ntest -f frozen/utils/helpers.py || exit 9\n{EMPTY_MODULE}",
                record.display()
            ),
        );

        let compiler = ContractCompiler::new(config(&scratch, &toolchain, Duration::from_secs(30)))
            .with_optimizer(WasmOptimizer::in_process());
        let output = compiler.compile(project.path(), &manifest).await.unwrap();

        assert_eq!(output.wasm, b"\0asm\x01\0\0\0".to_vec());
        assert_eq!(entries_in(&scratch.path().join("workspaces")), 0);

        let manifest_py = std::fs::read_to_string(record).unwrap();
        assert!(manifest_py.contains("module(\"contract.py\", base_path=\"frozen\")"));
        assert!(manifest_py.contains("module(\"utils/__init__.py\", base_path=\"frozen\")"));
    }

    #[tokio::test]
    async fn test_failed_build_reports_stderr_and_cleans_up() {
        let project = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let tools = TempDir::new().unwrap();
        write_contract_project(project.path());
        let manifest = load_manifest(project.path()).await;

        let toolchain = write_toolchain(tools.path(), "echo 'frozen module contract: bad opcode' >&2\nexit 3");
        let failure = ContractCompiler::new(config(&scratch, &toolchain, Duration::from_secs(30)))
            .with_optimizer(WasmOptimizer::in_process())
            .compile(project.path(), &manifest)
            .await
            .unwrap_err();

        assert_eq!(failure.stage, Stage::Build);
        let message = &failure.errors().next().unwrap().message;
        assert!(message.contains("exit code 3"), "{message}");
        assert!(message.contains("bad opcode"), "{message}");
        assert_eq!(entries_in(&scratch.path().join("workspaces")), 0);
    }

    #[tokio::test]
    async fn test_zero_exit_without_output_is_an_error() {
        let project = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let tools = TempDir::new().unwrap();
        write_contract_project(project.path());
        let manifest = load_manifest(project.path()).await;

        let toolchain = write_toolchain(tools.path(), "exit 0");
        let failure = ContractCompiler::new(config(&scratch, &toolchain, Duration::from_secs(30)))
            .with_optimizer(WasmOptimizer::in_process())
            .compile(project.path(), &manifest)
            .await
            .unwrap_err();

        assert_eq!(failure.stage, Stage::Build);
        assert!(failure.errors().next().unwrap().message.contains("no output"));
        assert_eq!(entries_in(&scratch.path().join("workspaces")), 0);
    }

    #[tokio::test]
    async fn test_timed_out_toolchain_is_killed() {
        let project = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let tools = TempDir::new().unwrap();
        write_contract_project(project.path());
        let manifest = load_manifest(project.path()).await;

        let pid_file = tools.path().join("toolchain.pid");
        let toolchain = write_toolchain(
            tools.path(),
            &format!(
                "echo $$ > \"{}\"\necho 'compiling frozen modules' >&2\nexec sleep 30",
                pid_file.display()
            ),
        );

        let started = Instant::now();
        let failure = ContractCompiler::new(config(&scratch, &toolchain, Duration::from_secs(1)))
            .with_optimizer(WasmOptimizer::in_process())
            .compile(project.path(), &manifest)
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(20));

        assert_eq!(failure.stage, Stage::Build);
        let message = &failure.errors().next().unwrap().message;
        assert!(message.contains("timed out after 1s"), "{message}");
        assert!(message.contains("compiling frozen modules"), "{message}");
        assert_eq!(entries_in(&scratch.path().join("workspaces")), 0);

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let alive = std::process::Command::new("kill")
            .args(["-0", pid.trim()])
            .stderr(std::process::Stdio::null())
            .status()
            .unwrap()
            .success();
        assert!(!alive, "toolchain process {} is still running", pid.trim());
    }
}
