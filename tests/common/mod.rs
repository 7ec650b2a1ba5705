#![allow(dead_code)]

use async_trait::async_trait;
use contract_forge::compilation::{
    BuildFlags, NativeBuildError, NativeBuilder, WasmOptSetting,
};
use contract_forge::freezer::{BaseLibrary, FrozenManifest, ModuleFreezer};
use contract_forge::manifest::ProjectManifest;
use contract_forge::pipeline::CompilerConfig;
use contract_forge::resolver::DependencyResolver;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use wasm_encoder::{
    CodeSection, CustomSection, ExportKind, ExportSection, Function, FunctionSection,
    Instruction, Module, TypeSection, ValType,
};

pub const CONTRACT_SOURCE: &str = r#"import near
from near import view, call
import numpy
from utils import helpers


@view
def get_balance(account_id: str) -> int:
    return helpers.balance_of(account_id)


@call
def transfer(receiver_id: str, amount: int) -> None:
    helpers.move(receiver_id, amount)
"#;

pub const MANIFEST: &str = r#"entry: src/contract.py
exclude: [numpy]
"#;

pub fn write_file(root: &Path, relative: &str, content: &str) -> PathBuf {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, content).unwrap();
    path
}

/// A small contract project: entry, one local package and a manifest
pub fn write_contract_project(root: &Path) {
    write_file(root, "contract.yaml", MANIFEST);
    write_file(root, "src/contract.py", CONTRACT_SOURCE);
    write_file(root, "src/utils/__init__.py", "");
    write_file(
        root,
        "src/utils/helpers.py",
        "def balance_of(account):\n    return 0\n\n\ndef move(receiver, amount):\n    pass\n",
    );
}

pub async fn load_manifest(root: &Path) -> ProjectManifest {
    ProjectManifest::load_from_dir(root).await.unwrap()
}

pub async fn freeze_project(root: &Path) -> FrozenManifest {
    let manifest = load_manifest(root).await;
    let base = BaseLibrary::default();
    let resolution = DependencyResolver::new(root, &manifest, &base)
        .unwrap()
        .resolve()
        .await
        .unwrap();
    ModuleFreezer::new(&base)
        .freeze(&resolution.graph)
        .await
        .unwrap()
}

/// Config that keeps every directory under `scratch` and never runs wasm-opt
pub fn test_config(scratch: &Path) -> CompilerConfig {
    CompilerConfig {
        temp_dir: scratch.join("workspaces"),
        cache_dir: scratch.join("cache"),
        build_timeout: Duration::from_secs(30),
        wasm_opt: WasmOptSetting::Disabled,
        ..CompilerConfig::default()
    }
}

/// Exports `main`, which calls `helper`; `unused` is dead code. Carries a
/// `name` custom section.
pub fn contract_wasm() -> Vec<u8> {
    let mut module = Module::new();

    let mut types = TypeSection::new();
    types.ty().function(vec![], vec![ValType::I32]);
    module.section(&types);

    let mut functions = FunctionSection::new();
    for _ in 0..3 {
        functions.function(0);
    }
    module.section(&functions);

    let mut exports = ExportSection::new();
    exports.export("main", ExportKind::Func, 0);
    module.section(&exports);

    let mut code = CodeSection::new();
    let mut main = Function::new(vec![]);
    main.instruction(&Instruction::Call(1));
    main.instruction(&Instruction::End);
    code.function(&main);

    let mut helper = Function::new(vec![]);
    helper.instruction(&Instruction::I32Const(42));
    helper.instruction(&Instruction::End);
    code.function(&helper);

    let mut unused = Function::new(vec![(1, ValType::I64)]);
    for i in 0..16 {
        unused.instruction(&Instruction::I32Const(i));
        unused.instruction(&Instruction::Drop);
    }
    unused.instruction(&Instruction::I32Const(0));
    unused.instruction(&Instruction::End);
    code.function(&unused);
    module.section(&code);

    module.section(&CustomSection {
        name: Cow::Borrowed("name"),
        data: Cow::Owned(Vec::new()),
    });

    module.finish()
}

/// What a `FakeBuilder` does when asked to build
#[derive(Debug, Clone)]
pub enum FakeOutcome {
    Wasm(Vec<u8>),
    Fail { stderr: String },
}

/// In-memory native builder that records its invocations
pub struct FakeBuilder {
    pub version: String,
    pub outcome: FakeOutcome,
    pub delay: Duration,
    calls: AtomicUsize,
    entries: Mutex<Vec<String>>,
}

impl FakeBuilder {
    pub fn new() -> Self {
        Self::with_outcome(FakeOutcome::Wasm(contract_wasm()))
    }

    pub fn failing(stderr: &str) -> Self {
        Self::with_outcome(FakeOutcome::Fail {
            stderr: stderr.to_string(),
        })
    }

    pub fn with_outcome(outcome: FakeOutcome) -> Self {
        Self {
            version: "fake-mpy 1.0.0".to_string(),
            outcome,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn built_entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl NativeBuilder for FakeBuilder {
    async fn toolchain_version(&self) -> Result<String, NativeBuildError> {
        Ok(self.version.clone())
    }

    async fn build(
        &self,
        manifest: &FrozenManifest,
        _flags: &BuildFlags,
    ) -> Result<Vec<u8>, NativeBuildError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().unwrap().push(manifest.entry.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.outcome {
            FakeOutcome::Wasm(wasm) => Ok(wasm.clone()),
            FakeOutcome::Fail { stderr } => Err(NativeBuildError::Failed {
                status: "exit code 1".to_string(),
                stderr: stderr.clone(),
            }),
        }
    }
}

/// Write an executable shell script
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = write_file(dir, name, &format!("#!/bin/sh\n{body}"));
    let mut permissions = std::fs::metadata(&path).unwrap().permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).unwrap();
    path
}

/// Toolchain script: answers `--version`, then runs `build_body` with
/// `$out` set to the `--output` argument
#[cfg(unix)]
pub fn write_toolchain(dir: &Path, build_body: &str) -> PathBuf {
    let body = format!(
        r#"if [ "$1" = "--version" ]; then
  echo "fake-mpy 2.1.0"
  exit 0
fi
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "--output" ]; then
    out="$2"
  fi
  shift
done
{build_body}
"#
    );
    write_script(dir, "fake-toolchain.sh", &body)
}

/// Number of entries left in a directory (0 when it does not exist)
pub fn entries_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
