//! WASM optimization: in-process section passes plus optional `wasm-opt`.
//!
//! `size` snips functions unreachable from the module's roots and strips
//! every custom section; `speed` strips DWARF and source-map sections but
//! keeps `name`; `debug` returns its input. When `wasm-opt` ran, a
//! `contract-forge.opt` custom section records the mode so a second run in
//! the same mode does not invoke it again.

use super::error::OptimizationError;
use super::process::{output_within, VERSION_QUERY_TIMEOUT};
use crate::manifest::OptimizationMode;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};
use wasm_encoder::{CodeSection, CustomSection, Module, RawSection};
use wasmparser::{
    BinaryReaderError, ConstExpr, ElementItems, Encoding, ExternalKind, FunctionBody, Operator,
    Parser, Payload, TableInit, TypeRef,
};

/// Custom section recording that `wasm-opt` already ran
pub const OPT_MARKER_SECTION: &str = "contract-forge.opt";

/// Bumped whenever the in-process passes change their output
const PASSES_REVISION: u32 = 1;

/// Body of a snipped function: no locals, `unreachable`, `end`
const UNREACHABLE_BODY: &[u8] = &[0x00, 0x00, 0x0b];

/// How to find the external `wasm-opt`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WasmOptSetting {
    #[default]
    Auto,
    Disabled,
    Path(PathBuf),
}

impl FromStr for WasmOptSetting {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "auto" => WasmOptSetting::Auto,
            "off" | "none" | "disabled" => WasmOptSetting::Disabled,
            path => WasmOptSetting::Path(PathBuf::from(path)),
        })
    }
}

impl fmt::Display for WasmOptSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WasmOptSetting::Auto => f.write_str("auto"),
            WasmOptSetting::Disabled => f.write_str("off"),
            WasmOptSetting::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone)]
struct WasmOpt {
    program: PathBuf,
    version: String,
    timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct WasmOptimizer {
    wasm_opt: Option<WasmOpt>,
}

impl WasmOptimizer {
    /// Optimizer that never runs external tools
    pub fn in_process() -> Self {
        Self::default()
    }

    /// Find `wasm-opt` per `setting`. Each run of it is bounded by `timeout`.
    pub async fn detect(
        setting: &WasmOptSetting,
        timeout: Duration,
    ) -> Result<Self, OptimizationError> {
        let program = match setting {
            WasmOptSetting::Disabled => return Ok(Self::in_process()),
            WasmOptSetting::Auto => match which::which("wasm-opt") {
                Ok(path) => path,
                Err(_) => {
                    debug!("wasm-opt not found, using in-process passes only");
                    return Ok(Self::in_process());
                }
            },
            WasmOptSetting::Path(path) => path.clone(),
        };

        match query_version(&program, timeout.min(VERSION_QUERY_TIMEOUT)).await {
            Ok(version) => {
                info!("Using {} ({})", program.display(), version);
                Ok(Self {
                    wasm_opt: Some(WasmOpt {
                        program,
                        version,
                        timeout,
                    }),
                })
            }
            Err(reason) if *setting == WasmOptSetting::Auto => {
                warn!("Ignoring wasm-opt at {}: {}", program.display(), reason);
                Ok(Self::in_process())
            }
            Err(reason) => Err(OptimizationError::ToolUnavailable {
                path: program.display().to_string(),
                reason,
            }),
        }
    }

    /// Identifies everything about the optimizer that affects its output
    pub fn fingerprint(&self) -> String {
        match &self.wasm_opt {
            Some(tool) => format!("passes-v{PASSES_REVISION}+{}", tool.version),
            None => format!("passes-v{PASSES_REVISION}"),
        }
    }

    pub async fn optimize(
        &self,
        wasm: &[u8],
        mode: OptimizationMode,
        keep_debug: bool,
    ) -> Result<Vec<u8>, OptimizationError> {
        validate_input(wasm)?;
        if mode == OptimizationMode::Debug {
            return Ok(wasm.to_vec());
        }

        let already_optimized = read_marker(wasm) == Some(mode);
        let (input, marker) = match &self.wasm_opt {
            _ if already_optimized => (Cow::Borrowed(wasm), Some(mode)),
            Some(tool) => (Cow::Owned(tool.run(wasm, mode, keep_debug).await?), Some(mode)),
            None => (Cow::Borrowed(wasm), None),
        };

        let mut output = run_passes(&input, mode, keep_debug, marker)?;

        if mode == OptimizationMode::Size && output.len() > wasm.len() {
            debug!(
                "wasm-opt output ({} bytes) is larger than its input ({} bytes), keeping in-process result",
                output.len(),
                wasm.len()
            );
            output = run_passes(wasm, mode, keep_debug, None)?;
        }

        validate_output(&output)?;
        info!(
            "Optimized {} -> {} bytes (mode {})",
            wasm.len(),
            output.len(),
            mode
        );
        Ok(output)
    }
}

/// In-process passes alone, as `optimize` applies them without `wasm-opt`
pub fn passes(
    wasm: &[u8],
    mode: OptimizationMode,
    keep_debug: bool,
) -> Result<Vec<u8>, OptimizationError> {
    validate_input(wasm)?;
    if mode == OptimizationMode::Debug {
        return Ok(wasm.to_vec());
    }

    let marker = (read_marker(wasm) == Some(mode)).then_some(mode);
    let output = run_passes(wasm, mode, keep_debug, marker)?;
    validate_output(&output)?;
    Ok(output)
}

fn validate_input(wasm: &[u8]) -> Result<(), OptimizationError> {
    wasmparser::validate(wasm).map_err(|e| OptimizationError::Malformed {
        reason: e.to_string(),
    })?;
    Ok(())
}

fn validate_output(wasm: &[u8]) -> Result<(), OptimizationError> {
    wasmparser::validate(wasm).map_err(|e| OptimizationError::InvalidOutput {
        reason: e.to_string(),
    })?;
    Ok(())
}

fn run_passes(
    wasm: &[u8],
    mode: OptimizationMode,
    keep_debug: bool,
    marker: Option<OptimizationMode>,
) -> Result<Vec<u8>, OptimizationError> {
    let live = match mode {
        OptimizationMode::Size => Some(live_functions(wasm).map_err(malformed)?),
        _ => None,
    };

    rewrite(
        wasm,
        live.as_deref(),
        |name| keep_custom_section(name, mode, keep_debug),
        marker,
    )
}

fn malformed(e: BinaryReaderError) -> OptimizationError {
    OptimizationError::Malformed {
        reason: e.to_string(),
    }
}

fn is_debug_section(name: &str) -> bool {
    name.starts_with(".debug_") || name == "sourceMappingURL" || name == "external_debug_info"
}

fn keep_custom_section(name: &str, mode: OptimizationMode, keep_debug: bool) -> bool {
    if name == OPT_MARKER_SECTION {
        return false;
    }
    let debug_section = is_debug_section(name);
    if keep_debug && (debug_section || name == "name") {
        return true;
    }
    match mode {
        OptimizationMode::Size => false,
        OptimizationMode::Speed => !debug_section,
        OptimizationMode::Debug => true,
    }
}

fn read_marker(wasm: &[u8]) -> Option<OptimizationMode> {
    Parser::new(0)
        .parse_all(wasm)
        .filter_map(Result::ok)
        .find_map(|payload| match payload {
            Payload::CustomSection(reader) if reader.name() == OPT_MARKER_SECTION => {
                std::str::from_utf8(reader.data()).ok()?.parse().ok()
            }
            _ => None,
        })
}

/// Liveness of each defined function, by defined-function index
fn live_functions(wasm: &[u8]) -> Result<Vec<bool>, BinaryReaderError> {
    let mut imported_functions = 0u32;
    let mut roots = Vec::new();
    let mut bodies: Vec<FunctionBody<'_>> = Vec::new();

    for payload in Parser::new(0).parse_all(wasm) {
        match payload? {
            Payload::ImportSection(reader) => {
                for import in reader {
                    if let TypeRef::Func(_) = import?.ty {
                        imported_functions += 1;
                    }
                }
            }
            Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export?;
                    if export.kind == ExternalKind::Func {
                        roots.push(export.index);
                    }
                }
            }
            Payload::StartSection { func, .. } => roots.push(func),
            Payload::ElementSection(reader) => {
                for element in reader {
                    match element?.items {
                        ElementItems::Functions(functions) => {
                            for function in functions {
                                roots.push(function?);
                            }
                        }
                        ElementItems::Expressions(_, exprs) => {
                            for expr in exprs {
                                collect_ref_funcs(&expr?, &mut roots)?;
                            }
                        }
                    }
                }
            }
            Payload::GlobalSection(reader) => {
                for global in reader {
                    collect_ref_funcs(&global?.init_expr, &mut roots)?;
                }
            }
            Payload::TableSection(reader) => {
                for table in reader {
                    if let TableInit::Expr(expr) = table?.init {
                        collect_ref_funcs(&expr, &mut roots)?;
                    }
                }
            }
            Payload::CodeSectionEntry(body) => bodies.push(body),
            _ => {}
        }
    }

    let mut live = vec![false; bodies.len()];
    let mut worklist = roots;
    while let Some(function) = worklist.pop() {
        let Some(defined) = function.checked_sub(imported_functions) else {
            continue;
        };
        let defined = defined as usize;
        if defined >= live.len() || live[defined] {
            continue;
        }
        live[defined] = true;
        collect_callees(&bodies[defined], &mut worklist)?;
    }

    debug!(
        "{} of {} defined functions are reachable",
        live.iter().filter(|l| **l).count(),
        live.len()
    );
    Ok(live)
}

fn collect_ref_funcs(expr: &ConstExpr<'_>, out: &mut Vec<u32>) -> Result<(), BinaryReaderError> {
    let mut ops = expr.get_operators_reader();
    while !ops.eof() {
        if let Operator::RefFunc { function_index } = ops.read()? {
            out.push(function_index);
        }
    }
    Ok(())
}

fn collect_callees(body: &FunctionBody<'_>, out: &mut Vec<u32>) -> Result<(), BinaryReaderError> {
    let mut ops = body.get_operators_reader()?;
    while !ops.eof() {
        match ops.read()? {
            Operator::Call { function_index }
            | Operator::ReturnCall { function_index }
            | Operator::RefFunc { function_index } => out.push(function_index),
            _ => {}
        }
    }
    Ok(())
}

/// Re-encode the module section by section. Dead function bodies are
/// replaced, custom sections filtered, everything else copied verbatim.
fn rewrite(
    wasm: &[u8],
    live: Option<&[bool]>,
    keep_custom: impl Fn(&str) -> bool,
    marker: Option<OptimizationMode>,
) -> Result<Vec<u8>, OptimizationError> {
    let mut module = Module::new();
    let mut code = CodeSection::new();
    let mut remaining_bodies = 0u32;
    let mut body_index = 0usize;

    for payload in Parser::new(0).parse_all(wasm) {
        match payload.map_err(malformed)? {
            Payload::Version {
                encoding: Encoding::Component,
                ..
            } => {
                return Err(OptimizationError::Malformed {
                    reason: "components are not supported".to_string(),
                });
            }
            Payload::Version { .. } | Payload::End(_) => {}
            Payload::CodeSectionStart { count, .. } => {
                remaining_bodies = count;
                if count == 0 {
                    module.section(&code);
                }
            }
            Payload::CodeSectionEntry(body) => {
                let bytes = &wasm[body.range()];
                let dead = live.is_some_and(|live| !live.get(body_index).copied().unwrap_or(true));
                if dead && bytes.len() > UNREACHABLE_BODY.len() {
                    code.raw(UNREACHABLE_BODY);
                } else {
                    code.raw(bytes);
                }
                body_index += 1;
                remaining_bodies = remaining_bodies.saturating_sub(1);
                if remaining_bodies == 0 {
                    module.section(&code);
                }
            }
            Payload::CustomSection(reader) => {
                if keep_custom(reader.name()) {
                    module.section(&CustomSection {
                        name: Cow::Borrowed(reader.name()),
                        data: Cow::Borrowed(reader.data()),
                    });
                }
            }
            other => {
                if let Some((id, range)) = other.as_section() {
                    module.section(&RawSection {
                        id,
                        data: &wasm[range],
                    });
                }
            }
        }
    }

    if let Some(mode) = marker {
        module.section(&CustomSection {
            name: Cow::Borrowed(OPT_MARKER_SECTION),
            data: Cow::Borrowed(mode.as_str().as_bytes()),
        });
    }

    Ok(module.finish())
}

async fn query_version(program: &Path, timeout: Duration) -> Result<String, String> {
    let mut cmd = Command::new(program);
    cmd.arg("--version");
    let output = output_within(cmd, timeout)
        .await
        .map_err(|e| e.to_string())?;
    if !output.status.success() {
        return Err(format!("`--version` exited with {}", output.status));
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string())
}

impl WasmOpt {
    async fn run(
        &self,
        wasm: &[u8],
        mode: OptimizationMode,
        keep_debug: bool,
    ) -> Result<Vec<u8>, OptimizationError> {
        let scratch = tempfile::Builder::new()
            .prefix("contract-forge-opt-")
            .tempdir()?;
        let input = scratch.path().join("input.wasm");
        let output = scratch.path().join("output.wasm");
        tokio::fs::write(&input, wasm).await?;

        let level = match mode {
            OptimizationMode::Speed => "-O3",
            _ => "-Oz",
        };

        let mut cmd = Command::new(&self.program);
        cmd.arg(&input).arg(level).arg("-o").arg(&output);
        if keep_debug {
            cmd.arg("--debuginfo");
        }

        debug!("Running {} {}", self.program.display(), level);
        let result = output_within(cmd, self.timeout)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::TimedOut => OptimizationError::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                },
                _ => OptimizationError::Io(e),
            })?;
        if !result.status.success() {
            return Err(OptimizationError::ExternalTool {
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
            });
        }

        Ok(tokio::fs::read(&output).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_encoder::{
        CodeSection, ElementSection, Elements, EntityType, ExportKind, ExportSection, Function,
        FunctionSection, ImportSection, Instruction, TypeSection, ValType,
    };

    /// Imports `env.log`; exports `main` (calls `helper`); `dead` is never
    /// referenced; `table_target` is only referenced from a declared element
    /// segment.
    fn fixture() -> Vec<u8> {
        let mut module = Module::new();

        let mut types = TypeSection::new();
        types.ty().function(vec![], vec![]);
        types.ty().function(vec![], vec![ValType::I32]);
        module.section(&types);

        let mut imports = ImportSection::new();
        imports.import("env", "log", EntityType::Function(0));
        module.section(&imports);

        let mut functions = FunctionSection::new();
        for ty in [0, 1, 1, 0] {
            functions.function(ty);
        }
        module.section(&functions);

        let mut exports = ExportSection::new();
        exports.export("main", ExportKind::Func, 1);
        module.section(&exports);

        let mut elements = ElementSection::new();
        elements.declared(Elements::Functions(Cow::Borrowed(&[4])));
        module.section(&elements);

        let mut code = CodeSection::new();

        let mut main = Function::new(vec![]);
        main.instruction(&Instruction::Call(0));
        main.instruction(&Instruction::Call(2));
        main.instruction(&Instruction::Drop);
        main.instruction(&Instruction::End);
        code.function(&main);

        let mut helper = Function::new(vec![]);
        helper.instruction(&Instruction::I32Const(7));
        helper.instruction(&Instruction::End);
        code.function(&helper);

        let mut dead = Function::new(vec![(2, ValType::I32)]);
        for i in 0..20 {
            dead.instruction(&Instruction::I32Const(i));
            dead.instruction(&Instruction::Drop);
        }
        dead.instruction(&Instruction::I32Const(0));
        dead.instruction(&Instruction::End);
        code.function(&dead);

        let mut table_target = Function::new(vec![]);
        table_target.instruction(&Instruction::Nop);
        table_target.instruction(&Instruction::Nop);
        table_target.instruction(&Instruction::End);
        code.function(&table_target);
        module.section(&code);

        module.section(&CustomSection {
            name: Cow::Borrowed("name"),
            data: Cow::Borrowed(&[]),
        });
        module.section(&CustomSection {
            name: Cow::Borrowed(".debug_info"),
            data: Cow::Borrowed(&[1, 2, 3, 4, 5, 6, 7, 8]),
        });
        module.section(&CustomSection {
            name: Cow::Borrowed("producers"),
            data: Cow::Borrowed(&[0]),
        });

        module.finish()
    }

    fn custom_section_names(wasm: &[u8]) -> Vec<String> {
        Parser::new(0)
            .parse_all(wasm)
            .filter_map(Result::ok)
            .filter_map(|p| match p {
                Payload::CustomSection(reader) => Some(reader.name().to_string()),
                _ => None,
            })
            .collect()
    }

    fn bodies(wasm: &[u8]) -> Vec<Vec<u8>> {
        Parser::new(0)
            .parse_all(wasm)
            .filter_map(Result::ok)
            .filter_map(|p| match p {
                Payload::CodeSectionEntry(body) => Some(wasm[body.range()].to_vec()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_fixture_is_valid() {
        wasmparser::validate(&fixture()).unwrap();
    }

    #[test]
    fn test_liveness_follows_calls_and_element_segments() {
        let live = live_functions(&fixture()).unwrap();
        assert_eq!(live, vec![true, true, false, true]);
    }

    #[test]
    fn test_size_mode_snips_dead_code_and_strips_custom_sections() {
        let input = fixture();
        let output = passes(&input, OptimizationMode::Size, false).unwrap();

        assert!(output.len() < input.len());
        assert!(custom_section_names(&output).is_empty());

        let bodies = bodies(&output);
        assert_eq!(bodies.len(), 4);
        assert_eq!(bodies[2], UNREACHABLE_BODY);
        assert_ne!(bodies[0], UNREACHABLE_BODY);
        assert_ne!(bodies[3], UNREACHABLE_BODY);
    }

    #[test]
    fn test_speed_mode_keeps_name_section() {
        let output = passes(&fixture(), OptimizationMode::Speed, false).unwrap();
        assert_eq!(custom_section_names(&output), vec!["name", "producers"]);
        assert_eq!(bodies(&output), bodies(&fixture()));
    }

    #[test]
    fn test_debug_info_is_kept_when_requested() {
        let output = passes(&fixture(), OptimizationMode::Size, true).unwrap();
        assert_eq!(custom_section_names(&output), vec!["name", ".debug_info"]);
    }

    #[test]
    fn test_debug_mode_is_identity() {
        let input = fixture();
        assert_eq!(passes(&input, OptimizationMode::Debug, false).unwrap(), input);
    }

    #[test]
    fn test_passes_are_idempotent() {
        for mode in [OptimizationMode::Size, OptimizationMode::Speed] {
            let once = passes(&fixture(), mode, false).unwrap();
            let twice = passes(&once, mode, false).unwrap();
            assert_eq!(once, twice, "mode {mode}");
        }
    }

    #[test]
    fn test_malformed_input_is_rejected() {
        let result = passes(b"\0asm\x01\0\0\0garbage", OptimizationMode::Size, false);
        assert!(matches!(result, Err(OptimizationError::Malformed { .. })));
        assert!(matches!(
            passes(b"not wasm", OptimizationMode::Debug, false),
            Err(OptimizationError::Malformed { .. })
        ));
    }

    #[test]
    fn test_marker_is_carried_for_same_mode_only() {
        let input = fixture();
        let marked = rewrite(&input, None, |_| true, Some(OptimizationMode::Size)).unwrap();
        assert_eq!(read_marker(&marked), Some(OptimizationMode::Size));

        let size = passes(&marked, OptimizationMode::Size, false).unwrap();
        assert_eq!(custom_section_names(&size), vec![OPT_MARKER_SECTION]);

        let speed = passes(&marked, OptimizationMode::Speed, false).unwrap();
        assert!(!custom_section_names(&speed).contains(&OPT_MARKER_SECTION.to_string()));
    }

    #[tokio::test]
    async fn test_in_process_optimizer_matches_passes() {
        let optimizer = WasmOptimizer::in_process();
        let input = fixture();
        let optimized = optimizer
            .optimize(&input, OptimizationMode::Size, false)
            .await
            .unwrap();
        assert_eq!(optimized, passes(&input, OptimizationMode::Size, false).unwrap());
        assert_eq!(optimizer.fingerprint(), format!("passes-v{PASSES_REVISION}"));
    }

    #[test]
    fn test_wasm_opt_setting_from_str() {
        assert_eq!("auto".parse::<WasmOptSetting>().unwrap(), WasmOptSetting::Auto);
        assert_eq!("off".parse::<WasmOptSetting>().unwrap(), WasmOptSetting::Disabled);
        assert_eq!(
            "/usr/bin/wasm-opt".parse::<WasmOptSetting>().unwrap(),
            WasmOptSetting::Path(PathBuf::from("/usr/bin/wasm-opt"))
        );
    }
}
