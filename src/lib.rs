//! Contract Forge - Python smart contract compiler
//!
//! Resolves the modules reachable from a contract's entry file, freezes them
//! into a deterministic manifest, drives the native toolchain to produce WASM,
//! optimizes the binary and extracts the contract ABI.

pub mod abi;
pub mod cli;
pub mod compilation;
pub mod freezer;
pub mod manifest;
pub mod pipeline;
pub mod python;
pub mod resolver;
pub mod utils;

pub use abi::{AbiDescriptor, AbiError, AbiExtractor, MethodDescriptor, MethodKind};
pub use manifest::{ManifestError, OptimizationMode, ProjectManifest};
pub use pipeline::{
    BuildFailure, BuildOutput, CompileError, CompilerConfig, ContractCompiler, Diagnostic,
    ProgressListener, Stage, StageStatus,
};
