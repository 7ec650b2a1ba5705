//! Static reading of Python source: logical lines, imports and top-level
//! function signatures. Nothing here executes or fully parses Python.

pub mod parser;
pub mod scanner;

pub use parser::{
    Decorator, FunctionDef, ImportStatement, ParamKind, Parameter, ParsedModule,
};
pub use scanner::{logical_lines, LogicalLine, ScanError};
