//! ABI metadata derived from the entry module's decorated functions.

pub mod error;
pub mod types;

pub use error::AbiError;
pub use types::{parameter_tag, return_tag, TypeTag, UNKNOWN};

use crate::python::{FunctionDef, ParamKind, ParsedModule};
use crate::resolver::ModuleNode;
use crate::utils::sha256_hex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodKind {
    View,
    Call,
    Init,
}

impl MethodKind {
    pub fn from_decorator(segment: &str) -> Option<Self> {
        match segment {
            "view" => Some(MethodKind::View),
            "call" => Some(MethodKind::Call),
            "init" => Some(MethodKind::Init),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MethodKind::View => "view",
            MethodKind::Call => "call",
            MethodKind::Init => "init",
        }
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    pub kind: MethodKind,
    pub params: Vec<ParamDescriptor>,
    pub returns: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub panics: bool,
}

/// Exported surface of a contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiDescriptor {
    pub methods: Vec<MethodDescriptor>,
    /// Digest of the entry source the descriptor was read from
    #[serde(skip)]
    pub source_digest: String,
}

impl AbiDescriptor {
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }
}

pub struct AbiExtractor;

impl AbiExtractor {
    /// Extract the ABI of a resolved entry module
    pub fn extract_from_node(node: &ModuleNode) -> Result<AbiDescriptor, AbiError> {
        let source = std::str::from_utf8(&node.source).map_err(|e| AbiError::Syntax {
            module: node.name.clone(),
            line: 1,
            reason: format!("source is not valid UTF-8: {e}"),
        })?;
        Self::extract(&node.name, source, &node.digest)
    }

    /// Read the entry module from disk and extract its ABI. The descriptor
    /// carries the digest of the bytes actually read.
    pub fn extract_from_file(module: &str, path: &Path) -> Result<AbiDescriptor, AbiError> {
        let bytes = std::fs::read(path).map_err(|e| AbiError::Read {
            module: module.to_string(),
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let source = std::str::from_utf8(&bytes).map_err(|e| AbiError::Syntax {
            module: module.to_string(),
            line: 1,
            reason: format!("source is not valid UTF-8: {e}"),
        })?;
        Self::extract(module, source, &sha256_hex(&bytes))
    }

    pub fn extract(module: &str, source: &str, digest: &str) -> Result<AbiDescriptor, AbiError> {
        let parsed = ParsedModule::parse(source).map_err(|e| AbiError::Syntax {
            module: module.to_string(),
            line: e.line,
            reason: e.reason,
        })?;

        let mut definitions: HashMap<&str, Vec<usize>> = HashMap::new();
        for function in &parsed.functions {
            definitions
                .entry(function.name.as_str())
                .or_default()
                .push(function.line);
        }

        let mut methods = Vec::new();
        let mut init: Option<&FunctionDef> = None;

        for function in &parsed.functions {
            let Some(kind) = method_kind(function)? else {
                continue;
            };

            if let Some(lines) = definitions.get(function.name.as_str()) {
                if lines.len() > 1 {
                    return Err(AbiError::DuplicateMethod {
                        name: function.name.clone(),
                        first_line: lines[0],
                        line: lines[1],
                    });
                }
            }

            if kind == MethodKind::Init {
                if let Some(first) = init {
                    return Err(AbiError::DuplicateInit {
                        first: first.name.clone(),
                        second: function.name.clone(),
                        line: function.line,
                    });
                }
                init = Some(function);
            }

            methods.push(describe(function, kind)?);
        }

        debug!("Extracted {} exported methods from {}", methods.len(), module);
        Ok(AbiDescriptor {
            methods,
            source_digest: digest.to_string(),
        })
    }
}

fn method_kind(function: &FunctionDef) -> Result<Option<MethodKind>, AbiError> {
    let mut kind: Option<MethodKind> = None;
    for decorator in &function.decorators {
        let Some(found) = MethodKind::from_decorator(decorator.last_segment()) else {
            continue;
        };
        match kind {
            Some(existing) if existing != found => {
                return Err(AbiError::ConflictingKinds {
                    function: function.name.clone(),
                    first: existing.to_string(),
                    second: found.to_string(),
                    line: decorator.line,
                });
            }
            _ => kind = Some(found),
        }
    }
    Ok(kind)
}

fn describe(function: &FunctionDef, kind: MethodKind) -> Result<MethodDescriptor, AbiError> {
    let unsupported = |reason: String| AbiError::UnsupportedAnnotation {
        function: function.name.clone(),
        reason,
        line: function.line,
    };

    let mut params = Vec::with_capacity(function.params.len());
    for param in &function.params {
        if matches!(param.kind, ParamKind::VarArgs | ParamKind::VarKeywords) {
            return Err(AbiError::VariadicParameter {
                function: function.name.clone(),
                param: param.name.clone(),
                line: function.line,
            });
        }
        params.push(ParamDescriptor {
            name: param.name.clone(),
            type_tag: parameter_tag(param.annotation.as_deref()).map_err(unsupported)?,
        });
    }

    let (returns, panics) = return_tag(function.returns.as_deref()).map_err(unsupported)?;

    Ok(MethodDescriptor {
        name: function.name.clone(),
        kind,
        params,
        returns,
        panics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(source: &str) -> Result<AbiDescriptor, AbiError> {
        AbiExtractor::extract("contract", source, "digest")
    }

    #[test]
    fn test_view_method_with_typed_signature() {
        let abi = extract(
            "from near import view\n\n@view\ndef get_balance(account_id: str) -> int:\n    return 0\n",
        )
        .unwrap();

        assert_eq!(abi.methods.len(), 1);
        let method = &abi.methods[0];
        assert_eq!(method.name, "get_balance");
        assert_eq!(method.kind, MethodKind::View);
        assert_eq!(
            method.params,
            vec![ParamDescriptor {
                name: "account_id".to_string(),
                type_tag: "str".to_string()
            }]
        );
        assert_eq!(method.returns.as_deref(), Some("int"));
        assert_eq!(abi.source_digest, "digest");

        let json: serde_json::Value = serde_json::from_str(&abi.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"methods": [{
                "name": "get_balance",
                "kind": "view",
                "params": [{"name": "account_id", "type": "str"}],
                "returns": "int"
            }]})
        );
    }

    #[test]
    fn test_declaration_order_and_decorator_forms() {
        let source = "\
import near

@near.call(payable=True)
async def deposit(amount: int) -> None:
    pass

def helper():
    pass

@near.init
def new(owner: str, *, limit: Optional[int] = None):
    pass

@view()
def total():
    return 1
";
        let abi = extract(source).unwrap();
        let names: Vec<_> = abi.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["deposit", "new", "total"]);

        assert_eq!(abi.methods[0].kind, MethodKind::Call);
        assert_eq!(abi.methods[0].returns, None);
        assert_eq!(abi.methods[1].kind, MethodKind::Init);
        assert_eq!(abi.methods[1].params[1].type_tag, "optional[int]");
        assert_eq!(abi.methods[2].returns.as_deref(), Some("unknown"));
        assert!(abi.method("helper").is_none());
    }

    #[test]
    fn test_unannotated_and_panicking_methods() {
        let source = "\
@call
def fail(reason) -> NoReturn:
    raise ValueError(reason)
";
        let abi = extract(source).unwrap();
        let method = &abi.methods[0];
        assert_eq!(method.params[0].type_tag, "unknown");
        assert_eq!(method.returns, None);
        assert!(method.panics);

        let json = abi.to_json().unwrap();
        assert!(json.contains("\"panics\": true"));
    }

    #[test]
    fn test_two_init_methods_fail() {
        let source = "@init\ndef a():\n    pass\n\n@init\ndef b():\n    pass\n";
        assert!(matches!(
            extract(source),
            Err(AbiError::DuplicateInit { ref first, ref second, line: 6 }) if first == "a" && second == "b"
        ));
    }

    #[test]
    fn test_view_and_call_on_one_function_fail() {
        let source = "@view\n@call\ndef both():\n    pass\n";
        assert!(matches!(
            extract(source),
            Err(AbiError::ConflictingKinds { line: 2, .. })
        ));

        let repeated = "@view\n@near.view\ndef twice():\n    pass\n";
        assert_eq!(extract(repeated).unwrap().methods.len(), 1);
    }

    #[test]
    fn test_shape_errors() {
        assert!(matches!(
            extract("@call\ndef f(*args):\n    pass\n"),
            Err(AbiError::VariadicParameter { .. })
        ));
        assert!(matches!(
            extract("@call\ndef f(**kwargs):\n    pass\n"),
            Err(AbiError::VariadicParameter { .. })
        ));
        assert!(matches!(
            extract("@view\ndef f(cb: Callable[[int], int]):\n    pass\n"),
            Err(AbiError::UnsupportedAnnotation { .. })
        ));
        assert!(matches!(
            extract("@view\ndef f():\n    pass\n\ndef f():\n    pass\n"),
            Err(AbiError::DuplicateMethod { first_line: 2, line: 5, .. })
        ));
    }

    #[test]
    fn test_module_without_exports() {
        let abi = extract("def helper():\n    pass\n").unwrap();
        assert!(abi.methods.is_empty());
        assert_eq!(abi.to_json().unwrap(), "{\n  \"methods\": []\n}\n");
    }

    #[test]
    fn test_extract_from_file_records_digest_of_bytes_read() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("contract.py");
        let source = "@view\ndef total() -> int:\n    return 0\n";
        std::fs::write(&path, source).unwrap();

        let abi = AbiExtractor::extract_from_file("contract", &path).unwrap();
        assert_eq!(abi.source_digest, sha256_hex(source.as_bytes()));
        assert_eq!(abi.methods[0].name, "total");

        let error = AbiExtractor::extract_from_file("contract", &temp.path().join("gone.py"))
            .unwrap_err();
        assert!(matches!(error, AbiError::Read { .. }));
        assert_eq!(error.line(), None);
    }
}
