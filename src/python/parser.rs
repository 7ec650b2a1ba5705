use super::scanner::{logical_lines, LogicalLine, ScanError};
use once_cell::sync::Lazy;
use regex::Regex;

static IMPORT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^import\s+(.+)$").unwrap());
static FROM_IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^from\s+(\.*)\s*([A-Za-z_][\w.]*)?\s+import\s+(.+)$").unwrap());
static DEF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(async\s+)?def\s+([A-Za-z_]\w*)\s*\(").unwrap());
/// Headers whose one-line form may carry an import, as in `try: import x`
const COMPOUND_KEYWORDS: &[&str] = &[
    "if", "elif", "else", "try", "except", "finally", "with", "while", "for",
];

static DOTTED_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_]\w*(\s*\.\s*[A-Za-z_]\w*)*").unwrap());

/// A statically discovered import statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportStatement {
    /// `import a.b.c` (one per imported module, aliases dropped)
    Module { line: usize, name: String },
    /// `from <dots><module> import names`
    From {
        line: usize,
        level: usize,
        module: Option<String>,
        names: Vec<String>,
    },
}

impl ImportStatement {
    pub fn line(&self) -> usize {
        match self {
            ImportStatement::Module { line, .. } | ImportStatement::From { line, .. } => *line,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decorator {
    /// Dotted decorator name without call arguments, e.g. `near.call`
    pub name: String,
    pub line: usize,
}

impl Decorator {
    pub fn last_segment(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Positional,
    KeywordOnly,
    VarArgs,
    VarKeywords,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub kind: ParamKind,
    pub annotation: Option<String>,
    pub has_default: bool,
}

/// A top-level `def` with its decorators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDef {
    pub name: String,
    pub line: usize,
    pub is_async: bool,
    pub decorators: Vec<Decorator>,
    pub params: Vec<Parameter>,
    pub returns: Option<String>,
}

/// Static view of one Python module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedModule {
    pub imports: Vec<ImportStatement>,
    pub functions: Vec<FunctionDef>,
}

impl ParsedModule {
    pub fn parse(source: &str) -> Result<Self, ScanError> {
        let lines = logical_lines(source)?;
        let mut module = ParsedModule::default();
        let mut pending_decorators: Vec<Decorator> = Vec::new();

        for line in &lines {
            if let Some(import) = parse_import(line)? {
                module.imports.extend(import);
                if line.indent == 0 {
                    pending_decorators.clear();
                }
                continue;
            }

            if line.indent != 0 {
                continue;
            }

            if let Some(rest) = line.text.strip_prefix('@') {
                pending_decorators.push(parse_decorator(rest, line.line)?);
                continue;
            }

            if let Some(function) = parse_def(line, &mut pending_decorators)? {
                module.functions.push(function);
                continue;
            }

            pending_decorators.clear();
        }

        Ok(module)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.iter().find(|f| f.name == name)
    }
}

fn parse_import(line: &LogicalLine) -> Result<Option<Vec<ImportStatement>>, ScanError> {
    let text = inline_body(&line.text).unwrap_or(line.text.as_str());

    if let Some(captures) = IMPORT_RE.captures(text) {
        let mut imports = Vec::new();
        for part in split_top_level(&captures[1], ',') {
            let name = strip_alias(part);
            if name.is_empty() || !is_dotted_name(&name) {
                return Err(ScanError {
                    line: line.line,
                    reason: format!("malformed import statement `{text}`"),
                });
            }
            imports.push(ImportStatement::Module {
                line: line.line,
                name,
            });
        }
        return Ok(Some(imports));
    }

    if let Some(captures) = FROM_IMPORT_RE.captures(text) {
        let level = captures.get(1).map_or(0, |m| m.as_str().len());
        let module = captures.get(2).map(|m| normalize_dotted(m.as_str()));
        if level == 0 && module.is_none() {
            return Err(ScanError {
                line: line.line,
                reason: format!("malformed import statement `{text}`"),
            });
        }

        let names_text = captures[3].trim();
        let names_text = names_text
            .strip_prefix('(')
            .and_then(|t| t.strip_suffix(')'))
            .unwrap_or(names_text);

        let names = split_top_level(names_text, ',')
            .into_iter()
            .map(strip_alias)
            .filter(|name| !name.is_empty())
            .collect();

        return Ok(Some(vec![ImportStatement::From {
            line: line.line,
            level,
            module,
            names,
        }]));
    }

    Ok(None)
}

/// Statement after the header colon of a one-line compound statement
fn inline_body(text: &str) -> Option<&str> {
    let keyword = text
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .next()?;
    if !COMPOUND_KEYWORDS.contains(&keyword) {
        return None;
    }

    let colon = find_top_level(text, ':')?;
    let body = text[colon + 1..].trim();
    (!body.is_empty()).then_some(body)
}

fn parse_decorator(rest: &str, line: usize) -> Result<Decorator, ScanError> {
    let rest = rest.trim();
    let name = DOTTED_NAME_RE
        .find(rest)
        .map(|m| normalize_dotted(m.as_str()))
        .ok_or_else(|| ScanError {
            line,
            reason: format!("unsupported decorator expression `@{rest}`"),
        })?;
    Ok(Decorator { name, line })
}

fn parse_def(
    line: &LogicalLine,
    pending_decorators: &mut Vec<Decorator>,
) -> Result<Option<FunctionDef>, ScanError> {
    let Some(captures) = DEF_RE.captures(&line.text) else {
        return Ok(None);
    };

    let is_async = captures.get(1).is_some();
    let name = captures[2].to_string();
    let open = captures.get(0).map_or(0, |m| m.end()) - 1;

    let close = matching_paren(&line.text, open).ok_or_else(|| ScanError {
        line: line.line,
        reason: format!("unbalanced parameter list in `def {name}`"),
    })?;

    let params_text = &line.text[open + 1..close];
    let tail = line.text[close + 1..].trim_start();

    let returns = match tail.strip_prefix("->") {
        Some(after_arrow) => {
            let colon = find_top_level(after_arrow, ':').ok_or_else(|| ScanError {
                line: line.line,
                reason: format!("missing `:` after return annotation of `{name}`"),
            })?;
            Some(after_arrow[..colon].trim().to_string())
        }
        None if tail.starts_with(':') => None,
        None => {
            return Err(ScanError {
                line: line.line,
                reason: format!("malformed signature for `{name}`"),
            })
        }
    };

    Ok(Some(FunctionDef {
        name,
        line: line.line,
        is_async,
        decorators: std::mem::take(pending_decorators),
        params: parse_params(params_text),
        returns,
    }))
}

fn parse_params(text: &str) -> Vec<Parameter> {
    let mut params = Vec::new();
    let mut keyword_only = false;

    for raw in split_top_level(text, ',') {
        let raw = raw.trim();
        if raw.is_empty() || raw == "/" {
            continue;
        }
        if raw == "*" {
            keyword_only = true;
            continue;
        }

        let equals = find_top_level(raw, '=');
        let colon = find_top_level(raw, ':');

        let (head, has_default) = match equals {
            Some(eq) => (&raw[..eq], true),
            None => (raw, false),
        };

        let (name_part, annotation) = match colon {
            Some(c) if equals.map_or(true, |eq| c < eq) => {
                (&raw[..c], Some(head[c + 1..].trim().to_string()))
            }
            _ => (head, None),
        };

        let name_part = name_part.trim();
        let (kind, name) = if let Some(name) = name_part.strip_prefix("**") {
            (ParamKind::VarKeywords, name)
        } else if let Some(name) = name_part.strip_prefix('*') {
            keyword_only = true;
            (ParamKind::VarArgs, name)
        } else if keyword_only {
            (ParamKind::KeywordOnly, name_part)
        } else {
            (ParamKind::Positional, name_part)
        };

        params.push(Parameter {
            name: name.trim().to_string(),
            kind,
            annotation: annotation.filter(|a| !a.is_empty()),
            has_default,
        });
    }

    params
}

/// Split `text` on `separator` occurrences outside brackets
pub(crate) fn split_top_level(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            c if c == separator && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn find_top_level(text: &str, target: char) -> Option<usize> {
    let mut depth = 0usize;
    let bytes: Vec<(usize, char)> = text.char_indices().collect();

    for (idx, &(i, c)) in bytes.iter().enumerate() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            c if c == target && depth == 0 => {
                // `==`, `<=`, `>=`, `!=` and `:=` are operators, not separators.
                if target == '=' {
                    let prev = idx.checked_sub(1).map(|p| bytes[p].1);
                    let next = bytes.get(idx + 1).map(|&(_, c)| c);
                    if matches!(prev, Some('=' | '<' | '>' | '!' | ':')) || next == Some('=') {
                        continue;
                    }
                }
                return Some(i);
            }
            _ => {}
        }
    }
    None
}

fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text[open..].char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_alias(part: &str) -> String {
    let part = part.trim();
    let name = match part.split_once(" as ") {
        Some((name, _)) => name,
        None => part,
    };
    normalize_dotted(name)
}

fn normalize_dotted(name: &str) -> String {
    name.split('.')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(".")
}

fn is_dotted_name(name: &str) -> bool {
    name.split('.').all(crate::manifest::is_identifier)
}
