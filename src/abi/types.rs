//! Type tags derived from Python annotations.

use crate::python::parser::split_top_level;

/// Tag used when no annotation is present or it cannot be read statically
pub const UNKNOWN: &str = "unknown";

/// Static view of an annotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTag {
    Str,
    Int,
    Float,
    Bool,
    Bytes,
    Any,
    NoneType,
    Never,
    Unknown,
    List(Box<TypeTag>),
    Dict(Box<TypeTag>, Box<TypeTag>),
    /// Element types; the flag marks homogeneous `tuple[T, ...]`
    Tuple(Vec<TypeTag>, bool),
    Optional(Box<TypeTag>),
    Union(Vec<TypeTag>),
}

impl TypeTag {
    pub fn parse(annotation: &str) -> Result<Self, String> {
        let text = annotation.trim();
        if text.is_empty() {
            return Err("empty annotation".to_string());
        }

        let alternatives = split_top_level(text, '|');
        if alternatives.len() > 1 {
            let members = alternatives
                .into_iter()
                .map(TypeTag::parse)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Self::union(members));
        }

        // String annotations are collapsed to an empty literal by the scanner.
        if matches!(text, "''" | "\"\"") {
            return Ok(TypeTag::Unknown);
        }

        let (head, args) = match text.find('[') {
            Some(open) => {
                let inner = text[open + 1..]
                    .strip_suffix(']')
                    .ok_or_else(|| format!("unbalanced subscript in `{text}`"))?;
                let args: Vec<&str> = split_top_level(inner, ',')
                    .into_iter()
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .collect();
                (text[..open].trim(), Some(args))
            }
            None => (text, None),
        };

        let head = head
            .strip_prefix("typing.")
            .or_else(|| head.strip_prefix("t."))
            .unwrap_or(head);

        let tag = match (head, args.as_deref()) {
            ("str", None) => TypeTag::Str,
            ("int", None) => TypeTag::Int,
            ("float", None) => TypeTag::Float,
            ("bool", None) => TypeTag::Bool,
            ("bytes" | "bytearray", None) => TypeTag::Bytes,
            ("Any" | "any" | "object", None) => TypeTag::Any,
            ("None", None) => TypeTag::NoneType,
            ("NoReturn" | "Never", None) => TypeTag::Never,

            ("list" | "List", None) => TypeTag::List(Box::new(TypeTag::Any)),
            ("list" | "List", Some([item])) => TypeTag::List(Box::new(Self::parse(item)?)),

            ("dict" | "Dict", None) => {
                TypeTag::Dict(Box::new(TypeTag::Any), Box::new(TypeTag::Any))
            }
            ("dict" | "Dict", Some([key, value])) => {
                TypeTag::Dict(Box::new(Self::parse(key)?), Box::new(Self::parse(value)?))
            }

            ("tuple" | "Tuple", None) => TypeTag::Tuple(vec![TypeTag::Any], true),
            ("tuple" | "Tuple", Some([item, "..."])) => {
                TypeTag::Tuple(vec![Self::parse(item)?], true)
            }
            ("tuple" | "Tuple", Some(items)) if !items.contains(&"...") => TypeTag::Tuple(
                items
                    .iter()
                    .map(|i| Self::parse(i))
                    .collect::<Result<_, _>>()?,
                false,
            ),

            ("Optional", Some([item])) => Self::union(vec![Self::parse(item)?, TypeTag::NoneType]),
            ("Union", Some(items)) if !items.is_empty() => Self::union(
                items
                    .iter()
                    .map(|i| Self::parse(i))
                    .collect::<Result<_, _>>()?,
            ),

            _ => return Err(format!("unsupported annotation `{text}`")),
        };

        Ok(tag)
    }

    /// Flatten nested unions and fold `None` members into `optional[...]`
    fn union(members: Vec<TypeTag>) -> TypeTag {
        let mut flat: Vec<TypeTag> = Vec::new();
        let mut nullable = false;

        for member in members {
            let expanded = match member {
                TypeTag::Union(inner) => inner,
                TypeTag::Optional(inner) => {
                    nullable = true;
                    vec![*inner]
                }
                other => vec![other],
            };
            for tag in expanded {
                if tag == TypeTag::NoneType {
                    nullable = true;
                } else if !flat.contains(&tag) {
                    flat.push(tag);
                }
            }
        }

        let inner = match flat.len() {
            0 => return TypeTag::NoneType,
            1 => flat.remove(0),
            _ => TypeTag::Union(flat),
        };

        if nullable {
            TypeTag::Optional(Box::new(inner))
        } else {
            inner
        }
    }

    pub fn render(&self) -> String {
        match self {
            TypeTag::Str => "str".to_string(),
            TypeTag::Int => "int".to_string(),
            TypeTag::Float => "float".to_string(),
            TypeTag::Bool => "bool".to_string(),
            TypeTag::Bytes => "bytes".to_string(),
            TypeTag::Any => "any".to_string(),
            TypeTag::NoneType => "None".to_string(),
            TypeTag::Never => "never".to_string(),
            TypeTag::Unknown => UNKNOWN.to_string(),
            TypeTag::List(item) => format!("list[{}]", item.render()),
            TypeTag::Dict(key, value) => format!("dict[{}, {}]", key.render(), value.render()),
            TypeTag::Tuple(items, true) => format!(
                "tuple[{}, ...]",
                items.first().map_or_else(|| "any".to_string(), TypeTag::render)
            ),
            TypeTag::Tuple(items, false) => format!(
                "tuple[{}]",
                items.iter().map(TypeTag::render).collect::<Vec<_>>().join(", ")
            ),
            TypeTag::Optional(inner) => format!("optional[{}]", inner.render()),
            TypeTag::Union(members) => members
                .iter()
                .map(TypeTag::render)
                .collect::<Vec<_>>()
                .join(" | "),
        }
    }

    fn contains_never(&self) -> bool {
        match self {
            TypeTag::Never => true,
            TypeTag::List(item) | TypeTag::Optional(item) => item.contains_never(),
            TypeTag::Dict(key, value) => key.contains_never() || value.contains_never(),
            TypeTag::Tuple(items, _) | TypeTag::Union(items) => {
                items.iter().any(TypeTag::contains_never)
            }
            _ => false,
        }
    }
}

/// Tag for a parameter annotation
pub fn parameter_tag(annotation: Option<&str>) -> Result<String, String> {
    let Some(annotation) = annotation else {
        return Ok(UNKNOWN.to_string());
    };
    let tag = TypeTag::parse(annotation)?;
    if tag.contains_never() {
        return Err(format!("`{annotation}` cannot be a parameter type"));
    }
    Ok(tag.render())
}

/// Return tag and whether the function only ever panics
pub fn return_tag(annotation: Option<&str>) -> Result<(Option<String>, bool), String> {
    let Some(annotation) = annotation else {
        return Ok((Some(UNKNOWN.to_string()), false));
    };
    match TypeTag::parse(annotation)? {
        TypeTag::NoneType => Ok((None, false)),
        TypeTag::Never => Ok((None, true)),
        tag if tag.contains_never() => Err(format!("`{annotation}` mixes NoReturn with other types")),
        tag => Ok((Some(tag.render()), false)),
    }
}
