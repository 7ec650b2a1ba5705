//! Version pins for installed packages, mapped onto `semver`.

use crate::manifest::ManifestError;
use once_cell::sync::Lazy;
use regex::Regex;
use semver::{Prerelease, Version, VersionReq};

static PY_VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^v?(\d+)(?:\.(\d+))?(?:\.(\d+))?(?:\.\d+)*(?:[-_.]?(a|b|c|rc|alpha|beta|pre|preview|dev)[-_.]?(\d*))?(?:[-_.]?post[-_.]?\d*|-\d+)?(?:\+[\w.]+)?$",
    )
    .unwrap()
});

/// Parse a Python package version leniently into a semver version.
///
/// `1.2` becomes `1.2.0`, `2.0rc1` becomes `2.0.0-rc.1`; post and local
/// segments are ignored.
pub fn parse_python_version(raw: &str) -> Option<Version> {
    let captures = PY_VERSION_RE.captures(raw.trim())?;
    let part = |i: usize| -> Option<u64> {
        captures
            .get(i)
            .map_or(Some(0), |m| m.as_str().parse::<u64>().ok())
    };

    let mut version = Version::new(part(1)?, part(2)?, part(3)?);

    if let Some(tag) = captures.get(4) {
        let tag = match tag.as_str().to_ascii_lowercase().as_str() {
            "alpha" => "a".to_string(),
            "beta" => "b".to_string(),
            "c" | "pre" | "preview" => "rc".to_string(),
            other => other.to_string(),
        };
        let pre = match captures.get(5).map(|m| m.as_str()).filter(|n| !n.is_empty()) {
            Some(number) => format!("{tag}.{number}"),
            None => tag,
        };
        version.pre = Prerelease::new(&pre).ok()?;
    }

    Some(version)
}

/// Normalize a distribution or package name for comparison (PEP 503 style)
pub fn normalize_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut last_was_separator = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            if !last_was_separator {
                normalized.push('_');
            }
            last_was_separator = true;
        } else {
            normalized.push(c.to_ascii_lowercase());
            last_was_separator = false;
        }
    }
    normalized
}

/// A pinned version constraint from the manifest's `pin` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPin {
    pub package: String,
    pub constraint: String,
    pub requirement: VersionReq,
}

impl VersionPin {
    pub fn parse(package: &str, constraint: &str) -> Result<Self, ManifestError> {
        let invalid = |reason: String| ManifestError::InvalidPin {
            package: package.to_string(),
            reason,
        };

        let translated = constraint
            .split(',')
            .map(|clause| translate_clause(clause.trim()).map_err(&invalid))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");

        let requirement = VersionReq::parse(&translated)
            .map_err(|e| invalid(format!("`{constraint}`: {e}")))?;

        Ok(Self {
            package: package.to_string(),
            constraint: constraint.to_string(),
            requirement,
        })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.requirement.matches(version)
    }

    /// Whether this pin names the given distribution or top-level module
    pub fn applies_to(&self, distribution: &str, module_root: &str) -> bool {
        let pinned = normalize_name(&self.package);
        pinned == normalize_name(distribution) || pinned == normalize_name(module_root)
    }
}

fn translate_clause(clause: &str) -> Result<String, String> {
    if clause.is_empty() {
        return Err("empty version constraint".to_string());
    }

    if let Some(rest) = clause.strip_prefix("~=") {
        return translate_compatible(rest.trim());
    }
    if clause.starts_with("!=") {
        return Err(format!("exclusion constraint `{clause}` is not supported"));
    }
    if let Some(rest) = clause.strip_prefix("===") {
        return Ok(format!("={}", full_version(rest.trim())?));
    }
    if let Some(rest) = clause.strip_prefix("==") {
        let rest = rest.trim();
        return match rest.strip_suffix(".*") {
            Some(prefix) => Ok(format!("={prefix}")),
            None => Ok(format!("={}", full_version(rest)?)),
        };
    }
    for op in ["<=", ">=", "<", ">"] {
        if let Some(rest) = clause.strip_prefix(op) {
            return Ok(format!("{op}{}", full_version(rest.trim())?));
        }
    }

    Ok(clause.to_string())
}

/// Comparison operands are full releases: `2.1` is `2.1.0`, not any `2.1.x`
fn full_version(raw: &str) -> Result<Version, String> {
    parse_python_version(raw).ok_or_else(|| format!("`{raw}` is not a version"))
}

/// `~=X.Y` means `>=X.Y, <X+1`; `~=X.Y.Z` means `>=X.Y.Z, <X.Y+1`
fn translate_compatible(version: &str) -> Result<String, String> {
    let parts: Vec<u64> = version
        .split('.')
        .map(|p| p.parse::<u64>())
        .collect::<Result<_, _>>()
        .map_err(|_| format!("`~={version}` needs a numeric release version"))?;

    match parts.as_slice() {
        [major, _minor] => Ok(format!(">={version}, <{}", major + 1)),
        [major, minor, _patch] => Ok(format!(">={version}, <{major}.{}", minor + 1)),
        _ => Err(format!("`~={version}` needs two or three version components")),
    }
}
