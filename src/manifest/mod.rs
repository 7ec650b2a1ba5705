//! Project manifest (`contract.yaml`) loading and validation.

pub mod error;

pub use error::ManifestError;

use crate::resolver::pins::VersionPin;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Default manifest file name looked up in a project root
pub const MANIFEST_FILE_NAME: &str = "contract.yaml";

/// Optimization mode applied by the native build and the optimizer
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationMode {
    #[default]
    Size,
    Speed,
    Debug,
}

impl OptimizationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationMode::Size => "size",
            OptimizationMode::Speed => "speed",
            OptimizationMode::Debug => "debug",
        }
    }
}

impl fmt::Display for OptimizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizationMode {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "size" => Ok(OptimizationMode::Size),
            "speed" => Ok(OptimizationMode::Speed),
            "debug" => Ok(OptimizationMode::Debug),
            other => Err(ManifestError::InvalidField {
                field: "optimize".to_string(),
                reason: format!("expected size, speed or debug, got `{other}`"),
            }),
        }
    }
}

/// On-disk shape of the manifest before validation
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawManifest {
    entry: PathBuf,
    #[serde(default)]
    source_roots: Vec<PathBuf>,
    #[serde(default)]
    package_roots: Vec<PathBuf>,
    #[serde(default)]
    exclude: BTreeSet<String>,
    #[serde(default)]
    optimize: OptimizationMode,
    output: Option<PathBuf>,
    abi_output: Option<PathBuf>,
    #[serde(default)]
    pin: BTreeMap<String, String>,
    #[serde(default)]
    include_debug_info: bool,
}

/// Validated project configuration. Paths are relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProjectManifest {
    pub entry: PathBuf,
    pub source_roots: Vec<PathBuf>,
    pub package_roots: Vec<PathBuf>,
    pub exclude: BTreeSet<String>,
    pub optimize: OptimizationMode,
    pub output: PathBuf,
    pub abi_output: PathBuf,
    pub pin: BTreeMap<String, String>,
    pub include_debug_info: bool,
}

impl ProjectManifest {
    /// Load `contract.yaml` from a project root
    pub async fn load_from_dir(project_root: &Path) -> Result<Self, ManifestError> {
        Self::load(&project_root.join(MANIFEST_FILE_NAME)).await
    }

    pub async fn load(path: &Path) -> Result<Self, ManifestError> {
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|error| ManifestError::Read {
                    path: path.display().to_string(),
                    error,
                })?;

        debug!("Loaded manifest from {}", path.display());
        Self::parse_with_origin(&content, &path.display().to_string())
    }

    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        Self::parse_with_origin(content, "<inline>")
    }

    fn parse_with_origin(content: &str, origin: &str) -> Result<Self, ManifestError> {
        let raw: RawManifest =
            serde_yaml::from_str(content).map_err(|e| ManifestError::Syntax {
                path: origin.to_string(),
                reason: e.to_string(),
            })?;

        Self::from_raw(raw)
    }

    /// Build a manifest programmatically with defaults for everything but the entry
    pub fn for_entry(entry: impl Into<PathBuf>) -> Result<Self, ManifestError> {
        Self::from_raw(RawManifest {
            entry: entry.into(),
            source_roots: Vec::new(),
            package_roots: Vec::new(),
            exclude: BTreeSet::new(),
            optimize: OptimizationMode::default(),
            output: None,
            abi_output: None,
            pin: BTreeMap::new(),
            include_debug_info: false,
        })
    }

    fn from_raw(raw: RawManifest) -> Result<Self, ManifestError> {
        validate_entry(&raw.entry)?;

        for name in &raw.exclude {
            if !is_identifier(name) {
                return Err(ManifestError::InvalidField {
                    field: "exclude".to_string(),
                    reason: format!("`{name}` is not a top-level package name"),
                });
            }
        }

        for (package, constraint) in &raw.pin {
            VersionPin::parse(package, constraint)?;
        }

        let source_roots = if raw.source_roots.is_empty() {
            vec![raw
                .entry
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default()]
        } else {
            raw.source_roots
        };

        let output = match raw.output {
            Some(output) if output.as_os_str().is_empty() => {
                return Err(ManifestError::InvalidField {
                    field: "output".to_string(),
                    reason: "must not be empty".to_string(),
                });
            }
            Some(output) => output,
            None => default_output(&raw.entry),
        };

        let abi_output = raw
            .abi_output
            .unwrap_or_else(|| output.with_extension("abi.json"));

        Ok(Self {
            entry: raw.entry,
            source_roots,
            package_roots: raw.package_roots,
            exclude: raw.exclude,
            optimize: raw.optimize,
            output,
            abi_output,
            pin: raw.pin,
            include_debug_info: raw.include_debug_info,
        })
    }

    /// Parsed version pins, in name order
    pub fn version_pins(&self) -> Result<Vec<VersionPin>, ManifestError> {
        self.pin
            .iter()
            .map(|(package, constraint)| VersionPin::parse(package, constraint))
            .collect()
    }

    pub fn is_excluded(&self, root_package: &str) -> bool {
        self.exclude.contains(root_package)
    }
}

fn validate_entry(entry: &Path) -> Result<(), ManifestError> {
    if entry.extension().and_then(|e| e.to_str()) != Some("py") {
        return Err(ManifestError::InvalidField {
            field: "entry".to_string(),
            reason: format!("`{}` is not a .py file", entry.display()),
        });
    }

    if entry.is_absolute() {
        return Err(ManifestError::InvalidField {
            field: "entry".to_string(),
            reason: "must be relative to the project root".to_string(),
        });
    }

    Ok(())
}

fn default_output(entry: &Path) -> PathBuf {
    let stem = entry
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "contract".to_string());
    PathBuf::from("build").join(format!("{stem}.wasm"))
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_alphanumeric())
}
