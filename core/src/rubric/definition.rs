use std::{collections::HashSet, path::Path};

use anyhow::Context as _;
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};

use crate::check::CheckKind;
use crate::str_interp::{interp, InterpError};

/// How the process of a check is launched. Everything is optional and
/// falls back to the submission's run command and the default limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    /// Text written to the process's stdin, which is then closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,

    /// Command template; `#{run}` expands to the submission's run command
    /// and `#{workdir}` to its working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_ms: Option<u64>,
}

impl RunSpec {
    pub const VAR_RUN: &'static str = "run";
    pub const VAR_WORKDIR: &'static str = "workdir";

    /// The shell command this check runs.
    pub fn command_line(&self, run_command: &str, workdir: &Path) -> Result<String, InterpError> {
        let Some(template) = &self.command else {
            return Ok(run_command.to_owned());
        };
        let workdir = workdir.to_string_lossy();
        interp(template, |name| match name {
            Self::VAR_RUN => Some(run_command),
            Self::VAR_WORKDIR => Some(workdir.as_ref()),
            _ => None,
        })
    }
}

/// One entry of a rubric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawCheck")]
pub struct RubricCheck {
    /// Zero-based index in the rubric.
    pub position: usize,
    pub name: String,
    pub weight: f64,
    #[serde(flatten)]
    pub kind: CheckKind,

    /// A failed blocking check skips every remaining check.
    pub blocking: bool,

    /// Evaluate the most recent execution result again instead of running.
    pub reuse_previous: bool,

    #[serde(flatten)]
    pub run: RunSpec,
}

/// A check as written in a rubric file: the kind name plus its parameters
/// side by side in one table.
#[derive(Debug, Clone, Deserialize)]
struct RawCheck {
    #[serde(default)]
    position: usize,
    name: String,
    weight: f64,
    kind: String,
    #[serde(default)]
    blocking: bool,
    #[serde(default)]
    reuse_previous: bool,
    #[serde(default)]
    stdin: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    time_limit_ms: Option<u64>,
    #[serde(flatten)]
    params: toml::Table,
}

impl From<RawCheck> for RubricCheck {
    fn from(raw: RawCheck) -> Self {
        Self {
            position: raw.position,
            kind: CheckKind::from_parts(&raw.kind, raw.params),
            name: raw.name,
            weight: raw.weight,
            blocking: raw.blocking,
            reuse_previous: raw.reuse_previous,
            run: RunSpec {
                stdin: raw.stdin,
                command: raw.command,
                time_limit_ms: raw.time_limit_ms,
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RubricError {
    #[error("Invalid rubric TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Rubric project_type must not be empty")]
    EmptyProjectType,

    #[error("Rubric for '{0}' has no checks")]
    NoChecks(String),

    #[error("Check #{0} has an empty name")]
    EmptyName(usize),

    #[error("Duplicate check name '{0}'")]
    DuplicateName(String),

    #[error("Check '{name}' has invalid weight {weight} (must be finite and non-negative)")]
    InvalidWeight { name: String, weight: f64 },

    #[error("Declared total {declared} does not match the sum of weights {actual}")]
    TotalMismatch { declared: f64, actual: f64 },

    #[error("First check '{0}' has no previous result to reuse")]
    NothingToReuse(String),

    #[error("Check '{0}' has time_limit_ms = 0")]
    ZeroTimeLimit(String),

    #[error("Check '{name}' has an invalid command template: {source}")]
    CommandTemplate { name: String, source: InterpError },
}

/// The ordered checks used to grade one project type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRubric")]
pub struct Rubric {
    project_type: String,
    total: f64,
    #[serde(rename = "check")]
    checks: Vec<RubricCheck>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawRubric {
    project_type: String,
    #[serde(default)]
    total: Option<f64>,
    #[serde(default, rename = "check")]
    checks: Vec<RubricCheck>,
}

impl TryFrom<RawRubric> for Rubric {
    type Error = RubricError;

    fn try_from(raw: RawRubric) -> Result<Self, Self::Error> {
        Self::new(raw.project_type, raw.total, raw.checks)
    }
}

#[derive(RustEmbed)]
#[folder = "assets/"]
struct Asset;

impl Rubric {
    pub const EXAMPLE_FILENAME: &'static str = "kvstore-rubric.toml";

    /// Positions are reassigned from the order of `checks`.
    /// Without a declared `total`, the weight sum is the total.
    pub fn new(
        project_type: impl Into<String>,
        total: Option<f64>,
        mut checks: Vec<RubricCheck>,
    ) -> Result<Self, RubricError> {
        let project_type = project_type.into();
        if project_type.trim().is_empty() {
            return Err(RubricError::EmptyProjectType);
        }
        if checks.is_empty() {
            return Err(RubricError::NoChecks(project_type));
        }

        for (i, check) in checks.iter_mut().enumerate() {
            check.position = i;
            check.validate()?;
        }
        let mut names = HashSet::new();
        if let Some(dup) = checks.iter().find(|c| !names.insert(c.name.as_str())) {
            return Err(RubricError::DuplicateName(dup.name.clone()));
        }
        if checks[0].reuse_previous {
            return Err(RubricError::NothingToReuse(checks[0].name.clone()));
        }

        let sum: f64 = checks.iter().map(|c| c.weight).sum();
        let total = match total {
            Some(declared) if (declared - sum).abs() > 1e-6 => {
                return Err(RubricError::TotalMismatch {
                    declared,
                    actual: sum,
                })
            }
            Some(declared) => declared,
            None => sum,
        };

        Ok(Self {
            project_type,
            total,
            checks,
        })
    }

    pub fn from_toml(s: &str) -> Result<Self, RubricError> {
        let raw: RawRubric = toml::from_str(s)?;
        raw.try_into()
    }

    pub fn from_toml_file(filepath: impl AsRef<Path>) -> anyhow::Result<Self> {
        let filepath = filepath.as_ref();
        let toml = fsutil::read_to_string(filepath).context("Cannot read a rubric file")?;
        Self::from_toml(&toml).with_context(|| format!("Invalid rubric: {:?}", filepath))
    }

    /// Rubric for the `kvstore` project type, shipped as a starting point.
    pub fn example_toml() -> Option<String> {
        let file = Asset::get(Self::EXAMPLE_FILENAME)?;
        std::str::from_utf8(file.data.as_ref()).ok().map(str::to_owned)
    }

    pub fn project_type(&self) -> &str {
        &self.project_type
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn checks(&self) -> &[RubricCheck] {
        &self.checks
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn unsupported_checks(&self) -> impl Iterator<Item = &RubricCheck> {
        self.checks.iter().filter(|c| !c.kind.is_supported())
    }
}

impl RubricCheck {
    fn validate(&self) -> Result<(), RubricError> {
        if self.name.trim().is_empty() {
            return Err(RubricError::EmptyName(self.position));
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(RubricError::InvalidWeight {
                name: self.name.clone(),
                weight: self.weight,
            });
        }
        if self.run.time_limit_ms == Some(0) {
            return Err(RubricError::ZeroTimeLimit(self.name.clone()));
        }
        self.run
            .command_line("", Path::new(""))
            .map_err(|source| RubricError::CommandTemplate {
                name: self.name.clone(),
                source,
            })?;
        Ok(())
    }
}
