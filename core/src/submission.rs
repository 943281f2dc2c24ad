use std::{
    fmt,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use lazy_regex::{lazy_regex, Lazy, Regex};
use serde::{Deserialize, Serialize};

static RE_SUBMISSION_ID: Lazy<Regex> = lazy_regex!(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$");

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid submission id '{0}' (allowed: 1-128 chars of [A-Za-z0-9._-], not starting with a symbol)")]
pub struct InvalidSubmissionId(pub String);

/// Identifier used as the persistence key of a score record.
/// It is also used as a file name, so path separators are never accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubmissionId(String);

impl SubmissionId {
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidSubmissionId> {
        let id = id.into();
        if RE_SUBMISSION_ID.is_match(&id) {
            Ok(Self(id))
        } else {
            Err(InvalidSubmissionId(id))
        }
    }

    /// e.g. `20261018T093000-1a2b3c4d`
    pub fn generate(now: DateTime<Utc>) -> Self {
        Self(format!(
            "{}-{:08x}",
            now.format("%Y%m%dT%H%M%S"),
            rand::random::<u32>()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SubmissionId {
    type Error = InvalidSubmissionId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SubmissionId> for String {
    fn from(value: SubmissionId) -> Self {
        value.0
    }
}

/// An accepted upload, ready to be graded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    id: SubmissionId,
    project_type: String,
    source_dir: PathBuf,
    run_command: String,
}

impl Submission {
    pub fn new(
        id: SubmissionId,
        project_type: impl Into<String>,
        source_dir: impl Into<PathBuf>,
        run_command: impl Into<String>,
    ) -> Self {
        Self {
            id,
            project_type: project_type.into(),
            source_dir: source_dir.into(),
            run_command: run_command.into(),
        }
    }

    /// Same submission, relocated to a private working copy.
    pub fn relocated(self, source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            ..self
        }
    }

    pub fn id(&self) -> &SubmissionId {
        &self.id
    }

    pub fn project_type(&self) -> &str {
        &self.project_type
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn run_command(&self) -> &str {
        &self.run_command
    }
}
