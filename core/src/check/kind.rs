use std::borrow::Cow;

use lazy_regex::Regex;
use serde::{Deserialize, Serialize};

use crate::sandbox::ExecutionResult;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stream {
    #[default]
    Stdout,
    Stderr,
    Both,
}

impl Stream {
    /// `Both` is stdout followed by stderr.
    pub fn select<'r>(&self, result: &'r ExecutionResult) -> Cow<'r, str> {
        match self {
            Stream::Stdout => Cow::Borrowed(&result.stdout),
            Stream::Stderr => Cow::Borrowed(&result.stderr),
            Stream::Both => Cow::Owned(format!("{}{}", result.stdout, result.stderr)),
        }
    }

    pub fn is_truncated(&self, result: &ExecutionResult) -> bool {
        match self {
            Stream::Stdout => result.stdout_truncated,
            Stream::Stderr => result.stderr_truncated,
            Stream::Both => result.is_truncated(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    #[default]
    MustContain,
    MustNotContain,
}

/// What a rubric check verifies, with the parameters of that kind.
///
/// Rubric files name the kind with a `kind = "..."` key next to its parameters.
/// A kind that is unknown, or whose parameters do not parse, becomes
/// [`CheckKind::Unsupported`] and fails closed when evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckKind {
    ExactOutput {
        expected: String,
        #[serde(default)]
        stream: Stream,
    },
    ExitCode {
        #[serde(default)]
        expected: i32,
    },
    Pattern {
        pattern: String,
        #[serde(default)]
        stream: Stream,
        #[serde(default)]
        polarity: Polarity,
        #[serde(default)]
        literal: bool,
    },
    Timing {
        max_ms: u64,
    },
    Custom {
        evaluator: String,
        #[serde(flatten)]
        params: toml::Table,
    },
    Unsupported {
        declared: String,
        reason: String,
    },
}

impl CheckKind {
    pub const KNOWN_KINDS: &'static [&'static str] =
        &["exact_output", "exit_code", "pattern", "timing", "custom"];

    /// Builds a kind from its name and the remaining keys of a check table.
    pub fn from_parts(kind: &str, mut params: toml::Table) -> Self {
        if !Self::KNOWN_KINDS.contains(&kind) {
            return Self::unsupported(kind, "unknown check kind");
        }
        if let Some(known) = Self::known_params(kind) {
            if let Some(key) = params.keys().find(|k| !known.contains(&k.as_str())) {
                return Self::unsupported(kind, format!("unknown parameter '{}'", key));
            }
        }
        params.insert("kind".to_owned(), toml::Value::String(kind.to_owned()));
        match toml::Value::Table(params).try_into::<CheckKind>() {
            Ok(parsed) => parsed.validated(),
            Err(e) => Self::unsupported(kind, format!("malformed parameters: {}", e)),
        }
    }

    /// Parameter names a builtin kind accepts. `custom` passes anything through
    /// to its evaluator.
    fn known_params(kind: &str) -> Option<&'static [&'static str]> {
        let known: &'static [&'static str] = match kind {
            "exact_output" => &["expected", "stream"],
            "exit_code" => &["expected"],
            "pattern" => &["pattern", "stream", "polarity", "literal"],
            "timing" => &["max_ms"],
            _ => return None,
        };
        Some(known)
    }

    pub fn unsupported(declared: impl Into<String>, reason: impl Into<String>) -> Self {
        CheckKind::Unsupported {
            declared: declared.into(),
            reason: reason.into(),
        }
    }

    fn validated(self) -> Self {
        if let CheckKind::Pattern {
            pattern,
            literal: false,
            ..
        } = &self
        {
            if let Err(e) = Regex::new(pattern) {
                return Self::unsupported("pattern", format!("invalid regex: {}", e));
            }
        }
        self
    }

    pub fn label(&self) -> &str {
        match self {
            CheckKind::ExactOutput { .. } => "exact_output",
            CheckKind::ExitCode { .. } => "exit_code",
            CheckKind::Pattern { .. } => "pattern",
            CheckKind::Timing { .. } => "timing",
            CheckKind::Custom { .. } => "custom",
            CheckKind::Unsupported { declared, .. } => declared,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, CheckKind::Unsupported { .. })
    }
}
