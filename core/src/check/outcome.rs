use std::fmt;

use serde::{Deserialize, Serialize};

use crate::rubric::RubricCheck;
use crate::sandbox::ExecutionResult;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, strum::Display)]
#[serde(tag = "verdict", content = "credit", rename_all = "snake_case")]
pub enum Verdict {
    #[strum(serialize = "PASS")]
    Passed,

    /// Fraction of the weight earned, strictly between 0 and 1.
    #[strum(serialize = "PART")]
    Partial(f64),

    #[strum(serialize = "FAIL")]
    Failed,

    /// The check itself could not be evaluated (unknown kind, bad parameters).
    #[strum(serialize = "UNSUP")]
    Unsupported,

    /// The grading host failed while running this check.
    #[strum(serialize = "HOST")]
    HostFault,

    #[strum(serialize = "SKIP")]
    Skipped,
}

impl Verdict {
    /// NaN and values <= 0 fail, values >= 1 pass.
    pub fn from_credit(credit: f64) -> Self {
        if credit >= 1.0 {
            Verdict::Passed
        } else if credit > 0.0 {
            Verdict::Partial(credit)
        } else {
            Verdict::Failed
        }
    }

    pub fn credit(&self) -> f64 {
        match self {
            Verdict::Passed => 1.0,
            Verdict::Partial(credit) => credit.clamp(0.0, 1.0),
            _ => 0.0,
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Passed)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Verdict::Skipped)
    }
}

/// Result of one rubric check, in rubric order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub position: usize,
    pub name: String,
    pub kind: String,
    pub verdict: Verdict,

    /// Zero for skipped checks.
    pub possible: f64,
    pub earned: f64,
    pub rationale: String,

    /// Position of the check whose execution result was evaluated again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reused_from: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionResult>,
}

impl CheckOutcome {
    pub fn judged(check: &RubricCheck, verdict: Verdict, rationale: impl Into<String>) -> Self {
        let possible = if verdict.is_skipped() {
            0.0
        } else {
            check.weight
        };
        Self {
            position: check.position,
            name: check.name.clone(),
            kind: check.kind.label().to_owned(),
            verdict,
            possible,
            earned: possible * verdict.credit(),
            rationale: rationale.into(),
            reused_from: None,
            execution: None,
        }
    }

    pub fn skipped(check: &RubricCheck, reason: impl Into<String>) -> Self {
        Self::judged(check, Verdict::Skipped, reason)
    }

    pub fn host_fault(check: &RubricCheck, err: impl fmt::Display) -> Self {
        Self::judged(
            check,
            Verdict::HostFault,
            format!("internal: grading host fault: {}", err),
        )
    }

    pub fn with_execution(mut self, result: ExecutionResult) -> Self {
        self.execution = Some(result);
        self
    }

    pub fn with_reused_from(mut self, position: usize) -> Self {
        self.reused_from = Some(position);
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn credit_is_mapped_to_verdict() {
        assert_eq!(Verdict::from_credit(1.0), Verdict::Passed);
        assert_eq!(Verdict::from_credit(1.5), Verdict::Passed);
        assert_eq!(Verdict::from_credit(0.25), Verdict::Partial(0.25));
        assert_eq!(Verdict::from_credit(0.0), Verdict::Failed);
        assert_eq!(Verdict::from_credit(-3.0), Verdict::Failed);
        assert_eq!(Verdict::from_credit(f64::NAN), Verdict::Failed);
    }

    #[test]
    fn verdict_display_is_short() {
        assert_eq!(Verdict::Passed.to_string(), "PASS");
        assert_eq!(Verdict::Partial(0.5).to_string(), "PART");
        assert_eq!(Verdict::Skipped.to_string(), "SKIP");
    }

    #[test]
    fn verdict_serializes_with_credit() {
        assert_eq!(
            serde_json::to_string(&Verdict::Partial(0.5)).unwrap(),
            r#"{"verdict":"partial","credit":0.5}"#
        );
        assert_eq!(
            serde_json::to_string(&Verdict::HostFault).unwrap(),
            r#"{"verdict":"host_fault"}"#
        );
    }
}
