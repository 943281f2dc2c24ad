use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::check::CheckOutcome;
use crate::rubric::EngineState;
use crate::submission::{Submission, SubmissionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "kebab-case")]
pub enum GradeStatus {
    Complete,
    AbortedBlockingFailure,
    InternalError,
}

impl GradeStatus {
    /// `None` for states a grading run can still leave.
    pub fn from_state(state: EngineState) -> Option<Self> {
        match state {
            EngineState::Completed => Some(GradeStatus::Complete),
            EngineState::Aborted { .. } => Some(GradeStatus::AbortedBlockingFailure),
            EngineState::InternalError { .. } => Some(GradeStatus::InternalError),
            EngineState::Pending | EngineState::Running { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Cannot build a score record from non-terminal state '{0}'")]
pub struct NotTerminal(pub EngineState);

/// Final result of grading one submission. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    submission_id: SubmissionId,
    project_type: String,
    status: GradeStatus,
    final_state: EngineState,
    outcomes: Vec<CheckOutcome>,
    earned: f64,
    possible: f64,
    created_at: DateTime<Utc>,
}

impl ScoreRecord {
    /// Pure assembly. Skipped outcomes count toward neither total.
    pub fn build(
        submission: &Submission,
        outcomes: Vec<CheckOutcome>,
        final_state: EngineState,
        created_at: DateTime<Utc>,
    ) -> Result<Self, NotTerminal> {
        let status = GradeStatus::from_state(final_state).ok_or(NotTerminal(final_state))?;

        let (earned, possible) = outcomes
            .iter()
            .filter(|o| !o.verdict.is_skipped())
            .fold((0.0, 0.0), |(earned, possible), o| {
                (earned + o.earned, possible + o.possible)
            });

        Ok(Self {
            submission_id: submission.id().clone(),
            project_type: submission.project_type().to_owned(),
            status,
            final_state,
            outcomes,
            earned: f64::min(earned, possible),
            possible,
            created_at,
        })
    }

    pub fn submission_id(&self) -> &SubmissionId {
        &self.submission_id
    }

    pub fn project_type(&self) -> &str {
        &self.project_type
    }

    pub fn status(&self) -> GradeStatus {
        self.status
    }

    pub fn final_state(&self) -> EngineState {
        self.final_state
    }

    pub fn outcomes(&self) -> &[CheckOutcome] {
        &self.outcomes
    }

    pub fn earned(&self) -> f64 {
        self.earned
    }

    pub fn possible(&self) -> f64 {
        self.possible
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Captured stdout/stderr of every check that ran, for feedback generation.
    pub fn logs(&self) -> impl Iterator<Item = (&CheckOutcome, &str, &str)> {
        self.outcomes.iter().filter_map(|o| {
            o.execution
                .as_ref()
                .map(|e| (o, e.stdout.as_str(), e.stderr.as_str()))
        })
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;
    use crate::check::{CheckKind, Verdict};
    use crate::rubric::{RubricCheck, RunSpec};

    fn check(position: usize, weight: f64) -> RubricCheck {
        RubricCheck {
            position,
            name: format!("c{}", position),
            weight,
            kind: CheckKind::ExitCode { expected: 0 },
            blocking: false,
            reuse_previous: false,
            run: RunSpec::default(),
        }
    }

    fn submission() -> Submission {
        Submission::new(SubmissionId::new("s1").unwrap(), "kvstore", "/w", "./run")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    #[test]
    fn skipped_outcomes_count_toward_nothing() {
        let outcomes = vec![
            CheckOutcome::judged(&check(0, 30.0), Verdict::Passed, ""),
            CheckOutcome::judged(&check(1, 30.0), Verdict::Failed, ""),
            CheckOutcome::skipped(&check(2, 40.0), "skipped"),
        ];
        let record = ScoreRecord::build(
            &submission(),
            outcomes,
            EngineState::Aborted { check_index: 1 },
            now(),
        )
        .unwrap();

        assert_eq!(record.status(), GradeStatus::AbortedBlockingFailure);
        assert_eq!(record.outcomes().len(), 3);
        assert_eq!(record.outcomes()[2].possible, 0.0);
        assert_eq!(record.earned(), 30.0);
        assert_eq!(record.possible(), 60.0);
        assert_eq!(record.submission_id().as_str(), "s1");
        assert_eq!(record.created_at(), now());
    }

    #[test]
    fn partial_credit_is_summed() {
        let outcomes = vec![
            CheckOutcome::judged(&check(0, 10.0), Verdict::Partial(0.25), ""),
            CheckOutcome::judged(&check(1, 10.0), Verdict::Unsupported, ""),
        ];
        let record =
            ScoreRecord::build(&submission(), outcomes, EngineState::Completed, now()).unwrap();
        assert_eq!(record.status(), GradeStatus::Complete);
        assert_eq!(record.earned(), 2.5);
        assert_eq!(record.possible(), 20.0);
        assert!(record.earned() <= record.possible());
    }

    #[test]
    fn non_terminal_state_is_rejected() {
        assert_eq!(
            ScoreRecord::build(&submission(), vec![], EngineState::Pending, now()).unwrap_err(),
            NotTerminal(EngineState::Pending)
        );
        assert!(ScoreRecord::build(
            &submission(),
            vec![],
            EngineState::Running { check_index: 0 },
            now()
        )
        .is_err());
    }

    #[test]
    fn record_survives_json() {
        let outcomes = vec![CheckOutcome::judged(&check(0, 1.0), Verdict::Passed, "ok")];
        let record = ScoreRecord::build(
            &submission(),
            outcomes,
            EngineState::InternalError { check_index: 0 },
            now(),
        )
        .unwrap();
        let json = serde_json::to_string_pretty(&record).unwrap();
        assert!(json.contains("\"status\": \"internal_error\""));
        assert_eq!(serde_json::from_str::<ScoreRecord>(&json).unwrap(), record);
    }
}
