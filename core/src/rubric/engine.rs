use std::time::Duration;

use chrono::Utc;

use super::{
    definition::{Rubric, RubricCheck},
    state::EngineState,
};
use crate::cancel::CancelToken;
use crate::check::{CheckEvaluator, CheckOutcome, EvaluatorRegistry};
use crate::record::{NotTerminal, ScoreRecord};
use crate::sandbox::{ExecutionResult, ResourceLimits, RunRequest, Sandbox, SandboxError};
use crate::submission::Submission;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Rubric is for project type '{rubric}' but the submission is '{submission}'")]
    ProjectTypeMismatch { rubric: String, submission: String },

    #[error("Grading was cancelled")]
    Cancelled,

    #[error("Grading already finished ({0})")]
    AlreadyFinished(EngineState),

    #[error("Grading has not finished yet: {0}")]
    NotFinished(#[from] NotTerminal),
}

/// Grades one submission against one rubric, one check per [`step`](Self::step).
///
/// An engine is used for a single submission and is consumed by [`finish`](Self::finish).
pub struct RubricEngine<'a> {
    submission: Submission,
    rubric: &'a Rubric,
    sandbox: &'a dyn Sandbox,
    evaluator: CheckEvaluator<'a>,
    limits: ResourceLimits,
    state: EngineState,
    outcomes: Vec<CheckOutcome>,
    last_result: Option<(usize, ExecutionResult)>,
}

impl<'a> RubricEngine<'a> {
    pub fn new(
        submission: Submission,
        rubric: &'a Rubric,
        sandbox: &'a dyn Sandbox,
        registry: &'a EvaluatorRegistry,
    ) -> Result<Self, EngineError> {
        if submission.project_type() != rubric.project_type() {
            return Err(EngineError::ProjectTypeMismatch {
                rubric: rubric.project_type().to_owned(),
                submission: submission.project_type().to_owned(),
            });
        }
        Ok(Self {
            submission,
            rubric,
            sandbox,
            evaluator: CheckEvaluator::new(registry),
            limits: ResourceLimits::default(),
            state: EngineState::Pending,
            outcomes: Vec::with_capacity(rubric.len()),
            last_result: None,
        })
    }

    /// Limits for every check. A check's `time_limit_ms` overrides the wall time.
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn outcomes(&self) -> &[CheckOutcome] {
        &self.outcomes
    }

    pub fn submission(&self) -> &Submission {
        &self.submission
    }

    /// Runs the next check and returns the state after it.
    pub async fn step(&mut self, cancel: &CancelToken) -> Result<EngineState, EngineError> {
        let Some(index) = self.state.next_check() else {
            return Err(EngineError::AlreadyFinished(self.state));
        };
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if self.state == EngineState::Pending {
            log::info!(
                "Grading submission {} against '{}' rubric ({} checks)",
                self.submission.id(),
                self.rubric.project_type(),
                self.rubric.len()
            );
        }
        self.state = EngineState::Running { check_index: index };

        let rubric = self.rubric;
        let check = &rubric.checks()[index];
        let outcome = match self.execute(check, cancel).await {
            Ok(outcome) => outcome,
            Err(SandboxError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => {
                log::error!(
                    "Grading host fault at check #{} '{}': {}",
                    index,
                    check.name,
                    e
                );
                self.outcomes.push(CheckOutcome::host_fault(check, &e));
                self.skip_rest(index, "skipped: grading stopped by a host fault");
                return Ok(self.transition(EngineState::InternalError { check_index: index }));
            }
        };

        log::debug!(
            "Check #{} '{}': {} ({}/{}) {}",
            index,
            check.name,
            outcome.verdict,
            outcome.earned,
            outcome.possible,
            outcome.rationale
        );
        let passed = outcome.verdict.is_pass();
        self.outcomes.push(outcome);

        let next = if check.blocking && !passed {
            self.skip_rest(
                index,
                &format!("skipped: blocking check '{}' did not pass", check.name),
            );
            EngineState::Aborted { check_index: index }
        } else if index + 1 == self.rubric.len() {
            EngineState::Completed
        } else {
            EngineState::Running {
                check_index: index + 1,
            }
        };
        Ok(self.transition(next))
    }

    /// Steps until a terminal state is reached.
    pub async fn run_to_end(&mut self, cancel: &CancelToken) -> Result<EngineState, EngineError> {
        while !self.state.is_terminal() {
            self.step(cancel).await?;
        }
        Ok(self.state)
    }

    pub fn finish(self) -> Result<ScoreRecord, EngineError> {
        let record = ScoreRecord::build(&self.submission, self.outcomes, self.state, Utc::now())?;
        log::info!(
            "Graded submission {}: {} ({}/{})",
            record.submission_id(),
            record.status(),
            record.earned(),
            record.possible()
        );
        Ok(record)
    }

    /// Runs every check and builds the record.
    pub async fn grade(mut self, cancel: &CancelToken) -> Result<ScoreRecord, EngineError> {
        self.run_to_end(cancel).await?;
        self.finish()
    }

    async fn execute(
        &mut self,
        check: &RubricCheck,
        cancel: &CancelToken,
    ) -> Result<CheckOutcome, SandboxError> {
        if check.reuse_previous {
            if let Some((from, result)) = &self.last_result {
                return Ok(self
                    .evaluator
                    .evaluate(check, result)
                    .with_reused_from(*from));
            }
            log::warn!("Check '{}' has no previous result to reuse; running it", check.name);
        }

        let req = self.request_for(check)?;
        let result = self.sandbox.run(&req, cancel).await?;
        let outcome = self
            .evaluator
            .evaluate(check, &result)
            .with_execution(result.clone());
        self.last_result = Some((check.position, result));
        Ok(outcome)
    }

    fn request_for(&self, check: &RubricCheck) -> Result<RunRequest, SandboxError> {
        let workdir = self.submission.source_dir();
        let command = check
            .run
            .command_line(self.submission.run_command(), workdir)
            .map_err(SandboxError::CommandTemplate)?;
        let mut limits = self.limits;
        if let Some(ms) = check.run.time_limit_ms {
            limits = limits.wall_time(Duration::from_millis(ms));
        }
        Ok(RunRequest::new(workdir, command)
            .stdin(check.run.stdin.clone())
            .limits(limits))
    }

    fn skip_rest(&mut self, index: usize, reason: &str) {
        for check in &self.rubric.checks()[index + 1..] {
            self.outcomes.push(CheckOutcome::skipped(check, reason));
        }
    }

    fn transition(&mut self, next: EngineState) -> EngineState {
        debug_assert!(!self.state.is_terminal());
        debug_assert!(
            !next.is_terminal() || self.outcomes.len() == self.rubric.len(),
            "a terminal state needs one outcome per check"
        );
        self.state = next;
        next
    }
}
