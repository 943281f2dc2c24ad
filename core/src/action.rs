pub mod error {
    #[allow(unused_imports)]
    pub(crate) use anyhow::{anyhow, bail, ensure, Context as _};
    pub use anyhow::{Error, Result};
}

use std::path::{Path, PathBuf};

use error::*;

use crate::cancel::CancelToken;
use crate::check::{CheckOutcome, EvaluatorRegistry};
use crate::collab::{FeedbackProvider, GradedSubmission, RecordStore};
use crate::rubric::{Rubric, RubricCheck, RubricEngine};
use crate::sandbox::{ResourceLimits, Sandbox};
use crate::submission::Submission;

/// Receives progress while a submission is graded.
pub trait GradeProgress: Send + Sync {
    fn check_started(&self, _check: &RubricCheck) {}
    fn check_finished(&self, _outcome: &CheckOutcome) {}
}

/// Reports nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl GradeProgress for Silent {}

/// Everything a grading run needs besides the submission and its rubric.
pub struct Grader<'a> {
    pub sandbox: &'a dyn Sandbox,
    pub registry: &'a EvaluatorRegistry,
    pub limits: ResourceLimits,

    /// Parent of per-grading working copies; `None` grades in place.
    pub staging_dir: Option<PathBuf>,
    pub feedback: Option<&'a dyn FeedbackProvider>,
    pub store: Option<&'a dyn RecordStore>,
    pub progress: &'a dyn GradeProgress,
}

impl<'a> Grader<'a> {
    pub fn new(sandbox: &'a dyn Sandbox, registry: &'a EvaluatorRegistry) -> Self {
        Self {
            sandbox,
            registry,
            limits: ResourceLimits::default(),
            staging_dir: None,
            feedback: None,
            store: None,
            progress: &Silent,
        }
    }
}

/// Stages a working copy, grades it, attaches feedback and persists the record.
///
/// A host fault is a record with the internal-error status, not an `Err`.
/// Cancellation is an `Err` wrapping [`EngineError::Cancelled`](crate::rubric::EngineError).
pub async fn grade_submission(
    submission: Submission,
    rubric: &Rubric,
    grader: &Grader<'_>,
    cancel: &CancelToken,
) -> Result<GradedSubmission> {
    let staged = match &grader.staging_dir {
        // A missing source dir is left for the sandbox to report as a host fault.
        Some(root) if submission.source_dir().is_dir() => {
            Some(StagedWorkdir::create(root, &submission).context("Failed to stage submission")?)
        }
        _ => None,
    };
    let submission = match &staged {
        Some(staged) => submission.relocated(staged.path()),
        None => submission,
    };

    let mut engine = RubricEngine::new(submission, rubric, grader.sandbox, grader.registry)?
        .limits(grader.limits);
    while let Some(index) = engine.state().next_check() {
        grader.progress.check_started(&rubric.checks()[index]);
        let done = engine.outcomes().len();
        engine.step(cancel).await?;
        engine.outcomes()[done..]
            .iter()
            .for_each(|o| grader.progress.check_finished(o));
    }
    let record = engine.finish()?;
    drop(staged);

    let feedback = match grader.feedback {
        Some(provider) => match provider.feedback(&record).await {
            Ok(text) => Some(text),
            Err(e) => {
                log::warn!(
                    "Feedback for submission {} is unavailable: {:#}",
                    record.submission_id(),
                    e
                );
                None
            }
        },
        None => None,
    };

    let graded = GradedSubmission { record, feedback };
    if let Some(store) = grader.store {
        store
            .save(&graded)
            .context("Failed to save the score record")?;
    }
    Ok(graded)
}

pub fn load_rubric(path: impl AsRef<Path>) -> Result<Rubric> {
    let rubric = Rubric::from_toml_file(path)?;
    for check in rubric.unsupported_checks() {
        log::warn!(
            "Check #{} '{}' ({}) is unsupported and will score zero",
            check.position,
            check.name,
            check.kind.label()
        );
    }
    Ok(rubric)
}

/// Private copy of a submission directory, removed on drop.
#[derive(Debug)]
pub struct StagedWorkdir {
    dir: PathBuf,
}

impl StagedWorkdir {
    pub fn create(staging_root: impl AsRef<Path>, submission: &Submission) -> Result<Self> {
        let dir = staging_root.as_ref().join(format!(
            "gradebot-{}-{:08x}",
            submission.id(),
            rand::random::<u32>()
        ));
        ensure!(!dir.exists(), "Staging dir already exists: {:?}", dir);

        // Own the dir before copying so a failed copy is cleaned up too.
        let staged = Self { dir };
        let n = fsutil::copy_tree(submission.source_dir(), &staged.dir)?;
        log::debug!("Staged {} files into {:?}", n, staged.dir);
        Ok(staged)
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}

impl Drop for StagedWorkdir {
    fn drop(&mut self) {
        if !self.dir.exists() {
            return;
        }
        if let Err(e) = fsutil::remove_dir_all(&self.dir) {
            log::warn!("{}", e);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::submission::SubmissionId;

    #[test]
    fn staged_workdir_is_a_removable_copy() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir(src.path().join("lib")).unwrap();
        std::fs::write(src.path().join("lib/kv.py"), "print('hi')").unwrap();
        let root = tempfile::tempdir().unwrap();
        let sub = Submission::new(SubmissionId::new("s1").unwrap(), "p", src.path(), "run");

        let staged = StagedWorkdir::create(root.path(), &sub).unwrap();
        let copy = staged.path().to_owned();
        assert!(copy.starts_with(root.path()));
        assert_eq!(
            std::fs::read_to_string(copy.join("lib/kv.py")).unwrap(),
            "print('hi')"
        );

        drop(staged);
        assert!(!copy.exists());
        assert!(src.path().join("lib/kv.py").exists());
    }

    #[test]
    fn staging_a_missing_dir_fails() {
        let root = tempfile::tempdir().unwrap();
        let sub = Submission::new(SubmissionId::new("s1").unwrap(), "p", "/no/such/dir", "run");
        assert!(StagedWorkdir::create(root.path(), &sub).is_err());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
