//! Collaborators that receive a finished [`ScoreRecord`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::record::ScoreRecord;
use crate::submission::SubmissionId;

/// Durable storage of score records, keyed by submission id.
pub trait RecordStore: Send + Sync {
    /// Overwrites any record previously saved for the same submission.
    fn save(&self, record: &GradedSubmission) -> anyhow::Result<()>;

    fn load(&self, id: &SubmissionId) -> anyhow::Result<Option<GradedSubmission>>;
}

/// Writes each record as pretty JSON to `<dir>/<submission id>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &SubmissionId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

impl RecordStore for JsonFileStore {
    fn save(&self, graded: &GradedSubmission) -> anyhow::Result<()> {
        let path = self.path_for(graded.record.submission_id());
        fsutil::write_json_with_mkdir(&path, graded)?;
        log::info!("Saved score record to {:?}", path);
        Ok(())
    }

    fn load(&self, id: &SubmissionId) -> anyhow::Result<Option<GradedSubmission>> {
        let path = self.path_for(id);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(fsutil::read_json_with_deserialize(path)?))
    }
}

/// Writes human-readable commentary about a graded submission.
/// Failures never change the score.
#[async_trait]
pub trait FeedbackProvider: Send + Sync {
    /// `record` includes the captured output of every check that ran.
    async fn feedback(&self, record: &ScoreRecord) -> anyhow::Result<String>;
}

/// A score record plus the commentary attached to it, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradedSubmission {
    pub record: ScoreRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

/// Produces a short plain-text summary from the record alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryFeedback;

#[async_trait]
impl FeedbackProvider for SummaryFeedback {
    async fn feedback(&self, record: &ScoreRecord) -> anyhow::Result<String> {
        let mut lines = vec![format!(
            "Scored {} out of {} ({}).",
            record.earned(),
            record.possible(),
            record.status()
        )];
        lines.extend(
            record
                .outcomes()
                .iter()
                .filter(|o| !o.verdict.is_pass() && !o.verdict.is_skipped())
                .map(|o| format!("- {}: {}", o.name, o.rationale)),
        );
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod test {
    use chrono::Utc;

    use super::*;
    use crate::check::{CheckKind, CheckOutcome, Verdict};
    use crate::rubric::{EngineState, RubricCheck, RunSpec};
    use crate::submission::Submission;

    fn record() -> ScoreRecord {
        let check = RubricCheck {
            position: 0,
            name: "greets".to_owned(),
            weight: 10.0,
            kind: CheckKind::ExitCode { expected: 0 },
            blocking: false,
            reuse_previous: false,
            run: RunSpec::default(),
        };
        let sub = Submission::new(SubmissionId::new("s-9").unwrap(), "kvstore", "/w", "run");
        ScoreRecord::build(
            &sub,
            vec![CheckOutcome::judged(&check, Verdict::Failed, "expected exit code 0, got 1")],
            EngineState::Completed,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("records"));
        let id = SubmissionId::new("s-9").unwrap();
        assert!(store.load(&id).unwrap().is_none());

        let graded = GradedSubmission {
            record: record(),
            feedback: Some("nice try".to_owned()),
        };
        store.save(&graded).unwrap();
        assert!(dir.path().join("records/s-9.json").is_file());
        assert_eq!(store.load(&id).unwrap(), Some(graded));
    }

    #[tokio::test]
    async fn summary_feedback_lists_failures() {
        let text = SummaryFeedback.feedback(&record()).await.unwrap();
        assert!(text.starts_with("Scored 0 out of 10 (complete)."));
        assert!(text.contains("- greets: expected exit code 0, got 1"));
    }
}
