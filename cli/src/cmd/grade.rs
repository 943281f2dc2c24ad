use std::path::PathBuf;

use anyhow::Context as _;
use chrono::Utc;
use colored::Colorize as _;
use gradebot_core::{
    action::{self, Grader},
    check::EvaluatorRegistry,
    collab::{JsonFileStore, SummaryFeedback},
    style, CancelToken, GradeStatus, Submission, SubmissionId,
};

use crate::util;

use super::{GlobalArgs, SubcmdResult};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Project directory of the submission
    #[arg(default_value = "./")]
    pub dir: PathBuf,

    #[arg(short, long)]
    pub rubric: PathBuf,

    /// Shell command that runs the submission, e.g. "python3 kv.py"
    #[arg(short = 'c', long = "run")]
    pub run_command: String,

    /// Defaults to a timestamp-based id
    #[arg(long)]
    pub id: Option<String>,

    /// Defaults to the rubric's project type
    #[arg(long)]
    pub project_type: Option<String>,

    /// Do not save the score record
    #[arg(long)]
    pub no_store: bool,

    #[arg(long)]
    pub no_feedback: bool,

    /// Show captured output of failed checks
    #[arg(short, long)]
    pub detail: bool,
}

pub async fn exec(args: &Args, global_args: &GlobalArgs) -> SubcmdResult {
    let cfg = global_args.load_config()?;
    let rubric = action::load_rubric(&args.rubric)?;

    let id = match &args.id {
        Some(id) => SubmissionId::new(id.as_str())?,
        None => SubmissionId::generate(Utc::now()),
    };
    let project_type = args
        .project_type
        .clone()
        .unwrap_or_else(|| rubric.project_type().to_owned());
    let submission = Submission::new(id, project_type, &args.dir, &args.run_command);

    let sandbox = cfg.sandbox.process_sandbox();
    let registry = EvaluatorRegistry::with_builtins();
    let store = JsonFileStore::new(cfg.records_dir());
    let progress = util::SpinnerProgress::new();

    let mut grader = Grader::new(&sandbox, &registry);
    grader.limits = cfg.sandbox.limits();
    grader.staging_dir = cfg.staging_dir();
    grader.progress = &progress;
    if !args.no_store {
        grader.store = Some(&store);
    }
    if !args.no_feedback {
        grader.feedback = Some(&SummaryFeedback);
    }

    let cancel = CancelToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted; cancelling the running check");
                cancel.cancel();
            }
        })
    };
    let res = action::grade_submission(submission, &rubric, &grader, &cancel).await;
    ctrl_c.abort();
    progress.finish();
    let graded = res.context("Grading did not finish")?;

    println!();
    style::print_record_summary(&graded.record);
    if args.detail {
        style::print_record_detail(&graded.record, util::terminal_cols());
    }
    if let Some(feedback) = &graded.feedback {
        println!("\n{}", feedback);
    }
    if !args.no_store {
        log::info!("Record: {:?}", store.path_for(graded.record.submission_id()));
    }
    if graded.record.status() == GradeStatus::InternalError {
        eprintln!(
            "{}",
            "Grading host fault: the submission was not judged".bright_red()
        );
    }
    Ok(())
}
