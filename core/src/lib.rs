pub mod action;
pub mod cancel;
pub mod check;
pub mod collab;
pub mod config;
pub mod record;
pub mod rubric;
pub mod sandbox;
pub mod str_interp;
pub mod style;
pub mod submission;

mod serde_millis;

pub use crate::cancel::CancelToken;
pub use crate::config::GraderConfig;
pub use crate::record::{GradeStatus, ScoreRecord};
pub use crate::rubric::{Rubric, RubricCheck, RubricEngine};
pub use crate::submission::{Submission, SubmissionId};
