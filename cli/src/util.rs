use std::{io::Write as _, path::PathBuf, process::exit, time::Duration};

use colored::Colorize as _;
use gradebot_core::{
    action::GradeProgress,
    check::CheckOutcome,
    rubric::RubricCheck,
    style::{self, ColorTheme as _},
};
use indicatif::{ProgressBar, ProgressStyle};

/// `RUST_LOG` overrides the default `info` filter.
pub fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let level = record.level();
            writeln!(
                buf,
                "[{}] {}",
                level.to_string().color(level.color()),
                record.args()
            )
        })
        .init();
}

pub fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|e| {
        eprintln!("Failed to get current dir: {}", e);
        exit(1);
    })
}

pub fn terminal_cols() -> usize {
    let (cols, _) = crossterm::terminal::size().unwrap_or((40, 40));
    cols as usize
}

/// Spinner naming the running check; finished checks are printed above it.
pub struct SpinnerProgress {
    bar: ProgressBar,
}

impl SpinnerProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} {msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for SpinnerProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl GradeProgress for SpinnerProgress {
    fn check_started(&self, check: &RubricCheck) {
        self.bar
            .set_message(format!("#{} {} ...", check.position, check.name));
    }

    fn check_finished(&self, outcome: &CheckOutcome) {
        self.bar.println(style::outcome_line(outcome).cyan().to_string());
    }
}
