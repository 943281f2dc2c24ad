use colored::{Color, ColoredString, Colorize};

use crate::check::{CheckOutcome, Verdict};
use crate::record::{GradeStatus, ScoreRecord};

#[macro_export]
macro_rules! print_success {
    ($fmt:literal, $($e:tt)*) => {
        use ::colored::Colorize as _;
        println!("{}", format!($fmt, $($e)*).green())
    }
}

pub fn is_truecolor_supported() -> bool {
    let Ok(v) = std::env::var("COLORTERM") else {
        return false
    };
    matches!(v.as_str(), "truecolor" | "24bit")
}

pub trait ColorTheme {
    fn color(&self) -> Color;
}

impl ColorTheme for log::Level {
    fn color(&self) -> Color {
        use log::Level::*;
        match self {
            Error => Color::BrightRed,
            Warn => Color::BrightYellow,
            Info => Color::Cyan,
            Debug => Color::Magenta,
            Trace => Color::Blue,
        }
    }
}

impl ColorTheme for Verdict {
    fn color(&self) -> Color {
        use Verdict::*;
        if !self::is_truecolor_supported() {
            return match self {
                Passed => Color::Green,
                Partial(_) => Color::Yellow,
                Failed => Color::Red,
                Unsupported | HostFault => Color::Magenta,
                Skipped => Color::BrightBlack,
            };
        }

        match self {
            Passed => Color::TrueColor {
                r: 30,
                g: 180,
                b: 40,
            },
            Partial(_) => Color::TrueColor {
                r: 210,
                g: 138,
                b: 4,
            },
            Failed => Color::TrueColor {
                r: 220,
                g: 42,
                b: 42,
            },
            Unsupported | HostFault => Color::TrueColor {
                r: 171,
                g: 40,
                b: 200,
            },
            Skipped => Color::TrueColor {
                r: 110,
                g: 110,
                b: 110,
            },
        }
    }
}

impl ColorTheme for GradeStatus {
    fn color(&self) -> Color {
        match self {
            GradeStatus::Complete => Color::Green,
            GradeStatus::AbortedBlockingFailure => Color::Yellow,
            GradeStatus::InternalError => Color::BrightRed,
        }
    }
}

/// Fixed-width badge such as ` PASS `.
pub fn verdict_icon(verdict: Verdict) -> ColoredString {
    let fg = if is_truecolor_supported() {
        Color::TrueColor {
            r: 255,
            g: 255,
            b: 255,
        }
    } else {
        Color::BrightBlack
    };
    format!(" {:<5}", verdict.to_string())
        .on_color(verdict.color())
        .bold()
        .color(fg)
}

/// e.g. `#2 set then get ... PASS  20/20`
pub fn outcome_line(o: &CheckOutcome) -> String {
    let mut line = format!(
        "#{} {} ... {} {}/{}",
        o.position,
        o.name,
        verdict_icon(o.verdict),
        o.earned,
        o.possible
    );
    if let Some(from) = o.reused_from {
        line += &format!(" {}", format!("(output of #{})", from).dimmed());
    }
    if let Some(exec) = &o.execution {
        line += &format!(" [{}ms]", exec.duration.as_millis());
    }
    line
}

pub fn print_record_summary(record: &ScoreRecord) {
    let bar = "-".repeat(5);
    let status = record.status();
    println!(
        "{} {} {} {}",
        bar,
        format!("{}/{}", record.earned(), record.possible()).bold(),
        format!("({})", status).color(status.color()),
        bar
    );
}

/// Rationale and captured output of every check that did not pass.
pub fn print_record_detail(record: &ScoreRecord, cols: usize) {
    const THIN_LINE: &str = "─";

    for o in record
        .outcomes()
        .iter()
        .filter(|o| !o.verdict.is_pass() && !o.verdict.is_skipped())
    {
        println!(
            "\n{}: {} {}",
            o.name.color(Color::BrightYellow).bold(),
            verdict_icon(o.verdict),
            o.rationale
        );
        let Some(exec) = &o.execution else {
            continue;
        };
        println!("{}", THIN_LINE.repeat(cols).bright_black());
        println!("{} {}", "exit:".cyan().bold(), exec.exit);
        for (title, text, truncated) in [
            ("stdout:", &exec.stdout, exec.stdout_truncated),
            ("stderr:", &exec.stderr, exec.stderr_truncated),
        ] {
            if text.is_empty() {
                continue;
            }
            println!("{}", title.cyan().bold());
            print!("{}", text);
            if !text.ends_with('\n') {
                println!();
            }
            if truncated {
                println!("{}", " Truncated ".on_yellow().black().bold());
            }
        }
        if exec.timed_out {
            println!("{}", " Timed out ".on_red().white().bold());
        }
    }
}
