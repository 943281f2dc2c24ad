use std::path::PathBuf;

use colored::Colorize as _;
use gradebot_core::{action, check::EvaluatorRegistry, check::CheckKind, print_success};

use super::{GlobalArgs, SubcmdResult};

#[derive(Debug, clap::Args)]
pub struct Args {
    pub rubric: PathBuf,
}

pub fn exec(args: &Args, _: &GlobalArgs) -> SubcmdResult {
    let rubric = action::load_rubric(&args.rubric)?;
    let registry = EvaluatorRegistry::with_builtins();

    println!(
        "{} ({} checks, total {})",
        rubric.project_type().bold(),
        rubric.len(),
        rubric.total()
    );
    let mut num_problems = 0;
    for check in rubric.checks() {
        let mut flags = Vec::new();
        if check.blocking {
            flags.push("blocking");
        }
        if check.reuse_previous {
            flags.push("reuse");
        }
        let problem = match &check.kind {
            CheckKind::Unsupported { reason, .. } => Some(reason.clone()),
            CheckKind::Custom { evaluator, .. } if registry.get(evaluator).is_none() => {
                Some(format!("no evaluator named '{}'", evaluator))
            }
            _ => None,
        };
        println!(
            "  #{} {} [{}] weight={}{}",
            check.position,
            check.name,
            check.kind.label(),
            check.weight,
            if flags.is_empty() {
                String::new()
            } else {
                format!(" ({})", flags.join(", ")).dimmed().to_string()
            }
        );
        if let Some(problem) = problem {
            num_problems += 1;
            println!("    {}", problem.bright_red());
        }
    }

    anyhow::ensure!(
        num_problems == 0,
        "{} check(s) cannot be evaluated and would score zero",
        num_problems
    );
    print_success!("Rubric {:?} is valid.", args.rubric);
    Ok(())
}
