use std::path::PathBuf;

use anyhow::Context as _;
use gradebot_core::{print_success, GraderConfig, Rubric};

use super::{GlobalArgs, SubcmdResult};

/// Writes an example config and an example rubric.
#[derive(Debug, clap::Args)]
pub struct Args {
    #[arg(default_value = "./")]
    dir: PathBuf,
}

pub fn exec(args: &Args, _: &GlobalArgs) -> SubcmdResult {
    let files = [
        (GraderConfig::FILENAME, GraderConfig::example_toml()),
        (Rubric::EXAMPLE_FILENAME, Rubric::example_toml()),
    ];
    for (name, _) in &files {
        let path = args.dir.join(name);
        anyhow::ensure!(!path.exists(), "Already exists: {:?}", path);
    }
    for (name, contents) in files {
        let path = args.dir.join(name);
        let contents = contents.with_context(|| format!("Missing embedded {}", name))?;
        fsutil::write_atomically_with_mkdir(&path, contents)?;
    }
    print_success!(
        "Initialized gradebot files. (path: {})",
        args.dir.to_string_lossy()
    );
    Ok(())
}
