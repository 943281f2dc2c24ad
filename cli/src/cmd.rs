pub mod check_rubric;
pub mod grade;
pub mod init;

use std::path::PathBuf;

use gradebot_core::GraderConfig;

use crate::util;

#[derive(Debug, clap::Parser)]
#[command(author, version, about, long_about = None)]
pub struct GlobalArgs {
    #[command(subcommand)]
    pub subcmd: Subcommand,

    /// Config file. Defaults to the nearest gradebot.toml above the current dir.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, clap::Subcommand)]
pub enum Subcommand {
    #[command(alias("g"))]
    Grade(grade::Args),

    CheckRubric(check_rubric::Args),

    Init(init::Args),
}

pub type SubcmdResult = anyhow::Result<()>;

impl GlobalArgs {
    pub async fn exec_subcmd(&self) -> SubcmdResult {
        use Subcommand::*;
        match &self.subcmd {
            Grade(args) => grade::exec(args, self).await,
            CheckRubric(args) => check_rubric::exec(args, self),
            Init(args) => init::exec(args, self),
        }
    }

    pub fn load_config(&self) -> anyhow::Result<GraderConfig> {
        match &self.config {
            Some(path) => GraderConfig::from_toml_file(path.clone()),
            None => GraderConfig::from_file_finding_in_ancestors_or_default(util::current_dir()),
        }
    }
}
