use std::{io, path::PathBuf};

use crate::str_interp::InterpError;

/// Failures of the grading host, as opposed to failures of the student program.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Working directory '{0}' does not exist")]
    WorkdirMissing(PathBuf),

    #[error("Run command is empty")]
    EmptyCommand,

    #[error("Invalid command template: {0}")]
    CommandTemplate(#[source] InterpError),

    #[error("Command '{0}' not found")]
    CommandNotFound(String),

    #[error("Command '{0}' is not executable")]
    NotExecutable(String),

    #[error("Failed to spawn '{} -c {command}': {source}", .shell.display())]
    Spawn {
        shell: PathBuf,
        command: String,

        #[source]
        source: io::Error,
    },

    #[error("Failed to capture output of subprocess: {0}")]
    Capture(#[source] io::Error),

    #[error("Failed to wait for subprocess: {0}")]
    Wait(#[source] io::Error),

    #[error("Run was cancelled")]
    Cancelled,
}

impl SandboxError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SandboxError::Cancelled)
    }
}
