use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

/// How the process ended. `Killed` is reserved for processes the sandbox
/// terminated itself, so it never collides with a real exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum ExitStatus {
    Exited(i32),
    Signaled(i32),
    Killed,
}

impl ExitStatus {
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Exited(code) => Some(*code),
            _ => None,
        }
    }

    pub fn from_std(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitStatus::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = status.signal() {
                return ExitStatus::Signaled(sig);
            }
        }
        ExitStatus::Killed
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exitcode={}", code),
            ExitStatus::Signaled(sig) => write!(f, "signal={}", sig),
            ExitStatus::Killed => f.write_str("killed"),
        }
    }
}

/// Outcome of one sandboxed process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub exit: ExitStatus,
    pub stdout: String,
    pub stderr: String,

    #[serde(rename = "duration_ms", with = "crate::serde_millis")]
    pub duration: Duration,

    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn is_truncated(&self) -> bool {
        self.stdout_truncated || self.stderr_truncated
    }

    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit == ExitStatus::Exited(0)
    }
}
