use std::path::{Path, PathBuf};
use std::result::Result as StdResult;
use std::time::Duration;

use anyhow::Context as _;
use rust_embed::RustEmbed;
use serde::{de::Error as _, Deserialize};

use crate::sandbox::{ProcessSandbox, ResourceLimits};

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct GraderConfig {
    #[serde(skip)]
    pub source_config_file: Option<PathBuf>,
    pub sandbox: SandboxConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub shell: PathBuf,
    pub wall_time_ms: u64,
    pub cpu_time_ms: Option<u64>,
    pub stdout_capture_max_bytes: usize,
    pub stderr_capture_max_bytes: usize,
    pub kill_grace_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub records_dir: PathBuf,
    /// Parent of per-grading working copies. Defaults to the system temp dir.
    pub staging_dir: Option<PathBuf>,
    pub stage_copies: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let limits = ResourceLimits::default();
        Self {
            shell: "/bin/sh".into(),
            wall_time_ms: limits.wall_time.as_millis() as u64,
            cpu_time_ms: None,
            stdout_capture_max_bytes: limits.stdout_max_bytes,
            stderr_capture_max_bytes: limits.stderr_max_bytes,
            kill_grace_ms: 500,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            records_dir: "./records".into(),
            staging_dir: None,
            stage_copies: true,
        }
    }
}

impl SandboxConfig {
    /// Zero limits would fail every run before it starts.
    fn validate(&self) -> StdResult<(), String> {
        let zero = if self.wall_time_ms == 0 {
            "wall_time_ms"
        } else if self.cpu_time_ms == Some(0) {
            "cpu_time_ms"
        } else if self.stdout_capture_max_bytes == 0 {
            "stdout_capture_max_bytes"
        } else if self.stderr_capture_max_bytes == 0 {
            "stderr_capture_max_bytes"
        } else {
            return Ok(());
        };
        Err(format!("sandbox.{} must be greater than 0", zero))
    }

    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits::default()
            .wall_time(Duration::from_millis(self.wall_time_ms))
            .cpu_time(self.cpu_time_ms.map(Duration::from_millis))
            .capture_max_bytes(self.stdout_capture_max_bytes, self.stderr_capture_max_bytes)
    }

    pub fn process_sandbox(&self) -> ProcessSandbox {
        ProcessSandbox::new()
            .shell(&self.shell)
            .kill_grace(Duration::from_millis(self.kill_grace_ms))
    }
}

#[derive(RustEmbed)]
#[folder = "assets/"]
struct Asset;

fn strip_prefix_dot(path: &Path) -> &Path {
    path.strip_prefix(".").unwrap_or(path)
}

impl GraderConfig {
    pub const FILENAME: &'static str = "gradebot.toml";

    pub fn example_toml() -> Option<String> {
        let file = Asset::get(Self::FILENAME)?;
        std::str::from_utf8(file.data.as_ref()).ok().map(str::to_owned)
    }

    pub fn from_toml(s: &str) -> StdResult<Self, toml::de::Error> {
        let cfg: Self = toml::from_str(s)?;
        cfg.sandbox.validate().map_err(toml::de::Error::custom)?;
        Ok(cfg)
    }

    pub fn from_toml_file(filepath: PathBuf) -> anyhow::Result<Self> {
        let toml = fsutil::read_to_string(&filepath).context("Cannot read a file")?;
        let mut cfg = Self::from_toml(&toml)
            .with_context(|| format!("Invalid config TOML: {:?}", filepath))?;
        cfg.source_config_file = Some(filepath);
        Ok(cfg)
    }

    /// Find config file ancestor dirs, including current dir.
    pub fn find_file_in_ancestors(cur_dir: impl AsRef<Path>) -> anyhow::Result<PathBuf> {
        let cur_dir = cur_dir.as_ref();
        cur_dir
            .ancestors()
            .map(|dir| dir.join(Self::FILENAME))
            .find(|path| path.is_file())
            .with_context(|| format!("Cannot find '{}'", Self::FILENAME))
    }

    /// Built-in defaults when no config file exists in `cur_dir` or above it.
    pub fn from_file_finding_in_ancestors_or_default(
        cur_dir: impl AsRef<Path>,
    ) -> anyhow::Result<Self> {
        match Self::find_file_in_ancestors(cur_dir) {
            Ok(filepath) => Self::from_toml_file(filepath),
            Err(_) => {
                log::debug!("No {} found; using defaults", Self::FILENAME);
                Ok(Self::default())
            }
        }
    }

    /// Relative paths are resolved against the config file's directory.
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            return path.to_owned();
        }
        match self.source_config_file.as_deref().and_then(Path::parent) {
            Some(base) => base.join(strip_prefix_dot(path)),
            None => path.to_owned(),
        }
    }

    pub fn records_dir(&self) -> PathBuf {
        self.resolve_path(&self.store.records_dir)
    }

    /// `None` when gradings run directly in the submission directory.
    pub fn staging_dir(&self) -> Option<PathBuf> {
        if !self.store.stage_copies {
            return None;
        }
        Some(match &self.store.staging_dir {
            Some(dir) => self.resolve_path(dir),
            None => std::env::temp_dir(),
        })
    }
}
