use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use lazy_regex::regex_is_match;
use nix::{
    errno::Errno,
    sys::{
        resource::{setrlimit, Resource},
        signal::{killpg, Signal},
    },
    unistd::{setpgid, Pid},
};
use tokio::{
    io::AsyncWriteExt,
    process::{Child, Command},
    task::JoinHandle,
    time::Instant,
};

use super::{
    capture::BoundedCapture,
    error::SandboxError,
    limits::ResourceLimits,
    result::{ExecutionResult, ExitStatus},
};
use crate::cancel::CancelToken;

/// One command to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub workdir: PathBuf,
    pub command: String,
    pub stdin: Option<String>,
    pub limits: ResourceLimits,
}

impl RunRequest {
    pub fn new(workdir: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        Self {
            workdir: workdir.into(),
            command: command.into(),
            stdin: None,
            limits: ResourceLimits::default(),
        }
    }

    pub fn stdin(mut self, input: Option<String>) -> Self {
        self.stdin = input;
        self
    }

    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Executes commands on behalf of the rubric engine.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn run(
        &self,
        req: &RunRequest,
        cancel: &CancelToken,
    ) -> Result<ExecutionResult, SandboxError>;
}

/// Runs each command as `<shell> -c <command>` in its own process group.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    shell: PathBuf,
    kill_grace: Duration,
}

impl Default for ProcessSandbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Builtins and reserved words the shell resolves itself; they are never looked up on PATH.
const SHELL_WORDS: &[&str] = &[
    ".", ":", "[", "case", "cd", "command", "echo", "eval", "exec", "exit", "export", "false",
    "for", "if", "printf", "read", "set", "source", "test", "trap", "true", "ulimit", "umask",
    "unset", "until", "wait", "while",
];

enum Ending {
    Exited {
        captured: io::Result<()>,
        status: io::Result<std::process::ExitStatus>,
    },
    TimedOut,
    Cancelled,
}

impl ProcessSandbox {
    const DEFAULT_SHELL: &str = "/bin/sh";
    const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(500);

    pub fn new() -> Self {
        Self {
            shell: Self::DEFAULT_SHELL.into(),
            kill_grace: Self::DEFAULT_KILL_GRACE,
        }
    }

    pub fn shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    /// How long to wait for a killed process to be reaped and its pipes drained.
    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn get_shell(&self) -> &Path {
        &self.shell
    }

    /// Reports host-side misconfiguration before anything is spawned, so it is
    /// never mistaken for a bad exit code of the student program.
    fn preflight(&self, req: &RunRequest) -> Result<(), SandboxError> {
        if !req.workdir.is_dir() {
            return Err(SandboxError::WorkdirMissing(req.workdir.clone()));
        }
        let Some(program) = req.command.split_whitespace().next() else {
            return Err(SandboxError::EmptyCommand)
        };

        // Quotes, expansions, assignments and subshells are left to the shell.
        if !regex_is_match!(r"^[A-Za-z0-9_./+-]+$", program) || SHELL_WORDS.contains(&program)
        {
            return Ok(());
        }

        if program.contains('/') {
            let path = req.workdir.join(program);
            if !path.exists() {
                return Err(SandboxError::CommandNotFound(program.to_owned()));
            }
            if !fsutil::is_executable_file(&path) {
                return Err(SandboxError::NotExecutable(program.to_owned()));
            }
            return Ok(());
        }

        match fsutil::find_in_path(program) {
            Some(_) => Ok(()),
            None => Err(SandboxError::CommandNotFound(program.to_owned())),
        }
    }

    fn spawn(&self, req: &RunRequest) -> Result<Child, SandboxError> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&req.command)
            .current_dir(&req.workdir)
            .stdin(if req.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let cpu_secs = req.limits.cpu_time_secs();
        // SAFETY: only async-signal-safe syscalls run between fork and exec.
        unsafe {
            cmd.pre_exec(move || {
                setpgid(Pid::from_raw(0), Pid::from_raw(0))?;
                if let Some(secs) = cpu_secs {
                    setrlimit(Resource::RLIMIT_CPU, secs, secs)?;
                }
                Ok(())
            });
        }

        cmd.spawn().map_err(|source| SandboxError::Spawn {
            shell: self.shell.clone(),
            command: req.command.clone(),
            source,
        })
    }

    async fn terminate(&self, child: &mut Child, group: &mut ProcessGroup) {
        group.kill();
        if let Err(e) = child.start_kill() {
            log::debug!("start_kill: {}", e);
        }
        match tokio::time::timeout(self.kill_grace, child.wait()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => log::warn!("Failed to reap killed process: {:#}", e),
            Err(_) => log::warn!(
                "Killed process was not reaped within {}ms",
                self.kill_grace.as_millis()
            ),
        }
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    async fn run(
        &self,
        req: &RunRequest,
        cancel: &CancelToken,
    ) -> Result<ExecutionResult, SandboxError> {
        self.preflight(req)?;
        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }

        log::debug!("Running `{}` in {}", req.command, req.workdir.display());
        let start = Instant::now();
        let deadline = start + req.limits.wall_time;

        let mut child = self.spawn(req)?;
        let mut group = ProcessGroup::of(&child);
        let feeder = feed_stdin(&mut child, req.stdin.clone());

        let missing_pipe = |name| {
            SandboxError::Capture(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("{} of subprocess is not piped", name),
            ))
        };
        let mut stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let mut stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;
        let mut out = BoundedCapture::new(req.limits.stdout_max_bytes);
        let mut err = BoundedCapture::new(req.limits.stderr_max_bytes);

        let (ending, duration) = {
            let drain = async {
                let (o, e) =
                    tokio::join!(out.fill_from(&mut stdout), err.fill_from(&mut stderr));
                o.and(e)
            };
            tokio::pin!(drain);

            let mut drained = None;
            let waited = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break Err(Ending::Cancelled),
                    _ = tokio::time::sleep_until(deadline) => break Err(Ending::TimedOut),
                    captured = &mut drain, if drained.is_none() => drained = Some(captured),
                    status = child.wait() => break Ok(status),
                }
            };
            let duration = start.elapsed();

            let ending = match waited {
                Err(ending) => ending,
                Ok(status) => {
                    let captured = match drained {
                        Some(captured) => captured,
                        // Background processes left behind may still hold the pipes.
                        None => match tokio::time::timeout(self.kill_grace, &mut drain).await {
                            Ok(captured) => captured,
                            Err(_) => {
                                log::debug!(
                                    "Pipes of `{}` still open after it exited, killing its group",
                                    req.command
                                );
                                group.kill();
                                tokio::time::timeout(self.kill_grace, &mut drain)
                                    .await
                                    .unwrap_or(Ok(()))
                            }
                        },
                    };
                    Ending::Exited { captured, status }
                }
            };
            (ending, duration)
        };

        if let Some(feeder) = feeder {
            feeder.abort();
        }

        let (exit, timed_out) = match ending {
            Ending::Exited { captured, status } => {
                // Leftover background processes of the program die with it.
                group.kill();
                captured.map_err(SandboxError::Capture)?;
                let status = status.map_err(SandboxError::Wait)?;
                if req.limits.exceeds_wall_time(duration) {
                    log::warn!(
                        "`{}` exited only after its {}ms limit",
                        req.command,
                        req.limits.wall_time.as_millis()
                    );
                    (ExitStatus::Killed, true)
                } else {
                    (ExitStatus::from_std(status), false)
                }
            }
            Ending::TimedOut => {
                log::warn!(
                    "`{}` exceeded {}ms, killing it",
                    req.command,
                    req.limits.wall_time.as_millis()
                );
                self.terminate(&mut child, &mut group).await;
                // Keep whatever was still sitting in the pipes.
                let _ = tokio::time::timeout(self.kill_grace, async {
                    tokio::join!(out.fill_from(&mut stdout), err.fill_from(&mut stderr))
                })
                .await;
                (ExitStatus::Killed, true)
            }
            Ending::Cancelled => {
                log::info!("Cancelled `{}`, killing it", req.command);
                self.terminate(&mut child, &mut group).await;
                return Err(SandboxError::Cancelled);
            }
        };

        let (stdout, stdout_truncated) = out.into_text();
        let (stderr, stderr_truncated) = err.into_text();
        if stdout_truncated || stderr_truncated {
            log::warn!(
                "Output of `{}` exceeded the capture limit and was truncated",
                req.command
            );
        }

        Ok(ExecutionResult {
            exit,
            stdout,
            stderr,
            duration,
            stdout_truncated,
            stderr_truncated,
            timed_out,
        })
    }
}

fn feed_stdin(child: &mut Child, input: Option<String>) -> Option<JoinHandle<()>> {
    let mut pipe = child.stdin.take()?;
    let input = input?;
    Some(tokio::spawn(async move {
        // The program may exit without reading all of its input.
        if let Err(e) = pipe.write_all(input.as_bytes()).await {
            log::debug!("Failed to write stdin of subprocess: {}", e);
        }
        drop(pipe); // closes stdin so the program sees EOF
    }))
}

/// The process group led by the spawned shell.
/// Killed exactly once: explicitly, or on drop for every other exit path.
struct ProcessGroup(Option<Pid>);

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self(
            child
                .id()
                .and_then(|id| i32::try_from(id).ok())
                .map(Pid::from_raw),
        )
    }

    fn kill(&mut self) {
        let Some(pgid) = self.0.take() else {
            return
        };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => log::warn!("Failed to kill process group {}: {}", pgid, e),
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::*;

    fn limits(wall_ms: u64) -> ResourceLimits {
        ResourceLimits::default().wall_time(Duration::from_millis(wall_ms))
    }

    async fn run_in(
        dir: &Path,
        cmd: &str,
        limits: ResourceLimits,
    ) -> Result<ExecutionResult, SandboxError> {
        let req = RunRequest::new(dir, cmd).limits(limits);
        ProcessSandbox::new().run(&req, &CancelToken::new()).await
    }

    #[tokio::test]
    async fn should_capture_both_streams_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let res = run_in(
            dir.path(),
            "printf 'hello\\n'; printf oops >&2; exit 3",
            limits(5000),
        )
        .await
        .unwrap();
        assert_eq!(res.exit, ExitStatus::Exited(3));
        assert_eq!(res.stdout, "hello\n");
        assert_eq!(res.stderr, "oops");
        assert!(!res.timed_out);
        assert!(!res.is_truncated());
    }

    #[tokio::test]
    async fn should_feed_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let req = RunRequest::new(dir.path(), "read line; echo \"got:$line\"")
            .stdin(Some("abc\n".to_owned()))
            .limits(limits(5000));
        let res = ProcessSandbox::new()
            .run(&req, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(res.stdout, "got:abc\n");
        assert!(res.succeeded());
    }

    #[tokio::test]
    async fn should_run_in_workdir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let res = run_in(dir.path(), "cat marker.txt", limits(5000))
            .await
            .unwrap();
        assert_eq!(res.stdout, "here");
    }

    #[tokio::test]
    async fn should_not_time_out_when_finishing_before_limit() {
        let dir = tempfile::tempdir().unwrap();
        let res = run_in(dir.path(), "sleep 0.1", limits(3000))
            .await
            .unwrap();
        assert!(!res.timed_out);
        assert_eq!(res.exit, ExitStatus::Exited(0));
    }

    #[tokio::test]
    async fn should_be_killed_when_sleeping_past_limit() {
        let dir = tempfile::tempdir().unwrap();
        let res = run_in(dir.path(), "echo started; sleep 5", limits(300))
            .await
            .unwrap();
        assert!(res.timed_out);
        assert_eq!(res.exit, ExitStatus::Killed);
        assert_eq!(res.exit.code(), None);
        assert!(res.duration >= Duration::from_millis(300));
        assert!(res.duration < Duration::from_secs(5));
        assert_eq!(res.stdout, "started\n");
    }

    #[tokio::test]
    async fn should_kill_background_children_holding_the_pipes() {
        let dir = tempfile::tempdir().unwrap();
        let started = std::time::Instant::now();
        let res = run_in(dir.path(), "(sleep 30 &); echo done; exit 0", limits(5000))
            .await
            .unwrap();
        assert!(!res.timed_out);
        assert_eq!(res.exit, ExitStatus::Exited(0));
        assert_eq!(res.stdout, "done\n");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn sleeping_exactly_the_limit_is_timed_out() {
        let dir = tempfile::tempdir().unwrap();
        let res = run_in(dir.path(), "sleep 1", limits(1000)).await.unwrap();
        assert!(res.timed_out);
        assert_eq!(res.exit, ExitStatus::Killed);
    }

    #[tokio::test]
    async fn sleeping_just_past_the_limit_is_timed_out() {
        let dir = tempfile::tempdir().unwrap();
        let res = run_in(dir.path(), "sleep 1.1", limits(1000)).await.unwrap();
        assert!(res.timed_out);
        assert!(res.duration >= Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn sleeping_well_under_the_limit_is_not_timed_out() {
        let dir = tempfile::tempdir().unwrap();
        let res = run_in(dir.path(), "sleep 1", limits(2500)).await.unwrap();
        assert!(!res.timed_out);
        assert_eq!(res.exit, ExitStatus::Exited(0));
    }

    #[tokio::test]
    async fn output_of_exactly_cap_bytes_is_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let res = run_in(
            dir.path(),
            "head -c 1024 /dev/zero | tr '\\0' x",
            limits(5000).capture_max_bytes(1024, 1024),
        )
        .await
        .unwrap();
        assert_eq!(res.stdout.len(), 1024);
        assert!(!res.stdout_truncated);
    }

    #[tokio::test]
    async fn output_one_byte_over_cap_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let res = run_in(
            dir.path(),
            "head -c 1025 /dev/zero | tr '\\0' x",
            limits(5000).capture_max_bytes(1024, 1024),
        )
        .await
        .unwrap();
        assert_eq!(res.stdout.len(), 1024);
        assert!(res.stdout_truncated);
        assert!(!res.stderr_truncated);
        assert!(res.is_truncated());
    }

    #[tokio::test]
    async fn truncation_does_not_kill_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let res = run_in(
            dir.path(),
            "head -c 100000 /dev/zero | tr '\\0' x; echo done >&2; exit 7",
            limits(5000).capture_max_bytes(10, 1024),
        )
        .await
        .unwrap();
        assert_eq!(res.exit, ExitStatus::Exited(7));
        assert_eq!(res.stdout, "x".repeat(10));
        assert_eq!(res.stderr, "done\n");
        assert!(res.stdout_truncated);
        assert!(!res.timed_out);
    }

    #[tokio::test]
    async fn missing_command_is_a_host_fault() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_in(dir.path(), "surely-no-such-program-4f1c --flag", limits(5000))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::CommandNotFound(ref p) if p == "surely-no-such-program-4f1c"));

        let err = run_in(dir.path(), "./missing.sh", limits(5000))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::CommandNotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_executable_script_is_a_host_fault() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("run.sh");
        fs::write(&script, "#!/bin/sh\necho hi\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();

        let err = run_in(dir.path(), "./run.sh", limits(5000))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::NotExecutable(_)));

        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        let res = run_in(dir.path(), "./run.sh", limits(5000))
            .await
            .unwrap();
        assert_eq!(res.stdout, "hi\n");
    }

    #[tokio::test]
    async fn missing_workdir_is_a_host_fault() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_in(&dir.path().join("nope"), "true", limits(5000))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::WorkdirMissing(_)));
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_in(dir.path(), "   ", limits(5000)).await.unwrap_err();
        assert!(matches!(err, SandboxError::EmptyCommand));
    }

    #[tokio::test]
    async fn cancellation_kills_the_process_promptly() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                cancel.cancel();
            });
        }
        let started = std::time::Instant::now();
        let req = RunRequest::new(dir.path(), "sleep 30").limits(limits(30_000));
        let err = ProcessSandbox::new().run(&req, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cpu_limit_terminates_busy_loop() {
        let dir = tempfile::tempdir().unwrap();
        let res = run_in(
            dir.path(),
            "while :; do :; done",
            limits(20_000).cpu_time(Some(Duration::from_secs(1))),
        )
        .await
        .unwrap();
        assert!(!res.timed_out);
        assert!(matches!(res.exit, ExitStatus::Signaled(_)));
    }
}
