use std::time::Duration;

/// Bounds applied to a single sandboxed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub wall_time: Duration,
    pub cpu_time: Option<Duration>,
    pub stdout_max_bytes: usize,
    pub stderr_max_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            wall_time: Self::DEFAULT_WALL_TIME,
            cpu_time: None,
            stdout_max_bytes: Self::DEFAULT_CAPTURE_MAX_BYTES,
            stderr_max_bytes: Self::DEFAULT_CAPTURE_MAX_BYTES,
        }
    }
}

impl ResourceLimits {
    pub const DEFAULT_WALL_TIME: Duration = Duration::from_secs(10);
    pub const DEFAULT_CAPTURE_MAX_BYTES: usize = 64 * 1024;

    pub fn wall_time(mut self, limit: Duration) -> Self {
        self.wall_time = limit;
        self
    }

    pub fn cpu_time(mut self, limit: Option<Duration>) -> Self {
        self.cpu_time = limit;
        self
    }

    pub fn capture_max_bytes(mut self, stdout: usize, stderr: usize) -> Self {
        self.stdout_max_bytes = stdout;
        self.stderr_max_bytes = stderr;
        self
    }

    /// The wall-clock limit is exclusive: a run has to finish strictly before it.
    ///
    /// Elapsed time is measured from just before the spawn, so process and
    /// shell startup count against the limit. A `sleep 1` under a 1000ms
    /// limit is always timed out, and usually still is at 1001ms.
    pub fn exceeds_wall_time(&self, elapsed: Duration) -> bool {
        elapsed >= self.wall_time
    }

    /// RLIMIT_CPU works in whole seconds; sub-second limits round up to 1s.
    pub(crate) fn cpu_time_secs(&self) -> Option<u64> {
        self.cpu_time.map(|d| {
            let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
            secs.max(1)
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wall_time_boundary_is_exclusive() {
        let limits = ResourceLimits::default().wall_time(Duration::from_millis(500));
        assert!(!limits.exceeds_wall_time(Duration::from_millis(499)));
        assert!(limits.exceeds_wall_time(Duration::from_millis(500)));
        assert!(limits.exceeds_wall_time(Duration::from_millis(501)));
    }

    #[test]
    fn cpu_time_rounds_up_to_whole_seconds() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.cpu_time_secs(), None);
        assert_eq!(
            limits.cpu_time(Some(Duration::from_millis(200))).cpu_time_secs(),
            Some(1)
        );
        assert_eq!(
            limits.cpu_time(Some(Duration::from_millis(2500))).cpu_time_secs(),
            Some(3)
        );
        assert_eq!(
            limits.cpu_time(Some(Duration::from_secs(4))).cpu_time_secs(),
            Some(4)
        );
    }
}
