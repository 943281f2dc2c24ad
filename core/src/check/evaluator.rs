use std::time::Duration;

use lazy_regex::Regex;

use crate::rubric::RubricCheck;
use crate::sandbox::{ExecutionResult, ExitStatus};

use super::{
    kind::{CheckKind, Polarity, Stream},
    normalize::{first_difference, normalize_output},
    outcome::{CheckOutcome, Verdict},
    registry::EvaluatorRegistry,
};

/// Judges one execution result against one check.
///
/// Evaluation never touches the process or the filesystem, so the same
/// inputs always produce the same [`CheckOutcome`].
#[derive(Debug, Clone, Copy)]
pub struct CheckEvaluator<'r> {
    registry: &'r EvaluatorRegistry,
}

impl<'r> CheckEvaluator<'r> {
    pub fn new(registry: &'r EvaluatorRegistry) -> Self {
        Self { registry }
    }

    pub fn evaluate(&self, check: &RubricCheck, result: &ExecutionResult) -> CheckOutcome {
        let (verdict, rationale) = self.judge(&check.kind, result);
        if verdict == Verdict::Unsupported {
            log::warn!("Check #{} '{}' is unsupported: {}", check.position, check.name, rationale);
        }
        CheckOutcome::judged(check, verdict, rationale)
    }

    fn judge(&self, kind: &CheckKind, result: &ExecutionResult) -> (Verdict, String) {
        use CheckKind::*;
        match kind {
            ExactOutput { expected, stream } => judge_exact(expected, *stream, result),
            ExitCode { expected } => judge_exit_code(*expected, result),
            Pattern {
                pattern,
                stream,
                polarity,
                literal,
            } => judge_pattern(pattern, *stream, *polarity, *literal, result),
            Timing { max_ms } => judge_timing(Duration::from_millis(*max_ms), result),
            Custom { evaluator, params } => {
                let Some(f) = self.registry.get(evaluator) else {
                    return (
                        Verdict::Unsupported,
                        format!("unsupported check: no evaluator named '{}'", evaluator),
                    );
                };
                match f(result, params) {
                    Ok(v) => (Verdict::from_credit(v.credit), v.rationale),
                    Err(e) => (
                        Verdict::Unsupported,
                        format!("unsupported check: evaluator '{}': {}", evaluator, e),
                    ),
                }
            }
            Unsupported { declared, reason } => (
                Verdict::Unsupported,
                format!("unsupported check '{}': {}", declared, reason),
            ),
        }
    }
}

fn timed_out(result: &ExecutionResult) -> (Verdict, String) {
    (
        Verdict::Failed,
        format!("timed out after {} ms", result.duration.as_millis()),
    )
}

fn judge_exact(expected: &str, stream: Stream, result: &ExecutionResult) -> (Verdict, String) {
    if result.timed_out {
        return timed_out(result);
    }
    if stream.is_truncated(result) {
        return (
            Verdict::Failed,
            format!("{} exceeded the capture limit and was truncated", stream),
        );
    }
    let expected = normalize_output(expected);
    let actual = normalize_output(&stream.select(result));
    match first_difference(&expected, &actual) {
        None => (Verdict::Passed, format!("{} matches expected output", stream)),
        Some(diff) => (Verdict::Failed, format!("{} differs: {}", stream, diff)),
    }
}

fn judge_exit_code(expected: i32, result: &ExecutionResult) -> (Verdict, String) {
    if result.timed_out {
        return timed_out(result);
    }
    match result.exit {
        ExitStatus::Exited(code) if code == expected => {
            (Verdict::Passed, format!("exited with code {}", code))
        }
        ExitStatus::Exited(code) => (
            Verdict::Failed,
            format!("expected exit code {}, got {}", expected, code),
        ),
        ExitStatus::Signaled(sig) => (Verdict::Failed, format!("terminated by signal {}", sig)),
        ExitStatus::Killed => (Verdict::Failed, "killed by the sandbox".to_owned()),
    }
}

fn judge_pattern(
    pattern: &str,
    stream: Stream,
    polarity: Polarity,
    literal: bool,
    result: &ExecutionResult,
) -> (Verdict, String) {
    let haystack = stream.select(result);
    let found = if literal {
        haystack.contains(pattern)
    } else {
        match Regex::new(pattern) {
            Ok(re) => re.is_match(&haystack),
            Err(e) => {
                return (
                    Verdict::Unsupported,
                    format!("unsupported check: invalid regex: {}", e),
                )
            }
        }
    };

    match (polarity, found) {
        (Polarity::MustContain, true) => (
            Verdict::Passed,
            format!("{} contains {:?}", stream, pattern),
        ),
        (Polarity::MustContain, false) => (
            Verdict::Failed,
            format!("{} does not contain {:?}", stream, pattern),
        ),
        (Polarity::MustNotContain, true) => (
            Verdict::Failed,
            format!("{} must not contain {:?}", stream, pattern),
        ),
        // Absence in a truncated capture proves nothing.
        (Polarity::MustNotContain, false) if stream.is_truncated(result) => (
            Verdict::Failed,
            format!(
                "{} was truncated; cannot confirm absence of {:?}",
                stream, pattern
            ),
        ),
        (Polarity::MustNotContain, false) => (
            Verdict::Passed,
            format!("{} does not contain {:?}", stream, pattern),
        ),
    }
}

fn judge_timing(max: Duration, result: &ExecutionResult) -> (Verdict, String) {
    if result.timed_out {
        return timed_out(result);
    }
    let took = result.duration.as_millis();
    if result.duration <= max {
        (
            Verdict::Passed,
            format!("took {} ms (limit {} ms)", took, max.as_millis()),
        )
    } else {
        (
            Verdict::Failed,
            format!("took {} ms, over the limit of {} ms", took, max.as_millis()),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rubric::RunSpec;

    fn check(kind: CheckKind) -> RubricCheck {
        RubricCheck {
            position: 0,
            name: "c".to_owned(),
            weight: 10.0,
            kind,
            blocking: false,
            reuse_previous: false,
            run: RunSpec::default(),
        }
    }

    fn result(exit: ExitStatus, stdout: &str, stderr: &str, ms: u64) -> ExecutionResult {
        ExecutionResult {
            exit,
            stdout: stdout.to_owned(),
            stderr: stderr.to_owned(),
            duration: Duration::from_millis(ms),
            stdout_truncated: false,
            stderr_truncated: false,
            timed_out: false,
        }
    }

    fn ok(stdout: &str) -> ExecutionResult {
        result(ExitStatus::Exited(0), stdout, "", 10)
    }

    fn timed_out_result() -> ExecutionResult {
        ExecutionResult {
            timed_out: true,
            ..result(ExitStatus::Killed, "partial", "", 1000)
        }
    }

    fn eval(kind: CheckKind, res: &ExecutionResult) -> CheckOutcome {
        let registry = EvaluatorRegistry::with_builtins();
        CheckEvaluator::new(&registry).evaluate(&check(kind), res)
    }

    fn parse(kind: &str, params: &str) -> CheckKind {
        CheckKind::from_parts(kind, toml::from_str(params).unwrap())
    }

    #[test]
    fn exact_output_normalizes_trailing_whitespace() {
        let kind = parse("exact_output", "expected = \"OK\\nbar\"");
        let o = eval(kind.clone(), &ok("OK\r\nbar  \n\n"));
        assert_eq!(o.verdict, Verdict::Passed);
        assert_eq!(o.earned, 10.0);

        let o = eval(kind, &ok("OK\nbaz\n"));
        assert_eq!(o.verdict, Verdict::Failed);
        assert_eq!(o.earned, 0.0);
        assert_eq!(o.possible, 10.0);
        assert!(o.rationale.contains("line 2"), "{}", o.rationale);
    }

    #[test]
    fn exact_output_fails_on_timeout_or_truncation() {
        let kind = parse("exact_output", r#"expected = "partial""#);
        assert_eq!(eval(kind.clone(), &timed_out_result()).verdict, Verdict::Failed);

        let truncated = ExecutionResult {
            stdout_truncated: true,
            ..ok("partial")
        };
        let o = eval(kind, &truncated);
        assert_eq!(o.verdict, Verdict::Failed);
        assert!(o.rationale.contains("truncated"));
    }

    #[test]
    fn exit_code() {
        let zero = parse("exit_code", "");
        assert!(eval(zero.clone(), &ok("")).verdict.is_pass());
        assert_eq!(
            eval(zero.clone(), &result(ExitStatus::Exited(1), "", "", 1)).verdict,
            Verdict::Failed
        );
        assert_eq!(
            eval(zero.clone(), &result(ExitStatus::Signaled(9), "", "", 1)).verdict,
            Verdict::Failed
        );

        let two = parse("exit_code", "expected = 2");
        assert!(eval(two, &result(ExitStatus::Exited(2), "", "", 1)).verdict.is_pass());
        assert_eq!(eval(zero, &timed_out_result()).verdict, Verdict::Failed);
    }

    #[test]
    fn pattern_polarity() {
        let res = result(ExitStatus::Exited(1), "", "Traceback (most recent call last)", 1);

        let must = parse("pattern", "pattern = \"Trace\\\\w+\"\nstream = \"stderr\"");
        assert!(eval(must, &res).verdict.is_pass());

        let must_not = parse(
            "pattern",
            "pattern = \"Traceback\"\nstream = \"both\"\npolarity = \"must_not_contain\"",
        );
        assert_eq!(eval(must_not.clone(), &res).verdict, Verdict::Failed);
        assert!(eval(must_not.clone(), &ok("fine")).verdict.is_pass());

        let truncated = ExecutionResult {
            stdout_truncated: true,
            ..ok("fine")
        };
        assert_eq!(eval(must_not, &truncated).verdict, Verdict::Failed);
    }

    #[test]
    fn literal_pattern_is_not_a_regex() {
        let kind = parse("pattern", "pattern = \"a.b(\"\nliteral = true");
        assert!(eval(kind.clone(), &ok("xa.b(y")).verdict.is_pass());
        assert_eq!(eval(kind, &ok("axb(")).verdict, Verdict::Failed);
    }

    #[test]
    fn timing_bound_is_inclusive() {
        let kind = parse("timing", "max_ms = 100");
        assert!(eval(kind.clone(), &result(ExitStatus::Exited(0), "", "", 100)).verdict.is_pass());
        assert_eq!(
            eval(kind.clone(), &result(ExitStatus::Exited(0), "", "", 101)).verdict,
            Verdict::Failed
        );
        let fast_timeout = ExecutionResult {
            duration: Duration::from_millis(50),
            ..timed_out_result()
        };
        assert_eq!(eval(kind, &fast_timeout).verdict, Verdict::Failed);
    }

    #[test]
    fn custom_evaluator_awards_partial_credit() {
        let kind = parse(
            "custom",
            "evaluator = \"expected_lines\"\nlines = [\"OK\", \"bar\", \"BYE\", \"x\"]",
        );
        let o = eval(kind, &ok("OK\nbar\nNOTFOUND\n"));
        assert_eq!(o.verdict, Verdict::Partial(0.5));
        assert_eq!(o.earned, 5.0);
    }

    #[test]
    fn unknown_things_fail_closed() {
        let o = eval(parse("memory", "max_mb = 1"), &ok(""));
        assert_eq!(o.verdict, Verdict::Unsupported);
        assert_eq!(o.earned, 0.0);
        assert!(o.rationale.starts_with("unsupported check"));

        let o = eval(parse("custom", r#"evaluator = "nope""#), &ok(""));
        assert_eq!(o.verdict, Verdict::Unsupported);

        let o = eval(parse("custom", r#"evaluator = "expected_lines""#), &ok(""));
        assert_eq!(o.verdict, Verdict::Unsupported);
        assert!(o.rationale.contains("missing 'lines'"));
    }

    #[test]
    fn evaluation_is_idempotent() {
        let res = result(ExitStatus::Exited(3), "a\nb\n", "warn", 42);
        let snapshot = res.clone();
        for kind in [
            parse("exact_output", r#"expected = "a\nb""#),
            parse("exit_code", "expected = 3"),
            parse("pattern", r#"pattern = "^b$""#),
            parse("timing", "max_ms = 10"),
            parse("custom", r#"evaluator = "quiet_stderr""#),
        ] {
            assert_eq!(eval(kind.clone(), &res), eval(kind, &res));
        }
        assert_eq!(res, snapshot);
    }
}
