use std::{collections::BTreeMap, fmt};

use crate::sandbox::ExecutionResult;

use super::{kind::Stream, normalize::normalize_output};

/// What a custom evaluator concluded. `credit` is the earned fraction of the weight.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomVerdict {
    pub credit: f64,
    pub rationale: String,
}

impl CustomVerdict {
    pub fn pass(rationale: impl Into<String>) -> Self {
        Self {
            credit: 1.0,
            rationale: rationale.into(),
        }
    }

    pub fn fail(rationale: impl Into<String>) -> Self {
        Self {
            credit: 0.0,
            rationale: rationale.into(),
        }
    }

    pub fn partial(credit: f64, rationale: impl Into<String>) -> Self {
        Self {
            credit,
            rationale: rationale.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ParamError(pub String);

/// A pluggable check. Must be a pure function of its inputs.
pub type CustomEvaluator = fn(&ExecutionResult, &toml::Table) -> Result<CustomVerdict, ParamError>;

/// Named custom evaluators that `kind = "custom"` checks refer to.
#[derive(Clone, Default)]
pub struct EvaluatorRegistry {
    evaluators: BTreeMap<String, CustomEvaluator>,
}

impl fmt::Debug for EvaluatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.evaluators.keys()).finish()
    }
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `expected_lines` and `quiet_stderr`.
    pub fn with_builtins() -> Self {
        let mut r = Self::new();
        r.register("expected_lines", expected_lines);
        r.register("quiet_stderr", quiet_stderr);
        r
    }

    /// Returns the evaluator previously registered under `name`, if any.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        evaluator: CustomEvaluator,
    ) -> Option<CustomEvaluator> {
        self.evaluators.insert(name.into(), evaluator)
    }

    pub fn get(&self, name: &str) -> Option<CustomEvaluator> {
        self.evaluators.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.evaluators.keys().map(String::as_str)
    }
}

fn param_stream(params: &toml::Table) -> Result<Stream, ParamError> {
    match params.get("stream") {
        None => Ok(Stream::default()),
        Some(v) => v
            .clone()
            .try_into()
            .map_err(|e| ParamError(format!("invalid 'stream': {}", e))),
    }
}

/// Partial credit for the fraction of `lines` found in the output, in order.
/// Params: `lines = [..]`, optional `stream`.
fn expected_lines(result: &ExecutionResult, params: &toml::Table) -> Result<CustomVerdict, ParamError> {
    let lines: Vec<String> = params
        .get("lines")
        .ok_or_else(|| ParamError("missing 'lines'".to_owned()))?
        .clone()
        .try_into()
        .map_err(|e| ParamError(format!("invalid 'lines': {}", e)))?;
    if lines.is_empty() {
        return Err(ParamError("'lines' must not be empty".to_owned()));
    }

    let output = normalize_output(&param_stream(params)?.select(result));
    let mut actual = output.lines();
    let mut matched = 0;
    let mut first_missing = None;
    for want in &lines {
        let want = normalize_output(want);
        if actual.any(|got| got == want) {
            matched += 1;
        } else {
            first_missing.get_or_insert(want);
            break;
        }
    }

    let rationale = match first_missing {
        None => format!("all {} expected lines found in order", lines.len()),
        Some(missing) => format!(
            "{}/{} expected lines found in order; missing {:?}",
            matched,
            lines.len(),
            missing
        ),
    };
    Ok(CustomVerdict::partial(
        matched as f64 / lines.len() as f64,
        rationale,
    ))
}

/// Passes when nothing but whitespace was written to stderr.
fn quiet_stderr(result: &ExecutionResult, _params: &toml::Table) -> Result<CustomVerdict, ParamError> {
    let stderr = normalize_output(&result.stderr);
    if stderr.is_empty() && !result.stderr_truncated {
        return Ok(CustomVerdict::pass("nothing was written to stderr"));
    }
    let first = stderr.lines().next().unwrap_or_default();
    Ok(CustomVerdict::fail(format!(
        "unexpected stderr output: {:?}",
        first
    )))
}
