//! `#{name}` interpolation used by check command templates.
//! `##` is an escaped `#`.

pub type Result = std::result::Result<String, InterpError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterpError {
    #[error("Undefined variable '{0}' at column {1}")]
    UndefinedVar(String, usize),

    #[error("Unclosed brace (opened at column {0})")]
    UnclosedBrace(usize),
}

pub fn interp<'v, F>(template: &str, lookup: F) -> Result
where
    F: Fn(&str) -> Option<&'v str>,
{
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum State {
        Text,
        Hash,
        Var { opened_at: usize },
    }
    use State::*;

    let mut state = Text;
    let mut res = String::with_capacity(template.len() * 2);
    let mut name = String::new();

    for (col, c) in template.chars().enumerate().map(|(i, c)| (i + 1, c)) {
        state = match (state, c) {
            (Text, '#') => Hash,
            (Hash, '#') => {
                res.push('#');
                Text
            }
            (Hash, '{') => {
                name.clear();
                Var { opened_at: col - 1 }
            }
            (Hash, _) => {
                res.push('#');
                res.push(c);
                Text
            }
            (Var { opened_at }, '}') => {
                let value = lookup(&name).ok_or(InterpError::UndefinedVar(name.clone(), opened_at))?;
                res += value;
                Text
            }
            (Var { .. }, _) => {
                name.push(c);
                state
            }
            (Text, _) => {
                res.push(c);
                Text
            }
        };
    }

    match state {
        Var { opened_at } => Err(InterpError::UnclosedBrace(opened_at)),
        Hash => {
            res.push('#');
            Ok(res)
        }
        Text => Ok(res),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn vars(name: &str) -> Option<&'static str> {
        match name {
            "run" => Some("python3 project.py"),
            "workdir" => Some("/tmp/sub-1"),
            _ => None,
        }
    }

    #[test]
    fn interp_ok() {
        assert_eq!(interp("make", vars).unwrap(), "make");
        assert_eq!(interp("#{run}", vars).unwrap(), "python3 project.py");
        assert_eq!(
            interp("cd #{workdir} && #{run} --quiet", vars).unwrap(),
            "cd /tmp/sub-1 && python3 project.py --quiet"
        );
        assert_eq!(interp("echo {run}", vars).unwrap(), "echo {run}");
        assert_eq!(interp("echo # {run}", vars).unwrap(), "echo # {run}");
        assert_eq!(interp("echo ##{run}", vars).unwrap(), "echo #{run}");
        assert_eq!(interp("#", vars).unwrap(), "#");
        assert_eq!(interp("##", vars).unwrap(), "#");
        assert_eq!(interp("###", vars).unwrap(), "##");
    }

    #[test]
    fn interp_ng() {
        assert_eq!(
            interp("#{run} #{input}", vars).unwrap_err(),
            InterpError::UndefinedVar("input".to_owned(), 8)
        );
        assert_eq!(
            interp("#{run} #{workdir", vars).unwrap_err(),
            InterpError::UnclosedBrace(8),
        );
    }
}
