use lazy_regex::{lazy_regex, Lazy, Regex};

static RE_LINE_BREAK: Lazy<Regex> = lazy_regex!(r"\r\n?");

/// Canonical form used by exact-output comparison:
/// - CRLF and lone CR become LF
/// - trailing spaces and tabs of every line are removed
/// - trailing empty lines are removed
///
/// Leading whitespace and blank lines in the middle are kept.
pub fn normalize_output(text: &str) -> String {
    let unified = RE_LINE_BREAK.replace_all(text, "\n");
    let mut lines: Vec<&str> = unified
        .split('\n')
        .map(|line| line.trim_end_matches([' ', '\t']))
        .collect();
    while lines.last().map_or(false, |line| line.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// Describes where two normalized texts first differ, for rationales.
pub fn first_difference(expected: &str, actual: &str) -> Option<String> {
    let mut expected_lines = expected.lines();
    let mut actual_lines = actual.lines();
    let mut lineno = 0;
    loop {
        lineno += 1;
        match (expected_lines.next(), actual_lines.next()) {
            (None, None) => return None,
            (Some(e), Some(a)) if e == a => continue,
            (Some(e), Some(a)) => {
                return Some(format!(
                    "line {}: expected {:?}, got {:?}",
                    lineno,
                    clip(e),
                    clip(a)
                ))
            }
            (Some(e), None) => {
                return Some(format!(
                    "line {}: expected {:?}, got end of output",
                    lineno,
                    clip(e)
                ))
            }
            (None, Some(a)) => {
                return Some(format!(
                    "line {}: unexpected extra output {:?}",
                    lineno,
                    clip(a)
                ))
            }
        }
    }
}

fn clip(line: &str) -> String {
    const MAX_CHARS: usize = 80;
    if line.chars().count() <= MAX_CHARS {
        return line.to_owned();
    }
    let mut s: String = line.chars().take(MAX_CHARS).collect();
    s.push('…');
    s
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn trailing_newline_is_ignored() {
        assert_eq!(normalize_output("hello\n"), normalize_output("hello"));
        assert_eq!(normalize_output("hello\n\n\n"), "hello");
    }

    #[test]
    fn line_endings_are_unified() {
        assert_eq!(normalize_output("a\r\nb\rc\n"), "a\nb\nc");
    }

    #[test]
    fn trailing_whitespace_is_stripped_per_line() {
        assert_eq!(normalize_output("a  \t\nb \n"), "a\nb");
    }

    #[test]
    fn leading_and_interior_whitespace_is_kept() {
        assert_eq!(normalize_output("  a\n\nb"), "  a\n\nb");
        assert_ne!(normalize_output("a b"), normalize_output("a  b"));
    }

    #[test]
    fn empty_and_blank_outputs_are_equal() {
        assert_eq!(normalize_output(""), "");
        assert_eq!(normalize_output(" \n\t\n"), "");
    }

    #[test]
    fn first_difference_reports_line() {
        assert_eq!(first_difference("a\nb", "a\nb"), None);
        assert_eq!(
            first_difference("OK\nbar", "OK\nbaz").unwrap(),
            r#"line 2: expected "bar", got "baz""#
        );
        assert_eq!(
            first_difference("OK\nbar", "OK").unwrap(),
            r#"line 2: expected "bar", got end of output"#
        );
        assert_eq!(
            first_difference("OK", "OK\nBYE").unwrap(),
            r#"line 2: unexpected extra output "BYE""#
        );
    }
}
