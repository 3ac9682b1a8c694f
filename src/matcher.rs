use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Lines ending in `__REGEXP(<body>)` are matched against `<body>` as a pattern
static PATTERN_WRAPPER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"__REGEXP\((.+)\)$").expect("wrapper pattern is valid"));

/// Decides whether a single line of program output is right
#[derive(Debug, Clone)]
pub enum OutputMatcher {
    Literal(String),
    Pattern(Regex),
}

impl OutputMatcher {
    /// Builds a matcher from one line of an expected-output file.
    ///
    /// Fails only when the line uses the pattern wrapper with a body that is
    /// not a valid regular expression.
    pub fn from_line(line: &str) -> Result<Self, regex::Error> {
        match PATTERN_WRAPPER.captures(line) {
            Some(caps) => Ok(Self::Pattern(Regex::new(&caps[1])?)),
            None => Ok(Self::Literal(line.to_string())),
        }
    }

    /// Literal matchers compare exactly; patterns search without implicit anchors
    pub fn test(&self, actual: &str) -> bool {
        match self {
            Self::Literal(line) => line == actual,
            Self::Pattern(regex) => regex.is_match(actual),
        }
    }
}

impl fmt::Display for OutputMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(line) => f.write_str(line),
            Self::Pattern(regex) => write!(f, "__REGEXP({})", regex.as_str()),
        }
    }
}

/// Splits output into trimmed, non-empty lines
pub fn clean(raw: &str) -> Vec<&str> {
    raw.split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Every matcher consumes exactly one line, in order, with nothing left over
pub fn matches_all(expected: &[OutputMatcher], actual: &[&str]) -> bool {
    expected.len() == actual.len()
        && expected
            .iter()
            .zip(actual)
            .all(|(matcher, line)| matcher.test(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapper_detection() {
        assert!(matches!(
            OutputMatcher::from_line("__REGEXP(^[0-9]+$)").unwrap(),
            OutputMatcher::Pattern(_)
        ));
        assert!(matches!(
            OutputMatcher::from_line("__REGEXP(abc) trailing").unwrap(),
            OutputMatcher::Literal(_)
        ));
        assert!(matches!(
            OutputMatcher::from_line("__REGEXP()").unwrap(),
            OutputMatcher::Literal(_)
        ));
        assert!(OutputMatcher::from_line("__REGEXP([unclosed)").is_err());
    }

    #[test]
    fn test_literal_is_exact() {
        let matcher = OutputMatcher::from_line("42").unwrap();
        assert!(matcher.test("42"));
        assert!(!matcher.test("420"));
        assert!(!matcher.test(" 42"));
    }

    #[test]
    fn test_pattern_searches() {
        let anchored = OutputMatcher::from_line("__REGEXP(^[0-9]+$)").unwrap();
        assert!(anchored.test("1234"));
        assert!(!anchored.test("12a4"));

        let unanchored = OutputMatcher::from_line("__REGEXP([0-9]+)").unwrap();
        assert!(unanchored.test("answer: 7"));
    }

    #[test]
    fn test_clean_drops_blank_lines_and_whitespace() {
        assert_eq!(clean("  1 2 \r\n\n\t3\n   \n"), vec!["1 2", "3"]);
        assert!(clean("").is_empty());
        assert!(clean("\n \n\t\n").is_empty());
    }

    #[test]
    fn test_clean_is_idempotent() {
        for raw in ["a\n\n b \n", "\r\n x\r\ny  \n\n\n", "", "single"] {
            let once = clean(raw);
            let rendered = once.join("\n");
            assert_eq!(clean(&rendered), once);
        }
    }

    #[test]
    fn test_matches_all_requires_exact_line_count() {
        let expected = vec![
            OutputMatcher::from_line("1").unwrap(),
            OutputMatcher::from_line("__REGEXP(^b+$)").unwrap(),
        ];
        assert!(matches_all(&expected, &["1", "bbb"]));
        assert!(!matches_all(&expected, &["1"]));
        assert!(!matches_all(&expected, &["1", "bbb", "extra"]));
        assert!(!matches_all(&expected, &["1", "abc"]));
    }

    #[test]
    fn test_display_round_trips_wrapper() {
        let matcher = OutputMatcher::from_line("__REGEXP(^x$)").unwrap();
        assert_eq!(matcher.to_string(), "__REGEXP(^x$)");
    }
}
