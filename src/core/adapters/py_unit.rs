use std::{sync::LazyLock, time::Duration};

use regex::Regex;

use crate::core::{
    adapters::bounded::{last_number, run_bounded},
    domain::{CapturedOutput, NormalizedTestResult},
};

static COUNT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Ran (\d+) test").unwrap());
static FAILURES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"FAILED \(.*failures=(\d+).*\)").unwrap());
static ERRORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"FAILED \(.*errors=(\d+).*\)").unwrap());
static ASSERTION_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ms)^(ERROR|FAIL): (.*?) .*?^[^.\n]*?(Error|Exception):\s((\s|\S)*?)(>>>[^>]*?)*\s\s(-|=){70}")
        .unwrap()
});
/// Errors that stop the test module from being imported at all.
static BAD_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"File\s"(.*)"(?:.*)line\s(\d+)\s*(?:.*)\s*(?:\^*)\s*(SyntaxError|IndentationError|TabError):(.*)"#)
        .unwrap()
});

/// Test method whose failure message is shown without a name prefix.
const ANONYMOUS_TEST: &str = "test_assess";

/// `unittest` prints its report on stderr.
pub fn parse_output(output: &CapturedOutput, budget: Duration) -> NormalizedTestResult {
    let text = output.stderr.clone();
    let (count, failed) = run_bounded("py_unit.counts", budget, move || counts(&text)).unwrap_or((0, 0));

    let text = output.stderr.clone();
    let mut error_messages =
        run_bounded("py_unit.assertions", budget, move || assertion_messages(&text)).unwrap_or_default();
    let text = output.stderr.clone();
    error_messages.extend(run_bounded("py_unit.bad_errors", budget, move || bad_error_messages(&text)).unwrap_or_default());

    NormalizedTestResult::from_counts(count, failed, error_messages)
}

fn counts(stderr: &str) -> (u32, u32) {
    let mut count = last_number(&COUNT, stderr).unwrap_or(0);
    let failed = last_number(&FAILURES, stderr)
        .unwrap_or(0)
        .saturating_add(last_number(&ERRORS, stderr).unwrap_or(0));

    // A failing setUpClass reports `Ran 0 tests` next to `failures=1`.
    if count < failed {
        count = count.saturating_add(failed);
    }
    (count, failed)
}

fn assertion_messages(stderr: &str) -> Vec<String> {
    ASSERTION_ERROR
        .captures_iter(stderr)
        .filter_map(|caps| {
            let test_name = caps.get(2).map_or("", |m| m.as_str());
            let error = caps.get(4).map_or("", |m| m.as_str().trim());
            match (test_name, error) {
                (_, "") => None,
                (ANONYMOUS_TEST, error) => Some(error.to_string()),
                (test_name, error) => Some(format!("{}: {}", test_name, error)),
            }
        })
        .collect()
}

fn bad_error_messages(stderr: &str) -> Vec<String> {
    BAD_ERROR
        .captures_iter(stderr)
        .map(|caps| {
            let file_name = caps.get(1).map_or("", |m| m.as_str());
            let line = caps.get(2).map_or("", |m| m.as_str());
            let error_name = caps.get(3).map_or("", |m| m.as_str());
            let message = caps.get(4).map_or("", |m| m.as_str().trim());
            format!(
                "<span style=\"color:red\">**{}**</span>: {} in **file** {} **line {}**",
                error_name, message, file_name, line
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::REGEX_BUDGET;

    #[test]
    fn test_inflates_count_when_failures_exceed_total() {
        let output = CapturedOutput::new("", "\nRan 0 tests in 0.001s\n\nFAILED (failures=1)\n");

        let result = parse_output(&output, REGEX_BUDGET);

        assert_eq!(result.count, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.passed, 0);
    }

    #[test]
    fn test_huge_counts_saturate() {
        let output = CapturedOutput::new(
            "",
            "Ran 5 tests in 0.001s\n\nFAILED (failures=4294967295, errors=1)\n",
        );

        let result = parse_output(&output, REGEX_BUDGET);

        assert_eq!(result.failed, u32::MAX);
        assert_eq!(result.count, u32::MAX);
        assert_eq!(result.passed, 0);
    }

    #[test]
    fn test_counts_failures_and_errors() {
        let stderr = format!(
            "F.E\n{eq}\nFAIL: test_reverse (test_reverse.ReverseTest)\n{sep}\nTraceback (most recent call last):\n  \
             File \"test_reverse.py\", line 8, in test_reverse\n    self.assertEqual(reverse('abc'), 'cba')\n\
             AssertionError: 'abc' != 'cba'\n\n{eq}\nERROR: test_assess (test_reverse.ReverseTest)\n{sep}\n\
             Traceback (most recent call last):\nTypeError: unsupported operand\n\n{sep}\nRan 3 tests in 0.002s\n\n\
             FAILED (failures=1, errors=1)\n",
            eq = "=".repeat(70),
            sep = "-".repeat(70),
        );
        let output = CapturedOutput::new("", &stderr);

        let result = parse_output(&output, REGEX_BUDGET);

        assert_eq!(result.count, 3);
        assert_eq!(result.failed, 2);
        assert_eq!(result.passed, 1);
        assert_eq!(
            result.error_messages,
            vec![
                "test_reverse: 'abc' != 'cba'".to_string(),
                "unsupported operand".to_string(),
            ]
        );
    }

    #[test]
    fn test_reports_syntax_errors() {
        let stderr = "Traceback (most recent call last):\n  File \"exercise.py\", line 3\n    def broken(\n              ^\nSyntaxError: unexpected EOF while parsing\n";
        let output = CapturedOutput::new("", stderr);

        let result = parse_output(&output, REGEX_BUDGET);

        assert_eq!(result.count, 0);
        assert_eq!(result.error_messages.len(), 1);
        assert!(result.error_messages[0].contains("**SyntaxError**"));
        assert!(result.error_messages[0].contains("exercise.py **line 3**"));
        assert!(result.error_messages[0].contains("unexpected EOF while parsing"));
    }

    #[test]
    fn test_ignores_stdout() {
        let output = CapturedOutput::new("Ran 5 tests\nOK\n", "");

        assert_eq!(parse_output(&output, REGEX_BUDGET), NormalizedTestResult::default());
    }
}
