use std::{sync::LazyLock, time::Duration};

use regex::Regex;

use crate::core::{
    adapters::bounded::run_bounded,
    domain::{CapturedOutput, LinterDiagnostic, NormalizedTestResult, Rating},
};

static RATING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Your code has been rated at (-?\d+\.?\d*)/(\d+\.?\d*)").unwrap());
static DIAGNOSTIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(.*?\.py):(\d+):(.*?)\(([^,]*?), ([^,]*?),([^,]*?)\) (.*?)$").unwrap()
});

/// Pylint run with `--msg-template='{path}:{line}:{category}({msg_id}, {symbol},{obj}) {msg}'`.
///
/// The rating out of ten is turned into a count: `count` is the scale,
/// `failed` the points missing from it. The exact fraction travels in
/// `rating` for scoring.
pub fn parse_output(output: &CapturedOutput, budget: Duration) -> NormalizedTestResult {
    let stdout = output.stdout.clone();
    let rating = run_bounded("py_lint.rating", budget, move || parse_rating(&stdout)).flatten();
    let (count, passed, failed) = match rating {
        Some(Rating { achieved, maximum }) => {
            let passed = achieved.max(0.0);
            (maximum.trunc() as u32, passed.trunc() as u32, (maximum - passed).max(0.0).trunc() as u32)
        }
        None => (0, 0, 0),
    };

    let stdout = output.stdout.clone();
    let diagnostics = run_bounded("py_lint.diagnostics", budget, move || parse_diagnostics(&stdout))
        .unwrap_or_default();

    NormalizedTestResult {
        count,
        passed,
        failed,
        error_messages: error_messages(&diagnostics),
        detailed_diagnostics: Some(diagnostics),
        rating,
    }
}

/// One `name: result` line per diagnostic.
pub fn error_messages(diagnostics: &[LinterDiagnostic]) -> Vec<String> {
    diagnostics
        .iter()
        .map(|d| format!("{}: {}", d.name, d.result))
        .collect()
}

fn parse_rating(stdout: &str) -> Option<Rating> {
    let caps = RATING.captures(stdout)?;
    let achieved = caps.get(1)?.as_str().parse().ok()?;
    let maximum = caps.get(2)?.as_str().parse().ok()?;
    Some(Rating { achieved, maximum })
}

fn parse_diagnostics(stdout: &str) -> Vec<LinterDiagnostic> {
    DIAGNOSTIC
        .captures_iter(stdout)
        .filter_map(|caps| {
            let field = |idx: usize| caps.get(idx).map_or("", |m| m.as_str().trim());
            let scope = field(6);
            Some(LinterDiagnostic {
                file_name: field(1).to_string(),
                line: field(2).parse().ok()?,
                severity: field(3).to_string(),
                code: field(4).to_string(),
                name: field(5).to_string(),
                scope: (!scope.is_empty()).then(|| scope.to_string()),
                result: field(7).to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::REGEX_BUDGET;

    #[test]
    fn test_rating_without_diagnostics() {
        let output = CapturedOutput::new(
            "\n------------------------------------\nYour code has been rated at 7.5/10\n",
            "",
        );

        let result = parse_output(&output, REGEX_BUDGET);

        assert_eq!(result.count, 10);
        assert_eq!(result.failed, 2);
        assert_eq!(result.passed, 7);
        assert!(result.error_messages.is_empty());
        assert_eq!(result.rating.map(|r| r.fraction()), Some(0.75));
    }

    #[test]
    fn test_negative_rating_counts_as_zero() {
        let output = CapturedOutput::new("Your code has been rated at -2.50/10 (previous run: 1/10)", "");

        let result = parse_output(&output, REGEX_BUDGET);

        assert_eq!(result.count, 10);
        assert_eq!(result.failed, 10);
        assert_eq!(result.passed, 0);
    }

    #[test]
    fn test_itemized_diagnostics() {
        let stdout = "************* Module exercise\n\
            exercise.py:1:convention(C0114, missing-module-docstring,) Missing module docstring\n\
            exercise.py:4:warning(W0612, unused-variable, reverse) Unused variable 'tmp'\n\
            not a diagnostic line\n\
            \nYour code has been rated at 8.00/10\n";
        let output = CapturedOutput::new(stdout, "");

        let result = parse_output(&output, REGEX_BUDGET);
        let diagnostics = result.detailed_diagnostics.unwrap();

        assert_eq!(diagnostics.len(), 2);
        assert_eq!(
            diagnostics[1],
            LinterDiagnostic {
                file_name: "exercise.py".to_string(),
                line: 4,
                severity: "warning".to_string(),
                code: "W0612".to_string(),
                name: "unused-variable".to_string(),
                scope: Some("reverse".to_string()),
                result: "Unused variable 'tmp'".to_string(),
            }
        );
        assert_eq!(diagnostics[0].scope, None);
        assert_eq!(
            result.error_messages,
            vec![
                "missing-module-docstring: Missing module docstring".to_string(),
                "unused-variable: Unused variable 'tmp'".to_string(),
            ]
        );
    }

    #[test]
    fn test_missing_rating_is_empty() {
        let result = parse_output(&CapturedOutput::new("No config file found", ""), REGEX_BUDGET);

        assert_eq!(result.count, 0);
        assert_eq!(result.failed, 0);
        assert_eq!(result.rating, None);
    }
}
