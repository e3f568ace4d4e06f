use std::{sync::LazyLock, time::Duration};

use regex::Regex;

use crate::core::{
    adapters::bounded::{last_number, run_bounded},
    domain::{CapturedOutput, NormalizedTestResult},
};

static COUNT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Tests run: (\d+)").unwrap());
static FAILURES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Failures: (\d+)").unwrap());
static SUCCESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"OK \((\d+) tests?\)\s*(?:\x1B\]0;|exit)?\s*\z").unwrap());
static ASSERTION_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)java\.lang\.AssertionError:?\s(.*?)\tat org.junit|org\.junit\.ComparisonFailure:\s(.*?)\tat org.junit",
    )
    .unwrap()
});

/// JUnit 4 text runner. Reads stdout only.
pub fn parse_output(output: &CapturedOutput, budget: Duration) -> NormalizedTestResult {
    let stdout = output.stdout.clone();
    run_bounded("junit", budget, move || parse_stdout(&stdout)).unwrap_or_default()
}

fn parse_stdout(stdout: &str) -> NormalizedTestResult {
    if let Some(count) = last_number(&SUCCESS, stdout) {
        return NormalizedTestResult::all_passed(count);
    }

    let count = last_number(&COUNT, stdout).unwrap_or(0);
    let failed = last_number(&FAILURES, stdout).unwrap_or(0);
    let error_messages = ASSERTION_ERROR
        .captures_iter(stdout)
        .flat_map(|caps| {
            caps.iter()
                .skip(1)
                .flatten()
                .map(|m| m.as_str().trim().to_string())
                .collect::<Vec<_>>()
        })
        .filter(|message| !message.is_empty())
        .collect();

    NormalizedTestResult::from_counts(count, failed, error_messages)
}
