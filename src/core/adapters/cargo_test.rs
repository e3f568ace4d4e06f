use serde::Deserialize;

use crate::{
    constants::COMPILE_FAILURE_MESSAGE,
    core::domain::{CapturedOutput, NormalizedTestResult},
};

/// The subset of `cargo test --message-format json` and libtest JSON events
/// that grading looks at. Other fields are ignored.
#[derive(Debug, Default, Deserialize)]
struct Event {
    reason: Option<String>,
    success: Option<bool>,
    #[serde(rename = "type")]
    kind: Option<String>,
    event: Option<String>,
    test_count: Option<u32>,
    failed: Option<u32>,
    stdout: Option<String>,
}

/// One JSON object per stdout line. Lines that are not JSON objects are
/// skipped.
pub fn parse_output(output: &CapturedOutput) -> NormalizedTestResult {
    let events: Vec<Event> = output
        .stdout
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();

    let compiled = events
        .iter()
        .filter(|e| e.reason.as_deref() == Some("build-finished"))
        .filter_map(|e| e.success)
        .last()
        .unwrap_or(false);

    if !compiled {
        tracing::debug!("Build did not finish successfully");
        return NormalizedTestResult::from_counts(0, 0, vec![COMPILE_FAILURE_MESSAGE.to_string()]);
    }

    let mut count: u32 = 0;
    let mut failed: u32 = 0;
    let mut error_messages = Vec::new();
    for event in &events {
        match (event.kind.as_deref(), event.event.as_deref()) {
            (Some("suite"), _) => {
                if let Some(test_count) = event.test_count {
                    count = count.saturating_add(test_count);
                } else if let Some(suite_failed) = event.failed {
                    failed = failed.saturating_add(suite_failed);
                }
            }
            (Some("test"), Some("failed")) => {
                error_messages.push(event.stdout.clone().unwrap_or_default());
            }
            _ => {}
        }
    }

    NormalizedTestResult::from_counts(count, failed, error_messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_failure_ignores_suite_events() {
        let stdout = r#"{"reason":"compiler-message","message":{"rendered":"error[E0425]"}}
{"reason":"build-finished","success":false}
{"type":"suite","event":"started","test_count":2}
{"type":"suite","event":"failed","passed":1,"failed":1}
"#;

        let result = parse_output(&CapturedOutput::new(stdout, ""));

        assert_eq!(result.count, 0);
        assert_eq!(result.error_messages, vec![COMPILE_FAILURE_MESSAGE.to_string()]);
    }

    #[test]
    fn test_counts_suites_and_collects_failures() {
        let stdout = r#"{"reason":"compiler-artifact","target":{"name":"exercise"}}
{"reason":"build-finished","success":true}
   Compiling exercise v0.1.0
{"type":"suite","event":"started","test_count":3}
{"type":"test","event":"started","name":"tests::adds"}
{"type":"test","name":"tests::adds","event":"ok"}
{"type":"test","name":"tests::subtracts","event":"failed","stdout":"assertion `left == right` failed\n  left: 1\n right: 2\n"}
{"type":"suite","event":"failed","passed":2,"failed":1,"ignored":0}
{"type":"suite","event":"started","test_count":1}
{"type":"suite","event":"ok","passed":1,"failed":0}
"#;

        let result = parse_output(&CapturedOutput::new(stdout, ""));

        assert_eq!(result.count, 4);
        assert_eq!(result.failed, 1);
        assert_eq!(result.passed, 3);
        assert_eq!(result.error_messages.len(), 1);
        assert!(result.error_messages[0].starts_with("assertion `left == right` failed"));
    }

    #[test]
    fn test_huge_suite_counts_saturate() {
        let stdout = r#"{"reason":"build-finished","success":true}
{"type":"suite","event":"started","test_count":4294967295}
{"type":"suite","event":"failed","passed":0,"failed":4294967295}
{"type":"suite","event":"started","test_count":2}
{"type":"suite","event":"failed","passed":0,"failed":2}
"#;

        let result = parse_output(&CapturedOutput::new(stdout, ""));

        assert_eq!(result.count, u32::MAX);
        assert_eq!(result.failed, u32::MAX);
        assert_eq!(result.passed, 0);
    }

    #[test]
    fn test_missing_build_event_is_compile_failure() {
        let result = parse_output(&CapturedOutput::new("", "error: could not find Cargo.toml"));

        assert_eq!(result.error_messages, vec![COMPILE_FAILURE_MESSAGE.to_string()]);
    }
}
