use std::{
    sync::mpsc::{self, RecvTimeoutError},
    thread,
    time::Duration,
};

use regex::Regex;

use crate::constants::MONITORING_TARGET;

/// Runs `extract` on a watchdog thread and waits at most `budget` for it.
///
/// Returns `None` when the budget is exhausted or the extraction panicked;
/// callers treat that as "nothing extracted". The abandoned thread finishes
/// on its own and its result is discarded.
pub fn run_bounded<T, F>(extraction: &'static str, budget: Duration, extract: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    let spawned = thread::Builder::new()
        .name(format!("extract-{}", extraction))
        .spawn(move || {
            let _ = tx.send(extract());
        });

    if let Err(e) = spawned {
        tracing::warn!(target: MONITORING_TARGET, extraction, "Could not start extraction: {}", e);
        return None;
    }

    match rx.recv_timeout(budget) {
        Ok(value) => Some(value),
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(
                target: MONITORING_TARGET,
                extraction,
                budget_ms = budget.as_millis() as u64,
                "Extraction exceeded its time budget, treating as empty"
            );
            None
        }
        Err(RecvTimeoutError::Disconnected) => {
            tracing::warn!(target: MONITORING_TARGET, extraction, "Extraction aborted, treating as empty");
            None
        }
    }
}

/// Value of the first group of the last match, as adapters read summary
/// lines that may be printed more than once.
pub fn last_number(re: &Regex, text: &str) -> Option<u32> {
    re.captures_iter(text)
        .last()
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns_value_within_budget() {
        let result = run_bounded("sum", Duration::from_secs(1), || 2 + 2);

        assert_eq!(result, Some(4));
    }

    #[test]
    fn test_exhausted_budget_is_empty() {
        let result = run_bounded("sleepy", Duration::from_millis(10), || {
            thread::sleep(Duration::from_millis(500));
            vec!["late".to_string()]
        });

        assert_eq!(result, None);
    }

    #[test]
    fn test_panicking_extraction_is_empty() {
        let result: Option<u32> = run_bounded("broken", Duration::from_secs(1), || panic!("boom"));

        assert_eq!(result, None);
    }

    #[test]
    fn test_last_number_takes_last_match() {
        let re = Regex::new(r"Tests run: (\d+)").unwrap();

        assert_eq!(last_number(&re, "Tests run: 3\nTests run: 5"), Some(5));
        assert_eq!(last_number(&re, "nothing here"), None);
    }
}
