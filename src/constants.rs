use std::time::Duration;

/// Score of a file whose tests all passed.
pub const MAX_SCORE: f64 = 1.0;

/// Upper bound for a single regex extraction over learner output.
pub const REGEX_BUDGET: Duration = Duration::from_secs(2);

pub const DEFAULT_PERMITTED_EXECUTION_TIME_SECS: u64 = 60;

pub const COMPILE_FAILURE_MESSAGE: &str = "Could not compile. See below for more details.";

pub const MONITORING_TARGET: &str = "monitoring";
