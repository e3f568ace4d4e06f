use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::DEFAULT_PERMITTED_EXECUTION_TIME_SECS;
use crate::core::errors::RunnerError;

/// Execution environment descriptor as configured for an exercise.
/// Read-only for the duration of a grading pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionEnvironment {
    pub id: u64,
    pub name: String,
    pub docker_image: String,
    pub run_command: CommandTemplate,
    #[serde(default)]
    pub test_command: Option<CommandTemplate>,
    /// Adapter selection key, either a framework name (`PyUnit`) or an
    /// adapter key (`PyUnitAdapter`).
    #[serde(default)]
    pub testing_framework: Option<String>,
    /// Seconds a single command may run.
    #[serde(default = "default_permitted_execution_time")]
    pub permitted_execution_time: u64,
    #[serde(default)]
    pub pool_size: u32,
    #[serde(default)]
    pub error_templates: Vec<ErrorTemplate>,
}

fn default_permitted_execution_time() -> u64 {
    DEFAULT_PERMITTED_EXECUTION_TIME_SECS
}

impl ExecutionEnvironment {
    pub fn permitted_execution_time(&self) -> Duration {
        Duration::from_secs(self.permitted_execution_time)
    }
}

/// A shell command with `%{class_name}`, `%{filename}` and `%{module_name}`
/// placeholders.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandTemplate(pub String);

impl CommandTemplate {
    pub fn new(template: &str) -> Self {
        Self(template.to_string())
    }

    pub fn render(&self, filepath: &str) -> String {
        let file_name = filepath.rsplit('/').next().unwrap_or(filepath);
        let stem = match file_name.rfind('.') {
            Some(idx) if idx > 0 => &file_name[..idx],
            _ => file_name,
        };

        self.0
            .replace("%{class_name}", &upcase_first(stem))
            .replace("%{filename}", filepath)
            .replace("%{module_name}", &underscore(stem))
    }
}

fn upcase_first(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn underscore(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 4);
    let mut prev: Option<char> = None;
    for c in value.chars() {
        if c == '-' {
            out.push('_');
        } else if c.is_uppercase() {
            if prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit()) {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
        prev = Some(c);
    }
    out
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRole {
    MainFile,
    RegularFile,
    ReferenceImplementation,
    UserDefinedTest,
    TeacherDefinedTest,
    TeacherDefinedLinter,
}

impl FileRole {
    /// Files that take part in scoring.
    pub fn is_assessment(&self) -> bool {
        matches!(
            self,
            FileRole::TeacherDefinedTest | FileRole::TeacherDefinedLinter
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmissionFile {
    pub name: String,
    #[serde(default)]
    pub extension: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub content: String,
    pub role: FileRole,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub feedback_message: Option<String>,
}

impl SubmissionFile {
    pub fn name_with_extension(&self) -> String {
        if self.extension.is_empty() {
            self.name.clone()
        } else {
            format!("{}{}", self.name, self.extension)
        }
    }

    pub fn filepath(&self) -> String {
        match self.path.as_deref().filter(|p| !p.is_empty()) {
            Some(path) => format!("{}/{}", path.trim_end_matches('/'), self.name_with_extension()),
            None => self.name_with_extension(),
        }
    }
}

/// Post-hoc visibility rules applied to the per-file results of a pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityPolicy {
    /// Embed mode: keep scores, drop everything else.
    #[serde(default)]
    pub hide_test_results: bool,
    #[serde(default)]
    pub show_linter: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub exercise_id: u64,
    pub user_id: String,
    pub files: Vec<SubmissionFile>,
    pub execution_environment: ExecutionEnvironment,
    pub maximum_score: f64,
    #[serde(default)]
    pub visibility: VisibilityPolicy,
}

impl Submission {
    pub fn gradable_files(&self) -> impl Iterator<Item = &SubmissionFile> {
        self.files.iter().filter(|f| f.role.is_assessment())
    }

    /// Expects the full path including the extension, without a `./` prefix.
    pub fn file_by_name(&self, filepath: &str) -> Option<&SubmissionFile> {
        self.files.iter().find(|f| f.filepath() == filepath)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Requested,
    Allocating,
    Ready,
    Executing,
    Completed,
    TimedOut,
    Depleted,
    Failed,
    Released,
}

impl RunnerState {
    pub fn can_transition_to(&self, next: RunnerState) -> bool {
        use RunnerState::*;

        match (self, next) {
            (Released, _) => false,
            (_, Released) => true,
            (Requested, Allocating | Depleted | Failed) => true,
            (Allocating, Ready | Depleted | Failed) => true,
            (Ready, Executing) => true,
            (Executing, Completed | TimedOut | Depleted | Failed) => true,
            (Completed | TimedOut | Depleted | Failed, Executing) => true,
            _ => false,
        }
    }
}

/// Opaque handle to a sandbox owned by the runner management service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Runner {
    pub id: String,
    pub principal: String,
    pub execution_environment_id: u64,
    state: RunnerState,
}

impl Runner {
    pub fn new(id: &str, principal: &str, execution_environment_id: u64) -> Self {
        Self {
            id: id.to_string(),
            principal: principal.to_string(),
            execution_environment_id,
            state: RunnerState::Requested,
        }
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn transition(&mut self, next: RunnerState) -> Result<(), RunnerError> {
        if !self.state.can_transition_to(next) {
            return Err(RunnerError::InvalidTransition {
                runner_id: self.id.clone(),
                from: self.state,
                to: next,
            });
        }

        tracing::trace!(runner = %self.id, from = ?self.state, to = ?next, "runner transition");
        self.state = next;
        Ok(())
    }
}

/// Output accumulated from one command, per stream, in arrival order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn new(stdout: &str, stderr: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }
}

/// Linter rating, e.g. `7.5/10`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Rating {
    pub achieved: f64,
    pub maximum: f64,
}

impl Rating {
    /// Normalized rating in `[0, 1]`; negative ratings count as zero.
    pub fn fraction(&self) -> f64 {
        if self.maximum <= 0.0 {
            return 0.0;
        }
        (self.achieved.max(0.0) / self.maximum).min(1.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LinterDiagnostic {
    pub file_name: String,
    pub line: u32,
    pub severity: String,
    pub code: String,
    pub name: String,
    /// Function or class the message refers to, if reported.
    pub scope: Option<String>,
    pub result: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct NormalizedTestResult {
    pub count: u32,
    pub passed: u32,
    pub failed: u32,
    pub error_messages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detailed_diagnostics: Option<Vec<LinterDiagnostic>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<Rating>,
}

impl NormalizedTestResult {
    /// Infers `passed` as `count - failed`.
    pub fn from_counts(count: u32, failed: u32, error_messages: Vec<String>) -> Self {
        Self {
            count,
            passed: count.saturating_sub(failed),
            failed,
            error_messages,
            ..Default::default()
        }
    }

    pub fn all_passed(count: u32) -> Self {
        Self::from_counts(count, 0, Vec::new())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Ok,
    Failed,
    ContainerDepleted,
    Timeout,
    OutOfMemory,
    TerminatedByClient,
    RunnerInUse,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionStatus::Ok => "ok",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::ContainerDepleted => "container_depleted",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::OutOfMemory => "out_of_memory",
            ExecutionStatus::TerminatedByClient => "terminated_by_client",
            ExecutionStatus::RunnerInUse => "runner_in_use",
        };
        f.write_str(name)
    }
}

/// Per-file details that embed mode strips.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutputDetails {
    pub filename: String,
    pub message: String,
    pub stdout: String,
    pub stderr: String,
    #[serde(flatten)]
    pub result: NormalizedTestResult,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoredOutput {
    pub file_role: FileRole,
    pub status: ExecutionStatus,
    pub score: f64,
    pub weight: f64,
    pub container_execution_time: Option<Duration>,
    pub waiting_for_container_time: Duration,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub details: Option<OutputDetails>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SubmissionScore {
    pub total_score: f64,
    pub maximum_score: f64,
    pub per_file: Vec<ScoredOutput>,
}

impl SubmissionScore {
    pub fn normalized_score(&self) -> f64 {
        if self.maximum_score > 0.0 {
            self.total_score / self.maximum_score
        } else {
            0.0
        }
    }

    pub fn percentage(&self) -> u32 {
        (self.normalized_score() * 100.0).round().max(0.0) as u32
    }

    pub fn is_full_score(&self) -> bool {
        self.maximum_score > 0.0 && (self.normalized_score() - 1.0).abs() < f64::EPSILON
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestrunCause {
    Assess,
    Run,
}

/// Append-only audit record of one execution attempt.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Testrun {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub cause: TestrunCause,
    pub file: Option<String>,
    pub passed: bool,
    pub output: Option<String>,
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
    pub container_execution_time: Option<Duration>,
    pub waiting_for_container_time: Duration,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorTemplateAttribute {
    pub key: String,
    pub regex: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorTemplate {
    pub id: u64,
    pub name: String,
    pub signature: String,
    #[serde(default)]
    pub attributes: Vec<ErrorTemplateAttribute>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StructuredErrorAttribute {
    pub key: String,
    pub value: Option<String>,
    pub matched: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StructuredError {
    pub template_id: u64,
    pub template_name: String,
    pub matched_text: String,
    pub attributes: Vec<StructuredErrorAttribute>,
}

/// Messages shown next to a file's score.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackMessages {
    pub default_test_feedback: String,
    pub default_linter_feedback: String,
    pub not_graded: String,
}

impl Default for FeedbackMessages {
    fn default() -> Self {
        Self {
            default_test_feedback: "Well done. All tests have been passed.".to_string(),
            default_linter_feedback: "Well done. The linter found no issues.".to_string(),
            not_graded: "(not graded)".to_string(),
        }
    }
}
