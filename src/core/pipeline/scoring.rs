use std::{sync::Arc, time::Duration};

use chrono::Utc;
use futures::stream::FuturesUnordered;
use serde::Serialize;
use tokio::{
    sync::mpsc::Sender,
    task::{AbortHandle, JoinError},
    time::Instant,
};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    constants::{MAX_SCORE, REGEX_BUDGET},
    core::{
        adapters::TestingFramework,
        aggregator::ScoreAggregator,
        assessor::{Assessment, Assessor, LinterCatalog},
        classifier::ErrorClassifier,
        connection::CompletedExecution,
        domain::{
            CapturedOutput, CommandTemplate, ExecutionEnvironment, ExecutionStatus, FeedbackMessages, FileRole,
            OutputDetails, ScoredOutput, StructuredError, Submission, SubmissionFile, SubmissionScore, Testrun,
            TestrunCause,
        },
        errors::{ExecutionError, GradingError, SetupError},
        runner::RunnerHandle,
        traits::{
            runner_pool::{ExecutionEvent, RunnerPool},
            sink::TestrunSink,
        },
    },
};

/// Checks that test command and framework are configured together and that
/// the framework is known. `None` means the environment has no test setup.
pub fn resolve_test_setup(
    environment: &ExecutionEnvironment,
) -> Result<Option<(CommandTemplate, TestingFramework)>, SetupError> {
    match (&environment.test_command, &environment.testing_framework) {
        (Some(command), Some(framework)) => Ok(Some((command.clone(), TestingFramework::from_name(framework)?))),
        (None, None) => Ok(None),
        _ => Err(SetupError::IncompleteTestSetup {
            environment: environment.name.clone(),
        }),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RunDurations {
    pub waiting_duration: Duration,
    pub execution_duration: Duration,
}

#[derive(Debug)]
struct GradingSetup {
    test_command: CommandTemplate,
    assessor: Assessor,
    classifier: ErrorClassifier,
}

/// Shared state of one grading pass, handed to every file task.
#[derive(Debug)]
struct GradingPass {
    submission_id: Uuid,
    runner: RunnerHandle,
    setup: GradingSetup,
    sink: Arc<dyn TestrunSink>,
    feedback: Arc<FeedbackMessages>,
    deadline: Duration,
    acquisition_wait: Duration,
    cancel: CancellationToken,
}

/// Result of executing one command, whether or not it finished.
struct Outcome {
    status: ExecutionStatus,
    exit_code: Option<i32>,
    output: CapturedOutput,
    duration: Duration,
}

impl From<Result<CompletedExecution, ExecutionError>> for Outcome {
    fn from(result: Result<CompletedExecution, ExecutionError>) -> Self {
        match result {
            Ok(done) => Outcome {
                status: if done.exit_code == 0 {
                    ExecutionStatus::Ok
                } else {
                    ExecutionStatus::Failed
                },
                exit_code: Some(done.exit_code),
                output: done.output,
                duration: done.duration,
            },
            Err(e) => Outcome {
                status: e.status(),
                exit_code: None,
                output: e.output().clone(),
                duration: e.duration(),
            },
        }
    }
}

/// Coordinates one submission: acquires a runner, runs every gradable file
/// and combines the scores.
#[derive(Clone, Debug)]
pub struct GradingOrchestrator {
    pool: Arc<dyn RunnerPool>,
    sink: Arc<dyn TestrunSink>,
    aggregator: ScoreAggregator,
    catalog: Arc<LinterCatalog>,
    feedback: Arc<FeedbackMessages>,
    regex_budget: Duration,
}

impl GradingOrchestrator {
    pub fn new(pool: Arc<dyn RunnerPool>, sink: Arc<dyn TestrunSink>, aggregator: ScoreAggregator) -> Self {
        Self {
            pool,
            sink,
            aggregator,
            catalog: Arc::new(LinterCatalog::default()),
            feedback: Arc::new(FeedbackMessages::default()),
            regex_budget: REGEX_BUDGET,
        }
    }

    pub fn with_catalog(mut self, catalog: LinterCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    pub fn with_feedback(mut self, feedback: FeedbackMessages) -> Self {
        self.feedback = Arc::new(feedback);
        self
    }

    pub fn with_regex_budget(mut self, budget: Duration) -> Self {
        self.regex_budget = budget;
        self
    }

    /// Structured errors for arbitrary failure text, using the error
    /// templates of `environment`.
    pub fn classify_failure(
        &self,
        environment: &ExecutionEnvironment,
        text: &str,
    ) -> Result<Vec<StructuredError>, SetupError> {
        Ok(ErrorClassifier::new(&environment.error_templates)?
            .with_budget(self.regex_budget)
            .classify(text))
    }

    fn setup(&self, environment: &ExecutionEnvironment) -> Result<GradingSetup, SetupError> {
        let Some((test_command, framework)) = resolve_test_setup(environment)? else {
            return Err(SetupError::MissingTestSetup {
                environment: environment.name.clone(),
            });
        };

        Ok(GradingSetup {
            test_command,
            assessor: Assessor::new(framework, self.catalog.clone()).with_budget(self.regex_budget),
            classifier: ErrorClassifier::new(&environment.error_templates)?.with_budget(self.regex_budget),
        })
    }

    #[tracing::instrument(skip_all, fields(submission = %submission.id, user = %submission.user_id))]
    async fn prepare_runner(&self, submission: &Submission) -> Result<(RunnerHandle, Duration), GradingError> {
        let started = Instant::now();
        let acquired = self
            .pool
            .acquire(&submission.user_id, &submission.execution_environment, &submission.files)
            .await;
        let waiting_duration = started.elapsed();

        match acquired {
            Ok(runner) => {
                tracing::debug!("Acquired runner {} after {:?}", runner.id, waiting_duration);
                Ok((RunnerHandle::new(self.pool.clone(), runner), waiting_duration))
            }
            Err(source) => {
                tracing::warn!("Runner acquisition failed after {:?}: {}", waiting_duration, source);
                Err(GradingError::Acquisition {
                    source,
                    waiting_duration,
                })
            }
        }
    }

    /// Scores every gradable file of `submission`. Only setup and acquisition
    /// failures are returned as errors; failures of single files become
    /// zero-score outputs carrying their status.
    #[tracing::instrument(skip_all, fields(submission = %submission.id))]
    pub async fn score_submission(
        &self,
        submission: &Submission,
        cancel: &CancellationToken,
    ) -> Result<SubmissionScore, GradingError> {
        let setup = self.setup(&submission.execution_environment)?;
        let (runner, acquisition_wait) = self.prepare_runner(submission).await?;

        let pass = Arc::new(GradingPass {
            submission_id: submission.id,
            runner,
            setup,
            sink: self.sink.clone(),
            feedback: self.feedback.clone(),
            deadline: submission.execution_environment.permitted_execution_time(),
            acquisition_wait,
            cancel: cancel.clone(),
        });

        let files: Vec<SubmissionFile> = submission.gradable_files().cloned().collect();
        let mut outputs: Vec<Option<ScoredOutput>> = vec![None; files.len()];

        let (mut futures, tasks) = create_file_futures(&pass, &files);
        let guard = PassGuard::new(pass.clone(), tasks);
        while let Some((file_idx, result)) = futures.next().await {
            match result {
                Ok(output) => outputs[file_idx] = Some(output),
                Err(e) => tracing::error!("Scoring task for {} aborted: {}", files[file_idx].filepath(), e),
            }
        }
        guard.disarm();

        pass.runner.release().await;
        Ok(self.aggregator.combine(submission, outputs))
    }

    /// Executes the run command for one file and forwards its events to
    /// `events` as they arrive.
    #[tracing::instrument(skip(self, submission, events, cancel), fields(submission = %submission.id))]
    pub async fn run_file(
        &self,
        submission: &Submission,
        filepath: &str,
        events: Sender<ExecutionEvent>,
        cancel: &CancellationToken,
    ) -> Result<RunDurations, GradingError> {
        let file = submission
            .file_by_name(filepath)
            .ok_or_else(|| GradingError::UnknownFile {
                name: filepath.to_string(),
            })?;
        let environment = &submission.execution_environment;
        let command = environment.run_command.render(&file.filepath());

        let (runner, waiting_duration) = self.prepare_runner(submission).await?;
        let result = {
            let mut lease = runner.lease().await;
            lease
                .execute(
                    &command,
                    environment.permitted_execution_time(),
                    cancel.clone(),
                    Some(events),
                )
                .await
        };
        runner.release().await;

        let outcome = Outcome::from(result.clone());
        let testrun = Testrun {
            id: Uuid::new_v4(),
            submission_id: submission.id,
            cause: TestrunCause::Run,
            file: Some(file.filepath()),
            passed: outcome.status == ExecutionStatus::Ok,
            output: Some(format_output(outcome.status, &outcome.output)),
            status: outcome.status,
            exit_code: outcome.exit_code,
            container_execution_time: Some(outcome.duration),
            waiting_for_container_time: waiting_duration,
            created_at: Utc::now(),
        };
        if let Err(e) = self.sink.insert_testrun(testrun).await {
            tracing::error!("Could not record testrun: {}", e);
        }

        match result {
            Ok(done) => Ok(RunDurations {
                waiting_duration,
                execution_duration: done.duration,
            }),
            Err(source) => Err(GradingError::Execution {
                file: file.filepath(),
                source,
                waiting_duration,
            }),
        }
    }
}

/// Stops the file tasks and gives the runner back if a pass is dropped
/// before it finished.
struct PassGuard {
    pass: Arc<GradingPass>,
    tasks: Vec<AbortHandle>,
    armed: bool,
}

impl PassGuard {
    fn new(pass: Arc<GradingPass>, tasks: Vec<AbortHandle>) -> Self {
        Self {
            pass,
            tasks,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        tracing::warn!("Grading pass of {} dropped, aborting file tasks", self.pass.submission_id);
        for task in &self.tasks {
            task.abort();
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No runtime left to release the runner");
            return;
        };
        let pass = self.pass.clone();
        runtime.spawn(async move { pass.runner.release().await });
    }
}

/// One future per file, each yielding the file's index and its scored output,
/// plus handles to abort the underlying tasks.
fn create_file_futures(
    pass: &Arc<GradingPass>,
    files: &[SubmissionFile],
) -> (
    FuturesUnordered<impl std::future::Future<Output = (usize, Result<ScoredOutput, JoinError>)>>,
    Vec<AbortHandle>,
) {
    let futures = FuturesUnordered::new();
    let mut tasks = Vec::with_capacity(files.len());

    for (file_idx, file) in files.iter().enumerate() {
        let pass = pass.clone();
        let file = file.clone();

        tracing::debug!("Scheduling {} for submission {}", file.filepath(), pass.submission_id);

        let task = tokio::spawn(score_file(pass, file));
        tasks.push(task.abort_handle());
        futures.push(async move { (file_idx, task.await) });
    }

    (futures, tasks)
}

#[tracing::instrument(skip_all, fields(file = %file.filepath()))]
async fn score_file(pass: Arc<GradingPass>, file: SubmissionFile) -> ScoredOutput {
    let filepath = file.filepath();
    let command = pass.setup.test_command.render(&filepath);

    let lock_started = Instant::now();
    let mut lease = pass.runner.lease().await;
    let waiting = pass.acquisition_wait + lock_started.elapsed();
    let result = lease.execute(&command, pass.deadline, pass.cancel.clone(), None).await;
    drop(lease);

    let outcome = Outcome::from(result);

    let analysis = tokio::task::spawn_blocking({
        let pass = pass.clone();
        let output = outcome.output.clone();
        let status = outcome.status;
        move || {
            let assessment = pass.setup.assessor.assess(&output);
            let log = (!assessment.passed()).then(|| format_output(status, &output));
            let errors = log
                .as_deref()
                .map(|text| pass.setup.classifier.classify(text))
                .unwrap_or_default();
            (assessment, log, errors)
        }
    })
    .await;

    let (assessment, log, errors) = match analysis {
        Ok(analysis) => analysis,
        Err(e) => {
            tracing::error!("Assessment of {} aborted: {}", filepath, e);
            let assessment = Assessment {
                result: Default::default(),
                score: 0.0,
            };
            (assessment, Some(format_output(outcome.status, &outcome.output)), Vec::new())
        }
    };

    let testrun = Testrun {
        id: Uuid::new_v4(),
        submission_id: pass.submission_id,
        cause: TestrunCause::Assess,
        file: Some(filepath.clone()),
        passed: assessment.passed(),
        output: log,
        status: outcome.status,
        exit_code: outcome.exit_code,
        container_execution_time: Some(outcome.duration),
        waiting_for_container_time: waiting,
        created_at: Utc::now(),
    };
    if let Err(e) = pass.sink.insert_testrun(testrun).await {
        tracing::error!("Could not record testrun for {}: {}", filepath, e);
    }
    if !errors.is_empty() {
        if let Err(e) = pass.sink.insert_structured_errors(pass.submission_id, errors).await {
            tracing::error!("Could not record structured errors for {}: {}", filepath, e);
        }
    }

    ScoredOutput {
        file_role: file.role,
        status: outcome.status,
        score: assessment.score,
        weight: file.weight,
        container_execution_time: Some(outcome.duration),
        waiting_for_container_time: waiting,
        details: Some(OutputDetails {
            filename: display_filename(&file, &pass.feedback),
            message: feedback_message(&file, assessment.score, &pass.feedback),
            stdout: outcome.output.stdout,
            stderr: outcome.output.stderr,
            result: assessment.result,
        }),
    }
}

fn format_output(status: ExecutionStatus, output: &CapturedOutput) -> String {
    format!("status: {}\n stdout: {}\n stderr: {}", status, output.stdout, output.stderr)
}

/// Linters that do not count towards the score are labelled as such.
fn display_filename(file: &SubmissionFile, feedback: &FeedbackMessages) -> String {
    if file.role == FileRole::TeacherDefinedLinter && file.weight == 0.0 {
        feedback.not_graded.clone()
    } else {
        file.filepath()
    }
}

fn feedback_message(file: &SubmissionFile, score: f64, feedback: &FeedbackMessages) -> String {
    let full = (score - MAX_SCORE).abs() < f64::EPSILON;
    match file.role {
        FileRole::TeacherDefinedTest if full => feedback.default_test_feedback.clone(),
        FileRole::TeacherDefinedLinter if full => feedback.default_linter_feedback.clone(),
        _ => file.feedback_message.clone().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn environment(test_command: Option<&str>, framework: Option<&str>) -> ExecutionEnvironment {
        ExecutionEnvironment {
            id: 3,
            name: "python-3.12".to_string(),
            docker_image: "python:3.12".to_string(),
            run_command: CommandTemplate::new("python3 %{filename}"),
            test_command: test_command.map(CommandTemplate::new),
            testing_framework: framework.map(str::to_string),
            permitted_execution_time: 10,
            pool_size: 2,
            error_templates: vec![],
        }
    }

    fn file(role: FileRole, weight: f64) -> SubmissionFile {
        SubmissionFile {
            name: "lint".to_string(),
            extension: ".py".to_string(),
            path: Some("tests".to_string()),
            content: String::new(),
            role,
            weight,
            feedback_message: Some("Check your naming".to_string()),
        }
    }

    #[test]
    fn test_resolve_test_setup() {
        let (command, framework) = resolve_test_setup(&environment(Some("python3 -m unittest"), Some("PyUnit")))
            .unwrap()
            .unwrap();
        assert_eq!(command.0, "python3 -m unittest");
        assert_eq!(framework, TestingFramework::PyUnit);

        assert!(resolve_test_setup(&environment(None, None)).unwrap().is_none());
        assert!(matches!(
            resolve_test_setup(&environment(Some("pytest"), None)),
            Err(SetupError::IncompleteTestSetup { .. })
        ));
        assert!(matches!(
            resolve_test_setup(&environment(Some("mocha"), Some("Mocha"))),
            Err(SetupError::UnsupportedFramework { .. })
        ));
    }

    #[test]
    fn test_feedback_message_selection() {
        let feedback = FeedbackMessages::default();

        assert_eq!(
            feedback_message(&file(FileRole::TeacherDefinedTest, 1.0), MAX_SCORE, &feedback),
            feedback.default_test_feedback
        );
        assert_eq!(
            feedback_message(&file(FileRole::TeacherDefinedLinter, 1.0), MAX_SCORE, &feedback),
            feedback.default_linter_feedback
        );
        assert_eq!(
            feedback_message(&file(FileRole::TeacherDefinedLinter, 1.0), 0.4, &feedback),
            "Check your naming"
        );
    }

    #[test]
    fn test_ungraded_linter_filename() {
        let feedback = FeedbackMessages::default();

        assert_eq!(display_filename(&file(FileRole::TeacherDefinedLinter, 0.0), &feedback), feedback.not_graded);
        assert_eq!(display_filename(&file(FileRole::TeacherDefinedLinter, 0.5), &feedback), "tests/lint.py");
        assert_eq!(display_filename(&file(FileRole::TeacherDefinedTest, 0.0), &feedback), "tests/lint.py");
    }

    #[test]
    fn test_format_output() {
        let output = CapturedOutput::new("1 passed", "Traceback");

        assert_eq!(
            format_output(ExecutionStatus::Timeout, &output),
            "status: timeout\n stdout: 1 passed\n stderr: Traceback"
        );
    }
}
