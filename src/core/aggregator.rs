use std::sync::Arc;

use crate::{
    constants::MONITORING_TARGET,
    core::{
        domain::{FileRole, ScoredOutput, Submission, SubmissionScore, VisibilityPolicy},
        traits::sink::FullScoreNotifier,
    },
};

/// Σ(score × weight). Missing outputs contribute nothing.
pub fn total_score(outputs: &[Option<ScoredOutput>]) -> f64 {
    outputs
        .iter()
        .flatten()
        .map(|output| output.score * output.weight)
        .sum()
}

/// Applies both visibility rules; they are independent and compose in any
/// order.
pub fn redact(outputs: Vec<ScoredOutput>, policy: VisibilityPolicy) -> Vec<ScoredOutput> {
    outputs
        .into_iter()
        .filter(|output| policy.show_linter || output.file_role != FileRole::TeacherDefinedLinter)
        .map(|mut output| {
            if policy.hide_test_results {
                output.details = None;
            }
            output
        })
        .collect()
}

#[derive(Clone, Debug)]
pub struct ScoreAggregator {
    notifier: Arc<dyn FullScoreNotifier>,
}

impl ScoreAggregator {
    pub fn new(notifier: Arc<dyn FullScoreNotifier>) -> Self {
        Self { notifier }
    }

    /// The total is computed before redaction, so hidden outputs still count.
    #[tracing::instrument(skip_all, fields(submission = %submission.id))]
    pub fn combine(&self, submission: &Submission, outputs: Vec<Option<ScoredOutput>>) -> SubmissionScore {
        let total_score = total_score(&outputs);
        let per_file = redact(outputs.into_iter().flatten().collect(), submission.visibility);

        let score = SubmissionScore {
            total_score,
            maximum_score: submission.maximum_score,
            per_file,
        };
        tracing::info!(
            total_score = score.total_score,
            maximum_score = score.maximum_score,
            "Submission scored"
        );

        if score.is_full_score() {
            self.notify_full_score(submission.exercise_id, &submission.user_id);
        }
        score
    }

    /// Fire and forget. Failures are logged and never reach the caller.
    fn notify_full_score(&self, exercise_id: u64, user_id: &str) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(target: MONITORING_TARGET, exercise_id, "No runtime for full score notification");
            return;
        };

        let notifier = self.notifier.clone();
        let user_id = user_id.to_string();
        runtime.spawn(async move {
            if let Err(e) = notifier.full_score_reached(exercise_id, &user_id).await {
                tracing::warn!(target: MONITORING_TARGET, exercise_id, "Full score notification failed: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::{
        domain::{
            CommandTemplate, ExecutionEnvironment, ExecutionStatus, NormalizedTestResult, OutputDetails,
        },
        errors::NotifyError,
        traits::sink::MockFullScoreNotifier,
    };
    use tokio::sync::oneshot;
    use uuid::Uuid;

    fn output(role: FileRole, score: f64, weight: f64) -> ScoredOutput {
        ScoredOutput {
            file_role: role,
            status: ExecutionStatus::Ok,
            score,
            weight,
            container_execution_time: Some(Duration::from_millis(120)),
            waiting_for_container_time: Duration::from_millis(5),
            details: Some(OutputDetails {
                filename: "test.py".to_string(),
                message: "Keep going".to_string(),
                stdout: "out".to_string(),
                stderr: "err".to_string(),
                result: NormalizedTestResult::from_counts(4, 1, vec!["boom".to_string()]),
            }),
        }
    }

    fn submission(maximum_score: f64, visibility: VisibilityPolicy) -> Submission {
        Submission {
            id: Uuid::new_v4(),
            exercise_id: 42,
            user_id: "learner-7".to_string(),
            files: vec![],
            execution_environment: ExecutionEnvironment {
                id: 1,
                name: "python".to_string(),
                docker_image: "python:3.12".to_string(),
                run_command: CommandTemplate::new("python3 %{filename}"),
                test_command: None,
                testing_framework: None,
                permitted_execution_time: 60,
                pool_size: 0,
                error_templates: vec![],
            },
            maximum_score,
            visibility,
        }
    }

    fn silent_notifier() -> Arc<MockFullScoreNotifier> {
        let mut notifier = MockFullScoreNotifier::new();
        notifier.expect_full_score_reached().times(0);
        Arc::new(notifier)
    }

    #[test]
    fn test_total_is_weighted_sum_in_any_order() {
        let outputs = vec![
            Some(output(FileRole::TeacherDefinedTest, 0.75, 2.0)),
            None,
            Some(output(FileRole::TeacherDefinedLinter, 0.5, 1.0)),
        ];
        let mut reversed = outputs.clone();
        reversed.reverse();

        assert_eq!(total_score(&outputs), 2.0);
        assert_eq!(total_score(&reversed), 2.0);
        assert_eq!(total_score(&[]), 0.0);
    }

    #[test]
    fn test_redaction_policies_compose() {
        let outputs = vec![
            output(FileRole::TeacherDefinedTest, 1.0, 1.0),
            output(FileRole::TeacherDefinedLinter, 0.5, 1.0),
        ];
        let both = VisibilityPolicy {
            hide_test_results: true,
            show_linter: false,
        };

        let redacted = redact(outputs.clone(), both);

        assert_eq!(redacted.len(), 1);
        assert_eq!(redacted[0].score, 1.0);
        assert_eq!(redacted[0].details, None);

        let shown = redact(
            outputs,
            VisibilityPolicy {
                hide_test_results: false,
                show_linter: true,
            },
        );
        assert_eq!(shown.len(), 2);
        assert!(shown.iter().all(|o| o.details.is_some()));
    }

    #[tokio::test]
    async fn test_hidden_linter_still_counts() {
        let aggregator = ScoreAggregator::new(silent_notifier());
        let outputs = vec![
            Some(output(FileRole::TeacherDefinedTest, 1.0, 1.0)),
            Some(output(FileRole::TeacherDefinedLinter, 0.5, 1.0)),
        ];

        let score = aggregator.combine(&submission(2.0, VisibilityPolicy::default()), outputs);

        assert_eq!(score.total_score, 1.5);
        assert_eq!(score.per_file.len(), 1);
        assert_eq!(score.per_file[0].file_role, FileRole::TeacherDefinedTest);
    }

    #[tokio::test]
    async fn test_full_score_notifies_without_blocking() {
        let (tx, rx) = oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        let mut notifier = MockFullScoreNotifier::new();
        notifier
            .expect_full_score_reached()
            .withf(|exercise_id, user_id| *exercise_id == 42 && user_id == "learner-7")
            .times(1)
            .returning(move |_, _| {
                if let Some(tx) = tx.lock().unwrap().take() {
                    let _ = tx.send(());
                }
                Err(NotifyError::Failed {
                    msg: "thread store offline".to_string(),
                })
            });
        let aggregator = ScoreAggregator::new(Arc::new(notifier));

        let score = aggregator.combine(
            &submission(1.0, VisibilityPolicy::default()),
            vec![Some(output(FileRole::TeacherDefinedTest, 1.0, 1.0))],
        );

        assert!(score.is_full_score());
        tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("notifier was not called")
            .unwrap();
    }

    #[test]
    fn test_combine_outside_runtime_skips_notification() {
        let aggregator = ScoreAggregator::new(silent_notifier());

        let score = aggregator.combine(
            &submission(1.0, VisibilityPolicy::default()),
            vec![Some(output(FileRole::TeacherDefinedTest, 1.0, 1.0))],
        );

        assert_eq!(score.percentage(), 100);
    }
}
