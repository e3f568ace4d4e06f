use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use uuid::Uuid;

use crate::core::{
    domain::{StructuredError, Testrun},
    errors::SinkError,
    traits::sink::TestrunSink,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RecordedError {
    pub submission_id: Uuid,
    #[serde(flatten)]
    pub error: StructuredError,
}

/// Everything a sink has recorded, for printing alongside a result.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GradingRecords {
    pub testruns: Vec<Testrun>,
    pub structured_errors: Vec<RecordedError>,
}

/// Keeps records in memory, in insertion order. Nothing outlives the process.
#[derive(Debug, Default)]
pub struct MemorySink {
    testruns: Mutex<Vec<Testrun>>,
    structured_errors: Mutex<Vec<(Uuid, StructuredError)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn testruns(&self) -> Vec<Testrun> {
        self.testruns.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn structured_errors(&self) -> Vec<(Uuid, StructuredError)> {
        self.structured_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn records(&self) -> GradingRecords {
        GradingRecords {
            testruns: self.testruns(),
            structured_errors: self
                .structured_errors()
                .into_iter()
                .map(|(submission_id, error)| RecordedError { submission_id, error })
                .collect(),
        }
    }
}

#[async_trait::async_trait]
impl TestrunSink for MemorySink {
    #[tracing::instrument(skip_all, fields(testrun = %testrun.id))]
    async fn insert_testrun(&self, testrun: Testrun) -> Result<(), SinkError> {
        tracing::debug!("Recording testrun: {:?}", testrun);
        self.testruns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(testrun);
        Ok(())
    }

    async fn insert_structured_errors(
        &self,
        submission_id: Uuid,
        errors: Vec<StructuredError>,
    ) -> Result<(), SinkError> {
        self.structured_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(errors.into_iter().map(|error| (submission_id, error)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::core::domain::{ExecutionStatus, StructuredErrorAttribute, TestrunCause};

    #[tokio::test]
    async fn test_records_serialize_testruns_and_errors() {
        let sink = MemorySink::new();
        let submission_id = Uuid::new_v4();
        sink.insert_testrun(Testrun {
            id: Uuid::new_v4(),
            submission_id,
            cause: TestrunCause::Assess,
            file: Some("test_first.py".to_string()),
            passed: false,
            output: Some("status: failed\n stdout: \n stderr: NameError".to_string()),
            status: ExecutionStatus::Failed,
            exit_code: Some(1),
            container_execution_time: Some(Duration::from_millis(40)),
            waiting_for_container_time: Duration::from_millis(3),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
        sink.insert_structured_errors(
            submission_id,
            vec![StructuredError {
                template_id: 1,
                template_name: "NameError".to_string(),
                matched_text: "NameError: name 'revrse' is not defined".to_string(),
                attributes: vec![StructuredErrorAttribute {
                    key: "name".to_string(),
                    value: Some("revrse".to_string()),
                    matched: true,
                }],
            }],
        )
        .await
        .unwrap();

        let records = sink.records();
        let json = serde_json::to_value(&records).unwrap();

        assert_eq!(records.testruns.len(), 1);
        assert_eq!(json["testruns"][0]["status"], "failed");
        assert_eq!(json["testruns"][0]["cause"], "assess");
        assert_eq!(json["structured_errors"][0]["submission_id"], submission_id.to_string());
        assert_eq!(json["structured_errors"][0]["template_name"], "NameError");
        assert_eq!(json["structured_errors"][0]["attributes"][0]["value"], "revrse");
    }

    #[test]
    fn test_empty_sink_has_no_records() {
        assert_eq!(MemorySink::new().records(), GradingRecords::default());
    }
}
