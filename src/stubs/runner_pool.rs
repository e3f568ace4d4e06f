use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use futures::{StreamExt, future, stream};
use uuid::Uuid;

use crate::core::{
    domain::{ExecutionEnvironment, Runner, RunnerState, SubmissionFile},
    errors::RunnerError,
    traits::runner_pool::{EventStream, ExecutionEvent, RunnerPool},
};

/// Events a stubbed command emits, optionally never exiting.
#[derive(Clone, Debug)]
pub struct ScriptedExecution {
    events: Vec<Result<ExecutionEvent, RunnerError>>,
    hang: bool,
    stall_attach: bool,
}

impl ScriptedExecution {
    pub fn new(events: Vec<Result<ExecutionEvent, RunnerError>>) -> Self {
        Self {
            events,
            hang: false,
            stall_attach: false,
        }
    }

    pub fn exit(stdout: &str, stderr: &str, exit_code: i32) -> Self {
        let mut events = Vec::new();
        if !stdout.is_empty() {
            events.push(Ok(ExecutionEvent::Stdout(stdout.to_string())));
        }
        if !stderr.is_empty() {
            events.push(Ok(ExecutionEvent::Stderr(stderr.to_string())));
        }
        events.push(Ok(ExecutionEvent::Exit(exit_code)));
        Self::new(events)
    }

    /// Prints `stdout` and then runs forever.
    pub fn hanging(stdout: &str) -> Self {
        Self {
            events: vec![Ok(ExecutionEvent::Stdout(stdout.to_string()))],
            hang: true,
            stall_attach: false,
        }
    }

    /// The attach call itself never answers.
    pub fn stalled() -> Self {
        Self {
            events: Vec::new(),
            hang: true,
            stall_attach: true,
        }
    }

    pub fn failing(error: RunnerError) -> Self {
        Self::new(vec![Err(error)])
    }
}

/// Decrements the active command count when the event stream is dropped.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-process runner pool. Commands are answered from scripts keyed by the
/// full command line; every step waits `delay` first.
#[derive(Debug)]
pub struct RunnerPoolStub {
    delay: Duration,
    acquire_error: Option<RunnerError>,
    scripts: HashMap<String, ScriptedExecution>,
    fallback: ScriptedExecution,
    releases: DashMap<String, usize>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    attached: Mutex<Vec<String>>,
}

impl RunnerPoolStub {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            acquire_error: None,
            scripts: HashMap::new(),
            fallback: ScriptedExecution::exit("", "", 0),
            releases: DashMap::new(),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            attached: Mutex::new(Vec::new()),
        }
    }

    pub fn with_acquire_error(mut self, error: RunnerError) -> Self {
        self.acquire_error = Some(error);
        self
    }

    pub fn with_script(mut self, command: &str, script: ScriptedExecution) -> Self {
        self.scripts.insert(command.to_string(), script);
        self
    }

    pub fn with_fallback(mut self, script: ScriptedExecution) -> Self {
        self.fallback = script;
        self
    }

    /// Highest number of commands that were attached at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn attached_commands(&self) -> Vec<String> {
        self.attached.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn release_calls(&self) -> usize {
        self.releases.iter().map(|entry| *entry.value()).sum()
    }
}

#[async_trait::async_trait]
impl RunnerPool for RunnerPoolStub {
    #[tracing::instrument(skip(self, files))]
    async fn acquire(
        &self,
        principal: &str,
        environment: &ExecutionEnvironment,
        files: &[SubmissionFile],
    ) -> Result<Runner, RunnerError> {
        tokio::time::sleep(self.delay).await;
        if let Some(error) = &self.acquire_error {
            return Err(error.clone());
        }

        let mut runner = Runner::new(&format!("stub-{}", Uuid::new_v4()), principal, environment.id);
        runner.transition(RunnerState::Allocating)?;
        tracing::debug!("Copying {} files into {}", files.len(), runner.id);
        runner.transition(RunnerState::Ready)?;
        Ok(runner)
    }

    async fn release(&self, runner: &Runner) -> Result<(), RunnerError> {
        *self.releases.entry(runner.id.clone()).or_insert(0) += 1;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(runner = %runner.id))]
    async fn attach(&self, runner: &Runner, command: &str) -> Result<EventStream, RunnerError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);
        let guard = ActiveGuard(self.active.clone());
        if now_active > 1 {
            return Err(RunnerError::RunnerInUse {
                runner_id: runner.id.clone(),
            });
        }

        self.attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.to_string());

        let script = self.scripts.get(command).unwrap_or(&self.fallback).clone();
        if script.stall_attach {
            future::pending::<()>().await;
        }
        let delay = self.delay;
        let events = stream::iter(script.events);
        let events = if script.hang {
            events.chain(stream::pending()).boxed()
        } else {
            events.boxed()
        };

        Ok(stream::once(async move {
            tokio::time::sleep(delay).await;
            events
        })
        .flatten()
        .map(move |event| {
            let _active = &guard;
            event
        })
        .boxed())
    }
}
