use crate::metrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{sleep, Instant},
};
use tracing::{error, info, warn};
use uuid::Uuid;

pub type TaskResult = Result<Value, TaskError>;
pub type TaskFuture = Pin<Box<dyn Future<Output = TaskResult> + Send>>;
pub type TaskFn = Arc<dyn Fn(TaskContext, Value) -> TaskFuture + Send + Sync>;

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TaskError {
    message: String,
    kind: TaskErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskErrorKind {
    NotFound,
    InvalidPayload,
    Storage,
    Upstream,
    TimedOut,
}

impl TaskErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskErrorKind::NotFound => "not_found",
            TaskErrorKind::InvalidPayload => "invalid_payload",
            TaskErrorKind::Storage => "storage",
            TaskErrorKind::Upstream => "upstream",
            TaskErrorKind::TimedOut => "timed_out",
        }
    }
}

impl TaskError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: TaskErrorKind::NotFound,
        }
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: TaskErrorKind::InvalidPayload,
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: TaskErrorKind::Storage,
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: TaskErrorKind::Upstream,
        }
    }

    pub fn timed_out(limit: Duration) -> Self {
        Self {
            message: format!("hard time limit of {}s exceeded", limit.as_secs()),
            kind: TaskErrorKind::TimedOut,
        }
    }

    pub fn kind(&self) -> TaskErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }

    /// Transient trouble is worth another attempt. Bad input and missing
    /// records are not going to get better.
    pub fn retryable(&self) -> bool {
        matches!(self.kind, TaskErrorKind::Storage | TaskErrorKind::Upstream)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub status: String,
    pub subject: String,
    pub percent: u8,
}

#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<dyn Fn(JobProgress) + Send + Sync>,
}

impl ProgressReporter {
    pub fn new(sink: Arc<dyn Fn(JobProgress) + Send + Sync>) -> Self {
        Self { sink }
    }

    pub fn report(&self, status: &str, subject: &str, percent: u8) {
        (self.sink)(JobProgress {
            status: status.to_string(),
            subject: subject.to_string(),
            percent: percent.min(100),
        });
    }
}

/// Handed to every task execution. `attempt` starts at 1 and counts up
/// across retries of the same job.
#[derive(Clone)]
pub struct TaskContext {
    pub job_id: Uuid,
    pub attempt: u32,
    pub progress: ProgressReporter,
}

#[derive(Default, Clone)]
pub struct TaskRegistry {
    entries: HashMap<&'static str, TaskFn>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &'static str, task: TaskFn) {
        self.entries.insert(name, task);
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.keys().copied().collect();
        names.sort_unstable();
        names
    }

    fn resolve(&self, name: &str) -> Option<&'static str> {
        self.entries.get_key_value(name).map(|(key, _)| *key)
    }

    fn get(&self, name: &str) -> Option<TaskFn> {
        self.entries.get(name).cloned()
    }
}

/// Fired exactly once per job, after the terminal state is recorded.
#[derive(Clone)]
pub struct JobHooks {
    pub on_success: Arc<dyn Fn(Uuid, &str, &Value) + Send + Sync>,
    pub on_failure: Arc<dyn Fn(Uuid, &str, &TaskError) + Send + Sync>,
}

impl Default for JobHooks {
    fn default() -> Self {
        Self {
            on_success: Arc::new(|job_id, task, _result| {
                info!(target = "rastro.jobs", %job_id, task, "job succeeded");
            }),
            on_failure: Arc::new(|job_id, task, err| {
                error!(target = "rastro.jobs", %job_id, task, kind = err.kind().as_str(), error = %err, "job failed");
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    pub queue_capacity: usize,
    pub workers: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub soft_time_limit: Duration,
    pub hard_time_limit: Duration,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            workers: 2,
            max_retries: 3,
            retry_delay: Duration::from_secs(60),
            soft_time_limit: Duration::from_secs(25 * 60),
            hard_time_limit: Duration::from_secs(30 * 60),
        }
    }
}

impl JobQueueConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            queue_capacity: env_count("QUEUE_CAPACITY", defaults.queue_capacity),
            workers: env_count("WORKER_COUNT", defaults.workers),
            max_retries: env_u32("TASK_MAX_RETRIES", defaults.max_retries),
            retry_delay: env_secs("TASK_RETRY_DELAY_SECS", defaults.retry_delay),
            soft_time_limit: env_secs("TASK_SOFT_TIME_LIMIT_SECS", defaults.soft_time_limit),
            hard_time_limit: env_secs("TASK_TIME_LIMIT_SECS", defaults.hard_time_limit),
        }
    }
}

#[derive(Debug, Clone)]
enum JobState {
    Queued,
    Running,
    Succeeded { result: Value },
    Failed { error: TaskError },
}

impl JobState {
    fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "pending",
            JobState::Running => "started",
            JobState::Succeeded { .. } => "success",
            JobState::Failed { .. } => "failure",
        }
    }
}

#[derive(Debug, Clone)]
struct JobRecord {
    task: &'static str,
    state: JobState,
    attempts: u32,
    progress: Option<JobProgress>,
    queued_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub job_id: Uuid,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<&'static str>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<JobProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl JobStatus {
    fn unknown(job_id: Uuid) -> Self {
        Self {
            job_id,
            state: "unknown",
            task: None,
            attempts: 0,
            result: None,
            info: None,
            queued_at: None,
            updated_at: None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.state == "unknown"
    }

    fn from_record(job_id: Uuid, record: &JobRecord) -> Self {
        let result = match &record.state {
            JobState::Succeeded { result } => Some(result.clone()),
            JobState::Failed { error } => Some(json!({
                "error": error.detail(),
                "reason": error.kind().as_str(),
            })),
            _ => None,
        };
        Self {
            job_id,
            state: record.state.as_str(),
            task: Some(record.task),
            attempts: record.attempts,
            result,
            info: record.progress.clone(),
            queued_at: Some(record.queued_at),
            updated_at: Some(record.updated_at),
        }
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("unknown task: {0}")]
    UnknownTask(String),
    #[error("queue closed")]
    QueueClosed,
}

struct QueuedJob {
    id: Uuid,
    task: &'static str,
    payload: Value,
}

type Records = Arc<Mutex<HashMap<Uuid, JobRecord>>>;

fn lock_records(records: &Records) -> MutexGuard<'_, HashMap<Uuid, JobRecord>> {
    records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<QueuedJob>,
    records: Records,
    registry: TaskRegistry,
}

impl JobQueue {
    pub fn spawn(
        registry: TaskRegistry,
        hooks: JobHooks,
        config: JobQueueConfig,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (tx, rx) = mpsc::channel::<QueuedJob>(config.queue_capacity);
        let records: Records = Arc::new(Mutex::new(HashMap::new()));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut handles = Vec::with_capacity(config.workers);
        for worker in 0..config.workers.max(1) {
            handles.push(tokio::spawn(worker_loop(
                worker,
                rx.clone(),
                records.clone(),
                registry.clone(),
                hooks.clone(),
                config.clone(),
            )));
        }

        (
            Self {
                tx,
                records,
                registry,
            },
            handles,
        )
    }

    pub async fn submit(&self, task: &str, payload: Value) -> Result<Uuid, SubmitError> {
        let Some(task) = self.registry.resolve(task) else {
            return Err(SubmitError::UnknownTask(task.to_string()));
        };
        let id = Uuid::new_v4();
        let now = Utc::now();
        {
            let mut guard = lock_records(&self.records);
            guard.insert(
                id,
                JobRecord {
                    task,
                    state: JobState::Queued,
                    attempts: 0,
                    progress: None,
                    queued_at: now,
                    updated_at: now,
                },
            );
        }
        let job = QueuedJob { id, task, payload };
        if self.tx.send(job).await.is_err() {
            lock_records(&self.records).remove(&id);
            return Err(SubmitError::QueueClosed);
        }
        Ok(id)
    }

    /// Never errors; an id this queue has not seen reports `unknown`.
    pub fn status(&self, id: Uuid) -> JobStatus {
        let guard = lock_records(&self.records);
        guard
            .get(&id)
            .map(|record| JobStatus::from_record(id, record))
            .unwrap_or_else(|| JobStatus::unknown(id))
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.registry.names()
    }
}

/// Workers share one receiver and each takes a single job at a time, so a
/// long job on one worker never starves the others of queued work.
async fn worker_loop(
    worker: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedJob>>>,
    records: Records,
    registry: TaskRegistry,
    hooks: JobHooks,
    config: JobQueueConfig,
) {
    loop {
        let job = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };
        let Some(job) = job else {
            break;
        };
        run_job(worker, job, &records, &registry, &hooks, &config).await;
    }
}

async fn run_job(
    worker: usize,
    job: QueuedJob,
    records: &Records,
    registry: &TaskRegistry,
    hooks: &JobHooks,
    config: &JobQueueConfig,
) {
    let Some(task_fn) = registry.get(job.task) else {
        let error = TaskError::not_found(format!("task {} is not registered", job.task));
        finish_failed(records, hooks, job.id, job.task, error);
        return;
    };

    let started = Instant::now();
    let mut attempt: u32 = 0;
    let outcome = loop {
        attempt += 1;
        {
            let mut guard = lock_records(records);
            if let Some(record) = guard.get_mut(&job.id) {
                record.state = JobState::Running;
                record.attempts = attempt;
                record.updated_at = Utc::now();
            }
        }
        info!(target = "rastro.jobs", worker, job_id = %job.id, task = job.task, attempt, "job attempt started");

        let context = TaskContext {
            job_id: job.id,
            attempt,
            progress: progress_reporter(job.id, records.clone()),
        };
        let result = supervise(
            (task_fn)(context, job.payload.clone()),
            job.id,
            job.task,
            config,
        )
        .await;

        match result {
            Ok(value) => break Ok(value),
            Err(error) if error.retryable() && attempt <= config.max_retries => {
                warn!(
                    target = "rastro.jobs",
                    job_id = %job.id,
                    task = job.task,
                    attempt,
                    kind = error.kind().as_str(),
                    error = %error,
                    delay_secs = config.retry_delay.as_secs(),
                    "attempt failed, retrying"
                );
                sleep(config.retry_delay).await;
            }
            Err(error) => break Err(error),
        }
    };

    metrics::job_elapsed(job.task, started.elapsed().as_millis());

    match outcome {
        Ok(result) => finish_succeeded(records, hooks, job.id, job.task, result),
        Err(error) => finish_failed(records, hooks, job.id, job.task, error),
    }
}

/// Races one attempt against the two time limits. The soft limit only
/// warns; the hard limit drops the future mid-flight.
async fn supervise(
    task: TaskFuture,
    job_id: Uuid,
    task_name: &str,
    config: &JobQueueConfig,
) -> TaskResult {
    let mut task = task;
    let soft = sleep(config.soft_time_limit);
    let hard = sleep(config.hard_time_limit);
    tokio::pin!(soft, hard);
    let mut soft_elapsed = false;
    loop {
        tokio::select! {
            result = &mut task => return result,
            _ = &mut soft, if !soft_elapsed => {
                soft_elapsed = true;
                warn!(
                    target = "rastro.jobs",
                    %job_id,
                    task = task_name,
                    limit_secs = config.soft_time_limit.as_secs(),
                    "soft time limit exceeded"
                );
            }
            _ = &mut hard => {
                return Err(TaskError::timed_out(config.hard_time_limit));
            }
        }
    }
}

fn progress_reporter(job_id: Uuid, records: Records) -> ProgressReporter {
    ProgressReporter::new(Arc::new(move |progress| {
        let mut guard = lock_records(&records);
        if let Some(record) = guard.get_mut(&job_id) {
            record.progress = Some(progress);
            record.updated_at = Utc::now();
        }
    }))
}

fn finish_succeeded(
    records: &Records,
    hooks: &JobHooks,
    job_id: Uuid,
    task: &'static str,
    result: Value,
) {
    {
        let mut guard = lock_records(records);
        if let Some(record) = guard.get_mut(&job_id) {
            record.state = JobState::Succeeded {
                result: result.clone(),
            };
            record.updated_at = Utc::now();
        }
    }
    (hooks.on_success)(job_id, task, &result);
}

fn finish_failed(
    records: &Records,
    hooks: &JobHooks,
    job_id: Uuid,
    task: &'static str,
    error: TaskError,
) {
    {
        let mut guard = lock_records(records);
        if let Some(record) = guard.get_mut(&job_id) {
            record.state = JobState::Failed {
                error: error.clone(),
            };
            record.updated_at = Utc::now();
        }
    }
    (hooks.on_failure)(job_id, task, &error);
}

fn env_count(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn quick_config() -> JobQueueConfig {
        JobQueueConfig {
            queue_capacity: 16,
            workers: 1,
            max_retries: 3,
            retry_delay: Duration::from_millis(5),
            soft_time_limit: Duration::from_secs(60),
            hard_time_limit: Duration::from_secs(120),
        }
    }

    fn echo_registry() -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry.register(
            "echo",
            Arc::new(|_context, payload| Box::pin(async move { Ok(json!({ "echo": payload })) })),
        );
        registry
    }

    async fn wait_terminal(queue: &JobQueue, id: Uuid) -> JobStatus {
        for _ in 0..400 {
            let status = queue.status(id);
            if status.state == "success" || status.state == "failure" {
                return status;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("job {id} never reached a terminal state");
    }

    #[tokio::test]
    async fn echo_job_succeeds() {
        let (queue, _handles) =
            JobQueue::spawn(echo_registry(), JobHooks::default(), quick_config());
        let id = queue.submit("echo", json!({"n": 1})).await.expect("submit");
        assert_eq!(queue.status(id).task, Some("echo"));

        let status = wait_terminal(&queue, id).await;
        assert_eq!(status.state, "success");
        assert_eq!(status.attempts, 1);
        assert_eq!(status.result, Some(json!({"echo": {"n": 1}})));
        assert!(status.info.is_none());
        assert!(status.queued_at.is_some());
    }

    #[tokio::test]
    async fn submit_rejects_unknown_tasks() {
        let (queue, _handles) =
            JobQueue::spawn(echo_registry(), JobHooks::default(), quick_config());
        let err = queue
            .submit("does_not_exist", json!({}))
            .await
            .expect_err("unknown task");
        assert!(matches!(err, SubmitError::UnknownTask(name) if name == "does_not_exist"));
    }

    #[tokio::test]
    async fn unseen_job_id_reports_unknown() {
        let (queue, _handles) =
            JobQueue::spawn(echo_registry(), JobHooks::default(), quick_config());
        let status = queue.status(Uuid::new_v4());
        assert!(status.is_unknown());
        assert_eq!(status.state, "unknown");
        assert_eq!(status.attempts, 0);
        assert!(status.task.is_none());
        assert!(status.result.is_none());
    }

    #[tokio::test]
    async fn retryable_failures_are_retried_until_exhausted() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_in_task = runs.clone();
        let mut registry = TaskRegistry::new();
        registry.register(
            "always_breaks",
            Arc::new(move |_context, _payload| {
                let runs = runs_in_task.clone();
                Box::pin(async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Err(TaskError::storage("disk on fire"))
                })
            }),
        );

        let failures = Arc::new(AtomicUsize::new(0));
        let failures_in_hook = failures.clone();
        let hooks = JobHooks {
            on_failure: Arc::new(move |_id, _task, _error| {
                failures_in_hook.fetch_add(1, Ordering::SeqCst);
            }),
            ..JobHooks::default()
        };

        let (queue, _handles) = JobQueue::spawn(registry, hooks, quick_config());
        let id = queue
            .submit("always_breaks", json!({}))
            .await
            .expect("submit");
        let status = wait_terminal(&queue, id).await;

        assert_eq!(status.state, "failure");
        // first attempt plus three retries
        assert_eq!(status.attempts, 4);
        assert_eq!(runs.load(Ordering::SeqCst), 4);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        let result = status.result.expect("failure detail");
        assert_eq!(result["reason"], json!("storage"));
        assert_eq!(result["error"], json!("disk on fire"));
    }

    #[tokio::test]
    async fn non_retryable_failures_stop_at_the_first_attempt() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_in_task = runs.clone();
        let mut registry = TaskRegistry::new();
        registry.register(
            "missing_record",
            Arc::new(move |_context, _payload| {
                let runs = runs_in_task.clone();
                Box::pin(async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Err(TaskError::not_found("no such product"))
                })
            }),
        );

        let (queue, _handles) = JobQueue::spawn(registry, JobHooks::default(), quick_config());
        let id = queue
            .submit("missing_record", json!({}))
            .await
            .expect("submit");
        let status = wait_terminal(&queue, id).await;

        assert_eq!(status.state, "failure");
        assert_eq!(status.attempts, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let result = status.result.expect("failure detail");
        assert_eq!(result["reason"], json!("not_found"));
    }

    #[tokio::test]
    async fn a_later_attempt_can_succeed() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_in_task = runs.clone();
        let mut registry = TaskRegistry::new();
        registry.register(
            "flaky",
            Arc::new(move |context, _payload| {
                let runs = runs_in_task.clone();
                Box::pin(async move {
                    if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(TaskError::upstream("first try breaks"))
                    } else {
                        Ok(json!({"attempt": context.attempt}))
                    }
                })
            }),
        );

        let successes = Arc::new(AtomicUsize::new(0));
        let successes_in_hook = successes.clone();
        let hooks = JobHooks {
            on_success: Arc::new(move |_id, _task, _result| {
                successes_in_hook.fetch_add(1, Ordering::SeqCst);
            }),
            ..JobHooks::default()
        };

        let (queue, _handles) = JobQueue::spawn(registry, hooks, quick_config());
        let id = queue.submit("flaky", json!({})).await.expect("submit");
        let status = wait_terminal(&queue, id).await;

        assert_eq!(status.state, "success");
        assert_eq!(status.attempts, 2);
        assert_eq!(status.result, Some(json!({"attempt": 2})));
        assert_eq!(successes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hard_time_limit_aborts_the_attempt() {
        let mut config = quick_config();
        config.soft_time_limit = Duration::from_millis(10);
        config.hard_time_limit = Duration::from_millis(20);

        let mut registry = TaskRegistry::new();
        registry.register(
            "sleeper",
            Arc::new(|_context, _payload| {
                Box::pin(async move {
                    sleep(Duration::from_secs(5)).await;
                    Ok(json!({"woke": true}))
                })
            }),
        );

        let (queue, _handles) = JobQueue::spawn(registry, JobHooks::default(), config);
        let id = queue.submit("sleeper", json!({})).await.expect("submit");
        let status = wait_terminal(&queue, id).await;

        assert_eq!(status.state, "failure");
        assert_eq!(status.attempts, 1);
        let result = status.result.expect("failure detail");
        assert_eq!(result["reason"], json!("timed_out"));
    }

    #[tokio::test]
    async fn one_worker_runs_jobs_in_submission_order() {
        let events = Arc::new(StdMutex::new(Vec::<String>::new()));
        let events_in_task = events.clone();
        let mut registry = TaskRegistry::new();
        registry.register(
            "record",
            Arc::new(move |_context, payload| {
                let events = events_in_task.clone();
                Box::pin(async move {
                    let label = payload["label"].as_str().unwrap_or("?").to_string();
                    events.lock().expect("events").push(format!("start {label}"));
                    sleep(Duration::from_millis(20)).await;
                    events.lock().expect("events").push(format!("end {label}"));
                    Ok(json!({"label": label}))
                })
            }),
        );

        let (queue, _handles) = JobQueue::spawn(registry, JobHooks::default(), quick_config());
        let first = queue
            .submit("record", json!({"label": "a"}))
            .await
            .expect("submit a");
        let second = queue
            .submit("record", json!({"label": "b"}))
            .await
            .expect("submit b");
        wait_terminal(&queue, first).await;
        wait_terminal(&queue, second).await;

        let seen = events.lock().expect("events").clone();
        assert_eq!(seen, vec!["start a", "end a", "start b", "end b"]);
    }

    #[tokio::test]
    async fn progress_reports_surface_in_status() {
        let mut registry = TaskRegistry::new();
        registry.register(
            "stepper",
            Arc::new(|context, _payload| {
                Box::pin(async move {
                    context.progress.report("halfway", "demo item", 50);
                    context.progress.report("done", "demo item", 250);
                    Ok(json!({"ok": true}))
                })
            }),
        );

        let (queue, _handles) = JobQueue::spawn(registry, JobHooks::default(), quick_config());
        let id = queue.submit("stepper", json!({})).await.expect("submit");
        let status = wait_terminal(&queue, id).await;

        let info = status.info.expect("progress recorded");
        assert_eq!(info.status, "done");
        assert_eq!(info.subject, "demo item");
        // reports are clamped to 100
        assert_eq!(info.percent, 100);
    }
}
