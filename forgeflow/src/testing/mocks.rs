//! Deterministic command executors for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::errors::CommandError;
use crate::pipeline::{CommandExecutor, CommandOutput, CommandRequest};

/// What a scripted step does when invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepScript {
    /// Succeed with this output.
    Succeed(String),
    /// Fail with this message; `times` limits how many calls fail before
    /// the step starts succeeding (`None` fails forever).
    Fail {
        /// Error text.
        message: String,
        /// Number of failing calls.
        times: Option<u32>,
    },
    /// Sleep, then succeed.
    Delay(Duration),
    /// Report a timeout immediately.
    Timeout,
    /// Panic with this message, as a broken executor would.
    Panic(String),
}

impl StepScript {
    /// Always succeeds with `output`.
    #[must_use]
    pub fn succeed(output: impl Into<String>) -> Self {
        Self::Succeed(output.into())
    }

    /// Always fails with `message`.
    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail {
            message: message.into(),
            times: None,
        }
    }

    /// Fails the first `times` calls, then succeeds.
    #[must_use]
    pub fn fail_times(times: u32, message: impl Into<String>) -> Self {
        Self::Fail {
            message: message.into(),
            times: Some(times),
        }
    }

    /// Sleeps for `duration`, then succeeds.
    #[must_use]
    pub fn delay(duration: Duration) -> Self {
        Self::Delay(duration)
    }

    /// Reports a timeout without waiting.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Panics with `message` when invoked.
    #[must_use]
    pub fn panic(message: impl Into<String>) -> Self {
        Self::Panic(message.into())
    }
}

type ScriptKey = (String, Option<String>);

/// An executor whose outcome per step is scripted up front.
///
/// Unscripted steps succeed with `"ok: <step id>"`. Scripts can be scoped to
/// a version so a rollback can succeed where the forward deploy failed.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<ScriptKey, StepScript>>,
    calls: Mutex<HashMap<String, u32>>,
    requests: Mutex<Vec<CommandRequest>>,
}

impl ScriptedExecutor {
    /// Creates an executor where every step succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts a step for every version.
    pub fn script(&self, step_id: impl Into<String>, script: StepScript) {
        self.scripts.lock().insert((step_id.into(), None), script);
    }

    /// Scripts a step for one version only.
    pub fn script_for_version(
        &self,
        step_id: impl Into<String>,
        version: impl Into<String>,
        script: StepScript,
    ) {
        self.scripts
            .lock()
            .insert((step_id.into(), Some(version.into())), script);
    }

    /// Number of invocations of one step.
    #[must_use]
    pub fn calls_for(&self, step_id: &str) -> u32 {
        self.calls.lock().get(step_id).copied().unwrap_or(0)
    }

    /// Number of invocations across all steps.
    #[must_use]
    pub fn total_calls(&self) -> u32 {
        self.calls.lock().values().sum()
    }

    /// Every request received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<CommandRequest> {
        self.requests.lock().clone()
    }

    fn resolve(&self, request: &CommandRequest) -> Option<StepScript> {
        let version = request.env.get("FORGEFLOW_VERSION").cloned();
        let scripts = self.scripts.lock();
        scripts
            .get(&(request.step_id.clone(), version))
            .or_else(|| scripts.get(&(request.step_id.clone(), None)))
            .cloned()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(&self, request: &CommandRequest) -> Result<CommandOutput, CommandError> {
        let call = {
            let mut calls = self.calls.lock();
            let count = calls.entry(request.step_id.clone()).or_insert(0);
            *count += 1;
            *count
        };
        self.requests.lock().push(request.clone());

        match self.resolve(request) {
            None => Ok(CommandOutput::stdout(format!("ok: {}", request.step_id))),
            Some(StepScript::Succeed(output)) => Ok(CommandOutput::stdout(output)),
            Some(StepScript::Fail { message, times }) => match times {
                Some(limit) if call > limit => {
                    Ok(CommandOutput::stdout(format!("ok: {}", request.step_id)))
                }
                _ => Err(CommandError::failed(message)),
            },
            Some(StepScript::Delay(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(CommandOutput::stdout(format!("ok: {}", request.step_id)))
            }
            Some(StepScript::Timeout) => Err(CommandError::Timeout {
                timeout_ms: u64::try_from(request.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            Some(StepScript::Panic(message)) => panic!("{message}"),
        }
    }
}

struct RunningGuard<'a> {
    running: &'a AtomicUsize,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An executor that parks every command until the test releases it.
///
/// Tracks how many commands run at once, which makes concurrency limits
/// observable without timing assumptions.
#[derive(Debug)]
pub struct BlockingExecutor {
    gate: Arc<Semaphore>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    started: AtomicUsize,
}

impl Default for BlockingExecutor {
    fn default() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
        }
    }
}

impl BlockingExecutor {
    /// Creates an executor with every command parked.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets `n` parked or future commands finish successfully.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Lets every command finish from now on.
    pub fn release_all(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    /// Commands currently parked.
    #[must_use]
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest number of commands ever parked at once.
    #[must_use]
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// Commands started so far.
    #[must_use]
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Waits until at least `n` commands are parked, or `timeout` elapses.
    pub async fn wait_for_running(&self, n: usize, timeout: Duration) -> bool {
        let poll = async {
            while self.running() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }
}

#[async_trait]
impl CommandExecutor for BlockingExecutor {
    async fn execute(&self, request: &CommandRequest) -> Result<CommandOutput, CommandError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard {
            running: &self.running,
        };

        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| CommandError::Spawn(e.to_string()))?;
        permit.forget();
        Ok(CommandOutput::stdout(format!("released: {}", request.step_id)))
    }
}
