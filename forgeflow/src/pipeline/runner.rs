//! Step runner: one step, its timeout and its retry budget.

use super::{CommandExecutor, CommandRequest, RetryConfig};
use crate::core::{LogEntry, LogLevel, StepRun, StepStatus, StepTemplate, Target};
use crate::errors::{CommandError, ForgeflowError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The slice of a job a step run needs.
#[derive(Debug)]
pub struct StepContext<'a> {
    /// Owning job.
    pub job_id: &'a str,
    /// Target being run.
    pub target: &'a Target,
    /// Requested version.
    pub version: &'a str,
    /// The owning job's log; the runner appends one entry per step.
    pub logs: &'a mut Vec<LogEntry>,
}

/// Executes single steps through a [`CommandExecutor`].
#[derive(Clone)]
pub struct StepRunner {
    executor: Arc<dyn CommandExecutor>,
    retry: RetryConfig,
}

impl StepRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(executor: Arc<dyn CommandExecutor>, retry: RetryConfig) -> Self {
        Self { executor, retry }
    }

    /// Runs a step until it succeeds or its attempts are exhausted.
    ///
    /// Never returns an error: the outcome is the returned run's status.
    pub async fn run(&self, template: &StepTemplate, ctx: &mut StepContext<'_>) -> StepRun {
        let mut run = StepRun::pending(template);
        run.start();

        let max_attempts = template.max_attempts();
        let mut last_error: Option<ForgeflowError> = None;

        while run.attempts < max_attempts {
            if run.attempts > 0 {
                let delay = self.retry.delay_for(run.attempts - 1);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            run.attempts += 1;

            debug!(
                job_id = %ctx.job_id,
                step_id = %template.id,
                attempt = run.attempts,
                max_attempts,
                "Running step attempt"
            );

            match self.attempt(template, ctx, run.attempts).await {
                Ok(output) => {
                    run.output = Some(output);
                    run.error = None;
                    run.finish(StepStatus::Completed);
                    info!(
                        job_id = %ctx.job_id,
                        step_id = %template.id,
                        attempts = run.attempts,
                        duration_ms = run.duration_ms,
                        "Step completed"
                    );
                    ctx.logs.push(
                        LogEntry::new(
                            LogLevel::Info,
                            "runner",
                            format!(
                                "Step '{}' completed in {}ms after {} attempt(s)",
                                template.name, run.duration_ms, run.attempts
                            ),
                        )
                        .for_step(&template.id),
                    );
                    return run;
                }
                Err(err) => {
                    if run.attempts < max_attempts {
                        warn!(
                            job_id = %ctx.job_id,
                            step_id = %template.id,
                            attempt = run.attempts,
                            error = %err,
                            "Step attempt failed; retrying"
                        );
                    }
                    last_error = Some(err);
                }
            }
        }

        let message = last_error
            .map_or_else(|| "step made no attempts".to_string(), |e| e.to_string());
        run.error = Some(message.clone());
        run.finish(StepStatus::Failed);
        warn!(
            job_id = %ctx.job_id,
            step_id = %template.id,
            attempts = run.attempts,
            error = %message,
            "Step failed"
        );
        ctx.logs.push(
            LogEntry::new(
                LogLevel::Error,
                "runner",
                format!(
                    "Step '{}' failed after {} attempt(s): {}",
                    template.name, run.attempts, message
                ),
            )
            .for_step(&template.id),
        );
        run
    }

    async fn attempt(
        &self,
        template: &StepTemplate,
        ctx: &StepContext<'_>,
        attempt: u32,
    ) -> Result<String, ForgeflowError> {
        let request = build_request(template, ctx, attempt);
        let timeout_error = || ForgeflowError::StepTimeout {
            step: template.id.clone(),
            timeout_ms: template.timeout_ms,
        };

        // the executor is trusted to honour the budget, this bounds it regardless
        match tokio::time::timeout(template.timeout(), self.executor.execute(&request)).await {
            Ok(Ok(output)) => Ok(output.combined()),
            Ok(Err(CommandError::Timeout { .. })) | Err(_) => Err(timeout_error()),
            Ok(Err(err)) => Err(ForgeflowError::StepExecutionFailed {
                step: template.id.clone(),
                reason: err.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for StepRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRunner")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

fn build_request(template: &StepTemplate, ctx: &StepContext<'_>, attempt: u32) -> CommandRequest {
    let output_dir = &ctx.target.output_dir;
    let working_dir = (!output_dir.is_empty() && Path::new(output_dir).is_dir())
        .then(|| Path::new(output_dir).to_path_buf());

    let env = HashMap::from([
        ("FORGEFLOW_JOB_ID".to_string(), ctx.job_id.to_string()),
        ("FORGEFLOW_TARGET_ID".to_string(), ctx.target.id.clone()),
        ("FORGEFLOW_VERSION".to_string(), ctx.version.to_string()),
        ("FORGEFLOW_STEP_ID".to_string(), template.id.clone()),
        ("FORGEFLOW_OUTPUT_DIR".to_string(), output_dir.clone()),
        ("FORGEFLOW_ATTEMPT".to_string(), attempt.to_string()),
    ]);

    CommandRequest {
        job_id: ctx.job_id.to_string(),
        target_id: ctx.target.id.clone(),
        step_id: template.id.clone(),
        command: template.command.clone(),
        timeout: template.timeout(),
        working_dir,
        env,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StepKind;
    use crate::testing::{ScriptedExecutor, StepScript};
    use std::time::Duration;

    fn target() -> Target {
        Target::build("web").with_step(StepTemplate::new("test", StepKind::Test, "npm test"))
    }

    async fn run_step(
        executor: Arc<ScriptedExecutor>,
        template: &StepTemplate,
    ) -> (StepRun, Vec<LogEntry>) {
        let runner = StepRunner::new(executor, RetryConfig::default());
        let target = target();
        let mut logs = Vec::new();
        let mut ctx = StepContext {
            job_id: "job-1",
            target: &target,
            version: "1.0.0",
            logs: &mut logs,
        };
        let run = runner.run(template, &mut ctx).await;
        (run, logs)
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.script("test", StepScript::succeed("all green"));
        let template = StepTemplate::new("test", StepKind::Test, "npm test");

        let (run, logs) = run_step(executor.clone(), &template).await;

        assert_eq!(run.status, StepStatus::Completed);
        assert_eq!(run.attempts, 1);
        assert_eq!(run.output.as_deref(), Some("all green"));
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, LogLevel::Info);
        assert_eq!(logs[0].step_id.as_deref(), Some("test"));
        assert_eq!(executor.calls_for("test"), 1);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.script("test", StepScript::fail_times(2, "flaky"));
        let template = StepTemplate::new("test", StepKind::Test, "npm test").with_max_retries(2);

        let (run, logs) = run_step(executor.clone(), &template).await;

        assert_eq!(run.status, StepStatus::Completed);
        assert_eq!(run.attempts, 3);
        assert_eq!(logs.len(), 1);
        assert_eq!(executor.calls_for("test"), 3);
    }

    #[tokio::test]
    async fn test_exhausts_retry_budget() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.script("test", StepScript::fail("assertion failed"));
        let template = StepTemplate::new("test", StepKind::Test, "npm test").with_max_retries(1);

        let (run, logs) = run_step(executor.clone(), &template).await;

        assert_eq!(run.status, StepStatus::Failed);
        assert_eq!(run.attempts, 2);
        assert!(run.error.as_deref().unwrap().contains("assertion failed"));
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, LogLevel::Error);
        assert_eq!(executor.calls_for("test"), 2);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_attempt() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.script("test", StepScript::delay(Duration::from_secs(5)));
        let template = StepTemplate::new("test", StepKind::Test, "npm test")
            .with_timeout_ms(20)
            .with_max_retries(1);

        let (run, _) = run_step(executor.clone(), &template).await;

        assert_eq!(run.status, StepStatus::Failed);
        assert_eq!(run.attempts, 2);
        assert!(run.error.as_deref().unwrap().contains("timed out after 20ms"));
    }

    #[tokio::test]
    async fn test_executor_reported_timeout_maps_to_step_timeout() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.script("test", StepScript::timeout());
        let template = StepTemplate::new("test", StepKind::Test, "npm test").with_timeout_ms(1_000);

        let (run, _) = run_step(executor, &template).await;

        assert_eq!(run.status, StepStatus::Failed);
        assert!(run.error.as_deref().unwrap().contains("timed out"));
    }

    #[test]
    fn test_request_env() {
        let target = target();
        let mut logs = Vec::new();
        let ctx = StepContext {
            job_id: "job-9",
            target: &target,
            version: "2.0.0",
            logs: &mut logs,
        };
        let template = StepTemplate::new("test", StepKind::Test, "npm test");
        let request = build_request(&template, &ctx, 2);
        assert_eq!(request.env["FORGEFLOW_VERSION"], "2.0.0");
        assert_eq!(request.env["FORGEFLOW_ATTEMPT"], "2");
        assert!(request.working_dir.is_none());
    }
}
