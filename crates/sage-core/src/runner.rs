//! Task-runner adapter
//!
//! Wraps an external long-running agent behind [`TaskRunner`] and turns
//! every failure mode into descriptive result text: tool failures are
//! recoverable at this layer, they become content rather than errors.
//! `cleanup()` runs exactly once per execution, on every exit path.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::progress::ProgressSender;

/// Default wall-clock ceiling for one task execution.
pub const DEFAULT_TASK_CEILING: Duration = Duration::from_secs(300);

/// Failures a task runner can report.
#[derive(Error, Debug)]
pub enum TaskError {
    /// The external engine could not be constructed
    #[error("runner initialization failed: {0}")]
    Init(String),

    /// The run itself failed
    #[error("task execution failed: {0}")]
    Execution(String),

    /// Resource teardown failed (logged, never overrides a result)
    #[error("runner cleanup failed: {0}")]
    Cleanup(String),
}

/// A stateful external task executor.
///
/// One instance serves one execution: the adapter constructs a fresh
/// runner per request through [`RunnerFactory`].
#[async_trait]
pub trait TaskRunner: Send {
    /// Execute the task described by `prompt`, returning its result text.
    async fn run(&mut self, prompt: &str) -> Result<String, TaskError>;

    /// Release any resources held by the runner.
    async fn cleanup(&mut self) -> Result<(), TaskError>;

    /// Install a progress sender. Runners that report no progress can
    /// keep the default no-op.
    fn set_progress(&mut self, _progress: ProgressSender) {}
}

/// Constructs a fresh [`TaskRunner`] per execution.
pub trait RunnerFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn TaskRunner>, TaskError>;
}

/// Drive one task execution end to end.
///
/// Never fails: initialization errors, empty prompts, execution errors,
/// and timeouts all come back as descriptive result strings. The
/// timeout result embeds whatever progress was captured. The runner is
/// not forcibly killed on timeout; its work is simply no longer
/// observed.
pub async fn execute_with_progress(
    factory: &dyn RunnerFactory,
    prompt: &str,
    progress: ProgressSender,
    ceiling: Duration,
) -> String {
    if prompt.trim().is_empty() {
        tracing::warn!("received empty tool request");
        progress.send("Tool request content is empty");
        return "Tool request content is empty, cannot process".to_string();
    }

    let mut runner = match factory.create() {
        Ok(runner) => runner,
        Err(e) => {
            tracing::error!("failed to initialize task runner: {}", e);
            progress.send(format!("Tool initialization error: {}", e));
            return format!("Tool initialization failed: {}", e);
        }
    };

    runner.set_progress(progress.clone());
    progress.send("Task runner initialized");
    progress.send(format!(
        "Starting execution with prompt: {}...",
        truncate(prompt, 100)
    ));

    let outcome = tokio::time::timeout(ceiling, runner.run(prompt)).await;

    // Exactly-once teardown, regardless of how the run ended.
    match runner.cleanup().await {
        Ok(()) => progress.send("Resource cleanup complete"),
        Err(e) => {
            tracing::warn!("task runner cleanup failed: {}", e);
            progress.send(format!("Cleanup warning: {}", e));
        }
    }

    match outcome {
        Ok(Ok(result)) => {
            tracing::info!("task execution completed");
            progress.send("Tool execution completed successfully");
            result
        }
        Ok(Err(e)) => {
            tracing::error!("task execution failed: {}", e);
            progress.send(format!("Error during execution: {}", e));
            format!("Tool execution failed: {}", e)
        }
        Err(_) => {
            tracing::error!("task execution timed out after {:?}", ceiling);
            let captured = progress.log().joined();
            let captured = if captured.is_empty() {
                "No progress information available".to_string()
            } else {
                captured
            };
            format!(
                "Tool execution timeout, gave up after {} seconds.\n\nLast recorded progress:\n{}",
                ceiling.as_secs(),
                captured
            )
        }
    }
}

/// Char-boundary-safe prefix of `text` up to `max` characters.
fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::progress_channel;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted runner that counts cleanup calls.
    struct ScriptedRunner {
        behavior: Behavior,
        cleanups: Arc<AtomicU32>,
        progress: Option<ProgressSender>,
    }

    #[derive(Clone)]
    enum Behavior {
        Succeed(String),
        Fail(String),
        Hang,
        ProgressThenSucceed(Vec<String>, String),
    }

    #[async_trait]
    impl TaskRunner for ScriptedRunner {
        async fn run(&mut self, _prompt: &str) -> Result<String, TaskError> {
            match self.behavior.clone() {
                Behavior::Succeed(result) => Ok(result),
                Behavior::Fail(message) => Err(TaskError::Execution(message)),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok("never".to_string())
                }
                Behavior::ProgressThenSucceed(messages, result) => {
                    if let Some(progress) = &self.progress {
                        for message in messages {
                            progress.send(message);
                        }
                    }
                    Ok(result)
                }
            }
        }

        async fn cleanup(&mut self) -> Result<(), TaskError> {
            self.cleanups.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn set_progress(&mut self, progress: ProgressSender) {
            self.progress = Some(progress);
        }
    }

    struct ScriptedFactory {
        behavior: Option<Behavior>,
        cleanups: Arc<AtomicU32>,
        creations: Arc<AtomicU32>,
    }

    impl ScriptedFactory {
        fn new(behavior: Option<Behavior>) -> Self {
            Self {
                behavior,
                cleanups: Arc::new(AtomicU32::new(0)),
                creations: Arc::new(AtomicU32::new(0)),
            }
        }
    }

    impl RunnerFactory for ScriptedFactory {
        fn create(&self) -> Result<Box<dyn TaskRunner>, TaskError> {
            self.creations.fetch_add(1, Ordering::Relaxed);
            match &self.behavior {
                Some(behavior) => Ok(Box::new(ScriptedRunner {
                    behavior: behavior.clone(),
                    cleanups: self.cleanups.clone(),
                    progress: None,
                })),
                None => Err(TaskError::Init("engine unavailable".to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_success_cleans_up_once() {
        let factory = ScriptedFactory::new(Some(Behavior::Succeed("result-X".into())));
        let (progress, _rx, _log) = progress_channel();

        let result =
            execute_with_progress(&factory, "search X", progress, DEFAULT_TASK_CEILING).await;

        assert_eq!(result, "result-X");
        assert_eq!(factory.cleanups.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_execution_failure_becomes_text_and_cleans_up_once() {
        let factory = ScriptedFactory::new(Some(Behavior::Fail("engine crashed".into())));
        let (progress, _rx, _log) = progress_channel();

        let result =
            execute_with_progress(&factory, "do thing", progress, DEFAULT_TASK_CEILING).await;

        assert!(result.starts_with("Tool execution failed:"));
        assert!(result.contains("engine crashed"));
        assert_eq!(factory.cleanups.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_timeout_includes_progress_and_cleans_up_once() {
        let factory = ScriptedFactory::new(Some(Behavior::Hang));
        let (progress, _rx, log) = progress_channel();

        let result = execute_with_progress(
            &factory,
            "slow thing",
            progress,
            Duration::from_millis(20),
        )
        .await;

        assert!(result.contains("Tool execution timeout"));
        assert!(result.contains("Task runner initialized"));
        assert_eq!(factory.cleanups.load(Ordering::Relaxed), 1);
        // Cleanup still ran and logged after the timeout
        assert!(log.joined().contains("Resource cleanup complete"));
    }

    #[tokio::test]
    async fn test_init_failure_becomes_text() {
        let factory = ScriptedFactory::new(None);
        let (progress, _rx, _log) = progress_channel();

        let result = execute_with_progress(&factory, "x", progress, DEFAULT_TASK_CEILING).await;

        assert!(result.starts_with("Tool initialization failed:"));
        assert!(result.contains("engine unavailable"));
        assert_eq!(factory.cleanups.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_empty_prompt_short_circuits() {
        let factory = ScriptedFactory::new(Some(Behavior::Succeed("unused".into())));
        let (progress, _rx, _log) = progress_channel();

        let result = execute_with_progress(&factory, "   ", progress, DEFAULT_TASK_CEILING).await;

        assert_eq!(result, "Tool request content is empty, cannot process");
        assert_eq!(factory.creations.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_runner_progress_reaches_channel() {
        let factory = ScriptedFactory::new(Some(Behavior::ProgressThenSucceed(
            vec!["step 1".into(), "step 2".into()],
            "done".into(),
        )));
        let (progress, mut rx, _log) = progress_channel();

        let result = execute_with_progress(&factory, "x", progress, DEFAULT_TASK_CEILING).await;
        assert_eq!(result, "done");

        let mut seen = Vec::new();
        while let Ok(message) = rx.try_recv() {
            seen.push(message);
        }
        assert!(seen.iter().any(|m| m == "step 1"));
        assert!(seen.iter().any(|m| m == "step 2"));
    }

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("short", 100), "short");
    }
}
