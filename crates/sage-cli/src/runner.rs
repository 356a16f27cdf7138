//! Subprocess-backed task runner
//!
//! Executes the configured external command with the directive payload
//! as its final argument, relaying stdout lines as progress and
//! returning the collected output as the tool result. `cleanup` kills
//! the child if it is still running, so a timed-out execution never
//! leaves an orphan process behind.

use async_trait::async_trait;
use sage_core::{ProgressSender, RunnerFactory, TaskError, TaskRunner};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::config::Config;

pub struct CommandRunner {
    program: String,
    args: Vec<String>,
    child: Option<Child>,
    progress: Option<ProgressSender>,
}

#[async_trait]
impl TaskRunner for CommandRunner {
    async fn run(&mut self, prompt: &str) -> Result<String, TaskError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TaskError::Execution(format!("failed to spawn {}: {}", self.program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TaskError::Execution("child stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TaskError::Execution("child stderr unavailable".to_string()))?;
        self.child = Some(child);

        // Stderr is drained concurrently so a chatty child never blocks
        // on a full pipe.
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push(line);
            }
            collected
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut output = Vec::new();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| TaskError::Execution(format!("failed to read output: {}", e)))?
        {
            if let Some(progress) = &self.progress {
                progress.send(line.clone());
            }
            output.push(line);
        }

        let status = self
            .child
            .as_mut()
            .expect("child set above")
            .wait()
            .await
            .map_err(|e| TaskError::Execution(format!("failed to wait for child: {}", e)))?;
        let stderr_output = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let detail = if stderr_output.is_empty() {
                String::new()
            } else {
                format!(": {}", stderr_output.join("\n"))
            };
            return Err(TaskError::Execution(format!(
                "runner exited with {}{}",
                status, detail
            )));
        }

        Ok(output.join("\n"))
    }

    async fn cleanup(&mut self) -> Result<(), TaskError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        match child.try_wait() {
            Ok(Some(_)) => Ok(()),
            _ => {
                tracing::warn!("task runner still alive at cleanup, killing");
                child
                    .kill()
                    .await
                    .map_err(|e| TaskError::Cleanup(format!("failed to kill child: {}", e)))
            }
        }
    }

    fn set_progress(&mut self, progress: ProgressSender) {
        self.progress = Some(progress);
    }
}

/// Builds a fresh [`CommandRunner`] per tool request.
pub struct CommandRunnerFactory {
    program: Option<String>,
    args: Vec<String>,
}

impl CommandRunnerFactory {
    pub fn new(program: Option<String>, args: Vec<String>) -> Self {
        Self { program, args }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.runner.program.clone(), config.runner.args.clone())
    }
}

impl RunnerFactory for CommandRunnerFactory {
    fn create(&self) -> Result<Box<dyn TaskRunner>, TaskError> {
        let program = self
            .program
            .clone()
            .ok_or_else(|| TaskError::Init("no task runner command configured".to_string()))?;
        Ok(Box::new(CommandRunner {
            program,
            args: self.args.clone(),
            child: None,
            progress: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sage_core::progress_channel;
    use std::time::Duration;

    fn sh_factory(script: &str) -> CommandRunnerFactory {
        CommandRunnerFactory::new(
            Some("sh".to_string()),
            vec!["-c".to_string(), script.to_string()],
        )
    }

    #[tokio::test]
    async fn test_collects_stdout_and_relays_progress() {
        // "$0" consumes the appended payload argument
        let factory = sh_factory("echo line one; echo line two");
        let mut runner = factory.create().unwrap();
        let (progress, mut rx, _log) = progress_channel();
        runner.set_progress(progress);

        let result = runner.run("payload").await.unwrap();
        runner.cleanup().await.unwrap();

        assert_eq!(result, "line one\nline two");
        assert_eq!(rx.try_recv().unwrap(), "line one");
        assert_eq!(rx.try_recv().unwrap(), "line two");
    }

    #[tokio::test]
    async fn test_payload_reaches_child() {
        let factory = sh_factory("echo \"got: $0\"");
        let mut runner = factory.create().unwrap();

        let result = runner.run("the payload").await.unwrap();
        runner.cleanup().await.unwrap();

        assert_eq!(result, "got: the payload");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_execution_error_with_stderr() {
        let factory = sh_factory("echo oops >&2; exit 7");
        let mut runner = factory.create().unwrap();

        let err = runner.run("x").await.unwrap_err();
        runner.cleanup().await.unwrap();

        let message = err.to_string();
        assert!(message.contains("runner exited with"));
        assert!(message.contains("oops"));
    }

    #[tokio::test]
    async fn test_cleanup_kills_hung_child() {
        let mut runner = CommandRunner {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "echo started; sleep 600".to_string()],
            child: None,
            progress: None,
        };

        let outcome = tokio::time::timeout(Duration::from_millis(100), runner.run("x")).await;
        assert!(outcome.is_err(), "runner should still be waiting on the child");

        runner.cleanup().await.unwrap();
        assert!(runner.child.is_none());

        // A second cleanup has nothing left to do
        runner.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_program_is_init_error() {
        let factory = CommandRunnerFactory::new(None, vec![]);
        let err = factory.create().err().unwrap();
        assert!(matches!(err, TaskError::Init(_)));
    }
}
