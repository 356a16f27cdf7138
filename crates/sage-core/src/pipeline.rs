//! Batch pipeline invoker
//!
//! The reserved pipeline directive runs a fixed ordered list of batch
//! stages as subprocesses in a shared working directory. Stages run
//! sequentially and stop on the first failure; the aggregated, labeled
//! log is the tool result either way. Progress goes through the same
//! channel the task runner uses, so the UI experience is uniform.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

use crate::progress::ProgressSender;

/// One batch stage: a label plus the command to invoke.
#[derive(Debug, Clone)]
pub struct PipelineStage {
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
}

impl PipelineStage {
    pub fn new(label: impl Into<String>, program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// The command line as shown in progress and log output.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// A fixed ordered sequence of batch stages.
#[derive(Debug, Clone)]
pub struct BatchPipeline {
    stages: Vec<PipelineStage>,
    workdir: PathBuf,
}

impl BatchPipeline {
    pub fn new(stages: Vec<PipelineStage>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            stages,
            workdir: workdir.into(),
        }
    }

    /// The seven-stage analysis pipeline: load, impute, feature, train,
    /// evaluate, explain, predict.
    pub fn analysis_default(workdir: impl Into<PathBuf>) -> Self {
        let stages = [
            ("load", "pipeline.1_load"),
            ("impute", "pipeline.2_impute"),
            ("feature", "pipeline.3_feature"),
            ("train", "pipeline.4_train"),
            ("evaluate", "pipeline.5_evaluate"),
            ("explain", "pipeline.6_explain"),
            ("predict", "pipeline.7_predict"),
        ]
        .into_iter()
        .map(|(label, module)| PipelineStage::new(label, "python", &["-m", module]))
        .collect();
        Self::new(stages, workdir)
    }

    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    /// Run all stages in order, stopping at the first failure.
    ///
    /// Returns the aggregated log; a failed stage's output is included,
    /// stages after it are never started. This never returns an error:
    /// an incomplete log is still a valid tool result.
    pub async fn run(&self, progress: &ProgressSender) -> String {
        let total = self.stages.len();
        let mut logs = Vec::with_capacity(total);

        for (index, stage) in self.stages.iter().enumerate() {
            let step = index + 1;
            progress.send(format!(
                "[{}/{}] running: {} ({})",
                step,
                total,
                stage.command_line(),
                stage.label
            ));
            tracing::info!(stage = %stage.label, "starting pipeline stage");

            let started = Instant::now();
            let output = Command::new(&stage.program)
                .args(&stage.args)
                .current_dir(&self.workdir)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await;

            match output {
                Ok(output) => {
                    let elapsed = started.elapsed().as_secs_f64();
                    let succeeded = output.status.success();
                    let status = if succeeded { "success" } else { "failure" };
                    progress.send(format!(
                        "[{}/{}] {} {} (elapsed: {:.2}s)",
                        step, total, stage.label, status, elapsed
                    ));

                    let stdout = String::from_utf8_lossy(&output.stdout);
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    logs.push(format!(
                        "$ {}\nstatus: {} (elapsed: {:.2}s)\n--- output ---\n{}{}",
                        stage.command_line(),
                        status,
                        elapsed,
                        stdout,
                        stderr
                    ));

                    if !succeeded {
                        tracing::error!(
                            stage = %stage.label,
                            code = output.status.code().unwrap_or(-1),
                            "pipeline stage failed, stopping remaining stages"
                        );
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(stage = %stage.label, "failed to spawn pipeline stage: {}", e);
                    progress.send(format!(
                        "[{}/{}] {} failed to start: {}",
                        step, total, stage.label, e
                    ));
                    logs.push(format!("$ {}\nfailed to spawn: {}", stage.command_line(), e));
                    break;
                }
            }
        }

        progress.send("Pipeline run finished");
        logs.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::progress_channel;

    fn sh(label: &str, script: &str) -> PipelineStage {
        PipelineStage::new(label, "sh", &["-c", script])
    }

    #[tokio::test]
    async fn test_all_stages_run_and_capture_output() {
        let pipeline = BatchPipeline::new(
            vec![sh("one", "echo first"), sh("two", "echo second >&2")],
            std::env::temp_dir(),
        );
        let (progress, _rx, log) = progress_channel();

        let result = pipeline.run(&progress).await;

        assert!(result.contains("first"));
        assert!(result.contains("second"));
        assert_eq!(result.matches("$ sh -c").count(), 2);
        assert!(log.joined().contains("[2/2] two success"));
    }

    #[tokio::test]
    async fn test_stop_on_first_failure() {
        let pipeline = BatchPipeline::new(
            vec![
                sh("one", "echo ran-one"),
                sh("two", "exit 3"),
                sh("three", "echo ran-three"),
            ],
            std::env::temp_dir(),
        );
        let (progress, _rx, log) = progress_channel();

        let result = pipeline.run(&progress).await;

        // Stages 1..=k are in the log, k+1.. never started
        assert!(result.contains("ran-one"));
        assert!(result.contains("status: failure"));
        assert!(!result.contains("ran-three"));
        assert_eq!(result.matches("$ sh -c").count(), 2);
        assert!(!log.joined().contains("[3/3]"));
    }

    #[tokio::test]
    async fn test_spawn_failure_stops_pipeline() {
        let pipeline = BatchPipeline::new(
            vec![
                PipelineStage::new("missing", "definitely-not-a-real-binary", &[]),
                sh("after", "echo after"),
            ],
            std::env::temp_dir(),
        );
        let (progress, _rx, _log) = progress_channel();

        let result = pipeline.run(&progress).await;

        assert!(result.contains("failed to spawn"));
        assert!(!result.contains("after\n"));
    }

    #[tokio::test]
    async fn test_progress_reported_per_stage() {
        let pipeline = BatchPipeline::new(vec![sh("only", "true")], std::env::temp_dir());
        let (progress, _rx, log) = progress_channel();

        pipeline.run(&progress).await;

        let messages = log.snapshot();
        assert!(messages[0].contains("[1/1] running:"));
        assert!(messages[1].contains("[1/1] only success"));
        assert_eq!(messages.last().unwrap(), "Pipeline run finished");
    }

    #[test]
    fn test_default_pipeline_shape() {
        let pipeline = BatchPipeline::analysis_default(".");
        let labels: Vec<&str> = pipeline.stages().iter().map(|s| s.label.as_str()).collect();
        assert_eq!(
            labels,
            ["load", "impute", "feature", "train", "evaluate", "explain", "predict"]
        );
        assert_eq!(pipeline.stages()[0].command_line(), "python -m pipeline.1_load");
    }
}
