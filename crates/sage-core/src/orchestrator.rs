//! Conversation state machine
//!
//! One turn: append the user message, stream the first completion pass
//! into a pending assistant message, extract the directive, optionally
//! drive the task runner or batch pipeline while folding progress into
//! the pending message, stream the summary pass, and finish with a
//! `generating=false` snapshot. The conversation is passed in by value
//! and returned grown by exactly one user and one assistant message per
//! completed turn.
//!
//! The snapshot stream is lazy: dropping it stops the turn, and the
//! caller's last observed snapshot is always a consistent conversation.

use async_stream::stream;
use futures::StreamExt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::Stream;

use sage_ai::{ChatMessage, CompletionClient, CompletionRequest, Role};

use crate::directive::{self, Status};
use crate::pipeline::BatchPipeline;
use crate::progress::progress_channel;
use crate::prompts;
use crate::runner::{self, RunnerFactory};
use crate::section::PendingContent;

/// Ordered conversation history, oldest first.
pub type Conversation = Vec<ChatMessage>;

/// One observation of the orchestrator's state during a turn.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub conversation: Conversation,
    pub generating: bool,
}

/// The sequence of snapshots yielded across one turn.
pub type SnapshotStream = Pin<Box<dyn Stream<Item = Snapshot> + Send>>;

/// Tuning knobs for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Model identifier sent with every completion request
    pub model: String,
    /// System prompt prepended to both passes
    pub system_prompt: String,
    /// Max tokens per completion pass
    pub max_tokens: u32,
    /// Timeout for each completion request
    pub request_timeout: Duration,
    /// Pacing delay between streamed deltas so a UI is not overwhelmed
    pub delta_interval: Duration,
    /// Wall-clock ceiling for one task execution
    pub task_ceiling: Duration,
    /// Directive visibility override; `None` reads the process-wide
    /// default at extraction time
    pub hide_directives: Option<bool>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model: "deepseek-chat".to_string(),
            system_prompt: prompts::default_system_prompt(),
            max_tokens: 512,
            request_timeout: Duration::from_secs(30),
            delta_interval: Duration::from_millis(50),
            task_ceiling: runner::DEFAULT_TASK_CEILING,
            hide_directives: None,
        }
    }
}

impl OrchestratorConfig {
    fn hide(&self) -> bool {
        self.hide_directives.unwrap_or_else(directive::hide_default)
    }
}

/// The central orchestrator. Cheap to construct; one instance can serve
/// many independent conversations, but at most one turn may be in
/// flight per conversation at a time.
pub struct Orchestrator {
    config: OrchestratorConfig,
    client: Arc<dyn CompletionClient>,
    runner_factory: Arc<dyn RunnerFactory>,
    pipeline: BatchPipeline,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        client: Arc<dyn CompletionClient>,
        runner_factory: Arc<dyn RunnerFactory>,
        pipeline: BatchPipeline,
    ) -> Self {
        Self {
            config,
            client,
            runner_factory,
            pipeline,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one turn, yielding `(conversation, generating)` snapshots.
    ///
    /// `generating` is the caller's flag for this conversation: when it
    /// is already true a turn is in flight, and the new input is
    /// rejected with a single unchanged snapshot.
    pub fn respond(
        &self,
        conversation: Conversation,
        user_message: impl Into<String>,
        generating: bool,
    ) -> SnapshotStream {
        let config = self.config.clone();
        let client = Arc::clone(&self.client);
        let factory = Arc::clone(&self.runner_factory);
        let pipeline = self.pipeline.clone();
        let user_message = user_message.into();

        Box::pin(stream! {
            if generating {
                tracing::debug!("turn already in flight, rejecting new input");
                yield Snapshot { conversation, generating: true };
                return;
            }

            let mut conversation = conversation;
            conversation.push(ChatMessage::user(&user_message));

            // ---- First streaming pass ----
            let request = CompletionRequest {
                model: config.model.clone(),
                messages: with_system(&config.system_prompt, &conversation),
                max_tokens: config.max_tokens,
                timeout: config.request_timeout,
            };

            let mut deltas = match client.stream_completion(request).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::error!("completion request failed: {}", e);
                    conversation.push(ChatMessage::assistant(interface_error(&e)));
                    yield Snapshot { conversation, generating: false };
                    return;
                }
            };

            let mut pending = PendingContent::default();
            let mut accumulated = String::new();
            let mut stream_failure = None;

            while let Some(delta) = deltas.next().await {
                match delta {
                    Ok(text) => {
                        accumulated.push_str(&text);
                        // Content is always the full accumulated text, so
                        // a consumer that misses snapshots still converges.
                        pending.set_prose(accumulated.clone());
                        set_assistant(&mut conversation, pending.render());
                        yield Snapshot { conversation: conversation.clone(), generating: true };
                        tokio::time::sleep(config.delta_interval).await;
                    }
                    Err(e) => {
                        stream_failure = Some(e);
                        break;
                    }
                }
            }
            drop(deltas);

            if let Some(e) = stream_failure {
                tracing::error!("completion stream failed: {}", e);
                set_assistant(&mut conversation, interface_error(&e));
                yield Snapshot { conversation, generating: false };
                return;
            }

            // ---- Directive extraction ----
            // Tool branch is gated on the raw text mentioning an
            // activating token; otherwise the reply stands verbatim.
            if !directive::may_activate(&accumulated) {
                set_assistant(&mut conversation, accumulated);
                yield Snapshot { conversation, generating: false };
                return;
            }

            let extraction = directive::extract(&accumulated, config.hide());
            if !extraction.status.activates() {
                // FALSE directive (or a miss despite the gate): apply
                // the visibility rule, no tool execution.
                set_assistant(&mut conversation, extraction.visible);
                yield Snapshot { conversation, generating: false };
                return;
            }

            // ---- Tool execution branch ----
            pending.set_prose(extraction.visible.clone());
            pending.begin_tool();
            set_assistant(&mut conversation, pending.render());
            yield Snapshot { conversation: conversation.clone(), generating: true };

            let (progress, mut progress_rx, _log) = progress_channel();
            let is_pipeline = extraction.status == Status::Pipeline;
            let mut task = {
                let progress = progress.clone();
                let factory = Arc::clone(&factory);
                let pipeline = pipeline.clone();
                let payload = extraction.payload.clone();
                let ceiling = config.task_ceiling;
                tokio::spawn(async move {
                    if is_pipeline {
                        pipeline.run(&progress).await
                    } else {
                        runner::execute_with_progress(
                            factory.as_ref(),
                            &payload,
                            progress.clone(),
                            ceiling,
                        )
                        .await
                    }
                })
            };
            // The spawned task now holds the only senders; the receiver
            // closes when it finishes.
            drop(progress);

            enum Tick {
                Progress(Option<String>),
                Done(Result<String, tokio::task::JoinError>),
            }

            let tool_result = loop {
                let tick = tokio::select! {
                    message = progress_rx.recv() => Tick::Progress(message),
                    result = &mut task => Tick::Done(result),
                };
                match tick {
                    Tick::Progress(Some(message)) => {
                        pending.push_progress(message);
                        set_assistant(&mut conversation, pending.render());
                        yield Snapshot { conversation: conversation.clone(), generating: true };
                    }
                    Tick::Progress(None) => {
                        break join_result((&mut task).await);
                    }
                    Tick::Done(result) => {
                        // Fold in any progress still buffered in the channel
                        while let Ok(message) = progress_rx.try_recv() {
                            pending.push_progress(message);
                        }
                        break join_result(result);
                    }
                }
            };

            pending.mark_complete();
            set_assistant(&mut conversation, pending.render());
            yield Snapshot { conversation: conversation.clone(), generating: true };

            // ---- Summary pass ----
            pending.begin_summary();
            set_assistant(&mut conversation, pending.render());
            yield Snapshot { conversation: conversation.clone(), generating: true };

            let summary_request = CompletionRequest {
                model: config.model.clone(),
                messages: vec![
                    ChatMessage::system(&config.system_prompt),
                    ChatMessage::assistant(&extraction.visible),
                    ChatMessage::user(prompts::summary_prompt(&user_message, &tool_result)),
                ],
                max_tokens: config.max_tokens,
                timeout: config.request_timeout,
            };

            let mut summary_failure: Option<String> = None;
            match client.stream_completion(summary_request).await {
                Ok(mut summary_deltas) => {
                    let mut summary = String::new();
                    while let Some(delta) = summary_deltas.next().await {
                        match delta {
                            Ok(text) => {
                                summary.push_str(&text);
                                pending.set_summary(summary.clone());
                                set_assistant(&mut conversation, pending.render());
                                yield Snapshot {
                                    conversation: conversation.clone(),
                                    generating: true,
                                };
                                tokio::time::sleep(config.delta_interval).await;
                            }
                            Err(e) => {
                                summary_failure = Some(e.to_string());
                                break;
                            }
                        }
                    }
                }
                Err(e) => summary_failure = Some(e.to_string()),
            }

            if let Some(error) = summary_failure {
                // The tool result must survive a failed summary pass.
                tracing::error!("summary generation failed: {}", error);
                pending.set_fallback(tool_result.clone(), error);
            }

            set_assistant(&mut conversation, pending.finalize());
            yield Snapshot { conversation, generating: false };
        })
    }
}

/// Build the request message list: system prompt first, then history.
fn with_system(system_prompt: &str, conversation: &Conversation) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(conversation.len() + 1);
    messages.push(ChatMessage::system(system_prompt));
    messages.extend(conversation.iter().cloned());
    messages
}

/// Create or overwrite the pending assistant message. If the last
/// message is still the user's, a new assistant message is appended;
/// otherwise the existing one is replaced wholesale.
fn set_assistant(conversation: &mut Conversation, content: String) {
    match conversation.last_mut() {
        Some(message) if message.role == Role::Assistant => message.content = content,
        _ => conversation.push(ChatMessage::assistant(content)),
    }
}

fn interface_error(error: &sage_ai::Error) -> String {
    format!("Smart Agent: Interface call exception: {}", error)
}

fn join_result(result: Result<String, tokio::task::JoinError>) -> String {
    match result {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("tool task panicked: {}", e);
            format!("Tool execution failed: {}", e)
        }
    }
}
