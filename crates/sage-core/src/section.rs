//! Sectioned pending-content buffer
//!
//! During a turn the pending assistant message is a fixed sequence of
//! labeled sections: model prose, tool-started marker, progress log,
//! completion marker, and summary. Keeping each section as a named
//! field (instead of splicing marker substrings into one string) makes
//! the replace-don't-duplicate rule and the prefix-consistency of
//! snapshots trivial to uphold. Text is rendered only at yield time.

pub const STARTED_MARKER: &str = "[Tool Processing Started...]";
pub const PROGRESS_MARKER: &str = "[Tool Processing Progress]";
pub const COMPLETE_MARKER: &str = "[Tool Execution Complete]";
pub const GENERATING_SUMMARY_MARKER: &str = "[Generating Summary...]";
pub const SUMMARY_MARKER: &str = "[Tool Execution Summary]";
pub const RESULTS_MARKER: &str = "[Tool Results]";

/// Summary section state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum Summary {
    /// No summary sub-phase yet
    #[default]
    None,
    /// Summary pass requested, no text streamed yet
    Generating,
    /// Accumulated summary text (replaces the generating marker)
    Streaming(String),
    /// Deterministic fallback when summarization failed; carries the
    /// raw tool result so it is never lost
    Fallback { result: String, error: String },
}

/// The pending assistant message for one turn.
#[derive(Debug, Clone, Default)]
pub struct PendingContent {
    prose: String,
    tool_started: bool,
    progress: Vec<String>,
    complete: bool,
    summary: Summary,
}

impl PendingContent {
    /// Replace the model-prose section with the full accumulated text.
    pub fn set_prose(&mut self, prose: impl Into<String>) {
        self.prose = prose.into();
    }

    /// Enter the tool-execution sub-phase.
    pub fn begin_tool(&mut self) {
        self.tool_started = true;
    }

    /// Append one progress message. The whole section is re-rendered
    /// from the accumulated log, so it is never duplicated.
    pub fn push_progress(&mut self, message: impl Into<String>) {
        self.progress.push(message.into());
    }

    /// Mark tool execution finished.
    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    /// Show the generating-summary marker.
    pub fn begin_summary(&mut self) {
        self.summary = Summary::Generating;
    }

    /// Replace the summary section with the full accumulated summary.
    pub fn set_summary(&mut self, summary: impl Into<String>) {
        self.summary = Summary::Streaming(summary.into());
    }

    /// Switch the summary section to the deterministic fallback block.
    pub fn set_fallback(&mut self, result: impl Into<String>, error: impl Into<String>) {
        self.summary = Summary::Fallback {
            result: result.into(),
            error: error.into(),
        };
    }

    /// Render the in-flight view, all live sections in fixed order.
    pub fn render(&self) -> String {
        let mut out = self.prose.clone();
        if self.tool_started {
            push_section(&mut out, STARTED_MARKER);
        }
        if !self.progress.is_empty() {
            push_section(&mut out, PROGRESS_MARKER);
            out.push('\n');
            out.push_str(&self.progress.join("\n"));
        }
        if self.complete {
            push_section(&mut out, COMPLETE_MARKER);
        }
        self.render_summary(&mut out);
        out
    }

    /// Render the finalized message: visible prose, completion marker,
    /// and summary. The started/progress sections are dropped here --
    /// the one documented section removal in the snapshot contract.
    pub fn finalize(&self) -> String {
        let mut out = self.prose.clone();
        if self.complete {
            push_section(&mut out, COMPLETE_MARKER);
        }
        self.render_summary(&mut out);
        out
    }

    fn render_summary(&self, out: &mut String) {
        match &self.summary {
            Summary::None => {}
            Summary::Generating => push_section(out, GENERATING_SUMMARY_MARKER),
            Summary::Streaming(text) => {
                push_section(out, SUMMARY_MARKER);
                out.push('\n');
                out.push_str(text);
            }
            Summary::Fallback { result, error } => {
                push_section(out, RESULTS_MARKER);
                out.push('\n');
                out.push_str(result);
                out.push_str("\n\n[Note: Summary generation failed - ");
                out.push_str(error);
                out.push(']');
            }
        }
    }
}

fn push_section(out: &mut String, marker: &str) {
    if !out.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str(marker);
}
