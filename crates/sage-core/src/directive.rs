//! Tool-directive codec
//!
//! The model embeds a machine-readable directive in its free-form text:
//! `[[STATUS][PAYLOAD]]` with `STATUS` one of `TRUE`, `FALSE`, or the
//! reserved pipeline token. Extraction is pure, takes the first match
//! only, and treats malformed input as a normal miss.

use regex::Regex;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Reserved status token that routes execution to the batch pipeline.
pub const PIPELINE_TOKEN: &str = "PIPELINE";

/// `(?s)` so payloads may span newlines; lazy inner match so only the
/// first directive is consumed.
static DIRECTIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[\[(TRUE|FALSE|PIPELINE)\]\[(.*?)\]\]").unwrap());

/// Process-wide default for hiding directives in visible text. Shared
/// by all conversations; per-call overrides go through [`extract`]'s
/// `hide` parameter instead.
static HIDE_DEFAULT: AtomicBool = AtomicBool::new(false);

/// Set the process-wide directive visibility default.
pub fn set_hide_default(hide: bool) {
    HIDE_DEFAULT.store(hide, Ordering::Relaxed);
}

/// Read the process-wide directive visibility default.
pub fn hide_default() -> bool {
    HIDE_DEFAULT.load(Ordering::Relaxed)
}

/// Directive activation status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The model requested a tool run
    True,
    /// No tool run requested (also the no-match default)
    False,
    /// The reserved batch-pipeline directive
    Pipeline,
}

impl Status {
    /// Whether this status triggers the tool-execution branch
    pub fn activates(self) -> bool {
        matches!(self, Status::True | Status::Pipeline)
    }
}

/// Result of directive extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// The user-visible text (directive stripped when hiding)
    pub visible: String,
    /// Parsed activation status
    pub status: Status,
    /// Directive payload; forced to [`PIPELINE_TOKEN`] for pipeline
    /// directives, empty on a miss
    pub payload: String,
}

/// Extract the first directive from `text`.
///
/// When `hide` is true the matched directive substring is removed from
/// the visible text and the remainder trimmed; otherwise the visible
/// text is the input unchanged. Absence of a directive is a normal
/// outcome, never an error.
pub fn extract(text: &str, hide: bool) -> Extraction {
    let Some(caps) = DIRECTIVE_RE.captures(text) else {
        tracing::debug!("no directive found in assistant text");
        return Extraction {
            visible: text.to_string(),
            status: Status::False,
            payload: String::new(),
        };
    };

    let status = match &caps[1] {
        "TRUE" => Status::True,
        PIPELINE_TOKEN => Status::Pipeline,
        _ => Status::False,
    };

    // Protocol rule: the pipeline directive's payload is the token
    // itself, whatever was captured.
    let payload = if status == Status::Pipeline {
        PIPELINE_TOKEN.to_string()
    } else {
        caps[2].to_string()
    };

    let visible = if hide {
        let matched = caps.get(0).expect("match group 0 always present");
        let mut stripped = String::with_capacity(text.len());
        stripped.push_str(&text[..matched.start()]);
        stripped.push_str(&text[matched.end()..]);
        stripped.trim().to_string()
    } else {
        text.to_string()
    };

    tracing::info!(status = ?status, payload = %payload, "extracted directive");

    Extraction {
        visible,
        status,
        payload,
    }
}

/// Cheap gate the orchestrator applies before running the codec: the
/// tool branch is only reachable when the raw text mentions an
/// activating token at all.
pub fn may_activate(text: &str) -> bool {
    text.contains("[[TRUE") || text.contains("[[PIPELINE")
}
