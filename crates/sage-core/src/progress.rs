//! Progress channel between task runners and the state machine
//!
//! Runners emit progress as messages on an unbounded channel; the state
//! machine is the sole consumer and decides when updates become visible
//! to the UI. Every message is also teed into a shared log so the
//! timeout path can report whatever progress was captured.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Shared, append-only log of progress messages for one execution.
#[derive(Clone, Debug, Default)]
pub struct ProgressLog(Arc<Mutex<Vec<String>>>);

impl ProgressLog {
    fn push(&self, message: String) {
        self.0.lock().push(message);
    }

    /// Copy of all messages recorded so far
    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// All messages joined with newlines
    pub fn joined(&self) -> String {
        self.0.lock().join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/// Fire-and-forget progress sender handed to task runners.
///
/// Sending never blocks and never fails from the runner's perspective;
/// a closed receiver just means nobody is watching anymore.
#[derive(Clone)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<String>,
    log: ProgressLog,
}

impl ProgressSender {
    /// Send one human-readable progress message.
    pub fn send(&self, message: impl Into<String>) {
        let message = message.into();
        self.log.push(message.clone());
        let _ = self.tx.send(message);
    }

    /// The shared log backing this sender.
    pub fn log(&self) -> &ProgressLog {
        &self.log
    }
}

/// Create a progress channel: sender for the runner, receiver for the
/// state machine, plus the shared log.
pub fn progress_channel() -> (ProgressSender, mpsc::UnboundedReceiver<String>, ProgressLog) {
    let (tx, rx) = mpsc::unbounded_channel();
    let log = ProgressLog::default();
    let sender = ProgressSender {
        tx,
        log: log.clone(),
    };
    (sender, rx, log)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_reaches_receiver_and_log() {
        let (sender, mut rx, log) = progress_channel();
        sender.send("one");
        sender.send("two");

        assert_eq!(rx.recv().await.unwrap(), "one");
        assert_eq!(rx.recv().await.unwrap(), "two");
        assert_eq!(log.snapshot(), vec!["one", "two"]);
        assert_eq!(log.joined(), "one\ntwo");
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped_is_silent() {
        let (sender, rx, log) = progress_channel();
        drop(rx);
        sender.send("still logged");
        assert_eq!(log.snapshot(), vec!["still logged"]);
    }

    #[tokio::test]
    async fn test_receiver_closes_when_all_senders_drop() {
        let (sender, mut rx, _log) = progress_channel();
        let clone = sender.clone();
        drop(sender);
        clone.send("last");
        drop(clone);

        assert_eq!(rx.recv().await.unwrap(), "last");
        assert!(rx.recv().await.is_none());
    }
}
