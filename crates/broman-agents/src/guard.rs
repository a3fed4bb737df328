//! Wraps a generation stream so the caller always receives an answer.
//!
//! Fragments are forwarded in arrival order as soon as they are read. If the
//! upstream ends without a single fragment having been delivered, the fallback
//! router answers instead, exactly once. An upstream error is reported inline
//! as a marker line; the marker is not an answer, so an error before any text
//! is still followed by the fallback.

use std::pin::Pin;
use std::sync::Arc;

use broman_common::{Message, Result};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::fallback::Fallback;

/// Incremental text from the generation backend.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Sent when the fallback itself fails or comes back empty.
pub const GENERIC_FAILURE: &str = "Could not get a response.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Forwarding,
    Draining,
    Fallback,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    /// Upstream delivered at least one fragment.
    Streamed,
    /// Upstream was silent; the fallback answer was delivered.
    FellBack,
    /// The receiver went away before the turn finished.
    Cancelled,
}

pub struct CompletionGuard {
    fallback: Arc<dyn Fallback>,
    state: GuardState,
    /// Set only after an upstream fragment was delivered.
    produced_output: bool,
}

impl CompletionGuard {
    pub fn new(fallback: Arc<dyn Fallback>) -> Self {
        Self {
            fallback,
            state: GuardState::Forwarding,
            produced_output: false,
        }
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    pub fn produced_output(&self) -> bool {
        self.produced_output
    }

    /// Run the guard on its own task and hand back the receiving end.
    pub fn spawn(
        self,
        upstream: TextStream,
        conversation: Vec<Message>,
        buffer: usize,
    ) -> (mpsc::Receiver<String>, JoinHandle<GuardOutcome>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let handle = tokio::spawn(async move { self.run(upstream, &conversation, &tx).await });
        (rx, handle)
    }

    /// Drive `upstream` to completion, writing into `out`.
    ///
    /// Returns as soon as `out` is closed; `upstream` is dropped with the guard.
    pub async fn run(
        mut self,
        mut upstream: TextStream,
        conversation: &[Message],
        out: &mpsc::Sender<String>,
    ) -> GuardOutcome {
        loop {
            match self.state {
                GuardState::Forwarding => {
                    let next = tokio::select! {
                        biased;
                        _ = out.closed() => return self.cancel(),
                        next = upstream.next() => next,
                    };
                    match next {
                        Some(Ok(fragment)) => {
                            if fragment.is_empty() {
                                continue;
                            }
                            if out.send(fragment).await.is_err() {
                                return self.cancel();
                            }
                            self.produced_output = true;
                        }
                        Some(Err(e)) => {
                            warn!("generation stream failed: {e}");
                            if out.send(format!("\n[stream error: {e}]")).await.is_err() {
                                return self.cancel();
                            }
                            self.transition(GuardState::Draining);
                        }
                        None => self.transition(GuardState::Draining),
                    }
                }
                GuardState::Draining => {
                    if self.produced_output {
                        self.transition(GuardState::Closed);
                        return GuardOutcome::Streamed;
                    }
                    self.transition(GuardState::Fallback);
                }
                GuardState::Fallback => {
                    info!("generation stream produced no output, answering via fallback");
                    let answer = tokio::select! {
                        biased;
                        _ = out.closed() => return self.cancel(),
                        answer = self.fallback.answer(conversation) => answer,
                    };
                    let answer = match answer {
                        Ok(text) if !text.is_empty() => text,
                        Ok(_) => GENERIC_FAILURE.to_string(),
                        Err(e) => {
                            warn!("fallback router failed: {e}");
                            GENERIC_FAILURE.to_string()
                        }
                    };
                    if out.send(answer).await.is_err() {
                        return self.cancel();
                    }
                    self.transition(GuardState::Closed);
                    return GuardOutcome::FellBack;
                }
                // `run` consumes the guard, so this arm only completes the match.
                GuardState::Closed => return GuardOutcome::Cancelled,
            }
        }
    }

    fn transition(&mut self, next: GuardState) {
        debug!(from = ?self.state, to = ?next, "completion guard transition");
        self.state = next;
    }

    fn cancel(&mut self) -> GuardOutcome {
        debug!(state = ?self.state, "receiver dropped, cancelling turn");
        self.state = GuardState::Closed;
        GuardOutcome::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use broman_common::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        reply: Result<String>,
        calls: AtomicUsize,
    }

    impl Counting {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(Error::Agent("router exploded".to_string())),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fallback for Counting {
        async fn answer(&self, _conversation: &[Message]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(Error::Agent(e.to_string())),
            }
        }
    }

    fn upstream(items: Vec<Result<String>>) -> TextStream {
        Box::pin(futures::stream::iter(items))
    }

    fn fragments(parts: &[&str]) -> Vec<Result<String>> {
        parts.iter().map(|p| Ok(p.to_string())).collect()
    }

    async fn drive(items: Vec<Result<String>>, fallback: Arc<Counting>) -> (Vec<String>, GuardOutcome) {
        let (tx, mut rx) = mpsc::channel(64);
        let outcome = CompletionGuard::new(fallback)
            .run(upstream(items), &[Message::user("hi")], &tx)
            .await;
        drop(tx);
        let mut out = Vec::new();
        while let Some(fragment) = rx.recv().await {
            out.push(fragment);
        }
        (out, outcome)
    }

    #[tokio::test]
    async fn forwards_fragments_without_fallback() {
        let fallback = Counting::replying("fallback");
        let (out, outcome) = drive(fragments(&["Hel", "lo"]), fallback.clone()).await;
        assert_eq!(out.concat(), "Hello");
        assert_eq!(out.len(), 2);
        assert_eq!(outcome, GuardOutcome::Streamed);
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn empty_upstream_falls_back_once() {
        let fallback = Counting::replying("Result: 4");
        let (out, outcome) = drive(Vec::new(), fallback.clone()).await;
        assert_eq!(out, vec!["Result: 4".to_string()]);
        assert_eq!(outcome, GuardOutcome::FellBack);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn empty_fragments_do_not_count_as_output() {
        let fallback = Counting::replying("answer");
        let (out, outcome) = drive(fragments(&["", ""]), fallback.clone()).await;
        assert_eq!(out, vec!["answer".to_string()]);
        assert_eq!(outcome, GuardOutcome::FellBack);
    }

    #[tokio::test]
    async fn error_before_any_text_is_followed_by_fallback() {
        let fallback = Counting::replying("Result: 4");
        let items = vec![
            Err(Error::Provider("status=500".to_string())),
            Ok("never read".to_string()),
        ];
        let (out, outcome) = drive(items, fallback.clone()).await;
        assert_eq!(
            out,
            vec![
                "\n[stream error: provider error: status=500]".to_string(),
                "Result: 4".to_string()
            ]
        );
        assert_eq!(outcome, GuardOutcome::FellBack);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn error_after_text_keeps_partial_answer() {
        let fallback = Counting::replying("fallback");
        let items = vec![
            Ok("partial".to_string()),
            Err(Error::Provider("connection reset".to_string())),
            Ok("never read".to_string()),
        ];
        let (out, outcome) = drive(items, fallback.clone()).await;
        assert_eq!(
            out,
            vec![
                "partial".to_string(),
                "\n[stream error: provider error: connection reset]".to_string()
            ]
        );
        assert_eq!(outcome, GuardOutcome::Streamed);
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn router_failure_becomes_generic_message() {
        let fallback = Counting::failing();
        let (out, outcome) = drive(Vec::new(), fallback.clone()).await;
        assert_eq!(out, vec![GENERIC_FAILURE.to_string()]);
        assert_eq!(outcome, GuardOutcome::FellBack);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn dropped_receiver_cancels_pending_upstream() {
        let fallback = Counting::replying("fallback");
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let outcome = CompletionGuard::new(fallback.clone())
            .run(Box::pin(futures::stream::pending::<Result<String>>()), &[], &tx)
            .await;
        assert_eq!(outcome, GuardOutcome::Cancelled);
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn spawned_guard_streams_through_channel() {
        let fallback = Counting::replying("fallback");
        let (mut rx, handle) = CompletionGuard::new(fallback)
            .spawn(upstream(fragments(&["a", "b", "c"])), Vec::new(), 4);
        let mut text = String::new();
        while let Some(fragment) = rx.recv().await {
            text.push_str(&fragment);
        }
        assert_eq!(text, "abc");
        assert_eq!(handle.await.unwrap(), GuardOutcome::Streamed);
    }
}
