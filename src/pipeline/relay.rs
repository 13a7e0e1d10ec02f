use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;

use super::intent::Intent;
use super::refiner::{Refinement, Refiner};
use crate::llm::ChunkStream;

/// Separates the streamed answer from the verification trailer.
pub const TRAILER_SEPARATOR: &str = "\n\n---\n";

pub fn trailer(refinement: &Refinement) -> String {
    match refinement {
        Refinement::Unchanged => format!("{}**Verified:** no changes needed.", TRAILER_SEPARATOR),
        Refinement::Refined(text) => format!("{}**Refined answer:**\n\n{}", TRAILER_SEPARATOR, text),
        // A degraded pass still leaves the streamed draft as the answer, but is
        // reported as skipped rather than as verified.
        Refinement::Skipped(reason) => {
            format!("{}**Verification skipped:** {}.", TRAILER_SEPARATOR, reason)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RelayReport {
    /// Concatenation of every forwarded chunk, trailer excluded.
    pub text: String,
    pub chunks: usize,
    pub refinement: Option<Refinement>,
    pub error: Option<String>,
}

/// Forwards provider chunks to an outbound channel in arrival order, then
/// appends the verification trailer for code-bearing answers.
#[derive(Clone)]
pub struct Relay {
    refiner: Arc<Refiner>,
    idle_timeout: Duration,
}

impl Relay {
    pub fn new(refiner: Arc<Refiner>, idle_timeout_ms: u64) -> Self {
        Self {
            refiner,
            idle_timeout: Duration::from_millis(idle_timeout_ms),
        }
    }

    /// Consumes `sink`; the outbound channel closes exactly once when this returns.
    pub async fn run(
        &self,
        mut upstream: ChunkStream,
        intent: Intent,
        query: &str,
        sink: mpsc::Sender<String>,
    ) -> RelayReport {
        let mut report = RelayReport::default();

        loop {
            let next = match tokio::time::timeout(self.idle_timeout, upstream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    report.error = Some(format!(
                        "stream idle for more than {}ms",
                        self.idle_timeout.as_millis()
                    ));
                    break;
                }
            };

            match next {
                None => break,
                Some(Ok(chunk)) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    report.text.push_str(&chunk);
                    report.chunks += 1;
                    if sink.send(chunk).await.is_err() {
                        report.error = Some("client disconnected".into());
                        return report;
                    }
                }
                Some(Err(err)) => {
                    report.error = Some(err.to_string());
                    break;
                }
            }
        }

        if let Some(error) = &report.error {
            tracing::warn!(%error, chunks = report.chunks, "stream ended early, closing channel");
            return report;
        }

        if intent.is_code_bearing() && !report.text.trim().is_empty() {
            let refinement = self.refiner.review(&report.text, query).await;
            tracing::info!(outcome = refinement.label(), "stream verification");
            if sink.send(trailer(&refinement)).await.is_err() {
                report.error = Some("client disconnected".into());
            }
            report.refinement = Some(refinement);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Degraded, PipelineError};
    use crate::llm::TextGenerator;
    use crate::models::GenerationRequest;
    use async_trait::async_trait;
    use futures::stream;

    struct Echo(String);

    #[async_trait]
    impl TextGenerator for Echo {
        async fn generate(&self, _: &GenerationRequest) -> Result<String, PipelineError> {
            Ok(self.0.clone())
        }
    }

    fn chunks(items: Vec<Result<&str, PipelineError>>) -> ChunkStream {
        let owned: Vec<Result<String, PipelineError>> =
            items.into_iter().map(|r| r.map(str::to_string)).collect();
        Box::pin(stream::iter(owned))
    }

    async fn drain(mut rx: mpsc::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn forwards_chunks_then_appends_trailer() {
        let relay = Relay::new(Arc::new(Refiner::unavailable()), 1_000);
        let (tx, rx) = mpsc::channel(16);
        let report = relay
            .run(
                chunks(vec![Ok("def f"), Ok("oo():\n  "), Ok("pass")]),
                Intent::Coding,
                "write foo",
                tx,
            )
            .await;

        let received = drain(rx).await;
        assert_eq!(&received[..3], &["def f", "oo():\n  ", "pass"]);
        assert_eq!(received.len(), 4);
        assert!(received[3].starts_with(TRAILER_SEPARATOR));
        assert!(received[3].contains("**Verification skipped:**"));
        assert!(!received[3].contains("**Verified:**"));
        assert_eq!(report.text, "def foo():\n  pass");
        assert_eq!(report.refinement, Some(Refinement::Skipped(Degraded::Unconfigured)));
    }

    #[tokio::test]
    async fn identical_refinement_appends_marker_only() {
        let refiner = Refiner::new(Arc::new(Echo("fn main() {}".into())), 1_000, 64);
        let relay = Relay::new(Arc::new(refiner), 1_000);
        let (tx, rx) = mpsc::channel(16);
        relay
            .run(chunks(vec![Ok("fn main() {}")]), Intent::Debug, "fix it", tx)
            .await;

        let received = drain(rx).await;
        assert_eq!(received.len(), 2);
        assert_eq!(received[1], trailer(&Refinement::Unchanged));
        assert!(!received[1].contains("fn main"));
    }

    #[tokio::test]
    async fn refined_text_is_appended() {
        let refiner = Refiner::new(Arc::new(Echo("better".into())), 1_000, 64);
        let relay = Relay::new(Arc::new(refiner), 1_000);
        let (tx, rx) = mpsc::channel(16);
        relay
            .run(chunks(vec![Ok("worse")]), Intent::Coding, "q", tx)
            .await;
        let received = drain(rx).await;
        assert!(received[1].ends_with("better"));
    }

    #[tokio::test]
    async fn non_code_intents_get_no_trailer() {
        let relay = Relay::new(Arc::new(Refiner::unavailable()), 1_000);
        let (tx, rx) = mpsc::channel(16);
        let report = relay
            .run(chunks(vec![Ok("Situation, "), Ok("task.")]), Intent::Behavioral, "q", tx)
            .await;
        assert_eq!(drain(rx).await, vec!["Situation, ", "task."]);
        assert!(report.refinement.is_none());
    }

    #[tokio::test]
    async fn upstream_error_closes_without_trailer() {
        let relay = Relay::new(Arc::new(Refiner::unavailable()), 1_000);
        let (tx, rx) = mpsc::channel(16);
        let report = relay
            .run(
                chunks(vec![Ok("partial"), Err(PipelineError::provider("gemini", "reset")), Ok("lost")]),
                Intent::Coding,
                "q",
                tx,
            )
            .await;
        assert_eq!(drain(rx).await, vec!["partial"]);
        assert!(report.error.unwrap().contains("reset"));
        assert!(report.refinement.is_none());
    }

    #[tokio::test]
    async fn idle_upstream_is_cut_off() {
        let relay = Relay::new(Arc::new(Refiner::unavailable()), 30);
        let (tx, rx) = mpsc::channel(16);
        let upstream: ChunkStream = Box::pin(
            stream::iter(vec![Ok::<_, PipelineError>("first".to_string())]).chain(stream::pending()),
        );
        let report = relay.run(upstream, Intent::Coding, "q", tx).await;
        assert_eq!(drain(rx).await, vec!["first"]);
        assert!(report.error.unwrap().contains("idle"));
    }

    #[tokio::test]
    async fn dropped_receiver_stops_the_relay() {
        let relay = Relay::new(Arc::new(Refiner::unavailable()), 1_000);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let report = relay
            .run(chunks(vec![Ok("a"), Ok("b")]), Intent::Coding, "q", tx)
            .await;
        assert_eq!(report.chunks, 1);
        assert_eq!(report.error.as_deref(), Some("client disconnected"));
    }
}
