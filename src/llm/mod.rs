pub mod gemini;
pub mod huggingface;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::PipelineError;
use crate::models::{GenerationRequest, HistoryTurn};

pub use gemini::GeminiClient;
pub use huggingface::HuggingFaceClient;

/// Ordered text fragments from a streaming generation. Ends on provider
/// completion or after the first `Err`.
pub type ChunkStream = BoxStream<'static, Result<String, PipelineError>>;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, PipelineError>;
}

#[async_trait]
pub trait StreamingGenerator: TextGenerator {
    /// Opens a stream. `history` is sent as role-tagged context ahead of the prompt.
    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        history: &[HistoryTurn],
    ) -> Result<ChunkStream, PipelineError>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: Bytes, content_type: &str) -> Result<String, PipelineError>;
}

/// Races `fut` against a deadline, mapping expiry to `PipelineError::Timeout`.
pub async fn with_deadline<T, F>(
    provider: &'static str,
    deadline_ms: u64,
    fut: F,
) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    match tokio::time::timeout(Duration::from_millis(deadline_ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout {
            provider,
            deadline_ms,
        }),
    }
}
