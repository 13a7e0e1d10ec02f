use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;

use crate::error::PipelineError;
use crate::llm::ChunkStream;
use crate::models::{HistoryTurn, Mode};
use crate::pipeline::Intent;

const PROVIDER: &str = "backend";

/// HTTP client for a running relay, used by the CLI surfaces.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatReply {
    pub intent: Intent,
    pub solution: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptBody {
    transcript: String,
}

impl ProxyClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, PipelineError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let raw = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&raw)
            .map(|body| body.error)
            .unwrap_or(raw);
        if status == reqwest::StatusCode::BAD_REQUEST {
            return Err(PipelineError::Validation(message));
        }
        Err(PipelineError::provider(
            PROVIDER,
            format!("HTTP {}: {}", status.as_u16(), message),
        ))
    }

    pub async fn chat(&self, query: &str, mode: Mode) -> Result<ChatReply, PipelineError> {
        let response = self
            .client
            .post(format!("{}/chat", self.base_url))
            .json(&json!({ "query": query, "mode": mode }))
            .send()
            .await
            .map_err(|e| PipelineError::provider(PROVIDER, format!("failed to reach backend: {}", e)))?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| PipelineError::provider(PROVIDER, format!("failed to parse reply: {}", e)))
    }

    /// Opens a streaming chat. Chunks are decoded as UTF-8 across network
    /// boundaries, so a multi-byte character is never split between items.
    pub async fn chat_stream(
        &self,
        query: &str,
        mode: Mode,
        history: &[HistoryTurn],
    ) -> Result<ChunkStream, PipelineError> {
        let response = self
            .client
            .post(format!("{}/chat", self.base_url))
            .json(&json!({ "query": query, "mode": mode, "stream": true, "history": history }))
            .send()
            .await
            .map_err(|e| PipelineError::provider(PROVIDER, format!("failed to reach backend: {}", e)))?;
        let response = Self::check(response).await?;

        let mut bytes = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut pending: Vec<u8> = Vec::new();
            while let Some(next) = bytes.next().await {
                match next {
                    Ok(chunk) => {
                        pending.extend_from_slice(&chunk);
                        let text = drain_utf8(&mut pending);
                        if !text.is_empty() {
                            yield Ok(text);
                        }
                    }
                    Err(e) => {
                        yield Err(PipelineError::provider(PROVIDER, format!("stream interrupted: {}", e)));
                        return;
                    }
                }
            }
            if !pending.is_empty() {
                yield Ok(String::from_utf8_lossy(&pending).into_owned());
            }
        };

        Ok(Box::pin(stream))
    }

    pub async fn transcribe(&self, audio: Vec<u8>, content_type: &str) -> Result<String, PipelineError> {
        let response = self
            .client
            .post(format!("{}/stt", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(audio)
            .send()
            .await
            .map_err(|e| PipelineError::provider(PROVIDER, format!("failed to reach backend: {}", e)))?;

        let body: TranscriptBody = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| PipelineError::provider(PROVIDER, format!("failed to parse transcript: {}", e)))?;
        Ok(body.transcript)
    }
}

/// Takes the longest valid UTF-8 prefix out of `pending`, leaving an
/// incomplete trailing sequence behind. Invalid bytes become U+FFFD.
fn drain_utf8(pending: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(pending) {
            Ok(text) => {
                out.push_str(text);
                pending.clear();
                return out;
            }
            Err(err) => {
                let valid = err.valid_up_to();
                out.push_str(std::str::from_utf8(&pending[..valid]).unwrap_or_default());
                match err.error_len() {
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + bad);
                    }
                    None => {
                        pending.drain(..valid);
                        return out;
                    }
                }
            }
        }
    }
}
