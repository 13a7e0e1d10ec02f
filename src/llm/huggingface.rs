use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{with_deadline, TextGenerator, Transcriber};
use crate::error::PipelineError;
use crate::models::GenerationRequest;

const PROVIDER: &str = "huggingface";

/// Hugging Face inference API: text generation for refinement and Whisper for speech.
#[derive(Debug, Clone)]
pub struct HuggingFaceClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    text_model: String,
    whisper_model: String,
    transcribe_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
struct TextRequest<'a> {
    inputs: &'a str,
    parameters: TextParameters,
}

#[derive(Debug, Clone, Serialize)]
struct TextParameters {
    temperature: f32,
    max_new_tokens: u32,
    return_full_text: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct Generated {
    generated_text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TextResponse {
    Batch(Vec<Generated>),
    Single(Generated),
    Error { error: String },
}

#[derive(Debug, Clone, Deserialize)]
struct TranscriptionResponse {
    text: Option<String>,
    error: Option<String>,
}

impl HuggingFaceClient {
    pub fn new(api_key: &str, base_url: &str, text_model: &str, whisper_model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            text_model: text_model.to_string(),
            whisper_model: whisper_model.to_string(),
            transcribe_timeout_ms: 30_000,
        }
    }

    pub fn with_transcribe_timeout(mut self, timeout_ms: u64) -> Self {
        self.transcribe_timeout_ms = timeout_ms;
        self
    }

    fn model_url(&self, model: &str) -> String {
        format!("{}/models/{}", self.base_url, model)
    }

    async fn generate_once(&self, request: &GenerationRequest) -> Result<String, PipelineError> {
        let body = TextRequest {
            inputs: &request.prompt,
            parameters: TextParameters {
                temperature: request.temperature,
                max_new_tokens: request.max_output_tokens,
                return_full_text: false,
            },
        };

        let response = self
            .client
            .post(self.model_url(&self.text_model))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::provider(PROVIDER, format!("failed to send request: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::provider(
                PROVIDER,
                format!("API error ({}): {}", status, body),
            ));
        }

        let parsed: TextResponse = response.json().await.map_err(|e| {
            PipelineError::provider(PROVIDER, format!("failed to parse response: {}", e))
        })?;

        match parsed {
            TextResponse::Batch(items) => Ok(items
                .into_iter()
                .next()
                .map(|g| g.generated_text)
                .unwrap_or_default()),
            TextResponse::Single(g) => Ok(g.generated_text),
            TextResponse::Error { error } => Err(PipelineError::provider(PROVIDER, error)),
        }
    }

    async fn transcribe_once(
        &self,
        audio: Bytes,
        content_type: &str,
    ) -> Result<String, PipelineError> {
        let response = self
            .client
            .post(self.model_url(&self.whisper_model))
            .bearer_auth(&self.api_key)
            .header("content-type", content_type)
            .body(audio)
            .send()
            .await
            .map_err(|e| PipelineError::provider(PROVIDER, format!("failed to send audio: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed: Option<TranscriptionResponse> = serde_json::from_str(&body).ok();

        if !status.is_success() {
            let detail = parsed.and_then(|p| p.error).unwrap_or(body);
            return Err(PipelineError::provider(
                PROVIDER,
                format!("Whisper API error ({}): {}", status, detail),
            ));
        }

        match parsed.and_then(|p| p.text) {
            Some(text) => Ok(text.trim().to_string()),
            None => Err(PipelineError::provider(
                PROVIDER,
                "No transcription returned from Whisper",
            )),
        }
    }
}

#[async_trait]
impl TextGenerator for HuggingFaceClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, PipelineError> {
        tracing::debug!(model = %self.text_model, deadline_ms = request.deadline_ms, "huggingface generate");
        with_deadline(PROVIDER, request.deadline_ms, self.generate_once(request)).await
    }
}

#[async_trait]
impl Transcriber for HuggingFaceClient {
    async fn transcribe(&self, audio: Bytes, content_type: &str) -> Result<String, PipelineError> {
        if audio.is_empty() {
            return Err(PipelineError::Validation("No audio data provided".into()));
        }
        tracing::info!(bytes = audio.len(), model = %self.whisper_model, "transcribing audio");
        with_deadline(
            PROVIDER,
            self.transcribe_timeout_ms,
            self.transcribe_once(audio, content_type),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(uri: &str) -> HuggingFaceClient {
        HuggingFaceClient::new("hf-key", uri, "org/coder", "openai/whisper")
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            prompt: "review this".into(),
            max_output_tokens: 256,
            temperature: 0.1,
            deadline_ms: 5_000,
        }
    }

    #[tokio::test]
    async fn generate_reads_batch_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/org/coder"))
            .and(header("authorization", "Bearer hf-key"))
            .and(body_json(json!({
                "inputs": "review this",
                "parameters": {"temperature": 0.1, "max_new_tokens": 256, "return_full_text": false}
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"generated_text": "looks fine"}])),
            )
            .mount(&server)
            .await;

        let text = client(&server.uri()).generate(&request()).await.unwrap();
        assert_eq!(text, "looks fine");
    }

    #[tokio::test]
    async fn generate_surfaces_model_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"error": "model is loading"})),
            )
            .mount(&server)
            .await;

        let err = client(&server.uri()).generate(&request()).await.unwrap_err();
        assert_eq!(err, PipelineError::provider("huggingface", "model is loading"));
    }

    #[tokio::test]
    async fn transcribe_posts_raw_audio() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/openai/whisper"))
            .and(header("content-type", "audio/webm"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "  hello there "})))
            .mount(&server)
            .await;

        let transcript = client(&server.uri())
            .transcribe(Bytes::from_static(b"\x1a\x45\xdf\xa3"), "audio/webm")
            .await
            .unwrap();
        assert_eq!(transcript, "hello there");
    }

    #[tokio::test]
    async fn transcribe_reports_api_error_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "bad audio"})))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .transcribe(Bytes::from_static(b"abc"), "audio/webm")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Provider { ref message, .. } if message.contains("bad audio")));
    }

    #[tokio::test]
    async fn empty_audio_is_rejected_without_a_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .transcribe(Bytes::new(), "audio/webm")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }
}
