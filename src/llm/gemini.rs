use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::{with_deadline, ChunkStream, StreamingGenerator, TextGenerator};
use crate::error::PipelineError;
use crate::models::{GenerationRequest, HistoryTurn, Role};

const PROVIDER: &str = "gemini";

#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Clone, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiError>,
}

#[derive(Debug, Clone, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Clone, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Clone, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiError {
    message: String,
}

impl GenerateContentResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}

impl GeminiClient {
    pub fn new(api_key: &str, base_url: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/v1beta/models/{}:{}", self.base_url, self.model, method)
    }

    fn body(request: &GenerationRequest, history: &[HistoryTurn]) -> GenerateContentRequest {
        let mut contents: Vec<Content> = history
            .iter()
            .map(|turn| Content {
                role: match turn.role {
                    Role::Assistant => "model",
                    Role::User => "user",
                },
                parts: vec![Part {
                    text: turn.text.clone(),
                }],
            })
            .collect();
        contents.push(Content {
            role: "user",
            parts: vec![Part {
                text: request.prompt.clone(),
            }],
        });

        GenerateContentRequest {
            contents,
            generation_config: GenerationConfig {
                max_output_tokens: request.max_output_tokens,
                temperature: request.temperature,
            },
        }
    }

    async fn send(
        &self,
        url: String,
        body: &GenerateContentRequest,
    ) -> Result<reqwest::Response, PipelineError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
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

        Ok(response)
    }

    async fn generate_once(&self, request: &GenerationRequest) -> Result<String, PipelineError> {
        let response = self
            .send(self.endpoint("generateContent"), &Self::body(request, &[]))
            .await?;

        let api_response: GenerateContentResponse = response.json().await.map_err(|e| {
            PipelineError::provider(PROVIDER, format!("failed to parse response: {}", e))
        })?;

        if let Some(err) = api_response.error {
            return Err(PipelineError::provider(PROVIDER, err.message));
        }

        Ok(api_response.text())
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, PipelineError> {
        tracing::debug!(model = %self.model, deadline_ms = request.deadline_ms, "gemini generate");
        with_deadline(PROVIDER, request.deadline_ms, self.generate_once(request)).await
    }
}

#[async_trait]
impl StreamingGenerator for GeminiClient {
    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        history: &[HistoryTurn],
    ) -> Result<ChunkStream, PipelineError> {
        tracing::debug!(model = %self.model, history = history.len(), "gemini stream");
        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let response = self.send(url, &Self::body(request, history)).await?;

        let mut events = Box::pin(response.bytes_stream().eventsource());

        let stream = async_stream::stream! {
            while let Some(next) = events.next().await {
                match next {
                    Ok(event) => match parse_event_data(&event.data) {
                        Some(Ok(text)) => yield Ok(text),
                        Some(Err(err)) => {
                            yield Err(err);
                            return;
                        }
                        None => {}
                    },
                    Err(e) => {
                        yield Err(PipelineError::provider(PROVIDER, format!("stream interrupted: {}", e)));
                        return;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Decodes the data of one server-sent event. Keep-alives and events with
/// no text yield `None`.
fn parse_event_data(data: &str) -> Option<Result<String, PipelineError>> {
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }

    let event: GenerateContentResponse = match serde_json::from_str(data) {
        Ok(event) => event,
        Err(e) => {
            return Some(Err(PipelineError::provider(
                PROVIDER,
                format!("malformed stream event: {}", e),
            )))
        }
    };

    if let Some(err) = event.error {
        return Some(Err(PipelineError::provider(PROVIDER, err.message)));
    }

    let text = event.text();
    if text.is_empty() {
        None
    } else {
        Some(Ok(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(deadline_ms: u64) -> GenerationRequest {
        GenerationRequest {
            prompt: "Question: hi".into(),
            max_output_tokens: 64,
            temperature: 0.7,
            deadline_ms,
        }
    }

    fn text_event(text: &str) -> String {
        json!({"candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]})
            .to_string()
    }

    #[test]
    fn history_roles_map_to_provider_roles() {
        let history = vec![
            HistoryTurn::user("first"),
            HistoryTurn::assistant("reply"),
        ];
        let body = serde_json::to_value(GeminiClient::body(&request(1), &history)).unwrap();
        let roles: Vec<&str> = body["contents"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
        assert_eq!(body["contents"][2]["parts"][0]["text"], "Question: hi");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 64);
    }

    #[test]
    fn event_data() {
        assert_eq!(parse_event_data(""), None);
        assert_eq!(parse_event_data("[DONE]"), None);
        assert_eq!(
            parse_event_data(&text_event("abc")),
            Some(Ok("abc".to_string()))
        );
        assert!(matches!(
            parse_event_data(r#"{"error": {"code": 429, "message": "quota"}}"#),
            Some(Err(PipelineError::Provider { .. }))
        ));
    }

    #[tokio::test]
    async fn generate_joins_candidate_parts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/test-model:generateContent"))
            .and(header("x-goog-api-key", "key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "Hello, "}, {"text": "world"}]}}]
            })))
            .mount(&server)
            .await;

        let client = GeminiClient::new("key", &server.uri(), "test-model");
        let text = client.generate(&request(5_000)).await.expect("generate");
        assert_eq!(text, "Hello, world");
    }

    #[tokio::test]
    async fn generate_times_out_past_deadline() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"candidates": []}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = GeminiClient::new("key", &server.uri(), "test-model");
        let err = client.generate(&request(50)).await.unwrap_err();
        assert_eq!(
            err,
            PipelineError::Timeout {
                provider: "gemini",
                deadline_ms: 50
            }
        );
    }

    #[tokio::test]
    async fn http_failure_is_a_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client = GeminiClient::new("key", &server.uri(), "test-model");
        let err = client.generate(&request(5_000)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Provider { ref message, .. } if message.contains("overloaded")));
    }

    #[tokio::test]
    async fn stream_yields_chunks_in_order() {
        let server = MockServer::start().await;
        let body = format!(
            "data: {}\r\n\r\n: keep-alive\r\n\r\ndata: {}\r\n\r\ndata: {}\r\n\r\n",
            text_event("def f"),
            text_event("oo():\n  "),
            text_event("pass")
        );
        Mock::given(method("POST"))
            .and(path("/v1beta/models/test-model:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let client = GeminiClient::new("key", &server.uri(), "test-model");
        let stream = client
            .generate_stream(&request(5_000), &[HistoryTurn::user("earlier")])
            .await
            .expect("stream opens");
        let chunks: Vec<String> = stream.map(|c| c.expect("chunk")).collect().await;
        assert_eq!(chunks, vec!["def f", "oo():\n  ", "pass"]);
    }

    #[tokio::test]
    async fn stream_error_event_terminates() {
        let server = MockServer::start().await;
        let body = format!(
            "data: {}\n\ndata: {}\n\ndata: {}\n\n",
            text_event("partial"),
            json!({"error": {"code": 500, "message": "internal"}}),
            text_event("never")
        );
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let client = GeminiClient::new("key", &server.uri(), "test-model");
        let stream = client.generate_stream(&request(5_000), &[]).await.unwrap();
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Ok("partial".to_string()));
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn stream_joins_multi_line_data() {
        let server = MockServer::start().await;
        let body = "data: {\"candidates\":[{\"content\":\ndata: {\"parts\":[{\"text\":\"hi\"}]}}]}\n\n";
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let client = GeminiClient::new("key", &server.uri(), "test-model");
        let stream = client.generate_stream(&request(5_000), &[]).await.unwrap();
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items, vec![Ok("hi".to_string())]);
    }
}
