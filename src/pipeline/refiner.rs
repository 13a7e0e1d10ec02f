use std::sync::Arc;

use crate::error::Degraded;
use crate::llm::{with_deadline, TextGenerator};
use crate::models::GenerationRequest;

const SYSTEM_PROMPT: &str = r#"You are a meticulous senior engineer reviewing an answer to an interview question.
If the draft answer is correct, return it unchanged, exactly as written.
Otherwise return an improved, corrected version of the whole answer.
Respond with ONLY the answer. No preamble, no review notes."#;

const REFINE_TEMPERATURE: f32 = 0.1;

/// What the refinement pass concluded about a draft.
#[derive(Debug, Clone, PartialEq)]
pub enum Refinement {
    Unchanged,
    Refined(String),
    Skipped(Degraded),
}

impl Refinement {
    pub fn label(&self) -> &'static str {
        match self {
            Refinement::Unchanged => "unchanged",
            Refinement::Refined(_) => "refined",
            Refinement::Skipped(_) => "skipped",
        }
    }
}

/// Corrective pass over a draft answer through a secondary provider.
pub struct Refiner {
    generator: Option<Arc<dyn TextGenerator>>,
    deadline_ms: u64,
    max_output_tokens: u32,
}

impl Refiner {
    pub fn new(generator: Arc<dyn TextGenerator>, deadline_ms: u64, max_output_tokens: u32) -> Self {
        Self {
            generator: Some(generator),
            deadline_ms,
            max_output_tokens,
        }
    }

    /// No credential configured: every call degrades.
    pub fn unavailable() -> Self {
        Self {
            generator: None,
            deadline_ms: 0,
            max_output_tokens: 0,
        }
    }

    pub fn is_available(&self) -> bool {
        self.generator.is_some()
    }

    pub async fn refine(&self, draft: &str, original_query: &str) -> Result<String, Degraded> {
        let generator = self.generator.as_ref().ok_or(Degraded::Unconfigured)?;

        let request = GenerationRequest {
            prompt: format!(
                "{}\n\nQuestion: {}\n\nDraft answer:\n{}",
                SYSTEM_PROMPT, original_query, draft
            ),
            max_output_tokens: self.max_output_tokens,
            temperature: REFINE_TEMPERATURE,
            deadline_ms: self.deadline_ms,
        };

        let text = with_deadline("refiner", self.deadline_ms, generator.generate(&request))
            .await
            .map_err(Degraded::from)?;

        let text = text.trim();
        if text.is_empty() {
            return Err(Degraded::EmptyOutput);
        }
        Ok(text.to_string())
    }

    /// `refine`, falling back to the draft on any degradation.
    pub async fn refine_or_keep(&self, draft: &str, original_query: &str) -> String {
        match self.refine(draft, original_query).await {
            Ok(text) => text,
            Err(reason) => {
                tracing::warn!(%reason, "refinement degraded, keeping original answer");
                draft.to_string()
            }
        }
    }

    pub async fn review(&self, draft: &str, original_query: &str) -> Refinement {
        match self.refine(draft, original_query).await {
            Ok(text) if text == draft.trim() => Refinement::Unchanged,
            Ok(text) => Refinement::Refined(text),
            Err(reason) => {
                tracing::warn!(%reason, "refinement degraded");
                Refinement::Skipped(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Scripted {
        reply: Result<String, PipelineError>,
        delay_ms: u64,
        prompts: Mutex<Vec<GenerationRequest>>,
    }

    impl Scripted {
        fn new(reply: Result<String, PipelineError>) -> Self {
            Self {
                reply,
                delay_ms: 0,
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, PipelineError> {
            self.prompts.lock().unwrap().push(request.clone());
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.reply.clone()
        }
    }

    #[tokio::test]
    async fn missing_credentials_keep_the_draft() {
        let refiner = Refiner::unavailable();
        assert_eq!(refiner.refine("draft", "q").await, Err(Degraded::Unconfigured));
        assert_eq!(refiner.refine_or_keep("draft", "q").await, "draft");
    }

    #[tokio::test]
    async fn provider_failure_keeps_the_draft() {
        let generator = Arc::new(Scripted::new(Err(PipelineError::provider("huggingface", "503"))));
        let refiner = Refiner::new(generator, 8_000, 512);
        assert!(matches!(refiner.refine("draft", "q").await, Err(Degraded::Provider(_))));
        assert_eq!(refiner.refine_or_keep("draft", "q").await, "draft");
    }

    #[tokio::test]
    async fn slow_provider_times_out_and_keeps_the_draft() {
        let mut scripted = Scripted::new(Ok("late".into()));
        scripted.delay_ms = 300;
        let refiner = Refiner::new(Arc::new(scripted), 20, 512);
        assert_eq!(refiner.refine("draft", "q").await, Err(Degraded::Timeout(20)));
        assert_eq!(refiner.refine_or_keep("draft", "q").await, "draft");
    }

    #[tokio::test]
    async fn request_is_low_temperature_and_carries_query_and_draft() {
        let generator = Arc::new(Scripted::new(Ok("better".into())));
        let refiner = Refiner::new(generator.clone(), 8_000, 512);
        assert_eq!(refiner.refine("draft text", "the question").await, Ok("better".into()));

        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].temperature, REFINE_TEMPERATURE);
        assert_eq!(prompts[0].deadline_ms, 8_000);
        assert!(prompts[0].prompt.contains("the question"));
        assert!(prompts[0].prompt.contains("draft text"));
    }

    #[tokio::test]
    async fn review_classifies_outcomes() {
        let same = Refiner::new(Arc::new(Scripted::new(Ok("  answer \n".into()))), 8_000, 512);
        assert_eq!(same.review("answer", "q").await, Refinement::Unchanged);

        let changed = Refiner::new(Arc::new(Scripted::new(Ok("fixed".into()))), 8_000, 512);
        assert_eq!(changed.review("answer", "q").await, Refinement::Refined("fixed".into()));

        let empty = Refiner::new(Arc::new(Scripted::new(Ok("   ".into()))), 8_000, 512);
        assert_eq!(empty.review("answer", "q").await, Refinement::Skipped(Degraded::EmptyOutput));
    }
}
