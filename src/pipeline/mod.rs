pub mod intent;
pub mod prompt;
pub mod refiner;
pub mod relay;
pub mod verifier;

use std::sync::Arc;
use std::time::Instant;

use crate::error::PipelineError;
use crate::llm::{ChunkStream, StreamingGenerator};
use crate::models::{GenerationRequest, HistoryTurn, Mode, Query, VerificationResult};
use crate::render::first_code_block;

pub use intent::{classify, Intent};
pub use refiner::{Refinement, Refiner};
pub use relay::{Relay, RelayReport};
pub use verifier::{CodeEvaluator, NodeEvaluator, Verifier};

/// How the blocking path double-checks code in a full answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockingCheck {
    /// Execute the first fenced block; regenerate once if it throws.
    Sandbox,
    /// Send the draft through the refiner and keep whatever comes back.
    Refine,
}

impl std::str::FromStr for BlockingCheck {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(BlockingCheck::Sandbox),
            "refine" => Ok(BlockingCheck::Refine),
            other => Err(format!("unknown verification policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub deadline_ms: u64,
    pub stream_idle_timeout_ms: u64,
    pub blocking_check: BlockingCheck,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_output_tokens: 1024,
            temperature: 0.7,
            deadline_ms: 15_000,
            stream_idle_timeout_ms: 30_000,
            blocking_check: BlockingCheck::Sandbox,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub intent: Intent,
    pub solution: String,
    pub verification: Option<VerificationResult>,
    pub regenerated: bool,
    pub refinement: Option<Refinement>,
    pub generation_latency_ms: u64,
}

pub struct OpenStream {
    pub intent: Intent,
    pub chunks: ChunkStream,
}

pub struct Pipeline {
    generator: Arc<dyn StreamingGenerator>,
    verifier: Verifier,
    refiner: Arc<Refiner>,
    settings: GenerationSettings,
}

impl Pipeline {
    pub fn new(
        generator: Arc<dyn StreamingGenerator>,
        verifier: Verifier,
        refiner: Refiner,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            generator,
            verifier,
            refiner: Arc::new(refiner),
            settings,
        }
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    pub fn relay(&self) -> Relay {
        Relay::new(self.refiner.clone(), self.settings.stream_idle_timeout_ms)
    }

    fn request(&self, prompt: String) -> GenerationRequest {
        GenerationRequest {
            prompt,
            max_output_tokens: self.settings.max_output_tokens,
            temperature: self.settings.temperature,
            deadline_ms: self.settings.deadline_ms,
        }
    }

    async fn generate(&self, query_text: &str, intent: Intent, mode: Mode) -> Result<String, PipelineError> {
        let request = self.request(prompt::build(query_text, intent, mode));
        self.generator.generate(&request).await
    }

    /// Blocking path: one generation, then at most one regeneration when the
    /// sandbox rejects the first fenced block.
    pub async fn answer(&self, query: &Query) -> Result<Answer, PipelineError> {
        let intent = classify(query.text());
        tracing::info!(%intent, mode = query.mode().as_str(), "answering query");

        let gen_start = Instant::now();
        let mut solution = self.generate(query.text(), intent, query.mode()).await?;
        let mut answer = Answer {
            intent,
            solution: String::new(),
            verification: None,
            regenerated: false,
            refinement: None,
            generation_latency_ms: 0,
        };

        if query.mode() == Mode::Full {
            match self.settings.blocking_check {
                BlockingCheck::Sandbox if intent == Intent::Coding => {
                    if let Some(result) = self.verify_first_block(&solution).await {
                        if !result.success {
                            let error = result.error.as_deref().unwrap_or("unknown error");
                            tracing::warn!(%error, "verification failed, regenerating");
                            let correction = prompt::correction_query(query.text(), error);
                            solution = self.generate(&correction, intent, query.mode()).await?;
                            answer.regenerated = true;

                            let second = self.verify_first_block(&solution).await;
                            if let Some(second) = &second {
                                if !second.success {
                                    tracing::warn!(error = ?second.error, "regenerated answer still fails verification");
                                }
                            }
                            answer.verification = second;
                        } else {
                            answer.verification = Some(result);
                        }
                    }
                }
                BlockingCheck::Refine if intent.is_code_bearing() => {
                    if first_code_block(&solution).is_some() {
                        let refinement = self.refiner.review(&solution, query.text()).await;
                        if let Refinement::Refined(text) = &refinement {
                            solution = text.clone();
                        }
                        answer.refinement = Some(refinement);
                    }
                }
                _ => {}
            }
        }

        answer.generation_latency_ms = gen_start.elapsed().as_millis() as u64;
        answer.solution = solution;
        Ok(answer)
    }

    async fn verify_first_block(&self, solution: &str) -> Option<VerificationResult> {
        let (lang, code) = first_code_block(solution)?;
        let result = self.verifier.verify(lang, code).await;
        tracing::info!(language = lang, success = result.success, "sandbox verification");
        Some(result)
    }

    /// Streaming path: classification and prompt assembly, then an open
    /// provider stream. Failures before the first chunk are returned here.
    pub async fn open_stream(
        &self,
        query: &Query,
        history: &[HistoryTurn],
    ) -> Result<OpenStream, PipelineError> {
        let intent = classify(query.text());
        tracing::info!(%intent, mode = query.mode().as_str(), history = history.len(), "opening stream");

        let request = self.request(prompt::build_for(query, intent));
        let chunks = self.generator.generate_stream(&request, history).await?;
        Ok(OpenStream { intent, chunks })
    }
}
