use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::PipelineError;
use crate::models::VerificationResult;

/// Runs a code fragment in isolation.
#[async_trait]
pub trait CodeEvaluator: Send + Sync {
    /// `Ok` carries the execution verdict. `Err` means the fragment could not
    /// be evaluated at all (unsupported language, evaluator unavailable).
    async fn run(&self, language: &str, code: &str) -> Result<VerificationResult, PipelineError>;
}

/// Executes the fragment inside a fresh `vm` context that only exposes `console`.
const NODE_SANDBOX: &str = r#"
const vm = require('vm');
const timeout = Number(process.env.SANDBOX_TIMEOUT_MS) || 1000;
let source = '';
process.stdin.setEncoding('utf8');
process.stdin.on('data', (chunk) => { source += chunk; });
process.stdin.on('end', () => {
  try {
    const script = new vm.Script(source);
    script.runInContext(vm.createContext({ console }), { timeout });
  } catch (err) {
    process.stderr.write(String(err && err.message !== undefined ? err.message : err));
    process.exitCode = 1;
  }
});
"#;

/// Slack for node start-up on top of the in-VM limit.
const PROCESS_GRACE_MS: u64 = 2_000;

#[derive(Debug, Clone)]
pub struct NodeEvaluator {
    node_binary: String,
    timeout_ms: u64,
}

impl NodeEvaluator {
    pub fn new(node_binary: &str, timeout_ms: u64) -> Self {
        Self {
            node_binary: node_binary.to_string(),
            timeout_ms,
        }
    }

    pub fn supports(language: &str) -> bool {
        matches!(
            language.to_ascii_lowercase().as_str(),
            "" | "js" | "javascript"
        )
    }
}

#[async_trait]
impl CodeEvaluator for NodeEvaluator {
    async fn run(&self, language: &str, code: &str) -> Result<VerificationResult, PipelineError> {
        if !Self::supports(language) {
            return Err(PipelineError::UnsupportedLanguage(language.to_string()));
        }

        let mut child = Command::new(&self.node_binary)
            .arg("-e")
            .arg(NODE_SANDBOX)
            .env("SANDBOX_TIMEOUT_MS", self.timeout_ms.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::provider("sandbox", format!("failed to start {}: {}", self.node_binary, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // The child may exit before reading everything; its status tells the story.
            if let Err(e) = stdin.write_all(code.as_bytes()).await {
                tracing::debug!(error = %e, "sandbox stdin closed early");
            }
        }

        let limit = Duration::from_millis(self.timeout_ms + PROCESS_GRACE_MS);
        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(output) => output
                .map_err(|e| PipelineError::provider("sandbox", format!("failed to wait for node: {}", e)))?,
            Err(_) => {
                return Ok(VerificationResult::failed(format!(
                    "Script execution timed out after {}ms",
                    self.timeout_ms
                )))
            }
        };

        let console = String::from_utf8_lossy(&output.stdout);
        if !console.is_empty() {
            tracing::debug!(console = %console.trim_end(), "sandbox console output");
        }

        if output.status.success() {
            Ok(VerificationResult::passed())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("sandbox exited with {}", output.status)
            } else {
                stderr
            };
            Ok(VerificationResult::failed(message))
        }
    }
}

/// Sandbox verification policy: only verify what can actually be executed.
#[derive(Clone)]
pub struct Verifier {
    evaluator: Option<Arc<dyn CodeEvaluator>>,
}

impl Verifier {
    pub fn new(evaluator: Arc<dyn CodeEvaluator>) -> Self {
        Self {
            evaluator: Some(evaluator),
        }
    }

    pub fn disabled() -> Self {
        Self { evaluator: None }
    }

    pub async fn verify(&self, language: &str, code: &str) -> VerificationResult {
        let Some(evaluator) = &self.evaluator else {
            return VerificationResult::passed();
        };

        match evaluator.run(language, code).await {
            Ok(result) => result,
            Err(PipelineError::UnsupportedLanguage(lang)) => {
                tracing::info!(language = %lang, "skipping verification for unsupported language");
                VerificationResult::passed()
            }
            Err(err) => {
                tracing::warn!(error = %err, "sandbox unavailable, treating code as verified");
                VerificationResult::passed()
            }
        }
    }
}
