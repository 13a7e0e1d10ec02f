use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::pipeline::{Answer, Intent, RelayReport};
use crate::models::Mode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnLog {
    pub id: String,
    pub timestamp: String,
    pub query: String,
    pub intent: Option<String>,
    pub mode: String,
    pub streamed: bool,
    pub generation_latency_ms: u64,
    pub chunks: usize,
    pub verification: Option<String>,
    pub regenerated: bool,
    pub refinement: Option<String>,
    pub total_latency_ms: u64,
    pub error: Option<String>,
}

impl TurnLog {
    pub fn new(query: &str, mode: Mode, streamed: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            query: query.to_string(),
            intent: None,
            mode: mode.as_str().to_string(),
            streamed,
            generation_latency_ms: 0,
            chunks: 0,
            verification: None,
            regenerated: false,
            refinement: None,
            total_latency_ms: 0,
            error: None,
        }
    }

    pub fn record_answer(&mut self, answer: &Answer) {
        self.intent = Some(answer.intent.to_string());
        self.generation_latency_ms = answer.generation_latency_ms;
        self.verification = answer.verification.as_ref().map(|v| match &v.error {
            None => "passed".to_string(),
            Some(err) => format!("failed: {}", err),
        });
        self.regenerated = answer.regenerated;
        self.refinement = answer.refinement.as_ref().map(|r| r.label().to_string());
    }

    pub fn record_stream(&mut self, intent: Intent, report: &RelayReport, generation_latency_ms: u64) {
        self.intent = Some(intent.to_string());
        self.generation_latency_ms = generation_latency_ms;
        self.chunks = report.chunks;
        self.refinement = report.refinement.as_ref().map(|r| r.label().to_string());
        self.error = report.error.clone();
    }

    pub fn summary(&self) -> String {
        format!(
            "Intent: {} | Mode: {} | Streamed: {} | Generation: {:.1}s | Total: {:.1}s | Regenerated: {} | Refinement: {}{}",
            self.intent.as_deref().unwrap_or("-"),
            self.mode,
            self.streamed,
            self.generation_latency_ms as f64 / 1000.0,
            self.total_latency_ms as f64 / 1000.0,
            self.regenerated,
            self.refinement.as_deref().unwrap_or("-"),
            self.error
                .as_deref()
                .map(|e| format!(" | Error: {}", e))
                .unwrap_or_default(),
        )
    }
}

pub struct TurnLogger {
    dir: PathBuf,
    // Serializes appends from concurrent requests.
    lock: Mutex<()>,
}

impl TurnLogger {
    pub fn new(dir: &str) -> Result<Self> {
        let dir = PathBuf::from(dir);
        fs::create_dir_all(&dir).context("Failed to create logs directory")?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn write(&self, turn: &TurnLog) -> Result<()> {
        let json = serde_json::to_string(turn).context("Failed to serialize turn log")?;
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let path = self.dir.join("turns.jsonl");
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context("Failed to open log file")?;

        writeln!(file, "{}", json).context("Failed to write log")?;

        Ok(())
    }
}
