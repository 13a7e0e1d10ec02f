use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::models::HistoryTurn;

/// Turns kept in memory and sent as conversation context.
pub const ACTIVE_CAP: usize = 20;
/// Turns kept in the history file.
pub const PERSISTED_CAP: usize = 50;

/// Append-only conversation log with FIFO eviction past `cap`.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: VecDeque<HistoryTurn>,
    cap: usize,
}

impl ConversationHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Seeds from older turns, keeping only the most recent `cap`.
    pub fn from_turns(turns: Vec<HistoryTurn>, cap: usize) -> Self {
        let mut history = Self::new(cap);
        history.extend(turns);
        history
    }

    pub fn push(&mut self, turn: HistoryTurn) {
        if self.cap == 0 {
            return;
        }
        while self.turns.len() >= self.cap {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    pub fn extend(&mut self, turns: impl IntoIterator<Item = HistoryTurn>) {
        for turn in turns {
            self.push(turn);
        }
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn turns(&self) -> Vec<HistoryTurn> {
        self.turns.iter().cloned().collect()
    }
}

/// JSON file holding the last `PERSISTED_CAP` turns across sessions.
#[derive(Debug, Clone)]
pub struct HistoryFile {
    path: PathBuf,
}

impl HistoryFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty history.
    pub fn load(&self) -> Result<Vec<HistoryTurn>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)
            .context(format!("Failed to read history file: {}", self.path.display()))?;
        let turns: Vec<HistoryTurn> =
            serde_json::from_str(&raw).context("Failed to parse history file")?;
        Ok(ConversationHistory::from_turns(turns, PERSISTED_CAP).turns())
    }

    pub fn save(&self, turns: &[HistoryTurn]) -> Result<()> {
        let start = turns.len().saturating_sub(PERSISTED_CAP);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context("Failed to create history directory")?;
        }
        let json =
            serde_json::to_string_pretty(&turns[start..]).context("Failed to serialize history")?;
        fs::write(&self.path, json).context("Failed to write history file")?;
        Ok(())
    }
}
