//! Per-surface conversation state for the interactive client.
//!
//! A [`Session`] owns the only mutable state shared between turns: the
//! active history sent as context, the longer persisted history, and the
//! single in-flight request. Starting a new request while another is still
//! streaming marks the old one superseded; anything it produces afterwards
//! is dropped instead of rendered.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::history::{ConversationHistory, HistoryFile, ACTIVE_CAP, PERSISTED_CAP};
use crate::models::{HistoryTurn, Mode, Query};
use crate::render::{render, RenderedFragment};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Active,
    TornDown,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is not active ({0:?})")]
    NotActive(Lifecycle),
    #[error("session was torn down and cannot be restarted")]
    TornDown,
    #[error(transparent)]
    Invalid(#[from] PipelineError),
    #[error(transparent)]
    History(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the caller needs to dispatch a newly started request.
#[derive(Debug, Clone)]
pub struct PendingTurn {
    pub id: RequestId,
    pub query: Query,
    /// Active history at the moment the request started.
    pub context: Vec<HistoryTurn>,
}

#[derive(Debug)]
struct InFlight {
    id: RequestId,
    query: String,
    buffer: String,
}

pub struct Session {
    state: Lifecycle,
    mode: Mode,
    active: ConversationHistory,
    persisted: ConversationHistory,
    file: Option<HistoryFile>,
    in_flight: Option<InFlight>,
}

impl Session {
    pub fn new(file: Option<HistoryFile>, mode: Mode) -> Self {
        Self {
            state: Lifecycle::Uninitialized,
            mode,
            active: ConversationHistory::new(ACTIVE_CAP),
            persisted: ConversationHistory::new(PERSISTED_CAP),
            file,
            in_flight: None,
        }
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Active history, oldest first.
    pub fn history(&self) -> Vec<HistoryTurn> {
        self.active.turns()
    }

    /// Loads persisted history on first call. Calling it again while active
    /// does nothing.
    pub fn start(&mut self) -> Result<(), SessionError> {
        match self.state {
            Lifecycle::Active => Ok(()),
            Lifecycle::TornDown => Err(SessionError::TornDown),
            Lifecycle::Uninitialized => {
                let turns = match &self.file {
                    Some(file) => file.load()?,
                    None => Vec::new(),
                };
                self.persisted = ConversationHistory::from_turns(turns.clone(), PERSISTED_CAP);
                self.active = ConversationHistory::from_turns(turns, ACTIVE_CAP);
                self.state = Lifecycle::Active;
                tracing::debug!(turns = self.active.len(), "session started");
                Ok(())
            }
        }
    }

    /// Drops any in-flight request. Idempotent.
    pub fn stop(&mut self) {
        if self.state == Lifecycle::TornDown {
            return;
        }
        if let Some(stale) = self.in_flight.take() {
            tracing::debug!(request = %stale.id, "discarding in-flight request on stop");
        }
        self.state = Lifecycle::TornDown;
    }

    /// Starts a request, superseding whatever was in flight.
    pub fn begin(&mut self, text: &str) -> Result<PendingTurn, SessionError> {
        if self.state != Lifecycle::Active {
            return Err(SessionError::NotActive(self.state));
        }
        let query = Query::new(text, self.mode)?;

        if let Some(stale) = self.in_flight.take() {
            tracing::info!(request = %stale.id, "superseded by a newer query");
        }

        let id = RequestId(Uuid::new_v4());
        self.in_flight = Some(InFlight {
            id,
            query: query.text().to_string(),
            buffer: String::new(),
        });

        Ok(PendingTurn {
            id,
            query,
            context: self.active.turns(),
        })
    }

    pub fn is_current(&self, id: RequestId) -> bool {
        self.in_flight.as_ref().is_some_and(|f| f.id == id)
    }

    /// Appends a chunk and re-renders the whole buffer. Output from a
    /// superseded request returns `None`.
    pub fn push_chunk(&mut self, id: RequestId, chunk: &str) -> Option<RenderedFragment> {
        let current = self.in_flight.as_mut().filter(|f| f.id == id)?;
        current.buffer.push_str(chunk);
        Some(render(&current.buffer))
    }

    /// Completes the request and commits the user and assistant turns.
    /// Returns the full answer, or `None` when `id` was superseded.
    pub fn finish(&mut self, id: RequestId) -> Result<Option<String>, SessionError> {
        if !self.is_current(id) {
            return Ok(None);
        }
        let Some(done) = self.in_flight.take() else {
            return Ok(None);
        };
        self.commit(&done.query, &done.buffer)?;
        Ok(Some(done.buffer))
    }

    /// Records a completed non-streamed answer for the current request.
    pub fn complete(&mut self, id: RequestId, answer: &str) -> Result<bool, SessionError> {
        match self.in_flight.as_mut().filter(|f| f.id == id) {
            Some(current) => {
                current.buffer = answer.to_string();
                Ok(self.finish(id)?.is_some())
            }
            None => Ok(false),
        }
    }

    /// Abandons the request without touching history.
    pub fn fail(&mut self, id: RequestId) -> bool {
        if self.is_current(id) {
            self.in_flight = None;
            true
        } else {
            false
        }
    }

    pub fn clear_history(&mut self) -> Result<(), SessionError> {
        self.active.clear();
        self.persisted.clear();
        if let Some(file) = &self.file {
            file.save(&[])?;
        }
        Ok(())
    }

    fn commit(&mut self, query: &str, answer: &str) -> Result<(), SessionError> {
        if answer.trim().is_empty() {
            return Ok(());
        }
        let turns = [HistoryTurn::user(query), HistoryTurn::assistant(answer)];
        self.active.extend(turns.clone());
        self.persisted.extend(turns);
        if let Some(file) = &self.file {
            file.save(&self.persisted.turns())?;
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}
