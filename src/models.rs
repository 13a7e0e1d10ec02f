use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Full,
    Hint,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Full => "full",
            Mode::Hint => "hint",
        }
    }
}

/// Anything other than `hint` (any case) asks for a full answer.
impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(match raw {
            Some(mode) if mode.trim().eq_ignore_ascii_case("hint") => Mode::Hint,
            _ => Mode::Full,
        })
    }
}

/// A validated user query. The text is never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    text: String,
    mode: Mode,
}

impl Query {
    pub fn new(text: impl Into<String>, mode: Mode) -> Result<Self, PipelineError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(PipelineError::Validation("Query is required".into()));
        }
        Ok(Self { text, mode })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "AI", alias = "model")]
    Assistant,
    #[serde(other)]
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub text: String,
}

impl HistoryTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// One primary-provider call, built fresh for every dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub deadline_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub success: bool,
    pub error: Option<String>,
}

impl VerificationResult {
    pub fn passed() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_query_is_rejected() {
        assert!(matches!(
            Query::new("   ", Mode::Full),
            Err(PipelineError::Validation(_))
        ));
        assert!(Query::new("", Mode::Hint).is_err());
    }

    #[test]
    fn roles_accept_legacy_spellings() {
        let turns: Vec<HistoryTurn> = serde_json::from_str(
            r#"[{"role":"AI","text":"a"},{"role":"User","text":"b"},{"role":"assistant","text":"c"},{"role":"system","text":"d"}]"#,
        )
        .unwrap();
        let roles: Vec<Role> = turns.iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::Assistant, Role::User, Role::Assistant, Role::User]
        );
    }

    #[test]
    fn mode_defaults_to_full() {
        assert_eq!(Mode::default(), Mode::Full);
        let mode: Mode = serde_json::from_str("\"hint\"").unwrap();
        assert_eq!(mode, Mode::Hint);
    }

    #[test]
    fn unknown_modes_mean_full() {
        for raw in ["\"FULL\"", "\"detailed\"", "null"] {
            assert_eq!(serde_json::from_str::<Mode>(raw).unwrap(), Mode::Full);
        }
        assert_eq!(serde_json::from_str::<Mode>("\"HINT\"").unwrap(), Mode::Hint);
    }

    #[test]
    fn query_text_is_kept_verbatim() {
        let query = Query::new("  reverse a list\n", Mode::Full).unwrap();
        assert_eq!(query.text(), "  reverse a list\n");
    }
}
