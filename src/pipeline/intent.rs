use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intent {
    Coding,
    Debug,
    Behavioral,
    Theory,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Coding => "Coding",
            Intent::Debug => "Debug",
            Intent::Behavioral => "Behavioral",
            Intent::Theory => "Theory",
        }
    }

    /// Answers to these intents carry code worth a second look.
    pub fn is_code_bearing(self) -> bool {
        matches!(self, Intent::Coding | Intent::Debug)
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const CODING_KEYWORDS: &[&str] = &[
    "code",
    "implement",
    "write",
    "function",
    "program",
    "algorithm",
];

const DEBUG_KEYWORDS: &[&str] = &["error", "bug", "fix", "not working", "wrong"];

const BEHAVIORAL_KEYWORDS: &[&str] = &[
    "tell me about",
    "why should",
    "describe a time",
    "strength",
    "weakness",
];

/// Keyword classification. Checked in priority order; `Theory` when nothing matches.
pub fn classify(query: &str) -> Intent {
    let q = query.to_lowercase();
    let matches_any = |keywords: &[&str]| keywords.iter().any(|k| q.contains(k));

    if matches_any(CODING_KEYWORDS) {
        Intent::Coding
    } else if matches_any(DEBUG_KEYWORDS) {
        Intent::Debug
    } else if matches_any(BEHAVIORAL_KEYWORDS) {
        Intent::Behavioral
    } else {
        Intent::Theory
    }
}
