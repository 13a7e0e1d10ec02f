use super::intent::Intent;
use crate::models::{Mode, Query};

const SYSTEM_PROMPT: &str = r#"You are an expert interview assistant. Be concise and accurate.
- Give direct answers
- Code must be correct and runnable
- Keep explanations brief
- No filler text"#;

const HINT_INSTRUCTION: &str = "Give 2-3 hints only, no full solution.";

fn instruction_for(intent: Intent) -> &'static str {
    match intent {
        Intent::Coding => "Provide working code. Include brief approach and complexity.",
        Intent::Debug => "Identify the bug and provide the fix.",
        Intent::Behavioral => "Give a structured, professional answer.",
        Intent::Theory => "Explain concisely with a simple example.",
    }
}

/// Assembles the prompt body. Conversation history is never inlined here;
/// providers receive it as structured turns.
pub fn build(query: &str, intent: Intent, mode: Mode) -> String {
    let instruction = match mode {
        Mode::Hint => HINT_INSTRUCTION,
        Mode::Full => instruction_for(intent),
    };

    format!("{}\n\n{}\n\nQuestion: {}", SYSTEM_PROMPT, instruction, query)
}

pub fn build_for(query: &Query, intent: Intent) -> String {
    build(query.text(), intent, query.mode())
}

/// Query text for the single regeneration after a failed sandbox run.
pub fn correction_query(original_query: &str, error: &str) -> String {
    format!(
        "The previous solution had an error: {}. Please provide a corrected version.\n\nQuery: {}",
        error, original_query
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_intent_instruction_in_full_mode() {
        let prompt = build("reverse a list", Intent::Coding, Mode::Full);
        assert!(prompt.starts_with("You are an expert interview assistant."));
        assert!(prompt.contains("Provide working code."));
        assert!(prompt.ends_with("Question: reverse a list"));
    }

    #[test]
    fn hint_mode_overrides_every_intent() {
        for intent in [
            Intent::Coding,
            Intent::Debug,
            Intent::Behavioral,
            Intent::Theory,
        ] {
            let prompt = build("q", intent, Mode::Hint);
            assert!(prompt.contains(HINT_INSTRUCTION));
            assert!(!prompt.contains(instruction_for(intent)));
        }
    }

    #[test]
    fn correction_embeds_error_and_query() {
        let text = correction_query("sum two numbers", "x is not defined");
        assert!(text.contains("x is not defined"));
        assert!(text.ends_with("Query: sum two numbers"));
    }
}
