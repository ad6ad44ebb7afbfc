//! Summarization prompt rendering.
//!
//! A template must contain `{conversation_text}` and may contain
//! `{max_summary_words}`. The conversation text is the previous summary (if
//! any) followed by the new events, one `[role]: text` block per event. The
//! word limit is a generation instruction only; the output is never
//! truncated after the fact. A limit of 0 means unlimited: template lines
//! that mention `{max_summary_words}` are left out of the prompt.

use crate::session::Event;
use crate::{ContextError, Result};

pub const CONVERSATION_PLACEHOLDER: &str = "{conversation_text}";
pub const MAX_WORDS_PLACEHOLDER: &str = "{max_summary_words}";

pub const DEFAULT_PROMPT_TEMPLATE: &str = "\
Summarize the following conversation concisely. Focus on:
- What was accomplished and what remains to be done
- Key facts, findings and decisions
- Failed approaches and why they failed
- Names, paths and identifiers mentioned verbatim

Rules:
- Only include facts explicitly stated in the conversation. Do not infer or extrapolate.
- If there is an existing summary, merge the new information into it to produce a single \
cohesive summary. Do not simply append. The result must replace the existing summary entirely.

{conversation_text}";

/// A validated summarization prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
    max_summary_words: usize,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            max_summary_words: 0,
        }
    }
}

impl PromptTemplate {
    /// Validate and wrap `template`. Fails when the conversation placeholder
    /// is missing.
    pub fn new(template: impl Into<String>, max_summary_words: usize) -> Result<Self> {
        let template = template.into();
        if !template.contains(CONVERSATION_PLACEHOLDER) {
            return Err(ContextError::InvalidTemplate(format!(
                "template must contain {CONVERSATION_PLACEHOLDER}"
            )));
        }
        Ok(Self {
            template,
            max_summary_words,
        })
    }

    pub fn max_summary_words(&self) -> usize {
        self.max_summary_words
    }

    /// Render the prompt for `events`, merging into `previous` when given.
    pub fn render(&self, previous: Option<&str>, events: &[Event]) -> String {
        let conversation = format_conversation(previous, events);
        let template = match self.max_summary_words {
            0 => without_word_limit(&self.template),
            n => self.template.replace(MAX_WORDS_PLACEHOLDER, &n.to_string()),
        };
        let mut prompt = template.replace(CONVERSATION_PLACEHOLDER, &conversation);

        if self.max_summary_words > 0 && !self.template.contains(MAX_WORDS_PLACEHOLDER) {
            prompt.push_str(&format!(
                "\n\nKeep the summary under {} words.",
                self.max_summary_words
            ));
        }
        prompt
    }
}

/// Drop the lines that state a word limit. A line that also holds the
/// conversation keeps it and loses only the placeholder.
fn without_word_limit(template: &str) -> String {
    template
        .split_inclusive('\n')
        .filter(|line| {
            !line.contains(MAX_WORDS_PLACEHOLDER) || line.contains(CONVERSATION_PLACEHOLDER)
        })
        .collect::<String>()
        .replace(MAX_WORDS_PLACEHOLDER, "")
}

/// Format the merge input: existing summary section, then one block per event.
pub fn format_conversation(previous: Option<&str>, events: &[Event]) -> String {
    let mut out = String::new();
    if let Some(existing) = previous {
        out.push_str("=== EXISTING SUMMARY ===\n");
        out.push_str(existing);
        out.push_str("\n\n=== NEW MESSAGES TO SUMMARIZE ===\n");
    }
    for event in events {
        let role = event.message.role;
        let text = event.message.text();
        let text = if text.is_empty() { "[no content]".to_string() } else { text };
        if event.author.is_empty() {
            out.push_str(&format!("[{role}]: {text}\n\n"));
        } else {
            out.push_str(&format!("[{role} {}]: {text}\n\n", event.author));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;

    fn events() -> Vec<Event> {
        vec![
            Event::new("alice", Message::user("Read src/main.rs")),
            Event::new("bot", Message::assistant_text("It defines main().")),
        ]
    }

    #[test]
    fn rejects_template_without_conversation() {
        let err = PromptTemplate::new("Summarize in {max_summary_words} words", 50).unwrap_err();
        assert!(matches!(err, ContextError::InvalidTemplate(_)));
    }

    #[test]
    fn default_template_renders_events() {
        let prompt = PromptTemplate::default().render(None, &events());
        assert!(prompt.contains("[user alice]: Read src/main.rs"));
        assert!(prompt.contains("[assistant bot]: It defines main()."));
        assert!(!prompt.contains("EXISTING SUMMARY"));
        assert!(!prompt.contains(CONVERSATION_PLACEHOLDER));
        assert!(!prompt.contains("words."));
    }

    #[test]
    fn previous_summary_is_merged() {
        let prompt = PromptTemplate::default().render(Some("Earlier: greeted."), &events());
        let existing = prompt.find("EXISTING SUMMARY").unwrap();
        let new = prompt.find("NEW MESSAGES").unwrap();
        assert!(existing < new);
        assert!(prompt.contains("Earlier: greeted."));
    }

    #[test]
    fn word_limit_placeholder() {
        let template = PromptTemplate::new("Max {max_summary_words} words.\n{conversation_text}", 80).unwrap();
        let prompt = template.render(None, &events());
        assert!(prompt.starts_with("Max 80 words."));
        assert!(!prompt.contains("Keep the summary under"));
    }

    #[test]
    fn zero_word_limit_drops_the_limit_line() {
        let template =
            PromptTemplate::new("Keep it under {max_summary_words} words.\n{conversation_text}", 0).unwrap();
        let prompt = template.render(None, &events());
        assert!(prompt.starts_with("[user alice]: Read src/main.rs"));
        assert!(!prompt.contains("words"));
        assert!(!prompt.contains(MAX_WORDS_PLACEHOLDER));

        let inline = PromptTemplate::new("{conversation_text} ({max_summary_words})", 0).unwrap();
        let prompt = inline.render(None, &events());
        assert!(prompt.contains("[assistant bot]: It defines main()."));
        assert!(prompt.ends_with(" ()"));
    }

    #[test]
    fn word_limit_appended_without_placeholder() {
        let template = PromptTemplate::new("{conversation_text}", 120).unwrap();
        let prompt = template.render(None, &events());
        assert!(prompt.ends_with("Keep the summary under 120 words."));
    }

    #[test]
    fn empty_message_is_marked() {
        let events = vec![Event::new("", Message::assistant_tool_calls(vec![]))];
        assert_eq!(format_conversation(None, &events), "[assistant]: [no content]\n\n");
    }
}
