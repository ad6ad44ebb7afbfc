//! Builds the model-facing message list for a request.
//!
//! Two mutually exclusive modes, chosen by configuration:
//!
//! - **Summary**: `[system prompt] + [summary message] + [events after the
//!   summary's boundary]`. No tailoring is applied; the summary bounds
//!   growth.
//! - **Tailoring**: `[system prompt] + [last N events]`, reduced to the
//!   token budget by a [`Tailor`].

use crate::Message;
use crate::config::TailoringConfig;
use crate::context::Tailor;
use crate::session::Event;
use crate::summary::store::SessionSummary;
use tracing::debug;

/// Wrap a summary as a context message.
pub fn summary_message(text: &str) -> Message {
    Message::system(format!("<context_summary>\n{text}\n</context_summary>"))
}

#[derive(Debug, Clone)]
pub enum GrowthControl {
    Summary {
        add_summary_to_prompt: bool,
    },
    Tailoring {
        tailor: Tailor,
        max_tokens: usize,
        /// 0 = every event.
        max_history_messages: usize,
    },
}

#[derive(Debug, Clone)]
pub struct PromptAssembler {
    control: GrowthControl,
}

impl PromptAssembler {
    pub fn summary(add_summary_to_prompt: bool) -> Self {
        Self {
            control: GrowthControl::Summary {
                add_summary_to_prompt,
            },
        }
    }

    pub fn tailoring(tailor: Tailor, config: &TailoringConfig) -> Self {
        Self {
            control: GrowthControl::Tailoring {
                tailor,
                max_tokens: config.max_tokens,
                max_history_messages: config.max_history_messages,
            },
        }
    }

    pub fn control(&self) -> &GrowthControl {
        &self.control
    }

    pub fn uses_summary(&self) -> bool {
        matches!(self.control, GrowthControl::Summary { .. })
    }

    /// Whether requests carry the stored summary. When they do, events it
    /// covers can be left out before assembly.
    pub fn includes_summary(&self) -> bool {
        matches!(
            self.control,
            GrowthControl::Summary {
                add_summary_to_prompt: true
            }
        )
    }

    /// Assemble a request from the scoped `events` (arrival order) and the
    /// latest stored summary. The summary is ignored in tailoring mode.
    pub fn assemble(
        &self,
        system_prompt: Option<&str>,
        summary: Option<&SessionSummary>,
        events: &[Event],
    ) -> Vec<Message> {
        let mut messages: Vec<Message> = system_prompt.map(Message::system).into_iter().collect();

        match &self.control {
            GrowthControl::Summary {
                add_summary_to_prompt,
            } => {
                let summary = summary.filter(|_| *add_summary_to_prompt);
                let boundary = summary.map_or(0, |s| s.covered_until);
                if let Some(summary) = summary {
                    messages.push(summary_message(&summary.text));
                }
                let before = messages.len();
                messages.extend(
                    events
                        .iter()
                        .filter(|e| e.id > boundary)
                        .map(|e| e.message.clone()),
                );
                debug!(
                    "Assembled {} messages (summary through event {boundary}, {} new events)",
                    messages.len(),
                    messages.len() - before
                );
                messages
            }
            GrowthControl::Tailoring {
                tailor,
                max_tokens,
                max_history_messages,
            } => {
                let skip = match *max_history_messages {
                    0 => 0,
                    n => events.len().saturating_sub(n),
                };
                messages.extend(events[skip..].iter().map(|e| e.message.clone()));
                let tailored = tailor.tailor(&messages, *max_tokens);
                debug!(
                    "Tailored {} messages to {} with {} (budget {max_tokens})",
                    messages.len(),
                    tailored.len(),
                    tailor.strategy()
                );
                tailored
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TailoringStrategy;
    use crate::{MessageRole, TokenUsage};
    use chrono::Utc;

    fn events(texts: &[&str]) -> Vec<Event> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let message = if i % 2 == 0 {
                    Message::user(*t)
                } else {
                    Message::assistant_text(*t)
                };
                let mut e = Event::new("a", message);
                e.id = i as u64 + 1;
                e
            })
            .collect()
    }

    fn summary(until: u64) -> SessionSummary {
        SessionSummary {
            text: "the story so far".into(),
            covered_until: until,
            generated_at: Utc::now(),
            usage: TokenUsage::default(),
        }
    }

    #[test]
    fn summary_mode_uses_incremental_events() {
        let assembler = PromptAssembler::summary(true);
        let evs = events(&["u1", "a1", "u2", "a2", "u3"]);
        let msgs = assembler.assemble(Some("be brief"), Some(&summary(3)), &evs);

        let texts: Vec<String> = msgs.iter().map(|m| m.text()).collect();
        assert_eq!(texts.len(), 4);
        assert_eq!(texts[0], "be brief");
        assert_eq!(msgs[1].role, MessageRole::System);
        assert!(texts[1].contains("<context_summary>\nthe story so far\n</context_summary>"));
        assert_eq!(texts[2..], ["a2".to_string(), "u3".to_string()]);
    }

    #[test]
    fn summary_mode_without_summary_sends_everything() {
        let assembler = PromptAssembler::summary(true);
        let evs = events(&["u1", "a1"]);
        let msgs = assembler.assemble(None, None, &evs);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, MessageRole::User);
    }

    #[test]
    fn summary_can_be_kept_out_of_prompt() {
        let assembler = PromptAssembler::summary(false);
        let evs = events(&["u1", "a1", "u2"]);
        let msgs = assembler.assemble(None, Some(&summary(2)), &evs);
        assert_eq!(msgs.len(), 3);
        assert!(msgs.iter().all(|m| !m.text().contains("context_summary")));
        assert!(assembler.uses_summary());
        assert!(!assembler.includes_summary());
        assert!(PromptAssembler::summary(true).includes_summary());
    }

    #[test]
    fn tailoring_mode_ignores_summary_and_fits_budget() {
        let config = TailoringConfig {
            strategy: TailoringStrategy::HeadOut,
            max_tokens: 25,
            max_history_messages: 0,
        };
        let assembler = PromptAssembler::tailoring(Tailor::new(config.strategy), &config);
        let long = "x".repeat(40);
        let l = long.as_str();
        let evs = events(&[l, l, l, l, l]);
        let msgs = assembler.assemble(Some("sys"), Some(&summary(4)), &evs);

        assert!(!assembler.uses_summary());
        assert_eq!(msgs[0].role, MessageRole::System);
        assert!(msgs.iter().all(|m| !m.text().contains("context_summary")));
        // sys (1 token) + two 10-token messages fit in 25.
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs.last().map(|m| m.role), Some(MessageRole::User));
    }

    #[test]
    fn history_window_applies_before_tailoring() {
        let config = TailoringConfig {
            max_history_messages: 2,
            ..Default::default()
        };
        let assembler = PromptAssembler::tailoring(Tailor::new(config.strategy), &config);
        let evs = events(&["u1", "a1", "u2", "a2"]);
        let msgs = assembler.assemble(None, None, &evs);
        let texts: Vec<String> = msgs.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["u2".to_string(), "a2".to_string()]);
    }
}
