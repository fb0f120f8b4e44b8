//! Renders context blocks, summaries and turn prompts from stored memory

use crate::memory_db::{ContextEntry, MessageRole, StoredMessage};

/// Associated documents rendered into a prompt. Caps prompt growth.
pub const PROMPT_CONTEXT_LIMIT: usize = 3;

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";
const PREVIEW_CHARS: usize = 100;
const SUMMARY_WINDOW: usize = 6;

pub struct ContextBuilder;

impl ContextBuilder {
    /// Top entries as `Title:/Content:` pairs wrapped in a usage instruction.
    /// Entries must already be relevance-ordered. Empty input renders nothing.
    pub fn render_context_block(entries: &[ContextEntry]) -> String {
        if entries.is_empty() {
            return String::new();
        }

        let context_text = entries
            .iter()
            .take(PROMPT_CONTEXT_LIMIT)
            .map(|entry| format!("Title: {}\nContent: {}", entry.document.title, entry.document.content))
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);

        format!(
            "\nContext Information:\n{}\n\nPlease use this context to inform your responses when relevant.\n",
            context_text
        )
    }

    /// Short digest of the active context.
    pub fn render_context_summary(entries: &[ContextEntry]) -> String {
        if entries.is_empty() {
            return "No context documents attached to this conversation.".to_string();
        }

        let lines = entries
            .iter()
            .take(PROMPT_CONTEXT_LIMIT)
            .map(|entry| {
                format!(
                    "• {}: {}...",
                    entry.document.title,
                    Self::preview(&entry.document.content)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!("Active Context ({} documents):\n{}", entries.len(), lines)
    }

    /// The last few messages of `history` as `role: preview...` lines.
    pub fn render_conversation_summary(history: &[StoredMessage]) -> String {
        let start = history.len().saturating_sub(SUMMARY_WINDOW);
        history[start..]
            .iter()
            .map(|message| format!("{}: {}...", message.role, Self::preview(&message.content)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Single prompt text for the generation step.
    pub fn build_turn_prompt(context_block: &str, history: &[StoredMessage], user_input: &str) -> String {
        let mut prompt = String::new();
        if !context_block.is_empty() {
            prompt.push_str(context_block);
            prompt.push('\n');
        }
        for message in history {
            let speaker = match message.role {
                MessageRole::User => "User",
                MessageRole::Assistant => "Assistant",
                MessageRole::System => "System",
            };
            prompt.push_str(&format!("{}: {}\n", speaker, message.content));
        }
        prompt.push_str(&format!("User: {}\nAssistant:", user_input));
        prompt
    }

    fn preview(text: &str) -> &str {
        match text.char_indices().nth(PREVIEW_CHARS) {
            Some((cut, _)) => &text[..cut],
            None => text,
        }
    }
}
