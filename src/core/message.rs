//! Conversation transcript types shared by the front ends.

use std::collections::VecDeque;

pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";

pub const WELCOME_MESSAGE: &str = "Hello! I'm your data asset discovery assistant.\n\n\
I can help you:\n\
- Find tables and models in your dbt project\n\
- Understand table field structures and meanings\n\
- Explore data assets\n\n\
Try asking me a question, or pick one of the example questions.";

pub const EXAMPLE_QUESTIONS: [&str; 6] = [
    "What tables do we have?",
    "Are there any order-related tables?",
    "Describe the structure of the dim_customers table in detail",
    "Which tables contain customer information?",
    "Tell me about tables related to sales data",
    "List all dimension tables",
];

#[derive(Debug, Clone)]
pub struct Message {
    pub role: &'static str,
    pub content: String,
}

/// Ordered, append-only record of one front end's conversation. Cleared only
/// by an explicit user action; never persisted.
#[derive(Debug, Default)]
pub struct Transcript {
    messages: VecDeque<Message>,
}

impl Transcript {
    pub fn with_welcome() -> Self {
        let mut transcript = Self::default();
        transcript.push_assistant(WELCOME_MESSAGE.to_string());
        transcript
    }

    pub fn push_user(&mut self, content: String) {
        self.messages.push_back(Message {
            role: ROLE_USER,
            content,
        });
    }

    pub fn push_assistant(&mut self, content: String) {
        self.messages.push_back(Message {
            role: ROLE_ASSISTANT,
            content,
        });
    }

    /// Drops the whole history and re-adds the welcome message.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.push_assistant(WELCOME_MESSAGE.to_string());
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
