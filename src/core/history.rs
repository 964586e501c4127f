use crate::core::message::ConversationMessage;

pub const DEFAULT_MESSAGE_WINDOW: usize = 10;

/// Conversation history bounded to a sliding window.
///
/// A configured system prompt is pinned at index 0 and never counted against
/// the window. Pruning never leaves a tool result as the oldest message.
#[derive(Debug, Clone)]
pub struct History {
    system: Option<ConversationMessage>,
    messages: Vec<ConversationMessage>,
    window: usize,
}

impl History {
    pub fn new(system_prompt: Option<String>, window: usize) -> Self {
        Self {
            system: system_prompt
                .filter(|prompt| !prompt.trim().is_empty())
                .map(ConversationMessage::system),
            messages: Vec::new(),
            window,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn push(&mut self, message: ConversationMessage) {
        self.messages.push(message);
    }

    /// Full history including the pinned system message.
    pub fn messages(&self) -> Vec<ConversationMessage> {
        self.system
            .iter()
            .chain(self.messages.iter())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len() + usize::from(self.system.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops the oldest unpinned messages beyond the window, then any tool
    /// results left without their assistant message. Returns how many
    /// messages were removed.
    pub fn prune(&mut self) -> usize {
        if self.messages.len() <= self.window {
            return 0;
        }
        let mut removed = self.messages.len() - self.window;
        self.messages.drain(..removed);

        let orphaned = self
            .messages
            .iter()
            .take_while(|message| message.is_tool_result())
            .count();
        self.messages.drain(..orphaned);
        removed += orphaned;

        tracing::debug!(removed, remaining = self.len(), "Pruned conversation history");
        removed
    }
}
