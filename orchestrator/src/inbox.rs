//! Per-agent secondary inbox.
//!
//! The inbox is separate from an agent's primary message queue. The runtime
//! uses it for best-effort fallback delivery from check-ins that finished
//! without messaging their owner. Messages stay in the inbox after being
//! read; consuming only flips their `read` flag.

use std::sync::Mutex;
use std::sync::PoisonError;

use codex_agent_protocol::AgentId;
use codex_agent_protocol::protocol::InboxMessage;

#[derive(Debug, Default)]
pub struct Inbox {
    messages: Mutex<Vec<InboxMessage>>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, from: AgentId, content: impl Into<String>) {
        let message = InboxMessage {
            from,
            timestamp: chrono::Utc::now().to_rfc3339(),
            content: content.into(),
            read: false,
        };
        self.lock().push(message);
    }

    /// Every message, read or not.
    pub fn read_all(&self) -> Vec<InboxMessage> {
        self.lock().clone()
    }

    pub fn unread_count(&self) -> usize {
        self.lock().iter().filter(|m| !m.read).count()
    }

    /// Return unread messages and mark them read.
    pub fn consume_unread(&self) -> Vec<InboxMessage> {
        let mut messages = self.lock();
        let unread: Vec<InboxMessage> = messages.iter().filter(|m| !m.read).cloned().collect();
        for message in messages.iter_mut() {
            message.read = true;
        }
        unread
    }

    /// Consume unread messages rendered as `<{tag} from="...">` blocks for
    /// injection into the owner's conversation.
    pub fn consume_as_tags(&self, tag: &str) -> Option<String> {
        let unread = self.consume_unread();
        if unread.is_empty() {
            return None;
        }
        let blocks: Vec<String> = unread
            .iter()
            .map(|m| format!("<{tag} from=\"{}\">\n{}\n</{tag}>", m.from, m.content))
            .collect();
        Some(blocks.join("\n\n"))
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<InboxMessage>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
