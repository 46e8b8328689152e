//! Listener notices.
//!
//! The orchestrator's only externally observable real-time output path. The
//! listener never sees raw low-level errors: only text increments, card
//! creation notices, and a completion notice.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Text,
    Card,
    Complete,
}

/// One notification delivered to the listener callback.
///
/// For `Card` notices the content is `card_id|tool_call_id|preview`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notice {
    pub conversation_id: String,
    #[serde(rename = "type")]
    pub kind: NoticeKind,
    pub content: String,
}

impl Notice {
    #[must_use]
    pub fn text(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(conversation_id, NoticeKind::Text, content)
    }

    #[must_use]
    pub fn card(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(conversation_id, NoticeKind::Card, content)
    }

    #[must_use]
    pub fn complete(conversation_id: impl Into<String>) -> Self {
        Self::new(conversation_id, NoticeKind::Complete, "Stream complete")
    }

    fn new(
        conversation_id: impl Into<String>,
        kind: NoticeKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            kind,
            content: content.into(),
        }
    }
}
