//! Conversation orchestration and tool-call confirmation.
//!
//! This crate ties the pieces together: the streaming client from
//! `dbchat-providers`, the tool layer from `dbchat-tools`, and the
//! human-in-the-loop confirmation flow that sits between them.
//!
//! A turn starts with [`ChatService::send_message`] and ends either with a
//! completion notice or with one pending [`ConfirmCard`] per tool call the
//! model requested. [`ChatService::resolve_tool_call`] settles a card; the
//! confirmed or rejected outcome flows back into the conversation and the
//! model is asked to continue.

pub mod cards;
pub mod chat;

pub use crate::cards::{
    CARD_TTL, CardError, CardRegistry, CardStats, CardStatus, ConfirmCard,
};
pub use crate::chat::{ChatError, ChatService, ConversationStore, Listener, StoreError};
