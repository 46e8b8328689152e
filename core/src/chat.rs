//! Conversation orchestration.
//!
//! [`ChatService::send_message`] drives one turn of the protocol: append the
//! user message, stream the model reply (forwarding each content fragment to
//! the listener as it arrives), persist the assistant message, and either
//! finish or suspend into confirmation cards when the model requested tools.
//!
//! Resolving a card re-enters the turn loop: the confirm continuation runs
//! the tool and feeds its result back into history, the reject continuation
//! records the refusal, and both then ask the model to continue. The chain
//! is a tail-call through boxed futures, so arbitrarily long tool sequences
//! never grow the stack.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use dbchat_providers::{ChatClient, StreamError};
use dbchat_tools::{ToolDispatcher, catalog, confirmation_preview};
use dbchat_types::{ChatMessage, Notice, Role, ToolCall};

use crate::cards::{CardError, CardRegistry};

/// Failure reported by the external conversation store.
#[derive(Debug, Error)]
#[error("conversation store failure: {0}")]
pub struct StoreError(pub String);

/// External persistence collaborator. Implementations provide their own
/// concurrency safety.
pub trait ConversationStore: Send + Sync {
    fn append_message(
        &self,
        conversation_id: &str,
        message: &ChatMessage,
    ) -> Result<(), StoreError>;

    /// Full ordered history for one conversation. The service filters out
    /// display-only card messages before sending it to the model.
    fn messages_for_model(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, StoreError>;
}

/// Receives every externally observable event of a conversation.
///
/// Invoked synchronously on whichever task is producing output, which may be
/// the streaming loop or a card continuation; implementations must tolerate
/// concurrent calls.
pub type Listener = Arc<dyn Fn(Notice) + Send + Sync>;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("conversation id is required")]
    MissingConversationId,

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Orchestrates conversations between the user, the model, and the
/// confirmation-gated tool layer.
///
/// Cheap to clone; clones share the card registry and collaborators.
#[derive(Clone)]
pub struct ChatService {
    client: Arc<ChatClient>,
    store: Arc<dyn ConversationStore>,
    dispatcher: ToolDispatcher,
    cards: CardRegistry,
    listener: Listener,
}

impl ChatService {
    #[must_use]
    pub fn new(
        client: ChatClient,
        store: Arc<dyn ConversationStore>,
        dispatcher: ToolDispatcher,
        listener: Listener,
    ) -> Self {
        Self {
            client: Arc::new(client),
            store,
            dispatcher,
            cards: CardRegistry::new(),
            listener,
        }
    }

    #[must_use]
    pub fn cards(&self) -> &CardRegistry {
        &self.cards
    }

    /// Drive one conversation turn for a new user message.
    pub async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), ChatError> {
        if conversation_id.is_empty() {
            tracing::warn!("conversation id is required for streaming");
            (self.listener)(Notice::text(
                conversation_id,
                "Error: create a conversation first",
            ));
            return Err(ChatError::MissingConversationId);
        }
        if !text.is_empty() {
            self.store
                .append_message(conversation_id, &ChatMessage::user(text))?;
        }
        self.run_turn(conversation_id).await
    }

    /// Resolve a pending confirmation card. The accepted branch executes the
    /// tool and continues the conversation on a background task; the caller
    /// returns as soon as the card status has flipped.
    pub fn resolve_tool_call(&self, card_id: &str, accepted: bool) -> Result<(), CardError> {
        self.cards.resolve(card_id, accepted)
    }

    async fn run_turn(&self, conversation_id: &str) -> Result<(), ChatError> {
        if !self.client.config().is_configured() {
            tracing::warn!(conversation_id, "model credentials not configured");
            (self.listener)(Notice::text(
                conversation_id,
                "AI is not configured. Set an API key to start chatting.",
            ));
            return Ok(());
        }

        let mut history = self.store.messages_for_model(conversation_id)?;
        history.retain(|message| message.role != Role::Card);

        let listener = Arc::clone(&self.listener);
        let response = self
            .client
            .send_streaming(&history, &catalog(), |chunk| {
                for choice in &chunk.choices {
                    if let Some(content) = choice.delta.content.as_deref()
                        && !content.is_empty()
                    {
                        listener(Notice::text(conversation_id, content));
                    }
                }
            })
            .await?;
        tracing::debug!(
            conversation_id,
            content_len = response.content.len(),
            tool_calls = response.tool_calls.len(),
            finish_reason = response.finish_reason.as_deref().unwrap_or(""),
            "stream complete"
        );

        let assistant = ChatMessage::assistant(&response.content, response.tool_calls.clone());
        if let Err(e) = self.store.append_message(conversation_id, &assistant) {
            tracing::error!(conversation_id, %e, "failed to persist assistant message");
        }

        if response.tool_calls.is_empty() {
            (self.listener)(Notice::complete(conversation_id));
            return Ok(());
        }

        self.handle_tool_calls(conversation_id, response.tool_calls);
        Ok(())
    }

    /// Create one confirmation card per tool call and suspend the turn.
    fn handle_tool_calls(&self, conversation_id: &str, tool_calls: Vec<ToolCall>) {
        for call in tool_calls {
            let args: serde_json::Value = match serde_json::from_str(&call.function.arguments) {
                Ok(args) => args,
                Err(e) => {
                    tracing::warn!(
                        tool_call_id = %call.id,
                        name = %call.function.name,
                        %e,
                        "skipping tool call with malformed arguments"
                    );
                    continue;
                }
            };
            let preview = confirmation_preview(&call.function.name, &args);

            let card = self.cards.create(
                preview.clone(),
                self.confirm_continuation(conversation_id.to_string(), call.clone()),
                self.reject_continuation(conversation_id.to_string(), call.id.clone()),
                conversation_id,
                call.id.clone(),
            );

            (self.listener)(Notice::card(
                conversation_id,
                format!("{}|{}|{}", card.card_id, call.id, preview),
            ));
            if let Err(e) = self
                .store
                .append_message(conversation_id, &ChatMessage::card(&preview))
            {
                tracing::error!(conversation_id, %e, "failed to persist card message");
            }
        }
    }

    fn confirm_continuation(
        &self,
        conversation_id: String,
        call: ToolCall,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let service = self.clone();
        Box::pin(async move {
            tracing::info!(tool_call_id = %call.id, "tool call confirmed");
            let result = service.dispatcher.execute(&call);
            if let Err(e) = service.store.append_message(&conversation_id, &result) {
                tracing::error!(%conversation_id, %e, "failed to persist tool result");
            }
            (service.listener)(Notice::text(&conversation_id, "Tool executed successfully"));
            service.resume(conversation_id).await;
        })
    }

    fn reject_continuation(
        &self,
        conversation_id: String,
        tool_call_id: String,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let service = self.clone();
        Box::pin(async move {
            tracing::info!(%tool_call_id, "tool call rejected");
            let refusal = ChatMessage::tool(tool_call_id, "User rejected this tool call");
            if let Err(e) = service.store.append_message(&conversation_id, &refusal) {
                tracing::error!(%conversation_id, %e, "failed to persist rejection");
            }
            (service.listener)(Notice::text(&conversation_id, "Tool call rejected"));
            service.resume(conversation_id).await;
        })
    }

    /// Re-enter the turn loop after a card resolution. Boxed so the
    /// continuation futures stay finitely sized despite the recursion.
    fn resume(&self, conversation_id: String) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let service = self.clone();
        Box::pin(async move {
            if let Err(e) = service.run_turn(&conversation_id).await {
                tracing::error!(%conversation_id, %e, "failed to continue conversation");
            }
        })
    }
}
