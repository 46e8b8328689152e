//! Confirmation card registry.
//!
//! Every tool call the model requests must be approved by a human before it
//! runs. A [`ConfirmCard`] is the ephemeral approval token for one call: it
//! carries a preview of the action plus two continuations, one for confirm
//! and one for reject, of which at most one ever runs.
//!
//! Cards live only in memory and expire after [`CARD_TTL`]. The status
//! transition pending -> {confirmed, rejected, expired} happens under the
//! table lock, so a late resolution racing an expiry timer is deterministic:
//! whichever observes pending first wins, the other sees a settled status.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::oneshot;

/// Pending cards expire five minutes after creation.
pub const CARD_TTL: Duration = Duration::from_secs(5 * 60);

type Continuation = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug, Error)]
pub enum CardError {
    #[error("card not found: {0}")]
    NotFound(String),

    #[error("card already processed: {card_id} (status: {status})")]
    AlreadyProcessed { card_id: String, status: CardStatus },

    #[error("card has expired: {0}")]
    Expired(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardStatus {
    Pending,
    Confirmed,
    Rejected,
    Expired,
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CardStatus::Pending => "pending",
            CardStatus::Confirmed => "confirmed",
            CardStatus::Rejected => "rejected",
            CardStatus::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// Snapshot of one card, without its continuations.
#[derive(Debug, Clone)]
pub struct ConfirmCard {
    pub card_id: String,
    pub show_content: String,
    pub conversation_id: String,
    pub tool_call_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: CardStatus,
}

struct CardEntry {
    card: ConfirmCard,
    on_confirm: Option<Continuation>,
    on_reject: Option<Continuation>,
}

/// Card counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CardStats {
    pub total: usize,
    pub pending: usize,
    pub confirmed: usize,
    pub rejected: usize,
    pub expired: usize,
}

/// Shared registry of outstanding confirmation cards.
///
/// Cheap to clone; all clones share one table. Must be used from within a
/// tokio runtime: [`create`](Self::create) arms a per-card expiry timer and
/// [`resolve`](Self::resolve) detaches continuation execution onto its own
/// task.
#[derive(Clone)]
pub struct CardRegistry {
    table: Arc<Mutex<HashMap<String, CardEntry>>>,
    ttl: Duration,
}

impl Default for CardRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CardRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(CARD_TTL)
    }

    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Register a new pending card and arm its expiry timer.
    pub fn create<C, R>(
        &self,
        show_content: impl Into<String>,
        on_confirm: C,
        on_reject: R,
        conversation_id: impl Into<String>,
        tool_call_id: impl Into<String>,
    ) -> ConfirmCard
    where
        C: Future<Output = ()> + Send + 'static,
        R: Future<Output = ()> + Send + 'static,
    {
        let now = Utc::now();
        let card = ConfirmCard {
            card_id: uuid::Uuid::new_v4().to_string(),
            show_content: show_content.into(),
            conversation_id: conversation_id.into(),
            tool_call_id: tool_call_id.into(),
            created_at: now,
            expires_at: now + self.ttl,
            status: CardStatus::Pending,
        };
        tracing::info!(
            card_id = %card.card_id,
            tool_call_id = %card.tool_call_id,
            expires_at = %card.expires_at,
            "created confirmation card"
        );

        let entry = CardEntry {
            card: card.clone(),
            on_confirm: Some(Box::pin(on_confirm)),
            on_reject: Some(Box::pin(on_reject)),
        };
        self.lock().insert(card.card_id.clone(), entry);

        self.arm_expiry_timer(card.card_id.clone());
        card
    }

    /// Confirm (`accept`) or reject a pending card.
    ///
    /// The status check-and-flip happens under the table lock; the winning
    /// continuation then runs on a detached task, so the caller never waits
    /// on tool execution.
    pub fn resolve(&self, card_id: &str, accept: bool) -> Result<(), CardError> {
        drop(self.resolve_watched(card_id, accept)?);
        Ok(())
    }

    /// Like [`resolve`](Self::resolve), but also returns a receiver that
    /// fires once the continuation task has finished (even if it panicked).
    pub fn resolve_watched(
        &self,
        card_id: &str,
        accept: bool,
    ) -> Result<oneshot::Receiver<()>, CardError> {
        let continuation = {
            let mut table = self.lock();
            let entry = table
                .get_mut(card_id)
                .ok_or_else(|| CardError::NotFound(card_id.to_string()))?;

            if entry.card.status != CardStatus::Pending {
                return Err(CardError::AlreadyProcessed {
                    card_id: card_id.to_string(),
                    status: entry.card.status,
                });
            }
            // Time-based check at resolution time, so expiry wins even if
            // the card's timer has not fired yet.
            if Utc::now() > entry.card.expires_at {
                entry.card.status = CardStatus::Expired;
                tracing::warn!(%card_id, "card expired before resolution");
                return Err(CardError::Expired(card_id.to_string()));
            }

            entry.card.status = if accept {
                CardStatus::Confirmed
            } else {
                CardStatus::Rejected
            };
            if accept {
                entry.on_confirm.take()
            } else {
                entry.on_reject.take()
            }
        };

        tracing::info!(%card_id, accept, "card resolved, running continuation");
        let (done_tx, done_rx) = oneshot::channel();
        let card_id = card_id.to_string();
        tokio::spawn(async move {
            if let Some(continuation) = continuation
                && AssertUnwindSafe(continuation).catch_unwind().await.is_err()
            {
                tracing::error!(%card_id, "panic in card continuation");
            }
            let _ = done_tx.send(());
        });
        Ok(done_rx)
    }

    /// Eagerly drop every pending card whose deadline has passed. Returns
    /// the number of cards dropped.
    pub fn sweep_expired(&self) -> usize {
        let mut table = self.lock();
        let now = Utc::now();
        let before = table.len();
        table.retain(|card_id, entry| {
            let keep = entry.card.status != CardStatus::Pending || now <= entry.card.expires_at;
            if !keep {
                tracing::info!(%card_id, "dropping expired card");
            }
            keep
        });
        before - table.len()
    }

    #[must_use]
    pub fn pending_cards(&self) -> Vec<ConfirmCard> {
        self.lock()
            .values()
            .filter(|entry| entry.card.status == CardStatus::Pending)
            .map(|entry| entry.card.clone())
            .collect()
    }

    #[must_use]
    pub fn stats(&self) -> CardStats {
        let mut stats = CardStats::default();
        for entry in self.lock().values() {
            stats.total += 1;
            match entry.card.status {
                CardStatus::Pending => stats.pending += 1,
                CardStatus::Confirmed => stats.confirmed += 1,
                CardStatus::Rejected => stats.rejected += 1,
                CardStatus::Expired => stats.expired += 1,
            }
        }
        stats
    }

    /// One timer per card. Holds only a weak handle so an abandoned
    /// registry is not kept alive by its timers.
    fn arm_expiry_timer(&self, card_id: String) {
        let table: Weak<Mutex<HashMap<String, CardEntry>>> = Arc::downgrade(&self.table);
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let Some(table) = table.upgrade() else {
                return;
            };
            let mut table = table.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(entry) = table.get(&card_id) {
                match entry.card.status {
                    CardStatus::Pending | CardStatus::Expired => {
                        tracing::info!(%card_id, "card expired");
                        table.remove(&card_id);
                    }
                    CardStatus::Confirmed | CardStatus::Rejected => {}
                }
            }
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CardEntry>> {
        self.table
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
