use crate::domain::identity::UserId;
use crate::domain::session::{RequestStatus, SessionId, SessionStatus};
use crate::domain::wallet::Balance;
use serde::Serialize;
use uuid::Uuid;

/// Change notification published after a unit commits, consumed by display
/// and kiosk collaborators.
///
/// Delivery is at-least-once and post-commit only: an event always reflects
/// committed state, and consumers must treat a repeated identical event as a
/// no-op.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum ChangeEvent {
    Wallet { user_id: UserId, balance: Balance },
    Session { id: SessionId, status: SessionStatus },
    VendRequest { id: Uuid, status: RequestStatus },
}
