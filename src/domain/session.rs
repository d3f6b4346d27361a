use crate::domain::entry::Metadata;
use crate::domain::identity::{MachineId, UserId};
use crate::domain::wallet::Amount;
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type SessionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    /// Offered and payable. The only non-terminal state.
    Pending,
    Paid,
    Cancelled,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Pending)
    }
}

/// One offered sale on one machine, valid until paid or superseded.
///
/// At most one session per machine is PENDING at any time; creating a new
/// session cancels the previous PENDING one in the same atomic unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendSession {
    pub id: SessionId,
    pub machine_id: MachineId,
    pub amount: Amount,
    pub status: SessionStatus,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl VendSession {
    pub fn new(machine_id: MachineId, amount: Amount, metadata: Metadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            machine_id,
            amount,
            status: SessionStatus::Pending,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Applies a state-machine transition. Terminal states never change
    /// again; the only legal move is PENDING to one of the terminal states.
    pub fn transition(&mut self, to: SessionStatus) -> Result<()> {
        if self.status != SessionStatus::Pending || to == SessionStatus::Pending {
            return Err(PaymentError::SessionNotPending(self.id));
        }
        self.status = to;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestStatus {
    Pending,
    Dispensed,
    Failed,
}

/// A dispense command produced by the legacy direct-debit path. A request
/// whose dispense fails is compensated by exactly one refund entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendRequest {
    pub id: Uuid,
    pub user_id: UserId,
    pub amount: Amount,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

impl VendRequest {
    pub fn new(user_id: UserId, amount: Amount) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            amount,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
        }
    }
}
