use crate::domain::identity::UserId;
use crate::domain::wallet::Amount;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

pub type EntryId = Uuid;

/// Opaque key/value attachment on a ledger entry (origin session, checkout
/// id, recorded balance, and whatever else a collaborator tucks in).
pub type Metadata = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryKind {
    Vend,
    Recharge,
    Refund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryStatus {
    /// Registered but not yet settled (a recharge awaiting its webhook).
    Pending,
    /// Settled; contributes to the wallet balance.
    Completed,
    /// A definitive business rejection recorded under its idempotency key
    /// so an exact replay reproduces the rejection. Never contributes to
    /// the balance.
    Failed,
}

/// One immutable row of the ledger. Positive amounts credit the wallet,
/// negative amounts debit it. The only permitted mutation after insert is
/// `Pending` → `Completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub kind: EntryKind,
    pub status: EntryStatus,
    pub idempotency_key: Option<String>,
    pub description: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// The reconciliation invariant sums exactly these rows.
    pub fn counts_toward_balance(&self) -> bool {
        self.status == EntryStatus::Completed
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Decimals are stored in metadata as strings to survive JSON without
    /// precision loss.
    pub fn metadata_decimal(&self, key: &str) -> Option<Decimal> {
        self.metadata_str(key)
            .and_then(|s| Decimal::from_str(s).ok())
    }
}

/// An entry about to be inserted; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub user_id: UserId,
    pub amount: Decimal,
    pub kind: EntryKind,
    pub status: EntryStatus,
    pub idempotency_key: Option<String>,
    pub description: String,
    pub metadata: Metadata,
}

impl NewEntry {
    /// A settled wallet debit for a vend.
    pub fn vend_debit(user_id: UserId, price: Amount, idempotency_key: String) -> Self {
        Self {
            user_id,
            amount: -price.value(),
            kind: EntryKind::Vend,
            status: EntryStatus::Completed,
            idempotency_key: Some(idempotency_key),
            description: "Vend purchase".to_string(),
            metadata: Metadata::new(),
        }
    }

    /// The recorded form of a definitive `InsufficientFunds` rejection.
    pub fn vend_rejection(user_id: UserId, price: Amount, idempotency_key: String) -> Self {
        Self {
            user_id,
            amount: -price.value(),
            kind: EntryKind::Vend,
            status: EntryStatus::Failed,
            idempotency_key: Some(idempotency_key),
            description: "Vend purchase (insufficient funds)".to_string(),
            metadata: Metadata::new(),
        }
    }

    /// A settled wallet credit keyed by the external checkout id.
    pub fn recharge(user_id: UserId, amount: Amount, checkout_id: &str) -> Self {
        Self {
            user_id,
            amount: amount.value(),
            kind: EntryKind::Recharge,
            status: EntryStatus::Completed,
            idempotency_key: Some(checkout_id.to_string()),
            description: format!("Recharge {checkout_id}"),
            metadata: Metadata::new(),
        }
    }

    /// A recharge registered at checkout creation, settled later by the
    /// reconciler.
    pub fn pending_recharge(user_id: UserId, amount: Amount, checkout_id: &str) -> Self {
        Self {
            status: EntryStatus::Pending,
            ..Self::recharge(user_id, amount, checkout_id)
        }
    }

    /// A compensating credit for a debit whose dispense failed.
    pub fn refund(user_id: UserId, amount: Amount, idempotency_key: String) -> Self {
        Self {
            user_id,
            amount: amount.value(),
            kind: EntryKind::Refund,
            status: EntryStatus::Completed,
            idempotency_key: Some(idempotency_key),
            description: "Refund for failed vend request".to_string(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Materializes the row, assigning id and creation time. Called by the
    /// store inside an atomic unit.
    pub fn into_entry(self) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            amount: self.amount,
            kind: self.kind,
            status: self.status,
            idempotency_key: self.idempotency_key,
            description: self.description,
            metadata: self.metadata,
            created_at: Utc::now(),
        }
    }
}
