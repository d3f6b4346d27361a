use crate::domain::entry::{EntryId, EntryStatus, LedgerEntry, Metadata, NewEntry};
use crate::domain::events::ChangeEvent;
use crate::domain::identity::UserId;
use crate::domain::session::{RequestStatus, SessionId, SessionStatus, VendRequest, VendSession};
use crate::domain::wallet::{Balance, Wallet};
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

/// The write set of one open atomic unit, shared by both store backends.
///
/// Every mutation stages a full row image here; nothing touches committed
/// state until the backend applies the whole set at commit. Dropping the
/// unit drops the set, which is the rollback path.
#[derive(Default)]
pub(crate) struct Staged {
    pub entries: HashMap<EntryId, LedgerEntry>,
    pub keys: HashMap<String, EntryId>,
    pub wallets: HashMap<UserId, Wallet>,
    pub sessions: HashMap<SessionId, VendSession>,
    pub requests: HashMap<Uuid, VendRequest>,
}

impl Staged {
    pub fn entry_by_key(&self, key: &str) -> Option<&LedgerEntry> {
        self.keys.get(key).and_then(|id| self.entries.get(id))
    }

    /// Stages an insert. `committed_key_exists` is the backend's answer for
    /// the committed unique index; the staged index is checked here.
    pub fn insert_entry(
        &mut self,
        entry: NewEntry,
        committed_key_exists: bool,
    ) -> Result<LedgerEntry> {
        if let Some(key) = &entry.idempotency_key
            && (committed_key_exists || self.keys.contains_key(key))
        {
            return Err(PaymentError::DuplicateKey(key.clone()));
        }

        let entry = entry.into_entry();
        if let Some(key) = &entry.idempotency_key {
            self.keys.insert(key.clone(), entry.id);
        }
        self.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    /// Stages the PENDING → COMPLETED settlement of `current`.
    pub fn complete_entry(&mut self, mut current: LedgerEntry) -> Result<LedgerEntry> {
        if current.status != EntryStatus::Pending {
            return Err(PaymentError::Validation(format!(
                "ledger entry {} is not pending",
                current.id
            )));
        }
        current.status = EntryStatus::Completed;
        self.entries.insert(current.id, current.clone());
        Ok(current)
    }

    /// Stages a balance change on top of `current` (which must already
    /// reflect this unit's earlier staged writes). The non-negative
    /// invariant is enforced here as the store-level backstop.
    pub fn apply_to_balance(&mut self, current: Wallet, delta: Decimal) -> Result<Balance> {
        let next = current.balance + Balance::new(delta);
        if next.is_negative() {
            return Err(PaymentError::InsufficientFunds {
                required: -delta,
                available: current.balance.value(),
            });
        }
        let wallet = Wallet {
            user_id: current.user_id.clone(),
            balance: next,
        };
        self.wallets.insert(wallet.user_id.clone(), wallet);
        Ok(next)
    }

    pub fn insert_session(&mut self, session: VendSession) -> VendSession {
        self.sessions.insert(session.id, session.clone());
        session
    }

    /// Stages a validated transition plus a metadata patch on `current`.
    pub fn update_session(
        &mut self,
        mut current: VendSession,
        to: SessionStatus,
        patch: Metadata,
    ) -> Result<VendSession> {
        current.transition(to)?;
        current.metadata.extend(patch);
        self.sessions.insert(current.id, current.clone());
        Ok(current)
    }

    pub fn insert_request(&mut self, request: VendRequest) -> VendRequest {
        self.requests.insert(request.id, request.clone());
        request
    }

    pub fn update_request(
        &mut self,
        mut current: VendRequest,
        status: RequestStatus,
    ) -> Result<VendRequest> {
        if current.status != RequestStatus::Pending {
            return Err(PaymentError::Validation(format!(
                "vend request {} is not pending",
                current.id
            )));
        }
        current.status = status;
        self.requests.insert(current.id, current.clone());
        Ok(current)
    }

    /// The change events this write set produces, in a deterministic order
    /// (sessions, vend requests, wallets). Built at commit so every event
    /// carries the committed row image.
    pub fn events(&self) -> Vec<ChangeEvent> {
        let mut events = Vec::new();

        let mut sessions: Vec<_> = self.sessions.values().collect();
        sessions.sort_by_key(|s| s.id);
        events.extend(sessions.into_iter().map(|s| ChangeEvent::Session {
            id: s.id,
            status: s.status,
        }));

        let mut requests: Vec<_> = self.requests.values().collect();
        requests.sort_by_key(|r| r.id);
        events.extend(requests.into_iter().map(|r| ChangeEvent::VendRequest {
            id: r.id,
            status: r.status,
        }));

        let mut wallets: Vec<_> = self.wallets.values().collect();
        wallets.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        events.extend(wallets.into_iter().map(|w| ChangeEvent::Wallet {
            user_id: w.user_id.clone(),
            balance: w.balance,
        }));

        events
    }
}
