use crate::domain::entry::{EntryId, LedgerEntry, Metadata, NewEntry};
use crate::domain::events::ChangeEvent;
use crate::domain::identity::{MachineId, UserId};
use crate::domain::ports::{LedgerStore, LedgerUnit};
use crate::domain::session::{RequestStatus, SessionId, SessionStatus, VendRequest, VendSession};
use crate::domain::wallet::{Amount, Balance, Wallet};
use crate::error::{PaymentError, Result};
use crate::infrastructure::staged::Staged;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use uuid::Uuid;

#[derive(Default)]
struct LedgerState {
    wallets: HashMap<UserId, Wallet>,
    entries: HashMap<EntryId, LedgerEntry>,
    entries_by_key: HashMap<String, EntryId>,
    sessions: HashMap<SessionId, VendSession>,
    pending_by_machine: HashMap<MachineId, SessionId>,
    requests: HashMap<Uuid, VendRequest>,
}

/// In-memory ledger store.
///
/// All tables live behind one `Arc<RwLock<…>>`. An atomic unit takes the
/// owned write guard for its whole lifetime, so units are serialized and a
/// committed read never observes a unit's partial writes. Ideal for tests
/// and single-process deployments; use the RocksDB backend for durability.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn get_wallet(&self, user_id: &UserId) -> Result<Wallet> {
        let state = self.state.read().await;
        Ok(state
            .wallets
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| Wallet::zero(user_id.clone())))
    }

    async fn get_session(&self, session_id: SessionId) -> Result<Option<VendSession>> {
        let state = self.state.read().await;
        Ok(state.sessions.get(&session_id).cloned())
    }

    async fn get_vend_request(&self, request_id: Uuid) -> Result<Option<VendRequest>> {
        let state = self.state.read().await;
        Ok(state.requests.get(&request_id).cloned())
    }

    async fn entries_for_user(&self, user_id: &UserId) -> Result<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<_> = state
            .entries
            .values()
            .filter(|e| &e.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.created_at, e.id));
        Ok(entries)
    }

    async fn list_wallets(&self) -> Result<Vec<Wallet>> {
        let state = self.state.read().await;
        let mut wallets: Vec<_> = state.wallets.values().cloned().collect();
        wallets.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(wallets)
    }

    async fn begin(&self) -> Result<Box<dyn LedgerUnit>> {
        let guard = Arc::clone(&self.state).write_owned().await;
        Ok(Box::new(InMemoryUnit {
            guard,
            staged: Staged::default(),
        }))
    }
}

struct InMemoryUnit {
    guard: OwnedRwLockWriteGuard<LedgerState>,
    staged: Staged,
}

impl InMemoryUnit {
    fn current_wallet(&self, user_id: &UserId) -> Wallet {
        self.staged
            .wallets
            .get(user_id)
            .or_else(|| self.guard.wallets.get(user_id))
            .cloned()
            .unwrap_or_else(|| Wallet::zero(user_id.clone()))
    }

    fn current_session(&self, session_id: SessionId) -> Option<VendSession> {
        self.staged
            .sessions
            .get(&session_id)
            .or_else(|| self.guard.sessions.get(&session_id))
            .cloned()
    }

    fn current_request(&self, request_id: Uuid) -> Option<VendRequest> {
        self.staged
            .requests
            .get(&request_id)
            .or_else(|| self.guard.requests.get(&request_id))
            .cloned()
    }

    fn current_entry(&self, entry_id: EntryId) -> Option<LedgerEntry> {
        self.staged
            .entries
            .get(&entry_id)
            .or_else(|| self.guard.entries.get(&entry_id))
            .cloned()
    }
}

#[async_trait]
impl LedgerUnit for InMemoryUnit {
    async fn wallet(&self, user_id: &UserId) -> Result<Wallet> {
        Ok(self.current_wallet(user_id))
    }

    async fn session(&self, session_id: SessionId) -> Result<Option<VendSession>> {
        Ok(self.current_session(session_id))
    }

    async fn vend_request(&self, request_id: Uuid) -> Result<Option<VendRequest>> {
        Ok(self.current_request(request_id))
    }

    async fn entry_by_key(&self, key: &str) -> Result<Option<LedgerEntry>> {
        if let Some(entry) = self.staged.entry_by_key(key) {
            return Ok(Some(entry.clone()));
        }
        Ok(self
            .guard
            .entries_by_key
            .get(key)
            .and_then(|id| self.guard.entries.get(id))
            .cloned())
    }

    async fn insert_entry(&mut self, entry: NewEntry) -> Result<LedgerEntry> {
        let committed_key_exists = entry
            .idempotency_key
            .as_ref()
            .is_some_and(|key| self.guard.entries_by_key.contains_key(key));
        self.staged.insert_entry(entry, committed_key_exists)
    }

    async fn complete_entry(&mut self, entry_id: EntryId) -> Result<LedgerEntry> {
        let current = self.current_entry(entry_id).ok_or_else(|| {
            PaymentError::Validation(format!("unknown ledger entry {entry_id}"))
        })?;
        self.staged.complete_entry(current)
    }

    async fn apply_to_balance(&mut self, user_id: &UserId, delta: Decimal) -> Result<Balance> {
        let current = self.current_wallet(user_id);
        self.staged.apply_to_balance(current, delta)
    }

    async fn insert_session(
        &mut self,
        machine_id: &MachineId,
        amount: Amount,
        metadata: Metadata,
    ) -> Result<VendSession> {
        let session = VendSession::new(machine_id.clone(), amount, metadata);
        Ok(self.staged.insert_session(session))
    }

    async fn update_session(
        &mut self,
        session_id: SessionId,
        status: SessionStatus,
        patch: Metadata,
    ) -> Result<VendSession> {
        let current = self
            .current_session(session_id)
            .ok_or(PaymentError::SessionNotPending(session_id))?;
        self.staged.update_session(current, status, patch)
    }

    async fn cancel_pending_for_machine(
        &mut self,
        machine_id: &MachineId,
    ) -> Result<Vec<SessionId>> {
        let mut ids = Vec::new();
        if let Some(&id) = self.guard.pending_by_machine.get(machine_id)
            && self
                .current_session(id)
                .is_some_and(|s| s.status == SessionStatus::Pending)
        {
            ids.push(id);
        }
        for session in self.staged.sessions.values() {
            if &session.machine_id == machine_id
                && session.status == SessionStatus::Pending
                && !ids.contains(&session.id)
            {
                ids.push(session.id);
            }
        }

        for &id in &ids {
            let current = self
                .current_session(id)
                .ok_or(PaymentError::SessionNotPending(id))?;
            self.staged
                .update_session(current, SessionStatus::Cancelled, Metadata::new())?;
        }
        Ok(ids)
    }

    async fn insert_vend_request(
        &mut self,
        user_id: &UserId,
        amount: Amount,
    ) -> Result<VendRequest> {
        let request = VendRequest::new(user_id.clone(), amount);
        Ok(self.staged.insert_request(request))
    }

    async fn update_vend_request(
        &mut self,
        request_id: Uuid,
        status: RequestStatus,
    ) -> Result<VendRequest> {
        let current = self.current_request(request_id).ok_or_else(|| {
            PaymentError::Validation(format!("unknown vend request {request_id}"))
        })?;
        self.staged.update_request(current, status)
    }

    async fn commit(self: Box<Self>) -> Result<Vec<ChangeEvent>> {
        let InMemoryUnit { mut guard, staged } = *self;
        let events = staged.events();
        let state = &mut *guard;

        for (id, entry) in staged.entries {
            if let Some(key) = &entry.idempotency_key {
                state.entries_by_key.insert(key.clone(), id);
            }
            state.entries.insert(id, entry);
        }
        for (user_id, wallet) in staged.wallets {
            state.wallets.insert(user_id, wallet);
        }
        for (id, session) in staged.sessions {
            if session.status == SessionStatus::Pending {
                state
                    .pending_by_machine
                    .insert(session.machine_id.clone(), id);
            } else if state.pending_by_machine.get(&session.machine_id) == Some(&id) {
                state.pending_by_machine.remove(&session.machine_id);
            }
            state.sessions.insert(id, session);
        }
        for (id, request) in staged.requests {
            state.requests.insert(id, request);
        }

        Ok(events)
    }
}
