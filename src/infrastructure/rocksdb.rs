use crate::domain::entry::{EntryId, LedgerEntry, Metadata, NewEntry};
use crate::domain::events::ChangeEvent;
use crate::domain::identity::{MachineId, UserId};
use crate::domain::ports::{LedgerStore, LedgerUnit};
use crate::domain::session::{RequestStatus, SessionId, SessionStatus, VendRequest, VendSession};
use crate::domain::wallet::{Amount, Balance, Wallet};
use crate::error::{PaymentError, Result};
use crate::infrastructure::staged::Staged;
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Options, WriteBatch};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Column family for wallet rows, keyed by user id.
pub const CF_WALLETS: &str = "wallets";
/// Column family for ledger entries, keyed by entry id.
pub const CF_ENTRIES: &str = "entries";
/// Unique index: idempotency key to entry id.
pub const CF_ENTRY_KEYS: &str = "entry_keys";
/// Column family for vend sessions, keyed by session id.
pub const CF_SESSIONS: &str = "sessions";
/// Index: machine id to its single PENDING session id.
pub const CF_PENDING_SESSIONS: &str = "pending_sessions";
/// Column family for vend requests, keyed by request id.
pub const CF_VEND_REQUESTS: &str = "vend_requests";

/// Persistent ledger store backed by RocksDB.
///
/// Rows are serialized with serde_json into per-entity column families. An
/// atomic unit holds the store-wide write mutex and flushes its whole write
/// set through a single `WriteBatch`, so a crash either applies all of a
/// unit or none of it, and committed point reads never see a torn unit.
#[derive(Clone)]
pub struct RocksLedger {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksLedger {
    /// Opens or creates a RocksDB instance at the given path, ensuring all
    /// required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [
            CF_WALLETS,
            CF_ENTRIES,
            CF_ENTRY_KEYS,
            CF_SESSIONS,
            CF_PENDING_SESSIONS,
            CF_VEND_REQUESTS,
        ]
        .into_iter()
        .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
        .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }
}

fn cf<'a>(db: &'a DB, name: &str) -> Result<&'a ColumnFamily> {
    db.cf_handle(name)
        .ok_or_else(|| PaymentError::storage(format!("column family {name} not found")))
}

fn get_json<T: DeserializeOwned>(db: &DB, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
    let handle = cf(db, cf_name)?;
    match db.get_cf(handle, key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn scan_json<T: DeserializeOwned>(db: &DB, cf_name: &str) -> Result<Vec<T>> {
    let handle = cf(db, cf_name)?;
    let mut rows = Vec::new();
    for item in db.iterator_cf(handle, rocksdb::IteratorMode::Start) {
        let (_key, value) = item?;
        rows.push(serde_json::from_slice(&value)?);
    }
    Ok(rows)
}

fn entry_id_for_key(db: &DB, key: &str) -> Result<Option<EntryId>> {
    let handle = cf(db, CF_ENTRY_KEYS)?;
    match db.get_cf(handle, key.as_bytes())? {
        Some(bytes) => Ok(Some(Uuid::from_slice(&bytes).map_err(|e| {
            PaymentError::storage(format!("corrupt entry key index: {e}"))
        })?)),
        None => Ok(None),
    }
}

#[async_trait]
impl LedgerStore for RocksLedger {
    async fn get_wallet(&self, user_id: &UserId) -> Result<Wallet> {
        Ok(
            get_json(&self.db, CF_WALLETS, user_id.as_str().as_bytes())?
                .unwrap_or_else(|| Wallet::zero(user_id.clone())),
        )
    }

    async fn get_session(&self, session_id: SessionId) -> Result<Option<VendSession>> {
        get_json(&self.db, CF_SESSIONS, session_id.as_bytes())
    }

    async fn get_vend_request(&self, request_id: Uuid) -> Result<Option<VendRequest>> {
        get_json(&self.db, CF_VEND_REQUESTS, request_id.as_bytes())
    }

    async fn entries_for_user(&self, user_id: &UserId) -> Result<Vec<LedgerEntry>> {
        let mut entries: Vec<LedgerEntry> = scan_json(&self.db, CF_ENTRIES)?
            .into_iter()
            .filter(|e: &LedgerEntry| &e.user_id == user_id)
            .collect();
        entries.sort_by_key(|e| (e.created_at, e.id));
        Ok(entries)
    }

    async fn list_wallets(&self) -> Result<Vec<Wallet>> {
        let mut wallets: Vec<Wallet> = scan_json(&self.db, CF_WALLETS)?;
        wallets.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(wallets)
    }

    async fn begin(&self) -> Result<Box<dyn LedgerUnit>> {
        let guard = Arc::clone(&self.write_lock).lock_owned().await;
        Ok(Box::new(RocksUnit {
            db: Arc::clone(&self.db),
            _guard: guard,
            staged: Staged::default(),
        }))
    }
}

struct RocksUnit {
    db: Arc<DB>,
    _guard: OwnedMutexGuard<()>,
    staged: Staged,
}

impl RocksUnit {
    fn current_wallet(&self, user_id: &UserId) -> Result<Wallet> {
        if let Some(wallet) = self.staged.wallets.get(user_id) {
            return Ok(wallet.clone());
        }
        Ok(
            get_json(&self.db, CF_WALLETS, user_id.as_str().as_bytes())?
                .unwrap_or_else(|| Wallet::zero(user_id.clone())),
        )
    }

    fn current_session(&self, session_id: SessionId) -> Result<Option<VendSession>> {
        if let Some(session) = self.staged.sessions.get(&session_id) {
            return Ok(Some(session.clone()));
        }
        get_json(&self.db, CF_SESSIONS, session_id.as_bytes())
    }

    fn current_request(&self, request_id: Uuid) -> Result<Option<VendRequest>> {
        if let Some(request) = self.staged.requests.get(&request_id) {
            return Ok(Some(request.clone()));
        }
        get_json(&self.db, CF_VEND_REQUESTS, request_id.as_bytes())
    }

    fn current_entry(&self, entry_id: EntryId) -> Result<Option<LedgerEntry>> {
        if let Some(entry) = self.staged.entries.get(&entry_id) {
            return Ok(Some(entry.clone()));
        }
        get_json(&self.db, CF_ENTRIES, entry_id.as_bytes())
    }
}

#[async_trait]
impl LedgerUnit for RocksUnit {
    async fn wallet(&self, user_id: &UserId) -> Result<Wallet> {
        self.current_wallet(user_id)
    }

    async fn session(&self, session_id: SessionId) -> Result<Option<VendSession>> {
        self.current_session(session_id)
    }

    async fn vend_request(&self, request_id: Uuid) -> Result<Option<VendRequest>> {
        self.current_request(request_id)
    }

    async fn entry_by_key(&self, key: &str) -> Result<Option<LedgerEntry>> {
        if let Some(entry) = self.staged.entry_by_key(key) {
            return Ok(Some(entry.clone()));
        }
        match entry_id_for_key(&self.db, key)? {
            Some(id) => get_json(&self.db, CF_ENTRIES, id.as_bytes()),
            None => Ok(None),
        }
    }

    async fn insert_entry(&mut self, entry: NewEntry) -> Result<LedgerEntry> {
        let committed_key_exists = match &entry.idempotency_key {
            Some(key) => entry_id_for_key(&self.db, key)?.is_some(),
            None => false,
        };
        self.staged.insert_entry(entry, committed_key_exists)
    }

    async fn complete_entry(&mut self, entry_id: EntryId) -> Result<LedgerEntry> {
        let current = self.current_entry(entry_id)?.ok_or_else(|| {
            PaymentError::Validation(format!("unknown ledger entry {entry_id}"))
        })?;
        self.staged.complete_entry(current)
    }

    async fn apply_to_balance(&mut self, user_id: &UserId, delta: Decimal) -> Result<Balance> {
        let current = self.current_wallet(user_id)?;
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
            .current_session(session_id)?
            .ok_or(PaymentError::SessionNotPending(session_id))?;
        self.staged.update_session(current, status, patch)
    }

    async fn cancel_pending_for_machine(
        &mut self,
        machine_id: &MachineId,
    ) -> Result<Vec<SessionId>> {
        let mut ids = Vec::new();
        let handle = cf(&self.db, CF_PENDING_SESSIONS)?;
        if let Some(bytes) = self.db.get_cf(handle, machine_id.as_str().as_bytes())? {
            let id = Uuid::from_slice(&bytes)
                .map_err(|e| PaymentError::storage(format!("corrupt pending index: {e}")))?;
            if self
                .current_session(id)?
                .is_some_and(|s| s.status == SessionStatus::Pending)
            {
                ids.push(id);
            }
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
                .current_session(id)?
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
        let current = self.current_request(request_id)?.ok_or_else(|| {
            PaymentError::Validation(format!("unknown vend request {request_id}"))
        })?;
        self.staged.update_request(current, status)
    }

    async fn commit(self: Box<Self>) -> Result<Vec<ChangeEvent>> {
        let events = self.staged.events();
        let mut batch = WriteBatch::default();

        let entries_cf = cf(&self.db, CF_ENTRIES)?;
        let keys_cf = cf(&self.db, CF_ENTRY_KEYS)?;
        for entry in self.staged.entries.values() {
            batch.put_cf(entries_cf, entry.id.as_bytes(), serde_json::to_vec(entry)?);
            if let Some(key) = &entry.idempotency_key {
                batch.put_cf(keys_cf, key.as_bytes(), entry.id.as_bytes());
            }
        }

        let wallets_cf = cf(&self.db, CF_WALLETS)?;
        for wallet in self.staged.wallets.values() {
            batch.put_cf(
                wallets_cf,
                wallet.user_id.as_str().as_bytes(),
                serde_json::to_vec(wallet)?,
            );
        }

        let sessions_cf = cf(&self.db, CF_SESSIONS)?;
        for session in self.staged.sessions.values() {
            batch.put_cf(
                sessions_cf,
                session.id.as_bytes(),
                serde_json::to_vec(session)?,
            );
        }

        // The pending index gets one final value per machine, so a unit that
        // cancels the old session and inserts its successor cannot clobber
        // the index depending on write order.
        let pending_cf = cf(&self.db, CF_PENDING_SESSIONS)?;
        let mut pending_index: HashMap<&MachineId, Option<SessionId>> = HashMap::new();
        for session in self.staged.sessions.values() {
            let slot = pending_index.entry(&session.machine_id).or_insert(None);
            if session.status == SessionStatus::Pending {
                *slot = Some(session.id);
            }
        }
        for (machine_id, new_pending) in pending_index {
            let machine_key = machine_id.as_str().as_bytes();
            match new_pending {
                Some(id) => batch.put_cf(pending_cf, machine_key, id.as_bytes()),
                None => {
                    if let Some(bytes) = self.db.get_cf(pending_cf, machine_key)? {
                        let id = Uuid::from_slice(&bytes).map_err(|e| {
                            PaymentError::storage(format!("corrupt pending index: {e}"))
                        })?;
                        if self.staged.sessions.contains_key(&id) {
                            batch.delete_cf(pending_cf, machine_key);
                        }
                    }
                }
            }
        }

        let requests_cf = cf(&self.db, CF_VEND_REQUESTS)?;
        for request in self.staged.requests.values() {
            batch.put_cf(
                requests_cf,
                request.id.as_bytes(),
                serde_json::to_vec(request)?,
            );
        }

        self.db.write(batch)?;
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn amount(value: Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    #[tokio::test]
    async fn test_open_creates_column_families() {
        let dir = tempdir().unwrap();
        let store = RocksLedger::open(dir.path()).expect("failed to open RocksDB");

        for name in [
            CF_WALLETS,
            CF_ENTRIES,
            CF_ENTRY_KEYS,
            CF_SESSIONS,
            CF_PENDING_SESSIONS,
            CF_VEND_REQUESTS,
        ] {
            assert!(store.db.cf_handle(name).is_some());
        }
    }

    #[tokio::test]
    async fn test_commit_survives_reopen() {
        let dir = tempdir().unwrap();
        let user = UserId::new("u1");

        {
            let store = RocksLedger::open(dir.path()).unwrap();
            let mut unit = store.begin().await.unwrap();
            unit.insert_entry(NewEntry::recharge(user.clone(), amount(dec!(20.00)), "chk_1"))
                .await
                .unwrap();
            unit.apply_to_balance(&user, dec!(20.00)).await.unwrap();
            unit.commit().await.unwrap();
        }

        let store = RocksLedger::open(dir.path()).unwrap();
        assert_eq!(
            store.get_wallet(&user).await.unwrap().balance,
            Balance::new(dec!(20.00))
        );
        let entries = store.entries_for_user(&user).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].idempotency_key.as_deref(), Some("chk_1"));
    }

    #[tokio::test]
    async fn test_duplicate_key_enforced_across_reopen() {
        let dir = tempdir().unwrap();
        let user = UserId::new("u1");

        {
            let store = RocksLedger::open(dir.path()).unwrap();
            let mut unit = store.begin().await.unwrap();
            unit.insert_entry(NewEntry::recharge(user.clone(), amount(dec!(5.00)), "chk_1"))
                .await
                .unwrap();
            unit.commit().await.unwrap();
        }

        let store = RocksLedger::open(dir.path()).unwrap();
        let mut unit = store.begin().await.unwrap();
        let err = unit
            .insert_entry(NewEntry::recharge(user, amount(dec!(5.00)), "chk_1"))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn test_dropped_unit_leaves_no_trace() {
        let dir = tempdir().unwrap();
        let store = RocksLedger::open(dir.path()).unwrap();
        let user = UserId::new("u1");

        {
            let mut unit = store.begin().await.unwrap();
            unit.apply_to_balance(&user, dec!(10.00)).await.unwrap();
        }

        assert_eq!(store.get_wallet(&user).await.unwrap().balance, Balance::ZERO);
    }

    #[tokio::test]
    async fn test_pending_index_follows_supersession() {
        let dir = tempdir().unwrap();
        let store = RocksLedger::open(dir.path()).unwrap();
        let machine = MachineId::new("m1");

        let mut unit = store.begin().await.unwrap();
        let first = unit
            .insert_session(&machine, amount(dec!(1.50)), Metadata::new())
            .await
            .unwrap();
        unit.commit().await.unwrap();

        let mut unit = store.begin().await.unwrap();
        let cancelled = unit.cancel_pending_for_machine(&machine).await.unwrap();
        assert_eq!(cancelled, vec![first.id]);
        let second = unit
            .insert_session(&machine, amount(dec!(2.00)), Metadata::new())
            .await
            .unwrap();
        unit.commit().await.unwrap();

        let first = store.get_session(first.id).await.unwrap().unwrap();
        assert_eq!(first.status, SessionStatus::Cancelled);
        let second = store.get_session(second.id).await.unwrap().unwrap();
        assert_eq!(second.status, SessionStatus::Pending);
    }
}
