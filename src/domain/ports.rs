use crate::domain::entry::{EntryId, LedgerEntry, Metadata, NewEntry};
use crate::domain::events::ChangeEvent;
use crate::domain::identity::{MachineId, UserId};
use crate::domain::session::{RequestStatus, SessionId, SessionStatus, VendRequest, VendSession};
use crate::domain::wallet::{Amount, Balance, Wallet};
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Durable, transactional persistence for wallets, ledger entries, vend
/// sessions and vend requests.
///
/// The read methods return committed state only. All mutation goes through
/// [`LedgerStore::begin`], which opens one atomic unit; the unit holds the
/// store's write lock for its lifetime, which is the application-level
/// transaction boundary (begin / row-lock / mutate / commit).
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Returns the user's wallet, materializing a zero-balance wallet for a
    /// user seen for the first time.
    async fn get_wallet(&self, user_id: &UserId) -> Result<Wallet>;

    async fn get_session(&self, session_id: SessionId) -> Result<Option<VendSession>>;

    async fn get_vend_request(&self, request_id: Uuid) -> Result<Option<VendRequest>>;

    /// All ledger entries of one user, oldest first.
    async fn entries_for_user(&self, user_id: &UserId) -> Result<Vec<LedgerEntry>>;

    /// Every known wallet, used for reporting.
    async fn list_wallets(&self) -> Result<Vec<Wallet>>;

    /// Opens an atomic unit. Writes are staged inside the unit and become
    /// visible only when `commit` succeeds; dropping the unit without
    /// committing discards every staged write.
    async fn begin(&self) -> Result<Box<dyn LedgerUnit>>;
}

/// One open atomic unit against a [`LedgerStore`].
///
/// Reads observe committed state plus this unit's own staged writes. The
/// wallet row and the session row read here are locked for the unit's whole
/// lifetime, so a check made through the unit stays valid for a later write
/// in the same unit.
#[async_trait]
pub trait LedgerUnit: Send {
    async fn wallet(&self, user_id: &UserId) -> Result<Wallet>;

    async fn session(&self, session_id: SessionId) -> Result<Option<VendSession>>;

    async fn vend_request(&self, request_id: Uuid) -> Result<Option<VendRequest>>;

    async fn entry_by_key(&self, key: &str) -> Result<Option<LedgerEntry>>;

    /// Inserts a ledger entry. Fails with `DuplicateKey` when the
    /// idempotency key already exists, committed or staged; insertion
    /// failure is the idempotency detection signal, not a separate
    /// lookup-then-insert.
    async fn insert_entry(&mut self, entry: NewEntry) -> Result<LedgerEntry>;

    /// Settles a PENDING entry (recharge confirmation).
    async fn complete_entry(&mut self, entry_id: EntryId) -> Result<LedgerEntry>;

    /// Stages a signed balance change. Fails with `InsufficientFunds` if
    /// the resulting balance would be negative; must run in the same unit
    /// as the entry insert that justifies it so balance and ledger never
    /// diverge.
    async fn apply_to_balance(&mut self, user_id: &UserId, delta: Decimal) -> Result<Balance>;

    async fn insert_session(
        &mut self,
        machine_id: &MachineId,
        amount: Amount,
        metadata: Metadata,
    ) -> Result<VendSession>;

    /// Applies a validated state-machine transition and merges the metadata
    /// patch.
    async fn update_session(
        &mut self,
        session_id: SessionId,
        status: SessionStatus,
        patch: Metadata,
    ) -> Result<VendSession>;

    /// Cancels every PENDING session of the machine, returning their ids.
    async fn cancel_pending_for_machine(&mut self, machine_id: &MachineId)
    -> Result<Vec<SessionId>>;

    async fn insert_vend_request(
        &mut self,
        user_id: &UserId,
        amount: Amount,
    ) -> Result<VendRequest>;

    async fn update_vend_request(
        &mut self,
        request_id: Uuid,
        status: RequestStatus,
    ) -> Result<VendRequest>;

    /// Atomically applies every staged write. Returns the change events the
    /// caller must publish after this call, never before.
    async fn commit(self: Box<Self>) -> Result<Vec<ChangeEvent>>;
}

pub type LedgerStoreRef = Arc<dyn LedgerStore>;

/// The state of one hosted checkout as reported by the payment processor.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkout {
    pub id: String,
    pub paid: bool,
    pub amount: Decimal,
}

/// Read-only client toward the external payment processor, used by the
/// recharge reconciler for zero-trust verification before crediting.
///
/// Called outside any atomic unit: a store lock is never held across this
/// boundary.
#[async_trait]
pub trait ProcessorClient: Send + Sync {
    async fn fetch_checkout(&self, checkout_id: &str) -> Result<Checkout>;
}

pub type ProcessorClientRef = Arc<dyn ProcessorClient>;
