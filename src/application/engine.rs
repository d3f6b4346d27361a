use crate::domain::entry::{EntryId, EntryKind, EntryStatus, LedgerEntry, Metadata, NewEntry};
use crate::domain::events::ChangeEvent;
use crate::domain::identity::{Caller, MachineId, UserId};
use crate::domain::ports::{LedgerStoreRef, ProcessorClientRef};
use crate::domain::session::{RequestStatus, SessionId, SessionStatus, VendRequest, VendSession};
use crate::domain::wallet::{Amount, Balance, Wallet};
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Outcome of a wallet debit. Replaying the same idempotency key returns
/// the identical receipt with `replayed` set.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentReceipt {
    pub new_balance: Balance,
    pub entry_id: EntryId,
    pub replayed: bool,
}

/// Outcome of a recharge reconciliation. A repeated reconciliation of the
/// same checkout reports the prior success instead of crediting twice.
#[derive(Debug, Clone, PartialEq)]
pub struct RechargeReceipt {
    pub amount: Decimal,
    pub new_balance: Balance,
    pub already_processed: bool,
}

/// The payment engine: every operation is one atomic unit against the
/// ledger store, and the engine itself is stateless. Clones share the
/// store, the processor client and the event channel, so any number of
/// concurrent callers coordinate purely through the store's locking.
#[derive(Clone)]
pub struct PaymentEngine {
    store: LedgerStoreRef,
    processor: ProcessorClientRef,
    events: broadcast::Sender<ChangeEvent>,
}

impl PaymentEngine {
    pub fn new(store: LedgerStoreRef, processor: ProcessorClientRef) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            processor,
            events,
        }
    }

    /// Change notifications for display/kiosk collaborators. Delivery is
    /// at-least-once and post-commit only; a lagged receiver must re-read
    /// state through the read operations.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    fn publish(&self, events: Vec<ChangeEvent>) {
        for event in events {
            // Send only errs when nobody is subscribed.
            let _ = self.events.send(event);
        }
    }

    /// Opens a sale on a machine, superseding the machine's previous
    /// PENDING session in the same atomic unit.
    pub async fn create_vend_session(
        &self,
        caller: &Caller,
        machine_id: &MachineId,
        amount: Amount,
    ) -> Result<VendSession> {
        if !caller.may_create_sessions() {
            return Err(PaymentError::AccessDenied(
                "only the machine bridge may create vend sessions",
            ));
        }

        let mut unit = self.store.begin().await?;
        let superseded = unit.cancel_pending_for_machine(machine_id).await?;
        let session = unit
            .insert_session(machine_id, amount, Metadata::new())
            .await?;
        let events = unit.commit().await?;
        self.publish(events);

        tracing::info!(
            machine = %machine_id,
            session = %session.id,
            price = %amount,
            superseded = superseded.len(),
            "vend session created"
        );
        Ok(session)
    }

    /// Read-only session lookup, used by payers to learn the price.
    pub async fn get_vend_session(
        &self,
        caller: &Caller,
        session_id: SessionId,
    ) -> Result<Option<VendSession>> {
        if !caller.is_authenticated() {
            return Err(PaymentError::AccessDenied("authentication required"));
        }
        self.store.get_session(session_id).await
    }

    /// Wallet lookup for the owner, a display account or a trusted service.
    pub async fn get_wallet(&self, caller: &Caller, user_id: &UserId) -> Result<Wallet> {
        if !(caller.may_act_for(user_id) || matches!(caller, Caller::Display)) {
            return Err(PaymentError::AccessDenied(
                "wallet is only visible to its owner or a display account",
            ));
        }
        self.store.get_wallet(user_id).await
    }

    /// Pays a PENDING vend session from the user's wallet.
    ///
    /// Runs as one atomic unit: idempotency replay check, locked session
    /// read, locked wallet read, debit entry plus balance decrement, session
    /// to PAID, commit. Under concurrent attempts on the same session with
    /// distinct keys exactly one caller observes PENDING and commits; the
    /// rest fail with `SessionNotPending`.
    pub async fn process_vend_payment(
        &self,
        caller: &Caller,
        session_id: SessionId,
        user_id: &UserId,
        idempotency_key: Option<String>,
    ) -> Result<PaymentReceipt> {
        if !caller.may_act_for(user_id) {
            return Err(PaymentError::AccessDenied(
                "payer does not match the wallet owner",
            ));
        }

        // A missing key still deduplicates exact retries of this request;
        // distinct calls get distinct keys and are distinct intents.
        let key = idempotency_key.unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut unit = self.store.begin().await?;

        if let Some(prior) = unit.entry_by_key(&key).await? {
            return replay_outcome(prior, &key);
        }

        let Some(session) = unit.session(session_id).await? else {
            return Err(PaymentError::SessionNotPending(session_id));
        };
        if session.status != SessionStatus::Pending {
            tracing::debug!(
                session = %session_id,
                status = ?session.status,
                "payment attempt on a settled session"
            );
            return Err(PaymentError::SessionNotPending(session_id));
        }

        // The session row is the only price source; the caller never
        // supplies an amount.
        let price = session.amount;
        let wallet = unit.wallet(user_id).await?;
        if !wallet.can_cover(price) {
            return self
                .reject_for_insufficient_funds(unit, user_id, price, wallet.balance, &key, |e| {
                    e.with_metadata("session_id", session_id.to_string())
                })
                .await;
        }

        let new_balance = unit.apply_to_balance(user_id, -price.value()).await?;
        let entry = unit
            .insert_entry(
                NewEntry::vend_debit(user_id.clone(), price, key.clone())
                    .with_metadata("session_id", session_id.to_string())
                    .with_metadata("machine_id", session.machine_id.to_string())
                    .with_metadata("new_balance", new_balance.value().to_string()),
            )
            .await?;
        unit.update_session(session_id, SessionStatus::Paid, paid_by(user_id))
            .await?;

        let events = unit.commit().await?;
        self.publish(events);

        tracing::info!(
            user = %user_id,
            session = %session_id,
            %price,
            balance = %new_balance,
            "vend payment settled"
        );
        Ok(PaymentReceipt {
            new_balance,
            entry_id: entry.id,
            replayed: false,
        })
    }

    /// Legacy direct debit: charges the wallet without a session and queues
    /// a dispense command for the machine.
    pub async fn pay_direct(
        &self,
        caller: &Caller,
        user_id: &UserId,
        amount: Amount,
        idempotency_key: Option<String>,
    ) -> Result<PaymentReceipt> {
        if !caller.may_act_for(user_id) {
            return Err(PaymentError::AccessDenied(
                "payer does not match the wallet owner",
            ));
        }

        let key = idempotency_key.unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut unit = self.store.begin().await?;

        if let Some(prior) = unit.entry_by_key(&key).await? {
            return replay_outcome(prior, &key);
        }

        let wallet = unit.wallet(user_id).await?;
        if !wallet.can_cover(amount) {
            return self
                .reject_for_insufficient_funds(unit, user_id, amount, wallet.balance, &key, |e| {
                    e.with_metadata("source", "direct")
                })
                .await;
        }

        let new_balance = unit.apply_to_balance(user_id, -amount.value()).await?;
        let request = unit.insert_vend_request(user_id, amount).await?;
        let entry = unit
            .insert_entry(
                NewEntry::vend_debit(user_id.clone(), amount, key.clone())
                    .with_metadata("source", "direct")
                    .with_metadata("vend_request_id", request.id.to_string())
                    .with_metadata("new_balance", new_balance.value().to_string()),
            )
            .await?;

        let events = unit.commit().await?;
        self.publish(events);

        tracing::info!(
            user = %user_id,
            request = %request.id,
            %amount,
            balance = %new_balance,
            "direct debit settled, dispense queued"
        );
        Ok(PaymentReceipt {
            new_balance,
            entry_id: entry.id,
            replayed: false,
        })
    }

    /// Marks a dispense as done. No money moves.
    pub async fn mark_vend_request_dispensed(
        &self,
        caller: &Caller,
        request_id: Uuid,
    ) -> Result<VendRequest> {
        if !(caller.is_service() || matches!(caller, Caller::MachineBridge)) {
            return Err(PaymentError::AccessDenied(
                "only the machine bridge may settle vend requests",
            ));
        }

        let mut unit = self.store.begin().await?;
        let Some(request) = unit.vend_request(request_id).await? else {
            return Err(PaymentError::Validation(format!(
                "unknown vend request {request_id}"
            )));
        };
        if request.status == RequestStatus::Dispensed {
            return Ok(request);
        }
        let request = unit
            .update_vend_request(request_id, RequestStatus::Dispensed)
            .await?;
        let events = unit.commit().await?;
        self.publish(events);
        Ok(request)
    }

    /// Marks a dispense as failed and refunds the debit. Safe under
    /// redelivery: a request already FAILED is a no-op, and the refund
    /// entry is keyed by the request id as a second line of defense.
    pub async fn fail_vend_request(&self, caller: &Caller, request_id: Uuid) -> Result<()> {
        if !(caller.is_service() || matches!(caller, Caller::MachineBridge)) {
            return Err(PaymentError::AccessDenied(
                "only the machine bridge may settle vend requests",
            ));
        }

        let mut unit = self.store.begin().await?;
        let Some(request) = unit.vend_request(request_id).await? else {
            return Err(PaymentError::Validation(format!(
                "unknown vend request {request_id}"
            )));
        };

        match request.status {
            RequestStatus::Failed => return Ok(()),
            RequestStatus::Dispensed => {
                return Err(PaymentError::Validation(format!(
                    "vend request {request_id} already dispensed"
                )));
            }
            RequestStatus::Pending => {}
        }

        unit.update_vend_request(request_id, RequestStatus::Failed)
            .await?;
        let new_balance = unit
            .apply_to_balance(&request.user_id, request.amount.value())
            .await?;
        unit.insert_entry(
            NewEntry::refund(
                request.user_id.clone(),
                request.amount,
                format!("refund-{request_id}"),
            )
            .with_metadata("vend_request_id", request_id.to_string())
            .with_metadata("new_balance", new_balance.value().to_string()),
        )
        .await?;

        let events = unit.commit().await?;
        self.publish(events);

        tracing::warn!(
            request = %request_id,
            user = %request.user_id,
            amount = %request.amount,
            "dispense failed, wallet refunded"
        );
        Ok(())
    }

    /// Records a PENDING recharge entry when a hosted checkout is created.
    /// The balance is untouched until the reconciler settles it.
    pub async fn register_pending_recharge(
        &self,
        caller: &Caller,
        checkout_id: &str,
        user_id: &UserId,
        amount: Amount,
    ) -> Result<LedgerEntry> {
        if !caller.may_act_for(user_id) {
            return Err(PaymentError::AccessDenied(
                "recharge registration requires the wallet owner or a trusted service",
            ));
        }

        let mut unit = self.store.begin().await?;
        let entry = unit
            .insert_entry(NewEntry::pending_recharge(
                user_id.clone(),
                amount,
                checkout_id,
            ))
            .await?;
        let events = unit.commit().await?;
        self.publish(events);

        tracing::debug!(checkout_id, user = %user_id, %amount, "pending recharge registered");
        Ok(entry)
    }

    /// Converts a verified external payment into exactly one wallet credit.
    ///
    /// The processor is consulted before any unit opens (never behind the
    /// store lock) and is the sole authority on whether and for how much
    /// the checkout settled. The external checkout id is the idempotency
    /// key: a redelivered confirmation reports the prior success.
    pub async fn reconcile_recharge(
        &self,
        caller: &Caller,
        checkout_id: &str,
        user_id: &UserId,
        amount: Amount,
    ) -> Result<RechargeReceipt> {
        if !caller.is_service() {
            return Err(PaymentError::AccessDenied(
                "recharge reconciliation requires the processor callback identity",
            ));
        }

        let checkout = self.processor.fetch_checkout(checkout_id).await?;
        if !checkout.paid {
            tracing::warn!(checkout_id, "reconciliation rejected: checkout not paid");
            return Err(PaymentError::VerificationFailed(format!(
                "checkout {checkout_id} is not paid"
            )));
        }
        if checkout.amount != amount.value() {
            tracing::warn!(
                checkout_id,
                claimed = %amount,
                verified = %checkout.amount,
                "reconciliation rejected: amount mismatch"
            );
            return Err(PaymentError::VerificationFailed(format!(
                "claimed amount {amount} does not match processor amount {}",
                checkout.amount
            )));
        }

        let mut unit = self.store.begin().await?;
        match unit.entry_by_key(checkout_id).await? {
            Some(prior) if prior.status == EntryStatus::Completed => {
                let wallet = unit.wallet(user_id).await?;
                tracing::debug!(checkout_id, "recharge already processed");
                Ok(RechargeReceipt {
                    amount: prior.amount,
                    new_balance: wallet.balance,
                    already_processed: true,
                })
            }
            Some(prior) if prior.status == EntryStatus::Pending => {
                if prior.user_id != *user_id {
                    return Err(PaymentError::Validation(format!(
                        "checkout {checkout_id} belongs to another wallet"
                    )));
                }
                if prior.amount != checkout.amount {
                    return Err(PaymentError::VerificationFailed(format!(
                        "registered amount {} does not match processor amount {}",
                        prior.amount, checkout.amount
                    )));
                }
                unit.complete_entry(prior.id).await?;
                let new_balance = unit.apply_to_balance(user_id, prior.amount).await?;
                let events = unit.commit().await?;
                self.publish(events);

                tracing::info!(checkout_id, user = %user_id, amount = %prior.amount, "pending recharge settled");
                Ok(RechargeReceipt {
                    amount: prior.amount,
                    new_balance,
                    already_processed: false,
                })
            }
            Some(_) => Err(PaymentError::DuplicateKey(checkout_id.to_string())),
            None => {
                let entry = unit
                    .insert_entry(NewEntry::recharge(user_id.clone(), amount, checkout_id))
                    .await?;
                let new_balance = unit.apply_to_balance(user_id, entry.amount).await?;
                let events = unit.commit().await?;
                self.publish(events);

                tracing::info!(checkout_id, user = %user_id, %amount, "recharge credited");
                Ok(RechargeReceipt {
                    amount: entry.amount,
                    new_balance,
                    already_processed: false,
                })
            }
        }
    }

    /// Records the definitive rejection under the idempotency key and
    /// commits only that marker, so an exact replay reproduces the same
    /// rejection instead of re-checking a possibly topped-up wallet.
    async fn reject_for_insufficient_funds(
        &self,
        mut unit: Box<dyn crate::domain::ports::LedgerUnit>,
        user_id: &UserId,
        price: Amount,
        available: Balance,
        key: &str,
        annotate: impl FnOnce(NewEntry) -> NewEntry,
    ) -> Result<PaymentReceipt> {
        let rejection = annotate(
            NewEntry::vend_rejection(user_id.clone(), price, key.to_string())
                .with_metadata("available", available.value().to_string()),
        );
        unit.insert_entry(rejection).await?;
        let events = unit.commit().await?;
        self.publish(events);

        tracing::info!(
            user = %user_id,
            %price,
            %available,
            "vend payment rejected: insufficient funds"
        );
        Err(PaymentError::InsufficientFunds {
            required: price.value(),
            available: available.value(),
        })
    }
}

fn paid_by(user_id: &UserId) -> Metadata {
    let mut patch = Metadata::new();
    patch.insert(
        "paid_by".to_string(),
        Value::String(user_id.to_string()),
    );
    patch
}

/// Reconstructs the recorded outcome for a replayed idempotency key.
fn replay_outcome(prior: LedgerEntry, key: &str) -> Result<PaymentReceipt> {
    // Only a debit outcome can replay as a debit; a key that already names
    // a recharge or refund entry is a conflicting intent.
    if prior.kind != EntryKind::Vend {
        return Err(PaymentError::DuplicateKey(key.to_string()));
    }
    match prior.status {
        EntryStatus::Completed => {
            let new_balance = prior.metadata_decimal("new_balance").ok_or_else(|| {
                PaymentError::storage(format!("ledger entry {} has no recorded balance", prior.id))
            })?;
            tracing::debug!(%key, entry = %prior.id, "idempotent replay of a settled payment");
            Ok(PaymentReceipt {
                new_balance: Balance::new(new_balance),
                entry_id: prior.id,
                replayed: true,
            })
        }
        EntryStatus::Failed => {
            let available = prior.metadata_decimal("available").ok_or_else(|| {
                PaymentError::storage(format!(
                    "ledger entry {} has no recorded rejection state",
                    prior.id
                ))
            })?;
            tracing::debug!(%key, entry = %prior.id, "idempotent replay of a rejected payment");
            Err(PaymentError::InsufficientFunds {
                required: -prior.amount,
                available,
            })
        }
        // Vend entries are written settled or failed, never pending.
        EntryStatus::Pending => Err(PaymentError::DuplicateKey(key.to_string())),
    }
}
