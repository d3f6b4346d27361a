#![allow(dead_code)]

use brewpay::application::engine::PaymentEngine;
use brewpay::domain::identity::{Caller, MachineId, UserId};
use brewpay::domain::ports::{LedgerStore, LedgerStoreRef, ProcessorClientRef};
use brewpay::domain::wallet::Amount;
use brewpay::infrastructure::in_memory::InMemoryLedger;
use brewpay::infrastructure::sumup::StaticProcessor;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct TestRig {
    pub engine: PaymentEngine,
    pub store: Arc<InMemoryLedger>,
    pub processor: Arc<StaticProcessor>,
}

pub fn rig() -> TestRig {
    let store = Arc::new(InMemoryLedger::new());
    let processor = Arc::new(StaticProcessor::new());
    let engine = PaymentEngine::new(
        Arc::clone(&store) as LedgerStoreRef,
        Arc::clone(&processor) as ProcessorClientRef,
    );
    TestRig {
        engine,
        store,
        processor,
    }
}

pub fn amount(value: Decimal) -> Amount {
    Amount::new(value).unwrap()
}

pub fn uid(name: &str) -> UserId {
    UserId::new(name)
}

pub fn machine(name: &str) -> MachineId {
    MachineId::new(name)
}

static FUND_SEQ: AtomicU64 = AtomicU64::new(0);

/// Credits a wallet through the reconciler, the same path production uses.
pub async fn fund(rig: &TestRig, user: &UserId, value: Decimal) {
    let seq = FUND_SEQ.fetch_add(1, Ordering::Relaxed);
    let checkout_id = format!("fund-{user}-{seq}");
    rig.processor.insert_paid(&checkout_id, value);
    rig.engine
        .reconcile_recharge(&Caller::Service, &checkout_id, user, amount(value))
        .await
        .unwrap();
}

/// The reconciliation invariant: a wallet balance must equal the sum of
/// that user's COMPLETED ledger entries. Checked after every scenario.
pub async fn assert_wallet_reconciled(rig: &TestRig, user: &UserId) {
    let wallet = rig.store.get_wallet(user).await.unwrap();
    let ledger_sum: Decimal = rig
        .store
        .entries_for_user(user)
        .await
        .unwrap()
        .iter()
        .filter(|e| e.counts_toward_balance())
        .map(|e| e.amount)
        .sum();
    assert_eq!(
        wallet.balance.value(),
        ledger_sum,
        "wallet {user} diverged from its ledger"
    );
}
