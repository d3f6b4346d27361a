mod common;

use brewpay::domain::entry::{EntryKind, EntryStatus};
use brewpay::domain::identity::Caller;
use brewpay::domain::ports::LedgerStore;
use brewpay::domain::wallet::Balance;
use brewpay::error::PaymentError;
use common::*;
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_double_reconciliation_credits_once() {
    let rig = rig();
    let alice = uid("alice");
    rig.processor.insert_paid("chk-1", dec!(20.00));

    let first = rig
        .engine
        .reconcile_recharge(&Caller::Service, "chk-1", &alice, amount(dec!(20.00)))
        .await
        .unwrap();
    assert!(!first.already_processed);
    assert_eq!(first.new_balance, Balance::new(dec!(20.00)));

    // Webhook redelivery: a no-op that reports the prior success.
    let second = rig
        .engine
        .reconcile_recharge(&Caller::Service, "chk-1", &alice, amount(dec!(20.00)))
        .await
        .unwrap();
    assert!(second.already_processed);
    assert_eq!(second.amount, dec!(20.00));

    assert_eq!(
        rig.store.get_wallet(&alice).await.unwrap().balance,
        Balance::new(dec!(20.00))
    );
    assert_wallet_reconciled(&rig, &alice).await;
}

#[tokio::test]
async fn test_unpaid_checkout_never_credits() {
    let rig = rig();
    let alice = uid("alice");
    rig.processor.insert_unpaid("chk-1", dec!(20.00));

    let err = rig
        .engine
        .reconcile_recharge(&Caller::Service, "chk-1", &alice, amount(dec!(20.00)))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::VerificationFailed(_)));

    assert_eq!(rig.store.get_wallet(&alice).await.unwrap().balance, Balance::ZERO);
    assert!(rig.store.entries_for_user(&alice).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_checkout_fails_verification() {
    let rig = rig();
    let alice = uid("alice");

    let err = rig
        .engine
        .reconcile_recharge(&Caller::Service, "chk-ghost", &alice, amount(dec!(20.00)))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::VerificationFailed(_)));
    assert_eq!(rig.store.get_wallet(&alice).await.unwrap().balance, Balance::ZERO);
}

#[tokio::test]
async fn test_claimed_amount_must_match_processor() {
    let rig = rig();
    let alice = uid("alice");
    rig.processor.insert_paid("chk-1", dec!(20.00));

    let err = rig
        .engine
        .reconcile_recharge(&Caller::Service, "chk-1", &alice, amount(dec!(25.00)))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::VerificationFailed(_)));
    assert_eq!(rig.store.get_wallet(&alice).await.unwrap().balance, Balance::ZERO);
}

#[tokio::test]
async fn test_pending_recharge_settles_exactly_once() {
    let rig = rig();
    let alice = uid("alice");

    let entry = rig
        .engine
        .register_pending_recharge(
            &Caller::User(alice.clone()),
            "chk-1",
            &alice,
            amount(dec!(20.00)),
        )
        .await
        .unwrap();
    assert_eq!(entry.status, EntryStatus::Pending);

    // Registration alone moves no money.
    assert_eq!(rig.store.get_wallet(&alice).await.unwrap().balance, Balance::ZERO);
    assert_wallet_reconciled(&rig, &alice).await;

    rig.processor.insert_paid("chk-1", dec!(20.00));
    let receipt = rig
        .engine
        .reconcile_recharge(&Caller::Service, "chk-1", &alice, amount(dec!(20.00)))
        .await
        .unwrap();
    assert!(!receipt.already_processed);
    assert_eq!(receipt.new_balance, Balance::new(dec!(20.00)));

    let entries = rig.store.entries_for_user(&alice).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, EntryStatus::Completed);
    assert_eq!(entries[0].kind, EntryKind::Recharge);

    let replay = rig
        .engine
        .reconcile_recharge(&Caller::Service, "chk-1", &alice, amount(dec!(20.00)))
        .await
        .unwrap();
    assert!(replay.already_processed);
    assert_eq!(
        rig.store.get_wallet(&alice).await.unwrap().balance,
        Balance::new(dec!(20.00))
    );
    assert_wallet_reconciled(&rig, &alice).await;
}

#[tokio::test]
async fn test_registering_same_checkout_twice_is_rejected() {
    let rig = rig();
    let alice = uid("alice");

    rig.engine
        .register_pending_recharge(
            &Caller::User(alice.clone()),
            "chk-1",
            &alice,
            amount(dec!(20.00)),
        )
        .await
        .unwrap();

    let err = rig
        .engine
        .register_pending_recharge(
            &Caller::User(alice.clone()),
            "chk-1",
            &alice,
            amount(dec!(20.00)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::DuplicateKey(_)));
}

#[tokio::test]
async fn test_pending_recharge_settles_for_owner_only() {
    let rig = rig();
    let alice = uid("alice");
    let mallory = uid("mallory");

    rig.engine
        .register_pending_recharge(
            &Caller::User(alice.clone()),
            "chk-1",
            &alice,
            amount(dec!(20.00)),
        )
        .await
        .unwrap();
    rig.processor.insert_paid("chk-1", dec!(20.00));

    let err = rig
        .engine
        .reconcile_recharge(&Caller::Service, "chk-1", &mallory, amount(dec!(20.00)))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Validation(_)));
    assert_eq!(rig.store.get_wallet(&alice).await.unwrap().balance, Balance::ZERO);
    assert_eq!(rig.store.get_wallet(&mallory).await.unwrap().balance, Balance::ZERO);
}
