//! Payment ledger and vend-session transaction engine for self-service
//! vending machines.
//!
//! A user pays for a vend either from a pre-funded wallet, debited against
//! a machine-created session, or through an external hosted checkout that
//! is reconciled into a wallet credit. The engine guarantees that a user is
//! charged at most once per logical intent, that concurrent attempts on one
//! session cannot double-spend, and that a wallet balance always equals the
//! sum of its completed ledger entries.

pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;

pub use application::engine::{PaymentEngine, PaymentReceipt, RechargeReceipt};
pub use error::{PaymentError, Result};
