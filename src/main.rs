use brewpay::application::engine::PaymentEngine;
use brewpay::domain::identity::{Caller, MachineId, UserId};
use brewpay::domain::ports::{LedgerStoreRef, ProcessorClientRef};
use brewpay::domain::session::SessionId;
use brewpay::domain::wallet::Amount;
use brewpay::error::PaymentError;
use brewpay::infrastructure::in_memory::InMemoryLedger;
use brewpay::infrastructure::sumup::StaticProcessor;
use brewpay::interfaces::csv::op_reader::{OpKind, OpReader, OpRecord};
use brewpay::interfaces::csv::wallet_writer::WalletWriter;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// Replays a CSV scenario of engine operations and prints the final wallet
/// state as CSV.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input operations CSV file (op, machine, user, amount, key)
    input: PathBuf,

    /// Path to persistent database (optional). Requires the
    /// storage-rocksdb feature.
    #[arg(long)]
    db_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let store = open_store(cli.db_path)?;
    let processor = Arc::new(StaticProcessor::new());
    let engine = PaymentEngine::new(
        Arc::clone(&store),
        Arc::clone(&processor) as ProcessorClientRef,
    );

    let mut latest_sessions: HashMap<String, SessionId> = HashMap::new();
    let mut checkout_seq = 0u64;

    let file = File::open(&cli.input).into_diagnostic()?;
    for record in OpReader::new(file).records() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable row");
                continue;
            }
        };
        if let Err(e) = apply(
            &engine,
            &processor,
            &mut latest_sessions,
            &mut checkout_seq,
            record,
        )
        .await
        {
            tracing::warn!(error = %e, "operation failed");
        }
    }

    let wallets = store.list_wallets().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = WalletWriter::new(stdout.lock());
    writer.write_wallets(wallets).into_diagnostic()?;

    Ok(())
}

fn open_store(db_path: Option<PathBuf>) -> Result<LedgerStoreRef> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => Ok(Arc::new(
            brewpay::infrastructure::rocksdb::RocksLedger::open(path).into_diagnostic()?,
        )),
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => miette::bail!("--db-path requires building with the storage-rocksdb feature"),
        None => Ok(Arc::new(InMemoryLedger::new())),
    }
}

async fn apply(
    engine: &PaymentEngine,
    processor: &StaticProcessor,
    latest_sessions: &mut HashMap<String, SessionId>,
    checkout_seq: &mut u64,
    record: OpRecord,
) -> brewpay::Result<()> {
    match record.op {
        OpKind::CreateSession => {
            let machine = required(record.machine, "machine")?;
            let session = engine
                .create_vend_session(
                    &Caller::MachineBridge,
                    &MachineId::new(machine.clone()),
                    amount(record.amount)?,
                )
                .await?;
            latest_sessions.insert(machine, session.id);
        }
        OpKind::Pay => {
            let machine = required(record.machine, "machine")?;
            let session_id = *latest_sessions.get(&machine).ok_or_else(|| {
                PaymentError::Validation(format!("no session created yet for machine {machine}"))
            })?;
            let user = UserId::new(required(record.user, "user")?);
            engine
                .process_vend_payment(&Caller::User(user.clone()), session_id, &user, record.key)
                .await?;
        }
        OpKind::PayDirect => {
            let user = UserId::new(required(record.user, "user")?);
            engine
                .pay_direct(
                    &Caller::User(user.clone()),
                    &user,
                    amount(record.amount)?,
                    record.key,
                )
                .await?;
        }
        OpKind::Recharge => {
            let user = UserId::new(required(record.user, "user")?);
            let amount = amount(record.amount)?;
            *checkout_seq += 1;
            let seq = *checkout_seq;
            let checkout_id = record
                .key
                .unwrap_or_else(|| format!("replay-checkout-{seq}"));
            // The scenario file is the trusted record of what the processor
            // settled, so seed the static processor before reconciling.
            processor.insert_paid(&checkout_id, amount.value());
            engine
                .reconcile_recharge(&Caller::Service, &checkout_id, &user, amount)
                .await?;
        }
    }
    Ok(())
}

fn required(field: Option<String>, name: &str) -> brewpay::Result<String> {
    field
        .filter(|value| !value.is_empty())
        .ok_or_else(|| PaymentError::Validation(format!("missing {name} column")))
}

fn amount(field: Option<Decimal>) -> brewpay::Result<Amount> {
    Amount::new(
        field.ok_or_else(|| PaymentError::Validation("missing amount column".to_string()))?,
    )
}
