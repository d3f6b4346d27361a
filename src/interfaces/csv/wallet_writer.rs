use crate::domain::wallet::Wallet;
use crate::error::Result;
use std::io::Write;

/// Writes final wallet state as CSV (`user_id,balance`).
pub struct WalletWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> WalletWriter<W> {
    pub fn new(dest: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(dest),
        }
    }

    pub fn write_wallets(&mut self, wallets: Vec<Wallet>) -> Result<()> {
        for wallet in wallets {
            self.writer.serialize(wallet)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
