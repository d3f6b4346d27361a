use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    CreateSession,
    Pay,
    PayDirect,
    Recharge,
}

/// One row of a replay scenario. Columns that an operation does not use
/// stay empty.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct OpRecord {
    pub op: OpKind,
    pub machine: Option<String>,
    pub user: Option<String>,
    pub amount: Option<Decimal>,
    pub key: Option<String>,
}

/// Reads engine operations from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record
/// lengths, yielding `Result<OpRecord>` lazily.
pub struct OpReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> OpReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn records(self) -> impl Iterator<Item = Result<OpRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_valid_stream() {
        let data = "op, machine, user, amount, key\n\
                    create_session, m1, , 2.50, \n\
                    pay, m1, alice, , key-1";
        let records: Vec<_> = OpReader::new(data.as_bytes()).records().collect();

        assert_eq!(records.len(), 2);
        let first = records[0].as_ref().unwrap();
        assert_eq!(first.op, OpKind::CreateSession);
        assert_eq!(first.machine.as_deref(), Some("m1"));
        assert_eq!(first.amount, Some(dec!(2.50)));
        assert_eq!(first.user, None);

        let second = records[1].as_ref().unwrap();
        assert_eq!(second.op, OpKind::Pay);
        assert_eq!(second.user.as_deref(), Some("alice"));
        assert_eq!(second.key.as_deref(), Some("key-1"));
    }

    #[test]
    fn test_reader_unknown_op() {
        let data = "op, machine, user, amount, key\ndance, m1, , 1.00, ";
        let records: Vec<_> = OpReader::new(data.as_bytes()).records().collect();
        assert!(records[0].is_err());
    }
}
