//! Storage and processor adapters behind the domain ports.

pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
mod staged;
pub mod sumup;
