//! Thin adapters between external representations and the engine API.

pub mod csv;
