//! Deterministic chains and proofs for tests. Enabled for this crate's own
//! tests and, through the `test-fixtures` feature, for downstream crates.
//!
//! Fixture builders panic on internal inconsistencies; they only ever run
//! under test.

pub mod btc;
pub mod eth;
