//! # Incubed Core
//!
//! Trustless verification of JSON-RPC responses from untrusted nodes.
//!
//! This crate contains **no networking code** and owns no persistent state
//! beyond what a [`VerificationEngine`] accumulates per chain. Every response
//! passes through a [`Verifier`] before the client hands it to the caller.
//!
//! ## Trust Model
//!
//! - **Ethereum** (`eth` module): a header is trusted by proof of work hash,
//!   by the authority round rotation of a verified validator set, or by the
//!   signatures of registered signer nodes. Receipts, transactions and
//!   account state are proven with Merkle-Patricia proofs against that
//!   header's roots.
//!
//! - **Bitcoin** (`btc` module): headers must meet a target that is known to
//!   be valid for their difficulty adjustment period, and carry enough
//!   finality headers on top. Transactions are proven with merkle branches.
//!
//! - **IPFS** (`ipfs` module): content is hashed to its CIDv0 and compared
//!   with the requested hash.
//!
//! ## Usage
//!
//! ```ignore
//! use incubed_core::{ChainSpec, Consensus, VerificationContext, VerificationEngine};
//!
//! let mut engine = VerificationEngine::new();
//! engine.register(ChainSpec::ethereum(1, Consensus::ProofOfWork));
//! let verdict = engine.verify(1, &VerificationContext::new(&request, &result, in3.as_ref()))?;
//! ```

pub mod btc;
pub mod bytes;
pub mod crypto;
pub mod error;
pub mod eth;
pub mod ipfs;
pub mod json;
pub mod rlp;
pub mod trie;
pub mod types;
pub mod verifier;

#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixtures;

// Re-export commonly used types for convenience
pub use error::{ErrorKind, VerifyError, VerifyResult};
pub use types::*;
pub use verifier::{
    ChainState, Verdict, VerificationContext, VerificationEngine, Verifier,
    DEFAULT_MAX_VERIFIED_HASHES,
};
