use crate::bytes::HexError;
use crate::crypto::CryptoError;
use crate::rlp::RlpError;
use crate::trie::TrieError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed verification. The orchestrator decides between
/// retrying, blacklisting and giving up from the kind alone, never from the
/// message text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Impossible configuration. Fatal.
    Config,
    /// The node did not deliver the proof we asked for.
    ProofMissing,
    /// The proof was delivered but does not verify.
    ProofInvalid,
    Transport,
    Timeout,
    /// Method or chain we cannot verify.
    Unsupported,
    /// Bug or corrupted local state. Fatal.
    Internal,
}

impl ErrorKind {
    /// Whether the node that produced the response should be penalised.
    pub fn blacklists_node(self) -> bool {
        matches!(
            self,
            ErrorKind::ProofMissing | ErrorKind::ProofInvalid | ErrorKind::Transport
        )
    }

    /// Whether asking a different node may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::ProofMissing
                | ErrorKind::ProofInvalid
                | ErrorKind::Transport
                | ErrorKind::Unsupported
        )
    }
}

/// A failed verification: a kind plus the message surfaced to the caller.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct VerifyError {
    pub kind: ErrorKind,
    pub message: String,
    /// Cleared for failures that are not the responding node's fault,
    /// e.g. signatures missing because other signers are offline.
    pub blacklist: bool,
    /// Signers whose federated signature was missing from the proof.
    pub missing_signers: Vec<[u8; 20]>,
}

impl VerifyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            blacklist: kind.blacklists_node(),
            missing_signers: Vec::new(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProofInvalid, message)
    }

    pub fn missing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProofMissing, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn without_blacklist(mut self) -> Self {
        self.blacklist = false;
        self
    }

    pub fn with_missing_signers(mut self, signers: Vec<[u8; 20]>) -> Self {
        self.missing_signers = signers;
        self
    }

    pub fn blacklists_node(&self) -> bool {
        self.blacklist
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Prefix the message with what was being verified.
    pub fn context(mut self, what: &str) -> Self {
        self.message = format!("{}: {}", what, self.message);
        self
    }
}

impl From<RlpError> for VerifyError {
    fn from(e: RlpError) -> Self {
        VerifyError::invalid(format!("Invalid RLP: {}", e))
    }
}

impl From<TrieError> for VerifyError {
    fn from(e: TrieError) -> Self {
        VerifyError::invalid(e.to_string())
    }
}

impl From<CryptoError> for VerifyError {
    fn from(e: CryptoError) -> Self {
        VerifyError::invalid(format!("Invalid signature: {}", e))
    }
}

impl From<HexError> for VerifyError {
    fn from(e: HexError) -> Self {
        VerifyError::invalid(e.to_string())
    }
}

pub type VerifyResult<T> = Result<T, VerifyError>;
