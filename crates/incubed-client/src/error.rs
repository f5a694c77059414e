use incubed_core::{ErrorKind, RpcError, VerifyError};
use thiserror::Error;

/// Why a request did not produce a verified result.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ClientError {
    /// The response could not be verified by any node asked.
    #[error(transparent)]
    Verification(#[from] VerifyError),
    /// The node answered with an error the caller caused, e.g. a reverted
    /// transaction. Passed on verbatim.
    #[error("{message}")]
    Rpc { code: i64, message: String },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("no node available for chain 0x{chain_id:x}")]
    NoNodes { chain_id: u64 },
    #[error("request took longer than {0}s")]
    Timeout(u64),
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Verification(e) => e.kind,
            ClientError::Rpc { .. } => ErrorKind::Unsupported,
            ClientError::Config(_) => ErrorKind::Config,
            ClientError::NoNodes { .. } => ErrorKind::Config,
            ClientError::Timeout(_) => ErrorKind::Timeout,
            ClientError::Transport(_) => ErrorKind::Transport,
        }
    }

    /// JSON-RPC error object handed to the caller.
    pub fn to_rpc_error(&self) -> RpcError {
        let code = match self {
            ClientError::Rpc { code, .. } => *code,
            ClientError::Config(_) | ClientError::NoNodes { .. } => -32602,
            _ => -32000,
        };
        RpcError {
            code,
            message: self.to_string(),
            data: None,
        }
    }
}

impl From<RpcError> for ClientError {
    fn from(e: RpcError) -> Self {
        ClientError::Rpc {
            code: e.code,
            message: e.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            ClientError::from(VerifyError::invalid("bad")).kind(),
            ErrorKind::ProofInvalid
        );
        assert_eq!(ClientError::Timeout(5).kind(), ErrorKind::Timeout);
        assert_eq!(ClientError::NoNodes { chain_id: 1 }.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_rpc_error_is_verbatim() {
        let err = ClientError::from(RpcError {
            code: 3,
            message: "execution reverted".into(),
            data: None,
        });
        assert_eq!(err.to_string(), "execution reverted");
        assert_eq!(err.to_rpc_error().code, 3);
        let err = ClientError::from(VerifyError::invalid("Wrong Transaction root"));
        assert_eq!(err.to_rpc_error().message, "Wrong Transaction root");
        assert_eq!(err.to_rpc_error().code, -32000);
    }
}
