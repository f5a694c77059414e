pub mod chain;
pub mod execution;
pub mod rpc;
pub mod serde_hex;

pub use chain::{BtcConfig, ChainSpec, ChainType, Consensus, ProofLevel, ValidatorTransition};
pub use execution::{AccountProof, AccountState, Log, Receipt, StorageProof};
pub use rpc::{
    BtcProof, EthProof, In3Request, In3Response, RpcError, RpcRequest, RpcResponse, SignedBlockHash,
};
