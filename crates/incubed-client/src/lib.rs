//! # Incubed Client
//!
//! Asks untrusted nodes and returns only what `incubed-core` could verify.
//!
//! ## Architecture
//!
//! - The [`Client`] owns the verification engine, the node lists with their
//!   weights, and the configuration. There are no globals.
//! - Requests run as [`RequestContext`] state machines. Callers with their own
//!   event loop drive them with [`Client::poll`]; everybody else uses
//!   [`Client::execute`] with a blocking [`Transport`].
//! - Node weights, verified bitcoin targets and validator history survive
//!   restarts through an optional [`Storage`].
//!
//! ```ignore
//! let config = ClientConfig::from_json(&std::fs::read_to_string("in3.json")?)?;
//! let mut client = Client::new(config)?;
//! let receipt = client.execute("eth_getTransactionReceipt", vec![json!(hash)], &mut transport)?;
//! ```

pub mod config;
pub mod error;
pub mod nodes;
pub mod request;
pub mod response;
pub mod transport;

pub use config::{ChainConfig, ClientConfig};
pub use error::ClientError;
pub use nodes::{NodeList, NodeRecord, NodeWeight};
pub use request::{Outgoing, PollResult, RequestContext, RequestState};
pub use transport::{MemoryStorage, Storage, Transport, TransportError, TransportResponse};

use incubed_core::btc::target::TargetCache;
use incubed_core::eth::aura::ValidatorHistory;
use incubed_core::{RpcRequest, RpcResponse, VerificationEngine};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Install a `RUST_LOG` driven subscriber, `info` by default. Does nothing
/// when a subscriber is already set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

pub struct Client {
    pub(crate) config: ClientConfig,
    pub(crate) engine: VerificationEngine,
    pub(crate) nodes: HashMap<u64, NodeList>,
    pub(crate) rng: StdRng,
    clock: fn() -> u64,
    storage: Option<Box<dyn Storage>>,
    next_id: u64,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let mut engine = VerificationEngine::new().with_max_verified_hashes(config.max_verified_hashes);
        let mut nodes = HashMap::new();
        for chain in &config.chains {
            engine.register(chain.spec.clone());
            nodes.insert(chain.spec.chain_id, NodeList::new(chain.nodes.clone()));
        }
        Ok(Self {
            config,
            engine,
            nodes,
            rng: StdRng::from_entropy(),
            clock: unix_now,
            storage: None,
            next_id: 1,
        })
    }

    /// Like [`Client::new`], picking up state a previous client persisted.
    pub fn with_storage(config: ClientConfig, storage: Box<dyn Storage>) -> Result<Self, ClientError> {
        let mut client = Self::new(config)?;
        client.storage = Some(storage);
        client.restore();
        Ok(client)
    }

    /// Deterministic node selection.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Source of unix seconds for blacklisting and deadlines.
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn engine(&self) -> &VerificationEngine {
        &self.engine
    }

    pub fn nodes(&self, chain_id: u64) -> Option<&NodeList> {
        self.nodes.get(&chain_id)
    }

    pub fn take_storage(&mut self) -> Option<Box<dyn Storage>> {
        self.storage.take()
    }

    pub fn now(&self) -> u64 {
        (self.clock)()
    }

    /// A fresh context for `method` on `chain_id`, to be driven by
    /// [`Client::poll`].
    pub fn create_request(&mut self, chain_id: u64, method: &str, params: Vec<Value>) -> RequestContext {
        let mut request = RpcRequest::new(method, params);
        request.id = self.next_id;
        self.next_id += 1;
        let deadline = self.now().saturating_add(self.config.max_duration);
        RequestContext::new(request, chain_id, deadline)
    }

    /// Run `method` on the configured chain to a verified result.
    pub fn execute<T: Transport>(&mut self, method: &str, params: Vec<Value>, transport: &mut T) -> Result<Value, ClientError> {
        self.execute_on(self.config.chain_id, method, params, transport)
    }

    pub fn execute_on<T: Transport>(
        &mut self,
        chain_id: u64,
        method: &str,
        params: Vec<Value>,
        transport: &mut T,
    ) -> Result<Value, ClientError> {
        if let Some(result) = response::handle_local_method(method, chain_id) {
            return Ok(result);
        }
        let mut ctx = self.create_request(chain_id, method, params);
        let mut input = None;
        let outcome = loop {
            match self.poll(&mut ctx, input.take()) {
                PollResult::Send(out) => {
                    input = Some(transport.send(&out.urls, &out.payload, out.timeout_ms));
                }
                PollResult::Done(outcome) => break outcome,
            }
        };
        self.persist(chain_id);
        outcome
    }

    /// Answer a JSON-RPC request; failures become error responses.
    pub fn handle<T: Transport>(&mut self, request: RpcRequest, transport: &mut T) -> RpcResponse {
        let chain_id = request
            .in3
            .as_ref()
            .map(|in3| in3.chain_id)
            .unwrap_or(self.config.chain_id);
        let id = Value::from(request.id);
        match self.execute_on(chain_id, &request.method, request.params, transport) {
            Ok(result) => response::success_response(id, result),
            Err(e) => response::error_response(id, &e),
        }
    }

    fn persist(&mut self, chain_id: u64) {
        let Some(storage) = self.storage.as_mut() else {
            return;
        };
        if let Some(nodes) = self.nodes.get(&chain_id) {
            match serde_json::to_vec(nodes) {
                Ok(json) => storage.set(&NodeList::storage_key(chain_id), &json),
                Err(e) => warn!(chain_id, error = %e, "could not store node list"),
            }
        }
        if let Some(state) = self.engine.state(chain_id) {
            if !state.validators.is_empty() {
                match serde_json::to_vec(&state.validators) {
                    Ok(json) => storage.set(&ValidatorHistory::storage_key(chain_id), &json),
                    Err(e) => warn!(chain_id, error = %e, "could not store validators"),
                }
            }
            if !state.btc_targets.is_empty() {
                storage.set(&TargetCache::storage_key(chain_id), &state.btc_targets.to_bytes());
            }
        }
    }

    fn restore(&mut self) {
        let Some(storage) = self.storage.as_ref() else {
            return;
        };
        for (chain_id, nodes) in self.nodes.iter_mut() {
            if let Some(saved) = storage
                .get(&NodeList::storage_key(*chain_id))
                .and_then(|data| serde_json::from_slice::<NodeList>(&data).ok())
            {
                nodes.restore_weights(&saved);
            }
            let Some(state) = self.engine.state_mut(*chain_id) else {
                continue;
            };
            if let Some(saved) = storage
                .get(&ValidatorHistory::storage_key(*chain_id))
                .and_then(|data| serde_json::from_slice::<ValidatorHistory>(&data).ok())
            {
                if saved.last_change() >= state.validators.last_change() {
                    state.validators = saved;
                }
            }
            if let Some(saved) = storage
                .get(&TargetCache::storage_key(*chain_id))
                .and_then(|data| TargetCache::from_bytes(&data))
            {
                if !saved.is_empty() {
                    state.btc_targets = saved;
                }
            }
            debug!(chain_id = *chain_id, "restored chain state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use incubed_core::bytes;
    use incubed_core::fixtures::eth::{AuraChain, BlockFixture};
    use incubed_core::ErrorKind;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    const NOW: u64 = 1_700_000_000;

    /// Answers every url through `handler` and remembers who was asked.
    struct MockTransport<F> {
        handler: F,
        calls: Vec<(Vec<String>, String)>,
    }

    impl<F> MockTransport<F>
    where
        F: FnMut(usize, &str, &RpcRequest) -> Result<Value, TransportError>,
    {
        fn new(handler: F) -> Self {
            Self {
                handler,
                calls: Vec::new(),
            }
        }
    }

    impl<F> Transport for MockTransport<F>
    where
        F: FnMut(usize, &str, &RpcRequest) -> Result<Value, TransportError>,
    {
        fn send(&mut self, urls: &[String], payload: &str, _timeout_ms: u64) -> Vec<TransportResponse> {
            let requests: Vec<RpcRequest> = serde_json::from_str(payload).unwrap();
            let call = self.calls.len();
            self.calls.push((urls.to_vec(), requests[0].method.clone()));
            urls.iter()
                .map(|url| match (self.handler)(call, url.as_str(), &requests[0]) {
                    Ok(body) => TransportResponse::ok(url.clone(), body.to_string(), 25),
                    Err(e) => TransportResponse::err(url.clone(), e, 25),
                })
                .collect()
        }
    }

    fn answer(result: &Value, proof: Value) -> Value {
        json!({"jsonrpc": "2.0", "id": 1, "result": result, "in3": {"proof": proof}})
    }

    fn aura_client(chain: &AuraChain, nodes: usize) -> Client {
        let nodes = (0..nodes)
            .map(|i| NodeRecord::new(format!("https://node{}", i), [i as u8 + 1; 20]))
            .collect();
        let config = ClientConfig {
            chain_id: chain.chain_id,
            finality: 51,
            chains: vec![ChainConfig::new(chain.spec(), nodes)],
            ..ClientConfig::default()
        };
        Client::new(config).unwrap().with_seed(3).with_clock(|| NOW)
    }

    fn corrupted_receipt_proof(block: &BlockFixture, index: usize) -> Value {
        let mut proof = block.receipt_proof(index);
        let last = proof["merkleProof"].as_array().unwrap().len() - 1;
        let mut leaf = bytes::parse_hex(proof["merkleProof"][last].as_str().unwrap()).unwrap();
        *leaf.last_mut().unwrap() ^= 0x01;
        proof["merkleProof"][last] = json!(bytes::to_hex(&leaf));
        proof
    }

    #[test]
    fn test_verified_receipt_is_returned_unmodified() -> anyhow::Result<()> {
        let chain = AuraChain::new(3);
        let block = BlockFixture::aura(&chain, 3, 1);
        let mut client = aura_client(&chain, 1);
        let mut transport = MockTransport::new(|_, _: &str, request: &RpcRequest| {
            assert_eq!(request.method, "eth_getTransactionReceipt");
            let in3 = request.in3.as_ref().unwrap();
            assert_eq!(in3.verification, "proof");
            assert_eq!(in3.finality, 51);
            Ok(answer(&block.receipts_json[1], block.receipt_proof(1)))
        });

        let receipt = client.execute("eth_getTransactionReceipt", vec![json!(block.tx_hash_hex(1))], &mut transport)?;
        assert_eq!(receipt, block.receipts_json[1]);
        assert_eq!(transport.calls.len(), 1);
        assert_eq!(client.nodes(chain.chain_id).unwrap().weight(0).unwrap().response_count, 1);
        Ok(())
    }

    #[test]
    fn test_corrupted_leaf_blacklists_node() {
        let chain = AuraChain::new(3);
        let block = BlockFixture::aura(&chain, 3, 1);
        let mut client = aura_client(&chain, 1);
        let start = client.now();
        let mut transport = MockTransport::new(|_, _: &str, _: &RpcRequest| {
            Ok(answer(&block.receipts_json[1], corrupted_receipt_proof(&block, 1)))
        });

        let err = client
            .execute("eth_getTransactionReceipt", vec![json!(block.tx_hash_hex(1))], &mut transport)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProofInvalid);
        let weight = client.nodes(chain.chain_id).unwrap().weight(0).unwrap();
        assert!(weight.blacklisted_until > start);
        // the only node is excluded after the first round
        assert_eq!(transport.calls.len(), 1);
    }

    #[test]
    fn test_retry_goes_to_another_node() -> anyhow::Result<()> {
        let chain = AuraChain::new(3);
        let block = BlockFixture::aura(&chain, 2, 1);
        let mut client = aura_client(&chain, 3);
        let mut transport = MockTransport::new(|call, _: &str, _: &RpcRequest| {
            if call == 0 {
                Err(TransportError::Http {
                    status: 502,
                    message: "Bad Gateway".into(),
                })
            } else {
                Ok(answer(&block.receipts_json[0], block.receipt_proof(0)))
            }
        });

        let receipt = client.execute("eth_getTransactionReceipt", vec![json!(block.tx_hash_hex(0))], &mut transport)?;
        assert_eq!(receipt, block.receipts_json[0]);
        assert_eq!(transport.calls.len(), 2);
        let first = &transport.calls[0].0[0];
        assert_ne!(first, &transport.calls[1].0[0]);

        let nodes = client.nodes(chain.chain_id).unwrap();
        let failed = nodes.index_of(first).unwrap();
        assert!(nodes.weight(failed).unwrap().is_blacklisted(NOW));
        Ok(())
    }

    #[test]
    fn test_user_error_is_surfaced_without_blacklisting() {
        let chain = AuraChain::new(3);
        let mut client = aura_client(&chain, 2);
        let mut transport = MockTransport::new(|_, _: &str, _: &RpcRequest| {
            Ok(json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "execution reverted"}}))
        });

        let err = client
            .execute("eth_sendRawTransaction", vec![json!("0xf86c")], &mut transport)
            .unwrap_err();
        assert_eq!(
            err,
            ClientError::Rpc {
                code: -32000,
                message: "execution reverted".into()
            }
        );
        assert_eq!(transport.calls.len(), 1);
        let nodes = client.nodes(chain.chain_id).unwrap();
        assert!(nodes.weights.iter().all(|w| !w.is_blacklisted(NOW)));
    }

    #[test]
    fn test_system_error_blacklists_and_retries() -> anyhow::Result<()> {
        let chain = AuraChain::new(3);
        let block = BlockFixture::aura(&chain, 1, 1);
        let mut client = aura_client(&chain, 2);
        let mut transport = MockTransport::new(|call, _: &str, _: &RpcRequest| {
            if call == 0 {
                Ok(json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32603, "message": "Error: no proof available"}}))
            } else {
                Ok(answer(&block.receipts_json[0], block.receipt_proof(0)))
            }
        });

        client.execute("eth_getTransactionReceipt", vec![json!(block.tx_hash_hex(0))], &mut transport)?;
        let nodes = client.nodes(chain.chain_id).unwrap();
        let failed = nodes.index_of(&transport.calls[0].0[0]).unwrap();
        assert!(nodes.weight(failed).unwrap().is_blacklisted(NOW));
        Ok(())
    }

    #[test]
    fn test_newer_validators_are_fetched_first() -> anyhow::Result<()> {
        let chain = AuraChain::new(3);
        let block = BlockFixture::aura(&chain, 1, 1);
        let list = serde_json::to_value(chain.validator_change(500, &chain.validators))?;
        let mut client = aura_client(&chain, 2);
        let mut transport = MockTransport::new(|_, _: &str, request: &RpcRequest| match request.method.as_str() {
            "in3_validatorList" => Ok(json!({"jsonrpc": "2.0", "id": 1, "result": list})),
            _ => Ok(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": block.receipts_json[0],
                "in3": {"proof": block.receipt_proof(0), "lastValidatorChange": "0x1f4"}
            })),
        });

        let receipt = client.execute("eth_getTransactionReceipt", vec![json!(block.tx_hash_hex(0))], &mut transport)?;
        assert_eq!(receipt, block.receipts_json[0]);
        let methods: Vec<&str> = transport.calls.iter().map(|(_, m)| m.as_str()).collect();
        assert_eq!(methods, vec!["eth_getTransactionReceipt", "in3_validatorList"]);
        assert_eq!(client.engine().state(chain.chain_id).unwrap().validators.last_change(), 500);
        Ok(())
    }

    #[test]
    fn test_poll_suspends_on_required_request() {
        let chain = AuraChain::new(3);
        let block = BlockFixture::aura(&chain, 1, 1);
        let mut client = aura_client(&chain, 1);
        let mut ctx = client.create_request(chain.chain_id, "eth_getTransactionReceipt", vec![json!(block.tx_hash_hex(0))]);

        let PollResult::Send(out) = client.poll(&mut ctx, None) else {
            panic!("expected a payload")
        };
        assert_eq!(ctx.state(), RequestState::WaitingForResponse);
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": block.receipts_json[0],
            "in3": {"proof": block.receipt_proof(0), "lastValidatorChange": 500}
        });
        let responses = vec![TransportResponse::ok(out.urls[0].clone(), body.to_string(), 10)];

        let PollResult::Send(child) = client.poll(&mut ctx, Some(responses)) else {
            panic!("expected the validator list request")
        };
        assert_eq!(ctx.state(), RequestState::WaitingForRequiredCtx);
        assert!(child.payload.contains("in3_validatorList"));
        assert_eq!(ctx.required().unwrap().depth(), 1);

        // a failing child fails the parent
        let responses = vec![TransportResponse::ok(
            child.urls[0].clone(),
            json!({"jsonrpc": "2.0", "id": 1, "error": {"code": 1, "message": "unknown method"}}).to_string(),
            10,
        )];
        let PollResult::Done(Err(err)) = client.poll(&mut ctx, Some(responses)) else {
            panic!("expected the request to fail")
        };
        assert_eq!(err.to_string(), "unknown method");
        assert_eq!(ctx.state(), RequestState::Error);
        assert!(ctx.required().is_none());
    }

    static CLOCK: AtomicU64 = AtomicU64::new(NOW);

    #[test]
    fn test_deadline_is_fatal() {
        let chain = AuraChain::new(3);
        let mut client = aura_client(&chain, 3).with_clock(|| CLOCK.load(Ordering::SeqCst));
        client.config.max_duration = 10;
        let mut transport = MockTransport::new(|_, _: &str, _: &RpcRequest| {
            CLOCK.fetch_add(20, Ordering::SeqCst);
            Err(TransportError::Timeout(10_000))
        });
        let err = client.execute("eth_getBalance", vec![json!("0x00"), json!("latest")], &mut transport).unwrap_err();
        assert_eq!(err, ClientError::Timeout(10));
        assert_eq!(transport.calls.len(), 1);
    }

    #[test]
    fn test_local_methods_need_no_node() {
        let chain = AuraChain::new(3);
        let mut client = aura_client(&chain, 1);
        let mut transport = MockTransport::new(|_, _: &str, _: &RpcRequest| -> Result<Value, TransportError> {
            panic!("no request expected")
        });
        assert_eq!(client.execute("eth_chainId", vec![], &mut transport).unwrap(), json!("0x2a"));
    }

    #[test]
    fn test_no_nodes_for_unknown_chain() {
        let chain = AuraChain::new(3);
        let mut client = aura_client(&chain, 1);
        let mut transport = MockTransport::new(|_, _: &str, _: &RpcRequest| Ok(json!({})));
        let err = client
            .execute_on(7, "eth_blockNumber", vec![], &mut transport)
            .unwrap_err();
        assert_eq!(err, ClientError::NoNodes { chain_id: 7 });
    }

    #[test]
    fn test_handle_wraps_errors() {
        let chain = AuraChain::new(3);
        let block = BlockFixture::aura(&chain, 1, 1);
        let mut client = aura_client(&chain, 1);
        let mut transport = MockTransport::new(|_, _: &str, _: &RpcRequest| {
            Ok(answer(&block.receipts_json[0], corrupted_receipt_proof(&block, 0)))
        });
        let mut request = RpcRequest::new("eth_getTransactionReceipt", vec![json!(block.tx_hash_hex(0))]);
        request.id = 9;
        let response = client.handle(request, &mut transport);
        assert_eq!(response.id, json!(9));
        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap().code, -32000);
    }

    #[test]
    fn test_state_survives_restart() {
        let chain = AuraChain::new(3);
        let block = BlockFixture::aura(&chain, 1, 1);
        let list = serde_json::to_value(chain.validator_change(500, &chain.validators)).unwrap();
        let config = aura_client(&chain, 1).config().clone();

        let mut client = Client::with_storage(config.clone(), Box::new(MemoryStorage::new()))
            .unwrap()
            .with_seed(3)
            .with_clock(|| NOW);
        let mut transport = MockTransport::new(|_, _: &str, request: &RpcRequest| match request.method.as_str() {
            "in3_validatorList" => Ok(json!({"jsonrpc": "2.0", "id": 1, "result": list})),
            _ => Ok(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": block.receipts_json[0],
                "in3": {"proof": corrupted_receipt_proof(&block, 0), "lastValidatorChange": 500}
            })),
        });
        let err = client
            .execute("eth_getTransactionReceipt", vec![json!(block.tx_hash_hex(0))], &mut transport)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProofInvalid);
        let storage = client.take_storage().unwrap();

        let restored = Client::with_storage(config, storage).unwrap();
        assert!(restored.nodes(chain.chain_id).unwrap().weight(0).unwrap().is_blacklisted(NOW));
        assert_eq!(restored.engine().state(chain.chain_id).unwrap().validators.last_change(), 500);
    }
}
