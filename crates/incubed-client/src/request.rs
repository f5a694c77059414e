//! The request state machine.
//!
//! A [`RequestContext`] is driven by [`Client::poll`]: every call either asks
//! the caller to send a payload to some urls and poll again with what came
//! back, or finishes with a verified result or an error.
//!
//! ```text
//! Init -> WaitingForResponse -> (verify) -> Success
//!              ^     |                  \-> WaitingForRequiredCtx -> (verify again)
//!              |     v
//!              +-- retry with other nodes, until max_attempts -> Error
//! ```
//!
//! Responses of one round are verified in arrival order and the first one
//! that verifies wins. A verification that depends on another request (a
//! newer validator list, a bitcoin target proof) suspends the context on a
//! child context for that request; once the child succeeded the same
//! response is verified again.

use crate::error::ClientError;
use crate::nodes::{NodeFilter, NODE_PROP_PROOF};
use crate::response::{is_system_error, parse_node_response};
use crate::transport::{TransportError, TransportResponse};
use crate::Client;
use incubed_core::{
    Consensus, In3Request, ProofLevel, RpcRequest, RpcResponse, Verdict, VerificationContext,
    VerifyError,
};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    Init,
    WaitingForResponse,
    WaitingForRequiredCtx,
    Success,
    Error,
}

/// A payload the caller has to deliver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outgoing {
    pub urls: Vec<String>,
    pub payload: String,
    pub timeout_ms: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PollResult {
    /// Send the payload and poll again with the responses.
    Send(Outgoing),
    Done(Result<Value, ClientError>),
}

/// A parsed node answer waiting for verification.
#[derive(Clone, Debug)]
struct NodeAnswer {
    url: String,
    latency_ms: u64,
    response: RpcResponse,
}

/// One request on its way to a verified result.
#[derive(Debug)]
pub struct RequestContext {
    pub request: RpcRequest,
    pub chain_id: u64,
    state: RequestState,
    depth: usize,
    attempt: u32,
    /// Unix seconds after which the request fails, shared with children.
    deadline: u64,
    outgoing: Option<Outgoing>,
    /// Urls of the current round.
    asked: Vec<String>,
    /// Urls of earlier rounds, not asked again.
    excluded: Vec<String>,
    signers: Vec<[u8; 20]>,
    pending: VecDeque<NodeAnswer>,
    required: Option<Box<RequestContext>>,
    /// Keys of child requests that already succeeded.
    completed: HashSet<String>,
    last_error: Option<ClientError>,
    outcome: Option<Result<Value, ClientError>>,
}

impl RequestContext {
    pub fn new(request: RpcRequest, chain_id: u64, deadline: u64) -> Self {
        Self {
            request,
            chain_id,
            state: RequestState::Init,
            depth: 0,
            attempt: 0,
            deadline,
            outgoing: None,
            asked: Vec::new(),
            excluded: Vec::new(),
            signers: Vec::new(),
            pending: VecDeque::new(),
            required: None,
            completed: HashSet::new(),
            last_error: None,
            outcome: None,
        }
    }

    fn child(&self, request: RpcRequest) -> Self {
        Self {
            depth: self.depth + 1,
            ..Self::new(request, self.chain_id, self.deadline)
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Rounds of node selection that failed so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The child this context waits for, if any.
    pub fn required(&self) -> Option<&RequestContext> {
        self.required.as_deref()
    }

    pub fn outcome(&self) -> Option<&Result<Value, ClientError>> {
        self.outcome.as_ref()
    }

    fn succeed(&mut self, result: Value) -> PollResult {
        self.state = RequestState::Success;
        self.outcome = Some(Ok(result.clone()));
        PollResult::Done(Ok(result))
    }

    fn fail(&mut self, error: ClientError) -> PollResult {
        self.state = RequestState::Error;
        self.required = None;
        self.pending.clear();
        self.outcome = Some(Err(error.clone()));
        PollResult::Done(Err(error))
    }
}

impl Client {
    /// Advance `ctx`. `input` carries the transport's answers to the last
    /// [`PollResult::Send`] and is ignored in every other state.
    pub fn poll(&mut self, ctx: &mut RequestContext, input: Option<Vec<TransportResponse>>) -> PollResult {
        if let Some(outcome) = &ctx.outcome {
            return PollResult::Done(outcome.clone());
        }
        let now = self.now();
        if now >= ctx.deadline {
            warn!(method = %ctx.request.method, "request timed out");
            return ctx.fail(ClientError::Timeout(self.config.max_duration));
        }

        match ctx.state {
            RequestState::Init => self.dispatch(ctx, now),
            RequestState::WaitingForResponse => match input {
                Some(responses) => {
                    self.collect(ctx, responses, now);
                    self.process(ctx, now)
                }
                None => match &ctx.outgoing {
                    Some(outgoing) => PollResult::Send(outgoing.clone()),
                    None => self.dispatch(ctx, now),
                },
            },
            RequestState::WaitingForRequiredCtx => {
                let Some(child) = ctx.required.as_mut() else {
                    return ctx.fail(VerifyError::internal("waiting without a required request").into());
                };
                match self.poll(child, input) {
                    PollResult::Send(outgoing) => PollResult::Send(outgoing),
                    PollResult::Done(Ok(_)) => {
                        ctx.completed.insert(child.request.key());
                        ctx.required = None;
                        ctx.state = RequestState::WaitingForResponse;
                        self.process(ctx, now)
                    }
                    PollResult::Done(Err(e)) => {
                        warn!(method = %child.request.method, error = %e, "required request failed");
                        ctx.fail(e)
                    }
                }
            }
            RequestState::Success | RequestState::Error => {
                ctx.fail(VerifyError::internal("request finished without an outcome").into())
            }
        }
    }

    /// Pick nodes for a new round and build the payload.
    fn dispatch(&mut self, ctx: &mut RequestContext, now: u64) -> PollResult {
        let proof = self.config.proof;
        let federated = matches!(
            self.engine.spec(ctx.chain_id).map(|s| &s.consensus),
            Some(Consensus::Federated)
        );
        let Some(nodes) = self.nodes.get(&ctx.chain_id) else {
            return ctx.fail(ClientError::NoNodes { chain_id: ctx.chain_id });
        };

        let props = match proof {
            ProofLevel::None => self.config.node_props,
            _ => self.config.node_props | NODE_PROP_PROOF,
        };
        let filter = NodeFilter {
            min_deposit: self.config.min_deposit,
            props,
            exclude: &ctx.excluded,
        };
        let selected = nodes.select(&mut self.rng, self.config.request_count, &filter, now);
        if selected.is_empty() {
            let error = ctx
                .last_error
                .take()
                .unwrap_or(ClientError::NoNodes { chain_id: ctx.chain_id });
            return ctx.fail(error);
        }
        let urls: Vec<String> = selected.iter().map(|&i| nodes.nodes[i].url.clone()).collect();

        ctx.signers = if federated && proof != ProofLevel::None {
            let signer_filter = NodeFilter {
                min_deposit: self.config.min_deposit,
                props: 0,
                exclude: &urls,
            };
            nodes
                .select(&mut self.rng, self.config.signature_count, &signer_filter, now)
                .into_iter()
                .map(|i| nodes.nodes[i].address)
                .filter(|a| *a != [0u8; 20])
                .collect()
        } else {
            Vec::new()
        };

        let verified_hashes = self
            .engine
            .state(ctx.chain_id)
            .map(|s| s.verified_hashes.hashes())
            .unwrap_or_default();
        let mut request = ctx.request.clone();
        request.in3 = Some(In3Request {
            chain_id: ctx.chain_id,
            verification: if proof == ProofLevel::None { "none" } else { "proof" }.to_string(),
            finality: self.config.finality,
            signers: ctx.signers.clone(),
            verified_hashes,
            use_full_proof: self.config.use_full_proof || proof == ProofLevel::Full,
        });
        let payload = match serde_json::to_string(&[request]) {
            Ok(payload) => payload,
            Err(e) => return ctx.fail(VerifyError::internal(e.to_string()).into()),
        };

        debug!(method = %ctx.request.method, attempt = ctx.attempt, urls = ?urls, "dispatching request");
        let outgoing = Outgoing {
            urls: urls.clone(),
            payload,
            timeout_ms: self.config.timeout,
        };
        ctx.asked = urls;
        ctx.outgoing = Some(outgoing.clone());
        ctx.state = RequestState::WaitingForResponse;
        PollResult::Send(outgoing)
    }

    /// Turn transport answers of the current round into pending answers.
    /// Nodes that did not answer properly are blacklisted.
    fn collect(&mut self, ctx: &mut RequestContext, mut responses: Vec<TransportResponse>, now: u64) {
        let until = now + self.config.blacklist_time;
        for url in &ctx.asked {
            let index = self.nodes.get(&ctx.chain_id).and_then(|n| n.index_of(url));
            let answer = match responses.iter().position(|r| &r.url == url) {
                Some(pos) => responses.swap_remove(pos),
                None => TransportResponse::err(url.clone(), TransportError::RequestFailed("no response".into()), 0),
            };
            let error = match answer.data {
                Ok(data) => match parse_node_response(&data) {
                    Ok(response) => {
                        ctx.pending.push_back(NodeAnswer {
                            url: answer.url,
                            latency_ms: answer.latency_ms,
                            response,
                        });
                        continue;
                    }
                    Err(message) => ClientError::Verification(VerifyError::invalid(message)),
                },
                Err(e) => ClientError::Transport(e.to_string()),
            };
            warn!(url = %url, error = %error, "node failed to answer");
            if let (Some(index), Some(nodes)) = (index, self.nodes.get_mut(&ctx.chain_id)) {
                nodes.blacklist(index, until);
            }
            ctx.last_error = Some(error);
        }
    }

    /// Verify pending answers until one is accepted, a child request is
    /// needed or the round is exhausted.
    fn process(&mut self, ctx: &mut RequestContext, now: u64) -> PollResult {
        let until = now + self.config.blacklist_time;
        while let Some(answer) = ctx.pending.front().cloned() {
            let index = self.nodes.get(&ctx.chain_id).and_then(|n| n.index_of(&answer.url));

            if let Some(error) = &answer.response.error {
                ctx.pending.pop_front();
                if is_system_error(error) {
                    warn!(url = %answer.url, message = %error.message, "node reported an internal error");
                    self.blacklist(ctx.chain_id, index, until);
                    ctx.last_error = Some(error.clone().into());
                    continue;
                }
                // the node answered correctly, the request itself failed
                self.record_response(ctx.chain_id, index, answer.latency_ms);
                return ctx.fail(error.clone().into());
            }

            let result = answer.response.result.clone().unwrap_or(Value::Null);
            let verdict = {
                let vctx = VerificationContext::new(&ctx.request, &result, answer.response.in3.as_ref())
                    .with_proof_level(self.config.proof)
                    .with_finality(self.config.finality)
                    .with_full_proof(self.config.use_full_proof || self.config.proof == ProofLevel::Full)
                    .with_signers(&ctx.signers);
                self.engine.verify(ctx.chain_id, &vctx)
            };

            match verdict {
                Ok(Verdict::Verified) => {
                    info!(method = %ctx.request.method, url = %answer.url, "response verified");
                    self.record_response(ctx.chain_id, index, answer.latency_ms);
                    return ctx.succeed(result);
                }
                Ok(Verdict::NeedsRequest(request)) => {
                    if ctx.completed.contains(&request.key()) {
                        let error = VerifyError::invalid(format!(
                            "verification still needs {} after it was answered",
                            request.method
                        ));
                        if let Some(done) = self.reject(ctx, &answer, index, error, until) {
                            return done;
                        }
                        continue;
                    }
                    if ctx.depth >= self.config.max_depth {
                        return ctx.fail(
                            VerifyError::internal(format!("too many nested requests for {}", request.method))
                                .into(),
                        );
                    }
                    debug!(parent = %ctx.request.method, child = %request.method, "verification requires another request");
                    ctx.required = Some(Box::new(ctx.child(request)));
                    ctx.state = RequestState::WaitingForRequiredCtx;
                    return self.poll(ctx, None);
                }
                Err(error) => {
                    if let Some(done) = self.reject(ctx, &answer, index, error, until) {
                        return done;
                    }
                }
            }
        }
        self.retry(ctx, now)
    }

    /// Drop an answer that failed verification. Returns the final result
    /// when the failure is not worth asking another node.
    fn reject(
        &mut self,
        ctx: &mut RequestContext,
        answer: &NodeAnswer,
        index: Option<usize>,
        error: VerifyError,
        until: u64,
    ) -> Option<PollResult> {
        ctx.pending.pop_front();
        warn!(url = %answer.url, kind = ?error.kind, error = %error, "verification failed");
        if !error.missing_signers.is_empty() {
            if let Some(nodes) = self.nodes.get_mut(&ctx.chain_id) {
                nodes.report_missing_signers(&answer.url, &error.missing_signers, until);
            }
        }
        if error.blacklists_node() {
            self.blacklist(ctx.chain_id, index, until);
        }
        if !error.is_retryable() {
            return Some(ctx.fail(error.into()));
        }
        ctx.last_error = Some(error.into());
        None
    }

    fn retry(&mut self, ctx: &mut RequestContext, now: u64) -> PollResult {
        ctx.attempt += 1;
        if ctx.attempt >= self.config.max_attempts {
            let error = ctx
                .last_error
                .take()
                .unwrap_or(ClientError::NoNodes { chain_id: ctx.chain_id });
            warn!(method = %ctx.request.method, attempts = ctx.attempt, error = %error, "giving up");
            return ctx.fail(error);
        }
        info!(method = %ctx.request.method, attempt = ctx.attempt, "retrying with other nodes");
        let asked = std::mem::take(&mut ctx.asked);
        ctx.excluded.extend(asked);
        ctx.outgoing = None;
        ctx.state = RequestState::Init;
        self.dispatch(ctx, now)
    }

    fn blacklist(&mut self, chain_id: u64, index: Option<usize>, until: u64) {
        if let (Some(index), Some(nodes)) = (index, self.nodes.get_mut(&chain_id)) {
            nodes.blacklist(index, until);
        }
    }

    fn record_response(&mut self, chain_id: u64, index: Option<usize>, latency_ms: u64) {
        if let (Some(index), Some(nodes)) = (index, self.nodes.get_mut(&chain_id)) {
            nodes.record_response(index, latency_ms);
        }
    }
}
