//! Node registry: who can be asked, and how much we like them.
//!
//! Every node carries a [`NodeWeight`] built from its response history. The
//! weight biases the random selection of nodes per request; a node that
//! delivered an unverifiable response is blacklisted for a while and then
//! recovers slowly over a week.

use incubed_core::types::serde_hex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// The node delivers proofs.
pub const NODE_PROP_PROOF: u64 = 0x01;
/// The node serves more than one chain.
pub const NODE_PROP_MULTICHAIN: u64 = 0x02;
/// The node keeps archive state.
pub const NODE_PROP_ARCHIVE: u64 = 0x04;
pub const NODE_PROP_HTTP: u64 = 0x08;
pub const NODE_PROP_BINARY: u64 = 0x10;
pub const NODE_PROP_ONION: u64 = 0x20;
/// The node signs block hashes for federated verification.
pub const NODE_PROP_SIGNER: u64 = 0x40;
pub const NODE_PROP_DATA: u64 = 0x80;

/// Seconds over which a node's weight recovers after its blacklisting ended.
pub const BLACKLIST_RECOVERY: u64 = 7 * 24 * 3600;

/// A registered node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeRecord {
    pub url: String,
    /// Signer address registered for this node.
    #[serde(with = "serde_hex::fixed")]
    pub address: [u8; 20],
    #[serde(with = "serde_hex::quantity")]
    pub deposit: u64,
    /// Parallel requests the node claims to handle.
    pub capacity: u32,
    #[serde(with = "serde_hex::quantity")]
    pub props: u64,
}

impl NodeRecord {
    pub fn new(url: impl Into<String>, address: [u8; 20]) -> Self {
        Self {
            url: url.into(),
            address,
            props: NODE_PROP_PROOF,
            ..Self::default()
        }
    }

    pub fn has_props(&self, props: u64) -> bool {
        self.props & props == props
    }
}

/// Response statistics of one node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeWeight {
    pub response_count: u32,
    /// Sum of all response latencies in milliseconds.
    pub total_response_time: u64,
    /// Unix seconds until which the node is not asked.
    pub blacklisted_until: u64,
}

impl NodeWeight {
    pub fn record_response(&mut self, latency_ms: u64) {
        self.response_count = self.response_count.saturating_add(1);
        self.total_response_time = self.total_response_time.saturating_add(latency_ms);
    }

    /// Never shortens a running blacklisting.
    pub fn blacklist(&mut self, until: u64) {
        self.blacklisted_until = self.blacklisted_until.max(until);
    }

    pub fn is_blacklisted(&self, now: u64) -> bool {
        self.blacklisted_until > now
    }
}

/// Selection weight: fast nodes score high, recently blacklisted nodes low.
///
/// The average latency only counts after more than four responses; until
/// then it is estimated from the capacity.
pub fn calculate_weight(weight: &NodeWeight, capacity: u32, now: u64) -> u64 {
    let avg = if weight.response_count > 4 && weight.total_response_time > 0 {
        weight.total_response_time / u64::from(weight.response_count)
    } else {
        10_000 / (u64::from(capacity.max(100)) + 100)
    }
    .max(1);
    let since = now.saturating_sub(weight.blacklisted_until);
    let factor = if weight.blacklisted_until > 0 && since < BLACKLIST_RECOVERY {
        since * 100 / BLACKLIST_RECOVERY
    } else {
        100
    };
    (0xFFFF / avg) * factor / 100
}

/// Which nodes may be asked.
#[derive(Clone, Copy, Debug, Default)]
pub struct NodeFilter<'a> {
    pub min_deposit: u64,
    pub props: u64,
    pub exclude: &'a [String],
}

/// The nodes of one chain with their weights, index-aligned.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeList {
    pub nodes: Vec<NodeRecord>,
    pub weights: Vec<NodeWeight>,
    /// Signer address -> urls of the nodes that reported its signature missing.
    #[serde(skip)]
    offline_reports: HashMap<[u8; 20], HashSet<String>>,
}

impl NodeList {
    pub fn new(nodes: Vec<NodeRecord>) -> Self {
        let weights = vec![NodeWeight::default(); nodes.len()];
        Self {
            nodes,
            weights,
            offline_reports: HashMap::new(),
        }
    }

    pub fn storage_key(chain_id: u64) -> String {
        format!("nodelist_{}", chain_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn index_of(&self, url: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.url == url)
    }

    pub fn weight(&self, index: usize) -> Option<&NodeWeight> {
        self.weights.get(index)
    }

    /// Indices of the nodes passing the filter.
    ///
    /// When nothing passes and more than half the nodes are blacklisted,
    /// the blacklist is ignored for this selection.
    pub fn candidates(&self, filter: &NodeFilter<'_>, now: u64) -> Vec<usize> {
        let found = self.filter(filter, now, false);
        if !found.is_empty() {
            return found;
        }
        let blacklisted = self.weights.iter().filter(|w| w.is_blacklisted(now)).count();
        if blacklisted * 2 > self.len() {
            warn!(blacklisted, nodes = self.len(), "all candidates blacklisted, ignoring blacklist");
            return self.filter(filter, now, true);
        }
        found
    }

    fn filter(&self, filter: &NodeFilter<'_>, now: u64, ignore_blacklist: bool) -> Vec<usize> {
        self.nodes
            .iter()
            .zip(&self.weights)
            .enumerate()
            .filter(|(_, (node, weight))| {
                (ignore_blacklist || !weight.is_blacklisted(now))
                    && node.deposit >= filter.min_deposit
                    && node.has_props(filter.props)
                    && !filter.exclude.contains(&node.url)
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Weighted random choice of up to `count` distinct candidates.
    pub fn select<R: Rng>(&self, rng: &mut R, count: usize, filter: &NodeFilter<'_>, now: u64) -> Vec<usize> {
        let mut pool: Vec<(usize, u64)> = self
            .candidates(filter, now)
            .into_iter()
            .map(|i| (i, calculate_weight(&self.weights[i], self.nodes[i].capacity, now).max(1)))
            .collect();

        let mut selected = Vec::with_capacity(count.min(pool.len()));
        while selected.len() < count && !pool.is_empty() {
            let total: u64 = pool.iter().map(|(_, w)| w).sum();
            let mut ticket = rng.gen_range(0..total);
            let pos = pool
                .iter()
                .position(|(_, w)| {
                    if ticket < *w {
                        true
                    } else {
                        ticket -= w;
                        false
                    }
                })
                .unwrap_or(pool.len() - 1);
            selected.push(pool.swap_remove(pos).0);
        }
        selected
    }

    pub fn record_response(&mut self, index: usize, latency_ms: u64) {
        if let Some(weight) = self.weights.get_mut(index) {
            weight.record_response(latency_ms);
        }
    }

    pub fn blacklist(&mut self, index: usize, until: u64) {
        if let Some(weight) = self.weights.get_mut(index) {
            weight.blacklist(until);
            warn!(url = %self.nodes[index].url, until = weight.blacklisted_until, "blacklisting node");
        }
    }

    /// Record that `reporter` could not deliver the signatures of `signers`.
    /// A signer reported by two different nodes is considered offline and
    /// blacklisted. Returns the indices of newly blacklisted nodes.
    pub fn report_missing_signers(&mut self, reporter: &str, signers: &[[u8; 20]], until: u64) -> Vec<usize> {
        let mut offline = Vec::new();
        for signer in signers {
            let reporters = self.offline_reports.entry(*signer).or_default();
            reporters.insert(reporter.to_string());
            debug!(signer = %hex::encode(signer), reports = reporters.len(), "signature missing");
            if reporters.len() < 2 {
                continue;
            }
            self.offline_reports.remove(signer);
            if let Some(index) = self.nodes.iter().position(|n| n.address == *signer) {
                self.blacklist(index, until);
                offline.push(index);
            }
        }
        offline
    }

    /// Take over the weights of a persisted list for nodes that still exist.
    pub fn restore_weights(&mut self, saved: &NodeList) {
        for (node, weight) in saved.nodes.iter().zip(&saved.weights) {
            if let Some(index) = self.index_of(&node.url) {
                self.weights[index] = weight.clone();
            }
        }
    }
}
