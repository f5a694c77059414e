//! Bitcoin verification: proof of work, BIP34 block numbers, finality
//! headers, verified DAP targets and transaction merkle proofs.

pub mod header;
pub mod merkle;
pub mod serialize;
pub mod target;
pub mod tx;

use crate::bytes::{self, reversed};
use crate::error::{VerifyError, VerifyResult};
use crate::json;
use crate::types::{BtcConfig, BtcProof, RpcRequest};
use crate::verifier::{VerificationContext, Verdict};
use alloy_primitives::U256;
use serde_json::Value;
use serialize::{BlockHeader, HEADER_SIZE};
use target::{dap, target_from_bits, TargetCache};
use tracing::debug;
use tx::Transaction;

/// Verifies bitcoin RPC responses against their `in3.proof`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BtcVerifier {
    pub chain_id: u64,
    pub config: BtcConfig,
}

/// Outcome of the header checks shared by every method.
struct ProvenHeader {
    hash: [u8; 32],
}

impl BtcVerifier {
    pub fn new(chain_id: u64, config: BtcConfig) -> Self {
        Self { chain_id, config }
    }

    pub fn verify(&self, ctx: &VerificationContext<'_>, targets: &mut TargetCache) -> VerifyResult<Verdict> {
        // a null result is a valid error response
        if ctx.result.is_null() {
            return Ok(Verdict::Verified);
        }
        match ctx.method() {
            "getblock" => self.verify_block(ctx, targets, true),
            "getblockheader" => self.verify_block(ctx, targets, false),
            "getrawtransaction" => self.verify_transaction(ctx, targets),
            "btc_proofTarget" => self.verify_target_proof(ctx, targets),
            other => Err(VerifyError::unsupported(format!(
                "method {} can not be verified on bitcoin",
                other
            ))),
        }
    }

    /// PoW, BIP34 number, finality and target of a proven header. `None`
    /// when the target still needs a `btc_proofTarget` sub-request.
    fn prove_header(
        &self,
        header: &BlockHeader<'_>,
        proof: &BtcProof,
        finality: usize,
        targets: &mut TargetCache,
    ) -> VerifyResult<Result<ProvenHeader, RpcRequest>> {
        let (hash, block_target) = header::verify_pow(header, None)?;
        let number = header::block_number(header, proof)?;
        let final_headers = proof.final_headers.as_deref().unwrap_or_default();
        header::check_finality(&hash, number, finality, final_headers, block_target)?;

        match self.check_target(targets, number, block_target, header.bits(), final_headers)? {
            Some(request) => Ok(Err(request)),
            None => Ok(Ok(ProvenHeader { hash })),
        }
    }

    /// Compare the header's target with the closest verified DAP target.
    fn check_target(
        &self,
        targets: &mut TargetCache,
        block_number: u64,
        block_target: U256,
        bits: u32,
        final_headers: &[u8],
    ) -> VerifyResult<Option<RpcRequest>> {
        let current = dap(block_number);
        let (found, found_bits) = targets
            .closest(current)
            .ok_or_else(|| VerifyError::invalid("could not find any verified target!"))?;
        let verified = target_from_bits(found_bits);

        if found == current {
            return if verified == block_target {
                Ok(None)
            } else {
                Err(VerifyError::invalid(
                    "header target does not match the verified target",
                ))
            };
        }

        if found.abs_diff(current) <= self.config.max_daps
            && target::check_new_target(verified, block_target).is_ok()
        {
            targets.insert(current, bits);
            let headers = (final_headers.len() / HEADER_SIZE) as u64;
            if headers > 0 && dap(block_number + headers) == current + 1 {
                let last = BlockHeader::parse(&final_headers[final_headers.len() - HEADER_SIZE..])?;
                targets.insert(current + 1, last.bits());
            }
            return Ok(None);
        }

        debug!(current, found, "target not provable locally, requesting btc_proofTarget");
        Ok(Some(RpcRequest::new(
            "btc_proofTarget",
            vec![
                Value::from(current),
                Value::from(found),
                Value::from(self.config.max_diff),
                Value::from(self.config.max_daps),
                Value::from(self.config.dap_limit),
            ],
        )))
    }

    fn verify_block(
        &self,
        ctx: &VerificationContext<'_>,
        targets: &mut TargetCache,
        full_block: bool,
    ) -> VerifyResult<Verdict> {
        let requested = json::param_hash(ctx.params(), 0)
            .map_err(|_| VerifyError::invalid("Invalid blockhash"))?;
        let verbose = ctx.params().get(1).map(verbosity).unwrap_or(1);
        let proof: BtcProof = ctx.proof()?;

        let raw_block = if verbose > 0 {
            None
        } else {
            Some(bytes::parse_hex(
                ctx.result.as_str().ok_or_else(|| VerifyError::invalid("expected a hex result"))?,
            )?)
        };
        let header_bytes = match &raw_block {
            Some(raw) => BlockHeader::parse(raw)?.raw().to_vec(),
            None => serialize::header_from_json(ctx.result)?.to_vec(),
        };
        let header = BlockHeader::parse(&header_bytes)?;

        let proven = match self.prove_header(&header, &proof, ctx.finality as usize, targets)? {
            Ok(proven) => proven,
            Err(request) => return Ok(Verdict::NeedsRequest(request)),
        };
        if proven.hash != requested {
            return Err(VerifyError::invalid("Invalid blockhash"));
        }

        if full_block {
            match &raw_block {
                Some(raw) => {
                    let txids: Vec<[u8; 32]> = tx::block_transactions(raw)?.iter().map(Transaction::txid).collect();
                    check_merkle_root(&header, &txids)?;
                }
                None => self.check_block_json(ctx.result, &header, &proven, verbose)?,
            }
        }

        if verbose > 0 {
            if let Some(next) = proof.final_headers.as_deref().filter(|f| f.len() >= HEADER_SIZE) {
                let next_hash = BlockHeader::parse(next)?.hash();
                if !hex_eq(json::opt_str(ctx.result, "nextblockhash"), &next_hash) {
                    return Err(VerifyError::invalid("Invalid nextblockhash"));
                }
            }
            if json::opt_u64(ctx.result, "version") != Some(u64::from(header.version())) {
                return Err(VerifyError::invalid("Invalid version"));
            }
        }
        Ok(Verdict::Verified)
    }

    fn check_block_json(
        &self,
        result: &Value,
        header: &BlockHeader<'_>,
        proven: &ProvenHeader,
        verbose: u64,
    ) -> VerifyResult<()> {
        let txs = result
            .get("tx")
            .and_then(Value::as_array)
            .ok_or_else(|| VerifyError::invalid("missing tx in result"))?;
        let txids = txs
            .iter()
            .map(|tx| {
                let id = if verbose == 1 { tx.as_str() } else { json::opt_str(tx, "txid") };
                id.ok_or_else(|| VerifyError::invalid("invalid transaction id"))
                    .and_then(|id| Ok(bytes::hex_to_bytes32(id)?))
            })
            .collect::<VerifyResult<Vec<_>>>()?;
        check_merkle_root(header, &txids)?;

        let difficulty = target::difficulty(target_from_bits(header.bits()));
        if !difficulty_matches(difficulty, result.get("difficulty")) {
            return Err(VerifyError::invalid("Wrong difficulty"));
        }
        if json::hash_field(result, "hash")? != proven.hash {
            return Err(VerifyError::invalid("Wrong blockhash in json"));
        }
        if json::opt_u64(result, "nTx") != Some(txids.len() as u64) {
            return Err(VerifyError::invalid("Wrong nTx"));
        }
        Ok(())
    }

    fn verify_transaction(&self, ctx: &VerificationContext<'_>, targets: &mut TargetCache) -> VerifyResult<Verdict> {
        let txid = json::param_hash(ctx.params(), 0).map_err(|_| VerifyError::invalid("Invalid tx_id"))?;
        let as_json = match ctx.params().get(1) {
            Some(v) => verbosity(v) > 0,
            None => ctx.result.is_object(),
        };
        let block_hash = match ctx.params().get(2) {
            Some(Value::String(s)) => Some(bytes::hex_to_bytes32(s)?),
            _ => None,
        };
        let proof: BtcProof = ctx.proof()?;

        let raw = if as_json {
            json::bytes_field(ctx.result, "hex")?
        } else {
            bytes::parse_hex(
                ctx.result.as_str().ok_or_else(|| VerifyError::invalid("expected a hex result"))?,
            )?
        };
        let tx = Transaction::parse(&raw)?;
        if tx.txid() != txid {
            return Err(VerifyError::invalid("invalid txid"));
        }

        let header_bytes = proof
            .block
            .as_deref()
            .ok_or_else(|| VerifyError::missing("missing the blockheader"))?;
        let header = BlockHeader::parse(header_bytes)?;
        let tx_index = proof
            .tx_index
            .ok_or_else(|| VerifyError::missing("missing txIndex"))?;
        let merkle_proof = proof
            .merkle_proof
            .as_deref()
            .ok_or_else(|| VerifyError::missing("missing merkleProof"))?;
        if !merkle::verify_proof(&header.merkle_root(), merkle_proof, tx_index, &reversed(&txid)) {
            return Err(VerifyError::invalid("merkleProof failed!"));
        }

        let proven = match self.prove_header(&header, &proof, ctx.finality as usize, targets)? {
            Ok(proven) => proven,
            Err(request) => return Ok(Verdict::NeedsRequest(request)),
        };
        if block_hash.is_some_and(|h| h != proven.hash) {
            return Err(VerifyError::invalid("invalid hash of blockheader!"));
        }

        if as_json {
            check_tx_json(ctx.result, &tx, &header, &proven, tx_index)?;
        }
        Ok(Verdict::Verified)
    }

    /// A `btc_proofTarget` result: headers of intermediate DAPs, each proven
    /// like a block and recorded in the target cache.
    fn verify_target_proof(&self, ctx: &VerificationContext<'_>, targets: &mut TargetCache) -> VerifyResult<Verdict> {
        let params = ctx.params();
        if params.len() != 5 {
            return Err(VerifyError::invalid("must have 5 params!"));
        }
        if json::as_u64(&params[2]) != Some(self.config.max_diff) {
            return Err(VerifyError::invalid("invalid max_diff"));
        }
        if json::as_u64(&params[3]) != Some(self.config.max_daps) {
            return Err(VerifyError::invalid("invalid max_daps"));
        }

        let entries = ctx
            .result
            .as_array()
            .ok_or_else(|| VerifyError::invalid("invalid type for proof"))?;
        for entry in entries {
            let proof: BtcProof = serde_json::from_value(entry.clone())
                .map_err(|e| VerifyError::invalid(format!("invalid type for proof: {}", e)))?;
            let raw = proof
                .block
                .as_deref()
                .filter(|b| b.len() == HEADER_SIZE)
                .ok_or_else(|| VerifyError::invalid("invalid header"))?;
            let header = BlockHeader::parse(raw)?;
            if self.prove_header(&header, &proof, ctx.finality as usize, targets)?.is_err() {
                return Err(VerifyError::invalid(
                    "target proof does not connect to a verified target",
                ));
            }
        }
        Ok(Verdict::Verified)
    }
}

/// `verbose`/`verbosity` parameters arrive as numbers or booleans.
fn verbosity(value: &Value) -> u64 {
    match value {
        Value::Bool(b) => u64::from(*b),
        other => json::as_u64(other).unwrap_or(0),
    }
}

fn check_merkle_root(header: &BlockHeader<'_>, txids: &[[u8; 32]]) -> VerifyResult<()> {
    if merkle::root_from_txids(txids) != reversed(&header.merkle_root()) {
        return Err(VerifyError::invalid("Invalid Merkle root"));
    }
    Ok(())
}

fn hex_eq(value: Option<&str>, expected: &[u8]) -> bool {
    value
        .and_then(|s| bytes::parse_hex(s).ok())
        .is_some_and(|v| v == expected)
}

fn check_tx_json(
    result: &Value,
    tx: &Transaction<'_>,
    header: &BlockHeader<'_>,
    proven: &ProvenHeader,
    tx_index: u64,
) -> VerifyResult<()> {
    let invalid = |field: &str| VerifyError::invalid(format!("invalid {} in transaction", field));

    if !hex_eq(json::opt_str(result, "txid"), &tx.txid()) {
        return Err(invalid("txid"));
    }
    if !hex_eq(json::opt_str(result, "hash"), &tx.hash()) {
        return Err(invalid("hash"));
    }
    if let Some(block_hash) = json::opt_str(result, "blockhash") {
        if !hex_eq(Some(block_hash), &proven.hash) {
            return Err(invalid("blockhash"));
        }
    }
    let numbers = [
        ("version", u64::from(tx.version)),
        ("size", tx.size() as u64),
        ("vsize", tx.vsize() as u64),
        ("weight", tx.weight() as u64),
        ("locktime", u64::from(tx.lock_time)),
    ];
    for (field, expected) in numbers {
        if let Some(value) = result.get(field) {
            if json::as_u64(value) != Some(expected) {
                return Err(invalid(field));
            }
        }
    }
    for field in ["time", "blocktime"] {
        if let Some(value) = result.get(field) {
            if json::as_u64(value) != Some(u64::from(header.time())) {
                return Err(invalid(field));
            }
        }
    }

    let vin = result
        .get("vin")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("vin"))?;
    if vin.len() != tx.inputs.len() {
        return Err(invalid("vin"));
    }
    for (i, (input, json_in)) in tx.inputs.iter().zip(vin).enumerate() {
        if tx_index == 0 && i == 0 {
            if !hex_eq(json::opt_str(json_in, "coinbase"), input.script) {
                return Err(invalid("coinbase"));
            }
        } else {
            let script_sig = json_in.get("scriptSig").and_then(|s| json::opt_str(s, "hex"));
            if !hex_eq(json::opt_str(json_in, "txid"), &reversed(&input.prev_tx))
                || json::opt_u64(json_in, "vout") != Some(u64::from(input.prev_index))
                || !hex_eq(script_sig, input.script)
            {
                return Err(invalid("vin"));
            }
        }
        if json::opt_u64(json_in, "sequence") != Some(u64::from(input.sequence)) {
            return Err(invalid("sequence"));
        }
    }

    let vout = result
        .get("vout")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("vout"))?;
    if vout.len() != tx.outputs.len() {
        return Err(invalid("vout"));
    }
    for (i, (output, json_out)) in tx.outputs.iter().zip(vout).enumerate() {
        let script = json_out.get("scriptPubKey").and_then(|s| json::opt_str(s, "hex"));
        let satoshi = json_out
            .get("value")
            .and_then(Value::as_f64)
            .map(|btc| (btc * 100_000_000.0).round() as u64);
        if json::opt_u64(json_out, "n") != Some(i as u64)
            || !hex_eq(script, output.script)
            || satoshi != Some(output.value)
        {
            return Err(invalid("vout"));
        }
    }
    Ok(())
}

/// bitcoind reports the difficulty as a float. Only the integer part is
/// compared, and its lowest two bits are ignored.
fn difficulty_matches(computed: u64, claimed: Option<&Value>) -> bool {
    match claimed.and_then(Value::as_f64) {
        Some(claimed) if claimed >= 0.0 => computed >> 2 == (claimed as u64) >> 2,
        _ => false,
    }
}
