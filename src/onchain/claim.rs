use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::hashes::Hash as _;
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, OutPoint, PrivateKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use thiserror::Error;

use super::matcher::witness_commitment;
use crate::error::ErrorClass;

pub const SHORT_PUSHDATA_LENGTH: u64 = 1;
pub const ECDSA_SIG_MAX_BYTE_LENGTH: u64 = 73;
pub const SEQUENCE_BYTE_LENGTH: u64 = 4;
pub const WITNESS_BYTE_DISCOUNT_DENOMINATOR: u64 = 4;

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("expected funding tx utxos")]
    NoFundingOutputs,
    #[error("funding of {total} tokens does not cover claim fee of {fee} tokens")]
    InsufficientFunds { total: u64, fee: u64 },
    #[error("funding amount or fee overflows")]
    AmountOverflow,
    #[error("block height {0} cannot be used as a locktime")]
    InvalidLockTime(u32),
    #[error("compute sighash for input {input}: {reason}")]
    Sighash { input: usize, reason: String },
    #[error("refund transactions are built by the counterparty, not by this service")]
    RefundPathUnsupported,
}

impl ClaimError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ClaimError::NoFundingOutputs | ClaimError::InvalidLockTime(_) => {
                ErrorClass::InputValidation
            }
            ClaimError::InsufficientFunds { .. } | ClaimError::AmountOverflow => {
                ErrorClass::InsufficientFunds
            }
            ClaimError::Sighash { .. } => ErrorClass::Internal,
            ClaimError::RefundPathUnsupported => ErrorClass::Unsupported,
        }
    }
}

/// An HTLC output paying to the P2WSH commitment of the claim's redeem script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingOutput {
    pub tokens: u64,
    pub transaction_id: Txid,
    pub vout: u32,
}

#[derive(Debug, Clone)]
pub struct ClaimParams {
    pub current_block_height: u32,
    pub destination: Address,
    pub fee_tokens_per_vbyte: u64,
    pub redeem_script: ScriptBuf,
    pub preimage: Vec<u8>,
    pub private_key: PrivateKey,
    pub funding_outputs: Vec<FundingOutput>,
}

#[derive(Debug, Clone)]
pub struct SignedClaim {
    pub transaction: Transaction,
    pub fee_tokens: u64,
    pub anticipated_weight: u64,
    /// Output script every funding output is assumed to carry.
    pub funding_script_pubkey: ScriptBuf,
}

impl SignedClaim {
    pub fn to_hex(&self) -> String {
        serialize_hex(&self.transaction)
    }

    pub fn txid(&self) -> Txid {
        self.transaction.compute_txid()
    }
}

/// Weight of the claim once every input carries `[signature, preimage, script]`,
/// estimated from the witness-less transaction so signing happens only once.
pub fn anticipated_weight(
    unsigned_weight: u64,
    inputs: usize,
    preimage_len: usize,
    script_len: usize,
) -> u64 {
    let per_input = SHORT_PUSHDATA_LENGTH
        + ECDSA_SIG_MAX_BYTE_LENGTH
        + SHORT_PUSHDATA_LENGTH
        + preimage_len as u64
        + SEQUENCE_BYTE_LENGTH
        + script_len as u64;

    unsigned_weight + per_input * inputs as u64
}

/// Fee in tokens for `weight` weight units; `None` on overflow.
pub fn fee_for_weight(fee_tokens_per_vbyte: u64, weight: u64) -> Option<u64> {
    fee_tokens_per_vbyte.checked_mul(weight.div_ceil(WITNESS_BYTE_DISCOUNT_DENOMINATOR))
}

/// Builds and signs a transaction sweeping every funding output to
/// `destination` through the preimage branch of the redeem script.
pub fn build_claim(params: &ClaimParams) -> Result<SignedClaim, ClaimError> {
    if params.funding_outputs.is_empty() {
        return Err(ClaimError::NoFundingOutputs);
    }

    let lock_time = LockTime::from_height(params.current_block_height)
        .map_err(|_| ClaimError::InvalidLockTime(params.current_block_height))?;

    let total = params
        .funding_outputs
        .iter()
        .try_fold(0u64, |sum, utxo| sum.checked_add(utxo.tokens))
        .ok_or(ClaimError::AmountOverflow)?;

    let input = params
        .funding_outputs
        .iter()
        .map(|utxo| TxIn {
            previous_output: OutPoint {
                txid: utxo.transaction_id,
                vout: utxo.vout,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_LOCKTIME_NO_RBF,
            witness: Witness::new(),
        })
        .collect();

    let mut tx = Transaction {
        version: Version::TWO,
        lock_time,
        input,
        output: vec![TxOut {
            value: Amount::from_sat(total),
            script_pubkey: params.destination.script_pubkey(),
        }],
    };

    let weight = anticipated_weight(
        tx.weight().to_wu(),
        tx.input.len(),
        params.preimage.len(),
        params.redeem_script.len(),
    );
    let fee_tokens = fee_for_weight(params.fee_tokens_per_vbyte, weight)
        .ok_or(ClaimError::AmountOverflow)?;
    if fee_tokens >= total {
        return Err(ClaimError::InsufficientFunds {
            total,
            fee: fee_tokens,
        });
    }
    tx.output[0].value = Amount::from_sat(total - fee_tokens);

    let witnesses = sign_inputs(&tx, params)?;
    for (txin, witness) in tx.input.iter_mut().zip(witnesses) {
        txin.witness = witness;
    }

    tracing::debug!(
        inputs = tx.input.len(),
        total_tokens = total,
        fee_tokens,
        anticipated_weight = weight,
        "built claim transaction"
    );

    Ok(SignedClaim {
        transaction: tx,
        fee_tokens,
        anticipated_weight: weight,
        funding_script_pubkey: witness_commitment(&params.redeem_script),
    })
}

/// Timeout spends are left to the seller's own tooling.
pub fn build_refund(_params: &ClaimParams) -> Result<SignedClaim, ClaimError> {
    Err(ClaimError::RefundPathUnsupported)
}

fn sign_inputs(tx: &Transaction, params: &ClaimParams) -> Result<Vec<Witness>, ClaimError> {
    let secp = Secp256k1::signing_only();
    let sighash_type = EcdsaSighashType::All;
    let script_bytes = params.redeem_script.to_bytes();
    let mut cache = SighashCache::new(tx);

    params
        .funding_outputs
        .iter()
        .enumerate()
        .map(|(index, utxo)| {
            let sighash = cache
                .p2wsh_signature_hash(
                    index,
                    &params.redeem_script,
                    Amount::from_sat(utxo.tokens),
                    sighash_type,
                )
                .map_err(|e| ClaimError::Sighash {
                    input: index,
                    reason: e.to_string(),
                })?;

            let msg = Message::from_digest(sighash.to_byte_array());
            let sig = secp.sign_ecdsa(&msg, &params.private_key.inner);
            let mut sig_bytes = sig.serialize_der().to_vec();
            sig_bytes.push(sighash_type.to_u32() as u8);

            Ok(Witness::from_slice(&[
                sig_bytes,
                params.preimage.clone(),
                script_bytes.clone(),
            ]))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anticipated_weight_adds_budget_per_input() {
        // 1 + 73 + 1 + 32 + 4 + 100
        assert_eq!(anticipated_weight(328, 1, 32, 100), 328 + 211);
        assert_eq!(anticipated_weight(328, 3, 32, 100), 328 + 3 * 211);
    }

    #[test]
    fn fee_rounds_virtual_bytes_up() {
        assert_eq!(fee_for_weight(2, 400), Some(200));
        assert_eq!(fee_for_weight(2, 401), Some(202));
        assert_eq!(fee_for_weight(0, 401), Some(0));
        assert_eq!(fee_for_weight(u64::MAX, 8), None);
    }
}
