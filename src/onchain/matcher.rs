use bitcoin::hashes::Hash as _;
use bitcoin::{Script, ScriptBuf, Transaction, Txid, WScriptHash};
use thiserror::Error;

use crate::error::ErrorClass;

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("expected redeem script, transaction")]
    MissingArguments,
    #[error("redeem script is not hex: {0}")]
    InvalidRedeemScript(hex::FromHexError),
    #[error("decode transaction: {0}")]
    InvalidTransaction(String),
}

impl MatchError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::InputValidation
    }
}

/// An output of a transaction paying to a redeem script's P2WSH commitment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WitnessMatch {
    pub script: ScriptBuf,
    pub tokens: u64,
    pub transaction_id: Txid,
    pub vout: u32,
}

/// `OP_0 <sha256(redeem_script)>`
pub fn witness_commitment(redeem_script: &Script) -> ScriptBuf {
    ScriptBuf::new_p2wsh(&WScriptHash::hash(redeem_script.as_bytes()))
}

/// Outputs of `tx` locked to `redeem_script`, in output order.
pub fn match_outputs(redeem_script: &Script, tx: &Transaction) -> Vec<WitnessMatch> {
    let commitment = witness_commitment(redeem_script);
    let txid = tx.compute_txid();

    tx.output
        .iter()
        .enumerate()
        .filter(|(_, out)| out.script_pubkey == commitment)
        .map(|(vout, out)| WitnessMatch {
            script: out.script_pubkey.clone(),
            tokens: out.value.to_sat(),
            transaction_id: txid,
            vout: vout as u32,
        })
        .collect()
}

pub fn match_outputs_hex(
    redeem_script_hex: &str,
    transaction_hex: &str,
) -> Result<Vec<WitnessMatch>, MatchError> {
    let redeem_script_hex = redeem_script_hex.trim();
    let transaction_hex = transaction_hex.trim();
    if redeem_script_hex.is_empty() || transaction_hex.is_empty() {
        return Err(MatchError::MissingArguments);
    }

    let redeem_script = hex::decode(redeem_script_hex).map_err(MatchError::InvalidRedeemScript)?;
    let redeem_script = ScriptBuf::from_bytes(redeem_script);
    let tx = decode_transaction(transaction_hex)?;

    Ok(match_outputs(&redeem_script, &tx))
}

pub fn decode_transaction(transaction_hex: &str) -> Result<Transaction, MatchError> {
    let bytes = hex::decode(transaction_hex)
        .map_err(|e| MatchError::InvalidTransaction(format!("not hex: {e}")))?;
    bitcoin::consensus::deserialize(&bytes)
        .map_err(|e| MatchError::InvalidTransaction(e.to_string()))
}
