pub mod graph;
pub mod issuer;
pub mod service;
pub mod setup;
pub mod store;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStatus {
    Created,
    /// Invoice issued but the on-chain swap request failed.
    OnchainFailed,
    Claimed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapRecord {
    pub swap_id: String,

    pub currency: String,
    pub capacity: u64,
    pub buyer_pubkey: String,

    pub bolt11_invoice: String,
    pub payment_hash: String,
    pub seller_p2sh_address: Option<String>,

    pub onchain_swap_address: Option<String>,
    pub redeem_script_hex: Option<String>,
    pub timeout_block_height: Option<u32>,

    pub claim_txid: Option<String>,

    pub status: SwapStatus,
}
