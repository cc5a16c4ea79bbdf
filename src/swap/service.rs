use std::str::FromStr as _;
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Network, NetworkKind, PrivateKey, Script, ScriptBuf, Txid};
use tonic::{Request, Response, Status};
use uuid::Uuid;

use super::setup::{InvoiceSetup, SetupRequest};
use super::store::SqliteStore;
use super::{SwapRecord, SwapStatus};
use crate::error::ErrorClass;
use crate::onchain::claim::{ClaimParams, FundingOutput, build_claim};
use crate::onchain::matcher::match_outputs_hex;
use crate::proto::v1 as pb;

#[derive(Clone)]
pub struct SettlementServiceImpl {
    setup: InvoiceSetup,
    store: Arc<Mutex<SqliteStore>>,
}

impl SettlementServiceImpl {
    pub fn new(setup: InvoiceSetup, store: Arc<Mutex<SqliteStore>>) -> Self {
        Self { setup, store }
    }

    fn network(&self) -> Network {
        self.setup.config().network
    }

    fn load_swap(&self, swap_id: &str) -> Result<SwapRecord, Status> {
        self.store
            .lock()
            .expect("store mutex poisoned")
            .get_swap(swap_id)
            .map_err(|e| ErrorClass::Internal.to_status(format!("get swap: {e:#}")))?
            .ok_or_else(|| ErrorClass::NotFound.to_status(format!("swap not found: {swap_id}")))
    }

    fn record_to_proto(record: &SwapRecord) -> pb::Swap {
        let status = match record.status {
            SwapStatus::Created => pb::SwapStatus::Created,
            SwapStatus::OnchainFailed => pb::SwapStatus::OnchainFailed,
            SwapStatus::Claimed => pb::SwapStatus::Claimed,
        };

        pb::Swap {
            swap_id: record.swap_id.clone(),
            currency: record.currency.clone(),
            capacity: record.capacity,
            buyer_pubkey: record.buyer_pubkey.clone(),
            bolt11_invoice: record.bolt11_invoice.clone(),
            payment_hash: record.payment_hash.clone(),
            seller_p2sh_address: record.seller_p2sh_address.clone().unwrap_or_default(),
            onchain_swap_address: record.onchain_swap_address.clone().unwrap_or_default(),
            redeem_script: record.redeem_script_hex.clone().unwrap_or_default(),
            status: status as i32,
            claim_txid: record.claim_txid.clone().unwrap_or_default(),
        }
    }
}

/// A claim may only settle a swap that is still `created` and whose stored
/// redeem script is the one being spent.
pub fn check_claimable(record: &SwapRecord, redeem_script: &Script) -> Result<()> {
    anyhow::ensure!(
        record.status == SwapStatus::Created,
        "swap {} is {:?}, not claimable",
        record.swap_id,
        record.status
    );

    let stored = record
        .redeem_script_hex
        .as_deref()
        .with_context(|| format!("swap {} has no redeem script", record.swap_id))?;
    let stored = hex::decode(stored).context("decode stored redeem_script")?;
    anyhow::ensure!(
        stored == redeem_script.as_bytes(),
        "redeem_script does not belong to swap {}",
        record.swap_id
    );
    Ok(())
}

pub fn claim_params_from_proto(
    req: &pb::BuildClaimRequest,
    network: Network,
) -> Result<ClaimParams> {
    let destination = Address::<NetworkUnchecked>::from_str(req.destination.trim())
        .context("parse destination")?
        .require_network(network)
        .context("destination network")?;

    let redeem_script = hex::decode(req.redeem_script.trim()).context("decode redeem_script")?;
    let redeem_script = ScriptBuf::from_bytes(redeem_script);
    anyhow::ensure!(!redeem_script.is_empty(), "redeem_script is required");

    let preimage = hex::decode(req.preimage.trim()).context("decode preimage")?;
    anyhow::ensure!(!preimage.is_empty(), "preimage is required");

    let private_key = PrivateKey::from_wif(req.private_key.trim()).context("parse private_key")?;
    anyhow::ensure!(
        private_key.network == NetworkKind::from(network),
        "private_key is not a {network} key"
    );

    let funding_outputs = req
        .utxos
        .iter()
        .map(|utxo| {
            Ok(FundingOutput {
                tokens: utxo.tokens,
                transaction_id: Txid::from_str(utxo.transaction_id.trim())
                    .with_context(|| format!("parse transaction_id {}", utxo.transaction_id))?,
                vout: utxo.vout,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ClaimParams {
        current_block_height: req.current_block_height,
        destination,
        fee_tokens_per_vbyte: req.fee_tokens_per_vbyte,
        redeem_script,
        preimage,
        private_key,
        funding_outputs,
    })
}

#[tonic::async_trait]
impl pb::settlement_service_server::SettlementService for SettlementServiceImpl {
    async fn setup_invoice(
        &self,
        request: Request<pb::SetupInvoiceRequest>,
    ) -> Result<Response<pb::SetupInvoiceResponse>, Status> {
        let req = request.into_inner();
        let setup_req = SetupRequest {
            currency: req.currency,
            capacity: req.capacity,
            buyer_pubkey: req.pubkey,
        };

        let outcome = self
            .setup
            .setup_invoice(setup_req.clone())
            .await
            .map_err(|e| e.class().to_status(e))?;

        let swap_id = Uuid::new_v4().to_string();
        let onchain = outcome.onchain_swap.as_ref();
        let record = SwapRecord {
            swap_id: swap_id.clone(),
            currency: setup_req.currency,
            capacity: setup_req.capacity,
            buyer_pubkey: setup_req.buyer_pubkey,
            bolt11_invoice: outcome.result.invoice.clone(),
            payment_hash: outcome.result.payment_hash.clone(),
            seller_p2sh_address: outcome.result.seller_p2sh_address.clone(),
            onchain_swap_address: onchain.map(|s| s.swap_address.clone()),
            redeem_script_hex: onchain.map(|s| s.redeem_script_hex.clone()),
            timeout_block_height: onchain.map(|s| s.timeout_block_height),
            claim_txid: None,
            status: if outcome.onchain_failure.is_some() {
                SwapStatus::OnchainFailed
            } else {
                SwapStatus::Created
            },
        };

        self.store
            .lock()
            .expect("store mutex poisoned")
            .insert_swap(&record)
            .map_err(|e| ErrorClass::Internal.to_status(format!("persist swap: {e:#}")))?;

        tracing::info!(
            %swap_id,
            payment_hash = %record.payment_hash,
            status = ?record.status,
            "swap invoice set up"
        );

        Ok(Response::new(pb::SetupInvoiceResponse {
            swap_id,
            invoice: outcome.result.invoice,
            payment_hash: outcome.result.payment_hash,
            seller_p2sh_address: outcome.result.seller_p2sh_address.unwrap_or_default(),
            onchain_swap_address: record.onchain_swap_address.unwrap_or_default(),
            onchain_error: outcome
                .onchain_failure
                .map(|e| format!("[{}] {e}", e.class()))
                .unwrap_or_default(),
        }))
    }

    async fn build_claim(
        &self,
        request: Request<pb::BuildClaimRequest>,
    ) -> Result<Response<pb::BuildClaimResponse>, Status> {
        let req = request.into_inner();

        let params = claim_params_from_proto(&req, self.network())
            .map_err(|e| ErrorClass::InputValidation.to_status(format!("{e:#}")))?;
        let swap_id = req.swap_id.trim();
        if !swap_id.is_empty() {
            let record = self.load_swap(swap_id)?;
            check_claimable(&record, &params.redeem_script)
                .map_err(|e| ErrorClass::InputValidation.to_status(format!("{e:#}")))?;
        }

        let claim = build_claim(&params).map_err(|e| e.class().to_status(e))?;
        let txid = claim.txid().to_string();

        if !swap_id.is_empty() {
            // A concurrent claim of the same swap loses here.
            self.store
                .lock()
                .expect("store mutex poisoned")
                .mark_claimed(swap_id, &txid)
                .map_err(|e| {
                    ErrorClass::InputValidation.to_status(format!("mark swap claimed: {e:#}"))
                })?;
        }

        tracing::info!(
            claim_txid = %txid,
            fee_tokens = claim.fee_tokens,
            "claim transaction signed"
        );

        Ok(Response::new(pb::BuildClaimResponse {
            transaction: claim.to_hex(),
            transaction_id: txid,
            fee_tokens: claim.fee_tokens,
        }))
    }

    async fn match_outputs(
        &self,
        request: Request<pb::MatchOutputsRequest>,
    ) -> Result<Response<pb::MatchOutputsResponse>, Status> {
        let req = request.into_inner();

        let matches = match_outputs_hex(&req.redeem_script, &req.transaction)
            .map_err(|e| e.class().to_status(e))?;

        Ok(Response::new(pb::MatchOutputsResponse {
            matching_outputs: matches
                .into_iter()
                .map(|m| pb::MatchingOutput {
                    script: hex::encode(m.script.as_bytes()),
                    tokens: m.tokens,
                    transaction_id: m.transaction_id.to_string(),
                    vout: m.vout,
                })
                .collect(),
        }))
    }

    async fn get_swap(
        &self,
        request: Request<pb::GetSwapRequest>,
    ) -> Result<Response<pb::Swap>, Status> {
        let req = request.into_inner();
        let swap_id = req.swap_id.trim();
        if swap_id.is_empty() {
            return Err(ErrorClass::InputValidation.to_status("swap_id is required"));
        }

        let record = self.load_swap(swap_id)?;

        Ok(Response::new(Self::record_to_proto(&record)))
    }
}
