use anyhow::{Context as _, Result};
use clap::{Parser as _, Subcommand};
use ln_onchain_swap::proto::v1::settlement_service_client::SettlementServiceClient;
use ln_onchain_swap::proto::v1::{
    BuildClaimRequest, FundingOutput, GetSwapRequest, MatchOutputsRequest, SetupInvoiceRequest,
    SwapStatus,
};
use serde_json::json;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:50051")]
    grpc_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    SetupInvoice {
        #[arg(long, default_value = "BTC")]
        currency: String,

        #[arg(long)]
        capacity: u64,

        /// Buyer public key (hex).
        #[arg(long)]
        pubkey: String,
    },
    BuildClaim {
        #[arg(long)]
        current_block_height: u32,

        #[arg(long)]
        destination: String,

        #[arg(long, default_value_t = 1)]
        fee_tokens_per_vbyte: u64,

        #[arg(long)]
        redeem_script: String,

        #[arg(long)]
        preimage: String,

        /// WIF.
        #[arg(long)]
        private_key: String,

        /// `<txid>:<vout>:<tokens>`, repeatable.
        #[arg(long = "utxo", value_parser = parse_utxo, required = true)]
        utxos: Vec<FundingOutput>,

        #[arg(long, default_value = "")]
        swap_id: String,
    },
    MatchOutputs {
        #[arg(long)]
        redeem_script: String,

        #[arg(long)]
        transaction: String,
    },
    GetSwap {
        #[arg(long)]
        swap_id: String,
    },
}

fn parse_utxo(s: &str) -> Result<FundingOutput> {
    let mut parts = s.split(':');
    let (Some(txid), Some(vout), Some(tokens), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        anyhow::bail!("expected <txid>:<vout>:<tokens>, got {s}");
    };

    Ok(FundingOutput {
        transaction_id: txid.to_string(),
        vout: vout.parse().context("parse vout")?,
        tokens: tokens.parse().context("parse tokens")?,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    ln_onchain_swap::logging::init().ok();
    let args = Args::parse();

    let mut client = SettlementServiceClient::connect(args.grpc_url)
        .await
        .context("connect gRPC")?;

    let out = match args.command {
        Command::SetupInvoice {
            currency,
            capacity,
            pubkey,
        } => {
            let resp = client
                .setup_invoice(SetupInvoiceRequest {
                    currency,
                    capacity,
                    pubkey,
                })
                .await
                .context("SetupInvoice")?
                .into_inner();

            json!({
              "swap_id": resp.swap_id,
              "invoice": resp.invoice,
              "payment_hash": resp.payment_hash,
              "seller_p2sh_address": resp.seller_p2sh_address,
              "onchain_swap_address": resp.onchain_swap_address,
              "onchain_error": (!resp.onchain_error.is_empty()).then_some(resp.onchain_error),
            })
        }
        Command::BuildClaim {
            current_block_height,
            destination,
            fee_tokens_per_vbyte,
            redeem_script,
            preimage,
            private_key,
            utxos,
            swap_id,
        } => {
            let resp = client
                .build_claim(BuildClaimRequest {
                    current_block_height,
                    destination,
                    fee_tokens_per_vbyte,
                    redeem_script,
                    preimage,
                    private_key,
                    utxos,
                    swap_id,
                })
                .await
                .context("BuildClaim")?
                .into_inner();

            json!({
              "transaction": resp.transaction,
              "transaction_id": resp.transaction_id,
              "fee_tokens": resp.fee_tokens,
            })
        }
        Command::MatchOutputs {
            redeem_script,
            transaction,
        } => {
            let resp = client
                .match_outputs(MatchOutputsRequest {
                    redeem_script,
                    transaction,
                })
                .await
                .context("MatchOutputs")?
                .into_inner();

            json!({
              "matching_outputs": resp.matching_outputs.into_iter().map(|m| json!({
                "script": m.script,
                "tokens": m.tokens,
                "transaction_id": m.transaction_id,
                "vout": m.vout,
              })).collect::<Vec<_>>(),
            })
        }
        Command::GetSwap { swap_id } => {
            let swap = client
                .get_swap(GetSwapRequest { swap_id })
                .await
                .context("GetSwap")?
                .into_inner();

            let status_str = SwapStatus::try_from(swap.status)
                .ok()
                .map(|s| format!("{s:?}"))
                .unwrap_or_else(|| format!("UNKNOWN({})", swap.status));

            json!({
              "swap_id": swap.swap_id,
              "status": status_str,
              "currency": swap.currency,
              "capacity": swap.capacity,
              "buyer_pubkey": swap.buyer_pubkey,
              "bolt11_invoice": swap.bolt11_invoice,
              "payment_hash": swap.payment_hash,
              "seller_p2sh_address": swap.seller_p2sh_address,
              "onchain_swap_address": swap.onchain_swap_address,
              "redeem_script": swap.redeem_script,
              "claim_txid": swap.claim_txid,
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
