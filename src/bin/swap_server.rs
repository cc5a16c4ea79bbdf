use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context as _, Result};
use bitcoin::Network;
use clap::Parser as _;
use ln_onchain_swap::lightning::ldk::LdkInvoiceDaemon;
use ln_onchain_swap::proto::v1::settlement_service_server::SettlementServiceServer;
use ln_onchain_swap::swap::issuer::GrpcSwapAddressIssuer;
use ln_onchain_swap::swap::service::SettlementServiceImpl;
use ln_onchain_swap::swap::setup::{InvoiceSetup, OnchainFailurePolicy, SetupConfig};
use ln_onchain_swap::swap::store::SqliteStore;
use tonic::transport::Server;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, default_value = "127.0.0.1:50051")]
    listen_addr: String,

    #[arg(long)]
    ldk_rest_addr: String,

    #[arg(long)]
    swap_issuer_url: String,

    #[arg(long)]
    store_path: PathBuf,

    #[arg(long, default_value = "testnet")]
    network: Network,

    #[arg(long, default_value = "tBTC")]
    onchain_currency: String,

    /// Swap premium in parts per million of the capacity.
    #[arg(long, default_value_t = 15_000)]
    swap_rate_ppm: u64,

    #[arg(long, default_value_t = 144)]
    timeout_block_count: u32,

    /// Without it every on-chain swap request fails; it is not derived yet.
    #[arg(long)]
    refund_address: Option<String>,

    #[arg(long, default_value_t = 3600)]
    invoice_expiry_secs: u32,

    #[arg(long, default_value_t = 30)]
    collaborator_timeout_secs: u64,

    #[arg(long, value_enum, default_value_t = OnchainFailurePolicy::Abort)]
    onchain_failure: OnchainFailurePolicy,
}

#[tokio::main]
async fn main() -> Result<()> {
    ln_onchain_swap::logging::init().ok();

    let args = Args::parse();
    let listen_addr: SocketAddr = args.listen_addr.parse().context("parse listen_addr")?;

    if args.refund_address.is_none() {
        tracing::warn!("no --refund-address given; on-chain swap creation will fail");
    }

    let cfg = SetupConfig {
        network: args.network,
        onchain_currency: args.onchain_currency,
        swap_rate_ppm: args.swap_rate_ppm,
        timeout_block_count: args.timeout_block_count,
        refund_address: args.refund_address,
        invoice_expiry_secs: args.invoice_expiry_secs,
        collaborator_timeout: Duration::from_secs(args.collaborator_timeout_secs),
        onchain_failure: args.onchain_failure,
    };

    let store = SqliteStore::open(args.store_path).context("open sqlite store")?;
    tracing::info!(store_path = %store.path().display(), "swap store ready");

    let daemon = LdkInvoiceDaemon::new(args.ldk_rest_addr);
    let swaps =
        GrpcSwapAddressIssuer::connect_lazy(args.swap_issuer_url).context("swap issuer client")?;

    let setup = InvoiceSetup::new(cfg, Arc::new(daemon), Arc::new(swaps));
    let svc = SettlementServiceImpl::new(setup, Arc::new(Mutex::new(store)));

    tracing::info!(%listen_addr, network = %args.network, "starting settlement gRPC server");

    Server::builder()
        .add_service(SettlementServiceServer::new(svc))
        .serve(listen_addr)
        .await
        .context("serve gRPC")?;

    Ok(())
}
