use std::future::Future;
use std::str::FromStr as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bitcoin::{Network, PublicKey};
use thiserror::Error;

use super::graph::{GraphError, StageInputs, TaskGraph};
use crate::error::ErrorClass;

pub const STAGE_LND: &str = "lnd";
pub const STAGE_CREATE_INVOICE: &str = "create_invoice";
pub const STAGE_CREATE_ONCHAIN_TXN: &str = "create_onchain_txn";
pub const STAGE_RESULTS: &str = "results";

/// Whether a failed on-chain swap request fails the whole setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OnchainFailurePolicy {
    #[default]
    Abort,
    /// Resolve the invoice anyway and report the on-chain failure next to it.
    Detach,
}

#[derive(Debug, Clone)]
pub struct SetupConfig {
    pub network: Network,
    pub onchain_currency: String,
    pub swap_rate_ppm: u64,
    pub timeout_block_count: u32,
    /// `None` until the seller's refund address can be derived.
    pub refund_address: Option<String>,
    pub invoice_expiry_secs: u32,
    pub collaborator_timeout: Duration,
    pub onchain_failure: OnchainFailurePolicy,
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid setup request: {0}")]
    InvalidRequest(String),
    #[error("failed to init lightning daemon connection: {0:#}")]
    DaemonConnectionFailed(anyhow::Error),
    #[error("create invoice: {0:#}")]
    InvoiceCreationFailed(anyhow::Error),
    #[error("create onchain swap: {0:#}")]
    SwapCreationFailed(anyhow::Error),
    #[error("no refund address configured; refund address derivation is not implemented")]
    RefundAddressUnavailable,
    #[error("{stage} timed out after {timeout:?}")]
    Timeout {
        stage: &'static str,
        timeout: Duration,
    },
    #[error("setup graph: {0}")]
    Graph(String),
}

impl SetupError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SetupError::InvalidRequest(_) => ErrorClass::InputValidation,
            SetupError::DaemonConnectionFailed(_)
            | SetupError::InvoiceCreationFailed(_)
            | SetupError::SwapCreationFailed(_)
            | SetupError::Timeout { .. } => ErrorClass::CollaboratorUnavailable,
            SetupError::RefundAddressUnavailable => ErrorClass::Unsupported,
            SetupError::Graph(_) => ErrorClass::Internal,
        }
    }
}

impl From<GraphError<SetupError>> for SetupError {
    fn from(err: GraphError<SetupError>) -> Self {
        match err {
            GraphError::Stage { source, .. } => source,
            other => SetupError::Graph(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InvoiceRequest {
    pub tokens: u64,
    pub description: String,
    pub expiry_secs: u32,
    /// Subscribers to notify about invoice updates, if the daemon supports it.
    pub listen_addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedInvoice {
    pub invoice: String,
    /// Hex. Generated by the daemon together with the preimage it keeps.
    pub payment_hash: String,
    pub swap_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapAddressRequest {
    pub currency: String,
    pub invoice: String,
    pub refund_address: String,
    pub swap_rate_ppm: u64,
    pub timeout_block_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSwap {
    pub swap_address: String,
    pub redeem_script_hex: String,
    pub timeout_block_height: u32,
}

/// Connection factory for the invoice-issuing Lightning daemon.
#[tonic::async_trait]
pub trait InvoiceDaemon: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn InvoiceIssuer>>;
}

#[tonic::async_trait]
pub trait InvoiceIssuer: Send + Sync {
    async fn create_invoice(&self, req: InvoiceRequest) -> Result<IssuedInvoice>;
}

#[tonic::async_trait]
pub trait SwapAddressIssuer: Send + Sync {
    async fn create_swap(&self, req: SwapAddressRequest) -> Result<CreatedSwap>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupRequest {
    pub currency: String,
    pub capacity: u64,
    pub buyer_pubkey: String,
}

impl SetupRequest {
    fn validate(&self) -> Result<(), SetupError> {
        if self.currency.trim().is_empty() {
            return Err(SetupError::InvalidRequest("currency is required".into()));
        }
        if self.capacity == 0 {
            return Err(SetupError::InvalidRequest("capacity must be > 0".into()));
        }
        PublicKey::from_str(self.buyer_pubkey.trim())
            .map_err(|e| SetupError::InvalidRequest(format!("invalid buyer pubkey: {e}")))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupResult {
    pub invoice: String,
    pub payment_hash: String,
    pub seller_p2sh_address: Option<String>,
}

#[derive(Debug)]
pub struct SetupOutcome {
    pub result: SetupResult,
    pub onchain_swap: Option<CreatedSwap>,
    /// Only populated under [`OnchainFailurePolicy::Detach`].
    pub onchain_failure: Option<SetupError>,
}

#[derive(Clone)]
enum StageValue {
    Daemon(Arc<dyn InvoiceIssuer>),
    Invoice(IssuedInvoice),
    Swap(CreatedSwap),
    Results(SetupResult),
}

/// Issues a buyer invoice and the seller's on-chain swap commitment for it.
#[derive(Clone)]
pub struct InvoiceSetup {
    cfg: SetupConfig,
    daemon: Arc<dyn InvoiceDaemon>,
    swaps: Arc<dyn SwapAddressIssuer>,
}

impl InvoiceSetup {
    pub fn new(
        cfg: SetupConfig,
        daemon: Arc<dyn InvoiceDaemon>,
        swaps: Arc<dyn SwapAddressIssuer>,
    ) -> Self {
        Self { cfg, daemon, swaps }
    }

    pub fn config(&self) -> &SetupConfig {
        &self.cfg
    }

    pub async fn setup_invoice(&self, req: SetupRequest) -> Result<SetupOutcome, SetupError> {
        req.validate()?;

        let timeout = self.cfg.collaborator_timeout;
        let mut graph: TaskGraph<StageValue, SetupError> = TaskGraph::new();

        let daemon = self.daemon.clone();
        graph.stage(STAGE_LND, &[], move |_| async move {
            let handle = with_timeout(STAGE_LND, timeout, daemon.connect())
                .await
                .map_err(|e| SetupError::DaemonConnectionFailed(e.into()))?
                .map_err(SetupError::DaemonConnectionFailed)?;
            Ok(StageValue::Daemon(handle))
        });

        let invoice_req = InvoiceRequest {
            tokens: req.capacity,
            description: format!("swap:{}:{}", req.currency, req.capacity),
            expiry_secs: self.cfg.invoice_expiry_secs,
            listen_addresses: Vec::new(),
        };
        graph.stage(STAGE_CREATE_INVOICE, &[STAGE_LND], move |mut inputs| async move {
            let Some(StageValue::Daemon(lnd)) = inputs.take(STAGE_LND) else {
                return Err(missing_input(STAGE_CREATE_INVOICE, STAGE_LND));
            };
            let invoice = lnd.create_invoice(invoice_req);
            let invoice = with_timeout(STAGE_CREATE_INVOICE, timeout, invoice)
                .await?
                .map_err(SetupError::InvoiceCreationFailed)?;
            tracing::info!(payment_hash = %invoice.payment_hash, "invoice created");
            Ok(StageValue::Invoice(invoice))
        });

        let swaps = self.swaps.clone();
        let cfg = self.cfg.clone();
        let create_onchain_txn = move |mut inputs: StageInputs<StageValue>| async move {
            // The daemon handle is a declared dependency but the swap service
            // needs only the invoice.
            let Some(StageValue::Invoice(invoice)) = inputs.take(STAGE_CREATE_INVOICE) else {
                return Err(missing_input(STAGE_CREATE_ONCHAIN_TXN, STAGE_CREATE_INVOICE));
            };
            let refund_address = cfg
                .refund_address
                .clone()
                .ok_or(SetupError::RefundAddressUnavailable)?;
            let swap_req = SwapAddressRequest {
                currency: cfg.onchain_currency.clone(),
                invoice: invoice.invoice,
                refund_address,
                swap_rate_ppm: cfg.swap_rate_ppm,
                timeout_block_count: cfg.timeout_block_count,
            };
            let swap = swaps.create_swap(swap_req);
            let swap = with_timeout(STAGE_CREATE_ONCHAIN_TXN, timeout, swap)
                .await?
                .map_err(SetupError::SwapCreationFailed)?;
            tracing::info!(swap_address = %swap.swap_address, "onchain swap created");
            Ok(StageValue::Swap(swap))
        };
        let onchain_deps = [STAGE_LND, STAGE_CREATE_INVOICE];
        match self.cfg.onchain_failure {
            OnchainFailurePolicy::Abort => {
                graph.stage(STAGE_CREATE_ONCHAIN_TXN, &onchain_deps, create_onchain_txn)
            }
            OnchainFailurePolicy::Detach => {
                graph.detached_stage(STAGE_CREATE_ONCHAIN_TXN, &onchain_deps, create_onchain_txn)
            }
        };

        graph.stage(STAGE_RESULTS, &[STAGE_CREATE_INVOICE], |mut inputs| async move {
            let Some(StageValue::Invoice(invoice)) = inputs.take(STAGE_CREATE_INVOICE) else {
                return Err(missing_input(STAGE_RESULTS, STAGE_CREATE_INVOICE));
            };
            Ok(StageValue::Results(SetupResult {
                invoice: invoice.invoice,
                payment_hash: invoice.payment_hash,
                seller_p2sh_address: invoice.swap_address,
            }))
        });

        let mut run = graph.run(STAGE_RESULTS).await?;

        let StageValue::Results(result) = run.value else {
            return Err(SetupError::Graph("results stage returned another value".into()));
        };
        let onchain_swap = match run.completed.remove(STAGE_CREATE_ONCHAIN_TXN) {
            Some(StageValue::Swap(swap)) => Some(swap),
            _ => None,
        };
        let onchain_failure = run
            .failures
            .into_iter()
            .find(|f| f.stage == STAGE_CREATE_ONCHAIN_TXN)
            .map(|f| f.error);

        Ok(SetupOutcome {
            result,
            onchain_swap,
            onchain_failure,
        })
    }
}

fn missing_input(stage: &str, dependency: &str) -> SetupError {
    SetupError::Graph(format!("stage {stage} ran without output of {dependency}"))
}

async fn with_timeout<T>(
    stage: &'static str,
    timeout: Duration,
    fut: impl Future<Output = T>,
) -> Result<T, SetupError> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| SetupError::Timeout { stage, timeout })
}
