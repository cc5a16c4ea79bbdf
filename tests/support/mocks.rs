use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use ln_onchain_swap::swap::setup::{
    CreatedSwap, InvoiceDaemon, InvoiceIssuer, InvoiceRequest, IssuedInvoice, SwapAddressIssuer,
    SwapAddressRequest,
};

pub const PAYMENT_HASH: &str = "1111111111111111111111111111111111111111111111111111111111111111";

/// Issues `lntb<tokens>n1mock` invoices with a fixed payment hash.
#[derive(Default)]
pub struct MockIssuer {
    pub fail: bool,
    pub swap_address: Option<String>,
    pub requests: Mutex<Vec<InvoiceRequest>>,
}

#[tonic::async_trait]
impl InvoiceIssuer for MockIssuer {
    async fn create_invoice(&self, req: InvoiceRequest) -> Result<IssuedInvoice> {
        let tokens = req.tokens;
        self.requests.lock().expect("requests mutex").push(req);
        anyhow::ensure!(!self.fail, "invoice rpc rejected");
        Ok(IssuedInvoice {
            invoice: format!("lntb{tokens}n1mock"),
            payment_hash: PAYMENT_HASH.to_string(),
            swap_address: self.swap_address.clone(),
        })
    }
}

pub struct MockDaemon {
    pub fail: bool,
    pub delay: Option<Duration>,
    pub connects: AtomicUsize,
    pub issuer: Arc<MockIssuer>,
}

impl MockDaemon {
    pub fn new(issuer: MockIssuer) -> Self {
        Self {
            fail: false,
            delay: None,
            connects: AtomicUsize::new(0),
            issuer: Arc::new(issuer),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[tonic::async_trait]
impl InvoiceDaemon for MockDaemon {
    async fn connect(&self) -> Result<Arc<dyn InvoiceIssuer>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        anyhow::ensure!(!self.fail, "connection refused");
        let issuer: Arc<dyn InvoiceIssuer> = self.issuer.clone();
        Ok(issuer)
    }
}

#[derive(Default)]
pub struct MockSwaps {
    pub fail: bool,
    pub delay: Option<Duration>,
    pub requests: Mutex<Vec<SwapAddressRequest>>,
}

#[tonic::async_trait]
impl SwapAddressIssuer for MockSwaps {
    async fn create_swap(&self, req: SwapAddressRequest) -> Result<CreatedSwap> {
        self.requests.lock().expect("requests mutex").push(req);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        anyhow::ensure!(!self.fail, "swap service unavailable");
        Ok(CreatedSwap {
            swap_address: "tb1qswapaddress".to_string(),
            redeem_script_hex: "a820".to_string(),
            timeout_block_height: 2_500_144,
        })
    }
}
