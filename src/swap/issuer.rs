use anyhow::{Context as _, Result};
use tonic::transport::Channel;

use super::setup::{CreatedSwap, SwapAddressIssuer, SwapAddressRequest};
use crate::proto::v1 as pb;
use crate::proto::v1::swap_address_service_client::SwapAddressServiceClient;

/// Client of a remote `SwapAddressService`.
#[derive(Clone)]
pub struct GrpcSwapAddressIssuer {
    client: SwapAddressServiceClient<Channel>,
}

impl GrpcSwapAddressIssuer {
    /// Connects lazily; the first `CreateSwap` call establishes the channel.
    pub fn connect_lazy(url: String) -> Result<Self> {
        let endpoint = Channel::from_shared(url.clone())
            .with_context(|| format!("parse swap issuer url {url}"))?;
        Ok(Self {
            client: SwapAddressServiceClient::new(endpoint.connect_lazy()),
        })
    }
}

#[tonic::async_trait]
impl SwapAddressIssuer for GrpcSwapAddressIssuer {
    async fn create_swap(&self, req: SwapAddressRequest) -> Result<CreatedSwap> {
        let resp = self
            .client
            .clone()
            .create_swap(pb::CreateSwapRequest {
                currency: req.currency,
                invoice: req.invoice,
                refund_address: req.refund_address,
                swap_rate_ppm: req.swap_rate_ppm,
                timeout_block_count: req.timeout_block_count,
            })
            .await
            .context("CreateSwap")?
            .into_inner();

        anyhow::ensure!(
            !resp.swap_address.is_empty(),
            "swap issuer returned no swap address"
        );
        hex::decode(&resp.redeem_script).context("decode swap redeem_script")?;

        Ok(CreatedSwap {
            swap_address: resp.swap_address,
            redeem_script_hex: resp.redeem_script,
            timeout_block_height: resp.timeout_block_height,
        })
    }
}
