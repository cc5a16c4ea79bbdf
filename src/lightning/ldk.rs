use std::sync::Arc;

use anyhow::{Context as _, Result};
use ldk_server_client::client::LdkServerClient;
use ldk_server_protos::api::{Bolt11ReceiveRequest, GetNodeInfoRequest};
use ldk_server_protos::types::{Bolt11InvoiceDescription, bolt11_invoice_description};

use super::invoice::{amount_msat_from_bolt11, payment_hash_from_bolt11};
use crate::swap::setup::{InvoiceDaemon, InvoiceIssuer, InvoiceRequest, IssuedInvoice};

#[derive(Clone)]
pub struct LdkLightningClient {
    client: LdkServerClient,
}

impl LdkLightningClient {
    pub fn new(rest_service_address: String) -> Self {
        Self {
            client: LdkServerClient::new(rest_service_address),
        }
    }

    pub async fn node_id(&self) -> Result<String> {
        let info = self
            .client
            .get_node_info(GetNodeInfoRequest {})
            .await
            .context("GetNodeInfo")?;
        Ok(info.node_id)
    }

    pub async fn bolt11_receive(
        &self,
        amount_msat: u64,
        description: String,
        expiry_secs: u32,
    ) -> Result<String> {
        let description = Bolt11InvoiceDescription {
            kind: Some(bolt11_invoice_description::Kind::Direct(description)),
        };

        let resp = self
            .client
            .bolt11_receive(Bolt11ReceiveRequest {
                amount_msat: Some(amount_msat),
                description: Some(description),
                expiry_secs,
            })
            .await
            .context("Bolt11Receive")?;

        Ok(resp.invoice)
    }
}

#[tonic::async_trait]
impl InvoiceIssuer for LdkLightningClient {
    async fn create_invoice(&self, req: InvoiceRequest) -> Result<IssuedInvoice> {
        if !req.listen_addresses.is_empty() {
            tracing::debug!(
                listen_addresses = ?req.listen_addresses,
                "ldk-server does not push invoice updates; ignoring listen addresses"
            );
        }

        let amount_msat = req
            .tokens
            .checked_mul(1_000)
            .context("invoice amount overflows msat")?;

        let invoice = self
            .bolt11_receive(amount_msat, req.description, req.expiry_secs)
            .await?;

        let invoiced_msat = amount_msat_from_bolt11(&invoice)?;
        anyhow::ensure!(
            invoiced_msat == Some(amount_msat),
            "daemon issued invoice for {invoiced_msat:?} msat, requested {amount_msat}"
        );
        let payment_hash = payment_hash_from_bolt11(&invoice)?;

        Ok(IssuedInvoice {
            invoice,
            payment_hash: hex::encode(payment_hash),
            swap_address: None,
        })
    }
}

/// ldk-server REST endpoint; each connection is probed before use.
#[derive(Debug, Clone)]
pub struct LdkInvoiceDaemon {
    rest_service_address: String,
}

impl LdkInvoiceDaemon {
    pub fn new(rest_service_address: String) -> Self {
        Self {
            rest_service_address,
        }
    }
}

#[tonic::async_trait]
impl InvoiceDaemon for LdkInvoiceDaemon {
    async fn connect(&self) -> Result<Arc<dyn InvoiceIssuer>> {
        let client = LdkLightningClient::new(self.rest_service_address.clone());
        let node_id = client.node_id().await.with_context(|| {
            format!("connect ldk-server at {}", self.rest_service_address)
        })?;
        tracing::debug!(%node_id, "connected to ldk-server");
        Ok(Arc::new(client))
    }
}
