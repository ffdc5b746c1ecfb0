// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet custody API client.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::{
    http::JsonApi, OnChainTransaction, ProviderError, TokenTransfer, TransferReceipt,
    WalletProvider,
};
use crate::config::ServiceEndpoint;

#[derive(Debug, Clone)]
pub struct WalletApiClient {
    api: JsonApi,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: Value,
}

impl WalletApiClient {
    pub fn new(endpoint: &ServiceEndpoint) -> Result<Self, ProviderError> {
        Ok(Self {
            api: JsonApi::new(&endpoint.base_url, &endpoint.api_key)?,
        })
    }
}

/// Balances come back as either a JSON string or number.
fn balance_to_string(value: Value) -> Result<String, ProviderError> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(ProviderError::InvalidResponse(format!(
            "unexpected balance value {other}"
        ))),
    }
}

#[async_trait]
impl WalletProvider for WalletApiClient {
    async fn get_balance(
        &self,
        wallet: &str,
        network: &str,
        token: &str,
    ) -> Result<String, ProviderError> {
        let response: BalanceResponse = self
            .api
            .get(
                &format!("/wallets/{wallet}/balance"),
                &[("network", network), ("token", token)],
            )
            .await?;
        balance_to_string(response.balance)
    }

    async fn transfer_token(
        &self,
        transfer: &TokenTransfer,
    ) -> Result<TransferReceipt, ProviderError> {
        let receipt: TransferReceipt = self.api.post("/transfers", transfer).await?;
        info!(
            transaction_id = %receipt.transaction_id,
            status = ?receipt.status,
            network = %transfer.network,
            "Wallet API transfer submitted"
        );
        Ok(receipt)
    }

    async fn get_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<OnChainTransaction, ProviderError> {
        self.api
            .get(&format!("/transactions/{transaction_id}"), &[])
            .await
    }
}
