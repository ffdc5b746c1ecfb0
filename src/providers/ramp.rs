// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fiat on-ramp/off-ramp API client.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::{
    http::JsonApi, map_ramp_status, MobileProvider, OfframpOrder, OfframpReceipt, OnrampInstruction,
    OnrampOrder, ProviderError, Quote, RampProvider, RampRoute, RampStatus,
};
use crate::config::ServiceEndpoint;

#[derive(Debug, Clone)]
pub struct RampApiClient {
    api: JsonApi,
}

#[derive(Debug, Deserialize)]
struct ProvidersResponse {
    providers: Vec<MobileProvider>,
}

impl RampApiClient {
    pub fn new(endpoint: &ServiceEndpoint) -> Result<Self, ProviderError> {
        Ok(Self {
            api: JsonApi::new(&endpoint.base_url, &endpoint.api_key)?,
        })
    }
}

fn extract_status(response: &Value) -> Option<&str> {
    response
        .get("status")
        .and_then(Value::as_str)
        .or_else(|| response.pointer("/data/status").and_then(Value::as_str))
        .or_else(|| {
            response
                .pointer("/transaction/status")
                .and_then(Value::as_str)
        })
}

#[async_trait]
impl RampProvider for RampApiClient {
    async fn get_quote(
        &self,
        currency: &str,
        country: &str,
        route: RampRoute,
    ) -> Result<Quote, ProviderError> {
        self.api
            .get(
                "/rates",
                &[
                    ("currency", currency),
                    ("country", country),
                    ("route", route.as_str()),
                ],
            )
            .await
    }

    async fn supported_mobile_providers(
        &self,
        channel_id: &str,
    ) -> Result<Vec<MobileProvider>, ProviderError> {
        let response: ProvidersResponse = self
            .api
            .get(&format!("/channels/{channel_id}/providers"), &[])
            .await?;
        Ok(response.providers)
    }

    async fn post_onramp(&self, order: &OnrampOrder) -> Result<OnrampInstruction, ProviderError> {
        let instruction: OnrampInstruction = self.api.post("/onramp", order).await?;
        info!(
            user_id = %order.user_id,
            sequence_id = %instruction.sequence_id,
            "Ramp onramp order created"
        );
        Ok(instruction)
    }

    async fn post_offramp(&self, order: &OfframpOrder) -> Result<OfframpReceipt, ProviderError> {
        let receipt: OfframpReceipt = self.api.post("/offramp", order).await?;
        info!(
            tx_hash = %order.tx_hash,
            sequence_id = %receipt.sequence_id,
            "Ramp offramp payout requested"
        );
        Ok(receipt)
    }

    async fn transaction_status(
        &self,
        sequence_id: &str,
        route: RampRoute,
    ) -> Result<RampStatus, ProviderError> {
        let response: Value = self
            .api
            .get(
                &format!("/transactions/{sequence_id}"),
                &[("route", route.as_str())],
            )
            .await?;
        let status = extract_status(&response).ok_or_else(|| {
            ProviderError::InvalidResponse("missing transaction status in response".to_string())
        })?;
        Ok(map_ramp_status(status))
    }
}
