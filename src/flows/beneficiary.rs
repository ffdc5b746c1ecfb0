// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Add-beneficiary: the form itself is hosted by the ramp provider, so the
//! server only launches the Flow on `ACCOUNT_TYPE` and answers INIT.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::{FlowError, FlowHandler, FlowResponse};
use crate::providers::whatsapp::{flow_message, FlowLaunch};
use crate::providers::{Messenger, ProviderError};

const FLOW: &str = "beneficiary";
const ENTRY_SCREEN: &str = "ACCOUNT_TYPE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTypeOption {
    pub id: String,
    pub title: String,
}

impl AccountTypeOption {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
        }
    }
}

/// Who the form is opened for and what it should offer.
#[derive(Debug, Clone)]
pub struct BeneficiaryLaunch<'a> {
    pub phone_number: &'a str,
    pub user_id: &'a str,
    pub asset_id: &'a str,
    pub country_code: &'a str,
    pub account_types: Vec<AccountTypeOption>,
}

/// Interactive message opening the add-beneficiary Flow on `ACCOUNT_TYPE`.
pub fn launch_message(flow_id: &str, flow_token: &str, launch: &BeneficiaryLaunch<'_>) -> Value {
    flow_message(FlowLaunch {
        to: launch.phone_number,
        flow_id,
        flow_token,
        header: "Add a beneficiary",
        body: "Add the bank or mobile money account you want to receive payouts in.",
        cta: "Add beneficiary",
        screen: ENTRY_SCREEN,
        data: json!({
            "asset_id": launch.asset_id,
            "country_code": launch.country_code,
            "user_id": launch.user_id,
            "account_types": launch.account_types,
        }),
    })
}

pub struct BeneficiaryFlow {
    messenger: Arc<dyn Messenger>,
    flow_id: Option<String>,
}

impl BeneficiaryFlow {
    pub fn new(messenger: Arc<dyn Messenger>, flow_id: Option<String>) -> Self {
        Self { messenger, flow_id }
    }

    /// Send the launch message. Returns the flow token used.
    pub async fn launch(&self, launch: &BeneficiaryLaunch<'_>) -> Result<String, ProviderError> {
        let flow_id = self
            .flow_id
            .as_deref()
            .ok_or_else(|| ProviderError::MissingConfig("beneficiary flow id".to_string()))?;
        let flow_token = Uuid::new_v4().to_string();
        self.messenger
            .send(launch_message(flow_id, &flow_token, launch))
            .await?;
        info!(
            flow = FLOW,
            user_id = %launch.user_id,
            country_code = %launch.country_code,
            "Beneficiary flow launched"
        );
        Ok(flow_token)
    }
}

#[async_trait]
impl FlowHandler for BeneficiaryFlow {
    fn flow_name(&self) -> &'static str {
        FLOW
    }

    fn init(&self, version: &str) -> FlowResponse {
        FlowResponse::new(
            version,
            ENTRY_SCREEN,
            json!({
                "asset_id": "usdc-base",
                "country_code": "NG",
                "user_id": "",
                "account_types": [
                    AccountTypeOption::new("bank", "Bank account"),
                    AccountTypeOption::new("mobile_money", "Mobile money"),
                ],
            }),
        )
    }

    async fn exchange(
        &self,
        _version: &str,
        screen: &str,
        _data: Value,
    ) -> Result<FlowResponse, FlowError> {
        Err(FlowError::UnhandledScreen(screen.to_string()))
    }
}
