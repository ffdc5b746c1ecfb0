// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! WhatsApp Cloud API: message sending and payload signature checks.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;

use super::{http::JsonApi, Messenger, ProviderError};
use crate::config::WhatsAppConfig;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

#[derive(Debug, Clone)]
pub struct WhatsAppClient {
    api: JsonApi,
    phone_number_id: String,
}

impl WhatsAppClient {
    pub fn new(config: &WhatsAppConfig) -> Result<Self, ProviderError> {
        if config.phone_number_id.trim().is_empty() {
            return Err(ProviderError::MissingConfig("phone number id".to_string()));
        }
        Ok(Self {
            api: JsonApi::new(&config.api_base_url, &config.access_token)?,
            phone_number_id: config.phone_number_id.clone(),
        })
    }
}

#[async_trait]
impl Messenger for WhatsAppClient {
    async fn send(&self, message: Value) -> Result<(), ProviderError> {
        let _: Value = self
            .api
            .post(&format!("/{}/messages", self.phone_number_id), &message)
            .await?;
        Ok(())
    }
}

/// Plain text message payload.
pub fn text_message(to: &str, body: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": "text",
        "text": { "preview_url": false, "body": body }
    })
}

/// Interactive message that opens a Flow on `screen` with prefilled `data`.
pub struct FlowLaunch<'a> {
    pub to: &'a str,
    pub flow_id: &'a str,
    pub flow_token: &'a str,
    pub header: &'a str,
    pub body: &'a str,
    pub cta: &'a str,
    pub screen: &'a str,
    pub data: Value,
}

pub fn flow_message(launch: FlowLaunch<'_>) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": launch.to,
        "type": "interactive",
        "interactive": {
            "type": "flow",
            "header": { "type": "text", "text": launch.header },
            "body": { "text": launch.body },
            "action": {
                "name": "flow",
                "parameters": {
                    "flow_message_version": "3",
                    "flow_token": launch.flow_token,
                    "flow_id": launch.flow_id,
                    "flow_cta": launch.cta,
                    "flow_action": "navigate",
                    "flow_action_payload": {
                        "screen": launch.screen,
                        "data": launch.data
                    }
                }
            }
        }
    })
}

/// Check an `X-Hub-Signature-256` header (`sha256=<hex>`) against the raw body.
pub fn verify_signature(app_secret: &str, body: &[u8], header_value: &str) -> bool {
    let Some(hex_digest) = header_value.trim().strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Some(expected) = decode_hex(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}
