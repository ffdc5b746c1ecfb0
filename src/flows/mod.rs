// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # WhatsApp Flow screen machines
//!
//! Every Flow round trip is stateless on the server: the client echoes back
//! whatever `data` the previous response asked it to keep, and each handler
//! maps `(screen, data)` to the next `(screen, data)`.
//!
//! - `crypto` - envelope decryption / response encryption
//! - `offramp` - sell crypto for fiat paid to a saved beneficiary
//! - `onramp` - buy crypto with a bank transfer or mobile money
//! - `transfer` - send crypto to an external wallet
//! - `beneficiary` - launch of the provider-hosted add-beneficiary form

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::error;

use crate::providers::ProviderError;

pub mod beneficiary;
pub mod crypto;
pub mod offramp;
pub mod onramp;
pub mod transfer;

pub use crypto::{
    decrypt_envelope, encrypt_response, flip_iv, CipherError, DecryptedRequest,
    EncryptedEnvelope, FlowPrivateKey,
};

pub const DEFAULT_FLOW_VERSION: &str = "3.0";

/// Terminal screen shared by every transactional flow on success or while settling.
pub const PROCESSING_FEEDBACK: &str = "PROCESSING_FEEDBACK";
/// Terminal screen shared by every transactional flow on failure.
pub const ERROR_FEEDBACK: &str = "ERROR_FEEDBACK";

pub const GENERIC_FAILURE_MESSAGE: &str =
    "We could not complete your request right now. Please try again later.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    #[serde(rename = "INIT")]
    Init,
    #[serde(rename = "data_exchange")]
    DataExchange,
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "BACK")]
    Back,
    #[serde(other)]
    Unknown,
}

impl FlowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowAction::Init => "INIT",
            FlowAction::DataExchange => "data_exchange",
            FlowAction::Ping => "ping",
            FlowAction::Back => "BACK",
            FlowAction::Unknown => "unknown",
        }
    }
}

/// Decrypted Flow request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRequest {
    #[serde(default = "default_version")]
    pub version: String,
    pub action: FlowAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_token: Option<String>,
}

fn default_version() -> String {
    DEFAULT_FLOW_VERSION.to_string()
}

impl FlowRequest {
    /// WhatsApp reports client-side errors as a `data_exchange` whose data
    /// carries an `error` key. Those only need an acknowledgement.
    pub fn is_error_notification(&self) -> bool {
        self.action == FlowAction::DataExchange
            && self.data.get("error").is_some_and(|value| !value.is_null())
    }
}

/// Plaintext Flow response (before encryption).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowResponse {
    pub version: String,
    pub screen: String,
    pub data: Value,
}

impl FlowResponse {
    pub fn new(version: &str, screen: impl Into<String>, data: Value) -> Self {
        Self {
            version: version.to_string(),
            screen: screen.into(),
            data,
        }
    }
}

/// Responses that bypass the screen machines entirely.
pub fn health_check_response() -> Value {
    json!({ "data": { "status": "active" } })
}

pub fn error_acknowledgement() -> Value {
    json!({ "data": { "acknowledged": true } })
}

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("unhandled action `{0}`")]
    UnhandledAction(String),

    #[error("unhandled screen `{0}`")]
    UnhandledScreen(String),

    #[error("data_exchange request without a screen")]
    MissingScreen,

    #[error("invalid data for screen {screen}: {reason}")]
    InvalidData { screen: String, reason: String },
}

/// One Flow's screen machine.
#[async_trait]
pub trait FlowHandler: Send + Sync {
    fn flow_name(&self) -> &'static str;

    /// Preview payload for when the Flow is opened without a bot launch.
    fn init(&self, version: &str) -> FlowResponse;

    async fn exchange(
        &self,
        version: &str,
        screen: &str,
        data: Value,
    ) -> Result<FlowResponse, FlowError>;

    /// INIT / data_exchange / anything else.
    async fn handle(&self, request: FlowRequest) -> Result<FlowResponse, FlowError> {
        match request.action {
            FlowAction::Init => Ok(self.init(&request.version)),
            FlowAction::DataExchange => {
                let screen = request.screen.as_deref().ok_or(FlowError::MissingScreen)?;
                self.exchange(&request.version, screen, request.data).await
            }
            other => Err(FlowError::UnhandledAction(other.as_str().to_string())),
        }
    }
}

/// Deserialize a screen's submitted data into its input shape.
pub fn parse_data<T: DeserializeOwned>(screen: &str, data: Value) -> Result<T, FlowError> {
    serde_json::from_value(data).map_err(|e| FlowError::InvalidData {
        screen: screen.to_string(),
        reason: e.to_string(),
    })
}

/// Feedback data rendered on `PROCESSING_FEEDBACK`.
pub fn processing(version: &str, status: &str, message: impl Into<String>) -> FlowResponse {
    FlowResponse::new(
        version,
        PROCESSING_FEEDBACK,
        json!({ "status": status, "message": message.into() }),
    )
}

/// Feedback data rendered on `ERROR_FEEDBACK`.
pub fn failed(version: &str, message: impl Into<String>) -> FlowResponse {
    FlowResponse::new(
        version,
        ERROR_FEEDBACK,
        json!({ "status": "failed", "message": message.into() }),
    )
}

/// Log a collaborator failure and hide it behind the generic failed screen.
pub(crate) fn provider_failure(
    version: &str,
    flow: &'static str,
    step: &'static str,
    err: &ProviderError,
) -> FlowResponse {
    error!(flow, step, error = %err, "Provider call failed during flow exchange");
    failed(version, GENERIC_FAILURE_MESSAGE)
}

/// `{ field: message }` map for `error_messages`.
pub fn error_messages(errors: &[(&str, String)]) -> Value {
    let mut map = Map::new();
    for (field, message) in errors {
        map.insert((*field).to_string(), Value::String(message.clone()));
    }
    Value::Object(map)
}

/// Accept both JSON strings and numbers for amount-like fields.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {other}"
        ))),
    }
}
