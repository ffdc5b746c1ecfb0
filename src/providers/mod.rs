// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! External collaborators of the Flow endpoints.
//!
//! Each collaborator is a trait so flows and the settlement watcher can be
//! exercised against in-memory doubles. The HTTP implementations live in the
//! submodules:
//!
//! - `wallet` - wallet custody API (balances, token transfers, tx status)
//! - `ramp` - fiat on/off-ramp API (quotes, deposit instructions, payouts)
//! - `users` - user directory and KYC identity lookups
//! - `whatsapp` - WhatsApp Cloud API message sending

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::assets::ChainFamily;

mod http;
pub mod ramp;
pub mod users;
pub mod wallet;
pub mod whatsapp;

pub use ramp::RampApiClient;
pub use users::UserApiClient;
pub use wallet::WalletApiClient;
pub use whatsapp::{text_message, WhatsAppClient};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider configuration missing: {0}")]
    MissingConfig(String),

    #[error("provider request failed: {0}")]
    Request(String),

    #[error("provider response was invalid: {0}")]
    InvalidResponse(String),

    #[error("not found: {0}")]
    NotFound(String),
}

// =============================================================================
// Wallet custody
// =============================================================================

/// On-chain status reported by the wallet custody API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnChainStatus {
    Submitted,
    Pending,
    Success,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransfer {
    pub network: String,
    pub from: String,
    pub token: String,
    pub recipient: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transaction_id: String,
    pub status: OnChainStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainTransaction {
    pub status: OnChainStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
}

#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Token balance as a decimal string in token units.
    async fn get_balance(
        &self,
        wallet: &str,
        network: &str,
        token: &str,
    ) -> Result<String, ProviderError>;

    async fn transfer_token(
        &self,
        transfer: &TokenTransfer,
    ) -> Result<TransferReceipt, ProviderError>;

    async fn get_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<OnChainTransaction, ProviderError>;
}

// =============================================================================
// Fiat ramp
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RampRoute {
    Onramp,
    Offramp,
}

impl RampRoute {
    pub fn as_str(self) -> &'static str {
        match self {
            RampRoute::Onramp => "onramp",
            RampRoute::Offramp => "offramp",
        }
    }
}

/// Exchange rate (local currency per USD) and fee rate for one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub rate: Decimal,
    pub fee: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MobileProvider {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankInfo {
    pub bank_name: String,
    pub account_number: String,
    pub account_name: String,
}

/// How the user pays for an onramp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OnrampChannel {
    Bank {
        channel_id: String,
    },
    MobileMoney {
        channel_id: String,
        provider_id: String,
        phone_number: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnrampOrder {
    pub user_id: String,
    pub asset_id: String,
    pub chain_name: String,
    pub token_name: String,
    pub destination_wallet: String,
    pub usd_amount: String,
    pub local_amount: String,
    pub currency: String,
    pub country: String,
    pub channel: OnrampChannel,
    pub customer: VerifiedIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnrampInstruction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_info: Option<BankInfo>,
    pub sequence_id: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfframpOrder {
    pub tx_hash: String,
    pub beneficiary_id: String,
    pub usd_amount: String,
    pub local_amount: String,
    pub currency: String,
    pub token_address: String,
    pub chain_name: String,
    pub token_name: String,
    pub user_wallet_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hot_wallet_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfframpReceipt {
    pub sequence_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampStatus {
    Pending,
    Completed,
    Failed,
}

pub fn map_ramp_status(raw_status: &str) -> RampStatus {
    let status = raw_status.trim().to_ascii_lowercase();
    match status.as_str() {
        "complete" | "completed" | "success" | "successful" | "settled" => RampStatus::Completed,
        "failed" | "cancelled" | "canceled" | "expired" | "rejected" => RampStatus::Failed,
        _ => RampStatus::Pending,
    }
}

#[async_trait]
pub trait RampProvider: Send + Sync {
    async fn get_quote(
        &self,
        currency: &str,
        country: &str,
        route: RampRoute,
    ) -> Result<Quote, ProviderError>;

    async fn supported_mobile_providers(
        &self,
        channel_id: &str,
    ) -> Result<Vec<MobileProvider>, ProviderError>;

    async fn post_onramp(&self, order: &OnrampOrder) -> Result<OnrampInstruction, ProviderError>;

    async fn post_offramp(&self, order: &OfframpOrder) -> Result<OfframpReceipt, ProviderError>;

    async fn transaction_status(
        &self,
        sequence_id: &str,
        route: RampRoute,
    ) -> Result<RampStatus, ProviderError>;
}

// =============================================================================
// Users / KYC
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    /// WhatsApp number (international format, digits only).
    pub phone_number: String,
    pub evm_wallet_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solana_wallet_address: Option<String>,
}

impl UserProfile {
    pub fn wallet_for(&self, family: ChainFamily) -> Option<&str> {
        match family {
            ChainFamily::Evm => Some(self.evm_wallet_address.as_str()),
            ChainFamily::Solana => self.solana_wallet_address.as_deref(),
        }
    }
}

/// Identity the KYC provider has verified for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_number: Option<String>,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserProfile>, ProviderError>;

    /// `None` until the user has completed identity verification.
    async fn identity(&self, user_id: &str) -> Result<Option<VerifiedIdentity>, ProviderError>;
}

// =============================================================================
// Messaging
// =============================================================================

#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a Cloud API message payload (must include `to`).
    async fn send(&self, message: Value) -> Result<(), ProviderError>;

    async fn send_text(&self, to: &str, body: &str) -> Result<(), ProviderError> {
        self.send(text_message(to, body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ramp_status_mapping_is_stable() {
        assert_eq!(map_ramp_status("COMPLETE"), RampStatus::Completed);
        assert_eq!(map_ramp_status("success"), RampStatus::Completed);
        assert_eq!(map_ramp_status("expired"), RampStatus::Failed);
        assert_eq!(map_ramp_status("processing"), RampStatus::Pending);
    }

    #[test]
    fn on_chain_status_tolerates_unknown_values() {
        let tx: OnChainTransaction =
            serde_json::from_value(json!({ "status": "queued" })).unwrap();
        assert_eq!(tx.status, OnChainStatus::Unknown);
        assert_eq!(tx.transaction_hash, None);

        let tx: OnChainTransaction = serde_json::from_value(
            json!({ "status": "success", "transaction_hash": "0xabc" }),
        )
        .unwrap();
        assert_eq!(tx.status, OnChainStatus::Success);
        assert_eq!(tx.transaction_hash.as_deref(), Some("0xabc"));
    }

    #[test]
    fn quote_accepts_numbers_and_strings() {
        let quote: Quote = serde_json::from_value(json!({ "rate": "1600", "fee": 0.01 })).unwrap();
        assert_eq!(quote.rate, Decimal::from(1600));
        assert_eq!(quote.fee, Decimal::new(1, 2));
    }

    #[test]
    fn wallet_for_family() {
        let user = UserProfile {
            user_id: "u1".into(),
            phone_number: "2348000000000".into(),
            evm_wallet_address: "0xabc".into(),
            solana_wallet_address: None,
        };
        assert_eq!(user.wallet_for(ChainFamily::Evm), Some("0xabc"));
        assert_eq!(user.wallet_for(ChainFamily::Solana), None);
    }
}
