// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transfer-to-wallet: send tokens to an external address.
//!
//! `TRANSACTION_DETAILS -> TRANSACTION_SUMMARY -> PROCESSING_FEEDBACK | ERROR_FEEDBACK`
//!
//! `TRANSACTION_DETAILS` is the only screen that loops back to itself on
//! invalid input. The summary step re-checks everything against the live
//! balance before moving funds.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::{
    error_messages, failed, parse_data, processing, provider_failure, string_or_number,
    FlowError, FlowHandler, FlowResponse, GENERIC_FAILURE_MESSAGE,
};
use crate::amounts::{fixed, parse_amount};
use crate::assets::{find_asset, Asset};
use crate::config::TransferFeeConfig;
use crate::providers::{OnChainStatus, TokenTransfer, UserDirectory, WalletProvider};
use crate::watcher::{TransactionJob, TransactionWatcher, TransferSettlement};

const FLOW: &str = "transfer";

/// Decimal places shown on every screen and in the settlement message.
const DISPLAY_DP: u32 = 2;

/// The amount sent must be exactly the amount the user was shown.
fn fits_display(amount: Decimal) -> bool {
    amount.normalize().scale() <= DISPLAY_DP
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    TransactionDetails,
    TransactionSummary,
}

impl Screen {
    fn as_str(self) -> &'static str {
        match self {
            Screen::TransactionDetails => "TRANSACTION_DETAILS",
            Screen::TransactionSummary => "TRANSACTION_SUMMARY",
        }
    }
}

impl FromStr for Screen {
    type Err = FlowError;

    fn from_str(screen: &str) -> Result<Self, Self::Err> {
        match screen {
            "TRANSACTION_DETAILS" => Ok(Screen::TransactionDetails),
            "TRANSACTION_SUMMARY" => Ok(Screen::TransactionSummary),
            other => Err(FlowError::UnhandledScreen(other.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DetailsInput {
    #[serde(deserialize_with = "string_or_number")]
    amount: String,
    #[serde(default)]
    wallet_address: String,
    asset_id: String,
    user_id: String,
    /// The balance line shown on the screen, e.g. `Balance: 12.50 USDC`.
    #[serde(default)]
    balance: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDetails {
    pub asset_id: String,
    pub user_id: String,
    pub amount: String,
    pub wallet_address: String,
}

#[derive(Debug, Deserialize)]
struct SummaryInput {
    transaction_details: TransferDetails,
}

/// Pull the amount out of a `"<label>: <amount> <TOKEN>"` display line.
pub fn parse_display_balance(display: &str) -> Option<Decimal> {
    let (_, rest) = display.split_once(':')?;
    let mut parts = rest.split_whitespace();
    let amount = parts.next()?;
    parts.next()?;
    parse_amount("balance", amount).ok()
}

pub struct TransferFlow {
    wallet: Arc<dyn WalletProvider>,
    users: Arc<dyn UserDirectory>,
    watcher: TransactionWatcher,
    fee: TransferFeeConfig,
}

impl TransferFlow {
    pub fn new(
        wallet: Arc<dyn WalletProvider>,
        users: Arc<dyn UserDirectory>,
        watcher: TransactionWatcher,
        fee: TransferFeeConfig,
    ) -> Self {
        Self {
            wallet,
            users,
            watcher,
            fee,
        }
    }

    fn transaction_details(&self, version: &str, input: DetailsInput) -> FlowResponse {
        let Some(asset) = find_asset(&input.asset_id) else {
            return failed(version, "This asset is not supported.");
        };
        let fee = self.fee.charged();
        let mut errors: Vec<(&str, String)> = Vec::new();

        let amount = match parse_amount("amount", &input.amount) {
            Ok(amount) if amount <= Decimal::ZERO => {
                errors.push(("amount", "Enter an amount greater than zero.".to_string()));
                None
            }
            Ok(amount) if !fits_display(amount) => {
                errors.push((
                    "amount",
                    format!("Enter an amount with at most {DISPLAY_DP} decimal places."),
                ));
                None
            }
            Ok(amount) => Some(amount),
            Err(e) => {
                errors.push(("amount", e.to_string()));
                None
            }
        };

        if let Some(amount) = amount {
            match parse_display_balance(&input.balance) {
                Some(balance) if amount + fee > balance => errors.push((
                    "amount",
                    format!(
                        "Insufficient balance. You have {} {}.",
                        fixed(balance, 2),
                        asset.token_name
                    ),
                )),
                Some(_) => {}
                None => errors.push((
                    "amount",
                    "We could not read your balance. Please reopen this form.".to_string(),
                )),
            }
        }

        if !asset.family.is_valid_address(&input.wallet_address) {
            errors.push((
                "wallet_address",
                format!("Enter a valid {} wallet address.", asset.family.label()),
            ));
        }

        let Some(amount) = amount.filter(|_| errors.is_empty()) else {
            return FlowResponse::new(
                version,
                Screen::TransactionDetails.as_str(),
                json!({
                    "error_messages": error_messages(&errors),
                    "init_values": {
                        "amount": input.amount,
                        "wallet_address": input.wallet_address,
                    },
                    "asset_id": input.asset_id,
                    "user_id": input.user_id,
                    "balance": input.balance,
                }),
            );
        };

        let token = asset.token_name;
        let details = TransferDetails {
            asset_id: asset.id.to_string(),
            user_id: input.user_id,
            amount: amount.normalize().to_string(),
            wallet_address: input.wallet_address.trim().to_string(),
        };
        FlowResponse::new(
            version,
            Screen::TransactionSummary.as_str(),
            json!({
                "amount_display": format!("{} {token}", fixed(amount, DISPLAY_DP)),
                "fee_display": format!("{} {token}", fixed(fee, DISPLAY_DP)),
                "total_display": format!("{} {token}", fixed(amount + fee, DISPLAY_DP)),
                "destination_display": details.wallet_address,
                "network_display": asset.chain_name,
                "transaction_details": details,
            }),
        )
    }

    async fn transaction_summary(&self, version: &str, details: TransferDetails) -> FlowResponse {
        let Some(asset) = find_asset(&details.asset_id) else {
            return failed(version, "This asset is not supported.");
        };
        if !asset.family.is_valid_address(&details.wallet_address) {
            return failed(
                version,
                format!(
                    "{} is not a valid {} wallet address.",
                    details.wallet_address,
                    asset.family.label()
                ),
            );
        }
        let amount = match parse_amount("amount", &details.amount) {
            Ok(amount) if amount > Decimal::ZERO && fits_display(amount) => amount,
            _ => return failed(version, "The transfer amount is invalid. Please start again."),
        };
        let fee = self.fee.charged();
        let total = amount + fee;

        let user = match self.users.find_user(&details.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => return failed(version, "We could not find your account."),
            Err(e) => return provider_failure(version, FLOW, "user lookup", &e),
        };
        let Some(source_wallet) = user.wallet_for(asset.family) else {
            return failed(
                version,
                format!("You do not have a {} wallet yet.", asset.family.label()),
            );
        };

        let balance = match self
            .wallet
            .get_balance(source_wallet, asset.chain_name, asset.token_name)
            .await
        {
            Ok(raw) => match parse_amount("balance", &raw) {
                Ok(balance) => balance,
                Err(e) => {
                    error!(flow = FLOW, raw_balance = %raw, error = %e, "Unreadable wallet balance");
                    return failed(version, GENERIC_FAILURE_MESSAGE);
                }
            },
            Err(e) => return provider_failure(version, FLOW, "balance lookup", &e),
        };

        if balance < total {
            info!(
                flow = FLOW,
                user_id = %details.user_id,
                balance = %balance,
                requested = %total,
                "Transfer rejected for insufficient balance"
            );
            return failed(
                version,
                format!(
                    "Insufficient balance. You requested {} {token} but only {} {token} is available.",
                    fixed(total, 2),
                    fixed(balance, 2),
                    token = asset.token_name
                ),
            );
        }

        let transfer = TokenTransfer {
            network: asset.chain_name.to_string(),
            from: source_wallet.to_string(),
            token: asset.token_name.to_string(),
            recipient: details.wallet_address.clone(),
            amount: amount.normalize().to_string(),
        };
        let receipt = match self.wallet.transfer_token(&transfer).await {
            Ok(receipt) if receipt.status != OnChainStatus::Failed => receipt,
            Ok(receipt) => {
                error!(
                    flow = FLOW,
                    transaction_id = %receipt.transaction_id,
                    "Transfer was rejected"
                );
                return failed(version, GENERIC_FAILURE_MESSAGE);
            }
            Err(e) => return provider_failure(version, FLOW, "token transfer", &e),
        };

        info!(
            flow = FLOW,
            user_id = %details.user_id,
            transaction_id = %receipt.transaction_id,
            amount = %transfer.amount,
            "Transfer submitted"
        );

        self.collect_fee(asset, source_wallet, fee).await;

        let job = TransactionJob::Transfer(TransferSettlement {
            on_chain_transaction_id: receipt.transaction_id.clone(),
            destination: details.wallet_address.clone(),
            amount: fixed(amount, DISPLAY_DP),
            token_name: asset.token_name.to_string(),
            chain_name: asset.chain_name.to_string(),
            user_phone_number: user.phone_number.clone(),
        });
        if let Err(e) = self.watcher.submit(job) {
            error!(
                flow = FLOW,
                transaction_id = %receipt.transaction_id,
                error = %e,
                "Failed to hand transfer to the settlement watcher"
            );
        }

        processing(
            version,
            "processing",
            format!(
                "Your transfer of {} {} is on its way. We will message you once it is confirmed.",
                fixed(amount, DISPLAY_DP),
                asset.token_name
            ),
        )
    }

    /// Best-effort; the user's transfer has already gone out.
    async fn collect_fee(&self, asset: &Asset, source_wallet: &str, fee: Decimal) {
        if fee.is_zero() {
            return;
        }
        let Some(collector) = self.fee.collector_address.as_deref() else {
            warn!(flow = FLOW, fee = %fee, "Transfer fee enabled without a collector wallet");
            return;
        };
        let transfer = TokenTransfer {
            network: asset.chain_name.to_string(),
            from: source_wallet.to_string(),
            token: asset.token_name.to_string(),
            recipient: collector.to_string(),
            amount: fee.normalize().to_string(),
        };
        match self.wallet.transfer_token(&transfer).await {
            Ok(receipt) => info!(
                flow = FLOW,
                transaction_id = %receipt.transaction_id,
                fee = %fee,
                "Transfer fee collected"
            ),
            Err(e) => warn!(flow = FLOW, fee = %fee, error = %e, "Failed to collect transfer fee"),
        }
    }
}

#[async_trait]
impl FlowHandler for TransferFlow {
    fn flow_name(&self) -> &'static str {
        FLOW
    }

    fn init(&self, version: &str) -> FlowResponse {
        FlowResponse::new(
            version,
            Screen::TransactionDetails.as_str(),
            json!({
                "asset_id": "usdc-base",
                "user_id": "",
                "balance": "Balance: 100.00 USDC",
                "network_display": "base",
                "init_values": { "amount": "", "wallet_address": "" },
                "error_messages": {}
            }),
        )
    }

    async fn exchange(
        &self,
        version: &str,
        screen: &str,
        data: Value,
    ) -> Result<FlowResponse, FlowError> {
        let screen: Screen = screen.parse()?;
        match screen {
            Screen::TransactionDetails => {
                let input: DetailsInput = parse_data(screen.as_str(), data)?;
                Ok(self.transaction_details(version, input))
            }
            Screen::TransactionSummary => {
                let input: SummaryInput = parse_data(screen.as_str(), data)?;
                Ok(self.transaction_summary(version, input.transaction_details).await)
            }
        }
    }
}
