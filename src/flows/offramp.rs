// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Offramp: sell tokens for fiat paid out to a saved beneficiary.
//!
//! `AMOUNT_INPUT -> TRANSACTION_SUMMARY -> PROCESSING_FEEDBACK | ERROR_FEEDBACK`
//!
//! The summary step moves the tokens to the ramp provider's hot wallet and
//! hands the transaction to the settlement watcher, which requests the fiat
//! payout once the transfer lands on chain.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

use super::{
    error_messages, failed, parse_data, processing, provider_failure, string_or_number,
    FlowError, FlowHandler, FlowResponse,
};
use crate::amounts::{fixed, parse_amount, round, AmountError};
use crate::assets::find_asset;
use crate::providers::{OnChainStatus, TokenTransfer, UserDirectory, WalletProvider};
use crate::watcher::{OfframpSettlement, TransactionJob, TransactionWatcher};

const FLOW: &str = "offramp";

/// `amount_denomination` value meaning the amount is in asset (USD) units.
const USD_DENOMINATION: &str = "USD";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    AmountInput,
    TransactionSummary,
}

impl Screen {
    fn as_str(self) -> &'static str {
        match self {
            Screen::AmountInput => "AMOUNT_INPUT",
            Screen::TransactionSummary => "TRANSACTION_SUMMARY",
        }
    }
}

impl FromStr for Screen {
    type Err = FlowError;

    fn from_str(screen: &str) -> Result<Self, Self::Err> {
        match screen {
            "AMOUNT_INPUT" => Ok(Screen::AmountInput),
            "TRANSACTION_SUMMARY" => Ok(Screen::TransactionSummary),
            other => Err(FlowError::UnhandledScreen(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beneficiary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub institution: String,
    #[serde(default)]
    pub account_identifier: String,
}

#[derive(Debug, Deserialize)]
struct AmountInput {
    #[serde(deserialize_with = "string_or_number")]
    amount: String,
    #[serde(default)]
    amount_denomination: String,
    asset_id: String,
    #[serde(deserialize_with = "string_or_number")]
    conversion_rate: String,
    #[serde(deserialize_with = "string_or_number")]
    fee: String,
    beneficiary: Beneficiary,
    user_id: String,
    #[serde(default)]
    currency: String,
}

/// Machine-readable state carried from `AMOUNT_INPUT` to `TRANSACTION_SUMMARY`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfframpDetails {
    pub asset_id: String,
    pub user_id: String,
    pub beneficiary_id: String,
    pub currency: String,
    pub conversion_rate: String,
    pub usd_amount: String,
    pub fee: String,
    pub token_amount_to_debit: String,
    pub fiat_to_receive: String,
}

#[derive(Debug, Deserialize)]
struct SummaryInput {
    transaction_details: OfframpDetails,
}

/// Amounts derived from the user's input. The fee is taken in asset units
/// and the conversion only applies to the principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfframpQuote {
    pub usd_amount: Decimal,
    pub fee: Decimal,
    pub token_amount_to_debit: Decimal,
    pub fiat_to_receive: Decimal,
}

pub fn quote_offramp(
    amount: Decimal,
    denominated_in_usd: bool,
    conversion_rate: Decimal,
    fee_rate: Decimal,
) -> Option<OfframpQuote> {
    let usd_amount = if denominated_in_usd {
        round(amount, 2)
    } else {
        if conversion_rate.is_zero() {
            return None;
        }
        round(amount / conversion_rate, 2)
    };
    let fee = round(usd_amount * fee_rate, 3);
    Some(OfframpQuote {
        usd_amount,
        fee,
        token_amount_to_debit: usd_amount + fee,
        fiat_to_receive: round(usd_amount * conversion_rate, 2),
    })
}

pub struct OfframpFlow {
    wallet: Arc<dyn WalletProvider>,
    users: Arc<dyn UserDirectory>,
    watcher: TransactionWatcher,
    hot_wallet_address: String,
}

impl OfframpFlow {
    pub fn new(
        wallet: Arc<dyn WalletProvider>,
        users: Arc<dyn UserDirectory>,
        watcher: TransactionWatcher,
        hot_wallet_address: String,
    ) -> Self {
        Self {
            wallet,
            users,
            watcher,
            hot_wallet_address,
        }
    }

    fn amount_input(&self, version: &str, input: AmountInput) -> FlowResponse {
        let Some(asset) = find_asset(&input.asset_id) else {
            return self.reject_amount(
                version,
                &input,
                vec![("asset_id", "This asset is not supported.".to_string())],
            );
        };

        let amount = match parse_amount("amount", &input.amount) {
            Ok(amount) => amount,
            Err(e) => return self.reject_amount(version, &input, vec![("amount", e.to_string())]),
        };
        let (rate, fee_rate) = match parse_rates(&input) {
            Ok(rates) => rates,
            Err(e) => {
                error!(flow = FLOW, error = %e, "Offramp screen carried unusable rates");
                return failed(version, super::GENERIC_FAILURE_MESSAGE);
            }
        };
        if amount.is_zero() {
            return self.reject_amount(
                version,
                &input,
                vec![("amount", "Enter an amount greater than zero.".to_string())],
            );
        }

        let in_usd = input.amount_denomination.trim().is_empty()
            || input
                .amount_denomination
                .trim()
                .eq_ignore_ascii_case(USD_DENOMINATION);
        let Some(quote) = quote_offramp(amount, in_usd, rate, fee_rate) else {
            return self.reject_amount(
                version,
                &input,
                vec![("amount", "No exchange rate is available right now.".to_string())],
            );
        };

        let token = asset.token_name;
        let currency = input.currency.trim().to_ascii_uppercase();
        let details = OfframpDetails {
            asset_id: asset.id.to_string(),
            user_id: input.user_id.clone(),
            beneficiary_id: input.beneficiary.id.clone(),
            currency: currency.clone(),
            conversion_rate: rate.normalize().to_string(),
            usd_amount: fixed(quote.usd_amount, 2),
            fee: fixed(quote.fee, 3),
            token_amount_to_debit: fixed(quote.token_amount_to_debit, 2),
            fiat_to_receive: fixed(quote.fiat_to_receive, 2),
        };

        FlowResponse::new(
            version,
            Screen::TransactionSummary.as_str(),
            json!({
                "amount_display": format!("{} {token}", details.usd_amount),
                "fee_display": format!("{} {token}", details.fee),
                "total_display": format!("{} {token}", details.token_amount_to_debit),
                "receive_display": format!("{} {currency}", details.fiat_to_receive),
                "rate_display": format!("1 {token} = {} {currency}", details.conversion_rate),
                "network_display": asset.chain_name,
                "beneficiary_display": beneficiary_line(&input.beneficiary),
                "transaction_details": details,
            }),
        )
    }

    /// Re-render `AMOUNT_INPUT` with field errors and everything it was given.
    fn reject_amount(
        &self,
        version: &str,
        input: &AmountInput,
        errors: Vec<(&str, String)>,
    ) -> FlowResponse {
        FlowResponse::new(
            version,
            Screen::AmountInput.as_str(),
            json!({
                "error_messages": error_messages(&errors),
                "init_values": { "amount": input.amount },
                "asset_id": input.asset_id,
                "amount_denomination": input.amount_denomination,
                "conversion_rate": input.conversion_rate,
                "fee": input.fee,
                "beneficiary": input.beneficiary,
                "user_id": input.user_id,
                "currency": input.currency,
            }),
        )
    }

    async fn transaction_summary(&self, version: &str, details: OfframpDetails) -> FlowResponse {
        let Some(asset) = find_asset(&details.asset_id) else {
            return failed(version, "This asset is not supported.");
        };
        let debit = match parse_amount("token_amount_to_debit", &details.token_amount_to_debit) {
            Ok(debit) if !debit.is_zero() => debit,
            _ => return failed(version, "The withdrawal amount is invalid. Please start again."),
        };

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

        let raw_balance = match self
            .wallet
            .get_balance(source_wallet, asset.chain_name, asset.token_name)
            .await
        {
            Ok(balance) => balance,
            Err(e) => return provider_failure(version, FLOW, "balance lookup", &e),
        };
        let balance = match parse_amount("balance", &raw_balance) {
            Ok(balance) => balance,
            Err(e) => {
                error!(flow = FLOW, raw_balance = %raw_balance, error = %e, "Unreadable wallet balance");
                return failed(version, super::GENERIC_FAILURE_MESSAGE);
            }
        };

        if balance < debit {
            info!(
                flow = FLOW,
                user_id = %details.user_id,
                balance = %balance,
                debit = %debit,
                "Offramp rejected for insufficient balance"
            );
            return failed(
                version,
                format!(
                    "Insufficient balance. You need {} {} but your balance is {} {}.",
                    fixed(debit, 2),
                    asset.token_name,
                    fixed(balance, 2),
                    asset.token_name
                ),
            );
        }

        let transfer = TokenTransfer {
            network: asset.chain_name.to_string(),
            from: source_wallet.to_string(),
            token: asset.token_name.to_string(),
            recipient: self.hot_wallet_address.clone(),
            amount: debit.normalize().to_string(),
        };
        let receipt = match self.wallet.transfer_token(&transfer).await {
            Ok(receipt) if receipt.status != OnChainStatus::Failed => receipt,
            Ok(receipt) => {
                error!(
                    flow = FLOW,
                    transaction_id = %receipt.transaction_id,
                    "Offramp transfer was rejected"
                );
                return failed(version, super::GENERIC_FAILURE_MESSAGE);
            }
            Err(e) => return provider_failure(version, FLOW, "token transfer", &e),
        };

        info!(
            flow = FLOW,
            user_id = %details.user_id,
            transaction_id = %receipt.transaction_id,
            amount = %transfer.amount,
            "Offramp transfer submitted"
        );

        let job = TransactionJob::Offramp(OfframpSettlement {
            on_chain_transaction_id: receipt.transaction_id.clone(),
            beneficiary_id: details.beneficiary_id.clone(),
            usd_amount: details.usd_amount.clone(),
            local_amount: details.fiat_to_receive.clone(),
            currency: details.currency.clone(),
            token_address: asset.token_address.to_string(),
            chain_name: asset.chain_name.to_string(),
            token_name: asset.token_name.to_string(),
            user_wallet_address: source_wallet.to_string(),
            hot_wallet_address: Some(self.hot_wallet_address.clone()),
            user_phone_number: user.phone_number.clone(),
        });
        if let Err(e) = self.watcher.submit(job) {
            error!(
                flow = FLOW,
                transaction_id = %receipt.transaction_id,
                error = %e,
                "Failed to hand offramp to the settlement watcher"
            );
        }

        processing(
            version,
            "processing",
            format!(
                "Your withdrawal of {} {} is processing. You will receive {} {} once it settles.",
                details.usd_amount, asset.token_name, details.fiat_to_receive, details.currency
            ),
        )
    }
}

fn parse_rates(input: &AmountInput) -> Result<(Decimal, Decimal), AmountError> {
    Ok((
        parse_amount("conversion_rate", &input.conversion_rate)?,
        parse_amount("fee", &input.fee)?,
    ))
}

fn beneficiary_line(beneficiary: &Beneficiary) -> String {
    let mut line = beneficiary.name.clone();
    if !beneficiary.institution.is_empty() {
        line.push_str(&format!(" - {}", beneficiary.institution));
    }
    if !beneficiary.account_identifier.is_empty() {
        line.push_str(&format!(" ({})", beneficiary.account_identifier));
    }
    line
}

#[async_trait]
impl FlowHandler for OfframpFlow {
    fn flow_name(&self) -> &'static str {
        FLOW
    }

    fn init(&self, version: &str) -> FlowResponse {
        FlowResponse::new(
            version,
            Screen::AmountInput.as_str(),
            json!({
                "asset_id": "usdc-base",
                "amount_denomination": USD_DENOMINATION,
                "conversion_rate": "1600",
                "fee": "0.01",
                "currency": "NGN",
                "user_id": "",
                "beneficiary": {
                    "id": "preview",
                    "name": "Jane Doe",
                    "institution": "Preview Bank",
                    "account_identifier": "0123456789"
                },
                "balance": "Balance: 100.00 USDC"
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
            Screen::AmountInput => {
                let input: AmountInput = parse_data(screen.as_str(), data)?;
                Ok(self.amount_input(version, input))
            }
            Screen::TransactionSummary => {
                let input: SummaryInput = parse_data(screen.as_str(), data)?;
                Ok(self.transaction_summary(version, input.transaction_details).await)
            }
        }
    }
}
