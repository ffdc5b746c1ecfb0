// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Onramp: buy tokens with a bank transfer or mobile money.
//!
//! ```text
//! TRANSACTION_DETAILS -> TRANSACTION_SUMMARY -> BANK_PAYMENT -> PROCESSING_FEEDBACK | ERROR_FEEDBACK
//!                                            \-> MOMO_PAYMENT -> PROCESSING_FEEDBACK | ERROR_FEEDBACK
//! ```
//!
//! Tokens go to the user's own wallet unless the details screen supplied a
//! `wallet_address`, in which case they are bought to that external wallet.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::{
    failed, parse_data, processing, provider_failure, string_or_number, FlowError, FlowHandler,
    FlowResponse, GENERIC_FAILURE_MESSAGE,
};
use crate::amounts::{fixed, parse_amount, round};
use crate::assets::{find_asset, Asset};
use crate::providers::{
    Messenger, OnrampChannel, OnrampOrder, RampProvider, RampRoute, RampStatus, UserDirectory,
    UserProfile, VerifiedIdentity,
};

const FLOW: &str = "onramp";

const KYC_REQUIRED_MESSAGE: &str =
    "Please verify your identity before buying crypto. Send \"verify\" to get started.";
const MISSING_WALLET_MESSAGE: &str =
    "Please enter the wallet address you want to receive your crypto in.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    TransactionDetails,
    TransactionSummary,
    BankPayment,
    MomoPayment,
}

impl Screen {
    fn as_str(self) -> &'static str {
        match self {
            Screen::TransactionDetails => "TRANSACTION_DETAILS",
            Screen::TransactionSummary => "TRANSACTION_SUMMARY",
            Screen::BankPayment => "BANK_PAYMENT",
            Screen::MomoPayment => "MOMO_PAYMENT",
        }
    }
}

impl FromStr for Screen {
    type Err = FlowError;

    fn from_str(screen: &str) -> Result<Self, Self::Err> {
        match screen {
            "TRANSACTION_DETAILS" => Ok(Screen::TransactionDetails),
            "TRANSACTION_SUMMARY" => Ok(Screen::TransactionSummary),
            "BANK_PAYMENT" => Ok(Screen::BankPayment),
            "MOMO_PAYMENT" => Ok(Screen::MomoPayment),
            other => Err(FlowError::UnhandledScreen(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Bank,
    MobileMoney,
}

impl AccountType {
    /// Bank channels are recognised by their title.
    fn from_title(title: &str) -> Self {
        if title.to_ascii_lowercase().contains("bank") {
            AccountType::Bank
        } else {
            AccountType::MobileMoney
        }
    }
}

/// One entry of the server-supplied payment method list.
#[derive(Debug, Clone, Deserialize)]
struct PaymentMethod {
    id: String,
    title: String,
    #[serde(default)]
    channel_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailsInput {
    #[serde(deserialize_with = "string_or_number")]
    amount: String,
    asset_id: String,
    user_id: String,
    currency: String,
    country: String,
    payment_method: String,
    #[serde(default)]
    payment_methods: Vec<PaymentMethod>,
    #[serde(default)]
    wallet_address: Option<String>,
}

/// State carried through every screen after `TRANSACTION_DETAILS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnrampDetails {
    pub asset_id: String,
    pub user_id: String,
    pub currency: String,
    pub country: String,
    pub account_type: AccountType,
    pub channel_id: String,
    pub conversion_rate: String,
    pub usd_amount: String,
    pub fee: String,
    pub total_usd: String,
    pub fiat_amount: String,
    pub buying_to_external_wallet: bool,
    #[serde(default)]
    pub wallet_address: String,
}

#[derive(Debug, Deserialize)]
struct SummaryInput {
    transaction_details: OnrampDetails,
}

#[derive(Debug, Deserialize)]
struct BankPaymentInput {
    sequence_id: String,
}

#[derive(Debug, Deserialize)]
struct MomoPaymentInput {
    #[serde(default)]
    provider_id: String,
    #[serde(default)]
    phone_number: String,
    transaction_details: OnrampDetails,
}

/// Fee and totals for an onramp of `usd_amount` tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnrampQuote {
    pub usd_amount: Decimal,
    pub fee: Decimal,
    pub total_usd: Decimal,
    pub fiat_amount: Decimal,
}

pub fn quote_onramp(usd_amount: Decimal, conversion_rate: Decimal, fee_rate: Decimal) -> OnrampQuote {
    let usd_amount = round(usd_amount, 2);
    let fee = round(usd_amount * fee_rate, 3);
    let total_usd = usd_amount + fee;
    OnrampQuote {
        usd_amount,
        fee,
        total_usd,
        fiat_amount: round(total_usd * conversion_rate, 2),
    }
}

pub struct OnrampFlow {
    ramp: Arc<dyn RampProvider>,
    users: Arc<dyn UserDirectory>,
    messenger: Arc<dyn Messenger>,
}

impl OnrampFlow {
    pub fn new(
        ramp: Arc<dyn RampProvider>,
        users: Arc<dyn UserDirectory>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            ramp,
            users,
            messenger,
        }
    }

    async fn transaction_details(&self, version: &str, input: DetailsInput) -> FlowResponse {
        let Some(asset) = find_asset(&input.asset_id) else {
            return failed(version, "This asset is not supported.");
        };
        let Some(method) = input
            .payment_methods
            .iter()
            .find(|method| method.id == input.payment_method)
        else {
            warn!(
                flow = FLOW,
                payment_method = %input.payment_method,
                "Unknown payment method selected"
            );
            return failed(version, "Please choose one of the listed payment methods.");
        };
        let account_type = AccountType::from_title(&method.title);

        let amount = match parse_amount("amount", &input.amount) {
            Ok(amount) if amount > Decimal::ZERO => amount,
            _ => return failed(version, "Enter an amount greater than zero."),
        };

        let currency = input.currency.trim().to_ascii_uppercase();
        let country = input.country.trim().to_ascii_uppercase();
        let quote = match self
            .ramp
            .get_quote(&currency, &country, RampRoute::Onramp)
            .await
        {
            Ok(quote) => quote,
            Err(e) => return provider_failure(version, FLOW, "quote", &e),
        };
        let totals = quote_onramp(amount, quote.rate, quote.fee);

        let wallet_address = input
            .wallet_address
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        let details = OnrampDetails {
            asset_id: asset.id.to_string(),
            user_id: input.user_id,
            currency: currency.clone(),
            country,
            account_type,
            channel_id: method.channel_id.clone().unwrap_or_else(|| method.id.clone()),
            conversion_rate: quote.rate.normalize().to_string(),
            usd_amount: fixed(totals.usd_amount, 2),
            fee: fixed(totals.fee, 3),
            total_usd: fixed(totals.total_usd, 2),
            fiat_amount: fixed(totals.fiat_amount, 2),
            buying_to_external_wallet: !wallet_address.is_empty(),
            wallet_address,
        };

        let token = asset.token_name;
        FlowResponse::new(
            version,
            Screen::TransactionSummary.as_str(),
            json!({
                "amount_display": format!("{} {token}", details.usd_amount),
                "fee_display": format!("{} {token}", details.fee),
                "total_display": format!("{} {currency}", details.fiat_amount),
                "rate_display": format!("1 {token} = {} {currency}", details.conversion_rate),
                "payment_method_display": method.title,
                "network_display": asset.chain_name,
                "transaction_details": details,
            }),
        )
    }

    async fn transaction_summary(&self, version: &str, details: OnrampDetails) -> FlowResponse {
        match details.account_type {
            AccountType::MobileMoney => {
                let providers = match self
                    .ramp
                    .supported_mobile_providers(&details.channel_id)
                    .await
                {
                    Ok(providers) => providers,
                    Err(e) => return provider_failure(version, FLOW, "mobile providers", &e),
                };
                if providers.is_empty() {
                    return failed(
                        version,
                        "Mobile money is not available for this currency right now.",
                    );
                }
                let options: Vec<Value> = providers
                    .iter()
                    .map(|provider| json!({ "id": provider.id, "title": provider.name }))
                    .collect();
                FlowResponse::new(
                    version,
                    Screen::MomoPayment.as_str(),
                    json!({
                        "providers": options,
                        "amount_display": format!("{} {}", details.fiat_amount, details.currency),
                        "transaction_details": details,
                    }),
                )
            }
            AccountType::Bank => self.bank_instructions(version, details).await,
        }
    }

    async fn bank_instructions(&self, version: &str, details: OnrampDetails) -> FlowResponse {
        let Some(asset) = find_asset(&details.asset_id) else {
            return failed(version, "This asset is not supported.");
        };
        let prepared = match self.prepare_order(version, asset, &details).await {
            Ok(prepared) => prepared,
            Err(response) => return response,
        };

        let channel = OnrampChannel::Bank {
            channel_id: details.channel_id.clone(),
        };
        let order = build_order(asset, &details, prepared.destination, channel, prepared.identity);
        let instruction = match self.ramp.post_onramp(&order).await {
            Ok(instruction) => instruction,
            Err(e) => return provider_failure(version, FLOW, "create bank onramp", &e),
        };
        let Some(bank) = instruction.bank_info else {
            error!(
                flow = FLOW,
                sequence_id = %instruction.sequence_id,
                "Bank onramp created without deposit details"
            );
            return failed(version, GENERIC_FAILURE_MESSAGE);
        };

        info!(
            flow = FLOW,
            user_id = %details.user_id,
            sequence_id = %instruction.sequence_id,
            "Bank onramp created"
        );
        FlowResponse::new(
            version,
            Screen::BankPayment.as_str(),
            json!({
                "bank_name": bank.bank_name,
                "account_number": bank.account_number,
                "account_name": bank.account_name,
                "amount_due": format!("{} {}", fixed(instruction.amount, 2), details.currency),
                "sequence_id": instruction.sequence_id,
                "transaction_details": details,
            }),
        )
    }

    /// One status check after the user says they have paid.
    async fn bank_payment(&self, version: &str, input: BankPaymentInput) -> FlowResponse {
        match self
            .ramp
            .transaction_status(&input.sequence_id, RampRoute::Onramp)
            .await
        {
            Ok(RampStatus::Completed) => processing(
                version,
                "success",
                "Payment received. Your crypto is on its way to your wallet.",
            ),
            Ok(RampStatus::Pending) => processing(
                version,
                "processing",
                "We are waiting for your bank transfer. We will message you once it arrives.",
            ),
            Ok(RampStatus::Failed) => {
                warn!(flow = FLOW, sequence_id = %input.sequence_id, "Bank onramp failed");
                failed(
                    version,
                    "Your payment could not be processed. Please contact support if you were debited.",
                )
            }
            Err(e) => provider_failure(version, FLOW, "bank payment status", &e),
        }
    }

    async fn momo_payment(&self, version: &str, input: MomoPaymentInput) -> FlowResponse {
        let details = input.transaction_details;
        let provider_id = input.provider_id.trim();
        let phone_number = input.phone_number.trim();
        if provider_id.is_empty() || phone_number.is_empty() {
            return failed(
                version,
                "Please choose a mobile money provider and enter your phone number.",
            );
        }
        let Some(asset) = find_asset(&details.asset_id) else {
            return failed(version, "This asset is not supported.");
        };
        let prepared = match self.prepare_order(version, asset, &details).await {
            Ok(prepared) => prepared,
            Err(response) => return response,
        };

        let channel = OnrampChannel::MobileMoney {
            channel_id: details.channel_id.clone(),
            provider_id: provider_id.to_string(),
            phone_number: phone_number.to_string(),
        };
        let order = build_order(asset, &details, prepared.destination, channel, prepared.identity);
        let instruction = match self.ramp.post_onramp(&order).await {
            Ok(instruction) => instruction,
            Err(e) => return provider_failure(version, FLOW, "create mobile money onramp", &e),
        };

        info!(
            flow = FLOW,
            user_id = %details.user_id,
            sequence_id = %instruction.sequence_id,
            "Mobile money onramp created"
        );

        let amount_due = format!("{} {}", fixed(instruction.amount, 2), details.currency);
        let notice = format!(
            "A payment prompt for {amount_due} has been sent to {phone_number}. Approve it to complete your purchase of {} {}.\nReference: {}",
            details.usd_amount, asset.token_name, instruction.sequence_id
        );
        if let Err(e) = self.messenger.send_text(&prepared.user.phone_number, &notice).await {
            warn!(
                flow = FLOW,
                sequence_id = %instruction.sequence_id,
                error = %e,
                "Failed to send mobile money prompt notice"
            );
        }

        processing(
            version,
            "processing",
            format!("Approve the payment prompt on {phone_number} to pay {amount_due}."),
        )
    }

    /// Destination wallet and KYC identity for an order. Validation failures
    /// come back as the screen to render.
    async fn prepare_order(
        &self,
        version: &str,
        asset: &Asset,
        details: &OnrampDetails,
    ) -> Result<PreparedOrder, FlowResponse> {
        let user = match self.users.find_user(&details.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => return Err(failed(version, "We could not find your account.")),
            Err(e) => return Err(provider_failure(version, FLOW, "user lookup", &e)),
        };

        let destination = if details.buying_to_external_wallet {
            let address = details.wallet_address.trim();
            if address.is_empty() {
                return Err(failed(version, MISSING_WALLET_MESSAGE));
            }
            if !asset.family.is_valid_address(address) {
                return Err(failed(
                    version,
                    format!(
                        "{address} is not a valid {} wallet address. Please check it and try again.",
                        asset.family.label()
                    ),
                ));
            }
            address.to_string()
        } else {
            match user.wallet_for(asset.family) {
                Some(wallet) => wallet.to_string(),
                None => {
                    return Err(failed(
                        version,
                        format!("You do not have a {} wallet yet.", asset.family.label()),
                    ))
                }
            }
        };

        let identity = match self.users.identity(&details.user_id).await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                info!(flow = FLOW, user_id = %details.user_id, "Onramp blocked until KYC");
                return Err(failed(version, KYC_REQUIRED_MESSAGE));
            }
            Err(e) => return Err(provider_failure(version, FLOW, "identity lookup", &e)),
        };

        Ok(PreparedOrder {
            user,
            destination,
            identity,
        })
    }
}

struct PreparedOrder {
    user: UserProfile,
    destination: String,
    identity: VerifiedIdentity,
}

fn build_order(
    asset: &Asset,
    details: &OnrampDetails,
    destination: String,
    channel: OnrampChannel,
    customer: VerifiedIdentity,
) -> OnrampOrder {
    OnrampOrder {
        user_id: details.user_id.clone(),
        asset_id: asset.id.to_string(),
        chain_name: asset.chain_name.to_string(),
        token_name: asset.token_name.to_string(),
        destination_wallet: destination,
        usd_amount: details.usd_amount.clone(),
        local_amount: details.fiat_amount.clone(),
        currency: details.currency.clone(),
        country: details.country.clone(),
        channel,
        customer,
    }
}

#[async_trait]
impl FlowHandler for OnrampFlow {
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
                "currency": "NGN",
                "country": "NG",
                "payment_methods": [
                    { "id": "bank-ng", "title": "Bank Transfer" },
                    { "id": "momo-ng", "title": "Mobile Money" }
                ]
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
        let response = match screen {
            Screen::TransactionDetails => {
                let input: DetailsInput = parse_data(screen.as_str(), data)?;
                self.transaction_details(version, input).await
            }
            Screen::TransactionSummary => {
                let input: SummaryInput = parse_data(screen.as_str(), data)?;
                self.transaction_summary(version, input.transaction_details)
                    .await
            }
            Screen::BankPayment => {
                let input: BankPaymentInput = parse_data(screen.as_str(), data)?;
                self.bank_payment(version, input).await
            }
            Screen::MomoPayment => {
                let input: MomoPaymentInput = parse_data(screen.as_str(), data)?;
                self.momo_payment(version, input).await
            }
        };
        Ok(response)
    }
}
