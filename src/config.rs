// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! throughout the application. Configuration is loaded from the environment
//! once at startup into [`AppConfig`].
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory holding the watcher job database | `/data` |
//! | `FLOW_PRIVATE_KEY_PEM` | RSA private key for Flow envelopes (PEM, `\n` escaped allowed) | Required (or `_PATH`) |
//! | `FLOW_PRIVATE_KEY_PATH` | Path to the RSA private key PEM file | Required (or `_PEM`) |
//! | `FLOW_PRIVATE_KEY_PASSPHRASE` | Passphrase for an encrypted PKCS#8 key | Optional |
//! | `WHATSAPP_APP_SECRET` | App secret for `X-Hub-Signature-256` verification | Optional |
//! | `WHATSAPP_ACCESS_TOKEN` | Cloud API bearer token | Required |
//! | `WHATSAPP_PHONE_NUMBER_ID` | Business phone number id used to send messages | Required |
//! | `WHATSAPP_API_BASE_URL` | Graph API base URL | `https://graph.facebook.com/v21.0` |
//! | `BENEFICIARY_FLOW_ID` | Flow id of the add-beneficiary flow | Optional |
//! | `WALLET_API_BASE_URL` / `WALLET_API_KEY` | Wallet custody API | Required |
//! | `RAMP_API_BASE_URL` / `RAMP_API_KEY` | Fiat ramp API | Required |
//! | `USER_API_BASE_URL` / `USER_API_KEY` | User directory / KYC API | Required |
//! | `RAMP_HOT_WALLET_ADDRESS` | Ramp provider wallet receiving offramp funds | Required |
//! | `TRANSFER_FEE_ENABLED` | Charge a flat fee on wallet transfers | `false` |
//! | `TRANSFER_FEE` | Flat transfer fee in asset units | `0` |
//! | `TRANSFER_FEE_WALLET_ADDRESS` | Wallet collecting transfer fees | Optional |
//! | `WATCHER_POLL_INTERVAL_SECS` | Delay between settlement polls | `10` |
//! | `WATCHER_MAX_ATTEMPTS` | Polls before a job is dead-lettered | `360` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::{fs, path::PathBuf, str::FromStr, time::Duration};

use rust_decimal::Decimal;

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";

/// Environment variable name for the data directory path.
///
/// The watcher keeps its `jobs.redb` checkpoint database here.
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const DEFAULT_DATA_DIR: &str = "/data";

pub const FLOW_PRIVATE_KEY_PEM_ENV: &str = "FLOW_PRIVATE_KEY_PEM";
pub const FLOW_PRIVATE_KEY_PATH_ENV: &str = "FLOW_PRIVATE_KEY_PATH";
pub const FLOW_PRIVATE_KEY_PASSPHRASE_ENV: &str = "FLOW_PRIVATE_KEY_PASSPHRASE";

pub const WHATSAPP_APP_SECRET_ENV: &str = "WHATSAPP_APP_SECRET";
pub const WHATSAPP_ACCESS_TOKEN_ENV: &str = "WHATSAPP_ACCESS_TOKEN";
pub const WHATSAPP_PHONE_NUMBER_ID_ENV: &str = "WHATSAPP_PHONE_NUMBER_ID";
pub const WHATSAPP_API_BASE_URL_ENV: &str = "WHATSAPP_API_BASE_URL";
pub const DEFAULT_WHATSAPP_API_BASE_URL: &str = "https://graph.facebook.com/v21.0";
pub const BENEFICIARY_FLOW_ID_ENV: &str = "BENEFICIARY_FLOW_ID";

pub const WALLET_API_BASE_URL_ENV: &str = "WALLET_API_BASE_URL";
pub const WALLET_API_KEY_ENV: &str = "WALLET_API_KEY";
pub const RAMP_API_BASE_URL_ENV: &str = "RAMP_API_BASE_URL";
pub const RAMP_API_KEY_ENV: &str = "RAMP_API_KEY";
pub const USER_API_BASE_URL_ENV: &str = "USER_API_BASE_URL";
pub const USER_API_KEY_ENV: &str = "USER_API_KEY";

pub const RAMP_HOT_WALLET_ADDRESS_ENV: &str = "RAMP_HOT_WALLET_ADDRESS";
pub const TRANSFER_FEE_ENABLED_ENV: &str = "TRANSFER_FEE_ENABLED";
pub const TRANSFER_FEE_ENV: &str = "TRANSFER_FEE";
pub const TRANSFER_FEE_WALLET_ADDRESS_ENV: &str = "TRANSFER_FEE_WALLET_ADDRESS";

pub const WATCHER_POLL_INTERVAL_SECS_ENV: &str = "WATCHER_POLL_INTERVAL_SECS";
pub const WATCHER_MAX_ATTEMPTS_ENV: &str = "WATCHER_MAX_ATTEMPTS";
pub const DEFAULT_WATCHER_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_WATCHER_MAX_ATTEMPTS: u32 = 360;

pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(String),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },

    #[error("failed to read {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

/// Credentials and base URL for one upstream HTTP API.
#[derive(Debug, Clone)]
pub struct ServiceEndpoint {
    pub base_url: String,
    pub api_key: String,
}

/// Transfer-to-wallet fee settings.
#[derive(Debug, Clone, Default)]
pub struct TransferFeeConfig {
    pub enabled: bool,
    /// Flat fee in asset units.
    pub amount: Decimal,
    pub collector_address: Option<String>,
}

impl TransferFeeConfig {
    /// The fee actually charged, zero when disabled.
    pub fn charged(&self) -> Decimal {
        if self.enabled {
            self.amount
        } else {
            Decimal::ZERO
        }
    }
}

/// Everything the WhatsApp side needs.
#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub api_base_url: String,
    pub access_token: String,
    pub phone_number_id: String,
    pub app_secret: Option<String>,
    pub beneficiary_flow_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub flow_private_key_pem: String,
    pub flow_private_key_passphrase: Option<String>,
    pub whatsapp: WhatsAppConfig,
    pub wallet_api: ServiceEndpoint,
    pub ramp_api: ServiceEndpoint,
    pub user_api: ServiceEndpoint,
    pub hot_wallet_address: String,
    pub transfer_fee: TransferFeeConfig,
    pub watcher_poll_interval: Duration,
    pub watcher_max_attempts: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = env_or_default(PORT_ENV, "8080")
            .parse::<u16>()
            .map_err(|e| invalid(PORT_ENV, e))?;

        let transfer_fee = TransferFeeConfig {
            enabled: parse_bool(&env_or_default(TRANSFER_FEE_ENABLED_ENV, "false")),
            amount: Decimal::from_str(&env_or_default(TRANSFER_FEE_ENV, "0"))
                .map_err(|e| invalid(TRANSFER_FEE_ENV, e))?,
            collector_address: env_optional(TRANSFER_FEE_WALLET_ADDRESS_ENV),
        };
        if transfer_fee.amount.is_sign_negative() {
            return Err(invalid(TRANSFER_FEE_ENV, "fee must not be negative"));
        }

        let poll_secs = env_or_default(WATCHER_POLL_INTERVAL_SECS_ENV, "10")
            .parse::<u64>()
            .map_err(|e| invalid(WATCHER_POLL_INTERVAL_SECS_ENV, e))?;
        let watcher_max_attempts = env_or_default(WATCHER_MAX_ATTEMPTS_ENV, "360")
            .parse::<u32>()
            .map_err(|e| invalid(WATCHER_MAX_ATTEMPTS_ENV, e))?;

        Ok(Self {
            host: env_or_default(HOST_ENV, "0.0.0.0"),
            port,
            data_dir: PathBuf::from(env_or_default(DATA_DIR_ENV, DEFAULT_DATA_DIR)),
            flow_private_key_pem: load_private_key_pem()?,
            flow_private_key_passphrase: env_optional(FLOW_PRIVATE_KEY_PASSPHRASE_ENV),
            whatsapp: WhatsAppConfig {
                api_base_url: env_or_default(
                    WHATSAPP_API_BASE_URL_ENV,
                    DEFAULT_WHATSAPP_API_BASE_URL,
                ),
                access_token: env_required(WHATSAPP_ACCESS_TOKEN_ENV)?,
                phone_number_id: env_required(WHATSAPP_PHONE_NUMBER_ID_ENV)?,
                app_secret: env_optional(WHATSAPP_APP_SECRET_ENV),
                beneficiary_flow_id: env_optional(BENEFICIARY_FLOW_ID_ENV),
            },
            wallet_api: endpoint(WALLET_API_BASE_URL_ENV, WALLET_API_KEY_ENV)?,
            ramp_api: endpoint(RAMP_API_BASE_URL_ENV, RAMP_API_KEY_ENV)?,
            user_api: endpoint(USER_API_BASE_URL_ENV, USER_API_KEY_ENV)?,
            hot_wallet_address: env_required(RAMP_HOT_WALLET_ADDRESS_ENV)?,
            transfer_fee,
            watcher_poll_interval: Duration::from_secs(poll_secs.max(1)),
            watcher_max_attempts,
        })
    }
}

fn endpoint(base_url_env: &str, api_key_env: &str) -> Result<ServiceEndpoint, ConfigError> {
    Ok(ServiceEndpoint {
        base_url: env_required(base_url_env)?,
        api_key: env_required(api_key_env)?,
    })
}

fn invalid(name: &str, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_required(name: &str) -> Result<String, ConfigError> {
    env_optional(name).ok_or_else(|| ConfigError::Missing(name.to_string()))
}

fn env_optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    env_optional(name).unwrap_or_else(|| default.to_string())
}

fn load_private_key_pem() -> Result<String, ConfigError> {
    if let Some(pem) = env_optional(FLOW_PRIVATE_KEY_PEM_ENV) {
        return Ok(pem.replace("\\n", "\n"));
    }

    let path = env_required(FLOW_PRIVATE_KEY_PATH_ENV)?;
    let pem = fs::read_to_string(&path).map_err(|e| ConfigError::Unreadable {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    let trimmed = pem.trim().to_string();
    if trimmed.is_empty() {
        return Err(invalid(
            FLOW_PRIVATE_KEY_PATH_ENV,
            format!("{path} is an empty file"),
        ));
    }
    Ok(trimmed)
}
