// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Supported assets and chain address validation.
//!
//! Flows identify an asset by a `<token>-<chain>` id such as `usdc-base`. The
//! registry resolves that id to the network name the wallet custody API
//! expects, the token contract and the chain family used to validate
//! destination addresses.

use std::str::FromStr;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

/// Address format family of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Evm,
    Solana,
}

impl ChainFamily {
    pub fn label(self) -> &'static str {
        match self {
            ChainFamily::Evm => "EVM",
            ChainFamily::Solana => "Solana",
        }
    }

    /// Syntactic address check for this family.
    pub fn is_valid_address(self, address: &str) -> bool {
        let address = address.trim();
        match self {
            ChainFamily::Evm => {
                address.len() == 42 && address.starts_with("0x") && Address::from_str(address).is_ok()
            }
            ChainFamily::Solana => bs58::decode(address)
                .into_vec()
                .map(|bytes| bytes.len() == 32)
                .unwrap_or(false),
        }
    }
}

/// A token on a specific chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub id: &'static str,
    /// Token symbol shown to users.
    pub token_name: &'static str,
    /// Network name understood by the wallet custody API.
    pub chain_name: &'static str,
    pub token_address: &'static str,
    pub family: ChainFamily,
    pub decimals: u8,
}

pub const USDC_BASE: Asset = Asset {
    id: "usdc-base",
    token_name: "USDC",
    chain_name: "base",
    token_address: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
    family: ChainFamily::Evm,
    decimals: 6,
};

pub const USDC_ETHEREUM: Asset = Asset {
    id: "usdc-ethereum",
    token_name: "USDC",
    chain_name: "ethereum",
    token_address: "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
    family: ChainFamily::Evm,
    decimals: 6,
};

pub const USDC_POLYGON: Asset = Asset {
    id: "usdc-polygon",
    token_name: "USDC",
    chain_name: "polygon",
    token_address: "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359",
    family: ChainFamily::Evm,
    decimals: 6,
};

pub const USDC_ARBITRUM: Asset = Asset {
    id: "usdc-arbitrum",
    token_name: "USDC",
    chain_name: "arbitrum",
    token_address: "0xaf88d065e77c8cC2239327C5EDb3A432268e5831",
    family: ChainFamily::Evm,
    decimals: 6,
};

pub const USDT_POLYGON: Asset = Asset {
    id: "usdt-polygon",
    token_name: "USDT",
    chain_name: "polygon",
    token_address: "0xc2132D05D31c914a87C6611C10748AEb04B58e8F",
    family: ChainFamily::Evm,
    decimals: 6,
};

pub const USDC_SOLANA: Asset = Asset {
    id: "usdc-solana",
    token_name: "USDC",
    chain_name: "solana",
    token_address: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
    family: ChainFamily::Solana,
    decimals: 6,
};

pub const SUPPORTED_ASSETS: [Asset; 6] = [
    USDC_BASE,
    USDC_ETHEREUM,
    USDC_POLYGON,
    USDC_ARBITRUM,
    USDT_POLYGON,
    USDC_SOLANA,
];

/// Resolve an asset id, case-insensitively.
pub fn find_asset(asset_id: &str) -> Option<&'static Asset> {
    let wanted = asset_id.trim();
    SUPPORTED_ASSETS
        .iter()
        .find(|asset| asset.id.eq_ignore_ascii_case(wanted))
}
