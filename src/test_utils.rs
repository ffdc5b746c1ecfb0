// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory collaborators for unit tests.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use redb::{backends::InMemoryBackend, StorageBackend};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::providers::{
    BankInfo, MobileProvider, Messenger, OfframpOrder, OfframpReceipt, OnChainStatus,
    OnChainTransaction, OnrampInstruction, OnrampOrder, ProviderError, Quote, RampProvider,
    RampRoute, RampStatus, TokenTransfer, TransferReceipt, UserDirectory, UserProfile,
    VerifiedIdentity, WalletProvider,
};

pub const TEST_USER_ID: &str = "user-1";
pub const TEST_PHONE: &str = "2348000000000";
pub const TEST_EVM_WALLET: &str = "0x742d35Cc6634C0532925a3b844Bc9e7595f4aB12";
pub const TEST_SOLANA_WALLET: &str = "GokivDYuQXPZCWRkwMhdH2h91KpDQXBEmpgBgs55bnpH";
pub const TEST_HOT_WALLET: &str = "0x00000000000000000000000000000000000000aa";

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Wallet
// =============================================================================

pub struct MockWallet {
    balance: Mutex<Result<String, String>>,
    transfer_status: Mutex<Result<OnChainStatus, String>>,
    transfers: Mutex<Vec<TokenTransfer>>,
    /// Polls pop from the front; the last entry repeats.
    transactions: Mutex<VecDeque<OnChainTransaction>>,
    polls: Mutex<usize>,
}

impl MockWallet {
    pub fn new() -> Self {
        Self {
            balance: Mutex::new(Ok("0".to_string())),
            transfer_status: Mutex::new(Ok(OnChainStatus::Submitted)),
            transfers: Mutex::new(Vec::new()),
            transactions: Mutex::new(VecDeque::from([OnChainTransaction {
                status: OnChainStatus::Pending,
                transaction_hash: None,
            }])),
            polls: Mutex::new(0),
        }
    }

    pub fn with_balance(balance: &str) -> Self {
        let wallet = Self::new();
        wallet.set_balance(balance);
        wallet
    }

    pub fn set_balance(&self, balance: &str) {
        *lock(&self.balance) = Ok(balance.to_string());
    }

    pub fn fail_balance(&self, reason: &str) {
        *lock(&self.balance) = Err(reason.to_string());
    }

    pub fn set_transfer_status(&self, status: OnChainStatus) {
        *lock(&self.transfer_status) = Ok(status);
    }

    pub fn fail_transfers(&self, reason: &str) {
        *lock(&self.transfer_status) = Err(reason.to_string());
    }

    pub fn script_transactions(&self, script: Vec<OnChainTransaction>) {
        *lock(&self.transactions) = script.into();
    }

    pub fn transfers(&self) -> Vec<TokenTransfer> {
        lock(&self.transfers).clone()
    }

    pub fn transaction_polls(&self) -> usize {
        *lock(&self.polls)
    }
}

#[async_trait]
impl WalletProvider for MockWallet {
    async fn get_balance(
        &self,
        _wallet: &str,
        _network: &str,
        _token: &str,
    ) -> Result<String, ProviderError> {
        lock(&self.balance).clone().map_err(ProviderError::Request)
    }

    async fn transfer_token(
        &self,
        transfer: &TokenTransfer,
    ) -> Result<TransferReceipt, ProviderError> {
        let status = lock(&self.transfer_status)
            .clone()
            .map_err(ProviderError::Request)?;
        let mut transfers = lock(&self.transfers);
        transfers.push(transfer.clone());
        Ok(TransferReceipt {
            transaction_id: format!("tx-{}", transfers.len()),
            status,
        })
    }

    async fn get_transaction(
        &self,
        _transaction_id: &str,
    ) -> Result<OnChainTransaction, ProviderError> {
        *lock(&self.polls) += 1;
        let mut script = lock(&self.transactions);
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        next.ok_or_else(|| ProviderError::NotFound("transaction".to_string()))
    }
}

// =============================================================================
// Ramp
// =============================================================================

pub struct MockRamp {
    quote: Mutex<Result<Quote, String>>,
    providers: Mutex<Vec<MobileProvider>>,
    onramp: Mutex<Result<OnrampInstruction, String>>,
    offramp_failure: Mutex<Option<String>>,
    status: Mutex<Result<RampStatus, String>>,
    onramp_orders: Mutex<Vec<OnrampOrder>>,
    offramp_orders: Mutex<Vec<OfframpOrder>>,
    status_queries: Mutex<Vec<(String, RampRoute)>>,
}

impl MockRamp {
    pub fn new() -> Self {
        Self {
            quote: Mutex::new(Ok(Quote {
                rate: Decimal::from(1600),
                fee: Decimal::new(1, 2),
            })),
            providers: Mutex::new(vec![MobileProvider {
                id: "mtn".to_string(),
                name: "MTN".to_string(),
            }]),
            onramp: Mutex::new(Ok(OnrampInstruction {
                bank_info: Some(BankInfo {
                    bank_name: "Test Bank".to_string(),
                    account_number: "0123456789".to_string(),
                    account_name: "Ramp Collections".to_string(),
                }),
                sequence_id: "seq-1".to_string(),
                amount: Decimal::new(8080000, 2),
            })),
            offramp_failure: Mutex::new(None),
            status: Mutex::new(Ok(RampStatus::Pending)),
            onramp_orders: Mutex::new(Vec::new()),
            offramp_orders: Mutex::new(Vec::new()),
            status_queries: Mutex::new(Vec::new()),
        }
    }

    pub fn set_quote(&self, rate: Decimal, fee: Decimal) {
        *lock(&self.quote) = Ok(Quote { rate, fee });
    }

    pub fn fail_quote(&self, reason: &str) {
        *lock(&self.quote) = Err(reason.to_string());
    }

    pub fn fail_onramp(&self, reason: &str) {
        *lock(&self.onramp) = Err(reason.to_string());
    }

    pub fn fail_offramp(&self, reason: &str) {
        *lock(&self.offramp_failure) = Some(reason.to_string());
    }

    pub fn set_status(&self, status: RampStatus) {
        *lock(&self.status) = Ok(status);
    }

    pub fn fail_status(&self, reason: &str) {
        *lock(&self.status) = Err(reason.to_string());
    }

    pub fn onramp_orders(&self) -> Vec<OnrampOrder> {
        lock(&self.onramp_orders).clone()
    }

    pub fn offramp_orders(&self) -> Vec<OfframpOrder> {
        lock(&self.offramp_orders).clone()
    }

    pub fn status_queries(&self) -> Vec<(String, RampRoute)> {
        lock(&self.status_queries).clone()
    }
}

#[async_trait]
impl RampProvider for MockRamp {
    async fn get_quote(
        &self,
        _currency: &str,
        _country: &str,
        _route: RampRoute,
    ) -> Result<Quote, ProviderError> {
        lock(&self.quote).clone().map_err(ProviderError::Request)
    }

    async fn supported_mobile_providers(
        &self,
        _channel_id: &str,
    ) -> Result<Vec<MobileProvider>, ProviderError> {
        Ok(lock(&self.providers).clone())
    }

    async fn post_onramp(&self, order: &OnrampOrder) -> Result<OnrampInstruction, ProviderError> {
        let instruction = lock(&self.onramp).clone().map_err(ProviderError::Request)?;
        lock(&self.onramp_orders).push(order.clone());
        Ok(instruction)
    }

    async fn post_offramp(&self, order: &OfframpOrder) -> Result<OfframpReceipt, ProviderError> {
        if let Some(reason) = lock(&self.offramp_failure).clone() {
            return Err(ProviderError::Request(reason));
        }
        let mut orders = lock(&self.offramp_orders);
        orders.push(order.clone());
        Ok(OfframpReceipt {
            sequence_id: format!("off-{}", orders.len()),
        })
    }

    async fn transaction_status(
        &self,
        sequence_id: &str,
        route: RampRoute,
    ) -> Result<RampStatus, ProviderError> {
        lock(&self.status_queries).push((sequence_id.to_string(), route));
        lock(&self.status).clone().map_err(ProviderError::Request)
    }
}

// =============================================================================
// Users
// =============================================================================

pub struct MockUsers {
    users: Mutex<HashMap<String, UserProfile>>,
    identities: Mutex<HashMap<String, VerifiedIdentity>>,
}

impl MockUsers {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            identities: Mutex::new(HashMap::new()),
        }
    }

    /// One user (`TEST_USER_ID`) with both wallets and a verified identity.
    pub fn verified() -> Self {
        let users = Self::new();
        users.add_user(test_user());
        users.verify(TEST_USER_ID);
        users
    }

    /// One user without KYC.
    pub fn unverified() -> Self {
        let users = Self::new();
        users.add_user(test_user());
        users
    }

    pub fn add_user(&self, user: UserProfile) {
        lock(&self.users).insert(user.user_id.clone(), user);
    }

    pub fn verify(&self, user_id: &str) {
        lock(&self.identities).insert(
            user_id.to_string(),
            VerifiedIdentity {
                first_name: "Ada".to_string(),
                last_name: "Obi".to_string(),
                email: Some("ada@example.com".to_string()),
                id_number: None,
            },
        );
    }
}

pub fn test_user() -> UserProfile {
    UserProfile {
        user_id: TEST_USER_ID.to_string(),
        phone_number: TEST_PHONE.to_string(),
        evm_wallet_address: TEST_EVM_WALLET.to_string(),
        solana_wallet_address: Some(TEST_SOLANA_WALLET.to_string()),
    }
}

#[async_trait]
impl UserDirectory for MockUsers {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserProfile>, ProviderError> {
        Ok(lock(&self.users).get(user_id).cloned())
    }

    async fn identity(&self, user_id: &str) -> Result<Option<VerifiedIdentity>, ProviderError> {
        Ok(lock(&self.identities).get(user_id).cloned())
    }
}

// =============================================================================
// Messaging
// =============================================================================

pub struct MockMessenger {
    sent: Mutex<Vec<Value>>,
    failure: Mutex<Option<String>>,
}

impl MockMessenger {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
        }
    }

    pub fn fail_sends(&self, reason: &str) {
        *lock(&self.failure) = Some(reason.to_string());
    }

    pub fn sent(&self) -> Vec<Value> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl Messenger for MockMessenger {
    async fn send(&self, message: Value) -> Result<(), ProviderError> {
        if let Some(reason) = lock(&self.failure).clone() {
            return Err(ProviderError::Request(reason));
        }
        lock(&self.sent).push(message);
        Ok(())
    }
}

// =============================================================================
// Job store backend
// =============================================================================

/// In-memory redb storage whose writes start failing once `fail_writes` is set.
#[derive(Debug, Default)]
pub struct FlakyBackend {
    inner: InMemoryBackend,
    fail_writes: Arc<AtomicBool>,
}

impl FlakyBackend {
    pub fn new() -> (Self, Arc<AtomicBool>) {
        let backend = Self::default();
        let switch = backend.fail_writes.clone();
        (backend, switch)
    }

    fn check(&self) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(io::Error::other("disk unavailable"))
        } else {
            Ok(())
        }
    }
}

impl StorageBackend for FlakyBackend {
    fn len(&self) -> io::Result<u64> {
        StorageBackend::len(&self.inner)
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> io::Result<()> {
        StorageBackend::read(&self.inner, offset, out)
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        self.check()?;
        StorageBackend::set_len(&self.inner, len)
    }

    fn sync_data(&self) -> io::Result<()> {
        self.check()?;
        StorageBackend::sync_data(&self.inner)
    }

    fn write(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.check()?;
        StorageBackend::write(&self.inner, offset, data)
    }
}
