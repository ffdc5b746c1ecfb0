// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Settlement Watcher
//!
//! Background jobs that wait for an on-chain transfer to settle, then perform
//! exactly one finalization action and one user notification.
//!
//! ## Strategy
//!
//! Each submitted job runs as its own tokio task:
//! 1. Poll the wallet custody API for the transaction every `poll_interval`.
//! 2. `submitted`/`pending` (or anything unrecognised) reschedules the poll.
//!    A `success` without a transaction hash is also treated as not final.
//! 3. `success` finalizes: offramp jobs report the hash to the ramp provider
//!    so the fiat payout is released; transfer jobs only notify the user.
//! 4. `failed` notifies the user and ends the job.
//!
//! Polls for one job are strictly sequential. After `max_attempts` polls the
//! job is abandoned and dead-lettered for manual follow-up.
//!
//! ## Checkpointing
//!
//! Jobs are written to the [`JobStore`] on submit and removed on a terminal
//! outcome. `resume_pending` re-spawns whatever was in flight at shutdown.
//! If the checkpoint write fails the job is still watched, in memory only.
//!
//! Before an offramp payout is requested the job is marked finalizing. A job
//! found in that state at startup is dead-lettered as
//! [`JobOutcome::PayoutUnconfirmed`] and its payout is never requested again.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken`; a cancelled job stays pending.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{DEFAULT_WATCHER_MAX_ATTEMPTS, DEFAULT_WATCHER_POLL_INTERVAL};
use crate::providers::{
    Messenger, OfframpOrder, OnChainStatus, RampProvider, WalletProvider,
};

pub mod job_store;

pub use job_store::{DeadLetter, FinalizingJob, JobStore, JobStoreError};

pub type JobId = Uuid;

/// How many finished outcomes are remembered for late `on_terminal` callers.
const OUTCOME_CACHE_CAPACITY: usize = 1024;

/// Everything needed to release an offramp payout once the user's tokens
/// reach the ramp provider's hot wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfframpSettlement {
    pub on_chain_transaction_id: String,
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
    pub user_phone_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSettlement {
    pub on_chain_transaction_id: String,
    pub destination: String,
    pub amount: String,
    pub token_name: String,
    pub chain_name: String,
    pub user_phone_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransactionJob {
    Offramp(OfframpSettlement),
    Transfer(TransferSettlement),
}

impl TransactionJob {
    pub fn on_chain_transaction_id(&self) -> &str {
        match self {
            TransactionJob::Offramp(job) => &job.on_chain_transaction_id,
            TransactionJob::Transfer(job) => &job.on_chain_transaction_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TransactionJob::Offramp(_) => "offramp",
            TransactionJob::Transfer(_) => "transfer",
        }
    }

    fn user_phone_number(&self) -> &str {
        match self {
            TransactionJob::Offramp(job) => &job.user_phone_number,
            TransactionJob::Transfer(job) => &job.user_phone_number,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Settled on chain and finalized.
    Settled { transaction_hash: String },
    /// The chain reported the transfer as failed.
    OnChainFailed,
    /// Settled on chain but the ramp provider rejected the payout request.
    FinalizationFailed {
        transaction_hash: String,
        reason: String,
    },
    /// Gave up after the retry budget.
    Abandoned { attempts: u32 },
    /// Interrupted after the payout request may have been sent.
    PayoutUnconfirmed { transaction_hash: String },
}

impl JobOutcome {
    fn needs_follow_up(&self) -> bool {
        matches!(
            self,
            JobOutcome::FinalizationFailed { .. }
                | JobOutcome::Abandoned { .. }
                | JobOutcome::PayoutUnconfirmed { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_WATCHER_POLL_INTERVAL,
            max_attempts: DEFAULT_WATCHER_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("failed to checkpoint job: {0}")]
    Store(#[from] JobStoreError),

    #[error("watcher is shutting down")]
    ShuttingDown,
}

type TerminalCallback = Box<dyn FnOnce(&JobOutcome) + Send>;

struct WatcherInner {
    wallet: Arc<dyn WalletProvider>,
    ramp: Arc<dyn RampProvider>,
    messenger: Arc<dyn Messenger>,
    store: Option<Arc<JobStore>>,
    policy: RetryPolicy,
    shutdown: CancellationToken,
    callbacks: Mutex<HashMap<JobId, Vec<TerminalCallback>>>,
    outcomes: Mutex<LruCache<JobId, JobOutcome>>,
}

/// Handle to the settlement watcher. Cheap to clone.
#[derive(Clone)]
pub struct TransactionWatcher {
    inner: Arc<WatcherInner>,
}

impl TransactionWatcher {
    pub fn new(
        wallet: Arc<dyn WalletProvider>,
        ramp: Arc<dyn RampProvider>,
        messenger: Arc<dyn Messenger>,
        store: Option<Arc<JobStore>>,
        policy: RetryPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        let capacity = NonZeroUsize::new(OUTCOME_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(WatcherInner {
                wallet,
                ramp,
                messenger,
                store,
                policy,
                shutdown,
                callbacks: Mutex::new(HashMap::new()),
                outcomes: Mutex::new(LruCache::new(capacity)),
            }),
        }
    }

    /// Checkpoint a job and start watching it. Returns before the first poll.
    /// A failed checkpoint write is logged and the job is watched in memory only.
    pub fn submit(&self, job: TransactionJob) -> Result<JobId, WatcherError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(WatcherError::ShuttingDown);
        }
        let job_id = Uuid::new_v4();
        let checkpointed = match &self.inner.store {
            Some(store) => match store.insert_pending(job_id, &job) {
                Ok(()) => true,
                Err(e) => {
                    error!(
                        job_id = %job_id,
                        kind = job.kind(),
                        transaction_id = %job.on_chain_transaction_id(),
                        error = %e,
                        "Failed to checkpoint settlement job, watching in memory only"
                    );
                    false
                }
            },
            None => false,
        };

        info!(
            job_id = %job_id,
            kind = job.kind(),
            transaction_id = %job.on_chain_transaction_id(),
            checkpointed,
            "Settlement job submitted"
        );
        self.spawn(job_id, job, checkpointed);
        Ok(job_id)
    }

    /// Re-spawn every checkpointed job. Call once at startup.
    ///
    /// Jobs interrupted mid-payout are dead-lettered instead of replayed.
    pub fn resume_pending(&self) -> Result<usize, WatcherError> {
        let Some(store) = &self.inner.store else {
            return Ok(0);
        };

        for (job_id, interrupted) in store.finalizing()? {
            error!(
                job_id = %job_id,
                kind = interrupted.job.kind(),
                tx_hash = %interrupted.transaction_hash,
                started_at = %interrupted.started_at,
                "Payout request was interrupted, needs manual reconciliation"
            );
            self.inner.complete(
                job_id,
                &interrupted.job,
                JobOutcome::PayoutUnconfirmed {
                    transaction_hash: interrupted.transaction_hash,
                },
            );
        }

        let pending = store.pending()?;
        let count = pending.len();
        for (job_id, stored) in pending {
            info!(
                job_id = %job_id,
                kind = stored.job.kind(),
                submitted_at = %stored.submitted_at,
                "Resuming settlement job"
            );
            self.spawn(job_id, stored.job, true);
        }
        Ok(count)
    }

    /// Run `callback` once the job reaches a terminal outcome. Fires
    /// immediately if the outcome is already known.
    pub fn on_terminal<F>(&self, job_id: JobId, callback: F)
    where
        F: FnOnce(&JobOutcome) + Send + 'static,
    {
        let mut callbacks = match self.inner.callbacks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let known = self
            .inner
            .outcomes
            .lock()
            .ok()
            .and_then(|mut outcomes| outcomes.get(&job_id).cloned());

        match known {
            Some(outcome) => {
                drop(callbacks);
                callback(&outcome);
            }
            None => callbacks.entry(job_id).or_default().push(Box::new(callback)),
        }
    }

    fn spawn(&self, job_id: JobId, job: TransactionJob, checkpointed: bool) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Some(outcome) = inner.watch(job_id, &job, checkpointed).await {
                inner.complete(job_id, &job, outcome);
            }
        });
    }
}

impl WatcherInner {
    /// Poll until terminal. `None` means the watcher was shut down.
    async fn watch(
        &self,
        job_id: JobId,
        job: &TransactionJob,
        checkpointed: bool,
    ) -> Option<JobOutcome> {
        let transaction_id = job.on_chain_transaction_id();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            match self.wallet.get_transaction(transaction_id).await {
                Ok(tx) => match (tx.status, tx.transaction_hash) {
                    (OnChainStatus::Success, Some(hash)) if !hash.trim().is_empty() => {
                        return Some(self.finalize(job_id, job, hash, checkpointed).await);
                    }
                    (OnChainStatus::Failed, _) => {
                        error!(
                            job_id = %job_id,
                            kind = job.kind(),
                            transaction_id = %transaction_id,
                            "On-chain transaction failed"
                        );
                        self.notify(job, &failure_message(job)).await;
                        return Some(JobOutcome::OnChainFailed);
                    }
                    (status, _) => {
                        debug!(
                            job_id = %job_id,
                            transaction_id = %transaction_id,
                            status = ?status,
                            attempt = attempts,
                            "Transaction not final yet"
                        );
                    }
                },
                Err(e) => {
                    warn!(
                        job_id = %job_id,
                        transaction_id = %transaction_id,
                        attempt = attempts,
                        error = %e,
                        "Failed to poll transaction status"
                    );
                }
            }

            if attempts >= self.policy.max_attempts {
                error!(
                    job_id = %job_id,
                    kind = job.kind(),
                    transaction_id = %transaction_id,
                    attempts,
                    "Settlement job exhausted its retry budget"
                );
                return Some(JobOutcome::Abandoned { attempts });
            }

            tokio::select! {
                _ = tokio::time::sleep(self.policy.poll_interval) => {},
                _ = self.shutdown.cancelled() => {
                    info!(job_id = %job_id, "Settlement watcher shutting down, job left pending");
                    return None;
                }
            }
        }
    }

    async fn finalize(
        &self,
        job_id: JobId,
        job: &TransactionJob,
        hash: String,
        checkpointed: bool,
    ) -> JobOutcome {
        match job {
            TransactionJob::Offramp(settlement) => {
                if let (true, Some(store)) = (checkpointed, &self.store) {
                    if let Err(e) = store.mark_finalizing(job_id, job, &hash) {
                        error!(
                            job_id = %job_id,
                            tx_hash = %hash,
                            error = %e,
                            "Failed to record payout attempt, payout held for manual follow-up"
                        );
                        self.notify(job, &payout_delayed_message(settlement)).await;
                        return JobOutcome::FinalizationFailed {
                            transaction_hash: hash,
                            reason: format!("payout checkpoint failed: {e}"),
                        };
                    }
                }

                let order = OfframpOrder {
                    tx_hash: hash.clone(),
                    beneficiary_id: settlement.beneficiary_id.clone(),
                    usd_amount: settlement.usd_amount.clone(),
                    local_amount: settlement.local_amount.clone(),
                    currency: settlement.currency.clone(),
                    token_address: settlement.token_address.clone(),
                    chain_name: settlement.chain_name.clone(),
                    token_name: settlement.token_name.clone(),
                    user_wallet_address: settlement.user_wallet_address.clone(),
                    hot_wallet_address: settlement.hot_wallet_address.clone(),
                };

                match self.ramp.post_offramp(&order).await {
                    Ok(receipt) => {
                        info!(
                            job_id = %job_id,
                            tx_hash = %hash,
                            sequence_id = %receipt.sequence_id,
                            "Offramp settled, payout requested"
                        );
                        let message = format!(
                            "Your withdrawal of {} {} is on its way. You will receive {} {} shortly.\nReference: {}",
                            settlement.usd_amount,
                            settlement.token_name,
                            settlement.local_amount,
                            settlement.currency,
                            receipt.sequence_id
                        );
                        self.notify(job, &message).await;
                        JobOutcome::Settled {
                            transaction_hash: hash,
                        }
                    }
                    Err(e) => {
                        error!(
                            job_id = %job_id,
                            tx_hash = %hash,
                            error = %e,
                            "Offramp payout request failed after on-chain settlement"
                        );
                        self.notify(job, &payout_delayed_message(settlement)).await;
                        JobOutcome::FinalizationFailed {
                            transaction_hash: hash,
                            reason: e.to_string(),
                        }
                    }
                }
            }
            TransactionJob::Transfer(settlement) => {
                info!(job_id = %job_id, tx_hash = %hash, "Transfer settled");
                let message = format!(
                    "Your transfer of {} {} to {} on {} is complete.\nTransaction hash: {}",
                    settlement.amount,
                    settlement.token_name,
                    settlement.destination,
                    settlement.chain_name,
                    hash
                );
                self.notify(job, &message).await;
                JobOutcome::Settled {
                    transaction_hash: hash,
                }
            }
        }
    }

    /// Best-effort; failures are logged, never retried.
    async fn notify(&self, job: &TransactionJob, body: &str) {
        if let Err(e) = self
            .messenger
            .send_text(job.user_phone_number(), body)
            .await
        {
            warn!(
                kind = job.kind(),
                transaction_id = %job.on_chain_transaction_id(),
                error = %e,
                "Failed to send settlement notification"
            );
        }
    }

    fn complete(&self, job_id: JobId, job: &TransactionJob, outcome: JobOutcome) {
        if let Some(store) = &self.store {
            let result = if outcome.needs_follow_up() {
                store.dead_letter(job_id, job, &outcome)
            } else {
                store.remove_job(job_id)
            };
            if let Err(e) = result {
                error!(job_id = %job_id, error = %e, "Failed to update job checkpoint");
            }
        }

        let waiting = {
            let mut callbacks = match self.callbacks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Ok(mut outcomes) = self.outcomes.lock() {
                outcomes.put(job_id, outcome.clone());
            }
            callbacks.remove(&job_id).unwrap_or_default()
        };

        for callback in waiting {
            callback(&outcome);
        }
    }
}

fn payout_delayed_message(settlement: &OfframpSettlement) -> String {
    format!(
        "We received your {} {} but your payout is delayed. Our team has been alerted and will follow up.",
        settlement.usd_amount, settlement.token_name
    )
}

fn failure_message(job: &TransactionJob) -> String {
    match job {
        TransactionJob::Offramp(settlement) => format!(
            "Your withdrawal of {} {} could not be completed because the blockchain transaction failed. No funds left your wallet.",
            settlement.usd_amount, settlement.token_name
        ),
        TransactionJob::Transfer(settlement) => format!(
            "Your transfer of {} {} to {} failed on chain. Please try again.",
            settlement.amount, settlement.token_name, settlement.destination
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::OnChainTransaction;
    use crate::test_utils::{FlakyBackend, MockMessenger, MockRamp, MockWallet};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::oneshot;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            poll_interval: Duration::from_millis(5),
            max_attempts,
        }
    }

    fn offramp_job() -> TransactionJob {
        TransactionJob::Offramp(OfframpSettlement {
            on_chain_transaction_id: "tx-1".into(),
            beneficiary_id: "ben-1".into(),
            usd_amount: "50.00".into(),
            local_amount: "80000.00".into(),
            currency: "NGN".into(),
            token_address: "0xtoken".into(),
            chain_name: "base".into(),
            token_name: "USDC".into(),
            user_wallet_address: "0xuser".into(),
            hot_wallet_address: Some("0xhot".into()),
            user_phone_number: "2348000000000".into(),
        })
    }

    fn transfer_job() -> TransactionJob {
        TransactionJob::Transfer(TransferSettlement {
            on_chain_transaction_id: "tx-2".into(),
            destination: "0xdest".into(),
            amount: "5.00".into(),
            token_name: "USDC".into(),
            chain_name: "base".into(),
            user_phone_number: "2348000000000".into(),
        })
    }

    fn status(status: OnChainStatus, hash: Option<&str>) -> OnChainTransaction {
        OnChainTransaction {
            status,
            transaction_hash: hash.map(str::to_string),
        }
    }

    struct Harness {
        wallet: Arc<MockWallet>,
        ramp: Arc<MockRamp>,
        messenger: Arc<MockMessenger>,
        watcher: TransactionWatcher,
    }

    fn harness(policy: RetryPolicy, store: Option<Arc<JobStore>>) -> Harness {
        let wallet = Arc::new(MockWallet::new());
        let ramp = Arc::new(MockRamp::new());
        let messenger = Arc::new(MockMessenger::new());
        let watcher = TransactionWatcher::new(
            wallet.clone(),
            ramp.clone(),
            messenger.clone(),
            store,
            policy,
            CancellationToken::new(),
        );
        Harness {
            wallet,
            ramp,
            messenger,
            watcher,
        }
    }

    fn flaky_store() -> (Arc<JobStore>, Arc<AtomicBool>) {
        let (backend, fail_writes) = FlakyBackend::new();
        (Arc::new(JobStore::with_backend(backend).unwrap()), fail_writes)
    }

    async fn wait_for(watcher: &TransactionWatcher, job_id: JobId) -> JobOutcome {
        let (tx, rx) = oneshot::channel();
        watcher.on_terminal(job_id, move |outcome| {
            let _ = tx.send(outcome.clone());
        });
        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("job finishes in time")
            .expect("callback fired")
    }

    #[tokio::test]
    async fn offramp_success_posts_payout_once_and_notifies_once() {
        let h = harness(fast_policy(10), None);
        h.wallet.script_transactions(vec![
            status(OnChainStatus::Submitted, None),
            status(OnChainStatus::Success, Some("0xabc")),
        ]);

        let job_id = h.watcher.submit(offramp_job()).unwrap();
        let outcome = wait_for(&h.watcher, job_id).await;

        assert_eq!(
            outcome,
            JobOutcome::Settled {
                transaction_hash: "0xabc".into()
            }
        );
        let orders = h.ramp.offramp_orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].tx_hash, "0xabc");
        assert_eq!(orders[0].beneficiary_id, "ben-1");
        assert_eq!(h.messenger.sent().len(), 1);
        assert_eq!(h.wallet.transaction_polls(), 2);
    }

    #[tokio::test]
    async fn transfer_success_only_notifies() {
        let h = harness(fast_policy(10), None);
        h.wallet.script_transactions(vec![
            status(OnChainStatus::Pending, None),
            status(OnChainStatus::Success, Some("0xdef")),
        ]);

        let job_id = h.watcher.submit(transfer_job()).unwrap();
        let outcome = wait_for(&h.watcher, job_id).await;

        assert!(matches!(outcome, JobOutcome::Settled { .. }));
        assert!(h.ramp.offramp_orders().is_empty());
        let sent = h.messenger.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0]["text"]["body"].as_str().unwrap().contains("0xdef"));
    }

    #[tokio::test]
    async fn success_without_hash_keeps_polling() {
        let h = harness(fast_policy(10), None);
        h.wallet.script_transactions(vec![
            status(OnChainStatus::Success, None),
            status(OnChainStatus::Unknown, None),
            status(OnChainStatus::Success, Some("0x123")),
        ]);

        let job_id = h.watcher.submit(transfer_job()).unwrap();
        let outcome = wait_for(&h.watcher, job_id).await;
        assert_eq!(
            outcome,
            JobOutcome::Settled {
                transaction_hash: "0x123".into()
            }
        );
        assert_eq!(h.wallet.transaction_polls(), 3);
    }

    #[tokio::test]
    async fn on_chain_failure_notifies_without_payout() {
        let h = harness(fast_policy(10), None);
        h.wallet
            .script_transactions(vec![status(OnChainStatus::Failed, None)]);

        let job_id = h.watcher.submit(offramp_job()).unwrap();
        let outcome = wait_for(&h.watcher, job_id).await;

        assert_eq!(outcome, JobOutcome::OnChainFailed);
        assert!(h.ramp.offramp_orders().is_empty());
        let sent = h.messenger.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0]["text"]["body"].as_str().unwrap().contains("failed"));
    }

    #[tokio::test]
    async fn exhausted_retries_are_dead_lettered_silently() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::open(&dir.path().join("jobs.redb")).unwrap());
        let h = harness(fast_policy(3), Some(store.clone()));
        h.wallet.script_transactions(vec![status(OnChainStatus::Pending, None)]);

        let job_id = h.watcher.submit(transfer_job()).unwrap();
        let outcome = wait_for(&h.watcher, job_id).await;

        assert_eq!(outcome, JobOutcome::Abandoned { attempts: 3 });
        assert_eq!(h.wallet.transaction_polls(), 3);
        assert!(h.messenger.sent().is_empty());
        assert!(store.pending().unwrap().is_empty());
        assert_eq!(store.dead_letters().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn payout_failure_is_dead_lettered() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::open(&dir.path().join("jobs.redb")).unwrap());
        let h = harness(fast_policy(5), Some(store.clone()));
        h.wallet
            .script_transactions(vec![status(OnChainStatus::Success, Some("0xabc"))]);
        h.ramp.fail_offramp("ramp down");

        let job_id = h.watcher.submit(offramp_job()).unwrap();
        let outcome = wait_for(&h.watcher, job_id).await;

        assert!(matches!(outcome, JobOutcome::FinalizationFailed { ref transaction_hash, .. } if transaction_hash == "0xabc"));
        assert_eq!(h.messenger.sent().len(), 1);
        assert_eq!(store.dead_letters().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn settled_jobs_leave_the_checkpoint_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::open(&dir.path().join("jobs.redb")).unwrap());
        let h = harness(fast_policy(5), Some(store.clone()));
        h.wallet
            .script_transactions(vec![status(OnChainStatus::Success, Some("0xabc"))]);

        let job_id = h.watcher.submit(transfer_job()).unwrap();
        wait_for(&h.watcher, job_id).await;

        assert!(store.pending().unwrap().is_empty());
        assert!(store.dead_letters().unwrap().is_empty());
    }

    #[tokio::test]
    async fn resume_pending_restarts_checkpointed_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::open(&dir.path().join("jobs.redb")).unwrap());
        let job_id = Uuid::new_v4();
        store.insert_pending(job_id, &transfer_job()).unwrap();

        let h = harness(fast_policy(5), Some(store.clone()));
        h.wallet
            .script_transactions(vec![status(OnChainStatus::Success, Some("0xfff"))]);

        let (tx, rx) = oneshot::channel();
        h.watcher.on_terminal(job_id, move |outcome| {
            let _ = tx.send(outcome.clone());
        });
        assert_eq!(h.watcher.resume_pending().unwrap(), 1);

        let outcome = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, JobOutcome::Settled { .. }));
        assert!(store.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn late_on_terminal_fires_immediately() {
        let h = harness(fast_policy(5), None);
        h.wallet
            .script_transactions(vec![status(OnChainStatus::Failed, None)]);

        let job_id = h.watcher.submit(transfer_job()).unwrap();
        wait_for(&h.watcher, job_id).await;

        let (tx, rx) = oneshot::channel();
        h.watcher.on_terminal(job_id, move |outcome| {
            let _ = tx.send(outcome.clone());
        });
        assert_eq!(rx.await.unwrap(), JobOutcome::OnChainFailed);
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let shutdown = CancellationToken::new();
        let watcher = TransactionWatcher::new(
            Arc::new(MockWallet::new()),
            Arc::new(MockRamp::new()),
            Arc::new(MockMessenger::new()),
            None,
            fast_policy(5),
            shutdown.clone(),
        );
        shutdown.cancel();
        assert!(matches!(
            watcher.submit(transfer_job()),
            Err(WatcherError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn unwritable_store_still_watches_and_pays_out() {
        let (store, fail_writes) = flaky_store();
        fail_writes.store(true, Ordering::SeqCst);
        let h = harness(fast_policy(5), Some(store));
        h.wallet.script_transactions(vec![
            status(OnChainStatus::Pending, None),
            status(OnChainStatus::Success, Some("0xabc")),
        ]);

        let job_id = h.watcher.submit(offramp_job()).unwrap();
        let outcome = wait_for(&h.watcher, job_id).await;

        assert_eq!(
            outcome,
            JobOutcome::Settled {
                transaction_hash: "0xabc".into()
            }
        );
        assert_eq!(h.ramp.offramp_orders().len(), 1);
        assert_eq!(h.messenger.sent().len(), 1);
    }

    #[tokio::test]
    async fn payout_is_held_when_it_cannot_be_marked() {
        let (store, fail_writes) = flaky_store();
        let h = harness(fast_policy(5), Some(store.clone()));
        h.wallet
            .script_transactions(vec![status(OnChainStatus::Success, Some("0xabc"))]);

        let job_id = h.watcher.submit(offramp_job()).unwrap();
        assert_eq!(store.pending().unwrap().len(), 1);
        fail_writes.store(true, Ordering::SeqCst);
        let outcome = wait_for(&h.watcher, job_id).await;

        assert!(matches!(outcome, JobOutcome::FinalizationFailed { ref transaction_hash, .. } if transaction_hash == "0xabc"));
        assert!(h.ramp.offramp_orders().is_empty());
        let sent = h.messenger.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0]["text"]["body"].as_str().unwrap().contains("delayed"));
    }

    #[tokio::test]
    async fn settled_offramp_leaves_no_finalizing_marker() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::open(&dir.path().join("jobs.redb")).unwrap());
        let h = harness(fast_policy(5), Some(store.clone()));
        h.wallet
            .script_transactions(vec![status(OnChainStatus::Success, Some("0xabc"))]);

        let job_id = h.watcher.submit(offramp_job()).unwrap();
        wait_for(&h.watcher, job_id).await;

        assert!(store.pending().unwrap().is_empty());
        assert!(store.finalizing().unwrap().is_empty());
        assert_eq!(h.ramp.offramp_orders().len(), 1);
    }

    #[tokio::test]
    async fn interrupted_payout_is_dead_lettered_not_replayed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::open(&dir.path().join("jobs.redb")).unwrap());
        let job_id = Uuid::new_v4();
        store.insert_pending(job_id, &offramp_job()).unwrap();
        store.mark_finalizing(job_id, &offramp_job(), "0xabc").unwrap();

        let h = harness(fast_policy(5), Some(store.clone()));
        h.wallet
            .script_transactions(vec![status(OnChainStatus::Success, Some("0xabc"))]);

        assert_eq!(h.watcher.resume_pending().unwrap(), 0);
        let (tx, rx) = oneshot::channel();
        h.watcher.on_terminal(job_id, move |outcome| {
            let _ = tx.send(outcome.clone());
        });
        assert_eq!(
            rx.await.unwrap(),
            JobOutcome::PayoutUnconfirmed {
                transaction_hash: "0xabc".into()
            }
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.ramp.offramp_orders().is_empty());
        assert_eq!(h.wallet.transaction_polls(), 0);
        assert!(store.finalizing().unwrap().is_empty());
        let dead = store.dead_letters().unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job_id, job_id);
    }
}
