// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Settlement job checkpoints backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `pending_jobs`: job_id → serialized [`StoredJob`] (JSON bytes)
//! - `finalizing_jobs`: job_id → serialized [`FinalizingJob`] (JSON bytes)
//! - `dead_letter_jobs`: job_id → serialized [`DeadLetter`] (JSON bytes)
//!
//! A job is written to `pending_jobs` before its first poll and removed when
//! it reaches a terminal outcome, so a restart only loses polls, never jobs.
//! Offramp jobs move to `finalizing_jobs` before the payout request goes out.
//! A row still there after a restart may already have been paid, so it is
//! never replayed.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, StorageBackend, TableDefinition};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{JobId, JobOutcome, TransactionJob};

const PENDING_JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("pending_jobs");
const FINALIZING_JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("finalizing_jobs");
const DEAD_LETTER_JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("dead_letter_jobs");

#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("failed to create job store directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("corrupt job id in store: {0}")]
    CorruptKey(String),
}

pub type JobStoreResult<T> = Result<T, JobStoreError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredJob {
    pub job: TransactionJob,
    pub submitted_at: DateTime<Utc>,
}

/// An offramp whose payout request may already have reached the ramp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizingJob {
    pub job: TransactionJob,
    pub transaction_hash: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub job_id: JobId,
    pub job: TransactionJob,
    pub outcome: JobOutcome,
    pub failed_at: DateTime<Utc>,
}

pub struct JobStore {
    db: Database,
}

impl JobStore {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> JobStoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| JobStoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Self::init(Database::create(path)?)
    }

    /// Open on a caller-supplied redb backend (e.g. in memory).
    pub fn with_backend(backend: impl StorageBackend) -> JobStoreResult<Self> {
        Self::init(Database::builder().create_with_backend(backend)?)
    }

    fn init(db: Database) -> JobStoreResult<Self> {
        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(PENDING_JOBS)?;
            let _ = write_txn.open_table(FINALIZING_JOBS)?;
            let _ = write_txn.open_table(DEAD_LETTER_JOBS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    pub fn insert_pending(&self, job_id: JobId, job: &TransactionJob) -> JobStoreResult<()> {
        let stored = StoredJob {
            job: job.clone(),
            submitted_at: Utc::now(),
        };
        let json = serde_json::to_vec(&stored)?;
        let key = job_id.to_string();

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PENDING_JOBS)?;
            table.insert(key.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// All jobs that have not reached a terminal outcome, oldest first.
    pub fn pending(&self) -> JobStoreResult<Vec<(JobId, StoredJob)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PENDING_JOBS)?;

        let mut jobs = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            let job_id = Uuid::parse_str(key.value())
                .map_err(|_| JobStoreError::CorruptKey(key.value().to_string()))?;
            let stored: StoredJob = serde_json::from_slice(value.value())?;
            jobs.push((job_id, stored));
        }
        jobs.sort_by_key(|(_, stored)| stored.submitted_at);
        Ok(jobs)
    }

    /// Record that the payout for `job_id` is about to be requested.
    /// Moves the job out of `pending_jobs` in the same transaction.
    pub fn mark_finalizing(
        &self,
        job_id: JobId,
        job: &TransactionJob,
        transaction_hash: &str,
    ) -> JobStoreResult<()> {
        let entry = FinalizingJob {
            job: job.clone(),
            transaction_hash: transaction_hash.to_string(),
            started_at: Utc::now(),
        };
        let json = serde_json::to_vec(&entry)?;
        let key = job_id.to_string();

        let write_txn = self.db.begin_write()?;
        {
            let mut pending = write_txn.open_table(PENDING_JOBS)?;
            pending.remove(key.as_str())?;
            let mut finalizing = write_txn.open_table(FINALIZING_JOBS)?;
            finalizing.insert(key.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Jobs interrupted between `mark_finalizing` and their terminal outcome.
    pub fn finalizing(&self) -> JobStoreResult<Vec<(JobId, FinalizingJob)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(FINALIZING_JOBS)?;

        let mut jobs = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            let job_id = Uuid::parse_str(key.value())
                .map_err(|_| JobStoreError::CorruptKey(key.value().to_string()))?;
            jobs.push((job_id, serde_json::from_slice(value.value())?));
        }
        Ok(jobs)
    }

    /// Drop a job that settled (successfully or with an on-chain failure).
    pub fn remove_job(&self, job_id: JobId) -> JobStoreResult<()> {
        let key = job_id.to_string();
        let write_txn = self.db.begin_write()?;
        {
            let mut pending = write_txn.open_table(PENDING_JOBS)?;
            pending.remove(key.as_str())?;
            let mut finalizing = write_txn.open_table(FINALIZING_JOBS)?;
            finalizing.remove(key.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Move a job that needs manual follow-up out of the live tables.
    pub fn dead_letter(
        &self,
        job_id: JobId,
        job: &TransactionJob,
        outcome: &JobOutcome,
    ) -> JobStoreResult<()> {
        let entry = DeadLetter {
            job_id,
            job: job.clone(),
            outcome: outcome.clone(),
            failed_at: Utc::now(),
        };
        let json = serde_json::to_vec(&entry)?;
        let key = job_id.to_string();

        let write_txn = self.db.begin_write()?;
        {
            let mut pending = write_txn.open_table(PENDING_JOBS)?;
            pending.remove(key.as_str())?;
            let mut finalizing = write_txn.open_table(FINALIZING_JOBS)?;
            finalizing.remove(key.as_str())?;
            let mut dead = write_txn.open_table(DEAD_LETTER_JOBS)?;
            dead.insert(key.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn dead_letters(&self) -> JobStoreResult<Vec<DeadLetter>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEAD_LETTER_JOBS)?;

        let mut entries = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::TransferSettlement;

    fn transfer_job(tx: &str) -> TransactionJob {
        TransactionJob::Transfer(TransferSettlement {
            on_chain_transaction_id: tx.to_string(),
            destination: "0x742d35Cc6634C0532925a3b844Bc9e7595f4aB12".into(),
            amount: "5.00".into(),
            token_name: "USDC".into(),
            chain_name: "base".into(),
            user_phone_number: "2348000000000".into(),
        })
    }

    #[test]
    fn pending_jobs_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.redb");
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        {
            let store = JobStore::open(&path).unwrap();
            store.insert_pending(first, &transfer_job("tx-1")).unwrap();
            store.insert_pending(second, &transfer_job("tx-2")).unwrap();
            store.remove_job(first).unwrap();
        }

        let store = JobStore::open(&path).unwrap();
        let pending = store.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, second);
        assert_eq!(pending[0].1.job, transfer_job("tx-2"));
    }

    #[test]
    fn dead_letter_moves_job_out_of_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(&dir.path().join("jobs.redb")).unwrap();
        let id = Uuid::new_v4();
        let job = transfer_job("tx-3");
        store.insert_pending(id, &job).unwrap();

        store
            .dead_letter(id, &job, &JobOutcome::Abandoned { attempts: 3 })
            .unwrap();

        assert!(store.pending().unwrap().is_empty());
        let dead = store.dead_letters().unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job_id, id);
        assert_eq!(dead[0].outcome, JobOutcome::Abandoned { attempts: 3 });
    }

    #[test]
    fn finalizing_jobs_leave_pending_and_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.redb");
        let id = Uuid::new_v4();
        let job = transfer_job("tx-4");

        {
            let store = JobStore::open(&path).unwrap();
            store.insert_pending(id, &job).unwrap();
            store.mark_finalizing(id, &job, "0xabc").unwrap();
            assert!(store.pending().unwrap().is_empty());
        }

        let store = JobStore::open(&path).unwrap();
        let finalizing = store.finalizing().unwrap();
        assert_eq!(finalizing.len(), 1);
        assert_eq!(finalizing[0].0, id);
        assert_eq!(finalizing[0].1.transaction_hash, "0xabc");

        store.remove_job(id).unwrap();
        assert!(store.finalizing().unwrap().is_empty());
    }

    #[test]
    fn unusable_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let err = JobStore::open(&blocker.join("jobs.redb"))
            .err()
            .expect("open fails");
        assert!(matches!(err, JobStoreError::CreateDir { ref path, .. } if path == &blocker));
        assert!(err.to_string().contains("not-a-dir"));
    }

    #[test]
    fn in_memory_backend_round_trip() {
        let store = JobStore::with_backend(redb::backends::InMemoryBackend::new()).unwrap();
        let id = Uuid::new_v4();
        store.insert_pending(id, &transfer_job("tx-5")).unwrap();
        assert_eq!(store.pending().unwrap()[0].0, id);
    }
}
