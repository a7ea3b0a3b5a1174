//! Persistent run state and publication ledger, stored in redb.
//!
//! # Table design
//!
//! ```text
//! meta      "run_state" → JSON RunState (last post, cursor, lock owner)
//! ledger    seq: u64    → JSON PostRecord
//! articles  seq: u64    → JSON Article (source for re-rendering pages)
//! ```
//!
//! Every mutation is a single write transaction, so a crash leaves either the
//! old or the new state and never a mix. Lock acquisition reads and writes the
//! lock owner inside one transaction, which makes it an atomic
//! check-and-set across processes.
//!
//! The database file is opened per operation rather than held for the
//! lifetime of a run: a long generation call must not keep other
//! invocations (or `pressmill status`) from reading the lock.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use redb::{Database, DatabaseError, ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use uuid::Uuid;

use crate::article::Article;
use crate::error::{PressmillError, Result};
use crate::state::{LockAttempt, LockOwner, PostRecord, RunState};
use crate::types::PostStatus;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const LEDGER: TableDefinition<u64, &[u8]> = TableDefinition::new("ledger");
const ARTICLES: TableDefinition<u64, &[u8]> = TableDefinition::new("articles");

const RUN_STATE_KEY: &str = "run_state";

/// Another process may hold the file for the length of one transaction;
/// wait this long in total before reporting the store as busy.
const OPEN_ATTEMPTS: u32 = 20;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(50);

fn db_err(e: impl std::fmt::Display) -> PressmillError {
    PressmillError::Store(e.to_string())
}

fn decode_state(bytes: Option<Vec<u8>>) -> Result<RunState> {
    match bytes {
        Some(b) => Ok(serde_json::from_slice(&b)?),
        None => Ok(RunState::default()),
    }
}

// ---------------------------------------------------------------------------
// Commit payloads
// ---------------------------------------------------------------------------

/// Everything a successful cycle persists, applied in one transaction.
#[derive(Debug)]
pub struct PublishCommit<'a> {
    pub run_id: Uuid,
    pub record: &'a PostRecord,
    pub article: &'a Article,
    pub next_cursor: usize,
    pub published_at: DateTime<Utc>,
    /// Ledger positions withdrawn by retention in the same commit.
    pub retired: &'a [u64],
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Open or create the database at `path`, creating all tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            crate::io::ensure_dir(parent)?;
        }
        let store = Self {
            path: path.to_path_buf(),
        };
        store.write(|wt| {
            wt.open_table(META).map_err(db_err)?;
            wt.open_table(LEDGER).map_err(db_err)?;
            wt.open_table(ARTICLES).map_err(db_err)?;
            Ok(())
        })?;
        Ok(store)
    }

    fn open_db(&self) -> Result<Database> {
        let mut attempt = 0;
        loop {
            match Database::create(&self.path) {
                Ok(db) => return Ok(db),
                Err(DatabaseError::DatabaseAlreadyOpen) => {
                    attempt += 1;
                    if attempt >= OPEN_ATTEMPTS {
                        return Err(PressmillError::StoreBusy);
                    }
                    std::thread::sleep(OPEN_RETRY_DELAY);
                }
                Err(e) => return Err(db_err(e)),
            }
        }
    }

    fn write<T>(&self, f: impl FnOnce(&WriteTransaction) -> Result<T>) -> Result<T> {
        let db = self.open_db()?;
        let wt = db.begin_write().map_err(db_err)?;
        // An Err return drops `wt` uncommitted, which aborts the transaction.
        let out = f(&wt)?;
        wt.commit().map_err(db_err)?;
        Ok(out)
    }

    fn read<T>(&self, f: impl FnOnce(&ReadTransaction) -> Result<T>) -> Result<T> {
        let db = self.open_db()?;
        let rt = db.begin_read().map_err(db_err)?;
        f(&rt)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn run_state(&self) -> Result<RunState> {
        self.read(|rt| {
            let meta = rt.open_table(META).map_err(db_err)?;
            let bytes = meta
                .get(RUN_STATE_KEY)
                .map_err(db_err)?
                .map(|v| v.value().to_vec());
            decode_state(bytes)
        })
    }

    /// All ledger records in ledger order.
    pub fn ledger(&self) -> Result<Vec<PostRecord>> {
        self.read(|rt| {
            let table = rt.open_table(LEDGER).map_err(db_err)?;
            let mut records = Vec::new();
            for entry in table.iter().map_err(db_err)? {
                let (_, v) = entry.map_err(db_err)?;
                records.push(serde_json::from_slice(v.value())?);
            }
            Ok(records)
        })
    }

    /// The ledger position the next record will take.
    pub fn next_seq(&self) -> Result<u64> {
        self.read(|rt| {
            let table = rt.open_table(LEDGER).map_err(db_err)?;
            let last = table.last().map_err(db_err)?.map(|(k, _)| k.value());
            Ok(last.map_or(1, |seq| seq + 1))
        })
    }

    pub fn article(&self, seq: u64) -> Result<Option<Article>> {
        self.read(|rt| {
            let table = rt.open_table(ARTICLES).map_err(db_err)?;
            let bytes = table.get(seq).map_err(db_err)?.map(|v| v.value().to_vec());
            match bytes {
                Some(b) => Ok(Some(serde_json::from_slice(&b)?)),
                None => Ok(None),
            }
        })
    }

    // -----------------------------------------------------------------------
    // Lock
    // -----------------------------------------------------------------------

    /// Atomically take the cycle lock unless a fresh one is held.
    pub fn try_acquire_lock(
        &self,
        owner: LockOwner,
        now: DateTime<Utc>,
        stale_after: chrono::Duration,
    ) -> Result<LockAttempt> {
        self.write(|wt| {
            let mut meta = wt.open_table(META).map_err(db_err)?;
            let bytes = meta
                .get(RUN_STATE_KEY)
                .map_err(db_err)?
                .map(|v| v.value().to_vec());
            let mut state = decode_state(bytes)?;
            let attempt = state.try_lock(owner, now, stale_after);
            if matches!(attempt, LockAttempt::Acquired { .. }) {
                let data = serde_json::to_vec(&state)?;
                meta.insert(RUN_STATE_KEY, data.as_slice()).map_err(db_err)?;
            }
            Ok(attempt)
        })
    }

    /// Release the lock held by `run_id`. Returns false if it was not held
    /// by that run.
    pub fn release_lock(&self, run_id: Uuid) -> Result<bool> {
        self.update_state(|state| Ok(state.unlock(run_id)))
    }

    /// Clear the lock regardless of owner. Operator recovery only.
    pub fn force_unlock(&self) -> Result<Option<LockOwner>> {
        self.update_state(|state| Ok(state.lock_owner.take()))
    }

    fn update_state<T>(&self, f: impl FnOnce(&mut RunState) -> Result<T>) -> Result<T> {
        self.write(|wt| {
            let mut meta = wt.open_table(META).map_err(db_err)?;
            let bytes = meta
                .get(RUN_STATE_KEY)
                .map_err(db_err)?
                .map(|v| v.value().to_vec());
            let mut state = decode_state(bytes)?;
            let out = f(&mut state)?;
            let data = serde_json::to_vec(&state)?;
            meta.insert(RUN_STATE_KEY, data.as_slice()).map_err(db_err)?;
            Ok(out)
        })
    }

    /// Like `update_state`, but fails with `LockLost` unless `run_id` still
    /// holds the lock, and releases it as part of the same transaction.
    fn commit_locked<T>(
        &self,
        run_id: Uuid,
        f: impl FnOnce(&WriteTransaction, &mut RunState) -> Result<T>,
    ) -> Result<T> {
        self.write(|wt| {
            let mut state = {
                let meta = wt.open_table(META).map_err(db_err)?;
                let bytes = meta
                    .get(RUN_STATE_KEY)
                    .map_err(db_err)?
                    .map(|v| v.value().to_vec());
                decode_state(bytes)?
            };
            if !state.holds_lock(run_id) {
                return Err(PressmillError::LockLost(run_id.to_string()));
            }
            let out = f(wt, &mut state)?;
            state.unlock(run_id);
            let data = serde_json::to_vec(&state)?;
            let mut meta = wt.open_table(META).map_err(db_err)?;
            meta.insert(RUN_STATE_KEY, data.as_slice()).map_err(db_err)?;
            Ok(out)
        })
    }

    // -----------------------------------------------------------------------
    // Commits
    // -----------------------------------------------------------------------

    /// Append a published record with its article, advance the cursor, stamp
    /// `last_post_at`, apply retention and release the lock.
    pub fn commit_publish(&self, commit: PublishCommit<'_>) -> Result<()> {
        self.commit_locked(commit.run_id, |wt, state| {
            append_record(wt, commit.record)?;
            {
                let mut articles = wt.open_table(ARTICLES).map_err(db_err)?;
                let data = serde_json::to_vec(commit.article)?;
                articles
                    .insert(commit.record.seq, data.as_slice())
                    .map_err(db_err)?;
            }
            set_status(wt, commit.retired, PostStatus::Withdrawn)?;
            state.last_post_at = Some(commit.published_at);
            state.rotation_cursor = commit.next_cursor;
            Ok(())
        })
    }

    /// Append a failed record and release the lock. Cursor and
    /// `last_post_at` stay put so the same topic is retried.
    pub fn commit_failure(&self, run_id: Uuid, record: &PostRecord) -> Result<()> {
        self.commit_locked(run_id, |wt, _state| append_record(wt, record))
    }

    /// Mark published records as withdrawn and release the lock.
    pub fn commit_withdraw(&self, run_id: Uuid, seqs: &[u64]) -> Result<()> {
        self.commit_locked(run_id, |wt, _state| set_status(wt, seqs, PostStatus::Withdrawn))
    }
}

fn append_record(wt: &WriteTransaction, record: &PostRecord) -> Result<()> {
    let mut ledger = wt.open_table(LEDGER).map_err(db_err)?;
    if ledger.get(record.seq).map_err(db_err)?.is_some() {
        return Err(PressmillError::Store(format!(
            "ledger position {} is already taken",
            record.seq
        )));
    }
    let data = serde_json::to_vec(record)?;
    ledger.insert(record.seq, data.as_slice()).map_err(db_err)?;
    Ok(())
}

/// Move `Published` records at `seqs` to `status`; other records are left alone.
fn set_status(wt: &WriteTransaction, seqs: &[u64], status: PostStatus) -> Result<()> {
    let mut ledger = wt.open_table(LEDGER).map_err(db_err)?;
    for &seq in seqs {
        let bytes = ledger.get(seq).map_err(db_err)?.map(|v| v.value().to_vec());
        let Some(bytes) = bytes else {
            return Err(PressmillError::Store(format!("ledger position {seq} not found")));
        };
        let mut record: PostRecord = serde_json::from_slice(&bytes)?;
        if record.status != PostStatus::Published {
            continue;
        }
        record.status = status;
        let data = serde_json::to_vec(&record)?;
        ledger.insert(seq, data.as_slice()).map_err(db_err)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::Section;
    use chrono::{Duration as CDur, TimeZone};
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, StateStore) {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(&dir.path().join("state/state.redb")).unwrap();
        (dir, store)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn record(seq: u64, status: PostStatus) -> PostRecord {
        PostRecord {
            seq,
            slug: format!("{seq:04}-desk"),
            product: "Desk".into(),
            product_link: "https://aff.example/desk".into(),
            title: "Desk".into(),
            timestamp: t0(),
            status,
            failure: None,
        }
    }

    fn article() -> Article {
        Article {
            title: "Desk".into(),
            sections: vec![Section {
                heading: None,
                html: "<p>Body</p>".into(),
            }],
            cta_text: "Buy".into(),
            cta_link: "https://aff.example/desk".into(),
        }
    }

    fn lock(store: &StateStore) -> Uuid {
        let owner = LockOwner::new(t0());
        let run_id = owner.run_id;
        let attempt = store
            .try_acquire_lock(owner, t0(), CDur::minutes(30))
            .unwrap();
        assert!(matches!(attempt, LockAttempt::Acquired { .. }));
        run_id
    }

    #[test]
    fn empty_store_defaults() {
        let (_dir, store) = open_tmp();
        assert_eq!(store.run_state().unwrap(), RunState::default());
        assert!(store.ledger().unwrap().is_empty());
        assert_eq!(store.next_seq().unwrap(), 1);
    }

    #[test]
    fn reopen_preserves_state() {
        let (dir, store) = open_tmp();
        let run_id = lock(&store);
        drop(store);
        let store = StateStore::open(&dir.path().join("state/state.redb")).unwrap();
        assert!(store.run_state().unwrap().holds_lock(run_id));
    }

    #[test]
    fn second_lock_is_held_until_stale() {
        let (_dir, store) = open_tmp();
        lock(&store);
        let attempt = store
            .try_acquire_lock(LockOwner::new(t0()), t0() + CDur::minutes(5), CDur::minutes(30))
            .unwrap();
        assert!(matches!(attempt, LockAttempt::Held(_)));

        let attempt = store
            .try_acquire_lock(LockOwner::new(t0()), t0() + CDur::minutes(31), CDur::minutes(30))
            .unwrap();
        assert!(matches!(
            attempt,
            LockAttempt::Acquired {
                reclaimed: Some(_)
            }
        ));
    }

    #[test]
    fn commit_publish_appends_and_advances() {
        let (_dir, store) = open_tmp();
        let run_id = lock(&store);
        let rec = record(1, PostStatus::Published);
        store
            .commit_publish(PublishCommit {
                run_id,
                record: &rec,
                article: &article(),
                next_cursor: 1,
                published_at: t0(),
                retired: &[],
            })
            .unwrap();

        let state = store.run_state().unwrap();
        assert_eq!(state.rotation_cursor, 1);
        assert_eq!(state.last_post_at, Some(t0()));
        assert!(state.lock_owner.is_none());
        assert_eq!(store.ledger().unwrap(), vec![rec]);
        assert_eq!(store.article(1).unwrap(), Some(article()));
        assert_eq!(store.next_seq().unwrap(), 2);
    }

    #[test]
    fn commit_failure_leaves_cursor_and_timestamp() {
        let (_dir, store) = open_tmp();
        let run_id = lock(&store);
        let mut rec = record(1, PostStatus::Failed);
        rec.failure = Some("boom".into());
        store.commit_failure(run_id, &rec).unwrap();

        let state = store.run_state().unwrap();
        assert_eq!(state.rotation_cursor, 0);
        assert_eq!(state.last_post_at, None);
        assert!(state.lock_owner.is_none());
        assert_eq!(store.ledger().unwrap()[0].status, PostStatus::Failed);
        assert_eq!(store.next_seq().unwrap(), 2);
    }

    #[test]
    fn commit_without_lock_is_rejected_and_rolled_back() {
        let (_dir, store) = open_tmp();
        let rec = record(1, PostStatus::Failed);
        let err = store.commit_failure(Uuid::new_v4(), &rec).unwrap_err();
        assert!(matches!(err, PressmillError::LockLost(_)));
        assert!(store.ledger().unwrap().is_empty());
    }

    #[test]
    fn ledger_positions_are_never_reused() {
        let (_dir, store) = open_tmp();
        let run_id = lock(&store);
        store
            .commit_failure(run_id, &record(1, PostStatus::Failed))
            .unwrap();
        let run_id = lock(&store);
        let err = store
            .commit_failure(run_id, &record(1, PostStatus::Failed))
            .unwrap_err();
        assert!(err.to_string().contains("already taken"));
        // The failed commit rolled back, so the lock is still held.
        assert!(store.run_state().unwrap().holds_lock(run_id));
    }

    #[test]
    fn withdraw_only_touches_published() {
        let (_dir, store) = open_tmp();
        let run_id = lock(&store);
        store
            .commit_publish(PublishCommit {
                run_id,
                record: &record(1, PostStatus::Published),
                article: &article(),
                next_cursor: 0,
                published_at: t0(),
                retired: &[],
            })
            .unwrap();
        let run_id = lock(&store);
        store
            .commit_failure(run_id, &record(2, PostStatus::Failed))
            .unwrap();

        let run_id = lock(&store);
        store.commit_withdraw(run_id, &[1, 2]).unwrap();
        let ledger = store.ledger().unwrap();
        assert_eq!(ledger[0].status, PostStatus::Withdrawn);
        assert_eq!(ledger[1].status, PostStatus::Failed);
    }

    #[test]
    fn force_unlock_returns_previous_owner() {
        let (_dir, store) = open_tmp();
        let run_id = lock(&store);
        let previous = store.force_unlock().unwrap().unwrap();
        assert_eq!(previous.run_id, run_id);
        assert!(store.force_unlock().unwrap().is_none());
    }

    #[test]
    fn release_by_other_run_is_noop() {
        let (_dir, store) = open_tmp();
        let run_id = lock(&store);
        assert!(!store.release_lock(Uuid::new_v4()).unwrap());
        assert!(store.release_lock(run_id).unwrap());
        assert!(store.run_state().unwrap().lock_owner.is_none());
    }
}
