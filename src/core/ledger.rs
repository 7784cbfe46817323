//! Append-only transaction ledger
//!
//! This module provides the `TransactionLedger` struct, the audit record of
//! every applied effect. The ledger is keyed by idempotency key and doubles
//! as the durable idempotency gate: the engine applies an event inside the
//! key's insert-if-absent, so a key that already has a row admits no second
//! effect. Rows are never updated or deleted; retention cleanup of old
//! events leaves the ledger intact.

use dashmap::DashMap;

use crate::types::{SyncError, Transaction, UserId};

/// Thread-safe append-only ledger of applied effects
///
/// Exactly one row per completed event, inserted at the moment the effect
/// is applied. The insert is first-writer-wins under the key's entry lock,
/// so concurrent applications of the same event record a single row.
///
/// # Thread Safety
///
/// All methods are safe to call from multiple threads concurrently.
#[derive(Debug, Default)]
pub struct TransactionLedger {
    /// Rows by idempotency key
    rows: DashMap<String, Transaction>,
}

impl TransactionLedger {
    /// Create a new empty ledger
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }

    /// Record a row unless its key is already present
    ///
    /// # Returns
    ///
    /// * `true` if the row was inserted
    /// * `false` if a row with this idempotency key already existed; the
    ///   existing row is left untouched
    pub fn record(&self, transaction: Transaction) -> bool {
        let mut inserted = false;
        self.rows
            .entry(transaction.idempotency_key.clone())
            .or_insert_with(|| {
                inserted = true;
                transaction
            });
        inserted
    }

    /// Run an effect and record its row as one insert-if-absent
    ///
    /// `build` runs only when the key has no row yet, and the key's entry
    /// lock is held from the vacancy check until the produced row is
    /// stored. Concurrent callers with the same key block on the entry and
    /// then find the row, so at most one `build` ever runs per key.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(value))` - `build` ran and its row was recorded
    /// * `Ok(None)` - a row for this key already existed; `build` did not
    ///   run
    ///
    /// # Errors
    ///
    /// Propagates the error from `build`; nothing is recorded and the key
    /// stays free for a retry.
    pub fn record_with<T, F>(&self, idempotency_key: &str, build: F) -> Result<Option<T>, SyncError>
    where
        F: FnOnce() -> Result<(Transaction, T), SyncError>,
    {
        let mut carried = None;
        self.rows
            .entry(idempotency_key.to_string())
            .or_try_insert_with(|| {
                let (row, value) = build()?;
                carried = Some(value);
                Ok(row)
            })?;
        Ok(carried)
    }

    /// Whether a row exists for this idempotency key
    pub fn contains_key(&self, idempotency_key: &str) -> bool {
        self.rows.contains_key(idempotency_key)
    }

    /// Get the row for an idempotency key
    pub fn get(&self, idempotency_key: &str) -> Option<Transaction> {
        self.rows.get(idempotency_key).map(|entry| entry.clone())
    }

    /// All rows for a user, oldest first
    pub fn for_user(&self, user_id: UserId) -> Vec<Transaction> {
        let mut rows: Vec<Transaction> = self
            .rows
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.clone())
            .collect();
        rows.sort_unstable_by_key(|row| (row.created_at, row.id));
        rows
    }

    /// Total number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the ledger holds no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventSource, TransactionKind};
    use serde_json::json;

    fn xp_row(key: &str, user_id: UserId, delta_xp: i64) -> Transaction {
        Transaction::new(
            key,
            user_id,
            EventSource::Telegram,
            TransactionKind::Xp,
            delta_xp,
            0,
            None,
            json!({}),
        )
    }

    #[test]
    fn test_record_inserts_new_row() {
        let ledger = TransactionLedger::new();

        assert!(ledger.record(xp_row("tg:daily:42", 42, 100)));

        assert_eq!(ledger.len(), 1);
        assert!(ledger.contains_key("tg:daily:42"));
        assert_eq!(ledger.get("tg:daily:42").unwrap().delta_xp, 100);
    }

    #[test]
    fn test_record_keeps_first_row_for_key() {
        let ledger = TransactionLedger::new();

        assert!(ledger.record(xp_row("tg:daily:42", 42, 100)));
        assert!(!ledger.record(xp_row("tg:daily:42", 42, 999)));

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get("tg:daily:42").unwrap().delta_xp, 100);
    }

    #[test]
    fn test_for_user_filters_and_sorts() {
        let ledger = TransactionLedger::new();
        let mut early = xp_row("tg:a:7", 7, 10);
        early.created_at -= chrono::Duration::minutes(5);
        ledger.record(xp_row("tg:b:7", 7, 20));
        ledger.record(early);
        ledger.record(xp_row("tg:c:8", 8, 30));

        let rows = ledger.for_user(7);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].idempotency_key, "tg:a:7");
        assert_eq!(rows[1].idempotency_key, "tg:b:7");
    }

    #[test]
    fn test_concurrent_record_same_key_single_row() {
        use std::sync::Arc;
        use std::thread;

        let ledger = Arc::new(TransactionLedger::new());
        let mut handles = vec![];

        for i in 0..10 {
            let ledger_clone = Arc::clone(&ledger);
            handles.push(thread::spawn(move || {
                ledger_clone.record(xp_row("tg:daily:42", 42, i))
            }));
        }

        let inserts: usize = handles
            .into_iter()
            .map(|handle| usize::from(handle.join().unwrap()))
            .sum();

        assert_eq!(inserts, 1);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_record_with_skips_build_for_existing_key() {
        let ledger = TransactionLedger::new();

        let first = ledger
            .record_with("tg:daily:42", || Ok((xp_row("tg:daily:42", 42, 100), 100)))
            .unwrap();
        let second = ledger
            .record_with("tg:daily:42", || {
                panic!("build must not run for an occupied key")
            })
            .unwrap();

        assert_eq!(first, Some(100));
        assert_eq!(second, None::<i64>);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get("tg:daily:42").unwrap().delta_xp, 100);
    }

    #[test]
    fn test_record_with_failure_leaves_key_free() {
        let ledger = TransactionLedger::new();

        let failed: Result<Option<i64>, _> = ledger.record_with("tg:daily:42", || {
            Err(SyncError::transient_store("record", "store offline"))
        });

        assert!(failed.is_err());
        assert!(!ledger.contains_key("tg:daily:42"));

        let retried = ledger
            .record_with("tg:daily:42", || Ok((xp_row("tg:daily:42", 42, 100), 100)))
            .unwrap();

        assert_eq!(retried, Some(100));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_concurrent_record_with_same_key_builds_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::{Arc, Barrier};
        use std::thread;

        let ledger = Arc::new(TransactionLedger::new());
        let builds = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));
        let mut handles = vec![];

        for _ in 0..8 {
            let ledger_clone = Arc::clone(&ledger);
            let builds_clone = Arc::clone(&builds);
            let barrier_clone = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier_clone.wait();
                ledger_clone
                    .record_with("tg:daily:42", || {
                        builds_clone.fetch_add(1, Ordering::SeqCst);
                        Ok((xp_row("tg:daily:42", 42, 100), ()))
                    })
                    .unwrap()
            }));
        }

        let wins = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(Option::is_some)
            .count();

        assert_eq!(wins, 1);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_empty_ledger() {
        let ledger = TransactionLedger::new();
        assert!(ledger.is_empty());
        assert!(!ledger.contains_key("tg:daily:42"));
        assert!(ledger.get("tg:daily:42").is_none());
        assert!(ledger.for_user(1).is_empty());
    }
}
