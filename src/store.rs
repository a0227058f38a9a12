// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! In-memory ledger of captured requests.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::capture::CaptureLog;

/// One inbound request as it was recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedRequest {
    /// Arrival index, unique for the lifetime of the store.
    pub seq: u64,
    /// Strictly increasing across entries.
    pub received_at: DateTime<Utc>,
    pub payload: Value,
}

impl CapturedRequest {
    /// `{"<timestamp>": <payload>}`, the shape served by the query API.
    pub fn to_keyed_json(&self) -> Value {
        let mut m = serde_json::Map::with_capacity(1);
        m.insert(self.received_at.to_rfc3339(), self.payload.clone());
        Value::Object(m)
    }
}

#[derive(Default)]
struct Ledger {
    entries: Vec<CapturedRequest>,
    next_seq: u64,
    last_stamp: Option<DateTime<Utc>>,
}

impl Ledger {
    fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }
}

/// Thread-safe append-only ledger, mirrored to an optional durable log.
///
/// `record` and `list` only take the ledger lock for the duration of a push
/// or a clone, so they never wait on tunnel operations. `clear` swaps the
/// entries out under the same write lock, so an entry is either fully
/// before a clear (and gone) or fully after it (and kept).
pub struct CaptureStore {
    ledger: RwLock<Ledger>,
    log: Option<CaptureLog>,
}

impl CaptureStore {
    pub fn new(log: Option<CaptureLog>) -> Self {
        Self {
            ledger: RwLock::new(Ledger::default()),
            log,
        }
    }

    /// Stamp and append `payload`, queueing it for the durable log.
    pub fn record(&self, payload: Value) -> CapturedRequest {
        let entry = {
            let mut ledger = self.write();
            let entry = CapturedRequest {
                seq: ledger.next_seq,
                received_at: ledger.stamp(),
                payload,
            };
            ledger.next_seq += 1;
            // queued under the lock so the log keeps ledger order
            if let Some(log) = &self.log {
                log.append(&entry.received_at, &entry.payload);
            }
            ledger.entries.push(entry.clone());
            entry
        };

        tracing::debug!(seq = entry.seq, "request captured");

        entry
    }

    /// Snapshot of the ledger, newest first.
    pub fn list(&self) -> Vec<CapturedRequest> {
        self.read().entries.iter().rev().cloned().collect()
    }

    /// Drop every entry. Sequence numbers and timestamps keep increasing.
    pub fn clear(&self) {
        let dropped = std::mem::take(&mut self.write().entries).len();
        tracing::info!(dropped, "capture ledger cleared");
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn log(&self) -> Option<&CaptureLog> {
        self.log.as_ref()
    }

    // Every mutation is a single push or swap, so a poisoned ledger is
    // still consistent.
    fn read(&self) -> RwLockReadGuard<'_, Ledger> {
        self.ledger.read().unwrap_or_else(|poisoned| {
            tracing::warn!("capture ledger lock poisoned during read");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Ledger> {
        self.ledger.write().unwrap_or_else(|poisoned| {
            tracing::warn!("capture ledger lock poisoned during write");
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;
    use std::sync::Arc;

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(25)]
    fn list_is_reverse_arrival_order(#[case] n: usize) {
        let store = CaptureStore::new(None);
        for i in 0..n {
            store.record(json!({ "i": i }));
        }
        let got: Vec<Value> = store.list().into_iter().map(|e| e.payload).collect();
        let want: Vec<Value> = (0..n).rev().map(|i| json!({ "i": i })).collect();
        assert_eq!(got, want);
    }

    #[test]
    fn timestamps_are_unique_and_increasing() {
        let store = CaptureStore::new(None);
        for _ in 0..200 {
            store.record(json!({}));
        }
        let entries = store.list();
        for pair in entries.windows(2) {
            assert!(pair[0].received_at > pair[1].received_at);
            assert!(pair[0].seq > pair[1].seq);
        }
    }

    #[test]
    fn same_payload_twice_keeps_both_entries() {
        let store = CaptureStore::new(None);
        store.record(json!({"dup": true}));
        store.record(json!({"dup": true}));
        let entries = store.list();
        assert_eq!(entries.len(), 2);
        assert_ne!(
            entries[0].received_at.to_rfc3339(),
            entries[1].received_at.to_rfc3339()
        );
    }

    #[test]
    fn clear_then_list_is_empty() {
        let store = CaptureStore::new(None);
        store.record(json!({"a": 1}));
        store.record(json!({"b": 2}));
        store.clear();
        assert!(store.list().is_empty());
        assert!(store.is_empty());

        let e = store.record(json!({"c": 3}));
        assert_eq!(e.seq, 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn keyed_json_uses_timestamp_key() {
        let store = CaptureStore::new(None);
        let e = store.record(json!({"a": 1}));
        let v = e.to_keyed_json();
        assert_eq!(v[e.received_at.to_rfc3339()], json!({"a": 1}));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_records_and_clear_lose_nothing_after_clear() {
        let store = Arc::new(CaptureStore::new(None));

        let mut handles = Vec::new();
        for t in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..250 {
                    store.record(json!({ "t": t, "i": i }));
                }
            }));
        }
        store.clear();
        for h in handles {
            h.await.expect("task");
        }

        // every surviving entry was recorded after the clear, in order
        let entries = store.list();
        assert!(entries.len() <= 1000);
        for pair in entries.windows(2) {
            assert!(pair[0].seq > pair[1].seq);
        }

        store.clear();
        assert!(store.list().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_records_reach_log_in_ledger_order() -> anyhow::Result<()> {
        let tmp = crate::test_helpers::make_temp_log_path("store_order");
        let log = CaptureLog::new(tmp.clone());
        let store = Arc::new(CaptureStore::new(Some(log.clone())));

        let mut handles = Vec::new();
        for t in 0..8 {
            let store = store.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                for i in 0..500 {
                    store.record(json!({ "t": t, "i": i }));
                }
            }));
        }
        for h in handles {
            h.await?;
        }
        log.flush().await;

        let logged = crate::capture::read_log(&tmp).await?;
        let ledger: Vec<CapturedRequest> = store.list().into_iter().rev().collect();
        assert_eq!(logged.len(), ledger.len());
        for ((stamp, payload), entry) in logged.iter().zip(&ledger) {
            assert_eq!(*stamp, entry.received_at);
            assert_eq!(*payload, entry.payload);
        }

        let _ = tokio::fs::remove_file(&tmp).await;
        Ok(())
    }
}
