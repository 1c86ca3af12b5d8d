//! Race condition tests
//!
//! Offline model of the two-store acquire arbitration: a create-if-absent
//! KV plus a uniquely-constrained row store. N concurrent acquires for one
//! label must produce exactly one winner, no phantom rows, and exactly one
//! availability decrement — with the rest receiving a conflict.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// In-memory stand-in for the KV conditional set.
#[derive(Default)]
struct FakeKv {
    entries: Mutex<HashMap<String, i64>>,
}

impl FakeKv {
    /// SET NX: true only for the first caller.
    fn set_nx(&self, key: &str, user_id: i64) -> bool {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(key) {
            return false;
        }
        entries.insert(key.to_string(), user_id);
        true
    }

    fn delete_if_holder(&self, key: &str, user_id: i64) -> bool {
        let mut entries = self.entries.lock().unwrap();
        if entries.get(key) == Some(&user_id) {
            entries.remove(key);
            return true;
        }
        false
    }
}

/// In-memory stand-in for the seats table with its unique constraint and
/// the guarded availability decrement.
#[derive(Default)]
struct FakeDb {
    rows: Mutex<HashSet<(i64, String)>>,
    available: Mutex<i32>,
}

impl FakeDb {
    fn try_insert(&self, seat_type_id: i64, label: &str) -> bool {
        // One lock guards both writes, like a transaction.
        let mut rows = self.rows.lock().unwrap();
        if !rows.insert((seat_type_id, label.to_string())) {
            return false;
        }
        let mut available = self.available.lock().unwrap();
        if *available <= 0 {
            // Guard refused: roll the row back.
            rows.remove(&(seat_type_id, label.to_string()));
            return false;
        }
        *available -= 1;
        true
    }
}

#[derive(Debug, PartialEq)]
enum Outcome {
    Locked,
    Conflict,
}

/// The §4.1 acquire shape: KV fast path, DB arbiter, KV compensation.
fn acquire(kv: &FakeKv, db: &FakeDb, seat_type_id: i64, label: &str, user_id: i64) -> Outcome {
    let key = format!("seat_lock:1:{}:{}", seat_type_id, label);
    if !kv.set_nx(&key, user_id) {
        return Outcome::Conflict;
    }
    if !db.try_insert(seat_type_id, label) {
        kv.delete_if_holder(&key, user_id);
        return Outcome::Conflict;
    }
    Outcome::Locked
}

#[tokio::test]
async fn exactly_one_winner_per_label() {
    const CONTENDERS: i64 = 50;

    let kv = Arc::new(FakeKv::default());
    let db = Arc::new(FakeDb::default());
    *db.available.lock().unwrap() = 100;

    let mut handles = Vec::new();
    for user_id in 0..CONTENDERS {
        let kv = kv.clone();
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            acquire(&kv, &db, 1, "V1", user_id)
        }));
    }

    let mut winners = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Outcome::Locked => winners += 1,
            Outcome::Conflict => conflicts += 1,
        }
    }

    assert_eq!(winners, 1, "exactly one acquire may win");
    assert_eq!(conflicts, CONTENDERS - 1);
    assert_eq!(db.rows.lock().unwrap().len(), 1, "no phantom seat rows");
    assert_eq!(*db.available.lock().unwrap(), 99, "one decrement");
}

#[tokio::test]
async fn contention_across_labels_is_independent() {
    let kv = Arc::new(FakeKv::default());
    let db = Arc::new(FakeDb::default());
    *db.available.lock().unwrap() = 100;

    let labels = ["V1", "V2", "V3", "V4", "V5"];
    let mut handles = Vec::new();
    for (i, label) in labels.iter().enumerate() {
        for user in 0..10 {
            let kv = kv.clone();
            let db = db.clone();
            let label = label.to_string();
            handles.push(tokio::spawn(async move {
                (i, acquire(&kv, &db, 1, &label, user))
            }));
        }
    }

    let mut winners_per_label = HashMap::new();
    for handle in handles {
        let (label_index, outcome) = handle.await.unwrap();
        if outcome == Outcome::Locked {
            *winners_per_label.entry(label_index).or_insert(0) += 1;
        }
    }

    for (label_index, winners) in winners_per_label {
        assert_eq!(winners, 1, "label {} had {} winners", label_index, winners);
    }
    assert_eq!(*db.available.lock().unwrap(), 95);
}

#[tokio::test]
async fn sold_out_tier_rejects_even_free_labels() {
    let kv = Arc::new(FakeKv::default());
    let db = Arc::new(FakeDb::default());
    *db.available.lock().unwrap() = 2;

    let mut locked = 0;
    for (user, label) in [(1, "A1"), (2, "A2"), (3, "A3"), (4, "A4")] {
        if acquire(&kv, &db, 7, label, user) == Outcome::Locked {
            locked += 1;
        }
    }

    assert_eq!(locked, 2, "availability bounds the number of winners");
    assert_eq!(*db.available.lock().unwrap(), 0);
    // The losers' KV entries were compensated away, so their labels stay
    // acquirable once availability is restored.
    *db.available.lock().unwrap() = 1;
    assert_eq!(acquire(&kv, &db, 7, "A3", 9), Outcome::Locked);
}

#[test]
fn kv_compensation_is_holder_guarded() {
    let kv = FakeKv::default();
    assert!(kv.set_nx("seat_lock:1:1:V1", 1));
    // Another user's compensation attempt must not free the winner's lock.
    assert!(!kv.delete_if_holder("seat_lock:1:1:V1", 2));
    assert!(kv.delete_if_holder("seat_lock:1:1:V1", 1));
}
