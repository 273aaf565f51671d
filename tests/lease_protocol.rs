// tests/lease_protocol.rs

use std::{collections::HashSet, sync::Arc, thread};

use tempfile::tempdir;

use offline_queue::{
    config::{DatabaseConfig, QueueConfig}, ByTenant, Database, EventLatency, EventPersistence, RecordStore,
    Released, StorageRecord, StoreError,
};

fn store() -> RecordStore {
    RecordStore::new(Database::open_in_memory().expect("in-memory db"))
}

fn make_ten(prefix: &str, latency: EventLatency) -> Vec<StorageRecord> {
    (0..10)
        .map(|i| {
            StorageRecord::new(
                format!("{prefix}-{i}"),
                format!("George-{prefix}-{i}"),
                latency,
                EventPersistence::Normal,
                i,
                vec![1, 2, 3],
            )
        })
        .collect()
}

fn ids_of(records: &[StorageRecord]) -> Vec<String> {
    records.iter().map(|r| r.id.clone()).collect()
}

#[test]
fn reserve_three_then_the_rest() {
    let store = store();
    store.insert(&make_ten("rt", EventLatency::RealTime)).unwrap();

    let first = store.get_and_reserve(EventLatency::Normal, 3, 2, 5).unwrap();
    assert_eq!(first.len(), 3);
    for rec in &first {
        assert_eq!(rec.latency, EventLatency::RealTime);
        assert_eq!(rec.retry_count, 0);
        // snapshot taken before the lease was written
        assert!(!rec.is_reserved());
    }

    let rest = store.get_and_reserve(EventLatency::Normal, 1000, 2, 5).unwrap();
    assert_eq!(rest.len(), 7);
    let first_ids: HashSet<_> = ids_of(&first).into_iter().collect();
    assert!(rest.iter().all(|r| !first_ids.contains(&r.id)));
}

#[test]
fn reserve_orders_by_latency_then_persistence_then_age() {
    let store = store();
    store.insert(&make_ten("n", EventLatency::Normal)).unwrap();
    store.insert(&make_ten("rt", EventLatency::RealTime)).unwrap();
    let crit = StorageRecord::new("crit", "t", EventLatency::Normal, EventPersistence::Critical, 99, vec![7]);
    store.insert(&[crit]).unwrap();

    let batch = store.get_and_reserve(EventLatency::Normal, 1000, 2, 5).unwrap();
    assert_eq!(batch.len(), 21);
    assert!(batch[..10].iter().all(|r| r.latency == EventLatency::RealTime));
    assert!(batch[..10].windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert_eq!(batch[10].id, "crit");
    assert!(batch[11..].windows(2).all(|w| w[0].timestamp < w[1].timestamp));
}

#[test]
fn min_latency_floor_is_respected() {
    let store = store();
    store.insert(&make_ten("off", EventLatency::Off)).unwrap();
    store.insert(&make_ten("n", EventLatency::Normal)).unwrap();

    let batch = store.get_and_reserve(EventLatency::Normal, 1000, 1, 10).unwrap();
    assert_eq!(batch.len(), 10);
    assert!(batch.iter().all(|r| r.latency == EventLatency::Normal));

    let all = store.get_and_reserve(EventLatency::Unspecified, 1000, 1, 10).unwrap();
    assert_eq!(all.len(), 10);
    assert!(all.iter().all(|r| r.latency == EventLatency::Off));
}

#[test]
fn repeated_reservation_covers_everything_once() {
    let store = store();
    let mut expected: HashSet<String> = HashSet::new();
    for (prefix, latency) in [
        ("off", EventLatency::Off),
        ("n", EventLatency::Normal),
        ("cd", EventLatency::CostDeferred),
        ("rt", EventLatency::RealTime),
        ("max", EventLatency::Max),
    ] {
        let records = make_ten(prefix, latency);
        if latency >= EventLatency::Normal {
            expected.extend(ids_of(&records));
        }
        store.insert(&records).unwrap();
    }

    let mut seen: Vec<String> = Vec::new();
    loop {
        let batch = store.get_and_reserve(EventLatency::Normal, 7, 10, 1_000).unwrap();
        if batch.is_empty() {
            break;
        }
        seen.extend(ids_of(&batch));
    }
    let unique: HashSet<String> = seen.iter().cloned().collect();
    assert_eq!(unique.len(), seen.len(), "a record was leased twice");
    assert_eq!(unique, expected);
}

#[test]
fn expired_leases_are_reclaimed() {
    let store = store();
    store.insert(&make_ten("n", EventLatency::Normal)).unwrap();

    assert_eq!(store.get_and_reserve(EventLatency::Normal, 1000, 2, 5).unwrap().len(), 10);
    // lease still valid at now=5 (expiry is strictly before now)
    assert!(store.get_and_reserve(EventLatency::Normal, 1000, 5, 50).unwrap().is_empty());
    // and gone at now=6
    assert_eq!(store.get_and_reserve(EventLatency::Normal, 1000, 6, 50).unwrap().len(), 10);
}

#[test]
fn reserve_validates_input() {
    let store = store();
    store.insert(&make_ten("n", EventLatency::Normal)).unwrap();
    assert!(matches!(
        store.get_and_reserve(EventLatency::Normal, 10, 1, 0),
        Err(StoreError::InvalidInput(_))
    ));
    assert!(store.get_and_reserve(EventLatency::Normal, 0, 1, 5).unwrap().is_empty());
    // the zero-limit call reserved nothing
    assert_eq!(store.get_and_reserve(EventLatency::Normal, 100, 1, 5).unwrap().len(), 10);
}

#[test]
fn large_batches_reserve_across_chunks() {
    let store = store();
    let records: Vec<StorageRecord> = (0..200)
        .map(|i| StorageRecord::new(format!("r{i}"), "t", EventLatency::Normal, EventPersistence::Normal, i, vec![0]))
        .collect();
    store.insert(&records).unwrap();

    assert_eq!(store.get_and_reserve(EventLatency::Normal, 150, 1, 10).unwrap().len(), 150);
    assert_eq!(store.get_and_reserve(EventLatency::Normal, 1000, 1, 10).unwrap().len(), 50);
    assert!(store.get_and_reserve(EventLatency::Normal, 1000, 1, 10).unwrap().is_empty());
}

#[test]
fn release_unconsumed_frees_only_the_suffix() {
    let store = store();
    store.insert(&make_ten("n", EventLatency::Normal)).unwrap();

    let records = store.get_and_reserve(EventLatency::Normal, 1000, 2, 5).unwrap();
    assert_eq!(records.len(), 10);
    assert!(store.get_and_reserve(EventLatency::Normal, 1000, 2, 5).unwrap().is_empty());

    assert_eq!(store.release_unconsumed(&records, 5).unwrap(), 5);
    let released = store.get_and_reserve(EventLatency::Normal, 1000, 2, 5).unwrap();
    assert_eq!(ids_of(&released), ids_of(&records[5..]));
    assert!(released.iter().all(|r| r.retry_count == 0));

    assert_eq!(store.release_unconsumed(&records, 10).unwrap(), 0);
    assert!(matches!(
        store.release_unconsumed(&records, 11),
        Err(StoreError::InvalidInput(_))
    ));
}

#[test]
fn simple_release_keeps_retry_count() {
    let store = store();
    store.insert(&make_ten("n", EventLatency::Normal)).unwrap();
    let batch = store.get_and_reserve(EventLatency::Normal, 1000, 2, 5).unwrap();

    let out = store.release_records(&ids_of(&batch), false, 0).unwrap();
    assert_eq!(out, Released::default());

    let again = store.get_and_reserve(EventLatency::Normal, 1000, 2, 5).unwrap();
    assert_eq!(again.len(), 10);
    assert!(again.iter().all(|r| r.retry_count == 0));
}

#[test]
fn retire_retries() {
    let store = store();
    store.insert(&make_ten("n", EventLatency::Normal)).unwrap();

    let records = store.get_and_reserve(EventLatency::Normal, 5, 2, 5).unwrap();
    assert_eq!(records.len(), 5);
    let timed_out = store.release_records(&ids_of(&records), true, 1).unwrap();
    assert_eq!(timed_out.retired, 0);
    assert!(timed_out.by_tenant.is_empty());

    let records = store.get_and_reserve(EventLatency::Normal, 1000, 2, 5).unwrap();
    assert_eq!(records.len(), 10);
    assert_eq!(records.iter().filter(|r| r.retry_count == 1).count(), 5);

    let timed_out = store.release_records(&ids_of(&records), true, 1).unwrap();
    assert_eq!(timed_out.retired, 5);
    assert_eq!(timed_out.by_tenant.len(), 5);
    for entry in &timed_out.by_tenant {
        assert_eq!(entry.count, 1);
        assert!(entry.tenant_token.starts_with("George-n-"));
    }
    let mut sorted = timed_out.by_tenant.clone();
    sorted.sort();
    assert_eq!(sorted, timed_out.by_tenant);

    // survivors are released with one more retry
    let left = store.get_and_reserve(EventLatency::Normal, 1000, 2, 5).unwrap();
    assert_eq!(left.len(), 5);
    assert!(left.iter().all(|r| r.retry_count == 1 && r.reserved_until == 0));
}

#[test]
fn retirement_groups_by_tenant_across_chunks() {
    let store = store();
    let records: Vec<StorageRecord> = (0..130)
        .map(|i| {
            let mut r = StorageRecord::new(
                format!("r{i}"),
                if i % 2 == 0 { "even" } else { "odd" },
                EventLatency::Normal,
                EventPersistence::Normal,
                i,
                vec![0],
            );
            r.retry_count = 3;
            r
        })
        .collect();
    store.insert(&records).unwrap();

    let out = store.release_records(&ids_of(&records), true, 3).unwrap();
    assert_eq!(out.retired, 130);
    assert_eq!(
        out.by_tenant,
        vec![
            ByTenant { tenant_token: "even".into(), count: 65 },
            ByTenant { tenant_token: "odd".into(), count: 65 },
        ]
    );
    assert_eq!(store.total_record_count().unwrap(), 0);
}

#[test]
fn release_rejects_empty_id_list() {
    let store = store();
    assert!(matches!(store.release_records(&[], true, 1), Err(StoreError::InvalidInput(_))));
    assert!(matches!(store.set_reserved(&[], 0), Err(StoreError::InvalidInput(_))));
}

#[test]
fn concurrent_handles_never_share_a_lease() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("queue.db");
    let cfg = DatabaseConfig::default();

    let seed = RecordStore::new(Database::open(&path, &cfg).unwrap());
    let records: Vec<StorageRecord> = (0..400)
        .map(|i| StorageRecord::new(format!("r{i}"), "t", EventLatency::Normal, EventPersistence::Normal, i, vec![0; 16]))
        .collect();
    seed.insert(&records).unwrap();

    let path = Arc::new(path);
    let workers: Vec<_> = (0..2)
        .map(|_| {
            let path = Arc::clone(&path);
            let cfg = cfg.clone();
            thread::spawn(move || {
                let store = RecordStore::new(Database::open(&path, &cfg).unwrap());
                let mut mine = Vec::new();
                loop {
                    let batch = store.get_and_reserve(EventLatency::Normal, 9, 1, 1_000).unwrap();
                    if batch.is_empty() {
                        break;
                    }
                    mine.extend(batch.into_iter().map(|r| r.id));
                }
                mine
            })
        })
        .collect();

    let results: Vec<Vec<String>> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    let a: HashSet<&String> = results[0].iter().collect();
    let b: HashSet<&String> = results[1].iter().collect();
    assert!(a.is_disjoint(&b), "two handles leased the same record");
    assert_eq!(a.len() + b.len(), 400);
    assert_eq!(results[0].len() + results[1].len(), 400);
}

#[test]
fn release_failed_uses_configured_retry_budget() {
    let store = store();
    let mut records = make_ten("n", EventLatency::Normal);
    for r in records.iter_mut().take(4) {
        r.retry_count = 2;
    }
    store.insert(&records).unwrap();
    let ids = ids_of(&records);

    let lenient = QueueConfig { max_retries: 3, ..QueueConfig::default() };
    assert_eq!(store.release_failed(&ids, &lenient).unwrap(), Released::default());

    // the first four are now at 3 retries, the rest at 1
    let out = store.release_failed(&ids, &lenient).unwrap();
    assert_eq!(out.retired, 4);
    assert_eq!(store.total_record_count().unwrap(), 6);

    let tight = QueueConfig { max_retries: 2, ..QueueConfig::default() };
    let out = store.release_failed(&ids_of(&records[4..]), &tight).unwrap();
    assert_eq!(out.retired, 6);
    assert_eq!(store.total_record_count().unwrap(), 0);
}
