#![deny(warnings, rust_2018_idioms)]

use std::sync::atomic::AtomicBool;

use unfurl::{Configuration, EventKind, Extension, Fingerprint, LockId, ThreadId};

fn commit(config: &mut Configuration, extension: Extension) -> unfurl::EventId {
    config.commit(extension).expect("extension must be fresh")
}

/// Committing the same kind with pointer-equal predecessors in two
/// configurations sharing an unfolding yields the same event.
#[test]
fn dedup_identity_across_configurations() {
    let mut config1 = Configuration::default();
    let mut config2 = config1.clone();
    let main = ThreadId::root();

    let ex = config1.acquire_lock(&main, LockId(1));
    let acq1 = commit(&mut config1, ex);
    let ex = config2.acquire_lock(&main, LockId(1));
    let acq2 = commit(&mut config2, ex);

    assert_eq!(acq1, acq2);

    let stats = config1.unfolding().borrow().statistics().clone();
    assert_eq!(stats.events_deduplicated, 1);
}

/// Regression: deduplication distinguishes events by their lock id.
#[test]
fn dedup_distinguishes_lock_ids() {
    let mut config1 = Configuration::default();
    let mut config2 = config1.clone();
    let main = ThreadId::root();

    let ex = config1.acquire_lock(&main, LockId(1));
    let acq1 = commit(&mut config1, ex);
    let ex = config2.acquire_lock(&main, LockId(2));
    let acq2 = commit(&mut config2, ex);

    assert_ne!(acq1, acq2);
}

/// Two acquires of the same never-created lock from diverging branches are
/// distinct events in immediate conflict.
#[test]
fn sibling_acquires_conflict() {
    let config1 = Configuration::default();
    let main = ThreadId::root();
    let worker = main.child(1);

    let mut config1 = config1;
    let ex = config1.create_lock(&main, LockId(1));
    commit(&mut config1, ex);
    let ex = config1.create_thread(&main, worker.clone());
    commit(&mut config1, ex);
    let ex = config1.init_thread(worker.clone(), &main);
    commit(&mut config1, ex);

    // branch: either main or the worker acquires first
    let mut config2 = config1.clone();
    let ex = config1.acquire_lock(&main, LockId(1));
    let by_main = commit(&mut config1, ex);
    let ex = config2.acquire_lock(&worker, LockId(1));
    let by_worker = commit(&mut config2, ex);

    assert_ne!(by_main, by_worker);

    let unfolding = config1.unfolding().borrow();
    assert!(unfolding[by_main]
        .immediate_conflicts()
        .contains(&by_worker));
    assert!(unfolding[by_worker]
        .immediate_conflicts()
        .contains(&by_main));
    assert!(unfolding.in_conflict(by_main, by_worker));
}

/// Successor back-edges are registered when an event is published.
#[test]
fn successor_edges() {
    let mut config = Configuration::default();
    let main = ThreadId::root();

    let ex = config.create_lock(&main, LockId(1));
    let create = commit(&mut config, ex);
    let ex = config.acquire_lock(&main, LockId(1));
    let acquire = commit(&mut config, ex);

    let unfolding = config.unfolding().borrow();
    assert!(unfolding[create].successors().contains(&acquire));
    assert_eq!(
        unfolding[acquire].thread_predecessor(),
        Some(create),
        "acquire directly follows the create on the main thread"
    );
    assert_eq!(unfolding[acquire].lock_predecessor(), Some(create));
}

/// After removing a leaf event, deduplicating an equal event reports it as
/// unknown again.
#[test]
fn remove_then_rededuplicate() {
    let config = two_thread_lock_contention();
    let main = ThreadId::root();
    let worker = main.child(1);

    // the worker is blocked on the lock main holds; enumerate the acquires
    // that would unblock it
    let extensions =
        config.conflicting_extensions_deadlock(&worker, LockId(1), EventKind::LockAcquire, false);
    assert!(!extensions.is_empty());
    let alternative = extensions[0];

    {
        let mut unfolding = config.unfolding().borrow_mut();
        assert!(!unfolding[alternative].has_successors());
        let live_before = unfolding.size();
        unfolding.remove(alternative);
        assert_eq!(unfolding.size(), live_before - 1);
        assert!(unfolding.get(alternative).is_none());
    }

    // unknown_only keeps already-known events out; after the removal the
    // removed alternative is unknown again and comes back alone
    let again =
        config.conflicting_extensions_deadlock(&worker, LockId(1), EventKind::LockAcquire, true);
    assert_eq!(again.len(), 1);

    // without an intervening removal everything is known
    let nothing =
        config.conflicting_extensions_deadlock(&worker, LockId(1), EventKind::LockAcquire, true);
    assert!(nothing.is_empty());
}

/// Two fingerprint-equal branches: the one later in the adequate order
/// becomes a cutoff, together with everything above it.
#[test]
fn equal_fingerprints_mark_cutoffs() {
    let mut config1 = Configuration::default();
    let mut config2 = config1.clone();
    let main = ThreadId::root();

    let ex = config1.local(&main, vec![true]);
    let left = commit(&mut config1, ex);

    let ex = config2.local(&main, vec![false]);
    let right = commit(&mut config2, ex);
    let ex = config2.local(&main, vec![false, true]);
    let above_right = commit(&mut config2, ex);

    let fp = Fingerprint {
        value: 42,
        thread_delta: 7,
    };

    let mut unfolding = config1.unfolding().borrow_mut();
    assert!(unfolding.attach_fingerprint(left, fp));
    // attaching is idempotent, but a different value is a mismatch
    assert!(unfolding.attach_fingerprint(left, fp));
    assert!(!unfolding.attach_fingerprint(
        left,
        Fingerprint {
            value: 43,
            thread_delta: 7,
        }
    ));

    // both branches reach the same state; the younger one is redundant
    assert!(unfolding.attach_fingerprint(right, fp));
    assert!(!unfolding[left].is_cutoff());
    assert!(unfolding[right].is_cutoff());
    assert!(
        unfolding[above_right].is_cutoff(),
        "cutoff propagates to successors"
    );
}

/// The local configuration of an event is the event plus its causes.
#[test]
fn local_configuration_contents() {
    let mut config = Configuration::default();
    let main = ThreadId::root();

    let ex = config.create_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.acquire_lock(&main, LockId(1));
    let acquire = commit(&mut config, ex);

    let unfolding = config.unfolding().borrow();
    // acquire, create, thread_init, program_init
    assert_eq!(unfolding.local_configuration_size(acquire), 4);

    let causes: Vec<_> = unfolding.causes(acquire, false).collect();
    assert_eq!(causes.len(), 2);
    assert!(!causes.contains(&acquire));
    assert!(!causes.contains(&unfolding.root()));
}

/// Statistics reflect insertions and deduplications.
#[test]
fn statistics_block() {
    let mut config = Configuration::default();
    let main = ThreadId::root();

    let ex = config.create_lock(&main, LockId(1));
    commit(&mut config, ex);

    let mut out = Vec::new();
    config
        .unfolding()
        .borrow()
        .print_statistics(&mut out)
        .unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("== UNFOLDING STATISTICS =="));
    assert!(text.contains("lock_create: 1"));
}

/// Conflicting extensions poll the cancellation flag before every event.
#[test]
fn enumeration_honors_cancellation() {
    let config = two_thread_lock_contention();
    let cancelled = AtomicBool::new(true);
    assert!(config.conflicting_extensions(true, &cancelled).is_empty());
}

/// main: create lock, spawn worker, acquire + hold; worker: blocked.
fn two_thread_lock_contention() -> Configuration {
    let mut config = Configuration::default();
    let main = ThreadId::root();
    let worker = main.child(1);

    let ex = config.create_thread(&main, worker.clone());
    commit(&mut config, ex);
    let ex = config.init_thread(worker, &main);
    commit(&mut config, ex);
    let ex = config.create_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.acquire_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.release_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.acquire_lock(&main, LockId(1));
    commit(&mut config, ex);

    config
}
