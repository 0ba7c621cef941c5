#![deny(warnings, rust_2018_idioms)]

use std::sync::atomic::AtomicBool;

use unfurl::{CondId, Configuration, ConfigurationRoot, EventKind, Extension, LockId, ThreadId};

fn commit(config: &mut Configuration, extension: Extension) -> unfurl::EventId {
    config.commit(extension).expect("extension must be fresh")
}

fn main_tid() -> ThreadId {
    ThreadId::root()
}

/// Spawn a worker thread from main and run its init.
fn spawn_worker(config: &mut Configuration) -> ThreadId {
    let main = main_tid();
    let worker = main.child(1);
    let ex = config.create_thread(&main, worker.clone());
    commit(config, ex);
    let ex = config.init_thread(worker.clone(), &main);
    commit(config, ex);
    worker
}

/// A stale extension must not mutate the configuration.
#[test]
fn stale_extension_is_rejected() {
    let mut config = Configuration::default();
    let main = main_tid();

    let stale = config.create_lock(&main, LockId(1));
    let fresh = config.create_cond(&main, CondId(1));

    assert!(config.commit(stale).is_none());
    assert_eq!(config.lock_heads().len(), 0);

    assert!(config.commit(fresh).is_some());
    assert_eq!(config.cond_heads().len(), 1);
}

/// An extension built for one configuration cannot be committed into a
/// clone, even though the clone starts with the same extension counter.
#[test]
fn extension_is_bound_to_its_configuration() {
    let config = Configuration::default();
    let main = main_tid();

    let extension = config.create_lock(&main, LockId(1));
    let mut clone = config.clone();
    assert!(clone.commit(extension).is_none());
}

/// Every predecessor of every committed event is in the configuration, and
/// no two events of the configuration conflict.
#[test]
fn downward_closure_and_conflict_freedom() {
    let mut config = Configuration::default();
    let main = main_tid();
    let worker = spawn_worker(&mut config);

    let ex = config.create_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.acquire_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.release_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.acquire_lock(&worker, LockId(1));
    commit(&mut config, ex);
    let ex = config.release_lock(&worker, LockId(1));
    commit(&mut config, ex);
    let ex = config.exit_thread(&worker);
    commit(&mut config, ex);
    let ex = config.join_thread(&main, &worker);
    commit(&mut config, ex);

    let events = config.events();
    let unfolding = config.unfolding().borrow();

    for &event in &events {
        for pred in unfolding[event].immediate_predecessors() {
            assert!(events.contains(&pred), "{} misses {}", event, pred);
        }
    }

    for &a in &events {
        for &b in &events {
            assert!(!unfolding.in_conflict(a, b), "{} # {}", a, b);
        }
    }
}

/// The causal order is antisymmetric and reflexive on `≤`, every cone entry
/// happens before its event, and predecessors have strictly smaller depth.
#[test]
fn causal_order_and_cone_sanity() {
    let mut config = Configuration::default();
    let main = main_tid();
    let worker = spawn_worker(&mut config);

    let ex = config.create_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.acquire_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.release_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.acquire_lock(&worker, LockId(1));
    commit(&mut config, ex);

    let events = config.events();
    let unfolding = config.unfolding().borrow();

    for &a in &events {
        assert!(unfolding.less_than_eq(a, a));
        for &b in &events {
            if a != b {
                assert!(
                    !(unfolding.less_than(a, b) && unfolding.less_than(b, a)),
                    "{} and {} are mutually ordered",
                    a,
                    b
                );
            }
        }
    }

    for &event in &events {
        for (_, &past) in unfolding[event].cone().iter() {
            assert!(unfolding.less_than_eq(past, event));
        }
        for pred in unfolding[event].immediate_predecessors() {
            assert!(unfolding[pred].depth() < unfolding[event].depth());
        }
    }
}

/// Scenario: two threads, two disjoint locks. One acquire per thread and
/// lock, and nothing to reorder.
#[test]
fn disjoint_locks_have_no_alternatives() {
    let mut config = Configuration::default();
    let main = main_tid();
    let worker = spawn_worker(&mut config);

    let ex = config.create_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.create_lock(&worker, LockId(2));
    commit(&mut config, ex);
    let ex = config.acquire_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.acquire_lock(&worker, LockId(2));
    commit(&mut config, ex);
    let ex = config.release_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.release_lock(&worker, LockId(2));
    commit(&mut config, ex);
    let ex = config.exit_thread(&worker);
    commit(&mut config, ex);
    let ex = config.exit_thread(&main);
    commit(&mut config, ex);

    {
        let unfolding = config.unfolding().borrow();
        let stats = unfolding.statistics();
        assert_eq!(stats.unique_events[EventKind::LockAcquire as usize], 2);
    }

    let cancel = AtomicBool::new(false);
    assert!(config.conflicting_extensions(false, &cancel).is_empty());
}

/// Scenario: signal and the two wait halves.
#[test]
fn signal_wait_roundtrip() {
    let mut config = Configuration::default();
    let main = main_tid();
    let worker = spawn_worker(&mut config);

    let ex = config.create_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.create_cond(&main, CondId(1));
    commit(&mut config, ex);

    let ex = config.acquire_lock(&worker, LockId(1));
    commit(&mut config, ex);
    let ex = config.wait1(&worker, CondId(1), LockId(1));
    commit(&mut config, ex);

    // the worker is blocked and the lock was released into the wait
    assert!(!config.runnable_threads().contains(&worker));
    assert!(config.can_acquire_lock(LockId(1)));
    assert!(!config.was_notified(&worker, CondId(1)));

    let ex = config.signal_thread(&main, CondId(1), Some(&worker));
    let signal = commit(&mut config, ex);
    assert!(!config.unfolding().borrow()[signal].is_lost());

    assert!(config.was_notified(&worker, CondId(1)));
    assert!(config.runnable_threads().contains(&worker));

    let ex = config.wait2(&worker, CondId(1), LockId(1));
    let wait2 = commit(&mut config, ex);
    assert_eq!(
        config.unfolding().borrow()[wait2].notifying_predecessor(),
        Some(signal)
    );
}

/// Scenario: a signal with no waiter is lost, and a later wait1 is not
/// notified by it.
#[test]
fn lost_signal_does_not_notify_later_wait() {
    let mut config = Configuration::default();
    let main = main_tid();
    let worker = spawn_worker(&mut config);

    let ex = config.create_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.create_cond(&main, CondId(1));
    commit(&mut config, ex);

    let ex = config.signal_thread(&main, CondId(1), None);
    let signal = commit(&mut config, ex);
    assert!(config.unfolding().borrow()[signal].is_lost());

    let ex = config.acquire_lock(&worker, LockId(1));
    commit(&mut config, ex);
    let ex = config.wait1(&worker, CondId(1), LockId(1));
    commit(&mut config, ex);

    assert!(!config.was_notified(&worker, CondId(1)));
    assert!(!config.runnable_threads().contains(&worker));
}

/// A destroyed lock leaves the active set.
#[test]
fn lock_lifecycle() {
    let mut config = Configuration::default();
    let main = main_tid();

    let ex = config.create_lock(&main, LockId(1));
    commit(&mut config, ex);
    assert!(config.can_acquire_lock(LockId(1)));

    let ex = config.acquire_lock(&main, LockId(1));
    commit(&mut config, ex);
    assert!(!config.can_acquire_lock(LockId(1)));

    let ex = config.release_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.destroy_lock(&main, LockId(1));
    commit(&mut config, ex);
    assert!(config.lock_heads().is_empty());
}

/// Optional creation: using a never-created lock marks its id as used, so
/// creating it afterwards is a configuration violation.
#[test]
#[should_panic(expected = "lock id cannot be reused")]
fn optional_creation_forbids_later_create() {
    let mut config = Configuration::default();
    let main = main_tid();

    let ex = config.acquire_lock(&main, LockId(7));
    commit(&mut config, ex);
    let ex = config.release_lock(&main, LockId(7));
    commit(&mut config, ex);
    let ex = config.destroy_lock(&main, LockId(7));
    commit(&mut config, ex);

    // the id was burned by the creation-less acquire
    let _ = config.create_lock(&main, LockId(7));
}

/// With optional creation disabled, acquiring a never-created lock is a
/// configuration violation.
#[test]
#[should_panic(expected = "can_acquire_lock")]
fn strict_creation_rejects_unknown_locks() {
    let mut root = ConfigurationRoot::with_optional_creation_events(false);
    root.add_thread();
    let config = root.construct();

    let _ = config.acquire_lock(&main_tid(), LockId(7));
}

/// A lost signal on a never-created cond has no predecessors at all, and
/// still burns the cond id.
#[test]
#[should_panic(expected = "condition variable id cannot be reused")]
fn lost_signal_without_cond_creation() {
    let mut config = Configuration::default();
    let main = main_tid();

    let ex = config.signal_thread(&main, CondId(5), None);
    let signal = commit(&mut config, ex);
    {
        let unfolding = config.unfolding().borrow();
        assert!(unfolding[signal].is_lost());
        assert!(unfolding[signal].cond_predecessors().is_empty());
    }

    let ex = config.destroy_cond(&main, CondId(5));
    commit(&mut config, ex);

    // the id was burned by the creation-less signal
    let _ = config.create_cond(&main, CondId(5));
}

/// With optional creation disabled the same lost signal is rejected.
#[test]
#[should_panic(expected = "condition variable must (still) exist")]
fn strict_creation_rejects_lost_signal() {
    let mut root = ConfigurationRoot::with_optional_creation_events(false);
    root.add_thread();
    let config = root.construct();

    let _ = config.signal_thread(&main_tid(), CondId(5), None);
}

/// Active threads excludes exited and waiting threads.
#[test]
fn active_thread_accounting() {
    let mut config = Configuration::default();
    let main = main_tid();
    let worker = spawn_worker(&mut config);
    assert_eq!(config.active_threads(), 2);

    let ex = config.create_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.create_cond(&main, CondId(1));
    commit(&mut config, ex);
    let ex = config.acquire_lock(&worker, LockId(1));
    commit(&mut config, ex);
    let ex = config.wait1(&worker, CondId(1), LockId(1));
    commit(&mut config, ex);
    assert_eq!(config.active_threads(), 1);

    let ex = config.exit_thread(&main);
    commit(&mut config, ex);
    assert_eq!(config.active_threads(), 0);
}

/// Broadcast notifies all waiting threads at once.
#[test]
fn broadcast_notifies_every_waiter() {
    let mut config = Configuration::default();
    let main = main_tid();
    let w1 = main.child(1);
    let w2 = main.child(2);

    let ex = config.create_thread(&main, w1.clone());
    commit(&mut config, ex);
    let ex = config.init_thread(w1.clone(), &main);
    commit(&mut config, ex);
    let ex = config.create_thread(&main, w2.clone());
    commit(&mut config, ex);
    let ex = config.init_thread(w2.clone(), &main);
    commit(&mut config, ex);

    let ex = config.create_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.create_cond(&main, CondId(1));
    commit(&mut config, ex);

    for worker in [&w1, &w2] {
        let ex = config.acquire_lock(worker, LockId(1));
        commit(&mut config, ex);
        let ex = config.wait1(worker, CondId(1), LockId(1));
        commit(&mut config, ex);
    }

    let notified = [w1.clone(), w2.clone()];
    let ex = config.broadcast_threads(&main, CondId(1), &notified);
    let broadcast = commit(&mut config, ex);

    {
        let unfolding = config.unfolding().borrow();
        assert_eq!(unfolding[broadcast].notified_waits().len(), 2);
        assert!(!unfolding[broadcast].is_lost());
        assert!(unfolding.broadcast_notifies_thread(broadcast, &w1));
        assert!(unfolding.broadcast_notifies_thread(broadcast, &w2));
    }

    assert!(config.was_notified(&w1, CondId(1)));
    assert!(config.was_notified(&w2, CondId(1)));

    // both re-take the lock, one after the other
    let ex = config.wait2(&w1, CondId(1), LockId(1));
    commit(&mut config, ex);
    let ex = config.release_lock(&w1, LockId(1));
    commit(&mut config, ex);
    let ex = config.wait2(&w2, CondId(1), LockId(1));
    commit(&mut config, ex);
}

/// Dot output mentions every thread cluster.
#[test]
fn dot_output() {
    let mut config = Configuration::default();
    let main = main_tid();
    let worker = spawn_worker(&mut config);
    let ex = config.create_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.acquire_lock(&worker, LockId(1));
    commit(&mut config, ex);

    let mut out = Vec::new();
    config.to_dot(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("digraph"));
    assert!(text.contains("cluster_1"));
    assert!(text.contains("cluster_1,1"));
    assert!(text.contains("lock_acquire"));
}
