#![deny(warnings, rust_2018_idioms)]

use proptest::prelude::*;
use unfurl::csd::{compute_csd, is_above_limit};
use unfurl::{Configuration, EventId, Extension, LockId, ThreadId};

fn commit(config: &mut Configuration, extension: Extension) -> EventId {
    config.commit(extension).expect("extension must be fresh")
}

fn spawn_worker(config: &mut Configuration) -> ThreadId {
    let main = ThreadId::root();
    let worker = main.child(1);
    let ex = config.create_thread(&main, worker.clone());
    commit(config, ex);
    let ex = config.init_thread(worker.clone(), &main);
    commit(config, ex);
    worker
}

#[test]
fn sequential_program_fits_one_segment() {
    let mut config = Configuration::default();
    let main = ThreadId::root();

    let ex = config.create_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.acquire_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.release_lock(&main, LockId(1));
    let last = commit(&mut config, ex);

    let unfolding = config.unfolding().borrow();
    assert!(!is_above_limit(&unfolding, last, 1));
    assert!(is_above_limit(&unfolding, last, 0));
    assert_eq!(compute_csd(&unfolding, last), 1);
}

#[test]
fn handover_needs_two_segments() {
    let mut config = Configuration::default();
    let main = ThreadId::root();

    let ex = config.create_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.acquire_lock(&main, LockId(1));
    commit(&mut config, ex);
    let worker = spawn_worker(&mut config);
    let ex = config.release_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.acquire_lock(&worker, LockId(1));
    let last = commit(&mut config, ex);

    let unfolding = config.unfolding().borrow();
    assert!(!is_above_limit(&unfolding, last, 2));
    assert!(is_above_limit(&unfolding, last, 1));
    assert_eq!(compute_csd(&unfolding, last), 2);
}

/// Scenario: two threads, one lock, and a final join: main starts, hands
/// over to the worker, and has to be scheduled again for the join.
#[test]
fn join_after_handover_needs_three_segments() {
    let mut config = Configuration::default();
    let main = ThreadId::root();

    let ex = config.create_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.acquire_lock(&main, LockId(1));
    commit(&mut config, ex);
    let worker = spawn_worker(&mut config);
    let ex = config.release_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.acquire_lock(&worker, LockId(1));
    commit(&mut config, ex);
    let ex = config.release_lock(&worker, LockId(1));
    commit(&mut config, ex);
    let ex = config.exit_thread(&worker);
    commit(&mut config, ex);
    let ex = config.join_thread(&main, &worker);
    let last = commit(&mut config, ex);

    let unfolding = config.unfolding().borrow();
    assert_eq!(compute_csd(&unfolding, last), 3);
    assert!(is_above_limit(&unfolding, last, 2));
    assert!(!is_above_limit(&unfolding, last, 3));
}

/// The bound is monotone in the limit.
#[test]
fn limit_monotonicity() {
    let mut config = Configuration::default();
    let main = ThreadId::root();

    let ex = config.create_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.acquire_lock(&main, LockId(1));
    commit(&mut config, ex);
    let worker = spawn_worker(&mut config);
    let ex = config.release_lock(&main, LockId(1));
    commit(&mut config, ex);
    let ex = config.acquire_lock(&worker, LockId(1));
    let last = commit(&mut config, ex);

    let unfolding = config.unfolding().borrow();
    for limit in 1..6 {
        if is_above_limit(&unfolding, last, limit) {
            assert!(is_above_limit(&unfolding, last, limit - 1));
        }
    }
}

/// One step of the random two-thread programs below.
#[derive(Debug, Clone, Copy)]
enum Step {
    /// Acquire and immediately release the shared lock.
    LockRound,
    /// A thread-local branching event.
    Local,
}

fn run_script(script: &[(bool, Step)]) -> (Configuration, EventId) {
    let mut config = Configuration::default();
    let main = ThreadId::root();

    let ex = config.create_lock(&main, LockId(1));
    let mut last = commit(&mut config, ex);
    let worker = spawn_worker(&mut config);

    for &(on_worker, step) in script {
        let tid = if on_worker { &worker } else { &main };
        match step {
            Step::LockRound => {
                let ex = config.acquire_lock(tid, LockId(1));
                commit(&mut config, ex);
                let ex = config.release_lock(tid, LockId(1));
                last = commit(&mut config, ex);
            }
            Step::Local => {
                let ex = config.local(tid, vec![on_worker]);
                last = commit(&mut config, ex);
            }
        }
    }

    (config, last)
}

proptest! {
    /// The pruning search and the exact search agree on every limit:
    /// `is_above_limit(e, k)` iff `compute_csd(e) > k`. This also implies
    /// the bound's monotonicity in `k`.
    #[test]
    fn limit_check_agrees_with_exact_csd(
        script in proptest::collection::vec(
            (any::<bool>(), prop_oneof![Just(Step::LockRound), Just(Step::Local)]),
            0..10,
        )
    ) {
        let (config, last) = run_script(&script);
        let unfolding = config.unfolding().borrow();

        let csd = compute_csd(&unfolding, last);
        prop_assert!(csd >= 1);

        for limit in 0..6usize {
            prop_assert_eq!(
                is_above_limit(&unfolding, last, limit),
                csd > limit,
                "limit {} vs csd {}", limit, csd
            );
        }
    }
}
