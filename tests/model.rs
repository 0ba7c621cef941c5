#![deny(warnings, rust_2018_idioms)]

use std::sync::atomic::AtomicBool;

use unfurl::schedule::catch_up_order;
use unfurl::{Builder, EventId, Extension, LockId, SchedulingPolicy, ThreadId};

fn commit_into(exploration: &mut unfurl::Exploration, extension: Extension) -> EventId {
    exploration.commit(extension).expect("extension must be fresh")
}

fn contention(exploration: &mut unfurl::Exploration) -> ThreadId {
    let main = ThreadId::root();
    let worker = main.child(1);

    let ex = exploration.configuration().create_lock(&main, LockId(1));
    commit_into(exploration, ex);
    let ex = exploration
        .configuration()
        .create_thread(&main, worker.clone());
    commit_into(exploration, ex);
    let ex = exploration
        .configuration()
        .init_thread(worker.clone(), &main);
    commit_into(exploration, ex);

    let ex = exploration.configuration().acquire_lock(&main, LockId(1));
    commit_into(exploration, ex);
    let ex = exploration.configuration().release_lock(&main, LockId(1));
    commit_into(exploration, ex);
    let ex = exploration
        .configuration()
        .acquire_lock(&worker, LockId(1));
    commit_into(exploration, ex);

    worker
}

#[test]
fn builder_defaults() {
    let builder = Builder::new();
    assert_eq!(builder.max_context_switch_degree, 0);
    assert!(!builder.enable_race_detection);
    assert!(builder.optional_creation_events);
    assert_eq!(builder.thread_scheduling, SchedulingPolicy::First);
}

#[test]
fn race_detector_follows_builder_flag() {
    let mut builder = Builder::new();
    builder.enable_race_detection = false;
    assert!(builder.build().race_detector_mut().is_none());

    builder.enable_race_detection = true;
    assert!(builder.build().race_detector_mut().is_some());
}

/// Without schedule exploration no extensions are handed out.
#[test]
fn exploration_respects_explore_flag() {
    let mut builder = Builder::new();
    builder.explore_schedules = false;
    let mut exploration = builder.build();
    contention(&mut exploration);

    let cancel = AtomicBool::new(false);
    assert!(exploration.conflicting_extensions(&cancel).is_empty());
}

/// An unlimited bound keeps the alternative; a bound of 1 rejects it and
/// withdraws the event from the unfolding.
#[test]
fn csd_bound_gates_extensions() {
    let mut builder = Builder::new();
    builder.explore_schedules = true;
    builder.max_context_switch_degree = 0;

    let mut exploration = builder.build();
    contention(&mut exploration);
    let cancel = AtomicBool::new(false);
    let kept = exploration.conflicting_extensions(&cancel);
    assert_eq!(kept.len(), 1);

    builder.max_context_switch_degree = 1;
    let mut exploration = builder.build();
    contention(&mut exploration);
    let before = exploration.configuration().unfolding().borrow().size();
    let kept = exploration.conflicting_extensions(&cancel);
    assert!(kept.is_empty());
    let after = exploration.configuration().unfolding().borrow().size();
    assert_eq!(after, before, "rejected extension is withdrawn again");
}

/// The catch-up order of a seeded branch respects causality.
#[test]
fn catch_up_order_is_causal() {
    let mut builder = Builder::new();
    builder.explore_schedules = true;
    let mut exploration = builder.build();
    contention(&mut exploration);

    let cancel = AtomicBool::new(false);
    let kept = exploration.conflicting_extensions(&cancel);
    assert_eq!(kept.len(), 1);

    let replay = exploration.catch_up_order(kept[0]);
    let unfolding = exploration.configuration().unfolding().borrow();
    for (i, &event) in replay.iter().enumerate() {
        for pred in unfolding[event].immediate_predecessors() {
            let at = replay.iter().position(|&r| r == pred);
            match at {
                Some(at) => assert!(at < i, "{} replayed after its successor", pred),
                None => assert_eq!(pred, unfolding.root()),
            }
        }
    }
    assert!(replay.contains(&kept[0]));

    drop(unfolding);

    // the direct helper agrees with the exploration wrapper
    let direct = catch_up_order(
        &exploration.configuration().unfolding().borrow(),
        kept[0],
    );
    assert_eq!(direct, replay);
}

#[test]
fn scheduling_policies_pick_runnable_threads() {
    let mut builder = Builder::new();
    builder.thread_scheduling = SchedulingPolicy::First;
    let mut exploration = builder.build();
    contention(&mut exploration);
    // the worker holds the lock; both threads are runnable
    assert_eq!(exploration.next_thread(), Some(ThreadId::root()));

    builder.thread_scheduling = SchedulingPolicy::Last;
    let mut exploration = builder.build();
    let worker = contention(&mut exploration);
    assert_eq!(exploration.next_thread(), Some(worker.clone()));

    builder.thread_scheduling = SchedulingPolicy::RoundRobin;
    let mut exploration = builder.build();
    let worker = contention(&mut exploration);
    // the worker committed last, so round-robin wraps to main
    assert_eq!(exploration.next_thread(), Some(ThreadId::root()));
    let ex = exploration
        .configuration()
        .local(&ThreadId::root(), vec![false]);
    commit_into(&mut exploration, ex);
    assert_eq!(exploration.next_thread(), Some(worker));
}

#[test]
fn random_scheduling_is_deterministic_per_seed() {
    let mut builder = Builder::new();
    builder.thread_scheduling = SchedulingPolicy::Random;
    builder.rng_seed = 42;

    let mut first = Vec::new();
    let mut second = Vec::new();
    for out in [&mut first, &mut second] {
        let mut exploration = builder.build();
        contention(&mut exploration);
        for _ in 0..8 {
            out.push(exploration.next_thread());
        }
    }
    assert_eq!(first, second);
}

#[test]
fn no_runnable_threads_after_exit() {
    let builder = Builder::new();
    let mut exploration = builder.build();
    let main = ThreadId::root();

    let ex = exploration.configuration().exit_thread(&main);
    commit_into(&mut exploration, ex);

    assert_eq!(exploration.next_thread(), None);
    assert!(!exploration.is_deadlocked());
}

#[test]
fn policy_parsing() {
    assert_eq!(
        "round-robin".parse::<SchedulingPolicy>(),
        Ok(SchedulingPolicy::RoundRobin)
    );
    assert_eq!("first".parse::<SchedulingPolicy>(), Ok(SchedulingPolicy::First));
    assert!("fifo".parse::<SchedulingPolicy>().is_err());
}
