//! Context-switch-depth estimation.
//!
//! The context-switch degree of a local configuration is the minimum number
//! of thread segments any schedule realizing it needs: a single-threaded
//! history has degree 1, and every switch to another thread adds one. The
//! search walks per-thread advancement vectors with branch and bound,
//! advancing the running thread for free and recursing over the threads
//! whose next event is enabled.

use std::collections::BTreeMap;

use crate::event::{EventId, EventKind};
use crate::thread_id::ThreadId;
use crate::unfolding::Unfolding;

type Advancement = BTreeMap<ThreadId, usize>;

/// Per-thread event chains of a local configuration, oldest first.
fn collect(unfolding: &Unfolding, event: EventId) -> BTreeMap<ThreadId, Vec<EventId>> {
    let mut events: BTreeMap<ThreadId, Vec<EventId>> = BTreeMap::new();

    events
        .entry(unfolding[event].tid().clone())
        .or_default()
        .push(event);

    for (tid, &head) in unfolding[event].cone().iter() {
        let mut prefix = Vec::new();
        let mut cursor = Some(head);
        while let Some(e) = cursor {
            prefix.push(e);
            cursor = unfolding[e].thread_predecessor();
        }
        prefix.reverse();

        // the maximal event itself may already sit at the chain's end
        let chain = events.entry(tid.clone()).or_default();
        prefix.append(chain);
        *chain = prefix;
        debug_assert!(unfolding[chain[0]].kind() == EventKind::ThreadInit);
    }

    events
}

fn thread_count(unfolding: &Unfolding, event: EventId) -> usize {
    if unfolding[event].kind() == EventKind::ThreadInit {
        // the cone omits the maximal event; a thread_init is its thread's
        // first event, so that thread is missing from the cone entirely
        unfolding[event].cone().len() + 1
    } else {
        unfolding[event].cone().len()
    }
}

fn has_run(
    unfolding: &Unfolding,
    chains: &BTreeMap<ThreadId, Vec<EventId>>,
    advancement: &Advancement,
    event: EventId,
) -> bool {
    let tid = unfolding[event].tid();
    let index = advancement[tid];
    index > 0 && unfolding[chains[tid][index - 1]].depth() >= unfolding[event].depth()
}

/// Whether the next event of a thread can run given how far the other
/// threads have advanced. An event is blocked exactly when a cross-thread
/// predecessor has not run yet.
fn event_is_enabled(
    unfolding: &Unfolding,
    chains: &BTreeMap<ThreadId, Vec<EventId>>,
    advancement: &Advancement,
    event: EventId,
) -> bool {
    match unfolding[event].kind() {
        EventKind::Local
        | EventKind::ThreadCreate
        | EventKind::ThreadExit
        | EventKind::LockCreate
        | EventKind::CondCreate => true,
        // destruction while in use would be a race
        EventKind::LockDestroy | EventKind::CondDestroy => true,
        // the lock is always owned by the releasing thread
        EventKind::LockRelease => true,
        EventKind::ProgramInit => {
            unreachable!("program_init is never part of an advancement chain")
        }
        EventKind::ThreadJoin => {
            let joined = unfolding[event].joined_predecessor().unwrap();
            has_run(unfolding, chains, advancement, joined)
        }
        EventKind::ThreadInit => {
            let creation = unfolding[event].creation_predecessor().unwrap();
            unfolding[creation].kind() == EventKind::ProgramInit
                || has_run(unfolding, chains, advancement, creation)
        }
        EventKind::LockAcquire => match unfolding[event].lock_predecessor() {
            None => true,
            Some(pred) => {
                unfolding[pred].tid() == unfolding[event].tid()
                    || has_run(unfolding, chains, advancement, pred)
            }
        },
        EventKind::Wait2 => {
            let notifying = unfolding[event].notifying_predecessor().unwrap();
            if !has_run(unfolding, chains, advancement, notifying) {
                return false;
            }
            // the lock was previously released by this thread's wait1
            let pred = unfolding[event].lock_predecessor().unwrap();
            unfolding[pred].tid() == unfolding[event].tid()
                || has_run(unfolding, chains, advancement, pred)
        }
        EventKind::Wait1 | EventKind::Signal | EventKind::Broadcast => unfolding[event]
            .cond_predecessors()
            .iter()
            .all(|&pred| has_run(unfolding, chains, advancement, pred)),
    }
}

/// Runs the current thread while its next event is enabled. The event at
/// the entry index must itself be enabled; callers guarantee this by only
/// switching to threads with an enabled next event.
fn advance_current_thread(
    unfolding: &Unfolding,
    chains: &BTreeMap<ThreadId, Vec<EventId>>,
    advancement: &mut Advancement,
    current: &ThreadId,
) {
    let chain = &chains[current];
    let mut index = advancement[current];
    if index >= chain.len() {
        return;
    }
    debug_assert!(event_is_enabled(unfolding, chains, advancement, chain[index]));

    loop {
        index += 1;
        advancement.insert(current.clone(), index);
        if index >= chain.len() {
            return;
        }
        if !event_is_enabled(unfolding, chains, advancement, chain[index]) {
            return;
        }
    }
}

fn csd_limit_search(
    unfolding: &Unfolding,
    chains: &BTreeMap<ThreadId, Vec<EventId>>,
    mut advancement: Advancement,
    current: &ThreadId,
    current_csd: usize,
    limit: usize,
) -> bool {
    advance_current_thread(unfolding, chains, &mut advancement, current);

    if advancement[current] >= chains[current].len() {
        let done = advancement
            .iter()
            .all(|(tid, &index)| index >= chains[tid].len());
        if done {
            return false;
        }
    }

    if current_csd + 1 > limit {
        // every possible extension needs one more switch
        return true;
    }

    for tid in chains.keys() {
        if tid == current || advancement[tid] >= chains[tid].len() {
            continue;
        }
        if !event_is_enabled(unfolding, chains, &advancement, chains[tid][advancement[tid]]) {
            continue;
        }
        if !csd_limit_search(
            unfolding,
            chains,
            advancement.clone(),
            tid,
            current_csd + 1,
            limit,
        ) {
            // found a schedule that stays within the limit
            return false;
        }
    }

    true
}

fn csd_search(
    unfolding: &Unfolding,
    chains: &BTreeMap<ThreadId, Vec<EventId>>,
    mut advancement: Advancement,
    current: &ThreadId,
    budget: usize,
) -> usize {
    advance_current_thread(unfolding, chains, &mut advancement, current);

    let remaining = advancement
        .iter()
        .filter(|(tid, &index)| index < chains[*tid].len())
        .count();
    if remaining == 0 {
        return 0;
    }
    if remaining > budget {
        // visiting k remaining threads needs at least k switches
        return budget + 1;
    }

    let mut best = budget + 1;
    for tid in chains.keys() {
        if tid == current || advancement[tid] >= chains[tid].len() {
            continue;
        }
        if !event_is_enabled(unfolding, chains, &advancement, chains[tid][advancement[tid]]) {
            continue;
        }
        // a candidate only improves on `best` if the tail needs at most
        // best - 2 further switches: the switch taken here adds one
        let tail = csd_search(
            unfolding,
            chains,
            advancement.clone(),
            tid,
            best.saturating_sub(2),
        );
        let candidate = tail + 1;
        if candidate <= 1 {
            return candidate;
        }
        if candidate < best {
            best = candidate;
        }
    }
    best
}

/// `true` iff every schedule realizing `[event]` needs more than `limit`
/// thread segments. Prunes as soon as a partial schedule reaches the limit,
/// so it is cheaper than [`compute_csd`] for small limits.
pub fn is_above_limit(unfolding: &Unfolding, event: EventId, limit: usize) -> bool {
    let threads = thread_count(unfolding, event);
    if threads <= 1 {
        return 1 > limit;
    }
    if threads > limit {
        // each thread occupies at least one segment
        return true;
    }

    let chains = collect(unfolding, event);
    let advancement: Advancement = chains.keys().map(|tid| (tid.clone(), 0)).collect();
    let initial = chains.keys().next().expect("at least one thread").clone();

    csd_limit_search(unfolding, &chains, advancement, &initial, 1, limit)
}

/// The exact minimum number of thread segments needed to realize `[event]`.
pub fn compute_csd(unfolding: &Unfolding, event: EventId) -> usize {
    let threads = thread_count(unfolding, event);
    if threads <= 1 {
        return 1;
    }

    let chains = collect(unfolding, event);
    let advancement: Advancement = chains.keys().map(|tid| (tid.clone(), 0)).collect();
    let initial = chains.keys().next().expect("at least one thread").clone();

    csd_search(unfolding, &chains, advancement, &initial, usize::MAX - 2) + 1
}
