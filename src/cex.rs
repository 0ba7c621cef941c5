//! Conflicting extensions: events that extend a maximal sub-configuration of
//! the current configuration but are not part of it. Each one seeds an
//! alternative execution that the explorer replays from a prefix.
//!
//! The enumeration is kind-directed: lock acquisitions generate alternative
//! predecessors along the lock chain, `wait1` events generate alternative
//! notification histories, and notifications generate lost variants,
//! alternative signal targets, and alternative broadcast combinations.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};

use tracing::debug;

use crate::comb::Comb;
use crate::cone::Cone;
use crate::configuration::Configuration;
use crate::event::{CondId, EventBuilder, EventId, EventKind, LockId};
use crate::thread_id::ThreadId;
use crate::unfolding::{Deduplicated, Unfolding};

/// Alternative lock acquisitions for a `lock_acquire` or `wait2` event `e`:
/// every lock event `ep` along the chain above `e`'s lock predecessor that is
/// concurrent with `e`'s thread predecessor (and, for `wait2`, its notifying
/// event) yields an alternative with `ep` as the lock predecessor.
fn cex_acquire(unfolding: &mut Unfolding, e: EventId) -> Vec<Deduplicated> {
    let kind = unfolding[e].kind();
    debug_assert!(kind == EventKind::LockAcquire || kind == EventKind::Wait2);

    let et = unfolding[e]
        .thread_predecessor()
        .expect("acquire has a thread predecessor");
    let er = unfolding[e].lock_predecessor();
    let lid = unfolding[e].lid().expect("acquire carries a lock id");
    let tid = unfolding[e].tid().clone();

    if unfolding[et].is_cutoff() {
        return Vec::new();
    }

    // maximal lock event already inside [et] (acquire) or [et] ∪ [es] (wait2)
    let mut em = er;
    let mut es = None;

    if kind == EventKind::LockAcquire {
        while let Some(m) = em {
            if unfolding.less_than_eq(m, et) {
                break;
            }
            em = unfolding[m].lock_predecessor();
        }
    } else {
        let notifying = unfolding[e]
            .notifying_predecessor()
            .expect("wait2 has a notifying predecessor");
        if unfolding[notifying].is_cutoff() {
            return Vec::new();
        }
        es = Some(notifying);
        while let Some(m) = em {
            if unfolding.less_than_eq(m, et) || unfolding.less_than(m, notifying) {
                break;
            }
            em = unfolding[m].lock_predecessor();
        }
    }

    if em == er {
        return Vec::new();
    }

    let mut result = Vec::new();
    let cid = unfolding[e].cid();

    match em {
        None => {
            // wait2 always has a wait1 or release below it
            debug_assert!(kind == EventKind::LockAcquire);
            result.push(unfolding.deduplicate(EventBuilder::lock_acquire(
                tid.clone(),
                lid,
                et,
                None,
            )));
        }
        Some(m) => match unfolding[m].kind() {
            EventKind::LockRelease | EventKind::Wait1 => {
                if kind == EventKind::LockAcquire {
                    result.push(unfolding.deduplicate(EventBuilder::lock_acquire(
                        tid.clone(),
                        lid,
                        et,
                        Some(m),
                    )));
                } else if unfolding[m].kind() == EventKind::LockRelease {
                    result.push(unfolding.deduplicate(EventBuilder::wait2(
                        tid.clone(),
                        cid.unwrap(),
                        lid,
                        et,
                        m,
                        es.unwrap(),
                    )));
                }
            }
            EventKind::LockCreate => {
                debug_assert!(kind == EventKind::LockAcquire);
                result.push(unfolding.deduplicate(EventBuilder::lock_acquire(
                    tid.clone(),
                    lid,
                    et,
                    Some(m),
                )));
            }
            _ => {}
        },
    }

    // walk the remaining lock events between er and em / es
    let mut ep = unfolding[er.expect("em != er implies er exists")].lock_predecessor();
    while let Some(p) = ep {
        if let Some(m) = em {
            if unfolding.less_than_eq(p, m) {
                break;
            }
        }
        if let Some(s) = es {
            if unfolding.less_than_eq(p, s) {
                break;
            }
        }
        match unfolding[p].kind() {
            EventKind::LockRelease | EventKind::Wait1 | EventKind::LockCreate => {
                if kind == EventKind::LockAcquire {
                    result.push(unfolding.deduplicate(EventBuilder::lock_acquire(
                        tid.clone(),
                        lid,
                        et,
                        Some(p),
                    )));
                } else if unfolding[p].kind() != EventKind::LockCreate {
                    result.push(unfolding.deduplicate(EventBuilder::wait2(
                        tid.clone(),
                        cid.unwrap(),
                        lid,
                        et,
                        p,
                        es.unwrap(),
                    )));
                }
            }
            _ => {}
        }
        ep = unfolding[p].lock_predecessor();
    }

    result
}

/// Alternative `wait1` events: every maximal concurrent combination of the
/// non-create condition-variable predecessors that differs from the original
/// history yields a new `wait1` with the same thread and lock predecessors.
fn cex_wait1(unfolding: &mut Unfolding, e: EventId) -> Vec<Deduplicated> {
    debug_assert!(unfolding[e].kind() == EventKind::Wait1);

    let et = unfolding[e]
        .thread_predecessor()
        .expect("wait1 has a thread predecessor");
    if unfolding[et].is_cutoff() {
        return Vec::new();
    }

    let tid = unfolding[e].tid().clone();
    let cid = unfolding[e].cid().unwrap();
    let lid = unfolding[e].lid().unwrap();
    let lock_pred = unfolding[e]
        .lock_predecessor()
        .expect("wait1 has a lock predecessor");

    let mut cond_create = None;
    let mut comb = Comb::new();
    {
        let u: &Unfolding = unfolding;
        for &p in u[e].cond_predecessors() {
            if u[p].kind() == EventKind::CondCreate {
                cond_create = Some(p);
            } else {
                debug_assert!(u[p].tid() != &tid && !u.less_than(p, et));
                comb.insert(u, p);
            }
        }
    }

    let combinations = {
        let u: &Unfolding = unfolding;
        comb.concurrent_combinations(u, |m| {
            // keep M iff [M] ∪ [et] differs from [e] \ {e}; the lock
            // predecessor is on the same thread, so it is covered by [et]
            let cone = Cone::from_predecessors(u, et, cond_create, m.iter().copied());
            debug_assert!(cone.len() <= u[e].cone().len());
            if cone.len() != u[e].cone().len() {
                return true;
            }
            for (t, &c) in u[e].cone().iter() {
                let entry = cone.get(t).expect("cone covers the same threads");
                if u.less_than(entry, c) {
                    return true;
                }
            }
            false
        })
    };

    let mut result = Vec::new();
    for mut n in combinations {
        if let Some(create) = cond_create {
            n.push(create);
        }
        result.push(unfolding.deduplicate(EventBuilder::wait1(
            tid.clone(),
            cid,
            lid,
            et,
            lock_pred,
            n,
        )));
    }
    result
}

/// The `wait1` events in `cone` on `cid` that no non-lost notification in
/// `cone` has notified yet.
fn outstanding_wait1(unfolding: &Unfolding, cid: CondId, cone: &Cone) -> Vec<EventId> {
    let mut wait1s: Vec<EventId> = cone
        .iter()
        .map(|(_, &c)| c)
        .filter(|&c| unfolding[c].kind() == EventKind::Wait1 && unfolding[c].cid() == Some(cid))
        .collect();

    if wait1s.is_empty() {
        return wait1s;
    }

    wait1s.sort_by_key(|&w| unfolding[w].depth());

    for (_, &head) in cone.iter() {
        let mut cursor = Some(head);
        while let Some(e) = cursor {
            if wait1s.is_empty() {
                break;
            }
            if unfolding[e].depth() < unfolding[wait1s[0]].depth() {
                // no predecessor on this thread can notify any of them
                break;
            }
            match unfolding[e].kind() {
                EventKind::Signal => {
                    if unfolding[e].cid() == Some(cid) && !unfolding[e].is_lost() {
                        let wait = unfolding[e].notified_wait().unwrap();
                        wait1s.retain(|&w| w != wait);
                    }
                }
                EventKind::Broadcast => {
                    if unfolding[e].cid() == Some(cid) && !unfolding[e].is_lost() {
                        wait1s.retain(|&w| {
                            !unfolding[e].notified_waits().iter().any(|&n| {
                                unfolding[n].tid() == unfolding[w].tid()
                                    && unfolding[n].depth() == unfolding[w].depth()
                            })
                        });
                    }
                }
                _ => {}
            }
            cursor = unfolding[e].thread_predecessor();
        }
    }

    wait1s
}

fn outstanding_wait1_of(unfolding: &Unfolding, cid: CondId, events: &[EventId]) -> Vec<EventId> {
    assert!(!events.is_empty());
    if events.len() == 1 {
        return outstanding_wait1(unfolding, cid, unfolding[events[0]].cone());
    }
    let cone = Cone::from_events(unfolding, events.iter().copied());
    outstanding_wait1(unfolding, cid, &cone)
}

/// `true` iff `m` (one concurrent combination) is the same history as the
/// maximal predecessor set `max`.
fn combination_is_max(unfolding: &Unfolding, m: &[EventId], max: &[EventId]) -> bool {
    if m.len() != max.len() {
        return false;
    }
    for &e in m {
        for &x in max {
            if unfolding.less_than(e, x) {
                return false;
            }
        }
    }
    true
}

/// Alternative notifications for a `signal` or `broadcast` event `e`: lost
/// variants, signals notifying a different waiter, and broadcasts over other
/// wait/signal combinations.
fn cex_notification(
    unfolding: &mut Unfolding,
    configuration: &Configuration,
    e: EventId,
) -> Vec<Deduplicated> {
    let kind = unfolding[e].kind();
    debug_assert!(kind == EventKind::Signal || kind == EventKind::Broadcast);

    let et = unfolding[e]
        .thread_predecessor()
        .expect("notification has a thread predecessor");
    if unfolding[et].is_cutoff() {
        return Vec::new();
    }

    let tid = unfolding[e].tid().clone();
    let cid = unfolding[e].cid().unwrap();

    let mut cond_create = None;
    let mut comb = Comb::new();
    let mut wait1_comb = Comb::new();
    let max;
    {
        let u: &Unfolding = unfolding;

        // maximal events of e's history outside [et]
        let mut pre = Comb::new();
        for &p in u[e].cond_predecessors() {
            if u[p].tid() == &tid || u.less_than(p, et) {
                continue; // cond_create and wait1s can be inside [et]
            }
            pre.insert(u, p);
        }
        max = pre.max(u);

        // all wait1, signal, broadcast events on the same cond outside of
        // [et] ∪ succ(e); the recorded cond predecessors are not complete
        // enough for this, so walk the configuration's thread heads
        for (_, &head) in configuration.thread_heads() {
            let mut cursor = Some(head);
            while let Some(p) = cursor {
                if u[p].tid() == &tid {
                    break; // either in [et] or in succ(e)
                }
                if u.less_than(e, p) {
                    break;
                }
                if u.less_than(p, et) {
                    break; // p and all its predecessors are in [et]
                }
                if u[p].cid() == Some(cid) {
                    match u[p].kind() {
                        EventKind::CondCreate => cond_create = Some(p),
                        EventKind::Wait2 => {}
                        _ => {
                            comb.insert(u, p);
                            if u[p].kind() == EventKind::Wait1 {
                                wait1_comb.insert(u, p);
                            }
                        }
                    }
                }
                cursor = u[p].thread_predecessor();
            }
        }
    }

    let mut result = Vec::new();

    // lost notifications: concurrent combinations of non-lost notifications
    // with no outstanding wait1 left on the cond
    let lost_combinations = {
        let u: &Unfolding = unfolding;
        comb.clone().concurrent_combinations(u, |m| {
            if combination_is_max(u, m, &max) {
                return false;
            }

            if m.len() == 1 && u[m[0]].kind() == EventKind::Broadcast {
                if u[m[0]].is_lost() {
                    return false;
                }
            } else {
                for &c in m {
                    if u[c].kind() != EventKind::Signal || u[c].is_lost() {
                        return false;
                    }
                }
            }

            let mut m_et: Vec<EventId> = m.to_vec();
            m_et.push(et);
            outstanding_wait1_of(u, cid, &m_et).is_empty()
        })
    };

    for m in lost_combinations {
        let mut n = Vec::new();
        {
            let u: &Unfolding = unfolding;
            for &c in &m {
                match u[c].kind() {
                    EventKind::Broadcast => {
                        if u[c].is_lost() || u.broadcast_notifies_thread(c, &tid) {
                            continue;
                        }
                    }
                    EventKind::Signal => {
                        if u[c].is_lost() {
                            continue;
                        }
                        let wait = u[c].notified_wait().unwrap();
                        if u[wait].tid() == &tid {
                            continue;
                        }
                    }
                    _ => continue,
                }
                n.push(c);
            }
        }
        if let Some(create) = cond_create {
            n.push(create);
        }

        let builder = if kind == EventKind::Signal {
            EventBuilder::signal_lost(tid.clone(), cid, et, n)
        } else {
            EventBuilder::broadcast(tid.clone(), cid, et, n)
        };
        result.push(unfolding.deduplicate(builder));
    }

    // alternative signals: notify any other outstanding or combed wait1
    if kind == EventKind::Signal {
        let waits = {
            let u: &Unfolding = unfolding;
            let mut waits = outstanding_wait1(u, cid, u[et].cone());
            for (_, tooth) in wait1_comb.threads() {
                waits.extend(tooth.iter().copied());
            }
            waits
        };

        let original = unfolding[e].notified_wait();
        for w in waits {
            if Some(w) == original {
                continue;
            }
            result.push(unfolding.deduplicate(EventBuilder::signal_notifying(
                tid.clone(),
                cid,
                et,
                w,
            )));
        }
    }

    // alternative broadcasts: combinations of wait1 and non-lost signals
    // with at least one outstanding wait1 on the cond
    if kind == EventKind::Broadcast {
        let broadcast_combinations = {
            let u: &Unfolding = unfolding;
            comb.concurrent_combinations(u, |m| {
                if combination_is_max(u, m, &max) {
                    return false;
                }

                for &c in m {
                    match u[c].kind() {
                        EventKind::Wait1 => {}
                        EventKind::Signal if !u[c].is_lost() => {}
                        _ => return false,
                    }
                }

                let mut m_et: Vec<EventId> = m.to_vec();
                m_et.push(et);
                !outstanding_wait1_of(u, cid, &m_et).is_empty()
            })
        };

        for n in broadcast_combinations {
            // the contained signals notify none of the contained wait1s, so
            // the combination is exactly the predecessor set
            result.push(unfolding.deduplicate(EventBuilder::broadcast(tid.clone(), cid, et, n)));
        }
    }

    result
}

impl Configuration {
    /// Enumerates the conflicting extensions of this configuration.
    ///
    /// With `unknown_only`, events that already existed in the unfolding are
    /// filtered out. Cutoff events are always filtered. The enumeration
    /// checks `cancel` before every event of the configuration and stops
    /// early when it is set.
    pub fn conflicting_extensions(&self, unknown_only: bool, cancel: &AtomicBool) -> Vec<EventId> {
        let mut unfolding = self.unfolding().borrow_mut();
        unfolding.stats_mut().configurations += 1;

        let events = self.events_inner(&unfolding);
        let mut result = Vec::new();
        let mut seen = HashSet::new();

        for e in events {
            if cancel.load(Relaxed) {
                debug!("conflicting extension enumeration cancelled");
                break;
            }

            let candidates = match unfolding[e].kind() {
                EventKind::LockAcquire | EventKind::Wait2 => {
                    if unfolding[e].cex_known {
                        continue;
                    }
                    let candidates = cex_acquire(&mut unfolding, e);
                    unfolding.set_cex_known(e);
                    candidates
                }
                EventKind::Wait1 => cex_wait1(&mut unfolding, e),
                EventKind::Signal | EventKind::Broadcast => {
                    cex_notification(&mut unfolding, self, e)
                }
                _ => continue,
            };

            for dedup in candidates {
                if unknown_only && !dedup.unknown {
                    continue;
                }
                if unfolding[dedup.event].is_cutoff() {
                    continue;
                }
                if seen.insert(dedup.event) {
                    result.push(dedup.event);
                }
            }
        }

        unfolding.stats_mut().cex_created += result.len();
        debug!(count = result.len(), "conflicting extensions enumerated");
        result
    }

    /// Enumerates the acquisitions that would unblock `tid`, currently stuck
    /// trying to take `lid` (as a plain `lock_acquire` or as the `wait2` half
    /// of a condition wait). Used when the scheduler finds all threads stuck.
    pub fn conflicting_extensions_deadlock(
        &self,
        tid: &ThreadId,
        lid: LockId,
        kind: EventKind,
        unknown_only: bool,
    ) -> Vec<EventId> {
        assert!(kind == EventKind::LockAcquire || kind == EventKind::Wait2);

        let mut unfolding = self.unfolding().borrow_mut();

        let et = self
            .last_of_tid(tid)
            .expect("blocked thread must exist in configuration");
        if unfolding[et].is_cutoff() {
            return Vec::new();
        }

        let em = self
            .last_of_lid(lid)
            .expect("contended lock must have a head");

        // P = [et] (plus [es] for a wait2)
        let mut p = Cone::from_predecessor(&unfolding, et);
        let mut es = None;

        if kind == EventKind::Wait2 {
            assert!(unfolding[et].kind() == EventKind::Wait1);

            let cid = unfolding[et].cid().unwrap();
            let notifying = self.cond_heads().get(&cid).and_then(|cond_preds| {
                cond_preds.iter().copied().find(|&c| {
                    unfolding[c].notified_wait() == Some(et)
                        || unfolding[c].notified_waits().contains(&et)
                })
            });

            match notifying {
                None => return Vec::new(),
                Some(s) if unfolding[s].is_cutoff() => return Vec::new(),
                Some(s) => {
                    es = Some(s);
                    p.insert(&unfolding, s);
                }
            }
        }

        let candidates: Vec<EventId> = {
            let u: &Unfolding = &unfolding;
            let c = Cone::from_thread_heads(self.thread_heads());
            let mut a = c.setminus(u, &p);
            a.insert(u, em);
            let x = Comb::filtered(u, &a, |ev| {
                u[ev].lid() == Some(lid)
                    && !u[ev].is_cutoff()
                    && matches!(
                        u[ev].kind(),
                        EventKind::LockRelease | EventKind::Wait1 | EventKind::LockCreate
                    )
            });
            x.events().collect()
        };

        let mut result = Vec::new();
        let mut seen = HashSet::new();
        for candidate in candidates {
            if unfolding[candidate].is_cutoff() {
                continue;
            }
            let dedup = if kind == EventKind::LockAcquire {
                unfolding.deduplicate(EventBuilder::lock_acquire(
                    tid.clone(),
                    lid,
                    et,
                    Some(candidate),
                ))
            } else {
                assert!(unfolding[candidate].kind() != EventKind::LockCreate);
                let es = es.unwrap();
                let cid = unfolding[es].cid().unwrap();
                unfolding.deduplicate(EventBuilder::wait2(tid.clone(), cid, lid, et, candidate, es))
            };
            if unknown_only && !dedup.unknown {
                continue;
            }
            debug_assert!(!unfolding[dedup.event].is_cutoff());
            if seen.insert(dedup.event) {
                result.push(dedup.event);
            }
        }

        unfolding.stats_mut().cex_created += result.len();
        result
    }
}
