use std::collections::BTreeMap;

use crate::comb::Comb;
use crate::event::{EventId, EventKind};
use crate::thread_id::ThreadId;
use crate::unfolding::Unfolding;

/// The per-thread maximal causal past of an event: for every thread that
/// contributed to the event's history, the latest event of that thread that
/// happens before it. `program_init` is never part of a cone.
///
/// The cone is the workhorse of the causal order: `a ≤ b` holds exactly when
/// `b`'s cone contains an event of `a`'s thread at depth at least `a`'s.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct Cone {
    map: BTreeMap<ThreadId, EventId>,
}

impl Cone {
    pub fn new() -> Cone {
        Cone::default()
    }

    /// The cone of an event whose only predecessor is `pred`: `pred`'s cone
    /// extended by `pred` itself.
    pub(crate) fn from_predecessor(unfolding: &Unfolding, pred: EventId) -> Cone {
        let pred_event = &unfolding[pred];
        if pred_event.kind() == EventKind::ProgramInit {
            return Cone::new();
        }

        let mut cone = pred_event.cone().clone();
        cone.map.insert(pred_event.tid().clone(), pred);
        cone
    }

    /// The cone of an event with program-order predecessor `pred` plus any
    /// number of other predecessors.
    pub(crate) fn from_predecessors<I>(
        unfolding: &Unfolding,
        pred: EventId,
        single_other: Option<EventId>,
        others: I,
    ) -> Cone
    where
        I: IntoIterator<Item = EventId>,
    {
        let mut cone = Cone::from_predecessor(unfolding, pred);
        if let Some(other) = single_other {
            cone.insert(unfolding, other);
        }
        for other in others {
            cone.insert(unfolding, other);
        }
        cone
    }

    /// The joint cone of a set of events, each included together with its
    /// own causal past.
    pub(crate) fn from_events<I>(unfolding: &Unfolding, events: I) -> Cone
    where
        I: IntoIterator<Item = EventId>,
    {
        let mut cone = Cone::new();
        for event in events {
            cone.insert(unfolding, event);
        }
        cone
    }

    /// A configuration viewed as a cone: its thread heads.
    pub(crate) fn from_thread_heads(heads: &BTreeMap<ThreadId, EventId>) -> Cone {
        Cone { map: heads.clone() }
    }

    /// Adds `event` and its causal past, keeping per-thread maxima.
    pub(crate) fn insert(&mut self, unfolding: &Unfolding, event: EventId) {
        let ev = &unfolding[event];
        if ev.kind() == EventKind::ProgramInit {
            return;
        }

        for (tid, &past) in ev.cone().iter() {
            match self.map.get(tid) {
                Some(&present) if unfolding[present].depth() >= unfolding[past].depth() => {}
                _ => {
                    self.map.insert(tid.clone(), past);
                }
            }
        }

        match self.map.get(ev.tid()) {
            Some(&present) if unfolding[present].depth() >= ev.depth() => {}
            _ => {
                self.map.insert(ev.tid().clone(), event);
            }
        }
    }

    pub fn get(&self, tid: &ThreadId) -> Option<EventId> {
        self.map.get(tid).copied()
    }

    pub fn contains(&self, tid: &ThreadId) -> bool {
        self.map.contains_key(tid)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&ThreadId, &EventId)> {
        self.map.iter()
    }

    pub fn threads(&self) -> impl DoubleEndedIterator<Item = &ThreadId> {
        self.map.keys()
    }

    /// Pointwise `≤`: on every thread present in both cones, this cone's
    /// entry is no deeper than `rhs`'s. By construction a cone contains the
    /// cones of all of its members, so comparing depths per thread suffices.
    pub fn is_lte_for_all_of(&self, unfolding: &Unfolding, rhs: &Cone) -> bool {
        for (tid, &event) in rhs.iter() {
            if let Some(own) = self.get(tid) {
                if unfolding[own].depth() > unfolding[event].depth() {
                    return false;
                }
            }
        }
        true
    }

    /// Pointwise `≥`: covers every thread of `rhs` at least as deep.
    pub fn is_gte_for_all_of(&self, unfolding: &Unfolding, rhs: &Cone) -> bool {
        for (tid, &event) in rhs.iter() {
            match self.get(tid) {
                Some(own) if unfolding[own].depth() >= unfolding[event].depth() => {}
                _ => return false,
            }
        }
        true
    }

    /// The causally maximal elements of the cone.
    pub fn max(&self, unfolding: &Unfolding) -> Vec<EventId> {
        let mut result: Vec<EventId> = Vec::new();
        for &tmax in self.map.values() {
            let mut is_maximal = true;
            result.retain(|&other| {
                if unfolding.less_than(other, tmax) {
                    return false;
                }
                if unfolding.less_than(tmax, other) {
                    is_maximal = false;
                }
                true
            });
            if is_maximal {
                result.push(tmax);
            }
        }
        result
    }

    /// Computes `[self] \ [rhs]` as a comb: per thread, the chain suffix of
    /// this cone that is not covered by `rhs`.
    pub fn setminus(&self, unfolding: &Unfolding, rhs: &Cone) -> Comb {
        let mut result = Comb::new();
        for (tid, &event) in self.iter() {
            let boundary = rhs.get(tid).map(|r| unfolding[r].depth());

            if let Some(boundary) = boundary {
                if boundary >= unfolding[event].depth() {
                    // all events on this thread removed by rhs
                    continue;
                }
            }

            let mut cursor = Some(event);
            while let Some(e) = cursor {
                if let Some(boundary) = boundary {
                    if unfolding[e].depth() <= boundary {
                        break;
                    }
                }
                result.insert(unfolding, e);
                cursor = unfolding[e].thread_predecessor();
            }
        }
        result
    }
}
