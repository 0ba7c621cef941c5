use std::collections::{BTreeMap, VecDeque};

use crate::event::EventId;
use crate::thread_id::ThreadId;
use crate::unfolding::Unfolding;

/// Maximum number of threads a comb may span when enumerating concurrent
/// combinations. The subset walk is exponential in the number of threads, so
/// this is a hard correctness precondition, not a tunable.
pub const MAX_COMB_THREADS: usize = 64;

/// The events of a single thread inside a [`Comb`], ordered by causality.
///
/// Events of one thread are totally ordered, so the deque maintains the
/// invariant that the front is the minimum and the back the maximum; the
/// middle may be unsorted until [`Comb::sort`] runs.
#[derive(Clone, Debug, Default)]
pub struct Tooth {
    events: VecDeque<EventId>,
    sorted: bool,
}

impl Tooth {
    fn new() -> Tooth {
        Tooth {
            events: VecDeque::new(),
            sorted: true,
        }
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &EventId> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn min(&self) -> Option<EventId> {
        self.events.front().copied()
    }

    pub fn max(&self) -> Option<EventId> {
        self.events.back().copied()
    }

    /// Inserts `event`, preserving the min-front/max-back invariant.
    /// Returns whether the tooth is still fully sorted.
    fn insert(&mut self, unfolding: &Unfolding, event: EventId) -> bool {
        if self.events.is_empty() {
            debug_assert!(self.sorted);
            self.events.push_back(event);
        } else if unfolding.less_than(event, self.events[0]) {
            self.events.push_front(event);
        } else if (self.events.len() == 1 && self.events[0] != event)
            || unfolding.less_than(*self.events.back().unwrap(), event)
        {
            self.events.push_back(event);
        } else if self.events.contains(&event) {
            return self.sorted;
        } else {
            // neither a new extremum nor present: park it before the maximum
            let at = self.events.len() - 1;
            self.events.insert(at, event);
            if self.events.len() > 3 {
                self.sorted = false;
            }
        }
        self.sorted
    }

    fn remove(&mut self, unfolding: &Unfolding, event: EventId) {
        let Some(at) = self.events.iter().position(|&e| e == event) else {
            return;
        };

        if self.sorted || self.events.len() <= 3 {
            self.events.remove(at);
            self.sorted = true;
        } else if at != 0 && at != self.events.len() - 1 {
            if self.events.len() == 4 {
                self.sorted = true;
            }
            self.events.remove(at);
        } else if at == 0 {
            self.events.pop_front();
            let min = self
                .events
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| unfolding.causal_cmp(**a, **b))
                .map(|(i, _)| i)
                .unwrap();
            self.events.swap(0, min);
        } else {
            self.events.pop_back();
            let max = self
                .events
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| unfolding.causal_cmp(**a, **b))
                .map(|(i, _)| i)
                .unwrap();
            self.events.swap(self.events.len() - 1, max);
        }
    }

    fn sort(&mut self, unfolding: &Unfolding) {
        if self.sorted {
            return;
        }
        let mut events: Vec<_> = self.events.drain(..).collect();
        events.sort_by(|&a, &b| unfolding.causal_cmp(a, b));
        self.events.extend(events);
        self.sorted = true;
    }

    fn get(&self, index: usize) -> EventId {
        self.events[index]
    }
}

/// A grouping of conflict-free events by thread, used by the combinatorial
/// enumerations of the conflicting-extension generator.
#[derive(Clone, Debug, Default)]
pub struct Comb {
    teeth: BTreeMap<ThreadId, Tooth>,
}

impl Comb {
    pub fn new() -> Comb {
        Comb::default()
    }

    /// A copy of `other` restricted to the events accepted by `filter`.
    pub fn filtered<F>(unfolding: &Unfolding, other: &Comb, mut filter: F) -> Comb
    where
        F: FnMut(EventId) -> bool,
    {
        let mut comb = Comb::new();
        for tooth in other.teeth.values() {
            for &event in tooth.iter() {
                if filter(event) {
                    comb.insert(unfolding, event);
                }
            }
        }
        comb
    }

    pub fn insert(&mut self, unfolding: &Unfolding, event: EventId) {
        let tid = unfolding[event].tid().clone();
        self.teeth
            .entry(tid)
            .or_insert_with(Tooth::new)
            .insert(unfolding, event);
    }

    pub fn remove(&mut self, unfolding: &Unfolding, event: EventId) {
        let tid = unfolding[event].tid().clone();
        if let Some(tooth) = self.teeth.get_mut(&tid) {
            tooth.remove(unfolding, event);
            if tooth.is_empty() {
                self.teeth.remove(&tid);
            }
        }
    }

    pub fn remove_all<I>(&mut self, unfolding: &Unfolding, events: I)
    where
        I: IntoIterator<Item = EventId>,
    {
        for event in events {
            self.remove(unfolding, event);
        }
    }

    pub fn threads(&self) -> impl Iterator<Item = (&ThreadId, &Tooth)> {
        self.teeth.iter()
    }

    pub fn tooth(&self, tid: &ThreadId) -> Option<&Tooth> {
        self.teeth.get(tid)
    }

    pub fn num_threads(&self) -> usize {
        self.teeth.len()
    }

    pub fn len(&self) -> usize {
        self.teeth.values().map(Tooth::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.teeth.is_empty()
    }

    pub fn events(&self) -> impl Iterator<Item = EventId> + '_ {
        self.teeth.values().flat_map(|tooth| tooth.iter().copied())
    }

    /// The causally minimal elements across all teeth.
    pub fn min(&self, unfolding: &Unfolding) -> Vec<EventId> {
        let mut result: Vec<EventId> = Vec::new();
        for tooth in self.teeth.values() {
            let tmin = tooth.min().unwrap();
            let mut is_minimal = true;
            result.retain(|&other| {
                if unfolding.less_than(tmin, other) {
                    return false;
                }
                if unfolding.less_than(other, tmin) {
                    is_minimal = false;
                }
                true
            });
            if is_minimal {
                result.push(tmin);
            }
        }
        result
    }

    /// The causally maximal elements across all teeth.
    pub fn max(&self, unfolding: &Unfolding) -> Vec<EventId> {
        let mut result: Vec<EventId> = Vec::new();
        for tooth in self.teeth.values() {
            let tmax = tooth.max().unwrap();
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

    pub fn sort(&mut self, unfolding: &Unfolding) {
        for tooth in self.teeth.values_mut() {
            tooth.sort(unfolding);
        }
    }

    /// Enumerates every set of pairwise-concurrent events drawing at most
    /// one event per thread, including the empty set, and returns those for
    /// which `filter` holds.
    ///
    /// The walk is exponential in the number of teeth; the comb must span
    /// fewer than [`MAX_COMB_THREADS`] threads and be conflict-free.
    pub fn concurrent_combinations<F>(
        &mut self,
        unfolding: &Unfolding,
        mut filter: F,
    ) -> Vec<Vec<EventId>>
    where
        F: FnMut(&[EventId]) -> bool,
    {
        let mut result = Vec::new();

        // the per-subset walk below relies on teeth being fully sorted
        self.sort(unfolding);

        let num_threads = self.num_threads();
        assert!(
            num_threads < MAX_COMB_THREADS,
            "concurrent combinations over {} threads exceed the supported maximum",
            num_threads,
        );

        let teeth: Vec<&Tooth> = self.teeth.values().collect();

        for mask in 0u64..(1u64 << num_threads) {
            if mask == 0 {
                let empty = Vec::new();
                if filter(&empty) {
                    result.push(empty);
                }
                continue;
            }

            // teeth enabled in the current mask
            let selected: Vec<&Tooth> = (0..num_threads)
                .filter(|i| (mask >> i) & 1 == 1)
                .map(|i| teeth[i])
                .collect();
            let popcount = selected.len();

            // per selected tooth, the index of the event currently chosen
            let mut indices = vec![0usize; popcount];

            let mut pos = 0;
            while pos < popcount {
                let mut subset: Vec<EventId> = Vec::with_capacity(popcount);
                let mut is_concurrent = true;
                'build: for (k, tooth) in selected.iter().enumerate() {
                    let candidate = tooth.get(indices[k]);
                    for &chosen in &subset {
                        if unfolding.less_than(chosen, candidate)
                            || unfolding.less_than(candidate, chosen)
                        {
                            is_concurrent = false;
                            break 'build;
                        }
                    }
                    subset.push(candidate);
                }

                if is_concurrent && filter(&subset) {
                    result.push(subset);
                }

                // find the lowest position that can be incremented
                while pos < popcount && indices[pos] == selected[pos].len() - 1 {
                    pos += 1;
                }

                if pos == popcount {
                    break;
                }

                indices[pos] += 1;

                for lower in indices.iter_mut().take(pos) {
                    *lower = 0;
                }
                pos = 0;
            }
        }

        result
    }
}
