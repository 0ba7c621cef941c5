use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::ops;

use tracing::trace;

use crate::cone::Cone;
use crate::event::{
    Event, EventBuilder, EventData, EventId, EventKind, Fingerprint, LockId, KIND_COUNT,
};
use crate::order;
use crate::thread_id::ThreadId;

/// Result of [`Unfolding::deduplicate`]: whether the event was new to the
/// unfolding, and its identity either way.
#[derive(Copy, Clone, Debug)]
pub struct Deduplicated {
    /// `true` iff no structurally equal event existed before.
    pub unknown: bool,
    pub event: EventId,
}

type BucketKey = (ThreadId, usize, EventKind);

/// The deduplicating store of all events ever created.
///
/// The unfolding owns every event in an arena; everything else refers to
/// events by [`EventId`]. Events are keyed by `(thread, depth, kind)` for
/// dedup lookups. Once published, an event is immutable except for its
/// monotone caches: successor edges, immediate conflicts, the cutoff flag,
/// and the fingerprint.
pub struct Unfolding {
    events: Vec<Option<Event>>,
    buckets: HashMap<BucketKey, Vec<EventId>>,
    root: EventId,
    size: usize,
    optional_creation_events: bool,

    /// Lock events with no lock predecessor, per lock. Under optional
    /// creation several first events can compete for the same lock; they
    /// have no common predecessor node to meet at, so they are indexed here.
    initial_lock_events: HashMap<LockId, Vec<EventId>>,

    /// Smallest known event (in the adequate total order) per fingerprint
    /// value; drives cutoff detection.
    fingerprints: HashMap<u64, EventId>,

    stats: Statistics,
}

impl Unfolding {
    /// Creates an unfolding containing only the `program_init` event, with
    /// optional lock/cond creation events enabled.
    pub fn new() -> Unfolding {
        Unfolding::with_optional_creation_events(true)
    }

    /// As [`Unfolding::new`], choosing whether lock and condition-variable
    /// operations may legally precede the matching creation event.
    pub fn with_optional_creation_events(optional_creation_events: bool) -> Unfolding {
        let mut unfolding = Unfolding {
            events: Vec::new(),
            buckets: HashMap::new(),
            root: EventId(0),
            size: 0,
            optional_creation_events,
            initial_lock_events: HashMap::new(),
            fingerprints: HashMap::new(),
            stats: Statistics::default(),
        };

        let root = unfolding.store(Event::new(
            ThreadId::root(),
            0,
            Cone::new(),
            EventData::ProgramInit,
        ));
        unfolding.root = root;
        unfolding.stats.events_created[EventKind::ProgramInit.index()] += 1;
        unfolding
    }

    /// The unique `program_init` event.
    pub fn root(&self) -> EventId {
        self.root
    }

    /// Number of live events, including `program_init`.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn optional_creation_events(&self) -> bool {
        self.optional_creation_events
    }

    pub fn get(&self, id: EventId) -> Option<&Event> {
        self.events.get(id.as_usize()).and_then(Option::as_ref)
    }

    fn store(&mut self, mut event: Event) -> EventId {
        let id = EventId(self.events.len());
        event.id = id;
        let key = (event.tid().clone(), event.depth(), event.kind());
        self.buckets.entry(key).or_default().push(id);
        self.stats.unique_events[event.kind().index()] += 1;
        self.size += 1;
        self.events.push(Some(event));
        id
    }

    /// Builds the event described by `builder`, returning a structurally
    /// equal existing event when there is one.
    ///
    /// Structural equality is shallow: same kind, thread, and the same
    /// event ids in the same predecessor slots (plus equal payload for
    /// `local` events). On a hit, a cutoff inherited by the builder is
    /// propagated onto the existing event. On a miss the new event is
    /// published: successor back-edges are registered and its immediate
    /// conflicts are computed and cross-linked.
    pub fn deduplicate(&mut self, builder: EventBuilder) -> Deduplicated {
        self.stats.events_created[builder.kind().index()] += 1;

        let event = self.materialize(builder);
        let key = (event.tid().clone(), event.depth(), event.kind());

        let existing = self
            .buckets
            .get(&key)
            .and_then(|bucket| bucket.iter().copied().find(|&c| self[c].data == event.data));

        if let Some(candidate) = existing {
            self.stats.events_deduplicated += 1;
            if event.cutoff && !self[candidate].is_cutoff() {
                self.mark_cutoff(candidate);
            }
            trace!(event = %candidate, kind = %self[candidate].kind(), "deduplicated");
            return Deduplicated {
                unknown: false,
                event: candidate,
            };
        }

        let id = self.store(event);

        for pred in self[id].immediate_predecessors() {
            self.event_mut(pred).successors.push(id);
        }

        if let (Some(lock), None) = (self[id].lid(), self[id].lock_predecessor()) {
            self.initial_lock_events.entry(lock).or_default().push(id);
        }

        let conflicts = self.compute_immediate_conflicts(id);
        for &other in &conflicts {
            self.event_mut(other).immediate_conflicts.push(id);
        }
        self.event_mut(id).immediate_conflicts = conflicts;

        trace!(
            event = %id,
            kind = %self[id].kind(),
            tid = %self[id].tid(),
            depth = self[id].depth(),
            "inserted"
        );

        Deduplicated {
            unknown: true,
            event: id,
        }
    }

    /// Withdraws a leaf event (one without successors), as when the
    /// context-switch bound rejects a freshly inserted extension.
    pub fn remove(&mut self, id: EventId) {
        let event = self.get(id).expect("removed event must be live");
        assert!(
            !event.has_successors(),
            "only events without successors can be removed"
        );
        assert!(event.kind() != EventKind::ProgramInit);

        let key = (event.tid().clone(), event.depth(), event.kind());
        let preds = event.immediate_predecessors();
        let conflicts = event.immediate_conflicts().to_vec();
        let lid = event.lid();
        let had_lock_pred = event.lock_predecessor().is_some();
        let fingerprint = event.fingerprint();

        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.retain(|&e| e != id);
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
        for pred in preds {
            self.event_mut(pred).successors.retain(|&e| e != id);
        }
        for other in conflicts {
            self.event_mut(other).immediate_conflicts.retain(|&e| e != id);
        }
        if let (Some(lock), false) = (lid, had_lock_pred) {
            if let Some(events) = self.initial_lock_events.get_mut(&lock) {
                events.retain(|&e| e != id);
            }
        }
        if let Some(fp) = fingerprint {
            if self.fingerprints.get(&fp.value) == Some(&id) {
                self.fingerprints.remove(&fp.value);
            }
        }

        trace!(event = %id, "removed");
        self.events[id.as_usize()] = None;
        self.size -= 1;
    }

    fn event_mut(&mut self, id: EventId) -> &mut Event {
        self.events[id.as_usize()].as_mut().expect("stale event id")
    }

    /// Computes depth, cone, and inherited cutoff for a builder, and checks
    /// the construction invariants.
    fn materialize(&self, builder: EventBuilder) -> Event {
        let EventBuilder { tid, mut data } = builder;

        // a broadcast notifies every wait1 among its cond predecessors
        if let EventData::Broadcast {
            notified,
            cond_preds,
            ..
        } = &mut data
        {
            *notified = cond_preds
                .iter()
                .copied()
                .filter(|&p| self[p].kind() == EventKind::Wait1)
                .collect();
        }

        if let EventData::ThreadInit { creation } = &data {
            let kind = self[*creation].kind();
            assert!(
                kind == EventKind::ThreadCreate || kind == EventKind::ProgramInit,
                "thread_init must follow its creation"
            );
        }

        let probe = Event::new(tid.clone(), 0, Cone::new(), data);
        let preds = probe.immediate_predecessors();
        let data = probe.into_data();

        let mut depth = 0;
        for &pred in &preds {
            depth = depth.max(self[pred].depth() + 1);
        }

        let cone = match preds.split_first() {
            None => Cone::new(),
            Some((&first, rest)) => {
                Cone::from_predecessors(self, first, None, rest.iter().copied())
            }
        };

        let mut cutoff = false;
        for (_, &past) in cone.iter() {
            if self[past].is_cutoff() {
                cutoff = true;
                break;
            }
        }

        for &pred in &preds {
            assert!(
                self[pred].depth() < depth,
                "predecessor depth must be strictly smaller"
            );
        }
        if let Some(thread_pred) = data_thread_predecessor(&data) {
            assert!(
                self[thread_pred].tid() == &tid,
                "thread predecessor must be on the same thread"
            );
        }

        let mut event = Event::new(tid, depth, cone, data);
        event.cutoff = cutoff;
        event
    }

    /// Two events are in immediate conflict iff they are causally unordered,
    /// compete for the same immediate-predecessor token, and the conflict is
    /// not inherited from either side's causes. Tokens are: the program-order
    /// predecessor on the same thread, the lock predecessor, and a notified
    /// `wait1`.
    fn compute_immediate_conflicts(&self, id: EventId) -> Vec<EventId> {
        let event = &self[id];
        let mut candidates: Vec<EventId> = Vec::new();

        let push = |candidates: &mut Vec<EventId>, other: EventId| {
            if other != id && !candidates.contains(&other) {
                candidates.push(other);
            }
        };

        // two events branching the same thread history
        if let Some(pp) = event.program_order_predecessor() {
            for &succ in self[pp].successors() {
                if succ != id
                    && self[succ].tid() == event.tid()
                    && self[succ].program_order_predecessor() == Some(pp)
                {
                    push(&mut candidates, succ);
                }
            }
        }

        // two events consuming the same lock token
        if let Some(lid) = event.lid() {
            match event.lock_predecessor() {
                Some(lp) => {
                    for &succ in self[lp].successors() {
                        if self[succ].lock_predecessor() == Some(lp) {
                            push(&mut candidates, succ);
                        }
                    }
                }
                None => {
                    if let Some(initial) = self.initial_lock_events.get(&lid) {
                        for &other in initial {
                            push(&mut candidates, other);
                        }
                    }
                }
            }
        }

        // two notifications consuming the same waiting thread
        let notified: Vec<EventId> = match &event.data {
            EventData::Signal {
                notified: Some(w), ..
            } => vec![*w],
            EventData::Broadcast { notified, .. } => notified.clone(),
            _ => Vec::new(),
        };
        for w in notified {
            for &succ in self[w].successors() {
                if succ != id && self.notifies(succ, w) {
                    push(&mut candidates, succ);
                }
            }
        }

        let all_candidates = candidates.clone();
        candidates.retain(|&other| {
            if self.less_than_eq(id, other) || self.less_than_eq(other, id) {
                return false;
            }
            // inherited from a cause of the new event?
            for pred in self[id].immediate_predecessors() {
                if self.in_conflict(pred, other) {
                    return false;
                }
            }
            // inherited from a cause of the candidate?
            for pred in self[other].immediate_predecessors() {
                if all_candidates.contains(&pred) || self.in_conflict(id, pred) {
                    return false;
                }
            }
            true
        });

        candidates
    }

    fn notifies(&self, notification: EventId, wait: EventId) -> bool {
        let event = &self[notification];
        event.notified_wait() == Some(wait) || event.notified_waits().contains(&wait)
    }

    /// `true` iff a broadcast notifies a `wait1` of thread `tid`.
    pub fn broadcast_notifies_thread(&self, broadcast: EventId, tid: &ThreadId) -> bool {
        self[broadcast]
            .notified_waits()
            .iter()
            .any(|&w| self[w].tid() == tid)
    }

    /// Causal strict order. Callers must guarantee `a` and `b` are not in
    /// conflict; the cone comparison is meaningless otherwise.
    pub fn less_than(&self, a: EventId, b: EventId) -> bool {
        if a == b {
            return false;
        }
        let ea = &self[a];
        let eb = &self[b];
        if ea.tid() == eb.tid() && ea.kind() != EventKind::ProgramInit {
            return ea.depth() < eb.depth();
        }
        self.less_than_cone(a, eb.cone())
    }

    /// `a ≤` every event with cone `cone`. Same conflict-freedom caveat as
    /// [`Unfolding::less_than`].
    pub fn less_than_cone(&self, a: EventId, cone: &Cone) -> bool {
        let ea = &self[a];
        if let Some(entry) = cone.get(ea.tid()) {
            ea.depth() <= self[entry].depth()
        } else {
            ea.kind() == EventKind::ProgramInit
        }
    }

    pub fn less_than_eq(&self, a: EventId, b: EventId) -> bool {
        a == b || self.less_than(a, b)
    }

    pub fn concurrent(&self, a: EventId, b: EventId) -> bool {
        !self.less_than_eq(a, b) && !self.less_than_eq(b, a)
    }

    /// Total order on the events of a single thread (used to sort teeth).
    pub(crate) fn causal_cmp(&self, a: EventId, b: EventId) -> Ordering {
        if a == b {
            Ordering::Equal
        } else if self.less_than(a, b) {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    }

    /// The full conflict relation: `a` and `b` conflict iff some cause of
    /// `a` and some cause of `b` are in immediate conflict.
    pub fn in_conflict(&self, a: EventId, b: EventId) -> bool {
        if a == b || self.less_than(a, b) || self.less_than(b, a) {
            return false;
        }
        for x in self.local_configuration(a, false) {
            for &y in self[x].immediate_conflicts() {
                if self.less_than_eq(y, b) {
                    return true;
                }
            }
        }
        false
    }

    /// Marks `event` and everything causally above it as cutoff. Returns
    /// the number of newly marked events.
    pub fn mark_cutoff(&mut self, event: EventId) -> usize {
        let mut marked = 0;
        let mut queue = vec![event];
        while let Some(id) = queue.pop() {
            let ev = self.event_mut(id);
            if ev.cutoff {
                continue;
            }
            ev.cutoff = true;
            let kind = ev.kind();
            marked += 1;
            self.stats.cutoff_events[kind.index()] += 1;
            queue.extend(self[id].successors().iter().copied());
        }
        marked
    }

    /// Attaches the interpreter's memory fingerprint to `event`. Attaching
    /// is idempotent: a second attachment returns whether it matches the
    /// first. When another live event carries the same fingerprint value and
    /// precedes `event` in the adequate total order, `event` is behaviorally
    /// redundant and gets marked cutoff.
    pub fn attach_fingerprint(&mut self, event: EventId, fingerprint: Fingerprint) -> bool {
        {
            let ev = self.event_mut(event);
            if let Some(existing) = ev.fingerprint {
                return existing == fingerprint;
            }
            ev.fingerprint = Some(fingerprint);
        }

        let prior = self.fingerprints.get(&fingerprint.value).copied();
        match prior {
            Some(other) if other != event => {
                if order::adequate_less(self, other, event) {
                    trace!(event = %event, prior = %other, "fingerprint match, marking cutoff");
                    self.mark_cutoff(event);
                } else {
                    self.fingerprints.insert(fingerprint.value, event);
                }
            }
            Some(_) => {}
            None => {
                self.fingerprints.insert(fingerprint.value, event);
            }
        }
        true
    }

    /// Iterates the local configuration `[event]`: the event itself and all
    /// of its causes, grouped per thread in descending thread order, each
    /// thread's chain newest-first. Finite and deterministic.
    pub fn local_configuration(
        &self,
        event: EventId,
        include_root: bool,
    ) -> LocalConfiguration<'_> {
        LocalConfiguration::new(self, event, include_root, true)
    }

    /// Iterates the causes `⌈event⌉ = [event] \ {event}`.
    pub fn causes(&self, event: EventId, include_root: bool) -> LocalConfiguration<'_> {
        LocalConfiguration::new(self, event, include_root, false)
    }

    /// `|[event]|`, cached on the event after the first computation.
    pub fn local_configuration_size(&self, event: EventId) -> usize {
        let cached = self[event].lc_size_cache();
        if cached != 0 {
            return cached;
        }
        let size = self.local_configuration(event, true).count();
        self[event].set_lc_size_cache(size);
        size
    }

    pub(crate) fn set_cex_known(&mut self, id: EventId) {
        self.event_mut(id).cex_known = true;
    }

    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut Statistics {
        &mut self.stats
    }

    /// Writes a human-readable statistics block to `out`.
    pub fn print_statistics(&self, out: &mut dyn Write) -> io::Result<()> {
        self.stats.print(out)
    }
}

impl Default for Unfolding {
    fn default() -> Unfolding {
        Unfolding::new()
    }
}

impl ops::Index<EventId> for Unfolding {
    type Output = Event;

    fn index(&self, index: EventId) -> &Event {
        self.events[index.as_usize()]
            .as_ref()
            .expect("stale event id")
    }
}

impl fmt::Debug for Unfolding {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Unfolding")
            .field("size", &self.size)
            .field("optional_creation_events", &self.optional_creation_events)
            .finish()
    }
}

fn data_thread_predecessor(data: &EventData) -> Option<EventId> {
    match data {
        EventData::ProgramInit | EventData::ThreadInit { .. } => None,
        EventData::ThreadCreate { thread, .. }
        | EventData::ThreadExit { thread }
        | EventData::ThreadJoin { thread, .. }
        | EventData::LockCreate { thread, .. }
        | EventData::LockDestroy { thread, .. }
        | EventData::LockAcquire { thread, .. }
        | EventData::LockRelease { thread, .. }
        | EventData::CondCreate { thread, .. }
        | EventData::CondDestroy { thread, .. }
        | EventData::Wait1 { thread, .. }
        | EventData::Wait2 { thread, .. }
        | EventData::Signal { thread, .. }
        | EventData::Broadcast { thread, .. }
        | EventData::Local { thread, .. } => Some(*thread),
    }
}

/// Forward-only iterator over a local configuration; see
/// [`Unfolding::local_configuration`].
#[derive(Debug)]
pub struct LocalConfiguration<'a> {
    unfolding: &'a Unfolding,
    /// The event itself, if still to be yielded.
    event: Option<EventId>,
    /// Cone heads still to be walked, in visiting order.
    chains: Vec<EventId>,
    cursor: Option<EventId>,
    include_root: bool,
    root_pending: bool,
}

impl<'a> LocalConfiguration<'a> {
    fn new(
        unfolding: &'a Unfolding,
        event: EventId,
        include_root: bool,
        with_event: bool,
    ) -> LocalConfiguration<'a> {
        // visit threads in descending order, newest event first
        let chains = unfolding[event]
            .cone()
            .iter()
            .rev()
            .map(|(_, &e)| e)
            .collect();

        let is_root = unfolding[event].kind() == EventKind::ProgramInit;

        LocalConfiguration {
            unfolding,
            event: if with_event { Some(event) } else { None },
            chains,
            cursor: None,
            include_root,
            root_pending: include_root && !is_root,
        }
    }
}

impl Iterator for LocalConfiguration<'_> {
    type Item = EventId;

    fn next(&mut self) -> Option<EventId> {
        if let Some(event) = self.event.take() {
            if self.unfolding[event].kind() == EventKind::ProgramInit {
                self.root_pending = false;
                if !self.include_root {
                    return None;
                }
            }
            return Some(event);
        }

        if let Some(current) = self.cursor {
            self.cursor = self.unfolding[current].thread_predecessor();
            return Some(current);
        }

        if let Some(head) = self.chains.pop() {
            self.cursor = self.unfolding[head].thread_predecessor();
            return Some(head);
        }

        if self.root_pending {
            self.root_pending = false;
            return Some(self.unfolding.root());
        }

        None
    }
}

/// Aggregate counters kept by the unfolding, for diagnostics.
#[derive(Clone, Debug, Default)]
pub struct Statistics {
    /// Events materialized, per kind (including later-deduplicated ones).
    pub events_created: [usize; KIND_COUNT],
    /// Events actually stored, per kind.
    pub unique_events: [usize; KIND_COUNT],
    /// Events marked cutoff, per kind.
    pub cutoff_events: [usize; KIND_COUNT],
    /// Materializations that hit an existing event.
    pub events_deduplicated: usize,
    /// Conflicting extensions handed back to callers.
    pub cex_created: usize,
    /// Conflicting extensions that seeded a branch.
    pub cex_inserted: usize,
    /// Number of conflicting-extension enumerations.
    pub configurations: usize,
}

impl Statistics {
    pub(crate) fn print(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "== UNFOLDING STATISTICS ==")?;

        let total: usize = self.events_created.iter().sum();
        writeln!(out, "Events created: {}", total)?;
        for kind in EventKind::ALL {
            writeln!(out, "  {}: {}", kind, self.events_created[kind.index()])?;
        }

        let total: usize = self.unique_events.iter().sum();
        writeln!(out, "Unique events: {}", total)?;
        for kind in EventKind::ALL {
            writeln!(out, "  {}: {}", kind, self.unique_events[kind.index()])?;
        }

        let total: usize = self.cutoff_events.iter().sum();
        writeln!(out, "Cutoff events: {}", total)?;
        for kind in EventKind::ALL {
            writeln!(out, "  {}: {}", kind, self.cutoff_events[kind.index()])?;
        }

        writeln!(out, "Events deduplicated: {}", self.events_deduplicated)?;
        writeln!(out, "CEX created: {}", self.cex_created)?;
        writeln!(out, "CEX inserted: {}", self.cex_inserted)?;
        writeln!(out, "Configurations: {}", self.configurations)?;
        writeln!(out, "==========================")?;
        Ok(())
    }
}
