use std::cell::Cell;
use std::fmt;

use crate::cone::Cone;
use crate::thread_id::ThreadId;

/// Identifies an event inside its [`Unfolding`](crate::unfolding::Unfolding).
///
/// Ids are stable for the lifetime of the unfolding; two configurations that
/// commit structurally equal events observe the same id.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EventId(pub(crate) usize);

impl EventId {
    pub(crate) fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "EventId({})", self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "e{}", self.0)
    }
}

/// Identifies a lock. Zero is reserved.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct LockId(pub u64);

/// Identifies a condition variable. Zero is reserved.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct CondId(pub u64);

impl fmt::Display for LockId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "l{}", self.0)
    }
}

impl fmt::Display for CondId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "c{}", self.0)
    }
}

/// The kind of an event.
///
/// The variant order is significant: it is part of the total order used to
/// pick cutoff representatives, so it must stay stable.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[repr(u8)]
pub enum EventKind {
    Local,
    ProgramInit,
    ThreadCreate,
    ThreadJoin,
    ThreadInit,
    ThreadExit,
    LockCreate,
    LockDestroy,
    LockAcquire,
    LockRelease,
    CondCreate,
    CondDestroy,
    Wait1,
    Wait2,
    Signal,
    Broadcast,
}

/// Number of event kinds, for per-kind counter arrays.
pub const KIND_COUNT: usize = 16;

impl EventKind {
    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// All kinds in declaration order.
    pub(crate) const ALL: [EventKind; KIND_COUNT] = [
        EventKind::Local,
        EventKind::ProgramInit,
        EventKind::ThreadCreate,
        EventKind::ThreadJoin,
        EventKind::ThreadInit,
        EventKind::ThreadExit,
        EventKind::LockCreate,
        EventKind::LockDestroy,
        EventKind::LockAcquire,
        EventKind::LockRelease,
        EventKind::CondCreate,
        EventKind::CondDestroy,
        EventKind::Wait1,
        EventKind::Wait2,
        EventKind::Signal,
        EventKind::Broadcast,
    ];
}

impl fmt::Display for EventKind {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Local => "local",
            EventKind::ProgramInit => "program_init",
            EventKind::ThreadCreate => "thread_create",
            EventKind::ThreadJoin => "thread_join",
            EventKind::ThreadInit => "thread_init",
            EventKind::ThreadExit => "thread_exit",
            EventKind::LockCreate => "lock_create",
            EventKind::LockDestroy => "lock_destroy",
            EventKind::LockAcquire => "lock_acquire",
            EventKind::LockRelease => "lock_release",
            EventKind::CondCreate => "cond_create",
            EventKind::CondDestroy => "cond_destroy",
            EventKind::Wait1 => "wait1",
            EventKind::Wait2 => "wait2",
            EventKind::Signal => "signal",
            EventKind::Broadcast => "broadcast",
        };
        name.fmt(fmt)
    }
}

/// Kind-specific predecessor slots and payload.
///
/// Common fields (thread, depth, cone, caches) live on the [`Event`]
/// envelope; each variant carries only what its kind needs.
#[derive(Clone, PartialEq, Eq, Debug)]
pub(crate) enum EventData {
    ProgramInit,
    ThreadCreate {
        thread: EventId,
        created: ThreadId,
    },
    /// First event of a thread. `creation` is the spawning `thread_create`,
    /// or `program_init` for a startup thread.
    ThreadInit {
        creation: EventId,
    },
    ThreadExit {
        thread: EventId,
    },
    ThreadJoin {
        thread: EventId,
        /// The joined thread's `thread_exit`.
        joined: EventId,
    },
    LockCreate {
        thread: EventId,
        lock: LockId,
    },
    LockDestroy {
        thread: EventId,
        lock: LockId,
        lock_pred: Option<EventId>,
    },
    LockAcquire {
        thread: EventId,
        lock: LockId,
        lock_pred: Option<EventId>,
    },
    LockRelease {
        thread: EventId,
        lock: LockId,
        lock_pred: EventId,
    },
    CondCreate {
        thread: EventId,
        cond: CondId,
    },
    CondDestroy {
        thread: EventId,
        cond: CondId,
        cond_preds: Vec<EventId>,
    },
    Wait1 {
        thread: EventId,
        cond: CondId,
        lock: LockId,
        lock_pred: EventId,
        cond_preds: Vec<EventId>,
    },
    Wait2 {
        thread: EventId,
        cond: CondId,
        lock: LockId,
        lock_pred: EventId,
        /// The signal or broadcast that woke the waiting thread.
        notifying: EventId,
    },
    Signal {
        thread: EventId,
        cond: CondId,
        /// The notified `wait1`, or `None` for a lost signal.
        notified: Option<EventId>,
        cond_preds: Vec<EventId>,
    },
    Broadcast {
        thread: EventId,
        cond: CondId,
        /// The notified `wait1` events; empty for a lost broadcast.
        /// Derived from `cond_preds` at materialization.
        notified: Vec<EventId>,
        cond_preds: Vec<EventId>,
    },
    Local {
        thread: EventId,
        /// Branch decisions taken since the previous observable event.
        path: Vec<bool>,
    },
}

impl EventData {
    pub(crate) fn kind(&self) -> EventKind {
        match self {
            EventData::ProgramInit => EventKind::ProgramInit,
            EventData::ThreadCreate { .. } => EventKind::ThreadCreate,
            EventData::ThreadInit { .. } => EventKind::ThreadInit,
            EventData::ThreadExit { .. } => EventKind::ThreadExit,
            EventData::ThreadJoin { .. } => EventKind::ThreadJoin,
            EventData::LockCreate { .. } => EventKind::LockCreate,
            EventData::LockDestroy { .. } => EventKind::LockDestroy,
            EventData::LockAcquire { .. } => EventKind::LockAcquire,
            EventData::LockRelease { .. } => EventKind::LockRelease,
            EventData::CondCreate { .. } => EventKind::CondCreate,
            EventData::CondDestroy { .. } => EventKind::CondDestroy,
            EventData::Wait1 { .. } => EventKind::Wait1,
            EventData::Wait2 { .. } => EventKind::Wait2,
            EventData::Signal { .. } => EventKind::Signal,
            EventData::Broadcast { .. } => EventKind::Broadcast,
            EventData::Local { .. } => EventKind::Local,
        }
    }
}

/// A memory fingerprint attached to an event by the interpreter: a running
/// hash of the program state reached after the event, plus the delta
/// contributed by the event's thread. Two events with equal fingerprints are
/// behaviorally equivalent; the larger one (in the adequate total order) is a
/// cutoff.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Fingerprint {
    pub value: u64,
    pub thread_delta: u64,
}

/// An immutable node of the unfolding.
///
/// Events are owned by their [`Unfolding`](crate::unfolding::Unfolding) and
/// referenced by [`EventId`] everywhere else. Predecessor edges point
/// strictly downwards in depth, so the event graph is a DAG.
pub struct Event {
    pub(crate) id: EventId,
    kind: EventKind,
    tid: ThreadId,
    depth: usize,
    cone: Cone,
    pub(crate) data: EventData,

    // caches maintained by the unfolding
    pub(crate) successors: Vec<EventId>,
    pub(crate) immediate_conflicts: Vec<EventId>,
    pub(crate) cutoff: bool,
    pub(crate) fingerprint: Option<Fingerprint>,
    pub(crate) cex_known: bool,
    lc_size: Cell<usize>,
}

impl Event {
    pub(crate) fn new(tid: ThreadId, depth: usize, cone: Cone, data: EventData) -> Event {
        Event {
            id: EventId(usize::MAX),
            kind: data.kind(),
            tid,
            depth,
            cone,
            data,
            successors: Vec::new(),
            immediate_conflicts: Vec::new(),
            cutoff: false,
            fingerprint: None,
            cex_known: false,
            lc_size: Cell::new(0),
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn tid(&self) -> &ThreadId {
        &self.tid
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn cone(&self) -> &Cone {
        &self.cone
    }

    pub fn is_cutoff(&self) -> bool {
        self.cutoff
    }

    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.fingerprint
    }

    pub fn has_successors(&self) -> bool {
        !self.successors.is_empty()
    }

    pub fn successors(&self) -> &[EventId] {
        &self.successors
    }

    /// Immediate conflicts: conflicts that are not a consequence of a
    /// conflict between smaller events. Maintained by the unfolding.
    pub fn immediate_conflicts(&self) -> &[EventId] {
        &self.immediate_conflicts
    }

    /// The same-thread immediate predecessor. `None` for `program_init` and
    /// `thread_init` (a thread's first event follows its creation, which
    /// lives on the spawning thread).
    pub fn thread_predecessor(&self) -> Option<EventId> {
        match &self.data {
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

    /// The immediate predecessor in program order: the thread predecessor,
    /// or the creation event for `thread_init`.
    pub fn program_order_predecessor(&self) -> Option<EventId> {
        match &self.data {
            EventData::ThreadInit { creation } => Some(*creation),
            _ => self.thread_predecessor(),
        }
    }

    /// For `thread_init`: the spawning `thread_create` (or `program_init`).
    pub fn creation_predecessor(&self) -> Option<EventId> {
        match &self.data {
            EventData::ThreadInit { creation } => Some(*creation),
            _ => None,
        }
    }

    /// For `thread_create`: the id of the created thread.
    pub fn created_thread(&self) -> Option<&ThreadId> {
        match &self.data {
            EventData::ThreadCreate { created, .. } => Some(created),
            _ => None,
        }
    }

    /// For `thread_join`: the joined thread's `thread_exit`.
    pub fn joined_predecessor(&self) -> Option<EventId> {
        match &self.data {
            EventData::ThreadJoin { joined, .. } => Some(*joined),
            _ => None,
        }
    }

    /// The most recent event on the same lock, if any. `None` also for lock
    /// events on a never-created lock under optional creation.
    pub fn lock_predecessor(&self) -> Option<EventId> {
        match &self.data {
            EventData::LockDestroy { lock_pred, .. } | EventData::LockAcquire { lock_pred, .. } => {
                *lock_pred
            }
            EventData::LockRelease { lock_pred, .. }
            | EventData::Wait1 { lock_pred, .. }
            | EventData::Wait2 { lock_pred, .. } => Some(*lock_pred),
            _ => None,
        }
    }

    /// Condition-variable predecessors: prior notifications, waits, and the
    /// creation event, as recorded at construction time.
    pub fn cond_predecessors(&self) -> &[EventId] {
        match &self.data {
            EventData::CondDestroy { cond_preds, .. }
            | EventData::Wait1 { cond_preds, .. }
            | EventData::Signal { cond_preds, .. }
            | EventData::Broadcast { cond_preds, .. } => cond_preds,
            EventData::Wait2 { notifying, .. } => std::slice::from_ref(notifying),
            _ => &[],
        }
    }

    /// For `wait2`: the notification that woke the thread.
    pub fn notifying_predecessor(&self) -> Option<EventId> {
        match &self.data {
            EventData::Wait2 { notifying, .. } => Some(*notifying),
            _ => None,
        }
    }

    /// For `signal`: the notified `wait1`, if the signal is not lost.
    pub fn notified_wait(&self) -> Option<EventId> {
        match &self.data {
            EventData::Signal { notified, .. } => *notified,
            _ => None,
        }
    }

    /// For `broadcast`: the notified `wait1` events.
    pub fn notified_waits(&self) -> &[EventId] {
        match &self.data {
            EventData::Broadcast { notified, .. } => notified,
            _ => &[],
        }
    }

    /// `true` for a signal or broadcast that fired with no waiter to notify.
    pub fn is_lost(&self) -> bool {
        match &self.data {
            EventData::Signal { notified, .. } => notified.is_none(),
            EventData::Broadcast { notified, .. } => notified.is_empty(),
            _ => false,
        }
    }

    pub fn lid(&self) -> Option<LockId> {
        match &self.data {
            EventData::LockCreate { lock, .. }
            | EventData::LockDestroy { lock, .. }
            | EventData::LockAcquire { lock, .. }
            | EventData::LockRelease { lock, .. }
            | EventData::Wait1 { lock, .. }
            | EventData::Wait2 { lock, .. } => Some(*lock),
            _ => None,
        }
    }

    pub fn cid(&self) -> Option<CondId> {
        match &self.data {
            EventData::CondCreate { cond, .. }
            | EventData::CondDestroy { cond, .. }
            | EventData::Wait1 { cond, .. }
            | EventData::Wait2 { cond, .. }
            | EventData::Signal { cond, .. }
            | EventData::Broadcast { cond, .. } => Some(*cond),
            _ => None,
        }
    }

    /// For `local`: the recorded branch decisions.
    pub fn local_path(&self) -> Option<&[bool]> {
        match &self.data {
            EventData::Local { path, .. } => Some(path),
            _ => None,
        }
    }

    /// The ordered list of immediate predecessors: program-order predecessor
    /// first, then kind-specific slots, without duplicates.
    pub fn immediate_predecessors(&self) -> Vec<EventId> {
        let mut preds = Vec::with_capacity(2 + self.cond_predecessors().len());

        let push = |preds: &mut Vec<EventId>, id: EventId| {
            if !preds.contains(&id) {
                preds.push(id);
            }
        };

        if let Some(p) = self.program_order_predecessor() {
            push(&mut preds, p);
        }
        if let Some(p) = self.lock_predecessor() {
            push(&mut preds, p);
        }
        if let Some(p) = self.joined_predecessor() {
            push(&mut preds, p);
        }
        for &p in self.cond_predecessors() {
            push(&mut preds, p);
        }

        preds
    }

    pub(crate) fn into_data(self) -> EventData {
        self.data
    }

    pub(crate) fn lc_size_cache(&self) -> usize {
        self.lc_size.get()
    }

    pub(crate) fn set_lc_size_cache(&self, size: usize) {
        self.lc_size.set(size);
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Event")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("tid", &self.tid)
            .field("depth", &self.depth)
            .field("cutoff", &self.cutoff)
            .field("data", &self.data)
            .finish()
    }
}

/// A not-yet-inserted event: the kind-specific slots plus the owning thread.
/// Depth, cone, and cutoff inheritance are computed when the builder is
/// materialized by [`Unfolding::deduplicate`](crate::unfolding::Unfolding::deduplicate).
#[derive(Clone, Debug)]
pub struct EventBuilder {
    pub(crate) tid: ThreadId,
    pub(crate) data: EventData,
}

impl EventBuilder {
    pub(crate) fn thread_create(tid: ThreadId, thread: EventId, created: ThreadId) -> EventBuilder {
        EventBuilder {
            tid,
            data: EventData::ThreadCreate { thread, created },
        }
    }

    pub(crate) fn thread_init(tid: ThreadId, creation: EventId) -> EventBuilder {
        EventBuilder {
            tid,
            data: EventData::ThreadInit { creation },
        }
    }

    pub(crate) fn thread_exit(tid: ThreadId, thread: EventId) -> EventBuilder {
        EventBuilder {
            tid,
            data: EventData::ThreadExit { thread },
        }
    }

    pub(crate) fn thread_join(tid: ThreadId, thread: EventId, joined: EventId) -> EventBuilder {
        EventBuilder {
            tid,
            data: EventData::ThreadJoin { thread, joined },
        }
    }

    pub(crate) fn lock_create(tid: ThreadId, lock: LockId, thread: EventId) -> EventBuilder {
        EventBuilder {
            tid,
            data: EventData::LockCreate { thread, lock },
        }
    }

    pub(crate) fn lock_destroy(
        tid: ThreadId,
        lock: LockId,
        thread: EventId,
        lock_pred: Option<EventId>,
    ) -> EventBuilder {
        EventBuilder {
            tid,
            data: EventData::LockDestroy {
                thread,
                lock,
                lock_pred,
            },
        }
    }

    pub(crate) fn lock_acquire(
        tid: ThreadId,
        lock: LockId,
        thread: EventId,
        lock_pred: Option<EventId>,
    ) -> EventBuilder {
        EventBuilder {
            tid,
            data: EventData::LockAcquire {
                thread,
                lock,
                lock_pred,
            },
        }
    }

    pub(crate) fn lock_release(
        tid: ThreadId,
        lock: LockId,
        thread: EventId,
        lock_pred: EventId,
    ) -> EventBuilder {
        EventBuilder {
            tid,
            data: EventData::LockRelease {
                thread,
                lock,
                lock_pred,
            },
        }
    }

    pub(crate) fn cond_create(tid: ThreadId, cond: CondId, thread: EventId) -> EventBuilder {
        EventBuilder {
            tid,
            data: EventData::CondCreate { thread, cond },
        }
    }

    pub(crate) fn cond_destroy(
        tid: ThreadId,
        cond: CondId,
        thread: EventId,
        cond_preds: Vec<EventId>,
    ) -> EventBuilder {
        EventBuilder {
            tid,
            data: EventData::CondDestroy {
                thread,
                cond,
                cond_preds,
            },
        }
    }

    pub(crate) fn wait1(
        tid: ThreadId,
        cond: CondId,
        lock: LockId,
        thread: EventId,
        lock_pred: EventId,
        cond_preds: Vec<EventId>,
    ) -> EventBuilder {
        EventBuilder {
            tid,
            data: EventData::Wait1 {
                thread,
                cond,
                lock,
                lock_pred,
                cond_preds,
            },
        }
    }

    pub(crate) fn wait2(
        tid: ThreadId,
        cond: CondId,
        lock: LockId,
        thread: EventId,
        lock_pred: EventId,
        notifying: EventId,
    ) -> EventBuilder {
        EventBuilder {
            tid,
            data: EventData::Wait2 {
                thread,
                cond,
                lock,
                lock_pred,
                notifying,
            },
        }
    }

    /// A signal notifying `wait`. The notified `wait1` is the only
    /// condition-variable predecessor.
    pub(crate) fn signal_notifying(
        tid: ThreadId,
        cond: CondId,
        thread: EventId,
        wait: EventId,
    ) -> EventBuilder {
        EventBuilder {
            tid,
            data: EventData::Signal {
                thread,
                cond,
                notified: Some(wait),
                cond_preds: vec![wait],
            },
        }
    }

    /// A lost signal; `cond_preds` holds the prior notifications (and the
    /// creation event, if outside the signalling thread's past).
    pub(crate) fn signal_lost(
        tid: ThreadId,
        cond: CondId,
        thread: EventId,
        cond_preds: Vec<EventId>,
    ) -> EventBuilder {
        EventBuilder {
            tid,
            data: EventData::Signal {
                thread,
                cond,
                notified: None,
                cond_preds,
            },
        }
    }

    /// A broadcast; every `wait1` among `cond_preds` is notified (the
    /// `notified` list is derived at materialization). A broadcast with no
    /// `wait1` predecessor is lost.
    pub(crate) fn broadcast(
        tid: ThreadId,
        cond: CondId,
        thread: EventId,
        cond_preds: Vec<EventId>,
    ) -> EventBuilder {
        EventBuilder {
            tid,
            data: EventData::Broadcast {
                thread,
                cond,
                notified: Vec::new(),
                cond_preds,
            },
        }
    }

    pub(crate) fn local(tid: ThreadId, thread: EventId, path: Vec<bool>) -> EventBuilder {
        EventBuilder {
            tid,
            data: EventData::Local { thread, path },
        }
    }

    pub fn kind(&self) -> EventKind {
        self.data.kind()
    }

    pub fn tid(&self) -> &ThreadId {
        &self.tid
    }
}
