use std::cell::{Cell, Ref, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{self, Write};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

use tracing::trace;

use crate::event::{CondId, EventBuilder, EventId, EventKind, LockId};
use crate::thread_id::ThreadId;
use crate::unfolding::Unfolding;

/// A one-shot token produced by a [`Configuration`] operation and consumed
/// by [`Configuration::commit`].
///
/// A token is only valid while the configuration's extension counter still
/// matches: building anything else in between invalidates it, and a token
/// can never be committed into a clone of the configuration it was built
/// for.
#[must_use = "extensions do nothing unless committed"]
#[derive(Debug)]
pub struct Extension {
    builder: EventBuilder,
    configuration: u64,
    index: u64,
}

impl Extension {
    pub fn kind(&self) -> EventKind {
        self.builder.kind()
    }
}

fn next_configuration_id() -> u64 {
    // identity across clones sharing an unfolding
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    NEXT_ID.fetch_add(1, Relaxed)
}

/// Seeds the first configuration of an unfolding: creates the shared
/// [`Unfolding`] and one `thread_init` per startup thread.
#[derive(Debug)]
pub struct ConfigurationRoot {
    unfolding: Rc<RefCell<Unfolding>>,
    thread_heads: BTreeMap<ThreadId, EventId>,
}

impl ConfigurationRoot {
    pub fn new() -> ConfigurationRoot {
        ConfigurationRoot::with_optional_creation_events(true)
    }

    pub fn with_optional_creation_events(optional: bool) -> ConfigurationRoot {
        ConfigurationRoot {
            unfolding: Rc::new(RefCell::new(Unfolding::with_optional_creation_events(
                optional,
            ))),
            thread_heads: BTreeMap::new(),
        }
    }

    /// Adds a startup thread, initialized directly from `program_init`. The
    /// first call adds the main thread `1`.
    pub fn add_thread(&mut self) -> &mut Self {
        let mut unfolding = self.unfolding.borrow_mut();
        let tid = ThreadId::new(self.thread_heads.len() as u16 + 1);
        let root = unfolding.root();
        let init = unfolding
            .deduplicate(EventBuilder::thread_init(tid.clone(), root))
            .event;
        self.thread_heads.insert(tid, init);
        drop(unfolding);
        self
    }

    /// Consumes the root and yields the initial configuration.
    pub fn construct(self) -> Configuration {
        assert!(
            !self.thread_heads.is_empty(),
            "cannot create a configuration without any startup threads"
        );
        let size = self.thread_heads.len() + 1;
        Configuration {
            unfolding: self.unfolding,
            id: next_configuration_id(),
            thread_heads: self.thread_heads,
            lock_heads: BTreeMap::new(),
            cond_heads: BTreeMap::new(),
            wait2_heads: BTreeMap::new(),
            used_lock_ids: BTreeSet::new(),
            used_cond_ids: BTreeSet::new(),
            size,
            last_extension: Cell::new(0),
        }
    }
}

impl Default for ConfigurationRoot {
    fn default() -> Self {
        ConfigurationRoot::new()
    }
}

/// A conflict-free, downward-closed view of the unfolding: one explored
/// execution, represented by per-thread, per-lock, and per-cond head
/// cursors.
///
/// Cloning is cheap: the clone shares the unfolding and copies only the head
/// maps, so each explored branch owns its own cursor.
pub struct Configuration {
    unfolding: Rc<RefCell<Unfolding>>,

    /// Distinguishes this configuration from its clones for extension
    /// validity.
    id: u64,

    /// Most recent event of every thread that ever existed here.
    thread_heads: BTreeMap<ThreadId, EventId>,

    /// Most recent event of every active lock.
    lock_heads: BTreeMap<LockId, EventId>,

    /// Per active condition variable: the prior wait1/notification events
    /// that a new operation on the cond must causally follow.
    cond_heads: BTreeMap<CondId, Vec<EventId>>,

    /// Per active condition variable: committed `wait2` events, needed as
    /// predecessors when the cond is destroyed.
    wait2_heads: BTreeMap<CondId, Vec<EventId>>,

    /// Lock ids ever used; ids are never reused.
    used_lock_ids: BTreeSet<LockId>,

    /// Condition-variable ids ever used; ids are never reused.
    used_cond_ids: BTreeSet<CondId>,

    /// Number of committed events (plus `program_init` and startup inits).
    size: usize,

    /// Extensions are only valid while this counter matches their index.
    last_extension: Cell<u64>,
}

impl Clone for Configuration {
    fn clone(&self) -> Configuration {
        Configuration {
            unfolding: self.unfolding.clone(),
            id: next_configuration_id(),
            thread_heads: self.thread_heads.clone(),
            lock_heads: self.lock_heads.clone(),
            cond_heads: self.cond_heads.clone(),
            wait2_heads: self.wait2_heads.clone(),
            used_lock_ids: self.used_lock_ids.clone(),
            used_cond_ids: self.used_cond_ids.clone(),
            size: self.size,
            last_extension: Cell::new(self.last_extension.get()),
        }
    }
}

impl Default for Configuration {
    /// A configuration with a single main thread.
    fn default() -> Configuration {
        let mut root = ConfigurationRoot::new();
        root.add_thread();
        root.construct()
    }
}

impl Configuration {
    fn ex(&self, builder: EventBuilder) -> Extension {
        let index = self.last_extension.get() + 1;
        self.last_extension.set(index);
        Extension {
            builder,
            configuration: self.id,
            index,
        }
    }

    pub fn unfolding(&self) -> &Rc<RefCell<Unfolding>> {
        &self.unfolding
    }

    pub(crate) fn unfolding_ref(&self) -> Ref<'_, Unfolding> {
        self.unfolding.borrow()
    }

    pub fn thread_heads(&self) -> &BTreeMap<ThreadId, EventId> {
        &self.thread_heads
    }

    pub fn lock_heads(&self) -> &BTreeMap<LockId, EventId> {
        &self.lock_heads
    }

    pub fn cond_heads(&self) -> &BTreeMap<CondId, Vec<EventId>> {
        &self.cond_heads
    }

    /// The head event of `tid`, if the thread exists here.
    pub fn last_of_tid(&self, tid: &ThreadId) -> Option<EventId> {
        self.thread_heads.get(tid).copied()
    }

    /// The head event of an active lock.
    pub fn last_of_lid(&self, lid: LockId) -> Option<EventId> {
        self.lock_heads.get(&lid).copied()
    }

    /// The condition-variable predecessors of an active cond.
    pub fn last_of_cid(&self, cid: CondId) -> Vec<EventId> {
        self.cond_heads.get(&cid).cloned().unwrap_or_default()
    }

    /// Number of events in this configuration.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Threads whose head is neither `thread_exit` nor a blocking `wait1`.
    pub fn active_threads(&self) -> usize {
        let unfolding = self.unfolding.borrow();
        self.thread_heads
            .values()
            .filter(|&&head| {
                let kind = unfolding[head].kind();
                kind != EventKind::ThreadExit && kind != EventKind::Wait1
            })
            .count()
    }

    /// Threads able to take a step: not exited, and not blocked in `wait1`
    /// unless already notified.
    pub fn runnable_threads(&self) -> Vec<ThreadId> {
        let unfolding = self.unfolding.borrow();
        self.thread_heads
            .iter()
            .filter(|(tid, &head)| match unfolding[head].kind() {
                EventKind::ThreadExit => false,
                EventKind::Wait1 => {
                    let cid = unfolding[head].cid().expect("wait1 carries a cond id");
                    self.was_notified_inner(&unfolding, tid, cid)
                }
                _ => true,
            })
            .map(|(tid, _)| tid.clone())
            .collect()
    }

    /// `true` iff the lock's most recent event leaves it acquirable.
    pub fn can_acquire_lock(&self, lid: LockId) -> bool {
        assert!(lid.0 != 0, "lock id must not be zero");
        let unfolding = self.unfolding.borrow();
        let Some(head) = self.last_of_lid(lid) else {
            return unfolding.optional_creation_events() && !self.used_lock_ids.contains(&lid);
        };
        matches!(
            unfolding[head].kind(),
            EventKind::LockCreate | EventKind::LockRelease | EventKind::Wait1
        )
    }

    /// `true` iff `tid` is blocked in a `wait1` on `cid` and a matching
    /// non-lost notification has been committed.
    pub fn was_notified(&self, tid: &ThreadId, cid: CondId) -> bool {
        let unfolding = self.unfolding.borrow();
        self.was_notified_inner(&unfolding, tid, cid)
    }

    fn was_notified_inner(&self, unfolding: &Unfolding, tid: &ThreadId, cid: CondId) -> bool {
        let Some(head) = self.last_of_tid(tid) else {
            return false;
        };
        if unfolding[head].kind() != EventKind::Wait1 {
            return false;
        }
        self.wait2_notifying_predecessor(unfolding, head, &self.last_of_cid(cid))
            .is_some()
    }

    /// Applies a previously built extension. Returns `None` when the token
    /// is stale (another extension was built in between, or the token
    /// belongs to a different configuration); the configuration is untouched
    /// in that case.
    pub fn commit(&mut self, extension: Extension) -> Option<EventId> {
        if extension.configuration != self.id || extension.index != self.last_extension.get() {
            return None;
        }

        let mut unfolding = self.unfolding.borrow_mut();
        let event = unfolding.deduplicate(extension.builder).event;

        self.thread_heads
            .insert(unfolding[event].tid().clone(), event);
        self.size += 1;

        let kind = unfolding[event].kind();
        match kind {
            EventKind::LockCreate => {
                let lid = unfolding[event].lid().unwrap();
                self.used_lock_ids.insert(lid);
                self.lock_heads.insert(lid, event);
            }
            EventKind::LockAcquire => {
                let lid = unfolding[event].lid().unwrap();
                if unfolding[event].lock_predecessor().is_none() {
                    self.used_lock_ids.insert(lid);
                }
                self.lock_heads.insert(lid, event);
            }
            EventKind::LockRelease => {
                let lid = unfolding[event].lid().unwrap();
                self.lock_heads.insert(lid, event);
            }
            EventKind::LockDestroy => {
                let lid = unfolding[event].lid().unwrap();
                if unfolding[event].lock_predecessor().is_none() {
                    self.used_lock_ids.insert(lid);
                } else {
                    self.lock_heads.remove(&lid);
                }
            }
            EventKind::CondCreate => {
                let cid = unfolding[event].cid().unwrap();
                self.used_cond_ids.insert(cid);
                self.cond_heads.insert(cid, vec![event]);
            }
            EventKind::Wait1 => {
                let cid = unfolding[event].cid().unwrap();
                let lid = unfolding[event].lid().unwrap();
                if unfolding[event].cond_predecessors().is_empty() {
                    self.used_cond_ids.insert(cid);
                }
                self.lock_heads.insert(lid, event);
                self.cond_heads.entry(cid).or_default().push(event);
            }
            EventKind::Wait2 => {
                let cid = unfolding[event].cid().unwrap();
                let lid = unfolding[event].lid().unwrap();
                self.lock_heads.insert(lid, event);
                self.wait2_heads.entry(cid).or_default().push(event);
            }
            EventKind::Signal => {
                let cid = unfolding[event].cid().unwrap();
                if unfolding[event].cond_predecessors().is_empty() {
                    self.used_cond_ids.insert(cid);
                }
                let preds = self.cond_heads.entry(cid).or_default();
                match unfolding[event].notified_wait() {
                    Some(wait) => {
                        // the notified wait1 is subsumed by the signal
                        let slot = preds
                            .iter()
                            .position(|&p| p == wait)
                            .expect("notified wait1 must be a cond head");
                        preds[slot] = event;
                    }
                    None => preds.push(event),
                }
            }
            EventKind::Broadcast => {
                let cid = unfolding[event].cid().unwrap();
                if unfolding[event].cond_predecessors().is_empty() {
                    self.used_cond_ids.insert(cid);
                }
                let notified = unfolding[event].notified_waits().to_vec();
                let preds = self.cond_heads.entry(cid).or_default();
                preds.retain(|p| !notified.contains(p));
                preds.push(event);
            }
            EventKind::CondDestroy => {
                let cid = unfolding[event].cid().unwrap();
                if unfolding[event].cond_predecessors().is_empty() {
                    self.used_cond_ids.insert(cid);
                } else {
                    self.cond_heads.remove(&cid);
                    self.wait2_heads.remove(&cid);
                }
            }
            EventKind::Local
            | EventKind::ProgramInit
            | EventKind::ThreadCreate
            | EventKind::ThreadExit
            | EventKind::ThreadInit
            | EventKind::ThreadJoin => {}
        }

        trace!(event = %event, kind = %kind, size = self.size, "committed");
        Some(event)
    }

    fn head_for_step(&self, tid: &ThreadId) -> EventId {
        let unfolding = self.unfolding.borrow();
        let head = self
            .last_of_tid(tid)
            .expect("thread must exist in configuration");
        let kind = unfolding[head].kind();
        assert!(kind != EventKind::ThreadExit, "thread must not be exited");
        assert!(kind != EventKind::Wait1, "thread must not be blocked");
        head
    }

    /// `tid` spawns `new_tid`. The new thread does not run before its
    /// [`Configuration::init_thread`] is committed.
    pub fn create_thread(&self, tid: &ThreadId, new_tid: ThreadId) -> Extension {
        let head = self.head_for_step(tid);
        assert!(
            !self.thread_heads.contains_key(&new_tid),
            "thread with same id already exists"
        );
        self.ex(EventBuilder::thread_create(tid.clone(), head, new_tid))
    }

    /// First event of `tid`, which must have been created by `created_from`'s
    /// most recent event.
    pub fn init_thread(&self, tid: ThreadId, created_from: &ThreadId) -> Extension {
        let unfolding = self.unfolding.borrow();
        let creation = self
            .last_of_tid(created_from)
            .expect("creating thread must exist");
        assert!(
            unfolding[creation].kind() == EventKind::ThreadCreate,
            "creation must happen immediately before"
        );
        assert!(
            unfolding[creation].created_thread() == Some(&tid),
            "creation must spawn this thread"
        );
        assert!(
            !self.thread_heads.contains_key(&tid),
            "thread must not be initialized twice"
        );
        drop(unfolding);
        self.ex(EventBuilder::thread_init(tid, creation))
    }

    pub fn exit_thread(&self, tid: &ThreadId) -> Extension {
        let head = self.head_for_step(tid);
        assert!(self.active_threads() > 0);
        self.ex(EventBuilder::thread_exit(tid.clone(), head))
    }

    /// `tid` joins `joined`, whose head must be a `thread_exit`.
    pub fn join_thread(&self, tid: &ThreadId, joined: &ThreadId) -> Extension {
        let head = self.head_for_step(tid);
        let unfolding = self.unfolding.borrow();
        let joined_head = self.last_of_tid(joined).expect("joined thread must exist");
        assert!(
            unfolding[joined_head].kind() == EventKind::ThreadExit,
            "joined thread must be exited"
        );
        drop(unfolding);
        self.ex(EventBuilder::thread_join(tid.clone(), head, joined_head))
    }

    pub fn create_lock(&self, tid: &ThreadId, lid: LockId) -> Extension {
        let head = self.head_for_step(tid);
        assert!(lid.0 != 0, "lock id must not be zero");
        assert!(!self.lock_heads.contains_key(&lid), "lock id already taken");
        assert!(
            !self.used_lock_ids.contains(&lid),
            "lock id cannot be reused"
        );
        self.ex(EventBuilder::lock_create(tid.clone(), lid, head))
    }

    pub fn destroy_lock(&self, tid: &ThreadId, lid: LockId) -> Extension {
        let head = self.head_for_step(tid);
        let lock_head = self.last_of_lid(lid);
        if lock_head.is_none() {
            assert!(
                self.unfolding.borrow().optional_creation_events(),
                "lock must (still) exist"
            );
            assert!(lid.0 != 0, "lock id must not be zero");
        }
        self.ex(EventBuilder::lock_destroy(tid.clone(), lid, head, lock_head))
    }

    pub fn acquire_lock(&self, tid: &ThreadId, lid: LockId) -> Extension {
        let head = self.head_for_step(tid);
        assert!(self.can_acquire_lock(lid));
        let lock_head = self.last_of_lid(lid);
        if lock_head.is_none() {
            assert!(
                self.unfolding.borrow().optional_creation_events(),
                "lock must (still) exist"
            );
            assert!(lid.0 != 0, "lock id must not be zero");
        }
        self.ex(EventBuilder::lock_acquire(tid.clone(), lid, head, lock_head))
    }

    pub fn release_lock(&self, tid: &ThreadId, lid: LockId) -> Extension {
        let head = self.head_for_step(tid);
        let lock_head = self.last_of_lid(lid).expect("lock must (still) exist");
        self.ex(EventBuilder::lock_release(tid.clone(), lid, head, lock_head))
    }

    pub fn create_cond(&self, tid: &ThreadId, cid: CondId) -> Extension {
        let head = self.head_for_step(tid);
        assert!(cid.0 != 0, "condition variable id must not be zero");
        assert!(
            !self.cond_heads.contains_key(&cid),
            "condition variable id already taken"
        );
        assert!(
            !self.used_cond_ids.contains(&cid),
            "condition variable id cannot be reused"
        );
        self.ex(EventBuilder::cond_create(tid.clone(), cid, head))
    }

    pub fn destroy_cond(&self, tid: &ThreadId, cid: CondId) -> Extension {
        let head = self.head_for_step(tid);
        match self.cond_heads.get(&cid) {
            None => {
                assert!(
                    self.unfolding.borrow().optional_creation_events(),
                    "condition variable must (still) exist"
                );
                assert!(cid.0 != 0, "condition variable id must not be zero");
                self.ex(EventBuilder::cond_destroy(
                    tid.clone(),
                    cid,
                    head,
                    Vec::new(),
                ))
            }
            Some(cond_preds) => {
                assert!(!cond_preds.is_empty());
                let mut preds = cond_preds.clone();
                if let Some(wait2s) = self.wait2_heads.get(&cid) {
                    preds.extend(wait2s.iter().copied());
                }
                self.ex(EventBuilder::cond_destroy(tid.clone(), cid, head, preds))
            }
        }
    }

    /// The non-wait1, non-subsumed notification events among `cond_preds`
    /// that are not already in the causal past of `head`.
    fn wait1_cond_predecessors(
        &self,
        unfolding: &Unfolding,
        head: EventId,
        cond_preds: &[EventId],
    ) -> Vec<EventId> {
        let tid = unfolding[head].tid();
        let mut non_waiting = Vec::new();
        for &pred in cond_preds {
            match unfolding[pred].kind() {
                EventKind::Wait1 => continue,
                EventKind::Signal if !unfolding[pred].is_lost() => continue,
                EventKind::Broadcast if unfolding.broadcast_notifies_thread(pred, tid) => continue,
                _ => {}
            }
            if unfolding[pred].tid() == tid {
                continue; // already in [head]
            }
            if unfolding.less_than_eq(pred, head) {
                continue; // already in [head]
            }
            non_waiting.push(pred);
        }
        non_waiting
    }

    /// `tid` atomically releases `lid` and blocks on `cid`.
    pub fn wait1(&self, tid: &ThreadId, cid: CondId, lid: LockId) -> Extension {
        let head = self.head_for_step(tid);
        let unfolding = self.unfolding.borrow();
        let lock_head = self.last_of_lid(lid).expect("lock must (still) exist");

        let builder = match self.cond_heads.get(&cid) {
            None => {
                assert!(
                    unfolding.optional_creation_events(),
                    "condition variable must (still) exist"
                );
                assert!(cid.0 != 0, "condition variable id must not be zero");
                assert!(lid.0 != 0, "lock id must not be zero");
                EventBuilder::wait1(tid.clone(), cid, lid, head, lock_head, Vec::new())
            }
            Some(cond_preds) => {
                let non_waiting = self.wait1_cond_predecessors(&unfolding, head, cond_preds);
                EventBuilder::wait1(tid.clone(), cid, lid, head, lock_head, non_waiting)
            }
        };
        drop(unfolding);
        self.ex(builder)
    }

    /// The notification among `cond_preds` that notified `wait1`, if any.
    fn wait2_notifying_predecessor(
        &self,
        unfolding: &Unfolding,
        wait1: EventId,
        cond_preds: &[EventId],
    ) -> Option<EventId> {
        cond_preds.iter().copied().find(|&pred| {
            unfolding[pred].notified_wait() == Some(wait1)
                || unfolding[pred].notified_waits().contains(&wait1)
        })
    }

    /// `tid` re-acquires `lid` after being notified on `cid`.
    pub fn wait2(&self, tid: &ThreadId, cid: CondId, lid: LockId) -> Extension {
        let unfolding = self.unfolding.borrow();
        let head = self.last_of_tid(tid).expect("thread must exist");
        assert!(
            unfolding[head].kind() == EventKind::Wait1,
            "thread must be waiting"
        );
        let cond_preds = self
            .cond_heads
            .get(&cid)
            .expect("condition variable must (still) exist");
        let lock_head = self.last_of_lid(lid).expect("lock must (still) exist");

        let notifying = self
            .wait2_notifying_predecessor(&unfolding, head, cond_preds)
            .expect("there has to be a notifying event before a wait2");
        drop(unfolding);
        self.ex(EventBuilder::wait2(
            tid.clone(),
            cid,
            lid,
            head,
            lock_head,
            notifying,
        ))
    }

    /// Non-lost notifications among `cond_preds` outside the causal past of
    /// `head`; these become the predecessors of a lost notification.
    fn lost_notification_predecessors(
        &self,
        unfolding: &Unfolding,
        head: EventId,
        cond_preds: &[EventId],
    ) -> Vec<EventId> {
        let tid = unfolding[head].tid();
        let mut prev = Vec::new();
        for &pred in cond_preds {
            match unfolding[pred].kind() {
                EventKind::Wait1 => {
                    panic!("notification would not have been lost");
                }
                EventKind::Broadcast => {
                    if unfolding[pred].is_lost() {
                        continue;
                    }
                    if unfolding.broadcast_notifies_thread(pred, tid) {
                        continue; // already in [head]
                    }
                }
                EventKind::Signal => {
                    if unfolding[pred].is_lost() {
                        continue;
                    }
                    let wait = unfolding[pred].notified_wait().unwrap();
                    if unfolding[wait].tid() == tid {
                        continue; // already in [head]
                    }
                }
                _ => {}
            }
            if unfolding[pred].tid() == tid {
                continue; // already in [head]
            }
            if unfolding.less_than_eq(pred, head) {
                continue; // already in [head]
            }
            prev.push(pred);
        }
        prev
    }

    /// `tid` signals `cid`. Passing `None` records a lost signal.
    pub fn signal_thread(
        &self,
        tid: &ThreadId,
        cid: CondId,
        notified_tid: Option<&ThreadId>,
    ) -> Extension {
        let head = self.head_for_step(tid);
        let unfolding = self.unfolding.borrow();

        let builder = match (self.cond_heads.get(&cid), notified_tid) {
            (None, None) => {
                // only possible as a lost signal: any wait1 would be a head
                assert!(
                    unfolding.optional_creation_events(),
                    "condition variable must (still) exist"
                );
                assert!(cid.0 != 0, "condition variable id must not be zero");
                EventBuilder::signal_lost(tid.clone(), cid, head, Vec::new())
            }
            (Some(cond_preds), None) => {
                let prev = self.lost_notification_predecessors(&unfolding, head, cond_preds);
                EventBuilder::signal_lost(tid.clone(), cid, head, prev)
            }
            (cond_preds, Some(notified)) => {
                assert!(notified != tid, "thread cannot notify itself");
                let cond_preds = cond_preds.expect("condition variable must (still) exist");
                let notified_head = self
                    .last_of_tid(notified)
                    .expect("notified thread must exist");
                assert!(
                    unfolding[notified_head].kind() == EventKind::Wait1,
                    "notified thread must be waiting"
                );
                let wait = cond_preds
                    .iter()
                    .copied()
                    .find(|&p| {
                        unfolding[p].tid() == notified && unfolding[p].kind() == EventKind::Wait1
                    })
                    .expect("wait1 event must be a cond head");
                assert!(wait == notified_head);
                EventBuilder::signal_notifying(tid.clone(), cid, head, wait)
            }
        };
        drop(unfolding);
        self.ex(builder)
    }

    /// `tid` broadcasts on `cid`, notifying `notified_tids` (all currently
    /// in `wait1`). An empty list records a lost broadcast.
    pub fn broadcast_threads(
        &self,
        tid: &ThreadId,
        cid: CondId,
        notified_tids: &[ThreadId],
    ) -> Extension {
        let head = self.head_for_step(tid);
        let unfolding = self.unfolding.borrow();

        let builder = match (self.cond_heads.get(&cid), notified_tids.is_empty()) {
            (None, true) => {
                assert!(
                    unfolding.optional_creation_events(),
                    "condition variable must (still) exist"
                );
                assert!(cid.0 != 0, "condition variable id must not be zero");
                EventBuilder::broadcast(tid.clone(), cid, head, Vec::new())
            }
            (Some(cond_preds), true) => {
                let prev = self.lost_notification_predecessors(&unfolding, head, cond_preds);
                EventBuilder::broadcast(tid.clone(), cid, head, prev)
            }
            (cond_preds, false) => {
                let cond_preds = cond_preds.expect("condition variable must (still) exist");
                let mut preds = Vec::new();
                for notified in notified_tids {
                    assert!(notified != tid, "thread cannot notify itself");
                    let notified_head = self
                        .last_of_tid(notified)
                        .expect("notified thread must exist");
                    assert!(
                        unfolding[notified_head].kind() == EventKind::Wait1,
                        "notified thread must be waiting"
                    );
                    let wait = cond_preds
                        .iter()
                        .copied()
                        .find(|&p| {
                            unfolding[p].tid() == notified
                                && unfolding[p].kind() == EventKind::Wait1
                        })
                        .expect("wait1 event must be a cond head");
                    assert!(wait == notified_head);
                    preds.push(wait);
                }

                for &pred in cond_preds {
                    match unfolding[pred].kind() {
                        // relevant wait1s are already collected above
                        EventKind::Wait1 => continue,
                        // covered by the wait1s' causes, if it exists
                        EventKind::CondCreate => continue,
                        EventKind::Broadcast => continue,
                        EventKind::Signal => {
                            if unfolding[pred].is_lost() {
                                continue;
                            }
                            let wait = unfolding[pred].notified_wait().unwrap();
                            let notified_thread = unfolding[wait].tid();
                            if notified_thread == tid {
                                continue; // already in [head]
                            }
                            if notified_tids.contains(notified_thread) {
                                continue;
                            }
                        }
                        _ => {}
                    }
                    if unfolding[pred].tid() == tid {
                        continue; // already in [head]
                    }
                    if unfolding.less_than_eq(pred, head) {
                        continue; // already in [head]
                    }
                    preds.push(pred);
                }
                EventBuilder::broadcast(tid.clone(), cid, head, preds)
            }
        };
        drop(unfolding);
        self.ex(builder)
    }

    /// Records the branch decisions `tid` took since its last observable
    /// event.
    pub fn local(&self, tid: &ThreadId, path: Vec<bool>) -> Extension {
        let unfolding = self.unfolding.borrow();
        let head = self.last_of_tid(tid).expect("thread must exist");
        assert!(
            unfolding[head].kind() != EventKind::ThreadExit,
            "thread must not yet be exited"
        );
        drop(unfolding);
        self.ex(EventBuilder::local(tid.clone(), head, path))
    }

    /// Every event of this configuration: per-thread chains newest-first,
    /// threads in descending order, `program_init` last.
    pub fn events(&self) -> Vec<EventId> {
        let unfolding = self.unfolding.borrow();
        self.events_inner(&unfolding)
    }

    pub(crate) fn events_inner(&self, unfolding: &Unfolding) -> Vec<EventId> {
        let mut events = Vec::with_capacity(self.size);
        for &head in self.thread_heads.values().rev() {
            let mut cursor = Some(head);
            while let Some(event) = cursor {
                events.push(event);
                cursor = unfolding[event].thread_predecessor();
            }
        }
        events.push(unfolding.root());
        events
    }

    /// Writes the configuration as a Graphviz digraph: one cluster per
    /// thread, causal edges between events.
    pub fn to_dot(&self, out: &mut dyn Write) -> io::Result<()> {
        let unfolding = self.unfolding.borrow();

        writeln!(out, "digraph configuration {{")?;
        writeln!(out, "  rankdir=BT;")?;
        writeln!(out, "  node [shape=box];")?;
        writeln!(out, "  {} [label=\"program_init\"];", unfolding.root())?;

        for (tid, &head) in &self.thread_heads {
            writeln!(out, "  subgraph \"cluster_{}\" {{", tid)?;
            writeln!(out, "    label=\"thread {}\";", tid)?;
            let mut cursor = Some(head);
            while let Some(event) = cursor {
                let ev = &unfolding[event];
                let mut label = format!("{}", ev.kind());
                if let Some(lid) = ev.lid() {
                    label.push_str(&format!(" {}", lid));
                }
                if let Some(cid) = ev.cid() {
                    label.push_str(&format!(" {}", cid));
                }
                if ev.is_cutoff() {
                    label.push_str(" (cutoff)");
                }
                writeln!(out, "    {} [label=\"{}\"];", event, label)?;
                cursor = ev.thread_predecessor();
            }
            writeln!(out, "  }}")?;
        }

        for &event in &self.events_inner(&unfolding) {
            for pred in unfolding[event].immediate_predecessors() {
                writeln!(out, "  {} -> {};", event, pred)?;
            }
        }

        writeln!(out, "}}")
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Configuration")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("thread_heads", &self.thread_heads)
            .field("lock_heads", &self.lock_heads)
            .finish()
    }
}
