//! Data-race detection over the unfolding's causal relation.
//!
//! The interpreter reports every memory access; the detector files it under
//! the acting thread's current head event. A race query for a new access
//! then only has to look at the records of events that are concurrent with
//! that head: causally ordered accesses can never race. Offsets are compared
//! syntactically first and handed to the solver only when neither equality
//! nor disequality is apparent.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, trace};

use crate::configuration::Configuration;
use crate::event::EventId;
use crate::sym::{Predicate, Solver};
use crate::thread_id::ThreadId;

/// Identifies a memory object of the interpreter's object model.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ObjectId(pub u64);

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AccessKind {
    Read,
    Write,
    Alloc,
    Free,
}

impl AccessKind {
    fn is_lifetime(self) -> bool {
        matches!(self, AccessKind::Alloc | AccessKind::Free)
    }
}

/// One recorded access to a memory object.
#[derive(Clone, Debug)]
pub struct MemoryAccess {
    pub kind: AccessKind,
    /// The accessed offset; `None` for alloc/free, which cover the whole
    /// object.
    pub offset: Option<crate::sym::Offset>,
    pub tid: ThreadId,
    /// Whether the access was already proven safe by a prior check.
    pub safe: bool,
    /// Identifies the accessing instruction for diagnostics.
    pub instruction: u64,
}

/// A new access the interpreter is about to perform.
#[derive(Clone, Debug)]
pub struct MemoryOperation {
    pub object: ObjectId,
    pub kind: AccessKind,
    pub offset: crate::sym::Offset,
    pub tid: ThreadId,
    pub instruction: u64,
}

/// Verdict of a race query.
#[derive(Clone, Debug)]
pub struct RaceResult {
    pub is_race: bool,
    /// Whether a constraint can still rule the race out.
    pub can_be_safe: bool,
    /// The constraint under which the access is safe, when `can_be_safe`.
    pub condition_to_be_safe: Option<Predicate>,
    pub racing_thread: Option<ThreadId>,
    pub racing_instruction: Option<u64>,
    /// Disequalities proven while checking; the interpreter may add them to
    /// the path constraints.
    pub new_constraints: Vec<Predicate>,
}

impl RaceResult {
    fn safe(new_constraints: Vec<Predicate>) -> RaceResult {
        RaceResult {
            is_race: false,
            can_be_safe: true,
            condition_to_be_safe: None,
            racing_thread: None,
            racing_instruction: None,
            new_constraints,
        }
    }

    fn race(access: &MemoryAccess) -> RaceResult {
        RaceResult {
            is_race: true,
            can_be_safe: false,
            condition_to_be_safe: None,
            racing_thread: Some(access.tid.clone()),
            racing_instruction: Some(access.instruction),
            new_constraints: Vec::new(),
        }
    }

    fn conditional_race(access: &MemoryAccess, condition: Predicate) -> RaceResult {
        RaceResult {
            is_race: true,
            can_be_safe: true,
            condition_to_be_safe: Some(condition),
            racing_thread: Some(access.tid.clone()),
            racing_instruction: Some(access.instruction),
            new_constraints: Vec::new(),
        }
    }
}

/// Counters kept by the detector, for diagnostics.
#[derive(Clone, Debug, Default)]
pub struct RaceStats {
    pub tracked_accesses: usize,
    pub race_checks: usize,
    pub fast_path_checks: usize,
    pub solver_checks: usize,
}

/// The accesses recorded while an event was its thread's head.
#[derive(Clone, Debug, Default)]
struct EpochAccesses {
    objects: HashMap<ObjectId, Vec<MemoryAccess>>,
}

/// Per-event memory-access log with race queries against it.
#[derive(Default)]
pub struct RaceDetector {
    accesses: HashMap<EventId, EpochAccesses>,
    stats: RaceStats,
}

impl RaceDetector {
    pub fn new() -> RaceDetector {
        RaceDetector::default()
    }

    pub fn stats(&self) -> &RaceStats {
        &self.stats
    }

    /// Drops the record of an abandoned event. Only legal once no live
    /// configuration can reach the event anymore.
    pub fn forget_event(&mut self, event: EventId) {
        self.accesses.remove(&event);
    }

    /// Files `op` under the current head event of the acting thread,
    /// merging with already recorded accesses where possible: lifetime
    /// accesses absorb everything on the object, a write absorbs a read at
    /// the same offset, and exact duplicates are dropped.
    pub fn track_access(&mut self, configuration: &Configuration, op: &MemoryOperation) {
        let head = configuration
            .last_of_tid(&op.tid)
            .expect("acting thread must exist in configuration");

        self.stats.tracked_accesses += 1;

        let accesses = self
            .accesses
            .entry(head)
            .or_default()
            .objects
            .entry(op.object)
            .or_default();

        let new = MemoryAccess {
            kind: op.kind,
            offset: if op.kind.is_lifetime() {
                None
            } else {
                Some(op.offset.clone())
            },
            tid: op.tid.clone(),
            safe: false,
            instruction: op.instruction,
        };

        for access in accesses.iter_mut() {
            if access.safe != new.safe {
                continue;
            }

            // a lifetime access dominates anything else on the object
            if access.kind.is_lifetime() {
                return;
            }
            if new.kind.is_lifetime() {
                access.kind = new.kind;
                access.offset = None;
                access.instruction = new.instruction;
                return;
            }

            if access.offset != new.offset {
                continue;
            }
            if access.kind == new.kind {
                return;
            }
            if new.kind == AccessKind::Read && access.kind == AccessKind::Write {
                return;
            }
            if new.kind == AccessKind::Write && access.kind == AccessKind::Read {
                access.kind = AccessKind::Write;
                access.instruction = new.instruction;
                return;
            }
        }

        trace!(object = ?op.object, tid = %op.tid, kind = ?op.kind, "tracked access");
        accesses.push(new);
    }

    /// Decides whether `op` races with any recorded access that is
    /// concurrent with the acting thread's current head.
    ///
    /// Returns `None` when a solver query times out; the caller treats the
    /// access as safe and warns. Causally ordered accesses are never
    /// reported: the causal relation is consulted before any offsets are
    /// compared.
    pub fn is_race(
        &mut self,
        configuration: &Configuration,
        solver: &mut dyn Solver,
        op: &MemoryOperation,
    ) -> Option<RaceResult> {
        let unfolding = configuration.unfolding_ref();
        let head = configuration
            .last_of_tid(&op.tid)
            .expect("acting thread must exist in configuration");

        self.stats.race_checks += 1;
        let mut new_constraints = Vec::new();

        for (tid, &other_head) in configuration.thread_heads() {
            if tid == &op.tid {
                continue;
            }

            let mut cursor = Some(other_head);
            while let Some(event) = cursor {
                if unfolding.less_than_eq(event, head) {
                    // everything further down this chain happens before us
                    break;
                }

                if !unfolding.less_than_eq(head, event) {
                    // concurrent with the current head: inspect its record
                    let recorded = self
                        .accesses
                        .get(&event)
                        .and_then(|epoch| epoch.objects.get(&op.object));

                    for access in recorded.into_iter().flatten() {
                        self.stats.fast_path_checks += 1;

                        if access.kind == AccessKind::Read && op.kind == AccessKind::Read {
                            continue;
                        }

                        if access.kind.is_lifetime() || op.kind.is_lifetime() {
                            debug!(object = ?op.object, "lifetime access race");
                            return Some(RaceResult::race(access));
                        }

                        let other_offset = access.offset.as_ref().expect("data access has offset");

                        if *other_offset == op.offset {
                            debug!(object = ?op.object, offset = %op.offset, "same-offset race");
                            return Some(RaceResult::race(access));
                        }

                        if let (Some(_), Some(_)) =
                            (other_offset.as_concrete(), op.offset.as_concrete())
                        {
                            // distinct constants cannot overlap
                            continue;
                        }

                        // offsets are not syntactically comparable: ask the
                        // solver under the current path constraints
                        self.stats.solver_checks += 1;
                        let eq = Predicate::Eq(other_offset.clone(), op.offset.clone());

                        match solver.must_be_false(&eq) {
                            Err(_) => {
                                debug!("solver timeout during race check");
                                return None;
                            }
                            Ok(true) => {
                                new_constraints.push(eq.negated());
                                continue;
                            }
                            Ok(false) => {}
                        }

                        match solver.must_be_true(&eq) {
                            Err(_) => {
                                debug!("solver timeout during race check");
                                return None;
                            }
                            Ok(true) => return Some(RaceResult::race(access)),
                            Ok(false) => {
                                return Some(RaceResult::conditional_race(access, eq.negated()))
                            }
                        }
                    }
                }

                cursor = unfolding[event].thread_predecessor();
            }
        }

        Some(RaceResult::safe(new_constraints))
    }
}

impl fmt::Debug for RaceDetector {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("RaceDetector")
            .field("events", &self.accesses.len())
            .field("stats", &self.stats)
            .finish()
    }
}
