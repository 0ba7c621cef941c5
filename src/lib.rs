#![deny(missing_debug_implementations, rust_2018_idioms)]

//! Unfurl enumerates the causally distinct executions of a multi-threaded
//! program.
//!
//! At a high level, it maintains a [Nielsen–Plotkin–Winskel-style
//! unfolding][unfolding] of a program's concurrency behavior: a DAG of
//! *events* (thread, lock, and condition-variable operations) connected by
//! causal and conflict relations. A driving interpreter executes one branch
//! at a time and reports each observable operation; unfurl answers with the
//! set of *conflicting extensions*: alternative events that seed executions
//! no schedule explored so far is equivalent to. Exploring exactly those
//! alternatives visits every behavior of the program once, up to equivalence
//! under the happens-before relation. This is a partial-order reduction: the
//! exponential space of interleavings collapses to the usually much smaller
//! space of causally distinct executions.
//!
//! # Model
//!
//! Executions are built from 16 event kinds covering thread lifecycle
//! (`thread_create`, `thread_init`, `thread_exit`, `thread_join`), locks
//! (`lock_create`, `lock_acquire`, `lock_release`, `lock_destroy`),
//! condition variables (`cond_create`, `wait1`, `wait2`, `signal`,
//! `broadcast`, `cond_destroy`), local branching history (`local`), and the
//! unique root (`program_init`). A condition wait is split in two: `wait1`
//! releases the lock and blocks, `wait2` re-acquires it after a
//! notification.
//!
//! The central types:
//!
//! - [`Unfolding`] owns every event ever created and deduplicates
//!   structurally equal ones, so that branches exploring the same history
//!   observe identical event ids.
//! - [`Configuration`] is one execution: a conflict-free, downward-closed
//!   set of events, represented by per-thread and per-resource head
//!   cursors. Operations build [`Extension`] tokens that are applied with
//!   [`Configuration::commit`].
//! - [`Configuration::conflicting_extensions`] enumerates the alternatives
//!   justified by the current execution.
//! - [`RaceDetector`] records memory accesses per event and decides, using
//!   the causal relation and a caller-supplied [`Solver`], whether a new
//!   access races with a concurrent one.
//! - [`csd`] bounds exploration by the minimum number of context switches a
//!   candidate execution requires.
//!
//! # Example
//!
//! Two threads contending for one lock:
//!
//! ```
//! use std::sync::atomic::AtomicBool;
//! use unfurl::{Configuration, LockId, ThreadId};
//!
//! let mut config = Configuration::default();
//! let main = ThreadId::root();
//! let worker = main.child(1);
//! let lock = LockId(1);
//!
//! let ex = config.create_lock(&main, lock);
//! config.commit(ex).unwrap();
//! let ex = config.create_thread(&main, worker.clone());
//! config.commit(ex).unwrap();
//! let ex = config.init_thread(worker.clone(), &main);
//! config.commit(ex).unwrap();
//!
//! // main takes the lock first ...
//! let ex = config.acquire_lock(&main, lock);
//! config.commit(ex).unwrap();
//! let ex = config.release_lock(&main, lock);
//! config.commit(ex).unwrap();
//! let ex = config.acquire_lock(&worker, lock);
//! config.commit(ex).unwrap();
//!
//! // ... so the only alternative is the worker taking it first
//! let cancel = AtomicBool::new(false);
//! let alternatives = config.conflicting_extensions(true, &cancel);
//! assert_eq!(alternatives.len(), 1);
//! ```
//!
//! # Execution model
//!
//! The engine is single-threaded and cooperative: the interpreter drives one
//! branch at a time, and nothing here blocks or locks internally. Long
//! enumerations poll a cancellation flag between events. Solver queries
//! carry a caller-side budget; on timeout the race detector reports an
//! absent verdict and the interpreter proceeds as if the access were safe.
//!
//! [unfolding]: https://doi.org/10.1016/0304-3975(81)90112-2

pub mod cex;
pub mod comb;
pub mod cone;
pub mod configuration;
pub mod csd;
pub mod event;
pub mod model;
pub mod order;
pub mod race;
pub mod schedule;
pub mod sym;
pub mod thread_id;
pub mod unfolding;

pub use crate::comb::{Comb, Tooth, MAX_COMB_THREADS};
pub use crate::cone::Cone;
pub use crate::configuration::{Configuration, ConfigurationRoot, Extension};
pub use crate::event::{CondId, Event, EventId, EventKind, Fingerprint, LockId};
pub use crate::model::{Builder, Exploration};
pub use crate::race::{
    AccessKind, MemoryAccess, MemoryOperation, ObjectId, RaceDetector, RaceResult,
};
pub use crate::schedule::SchedulingPolicy;
pub use crate::sym::{Offset, Predicate, Solver, Timeout};
pub use crate::thread_id::ThreadId;
pub use crate::unfolding::{Deduplicated, Unfolding};
