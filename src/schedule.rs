//! Scheduler glue: picking the next runnable thread and ordering catch-up
//! replays.

use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::Rng;
use thiserror::Error;

use crate::configuration::Configuration;
use crate::event::EventId;
use crate::thread_id::ThreadId;
use crate::unfolding::Unfolding;

/// Policy for choosing among the runnable threads of a configuration.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum SchedulingPolicy {
    /// The runnable thread with the smallest id.
    #[default]
    First,
    /// The runnable thread with the largest id.
    Last,
    /// The next runnable thread after the previously scheduled one, in
    /// cyclic id order.
    RoundRobin,
    /// A uniformly random runnable thread, from a seeded generator.
    Random,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown scheduling policy (expected first, last, round-robin, or random)")]
pub struct ParseSchedulingPolicyError;

impl FromStr for SchedulingPolicy {
    type Err = ParseSchedulingPolicyError;

    fn from_str(s: &str) -> Result<SchedulingPolicy, ParseSchedulingPolicyError> {
        match s {
            "first" => Ok(SchedulingPolicy::First),
            "last" => Ok(SchedulingPolicy::Last),
            "round-robin" => Ok(SchedulingPolicy::RoundRobin),
            "random" => Ok(SchedulingPolicy::Random),
            _ => Err(ParseSchedulingPolicyError),
        }
    }
}

impl fmt::Display for SchedulingPolicy {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulingPolicy::First => "first",
            SchedulingPolicy::Last => "last",
            SchedulingPolicy::RoundRobin => "round-robin",
            SchedulingPolicy::Random => "random",
        };
        name.fmt(fmt)
    }
}

/// Picks the thread to run next, or `None` when no thread is runnable
/// (either the branch is finished or, if threads are still active, it is
/// deadlocked; the caller distinguishes the two).
pub fn next_thread(
    configuration: &Configuration,
    policy: SchedulingPolicy,
    last: Option<&ThreadId>,
    rng: &mut StdRng,
) -> Option<ThreadId> {
    let runnable = configuration.runnable_threads();
    if runnable.is_empty() {
        return None;
    }

    let choice = match policy {
        SchedulingPolicy::First => runnable.first().unwrap().clone(),
        SchedulingPolicy::Last => runnable.last().unwrap().clone(),
        SchedulingPolicy::RoundRobin => match last {
            None => runnable.first().unwrap().clone(),
            Some(last) => runnable
                .iter()
                .find(|tid| *tid > last)
                .unwrap_or_else(|| runnable.first().unwrap())
                .clone(),
        },
        SchedulingPolicy::Random => runnable[rng.gen_range(0..runnable.len())].clone(),
    };
    Some(choice)
}

/// The events a fresh branch must replay to catch up to `event`: the local
/// configuration of `event` without `program_init`, in a deterministic
/// causality-respecting order (depth, then thread id).
pub fn catch_up_order(unfolding: &Unfolding, event: EventId) -> Vec<EventId> {
    let mut events: Vec<EventId> = unfolding.local_configuration(event, false).collect();
    events.sort_by(|&a, &b| {
        unfolding[a]
            .depth()
            .cmp(&unfolding[b].depth())
            .then_with(|| unfolding[a].tid().cmp(unfolding[b].tid()))
    });
    events
}
