//! Configure and drive an exploration.

use std::fmt;
use std::sync::atomic::AtomicBool;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::configuration::{Configuration, ConfigurationRoot, Extension};
use crate::csd;
use crate::event::EventId;
use crate::race::RaceDetector;
use crate::schedule::{self, SchedulingPolicy};
use crate::thread_id::ThreadId;

/// Configure an exploration.
#[derive(Debug, Clone)]
#[non_exhaustive] // Support adding more fields in the future
pub struct Builder {
    /// Abandon conflicting extensions whose minimal interleaving needs more
    /// than this many thread segments; `0` disables the bound.
    ///
    /// Defaults to the `UNFURL_MAX_CSD` environment variable.
    pub max_context_switch_degree: usize,

    /// Track memory accesses and answer race queries.
    ///
    /// Defaults to existence of the `UNFURL_RACE_DETECTION` environment
    /// variable.
    pub enable_race_detection: bool,

    /// Enumerate conflicting extensions to seed alternative schedules.
    ///
    /// Defaults to existence of the `UNFURL_EXPLORE_SCHEDULES` environment
    /// variable.
    pub explore_schedules: bool,

    /// Emit an event-stream log line for every committed event.
    ///
    /// Defaults to existence of the `UNFURL_LOG_EVENTS` environment
    /// variable.
    pub log_por_events: bool,

    /// Policy for choosing the next runnable thread.
    ///
    /// Defaults to the `UNFURL_SCHEDULING` environment variable.
    pub thread_scheduling: SchedulingPolicy,

    /// Allow lock and condition-variable operations without a prior
    /// creation event.
    pub optional_creation_events: bool,

    /// Seed for the `random` scheduling policy; explorations with the same
    /// seed are deterministic.
    pub rng_seed: u64,
}

impl Builder {
    /// Create a new `Builder` instance with default values.
    pub fn new() -> Builder {
        use std::env;

        let max_context_switch_degree = env::var("UNFURL_MAX_CSD")
            .map(|v| v.parse().expect("invalid value for `UNFURL_MAX_CSD`"))
            .unwrap_or(0);

        let enable_race_detection = env::var("UNFURL_RACE_DETECTION").is_ok();

        let explore_schedules = env::var("UNFURL_EXPLORE_SCHEDULES").is_ok();

        let log_por_events = env::var("UNFURL_LOG_EVENTS").is_ok();

        let thread_scheduling = env::var("UNFURL_SCHEDULING")
            .map(|v| v.parse().expect("invalid value for `UNFURL_SCHEDULING`"))
            .unwrap_or_default();

        Builder {
            max_context_switch_degree,
            enable_race_detection,
            explore_schedules,
            log_por_events,
            thread_scheduling,
            optional_creation_events: true,
            rng_seed: 0,
        }
    }

    /// Builds an exploration with a single main thread.
    pub fn build(&self) -> Exploration {
        let mut root =
            ConfigurationRoot::with_optional_creation_events(self.optional_creation_events);
        root.add_thread();
        Exploration {
            configuration: root.construct(),
            race_detector: if self.enable_race_detection {
                Some(RaceDetector::new())
            } else {
                None
            },
            rng: StdRng::seed_from_u64(self.rng_seed),
            last_scheduled: None,
            options: self.clone(),
        }
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

/// One explored branch plus the pieces shared across branches: the policy,
/// the race detector, and the context-switch bound.
pub struct Exploration {
    configuration: Configuration,
    race_detector: Option<RaceDetector>,
    rng: StdRng,
    last_scheduled: Option<ThreadId>,
    options: Builder,
}

impl Exploration {
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn configuration_mut(&mut self) -> &mut Configuration {
        &mut self.configuration
    }

    pub fn race_detector_mut(&mut self) -> Option<&mut RaceDetector> {
        self.race_detector.as_mut()
    }

    pub fn options(&self) -> &Builder {
        &self.options
    }

    /// Commits an extension, remembering the acting thread for round-robin
    /// scheduling.
    pub fn commit(&mut self, extension: Extension) -> Option<EventId> {
        let event = self.configuration.commit(extension)?;
        let tid = self.configuration.unfolding_ref()[event].tid().clone();
        if self.options.log_por_events {
            info!(event = %event, tid = %tid, "por event");
        }
        self.last_scheduled = Some(tid);
        Some(event)
    }

    /// The thread to run next under the configured policy, or `None` when
    /// nothing is runnable.
    pub fn next_thread(&mut self) -> Option<ThreadId> {
        schedule::next_thread(
            &self.configuration,
            self.options.thread_scheduling,
            self.last_scheduled.as_ref(),
            &mut self.rng,
        )
    }

    /// `true` when no thread can run but not all threads have exited: the
    /// interpreter terminates the branch with a deadlock report.
    pub fn is_deadlocked(&self) -> bool {
        self.configuration.runnable_threads().is_empty() && self.configuration.active_threads() > 0
    }

    /// Enumerates fresh conflicting extensions to seed branches from,
    /// dropping those the context-switch bound rejects. Rejected events are
    /// withdrawn from the unfolding again; the branch is silently skipped.
    pub fn conflicting_extensions(&mut self, cancel: &AtomicBool) -> Vec<EventId> {
        if !self.options.explore_schedules {
            return Vec::new();
        }

        let extensions = self.configuration.conflicting_extensions(true, cancel);

        let limit = self.options.max_context_switch_degree;
        let mut unfolding = self.configuration.unfolding().borrow_mut();
        let mut kept = Vec::with_capacity(extensions.len());

        for event in extensions {
            if limit != 0 && csd::is_above_limit(&unfolding, event, limit) {
                debug!(event = %event, limit, "extension above context-switch bound");
                if !unfolding[event].has_successors() {
                    unfolding.remove(event);
                }
                continue;
            }
            unfolding.stats_mut().cex_inserted += 1;
            kept.push(event);
        }

        drop(unfolding);
        kept
    }

    /// The replay order for a branch seeded from `event`.
    pub fn catch_up_order(&self, event: EventId) -> Vec<EventId> {
        let unfolding = self.configuration.unfolding_ref();
        schedule::catch_up_order(&unfolding, event)
    }

    /// Forks a branch: a clone of the current configuration sharing the
    /// unfolding, with its own head cursor.
    pub fn fork_branch(&self) -> Configuration {
        self.configuration.clone()
    }
}

impl fmt::Debug for Exploration {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Exploration")
            .field("configuration", &self.configuration)
            .field("options", &self.options)
            .finish()
    }
}
