use std::fmt;
use std::str::FromStr;

use smallvec::SmallVec;
use thiserror::Error;

/// A hierarchical thread identifier.
///
/// A thread id is a path in the thread creation tree: the n-th thread spawned
/// by a thread with id `p` gets the id `p` extended by `n`. The main thread
/// has the id `1`. Local ids are never zero.
///
/// Thread ids are totally ordered lexicographically, so a parent always
/// precedes all of its descendants.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId {
    // up to 4 levels of nesting stay inline
    ids: SmallVec<[u16; 4]>,
}

impl ThreadId {
    /// Returns the id of the main thread, `1`.
    pub fn root() -> ThreadId {
        ThreadId::new(1)
    }

    /// Creates a top-level thread id from a single local id.
    pub fn new(local_id: u16) -> ThreadId {
        assert!(local_id != 0, "local ids must be non-zero");

        let mut ids = SmallVec::new();
        ids.push(local_id);
        ThreadId { ids }
    }

    /// Returns the id of the `local_id`-th child of this thread.
    pub fn child(&self, local_id: u16) -> ThreadId {
        assert!(local_id != 0, "local ids must be non-zero");

        let mut ids = self.ids.clone();
        ids.push(local_id);
        ThreadId { ids }
    }

    /// Returns the id of the creating thread, or `None` for a top-level
    /// thread.
    pub fn parent(&self) -> Option<ThreadId> {
        if self.ids.len() < 2 {
            return None;
        }

        let mut ids = self.ids.clone();
        ids.pop();
        Some(ThreadId { ids })
    }

    /// The sequence of local ids making up this thread id.
    pub fn local_ids(&self) -> &[u16] {
        &self.ids
    }

    /// Number of levels in the creation hierarchy. Never zero.
    pub fn depth(&self) -> usize {
        self.ids.len()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for id in &self.ids {
            if !first {
                write!(fmt, ",")?;
            }
            write!(fmt, "{}", id)?;
            first = false;
        }
        Ok(())
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "ThreadId({})", self)
    }
}

/// Error returned when parsing a [`ThreadId`] from a string fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThreadIdParseError {
    #[error("thread id must not be empty")]
    Empty,
    #[error("local ids must be non-zero")]
    ZeroLocalId,
    #[error("expected a comma-separated list of 16-bit local ids")]
    Syntax,
}

impl FromStr for ThreadId {
    type Err = ThreadIdParseError;

    /// Parses the format produced by `Display`: local ids separated by
    /// commas, no whitespace, e.g. `"1,2,1"`.
    fn from_str(s: &str) -> Result<ThreadId, ThreadIdParseError> {
        if s.is_empty() {
            return Err(ThreadIdParseError::Empty);
        }

        let mut ids = SmallVec::new();
        for part in s.split(',') {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ThreadIdParseError::Syntax);
            }
            let local: u16 = part.parse().map_err(|_| ThreadIdParseError::Syntax)?;
            if local == 0 {
                return Err(ThreadIdParseError::ZeroLocalId);
            }
            ids.push(local);
        }

        Ok(ThreadId { ids })
    }
}
