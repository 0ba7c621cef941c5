//! The solver-facing slice of the symbolic layer: offsets as the interpreter
//! reports them, the predicates the race detector builds over them, and the
//! query interface a solver gateway implements.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// A memory offset as reported by the interpreter: either a concrete byte
/// offset or an opaque symbolic term. Symbolic terms compare syntactically.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Offset {
    Concrete(u64),
    Symbolic(Arc<str>),
}

impl Offset {
    pub fn concrete(value: u64) -> Offset {
        Offset::Concrete(value)
    }

    pub fn symbolic(term: impl Into<Arc<str>>) -> Offset {
        Offset::Symbolic(term.into())
    }

    pub fn as_concrete(&self) -> Option<u64> {
        match self {
            Offset::Concrete(value) => Some(*value),
            Offset::Symbolic(_) => None,
        }
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Offset::Concrete(value) => write!(fmt, "{}", value),
            Offset::Symbolic(term) => write!(fmt, "{}", term),
        }
    }
}

/// A predicate over offsets, used both for solver queries and for the
/// derived constraints the race detector reports back.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Predicate {
    Eq(Offset, Offset),
    Ne(Offset, Offset),
}

impl Predicate {
    pub fn negated(&self) -> Predicate {
        match self {
            Predicate::Eq(a, b) => Predicate::Ne(a.clone(), b.clone()),
            Predicate::Ne(a, b) => Predicate::Eq(a.clone(), b.clone()),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Eq(a, b) => write!(fmt, "{} = {}", a, b),
            Predicate::Ne(a, b) => write!(fmt, "{} != {}", a, b),
        }
    }
}

/// A solver query ran out of its caller-supplied budget. The race detector
/// reports this as an absent verdict; the interpreter assumes safety and
/// warns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("solver query exceeded its budget")]
pub struct Timeout;

/// The gateway to the underlying SMT solver. Queries are evaluated under the
/// current path constraints, which the implementation carries.
pub trait Solver {
    /// Does the predicate hold in every model of the path constraints?
    fn must_be_true(&mut self, predicate: &Predicate) -> Result<bool, Timeout>;

    /// Does the predicate fail in every model of the path constraints?
    fn must_be_false(&mut self, predicate: &Predicate) -> Result<bool, Timeout>;

    /// Does some model of the path constraints satisfy the predicate?
    fn may_be_true(&mut self, predicate: &Predicate) -> Result<bool, Timeout> {
        Ok(!self.must_be_false(predicate)?)
    }

    /// A concrete value for the offset, if the solver can produce one.
    fn get_value(&mut self, offset: &Offset) -> Result<Option<u64>, Timeout> {
        Ok(offset.as_concrete())
    }

    /// Inclusive bounds on the offset, if the solver can produce them.
    fn get_range(&mut self, offset: &Offset) -> Result<Option<(u64, u64)>, Timeout> {
        Ok(offset.as_concrete().map(|v| (v, v)))
    }
}
