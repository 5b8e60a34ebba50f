//! Resettable countdown barrier over a set of principals
//!
//! A [`Countdown`] tracks a set of outstanding principals and is *satisfied*
//! once the set is empty. The owner repopulates the set from current graph
//! structure with [`Countdown::reset_from`] whenever topology changes, so a
//! stale arrival can never corrupt the join: the barrier is rebuilt from the
//! live member set rather than decremented permanently.
//!
//! Logical nodes keep two of these:
//!
//! - a *dependency* countdown over predecessor logical nodes, gating promotion
//!   out of `Pending`
//! - a *client* countdown over member flow nodes, gating promotion from one
//!   phase to the next
//!
//! A countdown never partially unblocks; one outstanding principal blocks the
//! whole join.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// A decrement-to-zero synchronization set over a collection of principals
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Countdown<T: Eq + Hash> {
    outstanding: HashSet<T>,
}

impl<T: Eq + Hash> Countdown<T> {
    /// Create an empty (vacuously satisfied) countdown
    pub fn new() -> Self {
        Self {
            outstanding: HashSet::new(),
        }
    }

    /// Re-arm the countdown from a structural rule
    ///
    /// Clears the outstanding set and repopulates it from the iterator. The
    /// caller supplies the rule ("all predecessors", "all members") against
    /// the graph as it exists right now.
    pub fn reset_from<I>(&mut self, principals: I)
    where
        I: IntoIterator<Item = T>,
    {
        self.outstanding.clear();
        self.outstanding.extend(principals);
    }

    /// Record one principal's completion
    ///
    /// Removes the principal and returns whether the set is now empty. An
    /// arrival for a principal that is not outstanding is a no-op (the return
    /// value still reflects current satisfaction).
    pub fn arrive(&mut self, principal: &T) -> bool {
        self.outstanding.remove(principal);
        self.outstanding.is_empty()
    }

    /// Explicitly remove a principal that will never report (e.g. timed out)
    ///
    /// Identical to [`arrive`](Self::arrive) in effect; kept separate so call
    /// sites read as what they mean.
    pub fn forget(&mut self, principal: &T) -> bool {
        self.arrive(principal)
    }

    /// Whether the countdown is satisfied (idempotent, side-effect free)
    pub fn is_satisfied(&self) -> bool {
        self.outstanding.is_empty()
    }

    /// Whether the given principal is still outstanding
    pub fn is_outstanding(&self, principal: &T) -> bool {
        self.outstanding.contains(principal)
    }

    /// Number of outstanding principals
    pub fn remaining(&self) -> usize {
        self.outstanding.len()
    }
}

impl<T: Eq + Hash + fmt::Debug> fmt::Display for Countdown<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Countdown({} outstanding)", self.outstanding.len())
    }
}
