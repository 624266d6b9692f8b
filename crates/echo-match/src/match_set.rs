// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Match sets: the sink of every attached pattern.
//!
//! A match set accumulates signed counts per parameter binding. Only the
//! presence of a binding is public; the counts are bookkeeping. Events are
//! netted per commit: a binding that vanishes and reappears inside one
//! batch produces no event.
use std::collections::BTreeMap;

use crate::ident::{Tuple, Value, Version};

/// Presence change of one binding, published at commit boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatchEvent {
    /// The binding was absent before the commit and is present after it.
    Appeared(Tuple),
    /// The binding was present before the commit and is absent after it.
    Vanished(Tuple),
}

impl MatchEvent {
    /// The binding this event is about.
    #[must_use]
    pub fn binding(&self) -> &[Value] {
        match self {
            Self::Appeared(t) | Self::Vanished(t) => t,
        }
    }

    /// Returns `true` for [`MatchEvent::Appeared`].
    #[must_use]
    pub const fn is_appeared(&self) -> bool {
        matches!(self, Self::Appeared(_))
    }
}

/// Callback receiving the netted events of one commit (or rollback).
///
/// Callbacks run synchronously on the committing thread; they only see event
/// data and cannot reach the instance that produced it.
pub type Subscriber = Box<dyn FnMut(Version, &[MatchEvent]) + Send>;

/// Current bindings of one pattern in one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchSet {
    counts: BTreeMap<Tuple, i64>,
    /// Presence before the current batch, for bindings touched by it.
    touched: BTreeMap<Tuple, bool>,
}

impl MatchSet {
    /// Number of distinct present bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Returns `true` when no binding is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Returns `true` if `binding` is present.
    #[must_use]
    pub fn contains(&self, binding: &[Value]) -> bool {
        self.counts.contains_key(binding)
    }

    /// Net number of derivations of `binding` (0 when absent).
    #[must_use]
    pub fn multiplicity(&self, binding: &[Value]) -> u64 {
        self.counts
            .get(binding)
            .map_or(0, |c| u64::try_from(*c).unwrap_or(0))
    }

    /// Present bindings in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.counts.keys()
    }

    /// Applies a signed derivation count to `binding`.
    pub(crate) fn apply(&mut self, binding: Tuple, diff: i64) {
        let before = self.counts.get(&binding).copied().unwrap_or(0);
        self.touched.entry(binding.clone()).or_insert(before > 0);
        let after = before + diff;
        debug_assert!(after >= 0, "match multiplicity underflow");
        if after == 0 {
            self.counts.remove(&binding);
        } else {
            self.counts.insert(binding, after);
        }
    }

    /// Nets the bindings touched since the last call into events.
    ///
    /// Vanish events precede appear events; within each kind, bindings are
    /// in ascending order.
    pub(crate) fn take_events(&mut self) -> Vec<MatchEvent> {
        let touched = std::mem::take(&mut self.touched);
        let mut vanished = Vec::new();
        let mut appeared = Vec::new();
        for (binding, was) in touched {
            let now = self.counts.contains_key(&binding);
            match (was, now) {
                (true, false) => vanished.push(MatchEvent::Vanished(binding)),
                (false, true) => appeared.push(MatchEvent::Appeared(binding)),
                _ => {}
            }
        }
        vanished.extend(appeared);
        vanished
    }
}

impl<'a> IntoIterator for &'a MatchSet {
    type Item = &'a Tuple;
    type IntoIter = std::collections::btree_map::Keys<'a, Tuple, i64>;

    fn into_iter(self) -> Self::IntoIter {
        self.counts.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::NodeId;

    fn b(i: u64) -> Tuple {
        vec![Value::Node(NodeId(i))]
    }

    #[test]
    fn only_presence_transitions_produce_events() {
        let mut m = MatchSet::default();
        m.apply(b(1), 1);
        m.apply(b(1), 1);
        assert_eq!(m.take_events(), vec![MatchEvent::Appeared(b(1))]);
        m.apply(b(1), -1);
        assert!(m.take_events().is_empty());
        assert_eq!(m.multiplicity(&b(1)), 1);
    }

    #[test]
    fn transient_flips_are_netted() {
        let mut m = MatchSet::default();
        m.apply(b(1), 1);
        let _ = m.take_events();
        m.apply(b(1), -1);
        m.apply(b(1), 1);
        m.apply(b(2), 1);
        m.apply(b(3), 1);
        let _ = m.take_events();
        m.apply(b(3), -1);
        m.apply(b(0), 1);
        assert_eq!(
            m.take_events(),
            vec![MatchEvent::Vanished(b(3)), MatchEvent::Appeared(b(0))]
        );
    }
}
