// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Linear commit history of one instance.
//!
//! The history is the chain of committed batches from the oldest retained
//! version (the base) to the current one. Rolling back pops batches off the
//! tip; their versions are never reissued, so a rolled-back version is
//! reported as [`VersionConflict::NotOnHistory`] afterwards.
//!
//! Forks clone the history but share its version counter, so two instances
//! of one lineage never issue the same version for different states.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::delta::Batch;
use crate::ident::{NodeId, Version};
use crate::retention::RetentionPolicy;

/// A rollback target is not reachable from the current version.
///
/// The instance is left unchanged whenever this is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VersionConflict {
    /// The target precedes the oldest retained version.
    #[error("version {requested} is no longer retained (oldest is {oldest})")]
    NotRetained {
        /// Requested version.
        requested: Version,
        /// Oldest version still reachable.
        oldest: Version,
    },
    /// The target is not an ancestor of the current version (it was rolled
    /// back, belongs to another fork, or was never issued).
    #[error("version {requested} is not on the current history")]
    NotOnHistory {
        /// Requested version.
        requested: Version,
    },
}

#[derive(Debug, Clone)]
struct Commit {
    version: Version,
    batch: Batch,
}

#[derive(Debug, Clone)]
pub(crate) struct History {
    base: Version,
    commits: VecDeque<Commit>,
    next: Arc<AtomicU64>,
}

impl Default for History {
    fn default() -> Self {
        Self {
            base: Version::INITIAL,
            commits: VecDeque::new(),
            next: Arc::new(AtomicU64::new(Version::INITIAL.value() + 1)),
        }
    }
}

impl History {
    pub(crate) fn current(&self) -> Version {
        self.commits.back().map_or(self.base, |c| c.version)
    }

    pub(crate) fn oldest(&self) -> Version {
        self.base
    }

    /// Number of retained commits.
    pub(crate) fn len(&self) -> usize {
        self.commits.len()
    }

    /// Appends a committed batch and issues its version.
    pub(crate) fn record(&mut self, batch: Batch) -> Version {
        let version = Version(self.next.fetch_add(1, Ordering::Relaxed));
        self.commits.push_back(Commit { version, batch });
        version
    }

    /// Checks that `target` is reachable and returns how many commits must
    /// be undone to reach it.
    pub(crate) fn depth_of(&self, target: Version) -> Result<usize, VersionConflict> {
        if target == self.base {
            return Ok(self.commits.len());
        }
        if let Some(pos) = self.commits.iter().position(|c| c.version == target) {
            return Ok(self.commits.len() - pos - 1);
        }
        if target < self.base {
            return Err(VersionConflict::NotRetained {
                requested: target,
                oldest: self.base,
            });
        }
        Err(VersionConflict::NotOnHistory { requested: target })
    }

    /// Removes the newest commit.
    pub(crate) fn pop(&mut self) -> Option<Batch> {
        self.commits.pop_back().map(|c| c.batch)
    }

    /// Drops commits outside the retention window and returns the nodes
    /// whose deletion became irreversible.
    pub(crate) fn prune(&mut self, policy: RetentionPolicy) -> Vec<NodeId> {
        let Some(window) = policy.window() else {
            return Vec::new();
        };
        let mut settled = Vec::new();
        while self.commits.len() > window {
            let Some(commit) = self.commits.pop_front() else {
                break;
            };
            self.base = commit.version;
            settled.extend(commit.batch.deleted_nodes());
        }
        settled
    }
}
