// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Retention policies for commit history.
//!
//! This module defines [`RetentionPolicy`], which controls how far back an
//! instance can roll back. Retention trades memory for backtracking depth;
//! it never affects match results.
//!
//! - [`RetentionPolicy::KeepAll`] - Keep every commit; any ancestor on the
//!   current line stays reachable.
//! - [`RetentionPolicy::KeepRecent`] - Keep a sliding window of commits;
//!   rolling back past it yields [`crate::VersionConflict::NotRetained`].
use serde::{Deserialize, Serialize};

/// Retention policy for commit history.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RetentionPolicy {
    /// Keep all history indefinitely.
    #[default]
    KeepAll,

    /// Keep only the most recent commits.
    KeepRecent {
        /// Number of commits kept for rollback.
        window: u64,
    },
}

impl RetentionPolicy {
    /// Maximum number of retained commits, if bounded.
    #[must_use]
    pub fn window(self) -> Option<usize> {
        match self {
            Self::KeepAll => None,
            Self::KeepRecent { window } => Some(usize::try_from(window).unwrap_or(usize::MAX)),
        }
    }
}
