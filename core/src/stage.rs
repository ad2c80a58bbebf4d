//! Feature review stages and the transition table.
//!
//! ```text
//! Inbox            -> Suggested, CollectingVotes
//! Suggested        -> Upcoming, CollectingVotes, Maybe
//! Maybe            -> Upcoming, CollectingVotes
//! CollectingVotes  -> Upcoming, Suggested
//! Upcoming         -> Published
//! Published        -> (terminal)
//! ```
//!
//! The table is cyclic on purpose: items bounce between triage stages
//! (Suggested <-> CollectingVotes, Maybe -> CollectingVotes -> Suggested)
//! before they are scheduled.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FeatureError;

/// Position of a feature in its review/release workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Fresh submission, not yet triaged.
    Inbox,
    Suggested,
    /// Parked for a later revisit.
    Maybe,
    /// Open for community votes.
    CollectingVotes,
    /// Scheduled; `progress` is tracked from here on.
    Upcoming,
    /// Shipped. Terminal.
    Published,
}

impl Stage {
    /// Storage and wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Inbox => "inbox",
            Stage::Suggested => "suggested",
            Stage::Maybe => "maybe",
            Stage::CollectingVotes => "collecting_votes",
            Stage::Upcoming => "upcoming",
            Stage::Published => "published",
        }
    }

    /// Parse a canonical stage name.
    ///
    /// Only the snake_case names produced by [`Stage::as_str`] are accepted;
    /// legacy spellings such as `collecting` or `collectingvotes` are rejected.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inbox" => Some(Stage::Inbox),
            "suggested" => Some(Stage::Suggested),
            "maybe" => Some(Stage::Maybe),
            "collecting_votes" => Some(Stage::CollectingVotes),
            "upcoming" => Some(Stage::Upcoming),
            "published" => Some(Stage::Published),
            _ => None,
        }
    }

    /// All stages in workflow order.
    pub fn all() -> [Self; 6] {
        [
            Stage::Inbox,
            Stage::Suggested,
            Stage::Maybe,
            Stage::CollectingVotes,
            Stage::Upcoming,
            Stage::Published,
        ]
    }

    /// Legal destinations from this stage.
    pub fn successors(self) -> &'static [Stage] {
        match self {
            Stage::Inbox => &[Stage::Suggested, Stage::CollectingVotes],
            Stage::Suggested => &[Stage::Upcoming, Stage::CollectingVotes, Stage::Maybe],
            Stage::Maybe => &[Stage::Upcoming, Stage::CollectingVotes],
            Stage::CollectingVotes => &[Stage::Upcoming, Stage::Suggested],
            Stage::Upcoming => &[Stage::Published],
            Stage::Published => &[],
        }
    }

    pub fn can_transition_to(self, target: Stage) -> bool {
        self.successors().contains(&target)
    }

    /// Whether no further transitions exist.
    pub fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }

    /// Whether `progress` may be edited in this stage. Published is pinned
    /// at 100.
    pub fn progress_editable(self) -> bool {
        self == Stage::Upcoming
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::parse(s.trim()).ok_or_else(|| FeatureError::InvalidArgument {
            reason: format!("unknown stage: {s:?}"),
        })
    }
}
