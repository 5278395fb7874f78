use std::fmt;
use std::str::FromStr;

use serde::Serialize;

pub const UP: &str = "UP";
pub const DOWN: &str = "DOWN";
pub const CANCELLED: &str = "CANCELLED";

/// A vote a caller may request. Cancellation is never requested directly; it
/// is the result of repeating the current live vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            VoteDirection::Up => UP,
            VoteDirection::Down => DOWN,
        }
    }

    pub const fn weight(self) -> i64 {
        match self {
            VoteDirection::Up => 1,
            VoteDirection::Down => -1,
        }
    }
}

impl FromStr for VoteDirection {
    type Err = UnknownVoteType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            UP => Ok(VoteDirection::Up),
            DOWN => Ok(VoteDirection::Down),
            other => Err(UnknownVoteType(other.to_string())),
        }
    }
}

impl fmt::Display for VoteDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored state of a (post, user) vote row. `Cancelled` is a tombstone: the
/// row is kept so the pair stays unique across re-votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteType {
    Up,
    Down,
    Cancelled,
}

impl VoteType {
    pub const fn as_str(self) -> &'static str {
        match self {
            VoteType::Up => UP,
            VoteType::Down => DOWN,
            VoteType::Cancelled => CANCELLED,
        }
    }

    /// The live direction, or `None` for a tombstone.
    pub const fn live(self) -> Option<VoteDirection> {
        match self {
            VoteType::Up => Some(VoteDirection::Up),
            VoteType::Down => Some(VoteDirection::Down),
            VoteType::Cancelled => None,
        }
    }

    pub const fn weight(self) -> i64 {
        match self.live() {
            Some(direction) => direction.weight(),
            None => 0,
        }
    }
}

impl From<VoteDirection> for VoteType {
    fn from(direction: VoteDirection) -> Self {
        match direction {
            VoteDirection::Up => VoteType::Up,
            VoteDirection::Down => VoteType::Down,
        }
    }
}

impl FromStr for VoteType {
    type Err = UnknownVoteType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            UP => Ok(VoteType::Up),
            DOWN => Ok(VoteType::Down),
            CANCELLED => Ok(VoteType::Cancelled),
            other => Err(UnknownVoteType(other.to_string())),
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown vote type {0:?}")]
pub struct UnknownVoteType(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: VoteType,
    pub delta: i64,
}

/// Resolves the next stored state for a requested vote.
///
/// Repeating the live vote cancels it, requesting the opposite direction flips
/// it, and voting with nothing live adds the vote. The score delta is the
/// difference between the new and old weights, so a flip swings by two.
pub fn transition(current: Option<VoteType>, requested: VoteDirection) -> Transition {
    let live = current.and_then(VoteType::live);
    let next = if live == Some(requested) {
        VoteType::Cancelled
    } else {
        VoteType::from(requested)
    };
    let previous_weight = current.map_or(0, VoteType::weight);
    let delta = next.weight() - previous_weight;

    assert!((-2..=2).contains(&delta), "Vote delta out of range");
    Transition { next, delta }
}
