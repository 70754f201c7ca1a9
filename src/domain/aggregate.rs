//! Aggregate model: the rating set for the active group and the state derived from it
//!
//! The average is kept as integer tenths so that "one fractional digit" is exact
//! and equality between two refreshes never depends on float noise.

use crate::domain::types::{GroupId, RatingRecord};
use serde::{Deserialize, Serialize};

/// A non-negative decimal with exactly one fractional digit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(into = "f64", from = "f64")]
pub struct Tenths(u32);

impl Tenths {
    pub const ZERO: Tenths = Tenths(0);
    /// Highest reachable average (a set of all-10 ratings)
    pub const MAX_AVERAGE: Tenths = Tenths(100);

    pub const fn from_tenths(tenths: u32) -> Self {
        Self(tenths)
    }

    /// `round(sum / count, 1)`, half-up on the exact ratio, computed without floats.
    /// Ties such as 1.15 round up even where an f64 quotient would land just below.
    /// An empty set is exactly zero and performs no division.
    pub fn from_ratio(sum: u64, count: u64) -> Self {
        if count == 0 {
            return Self::ZERO;
        }
        let tenths = (sum * 20 + count) / (count * 2);
        Self(u32::try_from(tenths).unwrap_or(u32::MAX))
    }

    #[inline]
    pub fn tenths(self) -> u32 {
        self.0
    }

    pub fn saturating_sub(self, other: Tenths) -> Tenths {
        Tenths(self.0.saturating_sub(other.0))
    }

    pub fn saturating_add(self, other: Tenths) -> Tenths {
        Tenths(self.0.saturating_add(other.0))
    }
}

impl std::fmt::Display for Tenths {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.0 / 10, self.0 % 10)
    }
}

impl From<Tenths> for f64 {
    fn from(value: Tenths) -> Self {
        f64::from(value.0) / 10.0
    }
}

impl From<f64> for Tenths {
    fn from(value: f64) -> Self {
        if !value.is_finite() || value <= 0.0 {
            return Tenths::ZERO;
        }
        Tenths((value * 10.0).round().min(f64::from(u32::MAX)) as u32)
    }
}

/// Trend of the displayed average between two refreshes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Increasing,
    Decreasing,
    #[default]
    Unchanged,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Increasing => "increasing",
            Direction::Decreasing => "decreasing",
            Direction::Unchanged => "unchanged",
        }
    }
}

/// How an average equal to the previously displayed one is classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieBreak {
    /// Equal averages do not animate
    #[default]
    Unchanged,
    /// Equal averages replay the climb animation
    Increasing,
}

impl TieBreak {
    /// Direction of `current` relative to `previous`. No previous value is the
    /// neutral baseline and never animates.
    pub fn direction(self, previous: Option<Tenths>, current: Tenths) -> Direction {
        let Some(previous) = previous else {
            return Direction::Unchanged;
        };
        match current.cmp(&previous) {
            std::cmp::Ordering::Greater => Direction::Increasing,
            std::cmp::Ordering::Less => Direction::Decreasing,
            std::cmp::Ordering::Equal => match self {
                TieBreak::Unchanged => Direction::Unchanged,
                TieBreak::Increasing => Direction::Increasing,
            },
        }
    }
}

/// Aggregate for one group, rebuilt from scratch on every refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateState {
    pub group_id: GroupId,
    pub count: u64,
    pub sum: u64,
    pub average: Tenths,
    pub previous_displayed_average: Option<Tenths>,
    pub direction: Direction,
}

impl AggregateState {
    /// State shown before the first refresh of a group succeeds
    pub fn empty(group_id: GroupId) -> Self {
        Self {
            group_id,
            count: 0,
            sum: 0,
            average: Tenths::ZERO,
            previous_displayed_average: None,
            direction: Direction::Unchanged,
        }
    }
}

/// One line of the voter roster shown under the average
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterLine {
    pub name: String,
    pub rating: u8,
}

/// All rating records currently known for the active group
#[derive(Debug, Clone, Default)]
pub struct RatingSet {
    records: Vec<RatingRecord>,
}

impl RatingSet {
    pub fn new(records: Vec<RatingRecord>) -> Self {
        Self { records }
    }

    pub fn count(&self) -> u64 {
        self.records.len() as u64
    }

    pub fn sum(&self) -> u64 {
        self.records.iter().map(|r| u64::from(r.rating.value())).sum()
    }

    pub fn average(&self) -> Tenths {
        Tenths::from_ratio(self.sum(), self.count())
    }

    /// Build the aggregate against the previously displayed average
    pub fn aggregate(
        &self,
        group_id: GroupId,
        previous: Option<Tenths>,
        tie_break: TieBreak,
    ) -> AggregateState {
        let average = self.average();
        AggregateState {
            group_id,
            count: self.count(),
            sum: self.sum(),
            average,
            previous_displayed_average: previous,
            direction: tie_break.direction(previous, average),
        }
    }

    /// Most recent submissions first, at most `limit` lines
    pub fn recent_voters(&self, limit: usize, anonymous_label: &str) -> Vec<VoterLine> {
        let mut sorted: Vec<&RatingRecord> = self.records.iter().collect();
        sorted.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at).then_with(|| b.id.cmp(&a.id)));
        sorted
            .into_iter()
            .take(limit)
            .map(|r| VoterLine {
                name: r
                    .participant_name
                    .clone()
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| anonymous_label.to_string()),
                rating: r.rating.value(),
            })
            .collect()
    }
}
