//! Display frame handed to the presentation layer
//!
//! A frame is a complete description of what the screen should show; the
//! presentation side keeps no business state of its own.

use crate::domain::aggregate::{AggregateState, Direction, Tenths, VoterLine};
use crate::domain::types::PerformanceUnit;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Phase of the reveal sequence for the active group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevealPhase {
    #[default]
    Idle,
    Suspense,
    Revealing,
}

impl RevealPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevealPhase::Idle => "idle",
            RevealPhase::Suspense => "suspense",
            RevealPhase::Revealing => "revealing",
        }
    }
}

/// Instruction to animate the average from `from` to `to`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountUp {
    pub from: Tenths,
    pub to: Tenths,
    pub duration_ms: u64,
}

impl CountUp {
    /// Start value for a direction-aware transition.
    ///
    /// The start sits at least `offset` below the target when increasing and at
    /// least `offset` above it when decreasing, so the number visibly climbs or
    /// falls even when the change itself is a single tenth.
    pub fn toward(previous: Tenths, target: Tenths, direction: Direction, offset: Tenths, duration_ms: u64) -> Self {
        let from = match direction {
            Direction::Increasing => previous.min(target.saturating_sub(offset)),
            Direction::Decreasing => {
                previous.max(target.saturating_add(offset).min(Tenths::MAX_AVERAGE))
            }
            Direction::Unchanged => target,
        };
        Self { from, to: target, duration_ms }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayFrame {
    /// `None` when nothing is scheduled for today
    pub group: Option<PerformanceUnit>,
    pub phase: RevealPhase,
    pub average: Tenths,
    pub count: u64,
    pub direction: Direction,
    pub suspense_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_participant_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_up: Option<CountUp>,
    #[serde(default)]
    pub voters: Vec<VoterLine>,
    pub ts: u64,
}

impl DisplayFrame {
    /// Frame for "please wait for the next performance"
    pub fn waiting() -> Self {
        Self {
            group: None,
            phase: RevealPhase::Idle,
            average: Tenths::ZERO,
            count: 0,
            direction: Direction::Unchanged,
            suspense_active: false,
            pending_participant_name: None,
            count_up: None,
            voters: Vec::new(),
            ts: epoch_ms(),
        }
    }

    /// Settled frame for a group showing `state`
    pub fn settled(group: &PerformanceUnit, state: &AggregateState, voters: &[VoterLine]) -> Self {
        Self {
            group: Some(group.clone()),
            phase: RevealPhase::Idle,
            average: state.average,
            count: state.count,
            direction: state.direction,
            suspense_active: false,
            pending_participant_name: None,
            count_up: None,
            voters: voters.to_vec(),
            ts: epoch_ms(),
        }
    }
}
