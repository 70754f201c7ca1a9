//! Collaborator interfaces consumed by the sequencer
//!
//! Production adapters live in `io`; tests use the in-memory fakes in
//! `services::testing`.

use crate::domain::{DisplayFrame, GroupId, ParticipantId, PerformanceUnit, RatingRecord};
use crate::error::SourceResult;
use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::mpsc;

/// Which group is scheduled for a given day
#[async_trait]
pub trait GroupResolver: Send + Sync {
    async fn resolve_active_group(&self, date: NaiveDate) -> SourceResult<Option<PerformanceUnit>>;
}

/// Read access to persisted rating records
#[async_trait]
pub trait RatingStore: Send + Sync {
    /// The complete record set for `group_id`, in no particular order
    async fn fetch_ratings(&self, group_id: &GroupId) -> SourceResult<Vec<RatingRecord>>;
}

/// Participant display names
#[async_trait]
pub trait ParticipantDirectory: Send + Sync {
    async fn resolve_participant_name(&self, participant_id: &ParticipantId) -> SourceResult<String>;
}

/// Source of "rating inserted" notifications
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open a subscription filtered to `group_id`.
    ///
    /// Returns once the subscription is established. Notifications are sent to
    /// `sink` in arrival order until the returned handle is closed.
    async fn subscribe(
        &self,
        group_id: &GroupId,
        sink: mpsc::Sender<RatingRecord>,
    ) -> SourceResult<Box<dyn Subscription>>;
}

/// Handle to an open change feed subscription
pub trait Subscription: Send {
    /// Stop delivery. Calling it again is a no-op.
    fn close(&mut self);
}

/// Receives every frame the display should render
pub trait Presenter: Send + Sync {
    fn present(&self, frame: DisplayFrame);
}
