//! Aggregation engine for the active group
//!
//! Every refresh fetches the complete record set and recomputes from scratch.
//! Nothing is derived incrementally from notifications, so a missed or
//! duplicated notification can never skew the displayed numbers.

use crate::domain::{AggregateState, GroupId, RatingSet, Tenths, TieBreak, VoterLine};
use crate::error::SourceResult;
use crate::infra::metrics::Metrics;
use crate::services::ports::RatingStore;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub struct AggregationEngine {
    group_id: GroupId,
    store: Arc<dyn RatingStore>,
    tie_break: TieBreak,
    /// Average of the last successful refresh; `None` until the baseline
    previous_displayed: Option<Tenths>,
    ratings: RatingSet,
    metrics: Arc<Metrics>,
}

impl AggregationEngine {
    pub fn new(
        group_id: GroupId,
        store: Arc<dyn RatingStore>,
        tie_break: TieBreak,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            group_id,
            store,
            tie_break,
            previous_displayed: None,
            ratings: RatingSet::default(),
            metrics,
        }
    }

    /// Fetch all ratings and rebuild the aggregate.
    ///
    /// On error the engine is left untouched: the previous average still
    /// anchors the next direction and the cached rating set is kept.
    pub async fn refresh(&mut self) -> SourceResult<AggregateState> {
        let started = Instant::now();
        let result = self.store.fetch_ratings(&self.group_id).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        self.metrics.record_refresh(latency_ms, result.is_ok());

        let records = result?;
        let ratings = RatingSet::new(records);
        let state = ratings.aggregate(self.group_id.clone(), self.previous_displayed, self.tie_break);

        debug!(
            group_id = %self.group_id,
            count = %state.count,
            average = %state.average,
            direction = %state.direction.as_str(),
            latency_ms = %latency_ms,
            "aggregate_refreshed"
        );

        self.previous_displayed = Some(state.average);
        self.ratings = ratings;
        Ok(state)
    }

    /// Roster of the most recent ratings from the last successful refresh
    pub fn recent_voters(&self, limit: usize, anonymous_label: &str) -> Vec<VoterLine> {
        self.ratings.recent_voters(limit, anonymous_label)
    }
}
