//! Services - the aggregation and reveal core
//!
//! - `ports` - collaborator traits (resolver, store, directory, feed, presenter)
//! - `aggregation` - from-scratch aggregate refresh for the active group
//! - `feed_listener` - single change feed subscription scoped to the active group
//! - `sequencer` - timed reveal state machine
//! - `live_display` - the event loop that ties them together

pub mod aggregation;
pub mod feed_listener;
pub mod live_display;
pub mod ports;
pub mod sequencer;
#[cfg(test)]
pub(crate) mod testing;

pub use aggregation::AggregationEngine;
pub use feed_listener::FeedListener;
pub use live_display::LiveDisplay;
pub use ports::{ChangeFeed, GroupResolver, ParticipantDirectory, Presenter, RatingStore, Subscription};
pub use sequencer::{RevealSequencer, RevealTiming};
