//! Change feed listener: exactly one live subscription, scoped to the active group
//!
//! Each subscription gets its own channel. Closing a subscription also drops
//! the receiver side held by the caller, so nothing queued for an old group
//! can reach the sequencer after a switch.

use crate::domain::{GroupId, RatingRecord};
use crate::error::SourceResult;
use crate::services::ports::{ChangeFeed, Subscription};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

struct ActiveSubscription {
    group_id: GroupId,
    handle: Box<dyn Subscription>,
}

pub struct FeedListener {
    feed: Arc<dyn ChangeFeed>,
    buffer: usize,
    active: Option<ActiveSubscription>,
}

impl FeedListener {
    pub fn new(feed: Arc<dyn ChangeFeed>, buffer: usize) -> Self {
        Self { feed, buffer: buffer.max(1), active: None }
    }

    /// Subscribe to `group_id`, closing any previous subscription first.
    ///
    /// A failure is returned to the caller once and leaves the listener with
    /// no subscription.
    pub async fn switch_to(&mut self, group_id: &GroupId) -> SourceResult<mpsc::Receiver<RatingRecord>> {
        self.close();

        let (tx, rx) = mpsc::channel(self.buffer);
        match self.feed.subscribe(group_id, tx).await {
            Ok(handle) => {
                info!(group_id = %group_id, "feed_subscribed");
                self.active = Some(ActiveSubscription { group_id: group_id.clone(), handle });
                Ok(rx)
            }
            Err(e) => {
                warn!(group_id = %group_id, error = %e, "feed_subscribe_failed");
                Err(e)
            }
        }
    }

    /// Close the current subscription, if any
    pub fn close(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.handle.close();
            info!(group_id = %active.group_id, "feed_unsubscribed");
        }
    }

    pub fn active_group(&self) -> Option<&GroupId> {
        self.active.as_ref().map(|a| &a.group_id)
    }
}

impl Drop for FeedListener {
    fn drop(&mut self) {
        self.close();
    }
}
