//! Live display loop: group polling, feed delivery and reveal timers
//!
//! Everything that mutates the sequencer or the aggregate runs on this one
//! task. The loop waits on:
//! - shutdown
//! - the active subscription's channel
//! - the sequencer's next deadline
//! - the group poll interval
//!
//! A group switch tears down the subscription and the session before anything
//! for the new group is opened.


use crate::domain::{GroupId, PerformanceUnit, RatingRecord};
use crate::infra::metrics::Metrics;
use crate::services::feed_listener::FeedListener;
use crate::services::ports::GroupResolver;
use crate::services::sequencer::RevealSequencer;
use chrono::Local;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// Receive from the active subscription, or wait forever when there is none
async fn recv_active(rx: &mut Option<mpsc::Receiver<RatingRecord>>) -> Option<RatingRecord> {
    match rx {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

/// Sleep until `deadline`, or forever when no timer is armed
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

pub struct LiveDisplay {
    resolver: Arc<dyn GroupResolver>,
    listener: FeedListener,
    sequencer: RevealSequencer,
    group_poll: Duration,
    metrics: Arc<Metrics>,
    feed_rx: Option<mpsc::Receiver<RatingRecord>>,
    /// Last resolver answer; `None` before the first successful resolve
    resolved: Option<Option<GroupId>>,
}

impl LiveDisplay {
    pub fn new(
        resolver: Arc<dyn GroupResolver>,
        listener: FeedListener,
        sequencer: RevealSequencer,
        group_poll: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { resolver, listener, sequencer, group_poll, metrics, feed_rx: None, resolved: None }
    }

    /// Run until shutdown, then unmount
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_secs = %self.group_poll.as_secs(), "live_display_started");

        let mut poll = interval(self.group_poll);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.sequencer.next_deadline();
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("live_display_shutdown");
                        break;
                    }
                }
                record = recv_active(&mut self.feed_rx) => match record {
                    Some(record) => self.sequencer.on_notification(record).await,
                    None => {
                        warn!("feed_closed");
                        self.feed_rx = None;
                    }
                },
                _ = sleep_until_opt(deadline) => {
                    self.sequencer.fire_due(Instant::now()).await;
                }
                _ = poll.tick() => {
                    self.poll_group().await;
                }
            }
        }

        self.unmount();
    }

    /// Ask the resolver for today's group and switch if it changed.
    /// Resolver errors keep the current group.
    pub async fn poll_group(&mut self) {
        let today = Local::now().date_naive();
        match self.resolver.resolve_active_group(today).await {
            Ok(group) => self.apply_group(group).await,
            Err(e) => warn!(date = %today, error = %e, "group_resolve_failed"),
        }
    }

    async fn apply_group(&mut self, group: Option<PerformanceUnit>) {
        let next = group.as_ref().map(|g| g.id.clone());
        if self.resolved.as_ref() == Some(&next) {
            return;
        }

        if let Some(previous) = &self.resolved {
            self.metrics.record_group_switch();
            info!(
                from = %previous.as_ref().map(GroupId::as_str).unwrap_or("none"),
                to = %next.as_ref().map(GroupId::as_str).unwrap_or("none"),
                "group_switch"
            );
        }
        self.teardown();
        self.resolved = Some(next);

        let Some(group) = group else {
            info!("no_group_scheduled");
            self.sequencer.show_waiting();
            return;
        };

        // Subscribe before the baseline so no insert falls between the two
        match self.listener.switch_to(&group.id).await {
            Ok(rx) => self.feed_rx = Some(rx),
            Err(e) => {
                self.metrics.record_subscribe_failure();
                error!(group_id = %group.id, error = %e, "live_updates_unavailable");
            }
        }
        self.sequencer.activate(group).await;
    }

    /// Close the subscription and cancel every pending timer
    fn teardown(&mut self) {
        self.feed_rx = None;
        self.listener.close();
        self.sequencer.deactivate();
    }

    pub fn unmount(&mut self) {
        self.teardown();
        self.resolved = None;
        info!("live_display_unmounted");
    }

    pub fn active_group(&self) -> Option<&GroupId> {
        self.listener.active_group()
    }
}
