//! MQTT change feed for inserted votes
//!
//! Each subscription is its own client on `{feed_topic_prefix}/{group_id}`,
//! so closing it can never affect the next group's subscription. A pump task
//! forwards decoded rows to the subscriber's channel in arrival order.
//! On close the pump stops forwarding and keeps polling just long enough to
//! send UNSUBSCRIBE and DISCONNECT.

use crate::domain::{GroupId, RatingRecord};
use crate::error::{SourceError, SourceResult};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::rows::parse_feed_payload;
use crate::services::ports::{ChangeFeed, Subscription};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Upper bound on flushing UNSUBSCRIBE and DISCONNECT after close
const CLOSE_DRAIN: Duration = Duration::from_millis(500);

/// What to do with one incoming publish
#[derive(Debug)]
enum Routed {
    Deliver(RatingRecord),
    /// Retained messages replay old inserts on every (re)connect
    Retained,
    OtherGroup(GroupId),
    Malformed(SourceError),
}

fn route(payload: &[u8], retain: bool, group_id: &GroupId) -> Routed {
    if retain {
        return Routed::Retained;
    }
    match parse_feed_payload(payload) {
        Ok(record) if &record.group_id == group_id => Routed::Deliver(record),
        Ok(record) => Routed::OtherGroup(record.group_id),
        Err(e) => Routed::Malformed(e),
    }
}

pub struct MqttFeed {
    client_prefix: String,
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    topic_prefix: String,
    subscribe_timeout: Duration,
    metrics: Arc<Metrics>,
    next_client: AtomicU64,
}

impl MqttFeed {
    pub fn new(config: &Config, metrics: Arc<Metrics>) -> Self {
        let credentials = match (config.mqtt_username(), config.mqtt_password()) {
            (Some(username), Some(password)) => Some((username.to_string(), password.to_string())),
            _ => None,
        };
        Self {
            client_prefix: format!("{}-feed-{}", config.display_id(), std::process::id()),
            host: config.mqtt_host().to_string(),
            port: config.mqtt_port(),
            credentials,
            topic_prefix: config.feed_topic_prefix().to_string(),
            subscribe_timeout: config.subscribe_timeout(),
            metrics,
            next_client: AtomicU64::new(0),
        }
    }

    pub fn topic_for(&self, group_id: &GroupId) -> String {
        format!("{}/{}", self.topic_prefix, group_id)
    }

    fn options(&self) -> MqttOptions {
        let n = self.next_client.fetch_add(1, Ordering::Relaxed);
        let mut options = MqttOptions::new(format!("{}-{}", self.client_prefix, n), &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);
        if let Some((username, password)) = &self.credentials {
            options.set_credentials(username, password);
        }
        options
    }
}

/// Drive the eventloop until the broker acknowledges the subscription
async fn wait_for_suback(eventloop: &mut EventLoop) -> SourceResult<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                if ack.return_codes.iter().any(|code| matches!(code, SubscribeReasonCode::Failure)) {
                    return Err(SourceError::Feed("subscription rejected by broker".to_string()));
                }
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => return Err(SourceError::Feed(e.to_string())),
        }
    }
}

/// Forward decoded rows until stopped or the subscriber goes away,
/// then flush whatever the client queued on close
async fn pump(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topic: String,
    group_id: GroupId,
    sink: mpsc::Sender<RatingRecord>,
    metrics: Arc<Metrics>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut reconnecting = false;
    loop {
        let event = tokio::select! {
            biased;
            _ = &mut stop => break,
            event = eventloop.poll() => event,
        };
        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                match route(&publish.payload, publish.retain, &group_id) {
                    Routed::Deliver(record) => {
                        debug!(group_id = %group_id, record_id = %record.id, "feed_notification");
                        tokio::select! {
                            biased;
                            _ = &mut stop => break,
                            sent = sink.send(record) => {
                                if sent.is_err() {
                                    debug!(topic = %topic, "feed_subscriber_gone");
                                    return;
                                }
                            }
                        }
                    }
                    Routed::Retained => debug!(topic = %topic, "feed_retained_skipped"),
                    Routed::OtherGroup(other) => {
                        metrics.record_notification_ignored();
                        debug!(topic = %topic, group_id = %other, "feed_other_group_skipped");
                    }
                    Routed::Malformed(e) => {
                        metrics.record_feed_malformed();
                        warn!(topic = %topic, error = %e, "feed_payload_malformed");
                    }
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) if reconnecting => {
                // Clean sessions drop subscriptions on reconnect
                reconnecting = false;
                info!(topic = %topic, "feed_reconnected");
                if let Err(e) = client.try_subscribe(&topic, QoS::AtLeastOnce) {
                    warn!(topic = %topic, error = %e, "feed_resubscribe_failed");
                }
            }
            Ok(_) => {}
            Err(e) => {
                reconnecting = true;
                warn!(topic = %topic, error = %e, "feed_connection_error");
                tokio::select! {
                    biased;
                    _ = &mut stop => break,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
            }
        }
    }

    drop(sink);
    let drained = timeout(CLOSE_DRAIN, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    debug!(topic = %topic, clean = %drained.is_ok(), "feed_closed");
}

#[async_trait]
impl ChangeFeed for MqttFeed {
    async fn subscribe(
        &self,
        group_id: &GroupId,
        sink: mpsc::Sender<RatingRecord>,
    ) -> SourceResult<Box<dyn Subscription>> {
        let topic = self.topic_for(group_id);
        let (client, mut eventloop) = AsyncClient::new(self.options(), 64);

        client
            .subscribe(&topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| SourceError::Feed(e.to_string()))?;

        match timeout(self.subscribe_timeout, wait_for_suback(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(SourceError::Timeout(self.subscribe_timeout)),
        }
        info!(topic = %topic, "feed_suback");

        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(pump(
            eventloop,
            client.clone(),
            topic.clone(),
            group_id.clone(),
            sink,
            self.metrics.clone(),
            stop_rx,
        ));
        Ok(Box::new(MqttSubscription { client: Some(client), stop: Some(stop_tx), topic }))
    }
}

pub struct MqttSubscription {
    client: Option<AsyncClient>,
    stop: Option<oneshot::Sender<()>>,
    topic: String,
}

impl Subscription for MqttSubscription {
    fn close(&mut self) {
        // Queue before stopping so the pump's drain sends both
        if let Some(client) = self.client.take() {
            if let Err(e) = client.try_unsubscribe(&self.topic) {
                debug!(topic = %self.topic, error = %e, "feed_unsubscribe_not_queued");
            }
            if let Err(e) = client.try_disconnect() {
                debug!(topic = %self.topic, error = %e, "feed_disconnect_not_queued");
            }
        }
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for MqttSubscription {
    fn drop(&mut self) {
        self.close();
    }
}
