//! MQTT publisher for display frames
//!
//! Every frame is published retained with QoS 1 on the display topic, so a
//! screen that connects late renders the current state straight away.

use crate::domain::DisplayFrame;
use crate::infra::config::Config;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// MQTT publisher actor
pub struct DisplayPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<DisplayFrame>,
    topic: String,
}

impl DisplayPublisher {
    /// Create the publisher and spawn its MQTT eventloop
    pub fn new(config: &Config, rx: mpsc::Receiver<DisplayFrame>) -> Self {
        let client_id = format!("{}-display-{}", config.display_id(), std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_display_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_display_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_display_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self { client, rx, topic: config.display_topic().to_string() }
    }

    /// Publish frames until shutdown, then flush what is queued
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(topic = %self.topic, "mqtt_display_started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt_display_shutdown");
                        while let Ok(frame) = self.rx.try_recv() {
                            self.publish(&frame).await;
                        }
                        return;
                    }
                }
                Some(frame) = self.rx.recv() => {
                    self.publish(&frame).await;
                }
            }
        }
    }

    async fn publish(&self, frame: &DisplayFrame) {
        let json = match serde_json::to_vec(frame) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "display_frame_encode_failed");
                return;
            }
        };
        if let Err(e) = self.client.publish(&self.topic, QoS::AtLeastOnce, true, json).await {
            error!(error = %e, "mqtt_display_publish_failed");
        }
    }
}
