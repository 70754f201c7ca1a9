//! IO modules - external system interfaces
//!
//! - `rows` - Wire rows shared by the REST store and the change feed
//! - `rest` - PostgREST-style store: schedule, votes, participant names
//! - `mqtt` - MQTT change feed of inserted votes
//! - `display_channel` - Non-blocking presenter feeding the display publisher
//! - `mqtt_display` - MQTT publisher for retained display frames
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod display_channel;
pub mod mqtt;
pub mod mqtt_display;
pub mod prometheus;
pub mod rest;
pub mod rows;

pub use display_channel::{create_display_channel, DisplaySender};
pub use mqtt::MqttFeed;
pub use mqtt_display::DisplayPublisher;
pub use rest::RestClient;
