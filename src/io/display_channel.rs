//! Bounded channel between the sequencer and the display publisher
//!
//! The sequencer must never wait on the broker, so frames are handed over
//! with `try_send`. A full channel drops the frame; the next frame carries
//! the complete state anyway.

use crate::domain::DisplayFrame;
use crate::infra::metrics::Metrics;
use crate::services::ports::Presenter;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct DisplaySender {
    tx: mpsc::Sender<DisplayFrame>,
    metrics: Arc<Metrics>,
}

impl DisplaySender {
    pub fn new(tx: mpsc::Sender<DisplayFrame>, metrics: Arc<Metrics>) -> Self {
        Self { tx, metrics }
    }
}

impl Presenter for DisplaySender {
    fn present(&self, frame: DisplayFrame) {
        debug!(
            phase = %frame.phase.as_str(),
            average = %frame.average,
            count = %frame.count,
            suspense = %frame.suspense_active,
            "display_frame"
        );
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.metrics.record_frame_dropped();
                warn!("display_frame_dropped: channel full");
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.record_frame_dropped();
                debug!("display_frame_dropped: publisher stopped");
            }
        }
    }
}

/// Create a display channel pair
pub fn create_display_channel(
    buffer_size: usize,
    metrics: Arc<Metrics>,
) -> (DisplaySender, mpsc::Receiver<DisplayFrame>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (DisplaySender::new(tx, metrics), rx)
}
