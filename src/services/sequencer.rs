//! Reveal sequencer: idle → suspense → revealing → idle
//!
//! All state for the active group lives in one `GroupSession`, created on
//! activation and dropped on deactivation. Timers are plain deadlines that the
//! owning event loop sleeps on (`next_deadline`) and hands back (`fire_due`),
//! so dropping the session is enough to cancel every pending step.
//!
//! Refresh scheduling belongs to the reveal session: a notification during
//! suspense re-arms the one pending refresh instead of queueing another, so a
//! burst of N notifications ends in exactly one terminal refresh.

use crate::domain::{
    AggregateState, CountUp, Direction, DisplayFrame, PerformanceUnit, RatingRecord, RevealPhase, Tenths,
    TieBreak, VoterLine,
};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::aggregation::AggregationEngine;
use crate::services::ports::{ParticipantDirectory, Presenter, RatingStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Fixed delays and presentation constants for the reveal sequence
#[derive(Debug, Clone)]
pub struct RevealTiming {
    pub suspense: Duration,
    pub count_up: Duration,
    pub label_clear: Duration,
    pub count_up_offset: Tenths,
    pub tie_break: TieBreak,
    pub anonymous_label: String,
    pub roster_size: usize,
}

impl RevealTiming {
    pub fn from_config(config: &Config) -> Self {
        Self {
            suspense: config.suspense(),
            count_up: config.count_up(),
            label_clear: config.label_clear(),
            count_up_offset: config.count_up_offset(),
            tie_break: config.tie_break(),
            anonymous_label: config.anonymous_label().to_string(),
            roster_size: config.roster_size(),
        }
    }
}

impl Default for RevealTiming {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

struct RevealSession {
    id: Uuid,
    participant_name: String,
    phase: RevealPhase,
    suspense_deadline: Instant,
    label_clear_deadline: Option<Instant>,
    /// Notifications folded into this session's single refresh
    coalesced: u32,
}

struct GroupSession {
    group: PerformanceUnit,
    engine: AggregationEngine,
    /// Last good aggregate, what the screen currently shows
    displayed: AggregateState,
    voters: Vec<VoterLine>,
    reveal: Option<RevealSession>,
}

pub struct RevealSequencer {
    timing: RevealTiming,
    store: Arc<dyn RatingStore>,
    directory: Arc<dyn ParticipantDirectory>,
    presenter: Arc<dyn Presenter>,
    metrics: Arc<Metrics>,
    session: Option<GroupSession>,
}

impl RevealSequencer {
    pub fn new(
        timing: RevealTiming,
        store: Arc<dyn RatingStore>,
        directory: Arc<dyn ParticipantDirectory>,
        presenter: Arc<dyn Presenter>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { timing, store, directory, presenter, metrics, session: None }
    }

    pub fn active_group(&self) -> Option<&PerformanceUnit> {
        self.session.as_ref().map(|s| &s.group)
    }

    pub fn phase(&self) -> RevealPhase {
        self.session
            .as_ref()
            .and_then(|s| s.reveal.as_ref())
            .map(|r| r.phase)
            .unwrap_or_default()
    }

    /// Aggregate currently on screen
    pub fn displayed(&self) -> Option<&AggregateState> {
        self.session.as_ref().map(|s| &s.displayed)
    }

    /// Start a session for `group` with a baseline refresh.
    ///
    /// The baseline never animates. If it fails the display starts from an
    /// empty aggregate and the next reveal retries the fetch.
    pub async fn activate(&mut self, group: PerformanceUnit) {
        self.deactivate();

        let mut engine =
            AggregationEngine::new(group.id.clone(), self.store.clone(), self.timing.tie_break, self.metrics.clone());
        let displayed = match engine.refresh().await {
            Ok(state) => state,
            Err(e) => {
                warn!(group_id = %group.id, error = %e, "baseline_refresh_failed");
                AggregateState::empty(group.id.clone())
            }
        };
        let voters = engine.recent_voters(self.timing.roster_size, &self.timing.anonymous_label);

        info!(
            group_id = %group.id,
            group_name = %group.name,
            count = %displayed.count,
            average = %displayed.average,
            "group_activated"
        );
        self.metrics.set_displayed(displayed.count, displayed.average.tenths());

        let session = GroupSession { group, engine, displayed, voters, reveal: None };
        self.presenter.present(DisplayFrame::settled(&session.group, &session.displayed, &session.voters));
        self.session = Some(session);
    }

    /// Drop the session with every pending timer. No frame is presented.
    pub fn deactivate(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if let Some(reveal) = session.reveal {
            info!(
                group_id = %session.group.id,
                session_id = %reveal.id,
                phase = %reveal.phase.as_str(),
                "reveal_cancelled"
            );
        }
        debug!(group_id = %session.group.id, "group_deactivated");
    }

    /// "Please wait for the next performance"
    pub fn show_waiting(&self) {
        self.metrics.set_displayed(0, 0);
        self.presenter.present(DisplayFrame::waiting());
    }

    /// Handle one "rating inserted" notification
    pub async fn on_notification(&mut self, record: RatingRecord) {
        self.metrics.record_notification();

        let is_active = self.session.as_ref().is_some_and(|s| s.group.id == record.group_id);
        if !is_active {
            self.metrics.record_notification_ignored();
            debug!(group_id = %record.group_id, record_id = %record.id, "notification_ignored");
            return;
        }

        let participant_name = self.resolve_name(&record).await;

        let Some(session) = self.session.as_mut() else {
            return;
        };
        let now = Instant::now();
        let suspense_deadline = now + self.timing.suspense;

        match session.reveal.as_mut() {
            Some(reveal) if reveal.phase == RevealPhase::Suspense => {
                self.metrics.record_session_superseded();
                reveal.participant_name = participant_name;
                reveal.suspense_deadline = suspense_deadline;
                reveal.coalesced += 1;
                debug!(
                    session_id = %reveal.id,
                    record_id = %record.id,
                    coalesced = %reveal.coalesced,
                    "reveal_superseded"
                );
            }
            _ => {
                self.metrics.record_session_started();
                let id = Uuid::now_v7();
                info!(group_id = %session.group.id, session_id = %id, record_id = %record.id, "reveal_started");
                session.reveal = Some(RevealSession {
                    id,
                    participant_name,
                    phase: RevealPhase::Suspense,
                    suspense_deadline,
                    label_clear_deadline: None,
                    coalesced: 1,
                });
            }
        }
        let pending_name = session.reveal.as_ref().map(|r| r.participant_name.clone());

        let mut frame = DisplayFrame::settled(&session.group, &session.displayed, &session.voters);
        frame.phase = RevealPhase::Suspense;
        frame.suspense_active = true;
        frame.direction = Direction::Unchanged;
        frame.pending_participant_name = pending_name;
        self.presenter.present(frame);
    }

    /// The next instant at which `fire_due` has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        let reveal = self.session.as_ref()?.reveal.as_ref()?;
        match reveal.phase {
            RevealPhase::Suspense => Some(reveal.suspense_deadline),
            RevealPhase::Revealing => reveal.label_clear_deadline,
            RevealPhase::Idle => None,
        }
    }

    /// Advance the sequence for every deadline at or before `now`
    pub async fn fire_due(&mut self, now: Instant) {
        let due_phase = match self.session.as_ref().and_then(|s| s.reveal.as_ref()) {
            Some(r) if r.phase == RevealPhase::Suspense && r.suspense_deadline <= now => RevealPhase::Suspense,
            Some(r) if r.phase == RevealPhase::Revealing && r.label_clear_deadline.is_some_and(|d| d <= now) => {
                RevealPhase::Revealing
            }
            _ => return,
        };
        match due_phase {
            RevealPhase::Suspense => self.reveal().await,
            _ => self.clear_label(),
        }
    }

    /// Suspense expired: refresh and hand the result over with a count-up
    async fn reveal(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let count_up = match session.engine.refresh().await {
            Ok(state) => {
                let previous = state.previous_displayed_average.unwrap_or(session.displayed.average);
                let count_up = (state.direction != Direction::Unchanged).then(|| {
                    CountUp::toward(
                        previous,
                        state.average,
                        state.direction,
                        self.timing.count_up_offset,
                        self.timing.count_up.as_millis() as u64,
                    )
                });
                session.voters = session.engine.recent_voters(self.timing.roster_size, &self.timing.anonymous_label);
                session.displayed = state;
                self.metrics.set_displayed(session.displayed.count, session.displayed.average.tenths());
                count_up
            }
            Err(e) => {
                warn!(group_id = %session.group.id, error = %e, "refresh_failed_keeping_last_aggregate");
                None
            }
        };

        let Some(reveal) = session.reveal.as_mut() else {
            return;
        };
        reveal.phase = RevealPhase::Revealing;
        reveal.label_clear_deadline = Some(Instant::now() + self.timing.label_clear);

        info!(
            group_id = %session.group.id,
            session_id = %reveal.id,
            count = %session.displayed.count,
            average = %session.displayed.average,
            direction = %session.displayed.direction.as_str(),
            coalesced = %reveal.coalesced,
            "reveal_fired"
        );

        let mut frame = DisplayFrame::settled(&session.group, &session.displayed, &session.voters);
        frame.phase = RevealPhase::Revealing;
        frame.pending_participant_name = Some(reveal.participant_name.clone());
        frame.count_up = count_up;
        if count_up.is_none() {
            frame.direction = Direction::Unchanged;
        }
        self.presenter.present(frame);
    }

    /// Label-clear expired: back to idle, the numbers stay
    fn clear_label(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(reveal) = session.reveal.take() {
            debug!(session_id = %reveal.id, "reveal_completed");
        }
        self.metrics.record_reveal_completed();
        self.presenter.present(DisplayFrame::settled(&session.group, &session.displayed, &session.voters));
    }

    /// Best-effort participant name with the anonymous fallback
    async fn resolve_name(&self, record: &RatingRecord) -> String {
        if let Some(name) = record.participant_name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        let resolved = match &record.participant_id {
            Some(participant_id) => match self.directory.resolve_participant_name(participant_id).await {
                Ok(name) if !name.trim().is_empty() => Some(name.trim().to_string()),
                Ok(_) => None,
                Err(e) => {
                    debug!(participant_id = %participant_id, error = %e, "participant_name_unresolved");
                    None
                }
            },
            None => {
                debug!(record_id = %record.id, "notification_without_participant");
                None
            }
        };
        resolved.unwrap_or_else(|| {
            self.metrics.record_name_fallback();
            self.timing.anonymous_label.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{group, record, FakeDirectory, FakeStore, RecordingPresenter};
    use tokio::time::advance;

    struct Harness {
        sequencer: RevealSequencer,
        store: Arc<FakeStore>,
        directory: Arc<FakeDirectory>,
        presenter: Arc<RecordingPresenter>,
        metrics: Arc<Metrics>,
    }

    fn harness(timing: RevealTiming) -> Harness {
        let store = Arc::new(FakeStore::new());
        let directory = Arc::new(FakeDirectory::new());
        let presenter = Arc::new(RecordingPresenter::new());
        let metrics = Arc::new(Metrics::new());
        let sequencer =
            RevealSequencer::new(timing, store.clone(), directory.clone(), presenter.clone(), metrics.clone());
        Harness { sequencer, store, directory, presenter, metrics }
    }

    fn millis(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    /// Insert into the store and notify, like a real submission
    async fn submit(h: &mut Harness, rec: RatingRecord) {
        h.store.insert(rec.clone());
        h.sequencer.on_notification(rec).await;
    }

    async fn step(h: &mut Harness, ms: u64) {
        advance(millis(ms)).await;
        h.sequencer.fire_due(Instant::now()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_activation_presents_neutral_baseline() {
        let mut h = harness(RevealTiming::default());
        h.store.insert(record("v1", "g1", 7, Some("Ayu")));

        h.sequencer.activate(group("g1", "Angklung")).await;

        let frame = h.presenter.last().unwrap();
        assert_eq!(frame.group.unwrap().name, "Angklung");
        assert_eq!(frame.average, Tenths::from_tenths(70));
        assert_eq!(frame.count, 1);
        assert_eq!(frame.direction, Direction::Unchanged);
        assert!(frame.count_up.is_none());
        assert_eq!(h.sequencer.next_deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notification_enters_suspense_with_name() {
        let mut h = harness(RevealTiming::default());
        h.directory.insert("p-v1", "Budi");
        h.sequencer.activate(group("g1", "Angklung")).await;

        let mut rec = record("v1", "g1", 8, None);
        rec.participant_id = Some(crate::domain::ParticipantId::new("p-v1"));
        submit(&mut h, rec).await;

        assert_eq!(h.sequencer.phase(), RevealPhase::Suspense);
        let frame = h.presenter.last().unwrap();
        assert!(frame.suspense_active);
        assert_eq!(frame.pending_participant_name.as_deref(), Some("Budi"));
        // Numbers are not revealed yet
        assert_eq!(frame.count, 0);
        assert_eq!(frame.average, Tenths::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_sequence_zero_eight_six() {
        let mut h = harness(RevealTiming::default());
        h.sequencer.activate(group("g1", "Angklung")).await;

        submit(&mut h, record("v1", "g1", 8, Some("Ayu"))).await;
        step(&mut h, 2999).await;
        assert_eq!(h.sequencer.phase(), RevealPhase::Suspense);
        step(&mut h, 1).await;
        assert_eq!(h.sequencer.phase(), RevealPhase::Revealing);

        let frame = h.presenter.last().unwrap();
        assert_eq!((frame.average, frame.count), (Tenths::from_tenths(80), 1));
        assert_eq!(frame.direction, Direction::Increasing);
        assert!(!frame.suspense_active);
        assert_eq!(frame.pending_participant_name.as_deref(), Some("Ayu"));
        let count_up = frame.count_up.unwrap();
        assert_eq!((count_up.from, count_up.to, count_up.duration_ms), (Tenths::ZERO, Tenths::from_tenths(80), 2000));

        step(&mut h, 5000).await;
        assert_eq!(h.sequencer.phase(), RevealPhase::Idle);
        let frame = h.presenter.last().unwrap();
        assert!(frame.pending_participant_name.is_none());
        assert_eq!(frame.average, Tenths::from_tenths(80));

        submit(&mut h, record("v2", "g1", 4, Some("Citra"))).await;
        step(&mut h, 3000).await;
        let frame = h.presenter.last().unwrap();
        assert_eq!((frame.average, frame.count), (Tenths::from_tenths(60), 2));
        assert_eq!(frame.direction, Direction::Decreasing);
        assert_eq!(frame.count_up.unwrap().from, Tenths::from_tenths(80));
        assert_eq!(h.metrics.reveals_completed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supersession_yields_one_refresh_with_last_name() {
        let mut h = harness(RevealTiming::default());
        h.sequencer.activate(group("g1", "Angklung")).await;
        assert_eq!(h.store.fetch_count(), 1);

        submit(&mut h, record("v1", "g1", 9, Some("Ayu"))).await;
        step(&mut h, 500).await;
        submit(&mut h, record("v2", "g1", 7, Some("Budi"))).await;

        // The first deadline has passed, the re-armed one has not
        step(&mut h, 2600).await;
        assert_eq!(h.sequencer.phase(), RevealPhase::Suspense);
        assert_eq!(h.store.fetch_count(), 1);

        step(&mut h, 400).await;
        assert_eq!(h.sequencer.phase(), RevealPhase::Revealing);
        assert_eq!(h.store.fetch_count(), 2);

        let frame = h.presenter.last().unwrap();
        assert_eq!(frame.pending_participant_name.as_deref(), Some("Budi"));
        assert_eq!((frame.average, frame.count), (Tenths::from_tenths(80), 2));
        assert_eq!(h.metrics.sessions_superseded(), 1);

        let revealing = h.presenter.frames().iter().filter(|f| f.phase == RevealPhase::Revealing).count();
        assert_eq!(revealing, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_name_failure_falls_back_to_anonymous() {
        let mut h = harness(RevealTiming::default());
        h.sequencer.activate(group("g1", "Angklung")).await;

        // Directory has no entry for this participant
        submit(&mut h, record("v1", "g1", 6, None)).await;
        assert_eq!(h.presenter.last().unwrap().pending_participant_name.as_deref(), Some("Anonymous"));

        step(&mut h, 3000).await;
        let frame = h.presenter.last().unwrap();
        assert_eq!((frame.average, frame.count), (Tenths::from_tenths(60), 1));
        assert_eq!(frame.pending_participant_name.as_deref(), Some("Anonymous"));
        assert_eq!(h.metrics.name_fallbacks(), 1);
        assert_eq!(h.directory.lookup_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_participant_reference_is_anonymous_without_lookup() {
        let mut h = harness(RevealTiming::default());
        h.sequencer.activate(group("g1", "Angklung")).await;

        let mut rec = record("v1", "g1", 5, None);
        rec.participant_id = None;
        submit(&mut h, rec).await;

        assert_eq!(h.presenter.last().unwrap().pending_participant_name.as_deref(), Some("Anonymous"));
        assert_eq!(h.directory.lookup_count(), 0);
        assert_eq!(h.sequencer.phase(), RevealPhase::Suspense);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_keeps_last_good_aggregate() {
        let mut h = harness(RevealTiming::default());
        h.store.insert(record("v0", "g1", 6, None));
        h.sequencer.activate(group("g1", "Angklung")).await;

        h.store.set_failing(true);
        submit(&mut h, record("v1", "g1", 10, Some("Ayu"))).await;
        step(&mut h, 3000).await;

        assert_eq!(h.sequencer.phase(), RevealPhase::Revealing);
        let frame = h.presenter.last().unwrap();
        assert_eq!((frame.average, frame.count), (Tenths::from_tenths(60), 1));
        assert!(frame.count_up.is_none());
        assert_eq!(h.metrics.refresh_failed(), 1);

        // The sequence still completes and the next reveal recovers
        step(&mut h, 5000).await;
        assert_eq!(h.sequencer.phase(), RevealPhase::Idle);
        h.store.set_failing(false);
        submit(&mut h, record("v2", "g1", 8, Some("Budi"))).await;
        step(&mut h, 3000).await;
        let frame = h.presenter.last().unwrap();
        assert_eq!((frame.average, frame.count), (Tenths::from_tenths(80), 3));
        assert_eq!(frame.direction, Direction::Increasing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_average_does_not_animate() {
        let mut h = harness(RevealTiming::default());
        h.store.insert(record("v0", "g1", 7, None));
        h.sequencer.activate(group("g1", "Angklung")).await;

        submit(&mut h, record("v1", "g1", 7, Some("Ayu"))).await;
        step(&mut h, 3000).await;

        let frame = h.presenter.last().unwrap();
        assert_eq!(frame.count, 2);
        assert_eq!(frame.direction, Direction::Unchanged);
        assert!(frame.count_up.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_increasing_tie_break_replays_climb() {
        let timing = RevealTiming { tie_break: TieBreak::Increasing, ..RevealTiming::default() };
        let mut h = harness(timing);
        h.store.insert(record("v0", "g1", 7, None));
        h.sequencer.activate(group("g1", "Angklung")).await;

        submit(&mut h, record("v1", "g1", 7, Some("Ayu"))).await;
        step(&mut h, 3000).await;

        let frame = h.presenter.last().unwrap();
        assert_eq!(frame.direction, Direction::Increasing);
        let count_up = frame.count_up.unwrap();
        assert_eq!((count_up.from, count_up.to), (Tenths::from_tenths(60), Tenths::from_tenths(70)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_notification_while_revealing_starts_new_session() {
        let mut h = harness(RevealTiming::default());
        h.sequencer.activate(group("g1", "Angklung")).await;

        submit(&mut h, record("v1", "g1", 8, Some("Ayu"))).await;
        step(&mut h, 3000).await;
        assert_eq!(h.sequencer.phase(), RevealPhase::Revealing);

        submit(&mut h, record("v2", "g1", 6, Some("Budi"))).await;
        assert_eq!(h.sequencer.phase(), RevealPhase::Suspense);
        assert_eq!(h.sequencer.next_deadline(), Some(Instant::now() + millis(3000)));
        assert_eq!(h.metrics.sessions_superseded(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_group_notification_is_ignored() {
        let mut h = harness(RevealTiming::default());
        h.sequencer.activate(group("g1", "Angklung")).await;
        let frames = h.presenter.len();

        h.sequencer.on_notification(record("x", "g2", 10, None)).await;
        assert_eq!(h.sequencer.phase(), RevealPhase::Idle);
        assert_eq!(h.presenter.len(), frames);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_cancels_pending_reveal() {
        let mut h = harness(RevealTiming::default());
        h.sequencer.activate(group("g1", "Angklung")).await;
        submit(&mut h, record("v1", "g1", 8, Some("Ayu"))).await;
        let frames = h.presenter.len();

        h.sequencer.deactivate();
        assert_eq!(h.sequencer.next_deadline(), None);
        step(&mut h, 10_000).await;

        assert_eq!(h.presenter.len(), frames);
        assert_eq!(h.store.fetch_count(), 1);
        assert!(h.sequencer.active_group().is_none());
    }
}
