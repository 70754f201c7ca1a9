//! In-memory collaborators for service tests

use crate::domain::{DisplayFrame, GroupId, ParticipantId, PerformanceUnit, Rating, RatingRecord};
use crate::error::{SourceError, SourceResult};
use crate::services::ports::{
    ChangeFeed, GroupResolver, ParticipantDirectory, Presenter, RatingStore, Subscription,
};
use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

static SUBMISSION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Rating record for `group`, submitted by participant `p-{id}`.
/// Records built later have later submission times.
pub fn record(id: &str, group: &str, rating: i64, name: Option<&str>) -> RatingRecord {
    RatingRecord {
        id: id.to_string(),
        group_id: GroupId::new(group),
        participant_id: Some(ParticipantId::new(format!("p-{id}"))),
        participant_name: name.map(str::to_string),
        rating: Rating::new(rating).unwrap(),
        submitted_at: Utc.with_ymd_and_hms(2026, 10, 19, 20, 0, 0).unwrap()
            + chrono::Duration::seconds(SUBMISSION_SEQ.fetch_add(1, Ordering::SeqCst) as i64),
    }
}

pub fn group(id: &str, name: &str) -> PerformanceUnit {
    PerformanceUnit { id: GroupId::new(id), name: name.to_string(), theme: String::new() }
}

#[derive(Default)]
pub struct FakeStore {
    records: Mutex<Vec<RatingRecord>>,
    failing: AtomicBool,
    fetches: AtomicU64,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: RatingRecord) {
        self.records.lock().push(record);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RatingStore for FakeStore {
    async fn fetch_ratings(&self, group_id: &GroupId) -> SourceResult<Vec<RatingRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SourceError::Status { endpoint: "votes".to_string(), status: 503 });
        }
        Ok(self.records.lock().iter().filter(|r| &r.group_id == group_id).cloned().collect())
    }
}

#[derive(Default)]
pub struct FakeDirectory {
    names: Mutex<FxHashMap<ParticipantId, String>>,
    lookups: AtomicU64,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: &str, name: &str) {
        self.names.lock().insert(ParticipantId::new(id), name.to_string());
    }

    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ParticipantDirectory for FakeDirectory {
    async fn resolve_participant_name(&self, participant_id: &ParticipantId) -> SourceResult<String> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.names
            .lock()
            .get(participant_id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(format!("participant {participant_id}")))
    }
}

#[derive(Default)]
pub struct FakeResolver {
    active: Mutex<Option<PerformanceUnit>>,
    failing: AtomicBool,
}

impl FakeResolver {
    pub fn new(active: Option<PerformanceUnit>) -> Self {
        Self { active: Mutex::new(active), failing: AtomicBool::new(false) }
    }

    pub fn set(&self, active: Option<PerformanceUnit>) {
        *self.active.lock() = active;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl GroupResolver for FakeResolver {
    async fn resolve_active_group(&self, _date: NaiveDate) -> SourceResult<Option<PerformanceUnit>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SourceError::Timeout(std::time::Duration::from_secs(3)));
        }
        Ok(self.active.lock().clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Opened(GroupId),
    Closed(GroupId),
}

struct FeedInner {
    log: Mutex<Vec<FeedEvent>>,
    sinks: Mutex<Vec<(u64, GroupId, mpsc::Sender<RatingRecord>)>>,
    next_id: AtomicU64,
    fail_next: AtomicBool,
}

/// Change feed that delivers pushed records to every open subscription of their group
#[derive(Clone)]
pub struct FakeFeed {
    inner: Arc<FeedInner>,
}

impl FakeFeed {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FeedInner {
                log: Mutex::new(Vec::new()),
                sinks: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                fail_next: AtomicBool::new(false),
            }),
        }
    }

    /// Deliver `record` to open subscriptions of its group. Returns how many received it.
    pub async fn push(&self, record: RatingRecord) -> usize {
        let targets: Vec<mpsc::Sender<RatingRecord>> = self
            .inner
            .sinks
            .lock()
            .iter()
            .filter(|(_, group, _)| group == &record.group_id)
            .map(|(_, _, tx)| tx.clone())
            .collect();
        let mut delivered = 0;
        for tx in targets {
            if tx.send(record.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn fail_next(&self) {
        self.inner.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<FeedEvent> {
        self.inner.log.lock().clone()
    }

    pub fn open_count(&self) -> usize {
        self.inner.sinks.lock().len()
    }
}

#[async_trait]
impl ChangeFeed for FakeFeed {
    async fn subscribe(
        &self,
        group_id: &GroupId,
        sink: mpsc::Sender<RatingRecord>,
    ) -> SourceResult<Box<dyn Subscription>> {
        if self.inner.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SourceError::Feed("subscription rejected".to_string()));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.sinks.lock().push((id, group_id.clone(), sink));
        self.inner.log.lock().push(FeedEvent::Opened(group_id.clone()));
        Ok(Box::new(FakeSubscription { id, group_id: group_id.clone(), inner: self.inner.clone(), closed: false }))
    }
}

struct FakeSubscription {
    id: u64,
    group_id: GroupId,
    inner: Arc<FeedInner>,
    closed: bool,
}

impl Subscription for FakeSubscription {
    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.inner.sinks.lock().retain(|(id, _, _)| *id != self.id);
        self.inner.log.lock().push(FeedEvent::Closed(self.group_id.clone()));
    }
}

/// Presenter that keeps every frame it was handed
#[derive(Default)]
pub struct RecordingPresenter {
    frames: Mutex<Vec<DisplayFrame>>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<DisplayFrame> {
        self.frames.lock().clone()
    }

    pub fn last(&self) -> Option<DisplayFrame> {
        self.frames.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }
}

impl Presenter for RecordingPresenter {
    fn present(&self, frame: DisplayFrame) {
        self.frames.lock().push(frame);
    }
}
