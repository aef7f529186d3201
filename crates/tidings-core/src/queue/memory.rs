//! In-memory broker implementation.
//!
//! All state sits behind one tokio Mutex. Durability comes from the
//! [`Journal`]: a change is appended there first and only applied here once
//! the append succeeded.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use super::{
    Broker, BrokerError, FailDisposition, FileJournal, Journal, JournalEntry, Lease, LeaseInfo,
    NoopJournal, QueueCounts, ScheduleRequest, TaskRecord, TaskState,
};
use crate::domain::{
    DeadTask, Decider, Decision, DefaultDecider, DomainEvent, HandlerError, TaskEnvelope, TaskId,
    TaskKind,
};
use crate::ports::{Clock, EventSink, IdGenerator};

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// How long a consumer may hold a task before it is handed out again.
    pub lease_duration: Duration,
    /// Done/Cancelled records kept for `get`; older ones are dropped.
    /// Dead records are always kept.
    pub finished_retention: usize,
    /// Compact the journal once it holds this many lines beyond the live set.
    pub compact_after: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(30),
            finished_retention: 1024,
            compact_after: 1024,
        }
    }
}

/// Ready order within one kind: due time, then schedule order.
type ReadyKey = (DateTime<Utc>, u64);

struct BrokerState {
    /// All task records (single source of truth).
    records: HashMap<TaskId, TaskRecord>,

    /// Pending tasks per kind (TaskIds only).
    ready: HashMap<TaskKind, BTreeMap<ReadyKey, TaskId>>,

    /// dedupe key -> the Pending task holding it.
    dedupe: HashMap<String, TaskId>,

    in_flight: HashSet<TaskId>,

    /// Done/Cancelled tasks still held in `records`, oldest first.
    finished: VecDeque<TaskId>,
    finished_retention: usize,

    // 件数は process 起動からの累計（古い record を捨てても減らない）
    done_total: usize,
    cancelled_total: usize,

    /// Journal lines written since the last compaction.
    journal_lines: usize,

    next_seq: u64,

    closed: bool,
}

impl BrokerState {
    fn new(finished_retention: usize) -> Self {
        Self {
            records: HashMap::new(),
            ready: HashMap::new(),
            dedupe: HashMap::new(),
            in_flight: HashSet::new(),
            finished: VecDeque::new(),
            finished_retention,
            done_total: 0,
            cancelled_total: 0,
            journal_lines: 0,
            next_seq: 0,
            closed: false,
        }
    }

    fn from_records(records: Vec<TaskRecord>, finished_retention: usize) -> Self {
        let mut state = Self::new(finished_retention);
        state.journal_lines = records.len();
        for record in records {
            state.next_seq = state.next_seq.max(record.seq);
            state.commit(record);
        }
        state
    }

    /// Store `record`, keeping the indexes in step with its state.
    fn commit(&mut self, record: TaskRecord) {
        if let Some(previous) = self.records.remove(&record.task_id) {
            self.unindex(&previous);
        }
        self.index(&record);

        let task_id = record.task_id;
        let finished = match record.state {
            TaskState::Done => {
                self.done_total += 1;
                true
            }
            TaskState::Cancelled => {
                self.cancelled_total += 1;
                true
            }
            _ => false,
        };
        self.records.insert(task_id, record);
        if finished {
            self.finished.push_back(task_id);
            self.retire_finished();
        }
    }

    fn retire_finished(&mut self) {
        while self.finished.len() > self.finished_retention {
            if let Some(oldest) = self.finished.pop_front() {
                self.records.remove(&oldest);
            }
        }
    }

    /// Records the journal has to keep: everything but Done/Cancelled.
    fn live_records(&self) -> Vec<TaskRecord> {
        self.records
            .values()
            .filter(|record| !matches!(record.state, TaskState::Done | TaskState::Cancelled))
            .cloned()
            .collect()
    }

    fn live_len(&self) -> usize {
        self.records.len() - self.finished.len()
    }

    fn unindex(&mut self, record: &TaskRecord) {
        match record.state {
            TaskState::Pending => {
                if let Some(ready) = self.ready.get_mut(&record.kind) {
                    ready.remove(&(record.not_before, record.seq));
                }
                if let Some(key) = &record.dedupe_key
                    && self.dedupe.get(key) == Some(&record.task_id)
                {
                    self.dedupe.remove(key);
                }
            }
            TaskState::InFlight => {
                self.in_flight.remove(&record.task_id);
            }
            _ => {}
        }
    }

    fn index(&mut self, record: &TaskRecord) {
        match record.state {
            TaskState::Pending => {
                self.ready
                    .entry(record.kind)
                    .or_default()
                    .insert((record.not_before, record.seq), record.task_id);
                // first Pending holder keeps the key
                if let Some(key) = &record.dedupe_key {
                    self.dedupe.entry(key.clone()).or_insert(record.task_id);
                }
            }
            TaskState::InFlight => {
                self.in_flight.insert(record.task_id);
            }
            _ => {}
        }
    }

    /// Earliest Pending task of `kind` whose due time has come.
    fn first_due(&self, kind: TaskKind, now: DateTime<Utc>) -> Option<TaskId> {
        let ((not_before, _), task_id) = self.ready.get(&kind)?.iter().next()?;
        (*not_before <= now).then_some(*task_id)
    }

    /// When a task of `kind` may next become leasable: its earliest due time
    /// or the earliest lease of that kind running out.
    fn next_wake(&self, kind: TaskKind) -> Option<DateTime<Utc>> {
        let due = self
            .ready
            .get(&kind)
            .and_then(|ready| ready.keys().next())
            .map(|(not_before, _)| *not_before);
        let expiry = self
            .in_flight
            .iter()
            .filter_map(|id| self.records.get(id))
            .filter(|record| record.kind == kind)
            .filter_map(|record| record.lease.map(|lease| lease.expires_at))
            .min();
        match (due, expiry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn expired_leases(&self, now: DateTime<Utc>) -> Vec<TaskId> {
        self.in_flight
            .iter()
            .filter(|id| {
                self.records
                    .get(id)
                    .and_then(|record| record.lease)
                    .is_some_and(|lease| lease.expires_at <= now)
            })
            .copied()
            .collect()
    }

    fn counts_by_state(&self) -> QueueCounts {
        let mut counts = QueueCounts {
            done: self.done_total,
            cancelled: self.cancelled_total,
            ..QueueCounts::default()
        };
        for record in self.records.values() {
            match record.state {
                TaskState::Pending => counts.pending += 1,
                TaskState::InFlight => counts.in_flight += 1,
                TaskState::Dead => counts.dead += 1,
                TaskState::Done | TaskState::Cancelled => {}
            }
        }
        counts
    }
}

/// `now + d`, saturating at the far end of the calendar.
fn after(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(d)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// In-memory broker with an optional journal behind it.
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    /// One per kind, indexed by `TaskKind as usize`.
    wakers: [Notify; TaskKind::ALL.len()],
    journal: Arc<dyn Journal>,
    decider: Arc<dyn Decider>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    events: Arc<dyn EventSink>,
    settings: BrokerSettings,
}

impl InMemoryBroker {
    /// Memory-only broker with the default decider.
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>, events: Arc<dyn EventSink>) -> Self {
        Self {
            state: Mutex::new(BrokerState::new(BrokerSettings::default().finished_retention)),
            wakers: std::array::from_fn(|_| Notify::new()),
            journal: Arc::new(NoopJournal),
            decider: Arc::new(DefaultDecider::new()),
            clock,
            ids,
            events,
            settings: BrokerSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: BrokerSettings) -> Self {
        let state = self.state.get_mut();
        state.finished_retention = settings.finished_retention;
        state.retire_finished();
        self.settings = settings;
        self
    }

    pub fn with_decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = decider;
        self
    }

    /// Write through `journal` from now on. Existing entries are not read.
    pub fn with_journal(mut self, journal: Arc<dyn Journal>) -> Self {
        self.journal = journal;
        self
    }

    /// Back the broker with a journal file and load what it holds.
    ///
    /// Tasks that were InFlight when the process stopped come back as Pending
    /// with their attempt count kept, so they are delivered again. Done and
    /// Cancelled tasks are dropped and the file is compacted to the rest.
    pub async fn with_file_journal(self, path: impl AsRef<Path>) -> Result<Self, BrokerError> {
        let (journal, records) = FileJournal::open(path).await?;
        self.restore(Arc::new(journal), records).await
    }

    async fn restore(
        mut self,
        journal: Arc<dyn Journal>,
        records: Vec<TaskRecord>,
    ) -> Result<Self, BrokerError> {
        let now = self.clock.now();
        let mut live = Vec::with_capacity(records.len());
        let mut redelivered = 0;
        for mut record in records {
            if record.state == TaskState::InFlight {
                record.restore_after_restart(now);
                redelivered += 1;
            }
            if matches!(record.state, TaskState::Pending | TaskState::Dead) {
                live.push(record);
            }
        }

        journal.compact(&live, now).await?;
        info!(live = live.len(), redelivered, "broker restored from journal");

        self.state = Mutex::new(BrokerState::from_records(
            live,
            self.settings.finished_retention,
        ));
        self.journal = journal;
        Ok(self)
    }

    /// Reclaim every lease that ran out. Each one counts as a failed
    /// attempt. Returns how many were reclaimed.
    pub async fn reap_expired(&self) -> Result<usize, BrokerError> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        self.reap_locked(&mut state, now).await
    }

    fn waker(&self, kind: TaskKind) -> &Notify {
        &self.wakers[kind as usize]
    }

    async fn persist(
        &self,
        state: &mut BrokerState,
        record: &TaskRecord,
        now: DateTime<Utc>,
    ) -> Result<(), BrokerError> {
        self.journal
            .append(&JournalEntry {
                at: now,
                record: record.clone(),
            })
            .await?;
        state.journal_lines += 1;
        Ok(())
    }

    /// Rewrite the journal to the live set once enough dead lines piled up.
    /// A failed compaction is retried on a later call; the journal itself
    /// is still complete.
    async fn compact_if_due(&self, state: &mut BrokerState, now: DateTime<Utc>) {
        if state.journal_lines < state.live_len() + self.settings.compact_after {
            return;
        }
        let live = state.live_records();
        match self.journal.compact(&live, now).await {
            Ok(()) => {
                debug!(lines = state.journal_lines, live = live.len(), "journal compacted");
                state.journal_lines = live.len();
            }
            Err(e) => warn!(error = %e, "journal compaction failed"),
        }
    }

    async fn reap_locked(
        &self,
        state: &mut BrokerState,
        now: DateTime<Utc>,
    ) -> Result<usize, BrokerError> {
        let expired = state.expired_leases(now);
        let mut reaped = 0;
        for task_id in expired {
            let Some(current) = state.records.get(&task_id) else {
                continue;
            };
            let mut next = current.clone();
            next.expire_lease(now);
            let event = DomainEvent::LeaseExpired {
                task_id,
                kind: next.kind,
                attempt: next.attempt,
            };
            self.settle_locked(state, next, &HandlerError::transient("lease expired"), now)
                .await?;
            self.events.emit(&event);
            reaped += 1;
        }
        Ok(reaped)
    }

    async fn lease_locked(
        &self,
        state: &mut BrokerState,
        task_id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<Lease, BrokerError> {
        let current = state
            .records
            .get(&task_id)
            .ok_or(BrokerError::TaskNotFound(task_id))?;

        let lease_info = LeaseInfo {
            attempt_id: self.ids.generate_attempt_id(),
            expires_at: after(now, self.settings.lease_duration),
        };
        let mut next = current.clone();
        next.start_attempt(lease_info, now);
        self.persist(state, &next, now).await?;

        debug!(%task_id, kind = %next.kind, attempt = next.attempt, "task leased");
        let lease = Lease::new(next.envelope(), lease_info.attempt_id, lease_info.expires_at);
        state.commit(next);
        Ok(lease)
    }

    /// Apply the decider's answer to a record whose attempt just failed.
    async fn settle_locked(
        &self,
        state: &mut BrokerState,
        mut next: TaskRecord,
        error: &HandlerError,
        now: DateTime<Utc>,
    ) -> Result<FailDisposition, BrokerError> {
        match self.decider.decide(&next, error) {
            Decision::Retry { delay, reason } => {
                let next_run_at = after(now, delay);
                next.schedule_retry(next_run_at, error.to_string(), now);
                self.persist(state, &next, now).await?;

                debug!(task_id = %next.task_id, %reason, "retry decided");
                let event = DomainEvent::RetryScheduled {
                    task_id: next.task_id,
                    kind: next.kind,
                    attempt: next.attempt,
                    next_run_at,
                    error: error.to_string(),
                };
                let kind = next.kind;
                state.commit(next);
                self.events.emit(&event);
                self.waker(kind).notify_one();
                self.compact_if_due(state, now).await;
                Ok(FailDisposition::Retrying { next_run_at })
            }
            Decision::MarkDead { reason } => {
                next.mark_dead(error.to_string(), now);
                self.persist(state, &next, now).await?;

                warn!(task_id = %next.task_id, %reason, "giving up on task");
                let dead = next.to_dead_task();
                state.commit(next);
                self.events.emit(&DomainEvent::TaskDead(dead.clone()));
                self.compact_if_due(state, now).await;
                Ok(FailDisposition::Dead(dead))
            }
        }
    }

    async fn cancel_locked(
        &self,
        state: &mut BrokerState,
        task_id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<bool, BrokerError> {
        let Some(current) = state.records.get(&task_id) else {
            return Ok(false);
        };
        if current.state != TaskState::Pending {
            debug!(%task_id, state = ?current.state, "cancel not honored");
            return Ok(false);
        }

        let mut next = current.clone();
        next.mark_cancelled(now);
        self.persist(state, &next, now).await?;

        let event = DomainEvent::TaskCancelled {
            task_id,
            kind: next.kind,
        };
        state.commit(next);
        self.events.emit(&event);
        self.compact_if_due(state, now).await;
        Ok(true)
    }

    /// A schedule hit the Pending task holding its dedupe key. The task keeps
    /// its id; it moves when the request asks for another due time or payload.
    async fn coalesce_locked(
        &self,
        state: &mut BrokerState,
        task_id: TaskId,
        request: ScheduleRequest,
        not_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<TaskId, BrokerError> {
        let current = state
            .records
            .get(&task_id)
            .ok_or(BrokerError::TaskNotFound(task_id))?;
        // 両方とも既に due なら同じ時刻とみなす
        let same_time = current.not_before == not_before
            || (current.not_before <= now && not_before <= now);
        if !request.move_pending || (same_time && current.payload == request.payload) {
            debug!(%task_id, "coalesced with pending task");
            return Ok(task_id);
        }

        let mut next = current.clone();
        let previous = next.not_before;
        next.reschedule(not_before, request.payload, now);
        self.persist(state, &next, now).await?;

        info!(%task_id, from = %previous, to = %not_before, "pending task moved");
        let kind = next.kind;
        let event = DomainEvent::TaskScheduled {
            task_id,
            kind,
            not_before,
        };
        state.commit(next);
        self.events.emit(&event);
        self.waker(kind).notify_one();
        Ok(task_id)
    }

    /// The leased record, if `lease` still holds it.
    fn leased_record<'a>(
        state: &'a BrokerState,
        lease: &Lease,
    ) -> Result<&'a TaskRecord, BrokerError> {
        let record = state
            .records
            .get(&lease.task_id())
            .ok_or(BrokerError::TaskNotFound(lease.task_id()))?;
        if !record.is_leased_by(lease.attempt_id()) {
            return Err(BrokerError::LeaseLost {
                task_id: lease.task_id(),
                attempt_id: lease.attempt_id(),
            });
        }
        Ok(record)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn schedule(&self, request: ScheduleRequest) -> Result<TaskId, BrokerError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(BrokerError::Unavailable("broker closed".to_string()));
        }

        let now = self.clock.now();
        let not_before = request
            .not_before
            .unwrap_or_else(|| after(now, request.delay));

        let existing = request
            .dedupe_key
            .as_ref()
            .and_then(|key| state.dedupe.get(key).copied());
        if let Some(existing) = existing {
            return self
                .coalesce_locked(&mut state, existing, request, not_before, now)
                .await;
        }

        let task_id = self.ids.generate_task_id();
        let seq = state.next_seq + 1;
        let envelope = TaskEnvelope::new(task_id, request.kind, request.payload, not_before);
        let record = TaskRecord::new(envelope, request.retry, request.dedupe_key, seq, now);
        self.persist(&mut state, &record, now).await?;

        let event = DomainEvent::TaskScheduled {
            task_id,
            kind: record.kind,
            not_before: record.not_before,
        };
        state.next_seq = seq;
        state.commit(record);
        drop(state);

        self.events.emit(&event);
        self.waker(request.kind).notify_one();
        Ok(task_id)
    }

    async fn consume(&self, kind: TaskKind, wait: Duration) -> Result<Option<Lease>, BrokerError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let next_wake = {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(BrokerError::Closed);
                }
                let now = self.clock.now();
                self.reap_locked(&mut state, now).await?;
                if let Some(task_id) = state.first_due(kind, now) {
                    return self.lease_locked(&mut state, task_id, now).await.map(Some);
                }
                state.next_wake(kind)
            };

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let until_wake = next_wake
                .map(|at| (at - self.clock.now()).to_std().unwrap_or(Duration::ZERO))
                .unwrap_or(remaining);

            // Wait for schedule/retry/close OR the next due time
            tokio::select! {
                _ = self.waker(kind).notified() => {}
                _ = tokio::time::sleep(remaining.min(until_wake)) => {}
            }
        }
    }

    async fn ack(&self, lease: &Lease) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        let mut next = Self::leased_record(&state, lease)?.clone();
        next.mark_done(now);
        self.persist(&mut state, &next, now).await?;

        let event = DomainEvent::TaskCompleted {
            task_id: next.task_id,
            kind: next.kind,
            attempts: next.attempt,
        };
        state.commit(next);
        self.events.emit(&event);
        self.compact_if_due(&mut state, now).await;
        Ok(())
    }

    async fn fail(
        &self,
        lease: &Lease,
        error: &HandlerError,
    ) -> Result<FailDisposition, BrokerError> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        let next = Self::leased_record(&state, lease)?.clone();
        self.settle_locked(&mut state, next, error, now).await
    }

    async fn cancel(&self, task_id: TaskId) -> Result<bool, BrokerError> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        self.cancel_locked(&mut state, task_id, now).await
    }

    async fn cancel_key(&self, dedupe_key: &str) -> Result<bool, BrokerError> {
        let mut state = self.state.lock().await;
        let Some(task_id) = state.dedupe.get(dedupe_key).copied() else {
            return Ok(false);
        };
        let now = self.clock.now();
        self.cancel_locked(&mut state, task_id, now).await
    }

    async fn get(&self, task_id: TaskId) -> Result<Option<TaskRecord>, BrokerError> {
        let state = self.state.lock().await;
        Ok(state.records.get(&task_id).cloned())
    }

    async fn counts_by_state(&self) -> Result<QueueCounts, BrokerError> {
        let state = self.state.lock().await;
        Ok(state.counts_by_state())
    }

    async fn dead_tasks(&self) -> Result<Vec<DeadTask>, BrokerError> {
        let state = self.state.lock().await;
        let mut dead: Vec<DeadTask> = state
            .records
            .values()
            .filter(|record| record.state == TaskState::Dead)
            .map(TaskRecord::to_dead_task)
            .collect();
        dead.sort_by_key(|d| d.died_at);
        Ok(dead)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Ok(());
            }
            state.closed = true;
        }
        info!("broker closed");
        for waker in &self.wakers {
            waker.notify_waiters();
        }
        Ok(())
    }
}
