//! CheckInWorkflow - 遅延確認ワークフロー本体
//!
//! # 流れ
//! 1. `start`: 作成シグナルを受け取り、deadline を計算して `Waiting` で永続化
//!    （idempotency key による create-if-absent。二重配送は無視）
//! 2. `advance`: 実行可能なステップをすべて進め、次に動くべき時刻を返す
//!    - Waiting + deadline 経過 → タスクを読んで結果を記録（Checked）
//!    - Checked → 結果に従って通知（NotificationSent）または抑止（Suppressed）
//!    - NotificationSent / Suppressed → Complete
//!
//! # 永続化の規則
//! - 遷移ごとに invocation store へ書く。書けるまで次の副作用に進まない
//! - 再実行時は記録済みの結果を使う（check を二度しない、通知を二度しない）
//! - 失敗はフェーズを動かさず、試行回数とバックオフだけを記録する
//! - 通知の前に claim を書く。claim の書き込みで競合した driver は送らない
//!   （claim 後にクラッシュした場合だけ、期限切れ後に再送される）

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::status::InvocationStatus;
use crate::domain::{
    CheckResult, Decision, DomainEvent, HaltReason, InvocationRecord, MissingTaskPolicy,
    Notification, Phase, RetryPolicy, Step, StoreError, TaskCreated, TaskId, WorkflowError,
    decide,
};
use crate::observability::PhaseCounts;
use crate::ports::{
    Clock, EventSink, IdGenerator, InsertOutcome, InvocationStore, Notifier, TaskStore,
};

/// Knobs of the workflow that come from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSettings {
    /// Where reminders go.
    pub recipient: String,
    pub check_retry: RetryPolicy,
    pub notify_retry: RetryPolicy,
    pub missing_task: MissingTaskPolicy,
    /// How long a notify claim keeps other drivers away. Must outlast one send.
    pub notify_claim: chrono::Duration,
}

impl WorkflowSettings {
    pub fn new(recipient: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            check_retry: RetryPolicy::default(),
            notify_retry: RetryPolicy::default(),
            missing_task: MissingTaskPolicy::default(),
            notify_claim: chrono::Duration::minutes(5),
        }
    }

    fn retry_policy(&self, step: Step) -> &RetryPolicy {
        match step {
            Step::Check => &self.check_retry,
            Step::Notify => &self.notify_retry,
        }
    }
}

/// Result of delivering a creation signal.
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Started(InvocationRecord),
    /// An invocation for this task already existed; it is returned untouched.
    DuplicateIgnored(InvocationRecord),
}

impl StartOutcome {
    pub fn record(&self) -> &InvocationRecord {
        match self {
            StartOutcome::Started(r) | StartOutcome::DuplicateIgnored(r) => r,
        }
    }
}

/// Where an invocation stands after `advance`.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    /// Nothing more can happen before this instant.
    WaitUntil(DateTime<Utc>),
    Completed,
    /// Stuck until an operator calls `resume`.
    Halted(HaltReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResumeOutcome {
    Resumed(InvocationRecord),
    NotHalted(InvocationRecord),
}

pub struct CheckInWorkflow {
    tasks: Arc<dyn TaskStore>,
    invocations: Arc<dyn InvocationStore>,
    notifier: Arc<dyn Notifier>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    settings: WorkflowSettings,
}

impl CheckInWorkflow {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        invocations: Arc<dyn InvocationStore>,
        notifier: Arc<dyn Notifier>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            tasks,
            invocations,
            notifier,
            events,
            clock,
            ids,
            settings,
        }
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// Consume a creation signal.
    ///
    /// An invalid delay is rejected before anything is persisted.
    pub async fn start(&self, signal: &TaskCreated) -> Result<StartOutcome, WorkflowError> {
        let now = self.clock.now();
        let record = match InvocationRecord::start(self.ids.generate_invocation_id(), signal, now)
        {
            Ok(record) => record,
            Err(err) => {
                self.events.emit(&DomainEvent::StartRejected {
                    task_id: signal.task_id,
                    reason: err.to_string(),
                });
                return Err(err.into());
            }
        };

        match self.invocations.insert_if_absent(record).await? {
            InsertOutcome::Inserted(record) => {
                info!(
                    task_id = %record.task_id,
                    invocation_id = %record.invocation_id,
                    wait = %record.wait,
                    deadline = %record.deadline,
                    "check-in scheduled"
                );
                self.events.emit(&DomainEvent::InvocationStarted {
                    task_id: record.task_id,
                    invocation_id: record.invocation_id,
                    deadline: record.deadline,
                });
                Ok(StartOutcome::Started(record))
            }
            InsertOutcome::AlreadyExists(record) => {
                debug!(task_id = %record.task_id, "duplicate creation signal ignored");
                self.events.emit(&DomainEvent::DuplicateInvocationIgnored {
                    task_id: record.task_id,
                });
                Ok(StartOutcome::DuplicateIgnored(record))
            }
        }
    }

    /// Run every step that is due now and report when to come back.
    pub async fn advance(&self, task_id: TaskId) -> Result<Progress, WorkflowError> {
        let mut record = self.load(task_id).await?;

        loop {
            if record.is_complete() {
                return Ok(Progress::Completed);
            }
            if let Some(halt) = &record.halt {
                return Ok(Progress::Halted(halt.clone()));
            }

            let now = self.clock.now();
            if let Some(at) = record.next_run_at().filter(|at| *at > now) {
                return Ok(Progress::WaitUntil(at));
            }

            match self.step(&mut record, now).await {
                Ok(()) => {}
                Err(err) if err.is_conflict() => {
                    debug!(%task_id, "invocation changed underneath; reloading");
                    record = self.load(task_id).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Clear a halt so the stuck step gets a fresh attempt budget.
    pub async fn resume(&self, task_id: TaskId) -> Result<ResumeOutcome, WorkflowError> {
        let mut record = self.load(task_id).await?;
        if !record.clear_halt(self.clock.now()) {
            return Ok(ResumeOutcome::NotHalted(record));
        }
        self.invocations.update(&mut record).await?;

        info!(%task_id, phase = %record.phase, "check-in resumed");
        self.events.emit(&DomainEvent::Resumed { task_id });
        Ok(ResumeOutcome::Resumed(record))
    }

    pub async fn status(&self, task_id: TaskId) -> Result<Option<InvocationStatus>, WorkflowError> {
        Ok(self
            .invocations
            .get(task_id)
            .await?
            .as_ref()
            .map(InvocationStatus::from))
    }

    pub async fn list(&self) -> Result<Vec<InvocationStatus>, WorkflowError> {
        let records = self.invocations.list().await?;
        Ok(records.iter().map(InvocationStatus::from).collect())
    }

    pub async fn counts(&self) -> Result<PhaseCounts, WorkflowError> {
        let records = self.invocations.list().await?;
        Ok(PhaseCounts::tally(&records))
    }

    /// Invocations waiting for an operator.
    pub async fn halted(&self) -> Result<Vec<InvocationStatus>, WorkflowError> {
        let records = self.invocations.list_incomplete().await?;
        Ok(records
            .iter()
            .filter(|r| r.is_halted())
            .map(InvocationStatus::from)
            .collect())
    }

    /// Non-complete invocations the runner should drive.
    pub async fn runnable(&self) -> Result<Vec<InvocationRecord>, WorkflowError> {
        let mut records = self.invocations.list_incomplete().await?;
        records.retain(|r| !r.is_halted());
        Ok(records)
    }

    async fn load(&self, task_id: TaskId) -> Result<InvocationRecord, WorkflowError> {
        self.invocations
            .get(task_id)
            .await?
            .ok_or(WorkflowError::InvocationNotFound(task_id))
    }

    async fn step(
        &self,
        record: &mut InvocationRecord,
        now: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        match record.phase {
            Phase::Waiting => self.check(record, now).await,
            Phase::Checked => self.notify_or_suppress(record, now).await,
            Phase::NotificationSent | Phase::Suppressed => {
                record.mark_complete(now)?;
                self.invocations.update(record).await?;
                info!(task_id = %record.task_id, "check-in complete");
                self.events.emit(&DomainEvent::Completed {
                    task_id: record.task_id,
                });
                Ok(())
            }
            Phase::Complete => Ok(()),
        }
    }

    async fn check(
        &self,
        record: &mut InvocationRecord,
        now: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        let task = match self.tasks.get(record.task_id).await {
            Ok(task) => task,
            Err(err) => {
                let transient = err.is_transient();
                return self
                    .fail_step(record, Step::Check, err.to_string(), transient, now)
                    .await;
            }
        };

        let result = match task {
            None => CheckResult::Missing,
            Some(task) if task.done => CheckResult::Done,
            Some(_) => CheckResult::NotDone,
        };
        record.record_check(result, now)?;
        self.invocations.update(record).await?;

        info!(task_id = %record.task_id, ?result, "task checked");
        self.events.emit(&DomainEvent::Checked {
            task_id: record.task_id,
            result,
        });
        Ok(())
    }

    async fn notify_or_suppress(
        &self,
        record: &mut InvocationRecord,
        now: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        let Some(result) = record.check else {
            return Err(StoreError::Corrupt(format!("{} is checked without a result", record.key)).into());
        };

        if !result.requires_reminder(self.settings.missing_task) {
            record.mark_suppressed(now)?;
            self.invocations.update(record).await?;
            info!(task_id = %record.task_id, ?result, "reminder suppressed");
            self.events.emit(&DomainEvent::Suppressed {
                task_id: record.task_id,
                result,
            });
            return Ok(());
        }

        let claimed_until = now
            .checked_add_signed(self.settings.notify_claim)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        record.claim_notify(claimed_until, now)?;
        self.invocations.update(record).await?;
        debug!(task_id = %record.task_id, %claimed_until, "notify claimed");

        let notification =
            Notification::reminder(&self.settings.recipient, &record.title, &record.key);
        if let Err(err) = self.notifier.send(&notification).await {
            let transient = err.is_transient();
            return self
                .fail_step(record, Step::Notify, err.to_string(), transient, self.clock.now())
                .await;
        }

        record.mark_notified(self.clock.now())?;
        self.invocations.update(record).await?;
        info!(task_id = %record.task_id, recipient = %self.settings.recipient, "reminder sent");
        self.events.emit(&DomainEvent::NotificationSent {
            task_id: record.task_id,
        });
        Ok(())
    }

    async fn fail_step(
        &self,
        record: &mut InvocationRecord,
        step: Step,
        reason: String,
        transient: bool,
        now: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        let attempts = record.record_failure(step, reason.clone(), now);
        let decision = decide(self.settings.retry_policy(step), attempts, transient);
        record.apply_decision(step, &decision, now);
        self.invocations.update(record).await?;

        let task_id = record.task_id;
        match (&decision, &record.halt) {
            (Decision::Retry { delay, .. }, _) => {
                warn!(%task_id, ?step, attempts, ?delay, error = %reason, "step failed; retrying");
                self.events.emit(&DomainEvent::RetryScheduled {
                    task_id,
                    attempts,
                    reason,
                });
            }
            (Decision::Halt { reason: why }, Some(halt)) => {
                error!(%task_id, ?step, attempts, error = %reason, "{why}; check-in halted");
                self.events.emit(&DomainEvent::Halted {
                    task_id,
                    reason: halt.clone(),
                });
            }
            (Decision::Halt { .. }, None) => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NotifyError, Task};
    use crate::impls::{
        InMemoryInvocationStore, InMemoryTaskStore, MemoryEventSink, RecordingNotifier,
    };
    use crate::ports::{ManualClock, UlidGenerator};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicU32, Ordering};

    const ME: &str = "me@example.com";

    /// Task store that fails `get` a set number of times before delegating.
    struct FlakyTaskStore {
        inner: InMemoryTaskStore,
        failures_left: AtomicU32,
        error: StoreError,
    }

    #[async_trait]
    impl TaskStore for FlakyTaskStore {
        async fn insert(&self, task: &Task) -> Result<(), StoreError> {
            self.inner.insert(task).await
        }

        async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(self.error.clone());
            }
            self.inner.get(id).await
        }

        async fn mark_done(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
            self.inner.mark_done(id).await
        }

        async fn list(&self) -> Result<Vec<Task>, StoreError> {
            self.inner.list().await
        }
    }

    struct Harness {
        clock: ManualClock,
        tasks: InMemoryTaskStore,
        invocations: InMemoryInvocationStore,
        notifier: RecordingNotifier,
        events: MemoryEventSink,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                clock: ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()),
                tasks: InMemoryTaskStore::new(),
                invocations: InMemoryInvocationStore::new(),
                notifier: RecordingNotifier::new(),
                events: MemoryEventSink::new(),
            }
        }

        fn workflow_with(&self, tasks: Arc<dyn TaskStore>, settings: WorkflowSettings) -> CheckInWorkflow {
            CheckInWorkflow::new(
                tasks,
                Arc::new(self.invocations.clone()),
                Arc::new(self.notifier.clone()),
                Arc::new(self.events.clone()),
                Arc::new(self.clock.clone()),
                Arc::new(UlidGenerator::new(self.clock.clone())),
                settings,
            )
        }

        /// A fresh workflow over the same stores, like a restarted process.
        fn workflow(&self) -> CheckInWorkflow {
            self.workflow_with(Arc::new(self.tasks.clone()), WorkflowSettings::new(ME))
        }

        async fn task(&self, title: &str, hours: f64) -> Task {
            let task = Task::new(
                TaskId::from_ulid(ulid::Ulid::new()),
                title,
                hours,
                self.clock.now(),
            );
            self.tasks.insert(&task).await.unwrap();
            task
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            base_delay: std::time::Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: std::time::Duration::from_secs(60),
            max_attempts,
        }
    }

    #[tokio::test]
    async fn duplicate_signal_creates_one_invocation_and_one_reminder() {
        let h = Harness::new();
        let wf = h.workflow();
        let task = h.task("write tests", 0.0).await;
        let signal = task.created_signal();

        let first = wf.start(&signal).await.unwrap();
        let second = wf.start(&signal).await.unwrap();
        assert!(matches!(first, StartOutcome::Started(_)));
        assert!(matches!(second, StartOutcome::DuplicateIgnored(_)));
        assert_eq!(first.record().invocation_id, second.record().invocation_id);

        assert_eq!(wf.advance(task.id).await.unwrap(), Progress::Completed);
        assert_eq!(wf.start(&signal).await.unwrap().record().phase, Phase::Complete);
        assert_eq!(wf.advance(task.id).await.unwrap(), Progress::Completed);

        assert_eq!(h.notifier.sent().len(), 1);
        assert_eq!(h.invocations.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn waiting_survives_restart_and_resumes_after_deadline() {
        let h = Harness::new();
        let task = h.task("call the bank", 1.0).await;

        {
            let wf = h.workflow();
            wf.start(&task.created_signal()).await.unwrap();
            let deadline = h.clock.now() + Duration::hours(1);
            assert_eq!(wf.advance(task.id).await.unwrap(), Progress::WaitUntil(deadline));
        }

        h.clock.advance(Duration::minutes(61));
        let restarted = h.workflow();
        assert_eq!(restarted.advance(task.id).await.unwrap(), Progress::Completed);

        let rec = h.invocations.get(task.id).await.unwrap().unwrap();
        assert_eq!(rec.check, Some(CheckResult::NotDone));
        assert_eq!(rec.deadline, task.created_at + Duration::hours(1));
        assert_eq!(h.notifier.sent().len(), 1);

        let checks = h
            .events
            .events()
            .iter()
            .filter(|e| matches!(e, DomainEvent::Checked { .. }))
            .count();
        assert_eq!(checks, 1);
    }

    #[tokio::test]
    async fn restart_after_check_reuses_recorded_result() {
        let h = Harness::new();
        let task = h.task("renew license", 0.0).await;
        let wf = h.workflow();
        wf.start(&task.created_signal()).await.unwrap();

        // Notifier down: check is recorded as NotDone, notify keeps failing.
        h.notifier
            .fail_next([NotifyError::Transient("connection refused".into())]);
        let progress = wf.advance(task.id).await.unwrap();
        assert_eq!(progress, Progress::WaitUntil(h.clock.now() + Duration::seconds(2)));

        // User finishes the task meanwhile; the recorded result still stands.
        h.tasks.mark_done(task.id).await.unwrap();
        h.clock.advance(Duration::seconds(2));

        let restarted = h.workflow();
        assert_eq!(restarted.advance(task.id).await.unwrap(), Progress::Completed);
        assert_eq!(h.notifier.sent().len(), 1);
        let rec = h.invocations.get(task.id).await.unwrap().unwrap();
        assert_eq!(rec.check, Some(CheckResult::NotDone));
        assert!(rec.notified_at.is_some());
    }

    #[tokio::test]
    async fn done_before_deadline_suppresses_reminder() {
        let h = Harness::new();
        let wf = h.workflow();
        let task = h.task("stretch", 0.033).await;
        wf.start(&task.created_signal()).await.unwrap();

        h.clock.advance(Duration::minutes(1));
        assert!(matches!(wf.advance(task.id).await.unwrap(), Progress::WaitUntil(_)));
        h.tasks.mark_done(task.id).await.unwrap();

        h.clock.advance(Duration::minutes(1));
        assert_eq!(wf.advance(task.id).await.unwrap(), Progress::Completed);

        assert!(h.notifier.sent().is_empty());
        let rec = h.invocations.get(task.id).await.unwrap().unwrap();
        assert_eq!(rec.check, Some(CheckResult::Done));
        assert_eq!(rec.phase, Phase::Complete);
        assert!(h.events.events().contains(&DomainEvent::Suppressed {
            task_id: task.id,
            result: CheckResult::Done,
        }));
    }

    #[tokio::test]
    async fn undone_task_gets_exactly_one_reminder() {
        let h = Harness::new();
        let wf = h.workflow();
        let task = h.task("finish quarterly report", 0.033).await;
        wf.start(&task.created_signal()).await.unwrap();

        h.clock.advance(Duration::minutes(2));
        assert_eq!(wf.advance(task.id).await.unwrap(), Progress::Completed);
        assert_eq!(wf.advance(task.id).await.unwrap(), Progress::Completed);

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, ME);
        assert!(sent[0].body.contains("finish quarterly report"));
        assert_eq!(sent[0].idempotency_key, format!("check-in/{}", task.id));
    }

    #[tokio::test]
    async fn zero_delay_checks_immediately() {
        let h = Harness::new();
        let wf = h.workflow();
        let task = h.task("now", 0.0).await;
        let started = wf.start(&task.created_signal()).await.unwrap();
        assert_eq!(started.record().deadline, h.clock.now());

        assert_eq!(wf.advance(task.id).await.unwrap(), Progress::Completed);
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn negative_delay_is_rejected_without_persisting() {
        let h = Harness::new();
        let wf = h.workflow();
        let task = h.task("time travel", -1.0).await;

        let err = wf.start(&task.created_signal()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidDuration(_)));
        assert!(h.invocations.list().await.unwrap().is_empty());
        assert!(matches!(
            h.events.events().as_slice(),
            [DomainEvent::StartRejected { .. }]
        ));
    }

    #[tokio::test]
    async fn transient_store_errors_are_retried_then_check_succeeds() {
        let h = Harness::new();
        let flaky = Arc::new(FlakyTaskStore {
            inner: h.tasks.clone(),
            failures_left: AtomicU32::new(2),
            error: StoreError::Unavailable("timeout".into()),
        });
        let mut settings = WorkflowSettings::new(ME);
        settings.check_retry = fast_retry(5);
        let wf = h.workflow_with(flaky, settings);
        let task = h.task("flaky", 0.0).await;
        wf.start(&task.created_signal()).await.unwrap();

        let now = h.clock.now();
        assert_eq!(wf.advance(task.id).await.unwrap(), Progress::WaitUntil(now + Duration::seconds(1)));
        let rec = h.invocations.get(task.id).await.unwrap().unwrap();
        assert_eq!(rec.phase, Phase::Waiting);
        assert_eq!(rec.check, None);

        h.clock.advance(Duration::seconds(1));
        let now = h.clock.now();
        assert_eq!(wf.advance(task.id).await.unwrap(), Progress::WaitUntil(now + Duration::seconds(2)));

        h.clock.advance(Duration::seconds(2));
        assert_eq!(wf.advance(task.id).await.unwrap(), Progress::Completed);
        let rec = h.invocations.get(task.id).await.unwrap().unwrap();
        assert_eq!(rec.check_attempts, 2);
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_store_stalls_the_invocation_in_waiting() {
        let h = Harness::new();
        let flaky = Arc::new(FlakyTaskStore {
            inner: h.tasks.clone(),
            failures_left: AtomicU32::new(u32::MAX),
            error: StoreError::Unavailable("connection refused".into()),
        });
        let mut settings = WorkflowSettings::new(ME);
        settings.check_retry = fast_retry(3);
        let wf = h.workflow_with(flaky, settings);
        let task = h.task("never checked", 0.0).await;
        wf.start(&task.created_signal()).await.unwrap();

        let progress = loop {
            match wf.advance(task.id).await.unwrap() {
                Progress::WaitUntil(at) => h.clock.set(at),
                other => break other,
            }
        };

        let reason = match progress {
            Progress::Halted(reason) => reason,
            other => panic!("expected halt, got {other:?}"),
        };
        assert!(matches!(reason, HaltReason::WorkflowStalled { attempts: 3, .. }));
        let err = WorkflowError::halted(task.id, &reason);
        assert!(matches!(err, WorkflowError::WorkflowStalled { .. }));

        let rec = h.invocations.get(task.id).await.unwrap().unwrap();
        assert_eq!(rec.phase, Phase::Waiting);
        assert!(!rec.is_complete());
        assert_eq!(wf.halted().await.unwrap().len(), 1);
        assert!(wf.runnable().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn notifier_exhaustion_halts_and_resume_retries() {
        let h = Harness::new();
        let mut settings = WorkflowSettings::new(ME);
        settings.notify_retry = fast_retry(2);
        let wf = h.workflow_with(Arc::new(h.tasks.clone()), settings);
        let task = h.task("email landlord", 0.0).await;
        wf.start(&task.created_signal()).await.unwrap();

        h.notifier.fail_next([
            NotifyError::Transient("timeout".into()),
            NotifyError::Transient("timeout".into()),
        ]);
        let Progress::WaitUntil(at) = wf.advance(task.id).await.unwrap() else {
            panic!("expected a retry");
        };
        h.clock.set(at);
        let progress = wf.advance(task.id).await.unwrap();
        assert!(matches!(
            progress,
            Progress::Halted(HaltReason::NotificationFailed { attempts: 2, .. })
        ));

        let rec = h.invocations.get(task.id).await.unwrap().unwrap();
        assert_eq!(rec.phase, Phase::Checked);
        assert!(h.notifier.sent().is_empty());
        assert_eq!(wf.counts().await.unwrap().halted, 1);

        assert!(matches!(
            wf.resume(task.id).await.unwrap(),
            ResumeOutcome::Resumed(_)
        ));
        assert_eq!(wf.advance(task.id).await.unwrap(), Progress::Completed);
        assert_eq!(h.notifier.sent().len(), 1);
        assert!(matches!(
            wf.resume(task.id).await.unwrap(),
            ResumeOutcome::NotHalted(_)
        ));
    }

    #[tokio::test]
    async fn rejected_notification_halts_immediately() {
        let h = Harness::new();
        let wf = h.workflow();
        let task = h.task("bad address", 0.0).await;
        wf.start(&task.created_signal()).await.unwrap();

        h.notifier
            .fail_next([NotifyError::Rejected("invalid recipient".into())]);
        let progress = wf.advance(task.id).await.unwrap();
        assert!(matches!(
            progress,
            Progress::Halted(HaltReason::NotificationFailed { attempts: 1, .. })
        ));
        assert!(h
            .events
            .events()
            .iter()
            .any(|e| e.needs_attention()));
    }

    #[tokio::test]
    async fn missing_task_follows_policy() {
        let h = Harness::new();
        let wf = h.workflow();
        let gone = h.task("deleted", 0.0).await;
        wf.start(&gone.created_signal()).await.unwrap();
        h.tasks.remove(gone.id).await;

        assert_eq!(wf.advance(gone.id).await.unwrap(), Progress::Completed);
        assert!(h.notifier.sent().is_empty());
        let rec = h.invocations.get(gone.id).await.unwrap().unwrap();
        assert_eq!(rec.check, Some(CheckResult::Missing));

        let mut settings = WorkflowSettings::new(ME);
        settings.missing_task = MissingTaskPolicy::Notify;
        let notifying = h.workflow_with(Arc::new(h.tasks.clone()), settings);
        let also_gone = h.task("deleted too", 0.0).await;
        notifying.start(&also_gone.created_signal()).await.unwrap();
        h.tasks.remove(also_gone.id).await;

        assert_eq!(notifying.advance(also_gone.id).await.unwrap(), Progress::Completed);
        assert_eq!(h.notifier.sent().len(), 1);
    }

    /// Task store whose first read lets "another process" record the check
    /// on the invocation before the read returns.
    struct RacingTaskStore {
        inner: InMemoryTaskStore,
        invocations: InMemoryInvocationStore,
        raced: AtomicU32,
    }

    #[async_trait]
    impl TaskStore for RacingTaskStore {
        async fn insert(&self, task: &Task) -> Result<(), StoreError> {
            self.inner.insert(task).await
        }

        async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
            if self.raced.fetch_add(1, Ordering::SeqCst) == 0 {
                let mut other = self.invocations.get(id).await?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
                other
                    .record_check(CheckResult::Done, other.deadline)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?;
                self.invocations.update(&mut other).await?;
            }
            self.inner.get(id).await
        }

        async fn mark_done(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
            self.inner.mark_done(id).await
        }

        async fn list(&self) -> Result<Vec<Task>, StoreError> {
            self.inner.list().await
        }
    }

    #[tokio::test]
    async fn advance_picks_up_progress_recorded_elsewhere() {
        let h = Harness::new();
        let wf = h.workflow();
        let task = h.task("race", 0.0).await;
        wf.start(&task.created_signal()).await.unwrap();

        let mut other = h.invocations.get(task.id).await.unwrap().unwrap();
        other.record_check(CheckResult::Done, h.clock.now()).unwrap();
        h.invocations.update(&mut other).await.unwrap();

        assert_eq!(wf.advance(task.id).await.unwrap(), Progress::Completed);
        let rec = h.invocations.get(task.id).await.unwrap().unwrap();
        assert_eq!(rec.check, Some(CheckResult::Done));
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn conflicting_write_reloads_instead_of_overwriting() {
        let h = Harness::new();
        let racing = Arc::new(RacingTaskStore {
            inner: h.tasks.clone(),
            invocations: h.invocations.clone(),
            raced: AtomicU32::new(0),
        });
        let wf = h.workflow_with(racing, WorkflowSettings::new(ME));
        let task = h.task("race", 0.0).await;
        wf.start(&task.created_signal()).await.unwrap();

        // Our own read says NotDone, but the other writer got there first.
        assert_eq!(wf.advance(task.id).await.unwrap(), Progress::Completed);
        let rec = h.invocations.get(task.id).await.unwrap().unwrap();
        assert_eq!(rec.check, Some(CheckResult::Done));
        assert!(h.notifier.sent().is_empty());
    }

    /// Hands the task back to the scheduler after every read, so two drivers
    /// polled together both load the same revision before either writes.
    struct YieldingInvocationStore {
        inner: InMemoryInvocationStore,
    }

    #[async_trait]
    impl InvocationStore for YieldingInvocationStore {
        async fn insert_if_absent(
            &self,
            record: InvocationRecord,
        ) -> Result<InsertOutcome, StoreError> {
            self.inner.insert_if_absent(record).await
        }

        async fn get(&self, task_id: TaskId) -> Result<Option<InvocationRecord>, StoreError> {
            let record = self.inner.get(task_id).await?;
            tokio::task::yield_now().await;
            Ok(record)
        }

        async fn update(&self, record: &mut InvocationRecord) -> Result<(), StoreError> {
            self.inner.update(record).await
        }

        async fn list_incomplete(&self) -> Result<Vec<InvocationRecord>, StoreError> {
            self.inner.list_incomplete().await
        }

        async fn list(&self) -> Result<Vec<InvocationRecord>, StoreError> {
            self.inner.list().await
        }
    }

    /// Holds each send until a second sender arrives (or a short timeout),
    /// so two drivers that both reach the notifier are both let through.
    struct GatedNotifier {
        inner: RecordingNotifier,
        gate: tokio::sync::Barrier,
    }

    #[async_trait]
    impl Notifier for GatedNotifier {
        async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
            let _ = tokio::time::timeout(
                std::time::Duration::from_millis(200),
                self.gate.wait(),
            )
            .await;
            self.inner.send(notification).await
        }
    }

    #[tokio::test]
    async fn concurrent_drivers_send_one_reminder() {
        let h = Harness::new();
        let invocations: Arc<dyn InvocationStore> = Arc::new(YieldingInvocationStore {
            inner: h.invocations.clone(),
        });
        let notifier: Arc<dyn Notifier> = Arc::new(GatedNotifier {
            inner: h.notifier.clone(),
            gate: tokio::sync::Barrier::new(2),
        });
        let driver = || {
            CheckInWorkflow::new(
                Arc::new(h.tasks.clone()),
                Arc::clone(&invocations),
                Arc::clone(&notifier),
                Arc::new(h.events.clone()),
                Arc::new(h.clock.clone()),
                Arc::new(UlidGenerator::new(h.clock.clone())),
                WorkflowSettings::new(ME),
            )
        };
        let (a, b) = (driver(), driver());
        let task = h.task("contended", 0.0).await;
        a.start(&task.created_signal()).await.unwrap();

        let (ra, rb) = tokio::join!(a.advance(task.id), b.advance(task.id));
        let claim_expiry = h.clock.now() + Duration::minutes(5);
        match (ra.unwrap(), rb.unwrap()) {
            (Progress::Completed, Progress::WaitUntil(at))
            | (Progress::WaitUntil(at), Progress::Completed) => assert_eq!(at, claim_expiry),
            other => panic!("expected one winner and one waiter, got {other:?}"),
        }
        assert_eq!(h.notifier.sent().len(), 1);

        // The waiter finds the work done once the claim runs out.
        h.clock.advance(Duration::minutes(5));
        assert_eq!(b.advance(task.id).await.unwrap(), Progress::Completed);
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn abandoned_claim_is_taken_over_after_it_expires() {
        let h = Harness::new();
        let wf = h.workflow();
        let task = h.task("sender crashed", 0.0).await;
        wf.start(&task.created_signal()).await.unwrap();

        // A driver claimed the send and died before recording it.
        let mut rec = h.invocations.get(task.id).await.unwrap().unwrap();
        let now = h.clock.now();
        rec.record_check(CheckResult::NotDone, now).unwrap();
        rec.claim_notify(now + Duration::minutes(5), now).unwrap();
        h.invocations.update(&mut rec).await.unwrap();

        assert_eq!(
            wf.advance(task.id).await.unwrap(),
            Progress::WaitUntil(now + Duration::minutes(5))
        );
        assert!(h.notifier.sent().is_empty());

        h.clock.advance(Duration::minutes(5));
        assert_eq!(wf.advance(task.id).await.unwrap(), Progress::Completed);
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let h = Harness::new();
        let wf = h.workflow();
        let id = TaskId::from_ulid(ulid::Ulid::new());
        assert!(matches!(
            wf.advance(id).await,
            Err(WorkflowError::InvocationNotFound(missing)) if missing == id
        ));
        assert_eq!(wf.status(id).await.unwrap(), None);
    }
}
