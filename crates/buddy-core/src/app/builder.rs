//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）：設定不備・DB が開けない・送信元が不正、は build() で落とす
//! - 差し替え可能な ports（テストではインメモリ実装を注入）

use std::sync::Arc;

use tracing::{info, warn};

use super::runner::WorkflowRunner;
use super::workflow::{CheckInWorkflow, StartOutcome, WorkflowSettings};
use crate::config::{BuddyConfig, ConfigError};
use crate::domain::{NotifyError, StoreError, Task, TaskId, WaitSpec, WorkflowError};
use crate::impls::{LogNotifier, SmtpNotifier, SqliteStore, TracingEventSink};
use crate::ports::{
    Clock, EventSink, IdGenerator, InvocationStore, Notifier, SystemClock, TaskStore,
    UlidGenerator,
};

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot open store: {0}")]
    Store(#[from] StoreError),

    #[error("cannot set up notifier: {0}")]
    Notifier(#[from] NotifyError),
}

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(BuddyConfig::load(None)?).build()?;
/// let (task, _) = app.create_task("write report", 0.5).await?;
/// ```
///
/// 明示的に渡されなかった port は設定から作ります：
/// - ストア: `database_path` の SqliteStore（タスクと invocation で共有）
/// - 通知: `smtp` があれば SmtpNotifier、なければ LogNotifier
pub struct AppBuilder {
    config: BuddyConfig,
    clock: Option<Arc<dyn Clock>>,
    stores: Option<(Arc<dyn TaskStore>, Arc<dyn InvocationStore>)>,
    notifier: Option<Arc<dyn Notifier>>,
    events: Option<Arc<dyn EventSink>>,
}

impl AppBuilder {
    pub fn new(config: BuddyConfig) -> Self {
        Self {
            config,
            clock: None,
            stores: None,
            notifier: None,
            events: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_stores(
        mut self,
        tasks: Arc<dyn TaskStore>,
        invocations: Arc<dyn InvocationStore>,
    ) -> Self {
        self.stores = Some((tasks, invocations));
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// 検証してから組み立てる
    pub fn build(self) -> Result<App, BuildError> {
        self.config.validate()?;
        let config = self.config;

        let (tasks, invocations) = match self.stores {
            Some(stores) => stores,
            None => {
                let store = Arc::new(SqliteStore::open(&config.database_path)?);
                info!(path = %config.database_path.display(), "opened store");
                (
                    Arc::clone(&store) as Arc<dyn TaskStore>,
                    store as Arc<dyn InvocationStore>,
                )
            }
        };

        let notifier: Arc<dyn Notifier> = match (self.notifier, &config.smtp) {
            (Some(notifier), _) => notifier,
            (None, Some(smtp)) => {
                let sender = config.sender.as_deref().unwrap_or_default();
                Arc::new(SmtpNotifier::new(smtp, sender)?)
            }
            (None, None) => {
                warn!("no smtp configured; reminders will only be logged");
                Arc::new(LogNotifier)
            }
        };

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        let events = self.events.unwrap_or_else(|| Arc::new(TracingEventSink));

        let settings = WorkflowSettings {
            recipient: config.recipient.clone().unwrap_or_default(),
            check_retry: config.check_retry.clone(),
            notify_retry: config.notify_retry.clone(),
            missing_task: config.missing_task,
            notify_claim: config.notify_claim(),
        };
        let workflow = CheckInWorkflow::new(
            Arc::clone(&tasks),
            invocations,
            notifier,
            events,
            Arc::clone(&clock),
            Arc::clone(&ids),
            settings,
        );

        Ok(App {
            config,
            tasks,
            clock,
            ids,
            workflow: Arc::new(workflow),
        })
    }
}

/// App はアプリケーションのランタイム
///
/// タスクの作成（= シグナル発行）と完了、ワークフローと runner への入口を持ちます。
pub struct App {
    config: BuddyConfig,
    tasks: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    workflow: Arc<CheckInWorkflow>,
}

impl App {
    pub fn config(&self) -> &BuddyConfig {
        &self.config
    }

    pub fn workflow(&self) -> &Arc<CheckInWorkflow> {
        &self.workflow
    }

    pub fn runner(&self) -> WorkflowRunner {
        WorkflowRunner::new(
            Arc::clone(&self.workflow),
            Arc::clone(&self.clock),
            self.config.runner.clone(),
        )
    }

    /// Create a task and deliver its creation signal.
    ///
    /// A delay the encoder refuses is rejected before the task is stored.
    pub async fn create_task(
        &self,
        title: &str,
        check_in_hours: f64,
    ) -> Result<(Task, StartOutcome), WorkflowError> {
        WaitSpec::from_hours(check_in_hours)?;

        let task = Task::new(
            self.ids.generate_task_id(),
            title.trim(),
            check_in_hours,
            self.clock.now(),
        );
        self.tasks.insert(&task).await?;
        info!(task_id = %task.id, title = %task.title, "task created");

        let outcome = self.workflow.start(&task.created_signal()).await?;
        Ok((task, outcome))
    }

    pub async fn mark_done(&self, task_id: TaskId) -> Result<Option<Task>, WorkflowError> {
        let task = self.tasks.mark_done(task_id).await?;
        if task.is_some() {
            info!(%task_id, "task marked done");
        }
        Ok(task)
    }

    pub async fn tasks(&self) -> Result<Vec<Task>, WorkflowError> {
        Ok(self.tasks.list().await?)
    }

    /// Tasks created on the current UTC calendar day, newest first.
    pub async fn tasks_today(&self) -> Result<Vec<Task>, WorkflowError> {
        let today = self.clock.now().date_naive();
        let mut tasks = self.tasks.list().await?;
        tasks.retain(|task| task.created_at.date_naive() == today);
        Ok(tasks)
    }

    /// Deliver the creation signal again for every task that has no invocation.
    ///
    /// Covers a crash between storing a task and starting its check-in.
    /// Tasks that already have one are ignored by the idempotent start.
    pub async fn redeliver_signals(&self) -> Result<usize, WorkflowError> {
        let mut started = 0;
        for task in self.tasks.list().await? {
            if self.workflow.status(task.id).await?.is_some() {
                continue;
            }
            match self.workflow.start(&task.created_signal()).await {
                Ok(StartOutcome::Started(_)) => started += 1,
                Ok(StartOutcome::DuplicateIgnored(_)) => {}
                Err(WorkflowError::InvalidDuration(err)) => {
                    warn!(task_id = %task.id, error = %err, "task has an invalid delay; skipped");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(started)
    }
}
