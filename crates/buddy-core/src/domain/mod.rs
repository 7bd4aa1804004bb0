//! Domain model (IDs, delay encoding, tasks, invocation records, errors, ...).
//!
//! ここには I/O を含めません。時刻は常に引数で受け取ります。

pub mod decision;
pub mod duration;
pub mod errors;
pub mod events;
pub mod ids;
pub mod invocation;
pub mod reminder;
pub mod retry;
pub mod signal;
pub mod state;
pub mod task;

pub use self::decision::{Decision, decide};
pub use self::duration::{InvalidDurationError, WaitSpec, WaitUnit};
pub use self::errors::{ErrorKind, IllegalTransition, NotifyError, StoreError, WorkflowError};
pub use self::events::DomainEvent;
pub use self::ids::{InvocationId, TaskId};
pub use self::invocation::{InvocationRecord, Step};
pub use self::reminder::Notification;
pub use self::retry::RetryPolicy;
pub use self::signal::{IdempotencyKey, TaskCreated};
pub use self::state::{CheckResult, HaltReason, MissingTaskPolicy, Phase};
pub use self::task::Task;
