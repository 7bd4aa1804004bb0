//! Errors - エラー型と分類
//!
//! # 分類
//! - Transient: 一時的なエラー（リトライ推奨）
//! - Permanent: 恒久的なエラー（リトライ無意味）
//! - Infrastructure: インフラエラー（invocation store の障害）
//!
//! store / notifier の一時エラーはワークフロー内部でリトライされ、
//! この crate の外には出ません。外に出るのは起動拒否と停止（halt）の報告だけです。

use thiserror::Error;

use super::TaskId;
use super::duration::InvalidDurationError;
use super::state::{HaltReason, Phase};

/// ErrorKind は実行エラーの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// A phase change the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal phase transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: Phase,
    pub to: Phase,
}

/// Task store / invocation store failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store could not be reached or timed out. Retriable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Optimistic-concurrency check failed: someone else updated the record.
    #[error("revision conflict on {key}: expected {expected}, found {found}")]
    Conflict {
        key: String,
        expected: u64,
        found: u64,
    },

    #[error("record not found: {0}")]
    NotFound(String),

    /// Stored data could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Unavailable(_) => ErrorKind::Transient,
            StoreError::Conflict { .. } => ErrorKind::Transient,
            StoreError::NotFound(_) => ErrorKind::Permanent,
            StoreError::Corrupt(_) => ErrorKind::Infrastructure,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Notification transport failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    /// Timeout, connection refused, 5xx. Retriable.
    #[error("transient notify failure: {0}")]
    Transient(String),

    /// Malformed address, auth rejected, 4xx. Retrying will not help.
    #[error("notification rejected: {0}")]
    Rejected(String),
}

impl NotifyError {
    pub fn is_transient(&self) -> bool {
        matches!(self, NotifyError::Transient(_))
    }
}

/// Errors surfaced by the check-in workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Rejects invocation start; nothing was persisted.
    #[error(transparent)]
    InvalidDuration(#[from] InvalidDurationError),

    /// Check step exhausted its budget; invocation left in `Waiting`.
    #[error("check-in for {task_id} stalled after {attempts} attempts: {last_error}")]
    WorkflowStalled {
        task_id: TaskId,
        attempts: u32,
        last_error: String,
    },

    /// Notify step exhausted its budget or was rejected; invocation left in `Checked`.
    #[error("reminder for {task_id} failed after {attempts} attempts: {last_error}")]
    NotificationFailed {
        task_id: TaskId,
        attempts: u32,
        last_error: String,
    },

    #[error("no check-in invocation for {0}")]
    InvocationNotFound(TaskId),

    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),

    /// Invocation store failure (persisting progress).
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::InvalidDuration(_) => ErrorKind::Permanent,
            WorkflowError::WorkflowStalled { .. } => ErrorKind::Infrastructure,
            WorkflowError::NotificationFailed { .. } => ErrorKind::Infrastructure,
            WorkflowError::InvocationNotFound(_) => ErrorKind::Permanent,
            WorkflowError::IllegalTransition(_) => ErrorKind::Permanent,
            WorkflowError::Store(e) => e.kind(),
        }
    }

    /// The error a halt stands for, for reporting.
    pub fn halted(task_id: TaskId, reason: &HaltReason) -> Self {
        match reason.clone() {
            HaltReason::WorkflowStalled {
                attempts,
                last_error,
            } => WorkflowError::WorkflowStalled {
                task_id,
                attempts,
                last_error,
            },
            HaltReason::NotificationFailed {
                attempts,
                last_error,
            } => WorkflowError::NotificationFailed {
                task_id,
                attempts,
                last_error,
            },
        }
    }

    /// Another driver won the race for this record.
    pub fn is_conflict(&self) -> bool {
        matches!(self, WorkflowError::Store(StoreError::Conflict { .. }))
    }
}
