//! Status state machines for ledger rows.
//!
//! Every status write funnels through one `advance` function per entity, so
//! an illegal transition (a failed mint coming back to life, a settled
//! transaction flipping) is an error at the type level instead of a quiet
//! database update.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal status transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: String,
    pub to: String,
}

/// Lifecycle of one operation or transaction row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    New,
    Pending,
    Success,
    Failed,
    Crashed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Crashed
        )
    }

    /// The single transition function. `Pending -> Pending` is allowed so a
    /// retrying task can reassert its claim; terminal states accept nothing.
    pub fn advance(self, to: TaskStatus) -> Result<TaskStatus, IllegalTransition> {
        let allowed = match (self, to) {
            (TaskStatus::New, TaskStatus::Pending) => true,
            (TaskStatus::New, TaskStatus::Failed) => true,
            (TaskStatus::Pending, TaskStatus::Pending) => true,
            (TaskStatus::Pending, TaskStatus::Success) => true,
            (TaskStatus::Pending, TaskStatus::Failed) => true,
            (TaskStatus::Pending, TaskStatus::Crashed) => true,
            _ => false,
        };
        if allowed {
            Ok(to)
        } else {
            Err(IllegalTransition {
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TaskStatus::New => "NEW",
            TaskStatus::Pending => "PENDING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Crashed => "CRASHED",
        };
        f.write_str(text)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(TaskStatus::New),
            "PENDING" => Ok(TaskStatus::Pending),
            "SUCCESS" => Ok(TaskStatus::Success),
            "FAILED" => Ok(TaskStatus::Failed),
            "CRASHED" => Ok(TaskStatus::Crashed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Lifecycle of an author's collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionStatus {
    New,
    Pending,
    Minted,
    Failed,
}

impl CollectionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CollectionStatus::Minted | CollectionStatus::Failed)
    }

    pub fn advance(self, to: CollectionStatus) -> Result<CollectionStatus, IllegalTransition> {
        let allowed = match (self, to) {
            (CollectionStatus::New, CollectionStatus::Pending) => true,
            (CollectionStatus::Pending, CollectionStatus::Pending) => true,
            (CollectionStatus::Pending, CollectionStatus::Minted) => true,
            (CollectionStatus::Pending, CollectionStatus::Failed) => true,
            _ => false,
        };
        if allowed {
            Ok(to)
        } else {
            Err(IllegalTransition {
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CollectionStatus::New => "NEW",
            CollectionStatus::Pending => "PENDING",
            CollectionStatus::Minted => "MINTED",
            CollectionStatus::Failed => "FAILED",
        };
        f.write_str(text)
    }
}

impl FromStr for CollectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(CollectionStatus::New),
            "PENDING" => Ok(CollectionStatus::Pending),
            "MINTED" => Ok(CollectionStatus::Minted),
            "FAILED" => Ok(CollectionStatus::Failed),
            other => Err(format!("unknown collection status: {other}")),
        }
    }
}
