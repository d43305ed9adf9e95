use std::time::Duration;

use crate::ton::address::TonAddress;

/// One unit of background work. Mint and transfer tasks are keyed by the
/// correlation id of their ledger operation row; transaction confirmations
/// are keyed by the transaction row itself.
#[derive(Debug, Clone)]
pub enum Task {
    MintCollection {
        correlation_id: i64,
        author_id: i64,
        collection_content_uri: String,
        item_content_base_uri: String,
    },
    MintItem {
        correlation_id: i64,
        author_id: i64,
        collection: TonAddress,
        dest_wallet: TonAddress,
        item_meta: String,
    },
    TransferItem {
        correlation_id: i64,
        nft: TonAddress,
        dest_wallet: TonAddress,
    },
    ConfirmTransaction {
        transaction_id: i64,
    },
}

impl Task {
    pub fn describe(&self) -> String {
        match self {
            Task::MintCollection { correlation_id, author_id, .. } => {
                format!("mint-collection #{correlation_id} (author {author_id})")
            }
            Task::MintItem { correlation_id, author_id, .. } => {
                format!("mint-item #{correlation_id} (author {author_id})")
            }
            Task::TransferItem { correlation_id, nft, .. } => {
                format!("transfer-item #{correlation_id} ({nft})")
            }
            Task::ConfirmTransaction { transaction_id } => {
                format!("confirm-transaction #{transaction_id}")
            }
        }
    }
}

/// Attempt counter owned by one queued task. Budgets start fresh per
/// submitted request and are never shared across correlation ids.
#[derive(Debug, Clone, Copy)]
pub struct RetryBudget {
    attempt: u32,
    max_attempts: u32,
    delay: Duration,
}

impl RetryBudget {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            attempt: 1,
            max_attempts,
            delay,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// The budget for the next attempt, or `None` once spent.
    pub fn next_attempt(self) -> Option<Self> {
        if self.attempt < self.max_attempts {
            Some(Self {
                attempt: self.attempt + 1,
                ..self
            })
        } else {
            None
        }
    }
}

/// A task plus its budgets. The dependency budget only matters for item
/// mints waiting on their collection; it is deliberately separate from the
/// transport-failure budget.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub task: Task,
    pub budget: RetryBudget,
    pub dependency_budget: RetryBudget,
}
