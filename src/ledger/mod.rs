//! The status ledger.
//!
//! The pipeline records every step transition here, synchronously, so
//! pollers observe status the moment it changes. [`StatusLedger`] is the
//! seam; [`MemoryLedger`] backs tests and embedders, the diesel-backed
//! [`operations::DbLedger`] backs deployments (features `sqlite` /
//! `postgresql`).

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
pub mod connection;
#[cfg(any(feature = "sqlite", feature = "postgresql"))]
pub mod models;
#[cfg(any(feature = "sqlite", feature = "postgresql"))]
pub mod operations;
#[cfg(any(feature = "sqlite", feature = "postgresql"))]
pub mod schema;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::status::{CollectionStatus, IllegalTransition, TaskStatus};
use crate::ton::address::TonAddress;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(String),
    #[error("no {entity} row with id {id}")]
    NotFound { entity: &'static str, id: i64 },
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),
    #[error("corrupt {entity} row {id}: {reason}")]
    Corrupt {
        entity: &'static str,
        id: i64,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    MintCollection,
    MintItem,
    TransferItem,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            OperationKind::MintCollection => "MINT_COLLECTION",
            OperationKind::MintItem => "MINT_ITEM",
            OperationKind::TransferItem => "TRANSFER_ITEM",
        };
        f.write_str(text)
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MINT_COLLECTION" => Ok(OperationKind::MintCollection),
            "MINT_ITEM" => Ok(OperationKind::MintItem),
            "TRANSFER_ITEM" => Ok(OperationKind::TransferItem),
            other => Err(format!("unknown operation kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorRecord {
    pub author_id: i64,
    pub collection_name: String,
    pub collection_address: Option<TonAddress>,
    pub collection_status: CollectionStatus,
    pub is_testnet: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: i64,
    pub hash: String,
    pub source: TonAddress,
    pub destination: TonAddress,
    pub amount: i64,
    pub status: TaskStatus,
    pub is_testnet: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
    pub hash: String,
    pub source: TonAddress,
    pub destination: TonAddress,
    pub amount: i64,
    pub is_testnet: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: i64,
    pub kind: OperationKind,
    pub status: TaskStatus,
    pub author_id: Option<i64>,
    pub collection_address: Option<TonAddress>,
    pub nft_address: Option<TonAddress>,
    pub dest_wallet: Option<TonAddress>,
    pub item_meta: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOperation {
    /// Caller-supplied correlation id; `None` lets the ledger allocate one.
    pub id: Option<i64>,
    pub kind: OperationKind,
    pub author_id: Option<i64>,
    pub collection_address: Option<TonAddress>,
    pub nft_address: Option<TonAddress>,
    pub dest_wallet: Option<TonAddress>,
    pub item_meta: Option<String>,
}

/// The persisted status store the pipeline writes and callers poll.
///
/// Implementations commit each write before returning, and every status
/// change goes through the state-machine `advance` functions.
pub trait StatusLedger: Send + Sync {
    fn author(&self, author_id: i64) -> Result<Option<AuthorRecord>, LedgerError>;
    fn upsert_author(&self, record: &AuthorRecord) -> Result<(), LedgerError>;
    fn advance_collection_status(
        &self,
        author_id: i64,
        to: CollectionStatus,
    ) -> Result<CollectionStatus, LedgerError>;
    fn set_collection_address(
        &self,
        author_id: i64,
        address: &TonAddress,
    ) -> Result<(), LedgerError>;

    fn transaction(&self, id: i64) -> Result<Option<TransactionRecord>, LedgerError>;
    fn insert_transaction(&self, record: &NewTransaction) -> Result<i64, LedgerError>;
    fn advance_transaction_status(
        &self,
        id: i64,
        to: TaskStatus,
    ) -> Result<TaskStatus, LedgerError>;

    fn operation(&self, id: i64) -> Result<Option<OperationRecord>, LedgerError>;
    fn insert_operation(&self, record: &NewOperation) -> Result<i64, LedgerError>;
    fn advance_operation_status(&self, id: i64, to: TaskStatus) -> Result<TaskStatus, LedgerError>;
    /// Restarts a terminal operation row as a fresh request. Explicit caller
    /// resubmission only; the pipeline never calls this on its own.
    fn reset_operation(&self, id: i64) -> Result<(), LedgerError>;
    fn set_operation_nft_address(&self, id: i64, address: &TonAddress)
    -> Result<(), LedgerError>;
}

#[derive(Default)]
struct MemoryState {
    authors: HashMap<i64, AuthorRecord>,
    transactions: HashMap<i64, TransactionRecord>,
    operations: HashMap<i64, OperationRecord>,
    next_transaction_id: i64,
    next_operation_id: i64,
}

/// Hash-map ledger with the same transition rules as the database one.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<MemoryState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusLedger for MemoryLedger {
    fn author(&self, author_id: i64) -> Result<Option<AuthorRecord>, LedgerError> {
        let state = self.state.lock().unwrap();
        Ok(state.authors.get(&author_id).cloned())
    }

    fn upsert_author(&self, record: &AuthorRecord) -> Result<(), LedgerError> {
        let mut state = self.state.lock().unwrap();
        state.authors.insert(record.author_id, record.clone());
        Ok(())
    }

    fn advance_collection_status(
        &self,
        author_id: i64,
        to: CollectionStatus,
    ) -> Result<CollectionStatus, LedgerError> {
        let mut state = self.state.lock().unwrap();
        let author = state.authors.get_mut(&author_id).ok_or(LedgerError::NotFound {
            entity: "author",
            id: author_id,
        })?;
        author.collection_status = author.collection_status.advance(to)?;
        Ok(author.collection_status)
    }

    fn set_collection_address(
        &self,
        author_id: i64,
        address: &TonAddress,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock().unwrap();
        let author = state.authors.get_mut(&author_id).ok_or(LedgerError::NotFound {
            entity: "author",
            id: author_id,
        })?;
        author.collection_address = Some(*address);
        Ok(())
    }

    fn transaction(&self, id: i64) -> Result<Option<TransactionRecord>, LedgerError> {
        let state = self.state.lock().unwrap();
        Ok(state.transactions.get(&id).cloned())
    }

    fn insert_transaction(&self, record: &NewTransaction) -> Result<i64, LedgerError> {
        let mut state = self.state.lock().unwrap();
        state.next_transaction_id += 1;
        let id = state.next_transaction_id;
        state.transactions.insert(
            id,
            TransactionRecord {
                id,
                hash: record.hash.clone(),
                source: record.source,
                destination: record.destination,
                amount: record.amount,
                status: TaskStatus::New,
                is_testnet: record.is_testnet,
            },
        );
        Ok(id)
    }

    fn advance_transaction_status(
        &self,
        id: i64,
        to: TaskStatus,
    ) -> Result<TaskStatus, LedgerError> {
        let mut state = self.state.lock().unwrap();
        let transaction = state.transactions.get_mut(&id).ok_or(LedgerError::NotFound {
            entity: "transaction",
            id,
        })?;
        transaction.status = transaction.status.advance(to)?;
        Ok(transaction.status)
    }

    fn operation(&self, id: i64) -> Result<Option<OperationRecord>, LedgerError> {
        let state = self.state.lock().unwrap();
        Ok(state.operations.get(&id).cloned())
    }

    fn insert_operation(&self, record: &NewOperation) -> Result<i64, LedgerError> {
        let mut state = self.state.lock().unwrap();
        let id = match record.id {
            Some(id) => id,
            None => {
                state.next_operation_id += 1;
                state.next_operation_id
            }
        };
        state.next_operation_id = state.next_operation_id.max(id);
        state.operations.insert(
            id,
            OperationRecord {
                id,
                kind: record.kind,
                status: TaskStatus::New,
                author_id: record.author_id,
                collection_address: record.collection_address,
                nft_address: record.nft_address,
                dest_wallet: record.dest_wallet,
                item_meta: record.item_meta.clone(),
            },
        );
        Ok(id)
    }

    fn advance_operation_status(&self, id: i64, to: TaskStatus) -> Result<TaskStatus, LedgerError> {
        let mut state = self.state.lock().unwrap();
        let operation = state.operations.get_mut(&id).ok_or(LedgerError::NotFound {
            entity: "operation",
            id,
        })?;
        operation.status = operation.status.advance(to)?;
        Ok(operation.status)
    }

    fn reset_operation(&self, id: i64) -> Result<(), LedgerError> {
        let mut state = self.state.lock().unwrap();
        let operation = state.operations.get_mut(&id).ok_or(LedgerError::NotFound {
            entity: "operation",
            id,
        })?;
        operation.status = TaskStatus::New;
        Ok(())
    }

    fn set_operation_nft_address(
        &self,
        id: i64,
        address: &TonAddress,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock().unwrap();
        let operation = state.operations.get_mut(&id).ok_or(LedgerError::NotFound {
            entity: "operation",
            id,
        })?;
        operation.nft_address = Some(*address);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author(id: i64) -> AuthorRecord {
        AuthorRecord {
            author_id: id,
            collection_name: "drops".to_string(),
            collection_address: None,
            collection_status: CollectionStatus::New,
            is_testnet: true,
        }
    }

    #[test]
    fn collection_status_walks_the_state_machine() {
        let ledger = MemoryLedger::new();
        ledger.upsert_author(&author(1)).unwrap();

        ledger
            .advance_collection_status(1, CollectionStatus::Pending)
            .unwrap();
        ledger
            .advance_collection_status(1, CollectionStatus::Minted)
            .unwrap();
        let err = ledger
            .advance_collection_status(1, CollectionStatus::Pending)
            .unwrap_err();
        assert!(matches!(err, LedgerError::IllegalTransition(_)));
    }

    #[test]
    fn operations_allocate_ids_when_the_caller_does_not_supply_one() {
        let ledger = MemoryLedger::new();
        let op = NewOperation {
            id: None,
            kind: OperationKind::TransferItem,
            author_id: None,
            collection_address: None,
            nft_address: None,
            dest_wallet: None,
            item_meta: None,
        };
        let a = ledger.insert_operation(&op).unwrap();
        let b = ledger.insert_operation(&op).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn caller_supplied_ids_do_not_collide_with_allocated_ones() {
        let ledger = MemoryLedger::new();
        let mut op = NewOperation {
            id: Some(10),
            kind: OperationKind::MintCollection,
            author_id: Some(1),
            collection_address: None,
            nft_address: None,
            dest_wallet: None,
            item_meta: None,
        };
        assert_eq!(ledger.insert_operation(&op).unwrap(), 10);
        op.id = None;
        assert_eq!(ledger.insert_operation(&op).unwrap(), 11);
    }

    #[test]
    fn terminal_operation_rows_reject_further_writes() {
        let ledger = MemoryLedger::new();
        let id = ledger
            .insert_operation(&NewOperation {
                id: None,
                kind: OperationKind::MintItem,
                author_id: Some(1),
                collection_address: None,
                nft_address: None,
                dest_wallet: None,
                item_meta: None,
            })
            .unwrap();
        ledger.advance_operation_status(id, TaskStatus::Pending).unwrap();
        ledger.advance_operation_status(id, TaskStatus::Failed).unwrap();
        assert!(ledger
            .advance_operation_status(id, TaskStatus::Pending)
            .is_err());

        // an explicit reset is the only way back
        ledger.reset_operation(id).unwrap();
        ledger.advance_operation_status(id, TaskStatus::Pending).unwrap();
    }
}
