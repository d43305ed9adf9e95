#[cfg(any(feature = "sqlite", feature = "postgresql"))]
use chrono::NaiveDateTime;
#[cfg(any(feature = "sqlite", feature = "postgresql"))]
use diesel::prelude::*;
#[cfg(any(feature = "sqlite", feature = "postgresql"))]
use serde::{Deserialize, Serialize};

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
use crate::ledger::schema::*;
#[cfg(any(feature = "sqlite", feature = "postgresql"))]
use crate::ledger::{AuthorRecord, LedgerError, OperationRecord, TransactionRecord};
#[cfg(any(feature = "sqlite", feature = "postgresql"))]
use crate::ton::address::TonAddress;

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
fn parse_address(
    entity: &'static str,
    id: i64,
    value: &str,
) -> Result<TonAddress, LedgerError> {
    value.parse().map_err(|e| LedgerError::Corrupt {
        entity,
        id,
        reason: format!("bad address {value}: {e}"),
    })
}

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
fn parse_optional_address(
    entity: &'static str,
    id: i64,
    value: &Option<String>,
) -> Result<Option<TonAddress>, LedgerError> {
    match value {
        Some(text) => Ok(Some(parse_address(entity, id, text)?)),
        None => Ok(None),
    }
}

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = authors)]
pub struct DbAuthor {
    pub author_id: i64,
    pub collection_name: String,
    pub collection_address: Option<String>,
    pub collection_status: String,
    pub is_testnet: bool,
    pub created_at: NaiveDateTime,
}

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
impl DbAuthor {
    pub fn from_record(record: &AuthorRecord) -> Self {
        Self {
            author_id: record.author_id,
            collection_name: record.collection_name.clone(),
            collection_address: record.collection_address.map(|a| a.to_friendly()),
            collection_status: record.collection_status.to_string(),
            is_testnet: record.is_testnet,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    pub fn into_record(self) -> Result<AuthorRecord, LedgerError> {
        let collection_status =
            self.collection_status
                .parse()
                .map_err(|reason| LedgerError::Corrupt {
                    entity: "author",
                    id: self.author_id,
                    reason,
                })?;
        Ok(AuthorRecord {
            author_id: self.author_id,
            collection_name: self.collection_name,
            collection_address: parse_optional_address(
                "author",
                self.author_id,
                &self.collection_address,
            )?,
            collection_status,
            is_testnet: self.is_testnet,
        })
    }
}

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = transactions)]
pub struct DbTransaction {
    pub id: Option<i64>,
    pub hash: String,
    pub source_address: String,
    pub destination_address: String,
    pub amount: i64,
    pub status: String,
    pub is_testnet: bool,
    pub created_at: NaiveDateTime,
}

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
impl DbTransaction {
    pub fn into_record(self) -> Result<TransactionRecord, LedgerError> {
        let id = self.id.unwrap_or_default();
        let status = self.status.parse().map_err(|reason| LedgerError::Corrupt {
            entity: "transaction",
            id,
            reason,
        })?;
        Ok(TransactionRecord {
            id,
            hash: self.hash,
            source: parse_address("transaction", id, &self.source_address)?,
            destination: parse_address("transaction", id, &self.destination_address)?,
            amount: self.amount,
            status,
            is_testnet: self.is_testnet,
        })
    }
}

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = operations)]
pub struct DbOperation {
    pub id: Option<i64>,
    pub kind: String,
    pub status: String,
    pub author_id: Option<i64>,
    pub collection_address: Option<String>,
    pub nft_address: Option<String>,
    pub dest_wallet: Option<String>,
    pub item_meta: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
impl DbOperation {
    pub fn into_record(self) -> Result<OperationRecord, LedgerError> {
        let id = self.id.unwrap_or_default();
        let kind = self.kind.parse().map_err(|reason| LedgerError::Corrupt {
            entity: "operation",
            id,
            reason,
        })?;
        let status = self.status.parse().map_err(|reason| LedgerError::Corrupt {
            entity: "operation",
            id,
            reason,
        })?;
        Ok(OperationRecord {
            id,
            kind,
            status,
            author_id: self.author_id,
            collection_address: parse_optional_address("operation", id, &self.collection_address)?,
            nft_address: parse_optional_address("operation", id, &self.nft_address)?,
            dest_wallet: parse_optional_address("operation", id, &self.dest_wallet)?,
            item_meta: self.item_meta,
        })
    }
}
