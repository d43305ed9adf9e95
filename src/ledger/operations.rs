//! Diesel-backed [`StatusLedger`].
//!
//! Every write commits before returning; status changes re-read the row and
//! run it through the state machine so an illegal transition never reaches
//! the database.

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
use std::sync::Arc;

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
use diesel::prelude::*;

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
use crate::ledger::connection::{DbPool, establish_pool, get_conn, run_migrations};
#[cfg(any(feature = "sqlite", feature = "postgresql"))]
use crate::ledger::models::{DbAuthor, DbOperation, DbTransaction};
#[cfg(any(feature = "sqlite", feature = "postgresql"))]
use crate::ledger::schema::{authors, operations, transactions};
#[cfg(any(feature = "sqlite", feature = "postgresql"))]
use crate::ledger::{
    AuthorRecord, LedgerError, NewOperation, NewTransaction, OperationRecord, StatusLedger,
    TransactionRecord,
};
#[cfg(any(feature = "sqlite", feature = "postgresql"))]
use crate::pipeline::status::{CollectionStatus, TaskStatus};
#[cfg(any(feature = "sqlite", feature = "postgresql"))]
use crate::ton::address::TonAddress;

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
#[derive(Clone)]
pub struct DbLedger {
    pool: Arc<DbPool>,
}

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
impl DbLedger {
    /// Connects via `DATABASE_URL` and creates missing tables.
    pub fn from_env() -> Result<Self, LedgerError> {
        let pool = establish_pool().map_err(LedgerError::Database)?;
        let mut conn = get_conn(&pool).map_err(LedgerError::Database)?;
        run_migrations(&mut conn).map_err(LedgerError::Database)?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn with_pool(pool: DbPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    fn conn(
        &self,
    ) -> Result<
        diesel::r2d2::PooledConnection<
            diesel::r2d2::ConnectionManager<crate::ledger::connection::DbConnection>,
        >,
        LedgerError,
    > {
        get_conn(&self.pool).map_err(LedgerError::Database)
    }
}

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
fn db_err(e: diesel::result::Error) -> LedgerError {
    LedgerError::Database(e.to_string())
}

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
impl StatusLedger for DbLedger {
    fn author(&self, author_id: i64) -> Result<Option<AuthorRecord>, LedgerError> {
        let mut conn = self.conn()?;
        let row: Option<DbAuthor> = authors::table
            .find(author_id)
            .first(&mut conn)
            .optional()
            .map_err(db_err)?;
        row.map(DbAuthor::into_record).transpose()
    }

    fn upsert_author(&self, record: &AuthorRecord) -> Result<(), LedgerError> {
        let mut conn = self.conn()?;
        let row = DbAuthor::from_record(record);
        diesel::insert_into(authors::table)
            .values(&row)
            .on_conflict(authors::author_id)
            .do_update()
            .set((
                authors::collection_name.eq(&row.collection_name),
                authors::collection_address.eq(&row.collection_address),
                authors::collection_status.eq(&row.collection_status),
                authors::is_testnet.eq(row.is_testnet),
            ))
            .execute(&mut conn)
            .map_err(db_err)?;
        Ok(())
    }

    fn advance_collection_status(
        &self,
        author_id: i64,
        to: CollectionStatus,
    ) -> Result<CollectionStatus, LedgerError> {
        let current = self
            .author(author_id)?
            .ok_or(LedgerError::NotFound {
                entity: "author",
                id: author_id,
            })?
            .collection_status;
        let next = current.advance(to)?;
        let mut conn = self.conn()?;
        diesel::update(authors::table.find(author_id))
            .set(authors::collection_status.eq(next.to_string()))
            .execute(&mut conn)
            .map_err(db_err)?;
        Ok(next)
    }

    fn set_collection_address(
        &self,
        author_id: i64,
        address: &TonAddress,
    ) -> Result<(), LedgerError> {
        let mut conn = self.conn()?;
        let updated = diesel::update(authors::table.find(author_id))
            .set(authors::collection_address.eq(address.to_friendly()))
            .execute(&mut conn)
            .map_err(db_err)?;
        if updated == 0 {
            return Err(LedgerError::NotFound {
                entity: "author",
                id: author_id,
            });
        }
        Ok(())
    }

    fn transaction(&self, id: i64) -> Result<Option<TransactionRecord>, LedgerError> {
        let mut conn = self.conn()?;
        let row: Option<DbTransaction> = transactions::table
            .filter(transactions::id.eq(id))
            .first(&mut conn)
            .optional()
            .map_err(db_err)?;
        row.map(DbTransaction::into_record).transpose()
    }

    fn insert_transaction(&self, record: &NewTransaction) -> Result<i64, LedgerError> {
        let mut conn = self.conn()?;
        let now = chrono::Utc::now().naive_utc();
        let row = DbTransaction {
            id: None,
            hash: record.hash.clone(),
            source_address: record.source.to_raw(),
            destination_address: record.destination.to_raw(),
            amount: record.amount,
            status: TaskStatus::New.to_string(),
            is_testnet: record.is_testnet,
            created_at: now,
        };
        diesel::insert_into(transactions::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(db_err)?;
        let id: Option<i64> = transactions::table
            .select(diesel::dsl::max(transactions::id))
            .first(&mut conn)
            .map_err(db_err)?;
        id.ok_or_else(|| LedgerError::Database("insert produced no transaction id".to_string()))
    }

    fn advance_transaction_status(
        &self,
        id: i64,
        to: TaskStatus,
    ) -> Result<TaskStatus, LedgerError> {
        let current = self
            .transaction(id)?
            .ok_or(LedgerError::NotFound {
                entity: "transaction",
                id,
            })?
            .status;
        let next = current.advance(to)?;
        let mut conn = self.conn()?;
        diesel::update(transactions::table.filter(transactions::id.eq(id)))
            .set(transactions::status.eq(next.to_string()))
            .execute(&mut conn)
            .map_err(db_err)?;
        Ok(next)
    }

    fn operation(&self, id: i64) -> Result<Option<OperationRecord>, LedgerError> {
        let mut conn = self.conn()?;
        let row: Option<DbOperation> = operations::table
            .filter(operations::id.eq(id))
            .first(&mut conn)
            .optional()
            .map_err(db_err)?;
        row.map(DbOperation::into_record).transpose()
    }

    fn insert_operation(&self, record: &NewOperation) -> Result<i64, LedgerError> {
        let mut conn = self.conn()?;
        let now = chrono::Utc::now().naive_utc();
        let row = DbOperation {
            id: record.id,
            kind: record.kind.to_string(),
            status: TaskStatus::New.to_string(),
            author_id: record.author_id,
            collection_address: record.collection_address.map(|a| a.to_friendly()),
            nft_address: record.nft_address.map(|a| a.to_friendly()),
            dest_wallet: record.dest_wallet.map(|a| a.to_friendly()),
            item_meta: record.item_meta.clone(),
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(operations::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(db_err)?;
        if let Some(id) = record.id {
            return Ok(id);
        }
        let id: Option<i64> = operations::table
            .select(diesel::dsl::max(operations::id))
            .first(&mut conn)
            .map_err(db_err)?;
        id.ok_or_else(|| LedgerError::Database("insert produced no operation id".to_string()))
    }

    fn advance_operation_status(&self, id: i64, to: TaskStatus) -> Result<TaskStatus, LedgerError> {
        let current = self
            .operation(id)?
            .ok_or(LedgerError::NotFound {
                entity: "operation",
                id,
            })?
            .status;
        let next = current.advance(to)?;
        let mut conn = self.conn()?;
        diesel::update(operations::table.filter(operations::id.eq(id)))
            .set((
                operations::status.eq(next.to_string()),
                operations::updated_at.eq(chrono::Utc::now().naive_utc()),
            ))
            .execute(&mut conn)
            .map_err(db_err)?;
        Ok(next)
    }

    fn reset_operation(&self, id: i64) -> Result<(), LedgerError> {
        let mut conn = self.conn()?;
        let updated = diesel::update(operations::table.filter(operations::id.eq(id)))
            .set((
                operations::status.eq(TaskStatus::New.to_string()),
                operations::updated_at.eq(chrono::Utc::now().naive_utc()),
            ))
            .execute(&mut conn)
            .map_err(db_err)?;
        if updated == 0 {
            return Err(LedgerError::NotFound {
                entity: "operation",
                id,
            });
        }
        Ok(())
    }

    fn set_operation_nft_address(
        &self,
        id: i64,
        address: &TonAddress,
    ) -> Result<(), LedgerError> {
        let mut conn = self.conn()?;
        let updated = diesel::update(operations::table.filter(operations::id.eq(id)))
            .set((
                operations::nft_address.eq(address.to_friendly()),
                operations::updated_at.eq(chrono::Utc::now().naive_utc()),
            ))
            .execute(&mut conn)
            .map_err(db_err)?;
        if updated == 0 {
            return Err(LedgerError::NotFound {
                entity: "operation",
                id,
            });
        }
        Ok(())
    }
}
