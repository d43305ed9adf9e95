#[cfg(any(feature = "sqlite", feature = "postgresql"))]
use diesel::prelude::*;
#[cfg(any(feature = "sqlite", feature = "postgresql"))]
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
#[cfg(any(feature = "sqlite", feature = "postgresql"))]
use std::env;

#[cfg(all(feature = "sqlite", not(feature = "postgresql")))]
pub type DbConnection = diesel::SqliteConnection;

#[cfg(feature = "postgresql")]
pub type DbConnection = diesel::PgConnection;

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
pub type DbPool = Pool<ConnectionManager<DbConnection>>;

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
pub fn establish_pool() -> Result<DbPool, String> {
    #[cfg(all(feature = "sqlite", not(feature = "postgresql")))]
    let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "./tonforge.db".to_string());

    #[cfg(feature = "postgresql")]
    let database_url =
        env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set for PostgreSQL".to_string())?;

    let manager = ConnectionManager::<DbConnection>::new(database_url);
    Pool::builder()
        .build(manager)
        .map_err(|e| format!("Error building the database pool: {}", e))
}

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
pub fn get_conn(pool: &DbPool) -> Result<PooledConnection<ConnectionManager<DbConnection>>, String> {
    pool.get()
        .map_err(|e| format!("Error checking out a database connection: {}", e))
}

#[cfg(any(feature = "sqlite", feature = "postgresql"))]
pub fn run_migrations(conn: &mut DbConnection) -> Result<(), String> {
    #[cfg(all(feature = "sqlite", not(feature = "postgresql")))]
    {
        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS authors (
                author_id BIGINT PRIMARY KEY,
                collection_name TEXT NOT NULL,
                collection_address TEXT,
                collection_status TEXT NOT NULL DEFAULT 'NEW',
                is_testnet BOOLEAN NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .execute(conn)
        .map_err(|e| format!("Failed to create authors table: {}", e))?;

        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hash TEXT NOT NULL,
                source_address TEXT NOT NULL,
                destination_address TEXT NOT NULL,
                amount BIGINT NOT NULL,
                status TEXT NOT NULL DEFAULT 'NEW',
                is_testnet BOOLEAN NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .execute(conn)
        .map_err(|e| format!("Failed to create transactions table: {}", e))?;

        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS operations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'NEW',
                author_id BIGINT,
                collection_address TEXT,
                nft_address TEXT,
                dest_wallet TEXT,
                item_meta TEXT,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .execute(conn)
        .map_err(|e| format!("Failed to create operations table: {}", e))?;
    }

    #[cfg(feature = "postgresql")]
    {
        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS authors (
                author_id BIGINT PRIMARY KEY,
                collection_name VARCHAR NOT NULL,
                collection_address VARCHAR,
                collection_status VARCHAR NOT NULL DEFAULT 'NEW',
                is_testnet BOOLEAN NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT NOW()
            );
            "#,
        )
        .execute(conn)
        .map_err(|e| format!("Failed to create authors table: {}", e))?;

        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id BIGSERIAL PRIMARY KEY,
                hash VARCHAR NOT NULL,
                source_address VARCHAR NOT NULL,
                destination_address VARCHAR NOT NULL,
                amount BIGINT NOT NULL,
                status VARCHAR NOT NULL DEFAULT 'NEW',
                is_testnet BOOLEAN NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT NOW()
            );
            "#,
        )
        .execute(conn)
        .map_err(|e| format!("Failed to create transactions table: {}", e))?;

        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS operations (
                id BIGSERIAL PRIMARY KEY,
                kind VARCHAR NOT NULL,
                status VARCHAR NOT NULL DEFAULT 'NEW',
                author_id BIGINT,
                collection_address VARCHAR,
                nft_address VARCHAR,
                dest_wallet VARCHAR,
                item_meta VARCHAR,
                created_at TIMESTAMP NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP NOT NULL DEFAULT NOW()
            );
            "#,
        )
        .execute(conn)
        .map_err(|e| format!("Failed to create operations table: {}", e))?;
    }

    Ok(())
}
