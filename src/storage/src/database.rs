//! The connection pool shared across every store.

use crate::StorageError;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use std::ops::Deref;

embed_migrations!("migrations");

/// A pooled SQLite connection, autocommit with a WAL journal.
pub type DatabasePool = Pool<ConnectionManager<SqliteConnection>>;

/// A single checked-out connection from the [`DatabasePool`].
pub struct Database(PooledConnection<ConnectionManager<SqliteConnection>>);

impl Deref for Database {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Database {
    /// Build a connection pool against `database_url` (a file path, or
    /// `:memory:`), running any pending migrations, and setting the WAL
    /// journal mode and foreign-key enforcement on every checked-out
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the pool cannot be built, a connection
    /// cannot be checked out, or a migration fails.
    pub fn connect(database_url: &str) -> Result<DatabasePool, StorageError> {
        let manager = ConnectionManager::<SqliteConnection>::new(database_url);
        // A single shared connection serialises writes; see the project's
        // concurrency model notes on why SQLite access goes through one
        // connection rather than a true pool.
        let pool = Pool::builder()
            .max_size(1)
            .connection_customizer(Box::new(ConnectionOptions))
            .build(manager)
            .map_err(StorageError::Pool)?;

        let conn = pool.get()?;
        embedded_migrations::run(&conn).map_err(|err| {
            StorageError::Corrupt(format!("migration failed: {}", err))
        })?;

        Ok(pool)
    }

    /// Check out a connection from `pool`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Pool`] if the pool is exhausted or broken.
    pub fn from_pool(pool: &DatabasePool) -> Result<Self, StorageError> {
        Ok(Self(pool.get()?))
    }
}

#[derive(Debug)]
struct ConnectionOptions;

impl diesel::r2d2::CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        (|| -> QueryResult<()> {
            diesel::sql_query("PRAGMA foreign_keys = ON").execute(conn)?;
            diesel::sql_query("PRAGMA journal_mode = WAL").execute(conn)?;
            Ok(())
        })()
        .map_err(diesel::r2d2::Error::QueryError)
    }
}
