//! Database handle.

use super::config::DatabaseConfig;
use super::pool::{ConnectionPool, PooledConnection};
use super::transaction::Transaction;
use crate::catalog::{create_statements, Catalog};
use crate::error::Result;

/// Shared handle to the SQLite database.
#[derive(Clone)]
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    /// Open the database, verifying a connection can be established.
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        tracing::info!(
            path = %config.path.display(),
            max_connections = config.max_connections,
            "opening database"
        );
        let pool = ConnectionPool::new(config);
        drop(pool.acquire()?);
        Ok(Self { pool })
    }

    /// Get the database configuration.
    pub fn config(&self) -> &DatabaseConfig {
        self.pool.config()
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Acquire a pooled connection.
    pub fn acquire(&self) -> Result<PooledConnection> {
        self.pool.acquire()
    }

    /// Start a caller-owned transaction.
    pub fn begin(&self) -> Result<Transaction> {
        Transaction::begin(self.pool.acquire()?)
    }

    /// Create every table, index and history table in the catalog.
    pub fn migrate(&self, catalog: &Catalog) -> Result<()> {
        let conn = self.pool.acquire()?;
        let statements = create_statements(catalog);
        conn.execute_batch("BEGIN IMMEDIATE")?;
        for stmt in &statements {
            if let Err(e) = conn.execute_batch(stmt) {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(e.into());
            }
        }
        conn.execute_batch("COMMIT")?;
        tracing::info!(
            entities = catalog.len(),
            statements = statements.len(),
            "schema migrated"
        );
        Ok(())
    }

    /// Names of the tables present in the database.
    pub fn tables(&self) -> Result<Vec<String>> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    /// Number of rows in a table, including soft-deleted rows.
    pub fn row_count(&self, table: &str) -> Result<u64> {
        let conn = self.pool.acquire()?;
        let sql = format!("SELECT COUNT(*) FROM {}", super::sql::quote_ident(table));
        let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnType, EntitySchema};
    use tempfile::tempdir;

    #[test]
    fn test_migrate_creates_tables() {
        let dir = tempdir().unwrap();
        let db = Database::open(DatabaseConfig::new(dir.path().join("app.db"))).unwrap();
        let catalog = Catalog::new([EntitySchema::new("risk", "risks")
            .owned_by("owner_id")
            .with_column(ColumnDef::new("name", ColumnType::Text))
            .audited()])
        .unwrap();

        db.migrate(&catalog).unwrap();
        db.migrate(&catalog).unwrap();

        assert_eq!(db.tables().unwrap(), vec!["risks", "risks_history"]);
        assert_eq!(db.row_count("risks").unwrap(), 0);
    }

    #[test]
    fn test_transaction_rollback_on_drop() {
        let dir = tempdir().unwrap();
        let db = Database::open(DatabaseConfig::new(dir.path().join("app.db"))).unwrap();
        db.acquire()
            .unwrap()
            .execute_batch("CREATE TABLE t (x INTEGER)")
            .unwrap();

        {
            let tx = db.begin().unwrap();
            tx.with_conn(|conn| Ok(conn.execute("INSERT INTO t VALUES (1)", [])?))
                .unwrap();
        }
        assert_eq!(db.row_count("t").unwrap(), 0);

        let tx = db.begin().unwrap();
        tx.with_conn(|conn| Ok(conn.execute("INSERT INTO t VALUES (1)", [])?))
            .unwrap();
        tx.commit().unwrap();
        assert_eq!(db.row_count("t").unwrap(), 1);
    }
}
