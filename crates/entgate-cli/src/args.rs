//! Command-line arguments.

use crate::formatter::OutputFormat;
use clap::{Parser, Subcommand};
use entgate_core::storage::{DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_MAX_CONNECTIONS};
use entgate_core::DatabaseConfig;
use std::path::PathBuf;
use std::time::Duration;

/// entgate operator tool
#[derive(Parser, Debug)]
#[command(name = "entgate")]
#[command(version, about = "Inspect and migrate entgate databases", long_about = None)]
pub struct Args {
    /// Path to the SQLite database file.
    #[arg(long, default_value = "./entgate.db", global = true)]
    pub db: PathBuf,

    /// Path to the JSON schema file.
    #[arg(long, global = true)]
    pub schema: Option<PathBuf>,

    /// Output format.
    #[arg(long, default_value = "table", value_enum, global = true)]
    pub format: OutputFormat,

    /// Maximum pooled connections.
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS, global = true)]
    pub max_connections: usize,

    /// SQLite busy timeout in milliseconds.
    #[arg(long, default_value_t = DEFAULT_BUSY_TIMEOUT_MS, global = true)]
    pub busy_timeout_ms: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Validate the schema file without touching the database.
    Check,
    /// Create entity tables, indexes and history tables.
    Migrate,
    /// List tables and their row counts.
    Tables,
    /// Show history records.
    History {
        /// Entity kind.
        entity: String,
        /// Tenant to read history for.
        #[arg(long)]
        tenant: String,
        /// Only records for this row.
        #[arg(long)]
        id: Option<String>,
        /// Most recent records to show when no id is given.
        #[arg(long, default_value_t = 50)]
        limit: u64,
    },
}

impl Args {
    /// Database configuration from the arguments.
    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig::new(&self.db)
            .with_max_connections(self.max_connections)
            .with_busy_timeout(Duration::from_millis(self.busy_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["entgate", "tables"]);
        assert_eq!(args.command, Command::Tables);
        assert_eq!(args.format, OutputFormat::Table);

        let config = args.database_config();
        assert_eq!(config.path, PathBuf::from("./entgate.db"));
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.busy_timeout, Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS));
    }

    #[test]
    fn test_history_args() {
        let args = Args::parse_from([
            "entgate",
            "history",
            "risk",
            "--tenant",
            "org_1",
            "--id",
            "abc",
            "--db",
            "/tmp/x.db",
            "--format",
            "json",
        ]);
        assert_eq!(args.format, OutputFormat::Json);
        assert_eq!(args.db, PathBuf::from("/tmp/x.db"));
        match args.command {
            Command::History {
                entity,
                tenant,
                id,
                limit,
            } => {
                assert_eq!(entity, "risk");
                assert_eq!(tenant, "org_1");
                assert_eq!(id.as_deref(), Some("abc"));
                assert_eq!(limit, 50);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_connection_floor() {
        let args = Args::parse_from(["entgate", "--max-connections", "0", "tables"]);
        assert_eq!(args.database_config().max_connections, 1);
    }
}
