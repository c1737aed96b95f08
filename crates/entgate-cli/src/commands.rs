//! Subcommand execution.

use crate::args::{Args, Command};
use crate::formatter::Formatter;
use entgate_core::{
    Actor, Catalog, Context, Database, EntityPolicy, Error, Pipeline, Result, SchemaFile,
};
use std::path::Path;

/// Subject recorded for reads made from the command line.
const CLI_SUBJECT: &str = "entgate-cli";

/// Run the selected subcommand, returning the rendered output.
pub fn execute(args: &Args, formatter: &dyn Formatter) -> Result<String> {
    match &args.command {
        Command::Check => {
            let catalog = load_catalog(args.schema.as_deref())?;
            Ok(formatter.format_catalog(&catalog))
        }
        Command::Migrate => {
            let catalog = load_catalog(args.schema.as_deref())?;
            let db = Database::open(args.database_config())?;
            db.migrate(&catalog)?;
            tracing::info!(entities = catalog.len(), "migration complete");
            Ok(formatter.format_message(&format!(
                "migrated {} entities into {}",
                catalog.len(),
                args.db.display()
            )))
        }
        Command::Tables => {
            let db = Database::open(args.database_config())?;
            let tables = db
                .tables()?
                .into_iter()
                .map(|name| db.row_count(&name).map(|rows| (name, rows)))
                .collect::<Result<Vec<_>>>()?;
            Ok(formatter.format_tables(&tables))
        }
        Command::History {
            entity,
            tenant,
            id,
            limit,
        } => {
            let catalog = load_catalog(args.schema.as_deref())?;
            let db = Database::open(args.database_config())?;
            // No rules: only the internal operator below can read.
            let pipeline = Pipeline::builder(catalog, db)
                .default_policy(EntityPolicy::new())
                .build()?;
            let cx = Context::new(Actor::internal(tenant.as_str(), CLI_SUBJECT)?);
            let client = pipeline.entity(entity)?;
            let records = match id {
                Some(id) => client.history_of(id, &cx)?,
                None => client.recent_history(*limit, &cx)?,
            };
            tracing::debug!(entity = %entity, tenant = %tenant, records = records.len(), "history loaded");
            Ok(formatter.format_history(&records))
        }
    }
}

fn load_catalog(path: Option<&Path>) -> Result<Catalog> {
    let path = path.ok_or_else(|| Error::Config("--schema is required for this command".into()))?;
    let catalog = SchemaFile::load(path)?.into_catalog()?;
    tracing::debug!(path = %path.display(), entities = catalog.len(), "schema loaded");
    Ok(catalog)
}
