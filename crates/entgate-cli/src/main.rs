//! entgate - operator tool for entgate databases.
//!
//! Migrates a schema file into a SQLite database, lists tables and reads the
//! audit history of audited entities.

mod args;
mod commands;
mod formatter;

use args::Args;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "entgate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    tracing::debug!(db = %args.db.display(), format = %args.format, "arguments parsed");

    let formatter = formatter::create_formatter(args.format);
    match commands::execute(&args, &*formatter) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            tracing::error!(error = %e, kind = ?e.kind(), "command failed");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
