//! CityDB Export
//!
//! Exports the top-level features of a SQLite city database as JSON lines.

mod args;
mod listing;
mod sink;
mod sql;
mod sqlite;

use std::sync::Arc;

use clap::Parser;

use args::Args;
use citydb_core::{Connection, ExportRun};
use sink::JsonLinesSink;
use sqlite::SqliteConnection;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "citydb_export=info,citydb_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.into_config()?;
    let export = ExportRun::builder(config).build()?;

    let listing = SqliteConnection::open(&args.database)?;
    let services = export.services();
    let requests =
        listing::top_level_requests(&listing, &services.catalog, &services.schemas, &args.classes)?;
    tracing::info!(database = %args.database.display(), features = requests.len(), "listed features");

    let sink = match &args.output {
        Some(path) => JsonLinesSink::create(path, args.flat)?,
        None => JsonLinesSink::stdout(args.flat),
    };

    let database = &args.database;
    let summary = export.execute(
        requests,
        |worker| {
            tracing::debug!(worker, "opening worker connection");
            Ok(Arc::new(SqliteConnection::open(database)?) as Arc<dyn Connection>)
        },
        &sink,
    )?;
    sink.flush()?;

    if summary.cancelled {
        tracing::warn!(remaining = summary.remaining, "export stopped early");
    }
    tracing::info!(lines = sink.written(), "output written");

    if args.json_summary {
        eprintln!("{}", serde_json::to_string_pretty(&summary.metrics)?);
    } else {
        eprintln!(
            "exported {} features ({} skipped, {} warnings, {} errors)",
            summary.exported, summary.skipped, summary.warnings, summary.errors
        );
        eprintln!("{}", summary.metrics);
    }
    Ok(())
}
