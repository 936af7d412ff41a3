//! db-connect - acquire a pooled connection and run one statement.
//!
//! Exercises the acquisition path end to end: parse the connection spec,
//! acquire a facade, optionally attach a transaction, run the statement and
//! print the rows as JSON on stdout. Logs go to stderr.

use clap::Parser;
use db_connection_core::config::{Config, DatabaseConfig};
use db_connection_core::models::QueryParam;
use db_connection_core::{Acquisition, ConnectionManager};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    let db_config = DatabaseConfig::parse(&config.database)?;
    let connection_config = db_config.into_connection_config()?;
    info!(
        connection_id = %connection_config.id,
        db_type = %connection_config.db_type,
        "Starting db-connect v{}",
        env!("CARGO_PKG_VERSION")
    );

    let manager = ConnectionManager::new(connection_config);
    let meta = serde_json::json!({ "source": "db-connect", "sql": config.sql });

    let mut connection = match manager.acquire(Some(meta)).await {
        Acquisition::Success { connection, .. } => connection,
        Acquisition::Failed { error, .. } => {
            error!(error = %error, "Acquisition failed");
            eprintln!("Error: {error}");
            if let Some(suggestion) = error.suggestion() {
                eprintln!("Suggestion: {suggestion}");
            }
            std::process::exit(1);
        }
    };

    let params: Vec<QueryParam> = config
        .params
        .iter()
        .map(|raw| QueryParam::from_cli_value(raw))
        .collect();

    let transaction = if config.transaction {
        let tx = connection.begin_transaction().await?;
        connection.attach_transaction(tx.clone())?;
        Some(tx)
    } else {
        None
    };

    let result = connection.query(&config.sql, &params).await;

    if let Some(tx) = &transaction {
        // A failed statement never commits.
        if config.rollback || result.is_err() {
            tx.rollback().await?;
        } else {
            tx.commit().await?;
        }
        info!(transaction_id = %tx.id(), state = %tx.state().await, "Transaction ended");
    }

    connection.release().await;
    manager.close().await;

    let rows = result?;
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}
