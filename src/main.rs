use clap::Parser;
use pg_dispatch::{Config, Consumer, Error, Event, OperationType, Result};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "pg-dispatch")]
#[command(about = "Dispatches PostgreSQL logical replication changes to handlers", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,

    #[arg(
        long = "on",
        value_name = "OP:SCHEMA.TABLE",
        default_value = "UPDATE:public.*",
        help = "Log changes matching this subscription (repeatable)"
    )]
    subscriptions: Vec<String>,

    #[arg(long, help = "Replication slot to consume (overrides configuration)")]
    slot: Option<String>,

    #[arg(long, help = "Publication to stream (overrides configuration)")]
    publication: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting pg-dispatch");

    let config = match Config::load(args.config.as_deref()) {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            cfg
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let slot = args
        .slot
        .unwrap_or_else(|| config.replication.slot_name.clone());
    let publication = args
        .publication
        .unwrap_or_else(|| config.replication.publication.clone());

    info!(
        postgres_host = %config.postgres.host,
        postgres_port = %config.postgres.port,
        postgres_database = %config.postgres.database,
        slot = %slot,
        publication = %publication,
        handler_failure = ?config.replication.handler_failure,
        "Configuration summary"
    );

    let mut consumer = Consumer::new(config);
    for subscription in &args.subscriptions {
        let (op, qualified) = parse_subscription(subscription)?;
        consumer.on(op, qualified, log_event)?;
        info!(%op, pattern = qualified, "Subscribed");
    }

    let result = tokio::select! {
        result = consumer.start(&slot, &publication) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Err(Error::Shutdown)
        }
    };

    match result {
        Ok(()) | Err(Error::Shutdown) => {
            info!("pg-dispatch stopped");
            Ok(())
        }
        Err(e) => {
            error!("Dispatch failed: {}", e);
            Err(e)
        }
    }
}

/// Splits `OP:schema.table` into the operation and the table pattern.
fn parse_subscription(arg: &str) -> Result<(OperationType, &str)> {
    let (op, qualified) = arg.split_once(':').ok_or_else(|| {
        Error::Config(format!("Expected OP:schema.table, got '{}'", arg))
    })?;
    Ok((op.parse()?, qualified))
}

fn log_event(event: &Event) -> anyhow::Result<()> {
    info!(
        op = %event.op,
        xid = event.xid,
        schema = %event.schema,
        table = %event.table,
        fields = %serde_json::to_string(&event.fields)?,
        "Change"
    );
    Ok(())
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("pg_dispatch=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("pg_dispatch=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
