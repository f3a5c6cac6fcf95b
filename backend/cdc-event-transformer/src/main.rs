use anyhow::{Context, Result};
use cdc_event_transformer::{
    record, Config, Dispatcher, InvocationHandler, Normalizer, SnsBatchPublisher,
    TransformerMetrics,
};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Read one batch of stream records from the file given as first argument, or stdin.
async fn read_input() -> Result<String> {
    match std::env::args().nth(1) {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read records from {}", path)),
        None => {
            let mut input = String::new();
            tokio::io::stdin()
                .read_to_string(&mut input)
                .await
                .context("Failed to read records from stdin")?;
            Ok(input)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,aws_config=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        topic = %config.event_bus,
        time_format = %config.time_format,
        include_payload = config.include_payload,
        "Starting CDC event transformer"
    );

    let publisher = Arc::new(SnsBatchPublisher::from_env().await);
    publisher
        .health_check(&config.event_bus)
        .await
        .context("Event bus unreachable")?;

    let input = read_input().await?;
    let batch = record::parse_batch(&input).context("Failed to parse change records")?;

    let metrics = TransformerMetrics::new(&config.service_name);
    let handler = InvocationHandler::new_with_metrics(
        Normalizer::new(config.normalizer_config()),
        Dispatcher::new_with_metrics(publisher, config.dispatcher_config(), metrics.clone()),
        metrics,
    );

    let deadline = Instant::now() + config.invocation_timeout();
    match handler.handle_parsed(&batch, Some(deadline)).await {
        Ok(summary) => {
            info!(%summary, "Invocation complete");
            Ok(())
        }
        Err(e) => {
            for failure in &e.report().failures {
                error!(
                    event_id = %failure.event_id,
                    event_type = %failure.event_type,
                    reason = %failure.reason,
                    "Event not published"
                );
            }
            Err(e.into())
        }
    }
}
