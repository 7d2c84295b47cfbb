//! Conveyor SQS Consumer
//!
//! Runs one route per configured SQS queue and logs every message it receives.
//!
//! ## Usage
//!
//! ```text
//! cv-consumer          # poll until SIGINT/SIGTERM
//! cv-consumer --once   # one fetch cycle per route, then exit
//! ```
//!
//! Configuration is read from `CONVEYOR_CONFIG` or the standard search paths,
//! with `CONVEYOR_*` environment overrides. Set `CONVEYOR_SQS_ENDPOINT_URL`
//! to point at LocalStack.

use std::sync::Arc;

use anyhow::Result;
use aws_sdk_sqs::Client;
use serde_json::Value;
use tracing::info;

use cv_config::{ConfigLoader, RouteSettings, SqsSettings, TranslatorKind};
use cv_dispatch::{
    handler_fn, DispatcherConfig, HandlerError, JsonTranslator, Manager, Metadata, Route,
    SnsTranslator,
};
use cv_provider::sqs::{MissingMessagePolicy, SqsProvider, SqsProviderConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for local development)
    let _ = dotenvy::dotenv();

    cv_common::logging::init_logging("cv-consumer");

    let once = std::env::args().skip(1).any(|arg| arg == "--once");
    info!(once, "Starting Conveyor consumer");

    let config = ConfigLoader::new().load()?;

    let sqs_client = build_sqs_client(&config.sqs).await;

    let routes = config
        .routes
        .iter()
        .map(|settings| build_route(&sqs_client, settings))
        .collect::<Result<Vec<_>>>()?;

    let dispatcher_config = DispatcherConfig {
        queue_size: config.dispatcher.queue_size,
        workers: config.dispatcher.workers,
        empty_fetch_delay: config.dispatcher.empty_fetch_delay(),
    };

    let manager = Manager::new(routes, dispatcher_config)?
        .with_shutdown_timeout(config.shutdown.timeout());

    manager.run(!once).await?;

    info!("Conveyor consumer shutdown complete");
    Ok(())
}

async fn build_sqs_client(settings: &SqsSettings) -> Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(settings.region.clone()));

    if let Some(endpoint_url) = &settings.endpoint_url {
        info!(endpoint = %endpoint_url, "Configuring SQS client with custom endpoint");
        loader = loader.endpoint_url(endpoint_url);
    }

    let config = loader.load().await;
    Client::new(&config)
}

fn build_route(client: &Client, settings: &RouteSettings) -> Result<Route> {
    let mut provider_config = SqsProviderConfig::new(settings.queue_url.clone());
    provider_config.name = Some(settings.name.clone()).filter(|name| !name.is_empty());
    provider_config.max_messages = settings.max_messages;
    provider_config.wait_time_seconds = settings.wait_time_seconds;
    provider_config.visibility_timeout = settings.visibility_timeout;
    provider_config.backoff_multiplier = settings.backoff_multiplier;
    provider_config.backoff_limit = settings.backoff_limit;
    if settings.strict_acknowledgment {
        provider_config.missing_message_policy = MissingMessagePolicy::Propagate;
    }

    let provider = Arc::new(SqsProvider::new(client.clone(), provider_config));

    let builder = Route::builder()
        .provider(provider)
        .handler(handler_fn(log_message));

    let builder = match settings.translator {
        TranslatorKind::Raw => builder,
        TranslatorKind::Json => builder.translator(JsonTranslator),
        TranslatorKind::Sns => builder.translator(SnsTranslator),
    };

    let route = builder.build()?;
    info!(route = %route, queue_url = %settings.queue_url, translator = ?settings.translator, "Configured route");
    Ok(route)
}

async fn log_message(content: Value, metadata: Metadata) -> Result<bool, HandlerError> {
    info!(%content, metadata = %serde_json::Value::Object(metadata), "Received message");
    Ok(true)
}
