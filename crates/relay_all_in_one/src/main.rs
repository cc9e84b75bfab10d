mod config;

use common::domain::{ChangeLogWatcher, DeviceController, DocumentRepository};
use common::nats::{NatsClient, NatsKvDocumentStore};
use common::particle::{ParticleClient, ParticleConfig, load_credentials};
use common::telemetry::{
    TelemetryConfig, TelemetryProviders, init_telemetry, shutdown_telemetry,
};
use config::ServiceConfig;
use ingest_worker::domain::TelemetryIngestionConfig;
use ingest_worker::nats::TelemetryConsumerConfig;
use ingest_worker::{IngestWorker, IngestWorkerConfig};
use interval_dispatcher::IntervalDispatcher;
use interval_dispatcher::domain::IntervalDispatcherConfig;
use relay_runner::Runner;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&TelemetryConfig {
        service_name: config.otel_service_name.clone(),
        log_level: config.log_level.clone(),
        log_format: config.log_format,
        otlp_endpoint: config.otel_enabled.then(|| config.otel_endpoint.clone()),
    }) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        otel_endpoint = %config.otel_endpoint,
        "Starting sensor-relay service"
    );
    debug!("Configuration: {:?}", config);

    let (nats_client, document_store, device_controller) =
        match initialize_shared_dependencies(&config).await {
            Ok(deps) => deps,
            Err(e) => {
                error!("Failed to initialize shared dependencies: {:#}", e);
                std::process::exit(1);
            }
        };

    // The dispatcher owns the pending change cache; ingestion only signals reachability
    let interval_dispatcher = IntervalDispatcher::new(
        document_store.clone() as Arc<dyn ChangeLogWatcher>,
        document_store.clone() as Arc<dyn DocumentRepository>,
        device_controller,
        IntervalDispatcherConfig {
            pending_collection: config.pending_collection.clone(),
            applied_collection: config.applied_collection.clone(),
            function_name: config.adjust_function.clone(),
            call_timeout: Duration::from_secs(config.device_call_timeout_secs),
            resubscribe_delay: Duration::from_secs(config.resubscribe_delay_secs),
        },
    );

    let ingest_worker = match IngestWorker::new(
        nats_client.queue(),
        document_store as Arc<dyn DocumentRepository>,
        interval_dispatcher.reachability_listener(),
        IngestWorkerConfig {
            consumer: TelemetryConsumerConfig {
                stream_name: config.telemetry_stream.clone(),
                consumer_name: config.telemetry_consumer_name.clone(),
                filter_subject: config.telemetry_subject.clone(),
                batch_size: config.nats_batch_size,
                batch_wait_secs: config.nats_batch_wait_secs,
                ack_wait_secs: config.nats_ack_wait_secs,
            },
            status_event_type: config.status_event_type.clone(),
            ingestion: TelemetryIngestionConfig {
                status_collection: config.status_collection.clone(),
                unknown_field_policy: config.unknown_field_policy,
            },
        },
    )
    .await
    {
        Ok(worker) => worker,
        Err(e) => {
            error!("Failed to initialize ingest worker: {:#}", e);
            std::process::exit(1);
        }
    };

    let runner = Runner::new()
        .with_named_process(
            "interval_dispatcher",
            interval_dispatcher.into_runner_process(),
        )
        .with_named_process("ingest_worker", ingest_worker.into_runner_process())
        .with_closer({
            let nats_for_close = Arc::clone(&nats_client);
            move || {
                Box::pin(async move {
                    info!("Running cleanup tasks...");
                    if let Ok(client) = Arc::try_unwrap(nats_for_close) {
                        client.close().await;
                    }

                    // Flush pending traces and logs
                    shutdown_telemetry(telemetry_providers);

                    info!("Cleanup complete");
                    Ok(())
                })
            }
        })
        .with_closer_timeout(Duration::from_secs(10));

    drop(nats_client);
    runner.run().await;
}

async fn initialize_shared_dependencies(
    config: &ServiceConfig,
) -> anyhow::Result<(
    Arc<NatsClient>,
    Arc<NatsKvDocumentStore>,
    Arc<dyn DeviceController>,
)> {
    info!("Initializing NATS...");
    let nats_client = NatsClient::connect(
        &config.nats_url,
        Duration::from_secs(config.startup_timeout_secs),
    )
    .await?;
    nats_client.ensure_stream(&config.telemetry_stream).await?;

    info!("Initializing document store...");
    let bucket = nats_client
        .ensure_key_value_bucket(&config.documents_bucket)
        .await?;
    let document_store = Arc::new(NatsKvDocumentStore::new(bucket));

    info!("Initializing device cloud client...");
    let credentials = load_credentials(&config.particle_login_file)?;
    let particle_client = ParticleClient::new(
        ParticleConfig {
            base_url: config.particle_api_url.clone(),
            ..Default::default()
        },
        credentials,
    )?;
    // A failed login is retried on the first device call
    if let Err(e) = particle_client.login().await {
        error!(error = %e, "Initial device cloud login failed");
    }

    let device_controller: Arc<dyn DeviceController> = Arc::new(particle_client);
    Ok((Arc::new(nats_client), document_store, device_controller))
}
