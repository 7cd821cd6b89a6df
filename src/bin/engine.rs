use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use measure_engine::{
    agents::{AgentRegistry, LivenessSweeper},
    catalog::MeasureCatalog,
    config::{StorageConfig, read_config_file},
    executor::Executor,
    logging::MemoryLogSink,
    measures::BuiltinCatalog,
    scheduler::Scheduler,
    store::{
        MeasurementStore,
        memory::{
            MemoryInstanceDirectory, MemoryMeasurementStore, MemoryPropertyStore,
            MemoryReferenceStore,
        },
    },
};
use tracing::{info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("measure_engine", LevelFilter::TRACE),
        ("engine", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    // Collaborator stores. Instances, properties and references are seeded
    // from the config file; measurements go to the configured backend.
    let instances = Arc::new(MemoryInstanceDirectory::new());
    let properties = Arc::new(MemoryPropertyStore::new());
    let references = Arc::new(MemoryReferenceStore::new());

    let measurements: Arc<dyn MeasurementStore> = match config.storage.clone().unwrap_or_default()
    {
        StorageConfig::Memory => Arc::new(MemoryMeasurementStore::new()),
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => {
            Arc::new(measure_engine::store::sqlite::SqliteMeasurementStore::new(&path).await?)
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("sqlite storage requires the 'storage-sqlite' feature")
        }
    };

    let catalog: Arc<dyn MeasureCatalog> = Arc::new(BuiltinCatalog::with_defaults());
    let logs = Arc::new(MemoryLogSink::with_capacity(config.retained_logs));
    let registry = Arc::new(AgentRegistry::new());

    let executor = Arc::new(Executor::new(
        catalog.clone(),
        instances.clone(),
        properties.clone(),
        references.clone(),
        measurements,
    ));
    let scheduler = Arc::new(Scheduler::new(
        executor.clone(),
        catalog.clone(),
        instances.clone(),
        properties.clone(),
        registry.clone(),
        logs.clone(),
    ));

    // Seed and schedule the configured instances.
    if let Some(instance_configs) = &config.instances {
        for instance_config in instance_configs {
            let instance = instance_config.to_instance();
            instances.insert(instance.clone()).await;
            for property in instance_config.to_properties() {
                properties.insert(property).await;
            }
            for reference in instance_config.to_references() {
                references.add(reference).await;
            }

            if scheduler.schedule_measure(&instance).await {
                info!(instance = %instance.instance_name, "scheduled");
            } else {
                warn!(instance = %instance.instance_name, "not eligible for scheduling");
            }
        }
    }

    let sweeper = LivenessSweeper::spawn(
        registry.clone(),
        scheduler.clone(),
        instances.clone(),
        Duration::from_secs(config.sweep_interval_secs),
    );

    #[cfg(feature = "api")]
    if let Some(api) = &config.api {
        let api_config = measure_engine::api::ApiConfig {
            bind_addr: api.bind,
            enable_cors: api.enable_cors,
        };
        let state = measure_engine::api::ApiState {
            scheduler: scheduler.clone(),
            executor: executor.clone(),
            registry: registry.clone(),
            instances: instances.clone(),
            logs: logs.clone(),
        };
        measure_engine::api::spawn_api_server(api_config, state).await?;
    }

    info!("engine running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    sweeper.shutdown().await;

    Ok(())
}
