use anyhow::{Context, Result};
use log::info;
use rocket::fs::FileServer;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use batch_cropper::api::fairings::cache::cache_control_fairing;
use batch_cropper::api::handlers::{
    generate_batch_routes, generate_catalog_routes, generate_preview_routes,
    generate_system_routes,
};
use batch_cropper::background::batchers::retention::{RetentionSweepTask, start_retention_sweep};
use batch_cropper::background::processors::setup::{initialize, initialize_logger};
use batch_cropper::background::processors::transformer::{SubprocessTransformer, Transformer};
use batch_cropper::catalog::{CatalogProvider, FsCatalog};
use batch_cropper::common::errors::handle_error;
use batch_cropper::common::{PREVIEW_URL_PREFIX, SERVER_RUNTIME};
use batch_cropper::config::AppConfig;
use batch_cropper::service::CropService;

fn build_rocket(config: &AppConfig, service: Arc<CropService>) -> rocket::Rocket<rocket::Build> {
    rocket::build()
        .attach(cache_control_fairing(config.public_base_url.clone()))
        .manage(service)
        .mount(PREVIEW_URL_PREFIX, FileServer::from(&config.preview_dir))
        .mount(
            config.public_base_url.as_str(),
            FileServer::from(&config.library_root),
        )
        .mount("/", generate_preview_routes())
        .mount("/", generate_batch_routes())
        .mount("/", generate_system_routes())
        .mount("/", generate_catalog_routes())
}

fn main() -> Result<()> {
    initialize_logger();
    let config = AppConfig::load().map_err(|err| handle_error(err.context("Invalid configuration")))?;

    SERVER_RUNTIME.block_on(async move {
        let start_time = Instant::now();
        let transformer: Arc<dyn Transformer> =
            Arc::new(SubprocessTransformer::from_config(&config));
        initialize(&config, transformer.as_ref())
            .await
            .map_err(|err| handle_error(err.context("Startup failed")))?;

        let catalog: Arc<dyn CatalogProvider> = Arc::new(FsCatalog::from_config(&config));
        let service = Arc::new(CropService::new(&config, catalog, transformer));

        let shutdown = CancellationToken::new();
        let watchdog = service
            .supervisor()
            .start_watchdog(config.watchdog_interval(), shutdown.clone());
        let sweep = start_retention_sweep(
            RetentionSweepTask::from_config(&config),
            config.sweep_interval(),
            shutdown.clone(),
        );
        info!(
            duration = &*format!("{:?}", start_time.elapsed());
            "Startup complete, serving {:?}", config.library_root
        );

        let result = build_rocket(&config, service).launch().await;
        shutdown.cancel();
        let _ = tokio::join!(watchdog, sweep);
        result
            .map(|_| ())
            .map_err(|err| handle_error(anyhow::Error::from(err).context("Rocket server failed")))
            .context("Server stopped with an error")
    })
}
