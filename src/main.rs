use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use docvault::{
    build_extraction_service,
    config::Config,
    db::Database,
    ocr::{health::OcrHealthChecker, InMemoryJobRegistry, JobRegistry, TesseractEngine},
    storage::FilesystemPayloadSource,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let (registry, db): (Arc<dyn JobRegistry>, Option<Database>) = match &config.database_url {
        Some(url) => {
            let db = Database::new(url).await?;
            info!("Running SQLx migrations...");
            db.migrate().await?;
            info!("✅ Extraction jobs are persisted in Postgres");
            (Arc::new(db.clone()), Some(db))
        }
        None => {
            warn!("DATABASE_URL not set, extraction jobs are kept in memory only");
            (Arc::new(InMemoryJobRegistry::new()), None)
        }
    };

    let engine_config = config.engine_config();
    let checker = OcrHealthChecker::new(engine_config.tessdata_path.clone());
    let known_languages = match checker.check_tesseract_installation() {
        Ok(version) => {
            info!("✅ Found {}", version);
            match checker.get_available_languages() {
                Ok(languages) => {
                    info!("Installed recognition languages: {}", languages.join(", "));
                    Some(languages)
                }
                Err(e) => {
                    warn!("Could not list recognition languages, skipping validation: {}", e);
                    None
                }
            }
        }
        Err(e) => {
            warn!("❌ {}. Image extraction will fail until it is installed", e);
            None
        }
    };

    let payloads = Arc::new(FilesystemPayloadSource::new(&config.upload_path));
    let engine = Arc::new(TesseractEngine::new(engine_config));
    let mut service = build_extraction_service(&config, registry, payloads, engine);
    if let Some(languages) = known_languages {
        service = service.with_known_languages(languages);
    }

    // Jobs left in flight by a previous run never finish on their own
    match service.recover_stale_jobs().await {
        Ok(0) => {}
        Ok(recovered) => info!("Marked {} stale extraction jobs as errored", recovered),
        Err(e) => warn!("Stale job recovery failed: {}", e),
    }

    let state = Arc::new(AppState {
        service,
        config: config.clone(),
        db,
    });

    let app = docvault::create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.server_address).await?;
    info!("Server starting on {}", config.server_address);

    axum::serve(listener, app).await?;

    Ok(())
}
