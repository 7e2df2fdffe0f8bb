use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgAction, Command};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use docvault::{
    client::{
        DocumentSource, ExtractionLocus, HttpExtractionApi, HybridExtractionClient,
        HybridFailoverController, LocalDocument, PollEvent,
    },
    config::Config,
    models::{DocumentCategory, ExtractionSettings, QualityHint},
    ocr::{MultiPassArbitrator, TesseractEngine},
    storage::DocumentPayload,
};

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let matches = Command::new("extract_client")
        .about("Extract a document's text on the server, falling back to local recognition")
        .arg(
            Arg::new("document-id")
                .help("Server-side document ID")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("server")
                .help("Base URL of the extraction server")
                .long("server")
                .short('s')
                .default_value("http://localhost:8000"),
        )
        .arg(
            Arg::new("file")
                .help("Local copy of the document, used for failover")
                .long("file")
                .short('f')
                .value_name("PATH")
                .conflicts_with("url"),
        )
        .arg(
            Arg::new("url")
                .help("Where the document can be downloaded for failover")
                .long("url")
                .value_name("URL"),
        )
        .arg(
            Arg::new("category")
                .help("Document category when it cannot be sniffed from --file")
                .long("category")
                .value_parser(["structured-text", "raster-image", "unsupported"])
                .default_value("raster-image"),
        )
        .arg(
            Arg::new("language")
                .help("Recognition language, e.g. eng or eng+deu")
                .long("language")
                .short('l')
                .default_value("eng"),
        )
        .arg(
            Arg::new("quality")
                .help("Quality hint passed to the recognition engine")
                .long("quality")
                .value_parser(["fast", "balanced", "high"])
                .default_value("balanced"),
        )
        .arg(
            Arg::new("advanced")
                .help("Let the arbitrator try every fallback language")
                .long("advanced")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-failover")
                .help("Never extract locally")
                .long("no-failover")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("failover-on-slow")
                .help("Switch to local extraction as soon as the server is slow")
                .long("failover-on-slow")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("single-pass")
                .help("Run one recognition pass locally instead of arbitrating")
                .long("single-pass")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let document_id = matches
        .get_one::<String>("document-id")
        .map(|s| Uuid::parse_str(s))
        .transpose()
        .context("document ID must be a UUID")?
        .ok_or_else(|| anyhow!("missing document ID"))?;
    let server = matches
        .get_one::<String>("server")
        .ok_or_else(|| anyhow!("missing server URL"))?;
    let language = matches
        .get_one::<String>("language")
        .cloned()
        .unwrap_or_else(|| "eng".to_string());
    let quality = matches
        .get_one::<String>("quality")
        .map(|q| QualityHint::from_str(q))
        .transpose()
        .map_err(|e| anyhow!(e))?
        .unwrap_or_default();

    let (source, category) = match (matches.get_one::<String>("file"), matches.get_one::<String>("url")) {
        (Some(path), _) => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("could not read {}", path))?;
            let payload = DocumentPayload::sniffed(bytes, Some(path));
            info!("{} sniffed as {} ({})", path, payload.mime_type, payload.category);
            (Some(DocumentSource::Bytes(payload.bytes)), payload.category)
        }
        (None, url) => {
            let category = matches
                .get_one::<String>("category")
                .map(|c| DocumentCategory::from_str(c))
                .transpose()
                .map_err(|e| anyhow!(e))?
                .unwrap_or(DocumentCategory::RasterImage);
            (url.map(|u| DocumentSource::Url(u.clone())), category)
        }
    };

    let config = Config::from_env()?;
    let api = Arc::new(HttpExtractionApi::new(server, Duration::from_secs(30))?);

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut client = HybridExtractionClient::new(api, config.poller_config())
        .failover_on_slow(matches.get_flag("failover-on-slow"))
        .with_events(events_tx);

    let wants_failover = !matches.get_flag("no-failover");
    let document = match source {
        Some(source) => {
            if wants_failover {
                let engine = Arc::new(TesseractEngine::new(config.engine_config()));
                let mut failover =
                    HybridFailoverController::new(MultiPassArbitrator::new(engine, config.arbitration_config()));
                if matches.get_flag("single-pass") {
                    failover = failover.single_pass();
                }
                client = client.with_failover(failover);
            }
            LocalDocument {
                document_id,
                category,
                source,
            }
        }
        None => {
            if wants_failover {
                warn!("No --file or --url given, local failover is disabled");
            }
            LocalDocument {
                document_id,
                category,
                source: DocumentSource::Bytes(Arc::from(Vec::new())),
            }
        }
    };

    let mut settings = ExtractionSettings::new(language, category);
    settings.quality_hint = quality;
    settings.advanced_mode = matches.get_flag("advanced");

    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                PollEvent::Status { attempt, status } => info!("[{}] {}", attempt, status),
                PollEvent::QueryFailed { attempt, error, .. } => warn!("[{}] status check failed: {}", attempt, error),
                PollEvent::StallRestart { attempt } => warn!("[{}] job looked stuck, resubmitted", attempt),
                PollEvent::Slow { attempt } => warn!("[{}] extraction is taking longer than usual", attempt),
            }
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let result = client.extract(&document, &settings, &cancel).await?;

    let locus = match result.locus {
        ExtractionLocus::Server => "server",
        ExtractionLocus::Local => "local",
    };
    info!(
        "✅ Extracted on {} with {:.1}% confidence, {} page(s) in {}ms",
        locus, result.confidence, result.page_count, result.processing_time_ms
    );
    if let Some(reason) = &result.failover_reason {
        info!("Fell back to local extraction because: {}", reason);
    }
    println!("{}", result.text);

    Ok(())
}
