pub mod address;
pub mod cleaner;
pub mod config;
pub mod crawler;
pub mod errors;
pub mod export;
pub mod geo;
pub mod listings;
pub mod records;

use std::sync::Arc;

use chrono::Local;
use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use address::{normalize, normalize_detailed, NormalizedAddress, Resolution};
pub use cleaner::{clean_text, clean_value};
pub use config::{AppConfig, BoundingBox};
pub use crawler::{
    CrawlProgress, CrawlReport, CrawlSettings, CrawlState, Crawler, PageCursor, ProgressObserver,
    RawRecord, StopReason,
};
pub use errors::{AppError, AppResult};
pub use export::ExportPaths;
pub use geo::{AdminLabels, GeoReference, GeoReferenceLoader};
pub use listings::{HttpListingsClient, ListingQuery, ListingsTransport, PageRequest, PageResponse};
pub use records::{project_records, NormalizedRecord};

const SAMPLE_ADDRESS_COUNT: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub records: usize,
    pub pages_fetched: usize,
    pub final_state: CrawlState,
    pub stop_reason: StopReason,
    pub reported_total: Option<u64>,
    pub reference_loaded: bool,
    pub synthesized_addresses: usize,
    pub exports: Option<ExportPaths>,
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,moso_crawler=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}

/// Reference load, crawl, projection and export against the configured APIs.
pub async fn run_pipeline(config: &AppConfig) -> AppResult<RunSummary> {
    let transport = Arc::new(HttpListingsClient::new(config)?);
    run_pipeline_with(config, transport, None).await
}

pub async fn run_pipeline_with(
    config: &AppConfig,
    transport: Arc<dyn ListingsTransport>,
    observer: Option<ProgressObserver>,
) -> AppResult<RunSummary> {
    let loader = GeoReferenceLoader::new(config)?;
    let (reference, reference_loaded) = loader.load().await;

    let mut crawler = Crawler::new(
        transport,
        ListingQuery::from_config(config),
        CrawlSettings::from_config(config),
    );
    if let Some(observer) = observer {
        crawler = crawler.with_observer(observer);
    }
    let report = crawler.run().await;
    info!(
        records = report.record_count(),
        pages = report.pages_fetched,
        attempts = report.attempts,
        reason = %report.stop_reason,
        "crawl finished"
    );

    let rows = project_records(&report.records, reference_loaded.then_some(&reference));
    let synthesized_addresses = rows.iter().filter(|row| row.address_synthesized).count();
    if synthesized_addresses > 0 {
        warn!(
            count = synthesized_addresses,
            "addresses contain unverified ward/district labels"
        );
    }

    let exports = if report.records.is_empty() {
        warn!("no records collected; skipping export");
        None
    } else {
        let stamp = export::timestamp_label(Local::now());
        Some(export::export_run(
            &config.output_dir,
            &stamp,
            &report.records,
            &rows,
        )?)
    };

    if reference_loaded {
        for row in rows.iter().take(SAMPLE_ADDRESS_COUNT) {
            info!(
                original = %row.address_original,
                normalized = %row.address,
                "address normalization sample"
            );
        }
    }

    Ok(RunSummary {
        records: report.record_count(),
        pages_fetched: report.pages_fetched,
        final_state: report.final_state,
        stop_reason: report.stop_reason,
        reported_total: report.reported_total,
        reference_loaded,
        synthesized_addresses,
        exports,
    })
}
