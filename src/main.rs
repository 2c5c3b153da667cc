use anyhow::Context;
use tracing::info;

use moso_crawler::{init_tracing, run_pipeline, AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = AppConfig::from_env();
    info!(
        endpoint = %config.listings_endpoint,
        max_pages = config.max_pages,
        "starting listing crawl"
    );

    let summary = run_pipeline(&config)
        .await
        .context("listing crawl failed")?;

    info!(
        records = summary.records,
        pages = summary.pages_fetched,
        reference_loaded = summary.reference_loaded,
        reason = %summary.stop_reason,
        "run complete"
    );
    if let Some(exports) = &summary.exports {
        info!(
            json = %exports.raw_json.display(),
            csv = %exports.csv.display(),
            "exports written"
        );
    }
    Ok(())
}
