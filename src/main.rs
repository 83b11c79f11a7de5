// Pricing report
//
// Connects to the pricing database, applies migrations, warms the
// configuration cache and logs a snapshot of recent pricing activity.

use energy_pricing::format::{render_calculation_statistics, render_price_statistics, render_trend};
use energy_pricing::{store, EngineSettings, PricingEngine, PricingError, PricingResult};
use tracing_subscriber::EnvFilter;

const REPORT_DAYS: u32 = 7;
const TREND_HORIZON_HOURS: u32 = 24;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Pricing report failed");
        std::process::exit(1);
    }
}

async fn run() -> PricingResult<()> {
    tracing::info!("Pricing report - Starting...");

    let settings = EngineSettings::from_env()?;
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| PricingError::Configuration("DATABASE_URL must be set".to_string()))?;

    tracing::info!("Connecting to database...");
    let pool = store::create_pool(&database_url).await?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| PricingError::Configuration(format!("migration failed: {}", e)))?;
    tracing::info!("Migrations completed successfully");

    let currency = settings.default_currency.clone();
    let engine = PricingEngine::new(pool, settings)?;
    engine.warm_cache().await?;

    let now = chrono::Utc::now();
    let since = now - chrono::Duration::days(i64::from(REPORT_DAYS));

    let price_stats = engine.get_price_statistics(None, Some(since), Some(now)).await;
    tracing::info!("Price changes, last {} days: {}", REPORT_DAYS, render_price_statistics(&price_stats, &currency));

    let calculation_stats = engine.get_calculation_statistics(None, REPORT_DAYS).await;
    tracing::info!(
        "Calculations, last {} days: {}",
        REPORT_DAYS,
        render_calculation_statistics(&calculation_stats, &currency)
    );

    let forecast = engine.predict_trend(None, TREND_HORIZON_HOURS).await;
    tracing::info!("Next {}h: {}", TREND_HORIZON_HOURS, render_trend(&forecast));

    engine.flush_audit().await;
    engine.metrics().log_summary();

    Ok(())
}
