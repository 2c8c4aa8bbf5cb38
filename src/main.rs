use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    let settings = fileport::config::Settings::from_env();
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "fileport",
        "fileport starting: RUST_LOG='{}', port={}, roots={}, auth={}",
        rust_log,
        settings.port,
        settings.root_dirs.len(),
        settings.auth_enabled()
    );

    fileport::server::run(settings).await
}
