//! origin-router binary: argument parsing, config loading and runtime setup.

use anyhow::Context;
use origin_router::config::{CliOverrides, RouterConfig};
use origin_router::server;

fn port_arg(args: &[String], flag: &str) -> anyhow::Result<Option<u16>> {
    let Some(i) = args.iter().position(|a| a == flag) else {
        return Ok(None);
    };
    let value = args
        .get(i + 1)
        .with_context(|| format!("missing value for {flag}"))?;
    let port = value
        .parse::<u16>()
        .with_context(|| format!("invalid value {value:?} for {flag}"))?;
    Ok(Some(port))
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1).cloned())
        .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
        .or_else(|| std::env::var("ROUTER_CONFIG").ok())
        .unwrap_or_else(|| "origin-router.toml".to_string());

    let overrides = CliOverrides::from_ports(
        port_arg(&args, "--port")?,
        port_arg(&args, "--admin-port")?,
    );

    let config = RouterConfig::load(&config_path, &overrides)?;

    // Build the tokio runtime first: the tonic OTLP exporter needs a reactor.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let tracing_guard = router_tracing::init_tracing(&config.tracing);

        tracing::info!(
            config_path = %config_path,
            listen_address = %config.server.listen_address,
            admin_address = %config.admin.listen_address,
            admin_enabled = config.admin.enabled,
            storage_path = %config.storage.path.display(),
            otlp_export = tracing_guard.exporting(),
            "Starting origin-router"
        );

        server::run(config).await
    })
}
