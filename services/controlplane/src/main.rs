//! fnplane control-plane entry point.
//!
//! Loads configuration, builds the services, checks the store and serves
//! `/metrics` until Ctrl-C.
use anyhow::Context;
use fnplane_controlplane::app::ControlPlane;
use fnplane_controlplane::config::ControlPlaneConfig;
use fnplane_controlplane::observability;
use std::future::Future;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ControlPlaneConfig::from_env_or_yaml().context("load control plane config")?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(config: ControlPlaneConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("fnplane-controlplane")?;
    let plane = ControlPlane::from_config(&config).await?;
    plane
        .store
        .health_check()
        .await
        .context("store health check")?;
    tracing::info!(
        backend = plane.store.backend_name(),
        storage = ?config.storage,
        "control plane ready"
    );

    observability::serve_metrics(metrics_handle, config.metrics_bind, shutdown)
        .await
        .context("serve metrics")?;
    tracing::info!("control plane stopped");
    Ok(())
}
