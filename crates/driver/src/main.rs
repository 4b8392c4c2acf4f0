use anyhow::{Context, Result};
use clap::Parser;
use kube::{
  config::{KubeConfigOptions, Kubeconfig},
  Client,
};
use std::{io, sync::Arc};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use virt_csi_driver::{config::Config, health, server, Driver, DRIVER_NAME};
use virt_csi_host::HostClient;
use virt_csi_mount_utils::{DefaultMounter, Mounter};

async fn host_client(config: &Config, cancel: CancellationToken) -> Result<HostClient> {
  let yaml = config.kubeconfig_yaml()?;
  let kubeconfig = Kubeconfig::from_yaml(&yaml).context("failed to parse HOST_KUBECONFIG")?;
  let kube_config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
    .await
    .context("failed to load HOST_KUBECONFIG")?;
  let client = Client::try_from(kube_config).context("failed to create control plane client")?;

  Ok(HostClient::from_kube(client, &config.host_namespace).with_cancellation(cancel))
}

async fn wait_for_signal() -> io::Result<()> {
  let mut terminate = signal(SignalKind::terminate())?;
  tokio::select! {
    result = tokio::signal::ctrl_c() => result?,
    _ = terminate.recv() => (),
  }

  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  let config = Config::parse();

  tracing_subscriber::fmt()
    .json()
    .with_env_filter(
      EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_log_level())),
    )
    .with_writer(io::stderr)
    .init();

  info!(
    driver = DRIVER_NAME,
    version = env!("CARGO_PKG_VERSION"),
    node = %config.node_name,
    "starting"
  );

  let socket = config.socket_path()?;
  let liveness_addr = config.liveness_addr()?;

  let cancel = CancellationToken::new();
  let host = host_client(&config, cancel.clone()).await?;
  let mounter = <DefaultMounter as Mounter>::new()
    .await
    .context("failed to initialize mounter")?;
  let driver = Arc::new(Driver::new(host, mounter, &config.node_name));

  tokio::spawn({
    let cancel = cancel.clone();
    async move {
      match wait_for_signal().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => error!(error = %e, "failed to listen for signals, shutting down"),
      }
      cancel.cancel();
    }
  });

  let listener = server::bind(&socket)?;
  let csi = async {
    let shutdown = cancel.clone();
    server::serve(driver, listener, async move { shutdown.cancelled().await })
      .await
      .context("CSI server failed")
  };
  let liveness = async {
    let Some(addr) = liveness_addr else {
      return Ok(());
    };

    let shutdown = cancel.clone();
    health::serve(addr, async move { shutdown.cancelled().await })
      .await
      .context("liveness server failed")
  };

  let result = tokio::try_join!(csi, liveness);
  cancel.cancel();
  result?;

  info!("stopped");
  Ok(())
}
