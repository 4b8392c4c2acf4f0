use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::Parser;
use std::{
  net::{SocketAddr, ToSocketAddrs},
  path::PathBuf,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("unsupported CSI endpoint {0:?}: only unix sockets are served")]
  UnsupportedEndpoint(String),

  #[error("CSI endpoint {0:?} has no socket path")]
  EmptySocketPath(String),

  #[error("invalid liveness endpoint {0:?}: {1}")]
  InvalidLivenessEndpoint(String, String),

  #[error("HOST_KUBECONFIG is not valid base64: {0}")]
  KubeconfigEncoding(#[from] base64::DecodeError),
}

/// Process configuration, from flags and the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "virtualization-csi-driver", version, about)]
pub struct Config {
  /// CSI endpoint, e.g. `unix:///csi/csi.sock`.
  #[arg(long)]
  pub csi_endpoint: String,

  /// Address of the liveness HTTP endpoint, e.g. `:9808`.
  #[arg(long)]
  pub liveness_endpoint: Option<String>,

  /// Log at debug level unless `RUST_LOG` says otherwise.
  #[arg(long)]
  pub debug: bool,

  /// Base64 encoded kubeconfig of the control plane cluster.
  #[arg(long, env = "HOST_KUBECONFIG", hide_env_values = true)]
  pub host_kubeconfig: String,

  /// Namespace disks and attachments live in.
  #[arg(long, env = "HOST_NAMESPACE")]
  pub host_namespace: String,

  /// Name of the virtual machine this process runs in.
  #[arg(long, env = "NODE_NAME")]
  pub node_name: String,
}

impl Config {
  pub fn socket_path(&self) -> Result<PathBuf, ConfigError> {
    parse_csi_endpoint(&self.csi_endpoint)
  }

  pub fn liveness_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
    self
      .liveness_endpoint
      .as_deref()
      .map(parse_liveness_endpoint)
      .transpose()
  }

  pub fn kubeconfig_yaml(&self) -> Result<String, ConfigError> {
    let bytes = STANDARD.decode(self.host_kubeconfig.trim())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
  }

  /// Filter directive used when `RUST_LOG` is unset.
  pub fn default_log_level(&self) -> &'static str {
    if self.debug {
      "debug"
    } else {
      "info"
    }
  }
}

/// Socket path of a `unix://` endpoint. Both `unix:///csi/csi.sock` and
/// `unix:/csi/csi.sock` name `/csi/csi.sock`.
pub fn parse_csi_endpoint(endpoint: &str) -> Result<PathBuf, ConfigError> {
  let path = endpoint
    .strip_prefix("unix:")
    .ok_or_else(|| ConfigError::UnsupportedEndpoint(endpoint.to_owned()))?;
  let path = path.strip_prefix("//").unwrap_or(path);

  if path.is_empty() {
    return Err(ConfigError::EmptySocketPath(endpoint.to_owned()));
  }

  Ok(PathBuf::from(path))
}

/// `host:port`, or `:port` for all interfaces.
pub fn parse_liveness_endpoint(endpoint: &str) -> Result<SocketAddr, ConfigError> {
  let invalid = |e: String| ConfigError::InvalidLivenessEndpoint(endpoint.to_owned(), e);

  let addr = match endpoint.strip_prefix(':') {
    Some(port) => format!("0.0.0.0:{}", port),
    None => endpoint.to_owned(),
  };

  addr
    .to_socket_addrs()
    .map_err(|e| invalid(e.to_string()))?
    .next()
    .ok_or_else(|| invalid("no address".to_owned()))
}
