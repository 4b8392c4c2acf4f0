use crate::Driver;
use std::{
  future::Future,
  io,
  path::{Path, PathBuf},
  sync::Arc,
};
use thiserror::Error;
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tracing::info;
use virt_csi_mount_utils::Mounter;
use virt_csi_proto::{Controller, Node};

#[derive(Debug, Error)]
pub enum ServeError {
  #[error("failed to remove stale socket {}", path.display())]
  RemoveStaleSocket { path: PathBuf, source: io::Error },

  #[error("failed to listen on {}", path.display())]
  Bind { path: PathBuf, source: io::Error },

  #[error(transparent)]
  Transport(#[from] tonic::transport::Error),
}

/// Bind `socket`, replacing a socket file left over by a previous run.
pub fn bind(socket: &Path) -> Result<UnixListener, ServeError> {
  match std::fs::remove_file(socket) {
    Ok(()) => info!(socket = %socket.display(), "removed stale socket"),
    Err(e) if e.kind() == io::ErrorKind::NotFound => (),
    Err(source) => {
      return Err(ServeError::RemoveStaleSocket {
        path: socket.to_owned(),
        source,
      })
    }
  }

  UnixListener::bind(socket).map_err(|source| ServeError::Bind {
    path: socket.to_owned(),
    source,
  })
}

/// Serve the Identity, Controller and Node services of `driver` on
/// `listener` until `shutdown` completes.
pub async fn serve<M: Mounter>(
  driver: Arc<Driver<M>>,
  listener: UnixListener,
  shutdown: impl Future<Output = ()>,
) -> Result<(), ServeError> {
  let controller = Controller::new(driver.clone());
  let node = Node::new(driver);

  if let Ok(addr) = listener.local_addr() {
    info!(socket = ?addr.as_pathname(), "serving CSI");
  }

  Server::builder()
    .add_service(controller.identity_server())
    .add_service(controller.controller_server())
    .add_service(node.node_server())
    .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown)
    .await?;

  info!("CSI server stopped");
  Ok(())
}
