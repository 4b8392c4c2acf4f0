use tonic::Status;
use virt_csi_host::Error as HostError;

/// Status for a control plane failure without an RPC specific meaning.
/// The message is kept verbatim.
pub(crate) fn host_status(err: HostError) -> Status {
  let message = err.to_string();
  match err {
    HostError::Cancelled => Status::cancelled(message),
    ref e if e.is_not_found() => Status::not_found(message),
    HostError::Store(ref e) if e.is_transport() => Status::unavailable(message),
    _ => Status::internal(message),
  }
}
