use std::{convert::TryFrom, fmt};
use tracing::{error, field, info, Span};

pub(crate) trait Record: Sized {
  fn record_field(self, field: &'static str) -> Self;

  #[inline]
  fn record_request(self) -> Self {
    self.record_field("request")
  }

  #[inline]
  fn record_response(self) -> Self {
    self.record_field("response")
  }
}

impl<T: fmt::Debug> Record for T {
  #[inline]
  fn record_field(self, field: &'static str) -> Self {
    Span::current().record(field, field::debug(&self));
    self
  }
}

/// Converts the wire request into its typed form and records it on the
/// current span. Malformed requests are logged and rejected.
pub(crate) fn record_request<P, T>(request: tonic::Request<P>) -> Result<T, tonic::Status>
where
  T: TryFrom<P, Error = tonic::Status> + fmt::Debug,
{
  match T::try_from(request.into_inner()) {
    Ok(request) => {
      info!(?request, "request received");
      Ok(request.record_request())
    }

    Err(status) => {
      error!(code = ?status.code(), message = status.message(), "malformed request");
      Err(status)
    }
  }
}

/// Records the outcome of a service call, converting failures into a
/// gRPC status.
pub(crate) fn record_response<T, E>(result: Result<T, E>) -> Result<T, tonic::Status>
where
  T: fmt::Debug,
  E: Into<tonic::Status>,
{
  match result {
    Ok(response) => {
      info!(?response, "request completed");
      Ok(response.record_response())
    }

    Err(err) => {
      let status = err.into();
      error!(code = ?status.code(), message = status.message(), "request failed");
      Err(status)
    }
  }
}
