use async_trait::async_trait;
use kube::{
  api::{DeleteParams, ListParams, PostParams},
  Api, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("resource not found")]
  NotFound,

  #[error("resource already exists")]
  AlreadyExists,

  #[error(transparent)]
  Api(kube::Error),
}

impl StoreError {
  /// Whether the API server could not be reached at all, as opposed to
  /// rejecting the request.
  pub fn is_transport(&self) -> bool {
    matches!(
      self,
      StoreError::Api(kube::Error::HyperError(_)) | StoreError::Api(kube::Error::Service(_))
    )
  }
}

impl From<kube::Error> for StoreError {
  fn from(e: kube::Error) -> Self {
    match &e {
      kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound,
      kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
        StoreError::AlreadyExists
      }
      _ => StoreError::Api(e),
    }
  }
}

/// A namespaced collection of resources of kind `K`.
#[async_trait]
pub trait ObjectStore<K>: Send + Sync + 'static
where
  K: Send + Sync + 'static,
{
  async fn get(&self, name: &str) -> Result<K, StoreError>;

  /// Objects matching an equality-based label selector such as
  /// `a=b,c=d`.
  async fn list(&self, label_selector: &str) -> Result<Vec<K>, StoreError>;

  async fn create(&self, object: &K) -> Result<K, StoreError>;

  async fn replace(&self, name: &str, object: &K) -> Result<K, StoreError>;

  async fn delete(&self, name: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<K> ObjectStore<K> for Api<K>
where
  K: Resource + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
{
  async fn get(&self, name: &str) -> Result<K, StoreError> {
    Ok(Api::get(self, name).await?)
  }

  async fn list(&self, label_selector: &str) -> Result<Vec<K>, StoreError> {
    let params = ListParams::default().labels(label_selector);
    Ok(Api::list(self, &params).await?.items)
  }

  async fn create(&self, object: &K) -> Result<K, StoreError> {
    Ok(Api::create(self, &PostParams::default(), object).await?)
  }

  async fn replace(&self, name: &str, object: &K) -> Result<K, StoreError> {
    Ok(Api::replace(self, name, &PostParams::default(), object).await?)
  }

  async fn delete(&self, name: &str) -> Result<(), StoreError> {
    Api::delete(self, name, &DeleteParams::default()).await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use kube::core::ErrorResponse;
  use test_case::test_case;

  fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
      status: "Failure".into(),
      message: format!("{} failure", reason),
      reason: reason.into(),
      code,
    })
  }

  #[test_case(404, "NotFound", "not found")]
  #[test_case(409, "AlreadyExists", "already exists")]
  #[test_case(409, "Conflict", "api")]
  #[test_case(500, "InternalError", "api")]
  fn classifies_api_errors(code: u16, reason: &str, expected: &str) {
    let actual = match StoreError::from(api_error(code, reason)) {
      StoreError::NotFound => "not found",
      StoreError::AlreadyExists => "already exists",
      StoreError::Api(_) => "api",
    };

    assert_eq!(actual, expected);
  }

  #[test]
  fn api_rejection_is_not_transport() {
    assert!(!StoreError::from(api_error(500, "InternalError")).is_transport());
  }
}
