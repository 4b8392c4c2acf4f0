use crate::{Error, ObjectStore, Result, StoreError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_secs(1);

/// Poll `name` until `predicate` holds.
///
/// The predicate sees `None` while the resource does not exist. Any other
/// fetch error, or an error from the predicate, ends the wait. There is no
/// retry limit: the wait runs until it succeeds, `cancel` fires, or the
/// future is dropped.
pub async fn wait_for<K, F>(
  store: &dyn ObjectStore<K>,
  name: &str,
  mut predicate: F,
  cancel: &CancellationToken,
  interval: Duration,
) -> Result<()>
where
  K: Send + Sync + 'static,
  F: FnMut(Option<&K>) -> Result<bool>,
{
  let mut polls = 0u64;
  loop {
    let fetched = tokio::select! {
      biased;
      _ = cancel.cancelled() => return Err(Error::Cancelled),
      fetched = store.get(name) => fetched,
    };
    let object = match fetched {
      Ok(v) => Some(v),
      Err(StoreError::NotFound) => None,
      Err(e) => return Err(e.into()),
    };

    polls += 1;
    if predicate(object.as_ref())? {
      debug!(resource = name, polls, "wait finished");
      return Ok(());
    }

    tokio::select! {
      biased;
      _ = cancel.cancelled() => return Err(Error::Cancelled),
      _ = tokio::time::sleep(interval) => (),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    fake::{FakeStore, StoreAction, Verb},
    resources::{VirtualMachineDisk, VirtualMachineDiskSpec, VirtualMachineDiskStatus},
  };
  use async_trait::async_trait;
  use std::sync::Arc;
  use tokio::time::Instant;

  /// An API server that accepts requests and never answers.
  struct Unresponsive;

  #[async_trait]
  impl ObjectStore<VirtualMachineDisk> for Unresponsive {
    async fn get(&self, _: &str) -> std::result::Result<VirtualMachineDisk, StoreError> {
      std::future::pending().await
    }

    async fn list(&self, _: &str) -> std::result::Result<Vec<VirtualMachineDisk>, StoreError> {
      std::future::pending().await
    }

    async fn create(&self, _: &VirtualMachineDisk) -> std::result::Result<VirtualMachineDisk, StoreError> {
      std::future::pending().await
    }

    async fn replace(
      &self,
      _: &str,
      _: &VirtualMachineDisk,
    ) -> std::result::Result<VirtualMachineDisk, StoreError> {
      std::future::pending().await
    }

    async fn delete(&self, _: &str) -> std::result::Result<(), StoreError> {
      std::future::pending().await
    }
  }

  fn disk(name: &str, phase: &str) -> VirtualMachineDisk {
    let mut disk = VirtualMachineDisk::new(name, VirtualMachineDiskSpec::default());
    disk.status = Some(VirtualMachineDiskStatus {
      phase: Some(phase.into()),
      capacity: None,
    });
    disk
  }

  fn is_ready(disk: Option<&VirtualMachineDisk>) -> Result<bool> {
    Ok(
      disk
        .and_then(|d| d.status.as_ref())
        .and_then(|s| s.phase.as_deref())
        == Some("Ready"),
    )
  }

  #[tokio::test(start_paused = true)]
  async fn returns_on_first_poll_when_satisfied() {
    let store = FakeStore::new([disk("vol-a", "Ready")]);
    let cancel = CancellationToken::new();
    let start = Instant::now();

    wait_for(&store, "vol-a", is_ready, &cancel, DEFAULT_WAIT_INTERVAL)
      .await
      .unwrap();

    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(store.get_log(), vec![StoreAction::Get("vol-a".into())]);
  }

  #[tokio::test(start_paused = true)]
  async fn polls_until_satisfied() {
    let store = Arc::new(FakeStore::new([disk("vol-a", "Provisioning")]));
    let cancel = CancellationToken::new();
    let start = Instant::now();

    let updater = {
      let store = store.clone();
      tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        store.update("vol-a", |d| {
          if let Some(status) = d.status.as_mut() {
            status.phase = Some("Ready".into());
          }
        });
      })
    };

    wait_for(&*store, "vol-a", is_ready, &cancel, DEFAULT_WAIT_INTERVAL)
      .await
      .unwrap();
    updater.await.unwrap();

    // Polls at 0s, 1s, 2s and 3s.
    assert_eq!(start.elapsed(), Duration::from_secs(3));
    assert_eq!(store.get_log().len(), 4);
  }

  #[tokio::test(start_paused = true)]
  async fn absent_resource_is_passed_as_none() {
    let store = FakeStore::<VirtualMachineDisk>::new([]);
    let cancel = CancellationToken::new();

    wait_for(&store, "vol-a", |d| Ok(d.is_none()), &cancel, DEFAULT_WAIT_INTERVAL)
      .await
      .unwrap();
  }

  #[tokio::test(start_paused = true)]
  async fn fetch_error_aborts() {
    let store = FakeStore::new([disk("vol-a", "Ready")]);
    store.fail_next(Verb::Get, StoreError::AlreadyExists);
    let cancel = CancellationToken::new();

    let err = wait_for(&store, "vol-a", is_ready, &cancel, DEFAULT_WAIT_INTERVAL)
      .await
      .unwrap_err();

    assert!(matches!(err, Error::Store(StoreError::AlreadyExists)));
  }

  #[tokio::test(start_paused = true)]
  async fn predicate_error_aborts() {
    let store = FakeStore::new([disk("vol-a", "Failed")]);
    let cancel = CancellationToken::new();

    let err = wait_for(
      &store,
      "vol-a",
      |_| Err(Error::UnexpectedState("failed".into())),
      &cancel,
      DEFAULT_WAIT_INTERVAL,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::UnexpectedState(_)));
    assert_eq!(store.get_log().len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn cancellation_ends_wait_within_one_interval() {
    let store = FakeStore::new([disk("vol-a", "Provisioning")]);
    let cancel = CancellationToken::new();
    let start = Instant::now();

    let canceller = {
      let cancel = cancel.clone();
      tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        cancel.cancel();
      })
    };

    let err = wait_for(&store, "vol-a", is_ready, &cancel, DEFAULT_WAIT_INTERVAL)
      .await
      .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(start.elapsed(), Duration::from_millis(1500));
    assert_eq!(store.get_log().len(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn cancellation_interrupts_hanging_fetch() {
    let cancel = CancellationToken::new();
    let start = Instant::now();

    let canceller = {
      let cancel = cancel.clone();
      tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        cancel.cancel();
      })
    };

    let err = wait_for(&Unresponsive, "vol-a", is_ready, &cancel, DEFAULT_WAIT_INTERVAL)
      .await
      .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(start.elapsed(), Duration::from_millis(1500));
  }
}
