//! In-memory [`ObjectStore`] for tests.

use crate::{ObjectStore, StoreError};
use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use std::{
  collections::{BTreeMap, HashMap, VecDeque},
  sync::{Mutex, MutexGuard, PoisonError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
  Get,
  List,
  Create,
  Replace,
  Delete,
}

/// A call made against a [`FakeStore`], with the resource name (or label
/// selector for lists).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreAction {
  Get(String),
  List(String),
  Create(String),
  Replace(String),
  Delete(String),
}

impl StoreAction {
  pub fn verb(&self) -> Verb {
    match self {
      StoreAction::Get(_) => Verb::Get,
      StoreAction::List(_) => Verb::List,
      StoreAction::Create(_) => Verb::Create,
      StoreAction::Replace(_) => Verb::Replace,
      StoreAction::Delete(_) => Verb::Delete,
    }
  }

  pub fn is_mutation(&self) -> bool {
    matches!(self.verb(), Verb::Create | Verb::Replace | Verb::Delete)
  }
}

type Hook<K> = Box<dyn Fn(&mut K) + Send>;

struct FakeStoreInner<K> {
  objects: BTreeMap<String, K>,
  log: Vec<StoreAction>,
  failures: HashMap<Verb, VecDeque<StoreError>>,
  on_create: Option<Hook<K>>,
}

/// Objects keyed by name. Deletes take effect immediately; a create hook can
/// stand in for the remote reconciler.
pub struct FakeStore<K>(Mutex<FakeStoreInner<K>>);

impl<K> FakeStore<K>
where
  K: Resource + Clone + Send + Sync + 'static,
{
  pub fn new(objects: impl IntoIterator<Item = K>) -> Self {
    let objects = objects
      .into_iter()
      .map(|o| (o.name_any(), o))
      .collect();

    Self(Mutex::new(FakeStoreInner {
      objects,
      log: Vec::new(),
      failures: HashMap::new(),
      on_create: None,
    }))
  }

  /// Run `hook` on every object as it is created, e.g. to mark it ready.
  pub fn with_create_hook(self, hook: impl Fn(&mut K) + Send + 'static) -> Self {
    self.lock().on_create = Some(Box::new(hook));
    self
  }

  /// Fail the next `verb` call with `error`. Queued errors are returned in
  /// order.
  pub fn fail_next(&self, verb: Verb, error: StoreError) {
    self
      .lock()
      .failures
      .entry(verb)
      .or_default()
      .push_back(error);
  }

  pub fn insert(&self, object: K) {
    self.lock().objects.insert(object.name_any(), object);
  }

  pub fn update(&self, name: &str, f: impl FnOnce(&mut K)) {
    if let Some(object) = self.lock().objects.get_mut(name) {
      f(object);
    }
  }

  pub fn object(&self, name: &str) -> Option<K> {
    self.lock().objects.get(name).cloned()
  }

  pub fn objects(&self) -> Vec<K> {
    self.lock().objects.values().cloned().collect()
  }

  pub fn get_log(&self) -> Vec<StoreAction> {
    self.lock().log.clone()
  }

  pub fn reset_log(&self) {
    self.lock().log.clear();
  }

  /// Number of create, replace and delete calls made so far.
  pub fn mutations(&self) -> usize {
    self.lock().log.iter().filter(|a| a.is_mutation()).count()
  }

  fn lock(&self) -> MutexGuard<'_, FakeStoreInner<K>> {
    self.0.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn record(&self, action: StoreAction) -> Result<MutexGuard<'_, FakeStoreInner<K>>, StoreError> {
    let mut inner = self.lock();
    let verb = action.verb();
    inner.log.push(action);
    let failure = inner.failures.get_mut(&verb).and_then(VecDeque::pop_front);
    match failure {
      Some(e) => Err(e),
      None => Ok(inner),
    }
  }
}

fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
  selector
    .split(',')
    .filter(|term| !term.is_empty())
    .all(|term| match term.split_once('=') {
      Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
      None => labels.contains_key(term),
    })
}

#[async_trait]
impl<K> ObjectStore<K> for FakeStore<K>
where
  K: Resource + Clone + Send + Sync + 'static,
{
  async fn get(&self, name: &str) -> Result<K, StoreError> {
    let inner = self.record(StoreAction::Get(name.to_owned()))?;
    inner.objects.get(name).cloned().ok_or(StoreError::NotFound)
  }

  async fn list(&self, label_selector: &str) -> Result<Vec<K>, StoreError> {
    let inner = self.record(StoreAction::List(label_selector.to_owned()))?;
    Ok(
      inner
        .objects
        .values()
        .filter(|o| matches_selector(o.labels(), label_selector))
        .cloned()
        .collect(),
    )
  }

  async fn create(&self, object: &K) -> Result<K, StoreError> {
    let name = object.name_any();
    let mut inner = self.record(StoreAction::Create(name.clone()))?;
    if inner.objects.contains_key(&name) {
      return Err(StoreError::AlreadyExists);
    }

    let mut object = object.clone();
    if let Some(hook) = &inner.on_create {
      hook(&mut object);
    }

    inner.objects.insert(name, object.clone());
    Ok(object)
  }

  async fn replace(&self, name: &str, object: &K) -> Result<K, StoreError> {
    let mut inner = self.record(StoreAction::Replace(name.to_owned()))?;
    match inner.objects.get_mut(name) {
      Some(existing) => {
        *existing = object.clone();
        Ok(object.clone())
      }
      None => Err(StoreError::NotFound),
    }
  }

  async fn delete(&self, name: &str) -> Result<(), StoreError> {
    let mut inner = self.record(StoreAction::Delete(name.to_owned()))?;
    inner
      .objects
      .remove(name)
      .map(|_| ())
      .ok_or(StoreError::NotFound)
  }
}
