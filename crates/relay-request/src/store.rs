//! The shared result store.
//!
//! Every operation in a chain shares one [`ResultStore`]. An operation writes
//! its decoded result exactly once, under its own [`OperationId`], through a
//! [`ResultSlot`] only it can obtain. Deferred inputs never touch the store
//! directly: they read a [`ResultSnapshot`] taken when their operation starts.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use crate::error::RequestError;

/// Process-unique identity of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(Uuid);

impl OperationId {
  pub fn new() -> Self {
    Self(Uuid::new_v4())
  }
}

impl Default for OperationId {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for OperationId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.0.fmt(f)
  }
}

/// A decoded response, type-erased so operations with different serializers
/// can share one store.
pub type ResultValue = Arc<dyn Any + Send + Sync>;

type Aliases = Arc<HashMap<OperationId, OperationId>>;

/// Mapping from operation identity to decoded result, shared by reference.
///
/// Cloning a `ResultStore` clones the handle, not the contents.
#[derive(Clone, Default)]
pub struct ResultStore {
  inner: Arc<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
  entries: RwLock<HashMap<OperationId, ResultValue>>,
  /// Identities of operations that were copied, mapped to their copies.
  aliases: Aliases,
}

impl ResultStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// A store where lookups by an original operation's id resolve to its copy.
  pub(crate) fn with_aliases(aliases: HashMap<OperationId, OperationId>) -> Self {
    Self {
      inner: Arc::new(StoreInner {
        entries: RwLock::new(HashMap::new()),
        aliases: Arc::new(aliases),
      }),
    }
  }

  pub(crate) fn aliases(&self) -> &HashMap<OperationId, OperationId> {
    &self.inner.aliases
  }

  /// Hand out the write slot for `id`.
  pub(crate) fn slot(&self, id: OperationId) -> ResultSlot {
    ResultSlot {
      id,
      store: self.clone(),
    }
  }

  /// Copy the current entries for lock-free reading.
  pub fn snapshot(&self) -> ResultSnapshot {
    let entries = self
      .inner
      .entries
      .read()
      .unwrap_or_else(|e| e.into_inner())
      .clone();

    ResultSnapshot {
      entries,
      aliases: self.inner.aliases.clone(),
    }
  }

  /// Read a stored result as `T`. Returns `None` if absent or of another type.
  pub fn get<T: Any + Send + Sync>(&self, id: OperationId) -> Option<Arc<T>> {
    let entries = self.inner.entries.read().unwrap_or_else(|e| e.into_inner());
    let value = entries
      .get(&id)
      .or_else(|| self.inner.aliases.get(&id).and_then(|alias| entries.get(alias)))?;
    value.clone().downcast::<T>().ok()
  }

  pub fn contains(&self, id: OperationId) -> bool {
    self.snapshot().contains(id)
  }

  pub fn len(&self) -> usize {
    self.inner.entries.read().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Whether both handles refer to the same store.
  pub fn ptr_eq(&self, other: &ResultStore) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }
}

impl fmt::Debug for ResultStore {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ResultStore")
      .field("entries", &self.len())
      .field("aliases", &self.inner.aliases.len())
      .finish()
  }
}

/// Write access to one key of a store. Consumed by the write.
pub(crate) struct ResultSlot {
  id: OperationId,
  store: ResultStore,
}

impl ResultSlot {
  /// Store the value. An existing entry is never replaced.
  pub(crate) fn write(self, value: ResultValue) -> Result<(), RequestError> {
    let mut entries = self
      .store
      .inner
      .entries
      .write()
      .unwrap_or_else(|e| e.into_inner());

    if entries.contains_key(&self.id) {
      return Err(RequestError::ResultAlreadyStored {
        operation_id: self.id,
      });
    }
    entries.insert(self.id, value);
    Ok(())
  }
}

/// Read-only view of a store at one point in time.
#[derive(Clone, Default)]
pub struct ResultSnapshot {
  entries: HashMap<OperationId, ResultValue>,
  aliases: Aliases,
}

impl ResultSnapshot {
  /// Look up an operation's decoded result as `T`.
  ///
  /// Absent results and type mismatches both yield `None`; neither blocks.
  pub fn get<T: Any>(&self, id: OperationId) -> Option<&T> {
    self.raw(id).and_then(|value| (**value).downcast_ref::<T>())
  }

  pub fn contains(&self, id: OperationId) -> bool {
    self.raw(id).is_some()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  fn raw(&self, id: OperationId) -> Option<&ResultValue> {
    self
      .entries
      .get(&id)
      .or_else(|| self.aliases.get(&id).and_then(|alias| self.entries.get(alias)))
  }
}

impl fmt::Debug for ResultSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ResultSnapshot")
      .field("entries", &self.entries.len())
      .finish()
  }
}
