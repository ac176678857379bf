//! Deferred inputs: values computed from earlier results at start time.

use std::any::Any;
use std::fmt;
use std::ops::Add;
use std::sync::Arc;

use crate::store::{OperationId, ResultSnapshot};

/// A value computed when its operation starts, by reading the result store.
///
/// `Deferred` holds a resolver, never a reference to another operation. A
/// deferred input built from step A's result carries only A's id, so it can be
/// cloned into copies of a chain and resolved against the copy's store.
///
/// Resolving to `None` means "absent": the key is omitted from the request.
pub struct Deferred<T> {
  resolve: Arc<dyn Fn(&ResultSnapshot) -> Option<T> + Send + Sync>,
}

impl<T> Clone for Deferred<T> {
  fn clone(&self) -> Self {
    Self {
      resolve: self.resolve.clone(),
    }
  }
}

impl<T: 'static> Deferred<T> {
  pub fn new<F>(resolve: F) -> Self
  where
    F: Fn(&ResultSnapshot) -> Option<T> + Send + Sync + 'static,
  {
    Self {
      resolve: Arc::new(resolve),
    }
  }

  /// Always resolves to `value`.
  pub fn ready(value: T) -> Self
  where
    T: Clone + Send + Sync,
  {
    Self::new(move |_| Some(value.clone()))
  }

  /// Always resolves to absence.
  pub fn absent() -> Self {
    Self::new(|_| None)
  }

  /// Read the decoded result of operation `id` as `D` and extract a value.
  ///
  /// Yields `None` when the result is missing or was decoded to another type.
  pub fn from_result<D, F>(id: OperationId, extract: F) -> Self
  where
    D: Any,
    F: Fn(&D) -> Option<T> + Send + Sync + 'static,
  {
    Self::new(move |snapshot| snapshot.get::<D>(id).and_then(&extract))
  }

  pub fn value(&self, snapshot: &ResultSnapshot) -> Option<T> {
    (self.resolve)(snapshot)
  }

  pub fn map<U, F>(self, f: F) -> Deferred<U>
  where
    U: 'static,
    F: Fn(T) -> U + Send + Sync + 'static,
  {
    Deferred::new(move |snapshot| self.value(snapshot).map(&f))
  }
}

/// Concatenation. Absent if either side is absent.
impl<T: 'static> Add for Deferred<Vec<T>> {
  type Output = Deferred<Vec<T>>;

  fn add(self, rhs: Self) -> Self::Output {
    Deferred::new(move |snapshot| {
      let mut left = self.value(snapshot)?;
      left.extend(rhs.value(snapshot)?);
      Some(left)
    })
  }
}

impl<T> fmt::Debug for Deferred<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Deferred").finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::ResultStore;
  use serde_json::{Value, json};

  fn store_with(id: OperationId, value: Value) -> ResultStore {
    let store = ResultStore::new();
    store.slot(id).write(Arc::new(value)).unwrap();
    store
  }

  #[test]
  fn test_from_result_reads_snapshot() {
    let id = OperationId::new();
    let store = store_with(id, json!({"id": 1, "name": "ada"}));

    let user_id = Deferred::from_result(id, |v: &Value| v.get("id").cloned());
    let missing = Deferred::from_result(OperationId::new(), |v: &Value| v.get("id").cloned());

    assert_eq!(user_id.value(&store.snapshot()), Some(json!(1)));
    assert_eq!(missing.value(&store.snapshot()), None);
  }

  #[test]
  fn test_unproduced_result_is_absent() {
    let id = OperationId::new();
    let deferred = Deferred::from_result(id, |v: &Value| Some(v.clone()));

    assert_eq!(deferred.value(&ResultStore::new().snapshot()), None);
  }

  #[test]
  fn test_map() {
    let id = OperationId::new();
    let store = store_with(id, json!({"token": "abc"}));

    let header = Deferred::from_result(id, |v: &Value| v["token"].as_str().map(str::to_string))
      .map(|token| format!("Bearer {token}"));

    assert_eq!(
      header.value(&store.snapshot()),
      Some("Bearer abc".to_string())
    );
  }

  #[test]
  fn test_add_concatenates() {
    let sum = Deferred::ready(vec![1, 2]) + Deferred::ready(vec![3]);
    assert_eq!(sum.value(&ResultSnapshot::default()), Some(vec![1, 2, 3]));
  }

  #[test]
  fn test_add_absent_side_is_absent() {
    let snapshot = ResultSnapshot::default();

    let left = Deferred::<Vec<u8>>::absent() + Deferred::ready(vec![1]);
    let right = Deferred::ready(vec![1]) + Deferred::<Vec<u8>>::absent();

    assert_eq!(left.value(&snapshot), None);
    assert_eq!(right.value(&snapshot), None);
  }
}
