//! Response serializers.
//!
//! A serializer turns the raw response payload into a typed value. Absent or
//! malformed input yields `None`, which is recorded as "no result" and never
//! as an error.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::store::ResultValue;

pub trait ResponseSerializer: Send + Sync + 'static {
  type Output: Send + Sync + 'static;

  fn decode(&self, bytes: Option<&[u8]>) -> Option<Self::Output>;
}

/// Any JSON document as a [`Value`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl ResponseSerializer for JsonSerializer {
  type Output = Value;

  fn decode(&self, bytes: Option<&[u8]>) -> Option<Value> {
    serde_json::from_slice(bytes?).ok()
  }
}

/// A top-level JSON array. Other documents are treated as malformed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArraySerializer;

impl ResponseSerializer for ArraySerializer {
  type Output = Vec<Value>;

  fn decode(&self, bytes: Option<&[u8]>) -> Option<Vec<Value>> {
    match serde_json::from_slice(bytes?).ok()? {
      Value::Array(items) => Some(items),
      _ => None,
    }
  }
}

/// UTF-8 text.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerializer;

impl ResponseSerializer for StringSerializer {
  type Output = String;

  fn decode(&self, bytes: Option<&[u8]>) -> Option<String> {
    String::from_utf8(bytes?.to_vec()).ok()
  }
}

/// JSON decoded straight into `T`.
pub struct TypedSerializer<T> {
  _marker: PhantomData<fn() -> T>,
}

impl<T> TypedSerializer<T> {
  pub fn new() -> Self {
    Self {
      _marker: PhantomData,
    }
  }
}

impl<T> Default for TypedSerializer<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Clone for TypedSerializer<T> {
  fn clone(&self) -> Self {
    Self::new()
  }
}

impl<T> ResponseSerializer for TypedSerializer<T>
where
  T: DeserializeOwned + Send + Sync + 'static,
{
  type Output = T;

  fn decode(&self, bytes: Option<&[u8]>) -> Option<T> {
    serde_json::from_slice(bytes?).ok()
  }
}

pub(crate) type DecodeFn = Arc<dyn Fn(Option<&[u8]>) -> Option<ResultValue> + Send + Sync>;

pub(crate) fn erase<S: ResponseSerializer>(serializer: S) -> DecodeFn {
  Arc::new(move |bytes: Option<&[u8]>| {
    serializer
      .decode(bytes)
      .map(|value| Arc::new(value) as ResultValue)
  })
}
