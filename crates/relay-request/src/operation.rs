//! Operations: the unit of work in a chain.
//!
//! An [`Operation`] is a cheap, cloneable handle. Clones observe and control
//! the same underlying operation, which moves through
//! `Pending -> Executing -> Finished`, or to `Cancelled` from either of the
//! first two states. Terminal states are never left.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

use futures::future::BoxFuture;
use relay_transport::{
  CustomCall, Headers, HttpMethod, ParamEncoding, Parameters, ProgressFn, Transport,
  TransportError, TransportRequest, TransportResult,
};
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::builder::RequestBuilder;
use crate::callback::CallbackContext;
use crate::deferred::Deferred;
use crate::error::RequestError;
use crate::observer::ActivityObserver;
use crate::progress::ProgressSink;
use crate::serializer::{DecodeFn, JsonSerializer};
use crate::store::{OperationId, ResultSnapshot, ResultStore, ResultValue};

/// Opaque value threaded through to data handlers.
pub type PersistenceContext = Arc<dyn Any + Send + Sync>;

pub(crate) type DataHandler = Arc<
  dyn Fn(Option<&ResultValue>, Option<&TransportError>, Option<&PersistenceContext>) + Send + Sync,
>;
pub(crate) type CompletionHandler =
  Arc<dyn Fn(Option<&ResultValue>, Option<&TransportError>) + Send + Sync>;
pub(crate) type ErrorHandler = Arc<dyn Fn(&TransportError) + Send + Sync>;
pub(crate) type BlockFn = Arc<dyn Fn() + Send + Sync>;
pub(crate) type ErrorsFn = Arc<dyn Fn(Vec<TransportError>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
  Pending,
  Executing,
  Finished,
  Cancelled,
}

impl OperationState {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Finished | Self::Cancelled)
  }
}

/// How a request operation performs its call. Exactly one per operation.
pub(crate) enum Execution {
  Transport {
    transport: Arc<dyn Transport>,
    method: HttpMethod,
    path: String,
    encoding: ParamEncoding,
  },
  Custom(CustomCall),
}

impl Execution {
  fn describe(&self) -> String {
    match self {
      Self::Transport { method, path, .. } => format!("{method} {path}"),
      Self::Custom(_) => "custom".to_string(),
    }
  }
}

/// Immutable description of a request operation.
pub(crate) struct RequestSpec {
  pub(crate) execution: Execution,
  pub(crate) parameters: Parameters,
  pub(crate) headers: Headers,
  pub(crate) deferred_parameters: Vec<(String, Deferred<Value>)>,
  pub(crate) deferred_headers: Vec<(String, Deferred<String>)>,
  pub(crate) decode: DecodeFn,
  pub(crate) data_handler: Option<DataHandler>,
  pub(crate) completion: Option<CompletionHandler>,
  pub(crate) on_error: Option<ErrorHandler>,
}

impl RequestSpec {
  /// Merge deferred inputs over the static ones. Absent values remove the key.
  fn resolve_inputs(&self, snapshot: &ResultSnapshot) -> ResolvedInputs {
    let mut parameters = self.parameters.clone();
    for (key, deferred) in &self.deferred_parameters {
      match deferred.value(snapshot) {
        Some(value) => {
          parameters.insert(key.clone(), value);
        }
        None => {
          parameters.remove(key);
        }
      }
    }

    let mut headers = self.headers.clone();
    for (key, deferred) in &self.deferred_headers {
      match deferred.value(snapshot) {
        Some(value) => {
          headers.insert(key.clone(), value);
        }
        None => {
          headers.remove(key);
        }
      }
    }

    ResolvedInputs {
      parameters,
      headers,
    }
  }
}

/// The parameters and headers an operation actually sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedInputs {
  pub parameters: Parameters,
  pub headers: Headers,
}

#[derive(Clone)]
pub(crate) enum OperationKind {
  Request(Arc<RequestSpec>),
  Block(BlockFn),
  ActivityStarted(Arc<dyn ActivityObserver>),
  ActivityFinished {
    observer: Arc<dyn ActivityObserver>,
    members: Vec<Operation>,
  },
  Completion {
    block: ErrorsFn,
    members: Vec<Operation>,
  },
}

impl OperationKind {
  fn name(&self) -> &'static str {
    match self {
      Self::Request(_) => "request",
      Self::Block(_) => "block",
      Self::ActivityStarted(_) => "activity_started",
      Self::ActivityFinished { .. } => "activity_finished",
      Self::Completion { .. } => "completion",
    }
  }
}

/// Handle to one operation.
#[derive(Clone)]
pub struct Operation {
  inner: Arc<OperationInner>,
}

struct OperationInner {
  id: OperationId,
  label: Option<String>,
  kind: OperationKind,
  copy_number: u32,
  state: watch::Sender<OperationState>,
  cancel: CancellationToken,
  submitted: AtomicBool,
  predecessor: Mutex<Option<Operation>>,
  store: Mutex<ResultStore>,
  context: Mutex<Option<PersistenceContext>>,
  observer: Mutex<Option<Arc<dyn ActivityObserver>>>,
  progress_sink: Mutex<Option<ProgressSink>>,
  progress: Mutex<f32>,
  resolved: OnceLock<ResolvedInputs>,
  error: OnceLock<TransportError>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Operation {
  /// Start building a request operation decoded as JSON.
  pub fn request() -> RequestBuilder<JsonSerializer> {
    RequestBuilder::new()
  }

  /// An operation that runs `block` on the callback context.
  pub fn block(block: impl Fn() + Send + Sync + 'static) -> Self {
    Self::from_kind(OperationKind::Block(Arc::new(block)), None, 0)
  }

  pub(crate) fn from_kind(kind: OperationKind, label: Option<String>, copy_number: u32) -> Self {
    let (state, _) = watch::channel(OperationState::Pending);
    Self {
      inner: Arc::new(OperationInner {
        id: OperationId::new(),
        label,
        kind,
        copy_number,
        state,
        cancel: CancellationToken::new(),
        submitted: AtomicBool::new(false),
        predecessor: Mutex::new(None),
        store: Mutex::new(ResultStore::new()),
        context: Mutex::new(None),
        observer: Mutex::new(None),
        progress_sink: Mutex::new(None),
        progress: Mutex::new(0.0),
        resolved: OnceLock::new(),
        error: OnceLock::new(),
      }),
    }
  }

  pub fn id(&self) -> OperationId {
    self.inner.id
  }

  pub fn label(&self) -> Option<&str> {
    self.inner.label.as_deref()
  }

  /// How many times this operation's lineage has been copied.
  pub fn copy_number(&self) -> u32 {
    self.inner.copy_number
  }

  pub fn state(&self) -> OperationState {
    *self.inner.state.borrow()
  }

  pub fn is_executing(&self) -> bool {
    self.state() == OperationState::Executing
  }

  pub fn is_finished(&self) -> bool {
    self.state() == OperationState::Finished
  }

  pub fn is_cancelled(&self) -> bool {
    self.state() == OperationState::Cancelled
  }

  /// Whether this operation performs a call, as opposed to a block or an
  /// activity notification.
  pub fn is_request(&self) -> bool {
    matches!(self.inner.kind, OperationKind::Request(_))
  }

  pub(crate) fn kind(&self) -> &OperationKind {
    &self.inner.kind
  }

  /// Fraction of this operation's own call that has completed.
  pub fn progress(&self) -> f32 {
    match self.state() {
      OperationState::Finished => 1.0,
      _ => *lock(&self.inner.progress),
    }
  }

  /// The transport error this operation recorded, if any.
  pub fn error(&self) -> Option<TransportError> {
    self.inner.error.get().cloned()
  }

  /// The decoded result, read from the shared store.
  pub fn result<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
    self.store().get::<T>(self.id())
  }

  /// Parameters and headers as sent, once the operation has started.
  pub fn resolved_inputs(&self) -> Option<&ResolvedInputs> {
    self.inner.resolved.get()
  }

  pub fn store(&self) -> ResultStore {
    lock(&self.inner.store).clone()
  }

  pub(crate) fn adopt_store(&self, store: ResultStore) {
    *lock(&self.inner.store) = store;
  }

  pub fn predecessor(&self) -> Option<Operation> {
    lock(&self.inner.predecessor).clone()
  }

  /// Make this operation wait for `predecessor` and share its result store.
  ///
  /// An operation has at most one predecessor; a second call replaces it.
  pub fn add_dependency(&self, predecessor: &Operation) {
    if predecessor.id() == self.id() {
      warn!(operation_id = %self.id(), "operation cannot depend on itself");
      return;
    }
    *lock(&self.inner.predecessor) = Some(predecessor.clone());
    self.adopt_store(predecessor.store());
  }

  pub fn context(&self) -> Option<PersistenceContext> {
    lock(&self.inner.context).clone()
  }

  pub fn set_context(&self, context: Option<PersistenceContext>) {
    *lock(&self.inner.context) = context;
  }

  pub fn activity_observer(&self) -> Option<Arc<dyn ActivityObserver>> {
    lock(&self.inner.observer).clone()
  }

  pub fn set_activity_observer(&self, observer: Option<Arc<dyn ActivityObserver>>) {
    *lock(&self.inner.observer) = observer;
  }

  pub(crate) fn progress_sink(&self) -> Option<ProgressSink> {
    lock(&self.inner.progress_sink).clone()
  }

  pub(crate) fn set_progress_sink(&self, sink: Option<ProgressSink>) {
    *lock(&self.inner.progress_sink) = sink;
  }

  /// A deferred value read from this operation's decoded result.
  ///
  /// The returned value refers to this operation by id only. When the chain
  /// is copied it resolves against the copy's result.
  pub fn deferred<D, T, F>(&self, extract: F) -> Deferred<T>
  where
    D: Any,
    T: 'static,
    F: Fn(&D) -> Option<T> + Send + Sync + 'static,
  {
    Deferred::from_result(self.id(), extract)
  }

  pub(crate) fn is_submitted(&self) -> bool {
    self.inner.submitted.load(Ordering::SeqCst)
  }

  pub(crate) fn mark_submitted(&self) -> Result<(), RequestError> {
    if self.inner.submitted.swap(true, Ordering::SeqCst) {
      return Err(RequestError::AlreadySubmitted {
        operation_id: self.id(),
      });
    }
    Ok(())
  }

  /// Cancel the operation.
  ///
  /// Pending and executing operations become `Cancelled` and any in-flight
  /// call is abandoned. No handler runs and no error is recorded. Terminal
  /// operations are unaffected.
  pub fn cancel(&self) {
    self.inner.cancel.cancel();
    let cancelled = self.inner.state.send_if_modified(|state| match state {
      OperationState::Pending | OperationState::Executing => {
        *state = OperationState::Cancelled;
        true
      }
      _ => false,
    });
    if cancelled {
      info!(operation_id = %self.id(), label = self.label().unwrap_or(""), "operation_cancelled");
    }
    self.release_predecessor();
  }

  fn release_predecessor(&self) {
    lock(&self.inner.predecessor).take();
  }

  pub(crate) async fn cancelled(&self) {
    self.inner.cancel.cancelled().await
  }

  /// Wait until the operation is `Finished` or `Cancelled`.
  pub async fn wait(&self) {
    let mut receiver = self.inner.state.subscribe();
    let _ = receiver.wait_for(|state| state.is_terminal()).await;
  }

  /// A fresh operation with the same behavior, sharing this one's store,
  /// context and observer. The copy has a new id and no predecessor.
  pub fn duplicate(&self) -> Operation {
    self.duplicate_with(self.inner.kind.clone())
  }

  /// Duplicate for a chain copy: aggregate operations follow their members
  /// into the copy.
  pub(crate) fn duplicate_remapped(&self, remap: &HashMap<OperationId, Operation>) -> Operation {
    let members_of = |members: &[Operation]| -> Vec<Operation> {
      members
        .iter()
        .map(|member| remap.get(&member.id()).cloned().unwrap_or_else(|| member.clone()))
        .collect()
    };

    let kind = match &self.inner.kind {
      OperationKind::ActivityFinished { observer, members } => OperationKind::ActivityFinished {
        observer: observer.clone(),
        members: members_of(members),
      },
      OperationKind::Completion { block, members } => OperationKind::Completion {
        block: block.clone(),
        members: members_of(members),
      },
      other => other.clone(),
    };
    self.duplicate_with(kind)
  }

  fn duplicate_with(&self, kind: OperationKind) -> Operation {
    let copy = Operation::from_kind(kind, self.inner.label.clone(), self.inner.copy_number + 1);
    copy.adopt_store(self.store());
    copy.set_context(self.context());
    copy.set_activity_observer(self.activity_observer());
    copy.set_progress_sink(self.progress_sink());
    copy
  }

  /// Wait for the predecessor to become terminal. Returns `false` if this
  /// operation was cancelled in the meantime.
  pub(crate) async fn wait_ready(&self) -> bool {
    if let Some(predecessor) = self.predecessor() {
      tokio::select! {
        _ = predecessor.wait() => {}
        _ = self.cancelled() => return false,
      }
    }
    !self.inner.cancel.is_cancelled()
  }

  fn transition(&self, from: OperationState, to: OperationState) -> bool {
    self.inner.state.send_if_modified(|state| {
      if *state == from {
        *state = to;
        true
      } else {
        false
      }
    })
  }

  fn finish(&self) {
    if !self.transition(OperationState::Executing, OperationState::Finished) {
      debug!(operation_id = %self.id(), state = ?self.state(), "operation ended outside executing state");
    }
    self.release_predecessor();
  }

  /// Run the operation. The caller has already waited for the predecessor.
  #[instrument(
    name = "operation_execute",
    skip(self, callbacks),
    fields(
      operation_id = %self.id(),
      kind = self.inner.kind.name(),
    )
  )]
  pub(crate) async fn execute(&self, callbacks: &CallbackContext) {
    if !self.transition(OperationState::Pending, OperationState::Executing) {
      debug!(state = ?self.state(), "operation not pending, skipping");
      return;
    }

    match self.kind() {
      OperationKind::Request(spec) => {
        self.execute_request(spec, callbacks).await;
        return;
      }
      OperationKind::Block(block) => {
        let block = block.clone();
        callbacks.run(move || block()).await;
      }
      OperationKind::ActivityStarted(observer) => {
        let observer = observer.clone();
        callbacks.run(move || observer.on_start()).await;
      }
      OperationKind::ActivityFinished { observer, members } => {
        let observer = observer.clone();
        let errors = collect_errors(members);
        callbacks.run(move || observer.on_finish(&errors)).await;
      }
      OperationKind::Completion { block, members } => {
        let block = block.clone();
        let errors = collect_errors(members);
        callbacks.run(move || block(errors)).await;
      }
    }
    self.finish();
  }

  async fn execute_request(&self, spec: &RequestSpec, callbacks: &CallbackContext) {
    let inputs = spec.resolve_inputs(&self.store().snapshot());
    let _ = self.inner.resolved.set(inputs.clone());

    info!(
      operation_id = %self.id(),
      label = self.label().unwrap_or(""),
      call = %spec.execution.describe(),
      copy_number = self.copy_number(),
      "operation_started"
    );

    let progress = self.progress_fn(callbacks.clone());
    let call: BoxFuture<'static, TransportResult> = match &spec.execution {
      Execution::Transport {
        transport,
        method,
        path,
        encoding,
      } => {
        let request = TransportRequest {
          method: *method,
          path: path.clone(),
          parameters: inputs.parameters,
          headers: inputs.headers,
          encoding: *encoding,
        };
        let transport = transport.clone();
        Box::pin(async move { transport.call(request, Some(progress)).await })
      }
      Execution::Custom(call) => call(Some(progress)),
    };

    let result = tokio::select! {
      result = call => result,
      _ = self.cancelled() => return,
    };

    if self.inner.cancel.is_cancelled() {
      return;
    }
    self.complete(spec, result, callbacks).await;
  }

  async fn complete(&self, spec: &RequestSpec, result: TransportResult, callbacks: &CallbackContext) {
    let (value, error) = match result {
      Ok(Some(bytes)) => match (spec.decode)(Some(&bytes[..])) {
        Some(value) => (Some(value), None),
        None => {
          warn!(
            operation_id = %self.id(),
            bytes = bytes.len(),
            "response could not be decoded"
          );
          (None, None)
        }
      },
      Ok(None) => ((spec.decode)(None), None),
      Err(error) => (None, Some(error)),
    };

    if let Some(value) = &value {
      if let Err(e) = self.store().slot(self.id()).write(value.clone()) {
        warn!(operation_id = %self.id(), error = %e, "result not stored");
      }
    }

    match &error {
      Some(error) => {
        let _ = self.inner.error.set(error.clone());
        warn!(
          operation_id = %self.id(),
          label = self.label().unwrap_or(""),
          error = %error,
          "operation_failed"
        );
      }
      None => info!(
        operation_id = %self.id(),
        label = self.label().unwrap_or(""),
        has_result = value.is_some(),
        "operation_finished"
      ),
    }

    let context = self.context();
    let data_handler = spec.data_handler.clone();
    let completion = spec.completion.clone();
    let on_error = spec.on_error.clone();
    callbacks
      .run(move || {
        match (completion, data_handler) {
          (Some(completion), _) => completion(value.as_ref(), error.as_ref()),
          (None, Some(handler)) => handler(value.as_ref(), error.as_ref(), context.as_ref()),
          (None, None) => {}
        }
        if let (Some(on_error), Some(error)) = (on_error, error.as_ref()) {
          on_error(error);
        }
      })
      .await;

    *lock(&self.inner.progress) = 1.0;
    if let Some(sink) = self.progress_sink() {
      sink.step_progress(1.0, callbacks);
    }
    self.finish();
  }

  fn progress_fn(&self, callbacks: CallbackContext) -> ProgressFn {
    let operation = Arc::downgrade(&self.inner);
    Arc::new(move |fraction: f32| {
      if let Some(inner) = Weak::upgrade(&operation) {
        Operation { inner }.record_progress(fraction, &callbacks);
      }
    })
  }

  fn record_progress(&self, fraction: f32, callbacks: &CallbackContext) {
    if fraction.is_nan() || !self.is_executing() {
      return;
    }
    let fraction = fraction.clamp(0.0, 1.0);
    {
      let mut current = lock(&self.inner.progress);
      if fraction < *current {
        return;
      }
      *current = fraction;
    }
    if let Some(sink) = self.progress_sink() {
      sink.step_progress(fraction, callbacks);
    }
  }
}

/// Errors recorded by the request operations among `members`, in order.
pub(crate) fn collect_errors(members: &[Operation]) -> Vec<TransportError> {
  members
    .iter()
    .filter(|op| op.is_request())
    .filter_map(Operation::error)
    .collect()
}

impl fmt::Debug for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Operation")
      .field("id", &self.id())
      .field("label", &self.inner.label)
      .field("kind", &self.inner.kind.name())
      .field("state", &self.state())
      .field("copy_number", &self.inner.copy_number)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::ResultStore;
  use relay_transport::custom_call;
  use serde_json::json;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn ok_call(body: &'static str) -> CustomCall {
    custom_call(move |_| async move { Ok(Some(bytes::Bytes::from_static(body.as_bytes()))) })
  }

  #[test]
  fn test_new_operation_is_pending() {
    let op = Operation::request().custom(ok_call("{}")).build().unwrap();

    assert_eq!(op.state(), OperationState::Pending);
    assert!(op.is_request());
    assert_eq!(op.copy_number(), 0);
    assert!(op.error().is_none());
  }

  #[test]
  fn test_cancel_is_terminal_and_sticky() {
    let op = Operation::block(|| {});
    op.cancel();
    op.cancel();

    assert_eq!(op.state(), OperationState::Cancelled);
    assert!(!op.transition(OperationState::Pending, OperationState::Executing));
  }

  #[test]
  fn test_add_dependency_shares_store() {
    let first = Operation::block(|| {});
    let second = Operation::block(|| {});

    second.add_dependency(&first);
    second.add_dependency(&first);

    assert!(second.store().ptr_eq(&first.store()));
    assert_eq!(second.predecessor().map(|p| p.id()), Some(first.id()));
  }

  #[test]
  fn test_self_dependency_is_ignored() {
    let op = Operation::block(|| {});
    op.add_dependency(&op);
    assert!(op.predecessor().is_none());
  }

  #[test]
  fn test_duplicate_keeps_behavior_with_new_identity() {
    let op = Operation::request()
      .custom(ok_call("{}"))
      .label("fetch")
      .build()
      .unwrap();
    op.set_context(Some(Arc::new(7u32)));

    let copy = op.duplicate();

    assert_ne!(copy.id(), op.id());
    assert_eq!(copy.copy_number(), 1);
    assert_eq!(copy.label(), Some("fetch"));
    assert!(copy.store().ptr_eq(&op.store()));
    assert_eq!(
      copy.context().and_then(|c| c.downcast_ref::<u32>().copied()),
      Some(7)
    );
    assert_eq!(copy.duplicate().copy_number(), 2);
  }

  #[test]
  fn test_resolve_inputs_omits_absent_values() {
    let source = OperationId::new();
    let store = ResultStore::new();
    store
      .slot(source)
      .write(Arc::new(json!({"id": 1, "token": "t"})))
      .unwrap();

    let op = Operation::request()
      .custom(ok_call("{}"))
      .parameter("user_id", 0)
      .parameter("static", "kept")
      .header("X-Token", "placeholder")
      .deferred_parameter("user_id", Deferred::from_result(source, |v: &Value| v.get("id").cloned()))
      .deferred_parameter("missing", Deferred::from_result(source, |v: &Value| v.get("nope").cloned()))
      .deferred_header("X-Token", Deferred::<String>::absent())
      .build()
      .unwrap();

    let OperationKind::Request(spec) = op.kind() else {
      panic!("expected a request operation");
    };
    let inputs = spec.resolve_inputs(&store.snapshot());

    assert_eq!(inputs.parameters.get("user_id"), Some(&json!(1)));
    assert_eq!(inputs.parameters.get("static"), Some(&json!("kept")));
    assert!(!inputs.parameters.contains_key("missing"));
    assert!(!inputs.headers.contains_key("X-Token"));
  }

  #[tokio::test]
  async fn test_execute_stores_result_and_finishes() {
    let callbacks = CallbackContext::spawn();
    let resolved = Arc::new(AtomicUsize::new(0));
    let counter = resolved.clone();
    let op = Operation::request()
      .custom(ok_call(r#"{"id":1}"#))
      .deferred_parameter(
        "page",
        Deferred::new(move |_| {
          counter.fetch_add(1, Ordering::SeqCst);
          Some(2)
        }),
      )
      .build()
      .unwrap();

    op.execute(&callbacks).await;

    assert_eq!(op.state(), OperationState::Finished);
    assert_eq!(op.result::<Value>().as_deref(), Some(&json!({"id": 1})));
    assert_eq!(op.progress(), 1.0);
    assert_eq!(resolved.load(Ordering::SeqCst), 1);
    assert_eq!(
      op.resolved_inputs().and_then(|inputs| inputs.parameters.get("page").cloned()),
      Some(json!(2))
    );
  }

  #[tokio::test]
  async fn test_execute_skips_cancelled() {
    let callbacks = CallbackContext::spawn();
    let op = Operation::request()
      .custom(ok_call(r#"{"id":1}"#))
      .build()
      .unwrap();

    op.cancel();
    op.execute(&callbacks).await;

    assert_eq!(op.state(), OperationState::Cancelled);
    assert!(op.result::<Value>().is_none());
    assert!(op.resolved_inputs().is_none());
  }
}
