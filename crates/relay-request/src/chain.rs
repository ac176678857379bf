//! Chains: ordered, dependency-wired sequences of operations.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use relay_transport::TransportError;
use tracing::info;

use crate::error::RequestError;
use crate::observer::ActivityObserver;
use crate::operation::{Operation, OperationKind, PersistenceContext, collect_errors};
use crate::progress::{ChainProgress, ProgressSink};
use crate::queue::ExecutionQueue;
use crate::store::{OperationId, ResultStore};

/// One logical request made of several operations run strictly in order.
///
/// Operation `i + 1` starts only after operation `i` is terminal, whether
/// it finished, failed or was cancelled. All operations share one
/// [`ResultStore`], so later operations can read earlier results through
/// deferred inputs.
#[derive(Default)]
pub struct ApiRequest {
  operations: Vec<Operation>,
  kind: Option<String>,
  context: Option<PersistenceContext>,
}

impl ApiRequest {
  pub fn new() -> Self {
    Self::default()
  }

  /// Tag the chain so a later submission can cancel it with
  /// `cancel_others_of_same_kind`.
  pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
    self.kind = Some(kind.into());
    self
  }

  pub fn kind(&self) -> Option<&str> {
    self.kind.as_deref()
  }

  pub fn push(&mut self, operation: Operation) -> &mut Self {
    if let Some(context) = &self.context {
      operation.set_context(Some(context.clone()));
    }
    self.operations.push(operation);
    self
  }

  pub fn operations(&self) -> &[Operation] {
    &self.operations
  }

  /// The operations that perform calls.
  pub fn request_operations(&self) -> impl Iterator<Item = &Operation> {
    self.operations.iter().filter(|op| op.is_request())
  }

  pub fn len(&self) -> usize {
    self.operations.len()
  }

  pub fn is_empty(&self) -> bool {
    self.operations.is_empty()
  }

  /// Append an operation that runs `block` on the callback context.
  pub fn add_block_operation(&mut self, block: impl Fn() + Send + Sync + 'static) -> &mut Self {
    self.push(Operation::block(block))
  }

  /// Append an operation that receives every error recorded by the request
  /// operations added so far, in order.
  pub fn on_completion(
    &mut self,
    block: impl Fn(Vec<TransportError>) + Send + Sync + 'static,
  ) -> &mut Self {
    let completion = OperationKind::Completion {
      block: Arc::new(block),
      members: self.operations.clone(),
    };
    self.push(Operation::from_kind(completion, None, 0))
  }

  /// Report start, progress and finish of this chain to `observer`.
  ///
  /// Each request operation weighs `1 / count` of the overall progress. A
  /// start notification is prepended and a finish notification, carrying the
  /// aggregate error list, is appended.
  pub fn with_activity_observer(mut self, observer: Arc<dyn ActivityObserver>) -> Self {
    let requests: Vec<Operation> = self.request_operations().cloned().collect();
    let progress = ChainProgress::new(observer.clone(), requests.len());
    for (index, op) in requests.iter().enumerate() {
      op.set_progress_sink(Some(ProgressSink::new(progress.clone(), index)));
    }
    for op in &self.operations {
      op.set_activity_observer(Some(observer.clone()));
    }

    let started = Operation::from_kind(OperationKind::ActivityStarted(observer.clone()), None, 0);
    let finished = Operation::from_kind(
      OperationKind::ActivityFinished {
        observer: observer.clone(),
        members: self.operations.clone(),
      },
      None,
      0,
    );
    for op in [&started, &finished] {
      op.set_activity_observer(Some(observer.clone()));
      op.set_context(self.context.clone());
    }

    self.operations.insert(0, started);
    self.operations.push(finished);
    self
  }

  /// Thread an opaque context to every operation's data handler.
  pub fn set_context(&mut self, context: Option<PersistenceContext>) {
    for op in &self.operations {
      op.set_context(context.clone());
    }
    self.context = context;
  }

  pub fn context(&self) -> Option<PersistenceContext> {
    self.context.clone()
  }

  /// Errors recorded by the request operations, in chain order.
  pub fn errors(&self) -> Vec<TransportError> {
    collect_errors(&self.operations)
  }

  /// Equal-weighted average progress of the request operations.
  pub fn progress(&self) -> f32 {
    let requests: Vec<&Operation> = self.request_operations().collect();
    if requests.is_empty() {
      return 0.0;
    }
    requests.iter().map(|op| op.progress()).sum::<f32>() / requests.len() as f32
  }

  /// Wire dependencies and hand every operation to `queue`.
  ///
  /// Returns immediately; use [`wait`](Self::wait) or callbacks to observe
  /// completion. With `cancel_others_of_same_kind`, chains of this chain's
  /// kind already running on `queue` are cancelled first.
  pub fn add_to_execution_queue(
    &self,
    queue: &ExecutionQueue,
    cancel_others_of_same_kind: bool,
  ) -> Result<(), RequestError> {
    if let Some(op) = self.operations.iter().find(|op| op.is_submitted()) {
      return Err(RequestError::AlreadySubmitted {
        operation_id: op.id(),
      });
    }

    self.chain_operations();

    if cancel_others_of_same_kind {
      if let Some(kind) = &self.kind {
        queue.cancel_kind(kind);
      }
    }

    queue.submit(self.kind.clone(), self.operations.clone())?;
    info!(
      kind = self.kind.as_deref().unwrap_or(""),
      operations = self.operations.len(),
      "chain_submitted"
    );
    Ok(())
  }

  /// Each operation depends on the one before it and adopts its store.
  ///
  /// Safe to repeat: every operation keeps exactly one predecessor.
  fn chain_operations(&self) {
    for pair in self.operations.windows(2) {
      pair[1].add_dependency(&pair[0]);
    }
  }

  /// Cancel every operation. Finished operations stay finished.
  pub fn cancel(&self) {
    for op in &self.operations {
      op.cancel();
    }
    info!(kind = self.kind.as_deref().unwrap_or(""), "chain_cancelled");
  }

  /// Wait until every operation is terminal.
  ///
  /// Never returns for a chain that was neither submitted nor cancelled.
  pub async fn wait(&self) {
    for op in &self.operations {
      op.wait().await;
    }
  }

  /// An independent duplicate for resubmission.
  ///
  /// Operations get new identities and reset state but keep their calls,
  /// inputs and handlers. The copy gets a fresh result store in which the
  /// originals' ids resolve to their copies, so deferred inputs written
  /// against the original chain read the copy's results.
  pub fn copy(&self) -> ApiRequest {
    let mut remap: HashMap<OperationId, Operation> = HashMap::new();
    let mut operations = Vec::with_capacity(self.operations.len());
    for op in &self.operations {
      let copy = op.duplicate_remapped(&remap);
      remap.insert(op.id(), copy.clone());
      operations.push(copy);
    }

    let mut aliases: HashMap<OperationId, OperationId> = remap
      .iter()
      .map(|(original, copy)| (*original, copy.id()))
      .collect();
    // Ids the originals were themselves aliased from
    for op in &self.operations {
      for (earlier, original) in op.store().aliases() {
        if let Some(copy) = remap.get(original) {
          aliases.entry(*earlier).or_insert_with(|| copy.id());
        }
      }
    }

    let store = ResultStore::with_aliases(aliases);
    let mut fresh: Vec<(Arc<ChainProgress>, Arc<ChainProgress>)> = Vec::new();
    for op in &operations {
      op.adopt_store(store.clone());

      if let Some(sink) = op.progress_sink() {
        let chain = match fresh.iter().find(|(old, _)| Arc::ptr_eq(old, sink.chain())) {
          Some((_, new)) => new.clone(),
          None => {
            let new = sink.chain().fresh();
            fresh.push((sink.chain().clone(), new.clone()));
            new
          }
        };
        op.set_progress_sink(Some(sink.with_chain(chain)));
      }
    }

    ApiRequest {
      operations,
      kind: self.kind.clone(),
      context: self.context.clone(),
    }
  }
}

impl From<Vec<Operation>> for ApiRequest {
  fn from(operations: Vec<Operation>) -> Self {
    Self {
      operations,
      ..Self::default()
    }
  }
}

impl FromIterator<Operation> for ApiRequest {
  fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
    Self::from(iter.into_iter().collect::<Vec<_>>())
  }
}

impl fmt::Debug for ApiRequest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ApiRequest")
      .field("kind", &self.kind)
      .field("operations", &self.operations)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::observer::NoopObserver;

  fn blocks(n: usize) -> ApiRequest {
    (0..n).map(|_| Operation::block(|| {})).collect()
  }

  #[test]
  fn test_chaining_is_linear_and_idempotent() {
    let chain = blocks(4);

    chain.chain_operations();
    chain.chain_operations();

    let ops = chain.operations();
    assert!(ops[0].predecessor().is_none());
    for i in 1..ops.len() {
      assert_eq!(ops[i].predecessor().map(|p| p.id()), Some(ops[i - 1].id()));
      assert!(ops[i].store().ptr_eq(&ops[0].store()));
    }
  }

  #[test]
  fn test_activity_observer_wraps_chain() {
    let chain = blocks(2).with_activity_observer(Arc::new(NoopObserver));

    assert_eq!(chain.len(), 4);
    assert!(matches!(
      chain.operations()[0].kind(),
      OperationKind::ActivityStarted(_)
    ));
    assert!(matches!(
      chain.operations()[3].kind(),
      OperationKind::ActivityFinished { .. }
    ));
    assert!(
      chain
        .operations()
        .iter()
        .all(|op| op.activity_observer().is_some())
    );
  }

  #[test]
  fn test_copy_gets_fresh_identities_and_store() {
    let chain = blocks(3);
    chain.chain_operations();

    let copy = chain.copy();

    assert_eq!(copy.len(), 3);
    for (original, duplicate) in chain.operations().iter().zip(copy.operations()) {
      assert_ne!(original.id(), duplicate.id());
      assert_eq!(duplicate.copy_number(), 1);
      assert!(duplicate.predecessor().is_none());
      assert!(!duplicate.store().ptr_eq(&original.store()));
    }
    assert!(copy.operations()[2].store().ptr_eq(&copy.operations()[0].store()));
  }

  #[test]
  fn test_context_reaches_all_operations() {
    let mut chain = blocks(2);
    chain.set_context(Some(Arc::new(42u8)));
    chain.add_block_operation(|| {});

    assert!(chain.operations().iter().all(|op| {
      op.context()
        .and_then(|c| c.downcast_ref::<u8>().copied())
        == Some(42)
    }));
  }
}
