//! The execution queue.
//!
//! Each submitted operation gets its own task. The task waits for the
//! operation's predecessor, then (when a concurrency limit is configured) for
//! a slot, then runs the operation. Independent chains run concurrently.

use std::sync::{Arc, Mutex};

use relay_config::ClientConfig;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, info, info_span};

use crate::callback::CallbackContext;
use crate::error::RequestError;
use crate::operation::Operation;

#[derive(Debug, Clone, Default)]
pub struct QueueConfig {
  /// Upper bound on operations executing at once. `None` means unbounded.
  pub max_concurrent_operations: Option<usize>,
}

impl From<&ClientConfig> for QueueConfig {
  fn from(config: &ClientConfig) -> Self {
    Self {
      max_concurrent_operations: config.max_concurrent_operations,
    }
  }
}

/// Shared execution queue. Cloning shares the queue.
///
/// Must be created inside a tokio runtime. Operations always run on that
/// runtime, so chains may be submitted from any thread.
#[derive(Clone)]
pub struct ExecutionQueue {
  inner: Arc<QueueInner>,
}

struct QueueInner {
  runtime: Handle,
  callbacks: CallbackContext,
  limit: Option<Arc<Semaphore>>,
  in_flight: Mutex<Vec<InFlightChain>>,
}

struct InFlightChain {
  kind: Option<String>,
  operations: Vec<Operation>,
}

impl InFlightChain {
  fn is_done(&self) -> bool {
    self.operations.iter().all(|op| op.state().is_terminal())
  }
}

impl ExecutionQueue {
  pub fn new() -> Self {
    Self::with_config(QueueConfig::default())
  }

  pub fn with_config(config: QueueConfig) -> Self {
    let limit = config
      .max_concurrent_operations
      .map(|limit| Arc::new(Semaphore::new(limit.max(1))));

    Self {
      inner: Arc::new(QueueInner {
        runtime: Handle::current(),
        callbacks: CallbackContext::spawn(),
        limit,
        in_flight: Mutex::new(Vec::new()),
      }),
    }
  }

  pub fn from_client_config(config: &ClientConfig) -> Self {
    Self::with_config(config.into())
  }

  /// The context all callbacks of this queue run on.
  pub fn callbacks(&self) -> &CallbackContext {
    &self.inner.callbacks
  }

  /// Number of submitted chains with operations still pending or executing.
  pub fn in_flight(&self) -> usize {
    let mut in_flight = self.lock_in_flight();
    in_flight.retain(|chain| !chain.is_done());
    in_flight.len()
  }

  /// Spawn one task per operation. Fails without spawning anything if any
  /// operation was already submitted.
  pub(crate) fn submit(
    &self,
    kind: Option<String>,
    operations: Vec<Operation>,
  ) -> Result<(), RequestError> {
    if let Some(op) = operations.iter().find(|op| op.is_submitted()) {
      return Err(RequestError::AlreadySubmitted {
        operation_id: op.id(),
      });
    }
    for op in &operations {
      op.mark_submitted()?;
    }

    for op in &operations {
      let op = op.clone();
      let callbacks = self.inner.callbacks.clone();
      let limit = self.inner.limit.clone();
      let span = info_span!("queued_operation", operation_id = %op.id());

      self.inner.runtime.spawn(
        async move {
          if !op.wait_ready().await {
            debug!("cancelled before start");
            return;
          }

          let _permit = match limit {
            Some(limit) => tokio::select! {
              permit = limit.acquire_owned() => match permit {
                Ok(permit) => Some(permit),
                Err(_) => return,
              },
              _ = op.cancelled() => return,
            },
            None => None,
          };

          op.execute(&callbacks).await;
        }
        .instrument(span),
      );
    }

    let mut in_flight = self.lock_in_flight();
    in_flight.retain(|chain| !chain.is_done());
    in_flight.push(InFlightChain { kind, operations });
    Ok(())
  }

  /// Cancel every submitted, unfinished chain tagged `kind`.
  ///
  /// Returns how many chains were cancelled. Chains that were built but not
  /// yet submitted are never affected.
  pub fn cancel_kind(&self, kind: &str) -> usize {
    let cancelled: Vec<InFlightChain> = {
      let mut in_flight = self.lock_in_flight();
      let (matching, rest): (Vec<_>, Vec<_>) = in_flight
        .drain(..)
        .filter(|chain| !chain.is_done())
        .partition(|chain| chain.kind.as_deref() == Some(kind));
      *in_flight = rest;
      matching
    };

    for chain in &cancelled {
      for op in &chain.operations {
        op.cancel();
      }
    }
    if !cancelled.is_empty() {
      info!(kind, chains = cancelled.len(), "chain_cancelled");
    }
    cancelled.len()
  }

  /// Cancel everything this queue is running.
  pub fn cancel_all(&self) {
    let chains: Vec<InFlightChain> = self.lock_in_flight().drain(..).collect();
    for op in chains.iter().flat_map(|chain| &chain.operations) {
      op.cancel();
    }
  }

  fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, Vec<InFlightChain>> {
    self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl Default for ExecutionQueue {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::chain::ApiRequest;
  use std::time::Duration;

  #[tokio::test]
  async fn test_submit_runs_blocks_in_order() {
    let queue = ExecutionQueue::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let ops: Vec<Operation> = (0..3)
      .map(|i| {
        let seen = seen.clone();
        Operation::block(move || seen.lock().unwrap().push(i))
      })
      .collect();
    ops[1].add_dependency(&ops[0]);
    ops[2].add_dependency(&ops[1]);

    queue.submit(None, ops.clone()).unwrap();
    for op in &ops {
      op.wait().await;
    }

    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(queue.in_flight(), 0);
  }

  #[tokio::test]
  async fn test_resubmit_is_rejected() {
    let queue = ExecutionQueue::new();
    let op = Operation::block(|| {});

    queue.submit(None, vec![op.clone()]).unwrap();
    let again = queue.submit(None, vec![op.clone()]);

    assert_eq!(
      again,
      Err(RequestError::AlreadySubmitted {
        operation_id: op.id()
      })
    );
  }

  #[test]
  fn test_submit_from_outside_the_runtime() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
      .worker_threads(1)
      .enable_all()
      .build()
      .unwrap();
    let queue = runtime.block_on(async { ExecutionQueue::new() });
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut chain = ApiRequest::new();
    for i in 0..2 {
      let seen = seen.clone();
      chain.add_block_operation(move || seen.lock().unwrap().push(i));
    }

    // Plain thread, no runtime entered
    chain.add_to_execution_queue(&queue, false).unwrap();
    runtime.block_on(async {
      tokio::time::timeout(Duration::from_secs(5), chain.wait())
        .await
        .unwrap();
    });

    assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
    assert!(chain.operations().iter().all(|op| op.is_finished()));
  }

  #[test]
  fn test_queue_config_from_client_config() {
    let mut config = ClientConfig::new("http://localhost");
    config.max_concurrent_operations = Some(2);

    let queue_config = QueueConfig::from(&config);
    assert_eq!(queue_config.max_concurrent_operations, Some(2));
  }
}
