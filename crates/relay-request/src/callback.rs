//! The callback context.
//!
//! Every user callback (data handlers, completion and error closures, block
//! operations and observer notifications) runs on one dedicated task, one at
//! a time, in the order it was posted. This is the analogue of a UI thread:
//! callbacks never race each other.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

type Callback = Box<dyn FnOnce() + Send>;

/// Handle to a serial callback executor. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CallbackContext {
  sender: mpsc::UnboundedSender<Callback>,
}

impl CallbackContext {
  /// Start a callback context on the current tokio runtime.
  ///
  /// The executor task ends once every handle has been dropped.
  pub fn spawn() -> Self {
    let (sender, mut receiver) = mpsc::unbounded_channel::<Callback>();

    tokio::spawn(async move {
      while let Some(callback) = receiver.recv().await {
        if catch_unwind(AssertUnwindSafe(callback)).is_err() {
          error!("callback_panicked");
        }
      }
    });

    Self { sender }
  }

  /// Queue a callback without waiting for it.
  pub fn post(&self, callback: impl FnOnce() + Send + 'static) {
    if let Err(err) = self.sender.send(Box::new(callback)) {
      warn!("callback context closed, running callback inline");
      (err.0)();
    }
  }

  /// Queue a callback and wait until it has run.
  pub async fn run(&self, callback: impl FnOnce() + Send + 'static) {
    let (done, finished) = oneshot::channel();
    self.post(move || {
      callback();
      let _ = done.send(());
    });
    // A panicking callback drops `done`; that still counts as finished
    let _ = finished.await;
  }
}
