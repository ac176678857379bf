//! Activity observers for chain-level lifecycle and progress.
//!
//! An observer attached to a chain sees `on_start` once, then progress
//! values that never decrease, then `on_finish` with every error the chain's
//! request operations recorded. All calls happen on the callback context.

use relay_transport::TransportError;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Receives activity notifications for one chain.
pub trait ActivityObserver: Send + Sync {
  /// Called before the first request operation executes.
  fn on_start(&self);

  /// Called with the chain's overall progress in `0.0..=1.0`.
  fn on_progress(&self, _progress: f32) {}

  /// Called after the last request operation is terminal.
  fn on_finish(&self, errors: &[TransportError]);
}

/// Activity notifications as values, for channel consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityEvent {
  Started,
  Progress(f32),
  Finished(Vec<TransportError>),
}

/// An observer that ignores everything.
#[derive(Debug, Clone, Default)]
pub struct NoopObserver;

impl ActivityObserver for NoopObserver {
  fn on_start(&self) {}

  fn on_finish(&self, _errors: &[TransportError]) {}
}

/// An observer that forwards events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
  sender: mpsc::UnboundedSender<ActivityEvent>,
}

impl ChannelObserver {
  pub fn new(sender: mpsc::UnboundedSender<ActivityEvent>) -> Self {
    Self { sender }
  }

  /// Create an observer together with its receiving end.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<ActivityEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self::new(sender), receiver)
  }

  fn send(&self, event: ActivityEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

impl ActivityObserver for ChannelObserver {
  fn on_start(&self) {
    self.send(ActivityEvent::Started);
  }

  fn on_progress(&self, progress: f32) {
    self.send(ActivityEvent::Progress(progress));
  }

  fn on_finish(&self, errors: &[TransportError]) {
    self.send(ActivityEvent::Finished(errors.to_vec()));
  }
}

/// An observer that logs chain activity.
#[derive(Debug, Clone)]
pub struct TracingObserver {
  name: String,
}

impl TracingObserver {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into() }
  }
}

impl ActivityObserver for TracingObserver {
  fn on_start(&self) {
    info!(chain = %self.name, "activity_started");
  }

  fn on_progress(&self, progress: f32) {
    info!(chain = %self.name, progress, "activity_progress");
  }

  fn on_finish(&self, errors: &[TransportError]) {
    if errors.is_empty() {
      info!(chain = %self.name, "activity_finished");
    } else {
      warn!(
        chain = %self.name,
        errors = errors.len(),
        first_error = %errors[0],
        "activity_finished"
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_channel_observer_forwards_events() {
    let (observer, mut receiver) = ChannelObserver::channel();

    observer.on_start();
    observer.on_progress(0.5);
    observer.on_finish(&[TransportError::NoConnectivity]);

    assert_eq!(receiver.try_recv().unwrap(), ActivityEvent::Started);
    assert_eq!(receiver.try_recv().unwrap(), ActivityEvent::Progress(0.5));
    assert_eq!(
      receiver.try_recv().unwrap(),
      ActivityEvent::Finished(vec![TransportError::NoConnectivity])
    );
  }

  #[test]
  fn test_channel_observer_survives_dropped_receiver() {
    let (observer, receiver) = ChannelObserver::channel();
    drop(receiver);

    observer.on_start();
    observer.on_finish(&[]);
  }
}
