//! Chain progress aggregation.
//!
//! A chain with `n` request operations weighs each at `1/n`. Step `i`
//! reporting fraction `p` puts the chain at `(i + p) / n`. Reports that would
//! move the chain backwards are dropped, so observers only ever see values
//! that do not decrease.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::callback::CallbackContext;
use crate::observer::ActivityObserver;

pub(crate) struct ChainProgress {
  observer: Arc<dyn ActivityObserver>,
  weight: f32,
  high_water: Mutex<f32>,
}

impl ChainProgress {
  pub(crate) fn new(observer: Arc<dyn ActivityObserver>, steps: usize) -> Arc<Self> {
    Arc::new(Self {
      observer,
      weight: 1.0 / steps.max(1) as f32,
      high_water: Mutex::new(0.0),
    })
  }

  /// Same observer and weighting, progress reset to zero.
  pub(crate) fn fresh(&self) -> Arc<Self> {
    Arc::new(Self {
      observer: self.observer.clone(),
      weight: self.weight,
      high_water: Mutex::new(0.0),
    })
  }

  #[cfg(test)]
  pub(crate) fn current(&self) -> f32 {
    *self.high_water.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn report(&self, value: f32, callbacks: &CallbackContext) {
    let value = value.clamp(0.0, 1.0);

    // Posting under the lock keeps the callback order equal to the
    // high-water order.
    let mut high_water = self.high_water.lock().unwrap_or_else(|e| e.into_inner());
    if value <= *high_water {
      return;
    }
    *high_water = value;

    let observer = self.observer.clone();
    callbacks.post(move || observer.on_progress(value));
  }
}

/// One request operation's view of its chain's progress.
#[derive(Clone)]
pub(crate) struct ProgressSink {
  chain: Arc<ChainProgress>,
  index: usize,
}

impl ProgressSink {
  pub(crate) fn new(chain: Arc<ChainProgress>, index: usize) -> Self {
    Self { chain, index }
  }

  pub(crate) fn chain(&self) -> &Arc<ChainProgress> {
    &self.chain
  }

  pub(crate) fn with_chain(&self, chain: Arc<ChainProgress>) -> Self {
    Self {
      chain,
      index: self.index,
    }
  }

  pub(crate) fn step_progress(&self, fraction: f32, callbacks: &CallbackContext) {
    let value = (self.index as f32 + fraction) * self.chain.weight;
    self.chain.report(value, callbacks);
  }
}

impl fmt::Debug for ProgressSink {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ProgressSink")
      .field("index", &self.index)
      .field("weight", &self.chain.weight)
      .finish()
  }
}
