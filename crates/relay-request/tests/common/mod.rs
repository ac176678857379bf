#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use relay_transport::{
  ProgressFn, Transport, TransportError, TransportRequest, TransportResult,
};
use serde_json::Value;

/// One scripted response.
#[derive(Clone)]
pub struct Reply {
  pub result: TransportResult,
  pub delay: Duration,
  pub progress: Vec<f32>,
}

impl Reply {
  pub fn json(value: Value) -> Self {
    Self::bytes(value.to_string())
  }

  pub fn bytes(body: impl Into<Bytes>) -> Self {
    Self {
      result: Ok(Some(body.into())),
      delay: Duration::ZERO,
      progress: Vec::new(),
    }
  }

  pub fn empty() -> Self {
    Self {
      result: Ok(None),
      delay: Duration::ZERO,
      progress: Vec::new(),
    }
  }

  pub fn error(error: TransportError) -> Self {
    Self {
      result: Err(error),
      delay: Duration::ZERO,
      progress: Vec::new(),
    }
  }

  pub fn after(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn with_progress(mut self, progress: &[f32]) -> Self {
    self.progress = progress.to_vec();
    self
  }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
  pub request: TransportRequest,
  pub started: Instant,
  /// `None` while in flight, or if the call was abandoned.
  pub finished: Option<Instant>,
}

/// A transport answering from per-path scripts and recording every call.
///
/// A path with several replies answers them in order and then repeats the
/// last one. Unknown paths fail with a general error.
#[derive(Default)]
pub struct MockTransport {
  routes: Mutex<HashMap<String, VecDeque<Reply>>>,
  calls: Mutex<Vec<RecordedCall>>,
}

impl MockTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn route(self, path: &str, reply: Reply) -> Self {
    self.routes_sequence(path, vec![reply])
  }

  pub fn routes_sequence(self, path: &str, replies: Vec<Reply>) -> Self {
    self
      .routes
      .lock()
      .unwrap()
      .insert(path.to_string(), replies.into());
    self
  }

  pub fn calls(&self) -> Vec<RecordedCall> {
    self.calls.lock().unwrap().clone()
  }

  pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
    self
      .calls()
      .into_iter()
      .filter(|call| call.request.path == path)
      .collect()
  }

  fn next_reply(&self, path: &str) -> Reply {
    let mut routes = self.routes.lock().unwrap();
    match routes.get_mut(path) {
      Some(replies) if replies.len() > 1 => replies.pop_front().unwrap(),
      Some(replies) => replies.front().cloned().unwrap(),
      None => Reply::error(TransportError::general(0, format!("no route for {path}"))),
    }
  }
}

#[async_trait]
impl Transport for MockTransport {
  async fn call(&self, request: TransportRequest, progress: Option<ProgressFn>) -> TransportResult {
    let reply = self.next_reply(&request.path);

    let index = {
      let mut calls = self.calls.lock().unwrap();
      calls.push(RecordedCall {
        request,
        started: Instant::now(),
        finished: None,
      });
      calls.len() - 1
    };

    if let Some(progress) = &progress {
      for fraction in &reply.progress {
        progress(*fraction);
      }
    }
    if !reply.delay.is_zero() {
      tokio::time::sleep(reply.delay).await;
    }

    self.calls.lock().unwrap()[index].finished = Some(Instant::now());
    reply.result
  }
}

pub fn shared(mock: MockTransport) -> (Arc<MockTransport>, Arc<dyn Transport>) {
  let mock = Arc::new(mock);
  let transport: Arc<dyn Transport> = mock.clone();
  (mock, transport)
}

/// Wait for `chain` with an upper bound so a hung test fails instead of
/// stalling the suite.
pub async fn wait_for(chain: &relay_request::ApiRequest) {
  tokio::time::timeout(Duration::from_secs(5), chain.wait())
    .await
    .expect("chain did not finish in time");
}
