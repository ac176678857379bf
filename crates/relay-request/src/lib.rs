//! Relay Request
//!
//! Request orchestration above a pluggable transport. A request is an
//! [`ApiRequest`]: an ordered chain of [`Operation`]s executed strictly one
//! after another on an [`ExecutionQueue`].
//!
//! ```text
//! caller builds operations
//!        │
//!        ▼
//! ApiRequest ── chain_operations ──► op[i] waits for op[i-1], shares its ResultStore
//!        │
//!        ▼
//! ExecutionQueue (one task per operation, optional concurrency limit)
//!        │
//!        ▼
//! Operation::execute
//!   ├─ resolve Deferred inputs from a ResultSnapshot
//!   ├─ Transport::call or CustomCall
//!   ├─ ResponseSerializer::decode → ResultSlot::write
//!   └─ handlers, progress and observer calls on the CallbackContext
//! ```
//!
//! Failures do not stop a chain: each failed operation records its
//! [`TransportError`](relay_transport::TransportError) and the next one
//! still runs. The chain's error list and the activity observer's finish
//! notification carry every recorded error in order. Retrying means
//! submitting [`ApiRequest::copy`].

mod builder;
mod callback;
mod chain;
mod deferred;
mod error;
mod factory;
mod observer;
mod operation;
mod progress;
mod queue;
mod serializer;
mod store;

pub use builder::RequestBuilder;
pub use callback::CallbackContext;
pub use chain::ApiRequest;
pub use deferred::Deferred;
pub use error::RequestError;
pub use factory::CallsFactory;
pub use observer::{ActivityEvent, ActivityObserver, ChannelObserver, NoopObserver, TracingObserver};
pub use operation::{Operation, OperationState, PersistenceContext, ResolvedInputs};
pub use queue::{ExecutionQueue, QueueConfig};
pub use serializer::{
  ArraySerializer, JsonSerializer, ResponseSerializer, StringSerializer, TypedSerializer,
};
pub use store::{OperationId, ResultSnapshot, ResultStore, ResultValue};
