//! # agora-debates
//!
//! The debate service façade and the adapter that bridges the engine's
//! internal event stream to client-facing envelopes, performing all
//! streaming-time persistence along the way. Also defines the credit
//! ledger contract the service pre-checks against.

pub mod billing;
pub mod mapper;
pub mod service;
pub mod stream;

pub use billing::{BillingService, MemoryBilling};
pub use mapper::{EventMapper, MapperTarget};
pub use service::{DebateService, ProviderFactory};
pub use stream::{run_debate_stream, StreamContext};
