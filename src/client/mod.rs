//! Client Module
//!
//! The participant side of distributed training:
//! - Session state machine (connect, sync, train, upload)
//! - Example accumulation for federated updates
//! - Client identity persisted across runs

pub mod buffer;
pub mod identity;
pub mod session;

pub use buffer::ExampleBuffer;
pub use identity::resolve_client_id;
pub use session::ClientSession;
