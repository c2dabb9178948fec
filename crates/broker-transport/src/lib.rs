//! Broker session transport.
//!
//! Speaks a line-delimited JSON protocol over TCP and plugs into the publish
//! pipeline as its [`Transport`](publish_pipeline::Transport).
//!
//! ```text
//! publisher                              broker
//!    │ {"type":"connect",...}              │
//!    │────────────────────────────────────▶│
//!    │◀────────────────────────────────────│ {"type":"connected"} | {"type":"refused",...}
//!    │ {"type":"publish","id",...}         │
//!    │────────────────────────────────────▶│
//!    │◀────────────────────────────────────│ {"type":"ack","id"} | {"type":"nack","id","error"}
//! ```

mod error;
mod frame;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
mod session;

pub use error::{BrokerError, BrokerResult};
pub use frame::{decode_payload, BrokerFrame, ClientFrame};
pub use session::{BrokerSession, SessionConfig, CONNECTION_LOST, SESSION_CLOSED};
