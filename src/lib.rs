//! # OpenLCB
//!
//! Core of an OpenLCB (LCC) node stack: the layer that translates between
//! the abstract OpenLCB message model and its CAN wire representation,
//! arbitrates a 12-bit alias on the segment, and dispatches traffic between
//! the wire and upper-layer services.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────────┐
//! │       Upper layers (datagram clients, event producers, ...)     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │        Interface dispatcher (handlers, loopback, queueing)      │
//! ├───────────────────────────┬─────────────────────────────────────┤
//! │   MessageBuilder          │   AliasMap  +  AliasArbiter         │
//! │   (message ⇄ frames)      │   (registry + CID/RID machine)      │
//! ├───────────────────────────┴─────────────────────────────────────┤
//! │           CanFrame  +  GridConnect ASCII codec                  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │        Frame sink (GridConnect tether / in-memory pair)         │
//! └─────────────────────────────────────────────────────────────────┘
//!
//! The stack is stateless across restarts: an alias is re-arbitrated every
//! time an interface starts.

#![warn(clippy::all, clippy::pedantic)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]        // ASCII diagrams in docs
#![allow(clippy::unreadable_literal)]  // Wire constants read better unbroken
#![allow(clippy::cast_possible_truncation)] // Masked bit-field extractions
#![allow(clippy::match_same_arms)]     // Explicit arm per variant is clearer
#![allow(clippy::return_self_not_must_use)]

pub mod alias;
pub mod builder;
pub mod config;
pub mod error;
pub mod frame;
pub mod iface;
pub mod message;
pub mod transport;
pub mod types;

pub use config::InterfaceConfig;
pub use error::{Error, Result};
pub use types::{Alias, EventId, Mti, NodeId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::alias::{AliasArbiter, AliasMap, ArbiterEvent};
    pub use crate::builder::MessageBuilder;
    pub use crate::config::InterfaceConfig;
    pub use crate::error::{Error, Result};
    pub use crate::frame::{CanFrame, GridConnectCodec};
    pub use crate::iface::{Connection, Executor, InlineExecutor, OlcbInterface, WorkerExecutor};
    pub use crate::message::Message;
    pub use crate::transport::{ChannelSink, FrameSink, GridConnectTransport, MemorySink};
    pub use crate::types::{Alias, EventId, Mti, NodeId};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
