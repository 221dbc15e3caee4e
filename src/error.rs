//! Error types for the OpenLCB stack.

use std::io;

use thiserror::Error;

use crate::types::NodeId;

/// Result type alias for OpenLCB operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the stack.
#[derive(Error, Debug)]
pub enum Error {
    // Protocol errors
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // Alias arbitration errors
    #[error("arbitration error: {0}")]
    Arbitration(#[from] ArbitrationError),

    // Transport errors
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // Lifecycle errors
    #[error("interface disposed")]
    Disposed,

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // General errors
    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Frame and message parsing/handling errors.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("no alias registered for source node {0}")]
    UnknownSourceAlias(NodeId),

    #[error("no alias registered for destination node {0}")]
    UnknownDestinationAlias(NodeId),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("malformed GridConnect input at byte {offset}")]
    MalformedGridConnect { offset: usize },

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("reassembly buffer overflow for alias 0x{alias:03X}: {size} bytes (cap {cap})")]
    ReassemblyOverflow { alias: u16, size: usize, cap: usize },

    #[error("invalid alias value 0x{0:03X}")]
    InvalidAlias(u16),

    #[error("invalid node id: {0}")]
    InvalidNodeId(String),

    #[error("message kind cannot be rendered onto CAN: MTI {0:#05X}")]
    UnrepresentableMessage(u16),
}

/// Alias acquisition errors.
#[derive(Error, Debug)]
pub enum ArbitrationError {
    #[error("alias arbitration retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("no alias acquired yet")]
    NotActive,
}

/// Frame sink / wire errors.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("frame sink closed")]
    SinkClosed,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive failed: {0}")]
    ReceiveFailed(String),
}

impl Error {
    /// Check if error is recoverable (the operation may be retried).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Arbitration(ArbitrationError::NotActive)
                | Error::Transport(TransportError::SendFailed(_) | TransportError::ReceiveFailed(_))
                | Error::Io(_)
        )
    }

    /// Check if error terminates the interface.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::Disposed | Error::Transport(TransportError::SinkClosed)
        )
    }
}
