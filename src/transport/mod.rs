//! Frame transport layer.
//!
//! The stack bottoms out at the [`FrameSink`] contract: a non-blocking
//! `send`, an async `receive` on the other side of the wire, and an
//! idempotent `close`. Physical CAN drivers live outside this crate; what is
//! provided here are the in-memory sinks used for loop devices and tests,
//! and the GridConnect byte tether in [`gridconnect`].

pub mod gridconnect;

pub use gridconnect::GridConnectTransport;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{Result, TransportError};
use crate::frame::CanFrame;

/// Outbound side of a frame transport.
pub trait FrameSink: Send + Sync {
    /// Hand one frame to the wire. Must not block.
    fn send(&self, frame: &CanFrame) -> Result<()>;

    /// Release the transport. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Inbound side of a frame transport.
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next frame; `None` once the transport is closed.
    async fn receive(&mut self) -> Option<CanFrame>;
}

/// Sink that collects frames in memory for inspection.
#[derive(Default)]
pub struct MemorySink {
    frames: Mutex<Vec<CanFrame>>,
    closed: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take every frame sent so far.
    pub fn take(&self) -> Vec<CanFrame> {
        std::mem::take(&mut self.frames.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

impl FrameSink for MemorySink {
    fn send(&self, frame: &CanFrame) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::SinkClosed.into());
        }
        self.frames.lock().push(*frame);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Sink backed by an unbounded channel, pairing a [`FrameSink`] with a
/// [`FrameSource`] for loop devices.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<CanFrame>,
    closed: AtomicBool,
}

/// Receiving half of a [`ChannelSink`].
pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<CanFrame>,
}

impl ChannelSink {
    /// A connected sink/source pair.
    pub fn pair() -> (Arc<Self>, ChannelSource) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                closed: AtomicBool::new(false),
            }),
            ChannelSource { rx },
        )
    }
}

impl FrameSink for ChannelSink {
    fn send(&self, frame: &CanFrame) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::SinkClosed.into());
        }
        self.tx
            .send(*frame)
            .map_err(|_| TransportError::SinkClosed.into())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn receive(&mut self) -> Option<CanFrame> {
        self.rx.recv().await
    }
}

impl ChannelSource {
    /// Non-async receive for synchronous tests; `None` when no frame is
    /// immediately available.
    pub fn try_receive(&mut self) -> Option<CanFrame> {
        self.rx.try_recv().ok()
    }
}
