//! GridConnect byte tether.
//!
//! Pumps CAN frames over any `AsyncRead`/`AsyncWrite` pair (serial adapter,
//! TCP hub) in GridConnect ASCII form. The write side is the interface's
//! [`FrameSink`]; the read side decodes bytes incrementally and feeds the
//! interface's inbound port.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::frame::{gridconnect, CanFrame, GridConnectCodec};
use crate::iface::OlcbInterface;

use super::FrameSink;

const READ_BUFFER: usize = 4096;

/// Frame sink speaking GridConnect over a byte stream.
pub struct GridConnectTransport {
    tx: Mutex<Option<mpsc::UnboundedSender<CanFrame>>>,
    closed: AtomicBool,
    write_task: Mutex<Option<JoinHandle<()>>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

impl GridConnectTransport {
    /// Start the write pump over `writer`. Must be called inside a tokio
    /// runtime.
    pub fn new<W>(writer: W) -> Arc<Self>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<CanFrame>();
        let write_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(frame) = rx.recv().await {
                let rendered = gridconnect::format(&frame);
                if let Err(e) = writer.write_all(rendered.as_bytes()).await {
                    warn!(error = %e, "GridConnect write failed");
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
            let _ = writer.shutdown().await;
            debug!("GridConnect write pump finished");
        });

        Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
            write_task: Mutex::new(Some(write_task)),
            read_task: Mutex::new(None),
        })
    }

    /// Start the read pump: bytes from `reader` are decoded and delivered to
    /// `iface`'s inbound port in arrival order.
    pub fn attach_reader<R>(self: &Arc<Self>, iface: Arc<OlcbInterface>, reader: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let transport = self.clone();
        let task = tokio::spawn(async move {
            let mut reader = reader;
            let mut codec = GridConnectCodec::new();
            let mut buf = BytesMut::with_capacity(READ_BUFFER);
            'outer: loop {
                // Drain every complete frame before reading more bytes.
                while let Ok(Some(frame)) = codec.decode(&mut buf) {
                    if iface.process_inbound_frame(frame).is_err() {
                        break 'outer;
                    }
                }
                match reader.read_buf(&mut buf).await {
                    Ok(0) => {
                        debug!("GridConnect tether reached EOF");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "GridConnect read failed");
                        break;
                    }
                }
                if transport.is_closed() {
                    break;
                }
            }
            transport.close();
        });
        *self.read_task.lock() = Some(task);
    }
}

impl FrameSink for GridConnectTransport {
    fn send(&self, frame: &CanFrame) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::SinkClosed.into());
        }
        match self.tx.lock().as_ref() {
            Some(tx) => tx
                .send(*frame)
                .map_err(|_| TransportError::SinkClosed.into()),
            None => Err(TransportError::SinkClosed.into()),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping the sender lets the write pump drain and exit.
        drop(self.tx.lock().take());
        if let Some(task) = self.read_task.lock().take() {
            task.abort();
        }
        let _ = self.write_task.lock().take();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterfaceConfig;
    use crate::iface::InlineExecutor;
    use crate::message::Message;
    use crate::types::{Alias, EventId, NodeId};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn write_pump_renders_frames() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let (_remote_read, local_write) = tokio::io::split(local);
        let transport = GridConnectTransport::new(local_write);

        let frame = CanFrame::reserve_id(Alias::new(0x123).unwrap());
        transport.send(&frame).unwrap();
        transport.close();

        let mut rendered = String::new();
        remote.read_to_string(&mut rendered).await.unwrap();
        assert_eq!(rendered, ":X10700123N;");
    }

    #[tokio::test]
    async fn read_pump_feeds_interface() {
        let (local, remote) = tokio::io::duplex(1024);
        let (local_read, local_write) = tokio::io::split(local);
        let (mut remote_read, mut remote_write) = tokio::io::split(remote);

        let transport = GridConnectTransport::new(local_write);
        let node = NodeId::from_u64(0x0102_0000_0101);
        let iface = OlcbInterface::with_local_alias(
            InterfaceConfig::for_node(node),
            Alias::new(0x333).unwrap(),
            transport.clone(),
            Arc::new(InlineExecutor::new()),
        );
        transport.attach_reader(iface.clone(), local_read);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        iface.register_handler(
            Arc::new(|m: &Message| m.carries_event()),
            Arc::new(move |m: &Message| log.lock().push(m.clone())),
        );

        // The far node reports an event.
        remote_write
            .write_all(b":X195B4444N0102000002020001;")
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while seen.lock().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "no message arrived");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            seen.lock()[0],
            Message::ProducerConsumerEventReport {
                source: NodeId::UNKNOWN,
                event: EventId::from_u64(0x0102_0000_0202_0001),
            }
        );

        // The initialization announcement went out over the tether.
        let mut buf = vec![0u8; 64];
        let n = remote_read.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b":X19100333N010200000101;");

        iface.dispose();
    }
}
