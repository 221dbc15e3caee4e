//! Interface dispatcher.
//!
//! [`OlcbInterface`] ties the pieces together: inbound frames flow through
//! the alias arbiter, the alias registry, and the message decoder before
//! being delivered to registered handlers; outbound messages are serialized
//! onto the frame sink in submission order. All state is touched from the
//! interface's [`Executor`] (or the arbitration driver thread, which owns the
//! arbiter), so upper layers see a consistent single-threaded view.
//!
//! Handlers run on the interface's executor and must not block on another
//! interface-owned operation; doing so deadlocks an interface running on a
//! [`WorkerExecutor`].

pub mod executor;

pub use executor::{Executor, InlineExecutor, Task, WorkerExecutor};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::alias::{AliasArbiter, AliasMap, ArbiterEvent, ArbiterTiming};
use crate::builder::MessageBuilder;
use crate::config::InterfaceConfig;
use crate::error::{ArbitrationError, Error, Result};
use crate::frame::CanFrame;
use crate::message::Message;
use crate::transport::FrameSink;
use crate::types::{Alias, NodeId};

/// Connection contract between the core and upper layers.
///
/// `sender` identifies the connection the message came from, letting
/// bidirectional adapters avoid echoing a message back to its origin.
pub trait Connection: Send + Sync {
    fn put(&self, msg: Message, sender: Option<&dyn Connection>) -> Result<()>;
}

/// Predicate selecting the messages a handler wants.
pub type HandlerPredicate = Arc<dyn Fn(&Message) -> bool + Send + Sync>;
/// Upper-layer message handler.
pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;
/// Observer of alias lifecycle events.
pub type AliasEventObserver = Arc<dyn Fn(ArbiterEvent) + Send + Sync>;

#[derive(Clone)]
struct HandlerEntry {
    predicate: HandlerPredicate,
    handler: MessageHandler,
}

/// One OpenLCB interface: a local node attached to one CAN segment.
pub struct OlcbInterface {
    node: NodeId,
    config: InterfaceConfig,
    aliases: Arc<AliasMap>,
    sink: Arc<dyn FrameSink>,
    executor: Arc<dyn Executor>,
    arbiter: Mutex<AliasArbiter>,
    decoder: Mutex<MessageBuilder>,
    /// Copy-on-write so dispatch never blocks registration.
    handlers: RwLock<Arc<Vec<HandlerEntry>>>,
    send_queue: Mutex<VecDeque<Message>>,
    event_observer: Mutex<Option<AliasEventObserver>>,
    arbitration_failure: Mutex<Option<Box<dyn FnOnce(ArbitrationError) + Send>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    driver_signal: Arc<(Mutex<bool>, Condvar)>,
    disposed: AtomicBool,
}

impl OlcbInterface {
    /// Build an interface. Call [`start`](Self::start) to begin alias
    /// arbitration, after which queued messages flow.
    pub fn new(
        config: InterfaceConfig,
        sink: Arc<dyn FrameSink>,
        executor: Arc<dyn Executor>,
    ) -> Arc<Self> {
        let aliases = Arc::new(AliasMap::new());
        let timing = ArbiterTiming {
            cid_gap: config.cid_gap,
            reserve_quiet: config.reserve_quiet,
        };
        let arbiter = AliasArbiter::new(config.node_id, timing, config.arbitration_retry_limit);
        let decoder = MessageBuilder::with_reassembly_cap(aliases.clone(), config.reassembly_cap);
        Arc::new(Self {
            node: config.node_id,
            config,
            aliases,
            sink,
            executor,
            arbiter: Mutex::new(arbiter),
            decoder: Mutex::new(decoder),
            handlers: RwLock::new(Arc::new(Vec::new())),
            send_queue: Mutex::new(VecDeque::new()),
            event_observer: Mutex::new(None),
            arbitration_failure: Mutex::new(None),
            driver: Mutex::new(None),
            driver_signal: Arc::new((Mutex::new(false), Condvar::new())),
            disposed: AtomicBool::new(false),
        })
    }

    /// Build an interface that owns a fixed alias, skipping arbitration.
    ///
    /// The initialization announcement is emitted immediately, as the first
    /// outbound message.
    pub fn with_local_alias(
        config: InterfaceConfig,
        alias: Alias,
        sink: Arc<dyn FrameSink>,
        executor: Arc<dyn Executor>,
    ) -> Arc<Self> {
        let iface = Self::new(config, sink, executor);
        iface.arbiter.lock().adopt(alias);
        iface.aliases.insert(alias, iface.node);
        iface
            .send_queue
            .lock()
            .push_back(Message::InitializationComplete { source: iface.node });
        if let Err(e) = iface.flush_send_queue() {
            warn!(error = %e, "initialization announcement failed");
        }
        iface
    }

    /// The local node id.
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// The shared alias registry.
    pub fn alias_map(&self) -> &Arc<AliasMap> {
        &self.aliases
    }

    /// Our alias, once arbitration has completed.
    pub fn local_alias(&self) -> Option<Alias> {
        self.aliases.alias_for(self.node)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Observe alias lifecycle events (acquisition, loss).
    pub fn set_event_observer(&self, observer: AliasEventObserver) {
        *self.event_observer.lock() = Some(observer);
    }

    /// One-shot callback fired if arbitration exhausts its retry bound.
    pub fn set_arbitration_failure_callback(
        &self,
        callback: Box<dyn FnOnce(ArbitrationError) + Send>,
    ) {
        *self.arbitration_failure.lock() = Some(callback);
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// Endpoint for traffic arriving from the bus side (or injected by
    /// tests): messages put here are dispatched to registered handlers.
    pub fn input_connection(self: &Arc<Self>) -> Arc<dyn Connection> {
        Arc::new(InputConnection {
            iface: Arc::downgrade(self),
        })
    }

    /// Endpoint for upper layers: messages put here are serialized onto the
    /// wire (or looped back when addressed to the local node).
    pub fn output_connection(self: &Arc<Self>) -> Arc<dyn Connection> {
        Arc::new(OutputConnection {
            iface: Arc::downgrade(self),
        })
    }

    /// Register a handler for every inbound message matching `predicate`.
    /// Handlers fire in registration order.
    pub fn register_handler(&self, predicate: HandlerPredicate, handler: MessageHandler) {
        let mut guard = self.handlers.write();
        let mut next: Vec<HandlerEntry> = (**guard).clone();
        next.push(HandlerEntry { predicate, handler });
        *guard = Arc::new(next);
    }

    // ------------------------------------------------------------------
    // Arbitration driver
    // ------------------------------------------------------------------

    /// Begin alias arbitration on a dedicated timer thread. The interface
    /// cannot transmit until an alias is acquired; outbound messages queue
    /// in the meantime.
    pub fn start(self: &Arc<Self>) {
        let mut driver = self.driver.lock();
        if driver.is_some() || self.is_disposed() {
            return;
        }
        let iface = self.clone();
        let handle = thread::Builder::new()
            .name("openlcb-arbiter".into())
            .spawn(move || iface.drive_arbitration())
            .expect("spawn arbitration driver thread");
        *driver = Some(handle);
    }

    fn drive_arbitration(self: Arc<Self>) {
        let frames = self.arbiter.lock().start(Instant::now());
        self.forward_frames(&frames);
        self.drain_arbiter_events();

        loop {
            if self.is_disposed() {
                break;
            }
            let deadline = self.arbiter.lock().next_deadline();
            {
                let (lock, cv) = &*self.driver_signal;
                let mut wake = lock.lock();
                if !*wake {
                    match deadline {
                        Some(d) => {
                            let _ = cv.wait_until(&mut wake, d);
                        }
                        None => cv.wait(&mut wake),
                    }
                }
                *wake = false;
            }
            if self.is_disposed() {
                break;
            }
            let frames = self.arbiter.lock().poll(Instant::now());
            self.forward_frames(&frames);
            self.drain_arbiter_events();
        }
    }

    fn notify_driver(&self) {
        let (lock, cv) = &*self.driver_signal;
        let mut wake = lock.lock();
        *wake = true;
        cv.notify_all();
    }

    fn drain_arbiter_events(&self) {
        loop {
            let event = self.arbiter.lock().take_event();
            let Some(event) = event else { break };
            match event {
                ArbiterEvent::AliasAcquired { alias } => {
                    self.aliases.insert(alias, self.node);
                    self.send_queue
                        .lock()
                        .push_front(Message::InitializationComplete { source: self.node });
                    if let Err(e) = self.flush_queue_now() {
                        warn!(error = %e, "flush after alias acquisition failed");
                    }
                }
                ArbiterEvent::AliasLost { alias } => {
                    self.aliases.remove(alias);
                    info!(%alias, "local alias lost; re-arbitrating");
                }
                ArbiterEvent::RetriesExhausted { attempts } => {
                    if let Some(callback) = self.arbitration_failure.lock().take() {
                        callback(ArbitrationError::RetriesExhausted { attempts });
                    }
                }
            }
            if let Some(observer) = self.event_observer.lock().clone() {
                observer(event);
            }
        }
    }

    // ------------------------------------------------------------------
    // Inbound path
    // ------------------------------------------------------------------

    /// Feed one frame from the wire. Processing happens on the executor in
    /// arrival order.
    pub fn process_inbound_frame(self: &Arc<Self>, frame: CanFrame) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        let iface = self.clone();
        self.executor
            .schedule(Box::new(move || iface.handle_frame(&frame)))
    }

    fn handle_frame(&self, frame: &CanFrame) {
        // Arbitration sees every frame first; it may defend or restart.
        let responses = self.arbiter.lock().observe(frame, Instant::now());
        if !responses.is_empty() {
            self.forward_frames(&responses);
            self.notify_driver();
        }
        self.drain_arbiter_events();

        self.aliases.process_frame(frame);

        let messages = self.decoder.lock().process_frame(frame);
        if let Some(messages) = messages {
            for msg in &messages {
                self.dispatch_inbound(msg);
            }
        }
    }

    /// Deliver one message to interested handlers, answering the node-level
    /// queries the interface owns.
    fn dispatch_inbound(&self, msg: &Message) {
        self.answer_locally(msg);
        let snapshot = self.handlers.read().clone();
        for entry in snapshot.iter() {
            if (entry.predicate)(msg) {
                (entry.handler)(msg);
            }
        }
    }

    fn answer_locally(&self, msg: &Message) {
        let wants_us = match msg {
            Message::VerifyNodeIdGlobal { target, .. } => {
                target.is_none() || *target == Some(self.node)
            }
            Message::VerifyNodeIdAddressed {
                destination,
                target,
                ..
            } => *destination == self.node && target.map_or(true, |t| t == self.node),
            _ => false,
        };
        if !wants_us {
            return;
        }
        let reply = Message::VerifiedNodeId {
            source: self.node,
            node: self.node,
        };
        if self.local_alias().is_some() {
            if let Err(e) = self.serialize_now(&reply) {
                warn!(error = %e, "failed to answer node id verification");
            }
        } else {
            self.send_queue.lock().push_back(reply);
        }
    }

    // ------------------------------------------------------------------
    // Outbound path
    // ------------------------------------------------------------------

    fn submit_outbound(self: &Arc<Self>, msg: Message) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }

        // Loopback: traffic for the local node never reaches the wire.
        if msg.destination() == Some(self.node) {
            debug!(mti = %msg.mti(), "looping back message addressed to local node");
            let iface = self.clone();
            return self
                .executor
                .schedule(Box::new(move || iface.dispatch_inbound(&msg)));
        }

        if self.local_alias().is_none() {
            let mut queue = self.send_queue.lock();
            if queue.len() >= self.config.send_queue_cap {
                return Err(Error::Internal("send queue full".into()));
            }
            queue.push_back(msg);
            return Ok(());
        }

        self.run_on_executor(move |iface| iface.serialize_now(&msg))
    }

    /// Drain queued outbound messages synchronously. A no-op while the
    /// interface still has no alias.
    pub fn flush_send_queue(self: &Arc<Self>) -> Result<()> {
        self.run_on_executor(|iface| iface.flush_queue_now())
    }

    fn flush_queue_now(&self) -> Result<()> {
        if self.local_alias().is_none() {
            return Ok(());
        }
        loop {
            let msg = self.send_queue.lock().pop_front();
            let Some(msg) = msg else { break };
            self.serialize_now(&msg)?;
        }
        Ok(())
    }

    fn serialize_now(&self, msg: &Message) -> Result<()> {
        let builder = MessageBuilder::new(self.aliases.clone());
        let frames = builder.process_message(msg)?;
        for frame in &frames {
            self.send_frame(frame)?;
        }
        Ok(())
    }

    fn forward_frames(&self, frames: &[CanFrame]) {
        for frame in frames {
            if self.send_frame(frame).is_err() {
                break;
            }
        }
    }

    fn send_frame(&self, frame: &CanFrame) -> Result<()> {
        match self.sink.send(frame) {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(error = %e, "frame sink failed; interface is terminal");
                self.mark_terminal();
                Err(e)
            }
        }
    }

    /// Run `f` on the executor, returning its result to the caller.
    fn run_on_executor<F, T>(self: &Arc<Self>, f: F) -> Result<T>
    where
        F: FnOnce(&OlcbInterface) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        let (tx, rx) = mpsc::channel();
        let iface = self.clone();
        self.executor.schedule(Box::new(move || {
            let _ = tx.send(f(&iface));
        }))?;
        rx.recv().map_err(|_| Error::Disposed)?
    }

    fn mark_terminal(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.notify_driver();
            self.executor.shutdown();
            self.sink.close();
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Drain inbound work, serialize queued outbound messages, and release
    /// the frame sink. Operations after `dispose` return
    /// [`Error::Disposed`].
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.notify_driver();
        if let Some(handle) = self.driver.lock().take() {
            if thread::current().id() != handle.thread().id() {
                let _ = handle.join();
            }
        }
        // Pending inbound frames finish on the executor before it stops.
        self.executor.shutdown();
        if let Err(e) = self.flush_queue_now() {
            warn!(error = %e, "outbound flush during dispose failed");
        }
        self.sink.close();
    }
}

struct InputConnection {
    iface: Weak<OlcbInterface>,
}

impl Connection for InputConnection {
    fn put(&self, msg: Message, _sender: Option<&dyn Connection>) -> Result<()> {
        let iface = self.iface.upgrade().ok_or(Error::Disposed)?;
        if iface.is_disposed() {
            return Err(Error::Disposed);
        }
        let inner = iface.clone();
        iface
            .executor
            .schedule(Box::new(move || inner.dispatch_inbound(&msg)))
    }
}

struct OutputConnection {
    iface: Weak<OlcbInterface>,
}

impl Connection for OutputConnection {
    fn put(&self, msg: Message, _sender: Option<&dyn Connection>) -> Result<()> {
        let iface = self.iface.upgrade().ok_or(Error::Disposed)?;
        iface.submit_outbound(msg)
    }
}
