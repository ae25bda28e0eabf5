//! Connection: one socket, one receiver execution, one sender execution.
//!
//! Responsibilities:
//! - Per-connection bookkeeping (identity, timestamps, status, attributes,
//!   consecutive-timeout counter).
//! - The receiver execution: read -> incremental decode -> observer
//!   dispatch, with read timeouts surfaced as deliverable values.
//! - The sender execution: batch-drain the outbound queue and write frames
//!   in submission order.
//! - Idempotent teardown, callable from any task including the executions
//!   themselves.
//!
//! Concurrency model:
//! - The two executions are independent tasks; inbound and outbound streams
//!   never wait on each other.
//! - Teardown is a single cancellation token observed by both executions
//!   and by the synchronous read/write paths; dropping the socket halves
//!   unblocks anything the token cannot reach.
//!
//! Failure taxonomy on the receive path:
//! - clean peer EOF            -> 200 normal
//! - reset / timeout / loss    -> 200 normal (logged as unexpected loss)
//! - malformed or unknown frame-> 400 protocol violation
//! - unexpected internal fault -> 500 internal error
//! - forced shutdown           -> 503 unavailable
//!
//! (C) Parlor

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use parlor_proto::{Body, Message, MessageDecoder, Role, encode_message};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::EngineContext;
use crate::error::EngineError;
use crate::observer::{ConnectionObserver, Delivery, Disposition};
use crate::queue::OutboundQueue;
use crate::status::CloseStatus;

/// Outcome of one synchronous `read` call: a message, or an elapsed read
/// timer. Fatal conditions arrive as `Err` instead, so "try again" and
/// "connection is dead" stay distinguishable.
#[derive(Debug)]
pub enum ReadEvent {
    Message(Message),
    Timeout,
}

struct ReadSide {
    half: OwnedReadHalf,
    decoder: MessageDecoder,
}

struct WriteSide {
    writer: BufWriter<OwnedWriteHalf>,
}

#[derive(Default)]
struct Ending {
    status: Option<CloseStatus>,
    kicked_by: Option<String>,
}

#[derive(Default)]
struct Executions {
    receiver: Option<JoinHandle<()>>,
    sender: Option<JoinHandle<()>>,
}

enum ReadStep {
    TimedOut,
    Io(std::io::Result<usize>),
}

async fn read_step(
    half: &mut OwnedReadHalf,
    decoder: &mut MessageDecoder,
    limit: Option<Duration>,
) -> ReadStep {
    match limit {
        Some(limit) => match timeout(limit, half.read_buf(decoder.read_buf())).await {
            Ok(result) => ReadStep::Io(result),
            Err(_) => ReadStep::TimedOut,
        },
        None => ReadStep::Io(half.read_buf(decoder.read_buf()).await),
    }
}

fn unix_millis_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One full-duplex connection to a peer.
pub struct Connection {
    /// Back-reference handed to the spawned executions.
    self_ref: Weak<Connection>,
    id: u64,
    peer: SocketAddr,
    created_millis: u64,
    /// 0 while the connection is open.
    closed_millis: AtomicU64,
    open: AtomicBool,
    ending: Mutex<Ending>,
    attributes: Mutex<HashMap<String, String>>,
    consecutive_timeouts: AtomicU32,
    observers: Mutex<Vec<Arc<dyn ConnectionObserver>>>,
    queue: OutboundQueue,
    shutdown: CancellationToken,
    /// Whether this connection holds a turnstile slot to release on close.
    admitted: AtomicBool,
    ctx: Arc<EngineContext>,
    read_side: tokio::sync::Mutex<Option<ReadSide>>,
    write_side: tokio::sync::Mutex<Option<WriteSide>>,
    executions: Mutex<Executions>,
}

impl Connection {
    /// Wrap an accepted or dialed socket without consuming a turnstile slot.
    pub fn open(stream: TcpStream, ctx: &Arc<EngineContext>) -> Result<Arc<Self>, EngineError> {
        Self::build(stream, ctx, false)
    }

    /// Wrap a socket behind the engine's turnstile; blocks while the
    /// admission limit is reached. The slot is released when the
    /// connection closes.
    pub async fn admitted(
        stream: TcpStream,
        ctx: &Arc<EngineContext>,
    ) -> Result<Arc<Self>, EngineError> {
        ctx.turnstile().enter().await;
        match Self::build(stream, ctx, true) {
            Ok(conn) => Ok(conn),
            Err(err) => {
                ctx.turnstile().exit();
                Err(err)
            }
        }
    }

    fn build(
        stream: TcpStream,
        ctx: &Arc<EngineContext>,
        admitted: bool,
    ) -> Result<Arc<Self>, EngineError> {
        let peer = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        let conn = Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            id: ctx.next_id(),
            peer,
            created_millis: unix_millis_now(),
            closed_millis: AtomicU64::new(0),
            open: AtomicBool::new(true),
            ending: Mutex::new(Ending::default()),
            attributes: Mutex::new(HashMap::new()),
            consecutive_timeouts: AtomicU32::new(0),
            observers: Mutex::new(Vec::new()),
            queue: OutboundQueue::new(),
            shutdown: CancellationToken::new(),
            admitted: AtomicBool::new(admitted),
            ctx: Arc::clone(ctx),
            read_side: tokio::sync::Mutex::new(Some(ReadSide {
                half: read_half,
                decoder: MessageDecoder::new(),
            })),
            write_side: tokio::sync::Mutex::new(Some(WriteSide {
                writer: BufWriter::new(write_half),
            })),
            executions: Mutex::new(Executions::default()),
        });
        ctx.add(&conn);
        debug!(id = conn.id, peer = %conn.peer, admitted, "connection open");
        Ok(conn)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// The peer address used by the duplicate-detection index.
    pub fn address(&self) -> IpAddr {
        self.peer.ip()
    }

    pub fn created_millis(&self) -> u64 {
        self.created_millis
    }

    /// Unix milliseconds of the close, 0 while the connection is open.
    pub fn closed_millis(&self) -> u64 {
        self.closed_millis.load(Ordering::Acquire)
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn status(&self) -> Option<CloseStatus> {
        self.ending.lock().expect("ending lock poisoned").status
    }

    /// Identifier of the peer that kicked this connection, if any.
    pub fn kicked_by(&self) -> Option<String> {
        self.ending
            .lock()
            .expect("ending lock poisoned")
            .kicked_by
            .clone()
    }

    /// Read timeouts seen since the last successful decode.
    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts.load(Ordering::Relaxed)
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes
            .lock()
            .expect("attributes lock poisoned")
            .insert(key.into(), value.into());
    }

    pub fn attribute(&self, key: &str) -> Option<String> {
        self.attributes
            .lock()
            .expect("attributes lock poisoned")
            .get(key)
            .cloned()
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn add_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        self.observers
            .lock()
            .expect("observers lock poisoned")
            .push(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn ConnectionObserver>) {
        self.observers
            .lock()
            .expect("observers lock poisoned")
            .retain(|existing| !Arc::ptr_eq(existing, observer));
    }

    /// Queue a message for the sender execution; returns the queue depth.
    pub fn send(&self, message: Message) -> Result<usize, EngineError> {
        self.queue.put(message).map_err(|_| EngineError::Closed)
    }

    /// The live `Arc` behind `&self`; present for the whole time anyone can
    /// call a method on this connection.
    fn strong(&self) -> Result<Arc<Self>, EngineError> {
        self.self_ref.upgrade().ok_or(EngineError::Closed)
    }

    /// Start the receiver execution. Fails if the receive direction is
    /// already owned by an execution or a synchronous reader.
    pub fn start_receiving(&self) -> Result<(), EngineError> {
        if !self.is_open() {
            return Err(EngineError::Closed);
        }
        let side = {
            let mut guard = self
                .read_side
                .try_lock()
                .map_err(|_| EngineError::ReceiverBusy)?;
            guard.take().ok_or(EngineError::ReceiverBusy)?
        };
        let handle = tokio::spawn(self.strong()?.run_receiver(side));
        self.executions
            .lock()
            .expect("executions lock poisoned")
            .receiver = Some(handle);
        Ok(())
    }

    /// Start the sender execution. Fails if the send direction is already
    /// owned by an execution or a synchronous writer.
    pub fn start_sending(&self) -> Result<(), EngineError> {
        if !self.is_open() {
            return Err(EngineError::Closed);
        }
        let side = {
            let mut guard = self
                .write_side
                .try_lock()
                .map_err(|_| EngineError::SenderBusy)?;
            guard.take().ok_or(EngineError::SenderBusy)?
        };
        let handle = tokio::spawn(self.strong()?.run_sender(side));
        self.executions
            .lock()
            .expect("executions lock poisoned")
            .sender = Some(handle);
        Ok(())
    }

    /// Synchronous alternative to the receiver execution, for callers that
    /// want request/response semantics. Single caller per direction;
    /// unavailable while the receiver execution runs.
    pub async fn read(&self) -> Result<ReadEvent, EngineError> {
        if !self.is_open() {
            return Err(EngineError::Closed);
        }
        let mut guard = self
            .read_side
            .try_lock()
            .map_err(|_| EngineError::ReceiverBusy)?;
        let side = guard.as_mut().ok_or(EngineError::ReceiverBusy)?;
        let limit = self.ctx.config().read_timeout();

        loop {
            match side.decoder.next_message(self.ctx.registry()) {
                Ok(Some(message)) => {
                    self.consecutive_timeouts.store(0, Ordering::Relaxed);
                    self.ctx.record_received(1);
                    return Ok(ReadEvent::Message(message));
                }
                Ok(None) => {}
                Err(err) => {
                    self.close(CloseStatus::ProtocolViolation);
                    return Err(err.into());
                }
            }

            let step = tokio::select! {
                _ = self.shutdown.cancelled() => return Err(EngineError::Closed),
                step = read_step(&mut side.half, &mut side.decoder, limit) => step,
            };
            match step {
                ReadStep::TimedOut => {
                    self.consecutive_timeouts.fetch_add(1, Ordering::Relaxed);
                    return Ok(ReadEvent::Timeout);
                }
                ReadStep::Io(Ok(0)) => {
                    self.close(CloseStatus::Normal);
                    return Err(EngineError::Closed);
                }
                ReadStep::Io(Ok(_)) => {}
                ReadStep::Io(Err(err)) => {
                    self.close(CloseStatus::Normal);
                    return Err(err.into());
                }
            }
        }
    }

    /// Synchronous alternative to the sender execution: encode and write
    /// directly, bypassing the outbound queue. Single caller per direction;
    /// unavailable while the sender execution runs.
    pub async fn write(&self, message: &Message) -> Result<(), EngineError> {
        if !self.is_open() {
            return Err(EngineError::Closed);
        }
        let mut guard = self
            .write_side
            .try_lock()
            .map_err(|_| EngineError::SenderBusy)?;
        let side = guard.as_mut().ok_or(EngineError::SenderBusy)?;

        let mut wire = BytesMut::new();
        encode_message(message, &mut wire)?;
        side.writer.write_all(&wire).await?;
        side.writer.flush().await?;
        self.ctx.record_sent(1);
        Ok(())
    }

    /// Close with an ordinary status.
    pub fn close(&self, status: CloseStatus) {
        self.close_with(status, None);
    }

    /// Close on behalf of a kicking peer, recording who did it.
    pub fn close_kicked(&self, status: CloseStatus, kicker: impl Into<String>) {
        self.close_with(status, Some(kicker.into()));
    }

    /// Idempotent teardown; safe from any task, including the executions
    /// themselves. Later calls are no-ops and never see a reopened state.
    fn close_with(&self, status: CloseStatus, kicked_by: Option<String>) {
        if self
            .open
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        // The sequence below mirrors the receive-path teardown contract:
        // each step is independent, so a failure in one cannot skip the
        // rest.
        self.closed_millis.store(unix_millis_now(), Ordering::Release);
        {
            let mut ending = self.ending.lock().expect("ending lock poisoned");
            ending.status = Some(status);
            ending.kicked_by = kicked_by;
        }

        self.ctx.remove(self);
        if self.admitted.swap(false, Ordering::AcqRel) {
            self.ctx.turnstile().exit();
        }

        // Sentinel to every current observer exactly once, then detach.
        let observers = {
            let mut guard = self.observers.lock().expect("observers lock poisoned");
            std::mem::take(&mut *guard)
        };
        for observer in &observers {
            if let Err(err) = observer.on_delivery(self, &Delivery::Closed) {
                warn!(id = self.id, error = %err, "observer failed on close sentinel");
            }
        }

        // Stop the sender (drain-wait wakes with None), then unblock
        // everything else watching the token.
        self.queue.close();
        self.shutdown.cancel();

        // Drop socket halves not owned by an execution; the executions drop
        // theirs on exit.
        if let Ok(mut side) = self.read_side.try_lock() {
            side.take();
        }
        if let Ok(mut side) = self.write_side.try_lock() {
            side.take();
        }

        debug!(id = self.id, peer = %self.peer, %status, "connection closed");
    }

    /// Offer a delivery to every observer in order until one claims it.
    /// Observer failures are reported to the peer as fault messages.
    fn dispatch(&self, delivery: &Delivery) {
        let observers: Vec<_> = self
            .observers
            .lock()
            .expect("observers lock poisoned")
            .clone();
        for observer in observers {
            match observer.on_delivery(self, delivery) {
                Ok(Disposition::Continue) => {}
                Ok(Disposition::Claimed) => break,
                Err(err) => {
                    warn!(id = self.id, error = %err, "observer failed; reporting to peer");
                    let fault = Message::new(Body::Fault {
                        detail: err.to_string(),
                    })
                    .with_role(Role::Indication);
                    let _ = self.send(fault);
                }
            }
        }
    }

    async fn run_receiver(self: Arc<Self>, side: ReadSide) {
        let ReadSide {
            mut half,
            mut decoder,
        } = side;
        let limit = self.ctx.config().read_timeout();

        let status = loop {
            // Drain complete frames before touching the socket again.
            match decoder.next_message(self.ctx.registry()) {
                Ok(Some(message)) => {
                    self.consecutive_timeouts.store(0, Ordering::Relaxed);
                    self.ctx.record_received(1);
                    let message = Arc::new(message);
                    let pause = message.read_pause();
                    self.dispatch(&Delivery::Message(message));
                    if !pause.is_zero() {
                        tokio::select! {
                            _ = self.shutdown.cancelled() => return,
                            _ = tokio::time::sleep(pause) => {}
                        }
                    }
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(id = self.id, error = %err, "protocol violation on receive");
                    break CloseStatus::ProtocolViolation;
                }
            }

            let step = tokio::select! {
                // Close already ran elsewhere; nothing left to do here.
                _ = self.shutdown.cancelled() => return,
                step = read_step(&mut half, &mut decoder, limit) => step,
            };
            match step {
                ReadStep::TimedOut => {
                    self.consecutive_timeouts.fetch_add(1, Ordering::Relaxed);
                    self.dispatch(&Delivery::Timeout);
                }
                ReadStep::Io(Ok(0)) => {
                    if decoder.buffered_len() > 0 {
                        warn!(id = self.id, "peer closed mid-frame");
                    }
                    break CloseStatus::Normal;
                }
                ReadStep::Io(Ok(_)) => {}
                ReadStep::Io(Err(err)) => {
                    warn!(id = self.id, error = %err, "connection lost");
                    break CloseStatus::Normal;
                }
            }
        };
        self.close(status);
    }

    async fn run_sender(self: Arc<Self>, side: WriteSide) {
        let WriteSide { mut writer } = side;
        let mut wire = BytesMut::new();

        let status = 'outer: loop {
            let batch = tokio::select! {
                _ = self.shutdown.cancelled() => None,
                batch = self.queue.drain_all() => batch,
            };
            let Some(batch) = batch else {
                break CloseStatus::Normal;
            };

            for message in batch {
                wire.clear();
                if let Err(err) = encode_message(&message, &mut wire) {
                    warn!(id = self.id, error = %err, "dropping unencodable outbound message");
                    continue;
                }
                if let Err(err) = writer.write_all(&wire).await {
                    warn!(id = self.id, error = %err, "write failed");
                    break 'outer CloseStatus::Normal;
                }
                self.ctx.record_sent(1);

                let pause = message.write_pause();
                if !pause.is_zero() {
                    if writer.flush().await.is_err() {
                        break 'outer CloseStatus::Normal;
                    }
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break 'outer CloseStatus::Normal,
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
            }
            if let Err(err) = writer.flush().await {
                warn!(id = self.id, error = %err, "flush failed");
                break CloseStatus::Normal;
            }
        };

        // Best-effort FIN so the peer sees an orderly end of stream.
        let _ = writer.shutdown().await;
        self.close(status);
    }

    pub(crate) fn take_execution_handles(&self) -> (Option<JoinHandle<()>>, Option<JoinHandle<()>>) {
        let mut executions = self.executions.lock().expect("executions lock poisoned");
        (executions.receiver.take(), executions.sender.take())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("open", &self.is_open())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
