use crate::{
    codec::Codec,
    config::Config,
    error::{Result, RmuxError},
    frame::{error_code, Frame, FrameBody, MAX_REQUEST_N},
    setup::{Setup, Version},
    stream::{
        finish_inbound, CloseReason, IncomingRequest, Payload, Producer, Responder,
        ResponseFuture, StreamEntry, StreamEvent, StreamKind, StreamLink, StreamPhase,
        StreamReceiver,
    },
    stream_id::StreamIdAllocator,
};
use bytes::Bytes;
use dashmap::DashMap;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::{
    marker::PhantomData,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::Notify,
    time::Instant,
};
use tokio_util::codec::Framed;

/// The SETUP parameters a session operates under: its own for a client,
/// the peer's for a server.
#[derive(Debug, Clone)]
pub struct SetupInfo {
    pub version: Version,
    pub keepalive_interval: Duration,
    pub max_lifetime: Duration,
    pub metadata_mime_type: String,
    pub data_mime_type: String,
    pub payload: Payload,
}

/// Close signal shared by the session's background tasks.
#[derive(Debug)]
pub(crate) struct SessionState {
    die: Arc<Notify>,
    closed: AtomicBool,
}

impl SessionState {
    fn new() -> Self {
        Self {
            die: Arc::new(Notify::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn close_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.die)
    }

    /// Returns true for the first closer, which owns the teardown.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.die.notify_waiters();
        true
    }
}

/// A multiplexed session over one bidirectional byte-stream transport.
///
/// All requester operations, the responder accept queue, and the keepalive
/// sub-protocol hang off this one value; clones share the connection.
#[derive(Debug)]
pub struct Session<T> {
    inner: Arc<SessionInner>,
    _transport: PhantomData<T>,
}

impl<T> Clone for Session<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _transport: PhantomData,
        }
    }
}

#[derive(Debug)]
struct SessionInner {
    /// The single piece of mutable shared state: live streams by id.
    streams: Arc<DashMap<u32, StreamEntry>>,
    config: Arc<Config>,
    setup: SetupInfo,
    allocator: StreamIdAllocator,
    /// Single logical writer: every outbound frame goes through here, in
    /// order, to `send_loop`.
    frame_tx: flume::Sender<Frame>,
    incoming_tx: flume::Sender<IncomingRequest>,
    incoming_rx: flume::Receiver<IncomingRequest>,
    state: SessionState,
    /// Liveness deadline as milliseconds past `epoch`; only ever moves
    /// forward.
    epoch: Instant,
    liveness_deadline_millis: AtomicU64,
    dropped_frames: AtomicU64,
}

impl SessionInner {
    fn link(&self, stream_id: u32) -> StreamLink {
        StreamLink::new(stream_id, self.frame_tx.clone(), Arc::clone(&self.streams))
    }

    fn reset_liveness_deadline(&self) {
        let deadline = Instant::now() + self.setup.max_lifetime - self.epoch;
        self.liveness_deadline_millis
            .store(deadline.as_millis() as u64, Ordering::Release);
    }

    fn liveness_deadline(&self) -> Instant {
        self.epoch
            + Duration::from_millis(self.liveness_deadline_millis.load(Ordering::Acquire))
    }
}

impl<T> Session<T>
where
    T: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static,
{
    /// Connect the client side: sends SETUP built from `config` (with
    /// `setup_payload` as its data/metadata) and starts the session.
    pub async fn client(transport: T, config: Config, setup_payload: Payload) -> Result<Self> {
        config.validate()?;

        let setup = Setup {
            version: Version::CURRENT,
            honor_lease: false,
            keepalive_interval_millis: config.keepalive_interval.as_millis() as u32,
            max_lifetime_millis: config.max_lifetime.as_millis() as u32,
            resume_token: None,
            metadata_mime_type: config.metadata_mime_type.clone(),
            data_mime_type: config.data_mime_type.clone(),
            metadata: setup_payload.metadata.clone(),
            data: setup_payload.data.clone(),
        };

        let mut framed = Framed::new(transport, Codec::new(&config));
        framed.send(Frame::new_setup(setup)).await?;

        let info = SetupInfo {
            version: Version::CURRENT,
            keepalive_interval: config.keepalive_interval,
            max_lifetime: config.max_lifetime,
            metadata_mime_type: config.metadata_mime_type.clone(),
            data_mime_type: config.data_mime_type.clone(),
            payload: setup_payload,
        };
        Ok(Self::spawn(framed, config, info, true))
    }

    /// Accept the server side: awaits the peer's SETUP, rejects resume
    /// tokens and unknown versions, and adopts the peer's keepalive timing.
    pub async fn server(transport: T, config: Config) -> Result<Self> {
        config.validate()?;

        let mut framed = Framed::new(transport, Codec::new(&config));
        let raw = match framed.next().await {
            Some(Ok(raw)) => raw,
            Some(Err(error)) => return Err(error),
            None => return Err(RmuxError::ConnectionClosed),
        };
        let frame = Frame::decode(raw)?;
        let setup = match frame.body {
            FrameBody::Setup(setup) => setup,
            _ => {
                reject_setup(&mut framed, error_code::INVALID_SETUP, "first frame must be SETUP")
                    .await;
                return Err(RmuxError::ProtocolViolation(
                    "first frame was not SETUP".to_string(),
                ));
            }
        };

        if setup.resume_token.is_some() {
            reject_setup(
                &mut framed,
                error_code::REJECTED_SETUP,
                "resumption is not supported",
            )
            .await;
            return Err(RmuxError::UnsupportedResumption);
        }
        if setup.version.major != Version::CURRENT.major {
            reject_setup(
                &mut framed,
                error_code::INVALID_SETUP,
                "unsupported protocol version",
            )
            .await;
            return Err(RmuxError::ProtocolViolation(format!(
                "unsupported protocol version {}",
                setup.version
            )));
        }
        if setup.keepalive_interval_millis == 0
            || setup.max_lifetime_millis <= setup.keepalive_interval_millis
        {
            reject_setup(&mut framed, error_code::INVALID_SETUP, "invalid keepalive timing").await;
            return Err(RmuxError::ProtocolViolation(
                "invalid keepalive timing in SETUP".to_string(),
            ));
        }

        let info = SetupInfo {
            version: setup.version,
            keepalive_interval: Duration::from_millis(setup.keepalive_interval_millis as u64),
            max_lifetime: Duration::from_millis(setup.max_lifetime_millis as u64),
            metadata_mime_type: setup.metadata_mime_type,
            data_mime_type: setup.data_mime_type,
            payload: Payload {
                metadata: setup.metadata,
                data: setup.data,
            },
        };
        Ok(Self::spawn(framed, config, info, false))
    }

    fn spawn(framed: Framed<T, Codec>, config: Config, setup: SetupInfo, is_client: bool) -> Self {
        let config = Arc::new(config);
        let (sink, stream) = framed.split();
        let (frame_tx, frame_rx) = flume::bounded(config.frame_queue_size);
        let (incoming_tx, incoming_rx) = flume::bounded(config.accept_queue_size);

        let inner = Arc::new(SessionInner {
            streams: Arc::new(DashMap::new()),
            config,
            allocator: if is_client {
                StreamIdAllocator::client()
            } else {
                StreamIdAllocator::server()
            },
            frame_tx,
            incoming_tx,
            incoming_rx,
            state: SessionState::new(),
            epoch: Instant::now(),
            liveness_deadline_millis: AtomicU64::new(setup.max_lifetime.as_millis() as u64),
            dropped_frames: AtomicU64::new(0),
            setup,
        });

        let recv_inner = Arc::clone(&inner);
        tokio::spawn(async move { recv_loop(stream, recv_inner).await });

        let send_inner = Arc::clone(&inner);
        tokio::spawn(async move { send_loop(sink, frame_rx, send_inner).await });

        let keepalive_inner = Arc::clone(&inner);
        tokio::spawn(async move { keepalive_send_loop(keepalive_inner).await });

        let liveness_inner = Arc::clone(&inner);
        tokio::spawn(async move { liveness_loop(liveness_inner).await });

        Session {
            inner,
            _transport: PhantomData,
        }
    }
}

impl<T> Session<T> {
    /// Issue a request expecting a single response payload.
    pub async fn request_response(&self, payload: Payload) -> Result<ResponseFuture> {
        let inner = &self.inner;
        if inner.state.is_closed() {
            return Err(RmuxError::ConnectionClosed);
        }

        let stream_id = inner.allocator.next();
        let frame = Frame::new_request_response(stream_id, payload);
        self.ensure_sendable(&frame)?;

        let (event_tx, event_rx) = flume::unbounded();
        let entry = StreamEntry::new(StreamKind::RequestResponse, event_tx, 1, 0);
        entry.outbound_done.store(true, Ordering::Release);
        inner.streams.insert(stream_id, entry);

        self.send_request(stream_id, frame).await?;
        Ok(ResponseFuture {
            link: inner.link(stream_id),
            rx: event_rx,
        })
    }

    /// Issue a request expecting a stream of payloads, granting the peer
    /// `initial_request_n` payloads of credit up front.
    pub async fn request_stream(
        &self,
        payload: Payload,
        initial_request_n: u32,
    ) -> Result<StreamReceiver> {
        let inner = &self.inner;
        if inner.state.is_closed() {
            return Err(RmuxError::ConnectionClosed);
        }
        validate_request_n(initial_request_n)?;

        let stream_id = inner.allocator.next();
        let frame = Frame::new_request_stream(stream_id, initial_request_n, payload);
        self.ensure_sendable(&frame)?;

        let (event_tx, event_rx) = flume::unbounded();
        let entry = StreamEntry::new(
            StreamKind::RequestStream,
            event_tx,
            initial_request_n as i64,
            0,
        );
        entry.outbound_done.store(true, Ordering::Release);
        let local_credit = Arc::clone(&entry.local_credit);
        inner.streams.insert(stream_id, entry);

        self.send_request(stream_id, frame).await?;
        Ok(StreamReceiver {
            link: inner.link(stream_id),
            rx: event_rx,
            local_credit,
            done: false,
        })
    }

    /// Open a bidirectional channel. `payload` is the initial request
    /// payload; payloads drained from `outgoing` are forwarded to the peer
    /// as that peer grants credit, and the returned receiver yields the
    /// peer's payloads.
    pub async fn request_channel(
        &self,
        payload: Payload,
        initial_request_n: u32,
        outgoing: flume::Receiver<Payload>,
    ) -> Result<StreamReceiver> {
        let inner = &self.inner;
        if inner.state.is_closed() {
            return Err(RmuxError::ConnectionClosed);
        }
        validate_request_n(initial_request_n)?;

        let stream_id = inner.allocator.next();
        let frame = Frame::new_request_channel(stream_id, initial_request_n, payload);
        self.ensure_sendable(&frame)?;

        let (event_tx, event_rx) = flume::unbounded();
        let entry = StreamEntry::new(
            StreamKind::RequestChannel,
            event_tx,
            initial_request_n as i64,
            0,
        );
        let local_credit = Arc::clone(&entry.local_credit);
        let gate = Arc::clone(&entry.remote_credit);
        inner.streams.insert(stream_id, entry);

        self.send_request(stream_id, frame).await?;
        spawn_channel_forwarder(Arc::clone(inner), stream_id, outgoing, gate);

        Ok(StreamReceiver {
            link: inner.link(stream_id),
            rx: event_rx,
            local_credit,
            done: false,
        })
    }

    /// Send a request expecting nothing back. No stream state is kept: no
    /// inbound frame is ever expected for the allocated id.
    pub async fn fire_and_forget(&self, payload: Payload) -> Result<()> {
        let inner = &self.inner;
        if inner.state.is_closed() {
            return Err(RmuxError::ConnectionClosed);
        }

        let stream_id = inner.allocator.next();
        let frame = Frame::new_request_fnf(stream_id, payload);
        self.ensure_sendable(&frame)?;
        inner
            .frame_tx
            .send_async(frame)
            .await
            .map_err(|_| RmuxError::ConnectionClosed)
    }

    /// Push connection-scoped metadata to the peer.
    pub async fn metadata_push(&self, metadata: Bytes) -> Result<()> {
        let inner = &self.inner;
        if inner.state.is_closed() {
            return Err(RmuxError::ConnectionClosed);
        }

        let frame = Frame::new_metadata_push(metadata);
        self.ensure_sendable(&frame)?;
        inner
            .frame_tx
            .send_async(frame)
            .await
            .map_err(|_| RmuxError::ConnectionClosed)
    }

    /// Wait for the next inbound request from the peer.
    pub async fn accept(&self) -> Result<IncomingRequest> {
        if self.inner.state.is_closed() {
            return Err(RmuxError::ConnectionClosed);
        }

        let close_notifier = self.inner.state.close_notifier();
        tokio::select! {
            request = self.inner.incoming_rx.recv_async() => {
                request.map_err(|_| RmuxError::ConnectionClosed)
            }
            _ = close_notifier.notified() => Err(RmuxError::ConnectionClosed),
        }
    }

    /// Close the session. Every live stream observes a connection-closed
    /// error and both keepalive timers stop.
    pub async fn close(&self) -> Result<()> {
        shutdown(&self.inner, RmuxError::ConnectionClosed);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.is_closed()
    }

    /// The SETUP parameters in effect: the locally sent ones for a client,
    /// the peer's for a server.
    pub fn setup_info(&self) -> &SetupInfo {
        &self.inner.setup
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Number of streams currently tracked in the live map.
    pub fn live_streams(&self) -> usize {
        self.inner.streams.len()
    }

    /// Total inbound frames discarded (malformed, unknown type, or
    /// addressed to no live stream).
    pub fn dropped_frames(&self) -> u64 {
        self.inner.dropped_frames.load(Ordering::Relaxed)
    }

    fn ensure_sendable(&self, frame: &Frame) -> Result<()> {
        let size = frame.encoded_len()?;
        if size > self.inner.config.max_frame_size {
            return Err(RmuxError::FrameTooLarge {
                size,
                max: self.inner.config.max_frame_size,
            });
        }
        Ok(())
    }

    async fn send_request(&self, stream_id: u32, frame: Frame) -> Result<()> {
        if self.inner.frame_tx.send_async(frame).await.is_err() {
            self.inner.streams.remove(&stream_id);
            return Err(RmuxError::ConnectionClosed);
        }
        if let Some(entry) = self.inner.streams.get(&stream_id) {
            entry.set_phase(StreamPhase::Active);
        }
        Ok(())
    }
}

fn validate_request_n(n: u32) -> Result<()> {
    if n == 0 || n > MAX_REQUEST_N {
        return Err(RmuxError::ProtocolViolation(format!(
            "initial request-n out of range: {n}"
        )));
    }
    Ok(())
}

async fn reject_setup<T>(framed: &mut Framed<T, Codec>, code: u32, message: &str)
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let _ = framed.send(Frame::new_error(0, code, message)).await;
}

/// Forward requester-side channel payloads to the peer, one unit of
/// peer-granted credit per payload. Exhausting `outgoing` half-closes the
/// outbound direction with a COMPLETE payload.
fn spawn_channel_forwarder(
    inner: Arc<SessionInner>,
    stream_id: u32,
    outgoing: flume::Receiver<Payload>,
    gate: Arc<crate::stream::CreditGate>,
) {
    let close_notifier = inner.state.close_notifier();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                item = outgoing.recv_async() => match item {
                    Ok(payload) => {
                        if gate.acquire().await.is_err() {
                            break;
                        }
                        if inner
                            .frame_tx
                            .send_async(Frame::new_payload_next(stream_id, payload))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(_) => {
                        crate::stream::finish_outbound(&inner.streams, stream_id);
                        let _ = inner
                            .frame_tx
                            .send_async(Frame::new_payload_complete(stream_id))
                            .await;
                        break;
                    }
                },
                _ = close_notifier.notified() => break,
            }
        }
    });
}

/// Background task reading framed buffers off the transport and
/// dispatching them in arrival order.
async fn recv_loop<T>(mut stream: SplitStream<Framed<T, Codec>>, inner: Arc<SessionInner>)
where
    T: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static,
{
    let close_notifier = inner.state.close_notifier();
    let error = loop {
        tokio::select! {
            next = stream.next() => match next {
                Some(Ok(raw)) => {
                    let frame = match Frame::decode(raw) {
                        Ok(frame) => frame,
                        Err(error) if !error.is_fatal() => {
                            drop_frame(&inner, 0, &error.to_string());
                            continue;
                        }
                        Err(error) => break error,
                    };
                    if let Err(error) = handle_frame(frame, &inner).await {
                        break error;
                    }
                }
                Some(Err(error)) => break error,
                None => break RmuxError::ConnectionClosed,
            },
            _ = close_notifier.notified() => break RmuxError::ConnectionClosed,
        }
    };

    shutdown(&inner, error);
}

/// Background task draining the outbound frame queue into the transport.
/// Dropping the sink on exit closes the transport's write half.
async fn send_loop<T>(
    mut sink: SplitSink<Framed<T, Codec>, Frame>,
    frame_rx: flume::Receiver<Frame>,
    inner: Arc<SessionInner>,
) where
    T: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static,
{
    let close_notifier = inner.state.close_notifier();
    loop {
        tokio::select! {
            frame = frame_rx.recv_async() => match frame {
                Ok(frame) => {
                    if let Err(error) = sink.send(frame).await {
                        if error.is_fatal() {
                            shutdown(&inner, error);
                            break;
                        }
                        // Encode-time rejection: the frame was never
                        // buffered, the connection is unaffected.
                        tracing::warn!(%error, "dropping unencodable outbound frame");
                    }
                }
                Err(_) => break,
            },
            _ = close_notifier.notified() => break,
        }
    }
}

/// Fixed-interval KEEPALIVE emission with the RESPOND flag set.
async fn keepalive_send_loop(inner: Arc<SessionInner>) {
    let close_notifier = inner.state.close_notifier();
    let mut ticker = tokio::time::interval(inner.setup.keepalive_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if inner
                    .frame_tx
                    .send_async(Frame::new_keepalive(true, Bytes::new()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            _ = close_notifier.notified() => break,
        }
    }
}

/// Sliding-window liveness watchdog, independent of the emission timer.
/// Any inbound KEEPALIVE pushes the deadline to now + max lifetime; if it
/// expires the connection is declared dead.
async fn liveness_loop(inner: Arc<SessionInner>) {
    let close_notifier = inner.state.close_notifier();
    loop {
        let deadline = inner.liveness_deadline();
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                // The deadline may have moved while we slept.
                if Instant::now() >= inner.liveness_deadline() {
                    shutdown(&inner, RmuxError::KeepaliveTimeout);
                    break;
                }
            }
            _ = close_notifier.notified() => break,
        }
    }
}

/// Terminate every tracked stream with the same error exactly once and
/// stop all background tasks. Idempotent.
fn shutdown(inner: &Arc<SessionInner>, error: RmuxError) {
    if !inner.state.close() {
        return;
    }
    match &error {
        RmuxError::ConnectionClosed => tracing::debug!("session closed"),
        error => tracing::error!(%error, "session failed"),
    }

    let stream_ids: Vec<u32> = inner.streams.iter().map(|entry| *entry.key()).collect();
    for stream_id in stream_ids {
        if let Some((_, entry)) = inner.streams.remove(&stream_id) {
            entry.terminate(CloseReason::ConnectionClosed);
            let _ = entry.event_tx.send(StreamEvent::Error(error.for_stream()));
        }
    }
}

/// The single site where discarded inbound frames are counted and logged.
fn drop_frame(inner: &SessionInner, stream_id: u32, reason: &str) {
    let dropped = inner.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
    tracing::warn!(stream_id, dropped, "dropping inbound frame: {reason}");
}

async fn handle_frame(frame: Frame, inner: &Arc<SessionInner>) -> Result<()> {
    let stream_id = frame.stream_id;
    if stream_id == 0 {
        return handle_connection_frame(frame, inner).await;
    }

    match frame.body {
        FrameBody::Payload {
            complete,
            next,
            payload,
            ..
        } => handle_payload(stream_id, next, complete, payload, inner).await,
        FrameBody::Error { code, data } => {
            handle_stream_error(stream_id, code, data, inner);
            Ok(())
        }
        FrameBody::Cancel => {
            handle_cancel(stream_id, inner);
            Ok(())
        }
        FrameBody::RequestN { n } => {
            handle_request_n(stream_id, n, inner);
            Ok(())
        }
        FrameBody::RequestResponse { payload } => {
            handle_request(StreamKind::RequestResponse, stream_id, payload, 0, false, inner).await
        }
        FrameBody::RequestFnf { payload } => {
            handle_request(StreamKind::FireAndForget, stream_id, payload, 0, false, inner).await
        }
        FrameBody::RequestStream {
            initial_request_n,
            payload,
        } => {
            handle_request(
                StreamKind::RequestStream,
                stream_id,
                payload,
                initial_request_n,
                false,
                inner,
            )
            .await
        }
        FrameBody::RequestChannel {
            initial_request_n,
            complete,
            payload,
        } => {
            handle_request(
                StreamKind::RequestChannel,
                stream_id,
                payload,
                initial_request_n,
                complete,
                inner,
            )
            .await
        }
        FrameBody::Unknown { type_code, .. } => {
            drop_frame(inner, stream_id, &format!("unknown frame type {type_code:#04x}"));
            Ok(())
        }
        _ => {
            drop_frame(inner, stream_id, "connection frame with a stream id");
            Ok(())
        }
    }
}

async fn handle_connection_frame(frame: Frame, inner: &Arc<SessionInner>) -> Result<()> {
    match frame.body {
        FrameBody::Keepalive { respond, data } => {
            inner.reset_liveness_deadline();
            if respond {
                // Immediate echo with RESPOND clear, not a scheduled
                // emission.
                if inner
                    .frame_tx
                    .send_async(Frame::new_keepalive(false, data))
                    .await
                    .is_err()
                {
                    return Err(RmuxError::ConnectionClosed);
                }
            }
            Ok(())
        }
        FrameBody::Error { code, data } => Err(RmuxError::Connection {
            code,
            message: String::from_utf8_lossy(&data).into_owned(),
        }),
        FrameBody::MetadataPush { metadata } => {
            if inner
                .incoming_tx
                .send_async(IncomingRequest::MetadataPush { metadata })
                .await
                .is_err()
            {
                return Err(RmuxError::ConnectionClosed);
            }
            Ok(())
        }
        FrameBody::Setup(_) => {
            drop_frame(inner, 0, "duplicate SETUP");
            Ok(())
        }
        FrameBody::Lease { .. } => {
            drop_frame(inner, 0, "lease negotiation not supported");
            Ok(())
        }
        FrameBody::Unknown { type_code, .. } => {
            drop_frame(inner, 0, &format!("unknown frame type {type_code:#04x}"));
            Ok(())
        }
        _ => {
            drop_frame(inner, 0, "stream frame addressed to the connection");
            Ok(())
        }
    }
}

async fn handle_payload(
    stream_id: u32,
    next: bool,
    complete: bool,
    payload: Payload,
    inner: &Arc<SessionInner>,
) -> Result<()> {
    // Clone the channel ends out of the map; guards are never held across
    // event delivery.
    let Some((event_tx, local_credit)) = inner
        .streams
        .get(&stream_id)
        .map(|entry| (entry.event_tx.clone(), Arc::clone(&entry.local_credit)))
    else {
        drop_frame(inner, stream_id, "payload for unknown stream");
        return Ok(());
    };

    if next {
        let granted = local_credit
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current > 0 { Some(current - 1) } else { None }
            })
            .is_ok();
        if !granted {
            // Credit overrun terminates the offending stream, never the
            // connection.
            terminate_stream(
                inner,
                stream_id,
                RmuxError::ProtocolViolation(
                    "payload received beyond granted credit".to_string(),
                ),
            )
            .await;
            return Ok(());
        }
        let _ = event_tx.send(StreamEvent::Next(payload));
    }

    if complete {
        // Retire the map entry before the consumer can observe the
        // completion event.
        finish_inbound(&inner.streams, stream_id);
        let _ = event_tx.send(StreamEvent::Complete);
    }
    Ok(())
}

fn handle_stream_error(stream_id: u32, code: u32, data: Bytes, inner: &Arc<SessionInner>) {
    match inner.streams.remove(&stream_id) {
        Some((_, entry)) => {
            tracing::debug!(stream_id, kind = ?entry.kind, code, "stream failed by peer");
            entry.terminate(CloseReason::Canceled);
            let _ = entry.event_tx.send(StreamEvent::Error(RmuxError::Application {
                code,
                message: String::from_utf8_lossy(&data).into_owned(),
            }));
        }
        None => drop_frame(inner, stream_id, "error for unknown stream"),
    }
}

fn handle_cancel(stream_id: u32, inner: &Arc<SessionInner>) {
    match inner.streams.remove(&stream_id) {
        Some((_, entry)) => {
            tracing::debug!(stream_id, kind = ?entry.kind, "stream canceled by peer");
            entry.terminate(CloseReason::Canceled);
            let _ = entry.event_tx.send(StreamEvent::Error(RmuxError::Canceled));
        }
        None => drop_frame(inner, stream_id, "cancel for unknown stream"),
    }
}

fn handle_request_n(stream_id: u32, n: u32, inner: &Arc<SessionInner>) {
    match inner.streams.get(&stream_id) {
        Some(entry) => entry.remote_credit.add(n),
        None => drop_frame(inner, stream_id, "request-n for unknown stream"),
    }
}

async fn handle_request(
    kind: StreamKind,
    stream_id: u32,
    payload: Payload,
    initial_request_n: u32,
    channel_complete: bool,
    inner: &Arc<SessionInner>,
) -> Result<()> {
    if kind != StreamKind::FireAndForget {
        if inner.allocator.validate_peer_stream_id(stream_id).is_err() {
            drop_frame(inner, stream_id, "request with local-parity stream id");
            return Ok(());
        }
        if inner.streams.contains_key(&stream_id) {
            drop_frame(inner, stream_id, "request reuses a live stream id");
            return Ok(());
        }
    }

    let request = match kind {
        StreamKind::FireAndForget => IncomingRequest::FireAndForget { payload },
        StreamKind::RequestResponse => {
            let (event_tx, _event_rx) = flume::unbounded();
            let entry = StreamEntry::new(kind, event_tx, 0, 0);
            entry.inbound_done.store(true, Ordering::Release);
            entry.set_phase(StreamPhase::Active);
            inner.streams.insert(stream_id, entry);
            IncomingRequest::Response {
                payload,
                responder: Responder {
                    link: inner.link(stream_id),
                },
            }
        }
        StreamKind::RequestStream => {
            let (event_tx, _event_rx) = flume::unbounded();
            let entry = StreamEntry::new(kind, event_tx, 0, initial_request_n);
            entry.inbound_done.store(true, Ordering::Release);
            entry.set_phase(StreamPhase::Active);
            let gate = Arc::clone(&entry.remote_credit);
            inner.streams.insert(stream_id, entry);
            IncomingRequest::Stream {
                payload,
                initial_request_n,
                producer: Producer {
                    link: inner.link(stream_id),
                    gate,
                },
            }
        }
        StreamKind::RequestChannel => {
            let (event_tx, event_rx) = flume::unbounded();
            let entry = StreamEntry::new(kind, event_tx.clone(), 0, initial_request_n);
            entry.set_phase(StreamPhase::Active);
            if channel_complete {
                entry.inbound_done.store(true, Ordering::Release);
                let _ = event_tx.send(StreamEvent::Complete);
            }
            let gate = Arc::clone(&entry.remote_credit);
            let local_credit = Arc::clone(&entry.local_credit);
            inner.streams.insert(stream_id, entry);
            IncomingRequest::Channel {
                payload,
                initial_request_n,
                producer: Producer {
                    link: inner.link(stream_id),
                    gate,
                },
                receiver: StreamReceiver {
                    link: inner.link(stream_id),
                    rx: event_rx,
                    local_credit,
                    done: false,
                },
            }
        }
    };

    if inner.incoming_tx.send_async(request).await.is_err() {
        // Accept queue gone: the session is shutting down.
        inner.streams.remove(&stream_id);
    }
    Ok(())
}

async fn terminate_stream(inner: &Arc<SessionInner>, stream_id: u32, error: RmuxError) {
    if let Some((_, entry)) = inner.streams.remove(&stream_id) {
        entry.terminate(CloseReason::Canceled);
        let _ = entry.event_tx.send(StreamEvent::Error(error));
        let _ = inner.frame_tx.send_async(Frame::new_cancel(stream_id)).await;
    }
}
