//! Per-stream state and the application-facing stream handles.
//!
//! Payload buffers are immutable after creation (`bytes::Bytes`), so
//! handing one to a handle or a frame never aliases mutable state.

use crate::{
    error::{Result, RmuxError},
    frame::{error_code, Frame, MAX_REQUEST_N},
    header,
};
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use std::sync::{
    atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering},
    Arc,
};
use tokio::sync::Notify;

/// An immutable metadata/data pair, the unit of application exchange.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload {
    pub metadata: Option<Bytes>,
    pub data: Bytes,
}

impl Payload {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            metadata: None,
            data: data.into(),
        }
    }

    pub fn with_metadata(metadata: impl Into<Bytes>, data: impl Into<Bytes>) -> Self {
        Self {
            metadata: Some(metadata.into()),
            data: data.into(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn trailer_length(&self) -> usize {
        header::trailer_length(self.metadata.as_ref().map(Bytes::len), self.data.len())
    }

    pub(crate) fn encode_trailer(&self, dst: &mut BytesMut) {
        header::encode_trailer(dst, self.metadata.as_deref(), &self.data);
    }

    pub(crate) fn decode_trailer(frame: &Bytes, offset: usize, has_metadata: bool) -> Result<Self> {
        let (metadata, data) = header::decode_trailer(frame, offset, has_metadata)?;
        Ok(Self { metadata, data })
    }
}

/// Events delivered to the consuming side of a stream.
#[derive(Debug)]
pub enum StreamEvent {
    Next(Payload),
    Complete,
    Error(RmuxError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    RequestResponse,
    RequestStream,
    RequestChannel,
    FireAndForget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Pending,
    Active,
    Terminated,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum CloseReason {
    Canceled,
    ConnectionClosed,
}

/// Peer-granted credit for outbound payload production.
///
/// Producers suspend in [`acquire`](Self::acquire) when the accumulator is
/// exhausted and resume when a REQUEST_N frame adds credit; emitting beyond
/// credit is therefore impossible by construction.
#[derive(Debug)]
pub(crate) struct CreditGate {
    credit: AtomicI64,
    added: Notify,
    closed: AtomicU8,
}

impl CreditGate {
    pub(crate) fn new(initial: u32) -> Arc<Self> {
        Arc::new(Self {
            credit: AtomicI64::new(initial as i64),
            added: Notify::new(),
            closed: AtomicU8::new(0),
        })
    }

    pub(crate) fn credit(&self) -> i64 {
        self.credit.load(Ordering::Acquire)
    }

    pub(crate) fn add(&self, n: u32) {
        if n == 0 {
            return;
        }
        add_credit(&self.credit, n);
        self.added.notify_waiters();
    }

    pub(crate) fn close(&self, reason: CloseReason) {
        let value = match reason {
            CloseReason::Canceled => 1,
            CloseReason::ConnectionClosed => 2,
        };
        self.closed.store(value, Ordering::Release);
        self.added.notify_waiters();
    }

    fn closed_error(&self) -> Option<RmuxError> {
        match self.closed.load(Ordering::Acquire) {
            0 => None,
            1 => Some(RmuxError::Canceled),
            _ => Some(RmuxError::ConnectionClosed),
        }
    }

    fn try_take(&self) -> bool {
        self.credit
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current > 0 { Some(current - 1) } else { None }
            })
            .is_ok()
    }

    /// Take one unit of credit, suspending until the peer grants more or
    /// the stream is torn down.
    pub(crate) async fn acquire(&self) -> Result<()> {
        loop {
            if let Some(error) = self.closed_error() {
                return Err(error);
            }
            if self.try_take() {
                return Ok(());
            }
            let mut added = std::pin::pin!(self.added.notified());
            added.as_mut().enable();
            // Re-check: credit or closure may have raced the registration.
            if self.closed_error().is_some() || self.credit() > 0 {
                continue;
            }
            added.await;
        }
    }
}

/// Saturating credit accumulation; grants may sum to "effectively
/// unbounded" without wrapping.
pub(crate) fn add_credit(counter: &AtomicI64, n: u32) {
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
        Some(current.saturating_add(n as i64))
    });
}

/// State the multiplexer tracks for each live stream.
#[derive(Debug)]
pub(crate) struct StreamEntry {
    pub(crate) kind: StreamKind,
    pub(crate) phase: AtomicU8,
    /// Delivers inbound payload events to the local consumer.
    pub(crate) event_tx: flume::Sender<StreamEvent>,
    /// Credit we have granted the peer; inbound payloads draw it down.
    pub(crate) local_credit: Arc<AtomicI64>,
    /// Credit the peer has granted us; outbound production draws it down.
    pub(crate) remote_credit: Arc<CreditGate>,
    /// Terminal bookkeeping for half-closable (channel) streams: the entry
    /// leaves the map once both directions are done.
    pub(crate) inbound_done: AtomicBool,
    pub(crate) outbound_done: AtomicBool,
}

impl StreamEntry {
    pub(crate) fn new(
        kind: StreamKind,
        event_tx: flume::Sender<StreamEvent>,
        local_credit: i64,
        remote_credit: u32,
    ) -> Self {
        Self {
            kind,
            phase: AtomicU8::new(StreamPhase::Pending as u8),
            event_tx,
            local_credit: Arc::new(AtomicI64::new(local_credit)),
            remote_credit: CreditGate::new(remote_credit),
            inbound_done: AtomicBool::new(false),
            outbound_done: AtomicBool::new(false),
        }
    }

    pub(crate) fn phase(&self) -> StreamPhase {
        match self.phase.load(Ordering::Acquire) {
            0 => StreamPhase::Pending,
            1 => StreamPhase::Active,
            _ => StreamPhase::Terminated,
        }
    }

    pub(crate) fn set_phase(&self, phase: StreamPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub(crate) fn terminate(&self, reason: CloseReason) {
        self.set_phase(StreamPhase::Terminated);
        self.remote_credit.close(reason);
    }
}

/// Mark a stream's inbound direction done, removing the entry once the
/// outbound direction is done too.
pub(crate) fn finish_inbound(streams: &DashMap<u32, StreamEntry>, stream_id: u32) {
    let remove = match streams.get(&stream_id) {
        Some(entry) => {
            entry.inbound_done.store(true, Ordering::Release);
            entry.outbound_done.load(Ordering::Acquire)
        }
        None => return,
    };
    if remove {
        if let Some((_, entry)) = streams.remove(&stream_id) {
            entry.terminate(CloseReason::Canceled);
        }
    }
}

/// Outbound counterpart of [`finish_inbound`].
pub(crate) fn finish_outbound(streams: &DashMap<u32, StreamEntry>, stream_id: u32) {
    let remove = match streams.get(&stream_id) {
        Some(entry) => {
            entry.outbound_done.store(true, Ordering::Release);
            entry.inbound_done.load(Ordering::Acquire)
        }
        None => return,
    };
    if remove {
        if let Some((_, entry)) = streams.remove(&stream_id) {
            entry.terminate(CloseReason::Canceled);
        }
    }
}

/// A handle's connection back to the multiplexer: the stream id, the
/// outbound frame queue, and the live-stream map.
#[derive(Debug)]
pub(crate) struct StreamLink {
    pub(crate) stream_id: u32,
    frame_tx: flume::Sender<Frame>,
    streams: Arc<DashMap<u32, StreamEntry>>,
    finished: AtomicBool,
}

impl StreamLink {
    pub(crate) fn new(
        stream_id: u32,
        frame_tx: flume::Sender<Frame>,
        streams: Arc<DashMap<u32, StreamEntry>>,
    ) -> Self {
        Self {
            stream_id,
            frame_tx,
            streams,
            finished: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        self.streams.contains_key(&self.stream_id)
    }

    /// Flip this handle to finished. Returns true for the first caller,
    /// which therefore owns the terminal action.
    pub(crate) fn finish(&self) -> bool {
        !self.finished.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub(crate) async fn send_frame(&self, frame: Frame) -> Result<()> {
        self.frame_tx
            .send_async(frame)
            .await
            .map_err(|_| RmuxError::ConnectionClosed)
    }

    pub(crate) fn streams(&self) -> &DashMap<u32, StreamEntry> {
        &self.streams
    }

    /// Cancel the stream: exactly one CANCEL frame if it was still live,
    /// and immediate removal from the map. Never waits on the peer.
    pub(crate) async fn cancel(&self) -> Result<()> {
        if !self.finish() {
            return Ok(());
        }
        let Some((_, entry)) = self.streams.remove(&self.stream_id) else {
            return Ok(());
        };
        entry.terminate(CloseReason::Canceled);
        self.send_frame(Frame::new_cancel(self.stream_id)).await
    }

    /// Best-effort cancellation from a Drop impl, where awaiting the frame
    /// queue is not possible.
    pub(crate) fn cancel_on_drop(&self) {
        if !self.finish() {
            return;
        }
        let Some((_, entry)) = self.streams.remove(&self.stream_id) else {
            return;
        };
        entry.terminate(CloseReason::Canceled);
        self.try_send_on_drop(Frame::new_cancel(self.stream_id));
    }

    fn try_send_on_drop(&self, frame: Frame) {
        match self.frame_tx.try_send(frame) {
            Ok(()) | Err(flume::TrySendError::Disconnected(_)) => {}
            Err(flume::TrySendError::Full(_)) => {
                tracing::warn!(
                    stream_id = self.stream_id,
                    "frame queue full while dropping stream handle"
                );
            }
        }
    }
}

/// Single-value handle returned by `request_response`.
///
/// Dropping it before the response arrives cancels the request.
#[derive(Debug)]
pub struct ResponseFuture {
    pub(crate) link: StreamLink,
    pub(crate) rx: flume::Receiver<StreamEvent>,
}

impl ResponseFuture {
    pub fn stream_id(&self) -> u32 {
        self.link.stream_id
    }

    /// Wait for the single response payload.
    pub async fn response(self) -> Result<Payload> {
        let result = match self.rx.recv_async().await {
            Ok(StreamEvent::Next(payload)) => Ok(payload),
            Ok(StreamEvent::Complete) => Err(RmuxError::ProtocolViolation(
                "response stream completed without a payload".to_string(),
            )),
            Ok(StreamEvent::Error(error)) => Err(error),
            Err(_) => Err(RmuxError::ConnectionClosed),
        };
        self.link.finish();
        result
    }

    pub async fn cancel(self) -> Result<()> {
        self.link.cancel().await
    }
}

impl Drop for ResponseFuture {
    fn drop(&mut self) {
        self.link.cancel_on_drop();
    }
}

/// Multi-value handle for the consuming side of a stream or channel.
#[derive(Debug)]
pub struct StreamReceiver {
    pub(crate) link: StreamLink,
    pub(crate) rx: flume::Receiver<StreamEvent>,
    pub(crate) local_credit: Arc<AtomicI64>,
    pub(crate) done: bool,
}

impl StreamReceiver {
    pub fn stream_id(&self) -> u32 {
        self.link.stream_id
    }

    /// Remaining credit the peer may spend on payloads to us.
    pub fn credit(&self) -> i64 {
        self.local_credit.load(Ordering::Acquire)
    }

    /// Next payload; `None` once the stream completed or was torn down,
    /// `Some(Err(_))` exactly once for a terminal error.
    pub async fn next(&mut self) -> Option<Result<Payload>> {
        if self.done {
            return None;
        }
        match self.rx.recv_async().await {
            Ok(StreamEvent::Next(payload)) => Some(Ok(payload)),
            Ok(StreamEvent::Complete) => {
                self.done = true;
                self.link.finish();
                None
            }
            Ok(StreamEvent::Error(error)) => {
                self.done = true;
                self.link.finish();
                Some(Err(error))
            }
            Err(_) => {
                self.done = true;
                self.link.finish();
                None
            }
        }
    }

    /// Grant the peer `n` more payloads and emit the REQUEST_N frame.
    pub async fn request(&self, n: u32) -> Result<()> {
        if n == 0 || n > MAX_REQUEST_N {
            return Err(RmuxError::ProtocolViolation(format!(
                "request-n out of range: {n}"
            )));
        }
        add_credit(&self.local_credit, n);
        self.link
            .send_frame(Frame::new_request_n(self.link.stream_id, n))
            .await
    }

    pub async fn cancel(mut self) -> Result<()> {
        self.done = true;
        self.link.cancel().await
    }
}

impl Drop for StreamReceiver {
    fn drop(&mut self) {
        self.link.cancel_on_drop();
    }
}

/// Producing side of a responder stream or channel. Payload emission is
/// credit-gated: `send` suspends until the peer has granted capacity.
///
/// Dropping a producer without calling [`complete`](Self::complete) or
/// [`error`](Self::error) reports an error to the peer.
#[derive(Debug)]
pub struct Producer {
    pub(crate) link: StreamLink,
    pub(crate) gate: Arc<CreditGate>,
}

impl Producer {
    pub fn stream_id(&self) -> u32 {
        self.link.stream_id
    }

    /// Credit currently available for [`send`](Self::send).
    pub fn credit(&self) -> i64 {
        self.gate.credit()
    }

    pub async fn send(&self, payload: Payload) -> Result<()> {
        if self.link.is_finished() || !self.link.is_live() {
            return Err(RmuxError::Canceled);
        }
        self.gate.acquire().await?;
        self.link
            .send_frame(Frame::new_payload_next(self.link.stream_id, payload))
            .await
    }

    pub async fn complete(self) -> Result<()> {
        if !self.link.finish() {
            return Err(RmuxError::Canceled);
        }
        finish_outbound(self.link.streams(), self.link.stream_id);
        self.link
            .send_frame(Frame::new_payload_complete(self.link.stream_id))
            .await
    }

    pub async fn error(self, message: impl Into<String>) -> Result<()> {
        if !self.link.finish() {
            return Err(RmuxError::Canceled);
        }
        if let Some((_, entry)) = self.link.streams().remove(&self.link.stream_id) {
            entry.terminate(CloseReason::Canceled);
        }
        self.link
            .send_frame(Frame::new_error(
                self.link.stream_id,
                error_code::APPLICATION_ERROR,
                &message.into(),
            ))
            .await
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        if !self.link.finish() {
            return;
        }
        if self
            .link
            .streams()
            .remove(&self.link.stream_id)
            .map(|(_, entry)| entry.terminate(CloseReason::Canceled))
            .is_none()
        {
            return;
        }
        self.link.try_send_on_drop(Frame::new_error(
            self.link.stream_id,
            error_code::APPLICATION_ERROR,
            "producer dropped before completion",
        ));
    }
}

/// Single-response handle for an inbound request-response.
#[derive(Debug)]
pub struct Responder {
    pub(crate) link: StreamLink,
}

impl Responder {
    pub fn stream_id(&self) -> u32 {
        self.link.stream_id
    }

    /// Send the one response payload and complete the stream.
    pub async fn respond(self, payload: Payload) -> Result<()> {
        if !self.link.finish() {
            return Err(RmuxError::Canceled);
        }
        if self.link.streams().remove(&self.link.stream_id).is_none() {
            // Requester canceled before we answered.
            return Err(RmuxError::Canceled);
        }
        self.link
            .send_frame(Frame::new_payload_next_complete(self.link.stream_id, payload))
            .await
    }

    pub async fn error(self, message: impl Into<String>) -> Result<()> {
        if !self.link.finish() {
            return Err(RmuxError::Canceled);
        }
        if self.link.streams().remove(&self.link.stream_id).is_none() {
            return Err(RmuxError::Canceled);
        }
        self.link
            .send_frame(Frame::new_error(
                self.link.stream_id,
                error_code::APPLICATION_ERROR,
                &message.into(),
            ))
            .await
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if !self.link.finish() {
            return;
        }
        if self.link.streams().remove(&self.link.stream_id).is_none() {
            return;
        }
        self.link.try_send_on_drop(Frame::new_error(
            self.link.stream_id,
            error_code::APPLICATION_ERROR,
            "responder dropped without a response",
        ));
    }
}

/// One inbound request surfaced through [`Session::accept`].
///
/// [`Session::accept`]: crate::session::Session::accept
#[derive(Debug)]
pub enum IncomingRequest {
    Response {
        payload: Payload,
        responder: Responder,
    },
    Stream {
        payload: Payload,
        initial_request_n: u32,
        producer: Producer,
    },
    Channel {
        payload: Payload,
        initial_request_n: u32,
        producer: Producer,
        receiver: StreamReceiver,
    },
    FireAndForget {
        payload: Payload,
    },
    MetadataPush {
        metadata: Bytes,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_payload_constructors() {
        let payload = Payload::new(Bytes::from_static(b"data"));
        assert!(payload.metadata.is_none());
        assert_eq!(payload.data, Bytes::from_static(b"data"));

        let payload = Payload::with_metadata(Bytes::from_static(b"m"), Bytes::from_static(b"d"));
        assert_eq!(payload.metadata, Some(Bytes::from_static(b"m")));

        assert!(Payload::empty().data.is_empty());
    }

    #[tokio::test]
    async fn test_credit_gate_takes_initial_credit() {
        let gate = CreditGate::new(2);
        gate.acquire().await.unwrap();
        gate.acquire().await.unwrap();
        assert_eq!(gate.credit(), 0);
    }

    #[tokio::test]
    async fn test_credit_gate_suspends_until_granted() {
        let gate = CreditGate::new(0);

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.acquire().await })
        };

        // The waiter cannot finish before credit arrives.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.add(1);
        waiter.await.unwrap().unwrap();
        assert_eq!(gate.credit(), 0);
    }

    #[tokio::test]
    async fn test_credit_gate_close_wakes_waiters() {
        let gate = CreditGate::new(0);

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.acquire().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.close(CloseReason::Canceled);

        match waiter.await.unwrap() {
            Err(RmuxError::Canceled) => (),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_credit_saturates_instead_of_wrapping() {
        let counter = AtomicI64::new(i64::MAX - 1);
        add_credit(&counter, MAX_REQUEST_N);
        assert_eq!(counter.load(Ordering::Acquire), i64::MAX);
    }

    #[test]
    fn test_entry_phase_transitions() {
        let (event_tx, _event_rx) = flume::unbounded();
        let entry = StreamEntry::new(StreamKind::RequestStream, event_tx, 5, 0);
        assert_eq!(entry.phase(), StreamPhase::Pending);

        entry.set_phase(StreamPhase::Active);
        assert_eq!(entry.phase(), StreamPhase::Active);

        entry.terminate(CloseReason::Canceled);
        assert_eq!(entry.phase(), StreamPhase::Terminated);
    }

    #[test]
    fn test_half_close_removes_entry_only_when_both_sides_done() {
        let streams: DashMap<u32, StreamEntry> = DashMap::new();
        let (event_tx, _event_rx) = flume::unbounded();
        streams.insert(7, StreamEntry::new(StreamKind::RequestChannel, event_tx, 0, 0));

        finish_outbound(&streams, 7);
        assert!(streams.contains_key(&7));

        finish_inbound(&streams, 7);
        assert!(!streams.contains_key(&7));
    }
}
