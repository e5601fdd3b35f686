use crate::error::{Result, RmuxError};
use std::sync::atomic::{AtomicU32, Ordering};

/// Largest usable stream id (31 bits; the header's top bit is reserved).
pub const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// Produces the stream ids one connection endpoint uses for self-initiated
/// streams. Client allocators yield 1, 3, 5, …; server allocators 2, 4, 6,
/// …; neither ever yields 0, which addresses the connection itself.
///
/// Past the 31-bit maximum the sequence wraps back to the parity's starting
/// value, never crossing into the opposite parity's id space. The allocator
/// does not track retirement; callers must not outrun the retirement of
/// previously issued ids.
#[derive(Debug)]
pub struct StreamIdAllocator {
    next_id: AtomicU32,
    is_client: bool,
}

impl StreamIdAllocator {
    pub fn client() -> Self {
        Self::new(true)
    }

    pub fn server() -> Self {
        Self::new(false)
    }

    fn new(is_client: bool) -> Self {
        Self {
            next_id: AtomicU32::new(Self::start(is_client)),
            is_client,
        }
    }

    fn start(is_client: bool) -> u32 {
        if is_client { 1 } else { 2 }
    }

    /// The next id of this endpoint's parity. Deterministic for a fresh
    /// allocator: the Nth call always returns the same value.
    pub fn next(&self) -> u32 {
        let start = Self::start(self.is_client);
        self.next_id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(if current > MAX_STREAM_ID - 2 {
                    start
                } else {
                    current + 2
                })
            })
            .unwrap_or(start)
    }

    /// Check an id the peer initiated: non-zero and of the peer's parity.
    pub fn validate_peer_stream_id(&self, stream_id: u32) -> Result<()> {
        if stream_id == 0 || stream_id > MAX_STREAM_ID {
            return Err(RmuxError::InvalidStreamId(stream_id));
        }

        let expected_parity = if self.is_client { 0 } else { 1 };
        if stream_id % 2 != expected_parity {
            return Err(RmuxError::InvalidStreamId(stream_id));
        }

        Ok(())
    }

    /// Check an id this endpoint initiated.
    pub fn validate_own_stream_id(&self, stream_id: u32) -> Result<()> {
        if stream_id == 0 || stream_id > MAX_STREAM_ID {
            return Err(RmuxError::InvalidStreamId(stream_id));
        }

        let expected_parity = if self.is_client { 1 } else { 0 };
        if stream_id % 2 != expected_parity {
            return Err(RmuxError::InvalidStreamId(stream_id));
        }

        Ok(())
    }

    pub fn is_client_initiated(stream_id: u32) -> bool {
        stream_id % 2 == 1
    }

    pub fn is_server_initiated(stream_id: u32) -> bool {
        stream_id != 0 && stream_id % 2 == 0
    }
}
