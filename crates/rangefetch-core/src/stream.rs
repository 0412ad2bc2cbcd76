//! Reassembly stream: bounded, ordered byte hand-off from a Fetch Task to the
//! consumer of the synthesized response body.
//!
//! The producer side ([`ChunkSink`]) pushes whole chunks onto a bounded
//! channel; pushing onto a full channel blocks, which is what couples sub-fetch
//! producers to the consumer's read rate. `None` on the channel is the
//! end-of-stream sentinel. The consumer side ([`ReassemblyStream`]) implements
//! [`std::io::Read`].

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;

use bytes::{Buf, Bytes};

/// Default number of chunks that may wait on the hand-off channel.
pub const DEFAULT_STREAM_CAPACITY: usize = 5;

#[derive(Debug, Default)]
struct StreamShared {
    /// Consumer closed the stream; writes become no-ops.
    closed: AtomicBool,
    /// Sentinel already pushed by the producer.
    finished: AtomicBool,
}

/// Creates a connected producer/consumer pair with room for `capacity` pending chunks.
pub fn channel(capacity: usize) -> (ChunkSink, ReassemblyStream) {
    let (tx, rx) = sync_channel(capacity.max(1));
    let shared = Arc::new(StreamShared::default());
    (
        ChunkSink {
            tx,
            shared: Arc::clone(&shared),
        },
        ReassemblyStream {
            rx: Some(rx),
            buf: Bytes::new(),
            eof: false,
            shared,
        },
    )
}

/// Producer handle. Cloneable; dropping the last clone ends the stream.
#[derive(Clone)]
pub struct ChunkSink {
    tx: SyncSender<Option<Bytes>>,
    shared: Arc<StreamShared>,
}

impl ChunkSink {
    /// Pushes one chunk, blocking while the channel is full.
    ///
    /// Returns the number of bytes accepted: the chunk length, or 0 if the
    /// consumer has gone away.
    pub fn write(&self, chunk: Bytes) -> usize {
        if chunk.is_empty() || self.is_closed() {
            return 0;
        }
        let n = chunk.len();
        match self.tx.send(Some(chunk)) {
            Ok(()) => n,
            Err(_) => {
                self.shared.closed.store(true, Ordering::Release);
                0
            }
        }
    }

    /// Pushes the end-of-stream sentinel. Only the first call has any effect.
    pub fn finish(&self) {
        if self.shared.finished.swap(true, Ordering::AcqRel) || self.is_closed() {
            return;
        }
        let _ = self.tx.send(None);
    }

    /// True once the consumer closed its side.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

/// Consumer side: the body handed to the original caller.
pub struct ReassemblyStream {
    rx: Option<Receiver<Option<Bytes>>>,
    buf: Bytes,
    eof: bool,
    shared: Arc<StreamShared>,
}

impl ReassemblyStream {
    /// Installs bytes to be read before anything on the channel.
    ///
    /// Used for the probe payload, which is delivered without going through
    /// the hand-off channel.
    pub(crate) fn prime(&mut self, first: Bytes) {
        debug_assert!(self.buf.is_empty());
        self.buf = first;
    }

    /// Closes the consumer side. Idempotent.
    ///
    /// Drops the receiver, so a producer blocked on a full channel wakes up
    /// with a dead destination and any later write is a no-op.
    pub fn close(&mut self) {
        self.eof = true;
        self.buf = Bytes::new();
        self.shared.closed.store(true, Ordering::Release);
        self.rx = None;
    }

    fn fill(&mut self) -> bool {
        while self.buf.is_empty() && !self.eof {
            let next = match self.rx.as_ref() {
                Some(rx) => rx.recv().ok().flatten(),
                None => None,
            };
            match next {
                Some(chunk) => self.buf = chunk,
                None => self.eof = true,
            }
        }
        !self.buf.is_empty()
    }
}

impl Read for ReassemblyStream {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() || !self.fill() {
            return Ok(0);
        }
        let n = self.buf.len().min(out.len());
        out[..n].copy_from_slice(&self.buf[..n]);
        self.buf.advance(n);
        Ok(n)
    }
}

impl Drop for ReassemblyStream {
    fn drop(&mut self) {
        self.close();
    }
}
