//! Chunked bulk transfer with percentage progress.
//!
//! File bodies travel raw on the connection right after the OK frame that
//! announced their length; nothing here touches the frame codec.

use crate::error::TransferError;
use crate::protocol::CHUNK_SIZE;
use std::io::{ErrorKind, Read, Write};

/// Per-call transfer bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferContext {
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub chunk_size: usize,
}

impl TransferContext {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            transferred_bytes: 0,
            chunk_size: CHUNK_SIZE,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.total_bytes - self.transferred_bytes
    }

    pub fn next_chunk_len(&self) -> usize {
        self.remaining().min(self.chunk_size as u64) as usize
    }

    pub fn is_complete(&self) -> bool {
        self.transferred_bytes >= self.total_bytes
    }

    /// floor(transferred * 100 / total); an empty transfer is 100% done.
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }
        let pct = (self.transferred_bytes as u128 * 100) / self.total_bytes as u128;
        pct.min(100) as u8
    }

    fn advance(&mut self, n: usize) {
        self.transferred_bytes += n as u64;
    }
}

// Read until `buf` is full or the source reports EOF. Returns bytes read.
fn fill_from<R: Read>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Stream exactly `total` bytes from `source` onto `conn` in CHUNK_SIZE pieces.
///
/// Any write failure aborts immediately. A source that runs dry before
/// `total` is an error too: the peer was promised `total` bytes.
pub fn send_bytes<W, R, P>(
    conn: &mut W,
    source: &mut R,
    total: u64,
    mut on_progress: P,
) -> Result<TransferContext, TransferError>
where
    W: Write,
    R: Read,
    P: FnMut(u8),
{
    let mut ctx = TransferContext::new(total);
    let mut buf = vec![0u8; ctx.chunk_size];
    while !ctx.is_complete() {
        let want = ctx.next_chunk_len();
        let got = fill_from(source, &mut buf[..want]).map_err(|source| TransferError::Source {
            transferred: ctx.transferred_bytes,
            source,
        })?;
        if got < want {
            return Err(TransferError::SourceExhausted {
                transferred: ctx.transferred_bytes,
                total,
            });
        }
        conn.write_all(&buf[..got])
            .map_err(|source| TransferError::Connection {
                transferred: ctx.transferred_bytes,
                source,
            })?;
        ctx.advance(got);
        on_progress(ctx.percent());
    }
    conn.flush().map_err(|source| TransferError::Connection {
        transferred: ctx.transferred_bytes,
        source,
    })?;
    if total == 0 {
        on_progress(100);
    }
    Ok(ctx)
}

/// Receive exactly `total` bytes from `conn` into `sink`.
///
/// A zero-byte read before `total` means the peer dropped. Bytes already
/// written to `sink` are left there; the caller decides what to do with them.
pub fn receive_bytes<R, W, P>(
    conn: &mut R,
    sink: &mut W,
    total: u64,
    mut on_progress: P,
) -> Result<TransferContext, TransferError>
where
    R: Read,
    W: Write,
    P: FnMut(u8),
{
    let mut ctx = TransferContext::new(total);
    let mut buf = vec![0u8; ctx.chunk_size];
    while !ctx.is_complete() {
        let want = ctx.next_chunk_len();
        let n = match conn.read(&mut buf[..want]) {
            Ok(0) => {
                return Err(TransferError::Interrupted {
                    transferred: ctx.transferred_bytes,
                    total,
                })
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(TransferError::Connection {
                    transferred: ctx.transferred_bytes,
                    source,
                })
            }
        };
        // Count the bytes as received even if the sink rejects them, so the
        // caller knows how much is still pending on the wire.
        ctx.advance(n);
        sink.write_all(&buf[..n]).map_err(|source| TransferError::Sink {
            transferred: ctx.transferred_bytes,
            source,
        })?;
        on_progress(ctx.percent());
    }
    sink.flush().map_err(|source| TransferError::Sink {
        transferred: ctx.transferred_bytes,
        source,
    })?;
    if total == 0 {
        on_progress(100);
    }
    Ok(ctx)
}

/// Read and drop `remaining` bytes so the connection is back on a frame boundary.
pub fn discard_bytes<R: Read>(conn: &mut R, remaining: u64) -> Result<TransferContext, TransferError> {
    receive_bytes(conn, &mut std::io::sink(), remaining, |_| {})
}
