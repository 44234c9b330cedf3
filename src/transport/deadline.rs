//! Deadline-bounded transfers
//!
//! Every transfer samples a monotonic deadline when it starts and hands the
//! remaining time to the socket before each underlying read or write. A
//! transfer either completes, or fails with a timeout or disconnect while
//! reporting how many bytes made it through.

use super::TimedStream;
use crate::error::{ChainsockError, InternalError, TransferError};
use std::io;
use std::time::{Duration, Instant};
use tracing::trace;

/// Smallest timeout handed to a socket; zero would mean "block forever"
const MIN_SOCKET_TIMEOUT: Duration = Duration::from_millis(1);

/// Age after which a byte-wise reader re-arms the socket timeout
const REARM_AFTER: Duration = Duration::from_millis(10);

/// Absolute point in time after which a blocking operation must fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    expires_at: Option<Instant>,
}

impl Deadline {
    /// Deadline `timeout` from now; a zero timeout never expires
    pub fn after(timeout: Duration) -> Self {
        if timeout.is_zero() {
            return Deadline::never();
        }
        Deadline {
            expires_at: Some(Instant::now() + timeout),
        }
    }

    /// Deadline that never expires
    pub fn never() -> Self {
        Deadline { expires_at: None }
    }

    /// Whether the deadline has passed
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() >= expires_at)
    }

    /// Time left, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|expires_at| expires_at.saturating_duration_since(Instant::now()))
    }

    /// Timeout to apply to the socket for the next syscall
    pub fn socket_timeout(&self) -> Option<Duration> {
        self.remaining()
            .map(|remaining| remaining.max(MIN_SOCKET_TIMEOUT))
    }
}

/// End of the next chunk starting at `done`; a chunk size of 0 means no limit
fn chunk_end(done: usize, len: usize, chunk_size: usize) -> usize {
    if chunk_size == 0 {
        len
    } else {
        len.min(done.saturating_add(chunk_size))
    }
}

/// Arm the socket timeout or fail with the deadline's timeout kind
#[track_caller]
fn arm<S: TimedStream + ?Sized>(
    stream: &mut S,
    deadline: Deadline,
    timeout: InternalError,
    done: usize,
) -> Result<(), TransferError> {
    if deadline.is_expired() {
        return Err(TransferError::new(done, ChainsockError::internal(timeout)));
    }
    stream
        .set_io_timeout(deadline.socket_timeout())
        .map_err(|e| TransferError::new(done, ChainsockError::system(&e)))
}

/// Write all of `buf` before the deadline, in chunks of at most `chunk_size`
pub fn send_all<S: TimedStream + ?Sized>(
    stream: &mut S,
    buf: &[u8],
    chunk_size: usize,
    deadline: Deadline,
) -> Result<usize, TransferError> {
    let mut done = 0;

    while done < buf.len() {
        arm(stream, deadline, InternalError::HitWriteTimeout, done)?;
        let end = chunk_end(done, buf.len(), chunk_size);
        match stream.write(&buf[done..end]) {
            Ok(0) => {
                return Err(TransferError::new(
                    done,
                    ChainsockError::internal(InternalError::RemoteDisconnected),
                ))
            }
            Ok(n) => {
                done += n;
                trace!("Wrote {} bytes ({}/{})", n, done, buf.len());
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(TransferError::new(
                    done,
                    ChainsockError::from_io(&e, InternalError::HitWriteTimeout),
                ))
            }
        }
    }

    // TLS streams may still hold encrypted records
    arm(stream, deadline, InternalError::HitWriteTimeout, done)?;
    stream.flush().map_err(|e| {
        TransferError::new(
            done,
            ChainsockError::from_io(&e, InternalError::HitWriteTimeout),
        )
    })?;

    Ok(done)
}

/// Fill all of `buf` before the deadline, in chunks of at most `chunk_size`
pub fn recv_exact<S: TimedStream + ?Sized>(
    stream: &mut S,
    buf: &mut [u8],
    chunk_size: usize,
    deadline: Deadline,
) -> Result<usize, TransferError> {
    let mut done = 0;
    let len = buf.len();

    while done < len {
        arm(stream, deadline, InternalError::HitReadTimeout, done)?;
        let end = chunk_end(done, len, chunk_size);
        match stream.read(&mut buf[done..end]) {
            Ok(0) => {
                return Err(TransferError::new(
                    done,
                    ChainsockError::internal(InternalError::RemoteDisconnected),
                ))
            }
            Ok(n) => {
                done += n;
                trace!("Read {} bytes ({}/{})", n, done, len);
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(TransferError::new(
                    done,
                    ChainsockError::from_io(&e, InternalError::HitReadTimeout),
                ))
            }
        }
    }

    Ok(done)
}

/// Read whatever is available (at least one byte) before the deadline
pub fn recv_some<S: TimedStream + ?Sized>(
    stream: &mut S,
    buf: &mut [u8],
    deadline: Deadline,
) -> Result<usize, TransferError> {
    if buf.is_empty() {
        return Ok(0);
    }

    loop {
        arm(stream, deadline, InternalError::HitReadTimeout, 0)?;
        match stream.read(buf) {
            Ok(0) => {
                return Err(TransferError::new(
                    0,
                    ChainsockError::internal(InternalError::RemoteDisconnected),
                ))
            }
            Ok(n) => return Ok(n),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(TransferError::new(
                    0,
                    ChainsockError::from_io(&e, InternalError::HitReadTimeout),
                ))
            }
        }
    }
}

/// Read up to and including `delim`, one byte at a time
///
/// Nothing past the delimiter is taken off the stream. The socket timeout
/// is armed once and refreshed only every few milliseconds, so the deadline
/// can be overshot by at most that much. More than `limit` bytes without a
/// delimiter fails with [`InternalError::OutOfBuffer`].
pub fn recv_until<S: TimedStream + ?Sized>(
    stream: &mut S,
    delim: u8,
    limit: usize,
    deadline: Deadline,
) -> Result<Vec<u8>, TransferError> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    let mut armed_at: Option<Instant> = None;

    loop {
        if armed_at.map_or(true, |at| at.elapsed() >= REARM_AFTER) {
            arm(stream, deadline, InternalError::HitReadTimeout, line.len())?;
            armed_at = Some(Instant::now());
        }
        match stream.read(&mut byte) {
            Ok(0) => {
                return Err(TransferError::new(
                    line.len(),
                    ChainsockError::internal(InternalError::RemoteDisconnected),
                ))
            }
            Ok(_) => {
                line.push(byte[0]);
                if byte[0] == delim {
                    trace!("Read {} byte line", line.len());
                    return Ok(line);
                }
                if line.len() > limit {
                    return Err(TransferError::new(
                        line.len(),
                        ChainsockError::internal(InternalError::OutOfBuffer),
                    ));
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(TransferError::new(
                    line.len(),
                    ChainsockError::from_io(&e, InternalError::HitReadTimeout),
                ))
            }
        }
    }
}
