//! Scripted in-memory stream for unit tests

use super::TimedStream;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

/// One scripted outcome of a `read` call
#[derive(Debug, Clone)]
pub(crate) enum ReadStep {
    /// Hand out these bytes (split across calls if the buffer is smaller)
    Data(Vec<u8>),
    /// Fail as if the socket timeout elapsed
    Timeout,
    /// Fail with `Interrupted`
    Interrupted,
}

/// A stream replaying scripted reads and recording writes
///
/// Once the script is exhausted reads return EOF.
#[derive(Debug, Default)]
pub(crate) struct ScriptedStream {
    reads: VecDeque<ReadStep>,
    write_limit: Option<usize>,
    pub written: Vec<u8>,
    pub write_calls: Vec<usize>,
    pub read_calls: Vec<usize>,
    pub timeouts: Vec<Option<Duration>>,
}

impl ScriptedStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_read(mut self, step: ReadStep) -> Self {
        self.reads.push_back(step);
        self
    }

    /// Queue raw bytes as a single read
    pub fn with_data(self, data: &[u8]) -> Self {
        self.with_read(ReadStep::Data(data.to_vec()))
    }

    /// Accept at most `limit` bytes in total, then time out
    pub fn with_write_limit(mut self, limit: usize) -> Self {
        self.write_limit = Some(limit);
        self
    }

    /// Bytes still queued for reading
    pub fn unread(&self) -> usize {
        self.reads
            .iter()
            .map(|step| match step {
                ReadStep::Data(data) => data.len(),
                _ => 0,
            })
            .sum()
    }
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reads.pop_front() {
            None => Ok(0),
            Some(ReadStep::Timeout) => Err(io::Error::new(io::ErrorKind::WouldBlock, "timeout")),
            Some(ReadStep::Interrupted) => {
                Err(io::Error::new(io::ErrorKind::Interrupted, "interrupted"))
            }
            Some(ReadStep::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.reads.push_front(ReadStep::Data(data.split_off(n)));
                }
                self.read_calls.push(n);
                Ok(n)
            }
        }
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let allowed = match self.write_limit {
            Some(limit) => limit.saturating_sub(self.written.len()).min(buf.len()),
            None => buf.len(),
        };
        if allowed == 0 {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "timeout"));
        }
        self.written.extend_from_slice(&buf[..allowed]);
        self.write_calls.push(allowed);
        Ok(allowed)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl TimedStream for ScriptedStream {
    fn set_io_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.timeouts.push(timeout);
        Ok(())
    }
}
