//! Stream message sources.
//!
//! The pipeline only needs "give me the next chunk of bytes"; the concrete
//! transport is behind [`MessageSource`]. The TCP implementation reads
//! with a short timeout so the receiver loop can observe the running flag
//! between reads.

use bytes::Bytes;
use std::io::Read;
use std::net::TcpStream;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },
    #[error("stream read failed: {0}")]
    Read(#[from] std::io::Error),
}

/// One message in, zero-copy out. `Ok(None)` means the peer closed the
/// stream, which is a normal termination.
pub trait MessageSource: Send {
    fn read_next_message(&mut self) -> Result<Option<Bytes>>;
}

const READ_TIMEOUT: Duration = Duration::from_millis(250);
const READ_BUF_SIZE: usize = 64 * 1024;

/// TCP byte-stream source. Chunk boundaries are arbitrary; the demuxer's
/// length prefixes delimit the actual units.
pub struct TcpSource {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl TcpSource {
    pub fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).map_err(|source| Error::Connect {
            addr: addr.to_string(),
            source,
        })?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        tracing::info!(addr, "connected to video stream");
        Ok(Self {
            stream,
            buf: vec![0u8; READ_BUF_SIZE],
        })
    }
}

impl MessageSource for TcpSource {
    fn read_next_message(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.stream.read(&mut self.buf) {
                Ok(0) => return Ok(None),
                Ok(n) => return Ok(Some(Bytes::copy_from_slice(&self.buf[..n]))),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    // Timeout: yield an empty chunk so the caller can check
                    // its running flag.
                    return Ok(Some(Bytes::new()));
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// In-memory source for tests and offline replay: yields the provided
/// chunks, then reports a closed stream.
pub struct ReplaySource {
    chunks: std::collections::VecDeque<Bytes>,
}

impl ReplaySource {
    pub fn new<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        Self {
            chunks: chunks.into_iter().map(Bytes::from).collect(),
        }
    }
}

impl MessageSource for ReplaySource {
    fn read_next_message(&mut self) -> Result<Option<Bytes>> {
        Ok(self.chunks.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_source_drains_then_closes() {
        let mut src = ReplaySource::new(vec![vec![1, 2], vec![3]]);
        assert_eq!(src.read_next_message().unwrap().unwrap().as_ref(), &[1, 2]);
        assert_eq!(src.read_next_message().unwrap().unwrap().as_ref(), &[3]);
        assert!(src.read_next_message().unwrap().is_none());
    }
}
