//! Timed control-line and raw-payload I/O over a single byte stream
//!
//! Control lines and file payloads share one stream, so every method here
//! leaves the stream on a known boundary: a line is read up to its `\n`, a
//! payload is read for exactly its declared length, and anything written is
//! flushed before the method returns.

use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{ConnectionError, ProtocolError, Result, SyncError, TransferFailure};
use crate::protocol::{timeouts, CHUNK_SIZE, MAX_LINE_LEN};
use crate::protocol_core::Reply;

/// Read/write deadlines applied to every individual operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub read: Duration,
    pub write: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_millis(timeouts::READ_MS),
            write: Duration::from_millis(timeouts::WRITE_MS),
        }
    }
}

pub struct Channel<R, W> {
    reader: BufReader<R>,
    writer: BufWriter<W>,
    timeouts: Timeouts,
}

pub type TcpChannel = Channel<OwnedReadHalf, OwnedWriteHalf>;

impl TcpChannel {
    pub fn from_tcp(stream: TcpStream, timeouts: Timeouts) -> Self {
        let _ = stream.set_nodelay(true);
        let (r, w) = stream.into_split();
        Channel::new(r, w, timeouts)
    }
}

impl<R, W> Channel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, timeouts: Timeouts) -> Self {
        Self {
            reader: BufReader::with_capacity(CHUNK_SIZE, reader),
            writer: BufWriter::with_capacity(CHUNK_SIZE, writer),
            timeouts,
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Next control line without its terminator, `None` on clean end of stream.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let limit = MAX_LINE_LEN as u64 + 1;
        let mut bounded = (&mut self.reader).take(limit);
        let n = match timeout(self.timeouts.read, bounded.read_until(b'\n', &mut buf)).await {
            Ok(res) => res.map_err(ConnectionError::from)?,
            Err(_) => return Err(ConnectionError::ReadTimeout(self.timeouts.read).into()),
        };
        if n == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        } else if buf.len() > MAX_LINE_LEN {
            return Err(ProtocolError::LineTooLong(MAX_LINE_LEN).into());
        }
        String::from_utf8(buf)
            .map(Some)
            .map_err(|_| ProtocolError::InvalidUtf8.into())
    }

    /// Next control line; end of stream is an error here.
    pub async fn expect_line(&mut self) -> Result<String> {
        self.read_line()
            .await?
            .ok_or_else(|| ConnectionError::Closed.into())
    }

    pub async fn read_reply(&mut self) -> Result<Reply> {
        let line = self.expect_line().await?;
        Ok(Reply::parse(&line)?)
    }

    /// Write one or more control lines and flush them.
    pub async fn write_lines(&mut self, lines: &[&str]) -> Result<()> {
        let writer = &mut self.writer;
        let fut = async {
            for line in lines {
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
            }
            writer.flush().await
        };
        match timeout(self.timeouts.write, fut).await {
            Ok(res) => res.map_err(|e| ConnectionError::from(e).into()),
            Err(_) => Err(ConnectionError::WriteTimeout(self.timeouts.write).into()),
        }
    }

    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.write_lines(&[line]).await
    }

    pub async fn send_reply(&mut self, reply: &Reply) -> Result<()> {
        self.write_line(&reply.to_string()).await
    }

    /// Copy exactly `len` bytes of the payload for `path` into `sink`.
    ///
    /// Each chunk read is individually timed. End of stream before `len`
    /// bytes is a lost connection, never a silent truncation.
    pub async fn read_payload_into<S>(&mut self, sink: &mut S, len: u64, path: &str) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; CHUNK_SIZE.min(len.max(1) as usize)];
        let mut received = 0u64;
        while received < len {
            let want = (len - received).min(buf.len() as u64) as usize;
            let n = match timeout(self.timeouts.read, self.reader.read(&mut buf[..want])).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(SyncError::transfer(path, TransferFailure::Io(e))),
                Err(_) => {
                    return Err(SyncError::transfer(
                        path,
                        TransferFailure::TimedOut(self.timeouts.read),
                    ))
                }
            };
            if n == 0 {
                return Err(SyncError::transfer(
                    path,
                    TransferFailure::ConnectionLost {
                        received,
                        expected: len,
                    },
                ));
            }
            sink.write_all(&buf[..n])
                .await
                .map_err(|e| SyncError::transfer(path, TransferFailure::Io(e)))?;
            received += n as u64;
        }
        sink.flush()
            .await
            .map_err(|e| SyncError::transfer(path, TransferFailure::Io(e)))
    }

    /// Stream exactly `len` bytes of `path` from `source` onto the wire and
    /// flush. A source that ends early or still has bytes left has changed
    /// since its size was announced.
    pub async fn write_payload_from<S>(&mut self, source: &mut S, len: u64, path: &str) -> Result<()>
    where
        S: AsyncRead + Unpin,
    {
        let write_timeout = self.timeouts.write;
        let failed = |e: std::io::Error| SyncError::transfer(path, TransferFailure::Io(e));
        let timed_out = || SyncError::transfer(path, TransferFailure::TimedOut(write_timeout));

        let mut buf = vec![0u8; CHUNK_SIZE.min(len.max(1) as usize)];
        let mut sent = 0u64;
        while sent < len {
            let want = (len - sent).min(buf.len() as u64) as usize;
            let n = source.read(&mut buf[..want]).await.map_err(failed)?;
            if n == 0 {
                return Err(SyncError::transfer(
                    path,
                    TransferFailure::SourceChanged {
                        expected: len,
                        actual: sent,
                    },
                ));
            }
            timeout(write_timeout, self.writer.write_all(&buf[..n]))
                .await
                .map_err(|_| timed_out())?
                .map_err(failed)?;
            sent += n as u64;
        }
        timeout(write_timeout, self.writer.flush())
            .await
            .map_err(|_| timed_out())?
            .map_err(failed)?;

        let mut probe = [0u8; 1];
        if source.read(&mut probe).await.map_err(failed)? != 0 {
            return Err(SyncError::transfer(
                path,
                TransferFailure::SourceChanged {
                    expected: len,
                    actual: len + 1,
                },
            ));
        }
        Ok(())
    }

    /// Best-effort half close of the write side
    pub async fn shutdown(&mut self) {
        let _ = timeout(self.timeouts.write, self.writer.shutdown()).await;
    }
}
