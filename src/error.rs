//! Error types for the foldsync engine.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::protocol_core::Reply;

/// Convenience alias used throughout the library
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Top-level engine error
#[derive(Debug, Error)]
pub enum SyncError {
    /// Peer sent something that does not parse
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Server answered a command with a negative or unexpected reply
    #[error("server rejected {command:?}: {reply}")]
    Rejected {
        /// Command line that was sent
        command: String,
        /// Reply received for it
        reply: Reply,
    },

    /// A single file's header/payload/ack cycle failed
    #[error("transfer of {path:?} failed: {reason}")]
    Transfer {
        /// Relative path of the file being transferred
        path: String,
        /// What went wrong
        reason: TransferFailure,
    },

    /// The connection itself is unusable
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Server could not start
    #[error("startup failed: {context}: {source}")]
    Startup {
        /// What was being attempted
        context: String,
        /// Underlying cause
        source: io::Error,
    },

    /// Local filesystem failure outside of a file payload
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying cause
        source: io::Error,
    },
}

/// Malformed input on the control channel
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Verb not part of the grammar
    #[error("unrecognized command: {0:?}")]
    UnknownCommand(String),

    /// Known verb sent without its argument
    #[error("{0} requires a folder name")]
    MissingArgument(&'static str),

    /// Argument is not a valid slot name
    #[error("invalid folder name: {0:?}")]
    InvalidFolderName(String),

    /// Reply line without a three-digit code
    #[error("malformed reply: {0:?}")]
    MalformedReply(String),

    /// Line where a `FILE:` header or `END_FOLDER` was expected
    #[error("expected file header, got {0:?}")]
    UnexpectedLine(String),

    /// Declared payload length is not a decimal integer
    #[error("invalid file size line: {0:?}")]
    InvalidSize(String),

    /// `FOLDER_INFO:` line that does not split into its three fields
    #[error("malformed listing entry: {0:?}")]
    MalformedListing(String),

    /// Relative path that would leave the transfer root
    #[error("unsafe relative path: {0:?}")]
    UnsafePath(String),

    /// Control line exceeded the length limit
    #[error("control line longer than {0} bytes")]
    LineTooLong(usize),

    /// Control line is not UTF-8
    #[error("control line is not valid UTF-8")]
    InvalidUtf8,
}

/// Reason a single file transfer was aborted
#[derive(Debug, Error)]
pub enum TransferFailure {
    /// Peer closed before the declared byte count arrived
    #[error("connection lost after {received} of {expected} bytes")]
    ConnectionLost {
        /// Bytes read before the close
        received: u64,
        /// Bytes declared in the header
        expected: u64,
    },

    /// Peer stopped sending or reading
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// Peer closed instead of acknowledging
    #[error("no acknowledgment received")]
    MissingAck,

    /// Peer answered something other than the ack token
    #[error("unexpected acknowledgment {0:?}")]
    BadAck(String),

    /// Source file changed length while being sent
    #[error("source changed size: announced {expected} bytes, read {actual}")]
    SourceChanged {
        /// Length announced in the header
        expected: u64,
        /// Length actually read
        actual: u64,
    },

    /// Local read or write failed
    #[error("{0}")]
    Io(#[source] io::Error),
}

/// Connection-level failure
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// TCP connect failed
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        /// host:port
        addr: String,
        /// Underlying cause
        source: io::Error,
    },

    /// TCP connect did not complete in time
    #[error("connecting to {addr} timed out after {timeout:?}")]
    ConnectTimeout {
        /// host:port
        addr: String,
        /// Limit that elapsed
        timeout: Duration,
    },

    /// No data arrived within the read timeout
    #[error("read timed out after {0:?}")]
    ReadTimeout(Duration),

    /// Write did not complete within the write timeout
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// Peer closed the connection
    #[error("connection closed by peer")]
    Closed,

    /// Socket error (reset, broken pipe, ...)
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn transfer(path: &str, reason: TransferFailure) -> Self {
        SyncError::Transfer {
            path: path.to_string(),
            reason,
        }
    }

    /// Whether the control channel is still in a known state after this error.
    ///
    /// Protocol and rejection errors leave the stream on a line boundary, so
    /// the next command can be issued. Everything else closes the session.
    pub fn keeps_session(&self) -> bool {
        matches!(self, SyncError::Protocol(_) | SyncError::Rejected { .. })
    }

    /// Peer went away or stalled, whether between commands or mid-payload.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            SyncError::Connection(
                ConnectionError::Closed
                | ConnectionError::ReadTimeout(_)
                | ConnectionError::WriteTimeout(_),
            ) => true,
            SyncError::Connection(ConnectionError::Io(e)) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            SyncError::Transfer { reason, .. } => matches!(
                reason,
                TransferFailure::ConnectionLost { .. }
                    | TransferFailure::TimedOut(_)
                    | TransferFailure::MissingAck
            ),
            _ => false,
        }
    }

    /// Re-frame a channel failure as a failure of the file being moved.
    pub(crate) fn during_transfer_of(self, path: &str) -> Self {
        match self {
            SyncError::Connection(ConnectionError::ReadTimeout(d))
            | SyncError::Connection(ConnectionError::WriteTimeout(d)) => {
                SyncError::transfer(path, TransferFailure::TimedOut(d))
            }
            SyncError::Connection(ConnectionError::Io(e)) => {
                SyncError::transfer(path, TransferFailure::Io(e))
            }
            other => other,
        }
    }
}
