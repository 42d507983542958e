use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{Result, SyncError};

/// Per-session event sink handed to whatever front end hosts the server.
pub trait Logger: Send + Sync {
    fn connected(&self, _peer: SocketAddr) {}
    fn command(&self, _peer: SocketAddr, _line: &str) {}
    fn file_done(&self, _peer: SocketAddr, _path: &str, _bytes: u64) {}
    fn completed(&self, _peer: SocketAddr, _what: &str, _files: u64, _bytes: u64) {}
    fn error(&self, _peer: SocketAddr, _context: &str, _msg: &str) {}
    fn disconnected(&self, _peer: SocketAddr) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

/// Forwards events to `tracing` under the `foldsync::session` target
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn connected(&self, peer: SocketAddr) {
        info!(target: "foldsync::session", %peer, "connected");
    }
    fn command(&self, peer: SocketAddr, line: &str) {
        info!(target: "foldsync::session", %peer, line, "command");
    }
    fn file_done(&self, peer: SocketAddr, path: &str, bytes: u64) {
        info!(target: "foldsync::session", %peer, path, bytes, "file");
    }
    fn completed(&self, peer: SocketAddr, what: &str, files: u64, bytes: u64) {
        info!(target: "foldsync::session", %peer, what, files, bytes, "completed");
    }
    fn error(&self, peer: SocketAddr, context: &str, msg: &str) {
        warn!(target: "foldsync::session", %peer, context, msg, "error");
    }
    fn disconnected(&self, peer: SocketAddr) {
        info!(target: "foldsync::session", %peer, "disconnected");
    }
}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| SyncError::io(path, e))?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
    }
}

impl Logger for TextLogger {
    fn connected(&self, peer: SocketAddr) {
        self.line(&format!("CONNECT peer={peer}"));
    }
    fn command(&self, peer: SocketAddr, line: &str) {
        self.line(&format!("COMMAND peer={peer} line={line}"));
    }
    fn file_done(&self, peer: SocketAddr, path: &str, bytes: u64) {
        self.line(&format!("FILE peer={peer} path={path} bytes={bytes}"));
    }
    fn completed(&self, peer: SocketAddr, what: &str, files: u64, bytes: u64) {
        self.line(&format!(
            "DONE peer={peer} op={what} files={files} bytes={bytes}"
        ));
    }
    fn error(&self, peer: SocketAddr, context: &str, msg: &str) {
        self.line(&format!("ERROR peer={peer} ctx={context} msg={msg}"));
    }
    fn disconnected(&self, peer: SocketAddr) {
        self.line(&format!("CLOSE peer={peer}"));
    }
}

/// Fans each event out to several sinks
pub struct Tee(pub Vec<Box<dyn Logger>>);

impl Logger for Tee {
    fn connected(&self, peer: SocketAddr) {
        self.0.iter().for_each(|l| l.connected(peer));
    }
    fn command(&self, peer: SocketAddr, line: &str) {
        self.0.iter().for_each(|l| l.command(peer, line));
    }
    fn file_done(&self, peer: SocketAddr, path: &str, bytes: u64) {
        self.0.iter().for_each(|l| l.file_done(peer, path, bytes));
    }
    fn completed(&self, peer: SocketAddr, what: &str, files: u64, bytes: u64) {
        self.0.iter().for_each(|l| l.completed(peer, what, files, bytes));
    }
    fn error(&self, peer: SocketAddr, context: &str, msg: &str) {
        self.0.iter().for_each(|l| l.error(peer, context, msg));
    }
    fn disconnected(&self, peer: SocketAddr) {
        self.0.iter().for_each(|l| l.disconnected(peer));
    }
}
