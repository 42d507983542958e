//! Server side of one connection: greeting, then one command at a time
//!
//! ```text
//! AwaitCommand ──LIST──────────► Listing ───┐
//!              ──UPLOAD_FOLDER─► Receiving ─┤
//!              ──DOWNLOAD_FOLDER► Sending ──┼──► AwaitCommand
//!              ──CHECK_FOLDER──► Checking ──┘
//!              ──QUIT / EOF / fatal error──► Closed
//! ```
//!
//! Malformed commands get a 5xx and the loop carries on. Once a transfer has
//! started streaming, any failure leaves the stream at an unknown offset, so
//! the session answers 550 if it still can and closes.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::error::{ProtocolError, Result, SyncError};
use crate::logger::Logger;
use crate::protocol::code;
use crate::protocol_core::{Command, Reply};
use crate::store::FolderStore;
use crate::transfer::{plan_folder, receive_folder, send_planned};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitCommand,
    Listing,
    Receiving,
    Sending,
    Checking,
    Closed,
}

impl SessionState {
    /// Payload bytes may be in flight; the stream is not on a line boundary.
    fn is_streaming(self) -> bool {
        matches!(self, SessionState::Receiving | SessionState::Sending)
    }
}

pub struct Session<R, W> {
    channel: Channel<R, W>,
    store: Arc<FolderStore>,
    logger: Arc<dyn Logger>,
    peer: SocketAddr,
    state: SessionState,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        channel: Channel<R, W>,
        store: Arc<FolderStore>,
        logger: Arc<dyn Logger>,
        peer: SocketAddr,
    ) -> Self {
        Self {
            channel,
            store,
            logger,
            peer,
            state: SessionState::AwaitCommand,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Serve until QUIT, end of stream or a fatal error. Never returns an
    /// error: everything is reported to the logger and the connection closed.
    pub async fn run(&mut self) {
        self.logger.connected(self.peer);
        if let Err(e) = self.channel.send_reply(&Reply::greeting()).await {
            self.fail("greeting", &e);
        } else {
            self.serve().await;
        }
        self.state = SessionState::Closed;
        self.channel.shutdown().await;
        self.logger.disconnected(self.peer);
    }

    async fn serve(&mut self) {
        while self.state != SessionState::Closed {
            self.state = SessionState::AwaitCommand;
            let line = match self.channel.read_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!(peer = %self.peer, "peer closed the connection");
                    return;
                }
                Err(e) => {
                    // An unreadable line may be only partly consumed, so the
                    // next read would start mid-line.
                    if let SyncError::Protocol(p) = &e {
                        self.reply_best_effort(code::UNKNOWN_COMMAND, &p.to_string())
                            .await;
                    }
                    self.fail("read command", &e);
                    return;
                }
            };
            self.logger.command(self.peer, &line);

            let command = match Command::parse(&line) {
                Ok(command) => command,
                Err(e) => {
                    self.logger.error(self.peer, "parse", &e.to_string());
                    let reply_code = match e {
                        ProtocolError::UnknownCommand(_) => code::UNKNOWN_COMMAND,
                        _ => code::BAD_ARGUMENT,
                    };
                    if let Err(e) = self.reply(reply_code, &e.to_string()).await {
                        self.fail("reply", &e);
                        return;
                    }
                    continue;
                }
            };

            if let Err(e) = self.dispatch(command).await {
                let context = format!("{:?}", self.state).to_ascii_lowercase();
                if e.keeps_session() && !self.state.is_streaming() {
                    self.logger.error(self.peer, &context, &e.to_string());
                    if let Err(e) = self.reply(code::BAD_ARGUMENT, &e.to_string()).await {
                        self.fail("reply", &e);
                        return;
                    }
                    continue;
                }
                self.reply_best_effort(code::ACTION_FAILED, &e.to_string())
                    .await;
                self.fail(&context, &e);
                return;
            }
        }
    }

    async fn dispatch(&mut self, command: Command) -> Result<()> {
        match command {
            Command::List => self.list().await,
            Command::UploadFolder(name) => self.upload(&name).await,
            Command::DownloadFolder(name) => self.download(&name).await,
            Command::CheckFolder(name) => self.check(&name).await,
            Command::Quit => {
                self.reply(code::CLOSING, "Goodbye").await?;
                self.state = SessionState::Closed;
                Ok(())
            }
        }
    }

    async fn list(&mut self) -> Result<()> {
        self.state = SessionState::Listing;
        let folders = match self.store.list().await {
            Ok(folders) => folders,
            Err(e) => {
                self.logger.error(self.peer, "listing", &e.to_string());
                return self
                    .reply(code::ACTION_FAILED, &format!("Cannot list folders: {e}"))
                    .await;
            }
        };
        info!(peer = %self.peer, count = folders.len(), "listing folders");

        let opening = Reply::new(code::OPENING, "Listing folders").to_string();
        let lines: Vec<String> = folders.iter().map(|f| f.to_listing_line()).collect();
        let done = Reply::new(code::TRANSFER_COMPLETE, "List complete").to_string();
        let mut all: Vec<&str> = Vec::with_capacity(lines.len() + 2);
        all.push(&opening);
        all.extend(lines.iter().map(String::as_str));
        all.push(&done);
        self.channel.write_lines(&all).await?;
        self.logger
            .completed(self.peer, "list", folders.len() as u64, 0);
        Ok(())
    }

    async fn upload(&mut self, name: &str) -> Result<()> {
        let slot = match self.store.replace_slot(name).await {
            Ok(slot) => slot,
            Err(e) => {
                self.logger.error(self.peer, "upload", &e.to_string());
                return self
                    .reply(code::ACTION_FAILED, &format!("Cannot prepare {name}: {e}"))
                    .await;
            }
        };
        info!(peer = %self.peer, slot = name, "receiving folder");
        self.reply(code::OPENING, "Ready to receive").await?;
        self.state = SessionState::Receiving;

        let logger = self.logger.clone();
        let peer = self.peer;
        let result = receive_folder(&mut self.channel, &slot, |rel, bytes| {
            logger.file_done(peer, rel, bytes)
        })
        .await;

        let summary = match result {
            Ok(summary) => summary,
            Err(e) => {
                // Never leave a half-written folder listed as complete
                if let Err(rm) = tokio::fs::remove_dir_all(&slot).await {
                    warn!(slot = name, error = %rm, "cannot remove partial upload");
                }
                return Err(e);
            }
        };
        self.reply(code::TRANSFER_COMPLETE, "Upload complete").await?;
        self.logger
            .completed(self.peer, "upload", summary.files, summary.bytes);
        Ok(())
    }

    async fn download(&mut self, name: &str) -> Result<()> {
        if !self.store.exists(name).await? {
            self.logger
                .error(self.peer, "download", &format!("no such folder {name}"));
            return self.reply(code::ACTION_FAILED, "Folder not found").await;
        }
        let slot = self.store.slot_path(name)?;
        let files = match plan_folder(&slot).await {
            Ok(files) => files,
            Err(e) => {
                let reason = one_line(&e.to_string());
                self.logger.error(self.peer, "download", &reason);
                return self
                    .reply(code::ACTION_FAILED, &format!("Cannot read folder: {reason}"))
                    .await;
            }
        };
        info!(peer = %self.peer, slot = name, files = files.len(), "sending folder");
        self.reply(code::OPENING, "Sending folder").await?;
        self.state = SessionState::Sending;

        let summary = send_planned(&mut self.channel, &files, |_, _, _| {}).await?;
        self.reply(code::TRANSFER_COMPLETE, "Download complete")
            .await?;
        self.logger
            .completed(self.peer, "download", summary.files, summary.bytes);
        Ok(())
    }

    async fn check(&mut self, name: &str) -> Result<()> {
        self.state = SessionState::Checking;
        if self.store.exists(name).await? {
            self.reply(code::FOLDER_EXISTS, &format!("Folder exists: {name}"))
                .await
        } else {
            self.reply(code::FOLDER_MISSING, "Folder not found").await
        }
    }

    async fn reply(&mut self, code: u16, text: &str) -> Result<()> {
        self.channel.send_reply(&Reply::new(code, one_line(text))).await
    }

    async fn reply_best_effort(&mut self, code: u16, text: &str) {
        if let Err(e) = self.reply(code, text).await {
            debug!(peer = %self.peer, error = %e, "could not deliver error reply");
        }
    }

    fn fail(&self, context: &str, e: &SyncError) {
        warn!(peer = %self.peer, context, error = %e, "session failed");
        self.logger.error(self.peer, context, &e.to_string());
    }
}

/// Reply text must not break the line framing.
fn one_line(text: &str) -> String {
    text.replace(&['\r', '\n'][..], " ")
}
