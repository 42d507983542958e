//! Client side of the protocol
//!
//! Each operation opens its own connection, checks the greeting, runs one
//! command and says `QUIT`. Nothing is retried.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::channel::TcpChannel;
use crate::config::ClientConfig;
use crate::error::{ConnectionError, Result, SyncError};
use crate::identity::{extract_original_name, FolderHandle, FolderIdentityResolver};
use crate::protocol::{code, token, DEFAULT_PORT};
use crate::protocol_core::{validate_folder_name, Command, RemoteFolder, Reply};
use crate::transfer::{plan_folder, receive_folder, send_planned, TransferSummary};

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Slot name the folder was stored under (`<name>_<identity>`)
    pub remote_name: String,
    pub summary: TransferSummary,
}

#[derive(Debug, Clone)]
pub struct Client {
    host: String,
    port: u16,
    config: ClientConfig,
    resolver: Arc<FolderIdentityResolver>,
}

impl Client {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_config(host, port, ClientConfig::default())
    }

    pub fn with_config(host: impl Into<String>, port: u16, config: ClientConfig) -> Self {
        Self {
            host: host.into(),
            port,
            config,
            resolver: Arc::new(FolderIdentityResolver::new()),
        }
    }

    /// Share an identity cache between clients.
    pub fn with_resolver(mut self, resolver: Arc<FolderIdentityResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn localhost() -> Self {
        Self::new("127.0.0.1", DEFAULT_PORT)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn resolver(&self) -> &Arc<FolderIdentityResolver> {
        &self.resolver
    }

    async fn connect(&self) -> Result<(TcpChannel, Reply)> {
        let addr = self.addr();
        let limit = self.config.connect_timeout();
        let stream = match timeout(limit, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(ConnectionError::Connect { addr, source }.into()),
            Err(_) => {
                return Err(ConnectionError::ConnectTimeout {
                    addr,
                    timeout: limit,
                }
                .into())
            }
        };
        let mut channel = TcpChannel::from_tcp(stream, self.config.timeouts());
        let greeting = channel.read_reply().await?;
        if greeting.code != code::GREETING {
            return Err(SyncError::Rejected {
                command: "connect".into(),
                reply: greeting,
            });
        }
        debug!(%addr, greeting = %greeting, "connected");
        Ok((channel, greeting))
    }

    /// Connect, read the greeting and disconnect.
    pub async fn probe(&self) -> Result<Reply> {
        let (channel, greeting) = self.connect().await?;
        finish(channel, Ok(greeting), false).await
    }

    pub async fn list_folders(&self) -> Result<Vec<RemoteFolder>> {
        let (mut channel, _) = self.connect().await?;
        let result = list_on(&mut channel).await;
        finish(channel, result, false).await
    }

    /// Whether a slot called `name` exists on the server
    pub async fn check_folder(&self, name: &str) -> Result<bool> {
        validate_folder_name(name)?;
        let (mut channel, _) = self.connect().await?;
        let command = Command::CheckFolder(name.to_string());
        let result = async {
            let reply = send_command(&mut channel, &command).await?;
            match reply.code {
                code::FOLDER_EXISTS => Ok(true),
                code::FOLDER_MISSING => Ok(false),
                _ => Err::<bool, _>(rejected(&command, reply)),
            }
        }
        .await;
        finish(channel, result, false).await
    }

    /// Upload `local` as `<dir name>_<identity>`, replacing any previous
    /// upload of the same directory.
    ///
    /// `progress` gets `(index, count, relative path)` before each file.
    pub async fn upload_folder<F>(&self, local: &Path, progress: F) -> Result<UploadOutcome>
    where
        F: FnMut(usize, usize, &str),
    {
        let md = tokio::fs::metadata(local)
            .await
            .map_err(|e| SyncError::io(local, e))?;
        if !md.is_dir() {
            return Err(SyncError::io(
                local,
                io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
            ));
        }

        let resolver = self.resolver.clone();
        let path = local.to_path_buf();
        let handle = tokio::task::spawn_blocking(move || FolderHandle::resolve(&path, &resolver))
            .await
            .map_err(|e| SyncError::io(local, io::Error::other(e)))?;
        let remote_name = handle.composite_name();
        validate_folder_name(&remote_name)?;
        // The server drops the previous upload on UPLOAD_FOLDER, so the whole
        // tree has to be readable and sendable before asking.
        let files = plan_folder(local).await?;
        info!(
            local = %local.display(),
            remote = %remote_name,
            files = files.len(),
            "uploading folder"
        );

        let (mut channel, _) = self.connect().await?;
        let command = Command::UploadFolder(remote_name.clone());
        let mut streaming = false;
        let result = async {
            expect(&command, send_command(&mut channel, &command).await?, code::OPENING)?;
            streaming = true;
            let summary = send_planned(&mut channel, &files, progress).await?;
            expect(&command, channel.read_reply().await?, code::TRANSFER_COMPLETE)?;
            Ok::<_, SyncError>(summary)
        }
        .await;
        let summary = finish(channel, result, streaming).await?;
        Ok(UploadOutcome {
            remote_name,
            summary,
        })
    }

    /// Download slot `name` into `<dest>/<display name>` and return that path.
    ///
    /// `progress` gets each relative path once the file is written.
    pub async fn download_folder<F>(&self, name: &str, dest: &Path, mut progress: F) -> Result<PathBuf>
    where
        F: FnMut(&str),
    {
        validate_folder_name(name)?;
        let target = dest.join(extract_original_name(name));
        info!(remote = name, local = %target.display(), "downloading folder");

        let (mut channel, _) = self.connect().await?;
        let command = Command::DownloadFolder(name.to_string());
        let mut streaming = false;
        let result = async {
            expect(&command, send_command(&mut channel, &command).await?, code::OPENING)?;
            streaming = true;
            let summary = receive_folder(&mut channel, &target, |rel, _| progress(rel))
                .await
                .map_err(|e| match e {
                    SyncError::Rejected { reply, .. } => rejected(&command, reply),
                    other => other,
                })?;
            expect(&command, channel.read_reply().await?, code::TRANSFER_COMPLETE)?;
            debug!(files = summary.files, bytes = summary.bytes, "download complete");
            Ok::<(), SyncError>(())
        }
        .await;
        finish(channel, result, streaming).await?;
        Ok(target)
    }
}

async fn list_on(channel: &mut TcpChannel) -> Result<Vec<RemoteFolder>> {
    let command = Command::List;
    expect(&command, send_command(channel, &command).await?, code::OPENING)?;
    let mut folders = Vec::new();
    loop {
        let line = channel.expect_line().await?;
        if line.starts_with(token::FOLDER_INFO_PREFIX) {
            folders.push(RemoteFolder::parse_listing_line(&line)?);
            continue;
        }
        expect(&command, Reply::parse(&line)?, code::TRANSFER_COMPLETE)?;
        return Ok(folders);
    }
}

async fn send_command(channel: &mut TcpChannel, command: &Command) -> Result<Reply> {
    channel.write_line(&command.to_string()).await?;
    channel.read_reply().await
}

fn rejected(command: &Command, reply: Reply) -> SyncError {
    SyncError::Rejected {
        command: command.to_string(),
        reply,
    }
}

fn expect(command: &Command, reply: Reply, want: u16) -> Result<Reply> {
    if reply.code == want {
        Ok(reply)
    } else {
        Err(rejected(command, reply))
    }
}

/// Say goodbye while the control channel is still in step, then close.
///
/// Once a transfer has started (`streaming`), any failure leaves the stream
/// at an unknown point and the server closes its side, so no `QUIT` is sent.
async fn finish<T>(mut channel: TcpChannel, result: Result<T>, streaming: bool) -> Result<T> {
    let in_step = match &result {
        Ok(_) => true,
        Err(e) => !streaming && e.keeps_session(),
    };
    if in_step {
        let quit = async {
            channel.write_line(&Command::Quit.to_string()).await?;
            channel.read_reply().await
        };
        if let Err(e) = quit.await {
            debug!(error = %e, "QUIT not acknowledged");
        }
    }
    channel.shutdown().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_addr_formatting() {
        assert_eq!(Client::new("example.org", 2121).addr(), "example.org:2121");
        assert_eq!(Client::localhost().addr(), "127.0.0.1:12381");
    }

    #[test]
    fn test_expect_maps_wrong_code_to_rejection() {
        let cmd = Command::DownloadFolder("missing_99".into());
        let err = expect(&cmd, Reply::new(550, "Folder not found"), code::OPENING).unwrap_err();
        match err {
            SyncError::Rejected { command, reply } => {
                assert_eq!(command, "DOWNLOAD_FOLDER missing_99");
                assert_eq!(reply.code, 550);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port with no listener
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = Client::new("127.0.0.1", port).probe().await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Connection(ConnectionError::Connect { .. })
        ));
    }

    #[tokio::test]
    async fn test_non_greeting_is_rejected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let (mut s, _) = listener.accept().await.unwrap();
            s.write_all(b"421 busy\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });
        let err = Client::new("127.0.0.1", port).probe().await.unwrap_err();
        assert!(matches!(err, SyncError::Rejected { ref reply, .. } if reply.code == 421));
    }

    #[tokio::test]
    async fn test_upload_rejects_plain_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("not_a_dir.txt");
        std::fs::write(&file, b"x").unwrap();
        let err = Client::localhost()
            .upload_folder(&file, |_, _, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Io { .. }));
    }

    #[test]
    fn test_clients_can_share_identity_cache() {
        let tmp = tempfile::TempDir::new().unwrap();
        let first = Client::localhost();
        let second = Client::new("example.org", 2121).with_resolver(first.resolver().clone());
        assert!(Arc::ptr_eq(first.resolver(), second.resolver()));
        let id = first.resolver().identity(tmp.path());
        assert_eq!(second.resolver().identity(tmp.path()), id);
    }

    #[tokio::test]
    async fn test_download_aborted_mid_stream_is_rejected_without_quit() {
        use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (s, _) = listener.accept().await.unwrap();
            let (r, mut w) = s.into_split();
            let mut r = BufReader::new(r);
            w.write_all(b"220 ready\n").await.unwrap();
            let mut command = String::new();
            r.read_line(&mut command).await.unwrap();
            w.write_all(b"150 Sending folder\n550 transfer of \"big.bin\" failed\n")
                .await
                .unwrap();
            // Everything the client sends after the failure
            let mut rest = String::new();
            let _ = r.read_to_string(&mut rest).await;
            (command, rest)
        });

        let dest = tempfile::TempDir::new().unwrap();
        let err = Client::new("127.0.0.1", port)
            .download_folder("data_1", dest.path(), |_| {})
            .await
            .unwrap_err();
        match err {
            SyncError::Rejected { command, reply } => {
                assert_eq!(command, "DOWNLOAD_FOLDER data_1");
                assert_eq!(reply.code, 550);
            }
            other => panic!("unexpected {other:?}"),
        }

        let (command, rest) = server.await.unwrap();
        assert_eq!(command, "DOWNLOAD_FOLDER data_1\n");
        assert_eq!(rest, "");
    }
}
