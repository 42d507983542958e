//! Folder send/receive loops shared by upload and download
//!
//! Per file, the sender writes:
//!
//! ```text
//! FILE:<relative path>\n
//! <length>\n
//! <length raw bytes>
//! ```
//!
//! and then blocks until the receiver answers `OK`. `END_FOLDER` closes the
//! stream of files. The same loops run on the client for uploads and on the
//! server for downloads.

use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncWrite, BufWriter};
use tracing::debug;

use crate::channel::Channel;
use crate::error::{ConnectionError, ProtocolError, Result, SyncError, TransferFailure};
use crate::fs_enum::{enumerate_transfer_order, FileEntry};
use crate::protocol::token;
use crate::protocol_core::{
    file_header_line, parse_file_header, parse_file_size, sanitize_relative_path, Reply,
};

/// Totals for one folder transfer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub files: u64,
    pub bytes: u64,
}

/// Enumerate `root` off the async threads.
pub async fn plan_folder(root: &Path) -> Result<Vec<FileEntry>> {
    let owned = root.to_path_buf();
    tokio::task::spawn_blocking(move || enumerate_transfer_order(&owned))
        .await
        .map_err(|e| SyncError::io(root, std::io::Error::other(e)))?
        .map_err(|e| SyncError::io(root, e))
}

/// Send every file under `root`, waiting for an ack after each one.
///
/// `progress` is called before each file with `(index, count, relative path)`,
/// `index` starting at 1.
pub async fn send_folder<R, W, F>(
    channel: &mut Channel<R, W>,
    root: &Path,
    progress: F,
) -> Result<TransferSummary>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(usize, usize, &str),
{
    let files = plan_folder(root).await?;
    send_planned(channel, &files, progress).await
}

/// Like [`send_folder`] for a tree already enumerated with [`plan_folder`],
/// so the caller can refuse an unsendable tree before committing to a
/// transfer.
pub async fn send_planned<R, W, F>(
    channel: &mut Channel<R, W>,
    files: &[FileEntry],
    mut progress: F,
) -> Result<TransferSummary>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(usize, usize, &str),
{
    let count = files.len();
    let mut summary = TransferSummary::default();

    for (i, entry) in files.iter().enumerate() {
        progress(i + 1, count, &entry.relative);
        send_file(channel, entry).await?;
        summary.files += 1;
        summary.bytes += entry.size;
    }

    channel.write_line(token::END_FOLDER).await?;
    Ok(summary)
}

async fn send_file<R, W>(channel: &mut Channel<R, W>, entry: &FileEntry) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let rel = entry.relative.as_str();
    // Open before announcing, so a vanished file fails without touching the wire
    let mut file = File::open(&entry.path)
        .await
        .map_err(|e| SyncError::transfer(rel, TransferFailure::Io(e)))?;

    debug!(path = rel, bytes = entry.size, "sending file");
    let header = file_header_line(rel);
    let size = entry.size.to_string();
    channel
        .write_lines(&[header.as_str(), size.as_str()])
        .await
        .map_err(|e| e.during_transfer_of(rel))?;
    channel.write_payload_from(&mut file, entry.size, rel).await?;

    match channel.read_line().await {
        Ok(Some(ack)) if ack == token::ACK => Ok(()),
        Ok(Some(other)) => Err(SyncError::transfer(rel, TransferFailure::BadAck(other))),
        Ok(None) | Err(SyncError::Connection(ConnectionError::Closed)) => {
            Err(SyncError::transfer(rel, TransferFailure::MissingAck))
        }
        Err(e) => Err(e.during_transfer_of(rel)),
    }
}

/// Receive files into `dest` until `END_FOLDER`.
///
/// `progress` is called with each relative path and its length once the
/// payload is stored.
pub async fn receive_folder<R, W, F>(
    channel: &mut Channel<R, W>,
    dest: &Path,
    mut progress: F,
) -> Result<TransferSummary>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(&str, u64),
{
    let mut summary = TransferSummary::default();
    fs::create_dir_all(dest)
        .await
        .map_err(|e| SyncError::io(dest, e))?;

    loop {
        let line = channel.expect_line().await?;
        if line == token::END_FOLDER {
            break;
        }
        let Some(rel) = parse_file_header(&line) else {
            // The sender gave up and said why
            if let Ok(reply) = Reply::parse(&line) {
                if reply.is_negative() {
                    return Err(SyncError::Rejected {
                        command: "folder transfer".into(),
                        reply,
                    });
                }
            }
            return Err(ProtocolError::UnexpectedLine(line.clone()).into());
        };
        let size_line = channel
            .expect_line()
            .await
            .map_err(|e| e.during_transfer_of(rel))?;
        let size = parse_file_size(&size_line)?;
        let target = dest.join(sanitize_relative_path(rel)?);

        debug!(path = rel, bytes = size, "receiving file");
        receive_file(channel, &target, size, rel).await?;
        channel
            .write_line(token::ACK)
            .await
            .map_err(|e| e.during_transfer_of(rel))?;

        summary.files += 1;
        summary.bytes += size;
        progress(rel, size);
    }

    Ok(summary)
}

async fn receive_file<R, W>(
    channel: &mut Channel<R, W>,
    target: &Path,
    size: u64,
    rel: &str,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let local = |e: std::io::Error| SyncError::transfer(rel, TransferFailure::Io(e));
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await.map_err(local)?;
    }
    let file = File::create(target).await.map_err(local)?;
    let mut sink = BufWriter::new(file);
    channel.read_payload_into(&mut sink, size, rel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Timeouts;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{duplex, DuplexStream, ReadHalf, WriteHalf};

    type MemChannel = Channel<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    fn pair(t: Timeouts) -> (MemChannel, MemChannel) {
        let (a, b) = duplex(64 * 1024);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        (Channel::new(ar, aw, t), Channel::new(br, bw, t))
    }

    fn write(root: &Path, rel: &str, data: &[u8]) {
        let p = root.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, data).unwrap();
    }

    #[tokio::test]
    async fn test_send_receive_round_trip() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(src.path(), "top.txt", b"hello");
        write(src.path(), "empty.bin", b"");
        write(src.path(), "nested/deep/data.bin", &vec![7u8; 300_000]);
        std::fs::create_dir_all(src.path().join("no_files_here")).unwrap();

        let (mut a, mut b) = pair(Timeouts::default());
        let src_root = src.path().to_path_buf();
        let sender = tokio::spawn(async move {
            let mut seen = Vec::new();
            let summary = send_folder(&mut a, &src_root, |i, n, rel| {
                seen.push((i, n, rel.to_string()))
            })
            .await
            .unwrap();
            (summary, seen)
        });

        let mut received = Vec::new();
        let summary = receive_folder(&mut b, dst.path(), |rel, _| received.push(rel.to_string()))
            .await
            .unwrap();
        let (sent_summary, seen) = sender.await.unwrap();

        assert_eq!(summary, sent_summary);
        assert_eq!(summary.files, 3);
        assert_eq!(summary.bytes, 300_005);
        assert_eq!(
            seen,
            vec![
                (1, 3, "empty.bin".to_string()),
                (2, 3, "top.txt".to_string()),
                (3, 3, "nested/deep/data.bin".to_string()),
            ]
        );
        assert_eq!(received, vec!["empty.bin", "top.txt", "nested/deep/data.bin"]);
        assert_eq!(std::fs::read(dst.path().join("top.txt")).unwrap(), b"hello");
        assert_eq!(std::fs::read(dst.path().join("empty.bin")).unwrap(), b"");
        assert_eq!(
            std::fs::read(dst.path().join("nested/deep/data.bin")).unwrap(),
            vec![7u8; 300_000]
        );
        assert!(!dst.path().join("no_files_here").exists());
    }

    #[tokio::test]
    async fn test_empty_folder_sends_only_end_marker() {
        let src = TempDir::new().unwrap();
        let (mut a, mut b) = pair(Timeouts::default());
        let summary = send_folder(&mut a, src.path(), |_, _, _| {}).await.unwrap();
        assert_eq!(summary, TransferSummary::default());
        assert_eq!(b.expect_line().await.unwrap(), "END_FOLDER");
    }

    #[tokio::test]
    async fn test_zero_length_file_still_needs_ack() {
        let dst = TempDir::new().unwrap();
        let (mut a, mut b) = pair(Timeouts::default());
        a.write_lines(&["FILE:zero.txt", "0", "END_FOLDER"]).await.unwrap();
        receive_folder(&mut b, dst.path(), |_, _| {}).await.unwrap();
        assert_eq!(a.expect_line().await.unwrap(), "OK");
        assert_eq!(std::fs::metadata(dst.path().join("zero.txt")).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_receiver_rejects_parent_traversal() {
        let base = TempDir::new().unwrap();
        let dst = base.path().join("slot");
        let (mut a, mut b) = pair(Timeouts::default());
        a.write_lines(&["FILE:../escape.txt", "3"]).await.unwrap();
        let err = receive_folder(&mut b, &dst, |_, _| {}).await.unwrap_err();
        assert!(matches!(err, SyncError::Protocol(ProtocolError::UnsafePath(_))));
        assert!(!base.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_receiver_rejects_absolute_path() {
        let dst = TempDir::new().unwrap();
        let (mut a, mut b) = pair(Timeouts::default());
        a.write_lines(&["FILE:/etc/evil", "1"]).await.unwrap();
        let err = receive_folder(&mut b, dst.path(), |_, _| {}).await.unwrap_err();
        assert!(matches!(err, SyncError::Protocol(ProtocolError::UnsafePath(_))));
    }

    #[tokio::test]
    async fn test_declared_size_larger_than_sent_is_connection_lost() {
        let dst = TempDir::new().unwrap();
        let (mut a, mut b) = pair(Timeouts::default());
        a.write_lines(&["FILE:big.bin", "10"]).await.unwrap();
        let mut partial = &b"abc"[..];
        // only 3 of the 10 announced bytes, then hang up
        let _ = a.write_payload_from(&mut partial, 3, "big.bin").await;
        drop(a);
        let err = receive_folder(&mut b, dst.path(), |_, _| {}).await.unwrap_err();
        assert!(err.is_connection_lost());
        assert!(matches!(
            err,
            SyncError::Transfer {
                reason: TransferFailure::ConnectionLost { received: 3, expected: 10 },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_stalled_sender_hits_read_timeout() {
        let dst = TempDir::new().unwrap();
        let t = Timeouts {
            read: Duration::from_millis(100),
            write: Duration::from_secs(5),
        };
        let (mut a, mut b) = pair(t);
        a.write_lines(&["FILE:stall.bin", "10"]).await.unwrap();
        let err = receive_folder(&mut b, dst.path(), |_, _| {}).await.unwrap_err();
        assert!(err.is_connection_lost());
        assert!(matches!(
            err,
            SyncError::Transfer {
                reason: TransferFailure::TimedOut(_),
                ..
            }
        ));
        drop(a);
    }

    #[tokio::test]
    async fn test_bad_ack_aborts_naming_the_file() {
        let src = TempDir::new().unwrap();
        write(src.path(), "first.txt", b"1");
        write(src.path(), "second.txt", b"2");
        let (mut a, mut b) = pair(Timeouts::default());
        let root = src.path().to_path_buf();
        let sender = tokio::spawn(async move { send_folder(&mut a, &root, |_, _, _| {}).await });

        assert_eq!(b.expect_line().await.unwrap(), "FILE:first.txt");
        assert_eq!(b.expect_line().await.unwrap(), "1");
        let mut sink = Vec::new();
        b.read_payload_into(&mut sink, 1, "first.txt").await.unwrap();
        b.write_line("NOPE").await.unwrap();

        match sender.await.unwrap().unwrap_err() {
            SyncError::Transfer { path, reason } => {
                assert_eq!(path, "first.txt");
                assert!(matches!(reason, TransferFailure::BadAck(ref s) if s == "NOPE"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_ack_when_peer_hangs_up() {
        let src = TempDir::new().unwrap();
        write(src.path(), "only.txt", b"abc");
        let (mut a, mut b) = pair(Timeouts::default());
        let root = src.path().to_path_buf();
        let sender = tokio::spawn(async move { send_folder(&mut a, &root, |_, _, _| {}).await });

        b.expect_line().await.unwrap();
        b.expect_line().await.unwrap();
        let mut sink = Vec::new();
        b.read_payload_into(&mut sink, 3, "only.txt").await.unwrap();
        drop(b);

        let err = sender.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            SyncError::Transfer {
                reason: TransferFailure::MissingAck,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_garbage_instead_of_header_is_protocol_error() {
        let dst = TempDir::new().unwrap();
        let (mut a, mut b) = pair(Timeouts::default());
        a.write_line("HELLO").await.unwrap();
        let err = receive_folder(&mut b, dst.path(), |_, _| {}).await.unwrap_err();
        assert!(matches!(err, SyncError::Protocol(ProtocolError::UnexpectedLine(_))));
    }

    #[tokio::test]
    async fn test_sender_error_reply_is_a_rejection() {
        let dst = TempDir::new().unwrap();
        let (mut a, mut b) = pair(Timeouts::default());
        a.write_lines(&["FILE:one.txt", "1"]).await.unwrap();
        let mut one = &b"1"[..];
        a.write_payload_from(&mut one, 1, "one.txt").await.unwrap();
        a.write_line("550 transfer of \"big.bin\" failed").await.unwrap();

        let err = receive_folder(&mut b, dst.path(), |_, _| {}).await.unwrap_err();
        match err {
            SyncError::Rejected { reply, .. } => {
                assert_eq!(reply.code, 550);
                assert!(reply.text.contains("big.bin"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(a.expect_line().await.unwrap(), "OK");
    }

    #[tokio::test]
    async fn test_planned_send_uses_the_given_list() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(src.path(), "a.txt", b"aa");
        let files = plan_folder(src.path()).await.unwrap();
        // Added after planning, so not sent
        write(src.path(), "b.txt", b"bb");

        let (mut a, mut b) = pair(Timeouts::default());
        let sender = tokio::spawn(async move { send_planned(&mut a, &files, |_, _, _| {}).await });
        let summary = receive_folder(&mut b, dst.path(), |_, _| {}).await.unwrap();
        assert_eq!(sender.await.unwrap().unwrap(), summary);
        assert_eq!(summary.files, 1);
        assert!(!dst.path().join("b.txt").exists());
    }
}
