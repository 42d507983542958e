//! foldsync library
//!
//! Whole-folder push, list and pull over one line-oriented TCP connection.
//! The server keeps each uploaded folder as `<name>_<identity>` under its
//! root; re-uploading the same local directory replaces that slot.

pub mod channel;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod fs_enum;
pub mod identity;
pub mod logger;
pub mod progress;
pub mod protocol;
pub mod protocol_core;
pub mod server;
pub mod session;
pub mod store;
pub mod transfer;
pub mod url;

pub use client::{Client, UploadOutcome};
pub use error::{Result, SyncError};
pub use identity::{FolderHandle, FolderIdentityResolver};
pub use protocol_core::{Command, RemoteFolder, Reply};
pub use server::{Server, ServerHandle};
