//! Shared protocol constants for the foldsync line transport

/// Default TCP port for the daemon
pub const DEFAULT_PORT: u16 = 12381;

/// Longest control line accepted before the peer is considered broken
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Payload copy buffer (one read or write per chunk, each individually timed)
pub const CHUNK_SIZE: usize = 64 * 1024;

// Command verbs (client -> server), one per line
pub mod verb {
    pub const LIST: &str = "LIST";
    pub const UPLOAD_FOLDER: &str = "UPLOAD_FOLDER";
    pub const DOWNLOAD_FOLDER: &str = "DOWNLOAD_FOLDER";
    pub const CHECK_FOLDER: &str = "CHECK_FOLDER";
    pub const QUIT: &str = "QUIT";
}

// Three-digit reply codes. Keep numeric values stable, clients match on them.
pub mod code {
    pub const OPENING: u16 = 150;
    pub const GREETING: u16 = 220;
    pub const CLOSING: u16 = 221;
    pub const TRANSFER_COMPLETE: u16 = 226;
    pub const FOLDER_EXISTS: u16 = 250;
    pub const FOLDER_MISSING: u16 = 450;
    pub const UNKNOWN_COMMAND: u16 = 500;
    pub const BAD_ARGUMENT: u16 = 501;
    pub const ACTION_FAILED: u16 = 550;
}

// Data-stream tokens shared by both transfer directions:
//   FILE:<relative path>
//   <decimal length>
//   <exactly length raw bytes>
// receiver answers ACK after each payload, sender ends with END_FOLDER
pub mod token {
    pub const FILE_PREFIX: &str = "FILE:";
    pub const END_FOLDER: &str = "END_FOLDER";
    pub const ACK: &str = "OK";
    pub const FOLDER_INFO_PREFIX: &str = "FOLDER_INFO:";
}

// Centralized timeout defaults, overridable through config
pub mod timeouts {
    // Connection establishment (ms)
    pub const CONNECT_MS: u64 = 10_000;

    // Any single control-line read or payload chunk read (ms)
    pub const READ_MS: u64 = 30_000;

    // Any single write + flush (ms)
    pub const WRITE_MS: u64 = 30_000;

    // Progress tick interval for terminal updates (ms)
    pub const PROGRESS_TICK_MS: u64 = 100;
}
