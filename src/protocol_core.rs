//! Pure parsing and formatting for the foldsync wire grammar
//!
//! Nothing in here touches a socket. `channel` moves the bytes, this module
//! decides what they mean.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::error::ProtocolError;
use crate::protocol::{code, token, verb};

/// A client request, one per control line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    UploadFolder(String),
    DownloadFolder(String),
    CheckFolder(String),
    Quit,
}

impl Command {
    /// Parse one control line. The verb is case-insensitive; the argument is
    /// everything after the first space, without surrounding blanks.
    pub fn parse(line: &str) -> Result<Command, ProtocolError> {
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        let (raw_verb, arg) = match line.split_once(' ') {
            Some((v, a)) => (v, a.trim_matches(&[' ', '\t'][..])),
            None => (line, ""),
        };
        let upper = raw_verb.to_ascii_uppercase();
        let folder = |name: &'static str| -> Result<String, ProtocolError> {
            if arg.is_empty() {
                return Err(ProtocolError::MissingArgument(name));
            }
            validate_folder_name(arg)?;
            Ok(arg.to_string())
        };
        match upper.as_str() {
            verb::LIST => Ok(Command::List),
            verb::QUIT => Ok(Command::Quit),
            verb::UPLOAD_FOLDER => Ok(Command::UploadFolder(folder(verb::UPLOAD_FOLDER)?)),
            verb::DOWNLOAD_FOLDER => Ok(Command::DownloadFolder(folder(verb::DOWNLOAD_FOLDER)?)),
            verb::CHECK_FOLDER => Ok(Command::CheckFolder(folder(verb::CHECK_FOLDER)?)),
            _ => Err(ProtocolError::UnknownCommand(line.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::List => f.write_str(verb::LIST),
            Command::Quit => f.write_str(verb::QUIT),
            Command::UploadFolder(n) => write!(f, "{} {}", verb::UPLOAD_FOLDER, n),
            Command::DownloadFolder(n) => write!(f, "{} {}", verb::DOWNLOAD_FOLDER, n),
            Command::CheckFolder(n) => write!(f, "{} {}", verb::CHECK_FOLDER, n),
        }
    }
}

/// A slot name must map to exactly one directory directly under the root.
pub fn validate_folder_name(name: &str) -> Result<(), ProtocolError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.starts_with(char::is_whitespace)
        || name.ends_with(char::is_whitespace)
        || name.chars().any(|c| c == '/' || c == '\\' || c.is_control());
    if bad {
        return Err(ProtocolError::InvalidFolderName(name.to_string()));
    }
    Ok(())
}

/// Reply classes by leading digit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClass {
    /// 1xx: more lines follow
    Preliminary,
    /// 2xx: success, terminal for the command
    Completion,
    /// 4xx: negative, terminal
    TransientNegative,
    /// 5xx: error, terminal
    PermanentNegative,
    /// Anything else that still had three digits
    Unknown,
}

/// `NNN <text>` server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub text: String,
}

impl Reply {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    pub fn parse(line: &str) -> Result<Reply, ProtocolError> {
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        let digits = line.get(..3).filter(|d| d.bytes().all(|b| b.is_ascii_digit()));
        let Some(digits) = digits else {
            return Err(ProtocolError::MalformedReply(line.to_string()));
        };
        let rest = &line[3..];
        let text = match rest.strip_prefix(' ') {
            Some(t) => t,
            None if rest.is_empty() => "",
            None => return Err(ProtocolError::MalformedReply(line.to_string())),
        };
        let code = digits
            .parse()
            .map_err(|_| ProtocolError::MalformedReply(line.to_string()))?;
        Ok(Reply::new(code, text))
    }

    pub fn class(&self) -> ReplyClass {
        match self.code / 100 {
            1 => ReplyClass::Preliminary,
            2 => ReplyClass::Completion,
            4 => ReplyClass::TransientNegative,
            5 => ReplyClass::PermanentNegative,
            _ => ReplyClass::Unknown,
        }
    }

    pub fn is_negative(&self) -> bool {
        matches!(
            self.class(),
            ReplyClass::TransientNegative | ReplyClass::PermanentNegative
        )
    }

    pub fn greeting() -> Self {
        Reply::new(code::GREETING, "foldsync ready")
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.text.is_empty() {
            write!(f, "{:03}", self.code)
        } else {
            write!(f, "{:03} {}", self.code, self.text)
        }
    }
}

/// `FILE:<relative path>` control line
pub fn file_header_line(relative_path: &str) -> String {
    format!("{}{}", token::FILE_PREFIX, relative_path)
}

/// Relative path out of a `FILE:` line, `None` for any other line
pub fn parse_file_header(line: &str) -> Option<&str> {
    line.strip_prefix(token::FILE_PREFIX)
}

/// Declared payload length line
pub fn parse_file_size(line: &str) -> Result<u64, ProtocolError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::InvalidSize(line.to_string()));
    }
    trimmed
        .parse()
        .map_err(|_| ProtocolError::InvalidSize(line.to_string()))
}

/// One entry of a `LIST` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFolder {
    /// Identity suffix of the slot, empty when the slot name has none
    pub identity: String,
    pub display_name: String,
    pub size_bytes: u64,
}

impl RemoteFolder {
    /// On-disk slot name this entry was listed from
    pub fn composite_name(&self) -> String {
        if self.identity.is_empty() {
            self.display_name.clone()
        } else {
            crate::identity::composite_name(&self.display_name, &self.identity)
        }
    }

    /// `FOLDER_INFO:<identity>|<display name>|<size>`
    pub fn to_listing_line(&self) -> String {
        format!(
            "{}{}|{}|{}",
            token::FOLDER_INFO_PREFIX,
            self.identity,
            self.display_name,
            self.size_bytes
        )
    }

    /// Display names may contain `|`; identity and size never do, so split
    /// on the first and last separator.
    pub fn parse_listing_line(line: &str) -> Result<RemoteFolder, ProtocolError> {
        let malformed = || ProtocolError::MalformedListing(line.to_string());
        let body = line
            .trim_end_matches(&['\r', '\n'][..])
            .strip_prefix(token::FOLDER_INFO_PREFIX)
            .ok_or_else(malformed)?;
        let (identity, rest) = body.split_once('|').ok_or_else(malformed)?;
        let (display_name, size) = rest.rsplit_once('|').ok_or_else(malformed)?;
        let size_bytes = size.parse().map_err(|_| malformed())?;
        Ok(RemoteFolder {
            identity: identity.to_string(),
            display_name: display_name.to_string(),
            size_bytes,
        })
    }
}

/// Turn a wire path into a relative path that cannot leave its root.
///
/// Rejects:
/// 1. Parent directory segments and absolute/prefixed paths
/// 2. NUL bytes and backslashes (wire paths are always `/` separated)
/// 3. Paths with nothing left after dropping `.` and empty segments
pub fn sanitize_relative_path(wire: &str) -> Result<PathBuf, ProtocolError> {
    use Component::{CurDir, Normal};

    let unsafe_path = || ProtocolError::UnsafePath(wire.to_string());
    if wire.contains('\0') || wire.contains('\\') || wire.starts_with('/') {
        return Err(unsafe_path());
    }

    let mut safe = PathBuf::new();
    for segment in wire.split('/') {
        if segment.is_empty() {
            continue;
        }
        let mut comps = Path::new(segment).components();
        match (comps.next(), comps.next()) {
            (Some(CurDir), None) => {}
            (Some(Normal(s)), None) => {
                // On Windows, reject components with ':' (ADS / drive-relative)
                #[cfg(windows)]
                if s.to_string_lossy().contains(':') {
                    return Err(unsafe_path());
                }
                safe.push(s);
            }
            // `..`, roots and drive prefixes
            _ => return Err(unsafe_path()),
        }
    }

    if safe.as_os_str().is_empty() {
        return Err(unsafe_path());
    }
    Ok(safe)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("LIST").unwrap(), Command::List);
        assert_eq!(Command::parse("list\r").unwrap(), Command::List);
        assert_eq!(Command::parse("QUIT").unwrap(), Command::Quit);
        assert_eq!(
            Command::parse("UPLOAD_FOLDER reports_7").unwrap(),
            Command::UploadFolder("reports_7".into())
        );
        assert_eq!(
            Command::parse("download_folder My Docs_12").unwrap(),
            Command::DownloadFolder("My Docs_12".into())
        );
        assert_eq!(
            Command::parse("CHECK_FOLDER a_1").unwrap(),
            Command::CheckFolder("a_1".into())
        );
        assert_eq!(
            Command::parse("UPLOAD_FOLDER  x_1 ").unwrap(),
            Command::UploadFolder("x_1".into())
        );
        assert!(matches!(
            Command::parse("UPLOAD_FOLDER   "),
            Err(ProtocolError::MissingArgument(_))
        ));
    }

    #[test]
    fn test_parse_command_errors() {
        assert!(matches!(
            Command::parse("STOR x"),
            Err(ProtocolError::UnknownCommand(_))
        ));
        assert!(matches!(
            Command::parse("UPLOAD_FOLDER"),
            Err(ProtocolError::MissingArgument(_))
        ));
        assert!(matches!(
            Command::parse("DOWNLOAD_FOLDER ../etc"),
            Err(ProtocolError::InvalidFolderName(_))
        ));
        assert!(matches!(
            Command::parse("DOWNLOAD_FOLDER .."),
            Err(ProtocolError::InvalidFolderName(_))
        ));
    }

    #[test]
    fn test_command_display_matches_grammar() {
        assert_eq!(Command::UploadFolder("a_1".into()).to_string(), "UPLOAD_FOLDER a_1");
        assert_eq!(Command::List.to_string(), "LIST");
    }

    #[test]
    fn test_reply_parse_and_class() {
        let r = Reply::parse("220 foldsync ready").unwrap();
        assert_eq!(r.code, 220);
        assert_eq!(r.text, "foldsync ready");
        assert_eq!(r.class(), ReplyClass::Completion);

        assert_eq!(Reply::parse("150").unwrap().class(), ReplyClass::Preliminary);
        assert!(Reply::parse("550 Folder not found").unwrap().is_negative());
        assert!(Reply::parse("450 nope").unwrap().is_negative());
    }

    #[test]
    fn test_reply_parse_rejects_garbage() {
        assert!(Reply::parse("OK").is_err());
        assert!(Reply::parse("22 short").is_err());
        assert!(Reply::parse("2200 glued").is_err());
        assert!(Reply::parse("").is_err());
    }

    #[test]
    fn test_reply_display() {
        assert_eq!(Reply::new(226, "done").to_string(), "226 done");
        assert_eq!(Reply::new(150, "").to_string(), "150");
    }

    #[test]
    fn test_file_header_and_size() {
        assert_eq!(file_header_line("a/b.txt"), "FILE:a/b.txt");
        assert_eq!(parse_file_header("FILE:a/b.txt"), Some("a/b.txt"));
        assert_eq!(parse_file_header("END_FOLDER"), None);
        assert_eq!(parse_file_size("0").unwrap(), 0);
        assert_eq!(parse_file_size("12345").unwrap(), 12345);
        assert!(parse_file_size("-1").is_err());
        assert!(parse_file_size("12k").is_err());
        assert!(parse_file_size("").is_err());
    }

    #[test]
    fn test_listing_line() {
        let f = RemoteFolder {
            identity: "7".into(),
            display_name: "reports".into(),
            size_bytes: 42,
        };
        let line = f.to_listing_line();
        assert_eq!(line, "FOLDER_INFO:7|reports|42");
        assert_eq!(RemoteFolder::parse_listing_line(&line).unwrap(), f);
        assert_eq!(f.composite_name(), "reports_7");

        let piped = RemoteFolder::parse_listing_line("FOLDER_INFO:9|a|b|10").unwrap();
        assert_eq!(piped.display_name, "a|b");
        assert!(RemoteFolder::parse_listing_line("FOLDER_INFO:9|x").is_err());
        assert!(RemoteFolder::parse_listing_line("INFO:9|x|1").is_err());
    }

    #[test]
    fn test_sanitize_safe_paths() {
        assert_eq!(
            sanitize_relative_path("subdir/file.txt").unwrap(),
            PathBuf::from("subdir").join("file.txt")
        );
        assert_eq!(
            sanitize_relative_path("./subdir/./file.txt").unwrap(),
            PathBuf::from("subdir").join("file.txt")
        );
        assert_eq!(
            sanitize_relative_path("subdir//file.txt").unwrap(),
            PathBuf::from("subdir").join("file.txt")
        );
    }

    #[test]
    fn test_sanitize_rejects_escapes() {
        assert!(sanitize_relative_path("../etc/passwd").is_err());
        assert!(sanitize_relative_path("subdir/../../etc/passwd").is_err());
        assert!(sanitize_relative_path("a/..").is_err());
        assert!(sanitize_relative_path("/etc/passwd").is_err());
        assert!(sanitize_relative_path("file\0.txt").is_err());
        assert!(sanitize_relative_path("..\\evil").is_err());
        assert!(sanitize_relative_path("").is_err());
        assert!(sanitize_relative_path("./.").is_err());
    }

    #[test]
    fn test_validate_folder_name() {
        assert!(validate_folder_name("reports_7").is_ok());
        assert!(validate_folder_name("with space_1").is_ok());
        assert!(validate_folder_name("").is_err());
        assert!(validate_folder_name("a/b").is_err());
        assert!(validate_folder_name("a\\b").is_err());
        assert!(validate_folder_name("tab\there").is_err());
        assert!(validate_folder_name(" x").is_err());
        assert!(validate_folder_name("x_1 ").is_err());
    }
}
