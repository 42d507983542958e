//! URL parsing for foldsync:// remotes

use crate::protocol::DEFAULT_PORT;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub host: String,
    pub port: u16,
}

/// `foldsync://host[:port][/]`; the scheme is case-insensitive and the
/// slashes after it are optional. A missing port means the default port;
/// one that does not parse rejects the URL.
pub fn parse_remote_url(s: &str) -> Option<Remote> {
    let s_trim = s.trim();
    let lower = s_trim.to_ascii_lowercase();
    let scheme_end = lower.find(':')?;
    if &lower[..scheme_end] != "foldsync" {
        return None;
    }
    let mut rest = &s_trim[scheme_end + 1..];
    if let Some(r) = rest.strip_prefix("//") {
        rest = r;
    }
    let hp = rest.trim_end_matches('/');
    if hp.is_empty() || hp.contains('/') {
        return None;
    }
    // [v6]:port
    if let Some(v6) = hp.strip_prefix('[') {
        let (host, after) = v6.split_once(']')?;
        let port = match after.strip_prefix(':') {
            Some(p) => p.parse().ok()?,
            None if after.is_empty() => DEFAULT_PORT,
            None => return None,
        };
        return Some(Remote {
            host: host.to_string(),
            port,
        });
    }
    let (host, port) = match hp.split_once(':') {
        Some((h, pr)) => (h, pr.parse().ok()?),
        None => (hp, DEFAULT_PORT),
    };
    if host.is_empty() {
        return None;
    }
    Some(Remote {
        host: host.to_string(),
        port,
    })
}
