//! # Download and Request IDs
//!
//! Process-global identifiers used for log correlation and unique temp
//! file naming. A download id is `"<SID>:<n>"`, where `SID` is the
//! process start time in base-36 and `n` a monotonic counter. Purely
//! observability, not configuration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

static SID: OnceLock<String> = OnceLock::new();
static DOWNLOAD_COUNTER: AtomicU64 = AtomicU64::new(0);
static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// The process session id: start wall time in milliseconds, base-36.
pub fn session_id() -> &'static str {
    SID.get_or_init(|| {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        to_base36(millis)
    })
}

/// Next download id, unique within this process: `"<SID>:<n>"`.
pub fn next_download_id() -> String {
    format!(
        "{}:{}",
        session_id(),
        DOWNLOAD_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Next request id, logged with every client request.
pub fn next_request_id() -> u64 {
    REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A process-unique suffix for temp file names.
pub fn unique_suffix() -> String {
    let n = DOWNLOAD_COUNTER.fetch_add(1, Ordering::Relaxed);
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    format!("{}-{}", to_base36(n), to_base36(millis))
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ascii")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base36_round_values() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(36 * 36 + 1), "101");
    }

    #[test]
    fn download_ids_share_sid_and_increase() {
        let a = next_download_id();
        let b = next_download_id();
        let (sid_a, n_a) = a.split_once(':').unwrap();
        let (sid_b, n_b) = b.split_once(':').unwrap();
        assert_eq!(sid_a, sid_b);
        assert_eq!(sid_a, session_id());
        assert!(n_b.parse::<u64>().unwrap() > n_a.parse::<u64>().unwrap());
    }

    #[test]
    fn request_ids_are_monotonic() {
        let a = next_request_id();
        let b = next_request_id();
        assert!(b > a);
    }
}
