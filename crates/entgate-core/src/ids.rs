//! Identifier and clock helpers.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in microseconds since the Unix epoch.
///
/// A clock set before the epoch reads as zero.
pub fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

/// Generate a new 16-byte, time-ordered identifier as lowercase hex.
///
/// Layout: 8 bytes big-endian microsecond timestamp, 4 bytes process-wide
/// counter, 4 bytes per-process salt. Ids sort by creation time.
pub fn new_id() -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let counter = COUNTER.fetch_add(1, Ordering::SeqCst);

    let mut id = [0u8; 16];
    id[..8].copy_from_slice(&(now_micros() as u64).to_be_bytes());
    id[8..12].copy_from_slice(&counter.to_be_bytes());
    id[12..].copy_from_slice(&process_salt().to_be_bytes());
    hex::encode(id)
}

fn process_salt() -> u32 {
    static SALT: OnceLock<u32> = OnceLock::new();
    *SALT.get_or_init(|| {
        let mut hasher = RandomState::new().build_hasher();
        hasher.write_u32(std::process::id());
        hasher.finish() as u32
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique_hex() {
        let ids: HashSet<_> = (0..1000).map(|_| new_id()).collect();
        assert_eq!(ids.len(), 1000);
        for id in &ids {
            assert_eq!(id.len(), 32);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn test_ids_are_time_ordered() {
        let first = new_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = new_id();
        assert!(first < second);
    }
}
