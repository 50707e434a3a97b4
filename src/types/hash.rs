//! Jenkins one-at-a-time hash, used for both the job-handle and unique-key
//! indices. Zero is folded to 1 so it stays a free sentinel.

use bytes::Bytes;

pub const HASH_BUCKETS: usize = 383;

/// Maximum length of a job handle or client-supplied unique key, matching
/// `GEARMAN_JOB_HANDLE_SIZE`/`GEARMAN_UNIQUE_SIZE` in
/// `original_source/libgearman/constants.h`.
pub const MAX_ID_LEN: usize = 64;

/// Truncates `bytes` to `max` bytes, mirroring the original's
/// `snprintf(..., GEARMAN_UNIQUE_SIZE, ...)` handle/unique cap.
pub fn truncate(mut bytes: Bytes, max: usize) -> Bytes {
    if bytes.len() > max {
        bytes.truncate(max);
    }
    bytes
}

pub fn jenkins_one_at_a_time(data: &[u8]) -> u32 {
    let mut value: u32 = 0;
    for &byte in data {
        value = value.wrapping_add(byte as u32);
        value = value.wrapping_add(value << 10);
        value ^= value >> 6;
    }
    value = value.wrapping_add(value << 3);
    value ^= value >> 11;
    value = value.wrapping_add(value << 15);

    if value == 0 {
        1
    } else {
        value
    }
}

pub fn bucket(hash: u32) -> usize {
    (hash as usize) % HASH_BUCKETS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_zero() {
        assert_ne!(jenkins_one_at_a_time(b""), 0);
    }

    #[test]
    fn deterministic() {
        assert_eq!(jenkins_one_at_a_time(b"reverse"), jenkins_one_at_a_time(b"reverse"));
        assert_ne!(jenkins_one_at_a_time(b"reverse"), jenkins_one_at_a_time(b"Reverse"));
    }

    #[test]
    fn bucket_in_range() {
        for input in [&b""[..], b"a", b"H:host:1", b"some-unique-key"] {
            assert!(bucket(jenkins_one_at_a_time(input)) < HASH_BUCKETS);
        }
    }

    #[test]
    fn truncate_caps_at_max_len() {
        let long = Bytes::from(vec![b'x'; 100]);
        let truncated = truncate(long, MAX_ID_LEN);
        assert_eq!(truncated.len(), MAX_ID_LEN);
    }

    #[test]
    fn truncate_leaves_short_input_alone() {
        let short = Bytes::from_static(b"short");
        assert_eq!(truncate(short.clone(), MAX_ID_LEN), short);
    }
}
