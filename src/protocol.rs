//! Shared protocol constants for the foldershare framed transport

// Frame header: TYPE (1) | LENGTH (4, i32 little-endian)
pub const HEADER_LEN: usize = 5;

// Maximum frame payload size (64MB) - prevents DoS via memory exhaustion.
// File bodies never travel inside frames, so this only bounds control payloads.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

// Bulk file bytes move in chunks of this size; the last chunk may be shorter
pub const CHUNK_SIZE: usize = 8192;

pub const DEFAULT_PORT: u16 = 9050;

// Command tag IDs (numeric values are the wire format, keep stable)
pub mod frame {
    // Client -> server requests
    pub const LIST: u8 = 1;
    pub const UPLOAD: u8 = 2;
    pub const DOWNLOAD: u8 = 3;
    pub const DELETE: u8 = 4;

    // Server -> client responses
    pub const OK: u8 = 10;
    pub const ERROR: u8 = 11;
    pub const FILE_LIST: u8 = 12;
}

// Timeout knobs. The protocol itself has no deadlines: `None` keeps every
// socket read/write blocking until the peer acts.
pub mod timeouts {
    use std::time::Duration;

    // Connection establishment timeout for the client (ms)
    pub const CONNECT_MS: u64 = 5000;

    // Convert an optional millisecond setting into a socket timeout.
    // Zero is treated as "no timeout" since std rejects a zero Duration.
    pub fn io_timeout(ms: Option<u64>) -> Option<Duration> {
        match ms {
            Some(0) | None => None,
            Some(ms) => Some(Duration::from_millis(ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn io_timeout_zero_means_unbounded() {
        assert_eq!(timeouts::io_timeout(None), None);
        assert_eq!(timeouts::io_timeout(Some(0)), None);
        assert_eq!(
            timeouts::io_timeout(Some(250)),
            Some(Duration::from_millis(250))
        );
    }
}
