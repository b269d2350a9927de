//! Constants shared across the storage layout and defaults.

/// Canonical metadata file inside the storage directory.
pub const INDEX_FILE_NAME: &str = "index";
/// Staging file used while replacing [`INDEX_FILE_NAME`].
pub const SWAP_INDEX_FILE_NAME: &str = "~index";
/// Extension of per-domain bucket files.
pub const BUCKET_FILE_EXTENSION: &str = "bucket";

pub const INDEX_MAGIC: [u8; 4] = *b"CPIX";
pub const INDEX_FORMAT_VERSION: u16 = 1;
/// magic (4) + version (2) + payload length (8)
pub const INDEX_HEADER_SIZE: usize = 14;
pub const INDEX_CHECKSUM_SIZE: usize = 32;
/// Upper bound on a decoded index payload; anything larger is treated as corruption.
pub const MAX_INDEX_PAYLOAD_BYTES: u64 = 256 * 1024 * 1024;

pub const DEFAULT_QUEUE_SIZE: usize = 1024;
pub const DEFAULT_WRITE_BEHIND_DELAY_MS: u64 = 10_000;
pub const DEFAULT_MIN_PENDING_BYTES: u64 = 64 * 1024;
pub const DEFAULT_GROWTH_RATIO: f64 = 0.1;

/// How often a producer blocked on a full queue re-checks the writer state.
pub const SUBMIT_POLL_INTERVAL_MS: u64 = 100;
