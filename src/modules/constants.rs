use std::time::Duration;

// File system constants
pub const TTL: Duration = Duration::from_secs(1);
pub const BLOCK_SIZE: u64 = 512;
pub const DEFAULT_PERMISSION: u16 = 0o755;
pub const MAX_NAME_LENGTH: u32 = 255;

// Largest file the in-memory tree holds
pub const MAX_FILE_SIZE: u64 = 1 << 30;

// Handle values; 1 is reserved for the FUSE root inode
pub const RESERVED_HANDLE: u64 = 1;
pub const INITIAL_HANDLE: u64 = 2;

// Directory listing verifier
pub const VERIFIER_SEED: i64 = i64::MIN;
pub const COOKIE_STRIDE: i64 = 1024;

// User and group IDs
pub const DEFAULT_UID: u32 = 501;
pub const DEFAULT_GID: u32 = 20;
