pub const DEFAULT_BLOCK_SIZE: usize = 8192;
pub const MIN_BLOCK_SIZE: usize = 64;
pub const MAX_BLOCK_SIZE: usize = 1024 * 1024;

pub const DEFAULT_SORT_MEMORY_KB: usize = 2048;
pub const DEFAULT_MAX_FILES_PER_SORT: usize = 8;
pub const DEFAULT_MAX_FILES_TOTAL: usize = 256;
pub const MIN_FILES_PER_SORT: usize = 2;
pub const MAX_FILES_PER_SORT_LIMIT: usize = 64;

pub const DEFAULT_POOL_PERCENT: usize = 25;
pub const MIN_POOL_PERCENT: usize = 5;
pub const MAX_POOL_PERCENT: usize = 50;

pub const DEFAULT_MERGE_STEP_BYTES: usize = 256 * 1024;
pub const DEFAULT_MERGE_STEP_ROWS: usize = 4096;

pub const DEFAULT_TEMP_DIR_QUOTA_BLOCKS: usize = 1 << 20;

pub const BYTES_PER_KB: usize = 1024;
pub const BYTES_PER_MB: usize = 1024 * 1024;

pub const TEMP_FILE_PREFIX: &str = "sort_";
pub const TEMP_FILE_EXTENSION: &str = ".tmp";

/// Partitions at or below this length are finished with straight insertion sort.
pub const INSERTION_SORT_CUTOFF: usize = 12;
