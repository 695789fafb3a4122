use std::io;

/// Error taxonomy of the sort engine.
///
/// The first three variants are resource-exhaustion conditions the caller may
/// recover from (retry with less concurrency, reject the statement). The rest
/// are fatal for the operation that raised them; the [`Sorter`](crate::Sorter)
/// latches the first fatal error and replays it on every later call, which is
/// why the type is `Clone`.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SortError {
    #[error("temp-space quota exhausted in directory '{0}'")]
    TempSpaceExhausted(String),

    #[error("physical disk full while writing '{0}'")]
    DiskFull(String),

    #[error("memory-pool block budget exhausted")]
    OutOfMemoryBlocks,

    #[error("temp-file slots exhausted")]
    OutOfFileSlots,

    #[error("serialized row too long: {got} bytes, limit {limit}")]
    RowTooLong { got: usize, limit: usize },

    #[error("i/o failure: {0}")]
    Io(String),

    #[error("corrupt record framing at byte offset {0}")]
    Corrupt(u64),

    #[error("operation not valid in state {0}")]
    InvalidState(&'static str),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type SortResult<T> = Result<T, SortError>;

impl SortError {
    /// Maps an I/O error raised while writing `path`, keeping disk-full
    /// distinct from other failures so the caller can tell configured-quota
    /// exhaustion, physical exhaustion and plain I/O trouble apart.
    pub fn from_write_io(err: io::Error, path: &std::path::Path) -> Self {
        if err.raw_os_error() == Some(libc_enospc()) {
            SortError::DiskFull(path.display().to_string())
        } else {
            SortError::Io(err.to_string())
        }
    }
}

impl From<io::Error> for SortError {
    fn from(err: io::Error) -> Self {
        SortError::Io(err.to_string())
    }
}

#[cfg(unix)]
fn libc_enospc() -> i32 {
    28
}

#[cfg(not(unix))]
fn libc_enospc() -> i32 {
    // ERROR_DISK_FULL
    112
}
