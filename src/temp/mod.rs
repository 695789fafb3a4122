pub mod directory;
pub mod file;
pub mod manager;

pub use directory::TempDirectory;
pub use file::{FileState, TempFile};
pub use manager::TempFileManager;
