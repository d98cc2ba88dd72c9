//! Crate-wide error type shared by every core subsystem.

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the core (directory list, file cache, configuration
/// store, recursion guard, coordinator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Path absent from the real filesystem and all consulted archives.
    NotFound,
    /// An allocation failed; callers must leave state unmodified.
    OutOfMemory,
    /// Recursion depth exceeded or a cycle was detected.
    Loop,
    /// Cumulative unpacked-size limit exceeded.
    TooLarge,
    /// Path sanitization rejected a nested path.
    InvalidPath,
    /// Archive member requires a password, or the supplied one is wrong.
    Encrypted,
    /// The decoder reported a corrupt archive.
    Corrupt,
    /// Underlying file I/O failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound => write!(f, "path not found"),
            Error::OutOfMemory => write!(f, "allocation failed"),
            Error::Loop => write!(f, "recursive archive loop detected"),
            Error::TooLarge => write!(f, "unpacked size limit exceeded"),
            Error::InvalidPath => write!(f, "invalid nested archive path"),
            Error::Encrypted => write!(f, "archive member is encrypted"),
            Error::Corrupt => write!(f, "archive is corrupt"),
            Error::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// Maps this error onto the `errno`-style code `fuser` replies expect.
    pub fn to_errno(&self) -> i32 {
        match self {
            Error::NotFound => libc::ENOENT,
            Error::OutOfMemory => libc::ENOMEM,
            Error::Loop => libc::ELOOP,
            Error::TooLarge => libc::EFBIG,
            Error::InvalidPath => libc::EINVAL,
            Error::Encrypted => libc::EACCES,
            Error::Corrupt => libc::EIO,
            Error::Io(_) => libc::EIO,
        }
    }
}
