use std::fmt::Display;
use std::io;

/// Store errors.
#[derive(Debug)]
pub enum Error {
    /// The key is not present in the store.
    NotFound(String),
    /// A record with this key is already present.
    AlreadyExists(String),
    /// Malformed on-disk data: header parse failures, bad block headers,
    /// records that do not decode. The first field names where.
    Format(&'static str, String),
    /// An OS-level read or write failure, tagged with the operation.
    Io(&'static str, io::Error),
    /// An invariant violation detected at runtime. The operation aborts
    /// without further mutation.
    Corruption(String),
    /// The record cannot fit even an empty block of the configured size.
    Capacity { needed: usize, block_size: usize },
    /// The file was left mid-mutation by an earlier writer.
    Stale,
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::NotFound(key) => write!(f, "key {key} not found"),
            Error::AlreadyExists(key) => write!(f, "key {key} already exists"),
            Error::Format(place, msg) => write!(f, "format error in {place}: {msg}"),
            Error::Io(op, err) => write!(f, "io error in {op}: {err}"),
            Error::Corruption(msg) => write!(f, "corruption detected: {msg}"),
            Error::Capacity { needed, block_size } => {
                write!(f, "record of {needed} bytes cannot fit a {block_size} byte block")
            }
            Error::Stale => write!(f, "file is marked stale; open with force to override"),
        }
    }
}

/// Constructs an Error::Corruption for the given format string.
#[macro_export]
macro_rules! corruption {
    ($($args:tt)*) => { $crate::error::Error::Corruption(format!($($args)*)).into() };
}

/// A store Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}
