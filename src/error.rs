
//! Error type for all compression, kernel and serialization operations.

pub type Result<T> = std::result::Result<T, Error>;

/// A result without a value, only recording whether the operation failed.
pub type UnitResult = Result<()>;

pub use std::io::Error as IoError;
pub use std::io::Result as IoResult;


/// All failures that compressing, querying or (de)serializing
/// a matrix can produce.
#[derive(Debug)]
pub enum Error {

    /// The operation is not available on the compressed representation
    /// and no fallback was requested.
    NotSupported(String),

    /// The data violates a structural requirement, for example a column
    /// group type tag out of range or column indices that are not ascending.
    Invalid(String),

    /// Reading or writing the binary stream failed.
    /// This error can also occur when reading truncated streams,
    /// where the number of bytes to read does not match the input length.
    Io(IoError),
}


impl Error {
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::Invalid(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Error::NotSupported(message.into())
    }
}


/// Enable using the `?` operator on io::Result
impl From<IoError> for Error {
    fn from(error: IoError) -> Self {
        Error::Io(error)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NotSupported(message) => write!(formatter, "not supported: {}", message),
            Error::Invalid(message) => write!(formatter, "invalid: {}", message),
            Error::Io(error) => write!(formatter, "io error: {}", error),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(error) => Some(error),
            _ => None,
        }
    }
}


/// Convert a signed count read from a stream into a usable index,
/// failing for negative values instead of wrapping around.
#[inline]
pub fn i32_to_usize(value: i32, error_message: &'static str) -> Result<usize> {
    if value < 0 { Err(Error::invalid(error_message)) }
    else { Ok(value as usize) }
}

/// Convert an in-memory count to the signed on-disk representation,
/// failing for counts that do not fit.
#[inline]
pub fn usize_to_i32(value: usize, error_message: &'static str) -> Result<i32> {
    if value > i32::MAX as usize { Err(Error::invalid(error_message)) }
    else { Ok(value as i32) }
}

/// Convert a signed 64 bit count read from a stream, failing for negative values.
#[inline]
pub fn i64_to_u64(value: i64, error_message: &'static str) -> Result<u64> {
    if value < 0 { Err(Error::invalid(error_message)) }
    else { Ok(value as u64) }
}
