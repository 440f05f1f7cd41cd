use std::{
    error::Error,
    fmt::{self, Display},
};

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a cache upcall operation.
pub type CacheResult<T> = Result<T, CacheError>;

/// An error that occurred while servicing a kernel cache upcall.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The request line was missing a field or carried an unparsable one.
    /// Answered negatively, never retried.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The fsid byte string does not have the fixed length its type requires.
    #[error("invalid fsid length {len} for fsid type {fsid_type}")]
    InvalidFsidLength {
        /// The numeric fsid type tag from the request.
        fsid_type: u8,
        /// The length of the supplied fsid byte string.
        len: usize,
    },

    /// The fsid type tag is outside the known range.
    #[error("unknown fsid type: {0}")]
    UnknownFsidType(u32),

    /// The composed reply record would exceed the channel buffer capacity.
    /// The write is aborted rather than truncated.
    #[error("reply record exceeds channel buffer capacity")]
    EncodingOverflow,

    /// The kernel accepted fewer bytes than the composed record.
    #[error("short write to cache channel: {written} of {len} bytes")]
    ShortWrite {
        /// Bytes the kernel accepted.
        written: usize,
        /// Bytes in the composed record.
        len: usize,
    },

    /// The matched path cannot be exported, e.g. its filesystem cannot
    /// produce a usable identity.
    #[error("path not exportable: {0}")]
    NotExportable(String),

    /// An error that occurred when performing an IO operation.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error returned by a system call.
    #[error("system error: {0}")]
    Sys(#[from] nix::Error),

    /// Custom error.
    #[error("Custom error: {0}")]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CacheError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> CacheError {
        CacheError::Custom(AnyError {
            error: error.into(),
        })
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `CacheResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> CacheResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
