/// All errors that can occur within the engine.
///
/// Four discriminated kinds cover every failure mode:
/// - `InvalidArgument` — malformed shapes, incompatible operands, wrong rank
///   for an initializer, device mismatch, non-scalar loss.
/// - `ResourceExhausted` — a device could not allocate storage.
/// - `InvalidState` — use of an invalid (default-constructed) tensor,
///   releasing an unknown storage handle, a node index from another graph.
/// - `NotImplemented` — optional kernels a device does not provide.
///
/// Memory leaks detected at device destruction are NOT represented here:
/// they are programmer errors and abort the process with a diagnostic.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An argument violates the operation's contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A device failed to allocate storage.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// An object is not in a state that permits the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The operation is not supported by this device.
    #[error("not implemented: {0}")]
    NotImplemented(String),
}

impl Error {
    /// Create an `InvalidArgument` error from any message.
    pub fn invalid_argument(s: impl Into<String>) -> Self {
        Error::InvalidArgument(s.into())
    }

    /// Create a `ResourceExhausted` error from any message.
    pub fn resource_exhausted(s: impl Into<String>) -> Self {
        Error::ResourceExhausted(s.into())
    }

    /// Create an `InvalidState` error from any message.
    pub fn invalid_state(s: impl Into<String>) -> Self {
        Error::InvalidState(s.into())
    }

    /// Create a `NotImplemented` error from any message.
    pub fn not_implemented(s: impl Into<String>) -> Self {
        Error::NotImplemented(s.into())
    }
}

/// Convenience Result type used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted `InvalidArgument` error.
/// Usage: `bail!("incompatible shapes: {} vs {}", a, b)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::InvalidArgument(format!($($arg)*)))
    };
}
