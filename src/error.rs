//! Error types for transpose operations

use thiserror::Error;

/// Main error type for transpose and store operations
#[derive(Error, Debug)]
pub enum TransposeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Raster store driver not found: {0}")]
    DriverNotFound(String),

    #[error("Can't open source {0} for reading")]
    NotFound(String),

    #[error("Input {path} is not a {expected} dataset (opened by {driver})")]
    NotTiledRaster {
        path: String,
        expected: String,
        driver: String,
    },

    #[error("Source is not a 3-rd dimension dataset: {0}")]
    NotThreeDimensional(String),

    #[error("Failed to allocate buffer of size {bytes}")]
    Allocation { bytes: usize },

    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    #[error("Invalid dataset format: {0}")]
    InvalidFormat(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Raster store error: {0}")]
    Store(String),
}

impl TransposeError {
    /// Process exit code for this error
    ///
    /// 1 is a usage error, 2 an input of the wrong shape or format, 3 a
    /// failed working buffer allocation and 4 anything raised while reading
    /// or writing data.
    pub fn exit_code(&self) -> u8 {
        match self {
            TransposeError::Usage(_) => 1,
            TransposeError::DriverNotFound(_)
            | TransposeError::NotFound(_)
            | TransposeError::NotTiledRaster { .. }
            | TransposeError::NotThreeDimensional(_) => 2,
            TransposeError::Allocation { .. } => 3,
            _ => 4,
        }
    }
}

/// Specialized Result type for transpose operations
pub type Result<T> = std::result::Result<T, TransposeError>;

impl From<serde_json::Error> for TransposeError {
    fn from(err: serde_json::Error) -> Self {
        TransposeError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(TransposeError::Usage("two paths".into()).exit_code(), 1);
        assert_eq!(
            TransposeError::NotThreeDimensional("in".into()).exit_code(),
            2
        );
        assert_eq!(TransposeError::NotFound("in".into()).exit_code(), 2);
        assert_eq!(TransposeError::Allocation { bytes: 16 }.exit_code(), 3);
        assert_eq!(TransposeError::Store("write".into()).exit_code(), 4);
    }

    #[test]
    fn test_allocation_message_carries_size() {
        let err = TransposeError::Allocation { bytes: 1048576 };
        assert_eq!(err.to_string(), "Failed to allocate buffer of size 1048576");
    }
}
