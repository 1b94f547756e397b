use thiserror::Error;

/// tokroll error types
#[derive(Error, Debug)]
pub enum TokrollError {
    /// File I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Full-history loader failed during a cache rebuild
    #[error("loader error: {0}")]
    Loader(String),

    /// Pricing table could not be read
    #[error("pricing error: {0}")]
    Pricing(String),
}

/// Result type alias for tokroll
pub type Result<T> = std::result::Result<T, TokrollError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TokrollError::Loader("storage unavailable".into());
        assert_eq!(err.to_string(), "loader error: storage unavailable");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TokrollError = io_err.into();
        assert!(err.to_string().contains("io error"));
    }
}
