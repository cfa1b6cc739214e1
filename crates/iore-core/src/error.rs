use std::io;

use thiserror::Error;

/// IORE error type covering configuration, partitioning and backend I/O.
#[derive(Debug, Error)]
pub enum IoreError {
    /// A configuration parameter failed validation.
    #[error("'{param}': {reason}")]
    Config { param: String, reason: String },

    /// Distribution parameters could not build a PRNG stream.
    #[error("PRNG: {0}")]
    Prng(String),

    /// Offset or dataset partitioning could not be computed.
    #[error("partition: {0}")]
    Partition(String),

    /// OS-level I/O error with errno value
    #[error("I/O error (errno={0})")]
    Io(i32),

    /// A request moved fewer bytes than asked for.
    #[error("short transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: u64, actual: u64 },

    /// An MPI call returned an error code.
    #[error("MPI {op}: {reason}")]
    Mpi { op: &'static str, reason: String },

    /// Malformed experiment file.
    #[error("JSON: {0}")]
    Json(String),

    #[error("invalid argument")]
    InvalidArgument,

    #[error("not found")]
    NotFound,

    #[error("permission denied")]
    PermissionDenied,

    /// Operation not supported by this backend
    #[error("not supported")]
    NotSupported,

    #[error("unknown error")]
    Unknown,
}

impl IoreError {
    pub fn config(param: impl Into<String>, reason: impl Into<String>) -> Self {
        IoreError::Config {
            param: param.into(),
            reason: reason.into(),
        }
    }

    /// True for errors detected before any I/O is attempted.
    pub fn is_config(&self) -> bool {
        matches!(self, IoreError::Config { .. } | IoreError::Json(_))
    }
}

impl From<io::Error> for IoreError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => IoreError::NotFound,
            io::ErrorKind::PermissionDenied => IoreError::PermissionDenied,
            io::ErrorKind::InvalidInput => IoreError::InvalidArgument,
            io::ErrorKind::Unsupported => IoreError::NotSupported,
            _ => {
                if let Some(errno) = e.raw_os_error() {
                    IoreError::Io(errno)
                } else {
                    IoreError::Unknown
                }
            }
        }
    }
}

impl From<serde_json::Error> for IoreError {
    fn from(e: serde_json::Error) -> Self {
        IoreError::Json(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let e: IoreError = io::Error::from(io::ErrorKind::NotFound).into();
        assert!(matches!(e, IoreError::NotFound));

        let e: IoreError = io::Error::from_raw_os_error(5).into();
        assert!(matches!(e, IoreError::Io(5)));
    }

    #[test]
    fn test_config_display() {
        let e = IoreError::config("dim_divs", "product must equal num_tasks");
        assert_eq!(e.to_string(), "'dim_divs': product must equal num_tasks");
        assert!(e.is_config());
        assert!(!IoreError::Partition("x".into()).is_config());
    }
}
