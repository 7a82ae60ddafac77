//! Error taxonomy shared by every layer
//!
//! Each variant maps to a stable negative integer code (0 is success), so
//! terminal codes can be stored in the operation registry, handed to
//! callbacks and compared cheaply.

use thiserror::Error;

/// Errors returned by contexts, drivers, the theme resolver and the caches
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KaError {
    #[error("Operation not supported")]
    NotSupported,

    #[error("Invalid argument")]
    Invalid,

    /// Operation not valid in the current lifecycle phase
    #[error("Invalid state")]
    State,

    #[error("Out of memory")]
    Oom,

    #[error("No such driver")]
    NoDriver,

    #[error("System error")]
    System,

    /// Malformed cache record, theme index or audio data
    #[error("File or data corrupt")]
    Corrupt,

    #[error("File or data too large")]
    TooBig,

    #[error("File or data not found")]
    NotFound,

    /// Callback-only: the owning context was destroyed
    #[error("Destroyed")]
    Destroyed,

    /// Callback-only: the request was canceled
    #[error("Canceled")]
    Canceled,

    #[error("Not available")]
    NotAvailable,

    #[error("Access forbidden")]
    Access,

    #[error("IO error")]
    Io,

    #[error("Internal error")]
    Internal,

    /// The event sound was explicitly disabled
    #[error("Sound disabled")]
    Disabled,

    /// The context was used from a forked child process
    #[error("Process forked")]
    Forked,

    #[error("Disconnected")]
    Disconnected,
}

/// Result type for all kanberra operations
pub type KaResult<T> = Result<T, KaError>;

const ALL: [KaError; 18] = [
    KaError::NotSupported,
    KaError::Invalid,
    KaError::State,
    KaError::Oom,
    KaError::NoDriver,
    KaError::System,
    KaError::Corrupt,
    KaError::TooBig,
    KaError::NotFound,
    KaError::Destroyed,
    KaError::Canceled,
    KaError::NotAvailable,
    KaError::Access,
    KaError::Io,
    KaError::Internal,
    KaError::Disabled,
    KaError::Forked,
    KaError::Disconnected,
];

impl KaError {
    /// Soft errors drive fallback: the driver loader and the theme search
    /// move on to the next candidate instead of aborting.
    pub fn is_soft(self) -> bool {
        matches!(self, KaError::NoDriver | KaError::NotAvailable | KaError::NotFound)
    }

    /// Stable numeric code (always negative)
    pub fn code(self) -> i32 {
        match ALL.iter().position(|e| *e == self) {
            Some(idx) => -(idx as i32) - 1,
            None => -15,
        }
    }

    /// Inverse of [`KaError::code`]. Returns `None` for 0 and unknown codes.
    pub fn from_code(code: i32) -> Option<KaError> {
        if code >= 0 {
            return None;
        }
        ALL.get((-code - 1) as usize).copied()
    }
}

/// Numeric code of a result: 0 for success, the error code otherwise
pub fn result_code(result: &KaResult<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.code(),
    }
}

/// Human readable text for a numeric code, `None` if the code is unknown
pub fn strerror(code: i32) -> Option<&'static str> {
    if code == 0 {
        return Some("Success");
    }
    KaError::from_code(code).map(|e| match e {
        KaError::NotSupported => "Operation not supported",
        KaError::Invalid => "Invalid argument",
        KaError::State => "Invalid state",
        KaError::Oom => "Out of memory",
        KaError::NoDriver => "No such driver",
        KaError::System => "System error",
        KaError::Corrupt => "File or data corrupt",
        KaError::TooBig => "File or data too large",
        KaError::NotFound => "File or data not found",
        KaError::Destroyed => "Destroyed",
        KaError::Canceled => "Canceled",
        KaError::NotAvailable => "Not available",
        KaError::Access => "Access forbidden",
        KaError::Io => "IO error",
        KaError::Internal => "Internal error",
        KaError::Disabled => "Sound disabled",
        KaError::Forked => "Process forked",
        KaError::Disconnected => "Disconnected",
    })
}

impl From<std::io::Error> for KaError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::NotFound => KaError::NotFound,
            ErrorKind::PermissionDenied => KaError::Access,
            ErrorKind::Unsupported => KaError::NotSupported,
            ErrorKind::OutOfMemory => KaError::Oom,
            ErrorKind::InvalidData | ErrorKind::UnexpectedEof => KaError::Corrupt,
            _ => KaError::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for e in ALL {
            assert!(e.code() < 0);
            assert_eq!(KaError::from_code(e.code()), Some(e));
        }
        assert_eq!(KaError::NotSupported.code(), -1);
        assert_eq!(KaError::Disconnected.code(), -18);
        assert_eq!(KaError::from_code(0), None);
        assert_eq!(KaError::from_code(-19), None);
    }

    #[test]
    fn test_strerror_matches_display() {
        assert_eq!(strerror(0), Some("Success"));
        for e in ALL {
            assert_eq!(strerror(e.code()), Some(e.to_string().as_str()));
        }
        assert_eq!(strerror(-100), None);
    }

    #[test]
    fn test_soft_errors() {
        assert!(KaError::NotFound.is_soft());
        assert!(KaError::NoDriver.is_soft());
        assert!(KaError::NotAvailable.is_soft());
        assert!(!KaError::Corrupt.is_soft());
        assert!(!KaError::Oom.is_soft());
    }

    #[test]
    fn test_io_error_mapping() {
        let e = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(KaError::from(e), KaError::NotFound);
        let e = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        assert_eq!(KaError::from(e), KaError::Access);
        let e = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert_eq!(KaError::from(e), KaError::Io);
    }
}
