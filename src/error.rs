//! Storage error taxonomy and boundary mappings.

use thiserror::Error;

/// Errors surfaced by the storage engine and the remote client.
///
/// Remote failures are folded into this closed set at the client boundary;
/// the kernel bridge converts them to errno values via [`StorageError::errno`].
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("the specified object does not exist")]
    NotFound,
    #[error("the range specified is invalid for the current size of the object")]
    InvalidRange,
    #[error("this request is not authorized to perform this operation")]
    PermissionDenied,
    #[error("the object is under an active lease")]
    UnderLease,
    #[error("a precondition on the request was not met")]
    PreconditionFailed,
    #[error("the specified object already exists")]
    AlreadyExists,
    #[error("md5 sum mismatch on download")]
    Md5Mismatch,
    #[error("buffer is too large to upload to a block object")]
    TooLarge,
    #[error("remote operation failed: {0}")]
    Io(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("operation not supported")]
    Unsupported,
}

impl StorageError {
    /// Creates a catch-all remote failure.
    pub fn io(message: impl Into<String>) -> Self {
        StorageError::Io(message.into())
    }

    /// Maps an HTTP response to the taxonomy.
    ///
    /// `code` is the service error code (`x-ms-error-code` header), which
    /// disambiguates statuses like 409 that cover both lease conflicts and
    /// existing resources.
    pub fn from_response(status: u16, code: Option<&str>) -> Self {
        if let Some(code) = code {
            if code.starts_with("Lease") {
                return StorageError::UnderLease;
            }
            match code {
                "BlobNotFound" | "ContainerNotFound" | "ResourceNotFound" => {
                    return StorageError::NotFound
                }
                "BlobAlreadyExists" | "ContainerAlreadyExists" | "ResourceAlreadyExists" => {
                    return StorageError::AlreadyExists
                }
                "Md5Mismatch" => return StorageError::Md5Mismatch,
                "InvalidRange" => return StorageError::InvalidRange,
                _ => {}
            }
        }

        match status {
            404 => StorageError::NotFound,
            403 => StorageError::PermissionDenied,
            409 => StorageError::AlreadyExists,
            412 => StorageError::PreconditionFailed,
            416 => StorageError::InvalidRange,
            _ => StorageError::Io(format!("unexpected status {status}")),
        }
    }

    /// Errno for the kernel bridge boundary.
    pub fn errno(&self) -> i32 {
        match self {
            StorageError::NotFound => libc::ENOENT,
            StorageError::InvalidRange => libc::ERANGE,
            StorageError::PermissionDenied => libc::EPERM,
            StorageError::UnderLease => libc::EIO,
            StorageError::PreconditionFailed => libc::EIO,
            StorageError::AlreadyExists => libc::EEXIST,
            StorageError::Md5Mismatch => libc::EIO,
            StorageError::TooLarge => libc::EIO,
            StorageError::Io(_) => libc::EIO,
            StorageError::Cancelled => libc::EINTR,
            StorageError::Unsupported => libc::ENOTSUP,
        }
    }

    /// True when the error indicates the object is missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound)
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StorageError::Io(format!("request timed out: {err}"))
        } else {
            StorageError::Io(err.to_string())
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
