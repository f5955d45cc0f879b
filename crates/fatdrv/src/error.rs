//! The error taxonomy of the driver.
//!
//! Device-level failures are kept separate from filesystem-level failures:
//! a [`DeviceError`] is whatever the block device reported, an [`Error`] is
//! what the driver makes of it in context.

/// Errors reported by a block device implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// The transfer failed.
    #[error("device I/O failed")]
    Io,
    /// A write was attempted on read-only media.
    #[error("device is read-only")]
    ReadOnly,
    /// The requested sector range lies outside the media.
    #[error("sector out of range")]
    OutOfRange,
}

impl DeviceError {
    /// Translates a C-style driver return code.
    ///
    /// `0` is success, `-3` means the media rejected a write, anything else
    /// is a plain I/O failure.
    pub fn from_code(code: i32) -> Result<(), DeviceError> {
        match code {
            0 => Ok(()),
            -3 => Err(DeviceError::ReadOnly),
            _ => Err(DeviceError::Io),
        }
    }
}

/// Errors that can occur when operating on a FAT volume.
///
/// These should not be ignored: `Device` and `Corrupted` can surface at any
/// point, and `Eof` is the expected completion signal of directory iteration
/// and of reads at end-of-file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// An API precondition was violated.
    #[error("invalid parameter")]
    InvalidParam,
    /// An allocation failed; no state was changed.
    #[error("out of memory")]
    NoMemory,
    /// The block device reported a failure.
    #[error("device error: {0}")]
    Device(DeviceError),
    /// Boot sector signature or field validation failed.
    #[error("invalid boot sector")]
    InvalidBootSector,
    /// The cluster count classified as none of FAT12/16/32.
    #[error("unsupported FAT type")]
    UnsupportedFatType,
    /// The file or directory does not exist.
    #[error("not found")]
    NotFound,
    /// The file or directory already exists.
    #[error("already exists")]
    AlreadyExists,
    /// A file was used where a directory is required.
    #[error("not a directory")]
    NotADirectory,
    /// A directory was used where a file is required.
    #[error("is a directory")]
    IsADirectory,
    /// The directory still has entries.
    #[error("directory not empty")]
    DirectoryNotEmpty,
    /// The allocator found no free cluster.
    #[error("disk full")]
    DiskFull,
    /// The file would exceed the variant's size limit.
    #[error("file too large")]
    FileTooLarge,
    /// A cluster number lies outside the valid range.
    #[error("invalid cluster number")]
    InvalidCluster,
    /// The on-disk structures are inconsistent.
    #[error("filesystem corrupted")]
    Corrupted,
    /// A mutation was attempted on read-only media or a read-only file.
    #[error("read-only")]
    ReadOnly,
    /// Directory iteration is exhausted, or a read started at end-of-file.
    #[error("end of file")]
    Eof,
}

impl From<DeviceError> for Error {
    fn from(value: DeviceError) -> Self {
        match value {
            DeviceError::ReadOnly => Error::ReadOnly,
            DeviceError::Io | DeviceError::OutOfRange => Error::Device(value),
        }
    }
}
