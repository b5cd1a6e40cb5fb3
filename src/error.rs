//! Error taxonomy for the composite filesystem core (spec §7).
//!
//! Generalizes the teacher's flat `NfsError` status-code enum into a
//! `thiserror`-derived type carrying the plugin-specific payload and a
//! Win32-equivalent code the bridge can surface to callers.

use std::io;

use thiserror::Error;

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, CompositeError>;

/// Opaque error code reported by a `SourceMount` implementation. The core
/// never interprets this value, only forwards it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginErrorCode(pub i32);

/// Taxonomy from spec §7.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompositeError {
    #[error("path not found")]
    NotExists,

    #[error("path already exists")]
    AlreadyExists,

    #[error("access denied")]
    AccessDenied,

    #[error("invalid rename: {reason}")]
    InvalidRename { reason: &'static str },

    #[error("source plugin error: {0:?}")]
    PluginError(PluginErrorCode),

    #[error("metadata store is corrupt: {0}")]
    MetadataCorrupt(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal invariant violation: {0}")]
    Internal(String),
}

impl CompositeError {
    /// Win32-equivalent code the bridge can surface to its caller, matching
    /// the "each composite error may carry a Win32-equivalent code" clause
    /// in spec §6.
    pub fn win32_code(&self) -> u32 {
        match self {
            CompositeError::NotExists => 2,           // ERROR_FILE_NOT_FOUND
            CompositeError::AlreadyExists => 183,      // ERROR_ALREADY_EXISTS
            CompositeError::AccessDenied => 5,         // ERROR_ACCESS_DENIED
            CompositeError::InvalidRename { .. } => 87, // ERROR_INVALID_PARAMETER
            CompositeError::PluginError(_) => 1, // ERROR_INVALID_FUNCTION
            CompositeError::MetadataCorrupt(_) => 1392, // ERROR_FILE_CORRUPT
            CompositeError::Cancelled => 1223,         // ERROR_CANCELLED
            CompositeError::Internal(_) => 31,         // ERROR_GEN_FAILURE
        }
    }
}

/// Maps a host `io::Error` onto the closest taxonomy member, the same role
/// `examples/shadow_fs/fs/utils.rs::map_io_error` plays for `NfsError`.
pub fn map_io_error(err: io::Error) -> CompositeError {
    use io::ErrorKind::*;
    match err.kind() {
        NotFound => CompositeError::NotExists,
        PermissionDenied => CompositeError::AccessDenied,
        AlreadyExists => CompositeError::AlreadyExists,
        _ => CompositeError::PluginError(PluginErrorCode(
            err.raw_os_error().unwrap_or(-1),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_maps_to_not_exists() {
        let err = io::Error::new(io::ErrorKind::NotFound, "nope");
        assert_eq!(map_io_error(err), CompositeError::NotExists);
    }

    #[test]
    fn win32_codes_are_stable() {
        assert_eq!(CompositeError::NotExists.win32_code(), 2);
        assert_eq!(CompositeError::AccessDenied.win32_code(), 5);
    }
}
