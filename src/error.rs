//! Crate-wide error type.

use std::ffi::OsString;
use std::path::Path;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

use crate::acl::AclError;

/// Alias for results produced by this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by this crate.
///
/// Kernel failures keep their errno and, where one is known, the path the
/// operation acted on. Everything else is a library invariant with enough
/// context to identify the failing operation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A syscall failed. Carries the operation name, the errno, and the path
    /// it acted on where one is available.
    #[error("{}", sys_display(.op, .path, .errno))]
    Sys {
        /// Name of the failing syscall.
        op: &'static str,
        /// Path the operation acted on, when known.
        path: Option<PathBuf>,
        /// The raw kernel error.
        errno: Errno,
    },

    /// The caller targeted a non-directory where directory semantics are
    /// required.
    #[error("not a directory: {path:?}")]
    NotADirectory {
        /// The offending path.
        path: PathBuf,
    },

    /// The operation is not available on this filesystem or kernel.
    #[error("{what} is not supported here")]
    Unsupported {
        /// What was attempted.
        what: &'static str,
    },

    /// A file handle was opened against a mount other than the one it was
    /// resolved on.
    #[error("file handle belongs to mount {recorded}, fd is on mount {actual}")]
    MountMismatch {
        /// Mount id recorded in the handle.
        recorded: u64,
        /// Mount id of the fd the open was attempted against.
        actual: u64,
    },

    /// The mounted filesystem's source does not match the expected one.
    #[error("filesystem source mismatch: expected {expected:?}, found {actual:?}")]
    SourceMismatch {
        /// Source the caller asked for.
        expected: OsString,
        /// Source the kernel reported.
        actual: OsString,
    },

    /// The directory stack hit its fixed ceiling.
    #[error("directory depth limit exceeded at {path:?}")]
    DepthExceeded {
        /// Path of the directory that did not fit.
        path: PathBuf,
    },

    /// Mid-traversal resume could not rediscover a saved directory.
    #[error("iterator restore failed at depth {depth} under {path:?}")]
    RestoreFailed {
        /// Stack depth (root is 0) whose cookie went unsatisfied.
        depth: usize,
        /// Path of the directory that was being searched.
        path: PathBuf,
    },

    /// `skip()` was called other than immediately after a directory yield.
    #[error("skip() is only valid immediately after a directory entry")]
    SkipMisplaced,

    /// An ACL value failed to parse or violated a structural rule.
    #[error(transparent)]
    Acl(#[from] AclError),

    /// A serialized file handle could not be decoded.
    #[error("malformed file handle: {reason}")]
    BadHandle {
        /// Why the buffer was rejected.
        reason: &'static str,
    },

    /// Cancellation was observed during a syscall retry.
    #[error("operation interrupted")]
    Interrupted,

    /// A progress callback reported failure.
    #[error("progress callback failed")]
    Callback(#[source] Box<dyn std::error::Error + Send + Sync>),
}

fn sys_display(op: &str, path: &Option<PathBuf>, errno: &Errno) -> String {
    match path {
        Some(path) => format!("{op} failed on {path:?}: {errno}"),
        None => format!("{op} failed: {errno}"),
    }
}

impl Error {
    pub(crate) fn sys(op: &'static str, errno: Errno) -> Self {
        Error::Sys {
            op,
            path: None,
            errno,
        }
    }

    /// Attaches a path to a kernel error that was raised without one.
    pub(crate) fn with_path(self, path: &Path) -> Self {
        match self {
            Error::Sys {
                op,
                path: None,
                errno,
            } => Error::Sys {
                op,
                path: Some(path.to_path_buf()),
                errno,
            },
            other => other,
        }
    }

    /// The errno carried by a kernel error, if this is one.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Error::Sys { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}
