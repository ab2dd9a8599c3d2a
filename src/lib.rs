//! Safe, typed access to Linux filesystem and mount primitives.
//!
//! This crate wraps the pieces of the Linux kernel interface that portable
//! standard libraries leave out, for storage-management software that needs
//! them: mount enumeration (`listmount`/`statmount`), `openat2` with strict
//! resolve scoping, `statx`, reboot-stable file handles, NFSv4 and POSIX.1e
//! ACLs on open descriptors, and a depth-first iterator over a single
//! mounted filesystem that never crosses a mount boundary or follows a
//! symlink.
//!
//! All operations are synchronous and safe to call from multiple threads;
//! nothing in the crate holds process-wide mutable state. Long-running
//! calls take an [`Interrupt`] token and abandon the operation when it is
//! raised during a signal retry.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

#[cfg(not(target_os = "linux"))]
compile_error!("this crate wraps Linux-only kernel interfaces");

pub mod acl;
mod error;
mod handle;
mod interrupt;
mod iter;
mod mount;
mod mount_info;
mod stat;
mod sys;
mod xattr;

pub use crate::acl::Acl;
pub use crate::acl::AclError;
pub use crate::acl::fgetacl;
pub use crate::acl::fsetacl;
pub use crate::error::Error;
pub use crate::error::Result;
pub use crate::handle::FileHandle;
pub use crate::handle::MAX_HANDLE_SZ;
pub use crate::interrupt::Interrupt;
pub use crate::iter::DIR_STACK_LIMIT;
pub use crate::iter::DirStackEntry;
pub use crate::iter::DirStackSnapshot;
pub use crate::iter::FsIter;
pub use crate::iter::FsIterBuilder;
pub use crate::iter::IterEntry;
pub use crate::iter::IterStats;
pub use crate::iter::ProgressFn;
pub use crate::mount::FsContext;
pub use crate::mount::MountAttrFlags;
pub use crate::mount::MoveMountFlags;
pub use crate::mount::OpenTreeFlags;
pub use crate::mount::RenameFlags;
pub use crate::mount::UnmountFlags;
pub use crate::mount::mount_setattr;
pub use crate::mount::move_mount;
pub use crate::mount::open_tree;
pub use crate::mount::rename_exchange;
pub use crate::mount::renameat2;
pub use crate::mount::set_propagation;
pub use crate::mount::unmount;
pub use crate::mount_info::MOUNT_NS_ROOT;
pub use crate::mount_info::MountId;
pub use crate::mount_info::StatmountMask;
pub use crate::mount_info::StatmountRecord;
pub use crate::mount_info::mount_ids;
pub use crate::mount_info::mount_ids_under;
pub use crate::mount_info::statmount;
pub use crate::stat::DeviceId;
pub use crate::stat::StatxRecord;
pub use crate::stat::StatxTimestamp;
pub use crate::stat::statx_fd;
pub use crate::stat::statx_path;

/// File kinds, as reported by the `statx` mode word.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serializable", derive(serde::Serialize, serde::Deserialize))]
pub enum FileKind {
    /// Named pipe (`S_IFIFO`)
    NamedPipe,
    /// Character device (`S_IFCHR`)
    CharDevice,
    /// Block device (`S_IFBLK`)
    BlockDevice,
    /// Directory (`S_IFDIR`)
    Directory,
    /// Regular file (`S_IFREG`)
    RegularFile,
    /// Symbolic link (`S_IFLNK`)
    Symlink,
    /// Unix domain socket (`S_IFSOCK`)
    Socket,
}

impl FileKind {
    /// Classifies a `stx_mode` word.
    pub fn from_mode(mode: u16) -> Option<Self> {
        match u32::from(mode) & libc::S_IFMT {
            libc::S_IFIFO => Some(FileKind::NamedPipe),
            libc::S_IFCHR => Some(FileKind::CharDevice),
            libc::S_IFBLK => Some(FileKind::BlockDevice),
            libc::S_IFDIR => Some(FileKind::Directory),
            libc::S_IFREG => Some(FileKind::RegularFile),
            libc::S_IFLNK => Some(FileKind::Symlink),
            libc::S_IFSOCK => Some(FileKind::Socket),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn file_kind_from_mode() {
        assert_eq!(
            FileKind::from_mode((libc::S_IFDIR | 0o755) as u16),
            Some(FileKind::Directory)
        );
        assert_eq!(
            FileKind::from_mode((libc::S_IFREG | 0o644) as u16),
            Some(FileKind::RegularFile)
        );
        assert_eq!(
            FileKind::from_mode((libc::S_IFLNK | 0o777) as u16),
            Some(FileKind::Symlink)
        );
        assert_eq!(FileKind::from_mode(0), None);
    }
}
