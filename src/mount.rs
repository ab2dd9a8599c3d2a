//! Thin, typed wrappers over the new-style mount syscalls.
//!
//! These stay close to the kernel: typed flags in, file descriptors out, no
//! policy. The filesystem-context pipeline (`fsopen` → `fsconfig` →
//! `fsmount`) is modelled as [`FsContext`] so the fd and its configuration
//! state cannot be confused with a mount fd.

use std::fmt;
use std::os::fd::AsFd;
use std::os::fd::AsRawFd;
use std::os::fd::OwnedFd;
use std::path::Path;

use bitflags::bitflags;

use crate::error::Result;
use crate::interrupt::Interrupt;
use crate::sys;
use crate::sys::abi;

bitflags! {
    /// `open_tree` flags, including the `AT_*` lookup modifiers the call
    /// accepts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenTreeFlags: u64 {
        /// Detach a new mount clone instead of picking the existing mount.
        const CLONE = abi::OPEN_TREE_CLONE;
        /// Close the returned fd on exec.
        const CLOEXEC = abi::OPEN_TREE_CLOEXEC;
        /// Clone the whole subtree.
        const RECURSIVE = libc::AT_RECURSIVE as u64;
        /// Operate on the dirfd itself (empty path).
        const EMPTY_PATH = libc::AT_EMPTY_PATH as u64;
        /// Don't trigger automounts on the final component.
        const NO_AUTOMOUNT = libc::AT_NO_AUTOMOUNT as u64;
        /// Don't follow a trailing symlink.
        const SYMLINK_NOFOLLOW = libc::AT_SYMLINK_NOFOLLOW as u64;
    }
}

bitflags! {
    /// `move_mount` flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MoveMountFlags: u32 {
        /// Follow symlinks on the source path.
        const F_SYMLINKS = abi::MOVE_MOUNT_F_SYMLINKS;
        /// Follow automounts on the source path.
        const F_AUTOMOUNTS = abi::MOVE_MOUNT_F_AUTOMOUNTS;
        /// Source path is empty (move the dirfd itself).
        const F_EMPTY_PATH = abi::MOVE_MOUNT_F_EMPTY_PATH;
        /// Follow symlinks on the target path.
        const T_SYMLINKS = abi::MOVE_MOUNT_T_SYMLINKS;
        /// Follow automounts on the target path.
        const T_AUTOMOUNTS = abi::MOVE_MOUNT_T_AUTOMOUNTS;
        /// Target path is empty (move onto the dirfd itself).
        const T_EMPTY_PATH = abi::MOVE_MOUNT_T_EMPTY_PATH;
        /// Join the source's propagation group.
        const SET_GROUP = abi::MOVE_MOUNT_SET_GROUP;
        /// Mount beneath the top mount of the target stack.
        const BENEATH = abi::MOVE_MOUNT_BENEATH;
    }
}

bitflags! {
    /// Per-mount attributes for `mount_setattr` and `fsmount`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MountAttrFlags: u64 {
        /// Read-only mount.
        const RDONLY = abi::MOUNT_ATTR_RDONLY;
        /// Ignore suid/sgid bits.
        const NOSUID = abi::MOUNT_ATTR_NOSUID;
        /// Disallow access to device nodes.
        const NODEV = abi::MOUNT_ATTR_NODEV;
        /// Disallow program execution.
        const NOEXEC = abi::MOUNT_ATTR_NOEXEC;
        /// Update atime relative to mtime/ctime.
        const RELATIME = abi::MOUNT_ATTR_RELATIME;
        /// Do not update access times.
        const NOATIME = abi::MOUNT_ATTR_NOATIME;
        /// Always update access times.
        const STRICTATIME = abi::MOUNT_ATTR_STRICTATIME;
        /// Do not update directory access times.
        const NODIRATIME = abi::MOUNT_ATTR_NODIRATIME;
        /// Do not follow symlinks on this mount.
        const NOSYMFOLLOW = abi::MOUNT_ATTR_NOSYMFOLLOW;
    }
}

bitflags! {
    /// `umount2` flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UnmountFlags: i32 {
        /// Force unmount even if busy.
        const FORCE = libc::MNT_FORCE;
        /// Lazy detach: remove from the namespace now, clean up later.
        const DETACH = libc::MNT_DETACH;
        /// Mark the mount as expired.
        const EXPIRE = libc::MNT_EXPIRE;
        /// Don't dereference a trailing symlink.
        const NOFOLLOW = libc::UMOUNT_NOFOLLOW;
    }
}

bitflags! {
    /// `renameat2` flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RenameFlags: u32 {
        /// Don't overwrite the target of the rename.
        const NOREPLACE = libc::RENAME_NOREPLACE;
        /// Atomically exchange the two paths.
        const EXCHANGE = libc::RENAME_EXCHANGE;
        /// Whiteout the source (overlayfs).
        const WHITEOUT = libc::RENAME_WHITEOUT;
    }
}

impl fmt::Display for RenameFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.bits(), f)
    }
}

/// Picks up a mount (or a detached clone of it) as a mount fd.
pub fn open_tree(path: &Path, flags: OpenTreeFlags, intr: &Interrupt) -> Result<OwnedFd> {
    let c_path = sys::cstring(path)?;
    sys::open_tree(intr, libc::AT_FDCWD, &c_path, flags.bits())
        .map_err(|err| err.with_path(path))
}

/// Attaches the mount object behind `mount_fd` at `target`.
pub fn move_mount(
    mount_fd: impl AsFd,
    target: &Path,
    flags: MoveMountFlags,
    intr: &Interrupt,
) -> Result<()> {
    let c_target = sys::cstring(target)?;
    sys::move_mount(
        intr,
        mount_fd.as_fd().as_raw_fd(),
        c"",
        libc::AT_FDCWD,
        &c_target,
        (flags | MoveMountFlags::F_EMPTY_PATH).bits(),
    )
    .map_err(|err| err.with_path(target))
}

/// Changes mount attributes on `path`, optionally for the whole subtree.
pub fn mount_setattr(
    path: &Path,
    set: MountAttrFlags,
    clear: MountAttrFlags,
    recursive: bool,
    intr: &Interrupt,
) -> Result<()> {
    let c_path = sys::cstring(path)?;
    let attr = abi::mount_attr {
        attr_set: set.bits(),
        attr_clr: clear.bits(),
        propagation: 0,
        userns_fd: 0,
    };
    let at_flags = if recursive {
        libc::AT_RECURSIVE as libc::c_uint
    } else {
        0
    };
    sys::mount_setattr(intr, libc::AT_FDCWD, &c_path, at_flags, &attr)
        .map_err(|err| err.with_path(path))
}

/// Sets the propagation type of the mount at `path` (`MS_PRIVATE`,
/// `MS_SHARED`, `MS_SLAVE` or `MS_UNBINDABLE`).
pub fn set_propagation(path: &Path, ms_flag: u64, recursive: bool, intr: &Interrupt) -> Result<()> {
    let c_path = sys::cstring(path)?;
    let attr = abi::mount_attr {
        attr_set: 0,
        attr_clr: 0,
        propagation: ms_flag,
        userns_fd: 0,
    };
    let at_flags = if recursive {
        libc::AT_RECURSIVE as libc::c_uint
    } else {
        0
    };
    sys::mount_setattr(intr, libc::AT_FDCWD, &c_path, at_flags, &attr)
        .map_err(|err| err.with_path(path))
}

/// Detaches or unmounts the mount at `path`.
pub fn unmount(path: &Path, flags: UnmountFlags, intr: &Interrupt) -> Result<()> {
    sys::umount2(
        intr,
        path,
        nix::mount::MntFlags::from_bits_truncate(flags.bits()),
    )
    .map_err(|err| err.with_path(path))
}

/// `renameat2` relative to the working directory.
pub fn renameat2(old: &Path, new: &Path, flags: RenameFlags, intr: &Interrupt) -> Result<()> {
    let c_old = sys::cstring(old)?;
    let c_new = sys::cstring(new)?;
    sys::renameat2(
        intr,
        libc::AT_FDCWD,
        &c_old,
        libc::AT_FDCWD,
        &c_new,
        flags.bits(),
    )
    .map_err(|err| err.with_path(old))
}

/// Atomically exchanges two paths.
pub fn rename_exchange(a: &Path, b: &Path, intr: &Interrupt) -> Result<()> {
    renameat2(a, b, RenameFlags::EXCHANGE, intr)
}

/// An in-progress filesystem context: `fsopen` has been called, `fsconfig`
/// parameters may be applied, and `mount` produces the mount fd.
pub struct FsContext {
    fd: OwnedFd,
    intr: Interrupt,
}

impl fmt::Debug for FsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsContext")
            .field("fd", &self.fd.as_raw_fd())
            .finish()
    }
}

impl FsContext {
    /// Starts configuring a new superblock of the named filesystem type.
    pub fn open(fstype: &str, intr: &Interrupt) -> Result<Self> {
        let c_type = sys::cstring(Path::new(fstype))?;
        let fd = sys::fsopen(intr, &c_type, abi::FSOPEN_CLOEXEC)?;
        Ok(Self {
            fd,
            intr: intr.clone(),
        })
    }

    /// Sets a boolean parameter.
    pub fn set_flag(&self, key: &str) -> Result<()> {
        let c_key = sys::cstring(Path::new(key))?;
        sys::fsconfig(
            &self.intr,
            self.fd.as_raw_fd(),
            abi::FSCONFIG_SET_FLAG,
            Some(&c_key),
            None,
            0,
        )
    }

    /// Sets a string parameter, e.g. `source`.
    pub fn set_string(&self, key: &str, value: &str) -> Result<()> {
        let c_key = sys::cstring(Path::new(key))?;
        let c_value = sys::cstring(Path::new(value))?;
        sys::fsconfig(
            &self.intr,
            self.fd.as_raw_fd(),
            abi::FSCONFIG_SET_STRING,
            Some(&c_key),
            Some(&c_value),
            0,
        )
    }

    /// Sets an fd-valued parameter.
    pub fn set_fd(&self, key: &str, fd: impl AsFd) -> Result<()> {
        let c_key = sys::cstring(Path::new(key))?;
        sys::fsconfig(
            &self.intr,
            self.fd.as_raw_fd(),
            abi::FSCONFIG_SET_FD,
            Some(&c_key),
            None,
            fd.as_fd().as_raw_fd(),
        )
    }

    /// Creates the superblock from the accumulated configuration.
    pub fn create(&self) -> Result<()> {
        sys::fsconfig(
            &self.intr,
            self.fd.as_raw_fd(),
            abi::FSCONFIG_CMD_CREATE,
            None,
            None,
            0,
        )
    }

    /// Produces a detached mount fd for the created superblock; attach it
    /// with [`move_mount`].
    pub fn mount(&self, attrs: MountAttrFlags) -> Result<OwnedFd> {
        sys::fsmount(
            &self.intr,
            self.fd.as_raw_fd(),
            abi::FSMOUNT_CLOEXEC,
            attrs.bits(),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn move_mount_always_moves_the_fd_itself() {
        // The wrapper pins F_EMPTY_PATH so the source is the mount fd.
        let flags = MoveMountFlags::T_SYMLINKS;
        assert!(
            (flags | MoveMountFlags::F_EMPTY_PATH).contains(MoveMountFlags::F_EMPTY_PATH)
        );
    }

    #[test]
    fn unmount_flags_map_to_mnt_flags() {
        let flags = UnmountFlags::DETACH | UnmountFlags::NOFOLLOW;
        let nix_flags = nix::mount::MntFlags::from_bits_truncate(flags.bits());
        assert!(nix_flags.contains(nix::mount::MntFlags::MNT_DETACH));
        assert!(nix_flags.contains(nix::mount::MntFlags::UMOUNT_NOFOLLOW));
    }
}
