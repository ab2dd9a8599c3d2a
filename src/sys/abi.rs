//! Kernel interface definitions.
//!
//! Raw structures and constants for the Linux syscalls this crate consumes
//! that are not (or not reliably) exposed through libc: `statx`,
//! `statmount`/`listmount`, `openat2`, the new-style mount API and the
//! file-handle calls. Layouts mirror the kernel uapi headers; structures
//! that the kernel fills are declared append-only exactly as the uapi does,
//! so their sizes are frozen.

#![allow(missing_docs)]
#![allow(non_camel_case_types)]
#![allow(unreachable_pub)]
// The full kernel constant set is mirrored even where the crate does not
// consume every value yet.
#![allow(dead_code)]

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

// `statmount`/`listmount` (Linux 6.8) carry the same number on every
// 64-bit architecture; libc has not always shipped them.
pub const SYS_STATMOUNT: libc::c_long = 457;
pub const SYS_LISTMOUNT: libc::c_long = 458;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct statx_timestamp {
    pub tv_sec: i64,
    pub tv_nsec: u32,
    pub __reserved: i32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct statx {
    pub stx_mask: u32,
    pub stx_blksize: u32,
    pub stx_attributes: u64,
    pub stx_nlink: u32,
    pub stx_uid: u32,
    pub stx_gid: u32,
    pub stx_mode: u16,
    pub __spare0: [u16; 1],
    pub stx_ino: u64,
    pub stx_size: u64,
    pub stx_blocks: u64,
    pub stx_attributes_mask: u64,
    pub stx_atime: statx_timestamp,
    pub stx_btime: statx_timestamp,
    pub stx_ctime: statx_timestamp,
    pub stx_mtime: statx_timestamp,
    pub stx_rdev_major: u32,
    pub stx_rdev_minor: u32,
    pub stx_dev_major: u32,
    pub stx_dev_minor: u32,
    pub stx_mnt_id: u64,
    pub stx_dio_mem_align: u32,
    pub stx_dio_offset_align: u32,
    pub stx_subvol: u64,
    pub stx_atomic_write_unit_min: u32,
    pub stx_atomic_write_unit_max: u32,
    pub stx_atomic_write_segments_max: u32,
    pub stx_dio_read_offset_align: u32,
    pub __spare3: [u64; 9],
}

pub const STATX_TYPE: u32 = 0x0001;
pub const STATX_MODE: u32 = 0x0002;
pub const STATX_NLINK: u32 = 0x0004;
pub const STATX_UID: u32 = 0x0008;
pub const STATX_GID: u32 = 0x0010;
pub const STATX_ATIME: u32 = 0x0020;
pub const STATX_MTIME: u32 = 0x0040;
pub const STATX_CTIME: u32 = 0x0080;
pub const STATX_INO: u32 = 0x0100;
pub const STATX_SIZE: u32 = 0x0200;
pub const STATX_BLOCKS: u32 = 0x0400;
pub const STATX_BASIC_STATS: u32 = 0x07ff;
pub const STATX_BTIME: u32 = 0x0800;
pub const STATX_MNT_ID: u32 = 0x1000;
pub const STATX_DIOALIGN: u32 = 0x2000;
pub const STATX_MNT_ID_UNIQUE: u32 = 0x4000;
pub const STATX_SUBVOL: u32 = 0x8000;

pub const STATX_ATTR_MOUNT_ROOT: u64 = 0x2000;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, IntoBytes, KnownLayout, Immutable)]
pub struct open_how {
    pub flags: u64,
    pub mode: u64,
    pub resolve: u64,
}

pub const OPEN_HOW_SIZE_VER0: usize = 24;

pub const RESOLVE_NO_XDEV: u64 = 0x01;
pub const RESOLVE_NO_MAGICLINKS: u64 = 0x02;
pub const RESOLVE_NO_SYMLINKS: u64 = 0x04;
pub const RESOLVE_BENEATH: u64 = 0x08;
pub const RESOLVE_IN_ROOT: u64 = 0x10;
pub const RESOLVE_CACHED: u64 = 0x20;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, IntoBytes, KnownLayout, Immutable)]
pub struct mnt_id_req {
    pub size: u32,
    pub spare: u32,
    pub mnt_id: u64,
    pub param: u64,
    pub mnt_ns_id: u64,
}

pub const MNT_ID_REQ_SIZE_VER1: u32 = 32;

/// Fixed part of the kernel's `struct statmount` reply. Strings referenced
/// by the offset fields live in the byte area that follows it.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct statmount {
    pub size: u32,
    pub mnt_opts: u32,
    pub mask: u64,
    pub sb_dev_major: u32,
    pub sb_dev_minor: u32,
    pub sb_magic: u64,
    pub sb_flags: u32,
    pub fs_type: u32,
    pub mnt_id: u64,
    pub mnt_parent_id: u64,
    pub mnt_id_old: u32,
    pub mnt_parent_id_old: u32,
    pub mnt_attr: u64,
    pub mnt_propagation: u64,
    pub mnt_peer_group: u64,
    pub mnt_master: u64,
    pub propagate_from: u64,
    pub mnt_root: u32,
    pub mnt_point: u32,
    pub mnt_ns_id: u64,
    pub fs_subtype: u32,
    pub sb_source: u32,
    pub opt_num: u32,
    pub opt_array: u32,
    pub opt_sec_num: u32,
    pub opt_sec_array: u32,
    pub __spare2: [u64; 46],
}

pub const STATMOUNT_SB_BASIC: u64 = 0x0001;
pub const STATMOUNT_MOUNT_BASIC: u64 = 0x0002;
pub const STATMOUNT_PROPAGATE_FROM: u64 = 0x0004;
pub const STATMOUNT_MNT_ROOT: u64 = 0x0008;
pub const STATMOUNT_MNT_POINT: u64 = 0x0010;
pub const STATMOUNT_FS_TYPE: u64 = 0x0020;
pub const STATMOUNT_MNT_NS_ID: u64 = 0x0040;
pub const STATMOUNT_MNT_OPTS: u64 = 0x0080;
pub const STATMOUNT_FS_SUBTYPE: u64 = 0x0100;
pub const STATMOUNT_SB_SOURCE: u64 = 0x0200;
pub const STATMOUNT_OPT_ARRAY: u64 = 0x0400;
pub const STATMOUNT_OPT_SEC_ARRAY: u64 = 0x0800;

pub const LSMT_ROOT: u64 = 0xffff_ffff_ffff_ffff;
pub const LISTMOUNT_REVERSE: u64 = 0x01;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, IntoBytes, KnownLayout, Immutable)]
pub struct mount_attr {
    pub attr_set: u64,
    pub attr_clr: u64,
    pub propagation: u64,
    pub userns_fd: u64,
}

pub const MOUNT_ATTR_SIZE_VER0: usize = 32;

pub const MOUNT_ATTR_RDONLY: u64 = 0x0000_0001;
pub const MOUNT_ATTR_NOSUID: u64 = 0x0000_0002;
pub const MOUNT_ATTR_NODEV: u64 = 0x0000_0004;
pub const MOUNT_ATTR_NOEXEC: u64 = 0x0000_0008;
pub const MOUNT_ATTR__ATIME: u64 = 0x0000_0070;
pub const MOUNT_ATTR_RELATIME: u64 = 0x0000_0000;
pub const MOUNT_ATTR_NOATIME: u64 = 0x0000_0010;
pub const MOUNT_ATTR_STRICTATIME: u64 = 0x0000_0020;
pub const MOUNT_ATTR_NODIRATIME: u64 = 0x0000_0080;
pub const MOUNT_ATTR_IDMAP: u64 = 0x0010_0000;
pub const MOUNT_ATTR_NOSYMFOLLOW: u64 = 0x0020_0000;

pub const OPEN_TREE_CLONE: u64 = 0x01;
pub const OPEN_TREE_CLOEXEC: u64 = libc::O_CLOEXEC as u64;

pub const MOVE_MOUNT_F_SYMLINKS: u32 = 0x0001;
pub const MOVE_MOUNT_F_AUTOMOUNTS: u32 = 0x0002;
pub const MOVE_MOUNT_F_EMPTY_PATH: u32 = 0x0004;
pub const MOVE_MOUNT_T_SYMLINKS: u32 = 0x0010;
pub const MOVE_MOUNT_T_AUTOMOUNTS: u32 = 0x0020;
pub const MOVE_MOUNT_T_EMPTY_PATH: u32 = 0x0040;
pub const MOVE_MOUNT_SET_GROUP: u32 = 0x0100;
pub const MOVE_MOUNT_BENEATH: u32 = 0x0200;

pub const FSOPEN_CLOEXEC: u32 = 0x01;
pub const FSMOUNT_CLOEXEC: u32 = 0x01;

pub const FSCONFIG_SET_FLAG: u32 = 0;
pub const FSCONFIG_SET_STRING: u32 = 1;
pub const FSCONFIG_SET_BINARY: u32 = 2;
pub const FSCONFIG_SET_PATH: u32 = 3;
pub const FSCONFIG_SET_PATH_EMPTY: u32 = 4;
pub const FSCONFIG_SET_FD: u32 = 5;
pub const FSCONFIG_CMD_CREATE: u32 = 6;
pub const FSCONFIG_CMD_RECONFIGURE: u32 = 7;

/// Header of the kernel's variable-length `struct file_handle`; the opaque
/// handle bytes follow it.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct file_handle_header {
    pub handle_bytes: u32,
    pub handle_type: i32,
}

pub const MAX_HANDLE_SZ: usize = 128;

pub const AT_HANDLE_FID: libc::c_int = 0x200;
pub const AT_HANDLE_MNT_ID_UNIQUE: libc::c_int = 0x001;

#[cfg(test)]
mod test {
    use std::mem::size_of;

    use super::*;

    // uapi sizes are frozen; the kernel rejects or misfills anything else.
    #[test]
    fn abi_sizes() {
        assert_eq!(size_of::<statx_timestamp>(), 16);
        assert_eq!(size_of::<statx>(), 256);
        assert_eq!(size_of::<open_how>(), OPEN_HOW_SIZE_VER0);
        assert_eq!(size_of::<mnt_id_req>(), MNT_ID_REQ_SIZE_VER1 as usize);
        assert_eq!(size_of::<statmount>(), 512);
        assert_eq!(size_of::<mount_attr>(), MOUNT_ATTR_SIZE_VER0);
        assert_eq!(size_of::<file_handle_header>(), 8);
    }
}
