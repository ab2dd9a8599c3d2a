//! Semantic mapping of `statx`.
//!
//! The kernel reply is copied field-for-field into [`StatxRecord`]; anything
//! the kernel did not mark valid in `stx_mask` is surfaced as absent rather
//! than zero. Timestamps are exposed both as fractional seconds and as total
//! nanoseconds, and device numbers both split and packed.

use std::os::fd::AsFd;
use std::os::fd::AsRawFd;
use std::path::Path;

use crate::FileKind;
use crate::error::Result;
use crate::interrupt::Interrupt;
use crate::sys;
use crate::sys::abi;

/// Mask requested for every statx this crate performs.
pub(crate) const REQUEST_MASK: u32 = abi::STATX_BASIC_STATS
    | abi::STATX_BTIME
    | abi::STATX_MNT_ID
    | abi::STATX_MNT_ID_UNIQUE
    | abi::STATX_DIOALIGN
    | abi::STATX_SUBVOL;

/// One `statx` timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatxTimestamp {
    /// Seconds since the epoch.
    pub secs: i64,
    /// Nanoseconds within the second.
    pub nanos: u32,
}

impl StatxTimestamp {
    /// The timestamp as fractional seconds.
    pub fn as_secs_f64(&self) -> f64 {
        self.secs as f64 + f64::from(self.nanos) * 1e-9
    }

    /// The timestamp as total nanoseconds since the epoch.
    pub fn total_nanos(&self) -> i128 {
        i128::from(self.secs) * 1_000_000_000 + i128::from(self.nanos)
    }

    fn from_raw(ts: &abi::statx_timestamp) -> Self {
        Self {
            secs: ts.tv_sec,
            nanos: ts.tv_nsec,
        }
    }
}

/// A device number, split and packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceId {
    /// Major number.
    pub major: u32,
    /// Minor number.
    pub minor: u32,
}

impl DeviceId {
    /// The packed `dev_t` form.
    pub fn packed(&self) -> u64 {
        libc::makedev(self.major, self.minor)
    }
}

/// Typed view of a `statx` reply.
///
/// Fields the kernel did not report are `None`; `dev` and `rdev` are always
/// filled by the kernel and carried unconditionally.
#[derive(Debug, Clone)]
pub struct StatxRecord {
    mask: u32,
    /// Preferred I/O block size.
    pub blksize: u32,
    /// `STATX_ATTR_*` attribute bits, with their validity mask.
    pub attributes: u64,
    /// Which bits of `attributes` the filesystem actually supports.
    pub attributes_mask: u64,
    /// Hard link count.
    pub nlink: Option<u32>,
    /// Owning uid.
    pub uid: Option<u32>,
    /// Owning gid.
    pub gid: Option<u32>,
    /// File type and permission bits.
    pub mode: Option<u16>,
    /// Inode number.
    pub ino: Option<u64>,
    /// Size in bytes.
    pub size: Option<u64>,
    /// Allocated 512-byte blocks.
    pub blocks: Option<u64>,
    /// Last access time.
    pub atime: Option<StatxTimestamp>,
    /// Birth (creation) time.
    pub btime: Option<StatxTimestamp>,
    /// Last status change time.
    pub ctime: Option<StatxTimestamp>,
    /// Last modification time.
    pub mtime: Option<StatxTimestamp>,
    /// Device this file represents, for device nodes.
    pub rdev: DeviceId,
    /// Device containing the file.
    pub dev: DeviceId,
    /// Mount id of the containing mount.
    pub mnt_id: Option<u64>,
    /// Whether `mnt_id` is the unique 64-bit id rather than the legacy one.
    pub mnt_id_unique: bool,
    /// Direct I/O memory alignment, where reported.
    pub dio_mem_align: Option<u32>,
    /// Direct I/O offset alignment, where reported.
    pub dio_offset_align: Option<u32>,
    /// Subvolume id (btrfs/bcachefs), where reported.
    pub subvol: Option<u64>,
}

impl StatxRecord {
    pub(crate) fn from_raw(raw: &abi::statx) -> Self {
        let got = |bit: u32| raw.stx_mask & bit != 0;
        Self {
            mask: raw.stx_mask,
            blksize: raw.stx_blksize,
            attributes: raw.stx_attributes,
            attributes_mask: raw.stx_attributes_mask,
            nlink: got(abi::STATX_NLINK).then_some(raw.stx_nlink),
            uid: got(abi::STATX_UID).then_some(raw.stx_uid),
            gid: got(abi::STATX_GID).then_some(raw.stx_gid),
            mode: got(abi::STATX_TYPE | abi::STATX_MODE).then_some(raw.stx_mode),
            ino: got(abi::STATX_INO).then_some(raw.stx_ino),
            size: got(abi::STATX_SIZE).then_some(raw.stx_size),
            blocks: got(abi::STATX_BLOCKS).then_some(raw.stx_blocks),
            atime: got(abi::STATX_ATIME).then(|| StatxTimestamp::from_raw(&raw.stx_atime)),
            btime: got(abi::STATX_BTIME).then(|| StatxTimestamp::from_raw(&raw.stx_btime)),
            ctime: got(abi::STATX_CTIME).then(|| StatxTimestamp::from_raw(&raw.stx_ctime)),
            mtime: got(abi::STATX_MTIME).then(|| StatxTimestamp::from_raw(&raw.stx_mtime)),
            rdev: DeviceId {
                major: raw.stx_rdev_major,
                minor: raw.stx_rdev_minor,
            },
            dev: DeviceId {
                major: raw.stx_dev_major,
                minor: raw.stx_dev_minor,
            },
            mnt_id: got(abi::STATX_MNT_ID | abi::STATX_MNT_ID_UNIQUE).then_some(raw.stx_mnt_id),
            mnt_id_unique: got(abi::STATX_MNT_ID_UNIQUE),
            dio_mem_align: got(abi::STATX_DIOALIGN).then_some(raw.stx_dio_mem_align),
            dio_offset_align: got(abi::STATX_DIOALIGN).then_some(raw.stx_dio_offset_align),
            subvol: got(abi::STATX_SUBVOL).then_some(raw.stx_subvol),
        }
    }

    /// The raw `stx_mask` of the reply.
    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// The file's kind, when the kernel reported its type.
    pub fn kind(&self) -> Option<FileKind> {
        self.mode.and_then(FileKind::from_mode)
    }

    /// Whether this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind() == Some(FileKind::Directory)
    }

    /// Whether this file sits on the root of its mount.
    pub fn is_mount_root(&self) -> bool {
        self.attributes_mask & abi::STATX_ATTR_MOUNT_ROOT != 0
            && self.attributes & abi::STATX_ATTR_MOUNT_ROOT != 0
    }
}

/// `statx` on an open descriptor.
pub fn statx_fd(fd: impl AsFd, intr: &Interrupt) -> Result<StatxRecord> {
    let raw = sys::statx(
        intr,
        fd.as_fd().as_raw_fd(),
        c"",
        libc::AT_EMPTY_PATH | libc::AT_SYMLINK_NOFOLLOW,
        REQUEST_MASK,
    )?;
    Ok(StatxRecord::from_raw(&raw))
}

/// `statx` by path, never following a trailing symlink.
pub fn statx_path(path: &Path, intr: &Interrupt) -> Result<StatxRecord> {
    let c_path = sys::cstring(path)?;
    let raw = sys::statx(
        intr,
        libc::AT_FDCWD,
        &c_path,
        libc::AT_SYMLINK_NOFOLLOW,
        REQUEST_MASK,
    )
    .map_err(|err| err.with_path(path))?;
    Ok(StatxRecord::from_raw(&raw))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn absent_fields_are_none_not_zero() {
        let mut raw = abi::statx::default();
        raw.stx_mask = abi::STATX_INO | abi::STATX_SIZE;
        raw.stx_ino = 42;
        raw.stx_size = 4096;
        raw.stx_nlink = 3;
        let record = StatxRecord::from_raw(&raw);
        assert_eq!(record.ino, Some(42));
        assert_eq!(record.size, Some(4096));
        assert_eq!(record.nlink, None);
        assert_eq!(record.btime, None);
        assert_eq!(record.mode, None);
        assert!(record.kind().is_none());
    }

    #[test]
    fn timestamp_dual_forms() {
        let ts = StatxTimestamp {
            secs: 5,
            nanos: 500_000_000,
        };
        assert_eq!(ts.as_secs_f64(), 5.5);
        assert_eq!(ts.total_nanos(), 5_500_000_000);
        let negative = StatxTimestamp { secs: -2, nanos: 0 };
        assert_eq!(negative.total_nanos(), -2_000_000_000);
    }

    #[test]
    fn device_id_packs() {
        let dev = DeviceId { major: 8, minor: 1 };
        assert_eq!(dev.packed(), libc::makedev(8, 1));
    }

    #[test]
    fn unique_mount_id_flag_tracks_mask() {
        let mut raw = abi::statx::default();
        raw.stx_mask = abi::STATX_MNT_ID_UNIQUE;
        raw.stx_mnt_id = 0xdead_beef;
        let record = StatxRecord::from_raw(&raw);
        assert_eq!(record.mnt_id, Some(0xdead_beef));
        assert!(record.mnt_id_unique);

        raw.stx_mask = abi::STATX_MNT_ID;
        let record = StatxRecord::from_raw(&raw);
        assert_eq!(record.mnt_id, Some(0xdead_beef));
        assert!(!record.mnt_id_unique);
    }
}
