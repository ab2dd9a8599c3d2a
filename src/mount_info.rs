//! Mount enumeration and per-mount details.
//!
//! `listmount` walks the mount ids of the caller's namespace and `statmount`
//! describes one mount. String fields live at offsets into a trailing buffer
//! of the kernel reply; each is surfaced only when the caller requested it
//! and the kernel's reply mask confirms it was filled.

use std::ffi::OsStr;
use std::ffi::OsString;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use bitflags::bitflags;
use nix::errno::Errno;
use zerocopy::FromBytes;

use crate::error::Error;
use crate::error::Result;
use crate::interrupt::Interrupt;
use crate::stat::DeviceId;
use crate::sys;
use crate::sys::abi;

/// Kernel identifier for one mount. Stable for the lifetime of the mount
/// namespace.
pub type MountId = u64;

/// Root of the caller's mount namespace, usable wherever a [`MountId`] is
/// expected.
pub const MOUNT_NS_ROOT: MountId = abi::LSMT_ROOT;

bitflags! {
    /// Field groups that `statmount` can report.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatmountMask: u64 {
        /// Superblock basics: device, magic, flags.
        const SB_BASIC = abi::STATMOUNT_SB_BASIC;
        /// Mount basics: ids, attributes, propagation.
        const MOUNT_BASIC = abi::STATMOUNT_MOUNT_BASIC;
        /// Propagation source.
        const PROPAGATE_FROM = abi::STATMOUNT_PROPAGATE_FROM;
        /// Root of the mount within its filesystem.
        const MNT_ROOT = abi::STATMOUNT_MNT_ROOT;
        /// Mount point path.
        const MNT_POINT = abi::STATMOUNT_MNT_POINT;
        /// Filesystem type name.
        const FS_TYPE = abi::STATMOUNT_FS_TYPE;
        /// Owning mount namespace id.
        const MNT_NS_ID = abi::STATMOUNT_MNT_NS_ID;
        /// Superblock option string.
        const MNT_OPTS = abi::STATMOUNT_MNT_OPTS;
        /// Filesystem subtype name.
        const FS_SUBTYPE = abi::STATMOUNT_FS_SUBTYPE;
        /// Source (device or dataset) the filesystem was mounted from.
        const SB_SOURCE = abi::STATMOUNT_SB_SOURCE;
        /// Options as a string array.
        const OPT_ARRAY = abi::STATMOUNT_OPT_ARRAY;
        /// Security options as a string array.
        const OPT_SEC_ARRAY = abi::STATMOUNT_OPT_SEC_ARRAY;
    }
}

/// Typed view of a `statmount` reply.
///
/// Every field is optional: it is filled only when the caller's request and
/// the kernel's reply mask both cover it.
#[derive(Debug, Clone, Default)]
pub struct StatmountRecord {
    /// The kernel's reply mask.
    pub mask: StatmountMask,
    /// Superblock device number.
    pub sb_dev: Option<DeviceId>,
    /// Superblock magic.
    pub sb_magic: Option<u64>,
    /// Superblock flags (`SB_RDONLY`, ...).
    pub sb_flags: Option<u32>,
    /// Unique mount id.
    pub mnt_id: Option<MountId>,
    /// Unique mount id of the parent mount.
    pub mnt_parent_id: Option<MountId>,
    /// Legacy 32-bit mount id.
    pub mnt_id_old: Option<u32>,
    /// Legacy 32-bit parent mount id.
    pub mnt_parent_id_old: Option<u32>,
    /// `MOUNT_ATTR_*` attributes of the mount.
    pub mnt_attr: Option<u64>,
    /// Propagation type (`MS_SHARED`, ...).
    pub mnt_propagation: Option<u64>,
    /// Peer group id, for shared mounts.
    pub mnt_peer_group: Option<u64>,
    /// Master peer group id, for slave mounts.
    pub mnt_master: Option<u64>,
    /// Closest dominant peer group in the propagation chain.
    pub propagate_from: Option<u64>,
    /// Root of this mount within its filesystem.
    pub mnt_root: Option<PathBuf>,
    /// Path this mount is attached at.
    pub mnt_point: Option<PathBuf>,
    /// Owning mount namespace id.
    pub mnt_ns_id: Option<u64>,
    /// Filesystem type name.
    pub fs_type: Option<OsString>,
    /// Filesystem subtype name.
    pub fs_subtype: Option<OsString>,
    /// Mount source string, e.g. a block device or a ZFS dataset.
    pub sb_source: Option<OsString>,
    /// Superblock options, comma-separated.
    pub mnt_opts: Option<OsString>,
    /// Superblock options, one string per option.
    pub opt_array: Option<Vec<OsString>>,
    /// Security options, one string per option.
    pub opt_sec_array: Option<Vec<OsString>>,
}

fn str_at(strings: &[u8], offset: u32) -> Result<&OsStr> {
    let tail = strings
        .get(offset as usize..)
        .ok_or(Error::sys("statmount", Errno::EINVAL))?;
    let end = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or(Error::sys("statmount", Errno::EINVAL))?;
    Ok(OsStr::from_bytes(&tail[..end]))
}

fn str_array_at(strings: &[u8], offset: u32, count: u32) -> Result<Vec<OsString>> {
    let mut out = Vec::with_capacity(count as usize);
    let mut at = offset;
    for _ in 0..count {
        let item = str_at(strings, at)?;
        at += item.len() as u32 + 1;
        out.push(item.to_os_string());
    }
    Ok(out)
}

fn parse_reply(buf: &[u8], requested: StatmountMask) -> Result<StatmountRecord> {
    let (raw, _) =
        abi::statmount::read_from_prefix(buf).map_err(|_| Error::sys("statmount", Errno::EINVAL))?;
    let used = (raw.size as usize).min(buf.len());
    let strings = &buf[size_of::<abi::statmount>().min(used)..used];
    let mask = StatmountMask::from_bits_truncate(raw.mask) & requested;
    let have = |bit: StatmountMask| mask.contains(bit);

    let mut record = StatmountRecord {
        mask,
        ..Default::default()
    };
    if have(StatmountMask::SB_BASIC) {
        record.sb_dev = Some(DeviceId {
            major: raw.sb_dev_major,
            minor: raw.sb_dev_minor,
        });
        record.sb_magic = Some(raw.sb_magic);
        record.sb_flags = Some(raw.sb_flags);
    }
    if have(StatmountMask::MOUNT_BASIC) {
        record.mnt_id = Some(raw.mnt_id);
        record.mnt_parent_id = Some(raw.mnt_parent_id);
        record.mnt_id_old = Some(raw.mnt_id_old);
        record.mnt_parent_id_old = Some(raw.mnt_parent_id_old);
        record.mnt_attr = Some(raw.mnt_attr);
        record.mnt_propagation = Some(raw.mnt_propagation);
        record.mnt_peer_group = Some(raw.mnt_peer_group);
        record.mnt_master = Some(raw.mnt_master);
    }
    if have(StatmountMask::PROPAGATE_FROM) {
        record.propagate_from = Some(raw.propagate_from);
    }
    if have(StatmountMask::MNT_ROOT) {
        record.mnt_root = Some(PathBuf::from(str_at(strings, raw.mnt_root)?));
    }
    if have(StatmountMask::MNT_POINT) {
        record.mnt_point = Some(PathBuf::from(str_at(strings, raw.mnt_point)?));
    }
    if have(StatmountMask::MNT_NS_ID) {
        record.mnt_ns_id = Some(raw.mnt_ns_id);
    }
    if have(StatmountMask::FS_TYPE) {
        record.fs_type = Some(str_at(strings, raw.fs_type)?.to_os_string());
    }
    if have(StatmountMask::FS_SUBTYPE) {
        record.fs_subtype = Some(str_at(strings, raw.fs_subtype)?.to_os_string());
    }
    if have(StatmountMask::SB_SOURCE) {
        record.sb_source = Some(str_at(strings, raw.sb_source)?.to_os_string());
    }
    if have(StatmountMask::MNT_OPTS) {
        record.mnt_opts = Some(str_at(strings, raw.mnt_opts)?.to_os_string());
    }
    if have(StatmountMask::OPT_ARRAY) {
        record.opt_array = Some(str_array_at(strings, raw.opt_array, raw.opt_num)?);
    }
    if have(StatmountMask::OPT_SEC_ARRAY) {
        record.opt_sec_array = Some(str_array_at(strings, raw.opt_sec_array, raw.opt_sec_num)?);
    }
    Ok(record)
}

/// Describes one mount.
pub fn statmount(mnt_id: MountId, mask: StatmountMask, intr: &Interrupt) -> Result<StatmountRecord> {
    let buf = sys::statmount(intr, mnt_id, mask.bits())?;
    parse_reply(&buf, mask)
}

/// All mount ids in the caller's namespace, in the kernel's tree order.
pub fn mount_ids(intr: &Interrupt) -> Result<Vec<MountId>> {
    mount_ids_under(MOUNT_NS_ROOT, intr)
}

/// Mount ids at and below the given mount.
pub fn mount_ids_under(mnt_id: MountId, intr: &Interrupt) -> Result<Vec<MountId>> {
    const BATCH: usize = 512;
    let mut ids = Vec::new();
    let mut chunk = [0u64; BATCH];
    let mut last = 0;
    loop {
        let got = sys::listmount(intr, mnt_id, last, false, &mut chunk)?;
        ids.extend_from_slice(&chunk[..got]);
        if got < BATCH {
            return Ok(ids);
        }
        last = ids[ids.len() - 1];
    }
}

#[cfg(test)]
mod test {
    use zerocopy::FromZeros;
    use zerocopy::IntoBytes;

    use super::*;

    fn reply_with_strings(
        mask: u64,
        fill: impl FnOnce(&mut abi::statmount),
        strings: &[u8],
    ) -> Vec<u8> {
        let mut raw = abi::statmount::new_zeroed();
        raw.mask = mask;
        fill(&mut raw);
        raw.size = (size_of::<abi::statmount>() + strings.len()) as u32;
        let mut buf = Vec::new();
        buf.extend_from_slice(raw.as_bytes());
        buf.extend_from_slice(strings);
        buf
    }

    #[test]
    fn unrequested_fields_stay_absent() {
        let buf = reply_with_strings(
            abi::STATMOUNT_SB_BASIC | abi::STATMOUNT_MOUNT_BASIC,
            |raw| {
                raw.sb_magic = 0x9123683e;
                raw.mnt_id = 77;
            },
            b"",
        );
        // Caller only asked for SB_BASIC; MOUNT_BASIC in the reply mask
        // must not leak through.
        let record = parse_reply(&buf, StatmountMask::SB_BASIC).unwrap();
        assert_eq!(record.sb_magic, Some(0x9123683e));
        assert_eq!(record.mnt_id, None);
        assert_eq!(record.sb_source, None);
    }

    #[test]
    fn strings_and_arrays_parse_from_offsets() {
        let strings = b"zfs\0tank/home\0rw\0noatime\0";
        let buf = reply_with_strings(
            abi::STATMOUNT_FS_TYPE | abi::STATMOUNT_SB_SOURCE | abi::STATMOUNT_OPT_ARRAY,
            |raw| {
                raw.fs_type = 0;
                raw.sb_source = 4;
                raw.opt_array = 14;
                raw.opt_num = 2;
            },
            strings,
        );
        let mask = StatmountMask::FS_TYPE | StatmountMask::SB_SOURCE | StatmountMask::OPT_ARRAY;
        let record = parse_reply(&buf, mask).unwrap();
        assert_eq!(record.fs_type.as_deref(), Some(OsStr::new("zfs")));
        assert_eq!(record.sb_source.as_deref(), Some(OsStr::new("tank/home")));
        assert_eq!(
            record.opt_array,
            Some(vec![OsString::from("rw"), OsString::from("noatime")])
        );
    }

    #[test]
    fn truncated_string_area_is_rejected() {
        let buf = reply_with_strings(
            abi::STATMOUNT_SB_SOURCE,
            |raw| raw.sb_source = 100,
            b"short\0",
        );
        assert!(parse_reply(&buf, StatmountMask::SB_SOURCE).is_err());
    }

    #[test]
    fn unterminated_string_is_rejected() {
        let buf = reply_with_strings(abi::STATMOUNT_FS_TYPE, |raw| raw.fs_type = 0, b"zfs");
        assert!(parse_reply(&buf, StatmountMask::FS_TYPE).is_err());
    }
}
