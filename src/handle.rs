//! Kernel file handles.
//!
//! A [`FileHandle`] is the kernel's opaque, reboot-stable reference to an
//! inode, together with the id of the mount it was resolved against. The
//! mount id is checked before every open: a handle never opens through a
//! descriptor on some other filesystem.

use std::os::fd::AsFd;
use std::os::fd::AsRawFd;
use std::os::fd::OwnedFd;
use std::path::Path;

use nix::fcntl::OFlag;
use smallvec::SmallVec;

use crate::error::Error;
use crate::error::Result;
use crate::interrupt::Interrupt;
use crate::sys;
use crate::sys::abi;

/// Largest handle payload the kernel hands out.
pub const MAX_HANDLE_SZ: usize = abi::MAX_HANDLE_SZ;

const UNIQUE_MOUNT_ID_FLAG: u8 = 0x01;

/// A persistent reference to an inode, pinned to the mount it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(serde::Serialize, serde::Deserialize))]
pub struct FileHandle {
    handle_type: i32,
    bytes: SmallVec<[u8; MAX_HANDLE_SZ]>,
    mount_id: u64,
    unique_mount_id: bool,
}

impl FileHandle {
    /// Resolves a handle for `path`, not following a trailing symlink.
    pub fn from_path(path: &Path, intr: &Interrupt) -> Result<Self> {
        let c_path = sys::cstring(path)?;
        let raw = sys::name_to_handle(intr, libc::AT_FDCWD, &c_path, 0)
            .map_err(|err| err.with_path(path))?;
        Ok(Self::from_raw(raw))
    }

    /// Resolves a handle for an already-open descriptor.
    pub fn from_fd(fd: impl AsFd, intr: &Interrupt) -> Result<Self> {
        let raw = sys::name_to_handle(intr, fd.as_fd().as_raw_fd(), c"", libc::AT_EMPTY_PATH)?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: sys::RawHandle) -> Self {
        Self {
            handle_type: raw.handle_type,
            bytes: SmallVec::from_slice(&raw.bytes),
            mount_id: raw.mount_id,
            unique_mount_id: raw.unique,
        }
    }

    /// Mount id recorded at resolution time.
    pub fn mount_id(&self) -> u64 {
        self.mount_id
    }

    /// Whether [`mount_id`](Self::mount_id) is the unique 64-bit id rather
    /// than the legacy 32-bit one.
    pub fn has_unique_mount_id(&self) -> bool {
        self.unique_mount_id
    }

    /// Filesystem-specific handle type.
    pub fn handle_type(&self) -> i32 {
        self.handle_type
    }

    /// The opaque handle payload.
    pub fn handle_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Opens the object this handle refers to.
    ///
    /// `mount_fd` must be a descriptor on the mount the handle was resolved
    /// against; its mount id is compared to the recorded one first, and a
    /// mismatch fails with [`Error::MountMismatch`] without entering
    /// `open_by_handle_at`. Requires `CAP_DAC_READ_SEARCH`.
    pub fn open(&self, mount_fd: impl AsFd, flags: OFlag, intr: &Interrupt) -> Result<OwnedFd> {
        let mount_fd = mount_fd.as_fd();
        let mask = if self.unique_mount_id {
            abi::STATX_MNT_ID_UNIQUE
        } else {
            abi::STATX_MNT_ID
        };
        let stx = sys::statx(
            intr,
            mount_fd.as_raw_fd(),
            c"",
            libc::AT_EMPTY_PATH,
            mask,
        )?;
        if self.unique_mount_id && stx.stx_mask & abi::STATX_MNT_ID_UNIQUE == 0 {
            return Err(Error::Unsupported {
                what: "unique mount id",
            });
        }
        if stx.stx_mnt_id != self.mount_id {
            return Err(Error::MountMismatch {
                recorded: self.mount_id,
                actual: stx.stx_mnt_id,
            });
        }
        sys::open_by_handle(
            intr,
            mount_fd.as_raw_fd(),
            self.handle_type,
            &self.bytes,
            flags,
        )
    }

    /// Serializes the handle: `(handle_bytes, handle_type, data)` followed
    /// by the mount id and its flavor flag.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.bytes.len() + 9);
        out.extend_from_slice(&(self.bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.handle_type.to_le_bytes());
        out.extend_from_slice(&self.bytes);
        out.extend_from_slice(&self.mount_id.to_le_bytes());
        out.push(if self.unique_mount_id {
            UNIQUE_MOUNT_ID_FLAG
        } else {
            0
        });
        out
    }

    /// Decodes a buffer produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < 8 {
            return Err(Error::BadHandle {
                reason: "buffer shorter than header",
            });
        }
        let len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        let handle_type = i32::from_le_bytes(buf[4..8].try_into().unwrap());
        if len > MAX_HANDLE_SZ {
            return Err(Error::BadHandle {
                reason: "handle payload exceeds MAX_HANDLE_SZ",
            });
        }
        if buf.len() != 8 + len + 9 {
            return Err(Error::BadHandle {
                reason: "buffer length does not match payload",
            });
        }
        let bytes = SmallVec::from_slice(&buf[8..8 + len]);
        let mount_id = u64::from_le_bytes(buf[8 + len..16 + len].try_into().unwrap());
        let flags = buf[16 + len];
        if flags & !UNIQUE_MOUNT_ID_FLAG != 0 {
            return Err(Error::BadHandle {
                reason: "unknown flag bits",
            });
        }
        Ok(Self {
            handle_type,
            bytes,
            mount_id,
            unique_mount_id: flags & UNIQUE_MOUNT_ID_FLAG != 0,
        })
    }
}
