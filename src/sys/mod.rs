//! Syscall shims.
//!
//! Every blocking call funnels through [`retry`]: retry on `EINTR` unless
//! the caller's [`Interrupt`] token has been raised, in which case the
//! operation is abandoned and [`Error::Interrupted`] surfaces. Wrappers stay
//! thin; semantic mapping of the returned data lives with the callers.

pub(crate) mod abi;

use std::ffi::CStr;
use std::ffi::CString;
use std::os::fd::FromRawFd;
use std::os::fd::OwnedFd;
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use log::debug;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use zerocopy::FromBytes;

use crate::error::Error;
use crate::error::Result;
use crate::interrupt::Interrupt;

/// `openat2` restarts `RESOLVE_*` lookups with `EAGAIN` when the path
/// mutates underneath it; give up after this many restarts.
const MAX_RESOLVE_RESTARTS: u32 = 16;

/// The uniform signal-safe syscall loop.
pub(crate) fn retry<T>(
    intr: &Interrupt,
    op: &'static str,
    mut f: impl FnMut() -> nix::Result<T>,
) -> Result<T> {
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(Errno::EINTR) => intr.check()?,
            Err(errno) => return Err(Error::sys(op, errno)),
        }
    }
}

pub(crate) fn cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| Error::sys("path", Errno::EINVAL))
}

pub(crate) fn openat2(
    intr: &Interrupt,
    dirfd: RawFd,
    name: &CStr,
    flags: OFlag,
    resolve: u64,
) -> Result<OwnedFd> {
    let how = abi::open_how {
        flags: (flags | OFlag::O_CLOEXEC).bits() as u64,
        mode: 0,
        resolve,
    };
    let mut restarts = 0;
    loop {
        let res = retry(intr, "openat2", || {
            Errno::result(unsafe {
                libc::syscall(
                    libc::SYS_openat2,
                    dirfd,
                    name.as_ptr(),
                    &how as *const abi::open_how,
                    abi::OPEN_HOW_SIZE_VER0,
                )
            })
        });
        match res {
            Ok(fd) => return Ok(unsafe { OwnedFd::from_raw_fd(fd as RawFd) }),
            Err(err) if err.errno() == Some(Errno::EAGAIN) && restarts < MAX_RESOLVE_RESTARTS => {
                restarts += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

pub(crate) fn statx(
    intr: &Interrupt,
    dirfd: RawFd,
    path: &CStr,
    flags: libc::c_int,
    mask: u32,
) -> Result<abi::statx> {
    let mut buf = abi::statx::default();
    retry(intr, "statx", || {
        Errno::result(unsafe {
            libc::syscall(
                libc::SYS_statx,
                dirfd,
                path.as_ptr(),
                flags,
                mask,
                &mut buf as *mut abi::statx,
            )
        })
    })?;
    Ok(buf)
}

/// Raw `statmount` reply buffer. Starts at 1 KiB and grows by 4 KiB on
/// `EOVERFLOW` until the reply fits.
pub(crate) fn statmount(intr: &Interrupt, mnt_id: u64, mask: u64) -> Result<Vec<u8>> {
    let req = abi::mnt_id_req {
        size: abi::MNT_ID_REQ_SIZE_VER1,
        spare: 0,
        mnt_id,
        param: mask,
        mnt_ns_id: 0,
    };
    let mut buf = vec![0u8; 1024];
    loop {
        let res = retry(intr, "statmount", || {
            Errno::result(unsafe {
                libc::syscall(
                    abi::SYS_STATMOUNT,
                    &req as *const abi::mnt_id_req,
                    buf.as_mut_ptr(),
                    buf.len(),
                    0u32,
                )
            })
        });
        match res {
            Ok(_) => return Ok(buf),
            Err(err) if err.errno() == Some(Errno::EOVERFLOW) => {
                let grown = buf.len() + 4096;
                debug!("statmount reply overflow, growing buffer to {grown}");
                buf.resize(grown, 0);
            }
            Err(err) if err.errno() == Some(Errno::ENOSYS) => {
                return Err(Error::Unsupported { what: "statmount" });
            }
            Err(err) => return Err(err),
        }
    }
}

/// One `listmount` batch; returns how many ids were written to `out`.
pub(crate) fn listmount(
    intr: &Interrupt,
    mnt_id: u64,
    last_mnt_id: u64,
    reverse: bool,
    out: &mut [u64],
) -> Result<usize> {
    let req = abi::mnt_id_req {
        size: abi::MNT_ID_REQ_SIZE_VER1,
        spare: 0,
        mnt_id,
        param: last_mnt_id,
        mnt_ns_id: 0,
    };
    let flags: libc::c_uint = if reverse {
        abi::LISTMOUNT_REVERSE as libc::c_uint
    } else {
        0
    };
    let written = retry(intr, "listmount", || {
        Errno::result(unsafe {
            libc::syscall(
                abi::SYS_LISTMOUNT,
                &req as *const abi::mnt_id_req,
                out.as_mut_ptr(),
                out.len(),
                flags,
            )
        })
    })
    .map_err(|err| match err.errno() {
        Some(Errno::ENOSYS) => Error::Unsupported { what: "listmount" },
        _ => err,
    })?;
    Ok(written as usize)
}

pub(crate) struct RawHandle {
    pub(crate) handle_type: i32,
    pub(crate) bytes: Vec<u8>,
    pub(crate) mount_id: u64,
    pub(crate) unique: bool,
}

/// `name_to_handle_at`, preferring the unique 64-bit mount id and falling
/// back to the legacy 32-bit one on kernels that reject the flag.
pub(crate) fn name_to_handle(
    intr: &Interrupt,
    dirfd: RawFd,
    path: &CStr,
    at_flags: libc::c_int,
) -> Result<RawHandle> {
    match name_to_handle_call(intr, dirfd, path, at_flags | abi::AT_HANDLE_MNT_ID_UNIQUE, true) {
        Err(err) if err.errno() == Some(Errno::EINVAL) => {
            name_to_handle_call(intr, dirfd, path, at_flags, false)
        }
        other => other,
    }
}

fn name_to_handle_call(
    intr: &Interrupt,
    dirfd: RawFd,
    path: &CStr,
    at_flags: libc::c_int,
    unique: bool,
) -> Result<RawHandle> {
    let mut buf = [0u8; size_of::<abi::file_handle_header>() + abi::MAX_HANDLE_SZ];
    let header = abi::file_handle_header {
        handle_bytes: abi::MAX_HANDLE_SZ as u32,
        handle_type: 0,
    };
    buf[..size_of::<abi::file_handle_header>()].copy_from_slice(zerocopy::IntoBytes::as_bytes(&header));
    let mut mount_id_unique: u64 = 0;
    let mut mount_id_legacy: libc::c_int = 0;
    retry(intr, "name_to_handle_at", || {
        let mount_id_ptr: *mut libc::c_void = if unique {
            (&mut mount_id_unique as *mut u64).cast()
        } else {
            (&mut mount_id_legacy as *mut libc::c_int).cast()
        };
        Errno::result(unsafe {
            libc::syscall(
                libc::SYS_name_to_handle_at,
                dirfd,
                path.as_ptr(),
                buf.as_mut_ptr(),
                mount_id_ptr,
                at_flags,
            )
        })
    })?;
    let (header, rest) = abi::file_handle_header::read_from_prefix(&buf)
        .map_err(|_| Error::sys("name_to_handle_at", Errno::EINVAL))?;
    let len = header.handle_bytes as usize;
    if len > abi::MAX_HANDLE_SZ {
        return Err(Error::sys("name_to_handle_at", Errno::EOVERFLOW));
    }
    Ok(RawHandle {
        handle_type: header.handle_type,
        bytes: rest[..len].to_vec(),
        mount_id: if unique {
            mount_id_unique
        } else {
            mount_id_legacy as u32 as u64
        },
        unique,
    })
}

pub(crate) fn open_by_handle(
    intr: &Interrupt,
    mount_fd: RawFd,
    handle_type: i32,
    handle: &[u8],
    flags: OFlag,
) -> Result<OwnedFd> {
    let mut buf = vec![0u8; size_of::<abi::file_handle_header>() + handle.len()];
    let header = abi::file_handle_header {
        handle_bytes: handle.len() as u32,
        handle_type,
    };
    buf[..size_of::<abi::file_handle_header>()].copy_from_slice(zerocopy::IntoBytes::as_bytes(&header));
    buf[size_of::<abi::file_handle_header>()..].copy_from_slice(handle);
    let fd = retry(intr, "open_by_handle_at", || {
        Errno::result(unsafe {
            libc::syscall(
                libc::SYS_open_by_handle_at,
                mount_fd,
                buf.as_ptr(),
                (flags | OFlag::O_CLOEXEC).bits(),
            )
        })
    })?;
    Ok(unsafe { OwnedFd::from_raw_fd(fd as RawFd) })
}

pub(crate) fn open_tree(
    intr: &Interrupt,
    dirfd: RawFd,
    path: &CStr,
    flags: u64,
) -> Result<OwnedFd> {
    let fd = retry(intr, "open_tree", || {
        Errno::result(unsafe {
            libc::syscall(libc::SYS_open_tree, dirfd, path.as_ptr(), flags as libc::c_uint)
        })
    })?;
    Ok(unsafe { OwnedFd::from_raw_fd(fd as RawFd) })
}

pub(crate) fn move_mount(
    intr: &Interrupt,
    from_dirfd: RawFd,
    from_path: &CStr,
    to_dirfd: RawFd,
    to_path: &CStr,
    flags: u32,
) -> Result<()> {
    retry(intr, "move_mount", || {
        Errno::result(unsafe {
            libc::syscall(
                libc::SYS_move_mount,
                from_dirfd,
                from_path.as_ptr(),
                to_dirfd,
                to_path.as_ptr(),
                flags,
            )
        })
    })
    .map(drop)
}

pub(crate) fn mount_setattr(
    intr: &Interrupt,
    dirfd: RawFd,
    path: &CStr,
    at_flags: libc::c_uint,
    attr: &abi::mount_attr,
) -> Result<()> {
    retry(intr, "mount_setattr", || {
        Errno::result(unsafe {
            libc::syscall(
                libc::SYS_mount_setattr,
                dirfd,
                path.as_ptr(),
                at_flags,
                attr as *const abi::mount_attr,
                abi::MOUNT_ATTR_SIZE_VER0,
            )
        })
    })
    .map(drop)
}

pub(crate) fn fsopen(intr: &Interrupt, fstype: &CStr, flags: u32) -> Result<OwnedFd> {
    let fd = retry(intr, "fsopen", || {
        Errno::result(unsafe { libc::syscall(libc::SYS_fsopen, fstype.as_ptr(), flags) })
    })?;
    Ok(unsafe { OwnedFd::from_raw_fd(fd as RawFd) })
}

pub(crate) fn fsconfig(
    intr: &Interrupt,
    fd: RawFd,
    cmd: u32,
    key: Option<&CStr>,
    value: Option<&CStr>,
    aux: libc::c_int,
) -> Result<()> {
    let key_ptr = key.map_or(std::ptr::null(), CStr::as_ptr);
    let value_ptr = value.map_or(std::ptr::null(), CStr::as_ptr);
    retry(intr, "fsconfig", || {
        Errno::result(unsafe {
            libc::syscall(libc::SYS_fsconfig, fd, cmd, key_ptr, value_ptr, aux)
        })
    })
    .map(drop)
}

pub(crate) fn fsmount(intr: &Interrupt, fd: RawFd, flags: u32, mount_attrs: u64) -> Result<OwnedFd> {
    let mount_fd = retry(intr, "fsmount", || {
        Errno::result(unsafe { libc::syscall(libc::SYS_fsmount, fd, flags, mount_attrs) })
    })?;
    Ok(unsafe { OwnedFd::from_raw_fd(mount_fd as RawFd) })
}

pub(crate) fn umount2(intr: &Interrupt, path: &Path, flags: nix::mount::MntFlags) -> Result<()> {
    retry(intr, "umount2", || nix::mount::umount2(path, flags))
}

pub(crate) fn renameat2(
    intr: &Interrupt,
    old_dirfd: RawFd,
    old_path: &CStr,
    new_dirfd: RawFd,
    new_path: &CStr,
    flags: libc::c_uint,
) -> Result<()> {
    retry(intr, "renameat2", || {
        Errno::result(unsafe {
            libc::syscall(
                libc::SYS_renameat2,
                old_dirfd,
                old_path.as_ptr(),
                new_dirfd,
                new_path.as_ptr(),
                flags,
            )
        })
    })
    .map(drop)
}

pub(crate) fn fgetxattr(
    intr: &Interrupt,
    fd: RawFd,
    name: &CStr,
    buf: &mut [u8],
) -> Result<usize> {
    let len = retry(intr, "fgetxattr", || {
        Errno::result(unsafe {
            libc::fgetxattr(fd, name.as_ptr(), buf.as_mut_ptr().cast(), buf.len())
        })
    })?;
    Ok(len as usize)
}

pub(crate) fn fsetxattr(intr: &Interrupt, fd: RawFd, name: &CStr, value: &[u8]) -> Result<()> {
    retry(intr, "fsetxattr", || {
        Errno::result(unsafe {
            libc::fsetxattr(fd, name.as_ptr(), value.as_ptr().cast(), value.len(), 0)
        })
    })
    .map(drop)
}

pub(crate) fn fremovexattr(intr: &Interrupt, fd: RawFd, name: &CStr) -> Result<()> {
    retry(intr, "fremovexattr", || {
        Errno::result(unsafe { libc::fremovexattr(fd, name.as_ptr()) })
    })
    .map(drop)
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    use super::*;

    #[test]
    fn retry_loops_on_eintr_until_success() {
        let intr = Interrupt::new();
        let calls = AtomicU32::new(0);
        let value = retry(&intr, "test", || {
            if calls.fetch_add(1, Ordering::Relaxed) < 3 {
                Err(Errno::EINTR)
            } else {
                Ok(7)
            }
        })
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn retry_abandons_on_raised_interrupt() {
        let intr = Interrupt::new();
        intr.raise();
        let err = retry(&intr, "test", || Err::<(), Errno>(Errno::EINTR)).unwrap_err();
        assert!(matches!(err, Error::Interrupted));
    }

    #[test]
    fn retry_surfaces_other_errnos() {
        let intr = Interrupt::new();
        let err = retry(&intr, "statx", || Err::<(), Errno>(Errno::ENOENT)).unwrap_err();
        assert_eq!(err.errno(), Some(Errno::ENOENT));
    }
}
