//! Extended-attribute plumbing for the ACL layer.
//!
//! Reads follow the two-step protocol: probe with a zero-length buffer to
//! learn the value size, then read into an exactly-sized allocation. A value
//! that grows between the two steps makes the kernel return `ERANGE`, in
//! which case the probe is repeated.

use std::ffi::CStr;
use std::os::fd::AsFd;
use std::os::fd::AsRawFd;

use nix::errno::Errno;

use crate::error::Result;
use crate::interrupt::Interrupt;
use crate::sys;

/// Outcome of a zero-length probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum XattrProbe {
    /// The attribute exists and currently holds this many bytes.
    Present(usize),
    /// The attribute is not set on this file (`ENODATA`).
    Absent,
    /// The filesystem does not support this attribute (`EOPNOTSUPP`).
    Unsupported,
}

/// Outcome of a full read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum XattrValue {
    Data(Vec<u8>),
    Absent,
    Unsupported,
}

pub(crate) fn probe(fd: impl AsFd, name: &CStr, intr: &Interrupt) -> Result<XattrProbe> {
    match sys::fgetxattr(intr, fd.as_fd().as_raw_fd(), name, &mut []) {
        Ok(size) => Ok(XattrProbe::Present(size)),
        Err(err) => match err.errno() {
            Some(Errno::ENODATA) => Ok(XattrProbe::Absent),
            Some(Errno::EOPNOTSUPP) => Ok(XattrProbe::Unsupported),
            _ => Err(err),
        },
    }
}

pub(crate) fn read(fd: impl AsFd, name: &CStr, intr: &Interrupt) -> Result<XattrValue> {
    let fd = fd.as_fd();
    loop {
        let size = match probe(fd, name, intr)? {
            XattrProbe::Present(size) => size,
            XattrProbe::Absent => return Ok(XattrValue::Absent),
            XattrProbe::Unsupported => return Ok(XattrValue::Unsupported),
        };
        if size == 0 {
            return Ok(XattrValue::Data(Vec::new()));
        }
        let mut buf = vec![0u8; size];
        match sys::fgetxattr(intr, fd.as_raw_fd(), name, &mut buf) {
            Ok(len) => {
                buf.truncate(len);
                return Ok(XattrValue::Data(buf));
            }
            Err(err) => match err.errno() {
                // Value changed size between probe and read.
                Some(Errno::ERANGE) => continue,
                Some(Errno::ENODATA) => return Ok(XattrValue::Absent),
                _ => return Err(err),
            },
        }
    }
}

pub(crate) fn write(fd: impl AsFd, name: &CStr, value: &[u8], intr: &Interrupt) -> Result<()> {
    sys::fsetxattr(intr, fd.as_fd().as_raw_fd(), name, value)
}

/// Removes an attribute; a missing attribute is not an error.
pub(crate) fn remove(fd: impl AsFd, name: &CStr, intr: &Interrupt) -> Result<()> {
    match sys::fremovexattr(intr, fd.as_fd().as_raw_fd(), name) {
        Err(err) if err.errno() == Some(Errno::ENODATA) => Ok(()),
        other => other,
    }
}
