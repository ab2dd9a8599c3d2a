//! Access control lists on open descriptors.
//!
//! Two on-disk models are supported: NFSv4 ACLs as stored by ZFS in the
//! `system.nfs4_acl_xdr` xattr, and POSIX.1e ACLs in the
//! `system.posix_acl_access`/`system.posix_acl_default` pair. [`fgetacl`]
//! probes which model the filesystem speaks and returns the tagged
//! [`Acl`] variant; the codecs themselves are pure and kernel-free.

pub mod nfs4;
pub mod posix;

use std::ffi::CStr;
use std::os::fd::AsFd;
use std::os::fd::BorrowedFd;

use thiserror::Error;

use crate::error::Error;
use crate::error::Result;
use crate::interrupt::Interrupt;
use crate::stat::statx_fd;
use crate::xattr;
use crate::xattr::XattrValue;
use nfs4::Nfs4Acl;
use posix::PosixAcl;

/// Xattr carrying the NFSv4 ACL in XDR form.
pub const NFS4_ACL_XATTR: &CStr = c"system.nfs4_acl_xdr";
/// Xattr carrying the POSIX.1e access ACL.
pub const POSIX_ACL_ACCESS_XATTR: &CStr = c"system.posix_acl_access";
/// Xattr carrying the POSIX.1e default ACL.
pub const POSIX_ACL_DEFAULT_XATTR: &CStr = c"system.posix_acl_default";

/// Structural and wire-format failures of the ACL codecs.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum AclError {
    /// Buffer ended before the advertised content.
    #[error("ACL buffer truncated: {0}")]
    Truncated(&'static str),
    /// Buffer is longer than its header says it should be.
    #[error("ACL buffer carries trailing bytes")]
    TrailingBytes,
    /// POSIX ACL xattr with a version other than 2.
    #[error("unsupported POSIX ACL version {0}")]
    BadVersion(u32),
    /// POSIX ACL xattr whose entry area is not a whole number of records.
    #[error("POSIX ACL entry area has bad length {0}")]
    BadLength(usize),
    /// ACE type word outside ALLOW/DENY/AUDIT/ALARM.
    #[error("unknown NFSv4 ACE type {0}")]
    UnknownAceType(u32),
    /// Special-who word outside OWNER/GROUP/EVERYONE.
    #[error("unknown NFSv4 special principal {0}")]
    UnknownWho(u32),
    /// POSIX tag word outside the six defined tags.
    #[error("unknown POSIX ACL tag {0:#x}")]
    UnknownTag(u16),
    /// DENY ACEs may not name special principals.
    #[error("DENY ACE against a special principal")]
    DenySpecialPrincipal,
    /// INHERIT_ONLY requires one of the inherit bits.
    #[error("INHERIT_ONLY ACE without FILE_INHERIT or DIRECTORY_INHERIT")]
    InheritOnlyWithoutInherit,
    /// Inheritance bits are only meaningful on directories.
    #[error("inheritance flags on a non-directory ACL")]
    InheritOnNonDirectory,
    /// Directory ACLs must carry at least one inheritable ACE.
    #[error("directory ACL without an inheritable ACE")]
    MissingInheritable,
    /// Inheritance synthesis produced an empty ACL.
    #[error("parent ACL has no inheritable entries")]
    NothingToInherit,
    /// POSIX inheritance requires a default ACL on the parent.
    #[error("parent has no default ACL to inherit from")]
    NoDefaultAcl,
    /// A list must contain exactly one entry with this tag.
    #[error("POSIX ACL must contain exactly one {0} entry")]
    RequiredEntry(&'static str),
    /// More than one MASK entry.
    #[error("POSIX ACL with more than one MASK entry")]
    MultipleMask,
    /// Named USER/GROUP entries need a MASK entry.
    #[error("POSIX ACL with named entries requires a MASK entry")]
    MaskRequired,
    /// Named USER/GROUP entries must carry a concrete id.
    #[error("named POSIX ACL entry without an id")]
    NamedWithoutId,
    /// A default ACL is only valid on a directory.
    #[error("default POSIX ACL on a non-directory")]
    DefaultOnNonDirectory,
}

/// An ACL read from (or destined for) a file, tagged by its on-disk model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acl {
    /// NFSv4 ACL (`system.nfs4_acl_xdr`).
    Nfs4(Nfs4Acl),
    /// POSIX.1e ACL pair.
    Posix(PosixAcl),
}

impl Acl {
    /// Whether the ACL carries no information beyond the mode bits.
    pub fn is_trivial(&self) -> bool {
        match self {
            Acl::Nfs4(acl) => acl.is_trivial(),
            Acl::Posix(acl) => acl.is_trivial(),
        }
    }

    /// Structural validation against a target known (or assumed) to be a
    /// directory or not; `None` is treated as a directory.
    pub fn validate(&self, is_dir: Option<bool>) -> Result<(), AclError> {
        match self {
            Acl::Nfs4(acl) => acl.validate(is_dir),
            Acl::Posix(acl) => acl.validate(is_dir),
        }
    }
}

/// Reads the ACL of an open descriptor.
///
/// The NFSv4 xattr is probed first; only filesystem-level absence
/// (`EOPNOTSUPP`) falls through to the POSIX pair. A filesystem that
/// supports neither fails with [`Error::Unsupported`].
pub fn fgetacl(fd: impl AsFd, intr: &Interrupt) -> Result<Acl> {
    let fd = fd.as_fd();
    match xattr::read(fd, NFS4_ACL_XATTR, intr)? {
        XattrValue::Data(bytes) => Ok(Acl::Nfs4(Nfs4Acl::parse(&bytes)?)),
        XattrValue::Absent => Ok(Acl::Nfs4(Nfs4Acl::empty())),
        XattrValue::Unsupported => fgetacl_posix(fd, intr).map(Acl::Posix),
    }
}

fn fgetacl_posix(fd: BorrowedFd<'_>, intr: &Interrupt) -> Result<PosixAcl> {
    let access = match xattr::read(fd, POSIX_ACL_ACCESS_XATTR, intr)? {
        XattrValue::Data(bytes) => Some(bytes),
        XattrValue::Absent => None,
        XattrValue::Unsupported => {
            return Err(Error::Unsupported { what: "POSIX ACLs" });
        }
    };
    let default = match xattr::read(fd, POSIX_ACL_DEFAULT_XATTR, intr)? {
        XattrValue::Data(bytes) => Some(bytes),
        XattrValue::Absent | XattrValue::Unsupported => None,
    };
    Ok(PosixAcl::parse_pair(access.as_deref(), default.as_deref())?)
}

/// Writes an ACL to an open descriptor, dispatching on the variant.
///
/// For the POSIX variant the default xattr is replaced when the value has a
/// default list and removed when it does not; an empty access list removes
/// the access xattr.
pub fn fsetacl(fd: impl AsFd, acl: &Acl, intr: &Interrupt) -> Result<()> {
    let fd = fd.as_fd();
    match acl {
        Acl::Nfs4(acl) => xattr::write(fd, NFS4_ACL_XATTR, &acl.to_bytes(), intr),
        Acl::Posix(acl) => {
            match acl.access_bytes() {
                Some(bytes) => xattr::write(fd, POSIX_ACL_ACCESS_XATTR, &bytes, intr)?,
                None => xattr::remove(fd, POSIX_ACL_ACCESS_XATTR, intr)?,
            }
            match acl.default_bytes() {
                Some(bytes) => xattr::write(fd, POSIX_ACL_DEFAULT_XATTR, &bytes, intr),
                None => xattr::remove(fd, POSIX_ACL_DEFAULT_XATTR, intr),
            }
        }
    }
}

/// Writes raw XDR bytes to the NFSv4 ACL xattr, bypassing the codec.
pub fn write_nfs4_xdr(fd: impl AsFd, bytes: &[u8], intr: &Interrupt) -> Result<()> {
    xattr::write(fd, NFS4_ACL_XATTR, bytes, intr)
}

/// Writes raw POSIX.1e xattr payloads, bypassing the codec. A `None`
/// default removes the default xattr.
pub fn write_posix_raw(
    fd: impl AsFd,
    access: &[u8],
    default: Option<&[u8]>,
    intr: &Interrupt,
) -> Result<()> {
    let fd = fd.as_fd();
    xattr::write(fd, POSIX_ACL_ACCESS_XATTR, access, intr)?;
    match default {
        Some(bytes) => xattr::write(fd, POSIX_ACL_DEFAULT_XATTR, bytes, intr),
        None => xattr::remove(fd, POSIX_ACL_DEFAULT_XATTR, intr),
    }
}

/// Validates NFSv4 XDR bytes against the file behind `fd`, or against an
/// assumed directory when no descriptor is supplied.
pub fn nfs4acl_valid(fd: Option<BorrowedFd<'_>>, bytes: &[u8], intr: &Interrupt) -> Result<()> {
    let acl = Nfs4Acl::parse(bytes)?;
    let is_dir = match fd {
        Some(fd) => Some(statx_fd(fd, intr)?.is_dir()),
        None => None,
    };
    Ok(acl.validate(is_dir)?)
}

/// Validates an [`Acl`] against the file behind `fd`.
pub fn validate_for_fd(fd: impl AsFd, acl: &Acl, intr: &Interrupt) -> Result<()> {
    let is_dir = statx_fd(fd, intr)?.is_dir();
    Ok(acl.validate(Some(is_dir))?)
}
