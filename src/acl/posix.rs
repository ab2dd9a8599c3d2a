//! POSIX.1e ACL codec.
//!
//! Wire form per xattr: a little-endian `u32` version word (always 2)
//! followed by 8-byte records of `(tag, perms, id)`. The access and default
//! ACLs are separate xattrs; both canonicalize to `(tag, id)` ascending
//! order, which is the order the kernel accepts.

use bitflags::bitflags;
use num_enum::IntoPrimitive;
use num_enum::TryFromPrimitive;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::byteorder::LittleEndian;
use zerocopy::byteorder::U16;
use zerocopy::byteorder::U32;

use super::AclError;

const POSIX_ACL_VERSION: u32 = 2;
const UNDEFINED_ID: u32 = 0xffff_ffff;

/// Entry tag. The discriminants are the wire values; their numeric order is
/// the canonical entry order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum PosixTag {
    /// The owning user.
    UserObj = 0x01,
    /// A named user.
    User = 0x02,
    /// The owning group.
    GroupObj = 0x04,
    /// A named group.
    Group = 0x08,
    /// Upper bound for named entries and the owning group.
    Mask = 0x10,
    /// Everyone else.
    Other = 0x20,
}

impl PosixTag {
    fn is_named(self) -> bool {
        matches!(self, PosixTag::User | PosixTag::Group)
    }
}

bitflags! {
    /// Permission bits of one entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PosixPerms: u16 {
        /// Read.
        const READ = 0x4;
        /// Write.
        const WRITE = 0x2;
        /// Execute / search.
        const EXECUTE = 0x1;
    }
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct PosixHeaderRaw {
    version: U32<LittleEndian>,
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct PosixAceRaw {
    tag: U16<LittleEndian>,
    perm: U16<LittleEndian>,
    id: U32<LittleEndian>,
}

const ACE_WIRE_SIZE: usize = size_of::<PosixAceRaw>();

/// One POSIX.1e ACL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PosixAce {
    /// Entry tag.
    pub tag: PosixTag,
    /// Permission bits.
    pub perms: PosixPerms,
    /// uid/gid for named entries; `None` for the rest.
    pub id: Option<u32>,
    /// Whether the entry belongs to the default (inheritable) ACL.
    pub default: bool,
}

impl PosixAce {
    fn sort_key(&self) -> (u16, u32) {
        (self.tag.into(), self.id.unwrap_or(UNDEFINED_ID))
    }

    fn to_raw(self) -> PosixAceRaw {
        PosixAceRaw {
            tag: U16::new(self.tag.into()),
            perm: U16::new(self.perms.bits()),
            id: U32::new(self.id.unwrap_or(UNDEFINED_ID)),
        }
    }

    fn from_raw(raw: &PosixAceRaw, default: bool) -> Result<Self, AclError> {
        let tag = PosixTag::try_from(raw.tag.get())
            .map_err(|_| AclError::UnknownTag(raw.tag.get()))?;
        let id = match raw.id.get() {
            UNDEFINED_ID => None,
            id => Some(id),
        };
        Ok(Self {
            tag,
            perms: PosixPerms::from_bits_retain(raw.perm.get()),
            id,
            default,
        })
    }
}

/// A POSIX.1e ACL: the access list plus an optional default list.
///
/// Values are immutable; construct a new one to change anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosixAcl {
    access: Vec<PosixAce>,
    default: Option<Vec<PosixAce>>,
}

fn sort_canonical(list: &mut [PosixAce]) {
    list.sort_by_key(PosixAce::sort_key);
}

fn encode_list(list: &[PosixAce]) -> Vec<u8> {
    let mut out = Vec::with_capacity(size_of::<PosixHeaderRaw>() + list.len() * ACE_WIRE_SIZE);
    let header = PosixHeaderRaw {
        version: U32::new(POSIX_ACL_VERSION),
    };
    out.extend_from_slice(header.as_bytes());
    for ace in list {
        out.extend_from_slice(ace.to_raw().as_bytes());
    }
    out
}

fn parse_list(bytes: &[u8], default: bool) -> Result<Vec<PosixAce>, AclError> {
    let (header, rest) =
        PosixHeaderRaw::read_from_prefix(bytes).map_err(|_| AclError::Truncated("header"))?;
    if header.version.get() != POSIX_ACL_VERSION {
        return Err(AclError::BadVersion(header.version.get()));
    }
    if rest.len() % ACE_WIRE_SIZE != 0 {
        return Err(AclError::BadLength(rest.len()));
    }
    let mut list = Vec::with_capacity(rest.len() / ACE_WIRE_SIZE);
    for chunk in rest.chunks_exact(ACE_WIRE_SIZE) {
        let raw = PosixAceRaw::read_from_bytes(chunk).map_err(|_| AclError::Truncated("entry"))?;
        list.push(PosixAce::from_raw(&raw, default)?);
    }
    Ok(list)
}

fn validate_list(list: &[PosixAce]) -> Result<(), AclError> {
    let count = |tag: PosixTag| list.iter().filter(|ace| ace.tag == tag).count();
    if count(PosixTag::UserObj) != 1 {
        return Err(AclError::RequiredEntry("USER_OBJ"));
    }
    if count(PosixTag::GroupObj) != 1 {
        return Err(AclError::RequiredEntry("GROUP_OBJ"));
    }
    if count(PosixTag::Other) != 1 {
        return Err(AclError::RequiredEntry("OTHER"));
    }
    if list
        .iter()
        .any(|ace| ace.tag.is_named() && ace.id.is_none())
    {
        return Err(AclError::NamedWithoutId);
    }
    let masks = count(PosixTag::Mask);
    if masks > 1 {
        return Err(AclError::MultipleMask);
    }
    let named = list.iter().filter(|ace| ace.tag.is_named()).count();
    if named > 0 && masks != 1 {
        return Err(AclError::MaskRequired);
    }
    Ok(())
}

impl PosixAcl {
    /// An ACL with no entries at all (both xattrs absent).
    pub fn empty() -> Self {
        Self {
            access: Vec::new(),
            default: None,
        }
    }

    /// Builds an ACL from entries, routing them to the access or default
    /// list by their `default` field and canonicalizing each list to
    /// `(tag, id)` ascending order.
    ///
    /// No default list is recorded when no entry carries `default`.
    pub fn from_aces(aces: impl IntoIterator<Item = PosixAce>) -> Self {
        let mut access = Vec::new();
        let mut default = Vec::new();
        for ace in aces {
            if ace.default {
                default.push(ace);
            } else {
                access.push(ace);
            }
        }
        sort_canonical(&mut access);
        sort_canonical(&mut default);
        Self {
            access,
            default: (!default.is_empty()).then_some(default),
        }
    }

    /// Decodes the xattr pair. `None` stands for an absent xattr.
    pub fn parse_pair(access: Option<&[u8]>, default: Option<&[u8]>) -> Result<Self, AclError> {
        let access = match access {
            Some(bytes) => parse_list(bytes, false)?,
            None => Vec::new(),
        };
        let default = match default {
            Some(bytes) => Some(parse_list(bytes, true)?),
            None => None,
        };
        Ok(Self { access, default })
    }

    /// The access entries, in stored order.
    pub fn access(&self) -> &[PosixAce] {
        &self.access
    }

    /// The default entries, when a default ACL is present.
    pub fn default_aces(&self) -> Option<&[PosixAce]> {
        self.default.as_deref()
    }

    /// Encodes the access xattr payload; `None` when there are no access
    /// entries (xattr absent).
    pub fn access_bytes(&self) -> Option<Vec<u8>> {
        (!self.access.is_empty()).then(|| encode_list(&self.access))
    }

    /// Encodes the default xattr payload, when a default ACL is present.
    pub fn default_bytes(&self) -> Option<Vec<u8>> {
        self.default.as_ref().map(|list| encode_list(list))
    }

    /// Whether the ACL carries no entries at all.
    ///
    /// Note this is "no access xattr and no default ACL", not the kernel's
    /// "reducible to mode bits" notion of a trivial ACL.
    pub fn is_trivial(&self) -> bool {
        self.access.is_empty() && self.default.is_none()
    }

    /// Synthesizes the ACL a newly created child inherits from this one.
    ///
    /// Children take the parent's default ACL as their access ACL;
    /// directory children also keep it as their own default so it keeps
    /// propagating. Fails when the parent has no default ACL.
    pub fn generate_inherited(&self, is_dir: bool) -> Result<Self, AclError> {
        let default = self.default.as_ref().ok_or(AclError::NoDefaultAcl)?;
        let access = default
            .iter()
            .map(|ace| PosixAce {
                default: false,
                ..*ace
            })
            .collect();
        let child_default = is_dir.then(|| default.clone());
        Ok(Self {
            access,
            default: child_default,
        })
    }

    /// Conformance validation.
    ///
    /// Each non-empty list must carry exactly one `USER_OBJ`, `GROUP_OBJ`
    /// and `OTHER` entry, concrete ids on named entries, and a single
    /// `MASK` whenever named entries are present. A default list is only
    /// valid on a directory; `None` (no descriptor available) is treated
    /// as a directory.
    pub fn validate(&self, is_dir: Option<bool>) -> Result<(), AclError> {
        if !self.access.is_empty() {
            validate_list(&self.access)?;
        }
        if let Some(default) = &self.default {
            if is_dir == Some(false) {
                return Err(AclError::DefaultOnNonDirectory);
            }
            if !default.is_empty() {
                validate_list(default)?;
            }
        }
        Ok(())
    }
}
