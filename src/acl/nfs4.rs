//! NFSv4 ACL codec.
//!
//! The wire form is the XDR encoding used by the `system.nfs4_acl_xdr`
//! xattr: two big-endian header words (`acl_flags`, ACE count) followed by
//! five big-endian words per ACE. Construction canonicalizes ACE order to
//! the Windows DACL convention so ACLs written here interoperate with SMB
//! clients: explicit denies, explicit allows, inherited denies, inherited
//! allows.

use bitflags::bitflags;
use num_enum::IntoPrimitive;
use num_enum::TryFromPrimitive;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::byteorder::BigEndian;
use zerocopy::byteorder::U32;

use super::AclError;

bitflags! {
    /// NFSv4 access mask bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Nfs4Access: u32 {
        /// Read file data / list directory.
        const READ_DATA = 0x0000_0001;
        /// Write file data / add file.
        const WRITE_DATA = 0x0000_0002;
        /// Append file data / add subdirectory.
        const APPEND_DATA = 0x0000_0004;
        /// Read named attributes.
        const READ_NAMED_ATTRS = 0x0000_0008;
        /// Write named attributes.
        const WRITE_NAMED_ATTRS = 0x0000_0010;
        /// Execute file / traverse directory.
        const EXECUTE = 0x0000_0020;
        /// Delete children of a directory.
        const DELETE_CHILD = 0x0000_0040;
        /// Read basic attributes.
        const READ_ATTRIBUTES = 0x0000_0080;
        /// Write basic attributes.
        const WRITE_ATTRIBUTES = 0x0000_0100;
        /// Delete the object itself.
        const DELETE = 0x0001_0000;
        /// Read the ACL.
        const READ_ACL = 0x0002_0000;
        /// Write the ACL.
        const WRITE_ACL = 0x0004_0000;
        /// Change the owner.
        const WRITE_OWNER = 0x0008_0000;
        /// Synchronized I/O.
        const SYNCHRONIZE = 0x0010_0000;
    }
}

bitflags! {
    /// Per-ACE flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Nfs4AceFlags: u32 {
        /// Inherit onto child files.
        const FILE_INHERIT = 0x0000_0001;
        /// Inherit onto child directories.
        const DIRECTORY_INHERIT = 0x0000_0002;
        /// Inherit one level only.
        const NO_PROPAGATE_INHERIT = 0x0000_0004;
        /// ACE applies only to children, not this object.
        const INHERIT_ONLY = 0x0000_0008;
        /// Audit successful access (AUDIT/ALARM ACEs).
        const SUCCESSFUL_ACCESS = 0x0000_0010;
        /// Audit failed access (AUDIT/ALARM ACEs).
        const FAILED_ACCESS = 0x0000_0020;
        /// Named principal is a gid rather than a uid.
        const IDENTIFIER_GROUP = 0x0000_0040;
        /// ACE was synthesized by inheritance.
        const INHERITED = 0x0000_0080;
    }
}

impl Nfs4AceFlags {
    /// The four inheritance-control bits.
    pub const INHERIT_BITS: Self = Self::FILE_INHERIT
        .union(Self::DIRECTORY_INHERIT)
        .union(Self::NO_PROPAGATE_INHERIT)
        .union(Self::INHERIT_ONLY);
}

bitflags! {
    /// ACL-level flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Nfs4AclFlags: u32 {
        /// ACL participates in automatic inheritance.
        const AUTO_INHERIT = 0x0000_0001;
        /// ACL is protected from inheritance changes.
        const PROTECTED = 0x0000_0002;
        /// ACL was defaulted rather than explicitly set.
        const DEFAULTED = 0x0000_0004;
        /// ACL is equivalent to the mode bits.
        const TRIVIAL = 0x0001_0000;
        /// ACL belongs to a directory.
        const DIRECTORY = 0x0002_0000;
    }
}

/// ACE disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum Nfs4AceType {
    /// Grant the masked access.
    Allow = 0,
    /// Deny the masked access.
    Deny = 1,
    /// Audit the masked access.
    Audit = 2,
    /// Raise an alarm on the masked access.
    Alarm = 3,
}

const WHO_OWNER: u32 = 1;
const WHO_GROUP: u32 = 2;
const WHO_EVERYONE: u32 = 3;

/// Principal an ACE applies to.
///
/// A named principal carries a uid, or a gid when the ACE has
/// [`Nfs4AceFlags::IDENTIFIER_GROUP`] set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nfs4Who {
    /// A specific uid or gid.
    Named(u32),
    /// The owner of the file.
    Owner,
    /// The owning group of the file.
    Group,
    /// Everyone.
    Everyone,
}

impl Nfs4Who {
    fn is_special(&self) -> bool {
        !matches!(self, Nfs4Who::Named(_))
    }

    fn encode(&self) -> (u32, u32) {
        match self {
            Nfs4Who::Named(id) => (0, *id),
            Nfs4Who::Owner => (1, WHO_OWNER),
            Nfs4Who::Group => (1, WHO_GROUP),
            Nfs4Who::Everyone => (1, WHO_EVERYONE),
        }
    }

    fn decode(iflag: u32, who: u32) -> Result<Self, AclError> {
        if iflag == 0 {
            return Ok(Nfs4Who::Named(who));
        }
        match who {
            WHO_OWNER => Ok(Nfs4Who::Owner),
            WHO_GROUP => Ok(Nfs4Who::Group),
            WHO_EVERYONE => Ok(Nfs4Who::Everyone),
            other => Err(AclError::UnknownWho(other)),
        }
    }
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct AclHeaderRaw {
    acl_flags: U32<BigEndian>,
    ace_count: U32<BigEndian>,
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct AceRaw {
    typ: U32<BigEndian>,
    flags: U32<BigEndian>,
    iflag: U32<BigEndian>,
    access_mask: U32<BigEndian>,
    who: U32<BigEndian>,
}

const ACE_WIRE_SIZE: usize = size_of::<AceRaw>();

/// One access control entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nfs4Ace {
    /// Disposition.
    pub typ: Nfs4AceType,
    /// Flags, including inheritance control.
    pub flags: Nfs4AceFlags,
    /// Access mask being granted, denied or audited.
    pub access: Nfs4Access,
    /// Principal.
    pub who: Nfs4Who,
}

impl Nfs4Ace {
    /// Whether this ACE was synthesized by inheritance.
    pub fn is_inherited(&self) -> bool {
        self.flags.contains(Nfs4AceFlags::INHERITED)
    }

    /// Whether this is an ALLOW ACE.
    pub fn is_allow(&self) -> bool {
        self.typ == Nfs4AceType::Allow
    }

    // Windows canonical DACL buckets: explicit-deny, explicit-allow,
    // inherited-deny, inherited-allow.
    fn canonical_key(&self) -> u8 {
        (self.is_inherited() as u8) * 2 + self.is_allow() as u8
    }

    fn to_raw(self) -> AceRaw {
        let (iflag, who) = self.who.encode();
        AceRaw {
            typ: U32::new(self.typ.into()),
            flags: U32::new(self.flags.bits()),
            iflag: U32::new(iflag),
            access_mask: U32::new(self.access.bits()),
            who: U32::new(who),
        }
    }

    fn from_raw(raw: &AceRaw) -> Result<Self, AclError> {
        let typ = Nfs4AceType::try_from(raw.typ.get())
            .map_err(|_| AclError::UnknownAceType(raw.typ.get()))?;
        Ok(Self {
            typ,
            flags: Nfs4AceFlags::from_bits_retain(raw.flags.get()),
            access: Nfs4Access::from_bits_retain(raw.access_mask.get()),
            who: Nfs4Who::decode(raw.iflag.get(), raw.who.get())?,
        })
    }
}

/// A complete NFSv4 ACL.
///
/// Values are immutable; construct a new one to change anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nfs4Acl {
    flags: Nfs4AclFlags,
    aces: Vec<Nfs4Ace>,
}

impl Nfs4Acl {
    /// An ACL with no entries and no flags.
    pub fn empty() -> Self {
        Self {
            flags: Nfs4AclFlags::empty(),
            aces: Vec::new(),
        }
    }

    /// Builds an ACL from entries, putting them in canonical order.
    ///
    /// The sort is stable: entries within the same bucket keep their
    /// relative order.
    pub fn from_aces(flags: Nfs4AclFlags, mut aces: Vec<Nfs4Ace>) -> Self {
        aces.sort_by_key(Nfs4Ace::canonical_key);
        Self { flags, aces }
    }

    /// ACL-level flags.
    pub fn flags(&self) -> Nfs4AclFlags {
        self.flags
    }

    /// The entries, in stored order.
    pub fn aces(&self) -> &[Nfs4Ace] {
        &self.aces
    }

    /// Whether the ACL is marked mode-equivalent.
    pub fn is_trivial(&self) -> bool {
        self.flags.contains(Nfs4AclFlags::TRIVIAL)
    }

    /// Decodes the XDR wire form.
    pub fn parse(bytes: &[u8]) -> Result<Self, AclError> {
        let (header, rest) =
            AclHeaderRaw::read_from_prefix(bytes).map_err(|_| AclError::Truncated("header"))?;
        let count = header.ace_count.get() as usize;
        let need = count
            .checked_mul(ACE_WIRE_SIZE)
            .ok_or(AclError::Truncated("ACE array"))?;
        if rest.len() < need {
            return Err(AclError::Truncated("ACE array"));
        }
        if rest.len() > need {
            return Err(AclError::TrailingBytes);
        }
        let mut aces = Vec::with_capacity(count);
        for chunk in rest.chunks_exact(ACE_WIRE_SIZE) {
            let raw = AceRaw::read_from_bytes(chunk).map_err(|_| AclError::Truncated("ACE"))?;
            aces.push(Nfs4Ace::from_raw(&raw)?);
        }
        Ok(Self {
            flags: Nfs4AclFlags::from_bits_retain(header.acl_flags.get()),
            aces,
        })
    }

    /// Encodes the XDR wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(size_of::<AclHeaderRaw>() + self.aces.len() * ACE_WIRE_SIZE);
        let header = AclHeaderRaw {
            acl_flags: U32::new(self.flags.bits()),
            ace_count: U32::new(self.aces.len() as u32),
        };
        out.extend_from_slice(header.as_bytes());
        for ace in &self.aces {
            out.extend_from_slice(ace.to_raw().as_bytes());
        }
        out
    }

    /// Synthesizes the ACL a newly created child inherits from this one.
    ///
    /// File children take the `FILE_INHERIT` entries with all inheritance
    /// bits stripped. Directory children take `FILE_INHERIT` and
    /// `DIRECTORY_INHERIT` entries; unless `NO_PROPAGATE_INHERIT` cuts the
    /// chain, the inherit bits stay set for further propagation and
    /// `INHERIT_ONLY` is cleared so the entry applies to the directory
    /// itself. Every produced entry is marked `INHERITED`.
    pub fn generate_inherited(&self, is_dir: bool) -> Result<Self, AclError> {
        let mut out = Vec::new();
        for ace in &self.aces {
            let mut flags = ace.flags;
            if is_dir {
                if !flags
                    .intersects(Nfs4AceFlags::FILE_INHERIT | Nfs4AceFlags::DIRECTORY_INHERIT)
                {
                    continue;
                }
                if flags.contains(Nfs4AceFlags::NO_PROPAGATE_INHERIT) {
                    flags -= Nfs4AceFlags::INHERIT_BITS;
                } else {
                    flags -= Nfs4AceFlags::INHERIT_ONLY;
                }
            } else {
                if !flags.contains(Nfs4AceFlags::FILE_INHERIT) {
                    continue;
                }
                flags -= Nfs4AceFlags::INHERIT_BITS;
            }
            flags |= Nfs4AceFlags::INHERITED;
            out.push(Nfs4Ace { flags, ..*ace });
        }
        if out.is_empty() {
            return Err(AclError::NothingToInherit);
        }
        let acl_flags = if is_dir {
            Nfs4AclFlags::DIRECTORY
        } else {
            Nfs4AclFlags::empty()
        };
        Ok(Self::from_aces(acl_flags, out))
    }

    /// Structural validation.
    ///
    /// `is_dir` states whether the target is a directory; `None` (no
    /// descriptor available) is treated as a directory.
    pub fn validate(&self, is_dir: Option<bool>) -> Result<(), AclError> {
        let treat_as_dir = is_dir.unwrap_or(true);
        for ace in &self.aces {
            if ace.typ == Nfs4AceType::Deny && ace.who.is_special() {
                return Err(AclError::DenySpecialPrincipal);
            }
            if ace.flags.contains(Nfs4AceFlags::INHERIT_ONLY)
                && !ace
                    .flags
                    .intersects(Nfs4AceFlags::FILE_INHERIT | Nfs4AceFlags::DIRECTORY_INHERIT)
            {
                return Err(AclError::InheritOnlyWithoutInherit);
            }
            if ace.flags.intersects(Nfs4AceFlags::INHERIT_BITS) && !treat_as_dir {
                return Err(AclError::InheritOnNonDirectory);
            }
        }
        if treat_as_dir
            && !self.aces.iter().any(|ace| {
                ace.flags
                    .intersects(Nfs4AceFlags::FILE_INHERIT | Nfs4AceFlags::DIRECTORY_INHERIT)
            })
        {
            return Err(AclError::MissingInheritable);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ace(typ: Nfs4AceType, flags: Nfs4AceFlags) -> Nfs4Ace {
        Nfs4Ace {
            typ,
            flags,
            access: Nfs4Access::READ_DATA,
            who: Nfs4Who::Everyone,
        }
    }

    #[test]
    fn canonical_order_buckets() {
        let inherited = Nfs4AceFlags::INHERITED;
        let input = vec![
            ace(Nfs4AceType::Allow, Nfs4AceFlags::empty()),
            ace(Nfs4AceType::Deny, inherited),
            ace(Nfs4AceType::Deny, Nfs4AceFlags::empty()),
            ace(Nfs4AceType::Allow, inherited),
        ];
        let acl = Nfs4Acl::from_aces(Nfs4AclFlags::empty(), input);
        let order: Vec<(Nfs4AceType, bool)> = acl
            .aces()
            .iter()
            .map(|a| (a.typ, a.is_inherited()))
            .collect();
        assert_eq!(
            order,
            vec![
                (Nfs4AceType::Deny, false),
                (Nfs4AceType::Allow, false),
                (Nfs4AceType::Deny, true),
                (Nfs4AceType::Allow, true),
            ]
        );
    }

    #[test]
    fn canonical_sort_is_stable() {
        let mut first = ace(Nfs4AceType::Allow, Nfs4AceFlags::empty());
        first.who = Nfs4Who::Named(100);
        let mut second = ace(Nfs4AceType::Allow, Nfs4AceFlags::empty());
        second.who = Nfs4Who::Named(200);
        let acl = Nfs4Acl::from_aces(Nfs4AclFlags::empty(), vec![first, second]);
        assert_eq!(acl.aces()[0].who, Nfs4Who::Named(100));
        assert_eq!(acl.aces()[1].who, Nfs4Who::Named(200));
    }

    #[test]
    fn wire_round_trip_is_big_endian() {
        let acl = Nfs4Acl::from_aces(
            Nfs4AclFlags::DIRECTORY,
            vec![Nfs4Ace {
                typ: Nfs4AceType::Allow,
                flags: Nfs4AceFlags::FILE_INHERIT,
                access: Nfs4Access::READ_DATA | Nfs4Access::EXECUTE,
                who: Nfs4Who::Named(1000),
            }],
        );
        let bytes = acl.to_bytes();
        assert_eq!(bytes.len(), 8 + 20);
        // acl_flags = DIRECTORY (0x20000), big-endian.
        assert_eq!(&bytes[0..4], &[0x00, 0x02, 0x00, 0x00]);
        // one ACE
        assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x00, 0x01]);
        // who = uid 1000 = 0x3e8
        assert_eq!(&bytes[24..28], &[0x00, 0x00, 0x03, 0xe8]);
        assert_eq!(Nfs4Acl::parse(&bytes).unwrap(), acl);
    }

    #[test]
    fn special_who_round_trip() {
        for who in [Nfs4Who::Owner, Nfs4Who::Group, Nfs4Who::Everyone] {
            let acl = Nfs4Acl::from_aces(
                Nfs4AclFlags::empty(),
                vec![Nfs4Ace {
                    typ: Nfs4AceType::Allow,
                    flags: Nfs4AceFlags::empty(),
                    access: Nfs4Access::READ_DATA,
                    who,
                }],
            );
            assert_eq!(Nfs4Acl::parse(&acl.to_bytes()).unwrap(), acl);
        }
    }

    #[test]
    fn parse_rejects_malformed_buffers() {
        assert_eq!(
            Nfs4Acl::parse(&[0; 4]),
            Err(AclError::Truncated("header"))
        );
        // Header says one ACE, none follow.
        let mut bytes = Nfs4Acl::empty().to_bytes();
        bytes[7] = 1;
        assert_eq!(Nfs4Acl::parse(&bytes), Err(AclError::Truncated("ACE array")));
        // Trailing garbage.
        let mut bytes = Nfs4Acl::empty().to_bytes();
        bytes.push(0);
        assert_eq!(Nfs4Acl::parse(&bytes), Err(AclError::TrailingBytes));
    }

    #[test]
    fn parse_rejects_unknown_type_and_who() {
        let acl = Nfs4Acl::from_aces(
            Nfs4AclFlags::empty(),
            vec![ace(Nfs4AceType::Allow, Nfs4AceFlags::empty())],
        );
        let mut bytes = acl.to_bytes();
        bytes[11] = 9; // ACE type word
        assert_eq!(Nfs4Acl::parse(&bytes), Err(AclError::UnknownAceType(9)));
        let mut bytes = acl.to_bytes();
        bytes[27] = 7; // special who word
        assert_eq!(Nfs4Acl::parse(&bytes), Err(AclError::UnknownWho(7)));
    }

    #[test]
    fn inherit_for_directory_child() {
        let parent = Nfs4Acl::from_aces(
            Nfs4AclFlags::empty(),
            vec![Nfs4Ace {
                typ: Nfs4AceType::Allow,
                flags: Nfs4AceFlags::FILE_INHERIT
                    | Nfs4AceFlags::DIRECTORY_INHERIT
                    | Nfs4AceFlags::INHERIT_ONLY,
                access: Nfs4Access::READ_DATA,
                who: Nfs4Who::Owner,
            }],
        );
        let child = parent.generate_inherited(true).unwrap();
        assert_eq!(child.aces().len(), 1);
        let ace = child.aces()[0];
        assert_eq!(
            ace.flags,
            Nfs4AceFlags::FILE_INHERIT | Nfs4AceFlags::DIRECTORY_INHERIT | Nfs4AceFlags::INHERITED
        );
        assert_eq!(ace.access, Nfs4Access::READ_DATA);
        assert_eq!(ace.who, Nfs4Who::Owner);
        assert!(child.flags().contains(Nfs4AclFlags::DIRECTORY));
    }

    #[test]
    fn inherit_for_file_child_with_no_propagate() {
        let parent = Nfs4Acl::from_aces(
            Nfs4AclFlags::empty(),
            vec![ace(
                Nfs4AceType::Allow,
                Nfs4AceFlags::FILE_INHERIT | Nfs4AceFlags::NO_PROPAGATE_INHERIT,
            )],
        );
        let child = parent.generate_inherited(false).unwrap();
        assert_eq!(child.aces().len(), 1);
        assert_eq!(child.aces()[0].flags, Nfs4AceFlags::INHERITED);
        assert!(!child.flags().contains(Nfs4AclFlags::DIRECTORY));
    }

    #[test]
    fn inherit_skips_dir_only_entries_for_files() {
        let parent = Nfs4Acl::from_aces(
            Nfs4AclFlags::empty(),
            vec![ace(Nfs4AceType::Allow, Nfs4AceFlags::DIRECTORY_INHERIT)],
        );
        assert_eq!(
            parent.generate_inherited(false),
            Err(AclError::NothingToInherit)
        );
    }

    #[test]
    fn validate_deny_special_principal() {
        let acl = Nfs4Acl::from_aces(
            Nfs4AclFlags::empty(),
            vec![ace(Nfs4AceType::Deny, Nfs4AceFlags::FILE_INHERIT)],
        );
        assert_eq!(
            acl.validate(Some(true)),
            Err(AclError::DenySpecialPrincipal)
        );
    }

    #[test]
    fn validate_inherit_only_needs_inherit_bits() {
        let mut entry = ace(Nfs4AceType::Allow, Nfs4AceFlags::INHERIT_ONLY);
        entry.who = Nfs4Who::Named(0);
        let acl = Nfs4Acl::from_aces(Nfs4AclFlags::empty(), vec![entry]);
        assert_eq!(
            acl.validate(Some(true)),
            Err(AclError::InheritOnlyWithoutInherit)
        );
    }

    #[test]
    fn validate_inherit_bits_require_directory() {
        let acl = Nfs4Acl::from_aces(
            Nfs4AclFlags::empty(),
            vec![ace(Nfs4AceType::Allow, Nfs4AceFlags::FILE_INHERIT)],
        );
        assert_eq!(
            acl.validate(Some(false)),
            Err(AclError::InheritOnNonDirectory)
        );
        // Absent fd is treated as a directory.
        assert_eq!(acl.validate(None), Ok(()));
    }

    #[test]
    fn validate_directory_needs_inheritable_entry() {
        let acl = Nfs4Acl::from_aces(
            Nfs4AclFlags::empty(),
            vec![ace(Nfs4AceType::Allow, Nfs4AceFlags::empty())],
        );
        assert_eq!(acl.validate(Some(true)), Err(AclError::MissingInheritable));
        assert_eq!(acl.validate(Some(false)), Ok(()));
    }
}
