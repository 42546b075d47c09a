//! Tag identifiers, their declared element types, and the tag name table.

use std::fmt;

/// Declared element type of a tag, matching the on-disk type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TagType {
    /// Placeholder type; carries no data.
    Null = 0,
    /// Single bytes with character semantics.
    Char = 1,
    /// 8-bit integers.
    Int8 = 2,
    /// 16-bit big-endian integers.
    Int16 = 3,
    /// 32-bit big-endian integers.
    Int32 = 4,
    /// 64-bit big-endian integers.
    Int64 = 5,
    /// A single NUL-terminated string; count must be 1.
    String = 6,
    /// Opaque bytes; count is the byte length.
    Bin = 7,
    /// Concatenated NUL-terminated strings; count is the array length.
    StringArray = 8,
    /// Same layout as [`TagType::StringArray`] with locale semantics.
    I18nString = 9,
}

impl TagType {
    /// Decodes an on-disk type code.
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::Null,
            1 => Self::Char,
            2 => Self::Int8,
            3 => Self::Int16,
            4 => Self::Int32,
            5 => Self::Int64,
            6 => Self::String,
            7 => Self::Bin,
            8 => Self::StringArray,
            9 => Self::I18nString,
            _ => return None,
        })
    }

    /// On-disk alignment of this type's data.
    #[must_use]
    pub const fn alignment(self) -> usize {
        match self {
            Self::Int16 => 2,
            Self::Int32 => 4,
            Self::Int64 => 8,
            _ => 1,
        }
    }

    /// Fixed per-element size on disk, or `None` for variable-width types.
    #[must_use]
    pub const fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Null => Some(0),
            Self::Char | Self::Int8 => Some(1),
            Self::Int16 => Some(2),
            Self::Int32 => Some(4),
            Self::Int64 => Some(8),
            Self::String | Self::Bin | Self::StringArray | Self::I18nString => None,
        }
    }
}

/// A tag identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(pub u32);

impl Tag {
    /// Classic leading region tag of an installed-package header.
    pub const IMAGE: Self = Self(61);
    /// Region tag of a signature header.
    pub const SIGNATURES: Self = Self(62);
    /// Region tag of a sealed (immutable) package header.
    pub const IMMUTABLE: Self = Self(63);
    /// Upper bound (exclusive) of the reserved region tag range.
    pub const REGIONS: Self = Self(64);
    /// Locale table paired with every i18n string tag.
    pub const I18NTABLE: Self = Self(100);

    /// Package name.
    pub const NAME: Self = Self(1000);
    /// Package version.
    pub const VERSION: Self = Self(1001);
    /// Package release.
    pub const RELEASE: Self = Self(1002);
    /// Package epoch.
    pub const EPOCH: Self = Self(1003);
    /// One-line summary (i18n).
    pub const SUMMARY: Self = Self(1004);
    /// Long description (i18n).
    pub const DESCRIPTION: Self = Self(1005);
    /// Build timestamp.
    pub const BUILDTIME: Self = Self(1006);
    /// Build host name.
    pub const BUILDHOST: Self = Self(1007);
    /// Installed size in bytes.
    pub const SIZE: Self = Self(1009);
    /// Distribution name.
    pub const DISTRIBUTION: Self = Self(1010);
    /// Vendor name.
    pub const VENDOR: Self = Self(1011);
    /// License string.
    pub const LICENSE: Self = Self(1014);
    /// Packager contact.
    pub const PACKAGER: Self = Self(1015);
    /// Package group (i18n).
    pub const GROUP: Self = Self(1016);
    /// Upstream URL.
    pub const URL: Self = Self(1020);
    /// Target operating system.
    pub const OS: Self = Self(1021);
    /// Target architecture.
    pub const ARCH: Self = Self(1022);
    /// Legacy absolute file name list.
    pub const OLDFILENAMES: Self = Self(1027);
    /// Per-file sizes.
    pub const FILESIZES: Self = Self(1028);
    /// Per-file install states.
    pub const FILESTATES: Self = Self(1029);
    /// Per-file modes.
    pub const FILEMODES: Self = Self(1030);
    /// Per-file device numbers of special files.
    pub const FILERDEVS: Self = Self(1033);
    /// Per-file modification times.
    pub const FILEMTIMES: Self = Self(1034);
    /// Per-file content digests.
    pub const FILEDIGESTS: Self = Self(1035);
    /// Per-file symlink targets.
    pub const FILELINKTOS: Self = Self(1036);
    /// Per-file flags (config, doc, missing-ok, ghost...).
    pub const FILEFLAGS: Self = Self(1037);
    /// Per-file owner names.
    pub const FILEUSERNAME: Self = Self(1039);
    /// Per-file group names.
    pub const FILEGROUPNAME: Self = Self(1040);
    /// Source package file name.
    pub const SOURCERPM: Self = Self(1044);
    /// Uncompressed payload size.
    pub const ARCHIVESIZE: Self = Self(1046);
    /// Per-file device numbers.
    pub const FILEDEVICES: Self = Self(1095);
    /// Per-file inode numbers.
    pub const FILEINODES: Self = Self(1096);
    /// Per-file locale markers.
    pub const FILELANGS: Self = Self(1097);
    /// Per-file index into [`Tag::DIRNAMES`].
    pub const DIRINDEXES: Self = Self(1116);
    /// Per-file base names.
    pub const BASENAMES: Self = Self(1117);
    /// Directory name pool.
    pub const DIRNAMES: Self = Self(1118);
    /// Payload format name.
    pub const PAYLOADFORMAT: Self = Self(1124);
    /// Payload compressor name.
    pub const PAYLOADCOMPRESSOR: Self = Self(1125);
    /// Payload compressor flags.
    pub const PAYLOADFLAGS: Self = Self(1126);

    /// The raw tag value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Whether this tag marks a region (reserved range).
    #[must_use]
    pub const fn is_region(self) -> bool {
        self.0 >= Self::IMAGE.0 && self.0 < Self::REGIONS.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match name_of(*self) {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "#{}", self.0),
        }
    }
}

/// One row of the tag name table.
#[derive(Debug, Clone, Copy)]
pub struct TagEntry {
    /// Canonical upper-case tag name.
    pub name: &'static str,
    /// Tag identifier.
    pub tag: Tag,
    /// Declared element type.
    pub ty: TagType,
}

/// The tag name table, sorted by tag value.
pub static TAG_TABLE: &[TagEntry] = &[
    TagEntry { name: "HEADERI18NTABLE", tag: Tag::I18NTABLE, ty: TagType::StringArray },
    TagEntry { name: "NAME", tag: Tag::NAME, ty: TagType::String },
    TagEntry { name: "VERSION", tag: Tag::VERSION, ty: TagType::String },
    TagEntry { name: "RELEASE", tag: Tag::RELEASE, ty: TagType::String },
    TagEntry { name: "EPOCH", tag: Tag::EPOCH, ty: TagType::Int32 },
    TagEntry { name: "SUMMARY", tag: Tag::SUMMARY, ty: TagType::I18nString },
    TagEntry { name: "DESCRIPTION", tag: Tag::DESCRIPTION, ty: TagType::I18nString },
    TagEntry { name: "BUILDTIME", tag: Tag::BUILDTIME, ty: TagType::Int32 },
    TagEntry { name: "BUILDHOST", tag: Tag::BUILDHOST, ty: TagType::String },
    TagEntry { name: "SIZE", tag: Tag::SIZE, ty: TagType::Int32 },
    TagEntry { name: "DISTRIBUTION", tag: Tag::DISTRIBUTION, ty: TagType::String },
    TagEntry { name: "VENDOR", tag: Tag::VENDOR, ty: TagType::String },
    TagEntry { name: "LICENSE", tag: Tag::LICENSE, ty: TagType::String },
    TagEntry { name: "PACKAGER", tag: Tag::PACKAGER, ty: TagType::String },
    TagEntry { name: "GROUP", tag: Tag::GROUP, ty: TagType::I18nString },
    TagEntry { name: "URL", tag: Tag::URL, ty: TagType::String },
    TagEntry { name: "OS", tag: Tag::OS, ty: TagType::String },
    TagEntry { name: "ARCH", tag: Tag::ARCH, ty: TagType::String },
    TagEntry { name: "OLDFILENAMES", tag: Tag::OLDFILENAMES, ty: TagType::StringArray },
    TagEntry { name: "FILESIZES", tag: Tag::FILESIZES, ty: TagType::Int32 },
    TagEntry { name: "FILESTATES", tag: Tag::FILESTATES, ty: TagType::Char },
    TagEntry { name: "FILEMODES", tag: Tag::FILEMODES, ty: TagType::Int16 },
    TagEntry { name: "FILERDEVS", tag: Tag::FILERDEVS, ty: TagType::Int16 },
    TagEntry { name: "FILEMTIMES", tag: Tag::FILEMTIMES, ty: TagType::Int32 },
    TagEntry { name: "FILEDIGESTS", tag: Tag::FILEDIGESTS, ty: TagType::StringArray },
    TagEntry { name: "FILELINKTOS", tag: Tag::FILELINKTOS, ty: TagType::StringArray },
    TagEntry { name: "FILEFLAGS", tag: Tag::FILEFLAGS, ty: TagType::Int32 },
    TagEntry { name: "FILEUSERNAME", tag: Tag::FILEUSERNAME, ty: TagType::StringArray },
    TagEntry { name: "FILEGROUPNAME", tag: Tag::FILEGROUPNAME, ty: TagType::StringArray },
    TagEntry { name: "SOURCERPM", tag: Tag::SOURCERPM, ty: TagType::String },
    TagEntry { name: "ARCHIVESIZE", tag: Tag::ARCHIVESIZE, ty: TagType::Int32 },
    TagEntry { name: "FILEDEVICES", tag: Tag::FILEDEVICES, ty: TagType::Int32 },
    TagEntry { name: "FILEINODES", tag: Tag::FILEINODES, ty: TagType::Int32 },
    TagEntry { name: "FILELANGS", tag: Tag::FILELANGS, ty: TagType::StringArray },
    TagEntry { name: "DIRINDEXES", tag: Tag::DIRINDEXES, ty: TagType::Int32 },
    TagEntry { name: "BASENAMES", tag: Tag::BASENAMES, ty: TagType::StringArray },
    TagEntry { name: "DIRNAMES", tag: Tag::DIRNAMES, ty: TagType::StringArray },
    TagEntry { name: "PAYLOADFORMAT", tag: Tag::PAYLOADFORMAT, ty: TagType::String },
    TagEntry { name: "PAYLOADCOMPRESSOR", tag: Tag::PAYLOADCOMPRESSOR, ty: TagType::String },
    TagEntry { name: "PAYLOADFLAGS", tag: Tag::PAYLOADFLAGS, ty: TagType::String },
];

/// Looks up a tag by name, case-insensitively.
///
/// An optional `RPMTAG_`-style prefix in the query is tolerated so that
/// format expressions may use either spelling.
#[must_use]
pub fn tag_by_name(name: &str) -> Option<&'static TagEntry> {
    let name = name
        .strip_prefix("RPMTAG_")
        .or_else(|| name.strip_prefix("rpmtag_"))
        .unwrap_or(name);
    TAG_TABLE.iter().find(|e| e.name.eq_ignore_ascii_case(name))
}

/// Returns the canonical upper-case name of a tag, if known.
#[must_use]
pub fn name_of(tag: Tag) -> Option<&'static str> {
    TAG_TABLE.iter().find(|e| e.tag == tag).map(|e| e.name)
}

/// Returns the presentation name of a tag: first letter upper-case, the
/// rest lower-case, as used by the XML output mode.
#[must_use]
pub fn display_name(tag: Tag) -> Option<String> {
    name_of(tag).map(|name| {
        let mut out = String::with_capacity(name.len());
        let mut chars = name.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
        }
        out.extend(chars.map(|c| c.to_ascii_lowercase()));
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_round_trip() {
        for code in 0..=9 {
            let ty = TagType::from_code(code).expect("valid code");
            assert_eq!(ty as u32, code);
        }
        assert!(TagType::from_code(10).is_none());
    }

    #[test]
    fn alignment_follows_element_size() {
        assert_eq!(TagType::Int16.alignment(), 2);
        assert_eq!(TagType::Int32.alignment(), 4);
        assert_eq!(TagType::Int64.alignment(), 8);
        assert_eq!(TagType::String.alignment(), 1);
        assert_eq!(TagType::Bin.alignment(), 1);
    }

    #[test]
    fn name_lookup_is_case_insensitive_and_tolerates_prefix() {
        assert_eq!(tag_by_name("name").map(|e| e.tag), Some(Tag::NAME));
        assert_eq!(tag_by_name("NAME").map(|e| e.tag), Some(Tag::NAME));
        assert_eq!(tag_by_name("RPMTAG_NAME").map(|e| e.tag), Some(Tag::NAME));
        assert!(tag_by_name("NOSUCHTAG").is_none());
    }

    #[test]
    fn region_range_is_reserved() {
        assert!(Tag::IMAGE.is_region());
        assert!(Tag::SIGNATURES.is_region());
        assert!(Tag::IMMUTABLE.is_region());
        assert!(!Tag::REGIONS.is_region());
        assert!(!Tag::NAME.is_region());
    }

    #[test]
    fn display_name_capitalizes() {
        assert_eq!(display_name(Tag::NAME).as_deref(), Some("Name"));
        assert_eq!(display_name(Tag::FILEDIGESTS).as_deref(), Some("Filedigests"));
    }
}
