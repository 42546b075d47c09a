//! Per-package file tables.
//!
//! A `FileInfo` is built from a package header and carries one row per
//! file: names split into a directory pool plus base names, modes,
//! sizes, digests, ownership, and the per-file action decided by the
//! transaction. Archive paths are kept sorted so the state machine can
//! map archive entries back to their rows with a binary search.

use packust_common::{Error, ErrorKind, Result};
use packust_header::{Header, Tag};

use crate::context::{IdResolver, MapFlags};

/// Suffix given to a pre-existing file displaced by an install.
pub const SUFFIX_ORIG: &str = ".rpmorig";
/// Suffix given to a preserved file on erase or save.
pub const SUFFIX_SAVE: &str = ".rpmsave";
/// Suffix given to a newly written file that must not overwrite.
pub const SUFFIX_NEW: &str = ".rpmnew";

/// Per-file flag bits recorded in package metadata.
pub mod file_flags {
    /// Configuration file.
    pub const CONFIG: u32 = 1;
    /// Documentation file.
    pub const DOC: u32 = 1 << 1;
    /// Absence at erase time is not an error.
    pub const MISSINGOK: u32 = 1 << 3;
    /// Never overwrite an existing file.
    pub const NOREPLACE: u32 = 1 << 4;
    /// Listed but carries no payload bytes.
    pub const GHOST: u32 = 1 << 6;
}

/// Whether the element is being installed or erased.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// Files are being installed.
    Added,
    /// Files are being erased.
    Removed,
}

/// Per-file action decided by the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileAction {
    /// No decision recorded.
    #[default]
    Unknown,
    /// Install the file normally.
    Create,
    /// Preserve the old file under a backup suffix.
    Backup,
    /// Preserve the old file under the save suffix.
    Save,
    /// Do not transfer bytes.
    Skip,
    /// Write the new file under the new-file suffix.
    AltName,
    /// Remove the file.
    Remove,
    /// Skip and record the not-installed state.
    SkipNState,
    /// Skip and record the net-shared state.
    SkipNetShared,
    /// Skip a multilib-colored duplicate.
    SkipMultilib,
}

impl FileAction {
    /// Whether this action transfers no payload bytes.
    #[must_use]
    pub const fn is_skipped(self) -> bool {
        matches!(
            self,
            Self::Skip | Self::SkipNState | Self::SkipNetShared | Self::SkipMultilib
        )
    }
}

/// Per-file install state byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum FileState {
    /// Installed normally.
    #[default]
    Normal = 0,
    /// Replaced by another package.
    Replaced = 1,
    /// Payload bytes were never transferred.
    NotInstalled = 2,
    /// Lives on a net-shared path owned elsewhere.
    NetShared = 3,
}

impl FileState {
    const fn from_byte(b: u8) -> Self {
        match b {
            1 => Self::Replaced,
            2 => Self::NotInstalled,
            3 => Self::NetShared,
            _ => Self::Normal,
        }
    }
}

fn required<T>(value: Option<T>, what: &str) -> Result<T> {
    value.ok_or_else(|| {
        Error::new(ErrorKind::BadHeader).with_detail(format!("package header lacks {what}"))
    })
}

fn strip_key(path: &str) -> &str {
    let path = path.strip_prefix("./").unwrap_or(path);
    path.strip_prefix('/').unwrap_or(path)
}

/// The per-package file table.
#[derive(Debug)]
pub struct FileInfo {
    kind: ElementKind,
    name: String,
    dnl: Vec<String>,
    bnl: Vec<String>,
    dil: Vec<u32>,
    fmodes: Vec<u16>,
    fsizes: Vec<u32>,
    fmtimes: Vec<u32>,
    fflags: Vec<u32>,
    fdigests: Vec<Option<String>>,
    flinks: Vec<String>,
    fuser: Vec<String>,
    fgroup: Vec<String>,
    frdevs: Vec<u16>,
    fuids: Vec<u32>,
    fgids: Vec<u32>,
    fstates: Vec<FileState>,
    actions: Vec<FileAction>,
    fmapflags: Vec<MapFlags>,
    apath: Vec<String>,
    apath_order: Vec<usize>,
    striplen: usize,
    archive_size: u64,
    bnlmax: usize,
    dnlmax: usize,
}

impl FileInfo {
    /// Builds the table from a package header.
    ///
    /// Legacy headers carrying a flat file list instead of the split
    /// directory pool are converted on the fly. A missing user or group
    /// name maps to root and clears the corresponding setuid/setgid bit.
    ///
    /// # Errors
    ///
    /// Returns `BadHeader` when a required tag is missing or a directory
    /// index points outside the directory pool.
    pub fn from_header(
        h: &Header,
        kind: ElementKind,
        resolver: Option<&dyn IdResolver>,
    ) -> Result<Self> {
        let name = h.get_str(Tag::NAME).unwrap_or_default().to_owned();

        let (bnl, dnl, dil) = if let Some(bnl) = h.get_string_array(Tag::BASENAMES) {
            let dnl = required(h.get_string_array(Tag::DIRNAMES), "directory names")?;
            let dil = required(h.get_u32_array(Tag::DIRINDEXES), "directory indexes")?;
            (bnl.to_vec(), dnl.to_vec(), dil.to_vec())
        } else if let Some(old) = h.get_string_array(Tag::OLDFILENAMES) {
            Self::split_file_list(old)
        } else {
            // A package without files.
            (Vec::new(), Vec::new(), Vec::new())
        };

        let fc = bnl.len();
        if dil.len() != fc {
            return Err(Error::new(ErrorKind::BadHeader)
                .with_detail("directory index count differs from the file count"));
        }
        let dc = dnl.len();
        for &di in &dil {
            if di as usize >= dc {
                return Err(Error::new(ErrorKind::BadHeader)
                    .with_detail("directory index outside the directory pool"));
            }
        }

        let u32s = |tag: Tag| -> Vec<u32> {
            h.get_u32_array(tag)
                .map_or_else(|| vec![0; fc], <[u32]>::to_vec)
        };
        let u16s = |tag: Tag| -> Vec<u16> {
            h.get_u16_array(tag)
                .map_or_else(|| vec![0; fc], <[u16]>::to_vec)
        };
        let strings = |tag: Tag, default: &str| -> Vec<String> {
            h.get_string_array(tag)
                .map_or_else(|| vec![default.to_owned(); fc], <[String]>::to_vec)
        };

        let fmodes = {
            let modes = h.get_u16_array(Tag::FILEMODES);
            if fc > 0 {
                let modes = required(modes, "file modes")?;
                if modes.len() != fc {
                    return Err(Error::new(ErrorKind::BadHeader)
                        .with_detail("file mode count differs from the file count"));
                }
                modes.to_vec()
            } else {
                Vec::new()
            }
        };
        // The remaining parallel arrays are sized to the file count.
        let mut fsizes = u32s(Tag::FILESIZES);
        fsizes.resize(fc, 0);
        let mut fmtimes = u32s(Tag::FILEMTIMES);
        fmtimes.resize(fc, 0);
        let mut fflags = u32s(Tag::FILEFLAGS);
        fflags.resize(fc, 0);
        let mut frdevs = u16s(Tag::FILERDEVS);
        frdevs.resize(fc, 0);
        let mut fdigests: Vec<Option<String>> = h.get_string_array(Tag::FILEDIGESTS).map_or_else(
            || vec![None; fc],
            |v| {
                v.iter()
                    .map(|d| if d.is_empty() { None } else { Some(d.clone()) })
                    .collect()
            },
        );
        fdigests.resize(fc, None);
        let mut flinks = strings(Tag::FILELINKTOS, "");
        flinks.resize(fc, String::new());
        let mut fuser = strings(Tag::FILEUSERNAME, "root");
        fuser.resize(fc, "root".to_owned());
        let mut fgroup = strings(Tag::FILEGROUPNAME, "root");
        fgroup.resize(fc, "root".to_owned());
        let mut fstates: Vec<FileState> = h.get_bytes(Tag::FILESTATES).map_or_else(
            || vec![FileState::Normal; fc],
            |v| v.iter().map(|&b| FileState::from_byte(b)).collect(),
        );
        fstates.resize(fc, FileState::Normal);
        let archive_size = u64::from(h.get_u32(Tag::ARCHIVESIZE).unwrap_or(0));

        let mut fi = Self {
            kind,
            name,
            dnl,
            bnl,
            dil,
            fmodes,
            fsizes,
            fmtimes,
            fflags,
            fdigests,
            flinks,
            fuser,
            fgroup,
            frdevs,
            fuids: vec![0; fc],
            fgids: vec![0; fc],
            fstates,
            actions: vec![
                match kind {
                    ElementKind::Added => FileAction::Create,
                    ElementKind::Removed => FileAction::Remove,
                };
                fc
            ],
            fmapflags: vec![MapFlags::install_defaults(); fc],
            apath: Vec::new(),
            apath_order: Vec::new(),
            striplen: 0,
            archive_size,
            bnlmax: 0,
            dnlmax: 0,
        };
        fi.resolve_ids(resolver);
        fi.rebuild_paths();
        tracing::debug!(
            package = %fi.name,
            files = fi.len(),
            dirs = fi.dc(),
            "loaded file table"
        );
        Ok(fi)
    }

    /// Converts a flat file list to the split directory pool form.
    fn split_file_list(old: &[String]) -> (Vec<String>, Vec<String>, Vec<u32>) {
        let mut dnl: Vec<String> = Vec::new();
        let mut bnl = Vec::with_capacity(old.len());
        let mut dil = Vec::with_capacity(old.len());
        for path in old {
            let cut = path.rfind('/').map_or(0, |i| i + 1);
            let (dir, base) = path.split_at(cut);
            let di = dnl.iter().position(|d| d == dir).unwrap_or_else(|| {
                dnl.push(dir.to_owned());
                dnl.len() - 1
            });
            dil.push(u32::try_from(di).unwrap_or(0));
            bnl.push(base.to_owned());
        }
        (bnl, dnl, dil)
    }

    fn resolve_ids(&mut self, resolver: Option<&dyn IdResolver>) {
        const SETUID: u16 = 0o4000;
        const SETGID: u16 = 0o2000;
        for i in 0..self.bnl.len() {
            let uid = if self.fuser[i] == "root" {
                Some(0)
            } else {
                resolver.and_then(|r| r.uid_for(&self.fuser[i]))
            };
            self.fuids[i] = uid.unwrap_or_else(|| {
                tracing::warn!(user = %self.fuser[i], "user does not exist - using root");
                self.fmodes[i] &= !SETUID;
                0
            });
            let gid = if self.fgroup[i] == "root" {
                Some(0)
            } else {
                resolver.and_then(|r| r.gid_for(&self.fgroup[i]))
            };
            self.fgids[i] = gid.unwrap_or_else(|| {
                tracing::warn!(group = %self.fgroup[i], "group does not exist - using root");
                self.fmodes[i] &= !SETGID;
                0
            });
        }
    }

    fn rebuild_paths(&mut self) {
        self.apath = (0..self.bnl.len())
            .map(|i| format!("{}{}", self.dnl[self.dil[i] as usize], self.bnl[i]))
            .collect();
        self.apath_order = (0..self.apath.len()).collect();
        self.apath_order
            .sort_by(|&a, &b| strip_key(&self.apath[a]).cmp(strip_key(&self.apath[b])));
        self.bnlmax = self.bnl.iter().map(String::len).max().unwrap_or(0);
        self.dnlmax = self.dnl.iter().map(String::len).max().unwrap_or(0);
    }

    /// Number of files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bnl.len()
    }

    /// Whether the package has no files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bnl.is_empty()
    }

    /// Number of distinct directories.
    #[must_use]
    pub fn dc(&self) -> usize {
        self.dnl.len()
    }

    /// Whether the element installs or erases.
    #[must_use]
    pub const fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Package name, for diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Uncompressed payload size recorded in the header.
    #[must_use]
    pub const fn archive_size(&self) -> u64 {
        self.archive_size
    }

    /// Longest base name length.
    #[must_use]
    pub const fn bnlmax(&self) -> usize {
        self.bnlmax
    }

    /// Longest directory name length.
    #[must_use]
    pub const fn dnlmax(&self) -> usize {
        self.dnlmax
    }

    /// File indices in processing order: forward on install, reverse on
    /// erase.
    #[must_use]
    pub fn indices(&self) -> Vec<usize> {
        match self.kind {
            ElementKind::Added => (0..self.len()).collect(),
            ElementKind::Removed => (0..self.len()).rev().collect(),
        }
    }

    /// Base name of row `i`.
    #[must_use]
    pub fn basename(&self, i: usize) -> &str {
        &self.bnl[i]
    }

    /// Directory name of row `i`.
    #[must_use]
    pub fn dirname(&self, i: usize) -> &str {
        &self.dnl[self.dil[i] as usize]
    }

    /// Mode of row `i`.
    #[must_use]
    pub fn mode(&self, i: usize) -> u16 {
        self.fmodes[i]
    }

    /// Whether row `i` is a directory.
    #[must_use]
    pub fn is_dir(&self, i: usize) -> bool {
        u32::from(self.fmodes[i]) & libc::S_IFMT == libc::S_IFDIR
    }

    /// Size of row `i`.
    #[must_use]
    pub fn size(&self, i: usize) -> u64 {
        u64::from(self.fsizes[i])
    }

    /// Modification time of row `i`.
    #[must_use]
    pub fn mtime(&self, i: usize) -> u32 {
        self.fmtimes[i]
    }

    /// Flag bits of row `i`.
    #[must_use]
    pub fn flags(&self, i: usize) -> u32 {
        self.fflags[i]
    }

    /// Recorded content digest of row `i`.
    #[must_use]
    pub fn digest(&self, i: usize) -> Option<&str> {
        self.fdigests[i].as_deref()
    }

    /// Symlink target of row `i`, if it is a link.
    #[must_use]
    pub fn link_target(&self, i: usize) -> Option<&str> {
        let target = self.flinks.get(i)?;
        if target.is_empty() { None } else { Some(target) }
    }

    /// Owner uid of row `i`.
    #[must_use]
    pub fn uid(&self, i: usize) -> u32 {
        self.fuids[i]
    }

    /// Group id of row `i`.
    #[must_use]
    pub fn gid(&self, i: usize) -> u32 {
        self.fgids[i]
    }

    /// Owner name of row `i`.
    #[must_use]
    pub fn user(&self, i: usize) -> &str {
        &self.fuser[i]
    }

    /// Group name of row `i`.
    #[must_use]
    pub fn group(&self, i: usize) -> &str {
        &self.fgroup[i]
    }

    /// Device number of row `i`, for special files.
    #[must_use]
    pub fn rdev(&self, i: usize) -> u16 {
        self.frdevs[i]
    }

    /// Install state of row `i`.
    #[must_use]
    pub fn state(&self, i: usize) -> FileState {
        self.fstates[i]
    }

    /// Records the install state of row `i`.
    pub fn set_state(&mut self, i: usize, state: FileState) {
        self.fstates[i] = state;
    }

    /// Action of row `i`.
    #[must_use]
    pub fn action(&self, i: usize) -> FileAction {
        self.actions[i]
    }

    /// Sets the action of row `i`.
    pub fn set_action(&mut self, i: usize, action: FileAction) {
        self.actions[i] = action;
    }

    /// Mapping overrides of row `i`.
    #[must_use]
    pub fn map_flags(&self, i: usize) -> MapFlags {
        self.fmapflags[i]
    }

    /// Sets the mapping overrides of row `i`.
    pub fn set_map_flags(&mut self, i: usize, flags: MapFlags) {
        self.fmapflags[i] = flags;
    }

    /// Archive path of row `i`, with the legacy prefix stripped.
    #[must_use]
    pub fn archive_path(&self, i: usize) -> &str {
        &self.apath[i][self.striplen.min(self.apath[i].len())..]
    }

    /// Sets the byte length of the legacy archive-path prefix to strip.
    pub fn set_striplen(&mut self, striplen: usize) {
        self.striplen = striplen;
    }

    /// The `(old, new)` suffix pair the action implies.
    #[must_use]
    pub fn suffixes(&self, i: usize) -> (Option<&'static str>, Option<&'static str>) {
        match (self.actions[i], self.kind) {
            (FileAction::Backup, ElementKind::Added) => (Some(SUFFIX_ORIG), None),
            (FileAction::Backup, ElementKind::Removed)
            | (FileAction::Save, _) => (Some(SUFFIX_SAVE), None),
            (FileAction::AltName, _) => (None, Some(SUFFIX_NEW)),
            _ => (None, None),
        }
    }

    /// Maps row `i` to its filesystem path (root-relative). Directories
    /// never receive the subdir or suffix decorations.
    #[must_use]
    pub fn map_fs_path(&self, i: usize, subdir: Option<&str>, suffix: Option<&str>) -> String {
        let decorate = !self.is_dir(i);
        let mut path = String::with_capacity(self.dnlmax + self.bnlmax + 16);
        path.push_str(self.dirname(i));
        if decorate {
            if let Some(subdir) = subdir {
                path.push_str(subdir);
            }
        }
        path.push_str(self.basename(i));
        if decorate {
            if let Some(suffix) = suffix {
                path.push_str(suffix);
            }
        }
        path
    }

    /// Finds the row whose archive path matches `fsm_path`, comparing
    /// root-relative forms (leading `./` and `/` are not significant).
    #[must_use]
    pub fn map_find(&self, fsm_path: &str) -> Option<usize> {
        let key = strip_key(fsm_path);
        self.apath_order
            .binary_search_by(|&idx| strip_key(&self.apath[idx]).cmp(key))
            .ok()
            .map(|slot| self.apath_order[slot])
    }

    /// Directory names that still own at least one non-skipped file, in
    /// reverse pool order.
    #[must_use]
    pub fn active_dirs(&self) -> Vec<&str> {
        let mut active = vec![false; self.dc()];
        for i in 0..self.len() {
            if !self.actions[i].is_skipped() {
                active[self.dil[i] as usize] = true;
            }
        }
        (0..self.dc())
            .rev()
            .filter(|&d| active[d])
            .map(|d| self.dnl[d].as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packust_header::TagData;

    fn file_header() -> Header {
        let mut h = Header::new();
        h.add(Tag::NAME, TagData::String("demo".into())).expect("add");
        h.add(
            Tag::BASENAMES,
            TagData::StringArray(vec!["motd".into(), "fstab".into(), "bin".into()]),
        )
        .expect("add");
        h.add(
            Tag::DIRNAMES,
            TagData::StringArray(vec!["/etc/".into(), "/usr/".into()]),
        )
        .expect("add");
        h.add(Tag::DIRINDEXES, TagData::Int32(vec![0, 0, 1])).expect("add");
        h.add(
            Tag::FILEMODES,
            TagData::Int16(vec![0o100_644, 0o100_600, 0o040_755]),
        )
        .expect("add");
        h.add(Tag::FILESIZES, TagData::Int32(vec![5, 10, 0])).expect("add");
        h.add(Tag::FILEMTIMES, TagData::Int32(vec![111, 222, 333])).expect("add");
        h.add(Tag::ARCHIVESIZE, TagData::Int32(vec![1024])).expect("add");
        h
    }

    #[test]
    fn table_is_populated_from_header_arrays() {
        let fi = FileInfo::from_header(&file_header(), ElementKind::Added, None).expect("fi");
        assert_eq!(fi.len(), 3);
        assert_eq!(fi.dc(), 2);
        assert_eq!(fi.name(), "demo");
        assert_eq!(fi.archive_path(0), "/etc/motd");
        assert_eq!(fi.archive_path(2), "/usr/bin");
        assert_eq!(fi.size(1), 10);
        assert_eq!(fi.archive_size(), 1024);
        assert!(fi.is_dir(2));
    }

    #[test]
    fn dirindex_out_of_range_is_rejected() {
        let mut h = file_header();
        h.modify(Tag::DIRINDEXES, TagData::Int32(vec![0, 5, 1])).expect("modify");
        let err = FileInfo::from_header(&h, ElementKind::Added, None).expect_err("range");
        assert_eq!(err.kind(), ErrorKind::BadHeader);
    }

    #[test]
    fn legacy_flat_file_list_is_split() {
        let mut h = Header::new();
        h.add(
            Tag::OLDFILENAMES,
            TagData::StringArray(vec!["/etc/motd".into(), "/etc/fstab".into()]),
        )
        .expect("add");
        h.add(Tag::FILEMODES, TagData::Int16(vec![0o100_644, 0o100_644])).expect("add");
        let fi = FileInfo::from_header(&h, ElementKind::Added, None).expect("fi");
        assert_eq!(fi.dc(), 1);
        assert_eq!(fi.dirname(0), "/etc/");
        assert_eq!(fi.basename(1), "fstab");
    }

    #[test]
    fn map_find_normalizes_leading_dot_slash() {
        let fi = FileInfo::from_header(&file_header(), ElementKind::Added, None).expect("fi");
        assert_eq!(fi.map_find("./etc/motd"), Some(0));
        assert_eq!(fi.map_find("/etc/motd"), Some(0));
        assert_eq!(fi.map_find("etc/fstab"), Some(1));
        assert_eq!(fi.map_find("./etc/shadow"), None);
    }

    #[test]
    fn iteration_reverses_for_erase() {
        let added = FileInfo::from_header(&file_header(), ElementKind::Added, None).expect("fi");
        assert_eq!(added.indices(), vec![0, 1, 2]);
        let removed =
            FileInfo::from_header(&file_header(), ElementKind::Removed, None).expect("fi");
        assert_eq!(removed.indices(), vec![2, 1, 0]);
    }

    #[test]
    fn suffixes_follow_the_action_table() {
        let mut fi = FileInfo::from_header(&file_header(), ElementKind::Added, None).expect("fi");
        fi.set_action(0, FileAction::Backup);
        assert_eq!(fi.suffixes(0), (Some(SUFFIX_ORIG), None));
        fi.set_action(0, FileAction::Save);
        assert_eq!(fi.suffixes(0), (Some(SUFFIX_SAVE), None));
        fi.set_action(0, FileAction::AltName);
        assert_eq!(fi.suffixes(0), (None, Some(SUFFIX_NEW)));
        fi.set_action(0, FileAction::Create);
        assert_eq!(fi.suffixes(0), (None, None));

        let mut removed =
            FileInfo::from_header(&file_header(), ElementKind::Removed, None).expect("fi");
        removed.set_action(0, FileAction::Backup);
        assert_eq!(removed.suffixes(0), (Some(SUFFIX_SAVE), None));
    }

    #[test]
    fn map_fs_path_never_decorates_directories() {
        let fi = FileInfo::from_header(&file_header(), ElementKind::Added, None).expect("fi");
        assert_eq!(
            fi.map_fs_path(0, None, Some(";0000002a")),
            "/etc/motd;0000002a"
        );
        assert_eq!(fi.map_fs_path(2, None, Some(".rpmnew")), "/usr/bin");
    }

    #[test]
    fn active_dirs_skip_fully_skipped_directories() {
        let mut fi = FileInfo::from_header(&file_header(), ElementKind::Added, None).expect("fi");
        assert_eq!(fi.active_dirs(), vec!["/usr/", "/etc/"]);
        fi.set_action(2, FileAction::Skip);
        assert_eq!(fi.active_dirs(), vec!["/etc/"]);
    }

    #[test]
    fn missing_user_clears_setuid_and_maps_to_root() {
        struct NoUsers;
        impl IdResolver for NoUsers {
            fn uid_for(&self, _name: &str) -> Option<u32> {
                None
            }
            fn gid_for(&self, _name: &str) -> Option<u32> {
                None
            }
        }
        let mut h = file_header();
        h.add(
            Tag::FILEUSERNAME,
            TagData::StringArray(vec!["ghost".into(), "root".into(), "root".into()]),
        )
        .expect("add");
        h.modify(
            Tag::FILEMODES,
            TagData::Int16(vec![0o104_755, 0o100_600, 0o040_755]),
        )
        .expect("modify");
        let fi = FileInfo::from_header(&h, ElementKind::Added, Some(&NoUsers)).expect("fi");
        assert_eq!(fi.uid(0), 0);
        assert_eq!(fi.mode(0) & 0o4000, 0, "setuid bit must be cleared");
        assert_eq!(fi.mode(1), 0o100_600, "resolved rows keep their mode");
    }
}
