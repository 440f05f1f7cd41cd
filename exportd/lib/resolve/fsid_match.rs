use nix::sys::stat::{self, SFlag};

use crate::{
    exports::{Export, ExportFlags, ReexportMode},
    fsid::ParsedFsid,
    paths::{is_mountpoint, path_lookup_error},
    reexport::ReexportDb,
    uuid::{fold, path_uuid, DevUuidProbe},
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The outcome of testing one candidate path against a parsed fsid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsidMatch {
    /// The candidate path is the filesystem the fsid names.
    Match,

    /// The candidate path is definitely not it.
    NoMatch,

    /// The candidate could not be inspected for a reason other than a
    /// legitimate path-resolution failure; no definitive answer may be
    /// given while this stands.
    Indeterminate,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Tests whether the filesystem identity of `path` matches `parsed`, under
/// the options of `export`.
pub fn match_fsid(
    parsed: &ParsedFsid,
    export: &Export,
    path: &str,
    reexport: &dyn ReexportDb,
    dev_uuid: &dyn DevUuidProbe,
) -> FsidMatch {
    let stb = match stat::stat(path) {
        Ok(stb) => stb,
        Err(err) if path_lookup_error(err) => return FsidMatch::NoMatch,
        Err(_) => return FsidMatch::Indeterminate,
    };
    let fmt = stb.st_mode & SFlag::S_IFMT.bits();
    if fmt != SFlag::S_IFDIR.bits() && fmt != SFlag::S_IFREG.bits() {
        return FsidMatch::NoMatch;
    }

    match parsed {
        ParsedFsid::Dev { .. } | ParsedFsid::MajorMinor { .. } | ParsedFsid::EncodeDev { .. } => {
            let (major, minor) = parsed.device().unwrap_or_default();
            if parsed.inode() != Some(stb.st_ino)
                || u64::from(major) != stat::major(stb.st_dev)
                || u64::from(minor) != stat::minor(stb.st_dev)
            {
                return FsidMatch::NoMatch;
            }
            FsidMatch::Match
        }
        ParsedFsid::Num(fsidnum) => {
            if export.explicit_fsid() == Some(*fsidnum) {
                return FsidMatch::Match;
            }
            // A re-export can own the number through the fsid database even
            // without an explicit fsid= option.
            if export.get_flags().contains(ExportFlags::CROSSMOUNT)
                && *export.get_reexport() != ReexportMode::None
                && reexport.fsidnum_by_path(path, false) == Some(*fsidnum)
            {
                return FsidMatch::Match;
            }
            FsidMatch::NoMatch
        }
        ParsedFsid::Uuid4Inum { .. } | ParsedFsid::Uuid16Inum { .. } => {
            if parsed.inode() != Some(stb.st_ino) {
                return FsidMatch::NoMatch;
            }
            check_uuid(parsed, export, path, dev_uuid)
        }
        ParsedFsid::Uuid8 { .. } | ParsedFsid::Uuid16 { .. } => {
            // A statfs-derived uuid is only trustworthy at a mount boundary.
            match is_mountpoint(path) {
                Ok(true) => check_uuid(parsed, export, path, dev_uuid),
                Ok(false) => FsidMatch::NoMatch,
                Err(err) if path_lookup_error(err) => FsidMatch::NoMatch,
                Err(_) => FsidMatch::Indeterminate,
            }
        }
    }
}

fn check_uuid(
    parsed: &ParsedFsid,
    export: &Export,
    path: &str,
    dev_uuid: &dyn DevUuidProbe,
) -> FsidMatch {
    let wanted = parsed.uuid().unwrap_or_default();
    let len = wanted.len();

    if let Some(explicit) = export.get_uuid() {
        if fold(explicit, len) == wanted {
            return FsidMatch::Match;
        }
        return FsidMatch::NoMatch;
    }

    let mut variant = 0;
    while let Some(derived) = path_uuid(path, variant, len, dev_uuid) {
        if derived == wanted {
            return FsidMatch::Match;
        }
        variant += 1;
    }
    FsidMatch::NoMatch
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
