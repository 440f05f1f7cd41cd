//! Seam to the re-export fsid database.
//!
//! Re-exported NFS filesystems cannot use device numbers as identities, so a
//! separate database assigns stable fsid numbers to paths. Maintaining that
//! database is outside this crate; the resolver and write-back only need the
//! two lookups below.

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// External database mapping re-exported paths to fsid numbers.
pub trait ReexportDb: Send + Sync {
    /// Returns the fsid number recorded for `path`. When `may_allocate` is
    /// true a missing entry may be created on the fly (auto-fsidnum mode).
    fn fsidnum_by_path(&self, path: &str, may_allocate: bool) -> Option<u32>;

    /// Makes the subvolume carrying `fsidnum` visible again after a reload,
    /// so a filehandle lookup can land on it.
    fn uncover_subvolume(&self, _fsidnum: u32) {}
}

/// A database that knows no re-exports.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReexport;

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl ReexportDb for NoReexport {
    fn fsidnum_by_path(&self, _path: &str, _may_allocate: bool) -> Option<u32> {
        None
    }
}
