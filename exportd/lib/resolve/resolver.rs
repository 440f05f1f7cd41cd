use std::{path::PathBuf, sync::Arc};

use tracing::warn;

use crate::{
    config::MOUNTS_PATH,
    exports::{ClientClass, Domain, Export, ExportFlags, ExportTable, ReexportMode},
    fsid::ParsedFsid,
    mounts::SubmountCursor,
    paths::{is_mountpoint, is_subdirectory, same_path},
    reexport::{NoReexport, ReexportDb},
    uuid::{DevUuidProbe, NoBlkid},
};

use super::{match_fsid, FsidMatch};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The answer to a resolve-by-fsid request.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// An export was confirmed, together with the path the match occurred
    /// at (which differs from the export path for crossmount sub-mounts).
    Found {
        /// The authoritative export.
        export: Arc<Export>,
        /// The path the fsid actually matched.
        path: String,
    },

    /// No export can be confirmed *yet*: something the answer depends on,
    /// typically a mount, is not in place. The request must be retried,
    /// not denied, or the kernel would cache a false negative.
    Indeterminate,

    /// No export matches; a definitive denial.
    NoMatch,
}

/// Resolves kernel questions against one consistent export table.
///
/// The table is read-only for the resolver's lifetime; a reload builds a
/// new table and a new resolver.
pub struct Resolver {
    table: Arc<ExportTable>,
    reexport: Arc<dyn ReexportDb>,
    dev_uuid: Arc<dyn DevUuidProbe>,
    mounts_path: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Resolver {
    /// Creates a resolver over `table` with no re-export database and no
    /// device uuid probe.
    pub fn new(table: Arc<ExportTable>) -> Self {
        Self {
            table,
            reexport: Arc::new(NoReexport),
            dev_uuid: Arc::new(NoBlkid),
            mounts_path: PathBuf::from(MOUNTS_PATH),
        }
    }

    /// Attaches a re-export fsid database.
    pub fn with_reexport_db(mut self, reexport: Arc<dyn ReexportDb>) -> Self {
        self.reexport = reexport;
        self
    }

    /// Attaches a block-device uuid probe.
    pub fn with_dev_uuid_probe(mut self, dev_uuid: Arc<dyn DevUuidProbe>) -> Self {
        self.dev_uuid = dev_uuid;
        self
    }

    /// Reads the mount table from `path` instead of `/proc/self/mounts`.
    pub fn with_mounts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.mounts_path = path.into();
        self
    }

    /// The table this resolver answers from.
    pub fn table(&self) -> &Arc<ExportTable> {
        &self.table
    }

    /// The re-export database in use.
    pub fn reexport_db(&self) -> &Arc<dyn ReexportDb> {
        &self.reexport
    }

    /// The device uuid probe in use.
    pub fn dev_uuid_probe(&self) -> &Arc<dyn DevUuidProbe> {
        &self.dev_uuid
    }

    /// Selects the authoritative export for `path`, or `None` when no export
    /// covers it for this domain.
    ///
    /// A candidate matches when `path` is the export's directory or, for
    /// CROSSMOUNT exports, a descendant of it. Among matches: an earlier
    /// class always wins; a V4ROOT export never outranks a non-V4ROOT one;
    /// when CROSSMOUNT matches differ in path length the longer (more
    /// specific) path wins; otherwise the first match found is kept and a
    /// duplicate of the same path in the same class is logged once.
    pub fn resolve_by_path(&self, domain: &Domain, path: &str) -> Option<Arc<Export>> {
        let mut found: Option<(Arc<Export>, ClientClass)> = None;

        for (class, export) in self.table.iter() {
            if !path_matches(export, path) || !export.get_client().matches(domain) {
                continue;
            }
            let replace = match &found {
                None => true,
                // Always prefer non-V4ROOT exports.
                _ if export.get_flags().contains(ExportFlags::V4ROOT) => false,
                Some((best, _)) if best.get_flags().contains(ExportFlags::V4ROOT) => true,
                Some((best, best_class)) => {
                    let crossed = best.get_flags().contains(ExportFlags::CROSSMOUNT)
                        || export.get_flags().contains(ExportFlags::CROSSMOUNT);
                    if crossed && best.get_path().len() != export.get_path().len() {
                        export.get_path().len() > best.get_path().len()
                    } else {
                        if *best_class == class && best.first_warning() {
                            warn!(
                                "{} exported to both {} and {}, arbitrarily choosing options \
                                 from first",
                                path,
                                best.get_client().name(),
                                export.get_client().name()
                            );
                        }
                        false
                    }
                }
            };
            if replace {
                found = Some((Arc::clone(export), class));
            }
        }

        found.map(|(export, _)| export)
    }

    /// Determines the export point for a parsed fsid.
    ///
    /// Scans every export; CROSSMOUNT exports are expanded through the live
    /// mount table so sub-filesystems match without their own entry.
    pub fn resolve_by_fsid(&self, domain: &Domain, parsed: &ParsedFsid) -> Resolution {
        let mut found: Option<(Arc<Export>, String)> = None;
        let mut dev_missing = false;
        let mut did_uncover = false;
        let addressed = domain.addr().is_some();

        for (_, export) in self.table.iter() {
            // A reload may have hidden the subvolume this number belongs
            // to; surface it once before scanning.
            if !did_uncover && *export.get_reexport() != ReexportMode::None {
                if let ParsedFsid::Num(fsidnum) = parsed {
                    self.reexport.uncover_subvolume(*fsidnum);
                    did_uncover = true;
                }
            }

            if !addressed && !export.get_client().matches(domain) {
                continue;
            }
            if let Some(mp) = export.mountpoint_check_path() {
                if !is_mountpoint(mp).unwrap_or(false) {
                    dev_missing = true;
                }
            }

            for path in self.candidate_paths(export) {
                match match_fsid(parsed, export, &path, &*self.reexport, &*self.dev_uuid) {
                    FsidMatch::NoMatch => continue,
                    FsidMatch::Indeterminate => {
                        dev_missing = true;
                        continue;
                    }
                    FsidMatch::Match => {}
                }
                // Address-keyed requests check the client only after an
                // identity match, mirroring the name/address split.
                if addressed && !export.get_client().matches(domain) {
                    continue;
                }

                let replace = match &found {
                    None => true,
                    Some((best, _)) if subexport(export, best) => true,
                    Some((best, best_path))
                        if best.get_path() != export.get_path() && !subexport(best, export) =>
                    {
                        warn!(
                            "{} and {} have same filehandle for {}, using first",
                            best_path,
                            path,
                            domain.display_name()
                        );
                        false
                    }
                    // Same path: take the real export over the synthetic
                    // pseudo-root.
                    Some((best, _)) => best.get_flags().contains(ExportFlags::V4ROOT),
                };
                if replace {
                    found = Some((Arc::clone(export), path));
                }
            }
        }

        match found {
            None if dev_missing => Resolution::Indeterminate,
            None => Resolution::NoMatch,
            Some((export, path)) => {
                if let Some(mp) = export.mountpoint_check_path() {
                    if !is_mountpoint(mp).unwrap_or(false) {
                        // Cannot export this yet; mounting may complete
                        // shortly.
                        return Resolution::Indeterminate;
                    }
                }
                Resolution::Found { export, path }
            }
        }
    }

    /// The paths one export is tested at: its own path, then every live
    /// mount below it when it crosses mounts.
    fn candidate_paths(&self, export: &Arc<Export>) -> Box<dyn Iterator<Item = String>> {
        let own = std::iter::once(export.get_path().clone());
        if export.get_flags().contains(ExportFlags::CROSSMOUNT) {
            let cursor = SubmountCursor::new(&self.mounts_path, export.get_path().clone());
            Box::new(own.chain(cursor))
        } else {
            Box::new(own)
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Does the path match the export: exact directory identity, or a
/// descendant under a CROSSMOUNT export.
fn path_matches(export: &Export, path: &str) -> bool {
    same_path(path, export.get_path())
        || (export.get_flags().contains(ExportFlags::CROSSMOUNT)
            && is_subdirectory(path, export.get_path()))
}

/// True iff `child`'s path descends from `parent` and `parent` crosses
/// mounts.
fn subexport(child: &Export, parent: &Export) -> bool {
    parent.get_flags().contains(ExportFlags::CROSSMOUNT)
        && is_subdirectory(child.get_path(), parent.get_path())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
