use std::sync::atomic::{AtomicBool, Ordering};

use bitflags::bitflags;
use getset::Getters;
use typed_builder::TypedBuilder;

use crate::config::DEFAULT_TTL;

use super::ClientSpec;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

bitflags! {
    /// Export option flags, bit-compatible with the kernel's `NFSEXP_*` set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExportFlags: u32 {
        /// Read-only export.
        const READONLY = 0x0001;
        /// Allow requests from unprivileged ports.
        const INSECURE_PORT = 0x0002;
        /// Map root to the anonymous uid/gid.
        const ROOTSQUASH = 0x0004;
        /// Map every uid/gid to the anonymous pair.
        const ALLSQUASH = 0x0008;
        /// Acknowledge writes before they reach stable storage.
        const ASYNC = 0x0010;
        /// Gather writes.
        const GATHERED_WRITES = 0x0020;
        /// Suppress READDIRPLUS on this export.
        const NOREADDIRPLUS = 0x0040;
        /// Expose security labels.
        const SECURITY_LABEL = 0x0080;
        /// Hide nothing: expose covered mounts.
        const NOHIDE = 0x0200;
        /// Skip the subtree check on filehandle verification.
        const NOSUBTREECHECK = 0x0400;
        /// Do not require authentication for NLM.
        const NOAUTHNLM = 0x0800;
        /// The export carries an explicit `fsid=` number.
        const FSID = 0x2000;
        /// Transparently cover filesystems mounted beneath the export path.
        const CROSSMOUNT = 0x4000;
        /// Disable ACLs.
        const NOACL = 0x8000;
        /// Synthetic pseudo-root export, lowest selection priority.
        const V4ROOT = 0x10000;
        /// pNFS layouts may be handed out.
        const PNFS = 0x20000;
    }
}

/// How an export participates in NFS re-exporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReexportMode {
    /// Not a re-export.
    #[default]
    None,

    /// Re-export with fsid numbers pre-assigned in the re-export database.
    PredefinedFsidnum,

    /// Re-export with fsid numbers allocated on demand.
    AutoFsidnum,
}

/// One entry of a `sec=` list: an RPC security flavor plus the export flags
/// that apply to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecInfoEntry {
    /// The RPC pseudoflavor number.
    pub flavor: u32,
    /// Per-flavor export flags.
    pub flags: u32,
}

/// Filesystem location data for referrals and replicas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsLocations {
    /// `(host, path)` replica pairs, in preference order.
    pub replicas: Vec<(String, String)>,
    /// True when the location set is a referral rather than a replica list.
    pub referral: bool,
}

/// One export table entry.
///
/// Owned by the table, read-only during request processing. The path is
/// canonical: no trailing slash unless it is exactly `/`.
#[derive(Debug, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Export {
    /// Absolute canonical export path.
    #[builder(setter(transform = |path: impl Into<String>| canonical_path(path.into())))]
    path: String,

    /// The client specification this entry was written for.
    client: Box<dyn ClientSpec>,

    /// Export option flags.
    #[builder(default)]
    flags: ExportFlags,

    /// Explicit `fsid=` number, when one was assigned.
    #[builder(default)]
    fsidnum: Option<u32>,

    /// Explicit uuid string, when one was assigned.
    #[builder(default, setter(strip_option, into))]
    uuid: Option<String>,

    /// Anonymous uid.
    #[builder(default = 65534)]
    anonuid: u32,

    /// Anonymous gid.
    #[builder(default = 65534)]
    anongid: u32,

    /// Reply TTL in seconds.
    #[builder(default = DEFAULT_TTL)]
    ttl: u32,

    /// Security flavor list, empty when no `sec=` option was given.
    #[builder(default)]
    secinfo: Vec<SecInfoEntry>,

    /// Transport security policy ids, empty when unrestricted.
    #[builder(default)]
    xprtsec: Vec<u32>,

    /// Filesystem location data for referrals/replicas.
    #[builder(default)]
    fslocations: Option<FsLocations>,

    /// Mountpoint override: this path must be mounted before the export is
    /// usable. An empty string means the export path itself.
    #[builder(default, setter(strip_option, into))]
    mountpoint: Option<String>,

    /// Re-export participation.
    #[builder(default)]
    reexport: ReexportMode,

    #[builder(default, setter(skip))]
    #[getset(skip)]
    warned: AtomicBool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Export {
    /// The explicit fsid number, present only when the FSID flag is set.
    pub fn explicit_fsid(&self) -> Option<u32> {
        if self.flags.contains(ExportFlags::FSID) {
            self.fsidnum
        } else {
            None
        }
    }

    /// The path that must be a mountpoint before this export is usable, if a
    /// `mountpoint` option was given.
    pub fn mountpoint_check_path(&self) -> Option<&str> {
        self.mountpoint.as_deref().map(|mp| {
            if mp.is_empty() {
                self.path.as_str()
            } else {
                mp
            }
        })
    }

    /// Marks the overlapping-export warning as emitted; returns true the
    /// first time only.
    pub(crate) fn first_warning(&self) -> bool {
        !self.warned.swap(true, Ordering::Relaxed)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Strips trailing slashes, keeping the root path intact.
pub fn canonical_path(path: String) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else {
        trimmed.to_owned()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
