//! Filesystem uuid derivation.
//!
//! Filehandles carry uuids of 4, 8 or 16 bytes. Longer uuid sources (a
//! blkid-style uuid string, or the raw hex of the statfs fsid pair) are
//! XOR-folded down to the requested width so that every source length maps
//! deterministically onto every handle width.

use std::{ffi::CString, io, os::unix::ffi::OsStrExt, path::Path};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Filesystems whose block-device uuid is misleading or redundant, so the
/// device probe is skipped and the statfs identity is used instead. Network
/// and pseudo filesystems have no meaningful device uuid at all; btrfs
/// subvolumes share one device uuid but differ in their statfs identity.
const NON_BLKID_FILESYSTEMS: [u64; 11] = [
    0x2fc12fc1,  // ZFS_SUPER_MAGIC
    0x9123683e,  // BTRFS_SUPER_MAGIC
    0xff534d42,  // CIFS_MAGIC_NUMBER
    0x1373,      // DEVFS_SUPER_MAGIC
    0x73757245,  // CODA_SUPER_MAGIC
    0x564c,      // NCP_SUPER_MAGIC
    0x6969,      // NFS_SUPER_MAGIC
    0x9fa0,      // PROC_SUPER_MAGIC
    0x62656572,  // SYSFS_MAGIC
    0x517b,      // SMB_SUPER_MAGIC
    0x01021994,  // TMPFS_MAGIC
];

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// External oracle for the uuid of the block device backing a path.
///
/// The production implementation sits on top of a blkid-style probe; the
/// lookup mechanism is outside this crate.
pub trait DevUuidProbe: Send + Sync {
    /// Returns the device uuid string for `path`, if one is known.
    fn probe(&self, path: &str) -> Option<String>;
}

/// A probe that knows no devices. Derivation falls back to statfs identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBlkid;

/// The statfs identity of a mounted filesystem.
#[derive(Debug, Clone, Copy)]
pub struct FsIdentity {
    /// The filesystem magic number.
    pub magic: u64,
    /// The kernel fsid pair.
    pub fsid: [u32; 2],
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Folds an arbitrary-length uuid-like string into `len` bytes.
///
/// Hex digits are scanned left to right (anything else is skipped), packed
/// big-endian two nibbles per byte, and XOR-accumulated at output position
/// `i/2 mod len`, so sources longer than `2*len` digits wrap around and fold
/// onto earlier bytes. Deterministic and pure.
pub fn fold(source: &str, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    let mut i = 0usize;
    for c in source.chars() {
        let Some(nibble) = c.to_digit(16) else {
            continue;
        };
        let nibble = nibble as u8;
        if i & 1 == 0 {
            out[i / 2] ^= nibble << 4;
        } else {
            out[i / 2] ^= nibble;
        }
        i += 1;
        if i == len * 2 {
            i = 0;
        }
    }
    out
}

/// Derives the uuid of the filesystem at `path`, folded to `len` bytes.
///
/// Variant 0 prefers the block-device uuid, skipping the probe entirely for
/// filesystems on the deny-list, and falls back to the raw hex of the statfs
/// fsid pair. Variants above 0 are reserved for reinterpreting historical
/// filehandles and yield nothing here; callers iterate variants until `None`.
pub fn path_uuid(
    path: &str,
    variant: u32,
    len: usize,
    probe: &dyn DevUuidProbe,
) -> Option<Vec<u8>> {
    if variant > 0 {
        return None;
    }
    let identity = fs_identity(Path::new(path)).ok()?;
    let source = select_uuid_source(&identity, |p| probe.probe(p), path)?;
    Some(fold(&source, len))
}

/// Picks the uuid source for a filesystem: the device uuid unless the magic
/// is on the deny-list or the probe knows nothing, else the statfs fsid hex.
fn select_uuid_source(
    identity: &FsIdentity,
    probe: impl FnOnce(&str) -> Option<String>,
    path: &str,
) -> Option<String> {
    if !NON_BLKID_FILESYSTEMS.contains(&identity.magic) {
        if let Some(source) = probe(path) {
            return Some(source);
        }
    }
    if identity.fsid == [0, 0] {
        return None;
    }
    Some(format!("{:08x}{:08x}", identity.fsid[0], identity.fsid[1]))
}

/// Reads the statfs identity of the filesystem holding `path`.
pub fn fs_identity(path: &Path) -> io::Result<FsIdentity> {
    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
    let mut st: libc::statfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statfs(cpath.as_ptr(), &mut st) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    // fsid_t keeps its int pair behind a private field; it is defined as
    // two c_ints on every libc target this builds for.
    let fsid = unsafe { std::mem::transmute::<libc::fsid_t, [libc::c_int; 2]>(st.f_fsid) };
    Result::Ok(FsIdentity {
        magic: st.f_type as u64,
        fsid: [fsid[0] as u32, fsid[1] as u32],
    })
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl DevUuidProbe for NoBlkid {
    fn probe(&self, _path: &str) -> Option<String> {
        None
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
