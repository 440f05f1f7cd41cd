//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default TTL placed on cache replies, in seconds.
pub const DEFAULT_TTL: u32 = 30 * 60;

/// The TTL placed on a denial written because an export point is not
/// currently mounted. Kept short so the kernel re-asks once the mount lands.
pub const UNMOUNTED_DENY_TTL: u32 = 60;

/// The TTL placed on confirmed fsid-to-path answers. The lookup is expensive
/// and the answer does not change underneath the kernel, so it is effectively
/// durable; `exportfs -f` flushes it when the table changes.
pub const DURABLE_TTL: u32 = 0x7fff_ffff;

/// Minimum delay between retry attempts for one queued request, in seconds.
pub const RETRY_INTERVAL_SECS: u64 = 120;

/// Safety cap on one readiness wait, in seconds. The wait is normally
/// shortened to the time remaining before the next queued retry is due.
pub const WAIT_CAP_SECS: u64 = 24 * 3600;

/// Size of the per-channel request/reply buffer. Matches the kernel's RPC
/// cache channel buffer, so a record that fits here fits in the kernel too.
pub const CHANNEL_BUF_SIZE: usize = 32 * 1024;

/// Directory holding the kernel RPC cache channel files.
pub const PROC_CACHE_DIR: &str = "/proc/net/rpc";

/// Name of the export-authorization cache.
pub const EXPORT_CACHE: &str = "nfsd.export";

/// Name of the filehandle-to-path cache.
pub const FH_CACHE: &str = "nfsd.fh";

/// Kernel filehandle composition channel, with its pre-2.6 fallback.
pub const FILEHANDLE_CHANNELS: [&str; 2] =
    ["/proc/fs/nfsd/filehandle", "/proc/fs/nfs/filehandle"];

/// Where the live mount table is read from.
pub const MOUNTS_PATH: &str = "/proc/self/mounts";
