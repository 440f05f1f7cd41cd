//! Iteration over the live mount table.
//!
//! CROSSMOUNT exports are expanded during a filehandle scan by walking the
//! mount points at or below the export path. The walk is a resumable cursor:
//! the mount table is opened lazily on first use and re-read for every
//! export that needs expansion, so mounts that appear mid-scan are seen.

use std::{
    fs::File,
    io::{BufRead, BufReader, Lines},
    path::{Path, PathBuf},
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A resumable cursor over the mount points strictly below a prefix path.
///
/// Yields mount point paths in mount-table order. For the root prefix every
/// mount point is a proper sub-mount.
pub struct SubmountCursor {
    mounts_path: PathBuf,
    prefix: String,
    lines: Option<Lines<BufReader<File>>>,
    exhausted: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SubmountCursor {
    /// Creates a cursor over `mounts_path` (normally `/proc/self/mounts`)
    /// for mounts below `prefix`.
    pub fn new(mounts_path: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            mounts_path: mounts_path.into(),
            prefix: prefix.into(),
            lines: None,
            exhausted: false,
        }
    }

}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Whether `mount_dir` sits below `prefix`. The root prefix accepts every
/// mount point.
fn below_prefix(prefix: &str, mount_dir: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    mount_dir
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Undoes the `\ooo` octal escaping the kernel applies to mount table
/// fields (space, tab, newline, backslash).
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let octal = &bytes[i + 1..i + 4];
            if octal.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let val = (octal[0] - b'0') * 64 + (octal[1] - b'0') * 8 + (octal[2] - b'0');
                out.push(val);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Iterator for SubmountCursor {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.exhausted {
            return None;
        }
        if self.lines.is_none() {
            let file = match File::open(Path::new(&self.mounts_path)) {
                Ok(file) => file,
                Err(_) => {
                    self.exhausted = true;
                    return None;
                }
            };
            self.lines = Some(BufReader::new(file).lines());
        }

        // Field borrows split so the prefix stays readable while the line
        // iterator is held mutably.
        let Self {
            prefix,
            lines,
            exhausted,
            ..
        } = self;
        let lines = lines.as_mut()?;
        for line in lines {
            let Ok(line) = line else { break };
            let Some(raw_dir) = line.split_ascii_whitespace().nth(1) else {
                continue;
            };
            let mount_dir = unescape_mount_field(raw_dir);
            if below_prefix(prefix, &mount_dir) {
                return Some(mount_dir);
            }
        }
        *exhausted = true;
        None
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
