//! Decides whether two pathnames denote the same directory.
//!
//! Plain string comparison is not enough: case-insensitive filesystems give
//! one directory several names, and bind mounts give one inode several mount
//! points. When the strings differ we ask the kernel for a filehandle plus
//! mount id for each path (`name_to_handle_at`), which distinguishes
//! bind-mount points; where that call is unsupported we fall back to
//! comparing device and inode from `lstat`, which is usually good enough.

use std::{ffi::CString, os::unix::ffi::OsStrExt, path::Path};

use nix::{errno::Errno, sys::stat};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const MAX_HANDLE_SZ: usize = 128;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

#[repr(C)]
struct HandleBuf {
    handle_bytes: libc::c_uint,
    handle_type: libc::c_int,
    handle: [u8; MAX_HANDLE_SZ],
}

#[derive(PartialEq)]
struct PathHandle {
    handle_type: libc::c_int,
    handle: Vec<u8>,
    mount_id: libc::c_int,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns true for errno values that mean "the path legitimately does not
/// resolve": missing, looping, too long, not a directory, or denied. Anything
/// else is an indeterminate failure and must not be read as a denial.
pub fn path_lookup_error(err: Errno) -> bool {
    matches!(
        err,
        Errno::ELOOP | Errno::ENAMETOOLONG | Errno::ENOENT | Errno::ENOTDIR | Errno::EACCES
    )
}

/// Checks whether two paths refer to the same directory.
pub fn same_path(child: &str, parent: &str) -> bool {
    if child == parent {
        return true;
    }

    // Different component counts cannot name the same directory, whatever
    // the filesystem's case rules are.
    if count_slashes(child) != count_slashes(parent) {
        return false;
    }

    match same_path_by_handle(child, parent) {
        Some(eq) => eq,
        None => same_path_by_inode(child, parent),
    }
}

/// Checks whether `child` is strictly a descendant of `parent`.
pub fn is_subdirectory(child: &str, parent: &str) -> bool {
    if parent == "/" {
        return child.len() > 1;
    }

    let len = parent.len();
    child.as_bytes().get(len) == Some(&b'/') && same_path(&child[..len], parent)
}

/// Checks whether `path` is currently a mount point.
///
/// A path is a mount point when its device differs from its parent's, or
/// when it is its own parent (the root of a filesystem tree).
pub fn is_mountpoint(path: &str) -> Result<bool, Errno> {
    let stb = stat::lstat(path)?;
    let parent = format!("{}/..", path);
    let pstb = stat::lstat(parent.as_str())?;
    Result::Ok(stb.st_dev != pstb.st_dev || stb.st_ino == pstb.st_ino)
}

fn count_slashes(path: &str) -> usize {
    path.bytes().filter(|&b| b == b'/').count()
}

/// Handle-based equality. `None` means the kernel could not say either way
/// and the inode fallback should decide.
fn same_path_by_handle(child: &str, parent: &str) -> Option<bool> {
    let child_handle = match path_handle(child) {
        Result::Ok(handle) => handle,
        Err(_) => return None,
    };
    match path_handle(parent) {
        Result::Ok(parent_handle) => Some(child_handle == parent_handle),
        // The child resolved but the parent does not exist: they differ.
        Err(err) if path_lookup_error(err) => Some(false),
        Err(_) => None,
    }
}

fn same_path_by_inode(child: &str, parent: &str) -> bool {
    // Nearly good enough. A directory bind-mounted in two exported places
    // can still give a false positive here.
    let Result::Ok(sc) = stat::lstat(child) else {
        return false;
    };
    let Result::Ok(sp) = stat::lstat(parent) else {
        return false;
    };
    sc.st_dev == sp.st_dev && sc.st_ino == sp.st_ino
}

/// Asks the kernel for the filehandle and mount id of `path`. The calling
/// process should hold CAP_DAC_READ_SEARCH.
fn path_handle(path: &str) -> Result<PathHandle, Errno> {
    let cpath =
        CString::new(Path::new(path).as_os_str().as_bytes()).map_err(|_| Errno::EINVAL)?;
    let mut buf = HandleBuf {
        handle_bytes: MAX_HANDLE_SZ as libc::c_uint,
        handle_type: 0,
        handle: [0; MAX_HANDLE_SZ],
    };
    let mut mount_id: libc::c_int = 0;

    let rc = unsafe {
        libc::name_to_handle_at(
            libc::AT_FDCWD,
            cpath.as_ptr(),
            (&mut buf as *mut HandleBuf).cast::<libc::file_handle>(),
            &mut mount_id,
            0,
        )
    };
    if rc < 0 {
        return Err(Errno::last());
    }
    Result::Ok(PathHandle {
        handle_type: buf.handle_type,
        handle: buf.handle[..buf.handle_bytes as usize].to_vec(),
        mount_id,
    })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_path_identical_strings() {
        assert!(same_path("/export/data", "/export/data"));
    }

    #[test]
    fn test_same_path_prunes_on_component_count() {
        // No filesystem access happens when the component counts differ.
        assert!(!same_path("/no/such/path/a/b", "/no/such/path"));
    }

    #[test]
    fn test_same_path_on_real_directories() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::create_dir(&a)?;
        std::fs::create_dir(&b)?;

        let a = a.to_str().unwrap();
        let b = b.to_str().unwrap();
        assert!(same_path(a, a));
        assert!(!same_path(a, b));
        Result::Ok(())
    }

    #[test]
    fn test_is_subdirectory() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let parent = dir.path().join("export");
        let child = parent.join("sub");
        std::fs::create_dir_all(&child)?;

        let parent = parent.to_str().unwrap().to_owned();
        let child = child.to_str().unwrap().to_owned();
        assert!(is_subdirectory(&child, &parent));
        assert!(!is_subdirectory(&parent, &child));
        assert!(!is_subdirectory(&parent, &parent));

        // A sibling sharing a name prefix is not a descendant.
        assert!(!is_subdirectory("/exp2", "/export"));

        // Everything but the root itself descends from "/".
        assert!(is_subdirectory("/anything", "/"));
        assert!(is_subdirectory(&child, "/"));
        assert!(!is_subdirectory("/", "/"));
        Result::Ok(())
    }

    #[test]
    fn test_is_mountpoint() {
        assert!(is_mountpoint("/").unwrap());
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_mountpoint(dir.path().to_str().unwrap()).unwrap());
        assert!(matches!(is_mountpoint("/no/such/path"), Err(e) if path_lookup_error(e)));
    }

    #[test]
    fn test_path_lookup_error_classes() {
        assert!(path_lookup_error(Errno::ENOENT));
        assert!(path_lookup_error(Errno::EACCES));
        assert!(!path_lookup_error(Errno::ETIMEDOUT));
        assert!(!path_lookup_error(Errno::EIO));
    }
}
