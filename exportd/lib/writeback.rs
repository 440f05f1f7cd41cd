//! Composition and writing of kernel cache records.
//!
//! Replies (and proactive pushes) go down the same channel files the
//! requests came up on. A record is one line; the kernel treats each write
//! as one complete record, so composition happens in a bounded buffer and an
//! oversized record is refused outright rather than written truncated.

use std::{
    io::{Read, Write},
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use nix::sys::stat;

use crate::{
    config::{CHANNEL_BUF_SIZE, DURABLE_TTL},
    exports::{Export, ExportFlags, ReexportMode},
    paths::is_subdirectory,
    reexport::ReexportDb,
    uuid::{fold, fs_identity, path_uuid, DevUuidProbe},
    wire::{LineBuffer, WordReader},
    CacheError, CacheResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Superblock magic of an NFS mount, the marker of a re-exported filesystem.
const NFS_SUPER_MAGIC: u64 = 0x6969;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Writes a positive `nfsd.export` record granting `domain` access to `path`
/// under the options of `export`.
///
/// When `path` is not the export path itself (a crossed sub-mount), the FSID
/// flag is masked out so the kernel does not hand the sub-filesystem the
/// parent's fsid. A crossed sub-mount that is itself an NFS filesystem on a
/// re-exporting export instead gets a stable number from the fsid database,
/// with the FSID flag forced back on.
pub fn write_export_reply(
    channel: &mut dyn Write,
    domain: &str,
    path: &str,
    export: &Export,
    reexport: &dyn ReexportDb,
    dev_uuid: &dyn DevUuidProbe,
) -> CacheResult<()> {
    let different_fs = path != export.get_path();
    let mut flag_mask = if different_fs {
        !ExportFlags::FSID
    } else {
        ExportFlags::all()
    };
    let mut extra_flags = ExportFlags::empty();
    let mut fsidnum = export.explicit_fsid().unwrap_or(0);

    if different_fs {
        let identity = fs_identity(Path::new(path))
            .map_err(|_| CacheError::NotExportable(format!("unable to statfs {}", path)))?;
        if identity.magic == NFS_SUPER_MAGIC && *export.get_reexport() != ReexportMode::None {
            // A re-exported NFS sub-filesystem must present a stable number
            // from the fsid database, never its transient device.
            let auto = *export.get_reexport() == ReexportMode::AutoFsidnum;
            fsidnum = reexport.fsidnum_by_path(path, auto).ok_or_else(|| {
                CacheError::NotExportable(format!("no fsid number assigned for {}", path))
            })?;
            flag_mask = ExportFlags::all();
            extra_flags = ExportFlags::FSID;
        }
    }
    let flags = (*export.get_flags() | extra_flags) & flag_mask;

    let mut line = LineBuffer::new(CHANNEL_BUF_SIZE);
    line.add_word(domain)
        .add_word(path)
        .add_uint(now_secs() + u64::from(*export.get_ttl()))
        .add_uint(u64::from(flags.bits()))
        .add_uint(u64::from(*export.get_anonuid()))
        .add_uint(u64::from(*export.get_anongid()))
        .add_uint(u64::from(fsidnum));

    if let Some(locations) = export.get_fslocations() {
        line.add_word("fsloc").add_uint(locations.replicas.len() as u64);
        for (host, loc_path) in &locations.replicas {
            line.add_word(host).add_word(loc_path);
        }
        line.add_uint(u64::from(locations.referral));
    }

    if !export.get_secinfo().is_empty() {
        line.add_word("secinfo")
            .add_uint(export.get_secinfo().len() as u64);
        for entry in export.get_secinfo() {
            line.add_uint(u64::from(entry.flavor))
                .add_uint(u64::from((entry.flags | extra_flags.bits()) & flag_mask.bits()));
        }
    }

    match export.get_uuid() {
        Some(explicit) if !different_fs => {
            line.add_word("uuid").add_hex(&fold(explicit, 16));
        }
        _ => {
            // No uuid is needed when the kernel will key on the fsid number.
            if !(*export.get_flags() & flag_mask).contains(ExportFlags::FSID) {
                if let Some(derived) = path_uuid(path, 0, 16, dev_uuid) {
                    line.add_word("uuid").add_hex(&derived);
                }
            }
        }
    }

    if !export.get_xprtsec().is_empty() {
        line.add_word("xprtsec")
            .add_uint(export.get_xprtsec().len() as u64);
        for id in export.get_xprtsec() {
            line.add_uint(u64::from(*id));
        }
    }

    write_record(channel, line.end()?)
}

/// Writes a negative `nfsd.export` record: `domain` has no access to `path`
/// until `ttl` seconds from now.
pub fn write_export_deny(
    channel: &mut dyn Write,
    domain: &str,
    path: &str,
    ttl: u32,
) -> CacheResult<()> {
    let mut line = LineBuffer::new(CHANNEL_BUF_SIZE);
    line.add_word(domain)
        .add_word(path)
        .add_uint(now_secs() + u64::from(ttl));
    write_record(channel, line.end()?)
}

/// Writes an `nfsd.fh` record binding `(domain, fsid)` to `path`, or a
/// negative record when `path` is `None`.
///
/// The lookup behind this answer is expensive and its result does not change
/// underneath the kernel, so the record is effectively permanent; a table
/// reload flushes it explicitly.
pub fn write_fh_reply(
    channel: &mut dyn Write,
    domain: &str,
    fsid_type: u32,
    fsid: &[u8],
    path: Option<&str>,
) -> CacheResult<()> {
    let mut line = LineBuffer::new(CHANNEL_BUF_SIZE);
    line.add_word(domain)
        .add_uint(u64::from(fsid_type))
        .add_hex(fsid)
        .add_uint(u64::from(DURABLE_TTL));
    if let Some(path) = path {
        line.add_word(path);
    }
    write_record(channel, line.end()?)
}

/// Proactively pushes an export into the kernel cache, without waiting for
/// an upcall.
///
/// For a CROSSMOUNT export with a known requested path, the filesystems
/// crossed on the way down are pushed too: the path is walked component by
/// component from the export point and a record is written at every device
/// transition.
pub fn push_export(
    channel: &mut dyn Write,
    domain: &str,
    export: &Export,
    request_path: Option<&str>,
    reexport: &dyn ReexportDb,
    dev_uuid: &dyn DevUuidProbe,
) -> CacheResult<()> {
    write_export_reply(channel, domain, export.get_path(), export, reexport, dev_uuid)?;

    let Some(path) = request_path else {
        return Ok(());
    };
    if !export.get_flags().contains(ExportFlags::CROSSMOUNT)
        || !is_subdirectory(path, export.get_path())
    {
        return Ok(());
    }
    let Ok(stb) = stat::stat(export.get_path().as_str()) else {
        return Ok(());
    };
    let mut dev = stb.st_dev;

    let mut idx = export.get_path().len();
    while idx < path.len() {
        let next = path[idx + 1..]
            .find('/')
            .map(|offset| idx + 1 + offset)
            .unwrap_or(path.len());
        let prefix = &path[..next];
        let Ok(stb) = stat::stat(prefix) else { break };
        if stb.st_dev != dev {
            dev = stb.st_dev;
            write_export_reply(channel, domain, prefix, export, reexport, dev_uuid)?;
        }
        idx = next;
    }
    Ok(())
}

/// Asks the kernel to compose a filehandle for `path` as seen by `domain`,
/// at most `maxlen` bytes long.
pub fn read_filehandle(
    write_half: &mut dyn Write,
    read_half: &mut dyn Read,
    domain: &str,
    path: &str,
    maxlen: u32,
) -> CacheResult<Vec<u8>> {
    let mut line = LineBuffer::new(CHANNEL_BUF_SIZE);
    line.add_word(domain).add_word(path).add_uint(u64::from(maxlen));
    write_record(write_half, line.end()?)?;

    let mut buf = vec![0u8; CHANNEL_BUF_SIZE];
    let n = read_half.read(&mut buf)?;
    let reply = std::str::from_utf8(&buf[..n])
        .map_err(|_| CacheError::MalformedRequest("filehandle reply is not UTF-8".into()))?;
    let Some(reply) = reply.strip_suffix('\n') else {
        return Err(CacheError::MalformedRequest(
            "unterminated filehandle reply".into(),
        ));
    };
    WordReader::new(reply).next_word()
}

/// Writes one composed record in a single write call.
fn write_record(channel: &mut dyn Write, record: &[u8]) -> CacheResult<()> {
    let written = channel.write(record)?;
    if written != record.len() {
        return Err(CacheError::ShortWrite {
            written,
            len: record.len(),
        });
    }
    Ok(())
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::exports::{ExactHost, SecInfoEntry};
    use crate::reexport::NoReexport;
    use crate::uuid::NoBlkid;

    use super::*;

    fn fields(record: &[u8]) -> Vec<String> {
        let text = std::str::from_utf8(record).unwrap();
        let line = text.strip_suffix('\n').unwrap();
        let mut reader = WordReader::new(line);
        let mut out = Vec::new();
        while !reader.at_end() {
            out.push(String::from_utf8_lossy(&reader.next_word().unwrap()).into_owned());
        }
        out
    }

    #[test]
    fn test_export_reply_record_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        let export = Export::builder()
            .path(path)
            .client(Box::new(ExactHost("somehost".into())))
            .flags(ExportFlags::READONLY)
            .ttl(1800)
            .build();

        let mut out = Vec::new();
        write_export_reply(&mut out, "somehost", path, &export, &NoReexport, &NoBlkid).unwrap();

        let fields = fields(&out);
        assert_eq!(fields[0], "somehost");
        assert_eq!(fields[1], path);
        let expiry: u64 = fields[2].parse().unwrap();
        let expected = now_secs() + 1800;
        assert!(expiry >= expected - 5 && expiry <= expected + 5);
        assert_eq!(fields[3], "1");
        assert_eq!(fields[4], "65534");
        assert_eq!(fields[5], "65534");
        assert_eq!(fields[6], "0");
    }

    #[test]
    fn test_explicit_uuid_is_folded_into_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        let export = Export::builder()
            .path(path)
            .client(Box::new(ExactHost("somehost".into())))
            .uuid("deadbeef-dead-beef-dead-beefdeadbeef")
            .build();

        let mut out = Vec::new();
        write_export_reply(&mut out, "somehost", path, &export, &NoReexport, &NoBlkid).unwrap();

        let text = String::from_utf8(out).unwrap();
        let folded = hex::encode(fold("deadbeef-dead-beef-dead-beefdeadbeef", 16));
        assert!(text.contains(&format!("uuid \\x{}", folded)), "{}", text);
    }

    #[test]
    fn test_submount_reply_masks_the_fsid_flag() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap().to_owned();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();

        let export = Export::builder()
            .path(&*root)
            .client(Box::new(ExactHost("somehost".into())))
            .flags(ExportFlags::READONLY | ExportFlags::FSID | ExportFlags::CROSSMOUNT)
            .fsidnum(Some(3))
            .build();

        let mut out = Vec::new();
        write_export_reply(
            &mut out,
            "somehost",
            sub.to_str().unwrap(),
            &export,
            &NoReexport,
            &NoBlkid,
        )
        .unwrap();

        let fields = fields(&out);
        let flags: u32 = fields[3].parse().unwrap();
        assert_eq!(
            ExportFlags::from_bits_truncate(flags),
            ExportFlags::READONLY | ExportFlags::CROSSMOUNT
        );

        // On the export path itself the flag survives.
        let mut out = Vec::new();
        write_export_reply(&mut out, "somehost", &root, &export, &NoReexport, &NoBlkid).unwrap();
        let flags: u32 = fields_at(&out, 3).parse().unwrap();
        assert!(ExportFlags::from_bits_truncate(flags).contains(ExportFlags::FSID));
    }

    fn fields_at(record: &[u8], index: usize) -> String {
        fields(record).remove(index)
    }

    #[test]
    fn test_secinfo_block_follows_the_fixed_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        let export = Export::builder()
            .path(path)
            .client(Box::new(ExactHost("somehost".into())))
            .secinfo(vec![
                SecInfoEntry { flavor: 1, flags: 0 },
                SecInfoEntry {
                    flavor: 390003,
                    flags: 1,
                },
            ])
            .build();

        let mut out = Vec::new();
        write_export_reply(&mut out, "somehost", path, &export, &NoReexport, &NoBlkid).unwrap();

        let fields = fields(&out);
        let at = fields.iter().position(|f| f == "secinfo").unwrap();
        assert_eq!(&fields[at + 1..at + 6], ["2", "1", "0", "390003", "1"]);
    }

    #[test]
    fn test_deny_record_is_domain_path_expiry() {
        let mut out = Vec::new();
        write_export_deny(&mut out, "somehost", "/export/data", 60).unwrap();
        let fields = fields(&out);
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0], "somehost");
        assert_eq!(fields[1], "/export/data");
    }

    #[test]
    fn test_oversized_record_is_refused_not_truncated() {
        let long_path = format!("/{}", "x".repeat(2 * CHANNEL_BUF_SIZE));
        let mut out = Vec::new();
        let err = write_export_deny(&mut out, "somehost", &long_path, 60).unwrap_err();
        assert!(matches!(err, CacheError::EncodingOverflow));
        assert!(out.is_empty());
    }

    #[test]
    fn test_fh_reply_records() {
        let mut out = Vec::new();
        write_fh_reply(&mut out, "somehost", 1, &[0, 0, 0, 7], Some("/export")).unwrap();
        assert_eq!(out, b"somehost 1 \\x00000007 2147483647 /export \n");

        let mut out = Vec::new();
        write_fh_reply(&mut out, "somehost", 1, &[0, 0, 0, 7], None).unwrap();
        assert_eq!(out, b"somehost 1 \\x00000007 2147483647 \n");
    }

    #[test]
    fn test_push_export_writes_the_export_point() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap().to_owned();
        let deep = dir.path().join("a/b");
        std::fs::create_dir_all(&deep).unwrap();

        let export = Export::builder()
            .path(&*root)
            .client(Box::new(ExactHost("somehost".into())))
            .flags(ExportFlags::CROSSMOUNT)
            .build();

        // Everything under the tempdir is one device, so the walk finds no
        // transitions and exactly one record comes out.
        let mut out = Vec::new();
        push_export(
            &mut out,
            "somehost",
            &export,
            Some(deep.to_str().unwrap()),
            &NoReexport,
            &NoBlkid,
        )
        .unwrap();
        let records: Vec<&[u8]> = out.split_inclusive(|&b| b == b'\n').collect();
        assert_eq!(records.len(), 1);
        assert_eq!(fields(records[0])[1], root);
    }

    #[test]
    fn test_read_filehandle_roundtrip() {
        let mut request = Vec::new();
        let mut reply: &[u8] = b"\\x01000701 \n";
        let fh = read_filehandle(&mut request, &mut reply, "somehost", "/export", 64).unwrap();
        assert_eq!(fh, vec![0x01, 0x00, 0x07, 0x01]);
        assert_eq!(request, b"somehost /export 64 \n");
    }

    #[test]
    fn test_reexport_export_point_skips_the_fsid_database() {
        // The export path itself is never statfs-ed and never consulted
        // against the fsid database; the export's own number is written even
        // though the database is empty and the path does not exist.
        let export = Export::builder()
            .path("/no/such/reexport")
            .client(Box::new(ExactHost("somehost".into())))
            .reexport(ReexportMode::AutoFsidnum)
            .flags(ExportFlags::FSID)
            .fsidnum(Some(9))
            .build();

        let mut out = Vec::new();
        write_export_reply(
            &mut out,
            "somehost",
            "/no/such/reexport",
            &export,
            &NoReexport,
            &NoBlkid,
        )
        .unwrap();
        assert_eq!(fields(&out)[6], "9");
    }

    #[test]
    fn test_reexport_submount_on_local_fs_keeps_the_mask() {
        // A crossed sub-mount on a non-NFS filesystem takes the ordinary
        // masked-FSID path: no number substitution, empty database is fine.
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap().to_owned();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();

        let export = Export::builder()
            .path(&*root)
            .client(Box::new(ExactHost("somehost".into())))
            .reexport(ReexportMode::AutoFsidnum)
            .flags(ExportFlags::FSID | ExportFlags::CROSSMOUNT)
            .fsidnum(Some(9))
            .secinfo(vec![SecInfoEntry {
                flavor: 1,
                flags: ExportFlags::FSID.bits(),
            }])
            .build();

        let mut out = Vec::new();
        write_export_reply(
            &mut out,
            "somehost",
            sub.to_str().unwrap(),
            &export,
            &NoReexport,
            &NoBlkid,
        )
        .unwrap();

        let fields = fields(&out);
        let flags: u32 = fields[3].parse().unwrap();
        assert!(!ExportFlags::from_bits_truncate(flags).contains(ExportFlags::FSID));
        // The mask reaches the secinfo flavor flags too.
        let at = fields.iter().position(|f| f == "secinfo").unwrap();
        assert_eq!(&fields[at + 1..at + 4], ["1", "1", "0"]);

        // A sub-mount path that cannot be statfs-ed is not exportable.
        let err = write_export_reply(
            &mut out,
            "somehost",
            "/no/such/submount",
            &export,
            &NoReexport,
            &NoBlkid,
        )
        .unwrap_err();
        assert!(matches!(err, CacheError::NotExportable(_)));
    }
}
