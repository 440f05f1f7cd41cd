use std::{io::Write, sync::Arc};

use tracing::{debug, trace, warn};

use crate::{
    config::{DEFAULT_TTL, EXPORT_CACHE, FH_CACHE, UNMOUNTED_DENY_TTL},
    exports::{AddrResolver, Domain, LiteralAddrResolver},
    fsid::{FsidType, ParsedFsid},
    paths::{is_mountpoint, path_lookup_error},
    resolve::{Resolution, Resolver},
    wire::WordReader,
    writeback::{write_export_deny, write_export_reply, write_fh_reply},
    CacheError, CacheResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// What the server should do with a request after a handler saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The request is finished: answered, or dropped on purpose.
    Done,

    /// The request cannot be answered definitively yet and must be retried
    /// later.
    Delay,
}

/// A per-cache request handler.
pub trait UpcallHandler: Send + Sync {
    /// The kernel cache whose requests this handler answers.
    fn cache_name(&self) -> &'static str;

    /// Handles one request line, writing any reply to `reply`.
    fn handle(&self, line: &str, reply: &mut dyn Write) -> CacheResult<HandleOutcome>;
}

/// Answers `nfsd.export` requests: "does domain D have access to path P?".
pub struct ExportHandler {
    resolver: Arc<Resolver>,
    addr_resolver: Box<dyn AddrResolver>,
}

/// Answers `nfsd.fh` requests: "which export does fsid F belong to for
/// domain D?".
pub struct FhHandler {
    resolver: Arc<Resolver>,
    addr_resolver: Box<dyn AddrResolver>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ExportHandler {
    /// Creates a handler over `resolver`.
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self {
            resolver,
            addr_resolver: Box::new(LiteralAddrResolver),
        }
    }

    /// Replaces the `$ip` address resolver.
    pub fn with_addr_resolver(mut self, addr_resolver: Box<dyn AddrResolver>) -> Self {
        self.addr_resolver = addr_resolver;
        self
    }
}

impl FhHandler {
    /// Creates a handler over `resolver`.
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self {
            resolver,
            addr_resolver: Box::new(LiteralAddrResolver),
        }
    }

    /// Replaces the `$ip` address resolver.
    pub fn with_addr_resolver(mut self, addr_resolver: Box<dyn AddrResolver>) -> Self {
        self.addr_resolver = addr_resolver;
        self
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl UpcallHandler for ExportHandler {
    fn cache_name(&self) -> &'static str {
        EXPORT_CACHE
    }

    fn handle(&self, line: &str, reply: &mut dyn Write) -> CacheResult<HandleOutcome> {
        let mut reader = WordReader::new(line);
        let dom = reader.next_str()?;
        let path = reader.next_str()?;
        trace!("nfsd_export: inbuf '{} {}'", dom, path);

        let Some(domain) = Domain::from_request(&dom, &*self.addr_resolver) else {
            // Unresolvable address literal; no answer is possible, the
            // kernel request times out on its own.
            debug!("nfsd_export: unresolvable domain {}", dom);
            return Ok(HandleOutcome::Done);
        };

        let Some(export) = self.resolver.resolve_by_path(&domain, &path) else {
            write_export_deny(reply, &dom, &path, DEFAULT_TTL)?;
            return Ok(HandleOutcome::Done);
        };

        if let Some(mp) = export.mountpoint_check_path() {
            match is_mountpoint(mp) {
                Result::Ok(true) => {}
                Result::Ok(false) => {
                    // The export point is not mounted; deny briefly so the
                    // kernel re-asks once the mount lands.
                    write_export_deny(reply, &dom, &path, UNMOUNTED_DENY_TTL)?;
                    return Ok(HandleOutcome::Done);
                }
                Err(err) if path_lookup_error(err) => {
                    write_export_deny(reply, &dom, &path, UNMOUNTED_DENY_TTL)?;
                    return Ok(HandleOutcome::Done);
                }
                // Indeterminate; answering would cache a stale decision.
                Err(_) => return Ok(HandleOutcome::Done),
            }
        }

        let written = write_export_reply(
            reply,
            &dom,
            &path,
            &export,
            &**self.resolver.reexport_db(),
            &**self.resolver.dev_uuid_probe(),
        );
        match written {
            Result::Ok(()) => {}
            Err(err @ (CacheError::Io(_) | CacheError::ShortWrite { .. })) => return Err(err),
            Err(err) => {
                warn!(
                    "Cannot export {}, possibly unsupported filesystem or fsid= required ({})",
                    path, err
                );
                write_export_deny(reply, &dom, &path, DEFAULT_TTL)?;
            }
        }
        Ok(HandleOutcome::Done)
    }
}

impl UpcallHandler for FhHandler {
    fn cache_name(&self) -> &'static str {
        FH_CACHE
    }

    fn handle(&self, line: &str, reply: &mut dyn Write) -> CacheResult<HandleOutcome> {
        let mut reader = WordReader::new(line);
        let dom = reader.next_str()?;
        let fsid_type_raw = reader.next_u32()?;
        let fsid = reader.next_word()?;
        trace!("nfsd_fh: inbuf '{} {}'", dom, fsid_type_raw);

        // A malformed fsid still gets a definitive negative; there is
        // nothing a retry could change.
        let parsed = match FsidType::try_from(fsid_type_raw)
            .and_then(|fsid_type| ParsedFsid::parse(fsid_type, &fsid))
        {
            Result::Ok(parsed) => parsed,
            Err(err) => {
                debug!("nfsd_fh: {}", err);
                write_fh_reply(reply, &dom, fsid_type_raw, &fsid, None)?;
                return Ok(HandleOutcome::Done);
            }
        };

        let Some(domain) = Domain::from_request(&dom, &*self.addr_resolver) else {
            debug!("nfsd_fh: unresolvable domain {}", dom);
            return Ok(HandleOutcome::Done);
        };

        match self.resolver.resolve_by_fsid(&domain, &parsed) {
            Resolution::Found { path, .. } => {
                write_fh_reply(reply, &dom, fsid_type_raw, &fsid, Some(&path))?;
            }
            Resolution::NoMatch => {
                write_fh_reply(reply, &dom, fsid_type_raw, &fsid, None)?;
            }
            Resolution::Indeterminate => {
                // Answering now would cache a false negative; hold the
                // request and retry once the missing mount may have landed.
                return Ok(HandleOutcome::Delay);
            }
        }
        Ok(HandleOutcome::Done)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::exports::{ExactHost, Export, ExportFlags, ExportTable};

    use super::*;

    fn resolver_for(path: &str) -> Arc<Resolver> {
        let mut table = ExportTable::new();
        table.insert(
            Export::builder()
                .path(path)
                .client(Box::new(ExactHost("somehost".into())))
                .flags(ExportFlags::READONLY | ExportFlags::FSID)
                .fsidnum(Some(7))
                .build(),
        );
        Arc::new(Resolver::new(Arc::new(table)))
    }

    #[test]
    fn test_export_request_yields_a_grant() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        let handler = ExportHandler::new(resolver_for(path));

        let mut reply = Vec::new();
        let outcome = handler
            .handle(&format!("somehost {}", path), &mut reply)
            .unwrap();
        assert_eq!(outcome, HandleOutcome::Done);

        let text = String::from_utf8(reply).unwrap();
        let fields: Vec<&str> = text.trim_end().split(' ').collect();
        assert_eq!(fields[0], "somehost");
        assert_eq!(fields[1], path);
        // flags, anonuid, anongid, fsid
        assert_eq!(fields[3], "8193");
        assert_eq!(fields[4], "65534");
        assert_eq!(fields[5], "65534");
        assert_eq!(fields[6], "7");
    }

    #[test]
    fn test_export_request_from_stranger_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        let handler = ExportHandler::new(resolver_for(path));

        let mut reply = Vec::new();
        handler
            .handle(&format!("stranger {}", path), &mut reply)
            .unwrap();

        let text = String::from_utf8(reply).unwrap();
        assert_eq!(text.trim_end().split(' ').count(), 3);
    }

    #[test]
    fn test_fh_request_positive_and_negative() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        let handler = FhHandler::new(resolver_for(path));

        let mut reply = Vec::new();
        let outcome = handler
            .handle("somehost 1 \\x00000007", &mut reply)
            .unwrap();
        assert_eq!(outcome, HandleOutcome::Done);
        let text = String::from_utf8(reply).unwrap();
        assert!(text.ends_with(&format!("{} \n", path)), "{}", text);

        let mut reply = Vec::new();
        handler.handle("somehost 1 \\x00000008", &mut reply).unwrap();
        let text = String::from_utf8(reply).unwrap();
        assert_eq!(text, "somehost 1 \\x00000008 2147483647 \n");
    }

    #[test]
    fn test_fh_request_for_unmounted_export_is_delayed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        let mut table = ExportTable::new();
        table.insert(
            Export::builder()
                .path(path)
                .client(Box::new(ExactHost("somehost".into())))
                .flags(ExportFlags::FSID)
                .fsidnum(Some(7))
                .mountpoint("")
                .build(),
        );
        let handler = FhHandler::new(Arc::new(Resolver::new(Arc::new(table))));

        let mut reply = Vec::new();
        let outcome = handler
            .handle("somehost 1 \\x00000007", &mut reply)
            .unwrap();
        assert_eq!(outcome, HandleOutcome::Delay);
        assert!(reply.is_empty());
    }

    #[test]
    fn test_missing_fields_error_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();

        let handler = ExportHandler::new(resolver_for(path));
        assert!(handler.handle("somehost", &mut Vec::new()).is_err());

        let handler = FhHandler::new(resolver_for(path));
        assert!(handler.handle("somehost 1", &mut Vec::new()).is_err());
    }

    #[test_log::test]
    fn test_bad_fsid_is_answered_negatively_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        let handler = FhHandler::new(resolver_for(path));

        // Unknown type.
        let mut reply = Vec::new();
        let outcome = handler.handle("somehost 99 \\x00", &mut reply).unwrap();
        assert_eq!(outcome, HandleOutcome::Done);
        assert_eq!(reply, b"somehost 99 \\x00 2147483647 \n");

        // Wrong length for the type.
        let mut reply = Vec::new();
        handler.handle("somehost 1 \\x00", &mut reply).unwrap();
        assert_eq!(reply, b"somehost 1 \\x00 2147483647 \n");
    }
}
