//! `exportd` answers the Linux kernel NFS server's export upcalls.
//!
//! The kernel writes request lines into `/proc/net/rpc/<cache>/channel`
//! files; this crate reads them, resolves the export table entry the request
//! refers to, and writes the line-formatted reply the kernel cache expects.
//! The two hard requests are "does domain D have access to path P?"
//! (`nfsd.export`) and "which export corresponds to fsid F for domain D?"
//! (`nfsd.fh`). Requests that cannot yet be answered definitively, typically
//! because a dependent mountpoint is not mounted, are retried on a bounded
//! interval instead of being answered with a false denial.

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod cli;
pub mod config;
pub mod exports;
pub mod fsid;
pub mod mounts;
pub mod paths;
pub mod reexport;
pub mod resolve;
pub mod server;
pub mod uuid;
pub mod wire;
pub mod writeback;

pub use error::*;
