//! The export resolver: the matching and ranking core.
//!
//! Two entry points exist, one per kernel question. Resolve-by-path answers
//! "does domain D have access to path P"; resolve-by-fsid answers "which
//! export does fsid F belong to for domain D", which has the extra wrinkle
//! that the answer may legitimately be *not yet known* when a dependent
//! mount has not landed, and must then be retried instead of denied.

mod fsid_match;
mod resolver;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use fsid_match::*;
pub use resolver::*;
