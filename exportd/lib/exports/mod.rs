//! The export table and its entries.
//!
//! Exports are long-lived and read-only while requests are being serviced;
//! the table is rebuilt wholesale on reload and swapped in between requests.
//! Entries are partitioned into priority classes by how their client
//! specification was written, and classes are scanned in fixed priority
//! order during resolution.

mod client;
mod export;
mod table;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use client::*;
pub use export::*;
pub use table::*;
