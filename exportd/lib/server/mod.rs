//! The upcall server.
//!
//! The kernel asks its questions by making request lines readable on cache
//! channel files; the server polls the channels, hands each line to the
//! handler registered for that cache, and writes the composed reply back
//! down the same channel. A handler may also decline to answer yet, in
//! which case the request joins a FIFO retry queue and is re-attempted on a
//! bounded interval, at most one retry per wakeup.

mod channel;
mod handlers;
mod serve;
mod workers;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use channel::*;
pub use handlers::*;
pub use serve::*;
pub use workers::*;
