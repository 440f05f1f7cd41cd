//! Configuration defaults and the exports-file loader.

mod default;
mod file;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use default::*;
pub use file::*;
