use std::path::PathBuf;

use clap::Parser;

use crate::config::MOUNTS_PATH;

use super::styles;

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// Exportd daemon - answers the kernel NFS server's export upcalls
#[derive(Debug, Parser)]
#[command(name = "exportd", author, about, version, styles=styles::styles())]
pub struct ExportdArgs {
    /// Path to the exports file
    #[arg(short = 'f', long, value_name = "PATH", default_value = "/etc/exportd/exports.toml")]
    pub exports: PathBuf,

    /// Number of worker processes to fork
    #[arg(short = 't', long, default_value_t = 1)]
    pub workers: usize,

    /// Mount table to consult for crossmount expansion
    #[arg(long, value_name = "PATH", default_value = MOUNTS_PATH)]
    pub mounts: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
