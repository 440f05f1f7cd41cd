use std::{fs, path::Path};

use serde::Deserialize;

use crate::{
    exports::{
        Anonymous, ClientSpec, ExactHost, Export, ExportFlags, ExportTable, ReexportMode,
        Wildcard,
    },
    config::DEFAULT_TTL,
    CacheError, CacheResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The deserialized exports file.
///
/// One `[[export]]` table per export point; each entry names the clients it
/// applies to and carries the option set shared by those clients.
#[derive(Debug, Deserialize)]
pub struct ExportsConfig {
    /// The export entries, in file order. File order is also tie-break
    /// order within one client class.
    #[serde(default)]
    pub export: Vec<ExportEntry>,
}

/// One entry of the exports file.
#[derive(Debug, Deserialize)]
pub struct ExportEntry {
    /// Absolute path of the export point.
    pub path: String,

    /// Client specifications this entry applies to. `*` grants everyone.
    #[serde(default = "default_clients")]
    pub clients: Vec<String>,

    /// Refuse writes.
    #[serde(default)]
    pub ro: bool,

    /// Allow requests from unprivileged source ports.
    #[serde(default)]
    pub insecure: bool,

    /// Map root to the anonymous identity.
    #[serde(default)]
    pub root_squash: bool,

    /// Map everyone to the anonymous identity.
    #[serde(default)]
    pub all_squash: bool,

    /// Acknowledge writes before they reach stable storage.
    #[serde(default, rename = "async")]
    pub async_writes: bool,

    /// Expose filesystems mounted beneath the export point.
    #[serde(default)]
    pub crossmnt: bool,

    /// Expose covered mounts.
    #[serde(default)]
    pub nohide: bool,

    /// Skip the subtree check on filehandle verification.
    #[serde(default)]
    pub no_subtree_check: bool,

    /// Explicit fsid number.
    #[serde(default)]
    pub fsid: Option<u32>,

    /// Explicit filesystem uuid.
    #[serde(default)]
    pub uuid: Option<String>,

    /// Anonymous uid.
    #[serde(default = "default_anon_id")]
    pub anonuid: u32,

    /// Anonymous gid.
    #[serde(default = "default_anon_id")]
    pub anongid: u32,

    /// Reply TTL in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Path that must be mounted before the export is usable; an empty
    /// string means the export point itself.
    #[serde(default)]
    pub mountpoint: Option<String>,

    /// Re-export participation: `auto-fsidnum` or `predefined-fsidnum`.
    #[serde(default)]
    pub reexport: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Loads and parses the exports file at `path`.
pub fn load_exports(path: &Path) -> CacheResult<ExportTable> {
    parse_exports(&fs::read_to_string(path)?)
}

/// Parses exports file text into a ready export table.
pub fn parse_exports(text: &str) -> CacheResult<ExportTable> {
    let config: ExportsConfig = toml::from_str(text).map_err(CacheError::custom)?;
    let mut table = ExportTable::new();

    for entry in config.export {
        let flags = entry.flags()?;
        let reexport = entry.reexport_mode()?;
        for client in &entry.clients {
            let builder = Export::builder()
                .path(&entry.path)
                .client(client_spec(client))
                .flags(flags)
                .fsidnum(entry.fsid)
                .anonuid(entry.anonuid)
                .anongid(entry.anongid)
                .ttl(entry.ttl)
                .reexport(reexport);
            let export = match (&entry.uuid, &entry.mountpoint) {
                (Some(uuid), Some(mp)) => builder.uuid(uuid).mountpoint(mp).build(),
                (Some(uuid), None) => builder.uuid(uuid).build(),
                (None, Some(mp)) => builder.mountpoint(mp).build(),
                (None, None) => builder.build(),
            };
            table.insert(export);
        }
    }
    Ok(table)
}

/// Classifies one client specification string.
fn client_spec(name: &str) -> Box<dyn ClientSpec> {
    if name.is_empty() || name == "*" {
        Box::new(Anonymous)
    } else if name.contains('*') || name.contains('?') {
        Box::new(Wildcard(name.to_owned()))
    } else {
        Box::new(ExactHost(name.to_owned()))
    }
}

fn default_clients() -> Vec<String> {
    vec!["*".to_owned()]
}

fn default_anon_id() -> u32 {
    65534
}

fn default_ttl() -> u32 {
    DEFAULT_TTL
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ExportEntry {
    fn flags(&self) -> CacheResult<ExportFlags> {
        let mut flags = ExportFlags::empty();
        let mut set = |on: bool, flag: ExportFlags| {
            if on {
                flags |= flag;
            }
        };
        set(self.ro, ExportFlags::READONLY);
        set(self.insecure, ExportFlags::INSECURE_PORT);
        set(self.root_squash, ExportFlags::ROOTSQUASH);
        set(self.all_squash, ExportFlags::ALLSQUASH);
        set(self.async_writes, ExportFlags::ASYNC);
        set(self.crossmnt, ExportFlags::CROSSMOUNT);
        set(self.nohide, ExportFlags::NOHIDE);
        set(self.no_subtree_check, ExportFlags::NOSUBTREECHECK);
        set(self.fsid.is_some(), ExportFlags::FSID);

        if self.reexport.is_some() && !self.crossmnt {
            return Err(CacheError::MalformedRequest(format!(
                "{}: reexport requires crossmnt",
                self.path
            )));
        }
        Ok(flags)
    }

    fn reexport_mode(&self) -> CacheResult<ReexportMode> {
        match self.reexport.as_deref() {
            None => Ok(ReexportMode::None),
            Some("auto-fsidnum") => Ok(ReexportMode::AutoFsidnum),
            Some("predefined-fsidnum") => Ok(ReexportMode::PredefinedFsidnum),
            Some(other) => Err(CacheError::MalformedRequest(format!(
                "{}: unknown reexport mode: {}",
                self.path, other
            ))),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
