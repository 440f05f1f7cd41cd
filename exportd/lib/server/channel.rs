use std::{
    fs::{File, OpenOptions},
    io::Read,
    os::fd::{AsFd, BorrowedFd},
    path::Path,
};

use crate::{
    config::{CHANNEL_BUF_SIZE, PROC_CACHE_DIR},
    CacheError, CacheResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One kernel cache channel: requests are read from it, replies are written
/// back down it.
pub struct UpcallChannel {
    name: String,
    reader: File,
    writer: File,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl UpcallChannel {
    /// Opens the channel file of the named kernel cache under
    /// `/proc/net/rpc`.
    pub fn open(cache_name: &str) -> CacheResult<Self> {
        let path = Path::new(PROC_CACHE_DIR).join(cache_name).join("channel");
        let writer = OpenOptions::new().read(true).write(true).open(&path)?;
        let reader = writer.try_clone()?;
        Ok(Self {
            name: cache_name.to_owned(),
            reader,
            writer,
        })
    }

    /// Builds a channel over arbitrary file halves. Tests wire this to a
    /// pipe pair.
    pub fn from_files(cache_name: impl Into<String>, reader: File, writer: File) -> Self {
        Self {
            name: cache_name.into(),
            reader,
            writer,
        }
    }

    /// The kernel cache this channel belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The descriptor to poll for request readability.
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.reader.as_fd()
    }

    /// The reply half of the channel.
    pub fn writer(&mut self) -> &mut File {
        &mut self.writer
    }

    /// Reads one request line, without its terminator. Returns `None` when
    /// the read turns up empty.
    ///
    /// The kernel delivers exactly one complete newline-terminated request
    /// per read; anything else is malformed and dropped by the caller.
    pub fn read_request(&mut self) -> CacheResult<Option<String>> {
        let mut buf = vec![0u8; CHANNEL_BUF_SIZE];
        let n = self.reader.read(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        if buf[n - 1] != b'\n' {
            return Err(CacheError::MalformedRequest(format!(
                "{}: request not newline-terminated",
                self.name
            )));
        }
        let line = std::str::from_utf8(&buf[..n - 1])
            .map_err(|_| {
                CacheError::MalformedRequest(format!("{}: request is not UTF-8", self.name))
            })?
            .to_owned();
        Ok(Some(line))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
