//! Line-oriented codec for the kernel RPC cache channels.
//!
//! One request or reply per line, fields separated by spaces. A field is
//! either a literal token, or mangled by `\ooo` octal-escaping of space, tab,
//! newline and backslash, or hex-encoded with a leading `\x` marker when
//! binary-safe transport is required (fsid bytes, filehandle bytes). A record
//! is terminated by `\n`.

use crate::{CacheError, CacheResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A reader that splits one request line into decoded fields.
pub struct WordReader<'a> {
    rest: &'a [u8],
}

/// A fixed-capacity reply composer.
///
/// Every push checks the remaining capacity; once a push does not fit the
/// buffer is poisoned and [`LineBuffer::end`] fails with
/// [`CacheError::EncodingOverflow`], so a partial record is never written.
pub struct LineBuffer {
    buf: Vec<u8>,
    cap: usize,
    overflow: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods: WordReader
//--------------------------------------------------------------------------------------------------

impl<'a> WordReader<'a> {
    /// Creates a reader over one request line, without its trailing newline.
    pub fn new(line: &'a str) -> Self {
        Self {
            rest: line.as_bytes(),
        }
    }

    /// Decodes the next field as raw bytes.
    pub fn next_word(&mut self) -> CacheResult<Vec<u8>> {
        while let [b' ' | b'\t', rest @ ..] = self.rest {
            self.rest = rest;
        }
        if self.rest.is_empty() {
            return Err(CacheError::MalformedRequest("missing field".into()));
        }

        let end = self
            .rest
            .iter()
            .position(|&b| b == b' ' || b == b'\t')
            .unwrap_or(self.rest.len());
        let (raw, rest) = self.rest.split_at(end);
        self.rest = rest;

        if let Some(hexed) = raw.strip_prefix(b"\\x") {
            let decoded = hex::decode(hexed).map_err(|_| {
                CacheError::MalformedRequest(format!(
                    "bad hex field: {}",
                    String::from_utf8_lossy(raw)
                ))
            })?;
            return Ok(decoded);
        }

        let mut out = Vec::with_capacity(raw.len());
        let mut bytes = raw.iter();
        while let Some(&b) = bytes.next() {
            if b != b'\\' {
                out.push(b);
                continue;
            }
            let mut val: u32 = 0;
            for _ in 0..3 {
                match bytes.next() {
                    Some(&d @ b'0'..=b'7') => val = val * 8 + u32::from(d - b'0'),
                    _ => {
                        return Err(CacheError::MalformedRequest(format!(
                            "bad escape in field: {}",
                            String::from_utf8_lossy(raw)
                        )))
                    }
                }
            }
            out.push(val as u8);
        }
        Ok(out)
    }

    /// Decodes the next field as a UTF-8 string.
    pub fn next_str(&mut self) -> CacheResult<String> {
        let word = self.next_word()?;
        String::from_utf8(word)
            .map_err(|_| CacheError::MalformedRequest("field is not valid UTF-8".into()))
    }

    /// Decodes the next field as an unsigned decimal number.
    pub fn next_u32(&mut self) -> CacheResult<u32> {
        let word = self.next_str()?;
        word.parse()
            .map_err(|_| CacheError::MalformedRequest(format!("bad number: {}", word)))
    }

    /// Decodes the next field as a signed decimal number.
    pub fn next_i32(&mut self) -> CacheResult<i32> {
        let word = self.next_str()?;
        word.parse()
            .map_err(|_| CacheError::MalformedRequest(format!("bad number: {}", word)))
    }

    /// Returns true if no fields remain.
    pub fn at_end(&self) -> bool {
        self.rest.iter().all(|&b| b == b' ' || b == b'\t')
    }
}

//--------------------------------------------------------------------------------------------------
// Methods: LineBuffer
//--------------------------------------------------------------------------------------------------

impl LineBuffer {
    /// Creates an empty buffer that refuses to grow past `cap` bytes.
    pub fn new(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap.min(4096)),
            cap,
            overflow: false,
        }
    }

    /// Appends one field, mangling space, tab, newline and backslash.
    pub fn add_word(&mut self, word: &str) -> &mut Self {
        let mut encoded = Vec::with_capacity(word.len() + 1);
        for &b in word.as_bytes() {
            match b {
                b' ' | b'\t' | b'\n' | b'\\' => {
                    encoded.push(b'\\');
                    encoded.push(b'0' + (b >> 6));
                    encoded.push(b'0' + ((b >> 3) & 7));
                    encoded.push(b'0' + (b & 7));
                }
                _ => encoded.push(b),
            }
        }
        encoded.push(b' ');
        self.push(&encoded)
    }

    /// Appends one field as `\x`-prefixed hex, binary-safe.
    pub fn add_hex(&mut self, bytes: &[u8]) -> &mut Self {
        let mut encoded = Vec::with_capacity(2 + bytes.len() * 2 + 1);
        encoded.extend_from_slice(b"\\x");
        encoded.extend_from_slice(hex::encode(bytes).as_bytes());
        encoded.push(b' ');
        self.push(&encoded)
    }

    /// Appends an unsigned decimal field.
    pub fn add_uint(&mut self, n: u64) -> &mut Self {
        let mut encoded = n.to_string().into_bytes();
        encoded.push(b' ');
        self.push(&encoded)
    }

    /// Appends a signed decimal field.
    pub fn add_int(&mut self, n: i64) -> &mut Self {
        let mut encoded = n.to_string().into_bytes();
        encoded.push(b' ');
        self.push(&encoded)
    }

    /// Terminates the record and returns it, or fails if any push overflowed.
    pub fn end(&mut self) -> CacheResult<&[u8]> {
        if self.overflow || self.buf.len() + 1 > self.cap {
            return Err(CacheError::EncodingOverflow);
        }
        self.buf.push(b'\n');
        Ok(&self.buf)
    }

    fn push(&mut self, encoded: &[u8]) -> &mut Self {
        // One byte stays reserved for the record terminator.
        if self.overflow || self.buf.len() + encoded.len() + 1 > self.cap {
            self.overflow = true;
        } else {
            self.buf.extend_from_slice(encoded);
        }
        self
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
