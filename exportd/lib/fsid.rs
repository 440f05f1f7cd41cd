//! Parsing of the opaque fsid byte strings carried in `nfsd.fh` upcalls.
//!
//! A filehandle names its filesystem with a type tag plus a fixed-length byte
//! string. Each type has exactly one layout; anything else is malformed and
//! answered negatively without retry.

use crate::{CacheError, CacheResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The fsid encodings the kernel can put in a filehandle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FsidType {
    /// 16-bit major/minor device packed big-endian, plus a 32-bit inode.
    Dev = 0,

    /// An opaque 32-bit number assigned with `fsid=`.
    Num = 1,

    /// 32-bit major, minor and inode. A historical accident, rarely produced.
    MajorMinor = 2,

    /// Kernel-packed device number in host order, plus a 32-bit inode.
    EncodeDev = 3,

    /// 32-bit inode plus a 4-byte folded uuid.
    Uuid4Inum = 4,

    /// An 8-byte folded uuid, valid only at a mount boundary.
    Uuid8 = 5,

    /// A 16-byte uuid, valid only at a mount boundary.
    Uuid16 = 6,

    /// 64-bit inode plus a 16-byte uuid.
    Uuid16Inum = 7,
}

/// A validated fsid, one case per encoding.
///
/// Values of this type exist only through [`ParsedFsid::parse`]; the byte
/// length has always been checked against the case's fixed size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedFsid {
    /// Device major/minor plus inode.
    Dev {
        /// Device major number.
        major: u32,
        /// Device minor number.
        minor: u32,
        /// Inode number of the export point.
        inode: u64,
    },

    /// An explicit `fsid=` number.
    Num(u32),

    /// Full-width device major/minor plus inode.
    MajorMinor {
        /// Device major number.
        major: u32,
        /// Device minor number.
        minor: u32,
        /// Inode number of the export point.
        inode: u64,
    },

    /// Host-order packed device plus inode.
    EncodeDev {
        /// Device major number.
        major: u32,
        /// Device minor number.
        minor: u32,
        /// Inode number of the export point.
        inode: u64,
    },

    /// 4-byte uuid paired with the export point inode.
    Uuid4Inum {
        /// Inode number of the export point.
        inode: u64,
        /// Folded uuid bytes.
        uuid: [u8; 4],
    },

    /// 8-byte uuid of a filesystem root.
    Uuid8 {
        /// Folded uuid bytes.
        uuid: [u8; 8],
    },

    /// 16-byte uuid of a filesystem root.
    Uuid16 {
        /// Uuid bytes.
        uuid: [u8; 16],
    },

    /// 16-byte uuid paired with the export point inode.
    Uuid16Inum {
        /// Inode number of the export point.
        inode: u64,
        /// Uuid bytes.
        uuid: [u8; 16],
    },
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ParsedFsid {
    /// Parses a raw fsid byte string according to its type tag.
    pub fn parse(fsid_type: FsidType, fsid: &[u8]) -> CacheResult<Self> {
        let wrong_len = || CacheError::InvalidFsidLength {
            fsid_type: fsid_type as u8,
            len: fsid.len(),
        };
        let be32 = |b: &[u8]| u32::from_be_bytes(b.try_into().unwrap_or_default());

        match fsid_type {
            FsidType::Dev => {
                if fsid.len() != 8 {
                    return Err(wrong_len());
                }
                let dev = be32(&fsid[0..4]);
                Ok(Self::Dev {
                    major: dev >> 16,
                    minor: dev & 0xffff,
                    inode: u64::from(be32(&fsid[4..8])),
                })
            }
            FsidType::Num => {
                if fsid.len() != 4 {
                    return Err(wrong_len());
                }
                Ok(Self::Num(be32(fsid)))
            }
            FsidType::MajorMinor => {
                if fsid.len() != 12 {
                    return Err(wrong_len());
                }
                Ok(Self::MajorMinor {
                    major: be32(&fsid[0..4]),
                    minor: be32(&fsid[4..8]),
                    inode: u64::from(be32(&fsid[8..12])),
                })
            }
            FsidType::EncodeDev => {
                if fsid.len() != 8 {
                    return Err(wrong_len());
                }
                // Host order: nothing outside this host has any business
                // interpreting a new-style packed device number.
                let dev = u32::from_ne_bytes(fsid[0..4].try_into().unwrap_or_default());
                let inode = u32::from_ne_bytes(fsid[4..8].try_into().unwrap_or_default());
                Ok(Self::EncodeDev {
                    major: (dev & 0xfff00) >> 8,
                    minor: (dev & 0xff) | ((dev >> 12) & 0xfff00),
                    inode: u64::from(inode),
                })
            }
            FsidType::Uuid4Inum => {
                if fsid.len() != 8 {
                    return Err(wrong_len());
                }
                Ok(Self::Uuid4Inum {
                    inode: u64::from(be32(&fsid[0..4])),
                    uuid: fsid[4..8].try_into().unwrap_or_default(),
                })
            }
            FsidType::Uuid8 => {
                if fsid.len() != 8 {
                    return Err(wrong_len());
                }
                Ok(Self::Uuid8 {
                    uuid: fsid.try_into().unwrap_or_default(),
                })
            }
            FsidType::Uuid16 => {
                if fsid.len() != 16 {
                    return Err(wrong_len());
                }
                Ok(Self::Uuid16 {
                    uuid: fsid.try_into().unwrap_or_default(),
                })
            }
            FsidType::Uuid16Inum => {
                if fsid.len() != 24 {
                    return Err(wrong_len());
                }
                Ok(Self::Uuid16Inum {
                    inode: u64::from_be_bytes(fsid[0..8].try_into().unwrap_or_default()),
                    uuid: fsid[8..24].try_into().unwrap_or_default(),
                })
            }
        }
    }

    /// The uuid bytes, when this case carries them.
    pub fn uuid(&self) -> Option<&[u8]> {
        match self {
            Self::Uuid4Inum { uuid, .. } => Some(uuid),
            Self::Uuid8 { uuid } => Some(uuid),
            Self::Uuid16 { uuid } | Self::Uuid16Inum { uuid, .. } => Some(uuid),
            _ => None,
        }
    }

    /// The export point inode, when this case carries one.
    pub fn inode(&self) -> Option<u64> {
        match self {
            Self::Dev { inode, .. }
            | Self::MajorMinor { inode, .. }
            | Self::EncodeDev { inode, .. }
            | Self::Uuid4Inum { inode, .. }
            | Self::Uuid16Inum { inode, .. } => Some(*inode),
            _ => None,
        }
    }

    /// The device major/minor, when this case carries them.
    pub fn device(&self) -> Option<(u32, u32)> {
        match self {
            Self::Dev { major, minor, .. }
            | Self::MajorMinor { major, minor, .. }
            | Self::EncodeDev { major, minor, .. } => Some((*major, *minor)),
            _ => None,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl TryFrom<u32> for FsidType {
    type Error = CacheError;

    fn try_from(value: u32) -> CacheResult<Self> {
        match value {
            0 => Result::Ok(Self::Dev),
            1 => Result::Ok(Self::Num),
            2 => Result::Ok(Self::MajorMinor),
            3 => Result::Ok(Self::EncodeDev),
            4 => Result::Ok(Self::Uuid4Inum),
            5 => Result::Ok(Self::Uuid8),
            6 => Result::Ok(Self::Uuid16),
            7 => Result::Ok(Self::Uuid16Inum),
            other => Err(CacheError::UnknownFsidType(other)),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lengths(fsid_type: FsidType, good: usize) {
        for len in 0..=32 {
            let bytes = vec![0u8; len];
            let parsed = ParsedFsid::parse(fsid_type, &bytes);
            if len == good {
                assert!(parsed.is_ok(), "{:?} must accept {} bytes", fsid_type, len);
            } else {
                assert!(
                    matches!(parsed, Err(CacheError::InvalidFsidLength { .. })),
                    "{:?} must reject {} bytes",
                    fsid_type,
                    len
                );
            }
        }
    }

    #[test]
    fn test_parse_accepts_exactly_the_documented_length() {
        lengths(FsidType::Dev, 8);
        lengths(FsidType::Num, 4);
        lengths(FsidType::MajorMinor, 12);
        lengths(FsidType::EncodeDev, 8);
        lengths(FsidType::Uuid4Inum, 8);
        lengths(FsidType::Uuid8, 8);
        lengths(FsidType::Uuid16, 16);
        lengths(FsidType::Uuid16Inum, 24);
    }

    #[test]
    fn test_parse_dev_unpacks_major_minor_inode() -> CacheResult<()> {
        let parsed = ParsedFsid::parse(FsidType::Dev, &[0, 8, 0, 3, 0, 0, 0, 42])?;
        assert_eq!(
            parsed,
            ParsedFsid::Dev {
                major: 8,
                minor: 3,
                inode: 42
            }
        );
        assert_eq!(parsed.device(), Some((8, 3)));
        assert_eq!(parsed.inode(), Some(42));
        Ok(())
    }

    #[test]
    fn test_parse_encode_dev_unpacks_host_order() -> CacheResult<()> {
        // major 8, minor 3 packed the kernel way: (major << 8) | minor.
        let dev: u32 = (8 << 8) | 3;
        let mut fsid = dev.to_ne_bytes().to_vec();
        fsid.extend_from_slice(&7u32.to_ne_bytes());
        let parsed = ParsedFsid::parse(FsidType::EncodeDev, &fsid)?;
        assert_eq!(
            parsed,
            ParsedFsid::EncodeDev {
                major: 8,
                minor: 3,
                inode: 7
            }
        );
        Ok(())
    }

    #[test]
    fn test_parse_num_and_uuid_cases() -> CacheResult<()> {
        assert_eq!(
            ParsedFsid::parse(FsidType::Num, &7u32.to_be_bytes())?,
            ParsedFsid::Num(7)
        );

        let parsed = ParsedFsid::parse(FsidType::Uuid4Inum, &[0, 0, 0, 9, 0xaa, 0xbb, 0xcc, 0xdd])?;
        assert_eq!(parsed.inode(), Some(9));
        assert_eq!(parsed.uuid(), Some(&[0xaa, 0xbb, 0xcc, 0xdd][..]));

        let parsed = ParsedFsid::parse(FsidType::Uuid16, &[1u8; 16])?;
        assert_eq!(parsed.uuid(), Some(&[1u8; 16][..]));
        assert_eq!(parsed.inode(), None);
        Ok(())
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(matches!(
            FsidType::try_from(8),
            Err(CacheError::UnknownFsidType(8))
        ));
    }
}
