use std::fmt::{Display, Formatter};

use binrw::binrw;
use thiserror::Error;

/// REGSECT 0x00000000 - 0xFFFFFFF9 Regular sector number.
///
/// MAXREGSECT 0xFFFFFFFA Maximum regular sector number.
///
/// DIFSECT 0xFFFFFFFC Specifies a DIFAT sector in the FAT.
///
/// FATSECT 0xFFFFFFFD Specifies a FAT sector in the FAT.
///
/// ENDOFCHAIN 0xFFFFFFFE End of a linked chain of sectors.
///
/// FREESECT 0xFFFFFFFF Specifies an unallocated sector in the FAT, Mini FAT, or DIFAT.
pub const MAX_REG_SECT: u32 = 0xFFFFFFFA;
pub const DIF_SECT: u32 = 0xFFFFFFFC;
pub const FAT_SECT: u32 = 0xFFFFFFFD;
pub const END_OF_CHAIN: u32 = 0xFFFFFFFE;
pub const FREE_SECT: u32 = 0xFFFFFFFF;

/// Sentinel for absent sibling/child links in directory entries. Shares
/// its value with FREESECT but lives in the stream-id domain, not the
/// sector domain.
pub const NO_STREAM: u32 = 0xFFFFFFFF;

/// A 4-byte sector reference as it appears in the header, the FAT, and
/// directory entries: either a regular sector number or one of the
/// sentinel values above.
#[binrw]
#[brw(little)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SectorType {
    #[brw(magic(0xFFFFFFFAu32))]
    MaxRegSect,
    #[brw(magic(0xFFFFFFFBu32))]
    NotApplicable,
    #[brw(magic(0xFFFFFFFCu32))]
    DifSect,
    #[brw(magic(0xFFFFFFFDu32))]
    FatSect,
    #[default]
    #[brw(magic(0xFFFFFFFEu32))]
    EndOfChain,
    #[brw(magic(0xFFFFFFFFu32))]
    FreeSect,
    RegularSect(u32),
}

impl SectorType {
    /// The sector number, if this reference addresses a regular sector.
    pub fn regular(self) -> Option<u32> {
        match self {
            SectorType::RegularSect(v) if v < MAX_REG_SECT => Some(v),
            _ => None,
        }
    }
}

impl From<u32> for SectorType {
    fn from(v: u32) -> Self {
        match v {
            0xFFFFFFFA => SectorType::MaxRegSect,
            0xFFFFFFFB => SectorType::NotApplicable,
            0xFFFFFFFC => SectorType::DifSect,
            0xFFFFFFFD => SectorType::FatSect,
            0xFFFFFFFE => SectorType::EndOfChain,
            0xFFFFFFFF => SectorType::FreeSect,
            _ => SectorType::RegularSect(v),
        }
    }
}

impl From<SectorType> for u32 {
    fn from(s: SectorType) -> Self {
        match s {
            SectorType::MaxRegSect => MAX_REG_SECT,
            SectorType::NotApplicable => 0xFFFFFFFB,
            SectorType::DifSect => DIF_SECT,
            SectorType::FatSect => FAT_SECT,
            SectorType::EndOfChain => END_OF_CHAIN,
            SectorType::FreeSect => FREE_SECT,
            SectorType::RegularSect(v) => v,
        }
    }
}

impl Display for SectorType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SectorType::MaxRegSect => write!(f, "MaxRegSect"),
            SectorType::NotApplicable => write!(f, "NotApplicable"),
            SectorType::DifSect => write!(f, "DifatSect"),
            SectorType::FatSect => write!(f, "FatSect"),
            SectorType::EndOfChain => write!(f, "EndOfChain"),
            SectorType::FreeSect => write!(f, "FreeSect"),
            SectorType::RegularSect(v) => write!(f, "{}", v),
        }
    }
}

/// Major Version (2 bytes): MUST be set to either 0x0003 (version 3,
/// 512-byte sectors) or 0x0004 (version 4, 4096-byte sectors).
#[binrw]
#[brw(little)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum MajorVersion {
    #[brw(magic(0x0003u16))]
    #[default]
    Version3,
    #[brw(magic(0x0004u16))]
    Version4,
}

impl MajorVersion {
    pub fn sector_size(self) -> usize {
        match self {
            MajorVersion::Version3 => 512,
            MajorVersion::Version4 => 4096,
        }
    }

    pub fn sector_shift(self) -> u16 {
        match self {
            MajorVersion::Version3 => 9,
            MajorVersion::Version4 => 12,
        }
    }
}

#[derive(Debug, Error)]
pub enum CfbError {
    /// Signature mismatch, short image, an out-of-range sector or offset
    /// reached during a walk, or a corrupt directory.
    #[error("malformed compound file: {0}")]
    Malformed(&'static str),
    /// The image is valid but outside what this implementation handles.
    #[error("unsupported compound file: {0}")]
    Unsupported(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// A stream read could not satisfy the requested length.
    #[error("stream read failed: {0}")]
    ReadFailed(&'static str),
    #[error("record parse error")]
    Parse(#[from] binrw::Error),
    #[error("output error")]
    Io(#[from] std::io::Error),
}

pub type CfbResult<T> = Result<T, CfbError>;

/// Reads a little-endian u32 from the first four bytes of `b`.
pub(crate) fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}
