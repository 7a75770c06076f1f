use binrw::binrw;
use log::error;

use crate::common::{CfbError, CfbResult, MajorVersion, SectorType};

/// The header record always occupies 512 bytes; for version 4 files the
/// rest of the first 4096-byte sector is zero filled.
pub const HEADER_SIZE: usize = 512;

/// Number of FAT sector locations held directly in the header DIFAT.
pub const DIFAT_ENTRIES_IN_HEADER: usize = 109;

/// Mini Stream Cutoff Size (4 bytes): MUST be set to 0x00001000. A
/// user-defined data stream shorter than this is allocated from the mini
/// FAT and mini stream.
pub const MINI_STREAM_CUTOFF: u32 = 4096;

/// Compound file header.
/// https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-cfb/05060311-bfce-4b12-874d-71fd4ce63aea
#[binrw]
#[brw(little)]
#[brw(magic(0xE11AB1A1E011CFD0u64))]
#[derive(Debug, Clone)]
pub struct Header {
    // Header Signature (8 bytes): MUST be set to the value 0xD0, 0xCF,
    // 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1 -- consumed by the magic above.

    // Header CLSID (16 bytes): reserved and unused class ID that MUST be
    // set to all zeroes (CLSID_NULL).
    pub clsid: [u8; 16],

    // Minor Version (2 bytes): version number for nonbreaking changes,
    // SHOULD be 0x003E. Carried through to rewritten containers as-is.
    pub minor_version: u16,

    // Major Version (2 bytes): MUST be 0x0003 or 0x0004 and determines
    // the sector size.
    pub major_version: MajorVersion,

    // Byte Order (2 bytes): MUST be 0xFFFE, a byte order mark specifying
    // little-endian order for all integer fields.
    pub byte_order: u16,

    // Sector Shift (2 bytes): 0x0009 for version 3, 0x000C for version 4;
    // the sector size as a power of 2.
    pub sector_shift: u16,

    // Mini Sector Shift (2 bytes): MUST be 0x0006, a mini sector size of
    // 64 bytes.
    pub mini_sector_shift: u16,

    // Reserved (6 bytes): MUST be set to all zeroes.
    pub reserved: [u8; 6],

    // Number of Directory Sectors (4 bytes): MUST be zero for version 3
    // compound files.
    pub directory_sectors_num: u32,

    // Number of FAT Sectors (4 bytes).
    pub fat_sectors_num: u32,

    // First Directory Sector Location (4 bytes): starting sector number
    // for the directory stream.
    pub first_directory_sector_location: SectorType,

    // Transaction Signature Number (4 bytes): MUST be all zeroes if file
    // transactions are not implemented.
    pub transaction_signature_number: u32,

    pub mini_stream_cutoff_size: u32,

    // First Mini FAT Sector Location (4 bytes) and the count of mini FAT
    // sectors.
    pub first_mini_fat_sector_location: SectorType,
    pub mini_fat_sectors_num: u32,

    // First DIFAT Sector Location (4 bytes) and the count of DIFAT
    // sectors beyond the 109 header slots.
    pub first_difat_sector_location: SectorType,
    pub difat_sectors_num: u32,

    // DIFAT (436 bytes): the first 109 FAT sector locations.
    pub difat: [SectorType; DIFAT_ENTRIES_IN_HEADER],
}

impl Header {
    pub fn sector_size(&self) -> usize {
        self.major_version.sector_size()
    }

    /// Structural checks beyond the signature magic.
    pub(crate) fn validate(&self) -> CfbResult<()> {
        if self.byte_order != 0xFFFE {
            error!("Byte order mark {:#06x} is not little-endian", self.byte_order);
            return Err(CfbError::Unsupported("byte order is not little-endian"));
        }
        if self.sector_shift != self.major_version.sector_shift() {
            error!(
                "Sector shift {} does not match major version {:?}",
                self.sector_shift, self.major_version
            );
            return Err(CfbError::Malformed("sector shift does not match version"));
        }
        if self.mini_sector_shift != 6 {
            error!("Mini sector shift {} is not 6", self.mini_sector_shift);
            return Err(CfbError::Malformed("mini sector size is not 64 bytes"));
        }
        Ok(())
    }

    /// Header template for a rewritten container: structural constants
    /// reset, version fields derived from the chosen sector size, minor
    /// version and byte order carried over from the source image. Sector
    /// locations and counts are filled in by the writer passes.
    pub(crate) fn output_template(&self, sector_size: usize) -> Header {
        let major = if sector_size == 4096 {
            MajorVersion::Version4
        } else {
            MajorVersion::Version3
        };
        Header {
            clsid: [0; 16],
            minor_version: self.minor_version,
            major_version: major,
            byte_order: self.byte_order,
            sector_shift: major.sector_shift(),
            mini_sector_shift: self.mini_sector_shift,
            reserved: [0; 6],
            directory_sectors_num: 0,
            fat_sectors_num: 0,
            first_directory_sector_location: SectorType::EndOfChain,
            transaction_signature_number: 0,
            mini_stream_cutoff_size: MINI_STREAM_CUTOFF,
            first_mini_fat_sector_location: SectorType::EndOfChain,
            mini_fat_sectors_num: 0,
            first_difat_sector_location: SectorType::EndOfChain,
            difat_sectors_num: 0,
            difat: [SectorType::FreeSect; DIFAT_ENTRIES_IN_HEADER],
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use binrw::{BinRead, BinWrite};

    use super::*;

    fn sample() -> Header {
        Header {
            clsid: [0; 16],
            minor_version: 0x3E,
            major_version: MajorVersion::Version3,
            byte_order: 0xFFFE,
            sector_shift: 9,
            mini_sector_shift: 6,
            reserved: [0; 6],
            directory_sectors_num: 0,
            fat_sectors_num: 1,
            first_directory_sector_location: SectorType::RegularSect(1),
            transaction_signature_number: 0,
            mini_stream_cutoff_size: MINI_STREAM_CUTOFF,
            first_mini_fat_sector_location: SectorType::EndOfChain,
            mini_fat_sectors_num: 0,
            first_difat_sector_location: SectorType::EndOfChain,
            difat_sectors_num: 0,
            difat: [SectorType::FreeSect; DIFAT_ENTRIES_IN_HEADER],
        }
    }

    #[test]
    fn header_serializes_to_512_bytes() {
        let mut buf = Cursor::new(Vec::new());
        sample().write_le(&mut buf).unwrap();
        assert_eq!(buf.into_inner().len(), HEADER_SIZE);
    }

    #[test]
    fn header_round_trips() {
        let mut buf = Cursor::new(Vec::new());
        let header = sample();
        header.write_le(&mut buf).unwrap();
        buf.set_position(0);
        let back = Header::read_le(&mut buf).unwrap();
        assert_eq!(back.minor_version, header.minor_version);
        assert_eq!(back.first_directory_sector_location, SectorType::RegularSect(1));
        assert_eq!(back.difat[0], SectorType::FreeSect);
    }

    #[test]
    fn template_preserves_source_fields() {
        let mut src = sample();
        src.minor_version = 0x21;
        src.transaction_signature_number = 9;
        let out = src.output_template(4096);
        assert_eq!(out.minor_version, 0x21);
        assert_eq!(out.byte_order, 0xFFFE);
        assert_eq!(out.major_version, MajorVersion::Version4);
        assert_eq!(out.sector_shift, 12);
        assert_eq!(out.transaction_signature_number, 0);
        assert_eq!(out.mini_stream_cutoff_size, MINI_STREAM_CUTOFF);
        assert_eq!(out.first_difat_sector_location, SectorType::EndOfChain);
    }

    #[test]
    fn validate_rejects_mismatched_shift() {
        let mut header = sample();
        header.sector_shift = 12;
        assert!(matches!(header.validate(), Err(CfbError::Malformed(_))));
    }
}
