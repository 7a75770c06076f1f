use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use binrw::binrw;

use crate::common::{SectorType, NO_STREAM};

/// Directory sector entry.
/// https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-cfb/a94d7445-c4be-49cd-b6b9-2f4abc663817

pub const DIRENT_SIZE: usize = 128;

/// `\x05DigitalSignature` in UTF-16LE, without the terminating null.
/// Carries the PKCS#7 blob of a signed package.
pub const DIGITAL_SIGNATURE_NAME: [u8; 34] = [
    0x05, 0x00, b'D', 0x00, b'i', 0x00, b'g', 0x00, b'i', 0x00, b't', 0x00, b'a', 0x00, b'l',
    0x00, b'S', 0x00, b'i', 0x00, b'g', 0x00, b'n', 0x00, b'a', 0x00, b't', 0x00, b'u', 0x00,
    b'r', 0x00, b'e', 0x00,
];

/// `\x05MsiDigitalSignatureEx` in UTF-16LE, without the terminating null.
/// Carries the metadata pre-hash of a signed package.
pub const MSI_DIGITAL_SIGNATURE_EX_NAME: [u8; 44] = [
    0x05, 0x00, b'M', 0x00, b's', 0x00, b'i', 0x00, b'D', 0x00, b'i', 0x00, b'g', 0x00, b'i',
    0x00, b't', 0x00, b'a', 0x00, b'l', 0x00, b'S', 0x00, b'i', 0x00, b'g', 0x00, b'n', 0x00,
    b'a', 0x00, b't', 0x00, b'u', 0x00, b'r', 0x00, b'e', 0x00, b'E', 0x00, b'x', 0x00,
];

/// One 128-byte directory entry describing a storage or stream object.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone)]
pub struct Entry {
    // Directory Entry Name (64 bytes): UTF-16 string terminated with a
    // UTF-16 null character, so names are limited to 32 code points
    // including the terminator.
    pub name: [u8; 64],

    // Directory Entry Name Length (2 bytes): length of the name in bytes
    // including the terminating null; a multiple of 2 not exceeding 64.
    pub name_length: u16,

    // Object Type (1 byte): MUST be 0x00, 0x01, 0x02, or 0x05.
    pub object_type: ObjectType,

    // Color Flag (1 byte): 0x00 (red) or 0x01 (black).
    pub color: Color,

    // Left/Right Sibling ID, Child ID (4 bytes each): stream IDs into the
    // directory array, or NOSTREAM.
    pub left_sibling_id: u32,
    pub right_sibling_id: u32,
    pub child_id: u32,

    // CLSID (16 bytes): object class GUID for storage objects; MUST be
    // all zeroes for stream objects.
    pub clsid: [u8; 16],

    // State Bits (4 bytes): user-defined flags for storage objects.
    pub state_bits: u32,

    // Creation Time / Modified Time (8 bytes each): FILETIME in UTC, or
    // all zeroes when not recorded.
    pub creation_time: u64,
    pub modified_time: u64,

    // Starting Sector Location (4 bytes): first sector of a stream
    // object; for the root storage, the first sector of the mini stream.
    pub starting_sector_location: SectorType,

    // Stream Size (8 bytes): size of the user-defined data, or of the
    // mini stream for the root storage. Only the low 32 bits are
    // significant here; version 3 writers may leave garbage in the high
    // half.
    pub stream_size: u64,
}

impl Entry {
    /// Raw UTF-16LE code-unit bytes of the name, without the terminator.
    pub fn name_bytes(&self) -> &[u8] {
        let recorded = (self.name_length as usize).min(self.name.len()) & !1;
        let len = recorded.saturating_sub(2);
        &self.name[..len]
    }

    /// Lossy-decoded name for display and lookup.
    pub fn name(&self) -> String {
        let units: Vec<u16> = self
            .name_bytes()
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    }

    /// The significant low half of the stream size.
    pub fn size32(&self) -> u32 {
        self.stream_size as u32
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.object_type, ObjectType::Stream)
    }

    pub fn is_storage(&self) -> bool {
        matches!(self.object_type, ObjectType::Storage)
    }

    pub fn is_root(&self) -> bool {
        matches!(self.object_type, ObjectType::RootStorage)
    }

    /// Compares the name buffer against a constant name over the shorter
    /// of the two lengths, matching how signed packages locate their
    /// signature streams.
    pub fn name_matches(&self, reference: &[u8]) -> bool {
        let n = (self.name_length as usize).min(self.name.len()).min(reference.len());
        self.name[..n] == reference[..n]
    }

    /// Whether this entry names one of the two signature streams.
    pub fn is_signature(&self) -> bool {
        self.name_matches(&DIGITAL_SIGNATURE_NAME) || self.name_matches(&MSI_DIGITAL_SIGNATURE_EX_NAME)
    }

    /// A freshly synthesized stream entry: zero CLSID, times and state
    /// bits, black color, no links, no allocated sector. `name` is the
    /// UTF-16LE name without its terminator.
    pub fn new_stream(name: &[u8]) -> Entry {
        let mut buf = [0u8; 64];
        buf[..name.len()].copy_from_slice(name);
        Entry {
            name: buf,
            name_length: (name.len() + 2) as u16,
            object_type: ObjectType::Stream,
            color: Color::Black,
            left_sibling_id: NO_STREAM,
            right_sibling_id: NO_STREAM,
            child_id: NO_STREAM,
            clsid: [0; 16],
            state_bits: 0,
            creation_time: 0,
            modified_time: 0,
            starting_sector_location: SectorType::FreeSect,
            stream_size: 0,
        }
    }

    /// Filler for the unused tail of the last directory sector: all
    /// zeroes except the three stream-id links.
    pub fn unused() -> Entry {
        Entry {
            name: [0; 64],
            name_length: 0,
            object_type: ObjectType::Unknown,
            color: Color::Red,
            left_sibling_id: NO_STREAM,
            right_sibling_id: NO_STREAM,
            child_id: NO_STREAM,
            clsid: [0; 16],
            state_bits: 0,
            creation_time: 0,
            modified_time: 0,
            starting_sector_location: SectorType::RegularSect(0),
            stream_size: 0,
        }
    }
}

impl Display for Entry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "name: {},\ttype: {},\tcolor: {},\tsize: {}, start: {}",
            self.name(),
            self.object_type,
            self.color,
            self.size32(),
            self.starting_sector_location,
        )
    }
}

/// Ordering used by both hashing passes: byte-wise comparison of the raw
/// UTF-16LE names over the shared prefix. When one name is a prefix of
/// the other, the longer name sorts first.
pub fn cmp_hash(a: &Entry, b: &Entry) -> Ordering {
    let an = a.name_bytes();
    let bn = b.name_bytes();
    let n = an.len().min(bn.len());
    match an[..n].cmp(&bn[..n]) {
        Ordering::Equal => bn.len().cmp(&an.len()),
        diff => diff,
    }
}

/// Ordering used for the rewritten directory tree: shorter names first,
/// equal-length names by UTF-16LE code-unit comparison.
pub fn cmp_tree(a: &Entry, b: &Entry) -> Ordering {
    let an = a.name_bytes();
    let bn = b.name_bytes();
    match an.len().cmp(&bn.len()) {
        Ordering::Equal => {
            for (pa, pb) in an.chunks_exact(2).zip(bn.chunks_exact(2)) {
                let ua = u16::from_le_bytes([pa[0], pa[1]]);
                let ub = u16::from_le_bytes([pb[0], pb[1]]);
                match ua.cmp(&ub) {
                    Ordering::Equal => {}
                    diff => return diff,
                }
            }
            Ordering::Equal
        }
        diff => diff,
    }
}

#[binrw]
#[brw(little)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ObjectType {
    #[brw(magic(0x00u8))]
    Unknown,
    #[brw(magic(0x01u8))]
    Storage,
    #[brw(magic(0x02u8))]
    Stream,
    #[brw(magic(0x05u8))]
    RootStorage,
}

impl Display for ObjectType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectType::Unknown => write!(f, "unknown"),
            ObjectType::Storage => write!(f, "storage"),
            ObjectType::Stream => write!(f, "stream"),
            ObjectType::RootStorage => write!(f, "root storage"),
        }
    }
}

#[binrw]
#[brw(little)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Color {
    #[brw(magic(0x00u8))]
    Red,
    #[brw(magic(0x01u8))]
    Black,
}

impl Display for Color {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Color::Red => write!(f, "red"),
            Color::Black => write!(f, "black"),
        }
    }
}
