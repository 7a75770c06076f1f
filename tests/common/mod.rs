//! Synthetic version-3 container images for the integration tests,
//! assembled sector by sector with the crate's own records.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use binrw::BinWrite;

use msi_cfb::common::{MajorVersion, SectorType, END_OF_CHAIN, FAT_SECT, FREE_SECT, NO_STREAM};
use msi_cfb::directory::{Entry, ObjectType};
use msi_cfb::header::{Header, DIFAT_ENTRIES_IN_HEADER, MINI_STREAM_CUTOFF};
use msi_cfb::{Cfb, Tree};

pub const SECTOR: usize = 512;
const MINI_SECTOR: usize = 64;
const DIRENTS_PER_SECTOR: usize = 4;

pub fn utf16le(name: &str) -> Vec<u8> {
    name.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

pub fn open_tree(data: &[u8]) -> (Cfb, Tree) {
    let cfb = Cfb::open(data.to_vec()).expect("image should open");
    let tree = Tree::build(&cfb).expect("tree should build");
    (cfb, tree)
}

/// A hash sink that records exactly the bytes fed to it.
#[derive(Default)]
pub struct Collect(pub Vec<u8>);

impl digest::Update for Collect {
    fn update(&mut self, data: &[u8]) {
        self.0.extend_from_slice(data);
    }
}

enum Placement {
    Empty,
    Mini(u32),
    Large(u32),
}

/// Builds a version-3 image holding the given streams under the root:
/// one FAT sector, the directory, then the mini stream, the mini FAT
/// and the regular-sized stream bodies.
pub fn build_image(streams: &[(&str, &[u8])]) -> Vec<u8> {
    let mut mini_stream: Vec<u8> = Vec::new();
    let mut mini_fat: Vec<u32> = Vec::new();
    let mut placements: Vec<Placement> = Vec::new();

    for (_, body) in streams {
        if body.is_empty() {
            placements.push(Placement::Empty);
        } else if body.len() < MINI_STREAM_CUTOFF as usize {
            let first = (mini_stream.len() / MINI_SECTOR) as u32;
            let sectors = body.len().div_ceil(MINI_SECTOR) as u32;
            mini_stream.extend_from_slice(body);
            mini_stream.resize((first + sectors) as usize * MINI_SECTOR, 0);
            for i in 1..sectors {
                mini_fat.push(first + i);
            }
            mini_fat.push(END_OF_CHAIN);
            placements.push(Placement::Mini(first));
        } else {
            // Sector run assigned once the mini FAT size is known.
            placements.push(Placement::Large(0));
        }
    }

    let dir_start = 1u32;
    let dir_sectors = (1 + streams.len()).div_ceil(DIRENTS_PER_SECTOR) as u32;
    let mut next = dir_start + dir_sectors;

    let mini_stream_sectors = mini_stream.len().div_ceil(SECTOR) as u32;
    let mini_stream_start = (mini_stream_sectors > 0).then(|| {
        let start = next;
        next += mini_stream_sectors;
        start
    });

    let mini_fat_sectors = (4 * mini_fat.len()).div_ceil(SECTOR) as u32;
    let mini_fat_start = (mini_fat_sectors > 0).then(|| {
        let start = next;
        next += mini_fat_sectors;
        start
    });

    for ((_, body), placement) in streams.iter().zip(placements.iter_mut()) {
        if let Placement::Large(start) = placement {
            *start = next;
            next += body.len().div_ceil(SECTOR) as u32;
        }
    }

    let total_sectors = next as usize;
    assert!(
        total_sectors <= SECTOR / 4,
        "fixture would need more than one FAT sector"
    );
    let mut fat = vec![FREE_SECT; SECTOR / 4];
    fat[0] = FAT_SECT;
    chain(&mut fat, dir_start, dir_sectors);
    if let Some(start) = mini_stream_start {
        chain(&mut fat, start, mini_stream_sectors);
    }
    if let Some(start) = mini_fat_start {
        chain(&mut fat, start, mini_fat_sectors);
    }
    for ((_, body), placement) in streams.iter().zip(&placements) {
        if let Placement::Large(start) = placement {
            chain(&mut fat, *start, body.len().div_ceil(SECTOR) as u32);
        }
    }

    let mut entries: Vec<Entry> = Vec::new();
    let mut root = Entry::new_stream(&utf16le("Root Entry"));
    root.object_type = ObjectType::RootStorage;
    root.child_id = if streams.is_empty() { NO_STREAM } else { 1 };
    root.starting_sector_location = match mini_stream_start {
        Some(start) => SectorType::RegularSect(start),
        None => SectorType::EndOfChain,
    };
    root.stream_size = mini_stream.len() as u64;
    entries.push(root);

    for (i, ((name, body), placement)) in streams.iter().zip(&placements).enumerate() {
        let mut entry = Entry::new_stream(&utf16le(name));
        entry.right_sibling_id = if i + 1 < streams.len() {
            i as u32 + 2
        } else {
            NO_STREAM
        };
        entry.stream_size = body.len() as u64;
        entry.starting_sector_location = match placement {
            Placement::Empty => SectorType::FreeSect,
            Placement::Mini(first) => SectorType::RegularSect(*first),
            Placement::Large(start) => SectorType::RegularSect(*start),
        };
        entries.push(entry);
    }
    while entries.len() % DIRENTS_PER_SECTOR != 0 {
        entries.push(Entry::unused());
    }

    let header = Header {
        clsid: [0; 16],
        minor_version: 0x3E,
        major_version: MajorVersion::Version3,
        byte_order: 0xFFFE,
        sector_shift: 9,
        mini_sector_shift: 6,
        reserved: [0; 6],
        directory_sectors_num: 0,
        fat_sectors_num: 1,
        first_directory_sector_location: SectorType::RegularSect(dir_start),
        transaction_signature_number: 0,
        mini_stream_cutoff_size: MINI_STREAM_CUTOFF,
        first_mini_fat_sector_location: match mini_fat_start {
            Some(start) => SectorType::RegularSect(start),
            None => SectorType::EndOfChain,
        },
        mini_fat_sectors_num: mini_fat_sectors,
        first_difat_sector_location: SectorType::EndOfChain,
        difat_sectors_num: 0,
        difat: {
            let mut difat = [SectorType::FreeSect; DIFAT_ENTRIES_IN_HEADER];
            difat[0] = SectorType::RegularSect(0);
            difat
        },
    };

    let mut out = Cursor::new(Vec::with_capacity((1 + total_sectors) * SECTOR));
    header.write_le(&mut out).unwrap();
    for value in &fat {
        out.write_all(&value.to_le_bytes()).unwrap();
    }
    for entry in &entries {
        entry.write_le(&mut out).unwrap();
    }
    if !mini_stream.is_empty() {
        out.write_all(&mini_stream).unwrap();
        pad(&mut out, mini_stream_sectors as usize * SECTOR - mini_stream.len());
    }
    if !mini_fat.is_empty() {
        for value in &mini_fat {
            out.write_all(&value.to_le_bytes()).unwrap();
        }
        let fill = (mini_fat_sectors as usize * SECTOR - 4 * mini_fat.len()) / 4;
        for _ in 0..fill {
            out.write_all(&FREE_SECT.to_le_bytes()).unwrap();
        }
    }
    for ((_, body), placement) in streams.iter().zip(&placements) {
        if let Placement::Large(_) = placement {
            out.write_all(body).unwrap();
            pad(&mut out, body.len().div_ceil(SECTOR) * SECTOR - body.len());
        }
    }

    let bytes = out.into_inner();
    assert_eq!(bytes.len(), (1 + total_sectors) * SECTOR);
    bytes
}

fn chain(fat: &mut [u32], start: u32, sectors: u32) {
    for i in 0..sectors - 1 {
        fat[(start + i) as usize] = start + i + 1;
    }
    fat[(start + sectors - 1) as usize] = END_OF_CHAIN;
}

fn pad(out: &mut Cursor<Vec<u8>>, len: usize) {
    out.write_all(&vec![0u8; len]).unwrap();
}
