use std::io::Cursor;
use std::path::Path;

use binrw::BinRead;
use log::error;

use crate::common::{le_u32, CfbError, CfbResult, MAX_REG_SECT, NO_STREAM};
use crate::directory::{Entry, DIRENT_SIZE};
use crate::header::{Header, DIFAT_ENTRIES_IN_HEADER, HEADER_SIZE};
use crate::mini_fat::MINI_SECTOR_SIZE;

/// A parsed compound file image. The backing bytes are immutable; the
/// directory tree and the signing passes are layered on top of it.
#[derive(Debug, Clone)]
pub struct Cfb {
    header: Header,
    sector_size: usize,
    root: Entry,
    data: Vec<u8>,
}

impl Cfb {
    /// Parses and validates a compound file held in memory: signature
    /// magic, version-derived sector size, minimum length of three
    /// sectors, and the root directory entry.
    pub fn open(data: Vec<u8>) -> CfbResult<Self> {
        if data.is_empty() {
            return Err(CfbError::InvalidArgument("empty input"));
        }
        if data.len() < HEADER_SIZE {
            return Err(CfbError::Malformed("image shorter than the header"));
        }
        let header = Header::read_le(&mut Cursor::new(&data[..HEADER_SIZE])).map_err(|err| {
            error!("Header rejected: {err}");
            CfbError::Malformed("invalid header record")
        })?;
        header.validate()?;
        let sector_size = header.sector_size();
        if data.len() < 3 * sector_size {
            return Err(CfbError::Malformed("image shorter than three sectors"));
        }

        let mut cfb = Cfb {
            header,
            sector_size,
            root: Entry::unused(),
            data,
        };
        cfb.root = cfb.dirent(0)?;
        if !cfb.root.is_root() {
            return Err(CfbError::Malformed("first directory entry is not the root storage"));
        }
        Ok(cfb)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> CfbResult<Self> {
        Self::open(std::fs::read(path)?)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    /// The root storage entry; its starting sector begins the mini
    /// stream and its size is the mini stream length.
    pub fn root(&self) -> &Entry {
        &self.root
    }

    /// The raw image, for whole-file digests.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// `len` bytes at `offset` within regular sector `sector`. Sector 0
    /// is the first sector after the header.
    pub(crate) fn sector_slice(&self, sector: u32, offset: usize, len: usize) -> CfbResult<&[u8]> {
        if sector >= MAX_REG_SECT {
            return Err(CfbError::Malformed("sector number out of range"));
        }
        if offset >= self.sector_size {
            return Err(CfbError::Malformed("sector offset out of range"));
        }
        let start = self
            .sector_size
            .checked_mul(sector as usize + 1)
            .and_then(|base| base.checked_add(offset))
            .ok_or(CfbError::Malformed("sector address overflow"))?;
        let end = start
            .checked_add(len)
            .ok_or(CfbError::Malformed("sector address overflow"))?;
        if end > self.data.len() {
            return Err(CfbError::Malformed("sector beyond end of image"));
        }
        Ok(&self.data[start..end])
    }

    /// `len` bytes at `offset` within mini sector `mini`, resolved
    /// through the mini stream's own FAT chain. `offset + len` must stay
    /// inside one mini sector.
    pub(crate) fn mini_sector_slice(&self, mini: u32, offset: usize, len: usize) -> CfbResult<&[u8]> {
        if mini >= MAX_REG_SECT {
            return Err(CfbError::Malformed("mini sector number out of range"));
        }
        let pos = MINI_SECTOR_SIZE * mini as usize + offset;
        let mut sector = self
            .root
            .starting_sector_location
            .regular()
            .ok_or(CfbError::Malformed("image has no mini stream"))?;
        for _ in 0..pos / self.sector_size {
            sector = regular(self.next_sector(sector)?)
                .ok_or(CfbError::Malformed("mini stream chain ended early"))?;
        }
        self.sector_slice(sector, pos % self.sector_size, len)
    }

    /// Location of the `n`-th FAT sector: the first 109 come from the
    /// header DIFAT, the rest from the DIFAT sector chain whose last
    /// entry per sector points at the next DIFAT sector.
    pub(crate) fn fat_sector_location(&self, n: u32) -> CfbResult<u32> {
        if (n as usize) < DIFAT_ENTRIES_IN_HEADER {
            return self.header.difat[n as usize]
                .regular()
                .ok_or(CfbError::Malformed("FAT sector missing from header DIFAT"));
        }
        let per_sector = self.sector_size / 4 - 1;
        let mut index = n as usize - DIFAT_ENTRIES_IN_HEADER;
        let mut sector = self
            .header
            .first_difat_sector_location
            .regular()
            .ok_or(CfbError::Malformed("FAT sector beyond header DIFAT without DIFAT sectors"))?;
        // Any DIFAT chain longer than the sector count of the image loops.
        let mut budget = self.data.len() / self.sector_size + 1;
        loop {
            if index < per_sector {
                let raw = le_u32(self.sector_slice(sector, 4 * index, 4)?);
                return if raw < MAX_REG_SECT {
                    Ok(raw)
                } else {
                    Err(CfbError::Malformed("DIFAT slot does not address a FAT sector"))
                };
            }
            index -= per_sector;
            let next = le_u32(self.sector_slice(sector, self.sector_size - 4, 4)?);
            if next >= MAX_REG_SECT {
                return Err(CfbError::Malformed("DIFAT chain ended early"));
            }
            sector = next;
            budget -= 1;
            if budget == 0 {
                return Err(CfbError::Malformed("DIFAT chain does not terminate"));
            }
        }
    }

    /// The FAT entry for sector `s`: the next sector in its chain, or a
    /// sentinel.
    pub fn next_sector(&self, s: u32) -> CfbResult<u32> {
        let per_sector = self.sector_size / 4;
        let fat_sector = self.fat_sector_location(s / per_sector as u32)?;
        let raw = self.sector_slice(fat_sector, 4 * (s as usize % per_sector), 4)?;
        Ok(le_u32(raw))
    }

    /// The mini FAT entry for mini sector `s`. The mini FAT is itself a
    /// regular stream starting at the header's mini FAT location.
    pub fn next_mini_sector(&self, s: u32) -> CfbResult<u32> {
        let pos = 4 * s as usize;
        let mut sector = self
            .header
            .first_mini_fat_sector_location
            .regular()
            .ok_or(CfbError::Malformed("image has no mini FAT"))?;
        for _ in 0..pos / self.sector_size {
            sector = regular(self.next_sector(sector)?)
                .ok_or(CfbError::Malformed("mini FAT chain ended early"))?;
        }
        Ok(le_u32(self.sector_slice(sector, pos % self.sector_size, 4)?))
    }

    /// Parses the directory entry with stream id `id` out of the
    /// directory chain.
    pub fn dirent(&self, id: u32) -> CfbResult<Entry> {
        if id == NO_STREAM {
            return Err(CfbError::InvalidArgument("NOSTREAM is not a directory entry id"));
        }
        let per_sector = self.sector_size / DIRENT_SIZE;
        let mut sector = self
            .header
            .first_directory_sector_location
            .regular()
            .ok_or(CfbError::Malformed("image has no directory"))?;
        for _ in 0..id as usize / per_sector {
            sector = regular(self.next_sector(sector)?)
                .ok_or(CfbError::Malformed("directory chain ended early"))?;
        }
        let raw = self.sector_slice(sector, DIRENT_SIZE * (id as usize % per_sector), DIRENT_SIZE)?;
        Entry::read_le(&mut Cursor::new(raw)).map_err(|err| {
            error!("Directory entry {id} rejected: {err}");
            CfbError::Malformed("unparseable directory entry")
        })
    }

    /// Reads `len` bytes of a stream starting at `offset`.
    ///
    /// Routing between the mini stream and the regular sectors follows
    /// the requested length rather than the recorded stream size; callers
    /// rely on short reads resolving through the mini FAT.
    pub fn read(&self, entry: &Entry, offset: u32, len: u32) -> CfbResult<Vec<u8>> {
        let mut remaining = len as usize;
        let mut out = Vec::with_capacity(remaining);
        if remaining == 0 {
            return Ok(out);
        }
        let mut sector = entry
            .starting_sector_location
            .regular()
            .ok_or(CfbError::ReadFailed("stream has no starting sector"))?;
        let mut off = offset as usize;

        if len < self.header.mini_stream_cutoff_size {
            while off >= MINI_SECTOR_SIZE {
                sector = regular(self.next_mini_sector(sector)?)
                    .ok_or(CfbError::ReadFailed("offset beyond end of mini chain"))?;
                off -= MINI_SECTOR_SIZE;
            }
            loop {
                let want = remaining.min(MINI_SECTOR_SIZE - off);
                out.extend_from_slice(self.mini_sector_slice(sector, off, want)?);
                remaining -= want;
                if remaining == 0 {
                    return Ok(out);
                }
                off = 0;
                sector = regular(self.next_mini_sector(sector)?)
                    .ok_or(CfbError::ReadFailed("mini chain ended before requested length"))?;
            }
        } else {
            while off >= self.sector_size {
                sector = regular(self.next_sector(sector)?)
                    .ok_or(CfbError::ReadFailed("offset beyond end of chain"))?;
                off -= self.sector_size;
            }
            loop {
                let want = remaining.min(self.sector_size - off);
                out.extend_from_slice(self.sector_slice(sector, off, want)?);
                remaining -= want;
                if remaining == 0 {
                    return Ok(out);
                }
                off = 0;
                sector = regular(self.next_sector(sector)?)
                    .ok_or(CfbError::ReadFailed("chain ended before requested length"))?;
            }
        }
    }
}

/// A raw allocation-table entry as a regular sector number, or `None`
/// for sentinels.
fn regular(raw: u32) -> Option<u32> {
    (raw < MAX_REG_SECT).then_some(raw)
}
