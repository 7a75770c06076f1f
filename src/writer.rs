use std::borrow::Cow;
use std::io::{Cursor, Seek, SeekFrom, Write};

use binrw::BinWrite;
use log::debug;

use crate::cfb::Cfb;
use crate::common::{CfbError, CfbResult, SectorType, FAT_SECT, NO_STREAM};
use crate::directory::{
    cmp_tree, Color, Entry, DIGITAL_SIGNATURE_NAME, DIRENT_SIZE, MSI_DIGITAL_SIGNATURE_EX_NAME,
};
use crate::fat::Fat;
use crate::header::{Header, DIFAT_ENTRIES_IN_HEADER, HEADER_SIZE, MINI_STREAM_CUTOFF};
use crate::mini_fat::{MiniFat, MINI_SECTOR_SIZE};
use crate::tree::Tree;

/// Bytes addressable through the 109 header DIFAT slots with 512-byte
/// sectors: 109 FAT sectors of 128 entries each.
const V3_DIFAT_CAPACITY: u64 = 109 * 128 * 512;

/// The same limit with 4096-byte sectors and 1024 entries per FAT sector.
const V4_DIFAT_CAPACITY: u64 = 109 * 1024 * 4096;

/// Allowance for directory, FAT and mini FAT growth when projecting the
/// output size from the input image and the signature payloads.
const PROJECTION_SLACK: u64 = 16384;

/// Working state for one container rewrite. Streams go straight to the
/// output sink; the mini stream, mini FAT and FAT accumulate in memory
/// until their own save passes run.
struct OutImage {
    sector_size: usize,
    header: Header,
    fat: Fat,
    mini_fat: MiniFat,
    mini_stream: Vec<u8>,
    sector_num: u32,
    mini_sector_num: u32,
    fat_sectors_count: u32,
    mini_fat_sectors_count: u32,
    directory_sectors_count: u32,
}

/// Rewrites the container into `out` with the `DigitalSignature` stream
/// replaced by `signature` and the `MsiDigitalSignatureEx` stream
/// replaced by `signature_ex`. An empty `signature` inserts nothing and
/// an empty `signature_ex` removes any existing stream of that name, so
/// the same entry point serves signing, re-signing and signature
/// removal. On error the sink is left in an undefined state and must be
/// discarded.
pub fn write<W: Write + Seek>(
    cfb: &Cfb,
    tree: &mut Tree,
    signature: &[u8],
    signature_ex: &[u8],
    out: &mut W,
) -> CfbResult<()> {
    let projected = cfb.as_bytes().len() as u64
        + signature.len() as u64
        + signature_ex.len() as u64
        + PROJECTION_SLACK;
    let sector_size = choose_sector_size(cfb.sector_size(), projected)?;
    debug!("Rewriting container with {sector_size}-byte sectors, {projected} projected bytes");

    tree.remove_root_child(&DIGITAL_SIGNATURE_NAME)?;
    if !signature.is_empty() {
        tree.append_root_stream(&DIGITAL_SIGNATURE_NAME);
    }
    tree.remove_root_child(&MSI_DIGITAL_SIGNATURE_EX_NAME)?;
    if !signature_ex.is_empty() {
        tree.append_root_stream(&MSI_DIGITAL_SIGNATURE_EX_NAME);
    }

    let mut image = OutImage {
        sector_size,
        header: cfb.header().output_template(sector_size),
        fat: Fat::new(),
        mini_fat: MiniFat::new(),
        mini_stream: Vec::new(),
        sector_num: 0,
        mini_sector_num: 0,
        fat_sectors_count: 0,
        mini_fat_sectors_count: 0,
        directory_sectors_count: 0,
    };

    // The first sector is reserved for the header, which is written last
    // once every location and count is known.
    out.seek(SeekFrom::Start(sector_size as u64))?;
    stream_pass(cfb, tree, 0, signature, signature_ex, &mut image, out)?;
    mini_stream_save(tree, &mut image, out)?;
    mini_fat_save(&mut image, out)?;
    directory_save(tree, &mut image, out)?;
    fat_save(&mut image, out)?;
    header_save(&mut image, out)?;
    out.flush()?;
    Ok(())
}

/// The output sector size: the input's, upgraded to 4096 bytes once the
/// projected size exhausts a 512-byte-sector header DIFAT. Past the
/// 4096-byte-sector limit the image would need DIFAT sectors, which the
/// writer does not produce.
fn choose_sector_size(current: usize, projected: u64) -> CfbResult<usize> {
    if projected > V4_DIFAT_CAPACITY {
        return Err(CfbError::Unsupported("output would need DIFAT sectors"));
    }
    if projected > V3_DIFAT_CAPACITY {
        Ok(4096)
    } else {
        Ok(current)
    }
}

/// Pre-order pass over the tree that writes every stream body and
/// records its allocation: short streams into the mini stream buffer,
/// the rest straight to the sink.
fn stream_pass<W: Write + Seek>(
    cfb: &Cfb,
    tree: &mut Tree,
    storage: usize,
    signature: &[u8],
    signature_ex: &[u8],
    image: &mut OutImage,
    out: &mut W,
) -> CfbResult<()> {
    let children = tree.children(storage).to_vec();
    let at_root = storage == 0;
    for child in children {
        let entry = tree.entry(child);
        if entry.is_stream() {
            // Signature payloads come from the caller; every other body
            // is copied out of the source image.
            let bytes: Cow<'_, [u8]> = if at_root && entry.name_matches(&DIGITAL_SIGNATURE_NAME) {
                Cow::Borrowed(signature)
            } else if at_root && entry.name_matches(&MSI_DIGITAL_SIGNATURE_EX_NAME) {
                Cow::Borrowed(signature_ex)
            } else {
                Cow::Owned(cfb.read(entry, 0, entry.size32())?)
            };
            stream_save(&bytes, tree.entry_mut(child), image, out)?;
        } else if entry.is_storage() {
            stream_pass(cfb, tree, child, signature, signature_ex, image, out)?;
        }
    }
    Ok(())
}

fn stream_save<W: Write + Seek>(
    bytes: &[u8],
    entry: &mut Entry,
    image: &mut OutImage,
    out: &mut W,
) -> CfbResult<()> {
    entry.stream_size = bytes.len() as u64;
    if bytes.is_empty() {
        // Nothing is allocated; readers see NOSTREAM.
        entry.starting_sector_location = SectorType::FreeSect;
        return Ok(());
    }
    if bytes.len() < MINI_STREAM_CUTOFF as usize {
        entry.starting_sector_location = SectorType::RegularSect(image.mini_sector_num);
        let sectors = bytes.len().div_ceil(MINI_SECTOR_SIZE) as u32;
        image.mini_stream.extend_from_slice(bytes);
        let padded = sectors as usize * MINI_SECTOR_SIZE - bytes.len();
        image.mini_stream.resize(image.mini_stream.len() + padded, 0);
        image.mini_fat.append_chain(image.mini_sector_num, sectors);
        image.mini_sector_num += sectors;
    } else {
        entry.starting_sector_location = SectorType::RegularSect(image.sector_num);
        let sectors = bytes.len().div_ceil(image.sector_size) as u32;
        out.write_all(bytes)?;
        write_padding(out, sectors as usize * image.sector_size - bytes.len())?;
        image.fat.append_chain(image.sector_num, sectors);
        image.sector_num += sectors;
    }
    Ok(())
}

/// Flushes the accumulated mini stream behind the root entry.
fn mini_stream_save<W: Write + Seek>(
    tree: &mut Tree,
    image: &mut OutImage,
    out: &mut W,
) -> CfbResult<()> {
    let root = tree.entry_mut(0);
    if image.mini_stream.is_empty() {
        root.starting_sector_location = SectorType::EndOfChain;
        return Ok(());
    }
    root.starting_sector_location = SectorType::RegularSect(image.sector_num);
    let sectors = image.mini_stream.len().div_ceil(image.sector_size) as u32;
    out.write_all(&image.mini_stream)?;
    write_padding(out, sectors as usize * image.sector_size - image.mini_stream.len())?;
    image.fat.append_chain(image.sector_num, sectors);
    image.sector_num += sectors;
    Ok(())
}

fn mini_fat_save<W: Write + Seek>(image: &mut OutImage, out: &mut W) -> CfbResult<()> {
    if image.mini_fat.is_empty() {
        image.header.first_mini_fat_sector_location = SectorType::EndOfChain;
        return Ok(());
    }
    image.header.first_mini_fat_sector_location = SectorType::RegularSect(image.sector_num);
    // The terminator counts toward the sector total, so an exactly full
    // table cannot overflow its own FAT chain.
    image.mini_fat.push_terminator();
    let sectors = image.mini_fat.sectors(image.sector_size);
    image.mini_fat.pad_to_sector(image.sector_size);
    out.write_all(&image.mini_fat.to_bytes())?;
    image.fat.append_chain(image.sector_num, sectors);
    image.mini_fat_sectors_count = sectors;
    image.sector_num += sectors;
    Ok(())
}

fn directory_save<W: Write + Seek>(
    tree: &mut Tree,
    image: &mut OutImage,
    out: &mut W,
) -> CfbResult<()> {
    image.header.first_directory_sector_location = SectorType::RegularSect(image.sector_num);
    tree.entry_mut(0).stream_size = image.mini_stream.len() as u64;

    let mut entries = linearize(tree);
    let per_sector = image.sector_size / DIRENT_SIZE;
    while entries.len() % per_sector != 0 {
        entries.push(Entry::unused());
    }
    let mut buffer = Cursor::new(Vec::with_capacity(entries.len() * DIRENT_SIZE));
    for entry in &entries {
        entry.write_le(&mut buffer)?;
    }
    let bytes = buffer.into_inner();
    out.write_all(&bytes)?;
    let sectors = (bytes.len() / image.sector_size) as u32;
    image.fat.append_chain(image.sector_num, sectors);
    image.directory_sectors_count = sectors;
    image.sector_num += sectors;
    debug!("Directory holds {} entries in {sectors} sectors", entries.len());
    Ok(())
}

/// Flattens the tree into directory order: depth-first, every storage's
/// children sorted by [`cmp_tree`] and linked as a right-sibling chain
/// in place of a balanced red-black tree. Every emitted entry is black,
/// which keeps the degenerate chains valid.
fn linearize(tree: &Tree) -> Vec<Entry> {
    let capacity = tree.len();
    let mut ids = vec![0u32; capacity];
    let mut order: Vec<usize> = Vec::with_capacity(capacity);
    let mut sorted: Vec<Vec<usize>> = vec![Vec::new(); capacity];
    assign(tree, 0, &mut ids, &mut order, &mut sorted);

    let mut entries = Vec::with_capacity(order.len());
    for &node in &order {
        let mut entry = tree.entry(node).clone();
        entry.color = Color::Black;
        entry.left_sibling_id = NO_STREAM;
        entry.right_sibling_id = NO_STREAM;
        entry.child_id = match sorted[node].first() {
            Some(&first) => ids[first],
            None => NO_STREAM,
        };
        entries.push(entry);
    }
    for &node in &order {
        for pair in sorted[node].windows(2) {
            entries[ids[pair[0]] as usize].right_sibling_id = ids[pair[1]];
        }
    }
    entries
}

/// Assigns depth-first stream ids, so a node's subtree occupies the id
/// range directly after its own.
fn assign(
    tree: &Tree,
    node: usize,
    ids: &mut [u32],
    order: &mut Vec<usize>,
    sorted: &mut [Vec<usize>],
) {
    ids[node] = order.len() as u32;
    order.push(node);
    let mut kids = tree.children(node).to_vec();
    kids.sort_by(|&a, &b| cmp_tree(tree.entry(a), tree.entry(b)));
    for &kid in &kids {
        assign(tree, kid, ids, order, sorted);
    }
    sorted[node] = kids;
}

fn fat_save<W: Write + Seek>(image: &mut OutImage, out: &mut W) -> CfbResult<()> {
    let fat_len = image.fat.len_bytes();
    // The FAT's own sectors are FAT entries too; size the table with the
    // entries that describe it included.
    let occupied = fat_len.div_ceil(image.sector_size);
    let sectors = (fat_len + 4 * occupied).div_ceil(image.sector_size) as u32;
    if sectors as usize > DIFAT_ENTRIES_IN_HEADER {
        return Err(CfbError::Unsupported("FAT does not fit the header DIFAT"));
    }
    for i in 0..sectors {
        image.fat.push(FAT_SECT);
        image.header.difat[i as usize] = SectorType::RegularSect(image.sector_num + i);
    }
    image.fat.pad_to_sector(image.sector_size);
    out.write_all(&image.fat.to_bytes())?;
    image.fat_sectors_count = sectors;
    image.sector_num += sectors;
    Ok(())
}

fn header_save<W: Write + Seek>(image: &mut OutImage, out: &mut W) -> CfbResult<()> {
    image.header.fat_sectors_num = image.fat_sectors_count;
    image.header.mini_fat_sectors_num = image.mini_fat_sectors_count;
    if image.sector_size > HEADER_SIZE {
        // The directory sector count is only recorded for version 4.
        image.header.directory_sectors_num = image.directory_sectors_count;
    }
    out.seek(SeekFrom::Start(0))?;
    image.header.write_le(out)?;
    write_padding(out, image.sector_size - HEADER_SIZE)?;
    Ok(())
}

fn write_padding<W: Write>(out: &mut W, len: usize) -> CfbResult<()> {
    if len > 0 {
        out.write_all(&vec![0u8; len])?;
    }
    Ok(())
}
