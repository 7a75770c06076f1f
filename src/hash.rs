use digest::{Digest, Output, Update};

use crate::cfb::Cfb;
use crate::common::CfbResult;
use crate::directory::cmp_hash;
use crate::tree::Tree;

/// Chunk size for whole-file digests.
const FILE_DIGEST_CHUNK: usize = 16 * 1024 * 1024;

/// Digest over the raw image bytes, fed in bounded chunks.
pub fn file_digest<D: Digest>(data: &[u8]) -> Output<D> {
    let mut digest = D::new();
    for chunk in data.chunks(FILE_DIGEST_CHUNK) {
        digest.update(chunk);
    }
    digest.finalize()
}

/// Feeds the package content to `sink` in signing order: for every
/// storage, streams and sub-storages sorted by [`cmp_hash`], each stream
/// as its full contents, each storage recursively, then the storage's
/// CLSID. The two signature streams under the root are not part of the
/// content they sign and are skipped.
pub fn content_hash<D: Update>(cfb: &Cfb, tree: &Tree, sink: &mut D) -> CfbResult<()> {
    hash_storage(cfb, tree, 0, true, sink)
}

fn hash_storage<D: Update>(
    cfb: &Cfb,
    tree: &Tree,
    storage: usize,
    is_root: bool,
    sink: &mut D,
) -> CfbResult<()> {
    for child in sorted_children(tree, storage) {
        let entry = tree.entry(child);
        if is_root && entry.is_signature() {
            continue;
        }
        if entry.is_stream() {
            sink.update(&cfb.read(entry, 0, entry.size32())?);
        } else if entry.is_storage() {
            hash_storage(cfb, tree, child, false, sink)?;
        }
    }
    sink.update(&tree.entry(storage).clsid);
    Ok(())
}

/// Feeds the per-entry metadata to `sink`, in the same traversal order
/// as [`content_hash`]: for the root, CLSID and state bits only; for
/// every other entry, the name, the CLSID (storages) or low size half
/// (streams), the state bits, and both timestamps.
pub fn metadata_prehash<D: Update>(tree: &Tree, sink: &mut D) {
    prehash_storage(tree, 0, true, sink)
}

fn prehash_entry<D: Update>(tree: &Tree, id: usize, is_root: bool, sink: &mut D) {
    let entry = tree.entry(id);
    if !is_root {
        sink.update(entry.name_bytes());
    }
    if entry.is_stream() {
        sink.update(&entry.size32().to_le_bytes());
    } else {
        sink.update(&entry.clsid);
    }
    sink.update(&entry.state_bits.to_le_bytes());
    if !is_root {
        sink.update(&entry.creation_time.to_le_bytes());
        sink.update(&entry.modified_time.to_le_bytes());
    }
}

fn prehash_storage<D: Update>(tree: &Tree, storage: usize, is_root: bool, sink: &mut D) {
    prehash_entry(tree, storage, is_root, sink);
    for child in sorted_children(tree, storage) {
        let entry = tree.entry(child);
        if is_root && entry.is_signature() {
            continue;
        }
        if entry.is_stream() {
            prehash_entry(tree, child, false, sink);
        } else if entry.is_storage() {
            prehash_storage(tree, child, false, sink);
        }
    }
}

fn sorted_children(tree: &Tree, storage: usize) -> Vec<usize> {
    let mut children = tree.children(storage).to_vec();
    children.sort_by(|&a, &b| cmp_hash(tree.entry(a), tree.entry(b)));
    children
}
