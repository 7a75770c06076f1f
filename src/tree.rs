use std::collections::HashSet;

use crate::cfb::Cfb;
use crate::common::{CfbError, CfbResult, NO_STREAM};
use crate::directory::{Entry, DIGITAL_SIGNATURE_NAME, MSI_DIGITAL_SIGNATURE_EX_NAME};

/// The materialized directory tree: an arena of entries with the on-disk
/// red-black sibling structure collapsed into per-storage children
/// lists. Node 0 is always the root storage.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub entry: Entry,
    pub children: Vec<usize>,
}

impl Tree {
    /// A detached tree holding only the given root entry. Children are
    /// added with [`Tree::push_child`].
    pub fn new(root: Entry) -> Tree {
        Tree {
            nodes: vec![Node {
                entry: root,
                children: Vec::new(),
            }],
        }
    }

    /// Appends `entry` as the last child of `parent` and returns its
    /// node id.
    pub fn push_child(&mut self, parent: usize, entry: Entry) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node {
            entry,
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    /// Materializes the directory of `cfb`, following left/right sibling
    /// links into the containing storage's children list and child links
    /// into a new storage. Directory ids may be shared or looped by a
    /// hostile image, so every id is accepted at most once.
    pub fn build(cfb: &Cfb) -> CfbResult<Tree> {
        let mut tree = Tree::new(cfb.root().clone());
        let mut seen: HashSet<u32> = HashSet::new();
        seen.insert(0);

        // (directory id, node id of the storage it belongs under)
        let mut work: Vec<(u32, usize)> = Vec::new();
        if cfb.root().child_id != NO_STREAM {
            work.push((cfb.root().child_id, 0));
        }
        while let Some((id, parent)) = work.pop() {
            if !seen.insert(id) {
                return Err(CfbError::Malformed("directory entry linked twice"));
            }
            let entry = cfb.dirent(id)?;
            let left = entry.left_sibling_id;
            let right = entry.right_sibling_id;
            let child = entry.child_id;
            let is_storage = entry.is_storage() || entry.is_root();
            let node = tree.push_child(parent, entry);
            if left != NO_STREAM {
                work.push((left, parent));
            }
            if right != NO_STREAM {
                work.push((right, parent));
            }
            if is_storage && child != NO_STREAM {
                work.push((child, node));
            }
        }
        Ok(tree)
    }

    /// Number of nodes reachable through the arena, the root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn node(&self, id: usize) -> &Node {
        &self.nodes[id]
    }

    pub fn entry(&self, id: usize) -> &Entry {
        &self.nodes[id].entry
    }

    pub fn entry_mut(&mut self, id: usize) -> &mut Entry {
        &mut self.nodes[id].entry
    }

    pub fn children(&self, id: usize) -> &[usize] {
        &self.nodes[id].children
    }

    /// Root children holding the two signature streams, in the order
    /// (`DigitalSignature`, `MsiDigitalSignatureEx`).
    pub fn find_signatures(&self) -> (Option<usize>, Option<usize>) {
        let mut signature = None;
        let mut signature_ex = None;
        for &child in &self.nodes[0].children {
            let entry = &self.nodes[child].entry;
            if entry.name_matches(&MSI_DIGITAL_SIGNATURE_EX_NAME) {
                signature_ex.get_or_insert(child);
            } else if entry.name_matches(&DIGITAL_SIGNATURE_NAME) {
                signature.get_or_insert(child);
            }
        }
        (signature, signature_ex)
    }

    /// Root child with the given decoded name.
    pub fn child_by_name(&self, name: &str) -> Option<usize> {
        self.nodes[0]
            .children
            .iter()
            .copied()
            .find(|&child| self.nodes[child].entry.name() == name)
    }

    /// Unlinks the root child whose name matches `reference`, refusing to
    /// remove a storage through this path. The node stays in the arena
    /// but is no longer reachable.
    pub(crate) fn remove_root_child(&mut self, reference: &[u8]) -> CfbResult<()> {
        let position = self.nodes[0]
            .children
            .iter()
            .position(|&child| self.nodes[child].entry.name_matches(reference));
        if let Some(position) = position {
            let child = self.nodes[0].children[position];
            if !self.nodes[child].entry.is_stream() {
                return Err(CfbError::InvalidArgument(
                    "signature name is held by a storage",
                ));
            }
            self.nodes[0].children.remove(position);
        }
        Ok(())
    }

    /// Appends a fresh signature stream node under the root.
    pub(crate) fn append_root_stream(&mut self, name: &[u8]) -> usize {
        self.push_child(0, Entry::new_stream(name))
    }
}
