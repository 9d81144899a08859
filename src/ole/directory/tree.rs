//! The directory tree.
//!
//! Entries live in an arena indexed by their on-disk slot number. Each storage keeps its
//! children as a list sorted by [`compare_names`]; the red-black sibling links of the
//! on-disk format are only materialised when the directory is encoded, as a balanced
//! binary search tree over that sorted list with every node black.

use fixedbitset::FixedBitSet;
use log::{debug, warn};

use super::entry::{DirEntry, Links, ObjectType, compare_names, validate_name};
use crate::ole::consts::*;
use crate::ole::error::{CfbError, Result};
use crate::ole::header::Version;

/// Index of a directory entry (its slot in the directory stream).
pub type EntryId = u32;

/// Id of the root entry.
pub const ROOT_ID: EntryId = 0;

#[derive(Debug, Clone)]
struct Node {
    /// `ObjectType::Unused` marks a free slot
    entry: DirEntry,
    parent: Option<EntryId>,
    /// Sorted by `compare_names`; empty for streams
    children: Vec<EntryId>,
}

impl Node {
    fn unused() -> Self {
        Self {
            entry: DirEntry::unused(),
            parent: None,
            children: Vec::new(),
        }
    }

    #[inline]
    fn is_live(&self) -> bool {
        self.entry.obj_type != ObjectType::Unused
    }
}

/// Hierarchical namespace of storages and streams.
#[derive(Debug, Clone)]
pub struct Directory {
    /// Slot 0 always holds the root
    nodes: Vec<Node>,
    dirty: bool,
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

impl Directory {
    /// A directory holding only the root entry.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                entry: DirEntry::root(),
                parent: None,
                children: Vec::new(),
            }],
            dirty: true,
        }
    }

    /// Decode the directory stream and rebuild the tree from the sibling links.
    ///
    /// Entries that are not reachable from the root are dropped with a warning.
    pub fn from_bytes(bytes: &[u8], version: Version) -> Result<Self> {
        let count = bytes.len() / DIRENTRY_SIZE;
        if count == 0 {
            return Err(CfbError::CorruptDirectory(
                "directory stream holds no entries".to_string(),
            ));
        }

        let mut parsed = Vec::with_capacity(count);
        for record in bytes.chunks_exact(DIRENTRY_SIZE) {
            parsed.push(DirEntry::parse(record, version)?);
        }

        let mut nodes = vec![Node::unused(); count];
        match &parsed[0].0 {
            Some(root) if root.is_root() => nodes[0].entry = root.clone(),
            _ => {
                return Err(CfbError::CorruptDirectory(
                    "first entry is not the root entry".to_string(),
                ));
            },
        }

        let mut claimed = FixedBitSet::with_capacity(count);
        claimed.insert(ROOT_ID as usize);

        let mut storages = vec![ROOT_ID];
        while let Some(parent) = storages.pop() {
            let mut children = Vec::new();

            // in-order walk of the sibling tree
            let mut stack = Vec::new();
            let mut current = parsed[parent as usize].1.child;
            loop {
                while current != NOSTREAM {
                    if current as usize >= count {
                        return Err(CfbError::CorruptDirectory(format!(
                            "entry {} references missing entry {}",
                            parent, current
                        )));
                    }
                    if claimed.put(current as usize) {
                        return Err(CfbError::CorruptDirectory(format!(
                            "entry {} is referenced more than once",
                            current
                        )));
                    }
                    stack.push(current);
                    current = parsed[current as usize].1.left;
                }
                let Some(id) = stack.pop() else { break };
                children.push(id);
                current = parsed[id as usize].1.right;
            }

            for &id in &children {
                let entry = match &parsed[id as usize].0 {
                    Some(entry)
                        if matches!(entry.obj_type, ObjectType::Storage | ObjectType::Stream) =>
                    {
                        entry.clone()
                    },
                    _ => {
                        return Err(CfbError::CorruptDirectory(format!(
                            "entry {} is linked into the tree but is not a storage or stream",
                            id
                        )));
                    },
                };
                if entry.obj_type == ObjectType::Storage {
                    storages.push(id);
                }
                nodes[id as usize] = Node {
                    entry,
                    parent: Some(parent),
                    children: Vec::new(),
                };
            }

            children.sort_by(|&a, &b| {
                compare_names(&nodes[a as usize].entry.name, &nodes[b as usize].entry.name)
            });
            for pair in children.windows(2) {
                let (a, b) = (&nodes[pair[0] as usize].entry, &nodes[pair[1] as usize].entry);
                if compare_names(&a.name, &b.name).is_eq() {
                    return Err(CfbError::CorruptDirectory(format!(
                        "duplicate sibling name {:?}",
                        b.name
                    )));
                }
            }
            nodes[parent as usize].children = children;
        }

        let orphans = parsed
            .iter()
            .enumerate()
            .filter(|(id, (entry, _))| {
                entry
                    .as_ref()
                    .is_some_and(|e| e.obj_type != ObjectType::Unused)
                    && !claimed.contains(*id)
            })
            .count();
        if orphans > 0 {
            warn!(
                "Dropping {} directory entries unreachable from the root",
                orphans
            );
        }

        debug!(
            "Loaded directory: {} slots, {} live entries",
            count,
            nodes.iter().filter(|n| n.is_live()).count()
        );

        Ok(Self {
            nodes,
            dirty: false,
        })
    }

    /// Encode the directory as whole sectors.
    ///
    /// Unused slots (and the padding up to a sector boundary) are written as empty entries.
    pub fn to_bytes(&self, sector_size: usize) -> Vec<u8> {
        let per_sector = sector_size / DIRENTRY_SIZE;
        let slots = self.nodes.len().div_ceil(per_sector) * per_sector;

        let mut links = vec![Links::NONE; self.nodes.len()];
        for (id, node) in self.nodes.iter().enumerate() {
            if node.is_live() && !node.children.is_empty() {
                links[id].child = link_balanced(&node.children, &mut links);
            }
        }

        let mut out = Vec::with_capacity(slots * DIRENTRY_SIZE);
        let unused = DirEntry::unused();
        for id in 0..slots {
            let (entry, entry_links) = match self.nodes.get(id) {
                Some(node) if node.is_live() => (&node.entry, links[id]),
                _ => (&unused, Links::NONE),
            };
            out.extend_from_slice(&entry.to_bytes(entry_links));
        }
        out
    }

    fn node(&self, id: EntryId) -> Option<&Node> {
        self.nodes.get(id as usize).filter(|n| n.is_live())
    }

    fn node_mut(&mut self, id: EntryId) -> Option<&mut Node> {
        self.nodes.get_mut(id as usize).filter(|n| n.is_live())
    }

    fn not_found(id: EntryId) -> CfbError {
        CfbError::NotFound(format!("directory entry {}", id))
    }

    /// Whether the tree differs from what was loaded or last committed.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    #[inline]
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Number of slots, used or not.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.nodes.len()
    }

    /// Borrow an entry.
    pub fn get(&self, id: EntryId) -> Result<&DirEntry> {
        self.node(id)
            .map(|n| &n.entry)
            .ok_or_else(|| Self::not_found(id))
    }

    /// Borrow an entry mutably. Marks the tree dirty.
    pub fn get_mut(&mut self, id: EntryId) -> Result<&mut DirEntry> {
        self.dirty = true;
        self.node_mut(id)
            .map(|n| &mut n.entry)
            .ok_or_else(|| Self::not_found(id))
    }

    /// The root entry.
    #[inline]
    pub fn root(&self) -> &DirEntry {
        &self.nodes[ROOT_ID as usize].entry
    }

    /// The root entry, mutably. Marks the tree dirty.
    #[inline]
    pub fn root_mut(&mut self) -> &mut DirEntry {
        self.dirty = true;
        &mut self.nodes[ROOT_ID as usize].entry
    }

    /// Parent of an entry; `None` for the root.
    pub fn parent(&self, id: EntryId) -> Result<Option<EntryId>> {
        self.node(id)
            .map(|n| n.parent)
            .ok_or_else(|| Self::not_found(id))
    }

    fn storage_node(&self, id: EntryId) -> Result<&Node> {
        let node = self.node(id).ok_or_else(|| Self::not_found(id))?;
        if !node.entry.is_storage() {
            return Err(CfbError::NotAStorage(node.entry.name.clone()));
        }
        Ok(node)
    }

    /// Children of a storage in canonical sibling order.
    pub fn list_children(&self, id: EntryId) -> Result<&[EntryId]> {
        Ok(&self.storage_node(id)?.children)
    }

    fn search(&self, parent: &Node, name: &str) -> std::result::Result<usize, usize> {
        parent.children.binary_search_by(|&child| {
            compare_names(&self.nodes[child as usize].entry.name, name)
        })
    }

    /// Find a child by name (case-insensitive).
    pub fn lookup(&self, parent: EntryId, name: &str) -> Result<EntryId> {
        let node = self.storage_node(parent)?;
        match self.search(node, name) {
            Ok(pos) => Ok(node.children[pos]),
            Err(_) => Err(CfbError::NotFound(name.to_string())),
        }
    }

    /// Resolve a path of names starting at the root.
    pub fn resolve<'a, I>(&self, components: I) -> Result<EntryId>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut current = ROOT_ID;
        for name in components {
            current = self.lookup(current, name)?;
        }
        Ok(current)
    }

    /// Slash-separated path of an entry, `/` for the root.
    pub fn path_of(&self, id: EntryId) -> Result<String> {
        let mut names = Vec::new();
        let mut current = id;
        while let Some(parent) = self.parent(current)? {
            names.push(self.get(current)?.name.clone());
            current = parent;
        }
        names.reverse();
        Ok(format!("/{}", names.join("/")))
    }

    fn insert_child(&mut self, parent: EntryId, child: EntryId) -> Result<()> {
        let name = self.nodes[child as usize].entry.name.clone();
        let node = self.storage_node(parent)?;
        let pos = match self.search(node, &name) {
            Ok(_) => return Err(CfbError::DuplicateName(name)),
            Err(pos) => pos,
        };
        self.nodes[parent as usize].children.insert(pos, child);
        Ok(())
    }

    fn detach_child(&mut self, parent: EntryId, child: EntryId) {
        if let Some(node) = self.node_mut(parent) {
            node.children.retain(|&c| c != child);
        }
    }

    /// Add a storage or stream under `parent`.
    ///
    /// The lowest unused slot is reused before the directory grows.
    pub fn create_entry(
        &mut self,
        parent: EntryId,
        name: &str,
        obj_type: ObjectType,
    ) -> Result<EntryId> {
        if !matches!(obj_type, ObjectType::Storage | ObjectType::Stream) {
            return Err(CfbError::InvalidArgument(format!(
                "cannot create an entry of type {:?}",
                obj_type
            )));
        }
        validate_name(name)?;
        let node = self.storage_node(parent)?;
        if self.search(node, name).is_ok() {
            return Err(CfbError::DuplicateName(name.to_string()));
        }

        let id = match self.nodes.iter().position(|n| !n.is_live()) {
            Some(pos) => pos,
            None => {
                if self.nodes.len() as u64 > MAXREGSID as u64 {
                    return Err(CfbError::InvalidArgument(
                        "directory has no free entry ids left".to_string(),
                    ));
                }
                self.nodes.push(Node::unused());
                self.nodes.len() - 1
            },
        } as EntryId;

        self.nodes[id as usize] = Node {
            entry: DirEntry::new(name, obj_type),
            parent: Some(parent),
            children: Vec::new(),
        };
        self.insert_child(parent, id)?;
        self.dirty = true;
        Ok(id)
    }

    fn is_descendant_or_self(&self, candidate: EntryId, ancestor: EntryId) -> bool {
        let mut current = Some(candidate);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.node(id).and_then(|n| n.parent);
        }
        false
    }

    /// Move and/or rename an entry.
    pub fn move_entry(&mut self, id: EntryId, new_parent: EntryId, new_name: &str) -> Result<()> {
        if id == ROOT_ID {
            return Err(CfbError::InvalidArgument(
                "the root entry cannot be moved".to_string(),
            ));
        }
        let old_parent = self.parent(id)?.unwrap_or(ROOT_ID);
        validate_name(new_name)?;
        let target = self.storage_node(new_parent)?;
        if self.is_descendant_or_self(new_parent, id) {
            return Err(CfbError::InvalidArgument(format!(
                "cannot move entry {} into its own subtree",
                id
            )));
        }
        if let Ok(pos) = self.search(target, new_name)
            && target.children[pos] != id
        {
            return Err(CfbError::DuplicateName(new_name.to_string()));
        }

        self.detach_child(old_parent, id);
        let node = &mut self.nodes[id as usize];
        node.entry.name = new_name.to_string();
        node.parent = Some(new_parent);
        self.insert_child(new_parent, id)?;
        self.dirty = true;
        Ok(())
    }

    /// Remove an entry (and, when `recursive`, everything below it).
    ///
    /// Only the entries are removed; releasing stream storage is up to the caller. Freed
    /// slots are reset to empty entries.
    pub fn delete(&mut self, id: EntryId, recursive: bool) -> Result<()> {
        if id == ROOT_ID {
            return Err(CfbError::InvalidArgument(
                "the root entry cannot be deleted".to_string(),
            ));
        }
        let node = self.node(id).ok_or_else(|| Self::not_found(id))?;
        if !node.children.is_empty() && !recursive {
            return Err(CfbError::NotEmpty(node.entry.name.clone()));
        }
        let parent = node.parent.unwrap_or(ROOT_ID);

        let mut doomed = vec![id];
        let mut i = 0;
        while i < doomed.len() {
            let children = self.nodes[doomed[i] as usize].children.clone();
            doomed.extend(children);
            i += 1;
        }

        for victim in doomed {
            self.nodes[victim as usize] = Node::unused();
        }
        self.detach_child(parent, id);

        while self.nodes.len() > 1 && self.nodes.last().is_some_and(|n| !n.is_live()) {
            self.nodes.pop();
        }

        self.dirty = true;
        Ok(())
    }

    /// All live entry ids in slot order (root first).
    pub fn ids(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_live())
            .map(|(i, _)| i as EntryId)
    }

    /// Depth-first walk below `id` in canonical sibling order (excluding `id`).
    pub fn descendants(&self, id: EntryId) -> Result<Vec<EntryId>> {
        let mut out = Vec::new();
        let mut stack: Vec<EntryId> = self.list_children(id)?.iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.nodes[current as usize].children.iter().rev().copied());
        }
        Ok(out)
    }
}

/// Link a sorted sibling list as a balanced tree; returns the subtree root.
fn link_balanced(sorted: &[EntryId], links: &mut [Links]) -> u32 {
    if sorted.is_empty() {
        return NOSTREAM;
    }
    let mid = sorted.len() / 2;
    let root = sorted[mid];
    let left = link_balanced(&sorted[..mid], links);
    let right = link_balanced(&sorted[mid + 1..], links);
    links[root as usize].left = left;
    links[root as usize].right = right;
    root
}
