//! Generic B+-tree runtime (spec.md 2 component 5, 3.4, 4.4).
//!
//! Grounded on the teacher's `btree.rs` (`Btree` trait, `BlockCache` enum,
//! manual `Decode` for variable-length intermediate nodes) and `da_btree.rs`
//! (`XfsDa3Intnode::lookup`/`read_child`, `RefCell<BTreeMap<_,Self>>` child
//! cache, partition_point descent), generalized from XFS's two tree shapes
//! (block-form and node-form directories) to APFS's single node shape with
//! an optional 40-byte footer on root nodes.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::libapfs::cache::{BlockCache, BlockHandle};
use crate::libapfs::checksum::{read_u16_le, read_u32_le, read_u64_le};
use crate::libapfs::device::Device;
use crate::libapfs::error::{Error, Result};
use crate::libapfs::keys::{compare_keys, files_type_matches};
use crate::libapfs::object::{BlockType, ContentType, ObjectHeader};

const NODE_HEADER_SIZE: usize = 32;
const FOOTER_SIZE: usize = 40;

const FLAG_LEAF: u16 = 1 << 0;
const FLAG_FIXED_KV: u16 = 1 << 1;

/// Resolves a B+-tree internal node's child `object_id` to a physical
/// location (spec.md 4.4 Descent, 4.5 Object Resolver). A tree that is
/// itself a location tree resolves children directly as block numbers
/// (`IdentityResolver`); every other tree goes through the sibling location
/// tree.
pub trait ChildResolver {
    fn resolve(&self, object_id: u64) -> Result<(u64, u32, u32)>;
}

pub struct IdentityResolver;

impl ChildResolver for IdentityResolver {
    fn resolve(&self, object_id: u64) -> Result<(u64, u32, u32)> {
        Ok((object_id, 0, 0))
    }
}

#[derive(Debug, Clone, Copy)]
struct NodeHeader {
    flags: u16,
    level: u16,
    record_count: u32,
    table_space_offset: u16,
    table_space_len: u16,
    key_area_offset: u16,
    key_area_len: u16,
}

impl NodeHeader {
    fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < ObjectHeader::SIZE + NODE_HEADER_SIZE {
            return Err(Error::corrupt("node block too small for header"));
        }
        let base = ObjectHeader::SIZE;
        Ok(NodeHeader {
            flags: read_u16_le(raw, base),
            level: read_u16_le(raw, base + 2),
            record_count: read_u32_le(raw, base + 4),
            table_space_offset: read_u16_le(raw, base + 8),
            table_space_len: read_u16_le(raw, base + 10),
            key_area_offset: read_u16_le(raw, base + 12),
            key_area_len: read_u16_le(raw, base + 14),
        })
    }

    fn is_leaf(&self) -> bool {
        self.flags & FLAG_LEAF != 0
    }

    fn is_fixed_kv(&self) -> bool {
        self.flags & FLAG_FIXED_KV != 0
    }
}

#[derive(Debug, Clone, Copy)]
struct Footer {
    key_size: u32,
    val_size: u32,
}

impl Footer {
    fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < FOOTER_SIZE {
            return Err(Error::corrupt("root node missing footer"));
        }
        let base = raw.len() - FOOTER_SIZE;
        Ok(Footer {
            key_size: read_u32_le(raw, base + 20),
            val_size: read_u32_le(raw, base + 24),
        })
    }
}

/// Derived fixed key/value sizes for content types whose leaf records are
/// not footer-described (spec.md 4.4 Fixed entries: "sizes ... derived from
/// content_type").
fn fixed_sizes_for(content_type: ContentType, leaf: bool) -> Option<(usize, usize)> {
    match (content_type, leaf) {
        (ContentType::Location, true) => Some((16, 16)), // LocationKey, (block,size,flags)
        (ContentType::Location, false) => Some((16, 8)), // key, child object id
        (ContentType::History, _) => Some((16, 8)),
        (ContentType::SnapshotsMap, _) => Some((8, 8)),
        (ContentType::Encryption, _) => Some((8, 8)),
        _ => None,
    }
}

/// A parsed node: header/footer/index already located; record access goes
/// through `get_item`, matching the teacher's `TreeNode`-equivalent
/// `BtreeIntermediate`/`BtreeLeaf` decode-on-demand style.
pub struct TreeNode {
    pub block_number: u64,
    pub object_header: ObjectHeader,
    pub content_type: ContentType,
    pub level: u16,
    pub leaf: bool,
    pub record_count: u32,
    has_footer: bool,
    fixed_kv: bool,
    footer: Option<Footer>,
    derived_sizes: Option<(usize, usize)>,
    index_area_start: usize,
    key_area_start: usize,
    data_area_end: usize,
    data: Arc<Vec<u8>>,
}

impl TreeNode {
    pub fn parse(data: Arc<Vec<u8>>, block_number: u64) -> Result<Self> {
        let (object_header, _) = crate::libapfs::utils::decode::<ObjectHeader>(&data)
            .map_err(|e| Error::corrupt(format!("tree node object header: {e}")))?;
        if !object_header.block_type().is_node() {
            return Err(Error::corrupt(format!(
                "block {block_number} is not a tree node (type {:?})",
                object_header.block_type()
            )));
        }
        let has_footer = object_header.block_type() == BlockType::RootNode;
        let header = NodeHeader::parse(&data)?;
        let content_type = object_header.content_type();
        let leaf = header.is_leaf();
        if (header.level == 0) != leaf {
            return Err(Error::corrupt("level/leaf flag mismatch"));
        }
        if content_type.requires_fixed_entries() && !header.is_fixed_kv() {
            return Err(Error::corrupt(format!(
                "content type {content_type:?} requires fixed-size entries"
            )));
        }

        let footer = if has_footer { Some(Footer::parse(&data)?) } else { None };
        let derived_sizes = fixed_sizes_for(content_type, leaf);
        if header.is_fixed_kv() && footer.is_none() && derived_sizes.is_none() {
            return Err(Error::corrupt(
                "fixed-entry node has neither a footer nor a derivable content-type size",
            ));
        }

        let index_area_start = ObjectHeader::SIZE + NODE_HEADER_SIZE;
        let key_area_start = index_area_start + header.table_space_len as usize;
        let data_area_end = data.len() - if has_footer { FOOTER_SIZE } else { 0 };

        Ok(TreeNode {
            block_number,
            object_header,
            content_type,
            level: header.level,
            leaf,
            record_count: header.record_count,
            has_footer,
            fixed_kv: header.is_fixed_kv(),
            footer,
            derived_sizes,
            index_area_start,
            key_area_start,
            data_area_end,
            data,
        })
    }

    fn key_value_sizes(&self) -> Option<(usize, usize)> {
        self.footer
            .map(|f| (f.key_size as usize, f.val_size as usize))
            .or(self.derived_sizes)
    }

    /// `get_item(index) -> (key, value)` (spec.md 4.4 TreeNode), bounds
    /// checked against the declared index/key/data areas.
    pub fn get_item(&self, index: u32) -> Result<(&[u8], &[u8])> {
        if index >= self.record_count {
            return Err(Error::corrupt("tree node index out of range"));
        }
        let index = index as usize;
        if self.fixed_kv {
            let (key_size, val_size) = self
                .key_value_sizes()
                .ok_or_else(|| Error::corrupt("fixed node missing key/value sizes"))?;
            let entry_off = self.index_area_start + index * 4;
            let key_offset = read_u16_le(&self.data, entry_off);
            let data_offset = read_u16_le(&self.data, entry_off + 2);
            if key_offset == 0xFFFF || data_offset == 0xFFFF {
                return Err(Error::corrupt("sentinel offset in fixed entry"));
            }
            let key_start = self.key_area_start + key_offset as usize;
            let key_end = key_start + key_size;
            let val_end = self.data_area_end - data_offset as usize;
            let val_start = val_end.checked_sub(val_size).ok_or_else(|| Error::corrupt("value area underflow"))?;
            self.bounds_check(key_start, key_end)?;
            self.bounds_check(val_start, val_end)?;
            Ok((&self.data[key_start..key_end], &self.data[val_start..val_end]))
        } else {
            let entry_off = self.index_area_start + index * 8;
            let key_offset = read_u16_le(&self.data, entry_off);
            let key_size = read_u16_le(&self.data, entry_off + 2);
            let data_offset = read_u16_le(&self.data, entry_off + 4);
            let data_size = read_u16_le(&self.data, entry_off + 6);
            if key_offset == 0xFFFF || data_offset == 0xFFFF {
                return Err(Error::corrupt("sentinel offset in variable entry"));
            }
            let key_start = self.key_area_start + key_offset as usize;
            let key_end = key_start + key_size as usize;
            let val_end = self.data_area_end - data_offset as usize;
            let val_start = val_end
                .checked_sub(data_size as usize)
                .ok_or_else(|| Error::corrupt("value area underflow"))?;
            self.bounds_check(key_start, key_end)?;
            self.bounds_check(val_start, val_end)?;
            Ok((&self.data[key_start..key_end], &self.data[val_start..val_end]))
        }
    }

    fn bounds_check(&self, start: usize, end: usize) -> Result<()> {
        if start > end || end > self.data.len() {
            return Err(Error::corrupt("tree node record runs past block bounds"));
        }
        Ok(())
    }

    pub fn key(&self, index: u32) -> Result<&[u8]> {
        Ok(self.get_item(index)?.0)
    }

    pub fn value(&self, index: u32) -> Result<&[u8]> {
        Ok(self.get_item(index)?.1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Eq,
    Le,
    Low,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindOutcome {
    Found(u32),
    FirstGreater,
    FirstIndex,
    NotFound,
}

/// Binary search for the largest index `i` such that `key[i] <= query_key`
/// (or, in `Low` mode, strictly `<`), per spec.md 4.4 FindDataIndex.
pub fn find_data_index(
    node: &TreeNode,
    query_key: &[u8],
    mode: SearchMode,
    record_type: Option<u8>,
    all_types: bool,
) -> Result<FindOutcome> {
    if mode == SearchMode::Ge {
        return Err(Error::NotImplemented("GE search mode".into()));
    }
    if node.record_count == 0 {
        return if mode == SearchMode::Low && node.has_footer() {
            Ok(FindOutcome::FirstIndex)
        } else {
            Ok(FindOutcome::NotFound)
        };
    }

    let first_key = node.key(0)?;
    if compare_keys(node.content_type, query_key, first_key)? == Ordering::Less {
        return Ok(FindOutcome::FirstGreater);
    }

    let strict = mode == SearchMode::Low;
    let mut best: Option<u32> = None;
    for i in 0..node.record_count {
        let key_i = node.key(i)?;
        let ord = compare_keys(node.content_type, key_i, query_key)?;
        let ok = if strict { ord == Ordering::Less } else { ord != Ordering::Greater };
        if ok {
            best = Some(i);
        } else {
            break;
        }
    }

    match best {
        None => Ok(FindOutcome::FirstGreater),
        Some(i) => {
            if mode == SearchMode::Eq {
                let key_i = node.key(i)?;
                let eq = compare_keys(node.content_type, key_i, query_key)? == Ordering::Equal;
                let type_ok = match record_type {
                    Some(rt) if node.content_type == ContentType::Files => {
                        files_type_matches(rt, key_i, all_types)?
                    }
                    _ => true,
                };
                if eq && type_ok {
                    Ok(FindOutcome::Found(i))
                } else {
                    Ok(FindOutcome::NotFound)
                }
            } else {
                Ok(FindOutcome::Found(i))
            }
        }
    }
}

impl TreeNode {
    fn has_footer(&self) -> bool {
        self.has_footer
    }
}

/// A tree parameterized by `(root_block, content_type, resolver)`
/// (spec.md 4.4). `resolver` is the sibling location tree for every tree
/// except the location tree itself.
pub struct Btree<'a, D: Device, R: ChildResolver> {
    pub cache: &'a RefCell<BlockCache<D>>,
    pub root_block: u64,
    pub content_type: ContentType,
    pub resolver: &'a R,
}

impl<'a, D: Device, R: ChildResolver> Btree<'a, D, R> {
    pub fn new(cache: &'a RefCell<BlockCache<D>>, root_block: u64, content_type: ContentType, resolver: &'a R) -> Self {
        Btree { cache, root_block, content_type, resolver }
    }

    fn load_node(&self, block: u64) -> Result<(BlockHandle, TreeNode)> {
        let handle = self.cache.borrow_mut().get(block, true, None)?;
        let node = TreeNode::parse(handle.data.clone(), block)?;
        Ok((handle, node))
    }

    fn release(&self, handle: BlockHandle) {
        self.cache.borrow_mut().release(handle);
    }

    /// `get_data(key, mode)` (spec.md 4.4 Descent): descend from the root,
    /// using `LE` semantics at internal levels, to the leaf record matching
    /// `mode` at the bottom.
    pub fn get_data(&self, query_key: &[u8], mode: SearchMode, record_type: Option<u8>, all_types: bool) -> Result<Vec<u8>> {
        Ok(self.get_record(query_key, mode, record_type, all_types)?.1)
    }

    /// Same descent as `get_data`, but also returns the matched leaf key so
    /// callers (e.g. the location tree) can verify a prefix match instead of
    /// trusting an ordering-only `Le`/`Low` hit (spec.md 4.5).
    pub fn get_record(&self, query_key: &[u8], mode: SearchMode, record_type: Option<u8>, all_types: bool) -> Result<(Vec<u8>, Vec<u8>)> {
        let (mut handle, mut node) = self.load_node(self.root_block)?;
        loop {
            if node.leaf {
                let outcome = find_data_index(&node, query_key, mode, record_type, all_types)?;
                let result = match outcome {
                    FindOutcome::Found(i) => {
                        let (k, v) = node.get_item(i)?;
                        Ok((k.to_vec(), v.to_vec()))
                    }
                    _ => Err(Error::not_found("no matching record")),
                };
                self.release(handle);
                return result;
            }
            let outcome = find_data_index(&node, query_key, SearchMode::Le, None, true)?;
            let index = match outcome {
                FindOutcome::Found(i) => i,
                FindOutcome::FirstGreater if node.record_count > 0 => 0,
                _ => {
                    self.release(handle);
                    return Err(Error::not_found("no matching child"));
                }
            };
            let child_object_id = read_u64_le(node.value(index)?, 0);
            let (child_block, size, _flags) = self.resolver.resolve(child_object_id)?;
            if size != 0 && size as u64 != self.cache.borrow().block_size() as u64 {
                self.release(handle);
                return Err(Error::NotImplemented("multi-block tree children are not supported".into()));
            }
            self.release(handle);
            let (next_handle, next_node) = self.load_node(child_block)?;
            handle = next_handle;
            node = next_node;
        }
    }

    /// Start a cursor at `start_by_key` semantics (spec.md 4.4 Cursors):
    /// descend with `LOW | ALL_TYPES`, falling back to the first leaf's
    /// first record when no match is found but the landing position allows
    /// it.
    pub fn cursor_start_by_key(&self, query_key: &[u8]) -> Result<Cursor<'a, D, R>> {
        let mut path: Vec<(BlockHandle, u64, u32)> = Vec::new();
        let (mut handle, mut node) = self.load_node(self.root_block)?;
        let mut block = self.root_block;
        loop {
            if node.leaf {
                let outcome = find_data_index(&node, query_key, SearchMode::Low, None, true)?;
                let index = match outcome {
                    FindOutcome::Found(i) => i,
                    FindOutcome::FirstIndex | FindOutcome::NotFound => 0,
                    FindOutcome::FirstGreater => 0,
                };
                path.push((handle, block, index));
                break;
            }
            let outcome = find_data_index(&node, query_key, SearchMode::Le, None, true)?;
            let index = match outcome {
                FindOutcome::Found(i) => i,
                _ => 0,
            };
            let child_object_id = read_u64_le(node.value(index)?, 0);
            let (child_block, _size, _flags) = self.resolver.resolve(child_object_id)?;
            path.push((handle, block, index));
            let (next_handle, next_node) = self.load_node(child_block)?;
            handle = next_handle;
            node = next_node;
            block = child_block;
        }
        Ok(Cursor { tree: self, path })
    }
}

/// Holds at most one path from root to current leaf (spec.md 3.10, 4.4,
/// 9): a stack of `(node-handle, block, index-in-parent)` pairs, owned by
/// the cursor, matching the design note's replacement for the source's
/// `CTreeNode* m_pChild` pointer chain.
pub struct Cursor<'a, D: Device, R: ChildResolver> {
    tree: &'a Btree<'a, D, R>,
    path: Vec<(BlockHandle, u64, u32)>,
}

impl<'a, D: Device, R: ChildResolver> Cursor<'a, D, R> {
    /// Current leaf record, if the cursor is positioned on one.
    pub fn current(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let (handle, _block, index) = self.path.last().ok_or_else(|| Error::not_found("cursor is empty"))?;
        let node = TreeNode::parse(handle.data.clone(), handle.block)?;
        let (k, v) = node.get_item(*index)?;
        Ok((k.to_vec(), v.to_vec()))
    }

    /// Advance to the next leaf record (spec.md 4.4 Cursors).
    pub fn next(&mut self) -> Result<bool> {
        let depth = self.path.len();
        if depth == 0 {
            return Err(Error::not_found("cursor is empty"));
        }
        let (leaf_index, leaf_count) = {
            let (handle, block, index) = &self.path[depth - 1];
            let node = TreeNode::parse(handle.data.clone(), *block)?;
            (*index, node.record_count)
        };
        if leaf_index + 1 < leaf_count {
            self.path[depth - 1].2 += 1;
            return Ok(true);
        }

        // Walk up until a parent has a next sibling, then descend leftmost.
        let mut level = depth;
        loop {
            if level == 0 {
                return Ok(false);
            }
            level -= 1;
            let (handle, _block, _index) = self.path.pop().expect("level within path bounds");
            self.tree.release(handle);
            if level == 0 {
                return Ok(false);
            }
            let (parent_block, parent_index, parent_count) = {
                let (handle, block, index) = &self.path[level - 1];
                let node = TreeNode::parse(handle.data.clone(), *block)?;
                (*block, *index, node.record_count)
            };
            if parent_index + 1 < parent_count {
                let new_index = parent_index + 1;
                self.path[level - 1].2 = new_index;
                let child_object_id = {
                    let handle = &self.path[level - 1].0;
                    let node = TreeNode::parse(handle.data.clone(), parent_block)?;
                    read_u64_le(node.value(new_index)?, 0)
                };
                let (child_block, _size, _flags) = self.tree.resolver.resolve(child_object_id)?;
                self.descend_leftmost(child_block)?;
                return Ok(true);
            }
        }
    }

    fn descend_leftmost(&mut self, mut block: u64) -> Result<()> {
        loop {
            let (handle, node) = self.tree.load_node(block)?;
            let leaf = node.leaf;
            let next_child = if leaf { None } else { Some(read_u64_le(node.value(0)?, 0)) };
            self.path.push((handle, block, 0));
            if leaf {
                return Ok(());
            }
            let (child_block, _size, _flags) = self.tree.resolver.resolve(next_child.expect("internal node has a child"))?;
            block = child_block;
        }
    }
}

impl<'a, D: Device, R: ChildResolver> Drop for Cursor<'a, D, R> {
    fn drop(&mut self) {
        while let Some((handle, _, _)) = self.path.pop() {
            self.tree.release(handle);
        }
    }
}

