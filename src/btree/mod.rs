//! # B+Tree
//!
//! Every table is an independent B+Tree keyed by its first (`INT`) column.
//! A tree node occupies exactly one [`PAGE_SIZE`]-byte page and is tagged
//! with a common header, then a leaf- or internal-specific header, then a
//! packed cell array (§3, §4.2, §4.5).
//!
//! ## Common header (6 bytes)
//!
//! | Offset | Size | Field                        |
//! |--------|------|------------------------------|
//! | 0      | 1    | node type (0 = internal, 1 = leaf) |
//! | 1      | 1    | is_root (bool)               |
//! | 2..6   | 4    | parent page number           |
//!
//! ## Leaf header (+8 bytes, total 14)
//!
//! `num_cells: u32`, `next_leaf: u32` (0 marks the rightmost leaf). Each
//! cell is `{key: u32, row: row_size bytes}` — row width is a runtime
//! property of the owning table, so leaf cell arithmetic is parameterized
//! by `row_size` everywhere (§9 "Dynamic row width").
//!
//! ## Internal header (+8 bytes, total 14)
//!
//! `num_keys: u32`, `right_child: u32`. Each cell is `{child: u32, key:
//! u32}` — 8 bytes, row-agnostic. `INTERNAL_MAX_KEYS` is deliberately small
//! to exercise splits under test.

use log::debug;

use crate::error::{EngineError, Result};
use crate::pager::{Page, PageId, Pager, INVALID_PAGE_NUM, PAGE_SIZE};

/// Maximum keys in an internal node before it must split. Kept small on
/// purpose so ordinary test workloads exercise multi-level trees.
pub const INTERNAL_MAX_KEYS: usize = 3;

const COMMON_HEADER_SIZE: usize = 6;
const LEAF_HEADER_SIZE: usize = COMMON_HEADER_SIZE + 8;
const INTERNAL_HEADER_SIZE: usize = COMMON_HEADER_SIZE + 8;
const INTERNAL_CELL_SIZE: usize = 8; // child (4) + key (4)

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeType {
    Internal,
    Leaf,
}

/// A table's B+Tree root page plus the row width needed to parameterize
/// leaf cell arithmetic. Cheap to copy; the executor rebuilds one per
/// active statement from the catalog (§3 "Table runtime handle").
#[derive(Debug, Clone, Copy)]
pub struct TableHandle {
    pub root_page: PageId,
    pub row_size: usize,
}

/// An ephemeral cursor over one leaf cell, created by [`find`]/[`start`]
/// and consumed by at most one statement (§4.8).
#[derive(Debug, Clone, Copy)]
pub struct Cursor {
    pub page_num: PageId,
    pub cell_num: usize,
    pub end_of_table: bool,
}

// ---------------------------------------------------------------------------
// Node codec: common header
// ---------------------------------------------------------------------------

fn node_type(page: &Page) -> NodeType {
    if page[0] == 1 { NodeType::Leaf } else { NodeType::Internal }
}

fn set_node_type(page: &mut Page, t: NodeType) {
    page[0] = match t {
        NodeType::Internal => 0,
        NodeType::Leaf => 1,
    };
}

fn is_root(page: &Page) -> bool {
    page[1] != 0
}

fn set_is_root(page: &mut Page, v: bool) {
    page[1] = v as u8;
}

fn parent_page(page: &Page) -> PageId {
    u32::from_ne_bytes(page[2..6].try_into().unwrap())
}

fn set_parent_page(page: &mut Page, p: PageId) {
    page[2..6].copy_from_slice(&p.to_ne_bytes());
}

// ---------------------------------------------------------------------------
// Node codec: leaf
// ---------------------------------------------------------------------------

fn initialize_leaf(page: &mut Page) {
    page.fill(0);
    set_node_type(page, NodeType::Leaf);
    set_is_root(page, false);
    set_leaf_num_cells(page, 0);
    set_leaf_next_leaf(page, 0);
}

fn leaf_num_cells(page: &Page) -> u32 {
    u32::from_ne_bytes(page[COMMON_HEADER_SIZE..COMMON_HEADER_SIZE + 4].try_into().unwrap())
}

fn set_leaf_num_cells(page: &mut Page, n: u32) {
    page[COMMON_HEADER_SIZE..COMMON_HEADER_SIZE + 4].copy_from_slice(&n.to_ne_bytes());
}

fn leaf_next_leaf(page: &Page) -> PageId {
    let off = COMMON_HEADER_SIZE + 4;
    u32::from_ne_bytes(page[off..off + 4].try_into().unwrap())
}

fn set_leaf_next_leaf(page: &mut Page, p: PageId) {
    let off = COMMON_HEADER_SIZE + 4;
    page[off..off + 4].copy_from_slice(&p.to_ne_bytes());
}

/// Maximum number of `{key, row}` cells that fit in a leaf of this row size.
pub fn leaf_max_cells(row_size: usize) -> usize {
    (PAGE_SIZE - LEAF_HEADER_SIZE) / (4 + row_size)
}

fn leaf_cell_offset(cell_num: usize, row_size: usize) -> usize {
    LEAF_HEADER_SIZE + cell_num * (4 + row_size)
}

fn leaf_key(page: &Page, cell_num: usize, row_size: usize) -> u32 {
    let off = leaf_cell_offset(cell_num, row_size);
    u32::from_ne_bytes(page[off..off + 4].try_into().unwrap())
}

fn set_leaf_key(page: &mut Page, cell_num: usize, row_size: usize, key: u32) {
    let off = leaf_cell_offset(cell_num, row_size);
    page[off..off + 4].copy_from_slice(&key.to_ne_bytes());
}

fn leaf_value(page: &Page, cell_num: usize, row_size: usize) -> &[u8] {
    let off = leaf_cell_offset(cell_num, row_size) + 4;
    &page[off..off + row_size]
}

fn leaf_value_mut(page: &mut Page, cell_num: usize, row_size: usize) -> &mut [u8] {
    let off = leaf_cell_offset(cell_num, row_size) + 4;
    &mut page[off..off + row_size]
}

fn set_leaf_cell(page: &mut Page, cell_num: usize, row_size: usize, key: u32, row: &[u8]) {
    set_leaf_key(page, cell_num, row_size, key);
    leaf_value_mut(page, cell_num, row_size).copy_from_slice(row);
}

/// Binary search a leaf for `key`. Returns the cell index: either the exact
/// hit, or the insertion position one past the last key `<= key` (§4.5).
fn leaf_find_cell(page: &Page, row_size: usize, key: u32) -> usize {
    let num_cells = leaf_num_cells(page) as usize;
    let mut lo = 0usize;
    let mut hi = num_cells;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let mid_key = leaf_key(page, mid, row_size);
        if mid_key == key {
            return mid;
        } else if key < mid_key {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    lo
}

// ---------------------------------------------------------------------------
// Node codec: internal
// ---------------------------------------------------------------------------

fn initialize_internal(page: &mut Page) {
    page.fill(0);
    set_node_type(page, NodeType::Internal);
    set_is_root(page, false);
    set_internal_num_keys(page, 0);
    set_internal_right_child(page, INVALID_PAGE_NUM);
}

fn internal_num_keys(page: &Page) -> u32 {
    u32::from_ne_bytes(page[COMMON_HEADER_SIZE..COMMON_HEADER_SIZE + 4].try_into().unwrap())
}

fn set_internal_num_keys(page: &mut Page, n: u32) {
    page[COMMON_HEADER_SIZE..COMMON_HEADER_SIZE + 4].copy_from_slice(&n.to_ne_bytes());
}

fn internal_right_child(page: &Page) -> PageId {
    let off = COMMON_HEADER_SIZE + 4;
    u32::from_ne_bytes(page[off..off + 4].try_into().unwrap())
}

fn set_internal_right_child(page: &mut Page, p: PageId) {
    let off = COMMON_HEADER_SIZE + 4;
    page[off..off + 4].copy_from_slice(&p.to_ne_bytes());
}

fn internal_cell_offset(cell_num: usize) -> usize {
    INTERNAL_HEADER_SIZE + cell_num * INTERNAL_CELL_SIZE
}

fn internal_child(page: &Page, cell_num: usize) -> PageId {
    let off = internal_cell_offset(cell_num);
    u32::from_ne_bytes(page[off..off + 4].try_into().unwrap())
}

fn set_internal_child(page: &mut Page, cell_num: usize, child: PageId) {
    let off = internal_cell_offset(cell_num);
    page[off..off + 4].copy_from_slice(&child.to_ne_bytes());
}

fn internal_key(page: &Page, cell_num: usize) -> u32 {
    let off = internal_cell_offset(cell_num) + 4;
    u32::from_ne_bytes(page[off..off + 4].try_into().unwrap())
}

fn set_internal_key(page: &mut Page, cell_num: usize, key: u32) {
    let off = internal_cell_offset(cell_num) + 4;
    page[off..off + 4].copy_from_slice(&key.to_ne_bytes());
}

fn set_internal_cell(page: &mut Page, cell_num: usize, child: PageId, key: u32) {
    set_internal_child(page, cell_num, child);
    set_internal_key(page, cell_num, key);
}

/// The child that owns `key`: the smallest key-bound `>= key` wins; if none
/// of the keyed cells bound it, it belongs under `right_child` (§4.5).
fn internal_find_child(page: &Page, key: u32) -> PageId {
    let num_keys = internal_num_keys(page) as usize;
    let mut lo = 0usize;
    let mut hi = num_keys;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if internal_key(page, mid) >= key {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    if lo == num_keys {
        internal_right_child(page)
    } else {
        internal_child(page, lo)
    }
}

// ---------------------------------------------------------------------------
// Tree-wide helpers
// ---------------------------------------------------------------------------

/// The largest key stored anywhere in the subtree rooted at `page_num`.
fn node_max_key(pager: &mut Pager, row_size: usize, page_num: PageId) -> Result<u32> {
    let page = pager.get_page(page_num)?;
    match node_type(page) {
        NodeType::Leaf => {
            let n = leaf_num_cells(page) as usize;
            Ok(leaf_key(page, n.saturating_sub(1), row_size))
        }
        NodeType::Internal => {
            let right = internal_right_child(page);
            node_max_key(pager, row_size, right)
        }
    }
}

fn leftmost_leaf(pager: &mut Pager, mut page_num: PageId) -> Result<PageId> {
    loop {
        let page = pager.get_page(page_num)?;
        match node_type(page) {
            NodeType::Leaf => return Ok(page_num),
            NodeType::Internal => {
                let num_keys = internal_num_keys(page) as usize;
                page_num = if num_keys > 0 {
                    internal_child(page, 0)
                } else {
                    internal_right_child(page)
                };
            }
        }
    }
}

/// Allocate a brand-new table: one empty leaf, marked root.
pub fn create_table(pager: &mut Pager, row_size: usize) -> Result<TableHandle> {
    let root_page = pager.unused_page_num();
    let page = pager.get_page(root_page)?;
    initialize_leaf(page);
    set_is_root(page, true);
    pager.flush(root_page)?;
    Ok(TableHandle { root_page, row_size })
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Descend from the root to the leaf that contains (or would contain) `key`.
pub fn find(pager: &mut Pager, table: &TableHandle, key: u32) -> Result<Cursor> {
    let mut page_num = table.root_page;
    loop {
        let page = pager.get_page(page_num)?;
        match node_type(page) {
            NodeType::Leaf => {
                let cell_num = leaf_find_cell(page, table.row_size, key);
                return Ok(Cursor { page_num, cell_num, end_of_table: false });
            }
            NodeType::Internal => {
                page_num = internal_find_child(page, key);
            }
        }
    }
}

/// Whether `key` is actually present (as opposed to merely the insertion
/// point `find` would return for it).
pub fn contains(pager: &mut Pager, table: &TableHandle, key: u32) -> Result<bool> {
    let cursor = find(pager, table, key)?;
    let page = pager.get_page(cursor.page_num)?;
    Ok(cursor.cell_num < leaf_num_cells(page) as usize && leaf_key(page, cursor.cell_num, table.row_size) == key)
}

/// A cursor at the smallest key in the table. Skips past empty leaves by
/// following `next_leaf`; an empty tree yields `end_of_table = true`.
pub fn start(pager: &mut Pager, table: &TableHandle) -> Result<Cursor> {
    let mut page_num = leftmost_leaf(pager, table.root_page)?;
    loop {
        let page = pager.get_page(page_num)?;
        if leaf_num_cells(page) > 0 {
            return Ok(Cursor { page_num, cell_num: 0, end_of_table: false });
        }
        let next = leaf_next_leaf(page);
        if next == 0 {
            return Ok(Cursor { page_num, cell_num: 0, end_of_table: true });
        }
        page_num = next;
    }
}

/// Advance a cursor by one cell, following `next_leaf` at a leaf boundary.
pub fn cursor_advance(pager: &mut Pager, table: &TableHandle, cursor: &mut Cursor) -> Result<()> {
    cursor.cell_num += 1;
    let page = pager.get_page(cursor.page_num)?;
    if cursor.cell_num >= leaf_num_cells(page) as usize {
        let next = leaf_next_leaf(page);
        if next == 0 {
            cursor.end_of_table = true;
        } else {
            cursor.page_num = next;
            cursor.cell_num = 0;
        }
    }
    Ok(())
}

/// Read the `{key, row}` at a positioned, non-end cursor.
pub fn cursor_value<'a>(pager: &'a mut Pager, table: &TableHandle, cursor: &Cursor) -> Result<(u32, &'a [u8])> {
    let page = pager.get_page(cursor.page_num)?;
    let key = leaf_key(page, cursor.cell_num, table.row_size);
    let value = leaf_value(page, cursor.cell_num, table.row_size);
    Ok((key, value))
}

// ---------------------------------------------------------------------------
// Insert
// ---------------------------------------------------------------------------

/// Insert `{key, row}`. Fails with [`EngineError::DuplicateKey`] if `key`
/// already exists.
pub fn insert(pager: &mut Pager, table: &TableHandle, key: u32, row: &[u8]) -> Result<()> {
    let cursor = find(pager, table, key)?;
    {
        let page = pager.get_page(cursor.page_num)?;
        if cursor.cell_num < leaf_num_cells(page) as usize
            && leaf_key(page, cursor.cell_num, table.row_size) == key
        {
            return Err(EngineError::DuplicateKey(key as i32));
        }
    }
    leaf_insert(pager, table, cursor.page_num, cursor.cell_num, key, row)
}

fn leaf_insert(
    pager: &mut Pager,
    table: &TableHandle,
    page_num: PageId,
    cell_num: usize,
    key: u32,
    row: &[u8],
) -> Result<()> {
    let row_size = table.row_size;
    let max_cells = leaf_max_cells(row_size);
    let num_cells = { leaf_num_cells(pager.get_page(page_num)?) as usize };

    if num_cells >= max_cells {
        return leaf_split_and_insert(pager, table, page_num, cell_num, key, row);
    }

    let page = pager.get_page(page_num)?;
    for i in (cell_num..num_cells).rev() {
        let (k, v) = (leaf_key(page, i, row_size), leaf_value(page, i, row_size).to_vec());
        set_leaf_cell(page, i + 1, row_size, k, &v);
    }
    set_leaf_cell(page, cell_num, row_size, key, row);
    set_leaf_num_cells(page, num_cells as u32 + 1);
    Ok(())
}

fn leaf_split_and_insert(
    pager: &mut Pager,
    table: &TableHandle,
    old_page_num: PageId,
    cell_num: usize,
    key: u32,
    row: &[u8],
) -> Result<()> {
    let row_size = table.row_size;
    let old_max = leaf_max_cells(row_size);
    let total = old_max + 1;
    let right_count = total / 2;
    let left_count = total - right_count;

    // Snapshot the existing cells (the leaf is full: exactly old_max of them)
    // plus the arriving one, in final sorted order.
    let mut cells: Vec<(u32, Vec<u8>)> = Vec::with_capacity(total);
    {
        let page = pager.get_page(old_page_num)?;
        for i in 0..old_max {
            cells.push((leaf_key(page, i, row_size), leaf_value(page, i, row_size).to_vec()));
        }
    }
    cells.insert(cell_num, (key, row.to_vec()));

    let (old_parent, old_next_leaf, old_is_root) = {
        let page = pager.get_page(old_page_num)?;
        (parent_page(page), leaf_next_leaf(page), is_root(page))
    };

    let new_page_num = pager.unused_page_num();
    {
        let new_page = pager.get_page(new_page_num)?;
        initialize_leaf(new_page);
        set_parent_page(new_page, old_parent);
        set_leaf_num_cells(new_page, right_count as u32);
        set_leaf_next_leaf(new_page, old_next_leaf);
        for (i, (k, v)) in cells[left_count..].iter().enumerate() {
            set_leaf_cell(new_page, i, row_size, *k, v);
        }
    }
    {
        let old_page = pager.get_page(old_page_num)?;
        set_leaf_num_cells(old_page, left_count as u32);
        set_leaf_next_leaf(old_page, new_page_num);
        for (i, (k, v)) in cells[..left_count].iter().enumerate() {
            set_leaf_cell(old_page, i, row_size, *k, v);
        }
    }

    debug!("split leaf {old_page_num} into {old_page_num}/{new_page_num} ({left_count}/{right_count} cells)");

    if old_is_root {
        create_new_root(pager, table, new_page_num)
    } else {
        let new_old_max = cells[left_count - 1].0;
        update_key_in_parent(pager, row_size, old_parent, old_page_num, new_old_max)?;
        internal_insert(pager, row_size, old_parent, new_page_num)
    }
}

/// Split the root leaf: move its (already split) contents into a fresh
/// left sibling, then re-initialize the *same* root page number as an
/// internal node with one key, so external references to the root page
/// number stay valid (§4.5).
fn create_new_root(pager: &mut Pager, table: &TableHandle, right_child_page_num: PageId) -> Result<()> {
    let root_page_num = table.root_page;
    let left_page_num = pager.unused_page_num();

    let root_copy: Page = *pager.get_page(root_page_num)?;
    {
        let left_page = pager.get_page(left_page_num)?;
        *left_page = root_copy;
        set_is_root(left_page, false);
        set_parent_page(left_page, root_page_num);
    }
    {
        let right_page = pager.get_page(right_child_page_num)?;
        set_parent_page(right_page, root_page_num);
    }

    let left_max_key = node_max_key(pager, table.row_size, left_page_num)?;
    let root = pager.get_page(root_page_num)?;
    initialize_internal(root);
    set_is_root(root, true);
    set_internal_num_keys(root, 1);
    set_internal_cell(root, 0, left_page_num, left_max_key);
    set_internal_right_child(root, right_child_page_num);

    debug!("created new root at page {root_page_num} over {left_page_num}/{right_child_page_num}");
    Ok(())
}

/// After a child's max key changes, update whichever ancestor holds a
/// stored bound for it. If the child is its parent's `right_child` there is
/// no stored key to fix in the parent itself — the parent's own max just
/// changed instead, so the update recurses one level up.
fn update_key_in_parent(
    pager: &mut Pager,
    row_size: usize,
    parent_page_num: PageId,
    child_page_num: PageId,
    new_key: u32,
) -> Result<()> {
    let page = pager.get_page(parent_page_num)?;
    let num_keys = internal_num_keys(page) as usize;
    if let Some(idx) = (0..num_keys).find(|&i| internal_child(page, i) == child_page_num) {
        set_internal_key(page, idx, new_key);
        return Ok(());
    }
    // child must be the right_child; nothing stored here to update, but this
    // node's own max changed, so keep propagating unless it's the root.
    if is_root(page) {
        return Ok(());
    }
    let grandparent = parent_page(page);
    update_key_in_parent(pager, row_size, grandparent, parent_page_num, new_key)
}

fn internal_insert(
    pager: &mut Pager,
    row_size: usize,
    parent_page_num: PageId,
    child_page_num: PageId,
) -> Result<()> {
    let child_max_key = node_max_key(pager, row_size, child_page_num)?;
    let num_keys = { internal_num_keys(pager.get_page(parent_page_num)?) as usize };

    if num_keys >= INTERNAL_MAX_KEYS {
        return internal_split_and_insert(pager, row_size, parent_page_num, child_page_num);
    }

    let old_right_child = { internal_right_child(pager.get_page(parent_page_num)?) };
    let right_max = if old_right_child == INVALID_PAGE_NUM {
        0
    } else {
        node_max_key(pager, row_size, old_right_child)?
    };
    let page = pager.get_page(parent_page_num)?;

    if old_right_child == INVALID_PAGE_NUM || child_max_key > right_max {
        if old_right_child != INVALID_PAGE_NUM {
            set_internal_cell(page, num_keys, old_right_child, right_max);
            set_internal_num_keys(page, num_keys as u32 + 1);
        }
        set_internal_right_child(page, child_page_num);
    } else {
        let mut lo = 0usize;
        let mut hi = num_keys;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if internal_key(page, mid) >= child_max_key {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        for i in (lo..num_keys).rev() {
            let (c, k) = (internal_child(page, i), internal_key(page, i));
            set_internal_cell(page, i + 1, c, k);
        }
        set_internal_cell(page, lo, child_page_num, child_max_key);
        set_internal_num_keys(page, num_keys as u32 + 1);
    }

    let child = pager.get_page(child_page_num)?;
    set_parent_page(child, parent_page_num);
    Ok(())
}

/// Every existing child of an internal node paired with the bound it is
/// known by: a keyed cell's own key, or the node's own max for the
/// (key-less) `right_child`.
fn internal_children_sorted(pager: &mut Pager, row_size: usize, page_num: PageId) -> Result<Vec<(PageId, u32)>> {
    let (num_keys, right_child) = {
        let page = pager.get_page(page_num)?;
        (internal_num_keys(page) as usize, internal_right_child(page))
    };
    let mut out = Vec::with_capacity(num_keys + 1);
    for i in 0..num_keys {
        let page = pager.get_page(page_num)?;
        out.push((internal_child(page, i), internal_key(page, i)));
    }
    let right_max = node_max_key(pager, row_size, right_child)?;
    out.push((right_child, right_max));
    Ok(out)
}

fn internal_split_and_insert(
    pager: &mut Pager,
    row_size: usize,
    old_page_num: PageId,
    child_page_num: PageId,
) -> Result<()> {
    let child_max_key = node_max_key(pager, row_size, child_page_num)?;
    let mut children = internal_children_sorted(pager, row_size, old_page_num)?;
    let insert_at = children.partition_point(|(_, k)| *k < child_max_key);
    children.insert(insert_at, (child_page_num, child_max_key));

    let total = children.len();
    let right_count = total / 2;
    let left_count = total - right_count;

    let left_group = &children[..left_count];
    let right_group = &children[left_count..];
    let (left_right_child, left_right_key) = *left_group.last().unwrap();
    let (right_right_child, right_right_key) = *right_group.last().unwrap();
    let _ = (left_right_key, right_right_key);

    let (old_parent, old_is_root) = {
        let page = pager.get_page(old_page_num)?;
        (parent_page(page), is_root(page))
    };

    let new_page_num = pager.unused_page_num();
    {
        let new_page = pager.get_page(new_page_num)?;
        initialize_internal(new_page);
        set_parent_page(new_page, old_parent);
        set_internal_num_keys(new_page, (right_group.len() - 1) as u32);
        for (i, (c, k)) in right_group[..right_group.len() - 1].iter().enumerate() {
            set_internal_cell(new_page, i, *c, *k);
        }
        set_internal_right_child(new_page, right_right_child);
    }
    for (c, _) in right_group {
        let page = pager.get_page(*c)?;
        set_parent_page(page, new_page_num);
    }

    {
        let old_page = pager.get_page(old_page_num)?;
        set_internal_num_keys(old_page, (left_group.len() - 1) as u32);
        for (i, (c, k)) in left_group[..left_group.len() - 1].iter().enumerate() {
            set_internal_cell(old_page, i, *c, *k);
        }
        set_internal_right_child(old_page, left_right_child);
    }
    for (c, _) in left_group {
        let page = pager.get_page(*c)?;
        set_parent_page(page, old_page_num);
    }

    debug!("split internal {old_page_num} into {old_page_num}/{new_page_num}");

    if old_is_root {
        create_new_internal_root(pager, row_size, old_page_num, new_page_num)
    } else {
        let new_old_max = node_max_key(pager, row_size, old_page_num)?;
        update_key_in_parent(pager, row_size, old_parent, old_page_num, new_old_max)?;
        internal_insert(pager, row_size, old_parent, new_page_num)
    }
}

/// Same move as [`create_new_root`], but the page being split is already an
/// internal node rather than a leaf.
fn create_new_internal_root(
    pager: &mut Pager,
    row_size: usize,
    root_page_num: PageId,
    right_child_page_num: PageId,
) -> Result<()> {
    let left_page_num = pager.unused_page_num();
    let root_copy: Page = *pager.get_page(root_page_num)?;
    {
        let left_page = pager.get_page(left_page_num)?;
        *left_page = root_copy;
        set_is_root(left_page, false);
        set_parent_page(left_page, root_page_num);
    }
    // Reparent every grandchild that moved from root_page_num to left_page_num.
    let (num_keys, right_child) = {
        let p = pager.get_page(left_page_num)?;
        (internal_num_keys(p) as usize, internal_right_child(p))
    };
    for i in 0..num_keys {
        let c = { internal_child(pager.get_page(left_page_num)?, i) };
        let page = pager.get_page(c)?;
        set_parent_page(page, left_page_num);
    }
    {
        let page = pager.get_page(right_child)?;
        set_parent_page(page, left_page_num);
    }
    {
        let page = pager.get_page(right_child_page_num)?;
        set_parent_page(page, root_page_num);
    }

    let left_max_key = node_max_key(pager, row_size, left_page_num)?;
    let root = pager.get_page(root_page_num)?;
    initialize_internal(root);
    set_is_root(root, true);
    set_internal_num_keys(root, 1);
    set_internal_cell(root, 0, left_page_num, left_max_key);
    set_internal_right_child(root, right_child_page_num);
    Ok(())
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

/// Delete `key` if present. Absent keys are a no-op success (§4.5).
pub fn delete(pager: &mut Pager, table: &TableHandle, key: u32) -> Result<()> {
    let cursor = find(pager, table, key)?;
    let row_size = table.row_size;
    let found = {
        let page = pager.get_page(cursor.page_num)?;
        cursor.cell_num < leaf_num_cells(page) as usize
            && leaf_key(page, cursor.cell_num, row_size) == key
    };
    if !found {
        return Ok(());
    }
    leaf_delete(pager, table, cursor.page_num, cursor.cell_num)
}

fn leaf_delete(pager: &mut Pager, table: &TableHandle, page_num: PageId, cell_num: usize) -> Result<()> {
    let row_size = table.row_size;
    let (num_cells, deleted_was_max, parent, leaf_is_root) = {
        let page = pager.get_page(page_num)?;
        let num_cells = leaf_num_cells(page) as usize;
        let deleted_was_max = cell_num == num_cells - 1;
        (num_cells, deleted_was_max, parent_page(page), is_root(page))
    };

    {
        let page = pager.get_page(page_num)?;
        for i in cell_num..num_cells - 1 {
            let (k, v) = (leaf_key(page, i + 1, row_size), leaf_value(page, i + 1, row_size).to_vec());
            set_leaf_cell(page, i, row_size, k, &v);
        }
        set_leaf_num_cells(page, num_cells as u32 - 1);
    }

    let new_num = num_cells - 1;
    if new_num == 0 {
        if !leaf_is_root {
            handle_underflow(pager, table, page_num)?;
        }
    } else if deleted_was_max && !leaf_is_root {
        let new_max = { leaf_key(pager.get_page(page_num)?, new_num - 1, row_size) };
        update_key_in_parent(pager, row_size, parent, page_num, new_max)?;
    }
    Ok(())
}

/// A non-root leaf just emptied out: unlink it from the `next_leaf` chain
/// and remove its slot from its parent, cascading upward if the parent
/// itself becomes childless, and collapsing the tree's height if the root
/// ends up with a single child (§4.5).
///
/// There is no free list (§9): the emptied page number is simply abandoned.
fn handle_underflow(pager: &mut Pager, table: &TableHandle, leaf_page_num: PageId) -> Result<()> {
    relink_around_leaf(pager, table.root_page, leaf_page_num)?;

    let parent = { parent_page(pager.get_page(leaf_page_num)?) };
    let parent_now_empty = remove_child_from_parent(pager, parent, leaf_page_num)?;

    if parent == table.root_page {
        maybe_promote_only_child(pager, table.root_page)?;
    } else if parent_now_empty {
        handle_underflow_internal(pager, table, parent)?;
    }
    Ok(())
}

/// Same cascade as [`handle_underflow`], but for an internal node that has
/// become childless (no keys, no right child) after losing a child.
fn handle_underflow_internal(pager: &mut Pager, table: &TableHandle, page_num: PageId) -> Result<()> {
    let parent = { parent_page(pager.get_page(page_num)?) };
    let parent_now_empty = remove_child_from_parent(pager, parent, page_num)?;
    if parent == table.root_page {
        maybe_promote_only_child(pager, table.root_page)?;
    } else if parent_now_empty {
        handle_underflow_internal(pager, table, parent)?;
    }
    Ok(())
}

/// Leaves are singly linked (`next_leaf` only). To unlink an emptied leaf
/// we walk the chain from the leftmost leaf looking for whoever points at
/// it. Only runs when a leaf has just gone fully empty, not on the hot
/// insert/scan path.
fn relink_around_leaf(pager: &mut Pager, root_page: PageId, leaf_page_num: PageId) -> Result<()> {
    let removed_next = { leaf_next_leaf(pager.get_page(leaf_page_num)?) };
    let mut cur = leftmost_leaf(pager, root_page)?;
    if cur == leaf_page_num {
        return Ok(()); // no predecessor; nothing to relink
    }
    loop {
        let next = { leaf_next_leaf(pager.get_page(cur)?) };
        if next == leaf_page_num {
            let page = pager.get_page(cur)?;
            set_leaf_next_leaf(page, removed_next);
            return Ok(());
        }
        if next == 0 {
            return Ok(());
        }
        cur = next;
    }
}

/// Remove `child_page_num`'s slot from `parent_page_num`. If it was
/// referenced as `right_child`, the last keyed child-key pair is pulled
/// into the `right_child` slot; otherwise cells above it shift left.
/// Returns whether the parent is now entirely childless.
fn remove_child_from_parent(pager: &mut Pager, parent_page_num: PageId, child_page_num: PageId) -> Result<bool> {
    let page = pager.get_page(parent_page_num)?;
    let num_keys = internal_num_keys(page) as usize;

    if internal_right_child(page) == child_page_num {
        if num_keys == 0 {
            set_internal_right_child(page, INVALID_PAGE_NUM);
            return Ok(true);
        }
        let last = num_keys - 1;
        let last_child = internal_child(page, last);
        set_internal_right_child(page, last_child);
        set_internal_num_keys(page, last as u32);
        return Ok(false);
    }

    let idx = (0..num_keys)
        .find(|&i| internal_child(page, i) == child_page_num)
        .expect("child not found in parent during underflow removal");
    for i in idx..num_keys - 1 {
        let (c, k) = (internal_child(page, i + 1), internal_key(page, i + 1));
        set_internal_cell(page, i, c, k);
    }
    set_internal_num_keys(page, num_keys as u32 - 1);
    Ok(num_keys - 1 == 0 && internal_right_child(page) == INVALID_PAGE_NUM)
}

/// If the root is an internal node with no keys but a single `right_child`,
/// promote that child's contents into the root's page number, reducing
/// tree height by one (§4.5, §4.8 node-type transition).
fn maybe_promote_only_child(pager: &mut Pager, root_page_num: PageId) -> Result<()> {
    let (ty, num_keys, right_child) = {
        let page = pager.get_page(root_page_num)?;
        (node_type(page), internal_num_keys(page) as usize, internal_right_child(page))
    };
    if ty != NodeType::Internal || num_keys != 0 || right_child == INVALID_PAGE_NUM {
        return Ok(());
    }

    let child_copy: Page = *pager.get_page(right_child)?;
    let root = pager.get_page(root_page_num)?;
    *root = child_copy;
    set_is_root(root, true);

    if node_type(root) == NodeType::Internal {
        let num_keys = internal_num_keys(root) as usize;
        for i in 0..num_keys {
            let c = internal_child(pager.get_page(root_page_num)?, i);
            let page = pager.get_page(c)?;
            set_parent_page(page, root_page_num);
        }
        let rc = internal_right_child(pager.get_page(root_page_num)?);
        if rc != INVALID_PAGE_NUM {
            let page = pager.get_page(rc)?;
            set_parent_page(page, root_page_num);
        }
    }
    debug!("promoted single child into root page {root_page_num}, tree height reduced");
    Ok(())
}

// ---------------------------------------------------------------------------
// Diagnostics (`.constants` / `.btree`, §6.4)
// ---------------------------------------------------------------------------

/// Per-table derived sizing constants, as printed by the `.constants`
/// meta-command.
pub struct Constants {
    pub row_size: usize,
    pub leaf_header_size: usize,
    pub leaf_max_cells: usize,
    pub internal_header_size: usize,
    pub internal_max_keys: usize,
}

pub fn constants(row_size: usize) -> Constants {
    Constants {
        row_size,
        leaf_header_size: LEAF_HEADER_SIZE,
        leaf_max_cells: leaf_max_cells(row_size),
        internal_header_size: INTERNAL_HEADER_SIZE,
        internal_max_keys: INTERNAL_MAX_KEYS,
    }
}

/// An indented recursive dump of node types, keys, and child pointers for
/// the `.btree` meta-command.
pub fn dump_tree(pager: &mut Pager, table: &TableHandle) -> Result<String> {
    let mut out = String::new();
    dump_node(pager, table.row_size, table.root_page, 0, &mut out)?;
    Ok(out)
}

fn dump_node(pager: &mut Pager, row_size: usize, page_num: PageId, depth: usize, out: &mut String) -> Result<()> {
    let indent = "  ".repeat(depth);
    let page = pager.get_page(page_num)?;
    match node_type(page) {
        NodeType::Leaf => {
            let n = leaf_num_cells(page) as usize;
            out.push_str(&format!("{indent}- leaf (page {page_num}, {n} cells)\n"));
            for i in 0..n {
                let page = pager.get_page(page_num)?;
                out.push_str(&format!("{indent}  - key {}\n", leaf_key(page, i, row_size)));
            }
        }
        NodeType::Internal => {
            let num_keys = internal_num_keys(page) as usize;
            out.push_str(&format!("{indent}- internal (page {page_num}, {num_keys} keys)\n"));
            for i in 0..num_keys {
                let (child, key) = {
                    let page = pager.get_page(page_num)?;
                    (internal_child(page, i), internal_key(page, i))
                };
                dump_node(pager, row_size, child, depth + 1, out)?;
                out.push_str(&format!("{indent}  - key {key}\n"));
            }
            let right_child = { internal_right_child(pager.get_page(page_num)?) };
            dump_node(pager, row_size, right_child, depth + 1, out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    const ROW_SIZE: usize = 8;

    fn new_table() -> (Pager, TableHandle, NamedTempFile) {
        let tmp = NamedTempFile::new().unwrap();
        let mut pager = Pager::open(tmp.path()).unwrap();
        let table = create_table(&mut pager, ROW_SIZE).unwrap();
        (pager, table, tmp)
    }

    fn row_for(key: u32) -> Vec<u8> {
        let mut r = vec![0u8; ROW_SIZE];
        r[0..4].copy_from_slice(&key.to_ne_bytes());
        r
    }

    fn scan_keys(pager: &mut Pager, table: &TableHandle) -> Vec<u32> {
        let mut keys = Vec::new();
        let mut cursor = start(pager, table).unwrap();
        while !cursor.end_of_table {
            let (k, _) = cursor_value(pager, table, &cursor).unwrap();
            keys.push(k);
            cursor_advance(pager, table, &mut cursor).unwrap();
        }
        keys
    }

    #[test]
    fn empty_tree_scan_yields_end_of_table() {
        let (mut pager, table, _tmp) = new_table();
        let cursor = start(&mut pager, &table).unwrap();
        assert!(cursor.end_of_table);
    }

    #[test]
    fn point_lookup_finds_inserted_key() {
        let (mut pager, table, _tmp) = new_table();
        insert(&mut pager, &table, 5, &row_for(5)).unwrap();
        let cursor = find(&mut pager, &table, 5).unwrap();
        let (k, _) = cursor_value(&mut pager, &table, &cursor).unwrap();
        assert_eq!(k, 5);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let (mut pager, table, _tmp) = new_table();
        insert(&mut pager, &table, 1, &row_for(1)).unwrap();
        let err = insert(&mut pager, &table, 1, &row_for(1)).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateKey(1)));
    }

    #[test]
    fn scan_visits_keys_in_ascending_order_after_unordered_inserts() {
        let (mut pager, table, _tmp) = new_table();
        for k in [5, 1, 9, 3, 7, 2, 8, 4, 6] {
            insert(&mut pager, &table, k, &row_for(k)).unwrap();
        }
        assert_eq!(scan_keys(&mut pager, &table), vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn inserting_past_one_leaf_splits_and_preserves_order() {
        let (mut pager, table, _tmp) = new_table();
        let max = leaf_max_cells(ROW_SIZE) as u32;
        for k in 1..=(max + 1) {
            insert(&mut pager, &table, k, &row_for(k)).unwrap();
        }
        let expect: Vec<u32> = (1..=(max + 1)).collect();
        assert_eq!(scan_keys(&mut pager, &table), expect);
        let root = pager.get_page(table.root_page).unwrap();
        assert_eq!(node_type(root), NodeType::Internal);
    }

    #[test]
    fn many_splits_build_a_multi_level_tree_and_stay_ordered() {
        let (mut pager, table, _tmp) = new_table();
        for k in 1..=60u32 {
            insert(&mut pager, &table, k, &row_for(k)).unwrap();
        }
        let expect: Vec<u32> = (1..=60).collect();
        assert_eq!(scan_keys(&mut pager, &table), expect);
        for k in 1..=60u32 {
            let cursor = find(&mut pager, &table, k).unwrap();
            let (found, _) = cursor_value(&mut pager, &table, &cursor).unwrap();
            assert_eq!(found, k);
        }
    }

    #[test]
    fn delete_absent_key_is_a_no_op() {
        let (mut pager, table, _tmp) = new_table();
        insert(&mut pager, &table, 1, &row_for(1)).unwrap();
        delete(&mut pager, &table, 99).unwrap();
        assert_eq!(scan_keys(&mut pager, &table), vec![1]);
    }

    #[test]
    fn delete_then_scan_matches_inserted_minus_deleted() {
        let (mut pager, table, _tmp) = new_table();
        for k in 1..=20u32 {
            insert(&mut pager, &table, k, &row_for(k)).unwrap();
        }
        for k in [2, 5, 11, 20, 1] {
            delete(&mut pager, &table, k).unwrap();
        }
        let expect: Vec<u32> = (1..=20).filter(|k| ![2, 5, 11, 20, 1].contains(k)).collect();
        assert_eq!(scan_keys(&mut pager, &table), expect);
    }

    #[test]
    fn deleting_every_key_yields_empty_root_leaf() {
        let (mut pager, table, _tmp) = new_table();
        for k in 1..=10u32 {
            insert(&mut pager, &table, k, &row_for(k)).unwrap();
        }
        for k in 1..=10u32 {
            delete(&mut pager, &table, k).unwrap();
        }
        let cursor = start(&mut pager, &table).unwrap();
        assert!(cursor.end_of_table);
        assert_eq!(scan_keys(&mut pager, &table), Vec::<u32>::new());
    }

    #[test]
    fn delete_after_multi_level_split_keeps_remaining_rows_ordered() {
        let (mut pager, table, _tmp) = new_table();
        for k in 1..=40u32 {
            insert(&mut pager, &table, k, &row_for(k)).unwrap();
        }
        for k in (1..=40u32).step_by(3) {
            delete(&mut pager, &table, k).unwrap();
        }
        let expect: Vec<u32> = (1..=40).filter(|k| (k - 1) % 3 != 0).collect();
        assert_eq!(scan_keys(&mut pager, &table), expect);
    }

    #[test]
    fn dump_tree_and_constants_do_not_panic() {
        let (mut pager, table, _tmp) = new_table();
        for k in 1..=20u32 {
            insert(&mut pager, &table, k, &row_for(k)).unwrap();
        }
        let dump = dump_tree(&mut pager, &table).unwrap();
        assert!(dump.contains("leaf") || dump.contains("internal"));
        let c = constants(table.row_size);
        assert_eq!(c.row_size, ROW_SIZE);
        assert!(c.leaf_max_cells > 0);
    }
}
