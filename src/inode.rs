/*
 * Copyright 2025 Luc Lenôtre
 *
 * This file is part of Maestro.
 *
 * Maestro is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Maestro is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Maestro. If not, see <https://www.gnu.org/licenses/>.
 */

//! Inode layer: refcounted cache, indirect addressing, data access.
//!
//! An inode addresses its content through three tiers, each overflowing on
//! the next when full:
//! - Direct block pointers: each inode has [`NR_DIRECT_BLOCKS`] of them.
//! - Single-indirect pointer: a block dedicated to storing a list of more
//!   block pointers.
//! - Double-indirect pointer: a block storing pointers to single-indirect
//!   blocks.
//!
//! Pointer blocks are ordinary data-region blocks; a zero pointer means
//! "not yet allocated". Data blocks are allocated lazily on first write and
//! holes read as zeroes.
//!
//! In-memory inodes live in the superblock's cache, keyed by inode number.
//! [`SuperBlock::get_inode`] hands out a handle and bumps the entry's usage
//! count; [`SuperBlock::put_inode`] releases it, syncing and evicting the
//! entry when the last handle goes away.

use crate::bitmap::Bitmap;
use crate::disk::BLOCK_SIZE;
use crate::error::Error;
use crate::error::Result;
use crate::superblock::NR_INODES;
use crate::superblock::SuperBlock;
use crate::util;
use std::cmp::min;
use std::fmt;
use std::mem::size_of;

/// The inode number of the root directory.
pub const ROOT_INODE_NR: u32 = 0;

/// The maximum number of direct block pointers in an inode.
pub const NR_DIRECT_BLOCKS: usize = 4;
/// Number of block pointers a pointer block can hold.
pub const PTRS_PER_BLOCK: usize = BLOCK_SIZE / size_of::<u32>();
/// The maximum size of a file in bytes, from the addressing scheme.
pub const MAX_FILE_SIZE: usize =
    (NR_DIRECT_BLOCKS + PTRS_PER_BLOCK + PTRS_PER_BLOCK * PTRS_PER_BLOCK) * BLOCK_SIZE;
/// Number of dinodes per inode-table block.
pub const INODES_PER_BLOCK: u32 = (BLOCK_SIZE / size_of::<Dinode>()) as u32;

// Dinodes must not span inode-table blocks.
const _: () = assert!(BLOCK_SIZE % size_of::<Dinode>() == 0);

/// The type of a file, as stored in its dinode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InodeType {
    /// The inode is unallocated.
    None,
    /// Regular file.
    File,
    /// Directory.
    Dir,
}

impl InodeType {
    /// Decodes the on-disk type field.
    fn from_raw(typ: i32) -> Self {
        match typ {
            1 => Self::File,
            2 => Self::Dir,
            _ => Self::None,
        }
    }

    /// Encodes the type for the on-disk record.
    fn to_raw(self) -> i32 {
        match self {
            Self::None => 0,
            Self::File => 1,
            Self::Dir => 2,
        }
    }
}

impl fmt::Display for InodeType {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::File => "file",
            Self::Dir => "directory",
        };
        write!(fmt, "{name}")
    }
}

/// The on-disk inode record.
#[repr(C)]
#[derive(Clone, Copy)]
struct Dinode {
    /// File type (`0` = none, `1` = regular file, `2` = directory).
    typ: i32,
    /// Size of the file in bytes.
    size: i32,
    /// Direct block pointers. Zero means unallocated.
    direct: [u32; NR_DIRECT_BLOCKS],
    /// Single-indirect pointer block. Zero means unallocated.
    indirect: u32,
    /// Double-indirect pointer block. Zero means unallocated.
    double_indirect: u32,
}

/// An in-memory inode, held in the superblock's cache.
pub struct Inode {
    /// Copy of the on-disk record.
    dinode: Dinode,
    /// Whether the in-memory copy differs from the on-disk one.
    dirty: bool,
    /// Number of handles currently held on this inode.
    refcount: u32,
}

/// A handle on a cached inode.
///
/// Handles are obtained from [`SuperBlock::get_inode`] and must be released
/// with [`SuperBlock::put_inode`] on every exit path; the cache entry lives
/// for as long as at least one handle is held.
pub struct InodeHandle {
    /// The inode number.
    nr: u32,
}

impl InodeHandle {
    /// Returns the inode number.
    pub fn nr(&self) -> u32 {
        self.nr
    }
}

/// Position of a logical block in the inode's addressing tiers.
enum BlockPath {
    /// Index into the direct pointer array.
    Direct(usize),
    /// Slot in the single-indirect pointer block.
    Indirect(usize),
    /// Outer and inner slots under the double-indirect pointer block.
    DoubleIndirect(usize, usize),
}

/// Maps a logical block index to its addressing tier.
fn block_path(index: usize) -> Result<BlockPath> {
    if index < NR_DIRECT_BLOCKS {
        Ok(BlockPath::Direct(index))
    } else if index < NR_DIRECT_BLOCKS + PTRS_PER_BLOCK {
        Ok(BlockPath::Indirect(index - NR_DIRECT_BLOCKS))
    } else if index < NR_DIRECT_BLOCKS + PTRS_PER_BLOCK + PTRS_PER_BLOCK * PTRS_PER_BLOCK {
        let i = index - NR_DIRECT_BLOCKS - PTRS_PER_BLOCK;
        Ok(BlockPath::DoubleIndirect(i / PTRS_PER_BLOCK, i % PTRS_PER_BLOCK))
    } else {
        Err(Error::TooBig)
    }
}

/// Reads the pointer at `slot` from a pointer block's contents.
fn ptr_get(buf: &[u8; BLOCK_SIZE], slot: usize) -> u32 {
    let off = slot * 4;
    u32::from_ne_bytes(buf[off..off + 4].try_into().unwrap())
}

/// Writes the pointer at `slot` into a pointer block's contents.
fn ptr_set(buf: &mut [u8; BLOCK_SIZE], slot: usize, val: u32) {
    let off = slot * 4;
    buf[off..off + 4].copy_from_slice(&val.to_ne_bytes());
}

/// Where a freshly allocated block's pointer was installed, kept so a failed
/// write can roll its allocations back.
enum PtrSlot {
    /// `direct[i]` in the dinode.
    Direct(usize),
    /// The dinode's single-indirect pointer.
    Indirect,
    /// The dinode's double-indirect pointer.
    DoubleIndirect,
    /// The given slot of the given pointer block.
    InBlock(u32, usize),
}

/// One allocation performed while extending a file.
struct AllocUndo {
    /// The block that was allocated.
    block_nr: u32,
    /// Where its pointer was installed.
    slot: PtrSlot,
}

impl SuperBlock {
    /// Returns a handle on inode `nr`, reading its record from the inode
    /// table when it is absent from the cache.
    pub fn get_inode(&mut self, nr: u32) -> InodeHandle {
        assert!(nr < NR_INODES);
        if let Some(entry) = self.cache.get_mut(&nr) {
            entry.refcount += 1;
            return InodeHandle { nr };
        }
        let mut block = [0u8; BLOCK_SIZE];
        let blk = self.inode_blocks_start() + nr / INODES_PER_BLOCK;
        self.dev.read_blocks(&mut block, blk as u64, 1);
        let slot = (nr % INODES_PER_BLOCK) as usize * size_of::<Dinode>();
        let dinode: Dinode = unsafe { util::read_struct(&block[slot..]) };
        self.cache.insert(
            nr,
            Inode {
                dinode,
                dirty: false,
                refcount: 1,
            },
        );
        InodeHandle { nr }
    }

    /// Releases a handle.
    ///
    /// When the last handle on the inode goes away, the entry is synced if
    /// dirty and evicted from the cache.
    pub fn put_inode(&mut self, handle: InodeHandle) {
        let nr = handle.nr;
        let entry = self.cache.get_mut(&nr).expect("released inode not cached");
        entry.refcount -= 1;
        if entry.refcount == 0 {
            if entry.dirty {
                self.sync_inode_nr(nr);
            }
            self.cache.remove(&nr);
        }
    }

    /// Writes the inode back to its slot in the inode table, if dirty.
    pub fn sync_inode(&mut self, handle: &InodeHandle) {
        self.sync_inode_nr(handle.nr);
    }

    fn sync_inode_nr(&mut self, nr: u32) {
        let entry = self.cache.get_mut(&nr).expect("synced inode not cached");
        if !entry.dirty {
            return;
        }
        entry.dirty = false;
        let dinode = entry.dinode;
        let mut block = [0u8; BLOCK_SIZE];
        let blk = self.inode_blocks_start() + nr / INODES_PER_BLOCK;
        self.dev.read_blocks(&mut block, blk as u64, 1);
        let slot = (nr % INODES_PER_BLOCK) as usize * size_of::<Dinode>();
        block[slot..slot + size_of::<Dinode>()].copy_from_slice(util::reinterpret(&dinode));
        self.dev.write_blocks(&block, blk as u64, 1);
    }

    /// Returns the type of the inode behind the given handle.
    pub fn inode_type(&self, handle: &InodeHandle) -> InodeType {
        InodeType::from_raw(self.cache[&handle.nr].dinode.typ)
    }

    /// Returns the size in bytes of the inode behind the given handle.
    pub fn inode_size(&self, handle: &InodeHandle) -> u32 {
        self.cache[&handle.nr].dinode.size as u32
    }

    /// Allocates a fresh inode of the given type.
    ///
    /// The inode number comes from the inode freemap (persisted
    /// write-through). The new inode starts with size zero and no blocks, is
    /// marked dirty and is returned with one handle held.
    pub fn create_inode(&mut self, typ: InodeType) -> Result<InodeHandle> {
        let nr = self.get_inode_freemap()?;
        let handle = self.get_inode(nr);
        let entry = self.cache.get_mut(&nr).expect("created inode not cached");
        entry.dinode = Dinode {
            typ: typ.to_raw(),
            size: 0,
            direct: [0; NR_DIRECT_BLOCKS],
            indirect: 0,
            double_indirect: 0,
        };
        entry.dirty = true;
        Ok(handle)
    }

    /// Removes the inode: frees all its blocks, releases its number and
    /// drops it from the cache.
    ///
    /// The caller's handle must be the only one held.
    pub fn remove_inode(&mut self, handle: InodeHandle) {
        self.truncate_data(&handle, 0);
        self.put_inode_freemap(handle.nr);
        let entry = self
            .cache
            .get_mut(&handle.nr)
            .expect("removed inode not cached");
        assert_eq!(entry.refcount, 1, "removing a shared inode");
        entry.dinode.typ = InodeType::None.to_raw();
        entry.dirty = true;
        self.sync_inode_nr(handle.nr);
        self.cache.remove(&handle.nr);
    }

    /// Resolves a logical block index to a physical block number.
    ///
    /// Returns zero when the block, or a pointer block on the way to it, is
    /// not allocated.
    fn log_to_phy(&mut self, nr: u32, index: usize) -> Result<u32> {
        let dinode = self.cache[&nr].dinode;
        let mut scratch = [0u8; BLOCK_SIZE];
        match block_path(index)? {
            BlockPath::Direct(i) => Ok(dinode.direct[i]),
            BlockPath::Indirect(slot) => {
                if dinode.indirect == 0 {
                    return Ok(0);
                }
                self.read_data_block(&mut scratch, dinode.indirect);
                Ok(ptr_get(&scratch, slot))
            }
            BlockPath::DoubleIndirect(outer, inner) => {
                if dinode.double_indirect == 0 {
                    return Ok(0);
                }
                self.read_data_block(&mut scratch, dinode.double_indirect);
                let mid = ptr_get(&scratch, outer);
                if mid == 0 {
                    return Ok(0);
                }
                self.read_data_block(&mut scratch, mid);
                Ok(ptr_get(&scratch, inner))
            }
        }
    }

    /// Resolves a logical block index, allocating the data block and any
    /// missing pointer blocks on the way.
    ///
    /// Every allocation is recorded in `undo` so the caller can roll the
    /// whole write back on failure.
    fn log_to_phy_alloc(&mut self, nr: u32, index: usize, undo: &mut Vec<AllocUndo>) -> Result<u32> {
        let mut scratch = [0u8; BLOCK_SIZE];
        match block_path(index)? {
            BlockPath::Direct(i) => {
                let phy = self.cache[&nr].dinode.direct[i];
                if phy != 0 {
                    return Ok(phy);
                }
                let phy = self.alloc_block()?;
                let entry = self.cache.get_mut(&nr).expect("inode not cached");
                entry.dinode.direct[i] = phy;
                entry.dirty = true;
                undo.push(AllocUndo {
                    block_nr: phy,
                    slot: PtrSlot::Direct(i),
                });
                Ok(phy)
            }
            BlockPath::Indirect(slot) => {
                let mut indirect = self.cache[&nr].dinode.indirect;
                if indirect == 0 {
                    indirect = self.alloc_block()?;
                    let entry = self.cache.get_mut(&nr).expect("inode not cached");
                    entry.dinode.indirect = indirect;
                    entry.dirty = true;
                    undo.push(AllocUndo {
                        block_nr: indirect,
                        slot: PtrSlot::Indirect,
                    });
                }
                self.read_data_block(&mut scratch, indirect);
                let mut phy = ptr_get(&scratch, slot);
                if phy == 0 {
                    phy = self.alloc_block()?;
                    ptr_set(&mut scratch, slot, phy);
                    self.write_data_block(&scratch, indirect);
                    undo.push(AllocUndo {
                        block_nr: phy,
                        slot: PtrSlot::InBlock(indirect, slot),
                    });
                }
                Ok(phy)
            }
            BlockPath::DoubleIndirect(outer, inner) => {
                let mut double_indirect = self.cache[&nr].dinode.double_indirect;
                if double_indirect == 0 {
                    double_indirect = self.alloc_block()?;
                    let entry = self.cache.get_mut(&nr).expect("inode not cached");
                    entry.dinode.double_indirect = double_indirect;
                    entry.dirty = true;
                    undo.push(AllocUndo {
                        block_nr: double_indirect,
                        slot: PtrSlot::DoubleIndirect,
                    });
                }
                self.read_data_block(&mut scratch, double_indirect);
                let mut mid = ptr_get(&scratch, outer);
                if mid == 0 {
                    mid = self.alloc_block()?;
                    ptr_set(&mut scratch, outer, mid);
                    self.write_data_block(&scratch, double_indirect);
                    undo.push(AllocUndo {
                        block_nr: mid,
                        slot: PtrSlot::InBlock(double_indirect, outer),
                    });
                }
                self.read_data_block(&mut scratch, mid);
                let mut phy = ptr_get(&scratch, inner);
                if phy == 0 {
                    phy = self.alloc_block()?;
                    ptr_set(&mut scratch, inner, phy);
                    self.write_data_block(&scratch, mid);
                    undo.push(AllocUndo {
                        block_nr: phy,
                        slot: PtrSlot::InBlock(mid, inner),
                    });
                }
                Ok(phy)
            }
        }
    }

    /// Rolls back the allocations recorded in `undo`, newest first: clears
    /// the installed pointer and frees the block.
    fn rollback_alloc(&mut self, nr: u32, undo: Vec<AllocUndo>) {
        let mut scratch = [0u8; BLOCK_SIZE];
        for u in undo.into_iter().rev() {
            match u.slot {
                PtrSlot::Direct(i) => {
                    let entry = self.cache.get_mut(&nr).expect("inode not cached");
                    entry.dinode.direct[i] = 0;
                    entry.dirty = true;
                }
                PtrSlot::Indirect => {
                    let entry = self.cache.get_mut(&nr).expect("inode not cached");
                    entry.dinode.indirect = 0;
                    entry.dirty = true;
                }
                PtrSlot::DoubleIndirect => {
                    let entry = self.cache.get_mut(&nr).expect("inode not cached");
                    entry.dinode.double_indirect = 0;
                    entry.dirty = true;
                }
                PtrSlot::InBlock(block_nr, slot) => {
                    self.read_data_block(&mut scratch, block_nr);
                    ptr_set(&mut scratch, slot, 0);
                    self.write_data_block(&scratch, block_nr);
                }
            }
            self.free_block(u.block_nr);
        }
    }

    /// Reads up to `buf.len()` bytes from the file at byte offset `start`.
    ///
    /// Reads past the end of the file are clamped; unallocated blocks within
    /// the file read as zeroes. Returns the number of bytes read.
    pub fn read_data(&mut self, handle: &InodeHandle, start: u32, buf: &mut [u8]) -> usize {
        let size = self.inode_size(handle);
        if start >= size {
            return 0;
        }
        let len = min(buf.len(), (size - start) as usize);
        let mut block = [0u8; BLOCK_SIZE];
        let mut done = 0;
        while done < len {
            let off = start as usize + done;
            let index = off / BLOCK_SIZE;
            let begin = off % BLOCK_SIZE;
            let n = min(len - done, BLOCK_SIZE - begin);
            let phy = self.log_to_phy(handle.nr, index).unwrap_or(0);
            if phy == 0 {
                buf[done..done + n].fill(0);
            } else {
                self.read_data_block(&mut block, phy);
                buf[done..done + n].copy_from_slice(&block[begin..begin + n]);
            }
            done += n;
        }
        len
    }

    /// Writes `buf` at byte offset `start`, allocating blocks on demand.
    ///
    /// The call is atomic with respect to the file: on failure every block
    /// allocated by this call is released again and the size is left
    /// untouched. On success the size grows to cover the written range and
    /// the inode is marked dirty. Blocks below `start` that were never
    /// written stay unallocated and read as zeroes.
    pub fn write_data(&mut self, handle: &InodeHandle, start: u32, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let end = start as usize + buf.len();
        if end > MAX_FILE_SIZE {
            return Err(Error::TooBig);
        }
        let mut undo = Vec::new();
        let mut block = [0u8; BLOCK_SIZE];
        let mut done = 0;
        while done < buf.len() {
            let off = start as usize + done;
            let index = off / BLOCK_SIZE;
            let begin = off % BLOCK_SIZE;
            let n = min(buf.len() - done, BLOCK_SIZE - begin);
            let phy = match self.log_to_phy_alloc(handle.nr, index, &mut undo) {
                Ok(phy) => phy,
                Err(e) => {
                    self.rollback_alloc(handle.nr, undo);
                    return Err(e);
                }
            };
            if n == BLOCK_SIZE {
                block.copy_from_slice(&buf[done..done + n]);
            } else {
                self.read_data_block(&mut block, phy);
                block[begin..begin + n].copy_from_slice(&buf[done..done + n]);
            }
            self.write_data_block(&block, phy);
            done += n;
        }
        let entry = self.cache.get_mut(&handle.nr).expect("inode not cached");
        if end as i32 > entry.dinode.size {
            entry.dinode.size = end as i32;
        }
        entry.dirty = true;
        Ok(buf.len())
    }

    /// Truncates or extends the file to `new_size` bytes.
    ///
    /// When shrinking, every data block whose first byte lies at or past
    /// `new_size` is freed, along with pointer blocks that become wholly
    /// unreferenced. Extending only moves the size, leaving a hole.
    pub fn truncate_data(&mut self, handle: &InodeHandle, new_size: u32) {
        let nr = handle.nr;
        let size = self.inode_size(handle);
        if new_size < size {
            let keep = (new_size as usize).div_ceil(BLOCK_SIZE);
            let dinode = self.cache[&nr].dinode;
            for (i, phy) in dinode.direct.iter().enumerate() {
                if i >= keep && *phy != 0 {
                    self.free_block(*phy);
                    let entry = self.cache.get_mut(&nr).expect("inode not cached");
                    entry.dinode.direct[i] = 0;
                }
            }
            if dinode.indirect != 0 {
                let empty = self.truncate_ptr_block(dinode.indirect, NR_DIRECT_BLOCKS, keep);
                if empty {
                    self.free_block(dinode.indirect);
                    let entry = self.cache.get_mut(&nr).expect("inode not cached");
                    entry.dinode.indirect = 0;
                }
            }
            if dinode.double_indirect != 0 {
                let mut scratch = [0u8; BLOCK_SIZE];
                self.read_data_block(&mut scratch, dinode.double_indirect);
                let mut all_empty = true;
                let mut modified = false;
                for outer in 0..PTRS_PER_BLOCK {
                    let mid = ptr_get(&scratch, outer);
                    if mid == 0 {
                        continue;
                    }
                    let base = NR_DIRECT_BLOCKS + PTRS_PER_BLOCK + outer * PTRS_PER_BLOCK;
                    if self.truncate_ptr_block(mid, base, keep) {
                        self.free_block(mid);
                        ptr_set(&mut scratch, outer, 0);
                        modified = true;
                    } else {
                        all_empty = false;
                    }
                }
                if all_empty {
                    self.free_block(dinode.double_indirect);
                    let entry = self.cache.get_mut(&nr).expect("inode not cached");
                    entry.dinode.double_indirect = 0;
                } else if modified {
                    self.write_data_block(&scratch, dinode.double_indirect);
                }
            }
        }
        let entry = self.cache.get_mut(&nr).expect("inode not cached");
        entry.dinode.size = new_size as i32;
        entry.dirty = true;
    }

    /// Frees every block referenced by the pointer block `block_nr` whose
    /// logical index (`base` + slot) is at or past `keep`.
    ///
    /// The pointer block is rewritten when it keeps references; returns
    /// whether it ended up wholly unreferenced.
    fn truncate_ptr_block(&mut self, block_nr: u32, base: usize, keep: usize) -> bool {
        let mut scratch = [0u8; BLOCK_SIZE];
        self.read_data_block(&mut scratch, block_nr);
        let mut empty = true;
        let mut modified = false;
        for slot in 0..PTRS_PER_BLOCK {
            let phy = ptr_get(&scratch, slot);
            if phy == 0 {
                continue;
            }
            if base + slot >= keep {
                self.free_block(phy);
                ptr_set(&mut scratch, slot, 0);
                modified = true;
            } else {
                empty = false;
            }
        }
        if !empty && modified {
            self.write_data_block(&scratch, block_nr);
        }
        empty
    }

    /// Walks every block reachable from the inode, marking each in `shadow`
    /// by relative data-block number, and returns the number of data bytes
    /// covered, rounded up to whole blocks.
    ///
    /// Pointer blocks are marked but do not count towards the size.
    pub fn check_inode(&mut self, handle: &InodeHandle, shadow: &mut Bitmap) -> u32 {
        let dinode = self.cache[&handle.nr].dinode;
        let mut bytes = 0u32;
        for phy in dinode.direct {
            if phy != 0 {
                shadow.mark(self.block_rel(phy));
                bytes += BLOCK_SIZE as u32;
            }
        }
        if dinode.indirect != 0 {
            shadow.mark(self.block_rel(dinode.indirect));
            bytes += self.check_ptr_block(dinode.indirect, shadow);
        }
        if dinode.double_indirect != 0 {
            shadow.mark(self.block_rel(dinode.double_indirect));
            let mut scratch = [0u8; BLOCK_SIZE];
            self.read_data_block(&mut scratch, dinode.double_indirect);
            for outer in 0..PTRS_PER_BLOCK {
                let mid = ptr_get(&scratch, outer);
                if mid != 0 {
                    shadow.mark(self.block_rel(mid));
                    bytes += self.check_ptr_block(mid, shadow);
                }
            }
        }
        bytes
    }

    /// Marks every block referenced by the pointer block `block_nr` in
    /// `shadow` and returns the number of data bytes they cover.
    fn check_ptr_block(&mut self, block_nr: u32, shadow: &mut Bitmap) -> u32 {
        let mut scratch = [0u8; BLOCK_SIZE];
        self.read_data_block(&mut scratch, block_nr);
        let mut bytes = 0;
        for slot in 0..PTRS_PER_BLOCK {
            let phy = ptr_get(&scratch, slot);
            if phy != 0 {
                shadow.mark(self.block_rel(phy));
                bytes += BLOCK_SIZE as u32;
            }
        }
        bytes
    }

    /// Converts an absolute data-region block number to its freemap index.
    fn block_rel(&self, block_nr: u32) -> usize {
        assert!(block_nr >= self.data_blocks_start());
        (block_nr - self.data_blocks_start()) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::fresh_volume;
    use std::fs;

    #[test]
    fn write_read_roundtrip() {
        let (mut sb, path) = fresh_volume("inode-roundtrip");
        let file = sb.create_inode(InodeType::File).unwrap();
        assert_eq!(file.nr(), 1);

        let data = b"hello block world";
        assert_eq!(sb.write_data(&file, 0, data).unwrap(), data.len());
        assert_eq!(sb.inode_size(&file), data.len() as u32);

        let mut buf = vec![0u8; data.len()];
        assert_eq!(sb.read_data(&file, 0, &mut buf), data.len());
        assert_eq!(&buf, data);

        // Partial read in the middle.
        let mut buf = [0u8; 5];
        assert_eq!(sb.read_data(&file, 6, &mut buf), 5);
        assert_eq!(&buf, b"block");

        sb.remove_inode(file);
        sb.close();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn read_clamps_to_size() {
        let (mut sb, path) = fresh_volume("inode-clamp");
        let file = sb.create_inode(InodeType::File).unwrap();
        sb.write_data(&file, 0, b"0123456789").unwrap();

        let mut buf = [0xff_u8; 100];
        assert_eq!(sb.read_data(&file, 5, &mut buf), 5);
        assert_eq!(&buf[..5], b"56789");
        assert_eq!(sb.read_data(&file, 10, &mut buf), 0);
        assert_eq!(sb.read_data(&file, 11, &mut buf), 0);

        sb.remove_inode(file);
        sb.close();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn holes_read_as_zero() {
        let (mut sb, path) = fresh_volume("inode-holes");
        let file = sb.create_inode(InodeType::File).unwrap();

        let start = 3 * BLOCK_SIZE as u32 + 10;
        sb.write_data(&file, start, b"tail").unwrap();
        assert_eq!(sb.inode_size(&file), start + 4);

        let mut buf = [0xff_u8; 64];
        assert_eq!(sb.read_data(&file, 0, &mut buf), 64);
        assert!(buf.iter().all(|b| *b == 0));

        // Blocks before the written range stay unallocated.
        let mut shadow = Bitmap::new(crate::superblock::NR_DATA_BLOCKS as usize);
        let covered = sb.check_inode(&file, &mut shadow);
        assert_eq!(covered, BLOCK_SIZE as u32);

        sb.remove_inode(file);
        sb.close();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn write_spans_indirect_tiers() {
        let (mut sb, path) = fresh_volume("inode-tiers");
        let file = sb.create_inode(InodeType::File).unwrap();
        let base_blocks = sb.block_freemap().nr_allocated();

        // Three blocks bridging the single- and double-indirect tiers.
        let start = ((NR_DIRECT_BLOCKS + PTRS_PER_BLOCK - 1) * BLOCK_SIZE) as u32;
        let data: Vec<u8> = (0..3 * BLOCK_SIZE).map(|i| i as u8).collect();
        sb.write_data(&file, start, &data).unwrap();

        let mut buf = vec![0u8; data.len()];
        assert_eq!(sb.read_data(&file, start, &mut buf), data.len());
        assert_eq!(buf, data);

        // 3 data blocks + indirect + double-indirect + one mid pointer block.
        assert_eq!(sb.block_freemap().nr_allocated(), base_blocks + 6);

        sb.remove_inode(file);
        assert_eq!(sb.block_freemap().nr_allocated(), base_blocks);
        sb.close();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn truncate_frees_tiers() {
        let (mut sb, path) = fresh_volume("inode-truncate");
        let file = sb.create_inode(InodeType::File).unwrap();
        let base_blocks = sb.block_freemap().nr_allocated();

        // 70 blocks: 4 direct, 64 indirect, 2 double-indirect.
        let data = vec![0xabu8; 70 * BLOCK_SIZE];
        sb.write_data(&file, 0, &data).unwrap();
        // 70 data + indirect + double-indirect + one mid pointer block.
        assert_eq!(sb.block_freemap().nr_allocated(), base_blocks + 73);

        sb.truncate_data(&file, 5 * BLOCK_SIZE as u32);
        assert_eq!(sb.inode_size(&file), 5 * BLOCK_SIZE as u32);
        // 5 data blocks + the indirect block keeping one reference.
        assert_eq!(sb.block_freemap().nr_allocated(), base_blocks + 6);

        // Shrinking within the same block count only moves the size.
        sb.truncate_data(&file, 4 * BLOCK_SIZE as u32 + 1);
        assert_eq!(sb.block_freemap().nr_allocated(), base_blocks + 6);

        sb.truncate_data(&file, 0);
        assert_eq!(sb.block_freemap().nr_allocated(), base_blocks);

        // Extending leaves a hole and allocates nothing.
        sb.truncate_data(&file, 1000);
        assert_eq!(sb.inode_size(&file), 1000);
        assert_eq!(sb.block_freemap().nr_allocated(), base_blocks);

        sb.remove_inode(file);
        sb.close();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn write_at_max_file_size_boundary() {
        let (mut sb, path) = fresh_volume("inode-e2big");
        let file = sb.create_inode(InodeType::File).unwrap();

        assert_eq!(
            sb.write_data(&file, MAX_FILE_SIZE as u32, b"x"),
            Err(Error::TooBig)
        );
        assert_eq!(
            sb.write_data(&file, MAX_FILE_SIZE as u32 - 1, b"xy"),
            Err(Error::TooBig)
        );
        assert_eq!(sb.inode_size(&file), 0);

        // Ending exactly at the maximum size succeeds.
        sb.write_data(&file, MAX_FILE_SIZE as u32 - 1, b"x").unwrap();
        assert_eq!(sb.inode_size(&file), MAX_FILE_SIZE as u32);

        sb.remove_inode(file);
        sb.close();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn failed_write_rolls_back() {
        let (mut sb, path) = fresh_volume("inode-rollback");
        let first = sb.create_inode(InodeType::File).unwrap();
        let data = vec![0x55u8; MAX_FILE_SIZE];
        sb.write_data(&first, 0, &data).unwrap();
        let blocks_after_first = sb.block_freemap().nr_allocated();

        // Not enough blocks are left for this one; the write must fail and
        // leave no trace.
        let second = sb.create_inode(InodeType::File).unwrap();
        assert_eq!(
            sb.write_data(&second, 0, &vec![0xaau8; 900_000]),
            Err(Error::NoSpace)
        );
        assert_eq!(sb.inode_size(&second), 0);
        assert_eq!(sb.block_freemap().nr_allocated(), blocks_after_first);

        sb.remove_inode(second);
        sb.remove_inode(first);
        sb.close();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn dirty_inode_synced_on_eviction() {
        let (mut sb, path) = fresh_volume("inode-evict");
        let file = sb.create_inode(InodeType::File).unwrap();
        let nr = file.nr();
        sb.write_data(&file, 0, b"persisted").unwrap();
        sb.put_inode(file);
        sb.close();

        let mut sb = crate::superblock::SuperBlock::open(&path, false).unwrap();
        let file = sb.get_inode(nr);
        assert_eq!(sb.inode_type(&file), InodeType::File);
        assert_eq!(sb.inode_size(&file), 9);
        let mut buf = [0u8; 9];
        sb.read_data(&file, 0, &mut buf);
        assert_eq!(&buf, b"persisted");
        sb.remove_inode(file);
        sb.close();
        fs::remove_file(&path).unwrap();
    }
}
