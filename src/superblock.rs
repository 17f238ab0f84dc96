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

//! Volume lifecycle and on-disk layout.
//!
//! A volume is a raw file divided into fixed-offset regions: superblock,
//! inode freemap, block freemap, checksum table, inode table, then data
//! blocks. The superblock record at block 0 stores the start of each region
//! so the layout is self-describing.
//!
//! The two freemaps are persisted write-through: the changed slice (one
//! block) is written back before an allocation or release returns, so the
//! on-disk maps never lag behind the allocator. The checksum table follows
//! the same discipline, one CRC32 word per data-region block.

use crate::bitmap::Bitmap;
use crate::crc32::Crc32;
use crate::disk::BLOCK_SIZE;
use crate::disk::Disk;
use crate::error::Result;
use crate::inode::INODES_PER_BLOCK;
use crate::inode::Inode;
use crate::util;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::mem::size_of;
use std::path::Path;
use uuid::Uuid;

/// Size of the superblock region in blocks.
pub const SUPER_BLOCK_SIZE: u32 = 1;
/// Size of the inode freemap region in blocks.
pub const INODE_FREEMAP_SIZE: u32 = 1;
/// Size of the block freemap region in blocks.
pub const BLOCK_FREEMAP_SIZE: u32 = 3;
/// Size of the checksum table region in blocks.
pub const CSUM_TABLE_SIZE: u32 = 96;

/// Number of inodes on the volume.
pub const NR_INODES: u32 = BLOCK_SIZE as u32 * INODE_FREEMAP_SIZE * 8;
/// Number of blocks of the inode table.
pub const NR_INODE_BLOCKS: u32 = NR_INODES / INODES_PER_BLOCK;
/// Number of data blocks on the volume.
pub const NR_DATA_BLOCKS: u32 = BLOCK_SIZE as u32 * BLOCK_FREEMAP_SIZE * 8;
/// Number of checksum words the table can hold.
pub const MAX_NR_CSUMS: u32 = CSUM_TABLE_SIZE * BLOCK_SIZE as u32 / 4;
/// Total size of the volume in blocks.
pub const TOTAL_BLOCKS: u32 = SUPER_BLOCK_SIZE
    + INODE_FREEMAP_SIZE
    + BLOCK_FREEMAP_SIZE
    + CSUM_TABLE_SIZE
    + NR_INODE_BLOCKS
    + NR_DATA_BLOCKS;

/// The volume signature.
const MAGIC: u32 = 0x74667331;

// Every data block must have a checksum slot.
const _: () = assert!(MAX_NR_CSUMS >= NR_DATA_BLOCKS);
// The superblock record must fit in block 0.
const _: () = assert!(size_of::<DSuperBlock>() <= BLOCK_SIZE);

/// A transaction kind bracketing a group of mutations.
///
/// Exactly one transaction may be in progress at a time; committing forces
/// the pending writes down to the backing file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxKind {
    /// No transaction is in progress.
    None,
    /// File or directory creation.
    Create,
    /// File or directory removal.
    Rm,
    /// File content write.
    Write,
    /// Volume unmount.
    Umount,
}

/// The on-disk superblock record, stored at block 0.
#[repr(C)]
#[derive(Clone, Copy)]
struct DSuperBlock {
    /// The volume signature.
    magic: u32,
    /// First block of the inode freemap.
    inode_freemap_start: u32,
    /// First block of the block freemap.
    block_freemap_start: u32,
    /// First block of the checksum table.
    csum_table_start: u32,
    /// First block of the inode table.
    inode_blocks_start: u32,
    /// First data block.
    data_blocks_start: u32,
    /// The volume's identifier, chosen at format time.
    volume_id: [u8; 16],
    /// Timestamp of the last write to the superblock.
    modification_time: u64,
}

impl DSuperBlock {
    /// Computes a fresh record with the fixed region layout.
    fn new() -> Self {
        let inode_freemap_start = SUPER_BLOCK_SIZE;
        let block_freemap_start = inode_freemap_start + INODE_FREEMAP_SIZE;
        let csum_table_start = block_freemap_start + BLOCK_FREEMAP_SIZE;
        let inode_blocks_start = csum_table_start + CSUM_TABLE_SIZE;
        let data_blocks_start = inode_blocks_start + NR_INODE_BLOCKS;
        Self {
            magic: MAGIC,
            inode_freemap_start,
            block_freemap_start,
            csum_table_start,
            inode_blocks_start,
            data_blocks_start,
            volume_id: *Uuid::new_v4().as_bytes(),
            modification_time: 0,
        }
    }
}

/// A mounted volume.
///
/// Owns the block device, the in-memory copies of the freemaps and the
/// checksum table, and the inode cache. All filesystem state is threaded
/// through this value; there is no global state.
pub struct SuperBlock {
    /// The block device.
    pub(crate) dev: Disk,
    /// In-memory copy of the on-disk superblock record.
    dsb: DSuperBlock,
    /// Inode freemap; bit `i` is set when inode `i` is allocated.
    inode_freemap: Bitmap,
    /// Block freemap; bit `j` is set when data block `j` is allocated.
    block_freemap: Bitmap,
    /// Checksum table region, one CRC32 word per data block.
    csum_table: Vec<u8>,
    /// CRC32 context for the checksum table.
    crc: Crc32,
    /// The transaction currently in progress.
    tx: TxKind,
    /// Cache of in-memory inodes, keyed by inode number.
    pub(crate) cache: HashMap<u32, Inode>,
}

impl SuperBlock {
    /// Formats the file at the given path into an empty volume.
    ///
    /// The file is created (or truncated), sized to the whole volume and the
    /// superblock is written. Zeroing the remaining regions is left to the
    /// caller's `make_*` steps, and the root directory to
    /// [`SuperBlock::make_root_dir`](crate::dir).
    pub fn create(path: &Path) -> io::Result<Self> {
        let mut dev = Disk::create(path, TOTAL_BLOCKS as u64 * BLOCK_SIZE as u64)?;
        dev.sync();
        let mut sb = Self {
            dev,
            dsb: DSuperBlock::new(),
            inode_freemap: Bitmap::new(NR_INODES as usize),
            block_freemap: Bitmap::new(NR_DATA_BLOCKS as usize),
            csum_table: vec![0; CSUM_TABLE_SIZE as usize * BLOCK_SIZE],
            crc: Crc32::new(),
            tx: TxKind::None,
            cache: HashMap::new(),
        };
        sb.write_super_block();
        Ok(sb)
    }

    /// Mounts the volume stored in the file at the given path.
    ///
    /// If `sync` is set, every write reaches the backing file synchronously.
    /// The in-memory freemaps and checksum table are populated from their
    /// on-disk regions.
    pub fn open(path: &Path, sync: bool) -> io::Result<Self> {
        if fs::metadata(path)?.len() < TOTAL_BLOCKS as u64 * BLOCK_SIZE as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "file too small to be a tinyfs volume",
            ));
        }
        let mut dev = Disk::open(path, sync)?;
        let mut block = [0u8; BLOCK_SIZE];
        dev.read_blocks(&mut block, 0, 1);
        let dsb: DSuperBlock = unsafe { util::read_struct(&block) };
        if dsb.magic != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "not a tinyfs volume",
            ));
        }
        let mut inode_freemap = Bitmap::new(NR_INODES as usize);
        dev.read_blocks(
            inode_freemap.as_bytes_mut(),
            dsb.inode_freemap_start as u64,
            INODE_FREEMAP_SIZE as usize,
        );
        let mut block_freemap = Bitmap::new(NR_DATA_BLOCKS as usize);
        dev.read_blocks(
            block_freemap.as_bytes_mut(),
            dsb.block_freemap_start as u64,
            BLOCK_FREEMAP_SIZE as usize,
        );
        let mut csum_table = vec![0; CSUM_TABLE_SIZE as usize * BLOCK_SIZE];
        dev.read_blocks(
            &mut csum_table,
            dsb.csum_table_start as u64,
            CSUM_TABLE_SIZE as usize,
        );
        Ok(Self {
            dev,
            dsb,
            inode_freemap,
            block_freemap,
            csum_table,
            crc: Crc32::new(),
            tx: TxKind::None,
            cache: HashMap::new(),
        })
    }

    /// Unmounts the volume: rewrites the superblock and both freemaps in
    /// full, then commits.
    ///
    /// The inode cache must be empty: every handle must have been released.
    pub fn close(mut self) {
        self.tx_start(TxKind::Umount);
        self.write_super_block();
        assert!(self.cache.is_empty(), "inode cache not empty at unmount");
        self.dev.write_blocks(
            self.inode_freemap.as_bytes(),
            self.dsb.inode_freemap_start as u64,
            INODE_FREEMAP_SIZE as usize,
        );
        self.dev.write_blocks(
            self.block_freemap.as_bytes(),
            self.dsb.block_freemap_start as u64,
            BLOCK_FREEMAP_SIZE as usize,
        );
        self.tx_commit(TxKind::Umount);
    }

    /// Writes the superblock record to block 0, refreshing the modification
    /// timestamp.
    pub fn write_super_block(&mut self) {
        self.dsb.modification_time = util::get_timestamp().as_secs();
        let mut block = [0u8; BLOCK_SIZE];
        let bytes = util::reinterpret(&self.dsb);
        block[..bytes.len()].copy_from_slice(bytes);
        self.dev.write_blocks(&block, 0, 1);
    }

    /// Zeroes the inode freemap region.
    pub fn make_inode_freemap(&mut self) {
        self.dev.zero_blocks(
            self.dsb.inode_freemap_start as u64,
            INODE_FREEMAP_SIZE as usize,
        );
    }

    /// Zeroes the block freemap region.
    pub fn make_block_freemap(&mut self) {
        self.dev.zero_blocks(
            self.dsb.block_freemap_start as u64,
            BLOCK_FREEMAP_SIZE as usize,
        );
    }

    /// Zeroes the checksum table region.
    pub fn make_csum_table(&mut self) {
        self.dev
            .zero_blocks(self.dsb.csum_table_start as u64, CSUM_TABLE_SIZE as usize);
    }

    /// Zeroes the inode table region.
    pub fn make_inode_blocks(&mut self) {
        self.dev
            .zero_blocks(self.dsb.inode_blocks_start as u64, NR_INODE_BLOCKS as usize);
    }

    /// Returns the volume's identifier.
    pub fn volume_id(&self) -> Uuid {
        Uuid::from_bytes(self.dsb.volume_id)
    }

    /// Returns the first block of the inode table.
    pub(crate) fn inode_blocks_start(&self) -> u32 {
        self.dsb.inode_blocks_start
    }

    /// Returns the first data block.
    pub(crate) fn data_blocks_start(&self) -> u32 {
        self.dsb.data_blocks_start
    }

    /// Returns the inode freemap.
    pub fn inode_freemap(&self) -> &Bitmap {
        &self.inode_freemap
    }

    /// Returns the block freemap.
    pub fn block_freemap(&self) -> &Bitmap {
        &self.block_freemap
    }

    /// Writes back the inode freemap block containing the bit for
    /// `inode_nr`.
    fn write_inode_freemap(&mut self, inode_nr: u32) {
        let nr = inode_nr as usize / (BLOCK_SIZE * 8);
        let data = &self.inode_freemap.as_bytes()[nr * BLOCK_SIZE..(nr + 1) * BLOCK_SIZE];
        self.dev
            .write_blocks(data, self.dsb.inode_freemap_start as u64 + nr as u64, 1);
    }

    /// Writes back the block freemap block containing the bit for the
    /// relative block `block_nr`.
    fn write_block_freemap(&mut self, block_nr: u32) {
        let nr = block_nr as usize / (BLOCK_SIZE * 8);
        let data = &self.block_freemap.as_bytes()[nr * BLOCK_SIZE..(nr + 1) * BLOCK_SIZE];
        self.dev
            .write_blocks(data, self.dsb.block_freemap_start as u64 + nr as u64, 1);
    }

    /// Allocates an inode number, persisting the changed freemap slice.
    pub(crate) fn get_inode_freemap(&mut self) -> Result<u32> {
        let index = self.inode_freemap.alloc()? as u32;
        self.write_inode_freemap(index);
        Ok(index)
    }

    /// Releases an inode number, persisting the changed freemap slice.
    pub(crate) fn put_inode_freemap(&mut self, inode_nr: u32) {
        self.inode_freemap.unmark(inode_nr as usize);
        self.write_inode_freemap(inode_nr);
    }

    /// Allocates a data block, zeroes it on disk and returns its absolute
    /// block number.
    pub(crate) fn alloc_block(&mut self) -> Result<u32> {
        let index = self.block_freemap.alloc()? as u32;
        self.write_block_freemap(index);
        let block_nr = self.dsb.data_blocks_start + index;
        self.write_data_block(&[0u8; BLOCK_SIZE], block_nr);
        Ok(block_nr)
    }

    /// Releases the data block at the given absolute number, zeroing it on
    /// disk.
    pub(crate) fn free_block(&mut self, block_nr: u32) {
        assert!(block_nr >= self.dsb.data_blocks_start);
        self.write_data_block(&[0u8; BLOCK_SIZE], block_nr);
        let index = block_nr - self.dsb.data_blocks_start;
        self.block_freemap.unmark(index as usize);
        self.write_block_freemap(index);
    }

    /// Writes one block in the data region, updating its checksum entry.
    ///
    /// All writes to the data region go through here so the checksum table
    /// stays in lockstep with the block contents.
    pub(crate) fn write_data_block(&mut self, buf: &[u8], block_nr: u32) {
        assert!(block_nr >= self.dsb.data_blocks_start);
        self.dev.write_blocks(buf, block_nr as u64, 1);
        let rel = block_nr - self.dsb.data_blocks_start;
        let csum = self.crc.compute(buf);
        let off = rel as usize * 4;
        self.csum_table[off..off + 4].copy_from_slice(&csum.to_ne_bytes());
        self.write_csum_table(rel);
    }

    /// Reads one block from the data region.
    pub(crate) fn read_data_block(&mut self, buf: &mut [u8], block_nr: u32) {
        assert!(block_nr >= self.dsb.data_blocks_start);
        self.dev.read_blocks(buf, block_nr as u64, 1);
    }

    /// Returns the stored checksum of the relative data block `rel`.
    pub(crate) fn csum_get(&self, rel: u32) -> u32 {
        let off = rel as usize * 4;
        u32::from_ne_bytes(self.csum_table[off..off + 4].try_into().unwrap())
    }

    /// Computes the checksum of the given block contents.
    pub(crate) fn crc_compute(&self, data: &[u8]) -> u32 {
        self.crc.compute(data)
    }

    /// Writes back the checksum table block containing the word for the
    /// relative data block `rel`.
    fn write_csum_table(&mut self, rel: u32) {
        let nr = rel as usize / (BLOCK_SIZE / 4);
        let data = &self.csum_table[nr * BLOCK_SIZE..(nr + 1) * BLOCK_SIZE];
        self.dev
            .write_blocks(data, self.dsb.csum_table_start as u64 + nr as u64, 1);
    }

    /// Opens a transaction of the given kind.
    pub fn tx_start(&mut self, kind: TxKind) {
        assert_eq!(self.tx, TxKind::None, "transaction already in progress");
        assert_ne!(kind, TxKind::None);
        self.tx = kind;
    }

    /// Commits the transaction of the given kind.
    ///
    /// Callers must have synced their mutated inodes; freemap and checksum
    /// slices are already written through. Committing forces the backing
    /// file flush and clears the transaction marker.
    pub fn tx_commit(&mut self, kind: TxKind) {
        assert_eq!(self.tx, kind, "committing a transaction of the wrong kind");
        self.dev.sync();
        self.tx = TxKind::None;
    }

    /// Flips one extra bit in the in-memory block freemap without writing it
    /// through, so a later `checkfs` demonstrates divergence reporting. The
    /// on-disk volume is left untouched.
    pub fn corrupt_block_freemap(&mut self) {
        let _ = self.block_freemap.alloc();
    }
}
