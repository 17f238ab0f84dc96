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

//! Whole-volume consistency checker.
//!
//! The checker rebuilds shadow freemaps by walking the directory tree from
//! the root: every reachable inode is marked in a shadow inode freemap and
//! every reachable data or pointer block in a shadow block freemap. The
//! shadows are then compared bit-for-bit against the volume's live
//! freemaps. Reachable blocks also get their CRC32 re-computed and checked
//! against the checksum table.

use crate::bitmap::Bitmap;
use crate::disk::BLOCK_SIZE;
use crate::error::Error;
use crate::error::Result;
use crate::inode::InodeType;
use crate::inode::ROOT_INODE_NR;
use crate::superblock::NR_DATA_BLOCKS;
use crate::superblock::NR_INODES;
use crate::superblock::SuperBlock;

/// The result of a [`SuperBlock::checkfs`] run.
pub struct CheckReport {
    /// Whether the on-disk inode freemap matches the shadow rebuilt from
    /// the directory tree.
    pub inode_freemap_ok: bool,
    /// Whether the on-disk block freemap matches the shadow.
    pub block_freemap_ok: bool,
    /// Number of reachable blocks whose stored checksum does not match
    /// their contents.
    pub csum_mismatches: u32,
    /// Allocated-inode count according to the live freemap.
    pub nr_inodes: usize,
    /// Allocated-block count according to the live freemap.
    pub nr_blocks: usize,
}

impl CheckReport {
    /// Tells whether the volume is fully consistent.
    pub fn is_clean(&self) -> bool {
        self.inode_freemap_ok && self.block_freemap_ok && self.csum_mismatches == 0
    }
}

impl SuperBlock {
    /// Walks the directory tree from the root, rebuilding shadow freemaps
    /// and verifying block checksums, and compares the shadows against the
    /// volume's live freemaps.
    pub fn checkfs(&mut self) -> Result<CheckReport> {
        let mut shadow_inodes = Bitmap::new(NR_INODES as usize);
        let mut shadow_blocks = Bitmap::new(NR_DATA_BLOCKS as usize);
        self.check_tree(ROOT_INODE_NR, &mut shadow_inodes, &mut shadow_blocks)?;
        let csum_mismatches = self.verify_csums(&shadow_blocks);
        Ok(CheckReport {
            inode_freemap_ok: *self.inode_freemap() == shadow_inodes,
            block_freemap_ok: *self.block_freemap() == shadow_blocks,
            csum_mismatches,
            nr_inodes: self.inode_freemap().nr_allocated(),
            nr_blocks: self.block_freemap().nr_allocated(),
        })
    }

    /// Recursively marks `inode_nr` and every block reachable from it.
    fn check_tree(
        &mut self,
        inode_nr: u32,
        shadow_inodes: &mut Bitmap,
        shadow_blocks: &mut Bitmap,
    ) -> Result<()> {
        let inode = self.get_inode(inode_nr);
        let typ = self.inode_type(&inode);
        if typ != InodeType::File && typ != InodeType::Dir {
            self.put_inode(inode);
            return Err(Error::Invalid);
        }
        shadow_inodes.mark(inode_nr as usize);
        if typ == InodeType::Dir {
            let mut offset = 0;
            while let Some(d) = self.next_dirent(&inode, &mut offset) {
                if d.inode_nr < 0 || d.name == "." || d.name == ".." {
                    continue;
                }
                if let Err(e) = self.check_tree(d.inode_nr as u32, shadow_inodes, shadow_blocks) {
                    self.put_inode(inode);
                    return Err(e);
                }
            }
        }
        let size = self.inode_size(&inode) as usize;
        let covered = self.check_inode(&inode, shadow_blocks) as usize;
        assert_eq!(
            covered,
            size.div_ceil(BLOCK_SIZE) * BLOCK_SIZE,
            "inode {inode_nr}: covered blocks do not match the size"
        );
        self.put_inode(inode);
        Ok(())
    }

    /// Re-reads every block marked in `shadow_blocks` and compares its
    /// checksum against the stored table. Returns the mismatch count.
    fn verify_csums(&mut self, shadow_blocks: &Bitmap) -> u32 {
        let mut block = [0u8; BLOCK_SIZE];
        let mut mismatches = 0;
        for rel in 0..shadow_blocks.capacity() {
            if !shadow_blocks.is_set(rel) {
                continue;
            }
            self.read_data_block(&mut block, self.data_blocks_start() + rel as u32);
            if self.crc_compute(&block) != self.csum_get(rel as u32) {
                mismatches += 1;
            }
        }
        mismatches
    }
}
