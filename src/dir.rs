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

//! Directory layer: entries, iteration, linking and path resolution.
//!
//! A directory's content is a sequence of variable-length entries: a fixed
//! header (inode number, name length) followed by the NUL-terminated name.
//! Two rules shape the layout:
//! - No entry straddles a block boundary. An entry that would cross one is
//!   written at the start of the next block and the tail of the previous
//!   block is zero-padded.
//! - A zero name length marks the rest of the block as dead: iteration
//!   skips ahead to the next block. Written entries always have a name
//!   length of at least one (the NUL), so zero is unambiguous.
//!
//! Removal does not reclaim space: the entry's inode number is set to a
//! negative value (a tombstone) and the slot may be reused later by an
//! entry whose name has exactly the same length.

use crate::disk::BLOCK_SIZE;
use crate::error::Error;
use crate::error::Result;
use crate::inode::InodeHandle;
use crate::inode::InodeType;
use crate::inode::ROOT_INODE_NR;
use crate::superblock::SuperBlock;
use crate::superblock::TxKind;

/// Size in bytes of the fixed entry header: inode number and name length.
pub const DIRENT_HEADER_SIZE: usize = 8;

/// A directory entry, decoded from its on-disk form.
#[derive(Clone, Debug)]
pub struct DirEntry {
    /// Inode number; a negative value marks a tombstone.
    pub inode_nr: i32,
    /// On-disk length of the name, including the terminating NUL.
    pub name_len: u32,
    /// The entry's name.
    pub name: String,
    /// Offset of the entry inside the directory, after any block-boundary
    /// rounding.
    pub offset: u32,
}

impl SuperBlock {
    /// Reads the directory entry at or after `*offset`, advancing `*offset`
    /// past it.
    ///
    /// A header that would cross a block boundary is looked for at the start
    /// of the next block instead; a zero name length skips ahead likewise.
    /// Returns `None` at the end of the directory.
    pub fn next_dirent(&mut self, dir: &InodeHandle, offset: &mut u32) -> Option<DirEntry> {
        assert_eq!(self.inode_type(dir), InodeType::Dir);
        let bs = BLOCK_SIZE as u32;
        let hdr = DIRENT_HEADER_SIZE as u32;
        if *offset >= self.inode_size(dir) {
            return None;
        }
        if (*offset + hdr) / bs > *offset / bs {
            *offset = (*offset + hdr) / bs * bs;
        }
        let mut head = [0u8; DIRENT_HEADER_SIZE];
        if self.read_data(dir, *offset, &mut head) < DIRENT_HEADER_SIZE {
            return None;
        }
        let mut inode_nr = i32::from_ne_bytes(head[0..4].try_into().unwrap());
        let mut name_len = u32::from_ne_bytes(head[4..8].try_into().unwrap());
        if name_len == 0 {
            // The rest of the block is dead; retry at the next block.
            *offset = (*offset / bs + 1) * bs;
            if self.read_data(dir, *offset, &mut head) < DIRENT_HEADER_SIZE {
                return None;
            }
            inode_nr = i32::from_ne_bytes(head[0..4].try_into().unwrap());
            name_len = u32::from_ne_bytes(head[4..8].try_into().unwrap());
        }
        let entry_offset = *offset;
        *offset += hdr;
        let mut name_buf = vec![0u8; name_len as usize];
        if self.read_data(dir, *offset, &mut name_buf) < name_len as usize {
            return None;
        }
        *offset += name_len;
        let end = name_buf
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(name_buf.len());
        let name = String::from_utf8_lossy(&name_buf[..end]).into_owned();
        Some(DirEntry {
            inode_nr,
            name_len,
            name,
            offset: entry_offset,
        })
    }

    /// Returns the first entry referring to `inode_nr`.
    pub fn find_dirent(&mut self, dir: &InodeHandle, inode_nr: u32) -> Option<DirEntry> {
        let mut offset = 0;
        while let Some(d) = self.next_dirent(dir, &mut offset) {
            if d.inode_nr == inode_nr as i32 {
                return Some(d);
            }
        }
        None
    }

    /// Scans `dir` for `name`, skipping tombstones.
    pub fn lookup_name(&mut self, dir: &InodeHandle, name: &str) -> Option<u32> {
        let mut offset = 0;
        while let Some(d) = self.next_dirent(dir, &mut offset) {
            if d.inode_nr >= 0 && d.name == name {
                return Some(d.inode_nr as u32);
            }
        }
        None
    }

    /// Writes an entry (`name` -> `inode_nr`) at `offset`, zero-padding the
    /// tail of the current block first when the entry would cross a block
    /// boundary.
    fn write_dirent(
        &mut self,
        dir: &InodeHandle,
        name: &str,
        inode_nr: u32,
        offset: u32,
    ) -> Result<()> {
        let bs = BLOCK_SIZE as u32;
        let name_len = name.len() + 1;
        let total = (DIRENT_HEADER_SIZE + name_len) as u32;
        let mut offset = offset;
        if (offset + total) / bs > offset / bs {
            let next_offset = (offset + total) / bs * bs;
            let pad = vec![0u8; (next_offset - offset) as usize];
            self.write_data(dir, offset, &pad)?;
            offset = next_offset;
        }
        let mut buf = Vec::with_capacity(total as usize);
        buf.extend_from_slice(&(inode_nr as i32).to_ne_bytes());
        buf.extend_from_slice(&(name_len as u32).to_ne_bytes());
        buf.extend_from_slice(name.as_bytes());
        buf.push(0);
        self.write_data(dir, offset, &buf)?;
        Ok(())
    }

    /// Rewrites the header of the entry described by `d` with a negative
    /// inode number, in place.
    fn tombstone_dirent(&mut self, dir: &InodeHandle, d: &DirEntry) -> Result<()> {
        let mut head = [0u8; DIRENT_HEADER_SIZE];
        head[0..4].copy_from_slice(&(-1i32).to_ne_bytes());
        head[4..8].copy_from_slice(&d.name_len.to_ne_bytes());
        self.write_data(dir, d.offset, &head)?;
        Ok(())
    }

    /// Adds an entry for `name` under `dir`.
    ///
    /// The name must not already be present. A tombstone whose slot has
    /// exactly the right size is reused; otherwise the entry is appended at
    /// the end of the directory.
    pub fn add_dirent(&mut self, dir: &InodeHandle, name: &str, inode_nr: u32) -> Result<()> {
        assert_eq!(self.inode_type(dir), InodeType::Dir);
        let name_len = (name.len() + 1) as u32;
        let mut offset = 0;
        while let Some(d) = self.next_dirent(dir, &mut offset) {
            if d.inode_nr >= 0 && d.name == name {
                return Err(Error::Exists);
            }
        }
        let mut offset = 0;
        let mut at = None;
        while let Some(d) = self.next_dirent(dir, &mut offset) {
            if d.inode_nr < 0 && d.name_len == name_len {
                at = Some(d.offset);
                break;
            }
        }
        let at = at.unwrap_or_else(|| self.inode_size(dir));
        self.write_dirent(dir, name, inode_nr, at)
    }

    /// Tombstones the entry `name` under `dir` and returns the inode number
    /// it referred to.
    ///
    /// `.` and `..` cannot be removed. A directory must contain nothing but
    /// `.`, `..` and tombstones to be removable.
    pub fn remove_dirent(&mut self, dir: &InodeHandle, name: &str) -> Result<u32> {
        if name == "." || name == ".." {
            return Err(Error::Invalid);
        }
        let mut offset = 0;
        while let Some(d) = self.next_dirent(dir, &mut offset) {
            if d.inode_nr < 0 || d.name != name {
                continue;
            }
            self.remove_dirent_allowed(d.inode_nr as u32)?;
            self.tombstone_dirent(dir, &d)?;
            return Ok(d.inode_nr as u32);
        }
        Err(Error::NotFound)
    }

    /// Verifies the inode can be unlinked: a directory must contain nothing
    /// but `.`, `..` and tombstones.
    fn remove_dirent_allowed(&mut self, inode_nr: u32) -> Result<()> {
        let target = self.get_inode(inode_nr);
        let mut ret = Ok(());
        if self.inode_type(&target) == InodeType::Dir {
            let mut offset = 0;
            while let Some(d) = self.next_dirent(&target, &mut offset) {
                if d.inode_nr < 0 || d.name == "." || d.name == ".." {
                    continue;
                }
                ret = Err(Error::NotEmpty);
                break;
            }
        }
        self.put_inode(target);
        ret
    }

    /// Seeds a fresh directory with its `.` and `..` entries.
    ///
    /// If the `..` entry cannot be added, the `.` entry is rolled back so
    /// the caller sees an empty directory again.
    fn create_empty_dir(&mut self, parent_nr: u32, dir: &InodeHandle) -> Result<()> {
        assert_eq!(self.inode_type(dir), InodeType::Dir);
        self.add_dirent(dir, ".", dir.nr())?;
        if let Err(e) = self.add_dirent(dir, "..", parent_nr) {
            let mut offset = 0;
            if let Some(d) = self.next_dirent(dir, &mut offset) {
                let _ = self.tombstone_dirent(dir, &d);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Creates the root directory (inode 0) on a freshly formatted volume.
    pub fn make_root_dir(&mut self) -> Result<()> {
        self.tx_start(TxKind::Create);
        let root = match self.create_inode(InodeType::Dir) {
            Ok(root) => root,
            Err(e) => {
                self.tx_commit(TxKind::Create);
                return Err(e);
            }
        };
        assert_eq!(root.nr(), ROOT_INODE_NR);
        if let Err(e) = self.create_empty_dir(ROOT_INODE_NR, &root) {
            self.remove_inode(root);
            self.tx_commit(TxKind::Create);
            return Err(e);
        }
        self.sync_inode(&root);
        self.put_inode(root);
        self.tx_commit(TxKind::Create);
        Ok(())
    }

    /// Splits `path` into its parent directory's inode number and the final
    /// component, resolving the directory part relative to `cur_dir`.
    pub fn resolve_parent<'p>(&mut self, cur_dir: u32, path: &'p str) -> Result<(u32, &'p str)> {
        if path.is_empty() || path == "/" || path.ends_with('/') {
            return Err(Error::Invalid);
        }
        match path.rfind('/') {
            None => Ok((cur_dir, path)),
            Some(0) => Ok((ROOT_INODE_NR, &path[1..])),
            Some(p) => {
                let parent_nr = self.name_to_inode_nr(cur_dir, &path[..p])?;
                Ok((parent_nr, &path[p + 1..]))
            }
        }
    }

    /// Creates a regular file or directory at `path`, relative to the
    /// directory `cur_dir` for relative paths.
    ///
    /// All but the last path component must already exist. The transaction
    /// is committed on failure paths too: freemap state is already
    /// persisted. Returns the new inode's number.
    pub fn create_file_or_dir(&mut self, cur_dir: u32, typ: InodeType, path: &str) -> Result<u32> {
        if path == "/" {
            return Err(Error::Exists);
        }
        let (parent_nr, name) = self.resolve_parent(cur_dir, path)?;
        // The entry must fit inside a single block.
        if DIRENT_HEADER_SIZE + name.len() + 1 > BLOCK_SIZE {
            return Err(Error::Invalid);
        }
        let parent = self.get_inode(parent_nr);
        if self.inode_type(&parent) != InodeType::Dir {
            self.put_inode(parent);
            return Err(Error::NotDir);
        }
        self.tx_start(TxKind::Create);
        let res = self.create_at(&parent, typ, name);
        self.tx_commit(TxKind::Create);
        self.put_inode(parent);
        res
    }

    /// Creation step under an open transaction: allocates the inode, seeds
    /// `.`/`..` for directories and links the name into `parent`.
    fn create_at(&mut self, parent: &InodeHandle, typ: InodeType, name: &str) -> Result<u32> {
        if self.lookup_name(parent, name).is_some() {
            return Err(Error::Exists);
        }
        let inode = self.create_inode(typ)?;
        let inode_nr = inode.nr();
        if typ == InodeType::Dir {
            if let Err(e) = self.create_empty_dir(parent.nr(), &inode) {
                self.remove_inode(inode);
                return Err(e);
            }
        }
        if let Err(e) = self.add_dirent(parent, name, inode_nr) {
            self.remove_inode(inode);
            return Err(e);
        }
        self.sync_inode(parent);
        self.sync_inode(&inode);
        self.put_inode(inode);
        Ok(inode_nr)
    }

    /// Resolves `name` to an inode number, starting from the directory
    /// `cur_dir` for relative paths.
    ///
    /// Resolution never touches the caller's notion of the current
    /// directory; adopting a new one is the caller's decision.
    pub fn name_to_inode_nr(&mut self, cur_dir: u32, name: &str) -> Result<u32> {
        if name.ends_with('/') && name != "/" {
            return Err(Error::Invalid);
        }
        self.resolve(cur_dir, name)
    }

    fn resolve(&mut self, cur: u32, name: &str) -> Result<u32> {
        if name == "/" {
            return Ok(ROOT_INODE_NR);
        }
        match name.find('/') {
            Some(0) => self.resolve(ROOT_INODE_NR, &name[1..]),
            Some(p) if p == name.len() - 1 => Err(Error::NotFound),
            Some(p) => {
                let next = self.resolve_component(cur, &name[..p])?;
                self.resolve(next, &name[p + 1..])
            }
            None => self.resolve_component(cur, name),
        }
    }

    /// Looks a single component up in the directory `cur`.
    fn resolve_component(&mut self, cur: u32, name: &str) -> Result<u32> {
        let dir = self.get_inode(cur);
        if self.inode_type(&dir) != InodeType::Dir {
            self.put_inode(dir);
            return Err(Error::NotDir);
        }
        let res = self.lookup_name(&dir, name).ok_or(Error::NotFound);
        self.put_inode(dir);
        res
    }

    /// Builds the absolute path of the directory `nr` by climbing `..`
    /// links up to the root.
    pub fn abs_path(&mut self, nr: u32) -> Result<String> {
        let dir = self.get_inode(nr);
        let parent_nr = self.lookup_name(&dir, "..").ok_or(Error::NotFound);
        self.put_inode(dir);
        let parent_nr = parent_nr?;
        if parent_nr == nr {
            return Ok(String::from("/"));
        }
        let parent = self.get_inode(parent_nr);
        let d = self.find_dirent(&parent, nr);
        self.put_inode(parent);
        let d = d.ok_or(Error::NotFound)?;
        let prefix = self.abs_path(parent_nr)?;
        if prefix == "/" {
            Ok(format!("/{}", d.name))
        } else {
            Ok(format!("{}/{}", prefix, d.name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::fresh_volume;
    use std::fs;

    #[test]
    fn root_has_dot_entries() {
        let (mut sb, path) = fresh_volume("dir-root");
        let root = sb.get_inode(ROOT_INODE_NR);
        assert_eq!(sb.inode_type(&root), InodeType::Dir);
        assert_eq!(sb.lookup_name(&root, "."), Some(ROOT_INODE_NR));
        assert_eq!(sb.lookup_name(&root, ".."), Some(ROOT_INODE_NR));
        // `.` takes 10 bytes, `..` takes 11.
        assert_eq!(sb.inode_size(&root), 21);
        sb.put_inode(root);
        sb.close();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn add_and_lookup() {
        let (mut sb, path) = fresh_volume("dir-add");
        let nr = sb
            .create_file_or_dir(ROOT_INODE_NR, InodeType::File, "hello")
            .unwrap();
        let root = sb.get_inode(ROOT_INODE_NR);
        assert_eq!(sb.lookup_name(&root, "hello"), Some(nr));
        assert_eq!(sb.lookup_name(&root, "other"), None);
        assert_eq!(
            sb.add_dirent(&root, "hello", 99).unwrap_err(),
            Error::Exists
        );
        sb.put_inode(root);
        sb.close();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn no_entry_straddles_a_block() {
        let (mut sb, path) = fresh_volume("dir-straddle");
        // Names long enough that padding must kick in at some point.
        for i in 0..40 {
            let name = format!("file-with-a-rather-long-name-{i:02}");
            sb.create_file_or_dir(ROOT_INODE_NR, InodeType::File, &name)
                .unwrap();
        }
        let root = sb.get_inode(ROOT_INODE_NR);
        let mut offset = 0;
        let mut seen = 0;
        while let Some(d) = sb.next_dirent(&root, &mut offset) {
            let begin = d.offset as usize;
            let end = begin + DIRENT_HEADER_SIZE + d.name_len as usize - 1;
            assert_eq!(begin / BLOCK_SIZE, end / BLOCK_SIZE, "entry straddles");
            seen += 1;
        }
        // `.`, `..` and the 40 files.
        assert_eq!(seen, 42);
        sb.put_inode(root);
        sb.close();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn tombstone_reuse_needs_exact_size() {
        let (mut sb, path) = fresh_volume("dir-tombstone");
        sb.create_file_or_dir(ROOT_INODE_NR, InodeType::File, "aaaa")
            .unwrap();
        sb.create_file_or_dir(ROOT_INODE_NR, InodeType::File, "bbbb")
            .unwrap();
        let root = sb.get_inode(ROOT_INODE_NR);
        let slot = {
            let mut offset = 0;
            let mut found = None;
            while let Some(d) = sb.next_dirent(&root, &mut offset) {
                if d.name == "aaaa" {
                    found = Some(d.offset);
                }
            }
            found.unwrap()
        };
        let size = sb.inode_size(&root);

        sb.tx_start(TxKind::Rm);
        sb.remove_dirent(&root, "aaaa").unwrap();
        sb.tx_commit(TxKind::Rm);

        // A longer name cannot reuse the slot and is appended instead.
        sb.add_dirent(&root, "ccccc", 10).unwrap();
        assert!(sb.inode_size(&root) > size);
        // A name of the same length takes the tombstone's slot.
        let size = sb.inode_size(&root);
        sb.add_dirent(&root, "dddd", 11).unwrap();
        assert_eq!(sb.inode_size(&root), size);
        let mut offset = 0;
        let mut reused = None;
        while let Some(d) = sb.next_dirent(&root, &mut offset) {
            if d.name == "dddd" {
                reused = Some(d.offset);
            }
        }
        assert_eq!(reused, Some(slot));

        sb.put_inode(root);
        sb.close();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn remove_refuses_dots_and_nonempty() {
        let (mut sb, path) = fresh_volume("dir-remove");
        sb.create_file_or_dir(ROOT_INODE_NR, InodeType::Dir, "sub")
            .unwrap();
        sb.create_file_or_dir(ROOT_INODE_NR, InodeType::File, "sub/file")
            .unwrap();
        let root = sb.get_inode(ROOT_INODE_NR);
        assert_eq!(sb.remove_dirent(&root, ".").unwrap_err(), Error::Invalid);
        assert_eq!(sb.remove_dirent(&root, "..").unwrap_err(), Error::Invalid);
        assert_eq!(sb.remove_dirent(&root, "sub").unwrap_err(), Error::NotEmpty);
        assert_eq!(
            sb.remove_dirent(&root, "missing").unwrap_err(),
            Error::NotFound
        );
        sb.put_inode(root);
        sb.close();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn path_resolution() {
        let (mut sb, path) = fresh_volume("dir-paths");
        let a = sb
            .create_file_or_dir(ROOT_INODE_NR, InodeType::Dir, "a")
            .unwrap();
        let b = sb.create_file_or_dir(a, InodeType::Dir, "b").unwrap();
        let f = sb.create_file_or_dir(b, InodeType::File, "f").unwrap();

        assert_eq!(sb.name_to_inode_nr(ROOT_INODE_NR, "/"), Ok(ROOT_INODE_NR));
        assert_eq!(sb.name_to_inode_nr(ROOT_INODE_NR, "a"), Ok(a));
        assert_eq!(sb.name_to_inode_nr(ROOT_INODE_NR, "a/b"), Ok(b));
        assert_eq!(sb.name_to_inode_nr(ROOT_INODE_NR, "a/b/f"), Ok(f));
        assert_eq!(sb.name_to_inode_nr(b, "/a/b/f"), Ok(f));
        assert_eq!(sb.name_to_inode_nr(b, "f"), Ok(f));
        assert_eq!(sb.name_to_inode_nr(b, ".."), Ok(a));
        assert_eq!(sb.name_to_inode_nr(ROOT_INODE_NR, ".."), Ok(ROOT_INODE_NR));

        // Trailing slash is invalid, except for the root itself.
        assert_eq!(
            sb.name_to_inode_nr(ROOT_INODE_NR, "a/"),
            Err(Error::Invalid)
        );
        assert_eq!(
            sb.name_to_inode_nr(ROOT_INODE_NR, "missing"),
            Err(Error::NotFound)
        );
        // A file used as a path component.
        assert_eq!(
            sb.name_to_inode_nr(ROOT_INODE_NR, "a/b/f/x"),
            Err(Error::NotDir)
        );

        assert_eq!(sb.abs_path(ROOT_INODE_NR).unwrap(), "/");
        assert_eq!(sb.abs_path(a).unwrap(), "/a");
        assert_eq!(sb.abs_path(b).unwrap(), "/a/b");

        sb.close();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn create_rejects_bad_names() {
        let (mut sb, path) = fresh_volume("dir-badnames");
        assert_eq!(
            sb.create_file_or_dir(ROOT_INODE_NR, InodeType::Dir, "/"),
            Err(Error::Exists)
        );
        assert_eq!(
            sb.create_file_or_dir(ROOT_INODE_NR, InodeType::File, "x/"),
            Err(Error::Invalid)
        );
        assert_eq!(
            sb.create_file_or_dir(ROOT_INODE_NR, InodeType::File, "miss/x"),
            Err(Error::NotFound)
        );
        let long = "n".repeat(BLOCK_SIZE);
        assert_eq!(
            sb.create_file_or_dir(ROOT_INODE_NR, InodeType::File, &long),
            Err(Error::Invalid)
        );
        sb.close();
        fs::remove_file(&path).unwrap();
    }
}
