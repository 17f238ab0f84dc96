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

//! Block device over the volume's backing file.
//!
//! Every access is a whole number of blocks. A transfer saves the file's
//! current position, seeks to the target block, performs the I/O and seeks
//! back, so callers may freely interleave their own accesses. An I/O failure
//! on the backing file is fatal: there is no partial-I/O recovery path.

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::process::exit;

/// The size of a block in bytes.
pub const BLOCK_SIZE: usize = 256;

/// Aborts the process on a fatal device I/O failure.
fn io_fatal(op: &str, err: io::Error) -> ! {
    eprintln!("fatal i/o error ({op}): {err}");
    exit(2);
}

/// A block device backed by a regular file.
pub struct Disk {
    /// The backing file.
    file: File,
}

impl Disk {
    /// Opens the device file at the given path for reading and writing.
    ///
    /// If `sync` is set, writes reach the file synchronously (`O_SYNC`).
    pub fn open(path: &Path, sync: bool) -> io::Result<Self> {
        let flags = if sync { libc::O_SYNC } else { 0 };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(flags)
            .open(path)?;
        Ok(Self { file })
    }

    /// Creates (or truncates) the device file at the given path and sizes it
    /// to `len` bytes.
    pub fn create(path: &Path, len: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(len)?;
        Ok(Self { file })
    }

    /// Reads `nr` blocks starting at block `start` into `buf`.
    pub fn read_blocks(&mut self, buf: &mut [u8], start: u64, nr: usize) {
        assert_eq!(buf.len(), nr * BLOCK_SIZE);
        let pos = self
            .file
            .stream_position()
            .unwrap_or_else(|e| io_fatal("tell", e));
        self.file
            .seek(SeekFrom::Start(start * BLOCK_SIZE as u64))
            .unwrap_or_else(|e| io_fatal("seek", e));
        self.file
            .read_exact(buf)
            .unwrap_or_else(|e| io_fatal("read", e));
        self.file
            .seek(SeekFrom::Start(pos))
            .unwrap_or_else(|e| io_fatal("seek", e));
    }

    /// Writes `nr` blocks from `buf` starting at block `start`.
    pub fn write_blocks(&mut self, buf: &[u8], start: u64, nr: usize) {
        assert_eq!(buf.len(), nr * BLOCK_SIZE);
        let pos = self
            .file
            .stream_position()
            .unwrap_or_else(|e| io_fatal("tell", e));
        self.file
            .seek(SeekFrom::Start(start * BLOCK_SIZE as u64))
            .unwrap_or_else(|e| io_fatal("seek", e));
        self.file
            .write_all(buf)
            .unwrap_or_else(|e| io_fatal("write", e));
        self.file
            .seek(SeekFrom::Start(pos))
            .unwrap_or_else(|e| io_fatal("seek", e));
    }

    /// Writes `nr` zero blocks starting at block `start`.
    pub fn zero_blocks(&mut self, start: u64, nr: usize) {
        let zero = [0u8; BLOCK_SIZE];
        for i in 0..nr {
            self.write_blocks(&zero, start + i as u64, 1);
        }
    }

    /// Flushes pending writes to the backing file.
    pub fn sync(&mut self) {
        self.file
            .sync_data()
            .unwrap_or_else(|e| io_fatal("sync", e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("tinyfs-disk-{}-{name}", std::process::id()))
    }

    #[test]
    fn blocks_roundtrip() {
        let path = tmp_path("roundtrip");
        let mut disk = Disk::create(&path, 16 * BLOCK_SIZE as u64).unwrap();

        let mut block = [0u8; BLOCK_SIZE];
        for (i, b) in block.iter_mut().enumerate() {
            *b = i as u8;
        }
        disk.write_blocks(&block, 3, 1);

        let mut read = [0u8; BLOCK_SIZE];
        disk.read_blocks(&mut read, 3, 1);
        assert_eq!(block, read);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn position_preserved() {
        let path = tmp_path("position");
        let mut disk = Disk::create(&path, 16 * BLOCK_SIZE as u64).unwrap();

        disk.file.seek(SeekFrom::Start(42)).unwrap();
        disk.zero_blocks(5, 2);
        let mut block = [0u8; BLOCK_SIZE];
        disk.read_blocks(&mut block, 5, 1);
        assert_eq!(disk.file.stream_position().unwrap(), 42);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn zero_blocks_zeroes() {
        let path = tmp_path("zero");
        let mut disk = Disk::create(&path, 16 * BLOCK_SIZE as u64).unwrap();

        let block = [0xab_u8; BLOCK_SIZE];
        disk.write_blocks(&block, 7, 1);
        disk.zero_blocks(7, 1);

        let mut read = [0xff_u8; BLOCK_SIZE];
        disk.read_blocks(&mut read, 7, 1);
        assert!(read.iter().all(|b| *b == 0));

        fs::remove_file(&path).unwrap();
    }
}
