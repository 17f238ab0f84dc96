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

//! Error kinds shared by every layer of the filesystem.

use std::fmt;
use std::result;

/// Result alias used across the crate.
pub type Result<T> = result::Result<T, Error>;

/// An error returned by a filesystem operation.
///
/// Fatal I/O failures on the backing device never reach this type: the disk
/// layer aborts the process instead, since there is no partial-I/O recovery
/// path.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// The volume has no free inode or data block left.
    NoSpace,
    /// The named file or directory does not exist.
    NotFound,
    /// The name already exists in the target directory.
    Exists,
    /// The operation expects a regular file but found a directory.
    IsDir,
    /// The operation expects a directory but found something else.
    NotDir,
    /// The directory still contains entries other than `.` and `..`.
    NotEmpty,
    /// Malformed argument: bad path, bad number, name too long, ...
    Invalid,
    /// The write would exceed the maximum file size.
    TooBig,
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::NoSpace => "no space left on volume",
            Self::NotFound => "no such file or directory",
            Self::Exists => "file exists",
            Self::IsDir => "is a directory",
            Self::NotDir => "not a directory",
            Self::NotEmpty => "directory not empty",
            Self::Invalid => "invalid argument",
            Self::TooBig => "file too large",
        };
        write!(fmt, "{msg}")
    }
}
