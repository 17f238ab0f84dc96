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

//! This module implements utility functions.

use std::mem::size_of;
use std::ptr;
use std::slice;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Returns the current timestamp since the Unix epoch.
pub fn get_timestamp() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System clock panic!")
}

/// Reinterprets the given object as a byte slice.
pub fn reinterpret<T>(obj: &T) -> &[u8] {
    unsafe { slice::from_raw_parts(obj as *const _ as *const u8, size_of::<T>()) }
}

/// Reads an object of the given type from the beginning of the given byte
/// slice.
///
/// The slice must be at least `size_of::<T>()` bytes long. The function is
/// unsafe because any bit pattern is accepted for `T`.
pub unsafe fn read_struct<T>(buf: &[u8]) -> T {
    assert!(buf.len() >= size_of::<T>());
    unsafe { ptr::read_unaligned(buf.as_ptr() as *const T) }
}
