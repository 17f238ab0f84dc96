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

//! The `mkfs-tinyfs` tool formats a raw file into an empty volume.
//!
//! Formatting writes the superblock, zeroes the freemap, checksum-table and
//! inode-table regions, then creates the root directory. When the target
//! already holds a valid volume, the user is asked to confirm before it is
//! overwritten.

use std::env;
use std::env::ArgsOs;
use std::path::PathBuf;
use std::process::exit;
use tinyfs::disk::BLOCK_SIZE;
use tinyfs::error;
use tinyfs::prompt::prompt;
use tinyfs::superblock::NR_INODES;
use tinyfs::superblock::SuperBlock;
use tinyfs::superblock::TOTAL_BLOCKS;

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// The path to the device file on which the volume will be created.
    device_path: Option<PathBuf>,
}

fn parse_args(args: ArgsOs) -> Args {
    let mut res: Args = Default::default();
    for arg in args {
        match arg.to_str() {
            Some("-h" | "--help") => res.help = true,
            // TODO support configurable volume geometry
            _ => res.device_path = Some(PathBuf::from(arg)),
        }
    }
    res
}

/// Prints command help.
fn print_help() {
    println!();
    println!("Usage:");
    println!(" mkfs-tinyfs [options] rawfile");
    println!();
    println!("Formats rawfile into an empty tinyfs volume.");
    println!();
    println!("Options:");
    println!(" -h, --help\tPrints help.");
}

fn main() {
    let mut args_os = env::args_os();
    // Skip the binary's name.
    args_os.next();
    let args = parse_args(args_os);
    if args.help {
        print_help();
        exit(0);
    }
    let Some(device_path) = args.device_path else {
        error("mkfs-tinyfs", "specify path to a device");
    };
    // Ask before overwriting an existing volume.
    if let Ok(prev) = SuperBlock::open(&device_path, false) {
        println!(
            "{} contains a tinyfs volume (id {})",
            device_path.display(),
            prev.volume_id()
        );
        drop(prev);
        let confirm = prompt("Proceed anyway? (y/N) ")
            .map(|s| s.to_lowercase() == "y")
            .unwrap_or(false);
        if !confirm {
            eprintln!("Abort.");
            exit(1);
        }
    }
    let mut sb = SuperBlock::create(&device_path).unwrap_or_else(|e| {
        error("mkfs-tinyfs", format_args!("{}: {e}", device_path.display()));
    });
    sb.make_inode_freemap();
    sb.make_block_freemap();
    sb.make_csum_table();
    sb.make_inode_blocks();
    sb.make_root_dir().unwrap_or_else(|e| {
        error(
            "mkfs-tinyfs",
            format_args!("cannot create the root directory: {e}"),
        );
    });
    println!("volume id: {}", sb.volume_id());
    println!(
        "{TOTAL_BLOCKS} blocks of {BLOCK_SIZE} bytes, {NR_INODES} inodes"
    );
    sb.close();
}
