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

//! `tinyfs` mounts a formatted volume and runs an interactive shell on it.

use std::env;
use std::env::ArgsOs;
use std::path::PathBuf;
use std::process::exit;
use tinyfs::cmd::Context;
use tinyfs::cmd::handle_command;
use tinyfs::error;
use tinyfs::inode::ROOT_INODE_NR;
use tinyfs::prompt::prompt;
use tinyfs::superblock::SuperBlock;

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// If true, corrupt the in-memory block freemap after mounting.
    corrupt: bool,
    /// The path to the volume's raw file.
    disk: Option<PathBuf>,
}

fn parse_args(args: ArgsOs) -> Args {
    let mut res: Args = Default::default();
    for arg in args {
        match arg.to_str() {
            Some("-h" | "--help") => res.help = true,
            Some("-c" | "--corrupt") => res.corrupt = true,
            _ => res.disk = Some(PathBuf::from(arg)),
        }
    }
    res
}

/// Prints command usage.
fn print_usage() {
    eprintln!("Usage: tinyfs [-ch] [--help] rawfile");
    eprintln!("Try 'tinyfs --help' for more information.");
}

/// Prints command help.
fn print_help() {
    println!();
    println!("Usage:");
    println!(" tinyfs [options] rawfile");
    println!();
    println!("Mounts the volume stored in rawfile and runs a shell on it.");
    println!("Format rawfile with mkfs-tinyfs first.");
    println!();
    println!("Options:");
    println!(" -c, --corrupt\tCorrupts the in-memory block freemap, for exercising checkfs.");
    println!(" -h, --help\tPrints help.");
}

fn main() {
    let mut args_os = env::args_os();
    // Skip the binary's name.
    args_os.next();
    let args = parse_args(args_os);
    if args.help {
        print_help();
        exit(1);
    }
    let Some(disk) = args.disk else {
        print_usage();
        exit(1);
    };
    let mut sb = SuperBlock::open(&disk, true).unwrap_or_else(|e| {
        error("tinyfs", format_args!("{}: {e}", disk.display()));
    });
    if args.corrupt {
        sb.corrupt_block_freemap();
    }
    let mut c = Context::new(sb.get_inode(ROOT_INODE_NR));
    while !c.quit {
        let Some(line) = prompt("% ") else {
            break;
        };
        handle_command(&mut sb, &mut c, &line);
    }
    let Context { cur_dir, .. } = c;
    sb.put_inode(cur_dir);
    sb.close();
}
