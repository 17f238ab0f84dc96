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

//! Shell command table and handlers.
//!
//! A command line is split into the command's name, up to `max_args`
//! whitespace-separated words, then the rest of the line as one final
//! argument, so content arguments may contain spaces. Handlers receive the
//! mounted superblock and a [`Context`] carrying the current directory and
//! the tokenised line. A failing handler makes the shell print
//! `name: reason` and continue.

use crate::error::Error;
use crate::error::Result;
use crate::inode::InodeHandle;
use crate::inode::InodeType;
use crate::superblock::SuperBlock;
use crate::superblock::TxKind;
use std::mem;

/// Maximum number of whitespace-separated words a command line is split
/// into, before the remainder argument.
pub const MAX_ARGS: usize = 16;

/// State carried by the shell across commands.
///
/// The context owns exactly one inode handle (the current directory) and
/// must release it before the superblock is closed.
pub struct Context {
    /// Handle on the current directory.
    pub cur_dir: InodeHandle,
    /// The tokenised command line, command name first.
    pub argv: Vec<String>,
    /// Set by `quit` to leave the shell loop.
    pub quit: bool,
}

impl Context {
    /// Creates a context rooted at the given directory handle.
    pub fn new(cur_dir: InodeHandle) -> Self {
        Self {
            cur_dir,
            argv: Vec::new(),
            quit: false,
        }
    }
}

/// A shell command.
struct Command {
    /// Name typed by the user.
    name: &'static str,
    /// Number of whitespace-separated words (command included) split off
    /// before the rest of the line becomes one final argument.
    max_args: usize,
    /// The handler.
    func: fn(&mut SuperBlock, &mut Context) -> Result<()>,
}

/// The command table.
const COMMANDS: &[Command] = &[
    Command { name: "?", max_args: 1, func: cmd_help },
    Command { name: "cd", max_args: 2, func: cmd_cd },
    Command { name: "pwd", max_args: 1, func: cmd_pwd },
    Command { name: "ls", max_args: 2, func: cmd_ls },
    Command { name: "lsr", max_args: 2, func: cmd_lsr },
    Command { name: "touch", max_args: MAX_ARGS, func: cmd_touch },
    Command { name: "stat", max_args: MAX_ARGS, func: cmd_stat },
    Command { name: "rm", max_args: 2, func: cmd_rm },
    Command { name: "mkdir", max_args: 2, func: cmd_mkdir },
    Command { name: "cat", max_args: MAX_ARGS, func: cmd_cat },
    Command { name: "catr", max_args: 2, func: cmd_catr },
    Command { name: "write", max_args: 2, func: cmd_write },
    Command { name: "owrite", max_args: 3, func: cmd_owrite },
    Command { name: "oread", max_args: 3, func: cmd_oread },
    Command { name: "checkfs", max_args: 1, func: cmd_checkfs },
    Command { name: "quit", max_args: 1, func: cmd_quit },
];

/// Tokenises the part of the line after the command's name: up to
/// `max_args - 1` whitespace-separated words, then the rest of the line as
/// one final argument.
fn tokenize(name: &str, rest: &str, max_args: usize) -> Vec<String> {
    let mut argv = vec![name.to_string()];
    let mut rest = rest;
    while argv.len() < max_args {
        rest = rest.trim_start_matches([' ', '\t']);
        if rest.is_empty() {
            return argv;
        }
        match rest.find([' ', '\t']) {
            Some(p) => {
                argv.push(rest[..p].to_string());
                rest = &rest[p..];
            }
            None => {
                argv.push(rest.to_string());
                return argv;
            }
        }
    }
    // One separator ends the last word; everything after it is kept
    // verbatim as a single argument.
    let rest = rest.strip_prefix([' ', '\t']).unwrap_or(rest);
    if !rest.is_empty() {
        argv.push(rest.to_string());
    }
    argv
}

/// Runs one command line against the volume.
///
/// Unknown commands and handler errors are reported on the terminal; the
/// caller keeps the shell running either way.
pub fn handle_command(sb: &mut SuperBlock, c: &mut Context, line: &str) {
    let line = line.trim_start_matches([' ', '\t']);
    if line.is_empty() {
        return;
    }
    let (name, rest) = match line.find([' ', '\t']) {
        Some(p) => (&line[..p], &line[p..]),
        None => (line, ""),
    };
    let Some(cmd) = COMMANDS.iter().find(|cmd| cmd.name == name) else {
        println!("{name}: command not found: type ? for help...");
        return;
    };
    c.argv = tokenize(name, rest, cmd.max_args);
    if let Err(e) = (cmd.func)(sb, c) {
        eprintln!("{name}: {e}");
    }
}

/// Lists the available commands.
fn cmd_help(_sb: &mut SuperBlock, _c: &mut Context) -> Result<()> {
    println!("Commands:");
    for cmd in COMMANDS {
        println!("{}", cmd.name);
    }
    Ok(())
}

/// Leaves the shell.
fn cmd_quit(_sb: &mut SuperBlock, c: &mut Context) -> Result<()> {
    println!("Bye!");
    c.quit = true;
    Ok(())
}

/// Changes the current directory.
fn cmd_cd(sb: &mut SuperBlock, c: &mut Context) -> Result<()> {
    if c.argv.len() != 2 {
        return Err(Error::Invalid);
    }
    let inode_nr = sb.name_to_inode_nr(c.cur_dir.nr(), &c.argv[1])?;
    let dir = sb.get_inode(inode_nr);
    if sb.inode_type(&dir) != InodeType::Dir {
        sb.put_inode(dir);
        return Err(Error::NotDir);
    }
    let old = mem::replace(&mut c.cur_dir, dir);
    sb.put_inode(old);
    Ok(())
}

/// Prints the absolute path of the current directory.
fn cmd_pwd(sb: &mut SuperBlock, c: &mut Context) -> Result<()> {
    if c.argv.len() != 1 {
        return Err(Error::Invalid);
    }
    let path = sb.abs_path(c.cur_dir.nr())?;
    println!("{path}");
    Ok(())
}

/// Prints the entries of the directory behind `dir`, recursing into
/// subdirectories when asked.
fn ls(sb: &mut SuperBlock, dir: &InodeHandle, recursive: bool) {
    let mut offset = 0;
    while let Some(d) = sb.next_dirent(dir, &mut offset) {
        if d.inode_nr < 0 {
            continue;
        }
        let child = sb.get_inode(d.inode_nr as u32);
        let is_dir = sb.inode_type(&child) == InodeType::Dir;
        println!("{}{}", d.name, if is_dir { "/" } else { "" });
        if recursive && is_dir && d.name != "." && d.name != ".." {
            ls(sb, &child, recursive);
        }
        sb.put_inode(child);
    }
}

/// Common implementation of `ls` and `lsr`.
fn cmd_ls_common(sb: &mut SuperBlock, c: &mut Context, recursive: bool) -> Result<()> {
    if c.argv.len() != 1 && c.argv.len() != 2 {
        return Err(Error::Invalid);
    }
    let cdir = c.argv.get(1).map(String::as_str).unwrap_or(".");
    let inode_nr = sb.name_to_inode_nr(c.cur_dir.nr(), cdir)?;
    let dir = sb.get_inode(inode_nr);
    if sb.inode_type(&dir) != InodeType::Dir {
        sb.put_inode(dir);
        return Err(Error::NotDir);
    }
    ls(sb, &dir, recursive);
    sb.put_inode(dir);
    Ok(())
}

/// Lists a directory.
fn cmd_ls(sb: &mut SuperBlock, c: &mut Context) -> Result<()> {
    cmd_ls_common(sb, c, false)
}

/// Lists a directory tree.
fn cmd_lsr(sb: &mut SuperBlock, c: &mut Context) -> Result<()> {
    cmd_ls_common(sb, c, true)
}

/// Creates regular files.
fn cmd_touch(sb: &mut SuperBlock, c: &mut Context) -> Result<()> {
    if c.argv.len() < 2 {
        return Err(Error::Invalid);
    }
    for i in 1..c.argv.len() {
        sb.create_file_or_dir(c.cur_dir.nr(), InodeType::File, &c.argv[i])?;
    }
    Ok(())
}

/// Creates a directory.
fn cmd_mkdir(sb: &mut SuperBlock, c: &mut Context) -> Result<()> {
    if c.argv.len() != 2 {
        return Err(Error::Invalid);
    }
    sb.create_file_or_dir(c.cur_dir.nr(), InodeType::Dir, &c.argv[1])?;
    Ok(())
}

/// Prints inode number, type and size for each argument.
fn cmd_stat(sb: &mut SuperBlock, c: &mut Context) -> Result<()> {
    if c.argv.len() < 2 {
        return Err(Error::Invalid);
    }
    for i in 1..c.argv.len() {
        let inode_nr = sb.name_to_inode_nr(c.cur_dir.nr(), &c.argv[i])?;
        let inode = sb.get_inode(inode_nr);
        println!(
            "{}: inode {}, {}, {} bytes",
            c.argv[i],
            inode_nr,
            sb.inode_type(&inode),
            sb.inode_size(&inode)
        );
        sb.put_inode(inode);
    }
    Ok(())
}

/// Removes a file or an empty directory.
fn cmd_rm(sb: &mut SuperBlock, c: &mut Context) -> Result<()> {
    if c.argv.len() != 2 {
        return Err(Error::Invalid);
    }
    let (parent_nr, name) = sb.resolve_parent(c.cur_dir.nr(), &c.argv[1])?;
    let parent = sb.get_inode(parent_nr);
    if sb.inode_type(&parent) != InodeType::Dir {
        sb.put_inode(parent);
        return Err(Error::NotDir);
    }
    sb.tx_start(TxKind::Rm);
    let res = match sb.remove_dirent(&parent, name) {
        Ok(inode_nr) => {
            let inode = sb.get_inode(inode_nr);
            sb.remove_inode(inode);
            sb.sync_inode(&parent);
            Ok(())
        }
        Err(e) => Err(e),
    };
    sb.tx_commit(TxKind::Rm);
    sb.put_inode(parent);
    res
}

/// Prints the contents of the file behind `inode_nr`.
fn cat_inode(sb: &mut SuperBlock, inode_nr: u32) -> Result<()> {
    let inode = sb.get_inode(inode_nr);
    if sb.inode_type(&inode) == InodeType::Dir {
        sb.put_inode(inode);
        return Err(Error::IsDir);
    }
    let size = sb.inode_size(&inode);
    if size > 0 {
        let mut buf = vec![0u8; size as usize];
        sb.read_data(&inode, 0, &mut buf);
        println!("{}", String::from_utf8_lossy(&buf));
    }
    sb.put_inode(inode);
    Ok(())
}

/// Prints file contents.
fn cmd_cat(sb: &mut SuperBlock, c: &mut Context) -> Result<()> {
    if c.argv.len() < 2 {
        return Err(Error::Invalid);
    }
    for i in 1..c.argv.len() {
        let inode_nr = sb.name_to_inode_nr(c.cur_dir.nr(), &c.argv[i])?;
        cat_inode(sb, inode_nr)?;
    }
    Ok(())
}

/// Prints every file under the directory behind `dir`, recursively.
fn catr(sb: &mut SuperBlock, dir: &InodeHandle) -> Result<()> {
    let mut offset = 0;
    while let Some(d) = sb.next_dirent(dir, &mut offset) {
        if d.inode_nr < 0 || d.name == "." || d.name == ".." {
            continue;
        }
        let child = sb.get_inode(d.inode_nr as u32);
        let res = if sb.inode_type(&child) == InodeType::Dir {
            catr(sb, &child)
        } else {
            println!("{}:", d.name);
            sb.put_inode(child);
            cat_inode(sb, d.inode_nr as u32)?;
            continue;
        };
        sb.put_inode(child);
        res?;
    }
    Ok(())
}

/// Prints the contents of a whole directory tree.
fn cmd_catr(sb: &mut SuperBlock, c: &mut Context) -> Result<()> {
    if c.argv.len() > 2 {
        return Err(Error::Invalid);
    }
    let cdir = c.argv.get(1).map(String::as_str).unwrap_or(".");
    let inode_nr = sb.name_to_inode_nr(c.cur_dir.nr(), cdir)?;
    let dir = sb.get_inode(inode_nr);
    if sb.inode_type(&dir) != InodeType::Dir {
        sb.put_inode(dir);
        return Err(Error::NotDir);
    }
    let res = catr(sb, &dir);
    sb.put_inode(dir);
    res
}

/// Resolves a path that must point at a regular file.
fn resolve_file(sb: &mut SuperBlock, cur_dir: u32, path: &str) -> Result<InodeHandle> {
    let inode_nr = sb.name_to_inode_nr(cur_dir, path)?;
    let inode = sb.get_inode(inode_nr);
    if sb.inode_type(&inode) == InodeType::Dir {
        sb.put_inode(inode);
        return Err(Error::IsDir);
    }
    Ok(inode)
}

/// Overwrites a file with the given content, truncating it to the content's
/// length.
fn cmd_write(sb: &mut SuperBlock, c: &mut Context) -> Result<()> {
    if c.argv.len() != 3 {
        return Err(Error::Invalid);
    }
    let inode = resolve_file(sb, c.cur_dir.nr(), &c.argv[1])?;
    let content = c.argv[2].as_bytes();
    sb.tx_start(TxKind::Write);
    let res = sb.write_data(&inode, 0, content);
    if res.is_ok() {
        sb.truncate_data(&inode, content.len() as u32);
    }
    sb.sync_inode(&inode);
    sb.tx_commit(TxKind::Write);
    sb.put_inode(inode);
    res.map(|_| ())
}

/// Writes content at an offset.
///
/// The file grows to `offset + len` when the write ends past its current
/// end; existing content after the written range is kept.
fn cmd_owrite(sb: &mut SuperBlock, c: &mut Context) -> Result<()> {
    if c.argv.len() != 4 {
        return Err(Error::Invalid);
    }
    let offset: u32 = c.argv[2].parse().map_err(|_| Error::Invalid)?;
    let inode = resolve_file(sb, c.cur_dir.nr(), &c.argv[1])?;
    let content = c.argv[3].as_bytes();
    sb.tx_start(TxKind::Write);
    let res = sb.write_data(&inode, offset, content);
    sb.sync_inode(&inode);
    sb.tx_commit(TxKind::Write);
    sb.put_inode(inode);
    res.map(|_| ())
}

/// Reads and prints a slice of a file.
fn cmd_oread(sb: &mut SuperBlock, c: &mut Context) -> Result<()> {
    if c.argv.len() != 4 {
        return Err(Error::Invalid);
    }
    let offset: u32 = c.argv[2].parse().map_err(|_| Error::Invalid)?;
    let size: u32 = c.argv[3].parse().map_err(|_| Error::Invalid)?;
    if size == 0 {
        return Ok(());
    }
    let inode = resolve_file(sb, c.cur_dir.nr(), &c.argv[1])?;
    let file_size = sb.inode_size(&inode);
    let mut res = Ok(());
    if file_size > 0 {
        if offset >= file_size {
            res = Err(Error::Invalid);
        } else {
            let size = size.min(file_size - offset);
            let mut buf = vec![0u8; size as usize];
            sb.read_data(&inode, offset, &mut buf);
            println!("{}", String::from_utf8_lossy(&buf));
        }
    }
    sb.put_inode(inode);
    res
}

/// Runs the consistency checker and prints its report.
fn cmd_checkfs(sb: &mut SuperBlock, c: &mut Context) -> Result<()> {
    if c.argv.len() != 1 {
        return Err(Error::Invalid);
    }
    let report = sb.checkfs()?;
    if !report.inode_freemap_ok {
        println!("inode freemap is not consistent");
    }
    if !report.block_freemap_ok {
        println!("block freemap is not consistent");
    }
    if report.csum_mismatches > 0 {
        println!("{} block checksums do not match", report.csum_mismatches);
    }
    println!("nr of allocated inodes = {}", report.nr_inodes);
    println!("nr of allocated blocks = {}", report.nr_blocks);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inode::ROOT_INODE_NR;
    use crate::superblock::SuperBlock;
    use crate::test_util::fresh_volume;
    use std::fs;

    fn context(sb: &mut SuperBlock) -> Context {
        Context::new(sb.get_inode(ROOT_INODE_NR))
    }

    fn read_file(sb: &mut SuperBlock, path: &str) -> Vec<u8> {
        let nr = sb.name_to_inode_nr(ROOT_INODE_NR, path).unwrap();
        let inode = sb.get_inode(nr);
        let mut buf = vec![0u8; sb.inode_size(&inode) as usize];
        sb.read_data(&inode, 0, &mut buf);
        sb.put_inode(inode);
        buf
    }

    #[test]
    fn tokenize_splits_remainder() {
        let argv = tokenize("write", " file hello world  ", 2);
        assert_eq!(argv, vec!["write", "file", "hello world  "]);

        let argv = tokenize("owrite", " f 2 X Y", 3);
        assert_eq!(argv, vec!["owrite", "f", "2", "X Y"]);

        let argv = tokenize("touch", " a  b\tc", MAX_ARGS);
        assert_eq!(argv, vec!["touch", "a", "b", "c"]);

        let argv = tokenize("pwd", "", 1);
        assert_eq!(argv, vec!["pwd"]);
    }

    #[test]
    fn mkdir_creates_dot_entries() {
        let (mut sb, path) = fresh_volume("cmd-mkdir");
        let mut c = context(&mut sb);

        handle_command(&mut sb, &mut c, "mkdir a");
        let a = sb.name_to_inode_nr(ROOT_INODE_NR, "a").unwrap();
        assert_eq!(a, 1);
        let dir = sb.get_inode(a);
        assert_eq!(sb.inode_type(&dir), InodeType::Dir);
        assert_eq!(sb.lookup_name(&dir, "."), Some(a));
        assert_eq!(sb.lookup_name(&dir, ".."), Some(ROOT_INODE_NR));
        sb.put_inode(dir);

        // Root grew by the `a` entry: header plus "a\0".
        let root = sb.get_inode(ROOT_INODE_NR);
        assert_eq!(sb.inode_size(&root), 21 + 10);
        sb.put_inode(root);

        assert!(sb.checkfs().unwrap().is_clean());
        sb.put_inode(c.cur_dir);
        sb.close();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn write_then_read_back() {
        let (mut sb, path) = fresh_volume("cmd-write");
        let mut c = context(&mut sb);

        handle_command(&mut sb, &mut c, "mkdir a");
        handle_command(&mut sb, &mut c, "touch a/b");
        handle_command(&mut sb, &mut c, "write a/b hello");
        assert_eq!(read_file(&mut sb, "a/b"), b"hello");

        // Overwriting truncates to the new content.
        handle_command(&mut sb, &mut c, "write a/b hi");
        assert_eq!(read_file(&mut sb, "a/b"), b"hi");

        // Content keeps its internal spaces.
        handle_command(&mut sb, &mut c, "write a/b hello brave world");
        assert_eq!(read_file(&mut sb, "a/b"), b"hello brave world");

        assert!(sb.checkfs().unwrap().is_clean());
        sb.put_inode(c.cur_dir);
        sb.close();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn owrite_patches_in_place() {
        let (mut sb, path) = fresh_volume("cmd-owrite");
        let mut c = context(&mut sb);

        handle_command(&mut sb, &mut c, "touch f");
        handle_command(&mut sb, &mut c, "write f hello");
        handle_command(&mut sb, &mut c, "owrite f 2 XX");
        assert_eq!(read_file(&mut sb, "f"), b"heXXo");

        // A write past the end extends the file.
        handle_command(&mut sb, &mut c, "owrite f 5 ZZ");
        assert_eq!(read_file(&mut sb, "f"), b"heXXoZZ");

        assert!(sb.checkfs().unwrap().is_clean());
        sb.put_inode(c.cur_dir);
        sb.close();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn rm_refuses_nonempty_then_succeeds() {
        let (mut sb, path) = fresh_volume("cmd-rm");
        let mut c = context(&mut sb);

        handle_command(&mut sb, &mut c, "mkdir a");
        handle_command(&mut sb, &mut c, "touch a/b");

        c.argv = vec!["rm".into(), "a".into()];
        assert_eq!(cmd_rm(&mut sb, &mut c), Err(Error::NotEmpty));

        c.argv = vec!["rm".into(), "a/b".into()];
        assert_eq!(cmd_rm(&mut sb, &mut c), Ok(()));
        c.argv = vec!["rm".into(), "a".into()];
        assert_eq!(cmd_rm(&mut sb, &mut c), Ok(()));

        assert_eq!(
            sb.name_to_inode_nr(ROOT_INODE_NR, "a"),
            Err(Error::NotFound)
        );
        assert!(sb.checkfs().unwrap().is_clean());

        sb.put_inode(c.cur_dir);
        sb.close();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn freemap_popcounts_return_after_mkdir_rm() {
        let (mut sb, path) = fresh_volume("cmd-popcount");
        let mut c = context(&mut sb);

        let before = sb.checkfs().unwrap();
        handle_command(&mut sb, &mut c, "mkdir d");
        handle_command(&mut sb, &mut c, "rm d");
        let after = sb.checkfs().unwrap();
        assert!(after.is_clean());
        assert_eq!(before.nr_inodes, after.nr_inodes);
        assert_eq!(before.nr_blocks, after.nr_blocks);

        sb.put_inode(c.cur_dir);
        sb.close();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn cd_restores_and_absolute_mkdir() {
        let (mut sb, path) = fresh_volume("cmd-cd");
        let mut c = context(&mut sb);

        handle_command(&mut sb, &mut c, "mkdir /x");
        handle_command(&mut sb, &mut c, "mkdir other");
        handle_command(&mut sb, &mut c, "cd other");
        let other = sb.name_to_inode_nr(ROOT_INODE_NR, "other").unwrap();
        assert_eq!(c.cur_dir.nr(), other);

        // Absolute path creation does not move the current directory.
        handle_command(&mut sb, &mut c, "mkdir /x/y");
        assert_eq!(c.cur_dir.nr(), other);
        assert!(sb.name_to_inode_nr(ROOT_INODE_NR, "/x/y").is_ok());

        // cd to a path with a trailing slash is invalid.
        let mut c2 = Context::new(sb.get_inode(ROOT_INODE_NR));
        c2.argv = vec!["cd".into(), "x/".into()];
        assert_eq!(cmd_cd(&mut sb, &mut c2), Err(Error::Invalid));
        sb.put_inode(c2.cur_dir);

        assert_eq!(sb.abs_path(c.cur_dir.nr()).unwrap(), "/other");

        sb.put_inode(c.cur_dir);
        sb.close();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn inode_exhaustion_recovers() {
        let (mut sb, path) = fresh_volume("cmd-fill");
        let mut c = context(&mut sb);

        // Exhaust the inode freemap with bare inodes.
        let mut held = Vec::new();
        loop {
            match sb.create_inode(InodeType::File) {
                Ok(h) => held.push(h),
                Err(Error::NoSpace) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(held.len() as u32, crate::superblock::NR_INODES - 1);

        c.argv = vec!["touch".into(), "x".into()];
        assert_eq!(cmd_touch(&mut sb, &mut c), Err(Error::NoSpace));

        // Releasing one inode lets the next creation through.
        sb.remove_inode(held.pop().unwrap());
        handle_command(&mut sb, &mut c, "touch x");
        assert!(sb.name_to_inode_nr(ROOT_INODE_NR, "x").is_ok());

        for h in held {
            sb.remove_inode(h);
        }
        assert!(sb.checkfs().unwrap().is_clean());
        sb.put_inode(c.cur_dir);
        sb.close();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn state_survives_remount() {
        let (mut sb, path) = fresh_volume("cmd-remount");
        let mut c = context(&mut sb);
        handle_command(&mut sb, &mut c, "mkdir a");
        handle_command(&mut sb, &mut c, "touch a/b");
        handle_command(&mut sb, &mut c, "write a/b persisted across mounts");
        sb.put_inode(c.cur_dir);
        sb.close();

        let mut sb = SuperBlock::open(&path, false).unwrap();
        assert_eq!(read_file(&mut sb, "a/b"), b"persisted across mounts");
        assert!(sb.checkfs().unwrap().is_clean());
        sb.close();
        fs::remove_file(&path).unwrap();
    }
}
