// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Bridge the caching adapter onto a FUSE mount.
// Author: Lukas Bower
#![forbid(unsafe_code)]

#[cfg(feature = "fuse")]
use std::collections::HashMap;
use std::path::Path;
#[cfg(feature = "fuse")]
use std::sync::Mutex;
#[cfg(feature = "fuse")]
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
#[cfg(not(feature = "fuse"))]
use anyhow::anyhow;
#[cfg(feature = "fuse")]
use anyhow::Context;
#[cfg(feature = "fuse")]
use log::debug;

use crate::fs::IndexFs;
use crate::remote::RemoteBackend;
#[cfg(feature = "fuse")]
use crate::remote::FileStat;

#[cfg(feature = "fuse")]
const ROOT_INODE: u64 = 1;
#[cfg(feature = "fuse")]
const TTL: Duration = Duration::from_secs(1);

/// Mount the adapter at `at`, blocking until the filesystem is
/// unmounted. `raw_options` is the comma-separated option string from
/// the command line; the mount is forced read-only regardless.
pub fn mount<B: RemoteBackend + Send + 'static>(
    fs: IndexFs<B>,
    at: &Path,
    raw_options: &str,
) -> Result<()> {
    #[cfg(feature = "fuse")]
    {
        let options = parse_mount_options(raw_options);
        let filesystem = IndexFuse::new(fs);
        fuser::mount2(filesystem, at, &options)
            .with_context(|| format!("mount {}", at.display()))?;
        Ok(())
    }
    #[cfg(not(feature = "fuse"))]
    {
        let _ = (fs, at, raw_options);
        Err(anyhow!(
            "fuse support disabled; rebuild indexfs with --features fuse"
        ))
    }
}

/// Translate a comma-separated option string into mount options,
/// passing unknown words through verbatim. The result always contains
/// the read-only flag and a filesystem name.
#[cfg(feature = "fuse")]
#[must_use]
pub fn parse_mount_options(raw: &str) -> Vec<fuser::MountOption> {
    use fuser::MountOption;

    let mut options = Vec::new();
    for word in raw.split(',').map(str::trim).filter(|word| !word.is_empty()) {
        let option = match word {
            "ro" | "rw" => continue,
            "exec" => MountOption::Exec,
            "noexec" => MountOption::NoExec,
            "suid" => MountOption::Suid,
            "nosuid" => MountOption::NoSuid,
            "dev" => MountOption::Dev,
            "nodev" => MountOption::NoDev,
            "sync" => MountOption::Sync,
            "async" => MountOption::Async,
            "atime" => MountOption::Atime,
            "noatime" => MountOption::NoAtime,
            "dirsync" => MountOption::DirSync,
            "allow_other" => MountOption::AllowOther,
            "allow_root" => MountOption::AllowRoot,
            "auto_unmount" => MountOption::AutoUnmount,
            "default_permissions" => MountOption::DefaultPermissions,
            other => match other.split_once('=') {
                Some(("fsname", name)) => MountOption::FSName(name.to_owned()),
                Some(("subtype", name)) => MountOption::Subtype(name.to_owned()),
                _ => MountOption::CUSTOM(other.to_owned()),
            },
        };
        options.push(option);
    }
    if !options
        .iter()
        .any(|option| matches!(option, MountOption::FSName(_)))
    {
        options.push(MountOption::FSName("indexfs".to_owned()));
    }
    options.push(MountOption::RO);
    options
}

#[cfg(feature = "fuse")]
struct IndexFuse<B: RemoteBackend> {
    fs: IndexFs<B>,
    inodes: Mutex<InodeTable>,
}

#[cfg(feature = "fuse")]
impl<B: RemoteBackend> IndexFuse<B> {
    fn new(fs: IndexFs<B>) -> Self {
        let mut inodes = InodeTable::new();
        inodes.insert("/");
        Self {
            fs,
            inodes: Mutex::new(inodes),
        }
    }

    fn to_attr(inode: u64, stat: &FileStat) -> fuser::FileAttr {
        let timestamp = |secs: i64| UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64);
        fuser::FileAttr {
            ino: inode,
            size: stat.size,
            blocks: stat.size.div_ceil(512),
            atime: timestamp(stat.atime),
            mtime: timestamp(stat.mtime),
            ctime: timestamp(stat.ctime),
            crtime: SystemTime::now(),
            kind: if stat.is_dir() {
                fuser::FileType::Directory
            } else {
                fuser::FileType::RegularFile
            },
            perm: (stat.mode & 0o7777) as u16,
            nlink: stat.nlink,
            uid: stat.uid,
            gid: stat.gid,
            rdev: 0,
            flags: 0,
            blksize: 512,
        }
    }

    fn resolve_inode_path(&self, inode: u64) -> Option<String> {
        let inodes = self.inodes.lock().expect("inode lock");
        inodes.path_for(inode).map(str::to_owned)
    }
}

#[cfg(feature = "fuse")]
impl<B: RemoteBackend> fuser::Filesystem for IndexFuse<B> {
    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &std::ffi::OsStr,
        reply: fuser::ReplyEntry,
    ) {
        let parent_path = match self.resolve_inode_path(parent) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let name = name.to_string_lossy();
        let child_path = if parent_path == "/" {
            format!("/{name}")
        } else {
            format!("{parent_path}/{name}")
        };
        match self.fs.getattr(&child_path) {
            Ok(stat) => {
                let inode = {
                    let mut inodes = self.inodes.lock().expect("inode lock");
                    inodes.insert(&child_path)
                };
                reply.entry(&TTL, &Self::to_attr(inode, &stat), 0);
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn getattr(
        &mut self,
        _req: &fuser::Request<'_>,
        inode: u64,
        _fh: Option<u64>,
        reply: fuser::ReplyAttr,
    ) {
        let path = match self.resolve_inode_path(inode) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match self.fs.getattr(&path) {
            Ok(stat) => reply.attr(&TTL, &Self::to_attr(inode, &stat)),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn access(
        &mut self,
        _req: &fuser::Request<'_>,
        inode: u64,
        mask: i32,
        reply: fuser::ReplyEmpty,
    ) {
        let path = match self.resolve_inode_path(inode) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match self.fs.access(&path, mask) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn opendir(
        &mut self,
        _req: &fuser::Request<'_>,
        inode: u64,
        _flags: i32,
        reply: fuser::ReplyOpen,
    ) {
        let path = match self.resolve_inode_path(inode) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match self.fs.opendir(&path) {
            Ok(fh) => reply.opened(fh, 0),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        inode: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        let path = match self.resolve_inode_path(inode) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let entries = match self.fs.readdir(&path) {
            Ok(entries) => entries,
            Err(err) => {
                reply.error(err.errno());
                return;
            }
        };
        debug!("readdir {path}: {} entries", entries.len());
        let mut listing = Vec::with_capacity(entries.len());
        for (name, stat) in entries {
            let entry_inode = match name.as_str() {
                "." => inode,
                ".." => {
                    let parent = parent_of(&path);
                    let inodes = self.inodes.lock().expect("inode lock");
                    inodes.inode_for(&parent).unwrap_or(ROOT_INODE)
                }
                _ => {
                    let child_path = if path == "/" {
                        format!("/{name}")
                    } else {
                        format!("{path}/{name}")
                    };
                    let mut inodes = self.inodes.lock().expect("inode lock");
                    inodes.insert(&child_path)
                }
            };
            let file_type = if stat.is_dir() {
                fuser::FileType::Directory
            } else {
                fuser::FileType::RegularFile
            };
            listing.push((entry_inode, file_type, name));
        }
        let start = offset.max(0) as usize;
        for (idx, (entry_inode, file_type, name)) in listing.into_iter().enumerate().skip(start) {
            if reply.add(entry_inode, (idx + 1) as i64, file_type, name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(
        &mut self,
        _req: &fuser::Request<'_>,
        inode: u64,
        flags: i32,
        reply: fuser::ReplyOpen,
    ) {
        let path = match self.resolve_inode_path(inode) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            reply.error(libc::EACCES);
            return;
        }
        match self.fs.open(&path) {
            Ok(fh) => reply.opened(fh, 0),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &fuser::Request<'_>,
        inode: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        let path = match self.resolve_inode_path(inode) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        match self.fs.read(&path, size, Some(offset as u64)) {
            Ok(data) => reply.data(&data),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &fuser::Request<'_>,
        _inode: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: fuser::ReplyEmpty,
    ) {
        reply.ok();
    }

    fn releasedir(
        &mut self,
        _req: &fuser::Request<'_>,
        _inode: u64,
        _fh: u64,
        _flags: i32,
        reply: fuser::ReplyEmpty,
    ) {
        reply.ok();
    }
}

#[cfg(feature = "fuse")]
fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_owned(),
        Some(idx) => path[..idx].to_owned(),
    }
}

#[cfg(feature = "fuse")]
#[derive(Debug, Default)]
struct InodeTable {
    by_inode: HashMap<u64, String>,
    by_path: HashMap<String, u64>,
    next_inode: u64,
}

#[cfg(feature = "fuse")]
impl InodeTable {
    fn new() -> Self {
        Self {
            by_inode: HashMap::new(),
            by_path: HashMap::new(),
            next_inode: ROOT_INODE + 1,
        }
    }

    fn insert(&mut self, path: &str) -> u64 {
        if let Some(existing) = self.by_path.get(path) {
            return *existing;
        }
        let inode = if path == "/" { ROOT_INODE } else { self.next_inode };
        if inode == self.next_inode {
            self.next_inode = self.next_inode.saturating_add(1);
        }
        self.by_inode.insert(inode, path.to_owned());
        self.by_path.insert(path.to_owned(), inode);
        inode
    }

    fn path_for(&self, inode: u64) -> Option<&str> {
        self.by_inode.get(&inode).map(String::as_str)
    }

    fn inode_for(&self, path: &str) -> Option<u64> {
        self.by_path.get(path).copied()
    }
}

#[cfg(all(test, feature = "fuse"))]
mod tests {
    use super::*;

    #[test]
    fn inode_numbers_are_stable_per_path() {
        let mut table = InodeTable::new();
        assert_eq!(table.insert("/"), ROOT_INODE);
        let a = table.insert("/a");
        let b = table.insert("/b");
        assert_ne!(a, b);
        assert_eq!(table.insert("/a"), a);
        assert_eq!(table.path_for(a), Some("/a"));
        assert_eq!(table.inode_for("/b"), Some(b));
    }

    #[test]
    fn mount_options_pass_through_and_force_read_only() {
        let options = parse_mount_options("allow_other,fsname=listing,weird_flag,rw");
        assert!(options.contains(&fuser::MountOption::RO));
        assert!(options.contains(&fuser::MountOption::AllowOther));
        assert!(options.contains(&fuser::MountOption::FSName("listing".to_owned())));
        assert!(options.contains(&fuser::MountOption::CUSTOM("weird_flag".to_owned())));
    }

    #[test]
    fn parent_of_walks_one_level() {
        assert_eq!(parent_of("/"), "/");
        assert_eq!(parent_of("/a"), "/");
        assert_eq!(parent_of("/a/b"), "/a");
    }
}
