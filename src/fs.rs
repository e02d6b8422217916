// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Cache remote nodes and answer POSIX-shaped filesystem queries.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use log::{debug, warn};

use crate::error::FsError;
use crate::remote::{
    FileStat, NodeKind, Probe, RangeRead, RemoteBackend, RemoteChild, RemotePath,
};

/// How much of a node's metadata has been established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    /// Placeholder only; nothing fetched yet.
    Uninitialized,
    /// Seeded from a parent listing; size or time may still be missing.
    PartiallyKnown,
    /// Backed by a direct stat or a completed listing fetch.
    FullyLoaded,
}

/// Cached descriptor for a remote directory.
#[derive(Debug)]
pub struct DirNode {
    /// The directory's remote location.
    pub path: RemotePath,
    /// Synthesized metadata, mutated in place as information arrives.
    pub stat: FileStat,
    /// Child names in listing order, always starting `.` and `..`.
    pub children: Vec<String>,
    /// Initialization progress.
    pub stage: InitStage,
    /// False once the remote answered 404 for this path.
    pub exists: bool,
}

impl DirNode {
    fn new(path: RemotePath, stat: FileStat) -> Self {
        Self {
            path,
            stat,
            children: vec![".".to_owned(), "..".to_owned()],
            stage: InitStage::Uninitialized,
            exists: true,
        }
    }
}

/// Cached descriptor for a remote file.
#[derive(Debug)]
pub struct FileNode {
    /// The file's remote location.
    pub path: RemotePath,
    /// Synthesized metadata, mutated in place as information arrives.
    pub stat: FileStat,
    /// Initialization progress.
    pub stage: InitStage,
    /// False once the remote answered 404 for this path.
    pub exists: bool,
    /// Cleared permanently after a 403 on read.
    pub readable: bool,
    /// Set once the server honors a range request; cleared on a full body.
    pub seekable: bool,
    /// Sequential-read fallback position; explicit offsets always win.
    pub offset: u64,
}

impl FileNode {
    fn new(path: RemotePath) -> Self {
        Self {
            path,
            stat: FileStat::file(),
            stage: InitStage::Uninitialized,
            exists: true,
            readable: true,
            seekable: false,
            offset: 0,
        }
    }
}

/// One cache slot: a directory or a file descriptor.
#[derive(Debug)]
pub enum Node {
    /// Directory descriptor.
    Dir(DirNode),
    /// File descriptor.
    File(FileNode),
}

impl Node {
    /// Borrow the node's metadata regardless of kind.
    #[must_use]
    pub fn stat(&self) -> &FileStat {
        match self {
            Node::Dir(dir) => &dir.stat,
            Node::File(file) => &file.stat,
        }
    }

    /// Whether the remote still claims this path exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        match self {
            Node::Dir(dir) => dir.exists,
            Node::File(file) => file.exists,
        }
    }

    /// Initialization progress.
    #[must_use]
    pub fn stage(&self) -> InitStage {
        match self {
            Node::Dir(dir) => dir.stage,
            Node::File(file) => file.stage,
        }
    }

    /// The node kind tag.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Dir(_) => NodeKind::Directory,
            Node::File(_) => NodeKind::File,
        }
    }
}

/// The caching adapter between a remote backend and a host filesystem
/// layer.
///
/// Every discovered node lives in one shared map keyed by normalized
/// path string. Ancestors are materialized before their descendants, so
/// a cached path always implies a cached parent chain. Entries are
/// replaced only by an explicit [`IndexFs::refresh`] or when a listing
/// contradicts an uninitialized placeholder.
pub struct IndexFs<B: RemoteBackend> {
    backend: B,
    root: RemotePath,
    nodes: Mutex<HashMap<String, Arc<Mutex<Node>>>>,
    next_fd: AtomicU64,
}

/// Collapse a host path to its canonical cache key: leading slash, no
/// trailing slash, root spelled `/`.
fn normalize(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else {
        format!("/{trimmed}")
    }
}

impl<B: RemoteBackend> IndexFs<B> {
    /// Build an adapter rooted at `root`, seeding the root directory.
    #[must_use]
    pub fn new(backend: B, root: RemotePath) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            "/".to_owned(),
            Arc::new(Mutex::new(Node::Dir(DirNode::new(
                root.clone(),
                FileStat::directory(),
            )))),
        );
        Self {
            backend,
            root,
            nodes: Mutex::new(nodes),
            next_fd: AtomicU64::new(1),
        }
    }

    /// The remote location a cache key maps to.
    fn remote_path(&self, key: &str) -> RemotePath {
        self.root.join(key.trim_matches('/'))
    }

    /// The cache key a remote location maps to, relative to the root.
    fn key_for(&self, path: &RemotePath) -> String {
        let relative = &path.segments()[self.root.segments().len()..];
        if relative.is_empty() {
            "/".to_owned()
        } else {
            format!("/{}", relative.join("/"))
        }
    }

    /// Fetch-or-insert the node for `key`, materializing every missing
    /// ancestor as an uninitialized directory first. The whole
    /// check-then-insert sequence runs under the map lock.
    fn ensure_node(&self, key: &str) -> Arc<Mutex<Node>> {
        let mut nodes = self.nodes.lock().expect("node cache lock");
        let mut prefix = String::new();
        for segment in key.split('/').filter(|part| !part.is_empty()) {
            let parent_key = if prefix.is_empty() {
                "/".to_owned()
            } else {
                prefix.clone()
            };
            nodes.entry(parent_key.clone()).or_insert_with(|| {
                Arc::new(Mutex::new(Node::Dir(DirNode::new(
                    self.remote_path(&parent_key),
                    FileStat::directory(),
                ))))
            });
            prefix.push('/');
            prefix.push_str(segment);
        }
        nodes
            .entry(key.to_owned())
            .or_insert_with(|| {
                // Kind unknown until the first stat; a placeholder file
                // is converted in place if the probe says directory.
                Arc::new(Mutex::new(Node::File(FileNode::new(
                    self.remote_path(key),
                ))))
            })
            .clone()
    }

    /// Resolve `key` to a node, fetching metadata the first time a file
    /// placeholder is touched.
    fn resolve(&self, key: &str) -> Result<Arc<Mutex<Node>>, FsError> {
        let node = self.ensure_node(key);
        {
            let mut guard = node.lock().expect("node lock");
            if guard.stage() == InitStage::Uninitialized && matches!(&*guard, Node::File(_)) {
                self.load_node(&mut guard)?;
            }
        }
        Ok(node)
    }

    /// Stat a file node against the remote, converting it to a
    /// directory when the probe says so. 404 and 403 are recorded on
    /// the node instead of propagating; other failures propagate.
    fn load_node(&self, node: &mut Node) -> Result<(), FsError> {
        let Node::File(file) = node else {
            return Ok(());
        };
        let path = file.path.clone();
        match self.backend.stat(&path, false) {
            Ok(Probe::Directory(stat)) => {
                *node = Node::Dir(DirNode::new(path, stat));
            }
            Ok(Probe::File(mut stat)) => {
                // Listing-derived values survive a header-poor HEAD.
                if stat.mtime == 0 && file.stat.mtime != 0 {
                    stat.set_time(file.stat.mtime);
                }
                if stat.size == 0 && file.stat.size != 0 {
                    stat.size = file.stat.size;
                }
                file.stat = stat;
                file.exists = true;
                file.stage = InitStage::FullyLoaded;
            }
            Err(FsError::NotFound) => {
                file.exists = false;
                file.readable = false;
                file.stat.set_mode(0o000, false);
                file.stage = InitStage::FullyLoaded;
            }
            Err(FsError::PermissionDenied) => {
                file.readable = false;
                file.stat.set_mode(0o000, false);
                file.stage = InitStage::FullyLoaded;
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// Build the cache node a listing child seeds.
    fn node_from_child(&self, child: RemoteChild, dir_mtime: i64) -> Node {
        let mtime = child
            .entry
            .modified
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or(dir_mtime);
        match child.kind {
            NodeKind::Directory => {
                let mut stat = FileStat::directory();
                stat.set_time(mtime);
                Node::Dir(DirNode::new(child.path, stat))
            }
            NodeKind::File => {
                let mut file = FileNode::new(child.path);
                file.stat.size = child.entry.size.unwrap_or(0);
                file.stat.set_time(mtime);
                file.stage = InitStage::PartiallyKnown;
                Node::File(file)
            }
        }
    }

    /// List a directory from the remote and merge the result into the
    /// cache. Parse failures degrade to an empty listing; 403/404 mark
    /// the directory and propagate.
    fn load_dir(&self, node: &mut Node, force: bool) -> Result<(), FsError> {
        let Node::Dir(dir) = node else {
            return Err(FsError::NotADirectory);
        };
        if dir.stage == InitStage::FullyLoaded && !force {
            return Ok(());
        }
        let listing = match self.backend.list_children(&dir.path) {
            Ok(listing) => listing,
            Err(FsError::Parse(reason)) => {
                warn!("{}: unparseable listing: {reason}", dir.path);
                dir.stage = InitStage::FullyLoaded;
                return Ok(());
            }
            Err(FsError::NotFound) => {
                dir.exists = false;
                dir.stat.set_mode(0o000, true);
                dir.stage = InitStage::FullyLoaded;
                return Err(FsError::NotFound);
            }
            Err(FsError::PermissionDenied) => {
                dir.stat.set_mode(0o000, true);
                dir.stage = InitStage::FullyLoaded;
                return Err(FsError::PermissionDenied);
            }
            Err(err) => return Err(err),
        };
        dir.stat
            .set_time(listing.mtime.unwrap_or_else(|| Utc::now().timestamp()));
        let dir_mtime = dir.stat.mtime;

        let mut children = vec![".".to_owned(), "..".to_owned()];
        let mut needs_stat = Vec::new();
        let mut merges = Vec::new();
        {
            let mut nodes = self.nodes.lock().expect("node cache lock");
            for child in listing.children {
                let name = child.entry.name.trim_end_matches('/').to_owned();
                if name.is_empty() || name == "." || name == ".." {
                    continue;
                }
                let child_key = self.key_for(&child.path);
                children.push(name);
                let sizeless = child.kind == NodeKind::File && child.entry.size.is_none();
                let slot = match nodes.entry(child_key) {
                    Entry::Occupied(slot) => {
                        // Node locks are never taken under the map lock:
                        // another thread may hold a node lock across a
                        // network call and then want the map. Merge once
                        // the map lock is released.
                        let existing = slot.get().clone();
                        merges.push((existing.clone(), child));
                        existing
                    }
                    Entry::Vacant(slot) => slot
                        .insert(Arc::new(Mutex::new(
                            self.node_from_child(child, dir_mtime),
                        )))
                        .clone(),
                };
                if sizeless {
                    needs_stat.push(slot);
                }
            }
        }
        for (slot, child) in merges {
            // Mutate inside the same Arc so holders of the old handle
            // see the new contents; a fully loaded node of the same
            // kind keeps its stat.
            let mut guard = slot.lock().expect("node lock");
            if guard.stage() != InitStage::FullyLoaded || guard.kind() != child.kind {
                *guard = self.node_from_child(child, dir_mtime);
            }
        }
        dir.children = children;
        dir.stat.nlink = dir.children.len() as u32;
        dir.stage = InitStage::FullyLoaded;

        // A listing that omitted a size would otherwise present zero as
        // truth; stat those children now.
        for slot in needs_stat {
            let mut guard = slot.lock().expect("node lock");
            let pending = matches!(
                &*guard,
                Node::File(file) if file.stage != InitStage::FullyLoaded && file.stat.size == 0
            );
            if pending {
                if let Err(err) = self.load_node(&mut guard) {
                    debug!("deferred stat failed: {err}");
                }
            }
        }
        Ok(())
    }

    /// Metadata for one path.
    pub fn getattr(&self, path: &str) -> Result<FileStat, FsError> {
        let key = normalize(path);
        let node = self.resolve(&key)?;
        let guard = node.lock().expect("node lock");
        if !guard.exists() {
            return Err(FsError::NotFound);
        }
        Ok(guard.stat().clone())
    }

    /// List one directory as `(name, stat)` pairs, `.` and `..` first.
    pub fn readdir(&self, path: &str) -> Result<Vec<(String, FileStat)>, FsError> {
        let key = normalize(path);
        let node = self.resolve(&key)?;
        let mut guard = node.lock().expect("node lock");
        if !guard.exists() {
            return Err(FsError::NotFound);
        }
        if matches!(&*guard, Node::File(_)) {
            return Err(FsError::NotADirectory);
        }
        self.load_dir(&mut guard, false)?;
        let Node::Dir(dir) = &*guard else {
            return Err(FsError::NotADirectory);
        };
        let mut out = Vec::with_capacity(dir.children.len());
        for name in &dir.children {
            let stat = match name.as_str() {
                "." => dir.stat.clone(),
                ".." => FileStat::directory(),
                _ => self.child_stat(&key, name),
            };
            out.push((name.clone(), stat));
        }
        Ok(out)
    }

    fn child_stat(&self, dir_key: &str, name: &str) -> FileStat {
        let child_key = if dir_key == "/" {
            format!("/{name}")
        } else {
            format!("{dir_key}/{name}")
        };
        let slot = {
            let nodes = self.nodes.lock().expect("node cache lock");
            nodes.get(&child_key).cloned()
        };
        match slot {
            Some(node) => node.lock().expect("node lock").stat().clone(),
            None => FileStat::file(),
        }
    }

    /// Open a file for reading, returning an opaque handle.
    pub fn open(&self, path: &str) -> Result<u64, FsError> {
        let key = normalize(path);
        let node = self.resolve(&key)?;
        let guard = node.lock().expect("node lock");
        match &*guard {
            Node::Dir(_) => Err(FsError::IsADirectory),
            Node::File(file) => {
                if !file.exists {
                    Err(FsError::NotFound)
                } else if !file.readable {
                    Err(FsError::PermissionDenied)
                } else {
                    Ok(self.next_fd.fetch_add(1, Ordering::Relaxed))
                }
            }
        }
    }

    /// Open a directory, returning an opaque handle.
    pub fn opendir(&self, path: &str) -> Result<u64, FsError> {
        let key = normalize(path);
        let node = self.resolve(&key)?;
        let guard = node.lock().expect("node lock");
        match &*guard {
            Node::File(_) => Err(FsError::NotADirectory),
            Node::Dir(dir) => {
                if !dir.exists {
                    Err(FsError::NotFound)
                } else {
                    Ok(self.next_fd.fetch_add(1, Ordering::Relaxed))
                }
            }
        }
    }

    /// Read up to `size` bytes. `offset` is the caller's position;
    /// `None` falls back to the node's stored sequential position.
    ///
    /// A 206 answer marks the node seekable and advances the stored
    /// position past the returned bytes. A full-body answer is accepted
    /// only at offset zero. An out-of-range answer refreshes the stat
    /// and fails, since the cached size was evidently stale.
    pub fn read(&self, path: &str, size: u32, offset: Option<u64>) -> Result<Vec<u8>, FsError> {
        let key = normalize(path);
        let node = self.resolve(&key)?;
        let mut guard = node.lock().expect("node lock");
        let needs_stat = matches!(
            &*guard,
            Node::File(file) if file.stage == InitStage::Uninitialized || file.stat.size == 0
        );
        if needs_stat {
            self.load_node(&mut guard)?;
        }
        let (remote, offset, end) = {
            let Node::File(file) = &*guard else {
                return Err(FsError::IsADirectory);
            };
            if !file.exists {
                return Err(FsError::NotFound);
            }
            if !file.readable {
                return Err(FsError::PermissionDenied);
            }
            if file.stat.size == 0 {
                return Ok(Vec::new());
            }
            let offset = offset.unwrap_or(file.offset);
            let end = file
                .stat
                .size
                .min(offset.saturating_add(u64::from(size)))
                .saturating_sub(1);
            (file.path.clone(), offset, end)
        };
        match self.backend.read_range(&remote, offset, end) {
            Ok(RangeRead::Ranged(mut data)) => {
                if let Node::File(file) = &mut *guard {
                    file.seekable = true;
                    data.truncate(size as usize);
                    file.offset = offset + data.len() as u64;
                }
                Ok(data)
            }
            Ok(RangeRead::Full(mut data)) => {
                if let Node::File(file) = &mut *guard {
                    file.seekable = false;
                    if offset != 0 {
                        return Err(FsError::Protocol(
                            "full body answered a non-zero ranged request".to_owned(),
                        ));
                    }
                    data.truncate(size as usize);
                    file.offset = data.len() as u64;
                }
                Ok(data)
            }
            Ok(RangeRead::OutOfRange) => {
                warn!("{remote}: cached size stale, refreshing metadata");
                self.load_node(&mut guard)?;
                Err(FsError::Protocol(
                    "requested range lies beyond the remote resource".to_owned(),
                ))
            }
            Err(FsError::NotFound) => {
                if let Node::File(file) = &mut *guard {
                    file.exists = false;
                    file.readable = false;
                    file.stat.set_mode(0o000, false);
                }
                Err(FsError::NotFound)
            }
            Err(FsError::PermissionDenied) => {
                if let Node::File(file) = &mut *guard {
                    file.readable = false;
                    file.stat.set_mode(0o000, false);
                }
                Err(FsError::PermissionDenied)
            }
            Err(err) => Err(err),
        }
    }

    /// POSIX access check. Write access is never granted; read and
    /// execute are checked against the node's permission bits.
    pub fn access(&self, path: &str, mask: i32) -> Result<(), FsError> {
        if mask & libc::W_OK != 0 {
            return Err(FsError::PermissionDenied);
        }
        let key = normalize(path);
        let node = self.resolve(&key)?;
        let guard = node.lock().expect("node lock");
        if !guard.exists() {
            return Err(FsError::NotFound);
        }
        let mode = guard.stat().mode;
        if mask & libc::R_OK != 0 && mode & 0o444 == 0 {
            return Err(FsError::PermissionDenied);
        }
        if mask & libc::X_OK != 0 && mode & 0o111 == 0 {
            return Err(FsError::PermissionDenied);
        }
        Ok(())
    }

    /// Explicitly re-fetch one node, replacing its cached state.
    pub fn refresh(&self, path: &str) -> Result<(), FsError> {
        let key = normalize(path);
        let node = self.resolve(&key)?;
        let mut guard = node.lock().expect("node lock");
        if matches!(&*guard, Node::Dir(_)) {
            self.load_dir(&mut guard, true)
        } else {
            self.load_node(&mut guard)
        }
    }

    /// The cached node for a path, if one exists.
    #[must_use]
    pub fn node(&self, path: &str) -> Option<Arc<Mutex<Node>>> {
        let nodes = self.nodes.lock().expect("node cache lock");
        nodes.get(&normalize(path)).cloned()
    }

    /// Every cached path key, unordered.
    #[must_use]
    pub fn cached_paths(&self) -> Vec<String> {
        let nodes = self.nodes.lock().expect("node cache lock");
        nodes.keys().cloned().collect()
    }
}
