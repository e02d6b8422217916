// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Validate the caching adapter against a scripted backend.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use indexfs::entry::FileEntry;
use indexfs::error::FsError;
use indexfs::fs::{IndexFs, InitStage, Node};
use indexfs::remote::{
    DirListing, FileStat, NodeKind, OpenMode, Probe, RangeRead, RemoteBackend, RemoteChild,
    RemotePath, RemoteReader,
};

/// Scripted backend: directories and file bodies declared up front,
/// every network-shaped call counted.
#[derive(Default)]
struct MockBackend {
    listings: HashMap<String, Vec<FileEntry>>,
    bodies: HashMap<String, Vec<u8>>,
    forbidden: HashSet<String>,
    /// Paths whose server ignores range headers.
    unranged: HashSet<String>,
    /// Listing latency, for exercising concurrent callers.
    delays: HashMap<String, Duration>,
    list_calls: Mutex<HashMap<String, usize>>,
}

impl MockBackend {
    fn key(path: &RemotePath) -> String {
        path.segments().join("/")
    }

    fn dir(mut self, key: &str, entries: Vec<FileEntry>) -> Self {
        self.listings.insert(key.to_owned(), entries);
        self
    }

    fn body(mut self, key: &str, bytes: &[u8]) -> Self {
        self.bodies.insert(key.to_owned(), bytes.to_vec());
        self
    }

    fn forbid(mut self, key: &str) -> Self {
        self.forbidden.insert(key.to_owned());
        self
    }

    fn unranged(mut self, key: &str) -> Self {
        self.unranged.insert(key.to_owned());
        self
    }

    fn slow(mut self, key: &str, delay: Duration) -> Self {
        self.delays.insert(key.to_owned(), delay);
        self
    }

    fn list_count(&self, key: &str) -> usize {
        *self
            .list_calls
            .lock()
            .expect("counter lock")
            .get(key)
            .unwrap_or(&0)
    }
}

fn file_entry(name: &str, size: Option<u64>) -> FileEntry {
    FileEntry {
        name: name.to_owned(),
        modified: None,
        size,
        description: None,
    }
}

impl RemoteBackend for MockBackend {
    fn list_children(&self, path: &RemotePath) -> Result<DirListing, FsError> {
        let key = Self::key(path);
        *self
            .list_calls
            .lock()
            .expect("counter lock")
            .entry(key.clone())
            .or_insert(0) += 1;
        if let Some(delay) = self.delays.get(&key) {
            thread::sleep(*delay);
        }
        let entries = self.listings.get(&key).ok_or(FsError::NotFound)?;
        let children = entries
            .iter()
            .cloned()
            .map(|entry| {
                let kind = if entry.is_dir() {
                    NodeKind::Directory
                } else {
                    NodeKind::File
                };
                RemoteChild {
                    path: path.join(entry.name.trim_end_matches('/')),
                    kind,
                    entry,
                }
            })
            .collect();
        Ok(DirListing {
            label: None,
            children,
            mtime: Some(1_577_836_800),
        })
    }

    fn stat(&self, path: &RemotePath, _follow_redirects: bool) -> Result<Probe, FsError> {
        let key = Self::key(path);
        if self.forbidden.contains(&key) {
            return Err(FsError::PermissionDenied);
        }
        if key.is_empty() || self.listings.contains_key(&key) {
            return Ok(Probe::Directory(FileStat::directory()));
        }
        let parent = path.parent().ok_or(FsError::NotFound)?;
        let siblings = self
            .listings
            .get(&Self::key(&parent))
            .ok_or(FsError::NotFound)?;
        let name = path.name().unwrap_or_default();
        siblings
            .iter()
            .find(|entry| entry.name.trim_end_matches('/') == name)
            .ok_or(FsError::NotFound)?;
        let mut stat = FileStat::file();
        // The body is ground truth; listing sizes may be stale.
        stat.size = self.bodies.get(&key).map(|b| b.len() as u64).unwrap_or(0);
        stat.set_time(1_577_836_800);
        Ok(Probe::File(stat))
    }

    fn open(&self, path: &RemotePath, _mode: OpenMode) -> Result<RemoteReader, FsError> {
        let key = Self::key(path);
        self.bodies
            .get(&key)
            .map(|body| RemoteReader::new(body.clone()))
            .ok_or(FsError::NotFound)
    }

    fn read_range(&self, path: &RemotePath, offset: u64, end: u64) -> Result<RangeRead, FsError> {
        let key = Self::key(path);
        let body = self.bodies.get(&key).ok_or(FsError::NotFound)?;
        if self.unranged.contains(&key) {
            return Ok(RangeRead::Full(body.clone()));
        }
        if offset >= body.len() as u64 {
            return Ok(RangeRead::OutOfRange);
        }
        let end = (end + 1).min(body.len() as u64) as usize;
        Ok(RangeRead::Ranged(body[offset as usize..end].to_vec()))
    }
}

/// Handle that lets a test keep a counting reference to the backend it
/// hands over to the filesystem.
struct SharedBackend(Arc<MockBackend>);

impl RemoteBackend for SharedBackend {
    fn list_children(&self, path: &RemotePath) -> Result<DirListing, FsError> {
        self.0.list_children(path)
    }

    fn stat(&self, path: &RemotePath, follow_redirects: bool) -> Result<Probe, FsError> {
        self.0.stat(path, follow_redirects)
    }

    fn open(&self, path: &RemotePath, mode: OpenMode) -> Result<RemoteReader, FsError> {
        self.0.open(path, mode)
    }

    fn read_range(&self, path: &RemotePath, offset: u64, end: u64) -> Result<RangeRead, FsError> {
        self.0.read_range(path, offset, end)
    }
}

fn two_level_backend() -> MockBackend {
    MockBackend::default()
        .dir(
            "",
            vec![file_entry("a.txt", Some(10)), file_entry("sub/", None)],
        )
        .dir("sub", vec![file_entry("b.txt", Some(20))])
        .body("a.txt", b"0123456789")
        .body("sub/b.txt", &[b'x'; 20])
}

fn mounted(backend: MockBackend) -> IndexFs<MockBackend> {
    let root = RemotePath::parse("http://mirror.example.org/").expect("root url");
    IndexFs::new(backend, root)
}

#[test]
fn two_level_tree_stats_and_lists() {
    let fs = mounted(two_level_backend());
    assert_eq!(fs.getattr("/a.txt").expect("a.txt").size, 10);
    let sub = fs.getattr("/sub").expect("sub");
    assert!(sub.is_dir());
    let names: Vec<_> = fs
        .readdir("/sub")
        .expect("readdir sub")
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, [".", "..", "b.txt"]);
    assert_eq!(fs.getattr("/sub/b.txt").expect("b.txt").size, 20);
}

#[test]
fn resolving_a_leaf_caches_every_ancestor() {
    let fs = mounted(two_level_backend());
    fs.getattr("/sub/b.txt").expect("leaf");
    let cached = fs.cached_paths();
    assert!(cached.contains(&"/".to_owned()), "{cached:?}");
    assert!(cached.contains(&"/sub".to_owned()), "{cached:?}");
    assert!(cached.contains(&"/sub/b.txt".to_owned()), "{cached:?}");
}

#[test]
fn repeated_readdir_reuses_cached_children() {
    let backend = Arc::new(two_level_backend());
    let root = RemotePath::parse("http://mirror.example.org/").expect("root url");
    let fs = IndexFs::new(SharedBackend(backend.clone()), root);
    fs.readdir("/").expect("first readdir");
    let before = fs.node("/a.txt").expect("a.txt node");
    fs.readdir("/").expect("second readdir");
    let after = fs.node("/a.txt").expect("a.txt node again");
    assert!(Arc::ptr_eq(&before, &after));
    // One listing fetch serves both calls.
    assert_eq!(backend.list_count(""), 1);
    let guard = before.lock().expect("node lock");
    assert_eq!(guard.stage(), InitStage::PartiallyKnown);
}

#[test]
fn concurrent_parent_and_child_listings_both_complete() {
    // The child listing stalls long enough for the parent listing to
    // start while the child's node lock is held across the fetch.
    let backend = two_level_backend().slow("sub", Duration::from_millis(400));
    let root = RemotePath::parse("http://mirror.example.org/").expect("root url");
    let fs = Arc::new(IndexFs::new(backend, root));
    let (tx, rx) = mpsc::channel();
    let sub = {
        let fs = Arc::clone(&fs);
        let tx = tx.clone();
        thread::spawn(move || {
            tx.send(fs.readdir("/sub")).expect("send sub result");
        })
    };
    thread::sleep(Duration::from_millis(100));
    let parent = {
        let fs = Arc::clone(&fs);
        thread::spawn(move || {
            tx.send(fs.readdir("/")).expect("send root result");
        })
    };
    for _ in 0..2 {
        rx.recv_timeout(Duration::from_secs(8))
            .expect("a readdir never completed")
            .expect("readdir");
    }
    sub.join().expect("join sub");
    parent.join().expect("join parent");
}

#[test]
fn readdir_eagerly_stats_children_without_a_listed_size() {
    let backend = MockBackend::default()
        .dir("", vec![file_entry("nosize.bin", None)])
        .body("nosize.bin", b"seven!!");
    let fs = mounted(backend);
    fs.readdir("/").expect("readdir");
    let node = fs.node("/nosize.bin").expect("cached");
    let guard = node.lock().expect("node lock");
    assert_eq!(guard.stat().size, 7);
    assert_eq!(guard.stage(), InitStage::FullyLoaded);
}

#[test]
fn ranged_reads_return_requested_window_and_advance_offset() {
    let body: Vec<u8> = (0..=255).cycle().take(500).map(|b: u16| b as u8).collect();
    let backend = MockBackend::default()
        .dir("", vec![file_entry("big.bin", Some(500))])
        .body("big.bin", &body);
    let fs = mounted(backend);
    let data = fs.read("/big.bin", 100, Some(50)).expect("ranged read");
    assert_eq!(data, body[50..150].to_vec());
    let node = fs.node("/big.bin").expect("cached");
    let guard = node.lock().expect("node lock");
    let Node::File(file) = &*guard else {
        panic!("expected file node");
    };
    assert!(file.seekable);
    assert_eq!(file.offset, 150);
}

#[test]
fn full_body_answers_only_satisfy_offset_zero() {
    let backend = MockBackend::default()
        .dir("", vec![file_entry("plain.txt", Some(12))])
        .body("plain.txt", b"hello stream")
        .unranged("plain.txt");
    let fs = mounted(backend);
    let data = fs.read("/plain.txt", 5, Some(0)).expect("read at zero");
    assert_eq!(data, b"hello");
    let err = fs.read("/plain.txt", 5, Some(6)).expect_err("offset past zero");
    assert!(matches!(err, FsError::Protocol(_)), "{err:?}");
}

#[test]
fn out_of_range_reads_refresh_stale_metadata() {
    // The listing claims 500 bytes; the server only has 40.
    let backend = MockBackend::default()
        .dir("", vec![file_entry("stale.bin", Some(500))])
        .body("stale.bin", &[b'z'; 40]);
    let fs = mounted(backend);
    // Seed the node from the listing so the stale size is what's cached.
    fs.readdir("/").expect("readdir");
    assert_eq!(fs.getattr("/stale.bin").expect("stat").size, 500);
    let err = fs.read("/stale.bin", 100, Some(100)).expect_err("stale read");
    assert!(matches!(err, FsError::Protocol(_)), "{err:?}");
    // The failed read corrected the cached size.
    assert_eq!(fs.getattr("/stale.bin").expect("stat").size, 40);
}

#[test]
fn write_access_is_never_granted() {
    let fs = mounted(two_level_backend());
    let err = fs.access("/a.txt", libc::W_OK).expect_err("write access");
    assert!(matches!(err, FsError::PermissionDenied));
    fs.access("/a.txt", libc::R_OK).expect("read access");
    fs.access("/sub", libc::R_OK | libc::X_OK).expect("traverse");
}

#[test]
fn forbidden_files_lose_their_permission_bits() {
    let backend = MockBackend::default()
        .dir("", vec![file_entry("secret.bin", Some(9))])
        .forbid("secret.bin");
    let fs = mounted(backend);
    let stat = fs.getattr("/secret.bin").expect("stat survives 403");
    assert_eq!(stat.mode & 0o777, 0);
    let err = fs.access("/secret.bin", libc::R_OK).expect_err("read bit");
    assert!(matches!(err, FsError::PermissionDenied));
    let err = fs.open("/secret.bin").expect_err("open");
    assert!(matches!(err, FsError::PermissionDenied));
}

#[test]
fn missing_paths_report_not_found() {
    let fs = mounted(two_level_backend());
    let err = fs.getattr("/ghost.txt").expect_err("missing");
    assert!(matches!(err, FsError::NotFound));
    let err = fs.open("/ghost.txt").expect_err("open missing");
    assert!(matches!(err, FsError::NotFound));
}

#[test]
fn directories_and_files_reject_mismatched_handles() {
    let fs = mounted(two_level_backend());
    let err = fs.open("/sub").expect_err("open dir");
    assert!(matches!(err, FsError::IsADirectory));
    let err = fs.opendir("/a.txt").expect_err("opendir file");
    assert!(matches!(err, FsError::NotADirectory));
    let err = fs.readdir("/a.txt").expect_err("readdir file");
    assert!(matches!(err, FsError::NotADirectory));
}

#[test]
fn refresh_replaces_directory_contents() {
    let fs = mounted(two_level_backend());
    fs.readdir("/").expect("readdir");
    fs.refresh("/").expect("refresh");
    let node = fs.node("/").expect("root");
    let guard = node.lock().expect("node lock");
    let Node::Dir(dir) = &*guard else {
        panic!("expected directory node");
    };
    assert_eq!(dir.children, [".", "..", "a.txt", "sub"]);
}
