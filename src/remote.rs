// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Define the remote path value type and the backend contract.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{Cursor, Read, Seek, SeekFrom};

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

use crate::entry::{format_size, FileEntry};
use crate::error::FsError;

/// Percent-encoding set for serialized path segments: everything except
/// unreserved characters.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// The closed node-kind tag shared by backends and the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A regular file.
    File,
    /// A directory.
    Directory,
}

/// POSIX-shaped metadata synthesized for one remote node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// Type bits plus permission bits.
    pub mode: u32,
    /// Link count; directories track their entry count here.
    pub nlink: u32,
    /// Owner uid (always 0; the remote has no owners).
    pub uid: u32,
    /// Owner gid (always 0).
    pub gid: u32,
    /// Size in bytes.
    pub size: u64,
    /// Access time, Unix seconds.
    pub atime: i64,
    /// Modification time, Unix seconds.
    pub mtime: i64,
    /// Change time, Unix seconds.
    pub ctime: i64,
}

impl FileStat {
    /// Default metadata for a regular file: read-only, one link.
    #[must_use]
    pub fn file() -> Self {
        Self {
            mode: libc::S_IFREG as u32 | 0o444,
            nlink: 1,
            uid: 0,
            gid: 0,
            size: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
        }
    }

    /// Default metadata for a directory: read/execute, two links.
    #[must_use]
    pub fn directory() -> Self {
        Self {
            mode: libc::S_IFDIR as u32 | 0o555,
            nlink: 2,
            ..Self::file()
        }
    }

    /// Set atime, mtime, and ctime together.
    pub fn set_time(&mut self, secs: i64) {
        self.atime = secs;
        self.mtime = secs;
        self.ctime = secs;
    }

    /// Replace the permission bits, keeping or switching the type bits.
    pub fn set_mode(&mut self, bits: u32, is_dir: bool) {
        let kind = if is_dir {
            libc::S_IFDIR as u32
        } else {
            libc::S_IFREG as u32
        };
        self.mode = kind | bits;
    }

    /// True when the type bits mark a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32
    }
}

impl fmt::Display for FileStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<FileStat mode={:o}, size={}, mtime={}>",
            self.mode,
            format_size(self.size),
            self.mtime
        )
    }
}

/// An immutable, hierarchical remote location: scheme, authority, and
/// decoded path segments. Structural operations never touch the network.
///
/// Two paths are equal iff their authority and segments are equal.
#[derive(Debug, Clone)]
pub struct RemotePath {
    scheme: String,
    authority: String,
    segments: Vec<String>,
}

impl RemotePath {
    /// Parse a URI string into its components.
    pub fn parse(uri: &str) -> Result<Self, FsError> {
        let url = Url::parse(uri)
            .map_err(|err| FsError::Protocol(format!("invalid url {uri}: {err}")))?;
        if !url.has_host() {
            return Err(FsError::Protocol(format!("url {uri} has no authority")));
        }
        let segments = url
            .path_segments()
            .map(|parts| {
                parts
                    .filter(|segment| !segment.is_empty())
                    .map(|segment| {
                        percent_encoding::percent_decode_str(segment)
                            .decode_utf8_lossy()
                            .into_owned()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            scheme: url.scheme().to_owned(),
            authority: url.authority().to_owned(),
            segments,
        })
    }

    /// The URI scheme.
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The URI authority (host, port, userinfo).
    #[must_use]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// The decoded path segments, root-first.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The last segment, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// True at the authority root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// The containing path, or `None` at the root.
    #[must_use]
    pub fn parent(&self) -> Option<RemotePath> {
        if self.segments.is_empty() {
            return None;
        }
        let mut parent = self.clone();
        parent.segments.pop();
        Some(parent)
    }

    /// Append one or more segments; slashes in `relative` split segments,
    /// empty pieces are dropped.
    #[must_use]
    pub fn join(&self, relative: &str) -> RemotePath {
        let mut joined = self.clone();
        for segment in relative.split('/') {
            if !segment.is_empty() {
                joined.segments.push(segment.to_owned());
            }
        }
        joined
    }

    /// Serialize back to a URI, re-encoding each segment.
    #[must_use]
    pub fn to_uri(&self) -> String {
        let mut uri = format!("{}://{}", self.scheme, self.authority);
        for segment in &self.segments {
            uri.push('/');
            uri.push_str(&utf8_percent_encode(segment, SEGMENT).to_string());
        }
        if self.segments.is_empty() {
            uri.push('/');
        }
        uri
    }

    /// Serialize as a directory URI (trailing slash), the form listing
    /// servers expect.
    #[must_use]
    pub fn to_dir_uri(&self) -> String {
        let mut uri = self.to_uri();
        if !uri.ends_with('/') {
            uri.push('/');
        }
        uri
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

impl PartialEq for RemotePath {
    fn eq(&self, other: &Self) -> bool {
        self.authority == other.authority && self.segments == other.segments
    }
}

impl Eq for RemotePath {}

impl Hash for RemotePath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.authority.hash(state);
        self.segments.hash(state);
    }
}

/// Explicit stat outcome: a redirect-to-slash is a directory, not an
/// error to be caught.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// The path is a regular file with the supplied metadata.
    File(FileStat),
    /// The path is a directory with the supplied metadata.
    Directory(FileStat),
}

impl Probe {
    /// The node kind this probe resolved to.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            Probe::File(_) => NodeKind::File,
            Probe::Directory(_) => NodeKind::Directory,
        }
    }

    /// Borrow the metadata regardless of kind.
    #[must_use]
    pub fn stat(&self) -> &FileStat {
        match self {
            Probe::File(stat) | Probe::Directory(stat) => stat,
        }
    }
}

/// Explicit byte-range outcome, replacing raw status interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeRead {
    /// The server honored the range (HTTP 206).
    Ranged(Vec<u8>),
    /// The server sent the whole body from offset zero (HTTP 200).
    Full(Vec<u8>),
    /// The requested range is beyond the resource (HTTP 416); cached
    /// metadata is likely stale.
    OutOfRange,
}

/// Requested decoding for [`RemoteBackend::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Validate the body as UTF-8 text.
    Text,
    /// Raw bytes.
    Binary,
}

/// A fully buffered, seekable reader over one remote resource.
///
/// Backends here offer no true partial I/O: the body is drawn into
/// memory once and consumed from there.
#[derive(Debug)]
pub struct RemoteReader {
    cursor: Cursor<Vec<u8>>,
}

impl RemoteReader {
    /// Wrap a buffered body.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    /// Total buffered length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cursor.get_ref().len()
    }

    /// True when the body is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cursor.get_ref().is_empty()
    }

    /// Consume the reader, returning the buffered bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.cursor.into_inner()
    }
}

impl Read for RemoteReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for RemoteReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.cursor.seek(pos)
    }
}

/// One child discovered by a directory listing.
#[derive(Debug, Clone)]
pub struct RemoteChild {
    /// The child's remote path.
    pub path: RemotePath,
    /// File or directory, from the trailing-slash convention.
    pub kind: NodeKind,
    /// The raw listing entry the child was derived from.
    pub entry: FileEntry,
}

/// A resolved directory listing.
#[derive(Debug, Clone, Default)]
pub struct DirListing {
    /// The page's own label for this directory, when announced.
    pub label: Option<String>,
    /// Discovered children in document order.
    pub children: Vec<RemoteChild>,
    /// Listing document modification time (Unix seconds), when known.
    pub mtime: Option<i64>,
}

/// One directory visited by [`RemoteBackend::walk`].
#[derive(Debug, Clone)]
pub struct WalkEntry {
    /// The directory itself.
    pub dir: RemotePath,
    /// Its subdirectories, in listing order.
    pub dirs: Vec<RemotePath>,
    /// Its files, in listing order.
    pub files: Vec<RemotePath>,
}

/// The transport contract a remote path tree is resolved against.
///
/// Implementations own their session state (connection pools, headers,
/// timeouts); derived paths share it by construction, never through
/// process-wide globals.
pub trait RemoteBackend {
    /// List the children of a directory path.
    fn list_children(&self, path: &RemotePath) -> Result<DirListing, FsError>;

    /// Classify a path and synthesize its metadata. With
    /// `follow_redirects` the probe chases redirects to the final
    /// resource; without, a redirect answer classifies the path as a
    /// directory.
    fn stat(&self, path: &RemotePath, follow_redirects: bool) -> Result<Probe, FsError>;

    /// Fetch the whole resource into a seekable in-memory reader.
    fn open(&self, path: &RemotePath, mode: OpenMode) -> Result<RemoteReader, FsError>;

    /// Read the inclusive byte range `offset..=end`. The default fetches
    /// the full body, for transports without range support.
    fn read_range(&self, path: &RemotePath, offset: u64, end: u64) -> Result<RangeRead, FsError> {
        let _ = (offset, end);
        let reader = self.open(path, OpenMode::Binary)?;
        Ok(RangeRead::Full(reader.into_bytes()))
    }

    /// Fetch the whole resource as bytes.
    fn read_all_bytes(&self, path: &RemotePath) -> Result<Vec<u8>, FsError> {
        Ok(self.open(path, OpenMode::Binary)?.into_bytes())
    }

    /// Fetch the whole resource as UTF-8 text.
    fn read_all_text(&self, path: &RemotePath) -> Result<String, FsError> {
        let bytes = self.open(path, OpenMode::Text)?.into_bytes();
        String::from_utf8(bytes)
            .map_err(|_| FsError::Transport("response body is not valid UTF-8".to_owned()))
    }

    /// Whether the path resolves at all. Forbidden resources exist.
    fn exists(&self, path: &RemotePath) -> Result<bool, FsError> {
        match self.stat(path, true) {
            Ok(_) => Ok(true),
            Err(FsError::NotFound) => Ok(false),
            Err(FsError::PermissionDenied) => Ok(true),
            Err(err) => Err(err),
        }
    }

    /// Whether the path resolves to a directory.
    fn is_dir(&self, path: &RemotePath) -> Result<bool, FsError> {
        match self.stat(path, true) {
            Ok(probe) => Ok(probe.kind() == NodeKind::Directory),
            Err(FsError::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Whether the path resolves to a regular file.
    fn is_file(&self, path: &RemotePath) -> Result<bool, FsError> {
        match self.stat(path, true) {
            Ok(probe) => Ok(probe.kind() == NodeKind::File),
            Err(FsError::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Depth-first traversal from `root` using an explicit stack.
    ///
    /// Listing failures are handed to `on_error` and the affected
    /// directory is skipped; the walk itself never aborts.
    fn walk(
        &self,
        root: &RemotePath,
        on_error: &mut dyn FnMut(&RemotePath, &FsError),
    ) -> Vec<WalkEntry> {
        let mut visited = Vec::new();
        let mut stack = vec![root.clone()];
        while let Some(dir) = stack.pop() {
            let listing = match self.list_children(&dir) {
                Ok(listing) => listing,
                Err(err) => {
                    on_error(&dir, &err);
                    continue;
                }
            };
            let mut dirs = Vec::new();
            let mut files = Vec::new();
            for child in listing.children {
                match child.kind {
                    NodeKind::Directory => dirs.push(child.path),
                    NodeKind::File => files.push(child.path),
                }
            }
            for sub in dirs.iter().rev() {
                stack.push(sub.clone());
            }
            visited.push(WalkEntry { dir, dirs, files });
        }
        visited
    }
}
