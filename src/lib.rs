// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Expose HTML directory listings as a read-only filesystem.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Mount a remote HTML directory index (Apache/nginx `autoindex`) as a
//! navigable read-only file tree.
//!
//! The listing parser infers structured entries from heterogeneous
//! markup; the HTTP backend resolves paths with HEAD/GET probes; the
//! caching adapter synthesizes POSIX metadata and serves byte-ranged
//! reads.

/// Listing entry model plus size and date/time parsing.
pub mod entry;
/// Error taxonomy and errno mapping.
pub mod error;
/// Caching filesystem adapter.
pub mod fs;
/// HTTP implementation of the remote backend contract.
pub mod http;
/// HTML listing extraction strategies.
pub mod listing;
/// FUSE mount bridge.
pub mod mount;
/// Remote path abstraction and backend contract.
pub mod remote;

pub use entry::FileEntry;
pub use error::FsError;
pub use fs::IndexFs;
pub use http::{HttpBackend, HttpOptions};
pub use listing::Listing;
pub use remote::{FileStat, NodeKind, Probe, RangeRead, RemoteBackend, RemotePath};
