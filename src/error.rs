// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Define the indexfs error taxonomy and errno mapping.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use thiserror::Error;

/// Errors surfaced by the listing parser, remote backends, and the
/// filesystem adapter.
#[derive(Debug, Error)]
pub enum FsError {
    /// The remote resource does not exist (HTTP 404 or a cached negative).
    #[error("not found")]
    NotFound,
    /// The remote resource is forbidden, or write access was requested.
    #[error("permission denied")]
    PermissionDenied,
    /// The server answered in a way the protocol does not allow here,
    /// e.g. a full body for a non-zero ranged request.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// Any other non-2xx HTTP status.
    #[error("unexpected HTTP status {0}")]
    Http(u16),
    /// Transport-level failure (connect, timeout, broken stream).
    #[error("transport error: {0}")]
    Transport(String),
    /// The listing body could not be interpreted by any strategy.
    #[error("listing parse failed: {0}")]
    Parse(String),
    /// A directory operation was applied to a file node.
    #[error("not a directory")]
    NotADirectory,
    /// A file operation was applied to a directory node.
    #[error("is a directory")]
    IsADirectory,
}

impl FsError {
    /// Map the taxonomy onto the errno codes the host layer speaks.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::PermissionDenied => libc::EACCES,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::IsADirectory => libc::EISDIR,
            _ => libc::EIO,
        }
    }
}

impl From<std::io::Error> for FsError {
    fn from(err: std::io::Error) -> Self {
        FsError::Transport(err.to_string())
    }
}
